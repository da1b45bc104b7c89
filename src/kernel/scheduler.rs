// Periodic tick scheduler and lifecycle commands for the charge controller
// NOTE: No dynamic allocation; commands wait in a fixed-size ring
//
// Lifecycle requests (enable, suspend, ...) are queued and applied at
// the start of the next tick, so the controller never sees a command
// in the middle of its pipeline. Ticks only reach the controller while
// the scheduler is armed.
use core::fmt;

use embedded_hal::delay::DelayNs;
use log::{debug, info};

use crate::charger::ChargeController;
use crate::charger::bootstrap::BootstrapOutcome;
use crate::config::ChargeConfiguration;
use crate::events::EventSink;
use crate::hal::ChargerHal;
use crate::kernel::snapshot::SharedSnapshot;

/// Controller period.
pub const TICK_MS: u64 = 100;
pub const TICKS_PER_SECOND: u32 = (1000 / TICK_MS) as u32;

pub const COMMAND_QUEUE_CAP: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Enable,
    Disable,
    Suspend,
    Resume,
    SetConsumeCurrent(u16),
    SetInitialVoltage(u32),
    Configure(ChargeConfiguration),
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Enable => write!(f, "Enable"),
            Command::Disable => write!(f, "Disable"),
            Command::Suspend => write!(f, "Suspend"),
            Command::Resume => write!(f, "Resume"),
            Command::SetConsumeCurrent(ma) => write!(f, "SetConsumeCurrent({}mA)", ma),
            Command::SetInitialVoltage(mv) => write!(f, "SetInitialVoltage({}mV)", mv),
            Command::Configure(_) => write!(f, "Configure"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum PushError {
    /// Queue is full, contains the rejected command
    Full(Command),
}

impl fmt::Display for PushError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PushError::Full(cmd) => write!(f, "command queue full, rejected {}", cmd),
        }
    }
}

// ring buffer for commands
pub struct CommandQueue<const N: usize> {
    buf: [Option<Command>; N],
    head: usize, // next to read
    tail: usize, // next to write
    len: usize,
}

impl<const N: usize> CommandQueue<N> {
    pub const fn new() -> Self {
        Self {
            buf: [None; N],
            head: 0,
            tail: 0,
            len: 0,
        }
    }

    pub fn push(&mut self, cmd: Command) -> Result<(), PushError> {
        if self.len >= N {
            return Err(PushError::Full(cmd));
        }
        self.buf[self.tail] = Some(cmd);
        self.tail = (self.tail + 1) % N;
        self.len += 1;
        Ok(())
    }

    pub fn pop(&mut self) -> Option<Command> {
        if self.len == 0 {
            return None;
        }
        let cmd = self.buf[self.head].take();
        self.head = (self.head + 1) % N;
        self.len -= 1;
        cmd
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn clear(&mut self) {
        while self.pop().is_some() {}
    }
}

impl<const N: usize> Default for CommandQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ChargeScheduler<H, E, D> {
    controller: ChargeController<H, E>,
    delay: D,
    commands: CommandQueue<COMMAND_QUEUE_CAP>,
    armed: bool,
    status: Option<&'static SharedSnapshot>,
}

impl<H: ChargerHal, E: EventSink, D: DelayNs> ChargeScheduler<H, E, D> {
    /// Starts disarmed; nothing runs until `enable`.
    pub fn new(controller: ChargeController<H, E>, delay: D) -> Self {
        Self {
            controller,
            delay,
            commands: CommandQueue::new(),
            armed: false,
            status: None,
        }
    }

    /// Publish a snapshot here after every tick.
    pub fn with_status(mut self, status: &'static SharedSnapshot) -> Self {
        self.status = Some(status);
        self
    }

    pub fn controller(&self) -> &ChargeController<H, E> {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut ChargeController<H, E> {
        &mut self.controller
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Queue a command for the next tick.
    pub fn submit(&mut self, cmd: Command) -> Result<(), PushError> {
        self.commands.push(cmd)
    }

    pub fn pending(&self) -> usize {
        self.commands.len()
    }

    /// Bootstrap if needed, then start ticking. A bootstrap that ended
    /// in power-off or reboot leaves the scheduler disarmed.
    pub fn enable(&mut self) -> BootstrapOutcome {
        if self.armed {
            debug!("sched: already enabled");
            return BootstrapOutcome::Skipped;
        }
        let outcome = self.controller.bootstrap(&mut self.delay);
        if matches!(
            outcome,
            BootstrapOutcome::PoweredOff | BootstrapOutcome::WatchdogReboot
        ) {
            return outcome;
        }
        self.resume();
        outcome
    }

    pub fn disable(&mut self) {
        self.suspend();
        self.controller.stop();
    }

    pub fn suspend(&mut self) {
        if !self.armed {
            return;
        }
        self.armed = false;
        info!("sched: suspended");
    }

    pub fn resume(&mut self) {
        if self.armed {
            return;
        }
        self.controller.resume();
        self.armed = true;
        info!("sched: armed, {}ms tick", TICK_MS);
    }

    /// One scheduler period: drain commands, tick if armed, publish.
    pub fn on_tick(&mut self) {
        while let Some(cmd) = self.commands.pop() {
            self.apply(cmd);
        }
        if self.armed {
            self.controller.tick();
        }
        if let Some(status) = self.status {
            status.publish(self.controller.snapshot());
        }
    }

    fn apply(&mut self, cmd: Command) {
        debug!("sched: {}", cmd);
        match cmd {
            Command::Enable => {
                self.enable();
            }
            Command::Disable => self.disable(),
            Command::Suspend => self.suspend(),
            Command::Resume => self.resume(),
            Command::SetConsumeCurrent(ma) => self.controller.set_consume_current(ma),
            Command::SetInitialVoltage(mv) => self.controller.set_initial_voltage(mv),
            Command::Configure(cfg) => {
                // rejection is logged by the controller, old record stays
                let _ = self.controller.set_config(cfg);
            }
        }
    }
}
