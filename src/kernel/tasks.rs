// Embassy spawned tasks: the charge tick loop and its channels
//
// The charge task is the only owner of the ChargeScheduler (and through
// it the controller and the board HAL). Everything else talks to it
// through two static channels and reads the published snapshot:
//
//   • `CHARGE_COMMANDS`  in:  lifecycle and configuration requests,
//                              applied at the start of the next tick.
//
//   • `CHARGE_EVENTS`    out: power / battery / charge edges, drained
//                              by whatever shows them to the user.
//
//   • `CHARGE_STATUS`    out: last-known-good snapshot (kernel::snapshot).

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use log::warn;

use crate::events::EventChannel;
use crate::kernel::scheduler::Command;

/// Capacity of the command channel.
///
/// Commands arrive at human or boot pace and are drained every 100 ms,
/// so a few slots are plenty.
pub const COMMAND_CHANNEL_CAP: usize = 4;

pub static CHARGE_COMMANDS: Channel<CriticalSectionRawMutex, Command, COMMAND_CHANNEL_CAP> =
    Channel::new();

/// Events from the charge task. Full channel drops new events.
pub static CHARGE_EVENTS: EventChannel = Channel::new();

/// Non-blocking request to the charge task. Returns false when the
/// command channel is full.
pub fn request(cmd: Command) -> bool {
    match CHARGE_COMMANDS.try_send(cmd) {
        Ok(()) => true,
        Err(_) => {
            warn!("charge: command channel full, dropped {}", cmd);
            false
        }
    }
}

#[cfg(feature = "board")]
mod board_tasks {
    use embassy_futures::select::{Either, select};
    use embassy_time::{Duration, Ticker};
    use esp_hal::delay::Delay;
    use log::{info, warn};

    use super::{CHARGE_COMMANDS, CHARGE_EVENTS};
    use crate::board::BoardHal;
    use crate::events::ChannelSink;
    use crate::kernel::scheduler::{ChargeScheduler, TICK_MS};

    pub type BoardScheduler = ChargeScheduler<BoardHal, ChannelSink, Delay>;

    /// The charge control loop.
    ///
    /// Runs a 100 ms [`Ticker`] and wakes early for commands, which are
    /// queued on the scheduler and applied on the following tick. The
    /// scheduler publishes the snapshot itself after every tick.
    #[embassy_executor::task]
    pub async fn charge_task(mut sched: BoardScheduler) -> ! {
        let mut ticker = Ticker::every(Duration::from_millis(TICK_MS));

        loop {
            match select(ticker.next(), CHARGE_COMMANDS.receive()).await {
                Either::First(()) => sched.on_tick(),
                Either::Second(cmd) => {
                    if let Err(e) = sched.submit(cmd) {
                        warn!("charge: {}", e);
                    }
                }
            }
        }
    }

    /// Drains charge events into the log until a UI consumer takes
    /// the channel over.
    #[embassy_executor::task]
    pub async fn event_log_task() -> ! {
        loop {
            let ev = CHARGE_EVENTS.receive().await;
            info!("event: {}", ev);
        }
    }
}

#[cfg(feature = "board")]
pub use board_tasks::{BoardScheduler, charge_task, event_log_task};
