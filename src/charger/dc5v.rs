// External supply (DC5V) presence monitor
//
// Classifies the supply every tick from the detect comparator and the
// DC5V ADC, then debounces. Pending (detector high, rail sagging) is a
// bypass class so the controller reacts on the first sample.
//
// Plug-in arms the charger 500ms later; plug-out cancels that and
// drops the current target to the precharge level straight away.

use core::fmt;

use embassy_time::{Duration, Instant};
use log::info;

use crate::config::ChargeConfiguration;
use crate::drivers::adc::{self, AdcChannel, Calibration};
use crate::events::{ChargeEvent, EventSink};
use crate::hal::{ChargerHal, Control};
use crate::kernel::debounce::{Debouncer, Transition};

/// Settle time between confirmed plug-in and charger enable.
pub const ENABLE_DELAY_MS: u64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dc5vState {
    Out,
    In,
    Pending,
    Standby,
}

impl fmt::Display for Dc5vState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dc5vState::Out => write!(f, "out"),
            Dc5vState::In => write!(f, "in"),
            Dc5vState::Pending => write!(f, "pending"),
            Dc5vState::Standby => write!(f, "standby"),
        }
    }
}

pub struct Dc5vMonitor {
    debounce: Debouncer<Dc5vState>,
    enable_at: Option<Instant>,
}

impl Dc5vMonitor {
    pub fn new(window: usize) -> Self {
        Self {
            debounce: Debouncer::new(window).with_bypass(Dc5vState::Pending),
            enable_at: None,
        }
    }

    pub fn classify(detect: bool, dc5v_mv: u32, cfg: &ChargeConfiguration) -> Dc5vState {
        match (detect, dc5v_mv) {
            (true, mv) if mv >= cfg.dc5v_in_min_mv as u32 => Dc5vState::In,
            (true, _) => Dc5vState::Pending,
            (false, mv) if mv >= cfg.dc5v_standby_min_mv as u32 => Dc5vState::Standby,
            (false, _) => Dc5vState::Out,
        }
    }

    pub fn state(&self) -> Option<Dc5vState> {
        self.debounce.confirmed()
    }

    pub fn is_in(&self) -> bool {
        self.state() == Some(Dc5vState::In)
    }

    /// Out or Standby: nothing to charge from.
    pub fn is_unpowered(&self) -> bool {
        matches!(self.state(), Some(Dc5vState::Out | Dc5vState::Standby))
    }

    pub fn set_window(&mut self, window: usize) {
        self.debounce.set_window_len(window);
    }

    /// Back to unconfirmed; the next stable reading is reported afresh.
    pub fn reset(&mut self, window: usize) {
        self.debounce.set_window_len(window);
        self.debounce.reset();
        self.enable_at = None;
    }

    /// Sample, classify, debounce and act on a confirmed change.
    pub fn update<H: ChargerHal, E: EventSink>(
        &mut self,
        hal: &mut H,
        events: &mut E,
        cal: &Calibration,
        cfg: &ChargeConfiguration,
        now: Instant,
    ) -> Option<Transition<Dc5vState>> {
        let raw = adc::sample(hal, AdcChannel::Dc5v).ok()?;
        let class = Self::classify(hal.dc5v_detected(), cal.dc5v_mv(raw), cfg);
        let t = self.debounce.feed(class)?;

        match t.from {
            Some(from) => info!("dc5v: {} -> {}", from, t.to),
            None => info!("dc5v: {}", t.to),
        }

        match t.to {
            Dc5vState::In => {
                self.enable_at = Some(now + Duration::from_millis(ENABLE_DELAY_MS));
                events.notify(ChargeEvent::PowerIn);
            }
            Dc5vState::Out => {
                if matches!(t.from, None | Some(Dc5vState::In)) {
                    self.enable_at = None;
                    hal.set_control(Control::ChargeCurrent, cfg.precharge_current_ma());
                }
                if t.from.is_some() {
                    events.notify(ChargeEvent::PowerOut);
                }
            }
            Dc5vState::Standby => {
                events.notify(ChargeEvent::PowerStandby);
            }
            Dc5vState::Pending => {}
        }

        Some(t)
    }

    /// True once when the delayed charger enable comes due.
    pub fn poll_enable(&mut self, now: Instant) -> bool {
        match self.enable_at {
            Some(at) if now >= at => {
                self.enable_at = None;
                true
            }
            _ => false,
        }
    }
}
