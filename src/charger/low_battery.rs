// Low battery warnings
//
// Three thresholds, too_low < low < low_ex (low_ex optional). Each
// warning fires once per downward crossing; a flag only clears when
// the voltage is back above its threshold, and clearing a higher flag
// clears the ones below it. Crossing a lower threshold first sets the
// higher flags too, so one deep drop reports once, not three times.
//
// While the low flag holds, the low warning repeats every
// `prompt_interval_s` (0 warns once per crossing).

use embassy_time::{Duration, Instant};
use log::{error, info, warn};

use crate::config::LowPowerConfig;
use crate::events::{ChargeEvent, EventSink};

#[derive(Debug, Default)]
pub struct LowBatteryMonitor {
    too_low: bool,
    low: bool,
    low_ex: bool,
    last_prompt: Option<Instant>,
}

impl LowBatteryMonitor {
    pub const fn new() -> Self {
        Self {
            too_low: false,
            low: false,
            low_ex: false,
            last_prompt: None,
        }
    }

    /// Forget every flag, e.g. when external power arrives.
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    pub fn is_low(&self) -> bool {
        self.low
    }

    /// Evaluate one smoothed voltage. Returns true when too_low was
    /// crossed on this call; the caller powers the system off.
    pub fn check<E: EventSink>(
        &mut self,
        mv: u32,
        cfg: &LowPowerConfig,
        now: Instant,
        events: &mut E,
    ) -> bool {
        let ex_enabled = cfg.low_ex_mv != 0;
        let mut tripped = false;

        if mv <= cfg.too_low_mv as u32 {
            if !self.too_low {
                error!("battery: {}mV too low", mv);
                self.too_low = true;
                self.low = true;
                self.low_ex = ex_enabled;
                self.last_prompt = Some(now);
                events.notify(ChargeEvent::BatteryTooLow);
                tripped = true;
            }
        } else {
            self.too_low = false;
        }

        if mv <= cfg.low_mv as u32 {
            if !self.low {
                warn!("battery: {}mV low", mv);
                self.low = true;
                self.low_ex = ex_enabled;
                self.last_prompt = Some(now);
                events.notify(ChargeEvent::BatteryLow);
            } else if !self.too_low && self.prompt_due(cfg, now) {
                info!("battery: still low at {}mV", mv);
                self.last_prompt = Some(now);
                events.notify(ChargeEvent::BatteryLow);
            }
        } else {
            self.low = false;
            self.too_low = false;
            self.last_prompt = None;
        }

        if ex_enabled {
            if mv <= cfg.low_ex_mv as u32 {
                if !self.low_ex {
                    warn!("battery: {}mV approaching low", mv);
                    self.low_ex = true;
                    events.notify(ChargeEvent::BatteryLowEx);
                }
            } else {
                self.clear();
            }
        }

        tripped
    }

    fn prompt_due(&self, cfg: &LowPowerConfig, now: Instant) -> bool {
        let interval = Duration::from_secs(cfg.prompt_interval_s as u64);
        cfg.prompt_interval_s != 0
            && self
                .last_prompt
                .is_some_and(|last| now.saturating_duration_since(last) >= interval)
    }
}
