// Charge state machine
//
// Init -> Low | Precharge, then Low <-> Precharge -> Charge -> Full with
// re-charge back to Charge, and Error as a sink. Voltage decisions are
// taken only on OCV measurements (charger paused, see
// ChargeController::schedule_ocv); everything else in a state is
// periodic bookkeeping counted in ticks.

use core::fmt;

use embassy_time::Instant;
use log::{info, warn};

use super::{ChargeController, OCV_SETTLE_S};
use crate::config::StopMode;
use crate::drivers::adc::{self, AdcChannel};
use crate::events::{ChargeEvent, EventSink};
use crate::hal::ChargerHal;
use crate::kernel::scheduler::TICKS_PER_SECOND;

/// Measurement cadence in precharge.
pub const PRECHARGE_CHECK_PERIOD_S: u16 = 300;
/// Precharge that has not lifted the cell by now gives up on it.
pub const PRECHARGE_TIMEOUT_S: u32 = 1800;
/// Over-voltage probe cadence while charging.
pub const OVP_CHECK_PERIOD_S: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeState {
    Init,
    Low,
    Precharge,
    Charge,
    Full,
    Error,
}

impl ChargeState {
    /// Charger should be sourcing current.
    pub fn is_charging(self) -> bool {
        matches!(self, ChargeState::Precharge | ChargeState::Charge)
    }

    /// Attached to a supply and under thermal supervision.
    pub fn is_supervised(self) -> bool {
        matches!(
            self,
            ChargeState::Precharge | ChargeState::Charge | ChargeState::Full
        )
    }
}

impl fmt::Display for ChargeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChargeState::Init => write!(f, "init"),
            ChargeState::Low => write!(f, "low"),
            ChargeState::Precharge => write!(f, "precharge"),
            ChargeState::Charge => write!(f, "charge"),
            ChargeState::Full => write!(f, "full"),
            ChargeState::Error => write!(f, "error"),
        }
    }
}

pub(super) fn secs_to_ticks(secs: u16) -> u32 {
    secs as u32 * TICKS_PER_SECOND
}

impl<H: ChargerHal, E: EventSink> ChargeController<H, E> {
    pub(super) fn enter(&mut self, next: ChargeState, now: Instant) {
        let prev = self.state;
        if prev == next {
            return;
        }
        info!("charge: {} -> {}", prev, next);
        self.state = next;
        self.state_ticks = 0;
        self.near_full = false;

        match next {
            ChargeState::Precharge => self.precharge_s = 0,
            ChargeState::Charge => {
                if prev == ChargeState::Full {
                    self.charge_begin = Some(now);
                }
                self.thermal.restart_deadline(&self.cfg, now);
            }
            _ => {}
        }

        if next.is_charging() && !self.charging_reported {
            self.charging_reported = true;
            self.events.notify(ChargeEvent::ChargeStart);
        } else if !next.is_charging() && self.charging_reported {
            self.charging_reported = false;
            self.events.notify(ChargeEvent::ChargeStop);
        }
        if next == ChargeState::Full {
            self.events.notify(ChargeEvent::ChargeFull);
        }
    }

    pub(super) fn step(&mut self, measured: Option<u32>, now: Instant) {
        if self.dc5v.is_unpowered() && self.state.is_supervised() {
            self.enter(ChargeState::Low, now);
            return;
        }

        match self.state {
            ChargeState::Init => self.step_init(measured, now),
            ChargeState::Low => self.step_low(now),
            ChargeState::Precharge => self.step_precharge(measured, now),
            ChargeState::Charge => self.step_charge(measured, now),
            ChargeState::Full => self.step_full(measured, now),
            ChargeState::Error => {}
        }
    }

    fn step_init(&mut self, measured: Option<u32>, now: Instant) {
        let Some(v) = measured else { return };
        let pre = &self.cfg.precharge;
        let next = if self.dc5v.is_in() && pre.enable && v <= pre.stop_mv as u32 {
            ChargeState::Precharge
        } else {
            ChargeState::Low
        };
        self.enter(next, now);
    }

    fn step_low(&mut self, now: Instant) {
        if self.dc5v.is_in() && self.capacity.is_seeded() {
            let v = self.capacity.voltage_mv();
            let pre = &self.cfg.precharge;
            let next = if pre.enable && v <= pre.stop_mv as u32 {
                ChargeState::Precharge
            } else if v >= self.cfg.stop_voltage_mv as u32 {
                ChargeState::Full
            } else {
                ChargeState::Charge
            };
            self.enter(next, now);
            return;
        }
        self.periodic_check(self.cfg.battery_check_period_s);
    }

    fn step_precharge(&mut self, measured: Option<u32>, now: Instant) {
        if self.periodic_check(PRECHARGE_CHECK_PERIOD_S) {
            self.precharge_s += PRECHARGE_CHECK_PERIOD_S as u32;
        }
        let Some(v) = measured else { return };

        if v > self.cfg.precharge.stop_mv as u32 {
            self.enter(ChargeState::Charge, now);
        } else if self.precharge_s >= PRECHARGE_TIMEOUT_S {
            warn!(
                "charge: precharge stuck at {}mV after {}s, battery suspect",
                v, self.precharge_s
            );
            self.suspect = true;
            self.enter(ChargeState::Charge, now);
        }
    }

    fn step_charge(&mut self, measured: Option<u32>, now: Instant) {
        if let Some(reason) = self.charge_expired(now) {
            info!("charge: {} elapsed", reason);
            self.enter(ChargeState::Full, now);
            return;
        }

        if self.over_voltage() {
            self.enter(ChargeState::Full, now);
            return;
        }

        let period = if self.near_full {
            self.cfg.full_continue_s
        } else {
            self.cfg.charge_check_period_s
        };
        self.periodic_check(period);

        let Some(v) = measured else { return };
        if self.near_full {
            self.enter(ChargeState::Full, now);
        } else if self.stop_reached(v) {
            if self.cfg.full_continue_s == 0 {
                self.enter(ChargeState::Full, now);
            } else {
                info!(
                    "charge: near full at {}mV {}mA, topping off",
                    v, self.charge_current_ma
                );
                self.near_full = true;
                self.state_ticks = 0;
            }
        }
    }

    fn step_full(&mut self, measured: Option<u32>, now: Instant) {
        self.periodic_check(self.cfg.battery_check_period_s);
        let Some(v) = measured else { return };

        let class = self.thermal.class();
        if v <= self.cfg.precharge.stop_mv as u32 {
            warn!("charge: {}mV after full, battery suspect", v);
            self.suspect = true;
            self.enter(ChargeState::Low, now);
        } else if self.cfg.recharge.enable && v < self.cfg.recharge_threshold_mv(class) as u32 {
            info!("charge: recharge at {}mV", v);
            self.enter(ChargeState::Charge, now);
        }
    }

    /// Count a tick and start an OCV check every `period_s`. Returns true
    /// when one was started.
    fn periodic_check(&mut self, period_s: u16) -> bool {
        self.state_ticks += 1;
        if self.state_ticks < secs_to_ticks(period_s) || self.ocv_wait.is_some() {
            return false;
        }
        self.state_ticks = 0;
        self.schedule_ocv(OCV_SETTLE_S);
        true
    }

    fn charge_expired(&self, now: Instant) -> Option<&'static str> {
        let limit_min = self.cfg.total_time_limit_min as u64;
        let total = limit_min > 0
            && self.charge_begin.is_some_and(|begin| {
                now.saturating_duration_since(begin).as_secs() >= limit_min * 60
            });
        if total {
            Some("total charge time")
        } else if self.thermal.deadline_passed(now) {
            Some("thermal bracket time")
        } else {
            None
        }
    }

    fn over_voltage(&mut self) -> bool {
        let ovp = self.cfg.ovp;
        let due = self.state_ticks > 0 && self.state_ticks % (OVP_CHECK_PERIOD_S * TICKS_PER_SECOND) == 0;
        if !ovp.enable || !due || self.ocv_wait.is_some() {
            return false;
        }
        let Ok(raw) = adc::sample(&mut self.hal, AdcChannel::Battery) else {
            return false;
        };
        let mv = self.cal.battery_mv(raw);
        let limit = ovp.threshold_mv.pick(self.thermal.class()) as u32;
        if mv >= limit {
            warn!("charge: over voltage {}mV >= {}mV", mv, limit);
            return true;
        }
        false
    }

    fn stop_reached(&self, v: u32) -> bool {
        if self.thermal.derating().current_pct == 0 {
            return false;
        }
        let voltage = v >= self.cfg.stop_voltage_mv as u32;
        let avg = self.charge_current_ma;
        let current = avg != 0 && avg < self.cfg.stop_current_ma;
        match self.cfg.stop_mode {
            StopMode::Voltage => voltage,
            StopMode::Current => current,
            StopMode::VoltageAndCurrent => voltage && current,
        }
    }
}
