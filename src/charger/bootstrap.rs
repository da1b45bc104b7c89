// Power-on bootstrap for a deeply discharged cell
//
// Runs before the periodic controller starts, when external power is
// present and the cell sits at or below 3.6V. A three stage ladder
// trickles current until the open-circuit voltage clears the last
// gate. The stage only ever climbs. A cell first seen under 2.8V is
// treated as coming out of protection and held at the gentler second
// stage instead of jumping to the third. Once its protection unlocks
// such a cell can sag by half a volt, so its exit is re-read for ten
// seconds and only a reading still past the last gate ends the ladder.
//
// The loop blocks: one round per second, paced by a DelayNs. Losing
// external power twice in a row powers the system off; an hour without
// progress hands over to the watchdog.

use embedded_hal::delay::DelayNs;
use log::{error, info, warn};

use super::ChargeController;
use super::thermal::ThermalBracket;
use crate::config::{ChargeConfiguration, MINI_STAGE_COUNT};
use crate::drivers::adc::{self, Calibration};
use crate::events::{ChargeEvent, EventSink};
use crate::hal::{ChargerHal, Control};

/// Bootstrap only runs at or below this open-circuit voltage.
pub const BOOTSTRAP_ENTRY_MV: u32 = 3600;
/// First reading at or under this marks a cell recovering from protection.
pub const PROTECTED_MV: u32 = 2800;
pub const ROUND_MS: u32 = 1000;
/// Rounds a protected cell is re-read before its exit counts.
const PROTECTED_CONFIRM_READS: u8 = 10;
pub const BOOTSTRAP_CEILING_MS: u64 = 60 * 60 * 1000;
/// Consecutive rounds without external power before giving up.
const DC5V_LOSS_ROUNDS: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// Not needed: no external power or cell already above the entry gate.
    Skipped,
    Completed { voltage_mv: u32 },
    PoweredOff,
    WatchdogReboot,
}

enum Reading {
    Stage(u8),
    Exit(u32),
}

pub struct Bootstrap<'a> {
    cfg: &'a ChargeConfiguration,
    cal: Calibration,
    consume_ma: u16,
    stage: u8,
    protected: Option<bool>,
}

impl<'a> Bootstrap<'a> {
    pub fn new(cfg: &'a ChargeConfiguration, cal: Calibration, consume_ma: u16) -> Self {
        Self {
            cfg,
            cal,
            consume_ma,
            stage: 0,
            protected: None,
        }
    }

    pub fn stage(&self) -> u8 {
        self.stage
    }

    pub fn is_protected(&self) -> bool {
        self.protected == Some(true)
    }

    /// Entry check from one open-circuit reading.
    pub fn needed(cfg: &ChargeConfiguration, dc5v_present: bool, ocv_mv: u32) -> bool {
        cfg.mini_charge.enable && dc5v_present && ocv_mv <= BOOTSTRAP_ENTRY_MV
    }

    pub fn run<H: ChargerHal, D: DelayNs>(&mut self, hal: &mut H, delay: &mut D) -> BootstrapOutcome {
        let start = hal.now();
        let mut last_mv = 0;
        let mut dc5v_lost = 0u8;

        hal.set_control(Control::ChargeVoltage, self.cfg.charge_voltage_mv);
        hal.set_charger(true);
        info!("bootstrap: start");

        loop {
            if let Some(mv) = adc::read_ocv_mv(hal, &self.cal) {
                last_mv = mv;
                match self.classify(hal, delay, mv) {
                    Reading::Exit(mv) => {
                        info!("bootstrap: done at {}mV, stage {}", mv, self.stage);
                        return BootstrapOutcome::Completed { voltage_mv: mv };
                    }
                    Reading::Stage(stage) if stage > self.stage => {
                        info!("bootstrap: stage {} at {}mV", stage, mv);
                        self.stage = stage;
                    }
                    Reading::Stage(stage) if stage < self.stage => {
                        warn!("bootstrap: {}mV reads as stage {}, holding {}", mv, stage, self.stage);
                    }
                    Reading::Stage(_) => {}
                }
            }

            if self.stage > 0 {
                let bracket = ThermalBracket::read_now(hal, self.cfg);
                let ma = self.stage_current(bracket);
                if hal.control(Control::ChargeCurrent) != ma {
                    hal.set_control(Control::ChargeCurrent, ma);
                }
            }
            if last_mv != 0 {
                hal.persist_voltage(last_mv);
            }

            if hal.dc5v_detected() {
                dc5v_lost = 0;
            } else {
                dc5v_lost += 1;
                if dc5v_lost >= DC5V_LOSS_ROUNDS {
                    error!("bootstrap: external power lost, powering off");
                    hal.set_charger(false);
                    hal.power_off();
                    return BootstrapOutcome::PoweredOff;
                }
            }

            delay.delay_ms(ROUND_MS);

            if hal.now().saturating_duration_since(start).as_millis() >= BOOTSTRAP_CEILING_MS {
                error!("bootstrap: no progress after an hour at {}mV", last_mv);
                hal.watchdog_reboot();
                return BootstrapOutcome::WatchdogReboot;
            }
        }
    }

    fn classify<H: ChargerHal, D: DelayNs>(
        &mut self,
        hal: &mut H,
        delay: &mut D,
        mv: u32,
    ) -> Reading {
        let protected = *self.protected.get_or_insert(mv <= PROTECTED_MV);
        let gates = self.cfg.mini_charge.stages.map(|s| s.gate_mv as u32);
        let middle = if protected { 2 } else { 3 };

        if mv < gates[0] {
            Reading::Stage(1)
        } else if mv < gates[1] {
            Reading::Stage(middle)
        } else if mv < gates[2] {
            // past the second gate: confirm with a fresh read
            match adc::read_ocv_mv(hal, &self.cal) {
                Some(again) if again < gates[1] => Reading::Stage(middle),
                _ => Reading::Stage(3),
            }
        } else if protected {
            match self.confirm_exit(hal, delay) {
                Some(settled) if settled >= gates[2] => {
                    info!("bootstrap: protected cell settled at {}mV", settled);
                    self.protected = Some(false);
                    Reading::Exit(settled)
                }
                settled => {
                    warn!("bootstrap: protected cell sagged to {}mV", settled.unwrap_or(0));
                    Reading::Stage(self.stage)
                }
            }
        } else {
            Reading::Exit(mv)
        }
    }

    /// Last of a run of one-second OCV reads, or None if any read fails.
    fn confirm_exit<H: ChargerHal, D: DelayNs>(&self, hal: &mut H, delay: &mut D) -> Option<u32> {
        let mut mv = 0;
        for _ in 0..PROTECTED_CONFIRM_READS {
            mv = adc::read_ocv_mv(hal, &self.cal)?;
            delay.delay_ms(ROUND_MS);
        }
        Some(mv)
    }

    /// Stage current, or the per-bracket override when a bracket is
    /// known, plus the system load.
    fn stage_current(&self, bracket: Option<ThermalBracket>) -> u16 {
        let idx = (self.stage.clamp(1, MINI_STAGE_COUNT as u8) - 1) as usize;
        let mini = &self.cfg.mini_charge;
        let base = match (mini.ntc_ma, bracket) {
            (Some(table), Some(b)) => table[idx][b.index()],
            _ => mini.stages[idx].current_ma,
        };
        base.saturating_add(self.consume_ma)
    }
}

impl<H: ChargerHal, E: EventSink> ChargeController<H, E> {
    /// Run the bootstrap if the cell needs it. On completion the measured
    /// voltage seeds the capacity estimate.
    pub fn bootstrap<D: DelayNs>(&mut self, delay: &mut D) -> BootstrapOutcome {
        let present = self.hal.dc5v_detected();
        if !self.cfg.mini_charge.enable || !present {
            return BootstrapOutcome::Skipped;
        }
        let Some(mv) = adc::read_ocv_mv(&mut self.hal, &self.cal) else {
            return BootstrapOutcome::Skipped;
        };
        if !Bootstrap::needed(&self.cfg, present, mv) {
            return BootstrapOutcome::Skipped;
        }

        let outcome = Bootstrap::new(&self.cfg, self.cal, self.consume_ma).run(&mut self.hal, delay);
        if let BootstrapOutcome::Completed { voltage_mv } = outcome {
            let now = self.hal.now();
            self.capacity.seed(voltage_mv, now);
            self.events.notify(ChargeEvent::BootstrapExit);
        }
        outcome
    }
}
