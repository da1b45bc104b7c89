// Battery charge controller
//
// One ChargeController owns all runtime state for a single cell and its
// charger. The scheduler calls tick() every 100ms; each tick runs the
// same pipeline:
//
//   ADC -> DC5V -> thermal -> OCV completion -> state machine ->
//   capacity / low battery -> charger reprogram
//
// Voltage-based decisions only use open-circuit measurements: the
// charger is paused for a few seconds, then the 80th percentile of the
// last second of samples is folded into the smoothed voltage.

pub mod bootstrap;
pub mod capacity;
pub mod dc5v;
pub mod low_battery;
pub mod state;
pub mod thermal;

use embassy_time::Instant;
use log::{debug, error, info, warn};

use crate::config::{BATTERY_SAMPLES_MAX, ChargeConfiguration, ConfigError};
use crate::drivers::adc::{self, AdcChannel, Calibration, battery_adc_to_mv};
use crate::events::{ChargeEvent, EventSink};
use crate::hal::{ChargerHal, Control};
use crate::kernel::sample::SampleRing;
use crate::kernel::scheduler::TICKS_PER_SECOND;
use crate::kernel::snapshot::Snapshot;

use capacity::CapacityEstimator;
use dc5v::{Dc5vMonitor, Dc5vState};
use low_battery::LowBatteryMonitor;
use state::ChargeState;
use thermal::{ThermalBracket, ThermalController};

pub const BATTERY_RING: usize = BATTERY_SAMPLES_MAX as usize;
/// One charge-current sample per second, averaged over ten.
pub const CHARGEI_RING: usize = 10;

/// Charger pause before an OCV measurement.
pub const OCV_SETTLE_S: u32 = 3;
/// Shorter pause after resume; the charger was already idle.
pub const RESUME_SETTLE_S: u32 = 1;

/// Soft-start: first current level and per-tick increment.
pub const RAMP_STEP_MA: u16 = 60;

pub struct ChargeController<H, E> {
    hal: H,
    events: E,
    cfg: ChargeConfiguration,
    cal: Calibration,

    state: ChargeState,
    dc5v: Dc5vMonitor,
    thermal: ThermalController,
    capacity: CapacityEstimator,
    low: LowBatteryMonitor,

    battery: SampleRing<BATTERY_RING>,
    fresh_samples: u32,
    chargei: SampleRing<CHARGEI_RING>,
    chargei_ticks: u32,
    charge_current_ma: u16,

    // remaining ticks of a running OCV pause
    ocv_wait: Option<u32>,
    state_ticks: u32,
    charge_begin: Option<Instant>,
    precharge_s: u32,
    near_full: bool,
    charging_reported: bool,
    charger_armed: bool,
    ramp_ma: u16,

    adc_failures: u8,
    register_mismatches: u8,
    suspect: bool,
    exists: bool,
    consume_ma: u16,
    percent: Option<u8>,
}

impl<H: ChargerHal, E: EventSink> ChargeController<H, E> {
    pub fn new(
        hal: H,
        events: E,
        mut cfg: ChargeConfiguration,
        cal: Calibration,
    ) -> Result<Self, ConfigError> {
        cfg.validate()?;
        Ok(Self {
            hal,
            events,
            cal,
            state: ChargeState::Init,
            dc5v: Dc5vMonitor::new(cfg.dc5v_window()),
            thermal: ThermalController::new(cfg.ntc_window()),
            capacity: CapacityEstimator::new(),
            low: LowBatteryMonitor::new(),
            battery: SampleRing::new(cfg.battery_samples as usize),
            fresh_samples: 0,
            chargei: SampleRing::new(CHARGEI_RING),
            chargei_ticks: 0,
            charge_current_ma: 0,
            ocv_wait: None,
            state_ticks: 0,
            charge_begin: None,
            precharge_s: 0,
            near_full: false,
            charging_reported: false,
            charger_armed: false,
            ramp_ma: RAMP_STEP_MA,
            adc_failures: 0,
            register_mismatches: 0,
            suspect: false,
            exists: false,
            consume_ma: 0,
            percent: None,
            cfg,
        })
    }

    pub fn hal(&self) -> &H {
        &self.hal
    }

    pub fn hal_mut(&mut self) -> &mut H {
        &mut self.hal
    }

    pub fn events(&self) -> &E {
        &self.events
    }

    pub fn config(&self) -> &ChargeConfiguration {
        &self.cfg
    }

    /// Validate and swap in a new configuration. On error the current one
    /// stays in force.
    pub fn set_config(&mut self, mut cfg: ChargeConfiguration) -> Result<(), ConfigError> {
        cfg.validate().inspect_err(|e| warn!("charge: config rejected: {}", e))?;
        if cfg.battery_samples != self.cfg.battery_samples {
            self.battery.resize(cfg.battery_samples as usize);
            self.fresh_samples = 0;
        }
        self.dc5v.set_window(cfg.dc5v_window());
        self.thermal.set_window(cfg.ntc_window());
        self.cfg = cfg;
        info!("charge: configuration updated");
        Ok(())
    }

    // queries

    pub fn state(&self) -> ChargeState {
        self.state
    }

    pub fn percent(&self) -> u8 {
        self.percent.unwrap_or(0)
    }

    pub fn permillage(&self) -> u16 {
        self.capacity.permillage(&self.cfg)
    }

    pub fn voltage_mv(&self) -> u32 {
        self.capacity.voltage_mv()
    }

    pub fn is_full(&self) -> bool {
        self.state == ChargeState::Full
    }

    /// Last OCV measurement saw a plausible cell.
    pub fn is_exists(&self) -> bool {
        self.exists
    }

    /// Set when precharge timed out or the cell sagged straight after Full.
    pub fn is_suspect(&self) -> bool {
        self.suspect
    }

    pub fn consume_current_ma(&self) -> u16 {
        self.consume_ma
    }

    /// Averaged charge current, mA.
    pub fn charge_current_ma(&self) -> u16 {
        self.charge_current_ma
    }

    pub fn dc5v_state(&self) -> Option<Dc5vState> {
        self.dc5v.state()
    }

    pub fn thermal_bracket(&self) -> Option<ThermalBracket> {
        self.thermal.bracket()
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            voltage_mv: self.voltage_mv(),
            percent: self.percent(),
            permillage: self.permillage(),
            state: self.state,
            dc5v: self.dc5v.state(),
            full: self.is_full(),
            exists: self.exists,
            consume_ma: self.consume_ma,
            low_battery: self.low.is_low(),
        }
    }

    // control

    /// System load drawn alongside the charge current. Added to the
    /// bootstrap stage current.
    pub fn set_consume_current(&mut self, ma: u16) {
        self.consume_ma = ma;
    }

    pub fn set_initial_voltage(&mut self, mv: u32) {
        self.capacity.set_initial_voltage(mv);
    }

    /// Restart supervision: supply and thermal debounce start over, the
    /// state returns to Init and a short OCV check is scheduled. Error
    /// survives.
    pub fn resume(&mut self) {
        let now = self.hal.now();
        if self.state != ChargeState::Error {
            self.enter(ChargeState::Init, now);
        }
        self.dc5v.reset(self.cfg.dc5v_window());
        self.thermal.reset(self.cfg.ntc_window());
        self.capacity.reset_anchor();
        self.battery.clear();
        self.chargei.clear();
        self.chargei_ticks = 0;
        self.charge_current_ma = 0;
        self.charger_armed = false;
        self.adc_failures = 0;
        self.register_mismatches = 0;
        self.schedule_ocv(RESUME_SETTLE_S);
        info!("charge: resumed");
    }

    /// Charger off and back to Init until the next resume.
    pub fn stop(&mut self) {
        let now = self.hal.now();
        self.charger_off();
        self.ocv_wait = None;
        self.charger_armed = false;
        if self.state != ChargeState::Error {
            self.enter(ChargeState::Init, now);
        }
        info!("charge: stopped");
    }

    pub fn tick(&mut self) {
        let now = self.hal.now();
        self.acquire();
        if self.state == ChargeState::Error {
            return;
        }

        self.update_supply(now);
        let active = self.dc5v.is_in() && self.state.is_supervised();
        self.thermal.update(&mut self.hal, &self.cfg, active, now);

        let measured = self.poll_ocv(now);
        self.step(measured, now);
        self.update_capacity(measured);
        self.reprogram();
    }

    fn acquire(&mut self) {
        match adc::sample(&mut self.hal, AdcChannel::Battery) {
            Ok(raw) => {
                self.adc_failures = 0;
                let counts = self.cal.apply(raw);
                if adc::battery_mv_is_valid(battery_adc_to_mv(counts)) {
                    self.battery.push(counts as u16);
                    self.fresh_samples += 1;
                }
            }
            Err(_) => {
                self.adc_failures = self.adc_failures.saturating_add(1);
                if self.adc_failures >= self.cfg.adc_retry_budget {
                    self.fault("battery adc unresponsive");
                    return;
                }
            }
        }

        if !self.state.is_charging() {
            self.chargei_ticks = 0;
            return;
        }
        self.chargei_ticks += 1;
        if self.chargei_ticks < TICKS_PER_SECOND {
            return;
        }
        self.chargei_ticks = 0;
        if let Ok(raw) = adc::sample(&mut self.hal, AdcChannel::ChargeCurrent) {
            self.chargei.push(self.cal.charge_current_ma(raw) as u16);
            self.charge_current_ma = self.chargei.mean_nonzero();
        }
    }

    fn update_supply(&mut self, now: Instant) {
        let t = self
            .dc5v
            .update(&mut self.hal, &mut self.events, &self.cal, &self.cfg, now);
        if let Some(t) = t {
            match t.to {
                Dc5vState::In => self.low.clear(),
                Dc5vState::Out | Dc5vState::Standby => {
                    self.charger_armed = false;
                    if t.from == Some(Dc5vState::In) {
                        self.schedule_ocv(OCV_SETTLE_S);
                    }
                }
                Dc5vState::Pending => {}
            }
        }

        if self.dc5v.poll_enable(now) {
            info!("charge: charger armed");
            self.charger_armed = true;
            self.charge_begin = Some(now);
            self.ramp_ma = RAMP_STEP_MA;
        }
    }

    /// Pause the charger and measure after `settle_s`.
    pub(crate) fn schedule_ocv(&mut self, settle_s: u32) {
        self.ocv_wait = Some(settle_s * TICKS_PER_SECOND);
        self.fresh_samples = 0;
        self.charger_off();
    }

    fn poll_ocv(&mut self, now: Instant) -> Option<u32> {
        let left = self.ocv_wait.as_mut()?;
        *left = left.saturating_sub(1);
        if *left > 0 {
            return None;
        }
        self.ocv_wait = None;

        let window = (self.fresh_samples as usize).min(TICKS_PER_SECOND as usize);
        let Some(counts) = self.battery.percentile(window, 4, 5) else {
            warn!("charge: no valid battery sample for ocv");
            self.exists = false;
            return None;
        };
        self.exists = true;

        let raw_mv = battery_adc_to_mv(counts as u32);
        let mv = self.capacity.update(raw_mv, self.state, &self.cfg, now);
        debug!("charge: ocv {}mV, smoothed {}mV", raw_mv, mv);
        if self.charger_armed {
            self.ramp_ma = RAMP_STEP_MA;
        }
        Some(mv)
    }

    fn update_capacity(&mut self, measured: Option<u32>) {
        if let Some(v) = measured {
            let now = self.hal.now();
            if !self.dc5v.is_in() && self.low.check(v, &self.cfg.low, now, &mut self.events) {
                error!("charge: battery exhausted, powering off");
                self.hal.power_off();
            }
        }

        if !self.capacity.is_seeded() {
            return;
        }
        let pct = self.capacity.percent(self.state, &self.cfg);
        if self.percent != Some(pct) {
            info!("charge: {}% ({}mV)", pct, self.capacity.voltage_mv());
            self.percent = Some(pct);
            self.events.notify(ChargeEvent::CapacityChanged(pct));
            self.hal.persist_voltage(self.capacity.voltage_mv());
        }
    }

    /// Drive the charger outputs from the current state. Runs last in
    /// every tick.
    fn reprogram(&mut self) {
        let derating = self.thermal.derating();
        let nominal = match self.state {
            ChargeState::Precharge => self.cfg.precharge_current_ma(),
            ChargeState::Charge => self.cfg.charge_current_ma,
            _ => 0,
        };
        let target = derating.apply_current(nominal);
        let on = self.charger_armed && self.dc5v.is_in() && self.ocv_wait.is_none() && target > 0;
        if !on {
            self.charger_off();
            return;
        }

        let current = if self.state == ChargeState::Charge {
            let c = self.ramp_ma.min(target);
            self.ramp_ma = self
                .ramp_ma
                .saturating_add(RAMP_STEP_MA)
                .min(self.cfg.charge_current_ma);
            c
        } else {
            target
        };
        let cv = derating.apply_voltage(self.cfg.charge_voltage_mv);

        let latched = self.write_checked(Control::ChargeCurrent, current)
            & self.write_checked(Control::ChargeVoltage, cv);
        if latched {
            self.register_mismatches = 0;
        } else {
            self.register_mismatches += 1;
            if self.register_mismatches >= self.cfg.register_retry_budget {
                self.fault("charger controls not latching");
                return;
            }
        }

        if !self.hal.charger_enabled() {
            self.hal.set_charger(true);
        }
    }

    fn write_checked(&mut self, control: Control, value: u16) -> bool {
        if self.hal.control(control) == value {
            return true;
        }
        self.hal.set_control(control, value);
        let readback = self.hal.control(control);
        if readback != value {
            warn!("charge: {:?} wrote {} read back {}", control, value, readback);
            return false;
        }
        true
    }

    fn charger_off(&mut self) {
        if self.hal.charger_enabled() {
            self.hal.set_charger(false);
        }
    }

    fn fault(&mut self, reason: &str) {
        error!("charge: {}, charging halted", reason);
        self.charger_off();
        let now = self.hal.now();
        self.enter(ChargeState::Error, now);
    }
}
