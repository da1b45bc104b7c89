// Host-side doubles for the charger seams
//
// FakeHal keeps every input as a plain field the test sets directly and
// records the outputs the controller drives. Time only moves when a test
// advances it (or a FakeDelay sleeps), so scenarios are deterministic.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use embassy_time::Instant;
use embedded_hal::delay::DelayNs;

use crate::drivers::adc::{AdcChannel, AdcTimeout, RawCount, chargei_ma_to_adc, dc5v_mv_to_adc};
use crate::events::{ChargeEvent, EventSink};
use crate::hal::{ChargerHal, Control};

pub struct FakeHal {
    clock_us: Rc<Cell<u64>>,

    pub battery_mv: u32,
    /// Consumed one per battery read before falling back to the ramp or
    /// `battery_mv`.
    pub battery_script: VecDeque<u32>,
    /// (start mV, mV per elapsed second).
    pub battery_ramp: Option<(u32, u32)>,
    pub battery_timeout: bool,

    pub dc5v_mv: u32,
    pub dc5v_detect: bool,
    /// Consumed one per detect read before falling back to `dc5v_detect`.
    pub dc5v_detect_script: RefCell<VecDeque<bool>>,
    pub dc5v_timeout: bool,

    /// Reported on the current channel while the charger is enabled.
    pub chargei_ma: u32,
    pub ntc_raw: Option<RawCount>,
    pub ntc_ref_raw: Option<RawCount>,
    /// Current control ignores writes and reads back this value.
    pub stuck_current: Option<u16>,

    charger_en: u16,
    charge_current: u16,
    charge_voltage: u16,

    pub charger_toggles: u32,
    pub current_writes: Vec<u16>,
    pub persisted: Vec<u32>,
    pub powered_off: bool,
    pub power_off_calls: u32,
    pub rebooted: bool,
    pub adc_reads: u32,
}

impl FakeHal {
    pub fn new() -> Self {
        Self {
            clock_us: Rc::new(Cell::new(0)),
            battery_mv: 3800,
            battery_script: VecDeque::new(),
            battery_ramp: None,
            battery_timeout: false,
            dc5v_mv: 0,
            dc5v_detect: false,
            dc5v_detect_script: RefCell::new(VecDeque::new()),
            dc5v_timeout: false,
            chargei_ma: 100,
            ntc_raw: None,
            ntc_ref_raw: None,
            stuck_current: None,
            charger_en: 0,
            charge_current: 0,
            charge_voltage: 0,
            charger_toggles: 0,
            current_writes: Vec::new(),
            persisted: Vec::new(),
            powered_off: false,
            power_off_calls: 0,
            rebooted: false,
            adc_reads: 0,
        }
    }

    pub fn set_battery_mv(&mut self, mv: u32) {
        self.battery_mv = mv;
    }

    pub fn advance_ms(&mut self, ms: u64) {
        self.clock_us.set(self.clock_us.get() + ms * 1000);
    }

    pub fn plug_in(&mut self) {
        self.dc5v_detect = true;
        self.dc5v_mv = 5000;
    }

    pub fn unplug(&mut self) {
        self.dc5v_detect = false;
        self.dc5v_mv = 0;
    }

    pub fn set_ntc_ratio(&mut self, ratio: u16) {
        self.ntc_raw = Some(ratio);
        self.ntc_ref_raw = Some(1000);
    }

    fn battery_now(&mut self) -> u32 {
        if let Some(mv) = self.battery_script.pop_front() {
            return mv;
        }
        match self.battery_ramp {
            Some((start, per_s)) => start + per_s * (self.clock_us.get() / 1_000_000) as u32,
            None => self.battery_mv,
        }
    }
}

impl Default for FakeHal {
    fn default() -> Self {
        Self::new()
    }
}

impl ChargerHal for FakeHal {
    fn read_adc(&mut self, channel: AdcChannel) -> Result<RawCount, AdcTimeout> {
        self.adc_reads += 1;
        let counts = match channel {
            AdcChannel::Battery if self.battery_timeout => return Err(AdcTimeout(channel)),
            // smallest count that converts back to the exact mV
            AdcChannel::Battery => (self.battery_now() * 1024).div_ceil(300),
            AdcChannel::Dc5v if self.dc5v_timeout => return Err(AdcTimeout(channel)),
            AdcChannel::Dc5v => dc5v_mv_to_adc(self.dc5v_mv),
            AdcChannel::ChargeCurrent if self.charger_en != 0 => chargei_ma_to_adc(self.chargei_ma),
            AdcChannel::ChargeCurrent => 0,
            AdcChannel::Ntc => return self.ntc_raw.ok_or(AdcTimeout(channel)),
            AdcChannel::NtcRef => return self.ntc_ref_raw.ok_or(AdcTimeout(channel)),
        };
        Ok(counts as RawCount)
    }

    fn set_control(&mut self, control: Control, value: u16) {
        match control {
            Control::ChargerEnable => {
                self.charger_toggles += 1;
                self.charger_en = value;
            }
            Control::ChargeCurrent => {
                self.current_writes.push(value);
                self.charge_current = value;
            }
            Control::ChargeVoltage => self.charge_voltage = value,
            Control::Dc5vDetect => {}
        }
    }

    fn control(&self, control: Control) -> u16 {
        match control {
            Control::ChargerEnable => self.charger_en,
            Control::ChargeCurrent => self.stuck_current.unwrap_or(self.charge_current),
            Control::ChargeVoltage => self.charge_voltage,
            Control::Dc5vDetect => {
                let scripted = self.dc5v_detect_script.borrow_mut().pop_front();
                scripted.unwrap_or(self.dc5v_detect) as u16
            }
        }
    }

    fn now(&self) -> Instant {
        Instant::from_micros(self.clock_us.get())
    }

    fn power_off(&mut self) {
        self.powered_off = true;
        self.power_off_calls += 1;
    }

    fn watchdog_reboot(&mut self) {
        self.rebooted = true;
    }

    fn persist_voltage(&mut self, mv: u32) {
        self.persisted.push(mv);
    }
}

/// Sleeps by advancing the clock of the FakeHal it was made from.
pub struct FakeDelay {
    clock_us: Rc<Cell<u64>>,
}

impl FakeDelay {
    pub fn new(hal: &FakeHal) -> Self {
        Self {
            clock_us: Rc::clone(&hal.clock_us),
        }
    }

    fn advance_us(&mut self, us: u64) {
        self.clock_us.set(self.clock_us.get() + us);
    }
}

impl DelayNs for FakeDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.advance_us((ns as u64).div_ceil(1000));
    }

    fn delay_us(&mut self, us: u32) {
        self.advance_us(us as u64);
    }

    fn delay_ms(&mut self, ms: u32) {
        self.advance_us(ms as u64 * 1000);
    }
}

#[derive(Debug, Default)]
pub struct RecordingSink {
    pub events: Vec<ChargeEvent>,
}

impl RecordingSink {
    pub fn count(&self, event: ChargeEvent) -> usize {
        self.events.iter().filter(|&&e| e == event).count()
    }
}

impl EventSink for RecordingSink {
    fn notify(&mut self, event: ChargeEvent) {
        self.events.push(event);
    }
}
