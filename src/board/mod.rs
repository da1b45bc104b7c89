//! esp32c3 charger board binding
//!
//! Maps the charger front end onto [`ChargerHal`] so the control core
//! never sees GPIO numbers or ADC attenuation:
//!
//!   GPIO0  ADC1  battery, 1:2 divider
//!   GPIO1  ADC1  DC5V rail, 1:2 divider
//!   GPIO2  ADC1  charger PROG pin (1V at full programmed current)
//!   GPIO3  ADC1  NTC leg
//!   GPIO4  ADC1  NTC reference leg
//!   GPIO5  out   charger CE, high = charging
//!   GPIO6  in    DC5V comparator, high = supply present
//!   GPIO7  out   system power hold, low = cut
//!
//! Readings are rescaled into the PMU count domain drivers::adc expects.
//! The fitted charger sets its current and CV by resistor, so those two
//! targets are kept as latched shadow values; CE is the live control.

use embassy_time::{Duration, Instant};
use esp_hal::{
    Blocking,
    analog::adc::{Adc, AdcCalCurve, AdcConfig, AdcPin, Attenuation},
    gpio::{Input, InputConfig, Level, Output, OutputConfig, Pull},
    peripherals::{ADC1, GPIO0, GPIO1, GPIO2, GPIO3, GPIO4, GPIO5, GPIO6, GPIO7},
};
use log::{debug, error};

use crate::drivers::adc::{
    self, ADC_DEADLINE_MS, AdcChannel, AdcTimeout, RawCount, chargei_ma_to_adc, dc5v_mv_to_adc,
};
use crate::hal::{ChargerHal, Control};

const BATTERY_DIVIDER: u32 = 2;
const DC5V_DIVIDER: u32 = 2;

/// PROG pin voltage at full programmed current, and that current.
const PROG_FULL_MV: u32 = 1000;
const PROG_FULL_MA: u32 = 450;

type Cal = AdcCalCurve<ADC1<'static>>;

/// Peripherals the binding takes over.
pub struct ChargerPins {
    pub adc: ADC1<'static>,
    pub battery: GPIO0<'static>,
    pub dc5v: GPIO1<'static>,
    pub prog: GPIO2<'static>,
    pub ntc: GPIO3<'static>,
    pub ntc_ref: GPIO4<'static>,
    pub charger_en: GPIO5<'static>,
    pub dc5v_detect: GPIO6<'static>,
    pub power_hold: GPIO7<'static>,
}

pub struct BoardHal {
    adc: Adc<'static, ADC1<'static>, Blocking>,
    battery: AdcPin<GPIO0<'static>, ADC1<'static>, Cal>,
    dc5v: AdcPin<GPIO1<'static>, ADC1<'static>, Cal>,
    prog: AdcPin<GPIO2<'static>, ADC1<'static>, Cal>,
    ntc: AdcPin<GPIO3<'static>, ADC1<'static>, Cal>,
    ntc_ref: AdcPin<GPIO4<'static>, ADC1<'static>, Cal>,
    charger_en: Output<'static>,
    dc5v_detect: Input<'static>,
    power_hold: Output<'static>,
    charge_current_ma: u16,
    charge_voltage_mv: u16,
}

// Poll a one-shot conversion until it lands or the deadline passes.
macro_rules! oneshot {
    ($adc:expr, $pin:expr, $deadline:expr) => {{
        loop {
            match $adc.read_oneshot(&mut $pin) {
                Ok(mv) => break Some(mv as u32),
                Err(nb::Error::WouldBlock) if Instant::now() < $deadline => {}
                Err(_) => break None,
            }
        }
    }};
}

impl BoardHal {
    pub fn new(pins: ChargerPins) -> Self {
        let mut adc_cfg = AdcConfig::new();

        // 11dB attenuation for the full 0-3.3V range on every channel
        let battery = adc_cfg.enable_pin_with_cal::<_, Cal>(pins.battery, Attenuation::_11dB);
        let dc5v = adc_cfg.enable_pin_with_cal::<_, Cal>(pins.dc5v, Attenuation::_11dB);
        let prog = adc_cfg.enable_pin_with_cal::<_, Cal>(pins.prog, Attenuation::_11dB);
        let ntc = adc_cfg.enable_pin_with_cal::<_, Cal>(pins.ntc, Attenuation::_11dB);
        let ntc_ref = adc_cfg.enable_pin_with_cal::<_, Cal>(pins.ntc_ref, Attenuation::_11dB);
        let adc = Adc::new(pins.adc, adc_cfg);

        // power hold first, the rail must not drop while we boot
        let power_hold = Output::new(pins.power_hold, Level::High, OutputConfig::default());
        let charger_en = Output::new(pins.charger_en, Level::Low, OutputConfig::default());
        let dc5v_detect = Input::new(
            pins.dc5v_detect,
            InputConfig::default().with_pull(Pull::Down),
        );

        Self {
            adc,
            battery,
            dc5v,
            prog,
            ntc,
            ntc_ref,
            charger_en,
            dc5v_detect,
            power_hold,
            charge_current_ma: 0,
            charge_voltage_mv: 0,
        }
    }

    fn pin_mv(&mut self, channel: AdcChannel) -> Option<u32> {
        let deadline = Instant::now() + Duration::from_millis(ADC_DEADLINE_MS);
        match channel {
            AdcChannel::Battery => oneshot!(self.adc, self.battery, deadline),
            AdcChannel::Dc5v => oneshot!(self.adc, self.dc5v, deadline),
            AdcChannel::ChargeCurrent => oneshot!(self.adc, self.prog, deadline),
            AdcChannel::Ntc => oneshot!(self.adc, self.ntc, deadline),
            AdcChannel::NtcRef => oneshot!(self.adc, self.ntc_ref, deadline),
        }
    }
}

fn to_count(v: u32) -> RawCount {
    v.min(RawCount::MAX as u32) as RawCount
}

impl ChargerHal for BoardHal {
    fn read_adc(&mut self, channel: AdcChannel) -> Result<RawCount, AdcTimeout> {
        let mv = self.pin_mv(channel).ok_or(AdcTimeout(channel))?;
        let count = match channel {
            AdcChannel::Battery => adc::battery_mv_to_adc(mv * BATTERY_DIVIDER),
            AdcChannel::Dc5v => dc5v_mv_to_adc(mv * DC5V_DIVIDER),
            AdcChannel::ChargeCurrent => chargei_ma_to_adc(mv * PROG_FULL_MA / PROG_FULL_MV),
            // ratiometric pair, any common scale works
            AdcChannel::Ntc | AdcChannel::NtcRef => mv,
        };
        Ok(to_count(count))
    }

    fn set_control(&mut self, control: Control, value: u16) {
        match control {
            Control::ChargerEnable => self.charger_en.set_level((value != 0).into()),
            Control::ChargeCurrent => {
                debug!("board: charge current target {}mA", value);
                self.charge_current_ma = value;
            }
            Control::ChargeVoltage => {
                debug!("board: charge voltage target {}mV", value);
                self.charge_voltage_mv = value;
            }
            Control::Dc5vDetect => {}
        }
    }

    fn control(&self, control: Control) -> u16 {
        match control {
            Control::ChargerEnable => self.charger_en.is_set_high() as u16,
            Control::ChargeCurrent => self.charge_current_ma,
            Control::ChargeVoltage => self.charge_voltage_mv,
            Control::Dc5vDetect => self.dc5v_detect.is_high() as u16,
        }
    }

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn power_off(&mut self) {
        error!("board: releasing power hold");
        self.charger_en.set_low();
        self.power_hold.set_low();
    }

    fn watchdog_reboot(&mut self) {
        error!("board: reset");
        esp_hal::system::software_reset();
    }
}
