// PMU ADC channels and unit conversion
//
// Battery ADC is 300mV full scale over 1024 codes behind the internal
// divider, so mv = adc * 300 / 1024. DC5V and CHARGEI are 12-bit
// against 6000mV and 256mA respectively. NTC is read ratiometric
// against its reference leg to cancel supply drift.
//
// A manufacturing trim offset is applied to every raw count before
// conversion. Zero counts convert to zero (channel not ready).

use core::fmt;

use log::warn;

use crate::hal::ChargerHal;

/// Conversion deadline the board enforces per read.
pub const ADC_DEADLINE_MS: u64 = 20;

/// Battery readings outside this window are treated as glitches.
pub const VALID_MIN_MV: u32 = 2200;
pub const VALID_MAX_MV: u32 = 4800;

const BAT_FULL_SCALE_MV: u32 = 300;
const BAT_CODES: u32 = 1024;

const DC5V_FULL_SCALE_MV: u32 = 6000;
const CHARGEI_FULL_SCALE_MA: u32 = 256;
const CODES_12BIT: u32 = 4096;

const NTC_RATIO_SCALE: u32 = 1000;

pub type RawCount = u16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdcChannel {
    Battery,
    Dc5v,
    ChargeCurrent,
    Ntc,
    NtcRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdcTimeout(pub AdcChannel);

impl fmt::Display for AdcTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "adc conversion timed out on {:?}", self.0)
    }
}

/// Signed trim applied to raw counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Calibration {
    pub offset: i16,
}

impl Calibration {
    pub const fn new(offset: i16) -> Self {
        Self { offset }
    }

    pub fn apply(&self, raw: RawCount) -> u32 {
        (raw as i32 + self.offset as i32).clamp(0, u16::MAX as i32) as u32
    }

    pub fn battery_mv(&self, raw: RawCount) -> u32 {
        battery_adc_to_mv(self.apply(raw))
    }

    pub fn dc5v_mv(&self, raw: RawCount) -> u32 {
        dc5v_adc_to_mv(self.apply(raw))
    }

    pub fn charge_current_ma(&self, raw: RawCount) -> u32 {
        chargei_adc_to_ma(self.apply(raw))
    }
}

pub fn battery_adc_to_mv(adc: u32) -> u32 {
    adc * BAT_FULL_SCALE_MV / BAT_CODES
}

pub fn battery_mv_to_adc(mv: u32) -> u32 {
    mv * BAT_CODES / BAT_FULL_SCALE_MV
}

pub fn dc5v_adc_to_mv(adc: u32) -> u32 {
    if adc == 0 {
        return 0;
    }
    (adc + 1) * DC5V_FULL_SCALE_MV / CODES_12BIT
}

/// Smallest count that converts back to at least `mv`.
pub fn dc5v_mv_to_adc(mv: u32) -> u32 {
    (mv * CODES_12BIT)
        .div_ceil(DC5V_FULL_SCALE_MV)
        .saturating_sub(1)
}

pub fn chargei_ma_to_adc(ma: u32) -> u32 {
    (ma * CODES_12BIT)
        .div_ceil(CHARGEI_FULL_SCALE_MA)
        .saturating_sub(1)
}

pub fn chargei_adc_to_ma(adc: u32) -> u32 {
    if adc == 0 {
        return 0;
    }
    (adc + 1) * CHARGEI_FULL_SCALE_MA / CODES_12BIT
}

pub fn battery_mv_is_valid(mv: u32) -> bool {
    mv > VALID_MIN_MV && mv < VALID_MAX_MV
}

/// One conversion. Timeouts are logged and handed back to the caller,
/// which skips the cycle.
pub fn sample<H: ChargerHal>(hal: &mut H, channel: AdcChannel) -> Result<RawCount, AdcTimeout> {
    hal.read_adc(channel).inspect_err(|e| warn!("adc: {}", e))
}

/// NTC leg over reference leg, scaled by 1000. `None` when either read
/// fails or the reference is zero.
pub fn sample_ntc_ratio<H: ChargerHal>(hal: &mut H) -> Option<u32> {
    let ntc = sample(hal, AdcChannel::Ntc).ok()?;
    let vref = sample(hal, AdcChannel::NtcRef).ok()?;
    if vref == 0 {
        return None;
    }
    Some(ntc as u32 * NTC_RATIO_SCALE / vref as u32)
}

/// Open-circuit battery read: charger off, one sample, charger back on.
/// Returns calibrated mV or `None` on timeout.
pub fn read_ocv_mv<H: ChargerHal>(hal: &mut H, cal: &Calibration) -> Option<u32> {
    hal.set_charger(false);
    let raw = sample(hal, AdcChannel::Battery);
    hal.set_charger(true);
    raw.ok().map(|r| cal.battery_mv(r))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeHal;

    #[test]
    fn battery_transform_matches_reference_scale() {
        assert_eq!(battery_adc_to_mv(0), 0);
        assert_eq!(battery_adc_to_mv(14336), 4200);
        assert_eq!(battery_mv_to_adc(4200), 14336);
        // inverse rounds down by at most one LSB
        let adc = battery_mv_to_adc(3777);
        assert!(3776 <= battery_adc_to_mv(adc) && battery_adc_to_mv(adc) <= 3777);
    }

    #[test]
    fn dc5v_and_chargei_offset_by_one_code() {
        assert_eq!(dc5v_adc_to_mv(0), 0);
        assert_eq!(dc5v_adc_to_mv(4095), 6000);
        assert_eq!(dc5v_adc_to_mv(3413), 5000);
        assert_eq!(chargei_adc_to_ma(0), 0);
        assert_eq!(chargei_adc_to_ma(4095), 256);
        assert_eq!(chargei_adc_to_ma(1599), 100);
        assert_eq!(dc5v_adc_to_mv(dc5v_mv_to_adc(5000)), 5000);
        assert_eq!(dc5v_mv_to_adc(0), 0);
        assert_eq!(chargei_adc_to_ma(chargei_ma_to_adc(15)), 15);
    }

    #[test]
    fn calibration_offset_saturates() {
        let cal = Calibration::new(-20);
        assert_eq!(cal.apply(10), 0);
        assert_eq!(cal.apply(1044), 1024);
        assert_eq!(Calibration::new(34).battery_mv(14302), 4200);
    }

    #[test]
    fn validity_window_is_exclusive() {
        assert!(!battery_mv_is_valid(2200));
        assert!(battery_mv_is_valid(2201));
        assert!(battery_mv_is_valid(4799));
        assert!(!battery_mv_is_valid(4800));
    }

    #[test]
    fn ntc_ratio_needs_both_legs() {
        let mut hal = FakeHal::new();
        hal.ntc_raw = Some(400);
        hal.ntc_ref_raw = Some(1000);
        assert_eq!(sample_ntc_ratio(&mut hal), Some(400));
        hal.ntc_ref_raw = None;
        assert_eq!(sample_ntc_ratio(&mut hal), None);
        hal.ntc_ref_raw = Some(0);
        assert_eq!(sample_ntc_ratio(&mut hal), None);
    }

    #[test]
    fn ocv_read_restores_charger() {
        let mut hal = FakeHal::new();
        hal.set_battery_mv(3800);
        hal.set_charger(true);
        let mv = read_ocv_mv(&mut hal, &Calibration::default());
        assert_eq!(mv, Some(3800));
        assert!(hal.charger_enabled());
        assert_eq!(hal.charger_toggles, 3);
    }
}
