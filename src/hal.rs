// Hardware access seam for the charge controller
//
// Everything the control loop touches on the chip goes through
// ChargerHal: one-shot ADC conversions, a handful of discrete
// control fields, the monotonic clock and the two system exits
// (power off, watchdog reboot). The board module implements it for
// esp32c3; tests implement it with plain fields.

use embassy_time::Instant;

use crate::drivers::adc::{AdcChannel, AdcTimeout, RawCount};

/// Discrete charger controls. Writable fields read back what the
/// hardware latched so the controller can detect a stuck path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// 1 = charger output on.
    ChargerEnable,
    /// Constant-current target in mA.
    ChargeCurrent,
    /// Constant-voltage target in mV.
    ChargeVoltage,
    /// Read-only: comparator output of the external supply detector.
    Dc5vDetect,
}

pub trait ChargerHal {
    /// One conversion, bounded by the implementation's deadline.
    fn read_adc(&mut self, channel: AdcChannel) -> Result<RawCount, AdcTimeout>;

    fn set_control(&mut self, control: Control, value: u16);

    fn control(&self, control: Control) -> u16;

    /// Monotonic time since boot.
    fn now(&self) -> Instant;

    /// Cut system power. On hardware this does not return.
    fn power_off(&mut self);

    /// Force a watchdog reset. On hardware this does not return.
    fn watchdog_reboot(&mut self);

    /// Keep the last smoothed voltage across a warm reset.
    fn persist_voltage(&mut self, _mv: u32) {}

    fn charger_enabled(&self) -> bool {
        self.control(Control::ChargerEnable) != 0
    }

    fn set_charger(&mut self, on: bool) {
        self.set_control(Control::ChargerEnable, on as u16);
    }

    fn dc5v_detected(&self) -> bool {
        self.control(Control::Dc5vDetect) != 0
    }
}
