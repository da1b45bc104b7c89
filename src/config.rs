// Charge configuration record
//
// Loaded once by the configuration store and handed to the controller.
// Only replaceable through ChargeController::set_config, which runs
// validate() first and keeps the previous record on error. Every value
// is in physical units; the board maps them onto its registers.
//
// Defaults are the 4.2V single-cell profile.

use core::fmt;

use crate::kernel::debounce::MAX_WINDOW;

pub const LEVEL_COUNT: usize = 11;
pub const NTC_RANGE_COUNT: usize = 5;
pub const MINI_STAGE_COUNT: usize = 3;

/// Headroom kept between the CV target and the stop voltage.
pub const STOP_VOLTAGE_MARGIN_MV: u16 = 20;

/// Ring bounds for the battery sample window (100ms per sample).
pub const BATTERY_SAMPLES_MIN: u8 = 10;
pub const BATTERY_SAMPLES_MAX: u8 = 32;

/// Charger current step table, mA.
pub const CURRENT_STEPS_MA: [u16; 16] = [
    20, 30, 40, 50, 60, 70, 80, 90, 100, 150, 200, 250, 300, 350, 400, 450,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    Voltage,
    Current,
    VoltageAndCurrent,
}

/// One value per temperature class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerTemperature {
    pub low: u16,
    pub normal: u16,
    pub high: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrechargeConfig {
    pub enable: bool,
    /// Exit gate into normal charge.
    pub stop_mv: u16,
    /// Current = charge current * (step + 1) * 5%.
    pub step: u8,
    pub min_ma: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RechargeConfig {
    pub enable: bool,
    pub threshold_mv: PerTemperature,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OvpConfig {
    pub enable: bool,
    pub threshold_mv: PerTemperature,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MiniStage {
    pub current_ma: u16,
    /// Upper voltage gate of this stage.
    pub gate_mv: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MiniChargeConfig {
    pub enable: bool,
    pub stages: [MiniStage; MINI_STAGE_COUNT],
    /// Per stage, per NTC bracket currents, used as-is once a bracket is
    /// known. 0 holds the charger idle in that bracket.
    pub ntc_ma: Option<[[u16; NTC_RANGE_COUNT]; MINI_STAGE_COUNT]>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LowPowerConfig {
    pub too_low_mv: u16,
    pub low_mv: u16,
    /// 0 disables the extra warning.
    pub low_ex_mv: u16,
    pub prompt_interval_s: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NtcRange {
    pub adc_min: u16,
    pub adc_max: u16,
    /// Share of the nominal charge current, 0..=100.
    pub current_pct: u8,
    pub cv_limit_mv: Option<u16>,
    /// Minutes; 0 is unlimited.
    pub time_limit_min: u16,
}

impl NtcRange {
    pub fn is_active(&self) -> bool {
        self.adc_min < self.adc_max
    }

    pub fn contains(&self, ratio: u32) -> bool {
        self.is_active() && ratio >= self.adc_min as u32 && ratio <= self.adc_max as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NtcConfig {
    pub enable: bool,
    pub debounce_s: u8,
    pub ranges: [NtcRange; NTC_RANGE_COUNT],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmoothingConfig {
    pub ascend_pct_per_min: u8,
    pub descend_pct_per_min: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChargeConfiguration {
    pub charge_current_ma: u16,
    pub charge_voltage_mv: u16,
    pub stop_mode: StopMode,
    pub stop_voltage_mv: u16,
    pub stop_current_ma: u16,
    pub precharge: PrechargeConfig,
    pub recharge: RechargeConfig,
    pub ovp: OvpConfig,
    /// Minutes; 0 disables.
    pub total_time_limit_min: u16,
    pub battery_check_period_s: u16,
    pub charge_check_period_s: u16,
    pub full_continue_s: u16,
    pub dc5v_debounce_ms: u16,
    pub dc5v_in_min_mv: u16,
    pub dc5v_standby_min_mv: u16,
    pub mini_charge: MiniChargeConfig,
    pub levels: [u16; LEVEL_COUNT],
    pub low: LowPowerConfig,
    pub ntc: NtcConfig,
    pub smoothing: SmoothingConfig,
    pub battery_samples: u8,
    pub adc_retry_budget: u8,
    pub register_retry_budget: u8,
}

impl Default for ChargeConfiguration {
    fn default() -> Self {
        Self::defaults()
    }
}

impl ChargeConfiguration {
    pub const fn defaults() -> Self {
        Self {
            charge_current_ma: 450,
            charge_voltage_mv: 4200,
            stop_mode: StopMode::VoltageAndCurrent,
            stop_voltage_mv: 4160,
            stop_current_ma: 20,
            precharge: PrechargeConfig {
                enable: true,
                stop_mv: 3300,
                step: 1,
                min_ma: 100,
            },
            recharge: RechargeConfig {
                enable: true,
                threshold_mv: PerTemperature {
                    low: 4110,
                    normal: 4110,
                    high: 3900,
                },
            },
            ovp: OvpConfig {
                enable: true,
                threshold_mv: PerTemperature {
                    low: 4260,
                    normal: 4260,
                    high: 4100,
                },
            },
            total_time_limit_min: 240,
            battery_check_period_s: 60,
            charge_check_period_s: 300,
            full_continue_s: 420,
            dc5v_debounce_ms: 300,
            dc5v_in_min_mv: 4000,
            dc5v_standby_min_mv: 2500,
            mini_charge: MiniChargeConfig {
                enable: true,
                stages: [
                    MiniStage {
                        current_ma: 30,
                        gate_mv: 3000,
                    },
                    MiniStage {
                        current_ma: 70,
                        gate_mv: 3200,
                    },
                    MiniStage {
                        current_ma: 100,
                        gate_mv: 3400,
                    },
                ],
                ntc_ma: Some([
                    [0, 30, 30, 30, 0],
                    [0, 70, 70, 70, 0],
                    [0, 100, 250, 200, 0],
                ]),
            },
            levels: [
                3100, 3400, 3600, 3650, 3700, 3750, 3800, 3900, 3980, 4050, 4100,
            ],
            low: LowPowerConfig {
                too_low_mv: 3100,
                low_mv: 3400,
                low_ex_mv: 0,
                prompt_interval_s: 60,
            },
            ntc: NtcConfig {
                enable: true,
                debounce_s: 5,
                ranges: [
                    // 52..60C
                    NtcRange {
                        adc_min: 0xb7,
                        adc_max: 0xea,
                        current_pct: 0,
                        cv_limit_mv: None,
                        time_limit_min: 0,
                    },
                    // 42..52C
                    NtcRange {
                        adc_min: 0xeb,
                        adc_max: 0x13d,
                        current_pct: 71,
                        cv_limit_mv: Some(4150),
                        time_limit_min: 60,
                    },
                    // 14..42C
                    NtcRange {
                        adc_min: 0x13e,
                        adc_max: 0x279,
                        current_pct: 100,
                        cv_limit_mv: Some(4437),
                        time_limit_min: 240,
                    },
                    // 0..14C
                    NtcRange {
                        adc_min: 0x280,
                        adc_max: 0x313,
                        current_pct: 57,
                        cv_limit_mv: Some(4437),
                        time_limit_min: 60,
                    },
                    // -14..0C
                    NtcRange {
                        adc_min: 0x314,
                        adc_max: 0x37f,
                        current_pct: 0,
                        cv_limit_mv: None,
                        time_limit_min: 0,
                    },
                ],
            },
            smoothing: SmoothingConfig {
                ascend_pct_per_min: 3,
                descend_pct_per_min: 3,
            },
            battery_samples: 30,
            adc_retry_budget: 10,
            register_retry_budget: 3,
        }
    }

    /// Check ordering invariants. The stop voltage is clamped below the
    /// CV target first, as the loader does.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        let ceiling = self.charge_voltage_mv.saturating_sub(STOP_VOLTAGE_MARGIN_MV);
        if self.stop_voltage_mv > ceiling {
            self.stop_voltage_mv = ceiling;
        }

        let low = &self.low;
        if low.too_low_mv >= low.low_mv {
            return Err(ConfigError::LowThresholdOrder);
        }
        if low.low_ex_mv != 0 && low.low_ex_mv <= low.low_mv {
            return Err(ConfigError::LowThresholdOrder);
        }

        if self.levels.windows(2).any(|w| w[0] >= w[1]) {
            return Err(ConfigError::LevelsNotIncreasing);
        }
        if self.stop_voltage_mv <= self.levels[LEVEL_COUNT - 1] {
            return Err(ConfigError::StopVoltageBelowLevels);
        }

        let stages = &self.mini_charge.stages;
        if stages.windows(2).any(|w| w[0].gate_mv >= w[1].gate_mv) {
            return Err(ConfigError::MiniChargeGateOrder);
        }

        let ranges = &self.ntc.ranges;
        for (i, a) in ranges.iter().enumerate() {
            if a.current_pct > 100 {
                return Err(ConfigError::NtcRangeInvalid);
            }
            for b in ranges.iter().skip(i + 1) {
                if a.is_active()
                    && b.is_active()
                    && a.adc_min <= b.adc_max
                    && b.adc_min <= a.adc_max
                {
                    return Err(ConfigError::NtcRangeOverlap);
                }
            }
        }

        let dc5v_window = self.dc5v_window();
        if dc5v_window == 0 || dc5v_window > MAX_WINDOW {
            return Err(ConfigError::DebounceWindow);
        }
        if self.ntc.debounce_s == 0 || self.ntc.debounce_s as usize > MAX_WINDOW {
            return Err(ConfigError::DebounceWindow);
        }
        if !(BATTERY_SAMPLES_MIN..=BATTERY_SAMPLES_MAX).contains(&self.battery_samples) {
            return Err(ConfigError::SampleWindow);
        }

        Ok(())
    }

    /// DC5V debounce window in 100ms ticks.
    pub fn dc5v_window(&self) -> usize {
        (self.dc5v_debounce_ms / crate::kernel::scheduler::TICK_MS as u16) as usize
    }

    /// NTC debounce window, one sample per second.
    pub fn ntc_window(&self) -> usize {
        self.ntc.debounce_s as usize
    }

    /// Precharge current derived from the nominal current, snapped to the
    /// step table and clamped to the configured minimum.
    pub fn precharge_current_ma(&self) -> u16 {
        let ma = self.charge_current_ma as u32 * (self.precharge.step as u32 + 1) * 5 / 100;
        let snapped = snap_to_step(ma as u16);
        snapped.max(self.precharge.min_ma)
    }

    pub fn recharge_threshold_mv(&self, class: TemperatureClass) -> u16 {
        if !self.recharge.enable {
            return self.stop_voltage_mv;
        }
        self.recharge.threshold_mv.pick(class)
    }
}

/// Temperature classes used to pick per-temperature thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemperatureClass {
    Low,
    Normal,
    High,
}

impl PerTemperature {
    pub fn pick(&self, class: TemperatureClass) -> u16 {
        match class {
            TemperatureClass::Low => self.low,
            TemperatureClass::Normal => self.normal,
            TemperatureClass::High => self.high,
        }
    }
}

/// Largest table step not above `ma`, or the smallest step.
pub fn snap_to_step(ma: u16) -> u16 {
    CURRENT_STEPS_MA
        .iter()
        .rev()
        .copied()
        .find(|&s| s <= ma)
        .unwrap_or(CURRENT_STEPS_MA[0])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    LowThresholdOrder,
    LevelsNotIncreasing,
    StopVoltageBelowLevels,
    MiniChargeGateOrder,
    NtcRangeOverlap,
    NtcRangeInvalid,
    DebounceWindow,
    SampleWindow,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::LowThresholdOrder => {
                write!(f, "low battery thresholds must be too_low < low < low_ex")
            }
            ConfigError::LevelsNotIncreasing => write!(f, "capacity levels not strictly increasing"),
            ConfigError::StopVoltageBelowLevels => {
                write!(f, "stop voltage must exceed the top capacity level")
            }
            ConfigError::MiniChargeGateOrder => write!(f, "mini charge gates not increasing"),
            ConfigError::NtcRangeOverlap => write!(f, "ntc ranges overlap"),
            ConfigError::NtcRangeInvalid => write!(f, "ntc derate above 100%"),
            ConfigError::DebounceWindow => write!(f, "debounce window out of range"),
            ConfigError::SampleWindow => write!(f, "battery sample window out of range"),
        }
    }
}
