// NTC thermal derating
//
// Once a second while charging, the NTC ratio is bracketed against the
// configured ranges (index 0 is hottest) and debounced. A confirmed
// bracket change rewrites the derating: share of nominal current, an
// optional CV ceiling and a deadline after which charging in that
// bracket ends. Outside the charging states the CV ceiling is dropped
// and the bracket logic idles.

use core::fmt;

use embassy_time::{Duration, Instant};
use log::{info, warn};

use crate::config::{ChargeConfiguration, NtcRange, NTC_RANGE_COUNT, TemperatureClass};
use crate::drivers::adc;
use crate::hal::ChargerHal;
use crate::kernel::debounce::Debouncer;
use crate::kernel::scheduler::TICKS_PER_SECOND;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThermalBracket {
    HighEx,
    High,
    Normal,
    Low,
    LowEx,
}

impl ThermalBracket {
    pub const ALL: [ThermalBracket; NTC_RANGE_COUNT] = [
        ThermalBracket::HighEx,
        ThermalBracket::High,
        ThermalBracket::Normal,
        ThermalBracket::Low,
        ThermalBracket::LowEx,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn class(self) -> TemperatureClass {
        match self {
            ThermalBracket::HighEx | ThermalBracket::High => TemperatureClass::High,
            ThermalBracket::Normal => TemperatureClass::Normal,
            ThermalBracket::Low | ThermalBracket::LowEx => TemperatureClass::Low,
        }
    }

    /// First active range containing `ratio`.
    pub fn classify(ratio: u32, ranges: &[NtcRange; NTC_RANGE_COUNT]) -> Option<Self> {
        ranges
            .iter()
            .position(|r| r.contains(ratio))
            .map(|i| Self::ALL[i])
    }

    /// Single unfiltered read, for callers that cannot wait for the
    /// debounce (the bootstrap loop).
    pub fn read_now<H: ChargerHal>(hal: &mut H, cfg: &ChargeConfiguration) -> Option<Self> {
        if !cfg.ntc.enable {
            return None;
        }
        Self::classify(adc::sample_ntc_ratio(hal)?, &cfg.ntc.ranges)
    }
}

impl fmt::Display for ThermalBracket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThermalBracket::HighEx => write!(f, "high-ex"),
            ThermalBracket::High => write!(f, "high"),
            ThermalBracket::Normal => write!(f, "normal"),
            ThermalBracket::Low => write!(f, "low"),
            ThermalBracket::LowEx => write!(f, "low-ex"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Derating {
    pub current_pct: u8,
    pub cv_limit_mv: Option<u16>,
    pub deadline: Option<Instant>,
}

impl Derating {
    pub const NONE: Derating = Derating {
        current_pct: 100,
        cv_limit_mv: None,
        deadline: None,
    };

    pub fn apply_current(&self, nominal_ma: u16) -> u16 {
        (nominal_ma as u32 * self.current_pct as u32 / 100) as u16
    }

    pub fn apply_voltage(&self, cv_mv: u16) -> u16 {
        self.cv_limit_mv.map_or(cv_mv, |limit| limit.min(cv_mv))
    }
}

pub struct ThermalController {
    debounce: Debouncer<ThermalBracket>,
    derating: Derating,
    ticks: u32,
}

impl ThermalController {
    pub fn new(window: usize) -> Self {
        Self {
            debounce: Debouncer::new(window),
            derating: Derating::NONE,
            ticks: 0,
        }
    }

    pub fn set_window(&mut self, window: usize) {
        self.debounce.set_window_len(window);
    }

    pub fn reset(&mut self, window: usize) {
        self.debounce.set_window_len(window);
        self.debounce.reset();
        self.derating = Derating::NONE;
        self.ticks = 0;
    }

    pub fn bracket(&self) -> Option<ThermalBracket> {
        self.debounce.confirmed()
    }

    /// Class for per-temperature thresholds; Normal until a bracket is
    /// confirmed.
    pub fn class(&self) -> TemperatureClass {
        self.bracket().map_or(TemperatureClass::Normal, ThermalBracket::class)
    }

    pub fn derating(&self) -> Derating {
        self.derating
    }

    pub fn deadline_passed(&self, now: Instant) -> bool {
        self.derating.deadline.is_some_and(|d| now >= d)
    }

    /// Restart the bracket time limit, on entry to constant-current charge.
    pub fn restart_deadline(&mut self, cfg: &ChargeConfiguration, now: Instant) {
        self.derating.deadline = self
            .bracket()
            .and_then(|b| deadline_for(&cfg.ntc.ranges[b.index()], now));
    }

    /// Called every tick. `active` is true while charging from DC5V.
    pub fn update<H: ChargerHal>(
        &mut self,
        hal: &mut H,
        cfg: &ChargeConfiguration,
        active: bool,
        now: Instant,
    ) -> Option<ThermalBracket> {
        if !cfg.ntc.enable || !active {
            self.derating.cv_limit_mv = None;
            self.ticks = 0;
            return None;
        }

        self.ticks += 1;
        if self.ticks < TICKS_PER_SECOND {
            return None;
        }
        self.ticks = 0;

        let ratio = adc::sample_ntc_ratio(hal)?;
        let Some(bracket) = ThermalBracket::classify(ratio, &cfg.ntc.ranges) else {
            warn!("ntc: ratio {} outside every range", ratio);
            return None;
        };

        let t = self.debounce.feed(bracket)?;
        let range = &cfg.ntc.ranges[bracket.index()];
        self.derating = Derating {
            current_pct: range.current_pct,
            cv_limit_mv: range.cv_limit_mv,
            deadline: deadline_for(range, now),
        };
        match t.from {
            Some(from) => info!(
                "ntc: {} -> {}, {}% current",
                from, bracket, range.current_pct
            ),
            None => info!("ntc: {}, {}% current", bracket, range.current_pct),
        }
        Some(bracket)
    }
}

fn deadline_for(range: &NtcRange, now: Instant) -> Option<Instant> {
    (range.time_limit_min > 0).then(|| now + Duration::from_secs(range.time_limit_min as u64 * 60))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeHal;

    const NORMAL_RATIO: u16 = 0x200;
    const HIGH_RATIO: u16 = 0x100;

    fn run_seconds(tc: &mut ThermalController, hal: &mut FakeHal, cfg: &ChargeConfiguration, s: u32) {
        for _ in 0..s * TICKS_PER_SECOND {
            let now = hal.now();
            tc.update(hal, cfg, true, now);
            hal.advance_ms(100);
        }
    }

    #[test]
    fn classify_picks_range_and_class() {
        let cfg = ChargeConfiguration::defaults();
        let r = &cfg.ntc.ranges;
        assert_eq!(ThermalBracket::classify(0xc0, r), Some(ThermalBracket::HighEx));
        assert_eq!(ThermalBracket::classify(0x200, r), Some(ThermalBracket::Normal));
        assert_eq!(ThermalBracket::classify(0x350, r), Some(ThermalBracket::LowEx));
        assert_eq!(ThermalBracket::classify(0x10, r), None);
        assert_eq!(ThermalBracket::High.class(), TemperatureClass::High);
        assert_eq!(ThermalBracket::LowEx.class(), TemperatureClass::Low);
    }

    #[test]
    fn bracket_change_applies_derating_after_debounce() {
        let cfg = ChargeConfiguration::defaults();
        let mut hal = FakeHal::new();
        let mut tc = ThermalController::new(cfg.ntc_window());
        hal.set_ntc_ratio(NORMAL_RATIO);
        run_seconds(&mut tc, &mut hal, &cfg, 5);
        assert_eq!(tc.bracket(), Some(ThermalBracket::Normal));
        assert_eq!(tc.derating().current_pct, 100);

        hal.set_ntc_ratio(HIGH_RATIO);
        run_seconds(&mut tc, &mut hal, &cfg, 4);
        assert_eq!(tc.bracket(), Some(ThermalBracket::Normal));
        run_seconds(&mut tc, &mut hal, &cfg, 1);
        assert_eq!(tc.bracket(), Some(ThermalBracket::High));

        let d = tc.derating();
        assert_eq!(d.current_pct, 71);
        assert_eq!(d.apply_current(450), 319);
        assert_eq!(d.apply_voltage(4200), 4150);
        assert!(d.deadline.is_some());
        assert_eq!(tc.class(), TemperatureClass::High);
    }

    #[test]
    fn inactive_clears_cv_ceiling() {
        let cfg = ChargeConfiguration::defaults();
        let mut hal = FakeHal::new();
        let mut tc = ThermalController::new(cfg.ntc_window());
        hal.set_ntc_ratio(HIGH_RATIO);
        run_seconds(&mut tc, &mut hal, &cfg, 5);
        assert_eq!(tc.derating().cv_limit_mv, Some(4150));

        tc.update(&mut hal, &cfg, false, Instant::from_secs(10));
        assert_eq!(tc.derating().cv_limit_mv, None);
        assert_eq!(tc.derating().current_pct, 71);
    }

    #[test]
    fn deadline_follows_bracket_limit() {
        let cfg = ChargeConfiguration::defaults();
        let mut hal = FakeHal::new();
        let mut tc = ThermalController::new(cfg.ntc_window());
        hal.set_ntc_ratio(HIGH_RATIO);
        run_seconds(&mut tc, &mut hal, &cfg, 5);

        let start = Instant::from_secs(100);
        tc.restart_deadline(&cfg, start);
        assert!(!tc.deadline_passed(start + Duration::from_secs(59 * 60)));
        assert!(tc.deadline_passed(start + Duration::from_secs(60 * 60)));
    }

    #[test]
    fn disabled_ntc_never_derates() {
        let mut cfg = ChargeConfiguration::defaults();
        cfg.ntc.enable = false;
        let mut hal = FakeHal::new();
        let mut tc = ThermalController::new(cfg.ntc_window());
        hal.set_ntc_ratio(HIGH_RATIO);
        run_seconds(&mut tc, &mut hal, &cfg, 10);
        assert_eq!(tc.bracket(), None);
        assert_eq!(tc.derating(), Derating::NONE);
        assert_eq!(ThermalBracket::read_now(&mut hal, &cfg), None);
    }
}
