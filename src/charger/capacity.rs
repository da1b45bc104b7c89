// Battery capacity estimation
//
// Voltage maps to percent through an eleven-point table (0%, 10%, ...
// 100%) with linear interpolation inside each interval, and to a finer
// permillage that extends past the top level up to the stop voltage.
//
// The smoothed voltage moves at most a configured percent per minute:
// while charging it never falls, while discharging it never rises. The
// first measurement seeds it directly. After a gap of an hour or more
// (long suspend) the rate step is skipped but the one-way clamp holds.

use embassy_time::Instant;
use log::debug;

use crate::config::{ChargeConfiguration, LEVEL_COUNT};
use crate::charger::state::ChargeState;

/// Elapsed time above which the rate step is skipped.
pub const RATE_BYPASS_S: u64 = 3600;

const TOP: usize = LEVEL_COUNT - 1;

/// Interval index `i` such that `levels[i] <= mv`, or 0 below the table.
fn interval(levels: &[u16; LEVEL_COUNT], mv: u32) -> usize {
    (1..TOP).rev().find(|&i| mv >= levels[i] as u32).unwrap_or(0)
}

/// Percent for `mv`, capped at 100 once the top level is reached.
pub fn percent_for(levels: &[u16; LEVEL_COUNT], mv: u32) -> u8 {
    if mv >= levels[TOP] as u32 {
        return 100;
    }
    let i = interval(levels, mv);
    let begin = levels[i] as u32;
    let end = levels[i + 1] as u32;
    let mut pct = 100 * i as u32 / 10;
    if mv > begin {
        pct += 100 * (mv - begin) / ((end - begin) * 10);
    }
    pct as u8
}

/// Permillage for `mv`, 0..=1100. Above the top level the last 100
/// steps run up to `stop_mv`.
pub fn permillage_for(levels: &[u16; LEVEL_COUNT], stop_mv: u16, mv: u32) -> u16 {
    let (i, begin, end) = if mv >= levels[TOP] as u32 {
        (TOP, levels[TOP] as u32, stop_mv as u32)
    } else {
        let i = interval(levels, mv);
        (i, levels[i] as u32, levels[i + 1] as u32)
    };
    let mut p = 1000 * i as u32 / 10;
    if mv > begin && end > begin {
        p += 100 * (mv.min(end) - begin) / (end - begin);
    }
    p as u16
}

/// Inverse of `permillage_for`, exact at interval boundaries.
pub fn permillage_to_mv(levels: &[u16; LEVEL_COUNT], stop_mv: u16, p: u32) -> u32 {
    let i = (p / 100) as usize;
    if i > TOP {
        return stop_mv as u32;
    }
    let begin = levels[i] as u32;
    let end = if i == TOP { stop_mv as u32 } else { levels[i + 1] as u32 };
    begin + end.saturating_sub(begin) * (p % 100) / 100
}

pub struct CapacityEstimator {
    real_mv: u32,
    last_eval: Option<Instant>,
    initial_mv: Option<u32>,
    skip_step: bool,
    full_latch: bool,
}

impl CapacityEstimator {
    pub const fn new() -> Self {
        Self {
            real_mv: 0,
            last_eval: None,
            initial_mv: None,
            skip_step: false,
            // a full cell at boot reads 100 without a charge cycle
            full_latch: true,
        }
    }

    pub fn voltage_mv(&self) -> u32 {
        self.real_mv
    }

    pub fn is_seeded(&self) -> bool {
        self.real_mv != 0
    }

    /// Voltage known from elsewhere (warm reset, bootstrap). Replaces the
    /// first measurement taken in Init.
    pub fn set_initial_voltage(&mut self, mv: u32) {
        self.initial_mv = Some(mv);
    }

    /// Take `mv` as the smoothed voltage outright.
    pub fn seed(&mut self, mv: u32, now: Instant) {
        self.real_mv = mv;
        self.last_eval = Some(now);
        self.skip_step = false;
    }

    /// Next evaluation applies the clamp but no rate step. The last
    /// evaluation time is kept so a long suspend is still detected.
    pub fn reset_anchor(&mut self) {
        self.skip_step = true;
    }

    /// Fold one measured voltage into the smoothed value and return it.
    pub fn update(
        &mut self,
        measured_mv: u32,
        state: ChargeState,
        cfg: &ChargeConfiguration,
        now: Instant,
    ) -> u32 {
        let mut mv = measured_mv;
        if state == ChargeState::Init {
            if let Some(initial) = self.initial_mv.take() {
                debug!("capacity: initial {}mV replaces {}mV", initial, mv);
                mv = initial;
            }
        }

        let Some(last) = self.last_eval.filter(|_| self.real_mv != 0) else {
            self.seed(mv, now);
            return mv;
        };
        let mut elapsed_s = now.saturating_duration_since(last).as_secs();
        self.last_eval = Some(now);

        // long gaps and fresh anchors still clamp, they just skip the step
        if core::mem::take(&mut self.skip_step) || elapsed_s >= RATE_BYPASS_S {
            elapsed_s = 0;
        }

        let levels = &cfg.levels;
        let stop = cfg.stop_voltage_mv;
        let p = permillage_for(levels, stop, self.real_mv) as u64;
        let charging = matches!(state, ChargeState::Precharge | ChargeState::Charge);

        if charging {
            if elapsed_s > 0 {
                let step = elapsed_s * cfg.smoothing.ascend_pct_per_min as u64 * 10 / 60;
                let limit = permillage_to_mv(levels, stop, (p + step) as u32);
                mv = mv.min(limit);
            }
            mv = mv.max(self.real_mv);
        } else {
            if elapsed_s > 0 {
                let step = elapsed_s * cfg.smoothing.descend_pct_per_min as u64 * 10 / 60;
                if p >= step {
                    let limit = permillage_to_mv(levels, stop, (p - step) as u32);
                    mv = mv.max(limit);
                }
            }
            mv = mv.min(self.real_mv);
        }

        self.real_mv = mv;
        mv
    }

    /// Reported percent. The top of the table reads 99 until a charge
    /// cycle reaches Full; once latched, 100 holds until the voltage
    /// drops back under the top level.
    pub fn percent(&mut self, state: ChargeState, cfg: &ChargeConfiguration) -> u8 {
        if state == ChargeState::Full {
            self.full_latch = true;
        }
        let mv = self.real_mv;
        if mv >= cfg.levels[TOP] as u32 {
            return if self.full_latch { 100 } else { 99 };
        }
        if state == ChargeState::Full {
            return 100;
        }
        self.full_latch = false;
        percent_for(&cfg.levels, mv)
    }

    pub fn permillage(&self, cfg: &ChargeConfiguration) -> u16 {
        permillage_for(&cfg.levels, cfg.stop_voltage_mv, self.real_mv)
    }
}

impl Default for CapacityEstimator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_time::Duration;

    fn cfg() -> ChargeConfiguration {
        ChargeConfiguration::defaults()
    }

    #[test]
    fn percent_table_edges() {
        let l = &cfg().levels;
        assert_eq!(percent_for(l, 3000), 0);
        assert_eq!(percent_for(l, 3100), 0);
        assert_eq!(percent_for(l, 3400), 10);
        // 3500 is halfway through 10..20
        assert_eq!(percent_for(l, 3500), 15);
        assert_eq!(percent_for(l, 4099), 99);
        assert_eq!(percent_for(l, 4100), 100);
        assert_eq!(percent_for(l, 4300), 100);
    }

    #[test]
    fn percent_is_monotonic() {
        let l = &cfg().levels;
        let mut prev = 0;
        for mv in 2800..4300 {
            let p = percent_for(l, mv);
            assert!(p >= prev, "{}mV", mv);
            prev = p;
        }
    }

    #[test]
    fn permillage_round_trip_stays_in_interval() {
        let c = cfg();
        for mv in (3100..=4160).step_by(7) {
            let p = permillage_for(&c.levels, c.stop_voltage_mv, mv);
            let back = permillage_to_mv(&c.levels, c.stop_voltage_mv, p as u32);
            let i = (p / 100) as usize;
            let width = if i >= TOP {
                c.stop_voltage_mv as u32 - c.levels[TOP] as u32
            } else {
                (c.levels[i + 1] - c.levels[i]) as u32
            };
            assert!(back <= mv && mv - back <= width / 100 + 1, "{}mV -> {} -> {}", mv, p, back);
        }
        assert_eq!(permillage_for(&c.levels, c.stop_voltage_mv, 4160), 1100);
        assert_eq!(permillage_to_mv(&c.levels, c.stop_voltage_mv, 1200), 4160);
        assert_eq!(permillage_to_mv(&c.levels, c.stop_voltage_mv, 1050), 4130);
    }

    #[test]
    fn first_measurement_seeds() {
        let c = cfg();
        let mut est = CapacityEstimator::new();
        assert!(!est.is_seeded());
        assert_eq!(est.update(3800, ChargeState::Low, &c, Instant::from_secs(1)), 3800);
        assert!(est.is_seeded());
    }

    #[test]
    fn initial_voltage_replaces_first_init_measurement() {
        let c = cfg();
        let mut est = CapacityEstimator::new();
        est.set_initial_voltage(3950);
        assert_eq!(est.update(3800, ChargeState::Init, &c, Instant::from_secs(1)), 3950);
        // consumed once
        est.seed(3800, Instant::from_secs(1));
        assert_eq!(est.update(3790, ChargeState::Init, &c, Instant::from_secs(1)), 3790);
    }

    #[test]
    fn charging_rise_is_rate_limited() {
        let c = cfg();
        let mut est = CapacityEstimator::new();
        let t0 = Instant::from_secs(10);
        est.seed(3700, t0);
        // 60s at 3%/min is 30 permille; 3700mV is permille 400, 430 maps
        // to 3700 + 50 * 30 / 100 = 3715mV
        let v = est.update(4000, ChargeState::Charge, &c, t0 + Duration::from_secs(60));
        assert_eq!(v, 3715);
        // never falls while charging
        let v = est.update(3600, ChargeState::Charge, &c, t0 + Duration::from_secs(120));
        assert_eq!(v, 3715);
    }

    #[test]
    fn discharge_drop_is_rate_limited() {
        let c = cfg();
        let mut est = CapacityEstimator::new();
        let t0 = Instant::from_secs(10);
        est.seed(3700, t0);
        let v = est.update(3400, ChargeState::Low, &c, t0 + Duration::from_secs(60));
        // permille 400 - 30 = 370 -> 3650 + 50 * 70 / 100
        assert_eq!(v, 3685);
        // never rises while discharging
        let v = est.update(3900, ChargeState::Low, &c, t0 + Duration::from_secs(61));
        assert_eq!(v, 3685);
    }

    #[test]
    fn zero_elapsed_only_clamps() {
        let c = cfg();
        let mut est = CapacityEstimator::new();
        let t0 = Instant::from_secs(10);
        est.seed(3700, t0);
        est.reset_anchor();
        let t1 = t0 + Duration::from_secs(10);
        // 10s would allow 5 permille of drop, the full drop is taken
        assert_eq!(est.update(3600, ChargeState::Low, &c, t1), 3600);
        assert_eq!(est.update(3660, ChargeState::Low, &c, t1), 3600);
    }

    #[test]
    fn long_gap_skips_step_but_keeps_clamp() {
        let c = cfg();
        let gap = Duration::from_secs(RATE_BYPASS_S);
        let t0 = Instant::from_secs(10);

        // a full drop is taken at once while discharging
        let mut est = CapacityEstimator::new();
        est.seed(3700, t0);
        assert_eq!(est.update(3400, ChargeState::Low, &c, t0 + gap), 3400);
        // but it never rises
        let mut est = CapacityEstimator::new();
        est.seed(3700, t0);
        assert_eq!(est.update(3900, ChargeState::Low, &c, t0 + gap), 3700);

        // and never falls while charging
        let mut est = CapacityEstimator::new();
        est.seed(3900, t0);
        assert_eq!(est.update(3600, ChargeState::Charge, &c, t0 + gap), 3900);
        let mut est = CapacityEstimator::new();
        est.seed(3700, t0);
        assert_eq!(est.update(4050, ChargeState::Charge, &c, t0 + gap), 4050);
    }

    #[test]
    fn top_of_table_held_at_99_until_full() {
        let c = cfg();
        let mut est = CapacityEstimator::new();
        est.seed(4120, Instant::from_secs(0));
        // latched at boot
        assert_eq!(est.percent(ChargeState::Low, &c), 100);

        est.seed(4000, Instant::from_secs(0));
        assert_eq!(est.percent(ChargeState::Charge, &c), 82);
        est.seed(4120, Instant::from_secs(0));
        assert_eq!(est.percent(ChargeState::Charge, &c), 99);
        assert_eq!(est.percent(ChargeState::Full, &c), 100);

        // full held while the rested voltage sags under the top level
        est.seed(4090, Instant::from_secs(0));
        assert_eq!(est.percent(ChargeState::Full, &c), 100);
        assert_eq!(est.percent(ChargeState::Low, &c), 98);
        est.seed(4120, Instant::from_secs(0));
        assert_eq!(est.percent(ChargeState::Low, &c), 99);
    }
}
