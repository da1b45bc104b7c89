// Window debouncer for noisy classifications
//
// Every feed shifts one classified sample into a fixed window. A new
// state is confirmed only once every slot in the window agrees and
// differs from the confirmed state; any disagreement simply waits for
// the window to refill, nothing is emitted.
//
// One class may be marked as bypass: it is confirmed on its first
// sample, and while it is the confirmed state the next class is
// accepted on its first sample as well. DC5V uses this for the
// ambiguous pending supply so the controller reacts at once.

/// Upper bound on any window; configuration is validated against it.
pub const MAX_WINDOW: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition<T> {
    /// `None` when nothing had been confirmed yet.
    pub from: Option<T>,
    pub to: T,
}

pub struct Debouncer<T, const W: usize = MAX_WINDOW> {
    window: [Option<T>; W],
    len: usize,
    confirmed: Option<T>,
    bypass: Option<T>,
}

impl<T: Copy + PartialEq, const W: usize> Debouncer<T, W> {
    /// `len` is clamped to `1..=W`.
    pub fn new(len: usize) -> Self {
        Self {
            window: [None; W],
            len: len.clamp(1, W),
            confirmed: None,
            bypass: None,
        }
    }

    pub fn with_bypass(mut self, class: T) -> Self {
        self.bypass = Some(class);
        self
    }

    pub fn window_len(&self) -> usize {
        self.len
    }

    /// Resize and clear the window. The confirmed state is kept.
    pub fn set_window_len(&mut self, len: usize) {
        self.len = len.clamp(1, W);
        self.window = [None; W];
    }

    pub fn confirmed(&self) -> Option<T> {
        self.confirmed
    }

    /// Forget the window and the confirmed state.
    pub fn reset(&mut self) {
        self.window = [None; W];
        self.confirmed = None;
    }

    pub fn feed(&mut self, class: T) -> Option<Transition<T>> {
        let slots = &mut self.window[..self.len];
        slots.rotate_left(1);
        slots[self.len - 1] = Some(class);

        if self.confirmed == Some(class) {
            return None;
        }

        let bypass = self.bypass.is_some()
            && (self.bypass == Some(class) || self.bypass == self.confirmed);
        let agreed = slots.iter().all(|s| *s == Some(class));

        if !bypass && !agreed {
            return None;
        }

        let from = self.confirmed.replace(class);
        Some(Transition { from, to: class })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Level {
        Low,
        High,
        Floating,
    }

    #[test]
    fn confirms_after_full_window() {
        let mut d: Debouncer<Level, 8> = Debouncer::new(3);
        assert_eq!(d.feed(Level::High), None);
        assert_eq!(d.feed(Level::High), None);
        assert_eq!(
            d.feed(Level::High),
            Some(Transition {
                from: None,
                to: Level::High
            })
        );
        // steady state emits nothing
        assert_eq!(d.feed(Level::High), None);
        assert_eq!(d.confirmed(), Some(Level::High));
    }

    #[test]
    fn early_change_restarts_window() {
        let mut d: Debouncer<Level, 8> = Debouncer::new(3);
        for _ in 0..3 {
            d.feed(Level::High);
        }
        assert_eq!(d.feed(Level::Low), None);
        assert_eq!(d.feed(Level::Low), None);
        assert_eq!(d.feed(Level::High), None);
        assert_eq!(d.feed(Level::Low), None);
        assert_eq!(d.feed(Level::Low), None);
        let t = d.feed(Level::Low).unwrap();
        assert_eq!(t.from, Some(Level::High));
        assert_eq!(t.to, Level::Low);
    }

    #[test]
    fn emits_iff_run_reaches_window() {
        // run lengths 1..6 against window 4
        for run in 1..6usize {
            let mut d: Debouncer<Level, 8> = Debouncer::new(4);
            for _ in 0..4 {
                d.feed(Level::Low);
            }
            let mut emitted = 0;
            for _ in 0..run {
                if d.feed(Level::High).is_some() {
                    emitted += 1;
                }
            }
            d.feed(Level::Low);
            assert_eq!(emitted, (run >= 4) as usize, "run {}", run);
        }
    }

    #[test]
    fn bypass_class_enters_and_leaves_immediately() {
        let mut d: Debouncer<Level, 8> = Debouncer::new(5).with_bypass(Level::Floating);
        for _ in 0..5 {
            d.feed(Level::Low);
        }
        let t = d.feed(Level::Floating).unwrap();
        assert_eq!(t.to, Level::Floating);
        let t = d.feed(Level::High).unwrap();
        assert_eq!(t.from, Some(Level::Floating));
        assert_eq!(t.to, Level::High);
        // back to normal debouncing
        assert_eq!(d.feed(Level::Low), None);
    }

    #[test]
    fn reset_forgets_confirmed_state() {
        let mut d: Debouncer<Level, 4> = Debouncer::new(2);
        d.feed(Level::High);
        d.feed(Level::High);
        d.reset();
        assert_eq!(d.confirmed(), None);
        assert_eq!(d.feed(Level::High), None);
        assert_eq!(d.feed(Level::High).unwrap().from, None);
    }

    #[test]
    fn window_is_clamped() {
        let d: Debouncer<Level, 4> = Debouncer::new(0);
        assert_eq!(d.window_len(), 1);
        let d: Debouncer<Level, 4> = Debouncer::new(9);
        assert_eq!(d.window_len(), 4);
    }
}
