// Fixed-size sample rings and the sorted-window percentile
//
// NOTE: No dynamic allocation. Capacity is a const upper bound, the
// active length is chosen at runtime from configuration.

/// Ring of raw samples. The write index is always `< len`.
pub struct SampleRing<const N: usize> {
    buf: [u16; N],
    len: usize,
    index: usize, // next to write
    filled: usize,
}

impl<const N: usize> SampleRing<N> {
    /// `len` is clamped to `1..=N`.
    pub fn new(len: usize) -> Self {
        Self {
            buf: [0; N],
            len: len.clamp(1, N),
            index: 0,
            filled: 0,
        }
    }

    pub fn push(&mut self, sample: u16) {
        self.buf[self.index] = sample;
        self.index = (self.index + 1) % self.len;
        self.filled = (self.filled + 1).min(self.len);
    }

    pub fn len(&self) -> usize {
        self.filled
    }

    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Drop all samples and adopt a new active length.
    pub fn resize(&mut self, len: usize) {
        self.len = len.clamp(1, N);
        self.clear();
    }

    pub fn clear(&mut self) {
        self.buf = [0; N];
        self.index = 0;
        self.filled = 0;
    }

    pub fn latest(&self) -> Option<u16> {
        if self.filled == 0 {
            return None;
        }
        Some(self.buf[(self.index + self.len - 1) % self.len])
    }

    /// Copy up to `count` most recent samples, newest first, into `out`.
    /// Returns how many were copied.
    pub fn recent_into(&self, count: usize, out: &mut [u16; N]) -> usize {
        let n = count.min(self.filled);
        let mut i = self.index;
        for slot in out.iter_mut().take(n) {
            i = if i == 0 { self.len - 1 } else { i - 1 };
            *slot = self.buf[i];
        }
        n
    }

    /// Percentile over the most recent `count` samples, e.g. `(4, 5)`
    /// for the 80th. Picks `sorted[n * num / den - 1]`.
    pub fn percentile(&self, count: usize, num: usize, den: usize) -> Option<u16> {
        let mut window = [0u16; N];
        let n = self.recent_into(count, &mut window);
        if n == 0 {
            return None;
        }
        let window = &mut window[..n];
        selection_sort(window);
        let pos = (n * num / den).saturating_sub(1);
        Some(window[pos])
    }

    /// Mean over non-zero samples; zero when none.
    pub fn mean_nonzero(&self) -> u16 {
        let (sum, cnt) = self.buf[..self.len]
            .iter()
            .filter(|&&s| s != 0)
            .fold((0u32, 0u32), |(sum, cnt), &s| (sum + s as u32, cnt + 1));
        if cnt == 0 { 0 } else { (sum / cnt) as u16 }
    }
}

/// Ascending in place. Equal keys keep their relative order of
/// selection (the lower index wins), which is all a percentile needs.
pub fn selection_sort<T: PartialOrd>(arr: &mut [T]) {
    let len = arr.len();
    for i in 0..len.saturating_sub(1) {
        let mut min = i;
        for j in (i + 1)..len {
            if arr[min] > arr[j] {
                min = j;
            }
        }
        if min != i {
            arr.swap(min, i);
        }
    }
}
