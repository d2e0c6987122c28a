use std::collections::VecDeque;

/// Time-bounded, size-capped FIFO of timestamped items.
///
/// Items are expected in non-decreasing timestamp order. Out-of-order items are
/// accepted but eviction always runs against the timestamp passed to `prune`.
#[derive(Debug, Clone)]
pub struct RollingWindow<T> {
    window: VecDeque<(u64, T)>, // (timestamp_ms, item)
    max_age_ms: u64,
    max_len: usize,
}

impl<T> RollingWindow<T> {
    pub fn new(max_age_ms: u64, max_len: usize) -> Self {
        Self {
            window: VecDeque::new(),
            max_age_ms,
            max_len: max_len.max(1),
        }
    }

    /// Append and immediately prune against the new item's timestamp.
    pub fn push(&mut self, ts_ms: u64, item: T) {
        self.window.push_back((ts_ms, item));
        self.prune(ts_ms);
    }

    /// Evict items older than `now_ms - max_age_ms`, then drop the oldest
    /// items beyond `max_len`.
    pub fn prune(&mut self, now_ms: u64) {
        let cutoff = now_ms.saturating_sub(self.max_age_ms);
        while let Some((ts, _)) = self.window.front() {
            if *ts < cutoff {
                self.window.pop_front();
            } else {
                break;
            }
        }

        if self.window.len() > self.max_len {
            let excess = self.window.len() - self.max_len;
            self.window.drain(..excess);
        }
    }

    /// Change limits in place. Takes effect on the next `prune`.
    pub fn set_limits(&mut self, max_age_ms: u64, max_len: usize) {
        self.max_age_ms = max_age_ms;
        self.max_len = max_len.max(1);
    }

    pub fn max_age_ms(&self) -> u64 {
        self.max_age_ms
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    pub fn latest(&self) -> Option<&T> {
        self.window.back().map(|(_, item)| item)
    }

    pub fn oldest(&self) -> Option<&T> {
        self.window.front().map(|(_, item)| item)
    }

    /// Item whose timestamp is nearest to `target_ms`. Ties go to the older item.
    pub fn closest_to(&self, target_ms: u64) -> Option<&T> {
        self.window
            .iter()
            .min_by_key(|(ts, _)| ts.abs_diff(target_ms))
            .map(|(_, item)| item)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.window.iter().map(|(_, item)| item)
    }

    pub fn timestamps(&self) -> impl Iterator<Item = u64> + '_ {
        self.window.iter().map(|(ts, _)| *ts)
    }

    pub fn clear(&mut self) {
        self.window.clear();
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_items_older_than_max_age() {
        let mut w = RollingWindow::new(1_000, 100);
        w.push(0, "a");
        w.push(500, "b");
        w.push(1_000, "c");
        assert_eq!(w.len(), 3); // 0 is exactly at the cutoff

        w.push(1_001, "d");
        assert_eq!(w.oldest(), Some(&"b"));
        assert_eq!(w.latest(), Some(&"d"));
    }

    #[test]
    fn size_cap_drops_oldest_first() {
        let mut w = RollingWindow::new(60_000, 3);
        for i in 0..5u64 {
            w.push(i, i);
        }
        assert_eq!(w.iter().copied().collect::<Vec<_>>(), vec![2, 3, 4]);
    }

    #[test]
    fn closest_to_prefers_nearest_then_older() {
        let mut w = RollingWindow::new(10_000, 100);
        w.push(0, 'a');
        w.push(900, 'b');
        w.push(1_100, 'c');
        w.push(2_000, 'd');

        assert_eq!(w.closest_to(1_000), Some(&'b'));
        assert_eq!(w.closest_to(1_080), Some(&'c'));
        assert_eq!(w.closest_to(0), Some(&'a'));
    }

    #[test]
    fn out_of_order_push_does_not_underflow() {
        let mut w = RollingWindow::new(100, 10);
        w.push(50, 1);
        w.push(10, 2);
        assert_eq!(w.len(), 2);
    }

    #[test]
    fn clear_empties_window() {
        let mut w = RollingWindow::new(100, 10);
        w.push(1, ());
        w.clear();
        assert!(w.is_empty());
        assert!(w.latest().is_none());
    }
}
