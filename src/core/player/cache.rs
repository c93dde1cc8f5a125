//! Cache window, wrap-aware eviction and byte budgets.
//!
//! Keys are integers: frames at the timeline rate for video, whole seconds
//! for audio. A [`KeyWindow`] is anchored at the current key and shaped by
//! the cache direction; keys on the far side of either loop boundary are
//! "unwrapped" by one loop length before testing.

use std::collections::{BTreeMap, HashSet};

use super::playback::CacheDirection;
use crate::entities::AudioInfo;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Frames that fit in `video_gb`. Zero when a frame costs nothing.
pub fn video_capacity(video_gb: f64, per_frame_bytes: usize) -> usize {
    if per_frame_bytes == 0 {
        return 0;
    }
    (video_gb.max(0.0) * GIB / per_frame_bytes as f64).floor() as usize
}

/// Seconds of audio that fit in `audio_gb`.
pub fn audio_capacity(audio_gb: f64, info: AudioInfo) -> usize {
    let per_second = info.bytes_per_second();
    if per_second == 0 {
        return 0;
    }
    (audio_gb.max(0.0) * GIB / per_second as f64).floor() as usize
}

/// Live key window `[start, end]` (both inclusive) inside the in/out keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyWindow {
    pub current: i64,
    pub start: i64,
    pub end: i64,
    /// First key of the in/out range
    pub in_key: i64,
    /// Last key of the in/out range
    pub out_key: i64,
    pub direction: CacheDirection,
}

impl KeyWindow {
    /// Window around `current`. `ahead` is capped by the loop length.
    pub fn new(
        current: i64,
        ahead: i64,
        behind: i64,
        in_key: i64,
        out_key: i64,
        direction: CacheDirection,
    ) -> Self {
        let out_key = out_key.max(in_key);
        let ahead = ahead.clamp(0, out_key - in_key + 1);
        let behind = behind.max(0);
        let (start, end) = match direction {
            CacheDirection::Forward => (current - behind, current + ahead),
            CacheDirection::Reverse => (current - ahead, current + behind),
        };
        Self {
            current,
            start,
            end,
            in_key,
            out_key,
            direction,
        }
    }

    pub fn loop_len(&self) -> i64 {
        self.out_key - self.in_key + 1
    }

    /// First position of `key` inside the window, counting it once per loop.
    /// Keys past either loop boundary land on the other side.
    pub fn unwrap_key(&self, key: i64) -> Option<i64> {
        let unwrapped = self.start + (key - self.start).rem_euclid(self.loop_len());
        (unwrapped <= self.end).then_some(unwrapped)
    }

    /// Whether a cached `key` is retained. Agrees with [`Self::fetch_order`].
    pub fn retains(&self, key: i64) -> bool {
        if key < self.in_key || key > self.out_key {
            return false;
        }
        self.unwrap_key(key).is_some()
    }

    /// `key` wrapped into the in/out keys
    pub fn wrap(&self, key: i64) -> i64 {
        self.in_key + (key - self.in_key).rem_euclid(self.loop_len())
    }

    /// Keys to fetch, nearest first: current, then ahead, then behind.
    /// Wrapped into the in/out keys with duplicates removed.
    pub fn fetch_order(&self) -> Vec<i64> {
        let (ahead, behind): (Box<dyn Iterator<Item = i64>>, Box<dyn Iterator<Item = i64>>) = match self.direction {
            CacheDirection::Forward => (
                Box::new(self.current..=self.end),
                Box::new((self.start..self.current).rev()),
            ),
            CacheDirection::Reverse => (
                Box::new((self.start..=self.current).rev()),
                Box::new(self.current + 1..=self.end),
            ),
        };
        let mut seen = HashSet::new();
        ahead
            .chain(behind)
            .map(|k| self.wrap(k))
            .filter(|k| seen.insert(*k))
            .collect()
    }

    /// Distinct in/out keys the window covers
    pub fn key_count(&self) -> usize {
        ((self.end - self.start + 1).min(self.loop_len())).max(0) as usize
    }
}

/// Drop entries the window no longer retains. Returns the number removed.
pub fn evict<V>(cache: &mut BTreeMap<i64, V>, window: &KeyWindow) -> usize {
    let before = cache.len();
    cache.retain(|key, _| window.retains(*key));
    before - cache.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_window_shape() {
        let window = KeyWindow::new(50, 10, 2, 0, 99, CacheDirection::Forward);
        assert_eq!((window.start, window.end), (48, 60));
        let reverse = KeyWindow::new(50, 10, 2, 0, 99, CacheDirection::Reverse);
        assert_eq!((reverse.start, reverse.end), (40, 52));
    }

    #[test]
    fn test_evict_keeps_window_only() {
        let window = KeyWindow::new(50, 10, 2, 0, 99, CacheDirection::Forward);
        let mut cache: BTreeMap<i64, ()> = (0..100).map(|k| (k, ())).collect();
        let removed = evict(&mut cache, &window);
        assert_eq!(removed, 100 - 13);
        assert!(cache.keys().all(|k| (48..=60).contains(k)));
    }

    #[test]
    fn test_wrap_aware_eviction() {
        // Near the out-point, keys past the loop boundary are ahead.
        let window = KeyWindow::new(95, 10, 2, 0, 99, CacheDirection::Forward);
        let mut cache: BTreeMap<i64, ()> = [0, 3, 5, 6, 50, 92, 93, 99].into_iter().map(|k| (k, ())).collect();
        evict(&mut cache, &window);
        assert_eq!(cache.keys().copied().collect::<Vec<_>>(), vec![0, 3, 5, 93, 99]);

        // After seeking to 5, the old tail is not retained.
        let window = KeyWindow::new(5, 10, 2, 0, 99, CacheDirection::Forward);
        let mut cache: BTreeMap<i64, ()> = (90..100).chain(0..20).map(|k| (k, ())).collect();
        evict(&mut cache, &window);
        assert!(cache.keys().all(|k| window.retains(*k)));
        assert_eq!(cache.keys().copied().collect::<Vec<_>>(), (3..=15).collect::<Vec<_>>());

        // Reverse near the in-point keeps the tail.
        let window = KeyWindow::new(2, 5, 1, 0, 99, CacheDirection::Reverse);
        let mut cache: BTreeMap<i64, ()> = [0, 1, 3, 4, 96, 97, 98, 99].into_iter().map(|k| (k, ())).collect();
        evict(&mut cache, &window);
        assert_eq!(cache.keys().copied().collect::<Vec<_>>(), vec![0, 1, 3, 97, 98, 99]);
    }

    #[test]
    fn test_fetch_order_nearest_first_and_wrapped() {
        let window = KeyWindow::new(98, 3, 1, 0, 99, CacheDirection::Forward);
        assert_eq!(window.fetch_order(), vec![98, 99, 0, 1, 97]);
        let window = KeyWindow::new(1, 3, 1, 0, 99, CacheDirection::Reverse);
        assert_eq!(window.fetch_order(), vec![1, 0, 99, 98, 2]);
        // Window larger than the loop visits every key once.
        let window = KeyWindow::new(0, 50, 5, 0, 9, CacheDirection::Forward);
        assert_eq!(window.fetch_order().len(), 10);
        assert_eq!(window.key_count(), 10);
    }

    #[test]
    fn test_fetched_keys_are_retained_at_boundaries() {
        let cases = [
            (0, CacheDirection::Forward),
            (99, CacheDirection::Forward),
            (0, CacheDirection::Reverse),
            (99, CacheDirection::Reverse),
        ];
        for (current, direction) in cases {
            let window = KeyWindow::new(current, 10, 2, 0, 99, direction);
            let keys = window.fetch_order();
            assert!(
                keys.iter().all(|k| window.retains(*k)),
                "{:?} at {}: {:?}",
                direction,
                current,
                keys
            );
            assert_eq!(keys.len(), window.key_count());

            // A full cache is left alone.
            let mut cache: BTreeMap<i64, ()> = keys.iter().map(|k| (*k, ())).collect();
            assert_eq!(evict(&mut cache, &window), 0);
        }

        // Read-behind across the in-point keeps the tail.
        let window = KeyWindow::new(0, 10, 2, 0, 99, CacheDirection::Forward);
        assert!(window.retains(98) && window.retains(99));
        assert!(!window.retains(97));
        let window = KeyWindow::new(99, 10, 2, 0, 99, CacheDirection::Reverse);
        assert!(window.retains(0) && window.retains(1));
        assert!(!window.retains(2));
    }

    #[test]
    fn test_budget_arithmetic() {
        // 1 GiB of 1920x1080 RGBA8 frames
        assert_eq!(video_capacity(1.0, 1920 * 1080 * 4), 129);
        assert_eq!(video_capacity(1.0, 0), 0);
        // 48 kHz stereo f32 = 384000 bytes/s
        assert_eq!(audio_capacity(1.0, AudioInfo::new(2, 48000)), 2796);
        assert_eq!(audio_capacity(1.0, AudioInfo::default()), 0);
    }
}
