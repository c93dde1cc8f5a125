//! Fold sorted integer keys into contiguous time ranges.
//!
//! Cache info reports covered spans (e.g. for drawing a cache bar) rather
//! than every cached key.

use super::time::TimeRange;

/// Collapse ascending keys into `[first, first + run)` ranges at `rate`.
///
/// Keys must be sorted (as produced by `BTreeMap::keys`). Duplicates are
/// tolerated.
pub fn keys_to_ranges<I>(keys: I, rate: f64) -> Vec<TimeRange>
where
    I: IntoIterator<Item = i64>,
{
    let mut out = Vec::new();
    let mut run: Option<(i64, i64)> = None;
    for key in keys {
        run = match run {
            Some((first, last)) if key == last || key == last + 1 => Some((first, key)),
            Some((first, last)) => {
                out.push(TimeRange::from_frames(first, last - first + 1, rate));
                Some((key, key))
            }
            None => Some((key, key)),
        };
    }
    if let Some((first, last)) = run {
        out.push(TimeRange::from_frames(first, last - first + 1, rate));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_to_ranges() {
        let ranges = keys_to_ranges([1, 2, 3, 7, 8, 10], 24.0);
        assert_eq!(ranges.len(), 3);
        assert_eq!(ranges[0], TimeRange::from_frames(1, 3, 24.0));
        assert_eq!(ranges[1], TimeRange::from_frames(7, 2, 24.0));
        assert_eq!(ranges[2], TimeRange::from_frames(10, 1, 24.0));
    }

    #[test]
    fn test_keys_to_ranges_empty() {
        assert!(keys_to_ranges(Vec::<i64>::new(), 1.0).is_empty());
    }
}
