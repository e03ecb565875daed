use crate::config::ConsensusParams;
use log::info;

/// Difficulty retargeting.
///
/// Difficulty only moves at window boundaries: the child at height `h` with
/// `h >= N` and `h % N == 0` looks at the `N` headers before it. If their
/// average spacing is under half the target it gains one bit; if it is over
/// twice the target it loses one, never going below the minimum. Everything
/// else inherits the parent's difficulty.
///
/// The genesis timestamp is fixed by the consensus parameters rather than
/// mined, so genesis never counts: the first window is heights `1..N`, one
/// header short of the rest.
pub struct DifficultyAdjustment;

impl DifficultyAdjustment {
    /// Whether the child at `height` starts a new window.
    pub fn is_retarget_height(height: u64, params: &ConsensusParams) -> bool {
        height >= params.retarget_window && height % params.retarget_window == 0
    }

    /// Difficulty for the child at `height`.
    ///
    /// `window_timestamps` are the timestamps of the last `N` non-genesis
    /// blocks of the child's branch, oldest first. They are ignored off the
    /// boundary, and a window with no interval in it never retargets.
    pub fn next_difficulty(
        height: u64,
        parent_difficulty: u32,
        window_timestamps: &[i64],
        params: &ConsensusParams,
    ) -> u32 {
        if !Self::is_retarget_height(height, params) || window_timestamps.len() < 2 {
            return parent_difficulty;
        }

        let span = Self::time_span(window_timestamps);
        let intervals = window_timestamps.len() as u128 - 1;
        let target = params.target_block_time_ms as u128;
        let new_difficulty = Self::adjust_difficulty(parent_difficulty, span, intervals, target, params);

        if new_difficulty != parent_difficulty {
            info!(
                "Difficulty adjustment at height {height}: {parent_difficulty} -> {new_difficulty} (span {span}ms over {intervals} intervals, target {target}ms each)"
            );
        }
        new_difficulty
    }

    /// Milliseconds between the first and last block of the window. Clocks
    /// drift, so a non-increasing window counts as zero.
    fn time_span(timestamps: &[i64]) -> u128 {
        match (timestamps.first(), timestamps.last()) {
            (Some(first), Some(last)) if last > first => (last - first) as u128,
            _ => 0,
        }
    }

    /// Compares `span / intervals` against the target without dividing.
    fn adjust_difficulty(
        current: u32,
        span: u128,
        intervals: u128,
        target: u128,
        params: &ConsensusParams,
    ) -> u32 {
        let adjusted = if 2 * span < target * intervals {
            current.saturating_add(1)
        } else if span > 2 * target * intervals {
            current.saturating_sub(1)
        } else {
            current
        };
        adjusted.clamp(params.min_difficulty, params.max_difficulty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ConsensusParams {
        ConsensusParams {
            target_block_time_ms: 120_000,
            retarget_window: 10,
            min_difficulty: 1,
            max_difficulty: 12,
            ..ConsensusParams::default()
        }
    }

    fn evenly_spaced(interval: i64) -> Vec<i64> {
        (0..10).map(|i| i * interval).collect()
    }

    #[test]
    fn test_no_change_off_boundary() {
        let params = params();
        assert_eq!(
            DifficultyAdjustment::next_difficulty(11, 5, &evenly_spaced(1), &params),
            5
        );
        assert_eq!(DifficultyAdjustment::next_difficulty(3, 4, &[], &params), 4);
    }

    #[test]
    fn test_single_header_never_retargets() {
        let params = ConsensusParams {
            retarget_window: 2,
            ..params()
        };
        assert_eq!(DifficultyAdjustment::next_difficulty(2, 4, &[5], &params), 4);
    }

    #[test]
    fn test_first_window_without_genesis_still_retargets() {
        let params = params();
        // heights 1..9, one second apart
        let first: Vec<i64> = (1..10).map(|i| i * 1_000).collect();
        assert_eq!(DifficultyAdjustment::next_difficulty(10, 4, &first, &params), 5);
    }

    #[test]
    fn test_fast_blocks_raise_difficulty() {
        let params = params();
        // 10 seconds apart against a 120 second target
        assert_eq!(
            DifficultyAdjustment::next_difficulty(10, 4, &evenly_spaced(10_000), &params),
            5
        );
    }

    #[test]
    fn test_slow_blocks_lower_difficulty() {
        let params = params();
        assert_eq!(
            DifficultyAdjustment::next_difficulty(20, 4, &evenly_spaced(300_000), &params),
            3
        );
    }

    #[test]
    fn test_on_target_blocks_hold_difficulty() {
        let params = params();
        // 1.5x the target is inside the dead band
        assert_eq!(
            DifficultyAdjustment::next_difficulty(10, 4, &evenly_spaced(180_000), &params),
            4
        );
        assert_eq!(
            DifficultyAdjustment::next_difficulty(10, 4, &evenly_spaced(60_000), &params),
            4
        );
    }

    #[test]
    fn test_bounds() {
        let params = params();
        assert_eq!(
            DifficultyAdjustment::next_difficulty(10, 1, &evenly_spaced(500_000), &params),
            1
        );
        assert_eq!(
            DifficultyAdjustment::next_difficulty(10, 12, &evenly_spaced(1_000), &params),
            12
        );
    }

    #[test]
    fn test_backwards_clock_counts_as_fast() {
        let params = params();
        let mut timestamps = evenly_spaced(1_000);
        timestamps.reverse();
        assert_eq!(
            DifficultyAdjustment::next_difficulty(10, 4, &timestamps, &params),
            5
        );
    }
}
