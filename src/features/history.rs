//! Causal rolling history of an entity's labeled scores
//!
//! The walker replays labeled scores in chronological order. Features for a
//! position are read before that position's own score is folded in, so no
//! label ever contributes to its own features.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Number of trailing scores averaged into `mean3`
pub const ROLLING_WINDOW: usize = 3;

/// Prior-score features knowable before an entry's own score exists
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemporalFeatures {
    /// Immediately preceding score
    pub prev1: Option<f64>,
    /// Mean of up to the last three preceding scores
    pub mean3: Option<f64>,
    /// Number of labeled scores strictly before this entry
    pub count_prev: usize,
}

impl TemporalFeatures {
    /// Features for an entity with no labeled history
    pub fn empty() -> Self {
        Self {
            prev1: None,
            mean3: None,
            count_prev: 0,
        }
    }

    /// Features for a live prediction
    ///
    /// `recent_desc` holds the entity's most recent labeled scores, newest
    /// first (at most [`ROLLING_WINDOW`] are used). `labeled_count` is the
    /// entity's full labeled count, so `count_prev` matches what training saw
    /// for an entry appended after the whole history.
    pub fn from_recent(recent_desc: &[f64], labeled_count: usize) -> Self {
        let mut walker = HistoryWalker::new();
        for &score in recent_desc.iter().take(ROLLING_WINDOW).rev() {
            walker.push(score);
        }
        walker.count = labeled_count.max(walker.count);
        walker.features()
    }
}

impl Default for TemporalFeatures {
    fn default() -> Self {
        Self::empty()
    }
}

/// Running state over one entity's chronologically ordered scores
#[derive(Debug, Clone, Default)]
pub struct HistoryWalker {
    window: VecDeque<f64>,
    count: usize,
}

impl HistoryWalker {
    pub fn new() -> Self {
        Self {
            window: VecDeque::with_capacity(ROLLING_WINDOW),
            count: 0,
        }
    }

    /// Features for the next position, from scores folded in so far
    pub fn features(&self) -> TemporalFeatures {
        if self.count == 0 || self.window.is_empty() {
            return TemporalFeatures {
                count_prev: self.count,
                ..TemporalFeatures::empty()
            };
        }

        let mean = self.window.iter().sum::<f64>() / self.window.len() as f64;
        TemporalFeatures {
            prev1: self.window.back().copied(),
            mean3: Some(mean),
            count_prev: self.count,
        }
    }

    /// Fold a score into the history
    pub fn push(&mut self, score: f64) {
        if self.window.len() == ROLLING_WINDOW {
            self.window.pop_front();
        }
        self.window.push_back(score);
        self.count += 1;
    }

    /// Read the features for this position, then fold its score in
    pub fn observe(&mut self, score: f64) -> TemporalFeatures {
        let features = self.features();
        self.push(score);
        features
    }

    /// Number of scores folded in so far
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Replay a chronological score sequence from scratch
pub fn walk(scores: &[f64]) -> Vec<TemporalFeatures> {
    let mut walker = HistoryWalker::new();
    scores.iter().map(|&score| walker.observe(score)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_first_position_has_no_history() {
        let features = walk(&[60.0]);
        assert_eq!(features, vec![TemporalFeatures::empty()]);
    }

    #[test]
    fn test_walk_known_sequence() {
        let scores = [60.0, 62.0, 58.0, 65.0, 70.0];
        let f = walk(&scores);

        assert_eq!(f[1].prev1, Some(60.0));
        assert_eq!(f[1].mean3, Some(60.0));
        assert_eq!(f[1].count_prev, 1);

        assert_eq!(f[2].mean3, Some(61.0));

        assert_eq!(f[3].prev1, Some(58.0));
        assert_eq!(f[3].mean3, Some(60.0));

        // window slides: (62 + 58 + 65) / 3
        assert_eq!(f[4].prev1, Some(65.0));
        assert!((f[4].mean3.unwrap() - 185.0 / 3.0).abs() < 1e-12);
        assert_eq!(f[4].count_prev, 4);
    }

    #[test]
    fn test_from_recent_matches_walker_tail() {
        let scores = [60.0, 62.0, 58.0, 65.0, 70.0, 68.0];
        let mut walker = HistoryWalker::new();
        for &s in &scores {
            walker.push(s);
        }

        let recent_desc = [68.0, 70.0, 65.0];
        let live = TemporalFeatures::from_recent(&recent_desc, scores.len());
        assert_eq!(live, walker.features());
    }

    #[test]
    fn test_from_recent_empty() {
        assert_eq!(TemporalFeatures::from_recent(&[], 0), TemporalFeatures::empty());
    }

    proptest! {
        #[test]
        fn prop_count_prev_equals_position(scores in prop::collection::vec(0.0f64..100.0, 0..40)) {
            let features = walk(&scores);
            prop_assert_eq!(features.len(), scores.len());
            for (i, f) in features.iter().enumerate() {
                prop_assert_eq!(f.count_prev, i);
            }
        }

        #[test]
        fn prop_mean3_is_trailing_window_mean(scores in prop::collection::vec(0.0f64..100.0, 1..40)) {
            let features = walk(&scores);
            for (i, f) in features.iter().enumerate() {
                if i == 0 {
                    prop_assert_eq!(f.prev1, None);
                    prop_assert_eq!(f.mean3, None);
                    continue;
                }
                let window = &scores[i.saturating_sub(3)..i];
                let expected = window.iter().sum::<f64>() / window.len() as f64;
                prop_assert!((f.mean3.unwrap() - expected).abs() < 1e-9);
                prop_assert_eq!(f.prev1, Some(scores[i - 1]));
            }
        }

        #[test]
        fn prop_no_label_leaks_into_its_own_features(
            scores in prop::collection::vec(0.0f64..100.0, 1..30),
            idx in any::<prop::sample::Index>(),
            replacement in 0.0f64..100.0,
        ) {
            let i = idx.index(scores.len());
            let mut altered = scores.clone();
            altered[i] = replacement;

            let original = walk(&scores);
            let changed = walk(&altered);

            // positions up to and including i only see strictly earlier scores
            prop_assert_eq!(&original[..=i], &changed[..=i]);
        }
    }
}
