// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Shard-count growth as a pure state machine.
//!
//! Each increment attempt is judged from `(shard_count, outcome)` alone.
//! The shard count only ever moves up, in fixed steps, and never past the
//! configured maximum. A contended attempt at the maximum exhausts the run.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Committed,
    Contended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    /// The shard write landed.
    Done,
    /// Try again, spreading writes over `shard_count` shards.
    Retry { shard_count: usize },
    /// Contended at the maximum shard count; give up.
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardGrowth {
    pub step: usize,
    pub max: usize,
}

impl ShardGrowth {
    pub fn new(step: usize, max: usize) -> Self {
        Self {
            step: step.max(1),
            max: max.max(1),
        }
    }

    pub fn next(&self, shard_count: usize, outcome: AttemptOutcome) -> NextStep {
        match outcome {
            AttemptOutcome::Committed => NextStep::Done,
            AttemptOutcome::Contended if shard_count >= self.max => NextStep::Exhausted,
            AttemptOutcome::Contended => NextStep::Retry {
                shard_count: shard_count.saturating_add(self.step).min(self.max),
            },
        }
    }

    /// Clamp a starting or persisted shard count into `1..=max`.
    pub fn clamp(&self, shard_count: usize) -> usize {
        shard_count.clamp(1, self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_is_done() {
        let growth = ShardGrowth::new(5, 50);
        assert_eq!(growth.next(5, AttemptOutcome::Committed), NextStep::Done);
        assert_eq!(growth.next(50, AttemptOutcome::Committed), NextStep::Done);
    }

    #[test]
    fn test_contention_grows_by_step() {
        let growth = ShardGrowth::new(5, 50);
        assert_eq!(
            growth.next(5, AttemptOutcome::Contended),
            NextStep::Retry { shard_count: 10 }
        );
    }

    #[test]
    fn test_growth_caps_at_max_then_exhausts() {
        let growth = ShardGrowth::new(5, 12);
        assert_eq!(
            growth.next(10, AttemptOutcome::Contended),
            NextStep::Retry { shard_count: 12 }
        );
        assert_eq!(growth.next(12, AttemptOutcome::Contended), NextStep::Exhausted);
    }

    #[test]
    fn test_walk_to_exhaustion_is_monotone_and_bounded() {
        let growth = ShardGrowth::new(5, 50);
        let mut shards = 5;
        let mut attempts = 1;
        loop {
            match growth.next(shards, AttemptOutcome::Contended) {
                NextStep::Retry { shard_count } => {
                    assert!(shard_count > shards);
                    assert!(shard_count <= 50);
                    shards = shard_count;
                    attempts += 1;
                }
                NextStep::Exhausted => break,
                NextStep::Done => unreachable!(),
            }
        }
        assert_eq!(shards, 50);
        assert_eq!(attempts, 10);
    }

    #[test]
    fn test_clamp() {
        let growth = ShardGrowth::new(5, 50);
        assert_eq!(growth.clamp(0), 1);
        assert_eq!(growth.clamp(80), 50);
        assert_eq!(growth.clamp(15), 15);
    }
}
