//! Reputation rules.
//!
//! Maps a vote transition to the signed change in the target author's
//! reputation. Pure: no state, no I/O.

use qna_db::entities::{TargetKind, VoteValue};

/// Reputation point table and delta computation.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReputationRules;

impl ReputationRules {
    /// Create the rules.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Points awarded to the author for a single standing vote.
    #[must_use]
    pub const fn points(&self, kind: TargetKind, value: VoteValue) -> i64 {
        match (kind, value) {
            (TargetKind::Question, VoteValue::Up) => 5,
            (TargetKind::Question, VoteValue::Down) => -1,
            (TargetKind::Answer, VoteValue::Up) => 10,
            (TargetKind::Answer, VoteValue::Down) => -2,
        }
    }

    /// Reputation change when a vote of `requested` is cast over `prior`.
    ///
    /// - no prior vote: the requested vote's points
    /// - same value again (toggle-off): the prior vote's points are revoked
    /// - opposite value (flip): prior revoked, requested awarded
    #[must_use]
    pub fn delta(
        &self,
        kind: TargetKind,
        requested: VoteValue,
        prior: Option<VoteValue>,
    ) -> i64 {
        match prior {
            None => self.points(kind, requested),
            Some(prior) if prior == requested => -self.points(kind, prior),
            Some(prior) => self.points(kind, requested) - self.points(kind, prior),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KINDS: [TargetKind; 2] = [TargetKind::Question, TargetKind::Answer];
    const VALUES: [VoteValue; 2] = [VoteValue::Up, VoteValue::Down];

    const fn opposite(value: VoteValue) -> VoteValue {
        match value {
            VoteValue::Up => VoteValue::Down,
            VoteValue::Down => VoteValue::Up,
        }
    }

    #[test]
    fn test_point_table() {
        let rules = ReputationRules::new();
        assert_eq!(rules.points(TargetKind::Question, VoteValue::Up), 5);
        assert_eq!(rules.points(TargetKind::Question, VoteValue::Down), -1);
        assert_eq!(rules.points(TargetKind::Answer, VoteValue::Up), 10);
        assert_eq!(rules.points(TargetKind::Answer, VoteValue::Down), -2);
    }

    #[test]
    fn test_first_vote_awards_points() {
        let rules = ReputationRules::new();
        for kind in KINDS {
            for value in VALUES {
                assert_eq!(rules.delta(kind, value, None), rules.points(kind, value));
            }
        }
    }

    #[test]
    fn test_toggle_off_revokes_points() {
        let rules = ReputationRules::new();
        for kind in KINDS {
            for value in VALUES {
                assert_eq!(
                    rules.delta(kind, value, Some(value)),
                    -rules.points(kind, value)
                );
            }
        }
    }

    #[test]
    fn test_flip_swaps_points() {
        let rules = ReputationRules::new();
        for kind in KINDS {
            for value in VALUES {
                let prior = opposite(value);
                assert_eq!(
                    rules.delta(kind, value, Some(prior)),
                    rules.points(kind, value) - rules.points(kind, prior)
                );
            }
        }
        assert_eq!(
            rules.delta(TargetKind::Answer, VoteValue::Down, Some(VoteValue::Up)),
            -12
        );
        assert_eq!(
            rules.delta(TargetKind::Question, VoteValue::Up, Some(VoteValue::Down)),
            6
        );
    }

    #[test]
    fn test_cast_then_retract_nets_zero() {
        let rules = ReputationRules::new();
        for kind in KINDS {
            for value in VALUES {
                let on = rules.delta(kind, value, None);
                let off = rules.delta(kind, value, Some(value));
                assert_eq!(on + off, 0);
            }
        }
    }
}
