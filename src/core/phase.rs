use serde::{Deserialize, Serialize};

/// Trial phases, in the order the state machine enters them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    Rest,
    PreStimulus,
    Stimulus,
    PostStimulus,
    ReviewSequence,
    InterTrial,
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Rest => "Rest",
            Self::PreStimulus => "PreStimulus",
            Self::Stimulus => "Stimulus",
            Self::PostStimulus => "PostStimulus",
            Self::ReviewSequence => "ReviewSequence",
            Self::InterTrial => "InterTrial",
        }
    }

    /// Phase that follows `self` within a trial, or `None` after `InterTrial`.
    ///
    /// `ReviewSequence` is only visited when `review` is set.
    pub fn successor(&self, review: bool) -> Option<Phase> {
        match self {
            Self::Rest => Some(Self::PreStimulus),
            Self::PreStimulus => Some(Self::Stimulus),
            Self::Stimulus => Some(Self::PostStimulus),
            Self::PostStimulus if review => Some(Self::ReviewSequence),
            Self::PostStimulus => Some(Self::InterTrial),
            Self::ReviewSequence => Some(Self::InterTrial),
            Self::InterTrial => None,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_successor_skips_review_outside_replay() {
        assert_eq!(Phase::PostStimulus.successor(false), Some(Phase::InterTrial));
        assert_eq!(Phase::PostStimulus.successor(true), Some(Phase::ReviewSequence));
        assert_eq!(Phase::InterTrial.successor(true), None);
    }
}
