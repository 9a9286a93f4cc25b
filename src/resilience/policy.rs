use crate::error::SessionError;

/// What the session does when a trial fails part-way through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialErrorPolicy {
    /// Log, skip the rest of this trial, continue with the next one
    AbandonTrial,

    /// Stop issuing trials and end the session as failed
    AbortSession,
}

impl TrialErrorPolicy {
    pub fn for_error(error: &SessionError) -> Self {
        match error {
            SessionError::Collaborator(_) => Self::AbandonTrial,
            SessionError::StoreCreate { .. }
            | SessionError::StoreWrite(_)
            | SessionError::Device(_)
            | SessionError::Config(_)
            | SessionError::Cache(_) => Self::AbortSession,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_collaborator_failures_are_survivable() {
        assert_eq!(
            TrialErrorPolicy::for_error(&SessionError::collaborator("decode failed")),
            TrialErrorPolicy::AbandonTrial
        );
        assert_eq!(
            TrialErrorPolicy::for_error(&SessionError::store_write("disk full")),
            TrialErrorPolicy::AbortSession
        );
        assert_eq!(
            TrialErrorPolicy::for_error(&SessionError::device("unplugged")),
            TrialErrorPolicy::AbortSession
        );
    }
}
