//! Stream sink state

/// Stream lifecycle state
///
/// `Stopped` is the initial state. Only `Started ↔ Stopped` can be undone;
/// `Shutdown` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StreamState {
    /// Not accepting samples; markers and flushes are still legal
    #[default]
    Stopped,

    /// Accepting samples
    Started,

    /// Terminal; every call except `shutdown` fails
    Shutdown,
}

impl StreamState {
    /// Check if this state transition is valid
    pub fn can_transition_to(&self, target: &StreamState) -> bool {
        use StreamState::*;

        match (self, target) {
            (Stopped, Started) => true,
            (Started, Stopped) => true,

            // Any live state may shut down
            (Stopped, Shutdown) | (Started, Shutdown) => true,

            // Nothing leaves Shutdown, not even a repeated shutdown
            (Shutdown, _) => false,

            _ => false,
        }
    }

    /// Get a human-readable description of this state
    pub fn description(&self) -> &'static str {
        match self {
            StreamState::Stopped => "Stopped",
            StreamState::Started => "Started",
            StreamState::Shutdown => "Shutdown",
        }
    }

    pub fn is_started(&self) -> bool {
        matches!(self, StreamState::Started)
    }

    pub fn is_shutdown(&self) -> bool {
        matches!(self, StreamState::Shutdown)
    }
}

impl std::fmt::Display for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        let stopped = StreamState::Stopped;
        let started = StreamState::Started;

        assert!(stopped.can_transition_to(&started));
        assert!(started.can_transition_to(&stopped));
        assert!(stopped.can_transition_to(&StreamState::Shutdown));
        assert!(started.can_transition_to(&StreamState::Shutdown));
    }

    #[test]
    fn test_invalid_transitions() {
        let stopped = StreamState::Stopped;
        let started = StreamState::Started;
        let shutdown = StreamState::Shutdown;

        assert!(!started.can_transition_to(&started)); // double start
        assert!(!stopped.can_transition_to(&stopped)); // double stop
        assert!(!shutdown.can_transition_to(&started));
        assert!(!shutdown.can_transition_to(&stopped));
        assert!(!shutdown.can_transition_to(&shutdown));
    }

    #[test]
    fn test_state_checks() {
        assert_eq!(StreamState::default(), StreamState::Stopped);
        assert!(StreamState::Started.is_started());
        assert!(!StreamState::Stopped.is_started());
        assert!(StreamState::Shutdown.is_shutdown());
        assert_eq!(StreamState::Started.to_string(), "Started");
    }
}
