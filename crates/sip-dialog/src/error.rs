use std::fmt;

/// Why session timer negotiation or maintenance failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionTimerFailure {
    /// The peer requires timers we will not do (answered with 420), or it
    /// rejected our `Require: timer` with a 420.
    UnsupportedByPeer,
    /// Proposed interval below the local floor. Recoverable by one retry.
    IntervalTooSmall { min_se: u32 },
    /// A second 422 in the same attempt.
    NegotiationFailed,
    /// Our refresh request failed or timed out.
    RefreshFailed,
    /// The remote refresher went silent past the guard band.
    ExpiryWatchdogFired,
}

impl SessionTimerFailure {
    /// SIP status code this failure corresponds to.
    pub fn reason_code(&self) -> u16 {
        match self {
            SessionTimerFailure::UnsupportedByPeer => 420,
            SessionTimerFailure::IntervalTooSmall { .. } => 422,
            SessionTimerFailure::NegotiationFailed => 422,
            SessionTimerFailure::RefreshFailed => 408,
            SessionTimerFailure::ExpiryWatchdogFired => 408,
        }
    }

    /// False only for the 422 that a single retry can still fix.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SessionTimerFailure::IntervalTooSmall { .. })
    }
}

impl fmt::Display for SessionTimerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionTimerFailure::UnsupportedByPeer => write!(f, "session timer unsupported by peer"),
            SessionTimerFailure::IntervalTooSmall { min_se } => {
                write!(f, "session interval too small (Min-SE {})", min_se)
            }
            SessionTimerFailure::NegotiationFailed => write!(f, "session timer negotiation failed"),
            SessionTimerFailure::RefreshFailed => write!(f, "session refresh failed"),
            SessionTimerFailure::ExpiryWatchdogFired => {
                write!(f, "no session refresh received before expiry")
            }
        }
    }
}

impl std::error::Error for SessionTimerFailure {}

/// Failure reported by the transaction layer for a request we sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    /// No final response before Timer B/F.
    Timeout,
    Transport(String),
}

impl fmt::Display for TransactionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionError::Timeout => write!(f, "transaction timed out"),
            TransactionError::Transport(msg) => write!(f, "transport error: {}", msg),
        }
    }
}

impl std::error::Error for TransactionError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_codes_follow_the_taxonomy() {
        assert_eq!(SessionTimerFailure::UnsupportedByPeer.reason_code(), 420);
        assert_eq!(
            SessionTimerFailure::IntervalTooSmall { min_se: 90 }.reason_code(),
            422
        );
        assert_eq!(SessionTimerFailure::NegotiationFailed.reason_code(), 422);
        assert_eq!(SessionTimerFailure::RefreshFailed.reason_code(), 408);
        assert_eq!(SessionTimerFailure::ExpiryWatchdogFired.reason_code(), 408);
    }

    #[test]
    fn only_a_first_422_is_recoverable() {
        assert!(!SessionTimerFailure::IntervalTooSmall { min_se: 120 }.is_fatal());
        assert!(SessionTimerFailure::NegotiationFailed.is_fatal());
        assert!(SessionTimerFailure::ExpiryWatchdogFired.is_fatal());
    }
}
