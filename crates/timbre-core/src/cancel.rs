//! Request cancellation and decode deadlines

use crate::error::{AnalysisError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared flag used to cancel an in-flight request.
///
/// Clones observe the same flag. The pipeline checks it between stages and
/// between decoded packets.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Fail with `Cancelled` if the token has fired
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(AnalysisError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Time budget for one decode, combined with the request's cancel token
#[derive(Debug, Clone)]
pub struct DecodeBudget {
    started: Instant,
    timeout: Duration,
    cancel: CancelToken,
}

impl DecodeBudget {
    pub fn new(timeout: Duration, cancel: CancelToken) -> Self {
        Self {
            started: Instant::now(),
            timeout,
            cancel,
        }
    }

    /// Budget that only expires after a very long time, for tests and tools
    pub fn unlimited() -> Self {
        Self::new(Duration::from_secs(24 * 3600), CancelToken::new())
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }

    pub fn is_expired(&self) -> bool {
        self.started.elapsed() > self.timeout
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Fail with `Cancelled` or `DecodeTimeout` when the budget is spent
    pub fn check(&self) -> Result<()> {
        self.cancel.check()?;
        if self.is_expired() {
            return Err(AnalysisError::DecodeTimeout(self.timeout_ms()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(token.check().is_ok());

        clone.cancel();
        assert!(matches!(token.check(), Err(AnalysisError::Cancelled)));
    }

    #[test]
    fn test_zero_budget_expires() {
        let budget = DecodeBudget::new(Duration::ZERO, CancelToken::new());
        std::thread::sleep(Duration::from_millis(2));
        assert!(matches!(budget.check(), Err(AnalysisError::DecodeTimeout(0))));
    }

    #[test]
    fn test_cancel_wins_over_timeout() {
        let token = CancelToken::new();
        token.cancel();
        let budget = DecodeBudget::new(Duration::ZERO, token);
        assert!(matches!(budget.check(), Err(AnalysisError::Cancelled)));
    }
}
