use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation signal for long correction and search passes.
///
/// Passes check the token at sample/element loop boundaries and between
/// search generations. Because every pass stages its writes and commits them
/// only after the loops finish, a cancelled pass leaves the measurement graph
/// untouched.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub(crate) fn checkpoint(&self) -> crate::Result<()> {
        if self.is_cancelled() {
            Err(crate::CorrectionError::Cancelled)
        } else {
            Ok(())
        }
    }
}
