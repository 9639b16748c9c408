use std::future::Future;

use tokio::time::{Duration, Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::error::ExtractError;

/// Per-call deadline and cancellation handle.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    deadline: Option<Instant>,
    token: CancellationToken,
}

impl RequestContext {
    /// No deadline; only explicit cancellation stops it.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            token: CancellationToken::new(),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Drives `work` until it finishes, the deadline passes, or the context is
    /// cancelled. The work future is dropped on the latter two, which aborts
    /// in-flight requests and kills child processes spawned with
    /// `kill_on_drop`.
    pub async fn run<T, F>(&self, work: F) -> Result<T, ExtractError>
    where
        F: Future<Output = Result<T, ExtractError>>,
    {
        if self.token.is_cancelled() {
            return Err(ExtractError::Cancelled);
        }

        let deadline = async {
            match self.deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(ExtractError::Cancelled),
            _ = deadline => Err(ExtractError::DeadlineExceeded),
            result = work => result,
        }
    }
}
