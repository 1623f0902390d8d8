use std::{future::Future, time::Duration};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{LayerpullError, LayerpullResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The deadline used when a timeout reaches past what [`Instant`] can hold.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The cancellation scope of one pull.
///
/// Derived from a caller-supplied token, so cancelling the caller cancels the pull, while
/// cancelling the pull leaves the caller and sibling pulls alone. Reaching the deadline cancels
/// the pull's token as well. Dropping the context cancels it.
#[derive(Debug)]
pub struct PullContext {
    token: CancellationToken,
    deadline: Instant,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl PullContext {
    /// Creates a context that ends `timeout` from now or when `parent` is cancelled.
    pub fn new(parent: &CancellationToken, timeout: Duration) -> Self {
        let now = Instant::now();
        Self {
            token: parent.child_token(),
            deadline: now.checked_add(timeout).unwrap_or(now + FAR_FUTURE),
        }
    }

    /// Returns the pull's own token.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Returns true once the pull was cancelled or timed out.
    pub fn is_done(&self) -> bool {
        self.token.is_cancelled() || Instant::now() >= self.deadline
    }

    /// Resolves once the pull is cancelled or times out, and returns why.
    pub async fn done(&self) -> LayerpullError {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => LayerpullError::Cancelled("pull was cancelled".into()),
            _ = tokio::time::sleep_until(self.deadline) => {
                self.token.cancel();
                LayerpullError::Cancelled("pull deadline exceeded".into())
            }
        }
    }

    /// Runs a future until it completes or the pull ends, whichever is first.
    pub async fn run<F, T>(&self, future: F) -> LayerpullResult<T>
    where
        F: Future<Output = LayerpullResult<T>>,
    {
        tokio::select! {
            biased;
            err = self.done() => Err(err),
            result = future => result,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Drop for PullContext {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
