//! First-error-wins coordination for the two pipeline tasks.

use crate::error::Error;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Shared failure slot for a group of tasks
///
/// The first [`FailFast::fail`] stores its error and cancels the group token;
/// later errors are dropped because they are consequences of that
/// cancellation. Every task still runs to completion and is joined.
pub(crate) struct FailFast {
    token: CancellationToken,
    first: Mutex<Option<Error>>,
}

impl FailFast {
    pub(crate) fn new(token: CancellationToken) -> Self {
        Self {
            token,
            first: Mutex::new(None),
        }
    }

    /// Token every task in the group watches
    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Record a task failure; only the first one is kept
    pub(crate) fn fail(&self, err: Error) {
        let mut first = self.first.lock().unwrap_or_else(|p| p.into_inner());
        if first.is_none() {
            tracing::debug!(error = %err, "pipeline task failed, cancelling group");
            *first = Some(err);
            self.token.cancel();
        } else {
            tracing::debug!(error = %err, "discarding secondary pipeline error");
        }
    }

    /// The first recorded error, if any
    pub(crate) fn take(&self) -> Option<Error> {
        self.first.lock().unwrap_or_else(|p| p.into_inner()).take()
    }
}
