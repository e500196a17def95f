//! Share and snapshot lifecycle: get-or-create, poll until converged, roll
//! back on failure.
//!
//! Every backend call made here is classified before it leaves the module, so
//! callers only ever see [`CsiError`]s.  Polls run inline on the calling
//! request and observe the driver's cancellation token.

mod access;
pub mod backoff;
mod shares;
mod snapshots;

use libcsi::CsiError;
use tokio_util::sync::CancellationToken;

use crate::config::WaitConfig;
use crate::manila::ManilaClient;

pub use backoff::{Backoff, Poll, WaitError};

/// Lifecycle operations bound to one authenticated backend client.
#[derive(Clone, Copy)]
pub struct Lifecycle<'a> {
    client: &'a dyn ManilaClient,
    wait: &'a WaitConfig,
    cancel: &'a CancellationToken,
}

impl<'a> Lifecycle<'a> {
    pub fn new(
        client: &'a dyn ManilaClient,
        wait: &'a WaitConfig,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            client,
            wait,
            cancel,
        }
    }
}

/// Turn a finished wait into the caller's error, naming `what` for
/// correlation.
fn wait_failure(err: WaitError, what: &str, backoff: &Backoff) -> CsiError {
    match err {
        WaitError::Exhausted => CsiError::DeadlineExceeded(format!(
            "{what} did not converge within {:?}",
            backoff.budget()
        )),
        WaitError::Cancelled => CsiError::Cancelled(format!("wait for {what} was cancelled")),
        WaitError::Failed(e) => e,
    }
}

/// Whether a failed wait warrants deleting the resource.  Resources that
/// merely did not converge in time are kept for the next retry to adopt.
fn needs_rollback(err: &CsiError) -> bool {
    !matches!(
        err,
        CsiError::DeadlineExceeded(_) | CsiError::Cancelled(_) | CsiError::NotFound(_)
    )
}
