//! Status reporting for callers that want to follow a run.

use reelsmith_core::RunId;

use crate::job::RunStatus;

/// Sender for run status changes.
///
/// Wraps a callback invoked each time a run moves to a new [`RunStatus`].
/// Statuses only ever move forward, so a receiver sees a monotonic sequence
/// ending in `Completed` or `Failed`.
pub struct StatusSender {
    callback: Box<dyn Fn(&RunId, RunStatus) + Send + Sync>,
}

impl StatusSender {
    pub fn new(callback: impl Fn(&RunId, RunStatus) + Send + Sync + 'static) -> Self {
        Self {
            callback: Box::new(callback),
        }
    }

    /// A sender that drops every update.
    pub fn noop() -> Self {
        Self {
            callback: Box::new(|_, _| {}),
        }
    }

    pub fn send(&self, run_id: &RunId, status: RunStatus) {
        (self.callback)(run_id, status);
    }
}

impl std::fmt::Debug for StatusSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusSender").finish_non_exhaustive()
    }
}
