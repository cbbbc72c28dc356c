use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::driver::next_object_id;
use crate::engine::SubmissionState;
use crate::error::{Error, Result};
use crate::wait::{SyncStatus, Timeout};

/// Completion signal for one `execute_command_lists` call on the queue that
/// created it.
pub struct Fence {
    id: u64,
    queue_id: u64,
    bound: Mutex<Option<Arc<SubmissionState>>>,
    destroyed: AtomicBool,
}

impl Fence {
    pub(crate) fn new(queue_id: u64) -> Self {
        Self {
            id: next_object_id(),
            queue_id,
            bound: Mutex::new(None),
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    fn lock(&self) -> MutexGuard<'_, Option<Arc<SubmissionState>>> {
        self.bound
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_live(&self) -> Result<()> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(Error::InvalidHandle("fence has been destroyed"));
        }
        Ok(())
    }

    /// Attaches the fence to a new submission on `queue_id`.
    pub(crate) fn bind(&self, queue_id: u64, state: Arc<SubmissionState>) -> Result<()> {
        self.check_live()?;
        if queue_id != self.queue_id {
            return Err(Error::InvalidHandle("fence belongs to another queue"));
        }
        let mut bound = self.lock();
        if bound.as_ref().is_some_and(|s| !s.is_done()) {
            return Err(Error::InvalidState("fence is attached to unfinished work"));
        }
        *bound = Some(state);
        Ok(())
    }

    pub(crate) fn check_bindable(&self, queue_id: u64) -> Result<()> {
        self.check_live()?;
        if queue_id != self.queue_id {
            return Err(Error::InvalidHandle("fence belongs to another queue"));
        }
        if self.lock().as_ref().is_some_and(|s| !s.is_done()) {
            return Err(Error::InvalidState("fence is attached to unfinished work"));
        }
        Ok(())
    }

    /// `NotReady` until the attached submission finishes. A fault in that
    /// submission is returned as the error.
    pub fn query_status(&self) -> Result<SyncStatus> {
        self.check_live()?;
        let state = self.lock().clone();
        match state.and_then(|s| s.poll()) {
            None => Ok(SyncStatus::NotReady),
            Some(Ok(())) => Ok(SyncStatus::Ready),
            Some(Err(err)) => Err(err),
        }
    }

    /// Waiting forever on a fence with no submission would never return, so
    /// that case is `InvalidState`; finite waits report `NotReady`.
    pub fn host_synchronize(&self, timeout: Timeout) -> Result<SyncStatus> {
        self.check_live()?;
        let Some(state) = self.lock().clone() else {
            if timeout.is_infinite() {
                return Err(Error::InvalidState("fence has no submission to wait for"));
            }
            return Ok(SyncStatus::NotReady);
        };
        match state.wait(timeout) {
            None => Ok(SyncStatus::NotReady),
            Some(Ok(())) => Ok(SyncStatus::Ready),
            Some(Err(err)) => Err(err),
        }
    }

    /// Returns the fence to `NotReady` so it can be reused.
    pub fn reset(&self) -> Result<()> {
        self.check_live()?;
        let mut bound = self.lock();
        if bound.as_ref().is_some_and(|s| !s.is_done()) {
            return Err(Error::InvalidState("fence is attached to unfinished work"));
        }
        *bound = None;
        Ok(())
    }

    pub fn destroy(&self) -> Result<()> {
        self.check_live()?;
        if self.lock().as_ref().is_some_and(|s| !s.is_done()) {
            return Err(Error::InvalidState("fence is attached to unfinished work"));
        }
        self.destroyed.store(true, Ordering::Release);
        Ok(())
    }
}

impl fmt::Debug for Fence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fence")
            .field("id", &self.id)
            .field("queue", &self.queue_id)
            .field("destroyed", &self.destroyed.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn unbound_fence_is_not_ready() {
        let fence = Fence::new(1);
        assert_eq!(fence.query_status().unwrap(), SyncStatus::NotReady);
        assert_eq!(
            fence.host_synchronize(Timeout::ZERO).unwrap(),
            SyncStatus::NotReady
        );
        assert!(matches!(
            fence.host_synchronize(Timeout::INFINITE),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn fence_from_other_queue_is_invalid_handle() {
        let fence = Fence::new(1);
        assert!(matches!(
            fence.bind(2, SubmissionState::new()),
            Err(Error::InvalidHandle(_))
        ));
    }

    #[test]
    fn pending_fence_cannot_be_rebound_or_reset() {
        let fence = Fence::new(1);
        fence.bind(1, SubmissionState::new()).unwrap();
        assert!(matches!(
            fence.bind(1, SubmissionState::new()),
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(fence.reset(), Err(Error::InvalidState(_))));
        assert!(matches!(fence.destroy(), Err(Error::InvalidState(_))));
    }

    #[test]
    fn destroyed_fence_is_invalid() {
        let fence = Fence::new(1);
        fence.destroy().unwrap();
        assert!(matches!(fence.query_status(), Err(Error::InvalidHandle(_))));
    }
}
