//! Progress handles for in-flight operations.
//!
//! # Design
//! A [`ProgressHandle`] is created when an operation is dispatched and is
//! shared (cheaply cloned) between the caller, the pipeline task and the
//! `Connection`, which sees it through a [`TransferContext`].
//!
//! The terminal state is a single atomic phase. The pipeline claims
//! `Finished` before delivering a result and `cancel` claims `Cancelled`;
//! whichever wins decides what the one completion carries. Once cancelled,
//! progress reports are dropped.
//!
//! Progress callbacks are write-once. Each slot remembers the last reported
//! progress, so a callback installed after transfer started is invoked
//! with the latest state straight away.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{watch, Notify};
use tracing::debug;
use uuid::Uuid;

const RUNNING: u8 = 0;
const FINISHED: u8 = 1;
const CANCELLED: u8 = 2;

/// Bytes moved so far in one direction of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Bytes moved since the previous report.
    pub bytes: u64,
    pub total_bytes: u64,
    /// `None` when the size is unknown (e.g. chunked responses).
    pub expected_total_bytes: Option<u64>,
}

pub type ProgressCallback = Arc<dyn Fn(Progress) + Send + Sync>;

/// Advisory transfer state a `Connection` may honour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Running,
    Paused,
}

#[derive(Default)]
struct ProgressSlot {
    callback: Option<ProgressCallback>,
    last: Option<Progress>,
}

struct Shared {
    id: Uuid,
    phase: AtomicU8,
    cancel: Notify,
    transfer: watch::Sender<TransferState>,
    upload: Mutex<ProgressSlot>,
    download: Mutex<ProgressSlot>,
}

fn lock(slot: &Mutex<ProgressSlot>) -> MutexGuard<'_, ProgressSlot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle to one in-flight operation.
#[derive(Clone)]
pub struct ProgressHandle {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ProgressHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressHandle")
            .field("id", &self.shared.id)
            .field("phase", &self.shared.phase.load(Ordering::Acquire))
            .finish()
    }
}

impl ProgressHandle {
    pub(crate) fn new() -> Self {
        let (transfer, _) = watch::channel(TransferState::Running);
        Self {
            shared: Arc::new(Shared {
                id: Uuid::new_v4(),
                phase: AtomicU8::new(RUNNING),
                cancel: Notify::new(),
                transfer,
                upload: Mutex::new(ProgressSlot::default()),
                download: Mutex::new(ProgressSlot::default()),
            }),
        }
    }

    /// Operation id, also recorded on the operation's tracing span.
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    /// Install the upload progress callback. Returns `false` if one was
    /// already installed; the first callback stays.
    pub fn set_upload_progress(&self, callback: impl Fn(Progress) + Send + Sync + 'static) -> bool {
        self.install(&self.shared.upload, Arc::new(callback))
    }

    pub fn upload_progress(&self) -> Option<ProgressCallback> {
        lock(&self.shared.upload).callback.clone()
    }

    /// Install the download progress callback. Returns `false` if one was
    /// already installed; the first callback stays.
    pub fn set_download_progress(&self, callback: impl Fn(Progress) + Send + Sync + 'static) -> bool {
        self.install(&self.shared.download, Arc::new(callback))
    }

    pub fn download_progress(&self) -> Option<ProgressCallback> {
        lock(&self.shared.download).callback.clone()
    }

    fn install(&self, slot: &Mutex<ProgressSlot>, callback: ProgressCallback) -> bool {
        let replay = {
            let mut slot = lock(slot);
            if slot.callback.is_some() {
                return false;
            }
            slot.callback = Some(callback.clone());
            slot.last
        };
        if let Some(progress) = replay {
            if !self.is_cancelled() {
                callback(progress);
            }
        }
        true
    }

    /// Ask the connection to pause the transfer. Advisory.
    pub fn pause(&self) {
        if self.is_running() {
            self.shared.transfer.send_replace(TransferState::Paused);
        }
    }

    pub fn resume(&self) {
        if self.is_running() {
            self.shared.transfer.send_replace(TransferState::Running);
        }
    }

    pub fn is_paused(&self) -> bool {
        *self.shared.transfer.borrow() == TransferState::Paused
    }

    /// Cancel the operation. The completion will carry
    /// `RestError::OperationCancelled` unless it was already delivered.
    /// Returns `false` if the operation was already finished or cancelled.
    pub fn cancel(&self) -> bool {
        let cancelled = self
            .shared
            .phase
            .compare_exchange(RUNNING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if cancelled {
            debug!(operation = %self.shared.id, "operation cancelled");
            self.shared.cancel.notify_one();
        }
        cancelled
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.phase.load(Ordering::Acquire) == CANCELLED
    }

    pub fn is_finished(&self) -> bool {
        self.shared.phase.load(Ordering::Acquire) == FINISHED
    }

    fn is_running(&self) -> bool {
        self.shared.phase.load(Ordering::Acquire) == RUNNING
    }

    /// Claim the terminal state for a result. `false` means the operation
    /// was cancelled first.
    pub(crate) fn finish(&self) -> bool {
        self.shared
            .phase
            .compare_exchange(RUNNING, FINISHED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Resolves once `cancel` has been called.
    pub(crate) async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            self.shared.cancel.notified().await;
        }
    }

    pub(crate) fn transfer_context(&self) -> TransferContext {
        TransferContext {
            handle: self.clone(),
        }
    }

    fn report(&self, slot: &Mutex<ProgressSlot>, progress: Progress) {
        if !self.is_running() {
            return;
        }
        let callback = {
            let mut slot = lock(slot);
            slot.last = Some(progress);
            slot.callback.clone()
        };
        if let Some(callback) = callback {
            callback(progress);
        }
    }
}

/// The `Connection`'s view of an operation: progress reporting and the
/// advisory pause state.
#[derive(Clone, Debug)]
pub struct TransferContext {
    handle: ProgressHandle,
}

impl TransferContext {
    /// A context not attached to any dispatched operation.
    pub fn detached() -> Self {
        Self {
            handle: ProgressHandle::new(),
        }
    }

    pub fn operation_id(&self) -> Uuid {
        self.handle.id()
    }

    pub fn report_upload(&self, progress: Progress) {
        self.handle.report(&self.handle.shared.upload, progress);
    }

    pub fn report_download(&self, progress: Progress) {
        self.handle.report(&self.handle.shared.download, progress);
    }

    pub fn state(&self) -> TransferState {
        *self.handle.shared.transfer.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<TransferState> {
        self.handle.shared.transfer.subscribe()
    }

    pub fn is_cancelled(&self) -> bool {
        self.handle.is_cancelled()
    }

    /// Wait until the transfer is not paused.
    pub async fn wait_while_paused(&self) {
        let mut state = self.subscribe();
        // A closed channel cannot happen while `self` holds the sender.
        let _ = state.wait_for(|s| *s == TransferState::Running).await;
    }
}
