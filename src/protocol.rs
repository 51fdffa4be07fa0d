//! Event-bus protocol shared by all runtime components.
//!
//! Lookup waiters publish missing-title signals, the batch coordinator turns
//! them into dispatched jobs, and the fetch dispatcher reports job progress.

use crate::title_record::{JobId, TitleId};

/// Top-level envelope for all bus traffic.
#[derive(Debug, Clone)]
pub enum Message {
    Lookup(LookupMessage),
    Fetch(FetchMessage),
}

/// Signals raised by the browsing UI side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupMessage {
    /// A waiter found no cached record for this title.
    MissingTitle { title_id: TitleId },
    /// The page reported the viewer's region.
    CountryDetected { country: String },
}

/// How a job's results arrive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    Bulk,
    Streamed,
}

/// Why a job's channel terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobCloseReason {
    Completed,
    StreamError(String),
    /// Results arrived but could not be written to the title store.
    StoreFailed(String),
    ClosedByRequest,
}

/// Batch and job lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchMessage {
    BatchFlushed {
        title_ids: Vec<TitleId>,
    },
    JobStarted {
        job_id: JobId,
        title_ids: Vec<TitleId>,
        mode: DeliveryMode,
    },
    TitlesStored {
        job_id: JobId,
        title_ids: Vec<TitleId>,
    },
    /// The batch was dropped; its titles stay absent until looked up again.
    DispatchFailed {
        title_ids: Vec<TitleId>,
        error: String,
    },
    JobClosed {
        job_id: JobId,
        reason: JobCloseReason,
    },
}
