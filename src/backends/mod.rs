//! Metadata-source abstraction and its HTTP implementation.

pub mod metadata_service;

use std::io::BufRead;

use crate::error::FetchError;
use crate::protocol::DeliveryMode;
use crate::title_record::{JobId, TitleFragment, TitleId};

/// Accepted batch as reported by the metadata service.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitReceipt {
    pub job_id: JobId,
    pub mode: DeliveryMode,
    /// Inline results, present for bulk delivery.
    pub bulk_titles: Option<TitleFragment>,
}

/// Interface implemented by concrete metadata-service clients.
pub trait MetadataSource: Send + Sync {
    fn submit_batch(&self, title_ids: &[TitleId], country: &str)
        -> Result<SubmitReceipt, FetchError>;
    /// Opens the per-job push channel; the returned reader yields raw event-stream text.
    fn open_job_stream(&self, job_id: &JobId) -> Result<Box<dyn BufRead + Send>, FetchError>;
    /// Full known mapping, used to pre-seed the store.
    fn fetch_catalog(&self, country: Option<&str>) -> Result<TitleFragment, FetchError>;
}
