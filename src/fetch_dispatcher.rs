//! Batch dispatch and result consumption.
//!
//! Each flushed batch becomes one outbound submission on its own dispatch
//! thread. The reply either carries every record (bulk) or names a job whose
//! push stream delivers records one message at a time (streamed). Records are
//! written to the title store as soon as they are decoded.

use std::collections::HashMap;
use std::io::BufRead;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use log::{debug, info, warn};
use tokio::sync::broadcast::Sender;

use crate::backends::{MetadataSource, SubmitReceipt};
use crate::event_stream::EventStreamReader;
use crate::protocol::{DeliveryMode, FetchMessage, JobCloseReason, Message};
use crate::title_record::{JobId, TitleFragment, TitleId};
use crate::title_store::TitleStore;

/// Snapshot of one live job-table entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSummary {
    pub job_id: JobId,
    pub title_ids: Vec<TitleId>,
    pub mode: DeliveryMode,
}

struct TrackedJob {
    title_ids: Vec<TitleId>,
    mode: DeliveryMode,
    close_requested: Arc<AtomicBool>,
}

/// Sends batches to the metadata source and tracks their live jobs.
///
/// Cloning shares the job table.
#[derive(Clone)]
pub struct FetchDispatcher {
    source: Arc<dyn MetadataSource>,
    store: Arc<dyn TitleStore>,
    bus_producer: Sender<Message>,
    jobs: Arc<Mutex<HashMap<JobId, TrackedJob>>>,
    dispatch_seq: Arc<AtomicU64>,
}

impl FetchDispatcher {
    pub fn new(
        source: Arc<dyn MetadataSource>,
        store: Arc<dyn TitleStore>,
        bus_producer: Sender<Message>,
    ) -> Self {
        Self {
            source,
            store,
            bus_producer,
            jobs: Arc::new(Mutex::new(HashMap::new())),
            dispatch_seq: Arc::new(AtomicU64::new(0)),
        }
    }

    fn lock_jobs(&self) -> MutexGuard<'_, HashMap<JobId, TrackedJob>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, message: FetchMessage) {
        let _ = self.bus_producer.send(Message::Fetch(message));
    }

    /// Runs one batch on a new dispatch thread.
    ///
    /// Returns `None` when the thread could not be started; the batch is then dropped.
    pub fn dispatch(&self, title_ids: Vec<TitleId>, country: String) -> Option<JoinHandle<()>> {
        let seq = self.dispatch_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let dispatcher = self.clone();
        let thread_title_ids = title_ids.clone();
        let spawned = thread::Builder::new()
            .name(format!("title-dispatch-{seq}"))
            .spawn(move || dispatcher.run_dispatch(&thread_title_ids, &country));
        match spawned {
            Ok(handle) => Some(handle),
            Err(error) => {
                warn!("Failed to start dispatch thread for {} title(s): {}", title_ids.len(), error);
                self.emit(FetchMessage::DispatchFailed {
                    title_ids,
                    error: error.to_string(),
                });
                None
            }
        }
    }

    /// Submits the batch and consumes its results on the calling thread.
    pub fn run_dispatch(&self, title_ids: &[TitleId], country: &str) {
        if title_ids.is_empty() {
            return;
        }
        let receipt = match self.source.submit_batch(title_ids, country) {
            Ok(receipt) => receipt,
            Err(error) => {
                warn!(
                    "Dispatch of {} title(s) failed, dropping batch: {}",
                    title_ids.len(),
                    error
                );
                self.emit(FetchMessage::DispatchFailed {
                    title_ids: title_ids.to_vec(),
                    error: error.to_string(),
                });
                return;
            }
        };

        info!(
            "Job {} accepted {} title(s) ({:?}, country={})",
            receipt.job_id,
            title_ids.len(),
            receipt.mode,
            country
        );
        let close_requested = Arc::new(AtomicBool::new(false));
        self.lock_jobs().insert(
            receipt.job_id.clone(),
            TrackedJob {
                title_ids: title_ids.to_vec(),
                mode: receipt.mode,
                close_requested: Arc::clone(&close_requested),
            },
        );
        self.emit(FetchMessage::JobStarted {
            job_id: receipt.job_id.clone(),
            title_ids: title_ids.to_vec(),
            mode: receipt.mode,
        });

        let SubmitReceipt {
            job_id,
            mode,
            bulk_titles,
        } = receipt;
        let reason = match (mode, bulk_titles) {
            (DeliveryMode::Bulk, titles) => {
                self.write_bulk(&job_id, title_ids, titles.unwrap_or_default())
            }
            (DeliveryMode::Streamed, _) => match self.source.open_job_stream(&job_id) {
                Ok(reader) => self.consume_stream(&job_id, reader, &close_requested),
                Err(error) => {
                    warn!("Failed to open stream for job {}: {}", job_id, error);
                    JobCloseReason::StreamError(error.to_string())
                }
            },
        };
        self.finish_job(&job_id, &close_requested, reason);
    }

    fn write_bulk(
        &self,
        job_id: &JobId,
        title_ids: &[TitleId],
        fragment: TitleFragment,
    ) -> JobCloseReason {
        if fragment.is_empty() {
            debug!("Job {} bulk reply carried no records", job_id);
            return JobCloseReason::Completed;
        }
        match self.store.put_titles(&fragment.entries) {
            Ok(()) => {
                self.emit(FetchMessage::TitlesStored {
                    job_id: job_id.clone(),
                    title_ids: fragment.title_ids(),
                });
                JobCloseReason::Completed
            }
            Err(error) => {
                warn!("Failed to store bulk results for job {}: {}", job_id, error);
                self.emit(FetchMessage::DispatchFailed {
                    title_ids: title_ids.to_vec(),
                    error: error.to_string(),
                });
                JobCloseReason::StoreFailed(error.to_string())
            }
        }
    }

    /// Writes each stream message through to the store as it arrives.
    ///
    /// Malformed messages are skipped. The channel ends on EOF, a read error,
    /// or a close request observed between messages.
    pub fn consume_stream<R: BufRead>(
        &self,
        job_id: &JobId,
        reader: R,
        close_requested: &AtomicBool,
    ) -> JobCloseReason {
        for event in EventStreamReader::new(reader) {
            if close_requested.load(Ordering::Acquire) {
                return JobCloseReason::ClosedByRequest;
            }
            let event = match event {
                Ok(event) => event,
                Err(error) => {
                    warn!("Stream for job {} failed: {}", job_id, error);
                    return JobCloseReason::StreamError(error.to_string());
                }
            };
            if event.data.trim().is_empty() {
                continue;
            }
            let fragment = match TitleFragment::parse(&event.data) {
                Ok(fragment) => fragment,
                Err(reason) => {
                    warn!("Skipping malformed message on job {}: {}", job_id, reason);
                    continue;
                }
            };
            if fragment.is_empty() {
                continue;
            }
            match self.store.put_titles(&fragment.entries) {
                Ok(()) => {
                    debug!("Job {} stored {:?}", job_id, fragment.title_ids());
                    self.emit(FetchMessage::TitlesStored {
                        job_id: job_id.clone(),
                        title_ids: fragment.title_ids(),
                    });
                }
                Err(error) => {
                    warn!("Failed to store message on job {}: {}", job_id, error);
                }
            }
        }
        if close_requested.load(Ordering::Acquire) {
            JobCloseReason::ClosedByRequest
        } else {
            JobCloseReason::Completed
        }
    }

    fn finish_job(&self, job_id: &JobId, close_requested: &Arc<AtomicBool>, reason: JobCloseReason) {
        {
            let mut jobs = self.lock_jobs();
            // A reused job id may already belong to a newer dispatch.
            let owned = jobs
                .get(job_id)
                .is_some_and(|job| Arc::ptr_eq(&job.close_requested, close_requested));
            if owned {
                jobs.remove(job_id);
            }
        }
        info!("Job {} closed ({:?})", job_id, reason);
        self.emit(FetchMessage::JobClosed {
            job_id: job_id.clone(),
            reason,
        });
    }

    pub fn active_jobs(&self) -> Vec<JobSummary> {
        let mut summaries: Vec<JobSummary> = self
            .lock_jobs()
            .iter()
            .map(|(job_id, job)| JobSummary {
                job_id: job_id.clone(),
                title_ids: job.title_ids.clone(),
                mode: job.mode,
            })
            .collect();
        summaries.sort_by(|left, right| left.job_id.cmp(&right.job_id));
        summaries
    }

    /// Requests closure of a live job's channel. Returns `false` for unknown ids.
    pub fn close_job(&self, job_id: &JobId) -> bool {
        match self.lock_jobs().get(job_id) {
            Some(job) => {
                job.close_requested.store(true, Ordering::Release);
                true
            }
            None => false,
        }
    }
}
