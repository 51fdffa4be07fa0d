//! Blocking title lookups that fall back to batched retrieval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};
use tokio::sync::broadcast::Sender;

use crate::config::LookupConfig;
use crate::protocol::{LookupMessage, Message};
use crate::title_record::{TitleId, TitleRecord};
use crate::title_store::TitleStore;

/// Result of waiting for one title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome {
    Found(TitleRecord),
    /// The timeout elapsed without the record appearing.
    NotFound,
    Cancelled,
}

impl LookupOutcome {
    pub fn into_record(self) -> Option<TitleRecord> {
        match self {
            Self::Found(record) => Some(record),
            Self::NotFound | Self::Cancelled => None,
        }
    }
}

/// Resolves title lookups against the store, requesting missing titles over the bus.
///
/// Any number of threads may wait at once; each missing title is signalled
/// once per wait and the coordinator dedups the signals into one batch entry.
#[derive(Clone)]
pub struct LookupWaiter {
    store: Arc<dyn TitleStore>,
    bus_producer: Sender<Message>,
    timeout: Duration,
    poll_interval: Duration,
}

impl LookupWaiter {
    pub fn new(
        store: Arc<dyn TitleStore>,
        bus_producer: Sender<Message>,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            bus_producer,
            timeout,
            poll_interval,
        }
    }

    pub fn from_config(
        store: Arc<dyn TitleStore>,
        bus_producer: Sender<Message>,
        config: &LookupConfig,
    ) -> Self {
        Self::new(
            store,
            bus_producer,
            Duration::from_millis(config.timeout_ms),
            Duration::from_millis(config.poll_interval_ms),
        )
    }

    pub fn await_title(&self, title_id: TitleId) -> LookupOutcome {
        self.await_inner(title_id, self.timeout, self.poll_interval, None)
    }

    pub fn await_title_with(
        &self,
        title_id: TitleId,
        timeout: Duration,
        poll_interval: Duration,
    ) -> LookupOutcome {
        self.await_inner(title_id, timeout, poll_interval, None)
    }

    /// Like [`LookupWaiter::await_title`], but gives up once `cancel` is set.
    ///
    /// The flag is checked after every poll sleep.
    pub fn await_title_cancellable(&self, title_id: TitleId, cancel: &AtomicBool) -> LookupOutcome {
        self.await_inner(title_id, self.timeout, self.poll_interval, Some(cancel))
    }

    fn read_cached(&self, title_id: TitleId) -> Option<TitleRecord> {
        match self.store.get_title(title_id) {
            Ok(record) => record,
            Err(error) => {
                warn!("Store read for title {} failed: {}", title_id, error);
                None
            }
        }
    }

    fn await_inner(
        &self,
        title_id: TitleId,
        timeout: Duration,
        poll_interval: Duration,
        cancel: Option<&AtomicBool>,
    ) -> LookupOutcome {
        if let Some(record) = self.read_cached(title_id) {
            return LookupOutcome::Found(record);
        }

        if self
            .bus_producer
            .send(Message::Lookup(LookupMessage::MissingTitle { title_id }))
            .is_err()
        {
            debug!("No coordinator listening for title {}", title_id);
        }

        let poll_interval = poll_interval.max(Duration::from_millis(1));
        let started = Instant::now();
        loop {
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                debug!("Lookup for title {} timed out after {:?}", title_id, elapsed);
                return LookupOutcome::NotFound;
            }
            thread::sleep(poll_interval.min(timeout - elapsed));
            if cancel.is_some_and(|flag| flag.load(Ordering::Acquire)) {
                return LookupOutcome::Cancelled;
            }
            if let Some(record) = self.read_cached(title_id) {
                return LookupOutcome::Found(record);
            }
        }
    }
}
