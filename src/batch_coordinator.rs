//! Bus-driven owner of the request coalescer.
//!
//! Missing-title signals from any number of waiters land here. The coordinator
//! is the only writer of the pending batch, so enqueue and snapshot-and-clear
//! never interleave.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::broadcast::{Receiver, Sender};

use crate::coalescer::RequestCoalescer;
use crate::fetch_dispatcher::FetchDispatcher;
use crate::protocol::{FetchMessage, LookupMessage, Message};
use crate::title_store::{country_or_default, TitleStore, COUNTRY_SETTING_KEY};

/// Upper bound on one sleep while a flush is armed, so new signals are drained promptly.
const FLUSH_TICK: Duration = Duration::from_millis(10);

pub struct BatchCoordinator {
    bus_consumer: Receiver<Message>,
    bus_producer: Sender<Message>,
    coalescer: RequestCoalescer,
    store: Arc<dyn TitleStore>,
    dispatcher: FetchDispatcher,
}

impl BatchCoordinator {
    pub fn new(
        bus_consumer: Receiver<Message>,
        bus_producer: Sender<Message>,
        store: Arc<dyn TitleStore>,
        dispatcher: FetchDispatcher,
        debounce: Duration,
    ) -> Self {
        Self {
            bus_consumer,
            bus_producer,
            coalescer: RequestCoalescer::new(debounce),
            store,
            dispatcher,
        }
    }

    fn handle_bus_message(&mut self, message: Message, now: Instant) {
        match message {
            Message::Lookup(LookupMessage::MissingTitle { title_id }) => {
                if self.coalescer.enqueue(title_id, now) {
                    debug!(
                        "Queued title {} ({} pending)",
                        title_id,
                        self.coalescer.pending_len()
                    );
                }
            }
            Message::Lookup(LookupMessage::CountryDetected { country }) => {
                let country = country.trim();
                if country.is_empty() {
                    return;
                }
                match self.store.set_setting(COUNTRY_SETTING_KEY, country) {
                    Ok(()) => info!("Country context set to {}", country),
                    Err(error) => warn!("Failed to persist country {}: {}", country, error),
                }
            }
            Message::Fetch(_) => {}
        }
    }

    /// Sends the pending batch once its quiet period has elapsed.
    fn flush_if_due(&mut self, now: Instant) -> Option<JoinHandle<()>> {
        let batch = self.coalescer.take_due_batch(now)?;
        let country = country_or_default(self.store.as_ref());
        info!("Flushing {} title(s) for country {}", batch.len(), country);
        let _ = self
            .bus_producer
            .send(Message::Fetch(FetchMessage::BatchFlushed {
                title_ids: batch.clone(),
            }));
        self.dispatcher.dispatch(batch, country)
    }

    fn drain_bus_messages_nonblocking(&mut self) -> bool {
        loop {
            match self.bus_consumer.try_recv() {
                Ok(message) => self.handle_bus_message(message, Instant::now()),
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!("Batch coordinator lagged; {} bus message(s) lost", skipped);
                }
                Err(TryRecvError::Closed) => return false,
            }
        }
    }

    /// Starts the blocking coordination loop. Returns when the bus closes.
    pub fn run(&mut self) {
        loop {
            if !self.drain_bus_messages_nonblocking() {
                break;
            }

            self.flush_if_due(Instant::now());

            if let Some(remaining) = self.coalescer.time_until_flush(Instant::now()) {
                thread::sleep(remaining.min(FLUSH_TICK));
                continue;
            }

            match self.bus_consumer.blocking_recv() {
                Ok(message) => self.handle_bus_message(message, Instant::now()),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Batch coordinator lagged; {} bus message(s) lost", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
        if self.coalescer.pending_len() > 0 {
            info!(
                "Bus closed with {} title(s) pending; dropping them",
                self.coalescer.pending_len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::BufRead;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::{Duration, Instant};

    use tokio::sync::broadcast;

    use super::BatchCoordinator;
    use crate::backends::{MetadataSource, SubmitReceipt};
    use crate::error::FetchError;
    use crate::fetch_dispatcher::FetchDispatcher;
    use crate::protocol::{DeliveryMode, FetchMessage, LookupMessage, Message};
    use crate::title_record::{JobId, TitleFragment, TitleId, TitleRecord};
    use crate::title_store::{MemoryTitleStore, TitleStore, COUNTRY_SETTING_KEY};

    /// Answers every batch in bulk with a record per requested id.
    #[derive(Default)]
    struct EchoSource {
        submitted: Mutex<Vec<(Vec<TitleId>, String)>>,
    }

    impl MetadataSource for EchoSource {
        fn submit_batch(
            &self,
            title_ids: &[TitleId],
            country: &str,
        ) -> Result<SubmitReceipt, FetchError> {
            let mut submitted = self.submitted.lock().expect("submitted lock");
            submitted.push((title_ids.to_vec(), country.to_string()));
            Ok(SubmitReceipt {
                job_id: JobId(format!("job-{}", submitted.len())),
                mode: DeliveryMode::Bulk,
                bulk_titles: Some(TitleFragment {
                    entries: title_ids
                        .iter()
                        .map(|title_id| {
                            (
                                *title_id,
                                TitleRecord {
                                    title: Some(format!("Title {title_id}")),
                                    ..TitleRecord::default()
                                },
                            )
                        })
                        .collect(),
                }),
            })
        }

        fn open_job_stream(&self, job_id: &JobId) -> Result<Box<dyn BufRead + Send>, FetchError> {
            Err(FetchError::Stream(format!("no stream for {job_id}")))
        }

        fn fetch_catalog(&self, _country: Option<&str>) -> Result<TitleFragment, FetchError> {
            Ok(TitleFragment::default())
        }
    }

    struct Harness {
        bus_sender: broadcast::Sender<Message>,
        source: Arc<EchoSource>,
        store: Arc<MemoryTitleStore>,
    }

    fn harness(debounce: Duration) -> (Harness, BatchCoordinator) {
        let (bus_sender, _) = broadcast::channel(256);
        let source = Arc::new(EchoSource::default());
        let store = Arc::new(MemoryTitleStore::new());
        let dispatcher = FetchDispatcher::new(source.clone(), store.clone(), bus_sender.clone());
        let coordinator = BatchCoordinator::new(
            bus_sender.subscribe(),
            bus_sender.clone(),
            store.clone(),
            dispatcher,
            debounce,
        );
        (
            Harness {
                bus_sender,
                source,
                store,
            },
            coordinator,
        )
    }

    fn missing(title_id: u64) -> Message {
        Message::Lookup(LookupMessage::MissingTitle {
            title_id: TitleId(title_id),
        })
    }

    #[test]
    fn test_duplicate_signals_flush_once_as_single_batch() {
        let (harness, mut coordinator) = harness(Duration::from_millis(1000));
        let mut observer = harness.bus_sender.subscribe();
        let start = Instant::now();

        coordinator.handle_bus_message(missing(7), start);
        coordinator.handle_bus_message(missing(7), start + Duration::from_millis(100));
        coordinator.handle_bus_message(missing(3), start + Duration::from_millis(200));

        assert!(coordinator
            .flush_if_due(start + Duration::from_millis(1100))
            .is_none());
        coordinator
            .flush_if_due(start + Duration::from_millis(1200))
            .expect("batch should dispatch")
            .join()
            .expect("dispatch thread should finish");

        assert_eq!(
            harness.source.submitted.lock().expect("submitted lock").clone(),
            vec![(vec![TitleId(3), TitleId(7)], "US".to_string())]
        );
        assert!(harness.store.get_title(TitleId(7)).expect("get").is_some());
        let flushed: Vec<FetchMessage> = std::iter::from_fn(|| observer.try_recv().ok())
            .filter_map(|message| match message {
                Message::Fetch(fetch @ FetchMessage::BatchFlushed { .. }) => Some(fetch),
                _ => None,
            })
            .collect();
        assert_eq!(
            flushed,
            vec![FetchMessage::BatchFlushed {
                title_ids: vec![TitleId(3), TitleId(7)],
            }]
        );
    }

    #[test]
    fn test_quiescence_timer_restarts_on_each_signal() {
        let (harness, mut coordinator) = harness(Duration::from_millis(1000));
        let start = Instant::now();
        let at = |millis: u64| start + Duration::from_millis(millis);

        coordinator.handle_bus_message(missing(1), at(0));
        coordinator.handle_bus_message(missing(2), at(200));
        coordinator.handle_bus_message(missing(3), at(400));
        assert!(coordinator.flush_if_due(at(1100)).is_none());
        coordinator.handle_bus_message(missing(4), at(1100));
        assert!(coordinator.flush_if_due(at(1399)).is_none());
        coordinator
            .flush_if_due(at(2100))
            .expect("batch should dispatch")
            .join()
            .expect("dispatch thread should finish");

        let submitted = harness.source.submitted.lock().expect("submitted lock").clone();
        assert_eq!(submitted.len(), 1);
        assert_eq!(
            submitted[0].0,
            vec![TitleId(1), TitleId(2), TitleId(3), TitleId(4)]
        );
    }

    #[test]
    fn test_flush_uses_detected_country() {
        let (harness, mut coordinator) = harness(Duration::from_millis(100));
        let start = Instant::now();

        coordinator.handle_bus_message(
            Message::Lookup(LookupMessage::CountryDetected {
                country: " GB ".to_string(),
            }),
            start,
        );
        coordinator.handle_bus_message(
            Message::Lookup(LookupMessage::CountryDetected {
                country: "".to_string(),
            }),
            start,
        );
        assert_eq!(
            harness
                .store
                .get_setting(COUNTRY_SETTING_KEY)
                .expect("setting read"),
            Some("GB".to_string())
        );

        coordinator.handle_bus_message(missing(9), start);
        coordinator
            .flush_if_due(start + Duration::from_millis(100))
            .expect("batch should dispatch")
            .join()
            .expect("dispatch thread should finish");
        assert_eq!(
            harness.source.submitted.lock().expect("submitted lock")[0].1,
            "GB"
        );
    }

    #[test]
    fn test_run_loop_batches_bursts_from_the_bus() {
        let (harness, mut coordinator) = harness(Duration::from_millis(150));
        let mut observer = harness.bus_sender.subscribe();
        thread::spawn(move || coordinator.run());

        for title_id in [5, 6, 5, 7] {
            harness
                .bus_sender
                .send(missing(title_id))
                .expect("bus should accept");
            thread::sleep(Duration::from_millis(20));
        }

        let started = Instant::now();
        let mut flushed = Vec::new();
        while started.elapsed() < Duration::from_secs(3) {
            match observer.try_recv() {
                Ok(Message::Fetch(FetchMessage::BatchFlushed { title_ids })) => {
                    flushed.push(title_ids);
                }
                Ok(_) => {}
                Err(_) => {
                    if harness.store.title_count().expect("count") == 3 {
                        break;
                    }
                    thread::sleep(Duration::from_millis(10));
                }
            }
        }

        assert_eq!(flushed, vec![vec![TitleId(5), TitleId(6), TitleId(7)]]);
        assert_eq!(harness.store.title_count().expect("count"), 3);
    }
}
