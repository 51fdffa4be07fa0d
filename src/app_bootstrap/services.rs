use std::{
    any::Any,
    path::PathBuf,
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use log::info;
use tokio::sync::broadcast;

use crate::{
    backends::MetadataSource,
    batch_coordinator::BatchCoordinator,
    config::{StoreBackend, StoreConfig},
    db_manager::DbManager,
    error::{StoreError, StoreResult},
    fetch_dispatcher::FetchDispatcher,
    protocol::Message,
    title_store::{MemoryTitleStore, TitleStore},
};

pub struct BackgroundServicesConfig {
    pub bus_sender: broadcast::Sender<Message>,
    pub store: Arc<dyn TitleStore>,
    pub source: Arc<dyn MetadataSource>,
    pub debounce: Duration,
}

pub struct BackgroundServices {
    pub dispatcher: FetchDispatcher,
    pub coordinator_thread: JoinHandle<()>,
}

fn panic_payload_to_string(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "non-string panic payload".to_string()
}

/// Opens the configured title store backend.
pub fn open_store(config: &StoreConfig) -> StoreResult<Arc<dyn TitleStore>> {
    match config.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryTitleStore::new())),
        StoreBackend::Sqlite => {
            let path = if config.path.is_empty() {
                DbManager::default_path().ok_or_else(|| {
                    StoreError::Io(std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        "no user data directory available",
                    ))
                })?
            } else {
                PathBuf::from(&config.path)
            };
            info!("Opening title store at {}", path.display());
            Ok(Arc::new(DbManager::open(&path)?))
        }
    }
}

/// Starts the batch coordinator thread and returns the shared dispatcher.
pub fn spawn_background_services(
    config: BackgroundServicesConfig,
) -> std::io::Result<BackgroundServices> {
    let BackgroundServicesConfig {
        bus_sender,
        store,
        source,
        debounce,
    } = config;

    let dispatcher = FetchDispatcher::new(source, Arc::clone(&store), bus_sender.clone());

    let coordinator_bus_receiver = bus_sender.subscribe();
    let coordinator_bus_sender = bus_sender.clone();
    let coordinator_dispatcher = dispatcher.clone();
    let coordinator_thread = thread::Builder::new()
        .name("batch-coordinator".to_string())
        .spawn(move || {
            let run_result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                let mut coordinator = BatchCoordinator::new(
                    coordinator_bus_receiver,
                    coordinator_bus_sender,
                    store,
                    coordinator_dispatcher,
                    debounce,
                );
                coordinator.run();
            }));
            if let Err(payload) = run_result {
                log::error!(
                    "BatchCoordinator thread terminated due to panic: {}",
                    panic_payload_to_string(payload.as_ref())
                );
            }
        })?;

    Ok(BackgroundServices {
        dispatcher,
        coordinator_thread,
    })
}

#[cfg(test)]
mod tests {
    use std::io::BufRead;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    use tokio::sync::broadcast;

    use super::{
        open_store, panic_payload_to_string, spawn_background_services, BackgroundServicesConfig,
    };
    use crate::backends::{MetadataSource, SubmitReceipt};
    use crate::config::{StoreBackend, StoreConfig};
    use crate::error::FetchError;
    use crate::lookup_waiter::{LookupOutcome, LookupWaiter};
    use crate::protocol::DeliveryMode;
    use crate::title_record::{JobId, TitleFragment, TitleId, TitleRecord};

    /// Bulk source that records every batch; the first `failures` submissions get HTTP 503.
    #[derive(Default)]
    struct CountingSource {
        batches: Mutex<Vec<Vec<TitleId>>>,
        failures: Mutex<usize>,
    }

    impl MetadataSource for CountingSource {
        fn submit_batch(
            &self,
            title_ids: &[TitleId],
            _country: &str,
        ) -> Result<SubmitReceipt, FetchError> {
            self.batches
                .lock()
                .expect("batches lock")
                .push(title_ids.to_vec());
            let mut failures = self.failures.lock().expect("failures lock");
            if *failures > 0 {
                *failures -= 1;
                return Err(FetchError::Status {
                    code: 503,
                    status_text: "Service Unavailable".to_string(),
                });
            }
            Ok(SubmitReceipt {
                job_id: JobId("job-shared".to_string()),
                mode: DeliveryMode::Bulk,
                bulk_titles: Some(TitleFragment {
                    entries: title_ids
                        .iter()
                        .map(|title_id| {
                            (
                                *title_id,
                                TitleRecord {
                                    google_users_rating: Some(88),
                                    ..TitleRecord::default()
                                },
                            )
                        })
                        .collect(),
                }),
            })
        }

        fn open_job_stream(&self, _job_id: &JobId) -> Result<Box<dyn BufRead + Send>, FetchError> {
            Err(FetchError::Transport("not scripted".to_string()))
        }

        fn fetch_catalog(&self, _country: Option<&str>) -> Result<TitleFragment, FetchError> {
            Ok(TitleFragment::default())
        }
    }

    #[test]
    fn test_concurrent_waiters_resolve_from_one_batch_entry() {
        let (bus_sender, _) = broadcast::channel(256);
        let store = open_store(&StoreConfig {
            backend: StoreBackend::Memory,
            path: String::new(),
        })
        .expect("memory store should open");
        let source = Arc::new(CountingSource::default());
        spawn_background_services(BackgroundServicesConfig {
            bus_sender: bus_sender.clone(),
            store: Arc::clone(&store),
            source: source.clone(),
            debounce: Duration::from_millis(300),
        })
        .expect("services should start");

        let waiter = LookupWaiter::new(
            store,
            bus_sender,
            Duration::from_secs(5),
            Duration::from_millis(20),
        );
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let waiter = waiter.clone();
                thread::spawn(move || waiter.await_title(TitleId(4242)))
            })
            .collect();

        for handle in handles {
            let outcome = handle.join().expect("waiter thread should finish");
            assert!(matches!(
                outcome,
                LookupOutcome::Found(record) if record.google_users_rating == Some(88)
            ));
        }
        assert_eq!(
            source.batches.lock().expect("batches lock").clone(),
            vec![vec![TitleId(4242)]]
        );
    }

    #[test]
    fn test_failed_batch_does_not_block_a_later_lookup() {
        let (bus_sender, _) = broadcast::channel(256);
        let store = open_store(&StoreConfig {
            backend: StoreBackend::Memory,
            path: String::new(),
        })
        .expect("memory store should open");
        let source = Arc::new(CountingSource {
            failures: Mutex::new(1),
            ..CountingSource::default()
        });
        spawn_background_services(BackgroundServicesConfig {
            bus_sender: bus_sender.clone(),
            store: Arc::clone(&store),
            source: source.clone(),
            debounce: Duration::from_millis(50),
        })
        .expect("services should start");
        let waiter = LookupWaiter::new(
            store,
            bus_sender,
            Duration::from_secs(5),
            Duration::from_millis(20),
        );

        assert_eq!(
            waiter.await_title_with(
                TitleId(31),
                Duration::from_millis(600),
                Duration::from_millis(20)
            ),
            LookupOutcome::NotFound
        );
        assert!(matches!(
            waiter.await_title(TitleId(31)),
            LookupOutcome::Found(record) if record.google_users_rating == Some(88)
        ));
        assert_eq!(
            source.batches.lock().expect("batches lock").clone(),
            vec![vec![TitleId(31)], vec![TitleId(31)]]
        );
    }

    #[test]
    fn test_panic_payload_to_string_handles_common_payloads() {
        let static_payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        let owned_payload: Box<dyn std::any::Any + Send> = Box::new("bang".to_string());
        let other_payload: Box<dyn std::any::Any + Send> = Box::new(7_u8);
        assert_eq!(panic_payload_to_string(static_payload.as_ref()), "boom");
        assert_eq!(panic_payload_to_string(owned_payload.as_ref()), "bang");
        assert_eq!(
            panic_payload_to_string(other_payload.as_ref()),
            "non-string panic payload"
        );
    }
}
