//! Batched title-metadata retrieval for a streaming-catalog ratings overlay.
//!
//! Lookups that miss the local title store are coalesced into debounced
//! batches, submitted to the ratings metadata service, and written back to the
//! store as results arrive in bulk or over a per-job event stream.

pub mod app_bootstrap;
pub mod backends;
pub mod batch_coordinator;
pub mod coalescer;
pub mod config;
pub mod config_persistence;
pub mod db_manager;
pub mod error;
pub mod event_stream;
pub mod fetch_dispatcher;
pub mod lookup_waiter;
pub mod protocol;
pub mod title_record;
pub mod title_store;
