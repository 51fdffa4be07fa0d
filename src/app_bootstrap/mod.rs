//! Startup wiring for the binary: store selection, catalog seeding, and background threads.

pub mod catalog;
pub mod services;
