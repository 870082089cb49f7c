//! Online, queue-driven garbage collector for a container image registry.
//!
//! Two agents drive two workers against `PostgreSQL`-backed review queues: a
//! blob worker (storage delete, then DB delete) and a manifest worker (DB
//! delete only, cascading to its queue row). See `agent` and `worker` for the
//! control loop and per-task protocols.

pub mod agent;
pub mod backoff;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod error_tracker;
pub mod observability;
pub mod storage;
pub mod worker;
