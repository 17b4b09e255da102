//! Queued image generation server
//!
//! Exposes one GPU-bound image editing pipeline to many HTTP clients. Jobs are
//! admitted into a bounded FIFO, executed one at a time by a single worker,
//! polled by id, and evicted together with their results after a TTL.

pub mod app_state;
pub mod config;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
