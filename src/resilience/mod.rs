//! Retry and backoff for store startup and queued mutations.

pub mod retry;
