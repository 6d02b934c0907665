//! Background synchronization of local mutations with the remote.
//!
//! - [`queue_item`]: queued mutations and the draft builder
//! - [`network`]: network condition and the limits derived from it
//! - [`batch`]: batch packing and admission
//! - [`events`]: lifecycle event bus
//! - [`remote`]: the remote-apply seam and `SyncError`
//! - [`scheduler`]: cancellable adaptive timer
//! - [`engine`]: the [`SyncEngine`] tying it together

pub mod queue_item;
pub mod network;
pub mod batch;
pub mod events;
pub mod remote;
pub mod scheduler;
pub mod engine;

pub use engine::{BatchResult, ConflictAction, ItemOutcome, SyncEngine, SyncRun, SyncStats};
pub use events::{EventBus, Subscription, SyncEvent, SyncEventKind};
pub use network::NetworkCondition;
pub use remote::{RemoteApplier, RemoteFn, RemoteRequest, SyncError};
