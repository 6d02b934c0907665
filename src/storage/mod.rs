//! Local storage: backends and the typed persistent store over them.

pub mod traits;
pub mod memory;
pub mod sqlite;
pub mod persistent;

pub use persistent::PersistentStore;
