//! §4.4 State store & lock coordinator, and the §3 data model it persists.

pub mod store;
pub mod types;

pub use store::{StateStore, StateStoreError};
pub use types::{DiffStats, Instance, OutputSnapshot, PersistedStore, Status, UiState, WorktreeHandle};
