//! Batched mutation, soft-delete and restore engine for Bulwark.
//!
//! - [`executor`]: windowed, cancellable execution with progress reporting
//! - [`trash`]: soft delete, restore, expiry sweep
//! - [`orchestrator`]: bulk delete/update/restore and CSV import/export

pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod trash;

pub use error::{EngineError, EngineResult};
pub use executor::{BatchOperation, BatchOperationState, BatchResult, ItemFailure};
pub use orchestrator::{ImportOutcome, MutationOrchestrator, StatusPatch};
pub use trash::{RestoreOutcome, TrashEntry, TrashManager};
