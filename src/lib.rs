//! Transaction command apply engine for a record-oriented graph store.
//!
//! A committed transaction arrives as a [`command::CommandBatch`] of
//! before/after record images. [`ApplyEngine`] dispatches every command to a
//! chain of appliers that persist the after-images, keep allocator
//! high-water marks ahead of replayed ids, invalidate and refresh caches, and
//! feed the label index and schema indexes through coalescing work
//! synchronizers.

#![forbid(unsafe_code)]

pub mod apply;
pub mod cache;
pub mod command;
pub mod engine;
pub mod id;
pub mod index;
pub mod lock;
pub mod metrics;
pub mod options;
pub mod record;
pub mod schema;
pub mod store;
pub mod sync;
pub mod types;

pub use apply::{apply_batch, apply_command, ApplyMode, BatchApplier};
pub use engine::{ApplyEngine, ApplyEngineBuilder, RecoveryStats};
pub use options::ApplyOptions;
pub use types::{ApplyError, Result};
