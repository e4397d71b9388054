//! Storage backends for PromptForge.
//!
//! Defines the [`Store`] abstraction plus an in-process backend and a
//! JSON-file backend. Backends are pluggable; the engine only relies on
//! the trait contract (append-only logs, insert-if-absent assignments).

#![warn(missing_docs)]

mod lock;
mod memory;
mod trait_;

#[cfg(feature = "json")]
mod json_store;

pub use lock::KeyedLocks;
pub use memory::MemoryStore;
pub use trait_::Store;

#[cfg(feature = "json")]
pub use json_store::JsonStore;
