//! A workspace-scoped code indexer: walks a project's files, chunks them,
//! embeds the chunks, and upserts them into a namespaced vector store so the
//! workspace becomes searchable — incrementally kept in sync afterward by a
//! debounced file watcher.
//!
//! [`engine::IndexingEngine`] is the entry point: construct one with a
//! config and the three external collaborators ([`embedding::EmbeddingProvider`],
//! [`vectorstore::VectorStoreClient`], [`checkpoint::KvStore`]), then drive it
//! through [`engine::IndexingEngine::build_full_index`],
//! [`watcher::spawn`], and [`autotrigger::AutoTrigger`].

pub mod autotrigger;
pub mod checkpoint;
pub mod chunker;
pub mod config;
pub mod dirs;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod identity;
pub mod vectorstore;
pub mod walker;
pub mod watcher;

#[cfg(test)]
pub mod testing;

pub use engine::{IndexingEngine, WorkspaceRef};
pub use error::EngineError;
