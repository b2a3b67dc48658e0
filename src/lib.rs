//! Distributed Blob Store Library
//!
//! This library crate defines the core modules of the system. It is the
//! foundation for the two binaries (`manager` and `storage_node`).
//!
//! ## Architecture Modules
//! The system is composed of four loosely coupled subsystems:
//!
//! - **`manager`**: The coordination layer clients talk to. It tracks the
//!   registered storage nodes, plans how an incoming file is split across
//!   them in proportion to their free space, runs the two-phase
//!   store-commit-rollback upload transaction with end-to-end SHA-256
//!   verification, and reassembles files on download.
//! - **`node`**: The storage layer. Each node keeps chunk bytes on its local
//!   filesystem with transactional handling (tmp file -> commit rename ->
//!   rollback delete, crash-safe via a startup sweep) and self-registers
//!   with the manager.
//! - **`metadata`**: The document-store gateway. Maps file names to content
//!   hashes and content hashes to chunk placements, behind a narrow trait
//!   with a MongoDB-backed and an in-memory implementation.
//! - **`protocol`**: The wire contract both sides speak: header names, the
//!   chunk URL format and its verb rewriting.

pub mod error;
pub mod manager;
pub mod metadata;
pub mod node;
pub mod protocol;
