//! # objdb Storage
//!
//! Base-store interface and reference engine for objdb.
//!
//! This crate provides the lowest-level storage abstraction: an ordered,
//! transactional key-value store with named tables. The object layer in
//! `objdb_core` never talks to anything else.
//!
//! ## Design Principles
//!
//! - Keys and values are opaque bytes; tables only know their comparator
//! - Readers pin a consistent snapshot for their whole lifetime
//! - Exactly one write transaction at a time, serialized by the store
//! - A write transaction is invisible to everyone until `commit`
//!
//! ## Available Engines
//!
//! - [`InMemoryStore`] - Copy-on-write snapshots over ordered maps
//!
//! ## Example
//!
//! ```rust
//! use objdb_storage::{compare_lexicographic, InMemoryStore, KvStore};
//!
//! let store = InMemoryStore::new();
//! let table = store.open_table("main", compare_lexicographic).unwrap();
//!
//! let mut wtx = store.begin_write().unwrap();
//! wtx.put(table, b"hello", b"world").unwrap();
//! wtx.commit().unwrap();
//!
//! let rtx = store.begin_read().unwrap();
//! assert_eq!(rtx.get(table, b"hello").unwrap().as_deref(), Some(&b"world"[..]));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod compare;
mod error;
mod memory;

pub use backend::{KvCursor, KvStore, ReadTxn, TableId, WriteTxn};
pub use compare::{compare_ignoring_last_byte, compare_lexicographic, KeyCompare};
pub use error::{StorageError, StorageResult};
pub use memory::{InMemoryStore, StoreConfig};
