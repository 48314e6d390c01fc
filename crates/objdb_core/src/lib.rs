//! # objdb Core
//!
//! Transactional object store engine for objdb.
//!
//! This crate provides:
//! - A byte arena and an ordered-map overlay for staging changes
//! - A transactional store that merges staged changes with a base snapshot
//! - The key and value encoding of objects, fields and associations
//! - The model of types and fields
//! - A change history written with every commit
//! - A secondary search index maintained with every commit
//! - Sessions and the database facade tying it together

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod arena;
pub mod codec;
mod config;
mod database;
mod error;
pub mod history;
pub mod model;
pub mod overlay;
pub mod search;
mod session;
pub mod txn;

pub use codec::{DataType, FieldId, ObjId, TypeId, Value};
pub use config::Config;
pub use database::{Database, Tables, OBJECTS_TABLE};
pub use error::{CoreError, CoreResult};
pub use history::{Commit, CommitId, Event, History, ObjectChanges};
pub use model::{AssociationDef, FieldDef, Model, TypeDef};
pub use search::{Criterion, SearchIndex};
pub use session::{Session, SessionMode};
