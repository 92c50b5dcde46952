//! A pure-Rust engine for collaboratively edited documents.
//!
//! Every replica of a document keeps an append-only log of operations per
//! client. Concurrent inserts are placed with the YATA rules so all replicas
//! converge on the same order, deletions are tracked as tombstone ranges,
//! and replicas exchange their history through a compact binary update
//! format (v1 and the column-oriented v2).
//!
//! Changes arriving before the changes they depend on are buffered and
//! applied as soon as their dependencies show up, so updates may be
//! delivered in any order, more than once, or partially.
#![crate_type = "lib"]
#![deny(missing_docs)]

mod error;
pub use crate::error::{Error, Result};

mod traits;
pub use crate::traits::{Decode, Encode};

/// This module contains the wire primitives and the v1 / v2 encoders.
pub mod encoding;

/// This module contains the dynamically typed values stored in documents.
pub mod any;

/// This module contains operation identifiers.
pub mod id;

pub mod state_vector;

pub mod delete_set;

/// This module contains the payloads carried by items.
pub mod content;

/// This module contains the storage of shared types.
pub mod branch;

pub mod block;

/// This module contains the per-client structure logs.
pub mod block_store;

/// This module contains the document store.
pub mod store;

pub mod transaction;

mod integrate;

pub mod update;

pub mod doc;

pub mod sync;

// Top-level re-exports for the document model.
pub use crate::{
    any::Any,
    block::{Block, BlockCarrier, BlockRange, Item},
    block_store::{BlockStore, ClientBlockList},
    branch::{Branch, TypePtr},
    content::{ItemContent, Out, SubDoc, TypeRef},
    delete_set::{DeleteSet, IdRange},
    doc::{Doc, Options, SubscriptionId, UpdateEvent},
    id::{ClientID, ID},
    state_vector::StateVector,
    store::{GcFilter, Store},
    transaction::{ChangedTypes, TransactionEvent, TransactionMut},
    update::{PendingUpdate, Update},
};
