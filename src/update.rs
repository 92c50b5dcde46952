//! Decoded updates: the structures and delete set a peer sent, before they
//! are integrated into a document.
//!
//! Updates can also be combined and queried without a document at all:
//!
//! ```
//! use ydoc::{Doc, ItemContent, Options, StateVector, TypeRef};
//! use ydoc::update::{merge_updates_v1, encode_state_vector_from_update_v1};
//!
//! let doc = Doc::with_options(Options::with_client_id(1));
//! doc.transact(None, |txn| {
//!     let text = txn.get_or_insert_root("text", TypeRef::Text);
//!     txn.insert(&text, 0, ItemContent::String("ab".into())).unwrap();
//! });
//! let first = doc.encode_state_as_update_v1(&StateVector::new());
//! let sv = doc.state_vector();
//! doc.transact(None, |txn| {
//!     let text = txn.get_or_insert_root("text", TypeRef::Text);
//!     txn.insert(&text, 2, ItemContent::String("c".into())).unwrap();
//! });
//! let second = doc.encode_state_as_update_v1(&sv);
//! let merged = merge_updates_v1(&[&first, &second]).unwrap();
//! let sv = encode_state_vector_from_update_v1(&merged).unwrap();
//! assert_eq!(sv, doc.encode_state_vector());
//! ```

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use crate::block::{BlockCarrier, BlockRange};
use crate::delete_set::DeleteSet;
use crate::encoding::{Decoder, DecoderV1, DecoderV2, Encoder, Write};
use crate::error::{Error, Result};
use crate::id::{ClientID, ID};
use crate::state_vector::StateVector;
use crate::traits::{Decode, Encode};

/// Structures grouped by client, in clock order, plus a delete set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    pub(crate) blocks: BTreeMap<ClientID, VecDeque<BlockCarrier>>,
    pub(crate) delete_set: DeleteSet,
}

/// Structures that could not be integrated yet, together with the lowest
/// clock still missing per client.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingUpdate {
    /// The buffered structures.
    pub update: Update,
    /// For every client a structure waits on, the first clock it needs.
    pub missing: StateVector,
}

impl Update {
    /// An update with neither structures nor deletions.
    pub fn new() -> Self {
        Update::default()
    }

    /// True if applying this update changes nothing.
    pub fn is_empty(&self) -> bool {
        self.blocks.values().all(VecDeque::is_empty) && self.delete_set.is_empty()
    }

    /// The deletions carried by this update.
    pub fn delete_set(&self) -> &DeleteSet {
        &self.delete_set
    }

    /// Structures of `client`, in clock order.
    pub fn blocks(&self, client: &ClientID) -> Option<&VecDeque<BlockCarrier>> {
        self.blocks.get(client)
    }

    /// Iterate over all structures, client by client.
    pub fn iter(&self) -> impl Iterator<Item = &BlockCarrier> {
        self.blocks.values().flat_map(|blocks| blocks.iter())
    }

    /// The state a document reaches by applying this update to an empty one:
    /// per client, the contiguous prefix starting at clock 0, up to the first
    /// gap.
    pub fn state_vector(&self) -> StateVector {
        let mut sv = StateVector::new();
        for (client, blocks) in self.blocks.iter() {
            let mut clock = 0;
            for block in blocks.iter() {
                if block.is_skip() || block.id().clock != clock {
                    break;
                }
                clock += block.len();
            }
            sv.set_max(*client, clock);
        }
        sv
    }

    /// The part of this update that is new to a peer at state `remote`.
    /// Deletions are always kept.
    pub fn diff(&self, remote: &StateVector) -> Update {
        let mut result = Update::new();
        for (client, blocks) in self.blocks.iter() {
            let clock = remote.get(client);
            let mut kept = VecDeque::new();
            for block in blocks.iter() {
                let start = block.id().clock;
                if start + block.len() <= clock {
                    continue;
                }
                let mut block = block.clone();
                if start < clock && !block.trim_start(clock - start) {
                    continue;
                }
                if kept.is_empty() && block.is_skip() {
                    continue;
                }
                kept.push_back(block);
            }
            if !kept.is_empty() {
                result.blocks.insert(*client, kept);
            }
        }
        result.delete_set = self.delete_set.clone();
        result
    }

    /// Combine several updates into one equivalent update, without a
    /// document. Overlapping structures are kept once and holes between them
    /// become skips.
    pub fn merge_updates(updates: Vec<Update>) -> Update {
        let mut per_client: BTreeMap<ClientID, Vec<BlockCarrier>> = BTreeMap::new();
        let mut delete_sets = Vec::with_capacity(updates.len());
        for update in updates {
            for (client, blocks) in update.blocks {
                per_client
                    .entry(client)
                    .or_insert_with(Vec::new)
                    .extend(blocks.into_iter().filter(|block| !block.is_skip()));
            }
            delete_sets.push(update.delete_set);
        }

        let mut result = Update::new();
        for (client, mut blocks) in per_client {
            // longest first among blocks starting at the same clock
            blocks.sort_by(|a, b| {
                a.id()
                    .clock
                    .cmp(&b.id().clock)
                    .then_with(|| b.len().cmp(&a.len()))
            });
            let mut merged: VecDeque<BlockCarrier> = VecDeque::new();
            let mut end: Option<u32> = None;
            for mut block in blocks {
                let clock = block.id().clock;
                if let Some(end) = end {
                    if clock + block.len() <= end {
                        continue;
                    }
                    if clock < end {
                        if !block.trim_start(end - clock) {
                            continue;
                        }
                    } else if clock > end {
                        merged.push_back(BlockCarrier::Skip(BlockRange::new(
                            ID::new(client, end),
                            clock - end,
                        )));
                    }
                }
                end = Some(block.id().clock + block.len());
                merged.push_back(block);
            }
            if !merged.is_empty() {
                result.blocks.insert(client, merged);
            }
        }
        result.delete_set = DeleteSet::merge_all(delete_sets);
        result
    }
}

impl From<DeleteSet> for Update {
    fn from(delete_set: DeleteSet) -> Self {
        Update {
            blocks: BTreeMap::new(),
            delete_set,
        }
    }
}

impl Encode for Update {
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        let clients: Vec<_> = self
            .blocks
            .iter()
            .filter(|(_, blocks)| !blocks.is_empty())
            .collect();
        encoder.rest().write_var(clients.len() as u64);
        for (client, blocks) in clients.into_iter().rev() {
            encoder.rest().write_var(blocks.len() as u64);
            encoder.write_client(*client);
            encoder.rest().write_var(blocks[0].id().clock as u64);
            for block in blocks.iter() {
                block.encode(encoder);
            }
        }
        self.delete_set.encode(encoder);
    }
}

impl Decode for Update {
    fn decode<D: Decoder>(decoder: &mut D) -> Result<Self> {
        let mut update = Update::new();
        let num_clients = decoder.read_var()?;
        for _ in 0..num_clients {
            let num_structs = decoder.read_var()?;
            let client = decoder.read_client()?;
            let mut clock = decoder.read_var_u32()?;
            let blocks = update.blocks.entry(client).or_insert_with(VecDeque::new);
            for _ in 0..num_structs {
                let block = BlockCarrier::decode(decoder, ID::new(client, clock))?;
                clock = clock
                    .checked_add(block.len())
                    .ok_or(Error::VarIntOverflow)?;
                blocks.push_back(block);
            }
        }
        for blocks in update.blocks.values_mut() {
            blocks
                .make_contiguous()
                .sort_by_key(|block| block.id().clock);
        }
        update.delete_set = DeleteSet::decode(decoder)?;
        Ok(update)
    }
}

impl fmt::Display for Update {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "update:")?;
        for (client, blocks) in self.blocks.iter() {
            write!(f, "  {}:", client)?;
            for block in blocks.iter() {
                match block {
                    BlockCarrier::Item(item) => write!(f, " {}", item)?,
                    BlockCarrier::GC(range) => write!(f, " gc({}, len: {})", range.id, range.len)?,
                    BlockCarrier::Skip(range) => {
                        write!(f, " skip({}, len: {})", range.id, range.len)?
                    }
                }
            }
            writeln!(f)?;
        }
        write!(f, "  deleted: {}", self.delete_set)
    }
}

/// Merge v1 encoded updates into a single v1 update.
pub fn merge_updates_v1(updates: &[&[u8]]) -> Result<Vec<u8>> {
    let decoded = updates
        .iter()
        .map(|buf| Update::decode_v1(buf))
        .collect::<Result<Vec<_>>>()?;
    Ok(Update::merge_updates(decoded).encode_v1())
}

/// Merge v2 encoded updates into a single v2 update.
pub fn merge_updates_v2(updates: &[&[u8]]) -> Result<Vec<u8>> {
    let decoded = updates
        .iter()
        .map(|buf| Update::decode_v2(buf))
        .collect::<Result<Vec<_>>>()?;
    Ok(Update::merge_updates(decoded).encode_v2())
}

/// The v1 encoded state vector a document reaches by applying a v1 update.
pub fn encode_state_vector_from_update_v1(update: &[u8]) -> Result<Vec<u8>> {
    Ok(Update::decode_v1(update)?.state_vector().encode_v1())
}

/// The v1 encoded state vector a document reaches by applying a v2 update.
pub fn encode_state_vector_from_update_v2(update: &[u8]) -> Result<Vec<u8>> {
    Ok(Update::decode_v2(update)?.state_vector().encode_v1())
}

/// Strip from a v1 update everything covered by a v1 encoded state vector.
pub fn diff_update_v1(update: &[u8], state_vector: &[u8]) -> Result<Vec<u8>> {
    let sv = StateVector::decode_v1(state_vector)?;
    Ok(Update::decode_v1(update)?.diff(&sv).encode_v1())
}

/// Strip from a v2 update everything covered by a v1 encoded state vector.
pub fn diff_update_v2(update: &[u8], state_vector: &[u8]) -> Result<Vec<u8>> {
    let sv = StateVector::decode_v1(state_vector)?;
    Ok(Update::decode_v2(update)?.diff(&sv).encode_v2())
}

/// Convert a v1 update into the v2 format.
pub fn convert_update_v1_to_v2(update: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = DecoderV1::new(update);
    Ok(Update::decode(&mut decoder)?.encode_v2())
}

/// Convert a v2 update into the v1 format.
pub fn convert_update_v2_to_v1(update: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = DecoderV2::new(update)?;
    Ok(Update::decode(&mut decoder)?.encode_v1())
}
