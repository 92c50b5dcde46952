//! The `delete_set` module tracks tombstoned clock ranges per client.
//!
//! # Examples
//!
//! ```
//! use ydoc::{DeleteSet, ID};
//! let mut ds = DeleteSet::new();
//! ds.insert(ID::new(1, 5), 3);
//! ds.insert(ID::new(1, 0), 6);
//! ds.squash();
//! assert!(ds.is_deleted(&ID::new(1, 7)));
//! assert!(!ds.is_deleted(&ID::new(1, 8)));
//! ```

use std::cmp;
use std::collections::BTreeMap;
use std::fmt;

use quickcheck::{Arbitrary, Gen};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::block_store::BlockStore;
use crate::encoding::{Decoder, Encoder, Write};
use crate::error::{Error, Result};
use crate::id::{ClientID, ID};
use crate::traits::{Decode, Encode};

/// `len` units of a client's log starting at `clock`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdRange {
    /// First clock in the range.
    pub clock: u32,
    /// Number of units, never zero.
    pub len: u32,
}

impl IdRange {
    /// Build a range.
    pub fn new(clock: u32, len: u32) -> Self {
        IdRange { clock, len }
    }

    /// One past the last clock.
    pub fn end(&self) -> u32 {
        self.clock + self.len
    }

    /// True if `clock` is in the range.
    pub fn contains(&self, clock: u32) -> bool {
        self.clock <= clock && clock < self.end()
    }
}

/// Tombstoned ranges, per client.
///
/// Ranges can be added in any order; [DeleteSet::squash] sorts and merges
/// them into the unique minimal cover. Lookups assume a squashed set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteSet {
    clients: BTreeMap<ClientID, Vec<IdRange>>,
}

impl DeleteSet {
    /// An empty set.
    pub fn new() -> Self {
        DeleteSet::default()
    }

    /// Add `len` units starting at `id`. The set is not re-squashed.
    pub fn insert(&mut self, id: ID, len: u32) {
        if len == 0 {
            return;
        }
        self.clients
            .entry(id.client)
            .or_insert_with(Vec::new)
            .push(IdRange::new(id.clock, len));
    }

    /// True if the unit named by `id` is tombstoned.
    pub fn is_deleted(&self, id: &ID) -> bool {
        match self.clients.get(&id.client) {
            Some(ranges) => find_range(ranges, id.clock).is_some(),
            None => false,
        }
    }

    /// Sort each client's ranges and coalesce overlapping or adjacent ones.
    /// Idempotent.
    pub fn squash(&mut self) {
        for ranges in self.clients.values_mut() {
            ranges.sort_by_key(|r| r.clock);
            let mut merged: Vec<IdRange> = Vec::with_capacity(ranges.len());
            for range in ranges.drain(..) {
                match merged.last_mut() {
                    Some(prev) if prev.end() >= range.clock => {
                        prev.len = cmp::max(prev.len, range.end() - prev.clock);
                    }
                    _ => merged.push(range),
                }
            }
            *ranges = merged;
        }
    }

    /// Add every range of `other` and squash.
    pub fn merge(&mut self, other: DeleteSet) {
        for (client, ranges) in other.clients {
            self.clients
                .entry(client)
                .or_insert_with(Vec::new)
                .extend(ranges);
        }
        self.squash();
    }

    /// Union of several delete sets.
    pub fn merge_all<I: IntoIterator<Item = DeleteSet>>(sets: I) -> DeleteSet {
        let mut result = DeleteSet::new();
        for set in sets {
            for (client, ranges) in set.clients {
                result
                    .clients
                    .entry(client)
                    .or_insert_with(Vec::new)
                    .extend(ranges);
            }
        }
        result.squash();
        result
    }

    /// True if nothing is tombstoned.
    pub fn is_empty(&self) -> bool {
        self.clients.values().all(Vec::is_empty)
    }

    /// Ranges of `client`.
    pub fn ranges(&self, client: &ClientID) -> Option<&[IdRange]> {
        self.clients.get(client).map(Vec::as_slice)
    }

    /// Iterate over (client, ranges) in ascending client order.
    pub fn iter(&self) -> impl Iterator<Item = (&ClientID, &Vec<IdRange>)> {
        self.clients.iter()
    }

    /// Total number of tombstoned units.
    pub fn deleted_len(&self) -> u64 {
        self.clients
            .values()
            .flat_map(|ranges| ranges.iter())
            .map(|r| r.len as u64)
            .sum()
    }
}

/// Binary search for the range containing `clock` in squashed `ranges`.
fn find_range(ranges: &[IdRange], clock: u32) -> Option<usize> {
    let mut left = 0;
    let mut right = ranges.len();
    while left < right {
        let mid = (left + right) / 2;
        let range = &ranges[mid];
        if range.clock <= clock {
            if clock < range.end() {
                return Some(mid);
            }
            left = mid + 1;
        } else {
            right = mid;
        }
    }
    None
}

impl<'a> From<&'a BlockStore> for DeleteSet {
    /// Collect every tombstoned run of the store.
    fn from(store: &'a BlockStore) -> Self {
        let mut ds = DeleteSet::new();
        for (client, blocks) in store.iter() {
            let mut ranges: Vec<IdRange> = Vec::new();
            let mut i = 0;
            while i < blocks.len() {
                let block = &blocks[i];
                if block.is_deleted() {
                    let clock = block.id().clock;
                    let mut len = block.len();
                    while i + 1 < blocks.len() && blocks[i + 1].is_deleted() {
                        i += 1;
                        len += blocks[i].len();
                    }
                    ranges.push(IdRange::new(clock, len));
                }
                i += 1;
            }
            if !ranges.is_empty() {
                ds.clients.insert(*client, ranges);
            }
        }
        ds
    }
}

impl Encode for DeleteSet {
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        let clients: Vec<_> = self
            .clients
            .iter()
            .filter(|(_, ranges)| !ranges.is_empty())
            .collect();
        encoder.rest().write_var(clients.len() as u64);
        for (client, ranges) in clients.into_iter().rev() {
            encoder.reset_ds_cur_val();
            encoder.rest().write_var(*client);
            encoder.rest().write_var(ranges.len() as u64);
            for range in ranges.iter() {
                encoder.write_ds_clock(range.clock);
                encoder.write_ds_len(range.len);
            }
        }
    }
}

impl Decode for DeleteSet {
    fn decode<D: Decoder>(decoder: &mut D) -> Result<Self> {
        let mut ds = DeleteSet::new();
        let num_clients = decoder.read_var()?;
        for _ in 0..num_clients {
            decoder.reset_ds_cur_val();
            let client = decoder.read_var()?;
            let num_ranges = decoder.read_var()?;
            let mut ranges = Vec::new();
            for _ in 0..num_ranges {
                let clock = decoder.read_ds_clock()?;
                let len = decoder.read_ds_len()?;
                if clock.checked_add(len).is_none() {
                    return Err(Error::VarIntOverflow);
                }
                ranges.push(IdRange::new(clock, len));
            }
            if !ranges.is_empty() {
                ds.clients
                    .entry(client)
                    .or_insert_with(Vec::new)
                    .extend(ranges);
            }
        }
        Ok(ds)
    }
}

impl fmt::Display for DeleteSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (client, ranges)) in self.clients.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: [", client)?;
            for (j, range) in ranges.iter().enumerate() {
                if j > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}..{}", range.clock, range.end())?;
            }
            write!(f, "]")?;
        }
        write!(f, "}}")
    }
}

impl Arbitrary for DeleteSet {
    fn arbitrary<G: Gen>(g: &mut G) -> Self {
        let mut ds = DeleteSet::new();
        for _ in 0..g.gen_range(0, 12) {
            let client = g.gen_range(0, 4);
            let clock = g.gen_range(0, 100);
            let len = g.gen_range(1, 10);
            ds.insert(ID::new(client, clock), len);
        }
        ds
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::block::{Block, BlockRange};
    use quickcheck::quickcheck;

    quickcheck! {
        fn prop_squash_is_idempotent(ds: DeleteSet) -> bool {
            let mut once = ds.clone();
            once.squash();
            let mut twice = once.clone();
            twice.squash();
            once == twice
        }

        fn prop_squash_is_minimal(ds: DeleteSet) -> bool {
            let mut ds = ds;
            ds.squash();
            let minimal = ds.iter().all(|(_, ranges)| {
                ranges.windows(2).all(|w| w[0].end() < w[1].clock)
            });
            minimal
        }

        fn prop_is_deleted_agrees_with_ranges(ds: DeleteSet, client: u8, clock: u8) -> bool {
            let id = ID::new(client as u64 % 4, clock as u32);
            let naive = ds
                .ranges(&id.client)
                .map(|ranges| ranges.iter().any(|r| r.contains(id.clock)))
                .unwrap_or(false);
            let mut squashed = ds;
            squashed.squash();
            squashed.is_deleted(&id) == naive
        }

        fn prop_v1_round_trip(ds: DeleteSet) -> bool {
            let mut ds = ds;
            ds.squash();
            DeleteSet::decode_v1(&ds.encode_v1()).ok() == Some(ds)
        }

        fn prop_v2_round_trip(ds: DeleteSet) -> bool {
            let mut ds = ds;
            ds.squash();
            DeleteSet::decode_v2(&ds.encode_v2()).ok() == Some(ds)
        }
    }

    #[test]
    fn test_squash_adjacent_and_overlapping() {
        let mut ds = DeleteSet::new();
        ds.insert(ID::new(1, 10), 2);
        ds.insert(ID::new(1, 0), 5);
        ds.insert(ID::new(1, 5), 2);
        ds.insert(ID::new(1, 1), 2);
        ds.insert(ID::new(1, 11), 4);
        ds.squash();
        assert_eq!(
            ds.ranges(&1).unwrap(),
            &[IdRange::new(0, 7), IdRange::new(10, 5)]
        );
        assert_eq!(ds.to_string(), "{1: [0..7, 10..15]}");
    }

    #[test]
    fn test_merge_all() {
        let mut a = DeleteSet::new();
        a.insert(ID::new(1, 0), 2);
        let mut b = DeleteSet::new();
        b.insert(ID::new(1, 2), 2);
        b.insert(ID::new(2, 0), 1);
        let merged = DeleteSet::merge_all(vec![a, b]);
        assert_eq!(merged.ranges(&1).unwrap(), &[IdRange::new(0, 4)]);
        assert!(merged.is_deleted(&ID::new(2, 0)));
        assert_eq!(merged.deleted_len(), 5);
    }

    #[test]
    fn test_from_block_store() {
        let mut store = BlockStore::new();
        store.push_block(Block::GC(BlockRange::new(ID::new(1, 0), 2)));
        store.push_block(Block::GC(BlockRange::new(ID::new(1, 2), 3)));
        let ds = DeleteSet::from(&store);
        assert_eq!(ds.ranges(&1).unwrap(), &[IdRange::new(0, 5)]);
    }

    #[test]
    fn test_empty_encoding() {
        assert_eq!(DeleteSet::new().encode_v1(), vec![0]);
    }

    #[test]
    fn test_decode_rejects_overflowing_range() {
        let buf = [1, 1, 1, 1, 0xff, 0xff, 0xff, 0xff, 0x0f];
        assert!(matches!(
            DeleteSet::decode_v1(&buf),
            Err(Error::VarIntOverflow)
        ));
        let ds = DeleteSet::decode_v1(&[1, 1, 1, 4, 2]).unwrap();
        assert_eq!(ds.ranges(&1).unwrap(), &[IdRange::new(4, 2)]);
    }
}
