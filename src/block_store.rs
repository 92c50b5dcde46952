use std::collections::HashMap;
use std::ops::{Index, IndexMut};

use crate::block::{Block, Item};
use crate::id::{ClientID, ID};
use crate::state_vector::StateVector;

/// The clock-contiguous log of a single client, starting at clock 0.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientBlockList {
    list: Vec<Block>,
}

impl ClientBlockList {
    /// An empty log.
    pub fn new() -> Self {
        ClientBlockList { list: Vec::new() }
    }

    /// The next clock this log expects.
    pub fn get_state(&self) -> u32 {
        match self.list.last() {
            Some(block) => block.id().clock + block.len(),
            None => 0,
        }
    }

    /// Index of the block containing `clock`.
    ///
    /// Clocks are roughly evenly spread over the log, so the first probe is
    /// the proportional position of `clock` rather than the middle.
    pub fn find_pivot(&self, clock: u32) -> Option<usize> {
        let mut right = self.list.len().checked_sub(1)?;
        let last = &self.list[right];
        let last_clock = last.id().clock;
        if last_clock == clock {
            return Some(right);
        }
        let end = last_clock + last.len();
        if clock >= end {
            return None;
        }
        let mut left = 0usize;
        let mut mid = ((clock as u64 * right as u64) / (end as u64 - 1).max(1)) as usize;
        loop {
            let block = &self.list[mid];
            let start = block.id().clock;
            if start <= clock {
                if clock < start + block.len() {
                    return Some(mid);
                }
                left = mid + 1;
            } else {
                right = mid.checked_sub(1)?;
            }
            if left > right {
                return None;
            }
            mid = (left + right) / 2;
        }
    }

    /// The block containing `clock`.
    pub fn find(&self, clock: u32) -> Option<&Block> {
        let idx = self.find_pivot(clock)?;
        Some(&self.list[idx])
    }

    /// Append a block continuing this log.
    ///
    /// # Panics
    ///
    /// If `block` does not start at the current state, which would break
    /// the contiguity of the log.
    pub(crate) fn push(&mut self, block: Block) {
        assert_eq!(
            block.id().clock,
            self.get_state(),
            "blocks of a client must be appended contiguously"
        );
        self.list.push(block);
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut Block> {
        self.list.get_mut(index)
    }

    /// Block at `index`.
    pub fn get(&self, index: usize) -> Option<&Block> {
        self.list.get(index)
    }

    /// Number of blocks.
    pub fn len(&self) -> usize {
        self.list.len()
    }

    /// True if the client has no blocks.
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Iterate over the blocks in clock order.
    pub fn iter(&self) -> std::slice::Iter<'_, Block> {
        self.list.iter()
    }

    /// Split the item at `index` after `offset` units, inserting the right
    /// part behind it. Returns the id of the right part.
    pub(crate) fn split_block(&mut self, index: usize, offset: u32) -> Option<ID> {
        let right = self.list.get_mut(index)?.as_item_mut()?.split(offset)?;
        let id = right.id;
        self.list.insert(index + 1, Block::Item(Box::new(right)));
        Some(id)
    }

    /// Try to merge the block at `index` into its left neighbour.
    pub(crate) fn squash_left(&mut self, index: usize) -> bool {
        if index == 0 || index >= self.list.len() {
            return false;
        }
        let (head, tail) = self.list.split_at_mut(index);
        let left = &mut head[index - 1];
        if left.is_deleted() == tail[0].is_deleted() && left.try_merge(&tail[0]) {
            self.list.remove(index);
            true
        } else {
            false
        }
    }

    /// Merge blocks leftwards starting at `index`, as far as possible.
    /// Returns how many blocks were removed.
    pub(crate) fn squash_lefts(&mut self, index: usize) -> usize {
        let mut merged = 0;
        let mut i = index;
        while i > 0 && self.squash_left(i) {
            merged += 1;
            i -= 1;
        }
        merged
    }
}

impl Index<usize> for ClientBlockList {
    type Output = Block;

    fn index(&self, index: usize) -> &Block {
        &self.list[index]
    }
}

impl IndexMut<usize> for ClientBlockList {
    fn index_mut(&mut self, index: usize) -> &mut Block {
        &mut self.list[index]
    }
}

/// Every client's log.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockStore {
    clients: HashMap<ClientID, ClientBlockList>,
}

impl BlockStore {
    /// An empty store.
    pub fn new() -> Self {
        BlockStore::default()
    }

    /// The next expected clock of `client`, 0 if unknown.
    pub fn get_state(&self, client: &ClientID) -> u32 {
        self.clients
            .get(client)
            .map(ClientBlockList::get_state)
            .unwrap_or(0)
    }

    /// The next expected clock of every known client.
    pub fn get_state_vector(&self) -> StateVector {
        self.clients
            .iter()
            .map(|(client, list)| (*client, list.get_state()))
            .collect()
    }

    /// The log of `client`.
    pub fn get(&self, client: &ClientID) -> Option<&ClientBlockList> {
        self.clients.get(client)
    }

    pub(crate) fn get_mut(&mut self, client: &ClientID) -> Option<&mut ClientBlockList> {
        self.clients.get_mut(client)
    }

    /// True if no client has any block.
    pub fn is_empty(&self) -> bool {
        self.clients.values().all(ClientBlockList::is_empty)
    }

    /// Iterate over the logs of all clients, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&ClientID, &ClientBlockList)> {
        self.clients.iter()
    }

    /// Append `block` to the log of its client.
    pub(crate) fn push_block(&mut self, block: Block) {
        let client = block.id().client;
        self.clients
            .entry(client)
            .or_insert_with(ClientBlockList::new)
            .push(block);
    }

    /// The block containing `id`.
    pub fn get_block(&self, id: &ID) -> Option<&Block> {
        self.clients.get(&id.client)?.find(id.clock)
    }

    pub(crate) fn get_block_mut(&mut self, id: &ID) -> Option<&mut Block> {
        let list = self.clients.get_mut(&id.client)?;
        let idx = list.find_pivot(id.clock)?;
        list.get_mut(idx)
    }

    /// The item containing `id`, unless that unit was collected into a GC range.
    pub fn get_item(&self, id: &ID) -> Option<&Item> {
        self.get_block(id)?.as_item()
    }

    pub(crate) fn get_item_mut(&mut self, id: &ID) -> Option<&mut Item> {
        self.get_block_mut(id)?.as_item_mut()
    }
}
