//! Integration of structures into the block store.
//!
//! Concurrent inserts at the same position are ordered by the YATA rules:
//! items are compared by their origins first and by client id last, so every
//! replica settles on the same sequence no matter the order it received the
//! items in.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use tracing::{debug, trace};

use crate::block::{Block, BlockCarrier, BlockRange, Item};
use crate::branch::TypePtr;
use crate::content::{ItemContent, TypeRef};
use crate::id::{ClientID, ID};
use crate::state_vector::StateVector;
use crate::transaction::TransactionMut;
use crate::update::{PendingUpdate, Update};

impl<'doc> TransactionMut<'doc> {
    /// Make sure a block starts at `id`, splitting the item containing it if
    /// needed. Returns the first unit of the block containing `id` afterwards,
    /// which differs from `id` only for GC ranges.
    pub(crate) fn split_clean_start(&mut self, id: &ID) -> Option<ID> {
        let list = self.store.blocks.get_mut(&id.client)?;
        let index = list.find_pivot(id.clock)?;
        let block = &list[index];
        let start = block.id().clock;
        if start < id.clock && !block.is_gc() {
            if let Some(right) = list.split_block(index, id.clock - start) {
                self.merge_blocks.push(right);
                return Some(right);
            }
        }
        Some(*list[index].id())
    }

    /// Make sure a block ends at `id`, splitting the item containing it if
    /// needed. Returns the last unit of the block containing `id` afterwards.
    pub(crate) fn split_clean_end(&mut self, id: &ID) -> Option<ID> {
        let list = self.store.blocks.get_mut(&id.client)?;
        let index = list.find_pivot(id.clock)?;
        let block = &list[index];
        let start = block.id().clock;
        let last = block.last_id();
        if id.clock < last.clock && !block.is_gc() {
            if let Some(right) = list.split_block(index, id.clock - start + 1) {
                self.merge_blocks.push(right);
                return Some(*id);
            }
        }
        Some(last)
    }

    fn is_gc(&self, id: &ID) -> bool {
        self.store.blocks.get_block(id).map_or(false, Block::is_gc)
    }

    /// The first client whose structures `block` depends on but the store
    /// doesn't have yet.
    pub(crate) fn missing(&self, block: &BlockCarrier) -> Option<ClientID> {
        let item = match block {
            BlockCarrier::Item(item) => item,
            _ => return None,
        };
        let own = item.id.client;
        let deps = item
            .origin
            .iter()
            .chain(item.right_origin.iter())
            .chain(match &item.parent {
                TypePtr::ID(parent) => Some(parent),
                _ => None,
            });
        for dep in deps {
            if dep.client != own && dep.clock >= self.store.blocks.get_state(&dep.client) {
                return Some(dep.client);
            }
        }
        None
    }

    fn integrate_gc(&mut self, range: BlockRange) {
        trace!(id = %range.id, len = range.len, "integrating gc range");
        self.store.blocks.push_block(Block::GC(range));
    }

    pub(crate) fn integrate_block(&mut self, block: BlockCarrier, offset: u32) {
        match block {
            BlockCarrier::Item(item) => self.integrate_item(*item, offset),
            BlockCarrier::GC(mut range) => {
                if offset > 0 {
                    range = range.split(offset);
                }
                self.integrate_gc(range);
            }
            BlockCarrier::Skip(_) => {}
        }
    }

    /// Place `item` into its parent, skipping its first `offset` units which
    /// the store already has.
    pub(crate) fn integrate_item(&mut self, mut item: Item, offset: u32) {
        if offset > 0 {
            item = match item.split(offset) {
                Some(right) => right,
                None => return,
            };
        }

        let left = match item.origin {
            Some(origin) => match self.split_clean_end(&origin) {
                Some(left) => Some(left),
                None => return self.integrate_gc(BlockRange::new(item.id, item.len)),
            },
            None => None,
        };
        let right = match item.right_origin {
            Some(right_origin) => match self.split_clean_start(&right_origin) {
                Some(right) => Some(right),
                None => return self.integrate_gc(BlockRange::new(item.id, item.len)),
            },
            None => None,
        };

        let neighbour_gc = left.map_or(false, |id| self.is_gc(&id))
            || right.map_or(false, |id| self.is_gc(&id));
        let (parent, parent_sub) = if neighbour_gc {
            (TypePtr::Unknown, None)
        } else {
            match &item.parent {
                TypePtr::Unknown => {
                    let neighbour = right
                        .and_then(|id| self.store.blocks.get_item(&id))
                        .or_else(|| left.and_then(|id| self.store.blocks.get_item(&id)));
                    match neighbour {
                        Some(n) => (n.parent.clone(), n.parent_sub.clone()),
                        None => (TypePtr::Unknown, None),
                    }
                }
                TypePtr::ID(parent) => match self.store.blocks.get_item(parent) {
                    Some(p) if matches!(p.content, ItemContent::Type(_)) => {
                        (item.parent.clone(), item.parent_sub.clone())
                    }
                    _ => (TypePtr::Unknown, None),
                },
                TypePtr::Named(name) => {
                    self.store.get_or_create_type(name, TypeRef::Undefined);
                    (item.parent.clone(), item.parent_sub.clone())
                }
            }
        };
        let (start, key_last) = match self.store.branch(&parent) {
            Some(branch) => (
                branch.start,
                parent_sub.as_ref().and_then(|key| branch.map.get(key).copied()),
            ),
            None => return self.integrate_gc(BlockRange::new(item.id, item.len)),
        };

        item.left = left;
        item.right = right;
        item.parent = parent.clone();
        item.parent_sub = parent_sub.clone();

        let scan = match (left, right) {
            (None, None) => true,
            (None, Some(r)) => self
                .store
                .blocks
                .get_item(&r)
                .map_or(false, |r| r.left.is_some()),
            (Some(l), r) => self
                .store
                .blocks
                .get_item(&l)
                .map_or(false, |l| l.right != r),
        };
        if scan {
            item.left = self.find_integration_point(&item, start, key_last);
        }

        // link into the sequence
        let id = item.id;
        let mut replaced = None;
        match item.left {
            Some(left) => {
                if let Some(l) = self.store.blocks.get_item_mut(&left) {
                    item.right = l.right;
                    l.right = Some(id);
                }
            }
            None => {
                item.right = match parent_sub.as_ref() {
                    Some(_) => key_last.and_then(|last| self.store.chain_head(&last)),
                    None => self
                        .store
                        .branch_mut(&parent)
                        .and_then(|branch| branch.start.replace(id)),
                };
            }
        }
        match item.right {
            Some(right) => {
                if let Some(r) = self.store.blocks.get_item_mut(&right) {
                    r.left = Some(item.last_id());
                }
            }
            None => {
                if let Some(key) = parent_sub.as_ref() {
                    if let Some(branch) = self.store.branch_mut(&parent) {
                        branch.map.insert(key.clone(), item.last_id());
                    }
                    replaced = item.left;
                }
            }
        }
        let content_len = item.content_len();
        if let Some(branch) = self.store.branch_mut(&parent) {
            if parent_sub.is_none() {
                branch.content_len += content_len;
            }
            branch.clear_marker();
        }

        match &mut item.content {
            ItemContent::Type(branch) => branch.item = Some(id),
            ItemContent::Deleted(len) => {
                self.delete_set.insert(id, *len);
                item.deleted = true;
            }
            ItemContent::Doc(doc) => {
                self.subdocs_added.insert(doc.guid.clone());
                if doc.should_load() {
                    self.subdocs_loaded.insert(doc.guid.clone());
                }
            }
            _ => {}
        }
        let has_right = item.right.is_some();
        trace!(item = %item, "integrating item");
        self.store.blocks.push_block(Block::Item(Box::new(item)));

        if let Some(previous) = replaced {
            self.delete_item(&previous);
        }
        self.add_changed_type(&parent, parent_sub.clone());
        let parent_deleted = match &parent {
            TypePtr::ID(parent) => self
                .store
                .blocks
                .get_item(parent)
                .map_or(false, |p| p.deleted),
            _ => false,
        };
        if parent_deleted || (parent_sub.is_some() && has_right) {
            self.delete_item(&id);
        }
    }

    /// Resolve a conflict with concurrently inserted items between the left
    /// and right neighbours of `item`. Returns the new left neighbour.
    fn find_integration_point(&self, item: &Item, start: Option<ID>, key_last: Option<ID>) -> Option<ID> {
        let mut left = item.left;
        let mut o = match left {
            Some(l) => self.store.blocks.get_item(&l).and_then(|l| l.right),
            None => match item.parent_sub {
                Some(_) => key_last.and_then(|last| self.store.chain_head(&last)),
                None => start,
            },
        };
        let mut conflicting: HashSet<ID> = HashSet::new();
        let mut before_origin: HashSet<ID> = HashSet::new();
        while let Some(o_id) = o {
            if Some(o_id) == item.right {
                break;
            }
            let other = match self.store.blocks.get_item(&o_id) {
                Some(other) => other,
                None => break,
            };
            before_origin.insert(o_id);
            conflicting.insert(o_id);
            if item.origin == other.origin {
                // same origin: the lower client id goes first
                if other.id.client < item.id.client {
                    left = Some(other.last_id());
                    conflicting.clear();
                } else if item.right_origin == other.right_origin {
                    break;
                }
            } else {
                let origin_start = other.origin.and_then(|origin| self.store.block_start(&origin));
                match origin_start {
                    Some(start) if before_origin.contains(&start) => {
                        if !conflicting.contains(&start) {
                            left = Some(other.last_id());
                            conflicting.clear();
                        }
                    }
                    _ => break,
                }
            }
            o = other.right;
        }
        left
    }

    /// Integrate decoded structures in causal order. Structures whose
    /// dependencies are neither in the store nor in `refs` are returned with
    /// the clocks they wait for.
    pub(crate) fn integrate_structs(
        &mut self,
        mut refs: BTreeMap<ClientID, VecDeque<BlockCarrier>>,
    ) -> Option<PendingUpdate> {
        let mut current = None;
        let mut head = next_block(&mut refs, &mut current)?;
        let mut stack: Vec<BlockCarrier> = Vec::new();
        let mut rest: BTreeMap<ClientID, Vec<BlockCarrier>> = BTreeMap::new();
        let mut missing = StateVector::new();
        let mut state: HashMap<ClientID, u32> = HashMap::new();

        loop {
            if !head.is_skip() {
                let client = head.id().client;
                let clock = head.id().clock;
                let blocks = &self.store.blocks;
                let local = *state
                    .entry(client)
                    .or_insert_with(|| blocks.get_state(&client));
                if clock > local {
                    missing.set_min(client, clock - 1);
                    stack.push(head);
                    move_to_rest(&mut stack, &mut refs, &mut rest);
                } else if let Some(dep) = self.missing(&head) {
                    stack.push(head);
                    match refs.get_mut(&dep).and_then(VecDeque::pop_front) {
                        Some(next) => {
                            head = next;
                            continue;
                        }
                        None => {
                            missing.set_min(dep, self.store.blocks.get_state(&dep));
                            move_to_rest(&mut stack, &mut refs, &mut rest);
                        }
                    }
                } else {
                    let offset = local - clock;
                    let len = head.len();
                    if offset < len {
                        self.integrate_block(head, offset);
                        state.insert(client, clock + len);
                    }
                }
            }
            head = match stack.pop() {
                Some(block) => block,
                None => match next_block(&mut refs, &mut current) {
                    Some(block) => block,
                    None => break,
                },
            };
        }

        if rest.is_empty() {
            return None;
        }
        debug!(missing = %missing, "buffering structures with missing dependencies");
        let mut update = Update::new();
        for (client, mut blocks) in rest {
            blocks.sort_by_key(|block| block.id().clock);
            update.blocks.insert(client, blocks.into_iter().collect());
        }
        Some(PendingUpdate { update, missing })
    }
}

/// Next structure to integrate: continue with the current client, else
/// start on the highest client id with structures left.
fn next_block(
    refs: &mut BTreeMap<ClientID, VecDeque<BlockCarrier>>,
    current: &mut Option<ClientID>,
) -> Option<BlockCarrier> {
    if let Some(client) = *current {
        if let Some(block) = refs.get_mut(&client).and_then(VecDeque::pop_front) {
            return Some(block);
        }
    }
    loop {
        let (client, queue) = refs.iter_mut().next_back()?;
        let client = *client;
        if let Some(block) = queue.pop_front() {
            *current = Some(client);
            return Some(block);
        }
        refs.remove(&client);
    }
}

/// Move the stack and everything still queued for the clients on it out of
/// the way.
fn move_to_rest(
    stack: &mut Vec<BlockCarrier>,
    refs: &mut BTreeMap<ClientID, VecDeque<BlockCarrier>>,
    rest: &mut BTreeMap<ClientID, Vec<BlockCarrier>>,
) {
    for block in stack.drain(..) {
        let client = block.id().client;
        let blocks = rest.entry(client).or_insert_with(Vec::new);
        blocks.push(block);
        if let Some(queue) = refs.remove(&client) {
            blocks.extend(queue);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::doc::Options;
    use crate::store::Store;

    fn remote_text(id: ID, origin: Option<ID>, right_origin: Option<ID>, s: &str) -> BlockCarrier {
        let parent = if origin.is_none() && right_origin.is_none() {
            TypePtr::Named("text".into())
        } else {
            TypePtr::Unknown
        };
        BlockCarrier::Item(Box::new(Item::new(
            id,
            origin,
            right_origin,
            parent,
            None,
            ItemContent::String(s.to_string()),
        )))
    }

    fn refs(blocks: Vec<BlockCarrier>) -> BTreeMap<ClientID, VecDeque<BlockCarrier>> {
        let mut refs = BTreeMap::new();
        for block in blocks {
            refs.entry(block.id().client)
                .or_insert_with(VecDeque::new)
                .push_back(block);
        }
        refs
    }

    fn text(txn: &TransactionMut) -> String {
        txn.get_string(&TypePtr::Named("text".into()))
    }

    #[test]
    fn test_concurrent_inserts_are_ordered_by_client() {
        for order in &[[1u64, 2], [2, 1]] {
            let mut store = Store::new(Options::with_client_id(9));
            let mut txn = TransactionMut::new(&mut store, None, false);
            for client in order.iter() {
                let s = if *client == 1 { "X" } else { "Y" };
                let pending = txn.integrate_structs(refs(vec![remote_text(
                    ID::new(*client, 0),
                    None,
                    None,
                    s,
                )]));
                assert!(pending.is_none());
            }
            assert_eq!(text(&txn), "XY");
        }
    }

    #[test]
    fn test_insert_between_split_item() {
        let mut store = Store::new(Options::with_client_id(9));
        let mut txn = TransactionMut::new(&mut store, None, false);
        txn.integrate_structs(refs(vec![
            remote_text(ID::new(1, 0), None, None, "abcd"),
            remote_text(ID::new(2, 0), Some(ID::new(1, 1)), Some(ID::new(1, 2)), "-"),
        ]));
        assert_eq!(text(&txn), "ab-cd");
        assert_eq!(txn.len(&TypePtr::Named("text".into())), 5);
    }

    #[test]
    fn test_missing_dependency_is_buffered() {
        let mut store = Store::new(Options::with_client_id(9));
        let mut txn = TransactionMut::new(&mut store, None, false);
        let pending = txn
            .integrate_structs(refs(vec![remote_text(
                ID::new(2, 0),
                Some(ID::new(1, 3)),
                None,
                "z",
            )]))
            .unwrap();
        assert_eq!(pending.missing.get(&1), 0);
        assert!(pending.update.blocks(&2).is_some());
        assert_eq!(text(&txn), "");
    }

    #[test]
    fn test_gap_in_own_clock_is_buffered() {
        let mut store = Store::new(Options::with_client_id(9));
        let mut txn = TransactionMut::new(&mut store, None, false);
        let pending = txn
            .integrate_structs(refs(vec![remote_text(
                ID::new(1, 4),
                Some(ID::new(1, 3)),
                None,
                "z",
            )]))
            .unwrap();
        assert_eq!(pending.missing.get(&1), 3);
    }

    #[test]
    fn test_duplicates_are_dropped() {
        let mut store = Store::new(Options::with_client_id(9));
        let mut txn = TransactionMut::new(&mut store, None, false);
        let block = remote_text(ID::new(1, 0), None, None, "ab");
        txn.integrate_structs(refs(vec![block.clone()]));
        txn.integrate_structs(refs(vec![block]));
        assert_eq!(text(&txn), "ab");
    }

    #[test]
    fn test_item_next_to_gc_becomes_gc() {
        let mut store = Store::new(Options::with_client_id(9));
        let mut txn = TransactionMut::new(&mut store, None, false);
        txn.integrate_structs(refs(vec![
            BlockCarrier::GC(BlockRange::new(ID::new(1, 0), 2)),
            remote_text(ID::new(2, 0), Some(ID::new(1, 1)), None, "x"),
        ]));
        assert!(txn.store().blocks().get_block(&ID::new(2, 0)).unwrap().is_gc());
    }
}
