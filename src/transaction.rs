//! A transaction groups changes to a document. Everything done through one
//! [TransactionMut] is committed at once: tombstones are collected, blocks
//! are merged back together and observers receive a single event.

use std::cmp;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::block::Item;
use crate::branch::{Branch, Marker, TypePtr};
use crate::content::{ItemContent, Out, TypeRef};
use crate::delete_set::DeleteSet;
use crate::error::{Error, Result};
use crate::id::ID;
use crate::state_vector::StateVector;
use crate::store::Store;
use crate::traits::Encode;
use crate::update::Update;

/// Types touched by a transaction, with the map keys changed in each. A
/// `None` key stands for the sequence part.
pub type ChangedTypes = HashMap<TypePtr, HashSet<Option<Arc<str>>>>;

/// Summary of a committed transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionEvent {
    /// Tag passed when the transaction was opened.
    pub origin: Option<Arc<str>>,
    /// False if the transaction applied a remote update.
    pub local: bool,
    /// Document state when the transaction started.
    pub before_state: StateVector,
    /// Document state after commit.
    pub after_state: StateVector,
    /// Everything deleted by the transaction.
    pub delete_set: DeleteSet,
    /// Types that existed before the transaction and were modified.
    pub changed: ChangedTypes,
    /// Guids of sub-documents added.
    pub subdocs_added: HashSet<String>,
    /// Guids of sub-documents removed.
    pub subdocs_removed: HashSet<String>,
    /// Guids of sub-documents that asked to be loaded.
    pub subdocs_loaded: HashSet<String>,
    /// The changes as a v1 update, when requested and not empty.
    pub update_v1: Option<Vec<u8>>,
    /// The changes as a v2 update, when requested and not empty.
    pub update_v2: Option<Vec<u8>>,
}

impl TransactionEvent {
    /// True if the transaction neither inserted nor deleted anything.
    pub fn is_empty(&self) -> bool {
        self.before_state == self.after_state && self.delete_set.is_empty()
    }
}

/// An open transaction holding exclusive access to a document's store.
pub struct TransactionMut<'doc> {
    pub(crate) store: &'doc mut Store,
    pub(crate) origin: Option<Arc<str>>,
    pub(crate) local: bool,
    pub(crate) before_state: StateVector,
    pub(crate) delete_set: DeleteSet,
    pub(crate) merge_blocks: Vec<ID>,
    pub(crate) changed: ChangedTypes,
    pub(crate) subdocs_added: HashSet<String>,
    pub(crate) subdocs_removed: HashSet<String>,
    pub(crate) subdocs_loaded: HashSet<String>,
}

impl<'doc> TransactionMut<'doc> {
    pub(crate) fn new(store: &'doc mut Store, origin: Option<Arc<str>>, local: bool) -> Self {
        let before_state = store.blocks.get_state_vector();
        TransactionMut {
            store,
            origin,
            local,
            before_state,
            delete_set: DeleteSet::new(),
            merge_blocks: Vec::new(),
            changed: HashMap::new(),
            subdocs_added: HashSet::new(),
            subdocs_removed: HashSet::new(),
            subdocs_loaded: HashSet::new(),
        }
    }

    /// The store this transaction works on.
    pub fn store(&self) -> &Store {
        self.store
    }

    /// Tag passed when the transaction was opened.
    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    /// Document state when the transaction started.
    pub fn before_state(&self) -> &StateVector {
        &self.before_state
    }

    /// Everything deleted so far.
    pub fn delete_set(&self) -> &DeleteSet {
        &self.delete_set
    }

    /// Types modified so far.
    pub fn changed(&self) -> &ChangedTypes {
        &self.changed
    }

    /// Get the root type `name`, creating it with the given kind if needed.
    pub fn get_or_insert_root(&mut self, name: &str, type_ref: TypeRef) -> TypePtr {
        self.store.get_or_create_type(name, type_ref).ptr()
    }

    /// The item containing `id`.
    pub fn item(&self, id: &ID) -> Option<&Item> {
        self.store.blocks.get_item(id)
    }

    /// The storage of a type.
    pub fn branch(&self, parent: &TypePtr) -> Option<&Branch> {
        self.store.branch(parent)
    }

    fn existing_branch(&self, parent: &TypePtr) -> Result<&Branch> {
        self.store
            .branch(parent)
            .ok_or_else(|| Error::TypeMismatch(format!("{} is not a shared type", parent)))
    }

    fn next_id(&self) -> ID {
        let client = self.store.client_id();
        ID::new(client, self.store.blocks.get_state(&client))
    }

    /// Insert `content` at visible position `index` of the sequence of
    /// `parent`. Returns the id of the new item.
    pub fn insert(&mut self, parent: &TypePtr, index: u32, content: ItemContent) -> Result<ID> {
        let len = self.existing_branch(parent)?.len();
        if index > len {
            return Err(Error::OutOfBounds { index, len });
        }
        if content.len() == 0 {
            return Err(Error::InvariantViolation("empty content".to_string()));
        }
        let left = self.find_left(parent, index)?;
        let right = match left {
            Some(left) => self.store.blocks.get_item(&left).and_then(|item| item.right),
            None => self.existing_branch(parent)?.start,
        };
        let id = self.next_id();
        let item = Item::new(id, left, right, parent.clone(), None, content);
        self.integrate_item(item, 0);
        Ok(id)
    }

    /// Last unit of the item the `index`-th visible unit follows, splitting
    /// an item if the position falls inside it.
    fn find_left(&mut self, parent: &TypePtr, index: u32) -> Result<Option<ID>> {
        if index == 0 {
            return Ok(None);
        }
        let branch = self.existing_branch(parent)?;
        let (mut remaining, mut next) = match branch.marker {
            Some(marker)
                if marker.index < index
                    && self.store.block_start(&marker.id) == Some(marker.id) =>
            {
                (index - marker.index, Some(marker.id))
            }
            _ => (index, branch.start),
        };
        loop {
            let id = next.ok_or(Error::OutOfBounds { index, len: index - remaining })?;
            let item = self
                .store
                .blocks
                .get_item(&id)
                .ok_or_else(|| Error::InvariantViolation(format!("{} is not an item", id)))?;
            if !item.deleted && item.is_countable() {
                if remaining <= item.len {
                    let split = remaining < item.len;
                    if split {
                        self.split_clean_start(&id.advance(remaining));
                    }
                    if let Some(branch) = self.store.branch_mut(parent) {
                        branch.marker = Some(Marker {
                            index: index - remaining,
                            id,
                        });
                    }
                    return Ok(Some(id.advance(remaining - 1)));
                }
                remaining -= item.len;
            }
            next = item.right;
        }
    }

    /// Set `key` of the map part of `parent` to `content`, replacing the
    /// previous value.
    pub fn insert_at_key(&mut self, parent: &TypePtr, key: &str, content: ItemContent) -> Result<ID> {
        if content.len() == 0 {
            return Err(Error::InvariantViolation("empty content".to_string()));
        }
        let left = self.existing_branch(parent)?.map.get(key).copied();
        let id = self.next_id();
        let item = Item::new(id, left, None, parent.clone(), Some(Arc::from(key)), content);
        self.integrate_item(item, 0);
        Ok(id)
    }

    /// Delete `len` visible units of the sequence of `parent` starting at
    /// `index`.
    pub fn remove_range(&mut self, parent: &TypePtr, index: u32, len: u32) -> Result<()> {
        let content_len = self.existing_branch(parent)?.len();
        if index.checked_add(len).map_or(true, |end| end > content_len) {
            return Err(Error::OutOfBounds {
                index: index.saturating_add(len),
                len: content_len,
            });
        }
        let mut next = self.existing_branch(parent)?.start;
        let mut index = index;
        while index > 0 {
            let id = match next {
                Some(id) => id,
                None => break,
            };
            let (visible, item_len) = match self.store.blocks.get_item(&id) {
                Some(item) => (!item.deleted && item.is_countable(), item.len),
                None => break,
            };
            if visible {
                if index < item_len {
                    self.split_clean_start(&id.advance(index));
                    index = 0;
                } else {
                    index -= item_len;
                }
            }
            next = self.store.blocks.get_item(&id).and_then(|item| item.right);
        }
        let mut remaining = len;
        while remaining > 0 {
            let id = match next {
                Some(id) => id,
                None => break,
            };
            let (visible, item_len) = match self.store.blocks.get_item(&id) {
                Some(item) => (!item.deleted && item.is_countable(), item.len),
                None => break,
            };
            if visible {
                if remaining < item_len {
                    self.split_clean_start(&id.advance(remaining));
                }
                let deleted = cmp::min(remaining, item_len);
                self.delete_item(&id);
                remaining -= deleted;
            }
            next = self.store.blocks.get_item(&id).and_then(|item| item.right);
        }
        Ok(())
    }

    /// Delete the value stored under `key` in the map part of `parent`.
    /// Returns false if there was none.
    pub fn remove_key(&mut self, parent: &TypePtr, key: &str) -> bool {
        let id = match self.store.branch(parent).and_then(|b| b.map.get(key)) {
            Some(id) => *id,
            None => return false,
        };
        self.delete_item(&id)
    }

    /// The value stored under `key` in the map part of `parent`.
    pub fn get(&self, parent: &TypePtr, key: &str) -> Option<Out> {
        let id = self.store.branch(parent)?.map.get(key)?;
        let item = self.store.blocks.get_item(id)?;
        if item.deleted {
            None
        } else {
            item.content.values().pop()
        }
    }

    /// The live keys of the map part of `parent`.
    pub fn keys(&self, parent: &TypePtr) -> Vec<Arc<str>> {
        let branch = match self.store.branch(parent) {
            Some(branch) => branch,
            None => return Vec::new(),
        };
        let mut keys: Vec<_> = branch
            .map
            .iter()
            .filter(|(_, id)| {
                self.store
                    .blocks
                    .get_item(id)
                    .map_or(false, |item| !item.deleted)
            })
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Visible values of the sequence part of `parent`, in order.
    pub fn values(&self, parent: &TypePtr) -> Vec<Out> {
        let mut values = Vec::new();
        let mut next = self.store.branch(parent).and_then(|b| b.start);
        while let Some(id) = next {
            let item = match self.store.blocks.get_item(&id) {
                Some(item) => item,
                None => break,
            };
            if !item.deleted && item.is_countable() {
                values.extend(item.content.values());
            }
            next = item.right;
        }
        values
    }

    /// Concatenated visible string content of `parent`.
    pub fn get_string(&self, parent: &TypePtr) -> String {
        let mut s = String::new();
        let mut next = self.store.branch(parent).and_then(|b| b.start);
        while let Some(id) = next {
            let item = match self.store.blocks.get_item(&id) {
                Some(item) => item,
                None => break,
            };
            if !item.deleted {
                if let ItemContent::String(chunk) = &item.content {
                    s.push_str(chunk);
                }
            }
            next = item.right;
        }
        s
    }

    /// Visible length of the sequence part of `parent`.
    pub fn len(&self, parent: &TypePtr) -> u32 {
        self.store.branch(parent).map_or(0, Branch::len)
    }

    /// Protect an item and every type containing it from garbage
    /// collection, or lift that protection.
    pub fn keep(&mut self, id: &ID, keep: bool) {
        let mut next = Some(*id);
        while let Some(id) = next {
            let item = match self.store.blocks.get_item_mut(&id) {
                Some(item) if item.keep != keep => item,
                _ => break,
            };
            item.keep = keep;
            next = match &item.parent {
                TypePtr::ID(parent) => Some(*parent),
                _ => None,
            };
        }
    }

    /// Tombstone the item containing `id`. Returns false if it already was.
    pub fn delete_item(&mut self, id: &ID) -> bool {
        let (item_id, len, parent, parent_sub, content_len, nested) = {
            let item = match self.store.blocks.get_item_mut(id) {
                Some(item) if !item.deleted => item,
                _ => return false,
            };
            let content_len = item.content_len();
            item.deleted = true;
            let nested = match &item.content {
                ItemContent::Type(branch) => Some((
                    branch.start,
                    branch.map.values().copied().collect::<Vec<_>>(),
                )),
                ItemContent::Doc(doc) => {
                    // added and removed in one go is no change at all
                    if !self.subdocs_added.remove(&doc.guid) {
                        self.subdocs_removed.insert(doc.guid.clone());
                    }
                    None
                }
                _ => None,
            };
            (
                item.id,
                item.len,
                item.parent.clone(),
                item.parent_sub.clone(),
                content_len,
                nested,
            )
        };
        if let Some(branch) = self.store.branch_mut(&parent) {
            if parent_sub.is_none() {
                branch.content_len -= content_len;
            }
            branch.clear_marker();
        }
        self.delete_set.insert(item_id, len);
        self.add_changed_type(&parent, parent_sub);

        if let Some((start, map)) = nested {
            let mut next = start;
            while let Some(child) = next {
                self.delete_or_remember(&child);
                next = self.store.blocks.get_item(&child).and_then(|item| item.right);
            }
            for last in map {
                self.delete_or_remember(&last);
            }
            self.changed.remove(&TypePtr::ID(item_id));
        }
        true
    }

    fn delete_or_remember(&mut self, id: &ID) {
        let (deleted, start) = match self.store.blocks.get_item(id) {
            Some(item) => (item.deleted, item.id),
            None => return,
        };
        if !deleted {
            self.delete_item(id);
        } else if start.clock < self.before_state.get(&start.client) {
            self.merge_blocks.push(start);
        }
    }

    /// Record that `parent` changed, unless it was created by this very
    /// transaction.
    pub(crate) fn add_changed_type(&mut self, parent: &TypePtr, parent_sub: Option<Arc<str>>) {
        let item = match self.store.branch(parent) {
            Some(branch) => branch.item,
            None => return,
        };
        let existed = match item {
            None => true,
            Some(id) => {
                id.clock < self.before_state.get(&id.client)
                    && self
                        .store
                        .blocks
                        .get_item(&id)
                        .map_or(false, |item| !item.deleted)
            }
        };
        if existed {
            self.changed
                .entry(parent.clone())
                .or_insert_with(HashSet::new)
                .insert(parent_sub);
        }
    }

    /// Integrate a remote update. Structures whose dependencies are missing
    /// are buffered, together with deletions of unknown ranges, and retried
    /// whenever a later update fills the gap.
    pub fn apply_update(&mut self, update: Update) {
        let Update { blocks, delete_set } = update;
        let mut next = Some((blocks, delete_set));
        while let Some((blocks, ds)) = next.take() {
            let mut retry = false;
            let rest = self.integrate_structs(blocks);
            if let Some(pending) = self.store.pending.as_ref() {
                retry = pending
                    .missing
                    .iter()
                    .any(|(client, clock)| *clock < self.store.blocks.get_state(client));
            }
            if let Some(rest) = rest {
                match self.store.pending.take() {
                    Some(mut pending) => {
                        for (client, clock) in rest.missing.iter() {
                            pending.missing.set_min(*client, *clock);
                        }
                        pending.update = Update::merge_updates(vec![pending.update, rest.update]);
                        self.store.pending = Some(pending);
                    }
                    None => self.store.pending = Some(rest),
                }
            }

            let unapplied = self.apply_delete(&ds);
            let unapplied = match self.store.pending_ds.take() {
                Some(pending_ds) => {
                    let still_unapplied = self.apply_delete(&pending_ds);
                    match (unapplied, still_unapplied) {
                        (Some(a), Some(b)) => Some(DeleteSet::merge_all(vec![a, b])),
                        (a, b) => a.or(b),
                    }
                }
                None => unapplied,
            };
            if let Some(ds) = unapplied.as_ref() {
                debug!(deleted = %ds, "buffering deletions of unknown structures");
            }
            self.store.pending_ds = unapplied;

            if retry {
                if let Some(pending) = self.store.pending.take() {
                    debug!(missing = %pending.missing, "retrying pending structures");
                    let Update { blocks, delete_set } = pending.update;
                    next = Some((blocks, delete_set));
                }
            }
        }
    }

    /// Tombstone every known unit named by `ds`. Ranges past the local state
    /// are returned so they can be applied once the structures arrive.
    pub(crate) fn apply_delete(&mut self, ds: &DeleteSet) -> Option<DeleteSet> {
        let mut unapplied = DeleteSet::new();
        for (client, ranges) in ds.iter() {
            let state = self.store.blocks.get_state(client);
            for range in ranges.iter() {
                let clock = range.clock;
                let clock_end = range.end();
                if clock >= state {
                    unapplied.insert(ID::new(*client, clock), range.len);
                    continue;
                }
                if state < clock_end {
                    unapplied.insert(ID::new(*client, state), clock_end - state);
                }
                let mut targets = Vec::new();
                if let Some(list) = self.store.blocks.get_mut(client) {
                    let mut index = match list.find_pivot(clock) {
                        Some(index) => index,
                        None => continue,
                    };
                    let block = &list[index];
                    if !block.is_deleted() && block.id().clock < clock {
                        let offset = clock - block.id().clock;
                        if let Some(right) = list.split_block(index, offset) {
                            self.merge_blocks.push(right);
                            index += 1;
                        }
                    }
                    while index < list.len() {
                        let block = &list[index];
                        let start = block.id().clock;
                        if start >= clock_end {
                            break;
                        }
                        if !block.is_deleted() {
                            if clock_end < start + block.len() {
                                if let Some(right) = list.split_block(index, clock_end - start) {
                                    self.merge_blocks.push(right);
                                }
                            }
                            targets.push(*list[index].id());
                        }
                        index += 1;
                    }
                }
                for id in targets {
                    self.delete_item(&id);
                }
            }
        }
        if unapplied.is_empty() {
            None
        } else {
            unapplied.squash();
            Some(unapplied)
        }
    }

    /// Collect every tombstone of the document that passes `filter`,
    /// regardless of the document's gc setting.
    pub fn gc<F>(&mut self, filter: F)
    where
        F: Fn(&Item) -> bool,
    {
        let mut ds = DeleteSet::from(&self.store.blocks);
        ds.squash();
        trace!(deleted = %ds, "collecting tombstones");
        self.try_gc(&ds, &filter);
        self.try_merge(&ds);
    }

    fn try_gc(&mut self, ds: &DeleteSet, filter: &dyn Fn(&Item) -> bool) {
        for (client, ranges) in ds.iter() {
            for range in ranges.iter().rev() {
                let mut targets = Vec::new();
                if let Some(list) = self.store.blocks.get(client) {
                    let mut index = match list.find_pivot(range.clock) {
                        Some(index) => index,
                        None => continue,
                    };
                    while index < list.len() {
                        let block = &list[index];
                        if block.id().clock >= range.end() {
                            break;
                        }
                        if let Some(item) = block.as_item() {
                            if item.deleted && !item.keep && filter(item) {
                                targets.push(item.id);
                            }
                        }
                        index += 1;
                    }
                }
                for id in targets {
                    self.store.gc_item(&id, false);
                }
            }
        }
    }

    fn try_merge(&mut self, ds: &DeleteSet) {
        for (client, ranges) in ds.iter() {
            let list = match self.store.blocks.get_mut(client) {
                Some(list) if !list.is_empty() => list,
                _ => continue,
            };
            for range in ranges.iter().rev() {
                let last = match list.find_pivot(range.end() - 1) {
                    Some(index) => index,
                    None => continue,
                };
                let mut index = cmp::min(list.len() - 1, last + 1);
                while index > 0 && list[index].id().clock >= range.clock {
                    let step = 1 + list.squash_lefts(index);
                    if step > index {
                        break;
                    }
                    index -= step;
                }
            }
        }
    }

    /// Finish the transaction: collect and merge tombstones, merge blocks
    /// split during the transaction and describe what happened.
    pub(crate) fn commit(mut self, want_v1: bool, want_v2: bool) -> TransactionEvent {
        self.delete_set.squash();
        let after_state = self.store.blocks.get_state_vector();

        let ds = std::mem::take(&mut self.delete_set);
        if !self.store.options.skip_gc {
            let filter = self.store.gc_filter.clone();
            match filter {
                Some(filter) => self.try_gc(&ds, &*filter),
                None => self.try_gc(&ds, &|_: &Item| true),
            }
        }
        self.try_merge(&ds);

        for (client, &clock) in after_state.iter() {
            let before = self.before_state.get(client);
            if before == clock {
                continue;
            }
            if let Some(list) = self.store.blocks.get_mut(client) {
                let first = cmp::max(list.find_pivot(before).unwrap_or(0), 1);
                let mut index = list.len() - 1;
                while index >= first {
                    let step = 1 + list.squash_lefts(index);
                    if step > index {
                        break;
                    }
                    index -= step;
                }
            }
        }

        for id in std::mem::take(&mut self.merge_blocks).into_iter().rev() {
            if let Some(list) = self.store.blocks.get_mut(&id.client) {
                let index = match list.find_pivot(id.clock) {
                    Some(index) => index,
                    None => continue,
                };
                if index + 1 < list.len() && list.squash_lefts(index + 1) > 1 {
                    continue;
                }
                list.squash_lefts(index);
            }
        }

        let changed = self.before_state != after_state || !ds.is_empty();
        let (update_v1, update_v2) = if changed && (want_v1 || want_v2) {
            let mut update = self.store.diff_blocks(&self.before_state);
            update.delete_set = ds.clone();
            (
                if want_v1 { Some(update.encode_v1()) } else { None },
                if want_v2 { Some(update.encode_v2()) } else { None },
            )
        } else {
            (None, None)
        };
        trace!(
            origin = ?self.origin,
            local = self.local,
            before = %self.before_state,
            after = %after_state,
            deleted = %ds,
            "transaction committed"
        );

        TransactionEvent {
            origin: self.origin,
            local: self.local,
            before_state: self.before_state,
            after_state,
            delete_set: ds,
            changed: self.changed,
            subdocs_added: self.subdocs_added,
            subdocs_removed: self.subdocs_removed,
            subdocs_loaded: self.subdocs_loaded,
            update_v1,
            update_v2,
        }
    }
}
