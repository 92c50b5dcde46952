use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use crate::block::{Block, BlockCarrier, BlockRange, Item};
use crate::block_store::BlockStore;
use crate::branch::{Branch, TypePtr};
use crate::content::{ItemContent, TypeRef};
use crate::delete_set::DeleteSet;
use crate::doc::Options;
use crate::id::{ClientID, ID};
use crate::state_vector::StateVector;
use crate::update::{PendingUpdate, Update};

/// Predicate deciding whether a tombstoned item may lose its content.
pub type GcFilter = Arc<dyn Fn(&Item) -> bool + Send + Sync>;

/// Everything a document owns: the block store, the root types and the
/// buffers of remote changes that can't be applied yet.
pub struct Store {
    pub(crate) options: Options,
    pub(crate) blocks: BlockStore,
    pub(crate) types: HashMap<Arc<str>, Branch>,
    pub(crate) pending: Option<PendingUpdate>,
    pub(crate) pending_ds: Option<DeleteSet>,
    pub(crate) gc_filter: Option<GcFilter>,
}

impl Store {
    pub(crate) fn new(options: Options) -> Self {
        Store {
            options,
            blocks: BlockStore::new(),
            types: HashMap::new(),
            pending: None,
            pending_ds: None,
            gc_filter: None,
        }
    }

    /// Id of the local client.
    pub fn client_id(&self) -> ClientID {
        self.options.client_id
    }

    /// The structure log.
    pub fn blocks(&self) -> &BlockStore {
        &self.blocks
    }

    /// Structures waiting for their causal dependencies.
    pub fn pending(&self) -> Option<&PendingUpdate> {
        self.pending.as_ref()
    }

    /// Delete ranges waiting for the structures they refer to.
    pub fn pending_ds(&self) -> Option<&DeleteSet> {
        self.pending_ds.as_ref()
    }

    /// Get the root type `name`, creating it if needed. A root first seen on
    /// the wire has an undefined kind which is fixed by the first caller
    /// asking for a concrete one.
    pub(crate) fn get_or_create_type(&mut self, name: &str, type_ref: TypeRef) -> &mut Branch {
        let branch = self
            .types
            .entry(Arc::from(name))
            .or_insert_with(|| Branch::root(Arc::from(name), TypeRef::Undefined));
        if branch.type_ref == TypeRef::Undefined {
            branch.type_ref = type_ref;
        }
        branch
    }

    /// Resolve a type address.
    pub fn branch(&self, ptr: &TypePtr) -> Option<&Branch> {
        match ptr {
            TypePtr::Unknown => None,
            TypePtr::Named(name) => self.types.get(name),
            TypePtr::ID(id) => match &self.blocks.get_item(id)?.content {
                ItemContent::Type(branch) => Some(branch),
                _ => None,
            },
        }
    }

    pub(crate) fn branch_mut(&mut self, ptr: &TypePtr) -> Option<&mut Branch> {
        match ptr {
            TypePtr::Unknown => None,
            TypePtr::Named(name) => self.types.get_mut(name),
            TypePtr::ID(id) => match &mut self.blocks.get_item_mut(id)?.content {
                ItemContent::Type(branch) => Some(branch),
                _ => None,
            },
        }
    }

    /// First unit of the block containing `id`.
    pub(crate) fn block_start(&self, id: &ID) -> Option<ID> {
        self.blocks.get_block(id).map(|block| *block.id())
    }

    /// First item of the chain ending at `last`, following left links.
    pub(crate) fn chain_head(&self, last: &ID) -> Option<ID> {
        let mut current = self.blocks.get_item(last)?;
        while let Some(left) = current.left.as_ref() {
            match self.blocks.get_item(left) {
                Some(item) => current = item,
                None => break,
            }
        }
        Some(current.id)
    }

    /// Drop the content of a tombstoned item. With `parent_gcd` the item is
    /// replaced by a GC range altogether; children of a nested type always
    /// are.
    pub(crate) fn gc_item(&mut self, id: &ID, parent_gcd: bool) {
        let (start, map) = match self.blocks.get_item_mut(id) {
            Some(item) => match &mut item.content {
                ItemContent::Type(branch) => {
                    (branch.start.take(), std::mem::take(&mut branch.map))
                }
                _ => (None, HashMap::new()),
            },
            None => return,
        };

        let mut next = start;
        while let Some(child) = next {
            next = self.blocks.get_item(&child).and_then(|item| item.right);
            self.gc_item(&child, true);
        }
        for (_, last) in map {
            let mut prev = Some(last);
            while let Some(child) = prev {
                prev = self.blocks.get_item(&child).and_then(|item| item.left);
                self.gc_item(&child, true);
            }
        }

        if let Some(block) = self.blocks.get_block_mut(id) {
            let replacement = match block {
                Block::Item(item) if parent_gcd => Some(Block::GC(BlockRange::new(item.id, item.len))),
                Block::Item(item) => {
                    item.content = ItemContent::Deleted(item.len);
                    None
                }
                Block::GC(_) => None,
            };
            if let Some(gc) = replacement {
                *block = gc;
            }
        }
    }

    /// The structures `remote` is missing, with runs coalesced so that equal
    /// documents yield equal updates. The delete set is left empty.
    pub(crate) fn diff_blocks(&self, remote: &StateVector) -> Update {
        let mut update = Update::new();
        for (client, list) in self.blocks.iter() {
            let clock = remote.get(client);
            if list.get_state() <= clock {
                continue;
            }
            let start = match list.find_pivot(clock) {
                Some(idx) => idx,
                None => continue,
            };
            let mut carriers = VecDeque::new();
            let mut acc: Option<Block> = None;
            for block in list.iter().skip(start) {
                if let Some(prev) = acc.as_mut() {
                    if prev.is_deleted() == block.is_deleted() && prev.try_merge(block) {
                        continue;
                    }
                }
                if let Some(prev) = acc.replace(block.clone()) {
                    carriers.push_back(BlockCarrier::from(prev));
                }
            }
            if let Some(prev) = acc {
                carriers.push_back(BlockCarrier::from(prev));
            }
            if let Some(first) = carriers.front_mut() {
                let offset = clock - first.id().clock;
                first.trim_start(offset);
            }
            update.blocks.insert(*client, carriers);
        }
        update
    }

    /// Everything `remote` is missing: new structures, the full delete set,
    /// and pending structures as far as they are new to `remote`.
    pub(crate) fn diff_update(&self, remote: &StateVector) -> Update {
        let mut update = self.diff_blocks(remote);
        update.delete_set = DeleteSet::from(&self.blocks);

        if self.pending.is_none() && self.pending_ds.is_none() {
            return update;
        }
        let mut updates = vec![update];
        if let Some(pending) = self.pending.as_ref() {
            updates.push(pending.update.diff(remote));
        }
        if let Some(ds) = self.pending_ds.as_ref() {
            updates.push(Update::from(ds.clone()));
        }
        Update::merge_updates(updates)
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Store")
            .field("client_id", &self.options.client_id)
            .field("blocks", &self.blocks)
            .field("types", &self.types)
            .field("pending", &self.pending)
            .field("pending_ds", &self.pending_ds)
            .finish()
    }
}

impl fmt::Display for Store {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "store of client {}:", self.options.client_id)?;
        let mut clients: Vec<_> = self.blocks.iter().collect();
        clients.sort_by_key(|(client, _)| **client);
        for (client, list) in clients {
            write!(f, "  {}:", client)?;
            for block in list.iter() {
                write!(f, " {}", block)?;
            }
            writeln!(f)?;
        }
        if let Some(pending) = self.pending.as_ref() {
            writeln!(f, "  pending, missing {}", pending.missing)?;
        }
        if let Some(ds) = self.pending_ds.as_ref() {
            writeln!(f, "  pending deletes {}", ds)?;
        }
        Ok(())
    }
}
