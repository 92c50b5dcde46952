//! Entries of the per-client structure log.

use std::fmt;
use std::sync::Arc;

use crate::branch::TypePtr;
use crate::content::{ItemContent, Out, BLOCK_GC_REF_NUMBER, BLOCK_SKIP_REF_NUMBER};
use crate::encoding::{Decoder, Encoder, Write};
use crate::error::Result;
use crate::id::ID;

pub(crate) const HAS_ORIGIN: u8 = 0b1000_0000;
pub(crate) const HAS_RIGHT_ORIGIN: u8 = 0b0100_0000;
pub(crate) const HAS_PARENT_SUB: u8 = 0b0010_0000;
pub(crate) const CONTENT_REF_MASK: u8 = 0b0001_1111;

/// A contiguous clock range of a single client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRange {
    /// First unit of the range.
    pub id: ID,
    /// Number of units.
    pub len: u32,
}

impl BlockRange {
    /// Create a range of `len` units starting at `id`.
    pub fn new(id: ID, len: u32) -> Self {
        BlockRange { id, len }
    }

    /// The last unit of the range.
    pub fn last_id(&self) -> ID {
        self.id.advance(self.len - 1)
    }

    /// True if `id` falls into this range.
    pub fn contains(&self, id: &ID) -> bool {
        self.id.client == id.client
            && self.id.clock <= id.clock
            && id.clock < self.id.clock + self.len
    }

    /// Cut the range after `offset` units and return the remainder.
    pub(crate) fn split(&mut self, offset: u32) -> BlockRange {
        let right = BlockRange::new(self.id.advance(offset), self.len - offset);
        self.len = offset;
        right
    }
}

/// A real operation: some content inserted into a parent between two
/// neighbours.
///
/// `left` names the last unit of the left neighbour and `right` the first
/// unit of the right one. `origin` and `right_origin` are the neighbours at
/// creation time and never change after integration.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub(crate) id: ID,
    pub(crate) len: u32,
    pub(crate) left: Option<ID>,
    pub(crate) right: Option<ID>,
    pub(crate) origin: Option<ID>,
    pub(crate) right_origin: Option<ID>,
    pub(crate) parent: TypePtr,
    pub(crate) parent_sub: Option<Arc<str>>,
    pub(crate) content: ItemContent,
    pub(crate) deleted: bool,
    pub(crate) keep: bool,
}

impl Item {
    pub(crate) fn new(
        id: ID,
        origin: Option<ID>,
        right_origin: Option<ID>,
        parent: TypePtr,
        parent_sub: Option<Arc<str>>,
        content: ItemContent,
    ) -> Self {
        Item {
            id,
            len: content.len(),
            left: origin,
            right: right_origin,
            origin,
            right_origin,
            parent,
            parent_sub,
            content,
            deleted: false,
            keep: false,
        }
    }

    /// First unit of this item.
    pub fn id(&self) -> &ID {
        &self.id
    }

    /// Number of clock units covered.
    pub fn len(&self) -> u32 {
        self.len
    }

    /// Last unit of this item.
    pub fn last_id(&self) -> ID {
        self.id.advance(self.len - 1)
    }

    /// Left neighbour at creation time.
    pub fn origin(&self) -> Option<&ID> {
        self.origin.as_ref()
    }

    /// Right neighbour at creation time.
    pub fn right_origin(&self) -> Option<&ID> {
        self.right_origin.as_ref()
    }

    /// Current left neighbour (its last unit).
    pub fn left(&self) -> Option<&ID> {
        self.left.as_ref()
    }

    /// Current right neighbour (its first unit).
    pub fn right(&self) -> Option<&ID> {
        self.right.as_ref()
    }

    /// The shared type this item belongs to.
    pub fn parent(&self) -> &TypePtr {
        &self.parent
    }

    /// Map key, if the item lives in the map part of its parent.
    pub fn parent_sub(&self) -> Option<&str> {
        self.parent_sub.as_deref()
    }

    /// The payload.
    pub fn content(&self) -> &ItemContent {
        &self.content
    }

    /// Values of the payload. Empty once the content was garbage collected.
    pub fn values(&self) -> Vec<Out> {
        self.content.values()
    }

    /// True once tombstoned.
    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// True if the content must survive garbage collection.
    pub fn is_keep(&self) -> bool {
        self.keep
    }

    /// True if the item contributes to the length of its parent's sequence.
    pub fn is_countable(&self) -> bool {
        self.content.is_countable()
    }

    /// Visible length contributed to the parent sequence.
    pub(crate) fn content_len(&self) -> u32 {
        if self.deleted || !self.is_countable() {
            0
        } else {
            self.len
        }
    }

    /// Cut this item after `offset` units. `self` keeps the left part and is
    /// linked to the returned right part.
    pub(crate) fn split(&mut self, offset: u32) -> Option<Item> {
        let content = self.content.splice(offset)?;
        let left_last = self.id.advance(offset - 1);
        let right = Item {
            id: self.id.advance(offset),
            len: self.len - offset,
            left: Some(left_last),
            right: self.right,
            origin: Some(left_last),
            right_origin: self.right_origin,
            parent: self.parent.clone(),
            parent_sub: self.parent_sub.clone(),
            content,
            deleted: self.deleted,
            keep: self.keep,
        };
        self.right = Some(right.id);
        self.len = offset;
        Some(right)
    }

    /// Append `right` to `self` if it directly continues this item: inserted
    /// by the same client right after it, still its direct neighbour, in the
    /// same deletion state and with mergeable content.
    pub(crate) fn try_merge(&mut self, right: &Item) -> bool {
        if right.origin == Some(self.last_id())
            && self.right == Some(right.id)
            && self.right_origin == right.right_origin
            && self.id.client == right.id.client
            && self.id.clock + self.len == right.id.clock
            && self.deleted == right.deleted
            && self.content.try_merge(&right.content)
        {
            if right.keep {
                self.keep = true;
            }
            self.right = right.right;
            self.len += right.len;
            true
        } else {
            false
        }
    }

    fn info(&self, has_origin: bool) -> u8 {
        let mut info = self.content.get_ref() & CONTENT_REF_MASK;
        if has_origin {
            info |= HAS_ORIGIN;
        }
        if self.right_origin.is_some() {
            info |= HAS_RIGHT_ORIGIN;
        }
        if self.parent_sub.is_some() {
            info |= HAS_PARENT_SUB;
        }
        info
    }

    /// Write the item, skipping its first `offset` units.
    pub fn encode<E: Encoder>(&self, encoder: &mut E, offset: u32) {
        let origin = if offset > 0 {
            Some(self.id.advance(offset - 1))
        } else {
            self.origin
        };
        encoder.write_info(self.info(origin.is_some()));
        if let Some(origin) = origin.as_ref() {
            encoder.write_left_id(origin);
        }
        if let Some(right_origin) = self.right_origin.as_ref() {
            encoder.write_right_id(right_origin);
        }
        if origin.is_none() && self.right_origin.is_none() {
            match &self.parent {
                TypePtr::Named(name) => {
                    encoder.write_parent_info(true);
                    encoder.write_string(name);
                }
                TypePtr::ID(id) => {
                    encoder.write_parent_info(false);
                    encoder.write_left_id(id);
                }
                TypePtr::Unknown => panic!("item {} has no origin and no parent", self.id),
            }
            if let Some(parent_sub) = self.parent_sub.as_ref() {
                encoder.write_string(parent_sub);
            }
        }
        self.content.encode(encoder, offset);
    }

    /// Read an item whose info byte was already consumed.
    pub fn decode<D: Decoder>(decoder: &mut D, id: ID, info: u8) -> Result<Item> {
        let origin = if info & HAS_ORIGIN != 0 {
            Some(decoder.read_left_id()?)
        } else {
            None
        };
        let right_origin = if info & HAS_RIGHT_ORIGIN != 0 {
            Some(decoder.read_right_id()?)
        } else {
            None
        };
        // parent info is only sent when it can't be taken from a neighbour
        let cant_copy_parent_info = origin.is_none() && right_origin.is_none();
        let parent = if cant_copy_parent_info {
            if decoder.read_parent_info()? {
                TypePtr::Named(decoder.read_string()?.into())
            } else {
                TypePtr::ID(decoder.read_left_id()?)
            }
        } else {
            TypePtr::Unknown
        };
        let parent_sub = if cant_copy_parent_info && info & HAS_PARENT_SUB != 0 {
            Some(decoder.read_string()?.into())
        } else {
            None
        };
        let content = ItemContent::decode(decoder, info & CONTENT_REF_MASK)?;
        Ok(Item::new(id, origin, right_origin, parent, parent_sub, content))
    }
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({}, len: {}", self.id, self.len)?;
        if let Some(origin) = self.origin.as_ref() {
            write!(f, ", origin: {}", origin)?;
        }
        if let Some(right_origin) = self.right_origin.as_ref() {
            write!(f, ", right origin: {}", right_origin)?;
        }
        write!(f, ", parent: {}", self.parent)?;
        if let Some(sub) = self.parent_sub.as_ref() {
            write!(f, ", key: {}", sub)?;
        }
        if self.deleted {
            write!(f, ", deleted")?;
        }
        write!(f, ")")
    }
}

/// An entry of the structure log held by the block store.
#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    /// A live or tombstoned item.
    Item(Box<Item>),
    /// A tombstone range whose items are gone altogether.
    GC(BlockRange),
}

impl Block {
    /// First unit covered.
    pub fn id(&self) -> &ID {
        match self {
            Block::Item(item) => &item.id,
            Block::GC(range) => &range.id,
        }
    }

    /// Number of units covered.
    pub fn len(&self) -> u32 {
        match self {
            Block::Item(item) => item.len,
            Block::GC(range) => range.len,
        }
    }

    /// Last unit covered.
    pub fn last_id(&self) -> ID {
        self.id().advance(self.len() - 1)
    }

    /// True for tombstoned items and GC ranges.
    pub fn is_deleted(&self) -> bool {
        match self {
            Block::Item(item) => item.deleted,
            Block::GC(_) => true,
        }
    }

    /// True for GC ranges.
    pub fn is_gc(&self) -> bool {
        match self {
            Block::GC(_) => true,
            Block::Item(_) => false,
        }
    }

    /// The item, unless this is a GC range.
    pub fn as_item(&self) -> Option<&Item> {
        match self {
            Block::Item(item) => Some(&**item),
            Block::GC(_) => None,
        }
    }

    pub(crate) fn as_item_mut(&mut self) -> Option<&mut Item> {
        match self {
            Block::Item(item) => Some(&mut **item),
            Block::GC(_) => None,
        }
    }

    /// Merge `right` into `self`. Items follow [Item::try_merge]; GC ranges
    /// merge whenever they are contiguous.
    pub(crate) fn try_merge(&mut self, right: &Block) -> bool {
        match (self, right) {
            (Block::Item(left), Block::Item(right)) => left.try_merge(right),
            (Block::GC(left), Block::GC(right)) => {
                if left.id.client == right.id.client && left.id.clock + left.len == right.id.clock {
                    left.len += right.len;
                    true
                } else {
                    false
                }
            }
            _ => false,
        }
    }

    /// Write the block, skipping its first `offset` units.
    pub fn encode<E: Encoder>(&self, encoder: &mut E, offset: u32) {
        match self {
            Block::Item(item) => item.encode(encoder, offset),
            Block::GC(range) => {
                encoder.write_info(BLOCK_GC_REF_NUMBER);
                encoder.write_len(range.len - offset);
            }
        }
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Block::Item(item) => write!(f, "{}", item),
            Block::GC(range) => write!(f, "gc({}, len: {})", range.id, range.len),
        }
    }
}

/// A decoded structure that has not been integrated yet. Unlike [Block] it
/// can also be a [BlockCarrier::Skip], a clock range absent from an update.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockCarrier {
    /// An item to integrate.
    Item(Box<Item>),
    /// A GC range to append.
    GC(BlockRange),
    /// A gap in the update, never integrated.
    Skip(BlockRange),
}

impl BlockCarrier {
    /// First unit covered.
    pub fn id(&self) -> &ID {
        match self {
            BlockCarrier::Item(item) => &item.id,
            BlockCarrier::GC(range) | BlockCarrier::Skip(range) => &range.id,
        }
    }

    /// Number of units covered.
    pub fn len(&self) -> u32 {
        match self {
            BlockCarrier::Item(item) => item.len,
            BlockCarrier::GC(range) | BlockCarrier::Skip(range) => range.len,
        }
    }

    /// True for gaps.
    pub fn is_skip(&self) -> bool {
        match self {
            BlockCarrier::Skip(_) => true,
            _ => false,
        }
    }

    /// Drop the first `offset` units. Items that can't be split are left
    /// untouched and `false` is returned.
    pub(crate) fn trim_start(&mut self, offset: u32) -> bool {
        if offset == 0 {
            return true;
        }
        match self {
            BlockCarrier::Item(item) => match item.split(offset) {
                Some(right) => {
                    **item = right;
                    true
                }
                None => false,
            },
            BlockCarrier::GC(range) | BlockCarrier::Skip(range) => {
                *range = range.split(offset);
                true
            }
        }
    }

    /// Write the structure as is.
    pub fn encode<E: Encoder>(&self, encoder: &mut E) {
        match self {
            BlockCarrier::Item(item) => item.encode(encoder, 0),
            BlockCarrier::GC(range) => {
                encoder.write_info(BLOCK_GC_REF_NUMBER);
                encoder.write_len(range.len);
            }
            BlockCarrier::Skip(range) => {
                encoder.write_info(BLOCK_SKIP_REF_NUMBER);
                encoder.rest().write_var(range.len as u64);
            }
        }
    }

    /// Read the structure starting at `id`.
    pub fn decode<D: Decoder>(decoder: &mut D, id: ID) -> Result<BlockCarrier> {
        let info = decoder.read_info()?;
        let carrier = match info & CONTENT_REF_MASK {
            BLOCK_GC_REF_NUMBER => {
                BlockCarrier::GC(BlockRange::new(id, non_empty(decoder.read_len()?)?))
            }
            BLOCK_SKIP_REF_NUMBER => {
                BlockCarrier::Skip(BlockRange::new(id, non_empty(decoder.read_var_u32()?)?))
            }
            _ => BlockCarrier::Item(Box::new(Item::decode(decoder, id, info)?)),
        };
        Ok(carrier)
    }
}

impl From<Block> for BlockCarrier {
    fn from(block: Block) -> Self {
        match block {
            Block::Item(item) => BlockCarrier::Item(item),
            Block::GC(range) => BlockCarrier::GC(range),
        }
    }
}

fn non_empty(len: u32) -> Result<u32> {
    if len == 0 {
        Err(crate::error::Error::UnexpectedValue(
            "zero-length structure".to_string(),
        ))
    } else {
        Ok(len)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::any::Any;
    use crate::encoding::{DecoderV1, EncoderV1};

    fn text_item(client: u64, clock: u32, origin: Option<ID>, s: &str) -> Item {
        Item::new(
            ID::new(client, clock),
            origin,
            None,
            TypePtr::Named("text".into()),
            None,
            ItemContent::String(s.to_string()),
        )
    }

    #[test]
    fn test_split_links_both_halves() {
        let mut item = text_item(1, 0, None, "hello");
        let right = item.split(2).unwrap();
        assert_eq!(item.len, 2);
        assert_eq!(item.right, Some(ID::new(1, 2)));
        assert_eq!(right.id, ID::new(1, 2));
        assert_eq!(right.len, 3);
        assert_eq!(right.origin, Some(ID::new(1, 1)));
        assert_eq!(right.left, Some(ID::new(1, 1)));
    }

    #[test]
    fn test_split_then_merge_restores_item() {
        let mut item = text_item(1, 0, None, "hello");
        item.left = None;
        item.right = None;
        let original = item.clone();
        let right = item.split(3).unwrap();
        assert!(item.try_merge(&right));
        assert_eq!(item, original);
    }

    #[test]
    fn test_merge_requires_adjacency() {
        let mut a = text_item(1, 0, None, "ab");
        let b = text_item(1, 2, Some(ID::new(1, 0)), "cd");
        a.right = Some(b.id);
        assert!(!a.try_merge(&b));
    }

    #[test]
    fn test_item_round_trip() {
        let mut item = Item::new(
            ID::new(5, 3),
            None,
            None,
            TypePtr::ID(ID::new(2, 0)),
            Some("key".into()),
            ItemContent::Any(vec![Any::from(1)]),
        );
        item.left = None;
        item.right = None;
        let mut encoder = EncoderV1::new();
        Block::Item(Box::new(item.clone())).encode(&mut encoder, 0);
        let buf = encoder.to_vec();
        assert_eq!(buf[0], HAS_PARENT_SUB | 8);
        let mut decoder = DecoderV1::new(&buf);
        match BlockCarrier::decode(&mut decoder, ID::new(5, 3)).unwrap() {
            BlockCarrier::Item(decoded) => assert_eq!(*decoded, item),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_encode_with_offset_rewrites_origin() {
        let item = text_item(1, 0, None, "hello");
        let mut encoder = EncoderV1::new();
        item.encode(&mut encoder, 2);
        let buf = encoder.to_vec();
        let mut decoder = DecoderV1::new(&buf);
        match BlockCarrier::decode(&mut decoder, ID::new(1, 2)).unwrap() {
            BlockCarrier::Item(decoded) => {
                assert_eq!(decoded.origin, Some(ID::new(1, 1)));
                assert_eq!(decoded.parent, TypePtr::Unknown);
                assert_eq!(decoded.content, ItemContent::String("llo".to_string()));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_gc_and_skip_round_trip() {
        let mut encoder = EncoderV1::new();
        BlockCarrier::GC(BlockRange::new(ID::new(1, 0), 4)).encode(&mut encoder);
        BlockCarrier::Skip(BlockRange::new(ID::new(1, 4), 2)).encode(&mut encoder);
        let buf = encoder.to_vec();
        assert_eq!(buf, vec![0, 4, 10, 2]);
        let mut decoder = DecoderV1::new(&buf);
        assert_eq!(
            BlockCarrier::decode(&mut decoder, ID::new(1, 0)).unwrap(),
            BlockCarrier::GC(BlockRange::new(ID::new(1, 0), 4))
        );
        assert!(BlockCarrier::decode(&mut decoder, ID::new(1, 4))
            .unwrap()
            .is_skip());
    }

    #[test]
    fn test_trim_start() {
        let mut carrier = BlockCarrier::Skip(BlockRange::new(ID::new(1, 0), 5));
        assert!(carrier.trim_start(3));
        assert_eq!(carrier, BlockCarrier::Skip(BlockRange::new(ID::new(1, 3), 2)));
    }
}
