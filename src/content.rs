//! Payloads carried by items, keyed by the 5-bit content ref of the wire
//! format.

use std::sync::Arc;

use crate::any::Any;
use crate::branch::{Branch, TypePtr};
use crate::encoding::{Decoder, Encoder};
use crate::error::{Error, Result};

pub(crate) const BLOCK_GC_REF_NUMBER: u8 = 0;
pub(crate) const CONTENT_DELETED_REF: u8 = 1;
pub(crate) const CONTENT_JSON_REF: u8 = 2;
pub(crate) const CONTENT_BINARY_REF: u8 = 3;
pub(crate) const CONTENT_STRING_REF: u8 = 4;
pub(crate) const CONTENT_EMBED_REF: u8 = 5;
pub(crate) const CONTENT_FORMAT_REF: u8 = 6;
pub(crate) const CONTENT_TYPE_REF: u8 = 7;
pub(crate) const CONTENT_ANY_REF: u8 = 8;
pub(crate) const CONTENT_DOC_REF: u8 = 9;
pub(crate) const BLOCK_SKIP_REF_NUMBER: u8 = 10;

const TYPE_REF_ARRAY: u8 = 0;
const TYPE_REF_MAP: u8 = 1;
const TYPE_REF_TEXT: u8 = 2;
const TYPE_REF_XML_ELEMENT: u8 = 3;
const TYPE_REF_XML_FRAGMENT: u8 = 4;
const TYPE_REF_XML_HOOK: u8 = 5;
const TYPE_REF_XML_TEXT: u8 = 6;
const TYPE_REF_UNDEFINED: u8 = 15;

/// Kind of a shared type container.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeRef {
    /// An ordered sequence of values.
    Array,
    /// A key-value map.
    Map,
    /// A rich text sequence.
    Text,
    /// An XML element with its node name.
    XmlElement(Arc<str>),
    /// A list of XML nodes.
    XmlFragment,
    /// An XML hook with its hook name.
    XmlHook(Arc<str>),
    /// Text inside an XML tree.
    XmlText,
    /// A root type only known by name so far.
    Undefined,
}

impl TypeRef {
    fn tag(&self) -> u8 {
        match self {
            TypeRef::Array => TYPE_REF_ARRAY,
            TypeRef::Map => TYPE_REF_MAP,
            TypeRef::Text => TYPE_REF_TEXT,
            TypeRef::XmlElement(_) => TYPE_REF_XML_ELEMENT,
            TypeRef::XmlFragment => TYPE_REF_XML_FRAGMENT,
            TypeRef::XmlHook(_) => TYPE_REF_XML_HOOK,
            TypeRef::XmlText => TYPE_REF_XML_TEXT,
            TypeRef::Undefined => TYPE_REF_UNDEFINED,
        }
    }

    pub(crate) fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.write_type_ref(self.tag());
        match self {
            TypeRef::XmlElement(name) | TypeRef::XmlHook(name) => encoder.write_key(name),
            _ => {}
        }
    }

    pub(crate) fn decode<D: Decoder>(decoder: &mut D) -> Result<TypeRef> {
        let type_ref = match decoder.read_type_ref()? {
            TYPE_REF_ARRAY => TypeRef::Array,
            TYPE_REF_MAP => TypeRef::Map,
            TYPE_REF_TEXT => TypeRef::Text,
            TYPE_REF_XML_ELEMENT => TypeRef::XmlElement(decoder.read_key()?.into()),
            TYPE_REF_XML_FRAGMENT => TypeRef::XmlFragment,
            TYPE_REF_XML_HOOK => TypeRef::XmlHook(decoder.read_key()?.into()),
            TYPE_REF_XML_TEXT => TypeRef::XmlText,
            TYPE_REF_UNDEFINED => TypeRef::Undefined,
            other => {
                return Err(Error::UnexpectedValue(format!("type ref {}", other)));
            }
        };
        Ok(type_ref)
    }
}

/// A reference to a nested document.
#[derive(Debug, Clone, PartialEq)]
pub struct SubDoc {
    /// Globally unique id of the nested document.
    pub guid: String,
    /// Options the nested document was created with.
    pub opts: Any,
}

impl SubDoc {
    /// True if the nested document asked to be loaded as soon as it is seen.
    pub fn should_load(&self) -> bool {
        match &self.opts {
            Any::Map(opts) => opts.get("autoLoad") == Some(&Any::Bool(true)),
            _ => false,
        }
    }
}

/// A value read out of the document.
#[derive(Debug, Clone, PartialEq)]
pub enum Out {
    /// A plain value.
    Any(Any),
    /// A nested shared type.
    Type(TypePtr),
    /// A nested document, by guid.
    Doc(String),
}

/// Payload of an item.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemContent {
    /// A run of deleted units whose content has been discarded.
    Deleted(u32),
    /// Values carried as JSON text in v1 updates.
    Json(Vec<Any>),
    /// A single binary blob.
    Binary(Vec<u8>),
    /// A run of text, measured in UTF-16 code units.
    String(String),
    /// An opaque embedded value occupying one position.
    Embed(Any),
    /// A zero-width formatting attribute.
    Format(Arc<str>, Any),
    /// A nested shared type.
    Type(Box<Branch>),
    /// A run of values.
    Any(Vec<Any>),
    /// A nested document.
    Doc(SubDoc),
}

impl ItemContent {
    /// The 5-bit content ref written into the info byte.
    pub fn get_ref(&self) -> u8 {
        match self {
            ItemContent::Deleted(_) => CONTENT_DELETED_REF,
            ItemContent::Json(_) => CONTENT_JSON_REF,
            ItemContent::Binary(_) => CONTENT_BINARY_REF,
            ItemContent::String(_) => CONTENT_STRING_REF,
            ItemContent::Embed(_) => CONTENT_EMBED_REF,
            ItemContent::Format(_, _) => CONTENT_FORMAT_REF,
            ItemContent::Type(_) => CONTENT_TYPE_REF,
            ItemContent::Any(_) => CONTENT_ANY_REF,
            ItemContent::Doc(_) => CONTENT_DOC_REF,
        }
    }

    /// Number of clock units this content occupies.
    pub fn len(&self) -> u32 {
        match self {
            ItemContent::Deleted(len) => *len,
            ItemContent::Json(values) | ItemContent::Any(values) => values.len() as u32,
            ItemContent::String(s) => s.encode_utf16().count() as u32,
            ItemContent::Binary(_)
            | ItemContent::Embed(_)
            | ItemContent::Format(_, _)
            | ItemContent::Type(_)
            | ItemContent::Doc(_) => 1,
        }
    }

    /// True for content that contributes to the visible length of a sequence.
    pub fn is_countable(&self) -> bool {
        match self {
            ItemContent::Deleted(_) | ItemContent::Format(_, _) => false,
            _ => true,
        }
    }

    /// The visible values of this content, one per countable unit. Text
    /// yields one string per UTF-16 code unit, so a character outside the
    /// basic plane comes out as two U+FFFD halves. Use the string content
    /// itself to read text.
    pub fn values(&self) -> Vec<Out> {
        match self {
            ItemContent::Deleted(_) | ItemContent::Format(_, _) => Vec::new(),
            ItemContent::Json(values) | ItemContent::Any(values) => {
                values.iter().cloned().map(Out::Any).collect()
            }
            ItemContent::Binary(bytes) => vec![Out::Any(Any::Buffer(bytes.clone()))],
            ItemContent::String(s) => s
                .encode_utf16()
                .map(|unit| Out::Any(Any::String(String::from_utf16_lossy(&[unit]))))
                .collect(),
            ItemContent::Embed(value) => vec![Out::Any(value.clone())],
            ItemContent::Type(branch) => vec![Out::Type(branch.ptr())],
            ItemContent::Doc(doc) => vec![Out::Doc(doc.guid.clone())],
        }
    }

    /// Split the content at `offset`: `self` keeps the first `offset` units
    /// and the remainder is returned. Only runs can be split.
    pub fn splice(&mut self, offset: u32) -> Option<ItemContent> {
        match self {
            ItemContent::Deleted(len) => {
                let right = *len - offset;
                *len = offset;
                Some(ItemContent::Deleted(right))
            }
            ItemContent::Json(values) => Some(ItemContent::Json(values.split_off(offset as usize))),
            ItemContent::Any(values) => Some(ItemContent::Any(values.split_off(offset as usize))),
            ItemContent::String(s) => {
                let (left, right) = split_utf16(s, offset);
                *s = left;
                Some(ItemContent::String(right))
            }
            _ => None,
        }
    }

    /// Append `other` to `self` if both are runs of the same kind.
    pub fn try_merge(&mut self, other: &ItemContent) -> bool {
        match (self, other) {
            (ItemContent::Deleted(len), ItemContent::Deleted(other)) => {
                *len += *other;
                true
            }
            (ItemContent::Json(values), ItemContent::Json(other))
            | (ItemContent::Any(values), ItemContent::Any(other)) => {
                values.extend(other.iter().cloned());
                true
            }
            (ItemContent::String(s), ItemContent::String(other)) => {
                s.push_str(other);
                true
            }
            _ => false,
        }
    }

    /// Write the content, skipping its first `offset` units.
    pub fn encode<E: Encoder>(&self, encoder: &mut E, offset: u32) {
        match self {
            ItemContent::Deleted(len) => encoder.write_len(*len - offset),
            ItemContent::Json(values) => {
                encoder.write_len(values.len() as u32 - offset);
                for value in values[offset as usize..].iter() {
                    match value {
                        Any::Undefined => encoder.write_string("undefined"),
                        other => encoder.write_string(&other.to_json_string()),
                    }
                }
            }
            ItemContent::Binary(bytes) => encoder.write_buf(bytes),
            ItemContent::String(s) => {
                if offset == 0 {
                    encoder.write_string(s)
                } else {
                    encoder.write_string(&split_utf16(s, offset).1)
                }
            }
            ItemContent::Embed(value) => encoder.write_json(value),
            ItemContent::Format(key, value) => {
                encoder.write_key(key);
                encoder.write_json(value);
            }
            ItemContent::Type(branch) => branch.type_ref.encode(encoder),
            ItemContent::Any(values) => {
                encoder.write_len(values.len() as u32 - offset);
                for value in values[offset as usize..].iter() {
                    encoder.write_any(value);
                }
            }
            ItemContent::Doc(doc) => {
                encoder.write_string(&doc.guid);
                encoder.write_any(&doc.opts);
            }
        }
    }

    /// Read content of the kind named by `content_ref`.
    pub fn decode<D: Decoder>(decoder: &mut D, content_ref: u8) -> Result<ItemContent> {
        let content = match content_ref {
            CONTENT_DELETED_REF => {
                let len = decoder.read_len()?;
                if len == 0 {
                    return Err(Error::UnexpectedValue("empty deleted run".to_string()));
                }
                ItemContent::Deleted(len)
            }
            CONTENT_JSON_REF => {
                let len = decoder.read_len()?;
                let mut values = Vec::new();
                for _ in 0..len {
                    let json = decoder.read_string()?;
                    if json == "undefined" {
                        values.push(Any::Undefined);
                    } else {
                        values.push(Any::from_json_str(&json)?);
                    }
                }
                ItemContent::Json(values)
            }
            CONTENT_BINARY_REF => ItemContent::Binary(decoder.read_buf()?),
            CONTENT_STRING_REF => ItemContent::String(decoder.read_string()?),
            CONTENT_EMBED_REF => ItemContent::Embed(decoder.read_json()?),
            CONTENT_FORMAT_REF => {
                let key = decoder.read_key()?;
                let value = decoder.read_json()?;
                ItemContent::Format(key.into(), value)
            }
            CONTENT_TYPE_REF => {
                let type_ref = TypeRef::decode(decoder)?;
                ItemContent::Type(Box::new(Branch::new(type_ref)))
            }
            CONTENT_ANY_REF => {
                let len = decoder.read_len()?;
                let mut values = Vec::new();
                for _ in 0..len {
                    values.push(decoder.read_any()?);
                }
                ItemContent::Any(values)
            }
            CONTENT_DOC_REF => {
                let guid = decoder.read_string()?;
                let opts = decoder.read_any()?;
                ItemContent::Doc(SubDoc { guid, opts })
            }
            other => {
                return Err(Error::UnexpectedValue(format!("content ref {}", other)));
            }
        };
        if content.len() == 0 {
            return Err(Error::UnexpectedValue("empty content".to_string()));
        }
        Ok(content)
    }
}

/// Split `s` after `offset` UTF-16 code units. A surrogate pair cut in half
/// becomes U+FFFD on both sides, which keeps both lengths intact.
pub(crate) fn split_utf16(s: &str, offset: u32) -> (String, String) {
    let mut units = 0u32;
    for (idx, c) in s.char_indices() {
        if units == offset {
            return (s[..idx].to_owned(), s[idx..].to_owned());
        }
        let width = c.len_utf16() as u32;
        if units + width > offset {
            let mut left = s[..idx].to_owned();
            left.push('\u{FFFD}');
            let mut right = String::from('\u{FFFD}');
            right.push_str(&s[idx + c.len_utf8()..]);
            return (left, right);
        }
        units += width;
    }
    (s.to_owned(), String::new())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::encoding::{DecoderV1, DecoderV2, EncoderV1, EncoderV2};

    fn round_trip_v1(content: &ItemContent, offset: u32) -> ItemContent {
        let mut encoder = EncoderV1::new();
        content.encode(&mut encoder, offset);
        let buf = encoder.to_vec();
        ItemContent::decode(&mut DecoderV1::new(&buf), content.get_ref()).unwrap()
    }

    fn round_trip_v2(content: &ItemContent) -> ItemContent {
        let mut encoder = EncoderV2::new();
        content.encode(&mut encoder, 0);
        let buf = encoder.to_vec();
        let mut decoder = DecoderV2::new(&buf).unwrap();
        ItemContent::decode(&mut decoder, content.get_ref()).unwrap()
    }

    #[test]
    fn test_countable() {
        assert!(!ItemContent::Deleted(3).is_countable());
        assert!(!ItemContent::Format("bold".into(), Any::Bool(true)).is_countable());
        assert!(ItemContent::String("abc".to_string()).is_countable());
        assert_eq!(ItemContent::Format("bold".into(), Any::Null).len(), 1);
    }

    #[test]
    fn test_string_length_is_utf16() {
        let content = ItemContent::String("a😀b".to_string());
        assert_eq!(content.len(), 4);
        let values = content.values();
        assert_eq!(values.len(), 4);
        assert_eq!(values[0], Out::Any(Any::from("a")));
        assert_eq!(values[1], Out::Any(Any::from("\u{fffd}")));
        assert_eq!(values[3], Out::Any(Any::from("b")));
    }

    #[test]
    fn test_splice_keeps_left_part() {
        let mut content = ItemContent::String("hello".to_string());
        let right = content.splice(2).unwrap();
        assert_eq!(content, ItemContent::String("he".to_string()));
        assert_eq!(right, ItemContent::String("llo".to_string()));

        let mut content = ItemContent::Any(vec![Any::from(1), Any::from(2), Any::from(3)]);
        let right = content.splice(1).unwrap();
        assert_eq!(content.len(), 1);
        assert_eq!(right.len(), 2);

        assert!(ItemContent::Binary(vec![1]).splice(1).is_none());
    }

    #[test]
    fn test_splitting_a_surrogate_pair() {
        let mut content = ItemContent::String("a😀b".to_string());
        let right = content.splice(2).unwrap();
        assert_eq!(content, ItemContent::String("a\u{FFFD}".to_string()));
        assert_eq!(right, ItemContent::String("\u{FFFD}b".to_string()));
        assert_eq!(content.len() + right.len(), 4);
    }

    #[test]
    fn test_merge_only_same_runs() {
        let mut content = ItemContent::String("ab".to_string());
        assert!(content.try_merge(&ItemContent::String("cd".to_string())));
        assert_eq!(content, ItemContent::String("abcd".to_string()));
        assert!(!content.try_merge(&ItemContent::Any(vec![Any::Null])));

        let mut deleted = ItemContent::Deleted(2);
        assert!(deleted.try_merge(&ItemContent::Deleted(3)));
        assert_eq!(deleted.len(), 5);

        let mut embed = ItemContent::Embed(Any::Null);
        assert!(!embed.try_merge(&ItemContent::Embed(Any::Null)));
    }

    #[test]
    fn test_content_round_trips() {
        let contents = vec![
            ItemContent::Deleted(7),
            ItemContent::Json(vec![Any::Undefined, Any::from("x"), Any::from(3)]),
            ItemContent::Binary(vec![1, 2, 3]),
            ItemContent::String("hello".to_string()),
            ItemContent::Embed(Any::from("image")),
            ItemContent::Format("bold".into(), Any::Bool(true)),
            ItemContent::Type(Box::new(Branch::new(TypeRef::XmlElement("p".into())))),
            ItemContent::Any(vec![Any::from(1.5), Any::Null]),
            ItemContent::Doc(SubDoc {
                guid: "sub".to_string(),
                opts: Any::Null,
            }),
        ];
        for content in contents.iter() {
            assert_eq!(&round_trip_v1(content, 0), content);
            assert_eq!(&round_trip_v2(content), content);
        }
    }

    #[test]
    fn test_encode_with_offset() {
        let content = ItemContent::String("hello".to_string());
        assert_eq!(
            round_trip_v1(&content, 3),
            ItemContent::String("lo".to_string())
        );
        let content = ItemContent::Any(vec![Any::from(1), Any::from(2)]);
        assert_eq!(round_trip_v1(&content, 1), ItemContent::Any(vec![Any::from(2)]));
    }

    #[test]
    fn test_unknown_content_ref() {
        let mut decoder = DecoderV1::new(&[0]);
        assert!(matches!(
            ItemContent::decode(&mut decoder, 12),
            Err(Error::UnexpectedValue(_))
        ));
    }
}
