use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::content::TypeRef;
use crate::id::ID;

/// Address of a shared type: a root type by name, or a nested type by the id
/// of the item holding it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypePtr {
    /// Not resolved yet, e.g. an item whose parent is inherited from its
    /// neighbours on integration.
    Unknown,
    /// A root type.
    Named(Arc<str>),
    /// A type nested in an item.
    ID(ID),
}

impl fmt::Display for TypePtr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TypePtr::Unknown => write!(f, "?"),
            TypePtr::Named(name) => write!(f, "'{}'", name),
            TypePtr::ID(id) => write!(f, "{}", id),
        }
    }
}

/// A cached (index, item) pair speeding up repeated positional lookups.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Marker {
    /// Visible index of the first unit of `id`.
    pub index: u32,
    /// First unit of an item in the sequence.
    pub id: ID,
}

/// The storage of a shared type: the head of its item sequence and the
/// current item of every map key.
///
/// Neighbours are referenced by id. `start` names the first unit of the first
/// item, `map` names the last unit of the newest item stored under each key,
/// both of which survive splitting and merging of items.
#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    pub(crate) start: Option<ID>,
    pub(crate) map: HashMap<Arc<str>, ID>,
    pub(crate) content_len: u32,
    pub(crate) type_ref: TypeRef,
    pub(crate) item: Option<ID>,
    pub(crate) name: Option<Arc<str>>,
    pub(crate) marker: Option<Marker>,
}

impl Branch {
    /// An empty, detached container of the given kind.
    pub fn new(type_ref: TypeRef) -> Self {
        Branch {
            start: None,
            map: HashMap::new(),
            content_len: 0,
            type_ref,
            item: None,
            name: None,
            marker: None,
        }
    }

    pub(crate) fn root(name: Arc<str>, type_ref: TypeRef) -> Self {
        let mut branch = Branch::new(type_ref);
        branch.name = Some(name);
        branch
    }

    /// The address of this branch.
    pub fn ptr(&self) -> TypePtr {
        match (&self.item, &self.name) {
            (Some(id), _) => TypePtr::ID(*id),
            (None, Some(name)) => TypePtr::Named(name.clone()),
            (None, None) => TypePtr::Unknown,
        }
    }

    /// Kind of this container.
    pub fn type_ref(&self) -> &TypeRef {
        &self.type_ref
    }

    /// Number of visible units in the sequence part.
    pub fn len(&self) -> u32 {
        self.content_len
    }

    /// True if the sequence part has no visible units.
    pub fn is_empty(&self) -> bool {
        self.content_len == 0
    }

    /// Id of the item holding this branch, `None` for root types.
    pub fn item(&self) -> Option<ID> {
        self.item
    }

    /// Root name, `None` for nested types.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub(crate) fn clear_marker(&mut self) {
        self.marker = None;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_ptr() {
        let root = Branch::root("list".into(), TypeRef::Array);
        assert_eq!(root.ptr(), TypePtr::Named("list".into()));

        let mut nested = Branch::new(TypeRef::Map);
        assert_eq!(nested.ptr(), TypePtr::Unknown);
        nested.item = Some(ID::new(1, 4));
        assert_eq!(nested.ptr(), TypePtr::ID(ID::new(1, 4)));
        assert_eq!(nested.ptr().to_string(), "<1#4>");
    }
}
