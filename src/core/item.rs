//! Build item types.
//!
//! An item type classifies a piece of build state exchanged between steps.
//! Its kind (simple, multi, or marker) is data attached to the identifier,
//! fixed when the type is declared in an [`ItemRegistry`]. Steps refer to
//! item types through typed [`ItemKey`] handles so that values are checked
//! against the Rust type they were declared with.

use std::any::{type_name, Any, TypeId};
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Serialize, Serializer};

use crate::resolver::ChainError;

/// Type-erased item value as stored in the result context.
pub(crate) type ItemValue = Arc<dyn Any + Send + Sync>;

/// Cardinality of an item type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    /// At most one instance per build.
    Simple,
    /// Zero or more instances, accumulated in production order.
    Multi,
    /// No payload; only presence after a step runs is observable.
    Marker,
}

impl ItemKind {
    /// Get the manifest spelling of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Simple => "simple",
            ItemKind::Multi => "multi",
            ItemKind::Marker => "marker",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "simple" => Ok(ItemKind::Simple),
            "multi" => Ok(ItemKind::Multi),
            "marker" | "empty" => Ok(ItemKind::Marker),
            _ => Err(format!(
                "invalid item kind '{}'; expected 'simple', 'multi', or 'marker'",
                s
            )),
        }
    }
}

/// Unique identifier of an item type.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(Arc<str>);

impl ItemId {
    /// Create an identifier from a name.
    pub fn new(name: impl AsRef<str>) -> Self {
        ItemId(Arc::from(name.as_ref()))
    }

    /// Get the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ItemId({:?})", &*self.0)
    }
}

impl Serialize for ItemId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(s: &str) -> Self {
        ItemId::new(s)
    }
}

/// Payload of marker items.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Marker;

/// A declared item type: identifier plus kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ItemType {
    id: ItemId,
    kind: ItemKind,
}

impl ItemType {
    pub(crate) fn new(id: ItemId, kind: ItemKind) -> Self {
        ItemType { id, kind }
    }

    /// Get the item identifier.
    pub fn id(&self) -> &ItemId {
        &self.id
    }

    /// Get the item kind.
    pub fn kind(&self) -> ItemKind {
        self.kind
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Typed handle to a declared item type.
///
/// Keys are only handed out by [`ItemRegistry`], so holding an
/// `ItemKey<T>` means the item was declared to carry values of type `T`.
pub struct ItemKey<T> {
    ty: ItemType,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ItemKey<T> {
    pub(crate) fn from_type(ty: ItemType) -> Self {
        ItemKey {
            ty,
            _marker: PhantomData,
        }
    }

    /// Get the item identifier.
    pub fn id(&self) -> &ItemId {
        &self.ty.id
    }

    /// Get the item kind.
    pub fn kind(&self) -> ItemKind {
        self.ty.kind
    }

    /// Get the untyped item type.
    pub fn item_type(&self) -> &ItemType {
        &self.ty
    }
}

impl<T> Clone for ItemKey<T> {
    fn clone(&self) -> Self {
        ItemKey::from_type(self.ty.clone())
    }
}

impl<T> fmt::Debug for ItemKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemKey")
            .field("id", &self.ty.id)
            .field("kind", &self.ty.kind)
            .field("value", &type_name::<T>())
            .finish()
    }
}

#[derive(Debug, Clone)]
struct Declaration {
    kind: ItemKind,
    value_type: TypeId,
    value_name: &'static str,
}

/// Registry of declared item types.
#[derive(Debug, Clone, Default)]
pub struct ItemRegistry {
    declared: BTreeMap<ItemId, Declaration>,
}

impl ItemRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        ItemRegistry {
            declared: BTreeMap::new(),
        }
    }

    /// Declare a simple item type carrying values of type `T`.
    pub fn declare_simple<T: Send + Sync + 'static>(
        &mut self,
        name: impl AsRef<str>,
    ) -> Result<ItemKey<T>, ChainError> {
        self.declare(name, ItemKind::Simple)
    }

    /// Declare a multi item type carrying values of type `T`.
    pub fn declare_multi<T: Send + Sync + 'static>(
        &mut self,
        name: impl AsRef<str>,
    ) -> Result<ItemKey<T>, ChainError> {
        self.declare(name, ItemKind::Multi)
    }

    /// Declare a zero-payload marker item type used only for sequencing.
    pub fn declare_marker(&mut self, name: impl AsRef<str>) -> Result<ItemKey<Marker>, ChainError> {
        self.declare(name, ItemKind::Marker)
    }

    /// Redeclaring with the same kind and value type returns an equivalent key.
    fn declare<T: Send + Sync + 'static>(
        &mut self,
        name: impl AsRef<str>,
        kind: ItemKind,
    ) -> Result<ItemKey<T>, ChainError> {
        let id = ItemId::new(name);
        let value_type = TypeId::of::<T>();

        match self.declared.get(&id) {
            Some(existing) if existing.kind != kind || existing.value_type != value_type => {
                return Err(ChainError::DuplicateDeclaration {
                    item: id.to_string(),
                    existing: format!("{} of {}", existing.kind, existing.value_name),
                    requested: format!("{} of {}", kind, type_name::<T>()),
                });
            }
            Some(_) => {}
            None => {
                tracing::debug!("declared {} item `{}`", kind, id);
                self.declared.insert(
                    id.clone(),
                    Declaration {
                        kind,
                        value_type,
                        value_name: type_name::<T>(),
                    },
                );
            }
        }

        Ok(ItemKey::from_type(ItemType::new(id, kind)))
    }

    /// Get the kind an item was declared with.
    pub fn kind_of(&self, id: &ItemId) -> Option<ItemKind> {
        self.declared.get(id).map(|d| d.kind)
    }

    /// Check whether an item type is declared.
    pub fn contains(&self, id: &ItemId) -> bool {
        self.declared.contains_key(id)
    }

    /// Check that an item type matches its declaration exactly.
    pub fn is_declared(&self, ty: &ItemType) -> bool {
        self.kind_of(ty.id()) == Some(ty.kind())
    }

    /// Iterate over all declared item types in identifier order.
    pub fn iter(&self) -> impl Iterator<Item = ItemType> + '_ {
        self.declared
            .iter()
            .map(|(id, d)| ItemType::new(id.clone(), d.kind))
    }

    /// Get the number of declared item types.
    pub fn len(&self) -> usize {
        self.declared.len()
    }

    /// Check if no item types are declared.
    pub fn is_empty(&self) -> bool {
        self.declared.is_empty()
    }
}
