#![forbid(unsafe_code)]

//! An observable, ordered container.
//!
//! [`ObservableCollection`] raises the same notification sequence as the
//! collections hosts usually bind against: a property-changed for `Count`
//! (when the length changes), a property-changed for the indexer `Item[]`,
//! and finally a collection-changed describing the structural change.
//!
//! Borrows of the item list are always released before any notification
//! is raised, so handlers may read the collection back.

use std::cell::RefCell;
use std::rc::Rc;

use crate::object::{
    CollectionChanged, CollectionChangedArgs, MemberInfo, Object, PropertyChanged, Type, TypeInfo,
    Value,
};

/// Reflected name of the indexer property.
pub const INDEXER_NAME: &str = "Item[]";

static COLLECTION_MEMBERS: [MemberInfo; 2] = [
    MemberInfo::readonly_property("Count", Type::Int),
    MemberInfo::indexer(Type::Unit),
];

/// Type descriptor shared by every [`ObservableCollection`].
pub static COLLECTION_TYPE: TypeInfo =
    TypeInfo::observable_collection("ObservableCollection", &COLLECTION_MEMBERS);

/// A list of [`Value`]s that notifies on every structural change.
#[derive(Debug, Default)]
pub struct ObservableCollection {
    items: RefCell<Vec<Value>>,
    property_changed: PropertyChanged,
    collection_changed: CollectionChanged,
}

impl ObservableCollection {
    /// Create an empty collection.
    #[must_use]
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Create a collection holding `items`, without raising anything.
    pub fn from_items(items: impl IntoIterator<Item = Value>) -> Rc<Self> {
        Rc::new(Self {
            items: RefCell::new(items.into_iter().collect()),
            ..Self::default()
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }

    /// Item at `index`, if any.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<Value> {
        self.items.borrow().get(index).cloned()
    }

    /// Snapshot of the current items.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Value> {
        self.items.borrow().clone()
    }

    /// Append an item.
    pub fn push(&self, item: impl Into<Value>) {
        let index = self.len();
        self.insert(index, item);
    }

    /// Insert an item at `index` (clamped to the current length).
    pub fn insert(&self, index: usize, item: impl Into<Value>) {
        let item = item.into();
        {
            let mut items = self.items.borrow_mut();
            let index = index.min(items.len());
            items.insert(index, item.clone());
        }
        self.raise_count_and_indexer();
        self.collection_changed
            .raise(&CollectionChangedArgs::added(vec![item]));
    }

    /// Remove the item at `index`.
    pub fn remove_at(&self, index: usize) -> Option<Value> {
        let removed = {
            let mut items = self.items.borrow_mut();
            (index < items.len()).then(|| items.remove(index))
        }?;
        self.raise_count_and_indexer();
        self.collection_changed
            .raise(&CollectionChangedArgs::removed(vec![removed.clone()]));
        Some(removed)
    }

    /// Remove the first item equal to `item`. Returns whether one was found.
    pub fn remove(&self, item: &Value) -> bool {
        let index = self.items.borrow().iter().position(|existing| existing == item);
        index.and_then(|index| self.remove_at(index)).is_some()
    }

    /// Replace the item at `index`, returning the previous one.
    pub fn replace(&self, index: usize, item: impl Into<Value>) -> Option<Value> {
        let item = item.into();
        let old = {
            let mut items = self.items.borrow_mut();
            let slot = items.get_mut(index)?;
            std::mem::replace(slot, item.clone())
        };
        self.property_changed.raise(INDEXER_NAME);
        self.collection_changed
            .raise(&CollectionChangedArgs::replaced(item, old.clone()));
        Some(old)
    }

    /// Move the item at `from` so that it ends up at `to`.
    pub fn move_item(&self, from: usize, to: usize) -> bool {
        let moved = {
            let mut items = self.items.borrow_mut();
            if from >= items.len() || to >= items.len() {
                return false;
            }
            let item = items.remove(from);
            items.insert(to, item.clone());
            item
        };
        self.property_changed.raise(INDEXER_NAME);
        self.collection_changed
            .raise(&CollectionChangedArgs::moved(moved));
        true
    }

    /// Remove every item.
    pub fn clear(&self) {
        self.items.borrow_mut().clear();
        self.raise_count_and_indexer();
        self.collection_changed.raise(&CollectionChangedArgs::reset());
    }

    fn raise_count_and_indexer(&self) {
        self.property_changed.raise("Count");
        self.property_changed.raise(INDEXER_NAME);
    }
}

impl Object for ObservableCollection {
    fn type_info(&self) -> &'static TypeInfo {
        &COLLECTION_TYPE
    }

    fn get(&self, member: &str) -> Option<Value> {
        match member {
            "Count" => i64::try_from(self.len()).ok().map(Value::Int),
            _ => None,
        }
    }

    fn property_changed(&self) -> Option<&PropertyChanged> {
        Some(&self.property_changed)
    }

    fn collection_changed(&self) -> Option<&CollectionChanged> {
        Some(&self.collection_changed)
    }

    fn items(&self) -> Vec<Value> {
        self.to_vec()
    }
}
