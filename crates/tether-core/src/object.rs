//! Host objects and the host's per-cycle world.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::host::HostError;
use crate::value::HostValue;

/// Shared reference to a host object.
pub type ObjectRef = Rc<dyn HostObject>;

/// Identity token of an object: the address of its shared allocation.
///
/// Only meaningful while some strong reference keeps the object alive.
pub fn identity_of(obj: &ObjectRef) -> usize {
    Rc::as_ptr(obj) as *const () as usize
}

/// Stable name under which the host re-exposes a root object every cycle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RootKey {
    pub kind: String,
    pub name: String,
}

impl RootKey {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for RootKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// HostObject
// ══════════════════════════════════════════════════════════════════════════════

/// An object owned by the host that the guest may hold a handle to.
///
/// Property access takes `&self`; implementations that allow mutation use
/// interior mutability.
pub trait HostObject {
    /// Class name, used in stringification and diagnostics.
    fn class_name(&self) -> &str;

    /// Persistent identity that survives the host recreating the object.
    fn domain_id(&self) -> Option<String> {
        None
    }

    /// Set for root/global objects the host re-exposes by stable name.
    fn root_key(&self) -> Option<RootKey> {
        None
    }

    fn get_property(&self, name: &str) -> Option<HostValue> {
        let _ = name;
        None
    }

    fn has_property(&self, name: &str) -> bool {
        self.get_property(name).is_some()
    }

    fn set_property(&self, name: &str, value: HostValue) -> Result<(), HostError> {
        let _ = value;
        Err(HostError::thrown(format!(
            "cannot set property '{name}' of {}",
            self.class_name()
        )))
    }

    fn delete_property(&self, name: &str) -> bool {
        let _ = name;
        false
    }

    /// Own enumerable property names.
    fn keys(&self) -> Vec<String> {
        Vec::new()
    }
}

// ── PlainObject ──────────────────────────────────────────────────────────────

/// A property-bag host object.
pub struct PlainObject {
    class: String,
    domain_id: Option<String>,
    root_key: Option<RootKey>,
    properties: RefCell<BTreeMap<String, HostValue>>,
}

impl PlainObject {
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            domain_id: None,
            root_key: None,
            properties: RefCell::new(BTreeMap::new()),
        }
    }

    pub fn with_domain_id(mut self, id: impl Into<String>) -> Self {
        self.domain_id = Some(id.into());
        self
    }

    pub fn with_root_key(mut self, key: RootKey) -> Self {
        self.root_key = Some(key);
        self
    }

    pub fn with_property(self, name: &str, value: impl Into<HostValue>) -> Self {
        self.properties
            .borrow_mut()
            .insert(name.to_string(), value.into());
        self
    }

    /// Wrap in a shared reference.
    pub fn into_ref(self) -> ObjectRef {
        Rc::new(self)
    }
}

impl HostObject for PlainObject {
    fn class_name(&self) -> &str {
        &self.class
    }

    fn domain_id(&self) -> Option<String> {
        self.domain_id.clone()
    }

    fn root_key(&self) -> Option<RootKey> {
        self.root_key.clone()
    }

    fn get_property(&self, name: &str) -> Option<HostValue> {
        self.properties.borrow().get(name).cloned()
    }

    fn has_property(&self, name: &str) -> bool {
        self.properties.borrow().contains_key(name)
    }

    fn set_property(&self, name: &str, value: HostValue) -> Result<(), HostError> {
        self.properties.borrow_mut().insert(name.to_string(), value);
        Ok(())
    }

    fn delete_property(&self, name: &str) -> bool {
        self.properties.borrow_mut().remove(name).is_some()
    }

    fn keys(&self) -> Vec<String> {
        self.properties.borrow().keys().cloned().collect()
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// HostWorld
// ══════════════════════════════════════════════════════════════════════════════

/// The host's view of the current cycle, consulted during renewal.
pub trait HostWorld {
    /// The current instance of a root object.
    fn find_root(&self, key: &RootKey) -> Option<ObjectRef>;

    /// The current instance carrying `id`.
    fn find_by_domain_id(&self, id: &str) -> Option<ObjectRef>;
}

/// A world with nothing in it.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyWorld;

impl HostWorld for EmptyWorld {
    fn find_root(&self, _key: &RootKey) -> Option<ObjectRef> {
        None
    }

    fn find_by_domain_id(&self, _id: &str) -> Option<ObjectRef> {
        None
    }
}

/// A world the host fills with the objects alive this cycle.
///
/// When two objects claim the same root key or domain id, the last one
/// inserted wins.
#[derive(Default)]
pub struct CycleIndex {
    roots: FxHashMap<RootKey, ObjectRef>,
    by_domain_id: FxHashMap<String, ObjectRef>,
}

impl CycleIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index an object under its root key and domain id, if it has them.
    pub fn insert(&mut self, obj: ObjectRef) {
        if let Some(key) = obj.root_key() {
            self.roots.insert(key, obj.clone());
        }
        if let Some(id) = obj.domain_id() {
            self.by_domain_id.insert(id, obj);
        }
    }

    pub fn len(&self) -> usize {
        self.roots.len() + self.by_domain_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty() && self.by_domain_id.is_empty()
    }
}

impl FromIterator<ObjectRef> for CycleIndex {
    fn from_iter<I: IntoIterator<Item = ObjectRef>>(iter: I) -> Self {
        let mut index = Self::new();
        for obj in iter {
            index.insert(obj);
        }
        index
    }
}

impl HostWorld for CycleIndex {
    fn find_root(&self, key: &RootKey) -> Option<ObjectRef> {
        self.roots.get(key).cloned()
    }

    fn find_by_domain_id(&self, id: &str) -> Option<ObjectRef> {
        self.by_domain_id.get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_object_properties() {
        let obj = PlainObject::new("Creep")
            .with_property("hits", 100)
            .with_property("name", "worker")
            .into_ref();
        assert!(obj.has_property("hits"));
        assert_eq!(obj.get_property("hits"), Some(HostValue::Number(100.0)));
        obj.set_property("hits", HostValue::from(90)).unwrap();
        assert_eq!(obj.get_property("hits"), Some(HostValue::Number(90.0)));
        assert!(obj.delete_property("name"));
        assert!(!obj.delete_property("name"));
        assert_eq!(obj.keys(), vec!["hits".to_string()]);
    }

    #[test]
    fn test_identity_is_per_allocation() {
        let a = PlainObject::new("A").into_ref();
        let b = PlainObject::new("A").into_ref();
        assert_eq!(identity_of(&a), identity_of(&a.clone()));
        assert_ne!(identity_of(&a), identity_of(&b));
    }

    #[test]
    fn test_cycle_index_last_insert_wins() {
        let first = PlainObject::new("Creep").with_domain_id("X").into_ref();
        let second = PlainObject::new("Creep").with_domain_id("X").into_ref();
        let index: CycleIndex = [first, second.clone()].into_iter().collect();
        let found = index.find_by_domain_id("X").unwrap();
        assert!(Rc::ptr_eq(&found, &second));
        assert!(index.find_by_domain_id("Y").is_none());
    }

    #[test]
    fn test_cycle_index_roots() {
        let room = PlainObject::new("Room")
            .with_root_key(RootKey::new("room", "W1N1"))
            .into_ref();
        let mut index = CycleIndex::new();
        index.insert(room.clone());
        let found = index.find_root(&RootKey::new("room", "W1N1")).unwrap();
        assert!(Rc::ptr_eq(&found, &room));
        assert!(EmptyWorld.find_root(&RootKey::new("room", "W1N1")).is_none());
    }

    #[test]
    fn test_read_only_object_rejects_set() {
        struct Fixed;
        impl HostObject for Fixed {
            fn class_name(&self) -> &str {
                "Fixed"
            }
        }
        let err = Fixed.set_property("x", HostValue::Null).unwrap_err();
        assert!(err.to_string().contains("Fixed"));
    }
}
