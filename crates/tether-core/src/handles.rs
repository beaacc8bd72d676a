//! Object handle registry and the cross-cycle renewal protocol.
//!
//! The registry owns one strong reference per live handle. Object identity
//! is the address of the shared allocation ([`identity_of`]), which stays
//! valid exactly as long as that reference is held, so a single side table
//! keyed by identity replaces any per-object tagging.
//!
//! Object methods and world lookups are host code and may re-enter the
//! engine. The free functions at the bottom ([`assign`], [`renew`],
//! [`renew_batch`], [`sweep`]) run that code with the registry unborrowed
//! and take the borrow only for the table updates.

use std::cell::RefCell;

use log::debug;
use rustc_hash::FxHashMap;

use tether_types::{Handle, RenewOutcome};

use crate::object::{identity_of, HostWorld, ObjectRef};

#[derive(Clone)]
struct Entry {
    object: ObjectRef,
    domain_id: Option<String>,
}

/// Handle ↔ host object table with a secondary index by domain id.
#[derive(Default)]
pub struct HandleRegistry {
    entries: FxHashMap<u32, Entry>,
    by_identity: FxHashMap<usize, u32>,
    by_domain_id: FxHashMap<String, u32>,
    next: u32,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: FxHashMap::with_capacity_and_hasher(capacity, Default::default()),
            by_identity: FxHashMap::with_capacity_and_hasher(capacity, Default::default()),
            by_domain_id: FxHashMap::with_capacity_and_hasher(capacity, Default::default()),
            next: 0,
        }
    }

    /// Number of live handles.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The handle already assigned to `obj`, without assigning one.
    pub fn handle_of(&self, obj: &ObjectRef) -> Option<Handle> {
        self.by_identity.get(&identity_of(obj)).copied().map(Handle)
    }

    /// The handle for `obj`, whose domain id the caller already read,
    /// assigning a fresh one if needed.
    ///
    /// An untracked object whose domain id is already registered to a
    /// different live object takes over that handle (implicit renewal).
    pub fn insert(&mut self, obj: &ObjectRef, domain_id: Option<String>) -> Handle {
        if let Some(handle) = self.handle_of(obj) {
            return handle;
        }
        if let Some(id) = &domain_id {
            if let Some(&existing) = self.by_domain_id.get(id) {
                debug!("implicit renewal of handle {existing} for '{id}'");
                self.rebind(Handle(existing), obj.clone(), domain_id);
                return Handle(existing);
            }
        }
        let handle = self.next;
        self.next += 1;
        self.by_identity.insert(identity_of(obj), handle);
        if let Some(id) = &domain_id {
            self.by_domain_id.insert(id.clone(), handle);
        }
        self.entries.insert(
            handle,
            Entry {
                object: obj.clone(),
                domain_id,
            },
        );
        Handle(handle)
    }

    /// The object a handle currently refers to.
    pub fn resolve(&self, handle: Handle) -> Option<ObjectRef> {
        self.entries.get(&handle.0).map(|entry| entry.object.clone())
    }

    /// The object behind `handle` and the domain id recorded for it.
    pub fn tracked(&self, handle: Handle) -> Option<(ObjectRef, Option<String>)> {
        self.entries
            .get(&handle.0)
            .map(|entry| (entry.object.clone(), entry.domain_id.clone()))
    }

    /// Stop tracking a handle. Releasing an unknown handle is a no-op.
    pub fn release(&mut self, handle: Handle) -> bool {
        let Some(entry) = self.entries.remove(&handle.0) else {
            return false;
        };
        self.forget_identity(&entry.object, handle.0);
        if let Some(id) = &entry.domain_id {
            if self.by_domain_id.get(id) == Some(&handle.0) {
                self.by_domain_id.remove(id);
            }
        }
        true
    }

    fn forget_identity(&mut self, obj: &ObjectRef, handle: u32) {
        let identity = identity_of(obj);
        if self.by_identity.get(&identity) == Some(&handle) {
            self.by_identity.remove(&identity);
        }
    }

    /// Point an existing handle at a new object, keeping the handle number.
    pub fn rebind(&mut self, handle: Handle, obj: ObjectRef, domain_id: Option<String>) -> bool {
        let Some(old) = self.entries.get(&handle.0).cloned() else {
            return false;
        };
        if identity_of(&old.object) == identity_of(&obj) {
            return true;
        }
        self.forget_identity(&old.object, handle.0);
        // An object tracked under another handle keeps that mapping.
        self.by_identity.entry(identity_of(&obj)).or_insert(handle.0);

        if let Some(old_id) = &old.domain_id {
            if domain_id.as_ref() != Some(old_id) && self.by_domain_id.get(old_id) == Some(&handle.0)
            {
                self.by_domain_id.remove(old_id);
            }
        }
        if let Some(id) = &domain_id {
            self.by_domain_id.insert(id.clone(), handle.0);
        }
        self.entries.insert(
            handle.0,
            Entry {
                object: obj,
                domain_id,
            },
        );
        true
    }

    /// Live handles, in no particular order.
    pub fn handles(&self) -> impl Iterator<Item = Handle> + '_ {
        self.entries.keys().map(|raw| Handle(*raw))
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Shared-registry operations
// ══════════════════════════════════════════════════════════════════════════════

/// The handle for `obj`, assigning one if needed.
pub fn assign(registry: &RefCell<HandleRegistry>, obj: &ObjectRef) -> Handle {
    if let Some(handle) = registry.borrow().handle_of(obj) {
        return handle;
    }
    let domain_id = obj.domain_id();
    registry.borrow_mut().insert(obj, domain_id)
}

/// Re-resolve a handle against the current cycle's world.
pub fn renew(
    registry: &RefCell<HandleRegistry>,
    handle: Handle,
    world: &dyn HostWorld,
) -> RenewOutcome {
    let Some((object, domain_id)) = registry.borrow().tracked(handle) else {
        return RenewOutcome::Disposed;
    };
    let current = if let Some(key) = object.root_key() {
        world.find_root(&key)
    } else if let Some(id) = &domain_id {
        world.find_by_domain_id(id)
    } else {
        return RenewOutcome::Unrenewable;
    };
    match current {
        Some(obj) => {
            let domain_id = obj.domain_id();
            if registry.borrow_mut().rebind(handle, obj, domain_id) {
                RenewOutcome::Ok
            } else {
                // Released while the world was consulted.
                RenewOutcome::Disposed
            }
        }
        None => {
            registry.borrow_mut().release(handle);
            RenewOutcome::Gone
        }
    }
}

/// Renew every handle in place, overwriting failures with `-1`.
/// Returns the number of successful renewals.
pub fn renew_batch(
    registry: &RefCell<HandleRegistry>,
    handles: &mut [i32],
    world: &dyn HostWorld,
) -> u32 {
    let mut renewed = 0;
    for raw in handles.iter_mut() {
        let outcome = match Handle::from_raw(*raw) {
            Some(handle) => renew(registry, handle, world),
            None => RenewOutcome::Disposed,
        };
        if outcome.is_ok() {
            renewed += 1;
        } else {
            *raw = -1;
        }
    }
    renewed
}

/// Release every handle `keep` rejects. Returns how many were released.
pub fn sweep(
    registry: &RefCell<HandleRegistry>,
    mut keep: impl FnMut(Handle, &ObjectRef) -> bool,
) -> usize {
    let live: Vec<(Handle, ObjectRef)> = {
        let registry = registry.borrow();
        registry
            .handles()
            .filter_map(|handle| Some((handle, registry.resolve(handle)?)))
            .collect()
    };
    let doomed: Vec<Handle> = live
        .iter()
        .filter(|(handle, obj)| !keep(*handle, obj))
        .map(|(handle, _)| *handle)
        .collect();
    let mut registry = registry.borrow_mut();
    let mut removed = 0;
    for handle in doomed {
        if registry.release(handle) {
            removed += 1;
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{CycleIndex, EmptyWorld, HostObject, PlainObject, RootKey};
    use std::rc::Rc;

    fn creep(id: &str) -> ObjectRef {
        PlainObject::new("Creep").with_domain_id(id).into_ref()
    }

    fn shared() -> RefCell<HandleRegistry> {
        RefCell::new(HandleRegistry::new())
    }

    #[test]
    fn test_same_object_same_handle() {
        let registry = shared();
        let a = creep("a");
        let b = PlainObject::new("Flag").into_ref();
        let ha = assign(&registry, &a);
        assert_eq!(assign(&registry, &a), ha);
        let hb = assign(&registry, &b);
        assert_ne!(ha, hb);
        assert_eq!(ha, Handle(0));
        assert_eq!(registry.borrow().len(), 2);
    }

    #[test]
    fn test_implicit_renewal_reuses_handle() {
        let registry = shared();
        let old = creep("X");
        let h = assign(&registry, &old);
        let new = creep("X");
        assert_eq!(assign(&registry, &new), h);
        let registry = registry.borrow();
        assert!(Rc::ptr_eq(&registry.resolve(h).unwrap(), &new));
        assert_eq!(registry.handle_of(&old), None);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_release_is_idempotent() {
        let registry = shared();
        let a = creep("a");
        let h = assign(&registry, &a);
        assert!(registry.borrow_mut().release(h));
        assert!(!registry.borrow_mut().release(h));
        assert!(registry.borrow().resolve(h).is_none());
        assert_eq!(registry.borrow().handle_of(&a), None);
        // A fresh assignment gets a new number.
        assert_ne!(assign(&registry, &a), h);
    }

    #[test]
    fn test_release_keeps_newer_domain_mapping() {
        let registry = shared();
        let h = assign(&registry, &creep("X"));
        let other = assign(&registry, &creep("Y"));
        // "X" now belongs to the other handle.
        assert!(registry
            .borrow_mut()
            .rebind(other, creep("X"), Some("X".to_string())));
        registry.borrow_mut().release(h);
        assert_eq!(assign(&registry, &creep("X")), other);
    }

    #[test]
    fn test_renew_by_domain_id() {
        let registry = shared();
        let h = assign(&registry, &creep("X"));
        let b = creep("X");
        let world: CycleIndex = [b.clone()].into_iter().collect();
        assert_eq!(renew(&registry, h, &world), RenewOutcome::Ok);
        assert!(Rc::ptr_eq(&registry.borrow().resolve(h).unwrap(), &b));
        assert_eq!(registry.borrow().handle_of(&b), Some(h));
    }

    #[test]
    fn test_renew_gone_releases() {
        let registry = shared();
        let h = assign(&registry, &creep("X"));
        assert_eq!(renew(&registry, h, &EmptyWorld), RenewOutcome::Gone);
        assert!(registry.borrow().resolve(h).is_none());
        assert_eq!(renew(&registry, h, &EmptyWorld), RenewOutcome::Disposed);
    }

    #[test]
    fn test_renew_root_by_key() {
        let registry = shared();
        let key = RootKey::new("room", "W1N1");
        let room = PlainObject::new("Room").with_root_key(key.clone()).into_ref();
        let h = assign(&registry, &room);
        let fresh = PlainObject::new("Room").with_root_key(key).into_ref();
        let world: CycleIndex = [fresh.clone()].into_iter().collect();
        assert_eq!(renew(&registry, h, &world), RenewOutcome::Ok);
        assert!(Rc::ptr_eq(&registry.borrow().resolve(h).unwrap(), &fresh));
    }

    #[test]
    fn test_renew_without_identity_is_unrenewable() {
        let registry = shared();
        let obj = PlainObject::new("Position").into_ref();
        let h = assign(&registry, &obj);
        assert_eq!(renew(&registry, h, &EmptyWorld), RenewOutcome::Unrenewable);
        assert!(registry.borrow().resolve(h).is_some());
    }

    #[test]
    fn test_renew_batch_marks_failures() {
        let registry = shared();
        let alive = assign(&registry, &creep("alive"));
        let dead = assign(&registry, &creep("dead"));
        let world: CycleIndex = [creep("alive")].into_iter().collect();
        let mut batch = [alive.raw(), dead.raw(), 99, -1];
        assert_eq!(renew_batch(&registry, &mut batch, &world), 1);
        assert_eq!(batch, [alive.raw(), -1, -1, -1]);
    }

    #[test]
    fn test_sweep_prunes() {
        let registry = shared();
        let keep = assign(&registry, &creep("keep"));
        assign(&registry, &creep("drop1"));
        assign(&registry, &creep("drop2"));
        let removed = sweep(&registry, |handle, _| handle == keep);
        assert_eq!(removed, 2);
        assert_eq!(registry.borrow().handles().collect::<Vec<_>>(), vec![keep]);
    }

    /// A world whose lookups read the registry back, as a host world
    /// calling into the engine would.
    struct Reentrant<'r> {
        registry: &'r RefCell<HandleRegistry>,
        inner: CycleIndex,
    }

    impl HostWorld for Reentrant<'_> {
        fn find_root(&self, key: &RootKey) -> Option<ObjectRef> {
            self.registry.borrow_mut().release(Handle(u32::MAX));
            self.inner.find_root(key)
        }

        fn find_by_domain_id(&self, id: &str) -> Option<ObjectRef> {
            let _ = assign(self.registry, &PlainObject::new("Marker").into_ref());
            self.inner.find_by_domain_id(id)
        }
    }

    #[test]
    fn test_renewal_lookups_may_touch_the_registry() {
        let registry = shared();
        let alive = assign(&registry, &creep("alive"));
        let dead = assign(&registry, &creep("dead"));
        let world = Reentrant {
            registry: &registry,
            inner: [creep("alive")].into_iter().collect(),
        };
        let mut batch = [alive.raw(), dead.raw()];
        assert_eq!(renew_batch(&registry, &mut batch, &world), 1);
        assert_eq!(batch, [alive.raw(), -1]);
    }

    /// An object whose domain id lookup assigns another handle.
    struct Chatty {
        registry: Rc<RefCell<HandleRegistry>>,
        sibling: ObjectRef,
    }

    impl HostObject for Chatty {
        fn class_name(&self) -> &str {
            "Chatty"
        }

        fn domain_id(&self) -> Option<String> {
            assign(&self.registry, &self.sibling);
            Some("chatty".to_string())
        }
    }

    #[test]
    fn test_assign_reads_domain_id_unborrowed() {
        let registry = Rc::new(shared());
        let sibling = creep("sibling");
        let obj: ObjectRef = Rc::new(Chatty {
            registry: Rc::clone(&registry),
            sibling: sibling.clone(),
        });
        let h = assign(&registry, &obj);
        assert_eq!(registry.borrow().handle_of(&sibling), Some(Handle(0)));
        assert_eq!(h, Handle(1));
    }

    #[test]
    fn test_sweep_predicate_may_touch_the_registry() {
        let registry = shared();
        let keep = assign(&registry, &creep("keep"));
        assign(&registry, &creep("drop"));
        let removed = sweep(&registry, |handle, obj| {
            registry.borrow().handle_of(obj) == Some(keep) && handle == keep
        });
        assert_eq!(removed, 1);
    }
}
