//! Host callables and the capability tables they are published in.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use thiserror::Error;

use tether_types::BridgeError;

use crate::memory::MemoryView;
use crate::value::HostValue;

/// Message used when a failure carries no text of its own.
const FALLBACK_MESSAGE: &str = "host function failed";

/// What a host callable raises.
#[derive(Debug, Clone, Error)]
pub enum HostError {
    /// An ordinary failure of the host function.
    #[error("{}", non_empty(.0))]
    Thrown(String),

    /// A boundary failure raised while serving the call.
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

fn non_empty(message: &str) -> &str {
    if message.is_empty() {
        FALLBACK_MESSAGE
    } else {
        message
    }
}

impl HostError {
    pub fn thrown(message: impl Into<String>) -> Self {
        Self::Thrown(message.into())
    }

    /// Fatal boundary failures terminate the call chain instead of being
    /// reported at the call site.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Bridge(err) if err.is_fatal())
    }

    /// The text placed in the exception slot. Never empty.
    pub fn message(&self) -> String {
        self.to_string()
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// CallContext
// ══════════════════════════════════════════════════════════════════════════════

/// What a host callable may touch while it runs: guest memory, for pointer
/// arguments, and guest exports, for synchronous callbacks.
pub struct CallContext<'v, 'g> {
    view: &'v mut MemoryView<'g>,
    binding: &'v str,
}

impl<'v, 'g> CallContext<'v, 'g> {
    pub fn new(view: &'v mut MemoryView<'g>, binding: &'v str) -> Self {
        Self { view, binding }
    }

    /// `module::path` of the import being served.
    pub fn binding(&self) -> &str {
        self.binding
    }

    pub fn memory(&mut self) -> &mut MemoryView<'g> {
        self.view
    }

    pub fn read_bytes(&self, addr: u32, len: u32) -> Result<Vec<u8>, HostError> {
        Ok(self.view.read_bytes(addr, len)?.to_vec())
    }

    pub fn write_bytes(&mut self, addr: u32, bytes: &[u8]) -> Result<(), HostError> {
        Ok(self.view.write_bytes(addr, bytes)?)
    }

    pub fn read_string(&self, addr: u32) -> Result<String, HostError> {
        Ok(self.view.read_string(addr)?)
    }

    /// Call an exported guest function. The guest may re-enter the engine.
    pub fn call_guest(&mut self, name: &str, args: &[i32]) -> Result<i32, HostError> {
        Ok(self.view.call_export(name, args)?)
    }
}

/// A host callable, invoked positionally with decoded arguments.
pub type HostFn =
    Rc<dyn Fn(&mut CallContext<'_, '_>, &[HostValue]) -> Result<HostValue, HostError>>;

// ══════════════════════════════════════════════════════════════════════════════
// ImportTable
// ══════════════════════════════════════════════════════════════════════════════

/// An entry of a capability table.
#[derive(Clone)]
pub enum ImportEntry {
    Function(HostFn),
    Table(ImportTable),
}

impl fmt::Debug for ImportEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Function(_) => write!(f, "Function"),
            Self::Table(table) => table.fmt(f),
        }
    }
}

/// Nested table of host capabilities, resolved by dotted path.
#[derive(Debug, Clone, Default)]
pub struct ImportTable {
    entries: BTreeMap<String, ImportEntry>,
}

impl ImportTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a callable.
    pub fn function<F>(mut self, name: &str, func: F) -> Self
    where
        F: Fn(&mut CallContext<'_, '_>, &[HostValue]) -> Result<HostValue, HostError> + 'static,
    {
        self.insert_function(name, Rc::new(func));
        self
    }

    /// Add a nested table.
    pub fn table(mut self, name: &str, table: ImportTable) -> Self {
        self.entries
            .insert(name.to_string(), ImportEntry::Table(table));
        self
    }

    pub fn insert_function(&mut self, name: &str, func: HostFn) {
        self.entries
            .insert(name.to_string(), ImportEntry::Function(func));
    }

    pub fn get(&self, name: &str) -> Option<&ImportEntry> {
        self.entries.get(name)
    }

    /// Resolve a dot-separated path: every segment but the last must name a
    /// nested table, and the last a callable.
    pub fn resolve(&self, path: &str) -> Option<HostFn> {
        let mut table = self;
        let mut segments = path.split('.').peekable();
        while let Some(segment) = segments.next() {
            let entry = table.entries.get(segment)?;
            match (entry, segments.peek().is_some()) {
                (ImportEntry::Table(nested), true) => table = nested,
                (ImportEntry::Function(func), false) => return Some(func.clone()),
                _ => return None,
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &mut CallContext<'_, '_>, _: &[HostValue]) -> Result<HostValue, HostError> {
        Ok(HostValue::Undefined)
    }

    #[test]
    fn test_resolve_nested_path() {
        let table = ImportTable::new()
            .function("top", noop)
            .table("Foo", ImportTable::new().function("Bar", noop));
        assert!(table.resolve("top").is_some());
        assert!(table.resolve("Foo.Bar").is_some());
        assert!(table.resolve("Foo.Missing").is_none());
        assert!(table.resolve("Foo").is_none(), "a table is not callable");
        assert!(table.resolve("top.x").is_none(), "a callable has no members");
        assert!(table.resolve("").is_none());
        assert!(table.resolve("Foo.").is_none());
    }

    #[test]
    fn test_error_message_never_empty() {
        assert_eq!(HostError::thrown("").message(), FALLBACK_MESSAGE);
        assert_eq!(HostError::thrown("boom").message(), "boom");
    }

    #[test]
    fn test_fatal_classification() {
        assert!(!HostError::thrown("boom").is_fatal());
        assert!(HostError::from(BridgeError::GuestTrap("unreachable".into())).is_fatal());
        assert!(!HostError::from(BridgeError::UnknownName(3)).is_fatal());
    }
}
