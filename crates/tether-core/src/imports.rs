//! Import binding table: dotted capability names to dense import indices.

use std::cell::Cell;
use std::rc::Rc;

use log::info;
use rustc_hash::FxHashMap;
use serde::Serialize;

use tether_types::{BridgeError, FunctionSpec, Result};

use crate::host::{HostFn, ImportTable};

/// A resolved host callable behind its signature.
pub struct BoundImport {
    pub index: i32,
    pub module: String,
    pub path: String,
    pub spec: FunctionSpec,
    /// `module::path`, used in diagnostics.
    pub label: String,
    func: HostFn,
    calls: Cell<u64>,
    failures: Cell<u64>,
}

impl BoundImport {
    pub fn func(&self) -> &HostFn {
        &self.func
    }

    pub(crate) fn record(&self, ok: bool) {
        self.calls.set(self.calls.get() + 1);
        if !ok {
            self.failures.set(self.failures.get() + 1);
        }
    }

    pub fn stats(&self) -> ImportStats {
        ImportStats {
            index: self.index,
            label: self.label.clone(),
            signature: self.spec.to_string(),
            calls: self.calls.get(),
            failures: self.failures.get(),
        }
    }
}

/// Call counters of one bound import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportStats {
    pub index: i32,
    pub label: String,
    pub signature: String,
    pub calls: u64,
    pub failures: u64,
}

/// Capability modules and the imports bound against them.
#[derive(Default)]
pub struct BindingTable {
    modules: FxHashMap<String, ImportTable>,
    bound: Vec<Rc<BoundImport>>,
    log_bindings: bool,
}

impl BindingTable {
    pub fn new(log_bindings: bool) -> Self {
        Self {
            log_bindings,
            ..Self::default()
        }
    }

    /// Publish a capability module, replacing any module of the same name.
    pub fn register_module(&mut self, name: &str, table: ImportTable) {
        self.modules.insert(name.to_string(), table);
    }

    pub fn has_module(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// Resolve `module`/`path` and assign the next import index.
    pub fn bind(&mut self, module: &str, path: &str, spec: FunctionSpec) -> Result<i32> {
        spec.validate()?;
        let func = self
            .modules
            .get(module)
            .and_then(|table| table.resolve(path))
            .ok_or_else(|| BridgeError::UnresolvedImport {
                module: module.to_string(),
                path: path.to_string(),
            })?;
        let index = self.bound.len() as i32;
        if self.log_bindings {
            info!("bound import {index}: {spec} {module}::{path}");
        }
        self.bound.push(Rc::new(BoundImport {
            index,
            module: module.to_string(),
            path: path.to_string(),
            label: format!("{module}::{path}"),
            spec,
            func,
            calls: Cell::new(0),
            failures: Cell::new(0),
        }));
        Ok(index)
    }

    /// A bound import by index.
    pub fn get(&self, index: i32) -> Result<Rc<BoundImport>> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.bound.get(i))
            .cloned()
            .ok_or(BridgeError::InvalidImportIndex {
                index,
                bound: self.bound.len(),
            })
    }

    /// Number of bound imports.
    pub fn len(&self) -> usize {
        self.bound.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bound.is_empty()
    }

    pub fn stats(&self) -> Vec<ImportStats> {
        self.bound.iter().map(|import| import.stats()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::HostValue;
    use tether_types::{ParamSpec, ValueKind};

    fn table() -> BindingTable {
        let mut bindings = BindingTable::new(false);
        bindings.register_module(
            "modA",
            ImportTable::new().table(
                "Foo",
                ImportTable::new().function("Bar", |_, _| Ok(HostValue::from(1))),
            ),
        );
        bindings
    }

    fn spec() -> FunctionSpec {
        FunctionSpec::new(ParamSpec::new(ValueKind::I32), vec![]).unwrap()
    }

    #[test]
    fn test_bind_assigns_dense_indices() {
        let mut bindings = table();
        assert_eq!(bindings.bind("modA", "Foo.Bar", spec()).unwrap(), 0);
        assert_eq!(bindings.bind("modA", "Foo.Bar", spec()).unwrap(), 1);
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings.get(1).unwrap().label, "modA::Foo.Bar");
    }

    #[test]
    fn test_unresolved_import() {
        let mut bindings = table();
        let err = bindings.bind("modA", "Foo.Missing", spec()).unwrap_err();
        assert!(matches!(
            err,
            BridgeError::UnresolvedImport { ref path, .. } if path == "Foo.Missing"
        ));
        assert!(bindings.bind("modB", "Foo.Bar", spec()).is_err());
        assert!(bindings.is_empty(), "failed binds take no index");
    }

    #[test]
    fn test_invalid_index() {
        let mut bindings = table();
        bindings.bind("modA", "Foo.Bar", spec()).unwrap();
        assert!(bindings.get(0).is_ok());
        let err = bindings.get(1).err().unwrap();
        assert!(matches!(err, BridgeError::InvalidImportIndex { index: 1, bound: 1 }));
        assert!(err.is_fatal());
        assert!(bindings.get(-1).is_err());
    }

    #[test]
    fn test_stats_count_calls() {
        let mut bindings = table();
        bindings.bind("modA", "Foo.Bar", spec()).unwrap();
        let import = bindings.get(0).unwrap();
        import.record(true);
        import.record(false);
        let stats = &bindings.stats()[0];
        assert_eq!((stats.calls, stats.failures), (2, 1));
        assert_eq!(stats.signature, "i32 ()");
    }
}
