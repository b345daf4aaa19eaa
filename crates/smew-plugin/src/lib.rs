//! Process-wide registry of user-defined predicate and aggregate plugins.
//!
//! Plugins extend query evaluation with custom predicates (row filters) and
//! aggregates. They are either registered in-process through [`PluginRegistry::add`]
//! or loaded from a dynamic library through [`PluginRegistry::import`], which
//! resolves the exported factory symbol `plugin_descriptor` and registers
//! whatever it returns.
//!
//! The registry is append-only for the process lifetime: descriptors stay in
//! the name map until process teardown, and library handles are deliberately
//! retained — closing them earlier would invalidate still-held function
//! pointers — until [`PluginRegistry::cleanup`] releases them at shutdown.
//!
//! Two mutexes guard the registry-wide state: one for the handle list, one
//! for the name → descriptor map. `import` takes them in that order and
//! never both at once.

use std::any::Any;
use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

use libloading::Library;
use parking_lot::Mutex;
use smew_error::{Result, SmewError};
use tracing::warn;

// ---------------------------------------------------------------------------
// Descriptor
// ---------------------------------------------------------------------------

/// Plugin kind: a row predicate. See [`PluginDescriptor::kind`].
pub const PLUGIN_PREDICATE: u32 = 1;

/// Plugin kind: an aggregate. See [`PluginDescriptor::kind`].
pub const PLUGIN_AGGREGATE: u32 = 2;

/// Per-query state a plugin threads through its callbacks.
///
/// Type-erased so the registry can hold arbitrary plugin state machines.
pub type PluginState = Box<dyn Any + Send>;

/// Result produced by an aggregate (or a stateful predicate) at the end of
/// a query.
#[derive(Debug, Clone, PartialEq)]
pub enum PluginResult {
    /// An unsigned integral result (counts, sums of integers).
    Unsigned(u64),
    /// A floating-point result (averages and friends).
    Double(f64),
    /// An opaque byte result.
    Bytes(Vec<u8>),
}

/// Allocate the per-query state for one plugin invocation.
pub type PluginInitFn = fn() -> PluginState;

/// Produce the final result from the per-query state.
pub type PluginResultFn = fn(&mut PluginState) -> PluginResult;

/// Decide whether a `(key, record)` pair passes the predicate.
pub type PredicateFn = fn(&mut PluginState, key: &[u8], record: &[u8]) -> bool;

/// Fold a single `(key, record)` pair into the aggregate state.
pub type AggSingleFn = fn(&mut PluginState, key: &[u8], record: &[u8]);

/// Fold a batch of pairs into the aggregate state.
pub type AggManyFn = fn(&mut PluginState, keys: &[&[u8]], records: &[&[u8]]);

/// Descriptor of one user-defined plugin.
///
/// `kind` is a raw discriminant rather than an enum because descriptors
/// arrive from dynamic libraries and must survive unknown values long
/// enough for [`PluginRegistry::add`] to reject them.
#[derive(Debug, Clone, PartialEq)]
pub struct PluginDescriptor {
    /// Unique registry key.
    pub name: String,
    /// Descriptor layout version; only version 0 is accepted.
    pub plugin_version: u32,
    /// [`PLUGIN_PREDICATE`] or [`PLUGIN_AGGREGATE`].
    pub kind: u32,
    /// Optional per-query state constructor.
    pub init: Option<PluginInitFn>,
    /// Optional result extractor.
    pub results: Option<PluginResultFn>,
    /// Predicate callback; required for predicate plugins.
    pub pred: Option<PredicateFn>,
    /// Single-pair fold; required for aggregate plugins.
    pub agg_single: Option<AggSingleFn>,
    /// Batched fold; required for aggregate plugins.
    pub agg_many: Option<AggManyFn>,
}

/// Factory signature exported by plugin libraries under the literal symbol
/// name `plugin_descriptor`. Receives the requested plugin name and returns
/// its descriptor, or `None` when the library does not provide it.
pub type PluginFactoryFn = fn(&str) -> Option<PluginDescriptor>;

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

static LIBRARIES: Mutex<Vec<Library>> = Mutex::new(Vec::new());

static PLUGINS: LazyLock<Mutex<HashMap<String, PluginDescriptor>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// The process-wide plugin registry.
pub struct PluginRegistry;

impl PluginRegistry {
    /// Load `library`, resolve its `plugin_descriptor` factory, and register
    /// the descriptor it returns for `plugin_name`.
    ///
    /// The library handle is retained for [`Self::cleanup`]. Every failure —
    /// library open, symbol lookup, the factory returning nothing, or
    /// registration rejection — collapses to `PluginNotFound`, with the
    /// concrete cause logged here.
    pub fn import(library: impl AsRef<Path>, plugin_name: &str) -> Result<()> {
        let path = library.as_ref();

        let lib = match unsafe { Library::new(path) } {
            Ok(lib) => lib,
            Err(e) => {
                warn!(library = %path.display(), error = %e, "failed to open plugin library");
                return Err(SmewError::plugin_not_found(plugin_name));
            }
        };

        // The handle is retained as soon as the open succeeds, before any
        // symbol resolution, and stays retained on every failure path until
        // cleanup closes it.
        let factory: PluginFactoryFn = {
            let mut handles = LIBRARIES.lock();
            handles.push(lib);
            let lib = handles.last().expect("handle just pushed");
            match unsafe { lib.get::<PluginFactoryFn>(b"plugin_descriptor") } {
                Ok(symbol) => *symbol,
                Err(e) => {
                    warn!(
                        library = %path.display(),
                        error = %e,
                        "failed to resolve plugin_descriptor symbol"
                    );
                    return Err(SmewError::plugin_not_found(plugin_name));
                }
            }
        };

        let Some(descriptor) = factory(plugin_name) else {
            warn!(
                library = %path.display(),
                plugin = plugin_name,
                "library does not provide the requested plugin"
            );
            return Err(SmewError::plugin_not_found(plugin_name));
        };

        Self::add(descriptor)
    }

    /// Validate and register `plugin` under its name.
    ///
    /// Rejects unknown kinds, a nonzero version, and missing required
    /// callbacks — all as `PluginNotFound`. Registering a name twice keeps
    /// the first descriptor.
    pub fn add(plugin: PluginDescriptor) -> Result<()> {
        if plugin.plugin_version != 0 {
            warn!(
                plugin = %plugin.name,
                version = plugin.plugin_version,
                "rejecting plugin: unsupported descriptor version"
            );
            return Err(SmewError::plugin_not_found(plugin.name));
        }

        match plugin.kind {
            PLUGIN_PREDICATE => {
                if plugin.pred.is_none() {
                    warn!(plugin = %plugin.name, "rejecting predicate plugin without pred callback");
                    return Err(SmewError::plugin_not_found(plugin.name));
                }
            }
            PLUGIN_AGGREGATE => {
                if plugin.agg_single.is_none() {
                    warn!(plugin = %plugin.name, "rejecting aggregate plugin without agg_single callback");
                    return Err(SmewError::plugin_not_found(plugin.name));
                }
                if plugin.agg_many.is_none() {
                    warn!(plugin = %plugin.name, "rejecting aggregate plugin without agg_many callback");
                    return Err(SmewError::plugin_not_found(plugin.name));
                }
            }
            kind => {
                warn!(plugin = %plugin.name, kind, "rejecting plugin of unknown kind");
                return Err(SmewError::plugin_not_found(plugin.name));
            }
        }

        let mut plugins = PLUGINS.lock();
        plugins.entry(plugin.name.clone()).or_insert(plugin);
        Ok(())
    }

    /// Whether a plugin is registered under `name`.
    #[must_use]
    pub fn is_registered(name: &str) -> bool {
        Self::get(name).is_some()
    }

    /// The descriptor registered under `name`, by value.
    #[must_use]
    pub fn get(name: &str) -> Option<PluginDescriptor> {
        PLUGINS.lock().get(name).cloned()
    }

    /// Build a predicate descriptor. No registry side effects.
    #[must_use]
    pub fn predicate(
        name: &str,
        init: Option<PluginInitFn>,
        pred: PredicateFn,
        results: Option<PluginResultFn>,
    ) -> PluginDescriptor {
        PluginDescriptor {
            name: name.to_owned(),
            plugin_version: 0,
            kind: PLUGIN_PREDICATE,
            init,
            results,
            pred: Some(pred),
            agg_single: None,
            agg_many: None,
        }
    }

    /// Build an aggregate descriptor. No registry side effects.
    #[must_use]
    pub fn aggregate(
        name: &str,
        init: Option<PluginInitFn>,
        agg_single: AggSingleFn,
        agg_many: AggManyFn,
        results: Option<PluginResultFn>,
    ) -> PluginDescriptor {
        PluginDescriptor {
            name: name.to_owned(),
            plugin_version: 0,
            kind: PLUGIN_AGGREGATE,
            init,
            results,
            pred: None,
            agg_single: Some(agg_single),
            agg_many: Some(agg_many),
        }
    }

    /// Close and release every retained library handle.
    ///
    /// The name → descriptor map is left alone; it lives until process
    /// teardown.
    pub fn cleanup() {
        LIBRARIES.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count_state() -> PluginState {
        Box::new(0u64)
    }

    fn count_single(state: &mut PluginState, _key: &[u8], _record: &[u8]) {
        *state.downcast_mut::<u64>().expect("count state") += 1;
    }

    fn count_many(state: &mut PluginState, keys: &[&[u8]], _records: &[&[u8]]) {
        *state.downcast_mut::<u64>().expect("count state") += keys.len() as u64;
    }

    fn count_results(state: &mut PluginState) -> PluginResult {
        PluginResult::Unsigned(*state.downcast_ref::<u64>().expect("count state"))
    }

    fn shorter_than_four(_state: &mut PluginState, _key: &[u8], record: &[u8]) -> bool {
        record.len() < 4
    }

    #[test]
    fn add_rejects_nonzero_version() {
        let mut plugin = PluginRegistry::aggregate(
            "version-probe",
            Some(count_state),
            count_single,
            count_many,
            Some(count_results),
        );
        plugin.plugin_version = 1;
        assert!(matches!(
            PluginRegistry::add(plugin),
            Err(SmewError::PluginNotFound { .. })
        ));
        assert!(!PluginRegistry::is_registered("version-probe"));
    }

    #[test]
    fn add_rejects_aggregate_missing_callbacks() {
        let mut plugin = PluginRegistry::aggregate(
            "lame-aggregate",
            None,
            count_single,
            count_many,
            None,
        );
        plugin.agg_many = None;
        assert!(matches!(
            PluginRegistry::add(plugin),
            Err(SmewError::PluginNotFound { .. })
        ));

        let mut plugin =
            PluginRegistry::aggregate("lame-aggregate", None, count_single, count_many, None);
        plugin.agg_single = None;
        assert!(PluginRegistry::add(plugin).is_err());
        assert!(!PluginRegistry::is_registered("lame-aggregate"));
    }

    #[test]
    fn add_rejects_predicate_missing_pred() {
        let mut plugin = PluginRegistry::predicate("lame-predicate", None, shorter_than_four, None);
        plugin.pred = None;
        assert!(matches!(
            PluginRegistry::add(plugin),
            Err(SmewError::PluginNotFound { .. })
        ));
    }

    #[test]
    fn add_rejects_unknown_kind() {
        let mut plugin = PluginRegistry::predicate("odd-kind", None, shorter_than_four, None);
        plugin.kind = 77;
        assert!(matches!(
            PluginRegistry::add(plugin),
            Err(SmewError::PluginNotFound { .. })
        ));
    }

    #[test]
    fn add_then_lookup_round_trips_by_value() {
        let plugin = PluginRegistry::aggregate(
            "row-count",
            Some(count_state),
            count_single,
            count_many,
            Some(count_results),
        );
        PluginRegistry::add(plugin.clone()).unwrap();
        assert!(PluginRegistry::is_registered("row-count"));
        assert_eq!(PluginRegistry::get("row-count"), Some(plugin));
    }

    #[test]
    fn duplicate_name_keeps_first_registration() {
        let first = PluginRegistry::predicate("keep-first", None, shorter_than_four, None);
        PluginRegistry::add(first.clone()).unwrap();

        let second = PluginRegistry::aggregate(
            "keep-first",
            Some(count_state),
            count_single,
            count_many,
            Some(count_results),
        );
        PluginRegistry::add(second).unwrap();

        let registered = PluginRegistry::get("keep-first").unwrap();
        assert_eq!(registered, first);
        assert_eq!(registered.kind, PLUGIN_PREDICATE);
    }

    #[test]
    fn registered_aggregate_is_usable() {
        let plugin = PluginRegistry::aggregate(
            "usable-count",
            Some(count_state),
            count_single,
            count_many,
            Some(count_results),
        );
        PluginRegistry::add(plugin).unwrap();

        let plugin = PluginRegistry::get("usable-count").unwrap();
        let mut state = plugin.init.unwrap()();
        plugin.agg_single.unwrap()(&mut state, b"k1", b"v1");
        plugin.agg_many.unwrap()(&mut state, &[b"k2", b"k3"], &[b"v2", b"v3"]);
        assert_eq!(
            plugin.results.unwrap()(&mut state),
            PluginResult::Unsigned(3)
        );
    }

    #[test]
    fn registered_predicate_is_usable() {
        let plugin = PluginRegistry::predicate("short-records", None, shorter_than_four, None);
        PluginRegistry::add(plugin).unwrap();

        let plugin = PluginRegistry::get("short-records").unwrap();
        let mut state: PluginState = Box::new(());
        assert!(plugin.pred.unwrap()(&mut state, b"k", b"abc"));
        assert!(!plugin.pred.unwrap()(&mut state, b"k", b"abcd"));
    }

    #[test]
    fn import_missing_library_reports_plugin_not_found() {
        let err = PluginRegistry::import("/nonexistent/libsmew_nothing.so", "ghost").unwrap_err();
        assert!(matches!(err, SmewError::PluginNotFound { name } if name == "ghost"));
        assert!(!PluginRegistry::is_registered("ghost"));
    }

    #[test]
    fn cleanup_without_handles_is_harmless() {
        PluginRegistry::cleanup();
        PluginRegistry::cleanup();
    }

    #[test]
    fn registry_is_concurrency_safe() {
        let handles: Vec<_> = (0..8)
            .map(|i| {
                std::thread::spawn(move || {
                    let name = format!("threaded-{}", i % 2);
                    let plugin =
                        PluginRegistry::predicate(&name, None, shorter_than_four, None);
                    PluginRegistry::add(plugin).unwrap();
                    assert!(PluginRegistry::is_registered(&name));
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(PluginRegistry::is_registered("threaded-0"));
        assert!(PluginRegistry::is_registered("threaded-1"));
    }
}
