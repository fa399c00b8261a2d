//! Runtime route table.
//!
//! A [`RouteTable`] is built once through [`RouteTableBuilder`] (usually by the
//! generated `register` function) and is immutable afterwards. Reloading means
//! building a new table and swapping it in.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use switchboard_core::{AuthPolicy, OperationKey, OperationKind};
use tracing::debug;

use crate::errors::{RegistryError, Result};
use crate::functions::FunctionNamespace;
use crate::handler::{OperationHandler, SyncFilter};
use crate::manifest::{Manifest, parsed_keys};

/// A resolved server-side operation.
#[derive(Clone)]
pub struct Route {
    /// Key it is registered under.
    pub key: OperationKey,
    /// Policy, captured once at registration.
    pub auth: AuthPolicy,
    /// Handler.
    pub handler: Arc<dyn OperationHandler>,
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("key", &self.key)
            .field("auth", &self.auth)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
struct SyncRoute {
    server: Route,
    filter: Option<Arc<dyn SyncFilter>>,
}

/// Immutable key → descriptor table.
#[derive(Clone, Default)]
pub struct RouteTable {
    apis: HashMap<String, Route>,
    syncs: HashMap<String, SyncRoute>,
    functions: Arc<FunctionNamespace>,
}

impl RouteTable {
    /// Start building a table.
    #[must_use]
    pub fn builder() -> RouteTableBuilder {
        RouteTableBuilder::default()
    }

    /// Server-side descriptor for `key` within `kind`.
    #[must_use]
    pub fn resolve(&self, kind: OperationKind, key: &str) -> Option<&Route> {
        match kind {
            OperationKind::Api => self.apis.get(key),
            OperationKind::Sync => self.syncs.get(key).map(|s| &s.server),
        }
    }

    /// Client pre-filter of a sync key, if one was registered.
    #[must_use]
    pub fn sync_filter(&self, key: &str) -> Option<Arc<dyn SyncFilter>> {
        self.syncs.get(key).and_then(|s| s.filter.clone())
    }

    /// Shared function namespace.
    #[must_use]
    pub fn functions(&self) -> &Arc<FunctionNamespace> {
        &self.functions
    }

    /// All keys, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self
            .apis
            .keys()
            .chain(self.syncs.keys())
            .map(String::as_str)
            .collect();
        keys.sort_unstable();
        keys
    }

    /// Number of operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.apis.len() + self.syncs.len()
    }

    /// Whether the table has no operations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteTable")
            .field("keys", &self.keys())
            .field("functions", &self.functions)
            .finish()
    }
}

/// Collects handlers and produces a [`RouteTable`].
#[derive(Default)]
pub struct RouteTableBuilder {
    apis: BTreeMap<String, Route>,
    servers: BTreeMap<String, Route>,
    filters: BTreeMap<String, Arc<dyn SyncFilter>>,
    functions: FunctionNamespace,
}

impl RouteTableBuilder {
    /// Register an `api` handler.
    pub fn api(&mut self, key: &str, handler: impl OperationHandler + 'static) -> Result<()> {
        let route = route(key, OperationKind::Api, Arc::new(handler))?;
        insert_unique(&mut self.apis, route.key.to_string(), route)
    }

    /// Register the server half of a sync pair.
    pub fn sync_server(&mut self, key: &str, handler: impl OperationHandler + 'static) -> Result<()> {
        let route = route(key, OperationKind::Sync, Arc::new(handler))?;
        insert_unique(&mut self.servers, route.key.to_string(), route)
    }

    /// Register the client pre-filter of a sync pair.
    pub fn sync_client(&mut self, key: &str, filter: impl SyncFilter + 'static) -> Result<()> {
        let key = checked_key(key, OperationKind::Sync)?;
        let filter: Arc<dyn SyncFilter> = Arc::new(filter);
        insert_unique(&mut self.filters, key.to_string(), filter)
    }

    /// Namespace that function modules register into.
    pub fn functions_mut(&mut self) -> &mut FunctionNamespace {
        &mut self.functions
    }

    /// Finish. Every client filter must have a server half.
    pub fn build(self) -> Result<RouteTable> {
        let mut filters = self.filters;
        let syncs: HashMap<String, SyncRoute> = self
            .servers
            .into_iter()
            .map(|(key, server)| {
                let filter = filters.remove(&key);
                (key, SyncRoute { server, filter })
            })
            .collect();
        if let Some(orphan) = filters.into_keys().next() {
            return Err(RegistryError::MissingSyncServer(orphan));
        }
        let table = RouteTable {
            apis: self.apis.into_iter().collect(),
            syncs,
            functions: Arc::new(self.functions),
        };
        debug!(operations = table.len(), functions = table.functions.len(), "route table built");
        Ok(table)
    }

    /// [`build`](Self::build), then check the key set equals `manifest`'s.
    pub fn build_verified(self, manifest: &Manifest) -> Result<RouteTable> {
        let table = self.build()?;
        let expected: Vec<String> = parsed_keys(manifest)?.into_iter().map(String::from).collect();
        let actual = table.keys();
        let missing: Vec<String> = expected
            .iter()
            .filter(|k| !actual.contains(&k.as_str()))
            .cloned()
            .collect();
        let unexpected: Vec<String> = actual
            .iter()
            .filter(|k| !expected.iter().any(|e| e == *k))
            .map(|k| (*k).to_owned())
            .collect();
        if missing.is_empty() && unexpected.is_empty() {
            Ok(table)
        } else {
            Err(RegistryError::ManifestMismatch { missing, unexpected })
        }
    }
}

fn checked_key(key: &str, expected: OperationKind) -> Result<OperationKey> {
    let key: OperationKey = key.parse()?;
    if key.kind() != expected {
        return Err(RegistryError::WrongKind {
            key: key.to_string(),
            expected,
        });
    }
    Ok(key)
}

fn route(key: &str, kind: OperationKind, handler: Arc<dyn OperationHandler>) -> Result<Route> {
    let key = checked_key(key, kind)?;
    let auth = handler.auth();
    Ok(Route { key, auth, handler })
}

fn insert_unique<V>(map: &mut BTreeMap<String, V>, key: String, value: V) -> Result<()> {
    if map.contains_key(&key) {
        return Err(RegistryError::DuplicateKey(key));
    }
    let _ = map.insert(key, value);
    Ok(())
}
