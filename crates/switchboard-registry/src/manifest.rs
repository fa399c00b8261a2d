//! The serializable operation table produced by the build step.
//!
//! A [`Manifest`] maps keys to the module files that implement them. It uses
//! ordered maps throughout, so serializing the same module set always yields
//! the same bytes.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use switchboard_core::OperationKey;

use crate::discovery::{Discovered, ModuleRole};
use crate::errors::{RegistryError, Result};

/// An `api` entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiEntry {
    /// Module file, relative to the project root.
    pub module: String,
}

/// A `sync` entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncEntry {
    /// Client pre-filter module, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
    /// Server handler module.
    pub server: String,
}

/// Build-time operation table.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// `api` keys.
    pub apis: BTreeMap<String, ApiEntry>,
    /// `sync` keys.
    pub syncs: BTreeMap<String, SyncEntry>,
    /// Function modules, merged into one namespace at runtime.
    pub functions: Vec<String>,
}

impl Manifest {
    /// Every key in the table, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<&str> {
        self.apis
            .keys()
            .chain(self.syncs.keys())
            .map(String::as_str)
            .collect()
    }

    /// Pretty JSON with a trailing newline.
    pub fn to_json(&self) -> Result<String> {
        let mut out = serde_json::to_string_pretty(self)?;
        out.push('\n');
        Ok(out)
    }

    /// Parse a manifest produced by [`to_json`](Self::to_json).
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Render the Rust registration module.
    ///
    /// `module_dir` is the directory the generated file will live in, relative
    /// to the project root; `#[path]` attributes are emitted relative to it.
    ///
    /// Handler modules must export:
    /// - api: `Operation`
    /// - sync server: `ServerOperation`
    /// - sync client: `ClientFilter`
    /// - function module: `fn register_functions(&mut FunctionNamespace) -> Result<(), RegistryError>`
    #[must_use]
    pub fn render_module(&self, module_dir: &str) -> String {
        let mut mods = String::new();
        let mut body = String::new();

        for (index, (key, entry)) in self.apis.iter().enumerate() {
            let ident = format!("api_{index}");
            push_mod(&mut mods, module_dir, &entry.module, &ident);
            let _ = writeln!(body, "    builder.api({key:?}, {ident}::Operation)?;");
        }

        for (index, (key, entry)) in self.syncs.iter().enumerate() {
            let server = format!("sync_server_{index}");
            push_mod(&mut mods, module_dir, &entry.server, &server);
            let _ = writeln!(body, "    builder.sync_server({key:?}, {server}::ServerOperation)?;");
            if let Some(client) = &entry.client {
                let ident = format!("sync_client_{index}");
                push_mod(&mut mods, module_dir, client, &ident);
                let _ = writeln!(body, "    builder.sync_client({key:?}, {ident}::ClientFilter)?;");
            }
        }

        for (index, module) in self.functions.iter().enumerate() {
            let ident = format!("functions_{index}");
            push_mod(&mut mods, module_dir, module, &ident);
            let _ = writeln!(body, "    {ident}::register_functions(builder.functions_mut())?;");
        }

        format!(
            "// @generated by `switchboard generate`. Do not edit.\n\
             \n\
             {mods}\n\
             /// Register every discovered handler and function module.\n\
             pub fn register(\n    \
                 builder: &mut switchboard_registry::RouteTableBuilder,\n\
             ) -> Result<(), switchboard_registry::RegistryError> {{\n\
             {body}    Ok(())\n\
             }}\n"
        )
    }
}

fn push_mod(out: &mut String, module_dir: &str, module: &str, ident: &str) {
    let path = relative_path(module_dir, module);
    let _ = writeln!(out, "#[path = {path:?}]\nmod {ident};");
}

/// Path of `to` as seen from directory `from_dir`; both are `/`-separated and
/// relative to the same root.
#[must_use]
pub fn relative_path(from_dir: &str, to: &str) -> String {
    let from: Vec<&str> = from_dir.split('/').filter(|s| !s.is_empty() && *s != ".").collect();
    let target: Vec<&str> = to.split('/').filter(|s| !s.is_empty() && *s != ".").collect();
    let common = from.iter().zip(&target).take_while(|(a, b)| a == b).count();
    let mut parts: Vec<&str> = vec![".."; from.len() - common];
    parts.extend_from_slice(&target[common..]);
    parts.join("/")
}

/// Accumulates discovered modules into a [`Manifest`], enforcing uniqueness.
#[derive(Debug, Default)]
pub struct ManifestBuilder {
    apis: BTreeMap<String, ApiEntry>,
    clients: BTreeMap<String, String>,
    servers: BTreeMap<String, String>,
    functions: Vec<String>,
}

impl ManifestBuilder {
    /// Empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a classified handler module found at `module`.
    pub fn add(&mut self, found: &Discovered, module: String) -> Result<()> {
        let key = found.key.to_string();
        let slot = match found.role {
            ModuleRole::Api => {
                if self.apis.contains_key(&key) {
                    return Err(RegistryError::DuplicateKey(key));
                }
                let _ = self.apis.insert(key, ApiEntry { module });
                return Ok(());
            }
            ModuleRole::SyncClient => &mut self.clients,
            ModuleRole::SyncServer => &mut self.servers,
        };
        if slot.contains_key(&key) {
            return Err(RegistryError::DuplicateKey(key));
        }
        let _ = slot.insert(key, module);
        Ok(())
    }

    /// Record a function module.
    pub fn add_function(&mut self, module: String) {
        self.functions.push(module);
    }

    /// Pair sync modules and produce the manifest.
    pub fn finish(self) -> Result<Manifest> {
        let mut clients = self.clients;
        let mut syncs = BTreeMap::new();
        for (key, server) in self.servers {
            let client = clients.remove(&key);
            let _ = syncs.insert(key, SyncEntry { client, server });
        }
        if let Some(orphan) = clients.into_keys().next() {
            return Err(RegistryError::MissingSyncServer(orphan));
        }
        let mut functions = self.functions;
        functions.sort();
        Ok(Manifest {
            apis: self.apis,
            syncs,
            functions,
        })
    }
}

/// Keys present in the manifest, parsed. Used when verifying a route table.
pub(crate) fn parsed_keys(manifest: &Manifest) -> Result<Vec<OperationKey>> {
    manifest
        .keys()
        .into_iter()
        .map(|k| k.parse::<OperationKey>().map_err(RegistryError::from))
        .collect()
}
