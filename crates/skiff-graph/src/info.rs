//! The guarded module-info view handed to plugins.
//!
//! Dev mode backs only a small subset of the full bundler module-info
//! contract. The supported keys are plain struct fields; everything else goes
//! through [`ModuleInfo::property`], which fails loudly so plugin authors
//! notice they are relying on bundle-time data. The one exception is `then`:
//! it reads as absent, which keeps the view from being mistaken for a
//! promise-like object by code that awaits it.

use serde_json::{json, Value};
use skiff_common::{Error, MetaMap, Result};

use crate::node::ModuleNode;

/// Snapshot view of a [`ModuleNode`] exposed to plugins.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleInfo {
    pub id: String,
    pub is_entry: bool,
    pub importers: Vec<String>,
    pub meta: MetaMap,
}

impl ModuleInfo {
    /// Build the view from a node. Returns `None` until the node has been
    /// resolved to an id.
    pub fn from_node(node: &ModuleNode) -> Option<Self> {
        let id = node.id.clone()?;
        let mut importers: Vec<String> = node.importers.iter().cloned().collect();
        importers.sort();
        Some(Self {
            id,
            is_entry: node.is_entry,
            importers,
            meta: node.meta.clone(),
        })
    }

    /// Dynamic accessor with the dev-mode guard semantics.
    ///
    /// Supported keys return their value; `then` returns `Ok(None)`; any
    /// other key is a hard error naming the field.
    pub fn property(&self, key: &str) -> Result<Option<Value>> {
        match key {
            "id" => Ok(Some(json!(self.id))),
            "isEntry" => Ok(Some(json!(self.is_entry))),
            "importers" => Ok(Some(json!(self.importers))),
            "meta" => Ok(Some(Value::Object(self.meta.clone()))),
            "then" => Ok(None),
            other => Err(Error::UnsupportedModuleInfoField(other.to_string())),
        }
    }
}
