//! ABOUTME: Manifest bootstrap for populating the registry at startup
//! ABOUTME: Maps declared import paths onto already-linked factories

use crate::error::{FloeError, Result};
use crate::registry::{ComponentFactory, ComponentKind, ComponentRegistry};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable holding comma-separated manifest locations.
pub const MANIFEST_PATHS_ENV: &str = "FLOE_MANIFEST_PATHS";

/// A component manifest file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComponentManifest {
    pub schema_version: String,
    pub components: Vec<ManifestEntry>,
}

/// One declared component.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManifestEntry {
    pub kind: ComponentKind,
    pub name: String,
    pub import_path: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// Catalog of linked factories keyed by the import path manifests declare.
///
/// Manifests never load code: an `import_path` is only a lookup key into
/// this catalog, which the host assembles from symbols already linked into
/// the process (or from a bounded plug-in loader of its own).
#[derive(Debug, Default)]
pub struct FactoryCatalog {
    entries: HashMap<String, ComponentFactory>,
}

impl FactoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, import_path: impl Into<String>, factory: ComponentFactory) {
        self.entries.insert(import_path.into(), factory);
    }

    pub fn get(&self, import_path: &str) -> Option<&ComponentFactory> {
        self.entries.get(import_path)
    }
}

/// Manifest locations from `FLOE_MANIFEST_PATHS`, empty when unset.
pub fn manifest_paths_from_env() -> Vec<PathBuf> {
    std::env::var(MANIFEST_PATHS_ENV)
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .collect()
        })
        .unwrap_or_default()
}

/// Read and parse a single manifest file.
pub fn load_manifest_file(path: &Path) -> Result<ComponentManifest> {
    let raw = std::fs::read_to_string(path).map_err(|e| FloeError::Internal {
        message: format!("reading manifest {}: {e}", path.display()),
    })?;
    serde_json::from_str(&raw).map_err(|e| FloeError::Internal {
        message: format!("parsing manifest {}: {e}", path.display()),
    })
}

/// Load every manifest and register its components; returns how many entries
/// were processed.
///
/// Safe under concurrent invocation: catalog lookups hand out the same
/// factory allocation, so duplicate registrations hit the registry's
/// idempotent path. An entry whose declared kind disagrees with the catalog
/// factory fails `CapabilityMismatch`; an unknown import path fails
/// `NotFound`.
pub fn load_manifests(
    registry: &ComponentRegistry,
    catalog: &FactoryCatalog,
    paths: &[PathBuf],
) -> Result<usize> {
    let mut registered = 0;
    for path in paths {
        let manifest = load_manifest_file(path)?;
        debug!(path = %path.display(), components = manifest.components.len(), "loading manifest");
        for entry in &manifest.components {
            let factory = catalog.get(&entry.import_path).ok_or_else(|| FloeError::NotFound {
                kind: entry.kind,
                name: entry.import_path.clone(),
            })?;
            if factory.kind() != entry.kind {
                return Err(FloeError::CapabilityMismatch {
                    name: entry.name.clone(),
                    message: format!(
                        "manifest declares {}, catalog factory is {}",
                        entry.kind,
                        factory.kind()
                    ),
                });
            }
            registry.register(entry.name.clone(), factory.clone())?;
            registered += 1;
        }
    }
    info!(registered, manifests = paths.len(), "manifest bootstrap complete");
    Ok(registered)
}
