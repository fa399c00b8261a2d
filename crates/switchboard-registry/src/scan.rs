//! Filesystem traversal feeding [`ManifestBuilder`].

use std::path::Path;

use tracing::{debug, info};
use walkdir::WalkDir;

use crate::discovery::{classify, is_function_module, normalize};
use crate::errors::{RegistryError, Result};
use crate::manifest::{Manifest, ManifestBuilder};

/// Where to look, relative to a project root.
#[derive(Clone, Debug)]
pub struct ScanOptions {
    /// Directory searched recursively for `_api` / `_sync` modules.
    pub source_dir: String,
    /// Directory whose `.rs` files (non-recursive) are function modules.
    pub functions_dir: String,
}

/// Walk `root` and build the manifest.
///
/// Files are visited in sorted order so the result does not depend on
/// directory iteration order.
pub fn scan(root: &Path, options: &ScanOptions) -> Result<Manifest> {
    let mut builder = ManifestBuilder::new();
    let source = root.join(&options.source_dir);

    if source.is_dir() {
        for entry in WalkDir::new(&source).sort_by_file_name() {
            let entry = entry.map_err(|source_err| RegistryError::Walk {
                path: source.clone(),
                source: source_err,
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&source) else {
                continue;
            };
            let relative = normalize(&relative.to_string_lossy());
            if let Some(found) = classify(&relative)? {
                debug!(key = %found.key, role = ?found.role, module = %relative, "discovered handler");
                let module = join(&options.source_dir, &relative);
                builder.add(&found, module)?;
            }
        }
    }

    let functions = root.join(&options.functions_dir);
    if functions.is_dir() {
        for entry in WalkDir::new(&functions)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|source_err| RegistryError::Walk {
                path: functions.clone(),
                source: source_err,
            })?;
            let name = entry.file_name().to_string_lossy();
            if entry.file_type().is_file() && is_function_module(&name) {
                builder.add_function(join(&options.functions_dir, &name));
            }
        }
    }

    let manifest = builder.finish()?;
    info!(
        apis = manifest.apis.len(),
        syncs = manifest.syncs.len(),
        functions = manifest.functions.len(),
        "handler scan complete"
    );
    Ok(manifest)
}

/// Write the JSON manifest and Rust module under `root`.
///
/// Files whose content would not change are left untouched.
pub fn write_outputs(root: &Path, manifest: &Manifest, manifest_path: &str, module_path: &str) -> Result<()> {
    let module_dir = Path::new(module_path)
        .parent()
        .map(|p| normalize(&p.to_string_lossy()))
        .unwrap_or_default();
    write_if_changed(&root.join(manifest_path), &manifest.to_json()?)?;
    write_if_changed(&root.join(module_path), &manifest.render_module(&module_dir))
}

fn write_if_changed(path: &Path, content: &str) -> Result<()> {
    let io_err = |source| RegistryError::Io {
        path: path.to_path_buf(),
        source,
    };
    if std::fs::read_to_string(path).is_ok_and(|existing| existing == content) {
        debug!(path = %path.display(), "generated file unchanged");
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    std::fs::write(path, content).map_err(io_err)?;
    info!(path = %path.display(), "wrote generated file");
    Ok(())
}

fn join(dir: &str, relative: &str) -> String {
    let dir = normalize(dir);
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() || dir == "." {
        relative.to_owned()
    } else {
        format!("{dir}/{relative}")
    }
}
