//
// locator.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
//
//

//! Discovery of YARN kernelspecs on the Jupyter kernel search path.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use ykshared::jupyter_paths::kernel_dirs;
use ykshared::kernel_spec::{KernelSpec, KERNEL_FILE};
use ykshared::placeholders::{Placeholders, RESOURCE_DIR};

use crate::error::{YKError, YKResult};

/// A discovered kernelspec.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelSpecEntry {
    /// The kernel name (the name of its directory)
    pub name: String,

    /// The directory holding the descriptor
    pub resource_dir: PathBuf,

    /// The parsed descriptor, with `{resource_dir}` substituted
    pub spec: KernelSpec,
}

/// Scans kernel directories for YARN kernelspecs.
#[derive(Debug, Clone)]
pub struct KernelSpecLocator {
    search_dirs: Vec<PathBuf>,
}

impl KernelSpecLocator {
    /// A locator over the given kernel directories, in priority order.
    pub fn new(search_dirs: Vec<PathBuf>) -> Self {
        Self { search_dirs }
    }

    /// A locator over the standard Jupyter kernel directories.
    pub fn from_jupyter_path() -> Self {
        Self::new(kernel_dirs())
    }

    pub fn search_dirs(&self) -> &[PathBuf] {
        &self.search_dirs
    }

    /// Find every kernelspec on the search path, keyed by kernel name.
    ///
    /// Descriptors that cannot be read or parsed are logged and skipped. When
    /// a name appears in several directories, the earliest directory wins.
    pub fn find_kernel_specs(&self) -> BTreeMap<String, KernelSpecEntry> {
        let mut found = BTreeMap::new();

        for dir in &self.search_dirs {
            let entries = match fs::read_dir(dir) {
                Ok(entries) => entries,
                Err(e) => {
                    log::trace!("Skipping kernel directory '{}': {}", dir.display(), e);
                    continue;
                }
            };

            for entry in entries.flatten() {
                let resource_dir = entry.path();
                if !resource_dir.is_dir() || !resource_dir.join(KERNEL_FILE).is_file() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy().to_string();
                if found.contains_key(&name) {
                    log::debug!(
                        "Kernelspec '{}' in '{}' is shadowed by an earlier directory",
                        name,
                        dir.display()
                    );
                    continue;
                }

                match read_kernel_spec(&resource_dir) {
                    Ok(spec) => {
                        log::debug!(
                            "Found kernelspec '{}' ({}) in '{}'",
                            name,
                            spec.display_name,
                            resource_dir.display()
                        );
                        found.insert(
                            name.clone(),
                            KernelSpecEntry {
                                name,
                                resource_dir,
                                spec,
                            },
                        );
                    }
                    Err(e) => {
                        log::warn!("Skipping kernelspec '{}': {}", name, e);
                    }
                }
            }
        }

        found
    }

    /// Find one kernelspec by name.
    pub fn find_kernel_spec(&self, name: &str) -> YKResult<KernelSpecEntry> {
        for dir in &self.search_dirs {
            let resource_dir = dir.join(name);
            if resource_dir.join(KERNEL_FILE).is_file() {
                let spec = read_kernel_spec(&resource_dir)?;
                return Ok(KernelSpecEntry {
                    name: name.to_string(),
                    resource_dir,
                    spec,
                });
            }
        }
        Err(YKError::KernelSpecNotFound(name.to_string()))
    }
}

/// Read and parse the descriptor in `resource_dir`, substituting
/// `{resource_dir}` in its argv and env.
pub fn read_kernel_spec(resource_dir: &Path) -> YKResult<KernelSpec> {
    let path = resource_dir.join(KERNEL_FILE);
    let file = File::open(&path)?;
    let spec: KernelSpec = serde_json::from_reader(BufReader::new(file))
        .map_err(|source| YKError::DescriptorParse { path, source })?;

    let placeholders =
        Placeholders::new().with(RESOURCE_DIR, resource_dir.to_string_lossy().to_string());
    Ok(spec.substitute(&placeholders))
}
