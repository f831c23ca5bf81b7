//
// jupyter_paths.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
//
//

//! Jupyter data directories and the kernel search path.

use std::path::PathBuf;

#[cfg(target_os = "macos")]
use directories::BaseDirs;

/// The system-wide Jupyter data directories, in search order.
pub const SYSTEM_JUPYTER_PATH: [&str; 2] = ["/usr/local/share/jupyter", "/usr/share/jupyter"];

/// The per-user Jupyter data directory. `JUPYTER_DATA_DIR` wins when set.
pub fn jupyter_data_dir() -> Option<PathBuf> {
    if let Some(dir) = std::env::var_os("JUPYTER_DATA_DIR") {
        return Some(PathBuf::from(dir));
    }
    platform_data_dir()
}

#[cfg(target_os = "macos")]
fn platform_data_dir() -> Option<PathBuf> {
    // On macOS, Jupyter doens't follow the XDG Base Directory
    // Specification; it stores its data in `~/Library/Jupyter` instead
    // of the "correct" XDG location in `~/Library/Application Support`.
    let base_dir = BaseDirs::new()?;
    Some(base_dir.home_dir().join("Library").join("Jupyter"))
}

#[cfg(not(target_os = "macos"))]
fn platform_data_dir() -> Option<PathBuf> {
    let dir = directories::ProjectDirs::from("Jupyter", "", "")?;
    Some(dir.data_dir().to_path_buf())
}

/// The Jupyter data directories in search order: `JUPYTER_PATH` entries,
/// the user data directory, the environment prefix (`JUPYTER_PREFIX`), then
/// the system directories.
pub fn jupyter_path() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Some(extra) = std::env::var_os("JUPYTER_PATH") {
        paths.extend(std::env::split_paths(&extra).filter(|p| !p.as_os_str().is_empty()));
    }

    if let Some(user) = jupyter_data_dir() {
        paths.push(user);
    }

    if let Some(prefix) = std::env::var_os("JUPYTER_PREFIX") {
        paths.push(PathBuf::from(prefix).join("share").join("jupyter"));
    }

    paths.extend(SYSTEM_JUPYTER_PATH.iter().map(PathBuf::from));

    let mut seen = std::collections::HashSet::new();
    paths.retain(|p| seen.insert(p.clone()));
    paths
}

/// The directories searched for kernelspecs: each Jupyter path with
/// `kernels` appended.
pub fn kernel_dirs() -> Vec<PathBuf> {
    jupyter_path()
        .into_iter()
        .map(|p| p.join("kernels"))
        .collect()
}
