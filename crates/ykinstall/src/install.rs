//
// install.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
//
//

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use thiserror::Error;
use ykshared::jupyter_paths::{jupyter_data_dir, SYSTEM_JUPYTER_PATH};
use ykshared::kernel_spec::KERNEL_FILE;

use crate::kernel_spec::{build_kernel_spec, launcher_path, KernelKind, SparkInitMode};

pub const SUPPORTED_LANGUAGES: [&str; 3] = ["python", "scala", "r"];
pub const SPARK_INIT_MODES: [&str; 3] = ["lazy", "eager", "none"];
pub const DEFAULT_PYTHON_ROOT: &str = "/opt/conda";
pub const DEFAULT_SPARK_HOME: &str = "/usr/hdp/current/spark2-client";

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("Can't specify both user and prefix. Please choose one or the other.")]
    UserAndPrefix,

    #[error("Language '{0}' is not in the set of supported languages: {langs:?}", langs = SUPPORTED_LANGUAGES)]
    UnsupportedLanguage(String),

    #[error(
        "Spark initialization mode '{0}' is not in the set of supported initialization modes: {modes:?}",
        modes = SPARK_INIT_MODES
    )]
    UnsupportedInitMode(String),

    #[error("Unable to determine the Jupyter data directory for a --user install")]
    NoUserDataDir,

    #[error("Failed to write '{}': {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to copy launcher files from '{}': {source}", from.display())]
    CopyLauncher {
        from: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize the kernelspec: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Installer options as given on the command line.
#[derive(Debug, Clone)]
pub struct InstallOptions {
    pub kernel_name: String,
    pub display_name: String,
    pub yarn_endpoint: Option<String>,
    pub alt_yarn_endpoint: Option<String>,
    pub yarn_endpoint_security_enabled: bool,
    pub language: String,
    pub python_root: String,
    pub spark_home: String,
    pub spark_init_mode: String,
    pub extra_spark_opts: String,
    pub extra_dask_opts: String,
    pub user: bool,
    pub prefix: Option<PathBuf>,
    pub dask: bool,

    /// A directory whose contents (typically `bin/run.sh` and its scripts)
    /// are copied into the kernel directory
    pub launcher_dir: Option<PathBuf>,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            kernel_name: KernelKind::SparkPython.default_kernel_name().to_string(),
            display_name: KernelKind::SparkPython.default_display_name().to_string(),
            yarn_endpoint: None,
            alt_yarn_endpoint: None,
            yarn_endpoint_security_enabled: false,
            language: "Python".to_string(),
            python_root: DEFAULT_PYTHON_ROOT.to_string(),
            spark_home: DEFAULT_SPARK_HOME.to_string(),
            spark_init_mode: SparkInitMode::default().to_string(),
            extra_spark_opts: String::new(),
            extra_dask_opts: String::new(),
            user: false,
            prefix: None,
            dask: false,
            launcher_dir: None,
        }
    }
}

/// Options after validation, with defaults resolved for the kernel kind.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedOptions {
    pub kind: KernelKind,
    pub kernel_name: String,
    pub display_name: String,
    pub yarn_endpoint: Option<String>,
    pub alt_yarn_endpoint: Option<String>,
    pub yarn_endpoint_security_enabled: bool,
    pub python_root: String,
    pub spark_home: String,
    pub spark_init_mode: SparkInitMode,
    pub extra_spark_opts: String,
    pub extra_dask_opts: String,
    pub user: bool,
    pub prefix: Option<PathBuf>,
    pub launcher_dir: Option<PathBuf>,
}

impl InstallOptions {
    /// Check the options for consistency and resolve the kernel kind.
    ///
    /// Names left at the Spark Python defaults are replaced by the defaults of
    /// the resolved kind. Options that don't apply to the kind are dropped with
    /// a warning.
    pub fn validate(&self) -> Result<ValidatedOptions, InstallError> {
        if self.user && self.prefix.is_some() {
            return Err(InstallError::UserAndPrefix);
        }

        let language = self.language.to_lowercase();
        if !SUPPORTED_LANGUAGES.contains(&language.as_str()) {
            return Err(InstallError::UnsupportedLanguage(self.language.clone()));
        }

        let mut extra_spark_opts = self.extra_spark_opts.clone();
        let mut extra_dask_opts = self.extra_dask_opts.clone();
        let mut spark_init_mode = self.spark_init_mode.clone();

        let kind = if self.dask {
            if language != "python" {
                log::warn!(
                    "Dask support only works with Python, changing language from {} to Python.",
                    self.language
                );
            }
            spark_init_mode = SparkInitMode::None.to_string();
            if !extra_spark_opts.is_empty() {
                log::warn!("--extra_spark_opts will be ignored for Dask-based kernelspecs.");
                extra_spark_opts.clear();
            }
            KernelKind::DaskPython
        } else {
            if !extra_dask_opts.is_empty() {
                log::warn!("--extra_dask_opts will be ignored for Spark-based kernelspecs.");
                extra_dask_opts.clear();
            }
            match language.as_str() {
                "r" => KernelKind::SparkR,
                "scala" => KernelKind::SparkScala,
                _ => KernelKind::SparkPython,
            }
        };

        let spark_init_mode = spark_init_mode
            .parse::<SparkInitMode>()
            .map_err(|mode| InstallError::UnsupportedInitMode(mode.to_lowercase()))?;

        let default_kind = KernelKind::SparkPython;
        let kernel_name = if self.kernel_name == default_kind.default_kernel_name() {
            kind.default_kernel_name().to_string()
        } else {
            self.kernel_name.clone()
        };
        let display_name = if self.display_name == default_kind.default_display_name() {
            kind.default_display_name().to_string()
        } else {
            self.display_name.clone()
        };

        Ok(ValidatedOptions {
            kind,
            kernel_name: kernel_name.replace(' ', "_"),
            display_name,
            yarn_endpoint: self.yarn_endpoint.clone().filter(|e| !e.is_empty()),
            alt_yarn_endpoint: self.alt_yarn_endpoint.clone().filter(|e| !e.is_empty()),
            yarn_endpoint_security_enabled: self.yarn_endpoint_security_enabled,
            python_root: self.python_root.clone(),
            spark_home: self.spark_home.clone(),
            spark_init_mode,
            extra_spark_opts,
            extra_dask_opts,
            user: self.user,
            prefix: self.prefix.clone(),
            launcher_dir: self.launcher_dir.clone(),
        })
    }
}

impl ValidatedOptions {
    /// The kernels directory the kernelspec is installed under.
    pub fn kernels_dir(&self) -> Result<PathBuf, InstallError> {
        if self.user {
            return jupyter_data_dir()
                .map(|dir| dir.join("kernels"))
                .ok_or(InstallError::NoUserDataDir);
        }
        let base = match &self.prefix {
            Some(prefix) => prefix.join("share").join("jupyter"),
            None => PathBuf::from(SYSTEM_JUPYTER_PATH[0]),
        };
        Ok(base.join("kernels"))
    }

    /// The directory the kernelspec is installed into.
    pub fn install_dir(&self) -> Result<PathBuf, InstallError> {
        Ok(self.kernels_dir()?.join(&self.kernel_name))
    }
}

/// Validate `options` and write the kernelspec. Returns the install
/// directory.
pub fn install(options: &InstallOptions) -> Result<PathBuf, InstallError> {
    let options = options.validate()?;
    let install_dir = options.install_dir()?;

    log::info!(
        "Installing Yarn Kernel Provider kernel specification for '{}'",
        options.display_name
    );
    fs::create_dir_all(&install_dir).map_err(|source| InstallError::Write {
        path: install_dir.clone(),
        source,
    })?;

    if let Some(launcher_dir) = &options.launcher_dir {
        copy_dir(launcher_dir, &install_dir).map_err(|source| InstallError::CopyLauncher {
            from: launcher_dir.clone(),
            source,
        })?;
    }

    let spec = build_kernel_spec(&options, &install_dir);
    write_kernel_spec(&install_dir, &spec)?;

    let launcher = launcher_path(&install_dir);
    if !launcher.is_file() {
        log::warn!(
            "Launcher '{}' does not exist; kernels from '{}' will fail to start until it is \
             installed (see --launcher-dir).",
            launcher.display(),
            options.kernel_name
        );
    }
    log::debug!(
        "Wrote kernelspec '{}' to {}",
        options.kernel_name,
        install_dir.display()
    );
    Ok(install_dir)
}

fn write_kernel_spec(
    install_dir: &Path,
    spec: &ykshared::kernel_spec::KernelSpec,
) -> Result<(), InstallError> {
    let path = install_dir.join(KERNEL_FILE);
    let file = File::create(&path).map_err(|source| InstallError::Write {
        path: path.clone(),
        source,
    })?;
    serde_json::to_writer_pretty(file, spec)?;
    Ok(())
}

/// Recursively copy the contents of `from` into `to`, preserving file
/// permissions.
fn copy_dir(from: &Path, to: &Path) -> std::io::Result<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
