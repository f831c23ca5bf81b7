//
// kernel_spec.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
//
//

//! Builds the kernelspec descriptor for each kind of YARN kernel.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use ykshared::kernel_spec::{
    KernelSpec, KernelSpecMetadata, LifecycleManagerSpec, YarnLifecycleConfig,
};
use ykshared::placeholders::{KERNEL_ID, PORT_RANGE, RESPONSE_ADDRESS};

use crate::install::ValidatedOptions;

/// The launcher `--name` for Spark and Dask submissions; expanded by the
/// launcher's shell, so the application name carries the kernel id.
const APP_NAME: &str = "${KERNEL_ID:-ERROR__NO__KERNEL_ID}";

/// The kinds of kernel the installer can describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelKind {
    SparkPython,
    SparkR,
    SparkScala,
    DaskPython,
}

impl KernelKind {
    pub fn default_kernel_name(&self) -> &'static str {
        match self {
            KernelKind::SparkPython => "yarnkp_spark_python",
            KernelKind::SparkR => "yarnkp_spark_r",
            KernelKind::SparkScala => "yarnkp_spark_scala",
            KernelKind::DaskPython => "yarnkp_dask_python",
        }
    }

    pub fn default_display_name(&self) -> &'static str {
        match self {
            KernelKind::SparkPython => "Spark Python (YARN Cluster)",
            KernelKind::SparkR => "Spark R (YARN Cluster)",
            KernelKind::SparkScala => "Spark Scala (YARN Cluster)",
            KernelKind::DaskPython => "Dask Python (YARN Cluster)",
        }
    }

    /// The `language` field of the descriptor.
    pub fn language(&self) -> &'static str {
        match self {
            KernelKind::SparkPython | KernelKind::DaskPython => "python",
            KernelKind::SparkR => "R",
            KernelKind::SparkScala => "scala",
        }
    }
}

/// How the launcher initializes the Spark context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SparkInitMode {
    #[default]
    Lazy,
    Eager,
    None,
}

impl fmt::Display for SparkInitMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            SparkInitMode::Lazy => "lazy",
            SparkInitMode::Eager => "eager",
            SparkInitMode::None => "none",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for SparkInitMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "lazy" => Ok(SparkInitMode::Lazy),
            "eager" => Ok(SparkInitMode::Eager),
            "none" => Ok(SparkInitMode::None),
            _ => Err(s.to_string()),
        }
    }
}

/// Build the descriptor for `options`, to be installed in `install_dir`.
pub fn build_kernel_spec(options: &ValidatedOptions, install_dir: &Path) -> KernelSpec {
    let env = match options.kind {
        KernelKind::SparkPython => spark_python_env(options),
        KernelKind::SparkR => spark_r_env(options),
        KernelKind::SparkScala => spark_scala_env(options),
        KernelKind::DaskPython => dask_python_env(options),
    };

    KernelSpec {
        argv: launcher_argv(install_dir, options.spark_init_mode),
        display_name: options.display_name.clone(),
        language: options.kind.language().to_string(),
        env,
        interrupt_mode: None,
        metadata: KernelSpecMetadata {
            lifecycle_manager: LifecycleManagerSpec::Yarn(YarnLifecycleConfig {
                yarn_endpoint: options.yarn_endpoint.clone(),
                alt_yarn_endpoint: options.alt_yarn_endpoint.clone(),
                yarn_endpoint_security_enabled: Some(options.yarn_endpoint_security_enabled),
                launch_timeout: None,
            }),
            extra: serde_json::Map::new(),
        },
    }
}

/// The launcher script a kernel directory's argv starts with.
pub fn launcher_path(install_dir: &Path) -> PathBuf {
    install_dir.join("bin").join("run.sh")
}

fn launcher_argv(install_dir: &Path, init_mode: SparkInitMode) -> Vec<String> {
    vec![
        launcher_path(install_dir).to_string_lossy().to_string(),
        "--RemoteProcessProxy.kernel-id".to_string(),
        format!("{{{}}}", KERNEL_ID),
        "--RemoteProcessProxy.response-address".to_string(),
        format!("{{{}}}", RESPONSE_ADDRESS),
        "--RemoteProcessProxy.port-range".to_string(),
        format!("{{{}}}", PORT_RANGE),
        "--RemoteProcessProxy.spark-context-initialization-mode".to_string(),
        init_mode.to_string(),
    ]
}

/// Join option fragments, dropping empty ones.
fn opts(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|part| part.trim())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn env_map(pairs: Vec<(&str, String)>) -> BTreeMap<String, String> {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

fn spark_python_env(options: &ValidatedOptions) -> BTreeMap<String, String> {
    let spark_home = &options.spark_home;
    let python_root = &options.python_root;
    let py4j = match find_py4j(Path::new(spark_home)) {
        Some(zip) => format!(":{}/python/lib/{}", spark_home, zip),
        None => {
            log::warn!("Unable to find py4j, installing without PySpark support.");
            String::new()
        }
    };
    let python_path = format!(
        "${{HOME}}/.local/lib/python3.7/site-packages:{}/python{}",
        spark_home, py4j
    );

    env_map(vec![
        ("SPARK_HOME", spark_home.clone()),
        ("PYSPARK_PYTHON", format!("{}/bin/python", python_root)),
        ("PYTHONPATH", python_path.clone()),
        (
            "SPARK_OPTS",
            opts(&[
                "--master yarn --deploy-mode cluster",
                &format!("--name {}", APP_NAME),
                "--conf spark.yarn.submit.waitAppCompletion=false",
                "--conf spark.yarn.appMasterEnv.PYTHONUSERBASE=/home/${KERNEL_USERNAME}/.local",
                &format!("--conf spark.yarn.appMasterEnv.PYTHONPATH={}", python_path),
                &format!("--conf spark.yarn.appMasterEnv.PATH={}/bin:$PATH", python_root),
                "${KERNEL_EXTRA_SPARK_OPTS}",
                &options.extra_spark_opts,
            ]),
        ),
        ("LAUNCH_OPTS", String::new()),
    ])
}

fn spark_r_env(options: &ValidatedOptions) -> BTreeMap<String, String> {
    let python_root = &options.python_root;
    env_map(vec![
        ("SPARK_HOME", options.spark_home.clone()),
        (
            "SPARK_OPTS",
            opts(&[
                "--master yarn --deploy-mode cluster",
                &format!("--name {}", APP_NAME),
                "--conf spark.yarn.submit.waitAppCompletion=false",
                "--conf spark.yarn.am.waitTime=1d",
                &format!("--conf spark.yarn.appMasterEnv.PATH={}/bin:$PATH", python_root),
                &format!("--conf spark.sparkr.r.command={}/lib/R/bin/Rscript", python_root),
                "${KERNEL_EXTRA_SPARK_OPTS}",
                &options.extra_spark_opts,
            ]),
        ),
        ("LAUNCH_OPTS", "--customAppName ${KERNEL_ID}".to_string()),
    ])
}

fn spark_scala_env(options: &ValidatedOptions) -> BTreeMap<String, String> {
    env_map(vec![
        ("SPARK_HOME", options.spark_home.clone()),
        (
            "__TOREE_SPARK_OPTS__",
            opts(&[
                "--master yarn --deploy-mode cluster",
                &format!("--name {}", APP_NAME),
                "--conf spark.yarn.submit.waitAppCompletion=false",
                "--conf spark.yarn.am.waitTime=1d",
                "${KERNEL_EXTRA_SPARK_OPTS}",
                &options.extra_spark_opts,
            ]),
        ),
        ("__TOREE_OPTS__", "--alternate-sigint USR2".to_string()),
        ("LAUNCH_OPTS", String::new()),
        ("DEFAULT_INTERPRETER", "Scala".to_string()),
    ])
}

fn dask_python_env(options: &ValidatedOptions) -> BTreeMap<String, String> {
    let python_root = &options.python_root;
    env_map(vec![
        ("SPARK_HOME", options.spark_home.clone()),
        ("DASK_YARN_EXE", format!("{}/bin/dask-yarn", python_root)),
        (
            "DASK_OPTS",
            opts(&[
                &format!("--name {}", APP_NAME),
                &format!("--environment python://{}/bin/python", python_root),
                "--temporary-security-credentials",
                &options.extra_dask_opts,
            ]),
        ),
        ("PATH", format!("{}/bin:$PATH", python_root)),
        ("LAUNCH_OPTS", String::new()),
    ])
}

/// The name of the py4j archive under `<spark_home>/python/lib`, if any.
pub fn find_py4j(spark_home: &Path) -> Option<String> {
    let entries = fs::read_dir(spark_home.join("python").join("lib")).ok()?;
    let mut names: Vec<String> = entries
        .flatten()
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .filter(|name| name.contains("py4j"))
        .collect();
    names.sort();
    names.into_iter().next()
}
