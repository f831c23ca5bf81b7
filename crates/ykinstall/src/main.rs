//
// main.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
//
//

//! jupyter-yarn-kernelspec
//!
//! Installs kernelspecs for Spark and Dask kernels running on Hadoop YARN.

use std::path::PathBuf;

use clap::{Args as ClapArgs, CommandFactory, Parser, Subcommand};
use ykinstall::install::{DEFAULT_PYTHON_ROOT, DEFAULT_SPARK_HOME};
use ykinstall::{install, InstallOptions, KernelKind};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Subcommands
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// A Jupyter kernel for talking to Spark/Dask within a YARN cluster
    Install(InstallArgs),
}

#[derive(ClapArgs, Debug)]
struct InstallArgs {
    /// Install the kernel spec into a directory with this name.
    #[arg(long, alias = "kernel_name", default_value = KernelKind::SparkPython.default_kernel_name())]
    kernel_name: String,

    /// The display name of the kernel - used by user-facing applications.
    #[arg(long, alias = "display_name", default_value = KernelKind::SparkPython.default_display_name())]
    display_name: String,

    /// The http url specifying the YARN Resource Manager.
    #[arg(long, alias = "yarn_endpoint", env = "YKP_YARN_ENDPOINT")]
    yarn_endpoint: Option<String>,

    /// The http url specifying the alternate YARN Resource Manager, for
    /// Resource Managers configured for high availability.
    #[arg(long, alias = "alt_yarn_endpoint", env = "YKP_ALT_YARN_ENDPOINT")]
    alt_yarn_endpoint: Option<String>,

    /// Whether YARN Kerberos/SPNEGO security is enabled.
    #[arg(
        long,
        alias = "yarn_endpoint_security_enabled",
        env = "YKP_YARN_ENDPOINT_SECURITY_ENABLED"
    )]
    yarn_endpoint_security_enabled: bool,

    /// The language of the underlying kernel: 'Python', 'R', or 'Scala'.
    #[arg(long, default_value = "Python")]
    language: String,

    /// Where the root of the python installation resides (parent dir of
    /// bin/python).
    #[arg(long, alias = "python_root", default_value = DEFAULT_PYTHON_ROOT)]
    python_root: String,

    /// Where the spark files can be found.
    #[arg(long, alias = "spark_home", env = "SPARK_HOME", default_value = DEFAULT_SPARK_HOME)]
    spark_home: String,

    /// Spark context initialization mode: 'lazy', 'eager', or 'none'.
    #[arg(long, alias = "spark_init_mode", default_value = "lazy")]
    spark_init_mode: String,

    /// Additional Spark options.
    #[arg(long, alias = "extra_spark_opts", default_value = "", allow_hyphen_values = true)]
    extra_spark_opts: String,

    /// Additional Dask options.
    #[arg(long, alias = "extra_dask_opts", default_value = "", allow_hyphen_values = true)]
    extra_dask_opts: String,

    /// Install to the per-user kernel registry.
    #[arg(long)]
    user: bool,

    /// A prefix to install to, e.g. an env. The kernelspec will be installed
    /// in PREFIX/share/jupyter/kernels/
    #[arg(long)]
    prefix: Option<PathBuf>,

    /// Install to the active environment's prefix (`CONDA_PREFIX` or
    /// `VIRTUAL_ENV`).
    #[arg(long, conflicts_with = "prefix")]
    sys_prefix: bool,

    /// A directory of launcher files (e.g. `bin/run.sh`) to copy into the
    /// kernel directory.
    #[arg(long, alias = "launcher_dir")]
    launcher_dir: Option<PathBuf>,

    /// Install a kernelspec for Dask YARN.
    #[arg(long)]
    dask: bool,

    /// Set log level to debug.
    #[arg(long)]
    debug: bool,
}

impl InstallArgs {
    fn into_options(self) -> anyhow::Result<InstallOptions> {
        let prefix = if self.sys_prefix {
            Some(sys_prefix()?)
        } else {
            self.prefix
        };
        Ok(InstallOptions {
            kernel_name: self.kernel_name,
            display_name: self.display_name,
            yarn_endpoint: self.yarn_endpoint,
            alt_yarn_endpoint: self.alt_yarn_endpoint,
            yarn_endpoint_security_enabled: self.yarn_endpoint_security_enabled,
            language: self.language,
            python_root: self.python_root,
            spark_home: self.spark_home,
            spark_init_mode: self.spark_init_mode,
            extra_spark_opts: self.extra_spark_opts,
            extra_dask_opts: self.extra_dask_opts,
            user: self.user,
            prefix,
            dask: self.dask,
            launcher_dir: self.launcher_dir,
        })
    }
}

/// The prefix of the active Python environment.
fn sys_prefix() -> anyhow::Result<PathBuf> {
    ["CONDA_PREFIX", "VIRTUAL_ENV"]
        .iter()
        .find_map(|var| std::env::var_os(var).filter(|v| !v.is_empty()))
        .map(PathBuf::from)
        .ok_or_else(|| {
            anyhow::anyhow!("--sys-prefix requires an active environment (CONDA_PREFIX or VIRTUAL_ENV)")
        })
}

fn main() {
    let args = Args::parse();

    let Some(Commands::Install(install_args)) = args.command else {
        println!("No subcommand specified. Must specify one of: ['install']");
        println!();
        let _ = Args::command().print_help();
        std::process::exit(1);
    };

    let default_level = if install_args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let result = install_args
        .into_options()
        .and_then(|options| Ok(install(&options)?));
    match result {
        Ok(install_dir) => {
            log::debug!("Installed kernelspec in {}", install_dir.display());
        }
        Err(err) => {
            log::error!("{}", err);
            std::process::exit(1);
        }
    }
}
