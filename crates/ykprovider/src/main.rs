//
// main.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
//
//

//! Supervises a single YARN kernel: locates its kernelspec, launches it,
//! reports its connection info and terminates it on Ctrl-C.

#![allow(missing_docs)]

use std::fs::File;
use std::path::PathBuf;

use anyhow::Context;
use clap::{command, Parser};
use log::LevelFilter;
use simplelog::{ColorChoice, CombinedLogger, Config, TermLogger, TerminalMode, WriteLogger};
use tokio_util::sync::CancellationToken;
use ykprovider::config::ProviderConfig;
use ykprovider::lifecycle::{create_lifecycle_manager, KernelSessionHandle, SessionStatus};
use ykprovider::locator::KernelSpecLocator;
use ykshared::port_range::PortRange;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// The name of the kernelspec to launch
    kernel_name: Option<String>,

    /// List the available YARN kernelspecs and exit
    #[arg(long)]
    list: bool,

    /// A kernel directory to search instead of the Jupyter search path. May
    /// be given more than once; earlier directories take precedence.
    #[arg(long = "kernel-dir")]
    kernel_dirs: Vec<PathBuf>,

    /// The kernel id to use. If omitted, a random id is generated.
    #[arg(long)]
    kernel_id: Option<String>,

    /// The range of ports the kernel may use, as `lower..upper`. `0..0`
    /// allows any port.
    #[arg(long, default_value_t = PortRange::ANY)]
    port_range: PortRange,

    /// The path to a connection file. If specified, the kernel's connection
    /// info is written to it once the kernel is running.
    #[arg(long)]
    connection_file: Option<PathBuf>,

    /// The path to a log file. If specified, log output will be written to this
    /// file in addition to standard streams.
    #[arg(long)]
    log_file: Option<String>,

    /// The log level to use. Valid values are "trace", "debug", "info", "warn",
    /// and "error". If not specified, the default log level is "info", or the
    /// value of `RUST_LOG` if set.
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Derive the log level
    let log_level = match args.log_level {
        Some(ref level) => level.to_string(),
        None => std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
    };

    // Match the log level to a `LevelFilter`
    let log_level = match log_level.as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        _ => {
            println!("Invalid log level '{}'; using 'info'", log_level);
            LevelFilter::Info
        }
    };

    if let Err(err) = init_logging(log_level, args.log_file.as_deref()) {
        // Consider it a fatal error if we can't initialize logging
        println!("Failed to initialize logging: {:#}", err);
        std::process::exit(1);
    }

    match run(args).await {
        Ok(SessionStatus::Failed) => std::process::exit(2),
        Ok(_) => {}
        Err(err) => {
            log::error!("{:#}", err);
            std::process::exit(1);
        }
    }
}

fn init_logging(log_level: LevelFilter, log_file: Option<&str>) -> anyhow::Result<()> {
    let term = TermLogger::new(
        log_level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    );
    match log_file {
        Some(log_file) => {
            let file = File::create(log_file)
                .with_context(|| format!("Failed to create log file '{}'", log_file))?;
            CombinedLogger::init(vec![
                term,
                WriteLogger::new(log_level, Config::default(), file),
            ])?;
        }
        None => CombinedLogger::init(vec![term])?,
    }
    Ok(())
}

async fn run(args: Args) -> anyhow::Result<SessionStatus> {
    let config = ProviderConfig::load()?;
    log::debug!("Provider configuration: {:?}", config);

    let locator = if args.kernel_dirs.is_empty() {
        KernelSpecLocator::from_jupyter_path()
    } else {
        KernelSpecLocator::new(args.kernel_dirs.clone())
    };

    if args.list {
        for (name, entry) in locator.find_kernel_specs() {
            println!(
                "{:<24} {:<36} {}",
                name,
                entry.spec.display_name,
                entry.resource_dir.display()
            );
        }
        return Ok(SessionStatus::Init);
    }

    let kernel_name = args
        .kernel_name
        .context("A kernel name is required (use --list to see available kernels)")?;
    let entry = locator.find_kernel_spec(&kernel_name)?;
    log::info!(
        "Launching kernelspec '{}' ({}) from {}",
        entry.name,
        entry.spec.display_name,
        entry.resource_dir.display()
    );

    let kernel_id = args
        .kernel_id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let handle = KernelSessionHandle::from_config(kernel_id.clone(), &config, args.port_range)?;
    let mut manager = create_lifecycle_manager(&entry.spec, handle, &config).await?;

    // Ctrl-C requests a stop; the manager terminates the kernel when it sees it.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        let kernel_id = kernel_id.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("[session {}] Interrupted; stopping kernel", kernel_id);
                cancel.cancel();
            }
        });
    }

    let connection_info = manager.launch(&entry.spec, &cancel).await?;
    if let Some(path) = &args.connection_file {
        connection_info
            .to_file(path)
            .map_err(|e| anyhow::anyhow!("Failed to write connection file: {}", e))?;
        log::info!("Wrote connection details to {}", path.display());
    }
    println!("{}", serde_json::to_string_pretty(&connection_info)?);
    log::debug!(
        "[session {}] Lifecycle info: {}",
        kernel_id,
        serde_json::to_string(&manager.lifecycle_info())?
    );

    let status = manager.monitor(&cancel).await?;
    log::info!(
        "[session {}] Kernel finished with status {}; allowing up to {:?} for shutdown",
        kernel_id,
        status,
        manager.shutdown_wait_time()
    );
    manager.cleanup().await?;
    Ok(status)
}
