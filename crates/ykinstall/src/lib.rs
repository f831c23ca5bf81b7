//
// lib.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
//
//

//! Installs kernelspecs that run Spark and Dask kernels as YARN applications.

pub mod install;
pub mod kernel_spec;

pub use install::{install, InstallError, InstallOptions, ValidatedOptions};
pub use kernel_spec::{KernelKind, SparkInitMode};
