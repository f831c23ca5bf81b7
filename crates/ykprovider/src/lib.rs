//
// lib.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
//
//

//! Discovery and lifecycle management for Jupyter kernels that run as YARN
//! applications.

#![allow(missing_docs)]

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod locator;
pub mod yarn;
