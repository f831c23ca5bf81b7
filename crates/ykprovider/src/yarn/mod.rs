//
// mod.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
//
//

//! YARN Resource Manager types and REST client.

pub mod application;
pub mod resource_manager;

pub use application::{YarnApplication, YarnApplicationState};
pub use resource_manager::{ResourceManager, ResourceManagerApi, RmError};
