//
// kernel_spec.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
//
//

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::placeholders::Placeholders;

/// The name of the descriptor file inside each kernel directory.
pub const KERNEL_FILE: &str = "yarnkp_kernel.json";

/// From the Jupyter documentation for [Kernel Specs](https://jupyter-client.readthedocs.io/en/stable/kernels.html#kernel-specs),
/// extended with the lifecycle manager block used by remote kernel providers.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct KernelSpec {
    /// List of command line arguments to be used to start the kernel
    pub argv: Vec<String>,

    // The kernel name as it should be displayed in the UI
    pub display_name: String,

    // The kernel's language
    pub language: String,

    // Environment variables to set for the kernel
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// How the kernel expects to be interrupted ("signal" or "message")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupt_mode: Option<String>,

    pub metadata: KernelSpecMetadata,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct KernelSpecMetadata {
    /// The lifecycle manager that supervises kernels of this type
    pub lifecycle_manager: LifecycleManagerSpec,

    /// Any other metadata entries (e.g. `debugger`), carried through untouched
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The kind of lifecycle manager a kernelspec asks for, together with its
/// typed configuration.
///
/// On disk this is `{"class_name": ..., "config": {...}}`. The class names
/// written by older installers are accepted as aliases.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "class_name", content = "config")]
pub enum LifecycleManagerSpec {
    #[serde(
        rename = "yarn_kernel_provider.yarn.YarnKernelLifecycleManager",
        alias = "yarn",
        alias = "yarn_kernel_provider.yarn.YarnClusterProcessProxy",
        alias = "enterprise_gateway.services.processproxies.yarn.YarnClusterProcessProxy"
    )]
    Yarn(YarnLifecycleConfig),
}

/// Lifecycle configuration for kernels running as YARN applications.
///
/// Endpoints left as `None` fall back to the provider-wide configuration.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct YarnLifecycleConfig {
    /// The http url of the YARN Resource Manager
    #[serde(default)]
    pub yarn_endpoint: Option<String>,

    /// The alternate Resource Manager url, used when the Resource Managers
    /// are configured for high availability. Ignored without a primary.
    #[serde(default)]
    pub alt_yarn_endpoint: Option<String>,

    /// Whether the Resource Manager requires Kerberos/SPNEGO authentication.
    /// When absent, the provider-wide setting applies.
    #[serde(default)]
    pub yarn_endpoint_security_enabled: Option<bool>,

    /// Seconds to wait for the application and its connection info
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch_timeout: Option<f64>,
}

impl KernelSpec {
    /// The YARN configuration of this kernelspec.
    pub fn yarn_config(&self) -> &YarnLifecycleConfig {
        match &self.metadata.lifecycle_manager {
            LifecycleManagerSpec::Yarn(config) => config,
        }
    }

    /// Returns a copy of this kernelspec with placeholders in `argv` and in
    /// the values of `env` replaced. Placeholders without a value are kept
    /// verbatim.
    pub fn substitute(&self, placeholders: &Placeholders) -> KernelSpec {
        let mut spec = self.clone();
        spec.argv = self
            .argv
            .iter()
            .map(|arg| placeholders.apply(arg))
            .collect();
        spec.env = self
            .env
            .iter()
            .map(|(key, value)| (key.clone(), placeholders.apply(value)))
            .collect();
        spec
    }
}
