//
// mod.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
//
//

//! Kernel lifecycle management: the contract a kernel-management framework
//! uses to launch, supervise and terminate a kernel, and the YARN
//! implementation of it.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use ykshared::connection_info::ConnectionInfo;
use ykshared::kernel_spec::{KernelSpec, LifecycleManagerSpec};
use ykshared::placeholders::{self, Placeholders};
use ykshared::port_range::PortRange;

use crate::config::ProviderConfig;
use crate::error::{YKError, YKResult};

pub mod process;
pub mod response_listener;
pub mod session_state;
pub mod yarn;

pub use response_listener::ResponseListener;
pub use session_state::SessionStatus;
pub use yarn::YarnLifecycleManager;

/// The operations a kernel-management framework drives on a lifecycle
/// manager. One manager supervises exactly one kernel id.
#[async_trait]
pub trait KernelLifecycleManager: Send {
    fn kernel_id(&self) -> &str;

    /// The session's current status.
    fn status(&self) -> SessionStatus;

    /// Start the kernel described by `spec` and wait until it reports its
    /// connection info. Cancelling `cancel` abandons the launch and
    /// terminates whatever was started.
    async fn launch(
        &mut self,
        spec: &KernelSpec,
        cancel: &CancellationToken,
    ) -> YKResult<ConnectionInfo>;

    /// The connection info reported by the kernel, once launched.
    fn connection_info(&self) -> Option<&ConnectionInfo>;

    /// Query the kernel's remote state once and return the updated status.
    async fn poll(&mut self) -> YKResult<SessionStatus>;

    /// Poll until the kernel reaches a terminal status. Cancelling `cancel`
    /// terminates the kernel.
    async fn monitor(&mut self, cancel: &CancellationToken) -> YKResult<SessionStatus>;

    /// Stop the kernel and confirm it stopped.
    async fn terminate(&mut self) -> YKResult<()>;

    /// Release local resources and forget the remote application, so a
    /// restart starts from scratch.
    async fn cleanup(&mut self) -> YKResult<()>;

    /// What a framework needs to persist to re-attach to this kernel later.
    fn lifecycle_info(&self) -> LifecycleInfo;

    /// Re-attach to a kernel described by previously saved lifecycle info.
    fn load_lifecycle_info(&mut self, info: LifecycleInfo) -> YKResult<()>;

    /// The minimum time a framework should allow the kernel to shut down.
    fn shutdown_wait_time(&self) -> Duration;
}

/// Persistable session details.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleInfo {
    pub kernel_id: String,

    pub application_id: Option<String>,

    pub assigned_host: Option<String>,

    pub assigned_ip: Option<IpAddr>,

    pub launcher_pid: Option<u32>,

    pub connection_info: Option<ConnectionInfo>,
}

/// The per-kernel handle given to a lifecycle manager: the kernel id and the
/// listener the launcher reports back on.
///
/// Not `Clone`; moving it into a manager is what ties a kernel id to a
/// single manager.
#[derive(Debug)]
pub struct KernelSessionHandle {
    kernel_id: String,
    listener: ResponseListener,
}

impl KernelSessionHandle {
    pub fn new(kernel_id: String, listener: ResponseListener) -> Self {
        Self {
            kernel_id,
            listener,
        }
    }

    /// Bind a response listener for `kernel_id` within `port_range`, on the
    /// configured response address.
    pub fn from_config(
        kernel_id: String,
        config: &ProviderConfig,
        port_range: PortRange,
    ) -> YKResult<Self> {
        let ip = match &config.response_ip {
            Some(ip) => Some(ip.parse::<IpAddr>().map_err(|e| {
                YKError::Config(format!("Invalid response_ip '{}': {}", ip, e))
            })?),
            None => None,
        };
        let listener = ResponseListener::bind(ip, port_range)?;
        Ok(Self::new(kernel_id, listener))
    }

    pub fn kernel_id(&self) -> &str {
        &self.kernel_id
    }

    pub fn listener(&self) -> &ResponseListener {
        &self.listener
    }

    /// The launch-time placeholder values for this session.
    pub fn placeholders(&self) -> Placeholders {
        Placeholders::new()
            .with(placeholders::KERNEL_ID, self.kernel_id.clone())
            .with(
                placeholders::RESPONSE_ADDRESS,
                self.listener.response_address().to_string(),
            )
            .with(
                placeholders::PORT_RANGE,
                self.listener.port_range().to_string(),
            )
    }
}

/// Build the lifecycle manager a kernelspec asks for.
pub async fn create_lifecycle_manager(
    spec: &KernelSpec,
    handle: KernelSessionHandle,
    config: &ProviderConfig,
) -> YKResult<Box<dyn KernelLifecycleManager>> {
    match &spec.metadata.lifecycle_manager {
        LifecycleManagerSpec::Yarn(yarn_config) => {
            let manager = YarnLifecycleManager::connect(handle, yarn_config, config).await?;
            Ok(Box::new(manager))
        }
    }
}
