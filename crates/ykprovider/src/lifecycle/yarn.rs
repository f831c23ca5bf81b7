//
// yarn.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
//
//

//! Lifecycle management for kernels that run as YARN applications.
//!
//! The local launcher submits the kernel to YARN with the kernel id in the
//! application name. The manager then finds the application through the
//! Resource Manager, waits for it to be placed on a host, and receives the
//! kernel's connection info on the session's response address.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use ykshared::connection_info::ConnectionInfo;
use ykshared::kernel_spec::{KernelSpec, YarnLifecycleConfig};

use super::process::LauncherProcess;
use super::session_state::{SessionState, SessionStatus};
use super::{KernelLifecycleManager, KernelSessionHandle, LifecycleInfo};
use crate::config::ProviderConfig;
use crate::error::{YKError, YKResult};
use crate::yarn::application::{select_kernel_application, YarnApplicationState};
use crate::yarn::resource_manager::{ResourceManager, ResourceManagerApi, RmError};

/// Environment variable carrying the kernel id to the launcher
pub const KERNEL_ID_ENV: &str = "KERNEL_ID";

/// Supervises one kernel running as a YARN application.
pub struct YarnLifecycleManager {
    handle: KernelSessionHandle,
    resource_manager: Arc<dyn ResourceManagerApi>,
    config: ProviderConfig,
    launch_timeout: Duration,
    state: SessionState,
    launcher: Option<LauncherProcess>,
    connection_info: Option<ConnectionInfo>,

    /// Milliseconds since the epoch when the current launch began; applications
    /// started earlier are not candidates.
    launch_started_ms: Option<i64>,
}

impl YarnLifecycleManager {
    /// Create a manager talking to the Resource Manager(s) named by the
    /// kernelspec, or by the provider configuration when it names none.
    pub async fn connect(
        handle: KernelSessionHandle,
        yarn_config: &YarnLifecycleConfig,
        config: &ProviderConfig,
    ) -> YKResult<Self> {
        let kernel_config = config.for_kernel(yarn_config)?;
        let resource_manager = ResourceManager::new(
            &kernel_config.endpoints,
            config.request_timeout(),
            kernel_config.spnego_token.clone(),
        )?;
        let endpoint = resource_manager.select_active_endpoint().await;
        log::info!(
            "[session {}] Using YARN Resource Manager at {}",
            handle.kernel_id(),
            endpoint
        );

        Ok(Self::with_resource_manager(
            handle,
            Arc::new(resource_manager),
            config.clone(),
            kernel_config.launch_timeout,
        ))
    }

    /// Create a manager over an existing Resource Manager client.
    pub fn with_resource_manager(
        handle: KernelSessionHandle,
        resource_manager: Arc<dyn ResourceManagerApi>,
        config: ProviderConfig,
        launch_timeout: Duration,
    ) -> Self {
        let state = SessionState::new(handle.kernel_id().to_string());
        Self {
            handle,
            resource_manager,
            config,
            launch_timeout,
            state,
            launcher: None,
            connection_info: None,
            launch_started_ms: None,
        }
    }

    pub fn application_id(&self) -> Option<&str> {
        self.state.application_id.as_deref()
    }

    pub fn assigned_host(&self) -> Option<&str> {
        self.state.assigned_host.as_deref()
    }

    pub fn assigned_ip(&self) -> Option<IpAddr> {
        self.state.assigned_ip
    }

    pub fn launcher_pid(&self) -> Option<u32> {
        self.state.launcher_pid
    }

    /// The YARN state seen on the last query.
    pub fn last_known_state(&self) -> Option<YarnApplicationState> {
        self.state.last_known_state
    }

    pub fn handle(&self) -> &KernelSessionHandle {
        &self.handle
    }

    /// Wait until the application is placed on a host and the kernel has
    /// reported its connection info.
    ///
    /// Returns a discovery-timeout error when the launch timeout elapses or
    /// the discovery attempts run out, and an unexpected-terminal-state error
    /// when the application ends before the kernel is reachable.
    pub async fn confirm_remote_startup(
        &mut self,
        cancel: &CancellationToken,
    ) -> YKResult<ConnectionInfo> {
        let started = Instant::now();
        let deadline = deadline_after(started, self.launch_timeout);
        let mut discovery_attempts: u32 = 0;

        loop {
            if self.state.application_id.is_none() {
                if discovery_attempts >= self.config.max_discovery_attempts
                    || Instant::now() >= deadline
                {
                    return Err(self.launch_timeout_error(started).await);
                }
                discovery_attempts += 1;

                if self.discover_application_id(true).await?.is_none() {
                    self.detect_launch_failure()?;
                    let delay = self.config.discovery_delay(discovery_attempts);
                    self.sleep_or_cancel(delay.min(remaining(deadline)), cancel)
                        .await?;
                    continue;
                }
                log::info!(
                    "[session {}] ApplicationID: '{}' assigned after {:.1}s ({} attempts)",
                    self.state.kernel_id,
                    self.state.application_id.as_deref().unwrap_or_default(),
                    started.elapsed().as_secs_f64(),
                    discovery_attempts
                );
            }

            if Instant::now() >= deadline {
                return Err(self.launch_timeout_error(started).await);
            }

            if let Some(state) = self.refresh_application().await? {
                if state.is_final() {
                    return Err(YKError::UnexpectedTerminalState {
                        kernel_id: self.state.kernel_id.clone(),
                        application_id: self
                            .state
                            .application_id
                            .clone()
                            .unwrap_or_default(),
                        state,
                    });
                }
            }

            if self.state.assigned_host.is_none() {
                self.sleep_or_cancel(self.config.poll_interval().min(remaining(deadline)), cancel)
                    .await?;
                continue;
            }

            self.state.set_status(
                SessionStatus::Running,
                self.state
                    .assigned_host
                    .as_ref()
                    .map(|host| format!("placed on {}", host)),
            );

            let wait = self.config.poll_interval().min(remaining(deadline));
            let received = tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(YKError::Cancelled(self.state.kernel_id.clone()));
                }
                received = self.handle.listener().receive(&self.state.kernel_id, wait) => received?,
            };
            if let Some(info) = received {
                return Ok(self.accept_connection_info(info));
            }
        }
    }

    /// Look for the kernel's application in the Resource Manager's listing.
    /// Returns the application id once known.
    async fn discover_application_id(
        &mut self,
        ignore_final_states: bool,
    ) -> YKResult<Option<String>> {
        if let Some(id) = &self.state.application_id {
            return Ok(Some(id.clone()));
        }

        let apps = match self
            .resource_manager
            .cluster_applications(self.launch_started_ms)
            .await
        {
            Ok(apps) => apps,
            Err(err @ RmError::Unreachable { .. }) => return Err(err.into()),
            Err(err) => {
                log::warn!(
                    "[session {}] Failed to list YARN applications: {}",
                    self.state.kernel_id,
                    err
                );
                return Ok(None);
            }
        };

        match select_kernel_application(apps, &self.state.kernel_id, ignore_final_states) {
            Some(app) => {
                self.state.application_id = Some(app.id.clone());
                self.state.observe(app.state);
                Ok(Some(app.id))
            }
            None => {
                log::debug!(
                    "[session {}] ApplicationID not yet assigned - retrying...",
                    self.state.kernel_id
                );
                Ok(None)
            }
        }
    }

    /// Query the application by id, recording its state and, the first time
    /// it is available, the host it was placed on.
    async fn refresh_application(&mut self) -> YKResult<Option<YarnApplicationState>> {
        let Some(application_id) = self.state.application_id.clone() else {
            return Ok(None);
        };

        let app = match self.resource_manager.cluster_application(&application_id).await {
            Ok(app) => app,
            Err(err @ RmError::Unreachable { .. }) => return Err(err.into()),
            Err(err) => {
                log::warn!(
                    "[session {}] Failed to query application {}: {}",
                    self.state.kernel_id,
                    application_id,
                    err
                );
                return Ok(None);
            }
        };
        self.state.observe(app.state);

        if self.state.assigned_host.is_none() {
            if let Some(host) = app.am_host() {
                let host = host.to_string();
                self.state.assigned_ip = resolve_host(&self.state.kernel_id, &host).await;
                log::info!(
                    "[session {}] Application {} placed on host '{}' ({})",
                    self.state.kernel_id,
                    application_id,
                    host,
                    self.state
                        .assigned_ip
                        .map(|ip| ip.to_string())
                        .unwrap_or_else(|| "unresolved".to_string())
                );
                self.state.assigned_host = Some(host);
            }
        }

        Ok(Some(app.state))
    }

    /// Fail fast when the local launcher has already exited with an error.
    fn detect_launch_failure(&mut self) -> YKResult<()> {
        let Some(launcher) = self.launcher.as_mut() else {
            return Ok(());
        };
        match launcher.try_wait()? {
            Some(status) if !status.success() => Err(YKError::LauncherExited {
                kernel_id: self.state.kernel_id.clone(),
                status: status.to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Build the timeout error for a launch that ran out of time, with a
    /// reason that says how far the launch got.
    async fn launch_timeout_error(&mut self, started: Instant) -> YKError {
        let timeout = self.launch_timeout.as_secs_f64();
        let elapsed = started.elapsed().as_secs_f64();
        let reason = match self.state.application_id.clone() {
            None => format!(
                "Application ID is None. Failed to submit a new application to YARN within {} seconds.  \
                 Check server log for more information.",
                timeout
            ),
            Some(application_id) => {
                let state = match self
                    .resource_manager
                    .cluster_application_state(&application_id)
                    .await
                {
                    Ok(state) => Some(state),
                    Err(err) => {
                        log::warn!(
                            "[session {}] Failed to query state of {}: {}",
                            self.state.kernel_id,
                            application_id,
                            err
                        );
                        self.state.last_known_state
                    }
                };
                if state == Some(YarnApplicationState::Running) {
                    format!(
                        "App {} is RUNNING, but waited too long ({} secs) to get connection file.  \
                         Check YARN logs for more information.",
                        application_id, timeout
                    )
                } else {
                    format!(
                        "YARN resources unavailable after {:.1} seconds for app {}, launch timeout: {}!  \
                         Check YARN configuration.",
                        elapsed, application_id, timeout
                    )
                }
            }
        };
        YKError::DiscoveryTimeout {
            kernel_id: self.state.kernel_id.clone(),
            reason,
        }
    }

    /// Point the reported connection info at the host YARN placed the kernel on.
    fn accept_connection_info(&mut self, mut info: ConnectionInfo) -> ConnectionInfo {
        if let Some(ip) = self.state.assigned_ip {
            if info.ip != ip.to_string() {
                log::debug!(
                    "[session {}] Replacing reported ip {} with assigned ip {}",
                    self.state.kernel_id,
                    info.ip,
                    ip
                );
                info.ip = ip.to_string();
            }
        }
        log::info!(
            "[session {}] Received connection info (shell {}, iopub {})",
            self.state.kernel_id,
            info.endpoint(info.shell_port),
            info.endpoint(info.iopub_port)
        );
        self.connection_info = Some(info.clone());
        info
    }

    async fn sleep_or_cancel(&self, delay: Duration, cancel: &CancellationToken) -> YKResult<()> {
        tokio::select! {
            _ = cancel.cancelled() => Err(YKError::Cancelled(self.state.kernel_id.clone())),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    /// Kill the local launcher, if any, and reap it.
    async fn kill_launcher(&mut self) -> YKResult<()> {
        if let Some(launcher) = self.launcher.as_mut() {
            launcher.terminate().await?;
        }
        Ok(())
    }

    /// The application's state, treating an application YARN no longer
    /// knows about as gone.
    async fn query_state(&self, application_id: &str) -> YKResult<Option<YarnApplicationState>> {
        match self
            .resource_manager
            .cluster_application_state(application_id)
            .await
        {
            Ok(state) => Ok(Some(state)),
            Err(RmError::NotFound(_)) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl KernelLifecycleManager for YarnLifecycleManager {
    fn kernel_id(&self) -> &str {
        &self.state.kernel_id
    }

    fn status(&self) -> SessionStatus {
        self.state.status
    }

    async fn launch(
        &mut self,
        spec: &KernelSpec,
        cancel: &CancellationToken,
    ) -> YKResult<ConnectionInfo> {
        let spec = spec.substitute(&self.handle.placeholders());
        let mut env = spec.env.clone();
        env.insert(KERNEL_ID_ENV.to_string(), self.state.kernel_id.clone());

        self.connection_info = None;
        self.launch_started_ms = Some(Utc::now().timestamp_millis());

        let launcher = match LauncherProcess::spawn(&self.state.kernel_id, &spec.argv, &env) {
            Ok(launcher) => launcher,
            Err(err) => {
                self.state
                    .set_status(SessionStatus::Failed, Some("launcher did not start".to_string()));
                return Err(err);
            }
        };
        self.state.launcher_pid = launcher.pid();
        self.launcher = Some(launcher);

        log::debug!(
            "[session {}] YARN cluster kernel launched using YARN RM address: {}, pid: {:?}, response address: {}",
            self.state.kernel_id,
            self.resource_manager.active_endpoint(),
            self.state.launcher_pid,
            self.handle.listener().response_address()
        );
        self.state.set_status(SessionStatus::AwaitingApplicationId, None);

        match self.confirm_remote_startup(cancel).await {
            Ok(info) => Ok(info),
            Err(err) => {
                let status = match &err {
                    YKError::UnexpectedTerminalState { state, .. } => {
                        SessionStatus::from_application_state(*state)
                            .unwrap_or(SessionStatus::Failed)
                    }
                    _ => {
                        if let Err(kill_err) = self.terminate().await {
                            log::warn!(
                                "[session {}] Failed to terminate after launch error: {}",
                                self.state.kernel_id,
                                kill_err
                            );
                        }
                        match err {
                            YKError::Cancelled(_) => SessionStatus::Killed,
                            _ => SessionStatus::Failed,
                        }
                    }
                };
                self.state.set_status(status, Some(err.to_string()));
                err.log();
                Err(err)
            }
        }
    }

    fn connection_info(&self) -> Option<&ConnectionInfo> {
        self.connection_info.as_ref()
    }

    async fn poll(&mut self) -> YKResult<SessionStatus> {
        if self.state.status.is_terminal() {
            return Ok(self.state.status);
        }

        let Some(application_id) = self.discover_application_id(false).await? else {
            self.detect_launch_failure()?;
            return Ok(self.state.status);
        };

        match self.query_state(&application_id).await? {
            Some(state) => {
                self.state.observe(state);
                if let Some(status) = SessionStatus::from_application_state(state) {
                    self.state
                        .set_status(status, Some(format!("application {}", state)));
                }
            }
            None => {
                self.state.set_status(
                    SessionStatus::Failed,
                    Some(format!("application {} is unknown to YARN", application_id)),
                );
            }
        }
        Ok(self.state.status)
    }

    async fn monitor(&mut self, cancel: &CancellationToken) -> YKResult<SessionStatus> {
        loop {
            let status = self.poll().await?;
            if status.is_terminal() {
                log::info!(
                    "[session {}] Kernel application ended: {}",
                    self.state.kernel_id,
                    status
                );
                return Ok(status);
            }
            if self
                .sleep_or_cancel(self.config.poll_interval(), cancel)
                .await
                .is_err()
            {
                log::info!(
                    "[session {}] Stop requested; terminating kernel",
                    self.state.kernel_id
                );
                self.terminate().await?;
                return Ok(self.state.status);
            }
        }
    }

    async fn terminate(&mut self) -> YKResult<()> {
        let Some(application_id) = self.state.application_id.clone() else {
            self.kill_launcher().await?;
            self.state.set_status(
                SessionStatus::Killed,
                Some("no application id; stopped local launcher".to_string()),
            );
            return Ok(());
        };

        match self
            .resource_manager
            .cluster_application_kill(&application_id)
            .await
        {
            Ok(state) => self.state.observe(state),
            Err(RmError::NotFound(_)) => {
                log::info!(
                    "[session {}] Application {} not found; already terminated",
                    self.state.kernel_id,
                    application_id
                );
                self.state
                    .set_status(SessionStatus::Killed, Some("not found".to_string()));
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        }

        // Wait for YARN to move the application to a final state.
        let mut state = self.query_state(&application_id).await?;
        let mut attempts = 1;
        while let Some(current) = state {
            if current.is_final() || attempts > self.config.max_poll_attempts {
                break;
            }
            tokio::time::sleep(self.config.poll_interval()).await;
            state = self.query_state(&application_id).await?;
            attempts += 1;
        }

        match state {
            None => {
                self.state
                    .set_status(SessionStatus::Killed, Some("not found".to_string()));
                Ok(())
            }
            Some(state) if state.is_final() => {
                self.state.observe(state);
                let status =
                    SessionStatus::from_application_state(state).unwrap_or(SessionStatus::Killed);
                self.state.set_status(status, Some(format!("application {}", state)));
                log::debug!(
                    "[session {}] Application {} terminated in state {}",
                    self.state.kernel_id,
                    application_id,
                    state
                );
                Ok(())
            }
            Some(state) => {
                self.state.observe(state);
                self.kill_launcher().await?;
                Err(YKError::TerminationUnconfirmed {
                    kernel_id: self.state.kernel_id.clone(),
                    application_id,
                    state,
                })
            }
        }
    }

    async fn cleanup(&mut self) -> YKResult<()> {
        if let Some(mut launcher) = self.launcher.take() {
            log::debug!(
                "[session {}] Clearing possible defunct launcher process, pid={:?}",
                self.state.kernel_id,
                launcher.pid()
            );
            launcher.terminate().await?;
        }
        self.state.launcher_pid = None;
        self.state.reset_application();
        self.connection_info = None;
        self.launch_started_ms = None;
        Ok(())
    }

    fn lifecycle_info(&self) -> LifecycleInfo {
        LifecycleInfo {
            kernel_id: self.state.kernel_id.clone(),
            application_id: self.state.application_id.clone(),
            assigned_host: self.state.assigned_host.clone(),
            assigned_ip: self.state.assigned_ip,
            launcher_pid: self.state.launcher_pid,
            connection_info: self.connection_info.clone(),
        }
    }

    fn load_lifecycle_info(&mut self, info: LifecycleInfo) -> YKResult<()> {
        if info.kernel_id != self.state.kernel_id {
            return Err(YKError::Config(format!(
                "Lifecycle info for kernel '{}' cannot be loaded into session '{}'",
                info.kernel_id, self.state.kernel_id
            )));
        }
        self.state.application_id = info.application_id;
        self.state.assigned_host = info.assigned_host;
        self.state.assigned_ip = info.assigned_ip;
        self.state.launcher_pid = info.launcher_pid;
        self.connection_info = info.connection_info;

        let status = if self.state.application_id.is_some() {
            SessionStatus::Running
        } else {
            SessionStatus::Init
        };
        self.state.set_status(status, Some("loaded lifecycle info".to_string()));
        Ok(())
    }

    fn shutdown_wait_time(&self) -> Duration {
        self.config.shutdown_wait_time()
    }
}

/// Roughly 30 years; stands in for a launch timeout too large to add to an
/// `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// `start + timeout`, saturating at a far-future deadline.
pub fn deadline_after(start: Instant, timeout: Duration) -> Instant {
    start
        .checked_add(timeout)
        .or_else(|| start.checked_add(FAR_FUTURE))
        .unwrap_or(start)
}

fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}

async fn resolve_host(kernel_id: &str, host: &str) -> Option<IpAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Some(ip);
    }
    match tokio::net::lookup_host((host, 0)).await {
        Ok(mut addrs) => addrs.next().map(|addr| addr.ip()),
        Err(e) => {
            log::warn!(
                "[session {}] Could not resolve assigned host '{}': {}",
                kernel_id,
                host,
                e
            );
            None
        }
    }
}
