//
// config.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
//
//

use std::time::Duration;

use figment::providers::{Env, Serialized};
use figment::Figment;
use serde::{Deserialize, Serialize};
use ykshared::kernel_spec::YarnLifecycleConfig;

use crate::error::{YKError, YKResult};

/// The Resource Manager used when neither the kernelspec nor the provider
/// configuration names one.
pub const DEFAULT_YARN_ENDPOINT: &str = "http://localhost:8088";

/// Provider-wide settings. Durations are in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Resource Manager used by kernelspecs that do not name one
    pub yarn_endpoint: Option<String>,

    /// Alternate (HA) Resource Manager used by kernelspecs that do not name one
    pub alt_yarn_endpoint: Option<String>,

    /// Whether the Resource Manager requires SPNEGO, unless the kernelspec says
    pub yarn_endpoint_security_enabled: bool,

    /// A pre-acquired SPNEGO token sent as `Authorization: Negotiate <token>`
    pub spnego_token: Option<String>,

    /// Delay between polls of the Resource Manager
    pub poll_interval: f64,

    /// Upper bound for the discovery delay as it backs off
    pub max_poll_interval: f64,

    /// Growth factor applied to the discovery delay after each miss
    pub backoff_factor: f64,

    /// Maximum number of listing polls while discovering the application id
    pub max_discovery_attempts: u32,

    /// Maximum number of state polls after a kill request
    pub max_poll_attempts: u32,

    /// Time allowed for the application to start and report connection info
    pub launch_timeout: f64,

    /// Minimum time the framework should wait for a kernel to shut down
    pub shutdown_wait_time: f64,

    /// Timeout for a single Resource Manager request
    pub request_timeout: f64,

    /// Address the response listener binds to; defaults to all interfaces
    pub response_ip: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            yarn_endpoint: None,
            alt_yarn_endpoint: None,
            yarn_endpoint_security_enabled: false,
            spnego_token: None,
            poll_interval: 0.5,
            max_poll_interval: 5.0,
            backoff_factor: 1.5,
            max_discovery_attempts: 60,
            max_poll_attempts: 10,
            launch_timeout: 30.0,
            shutdown_wait_time: 15.0,
            request_timeout: 10.0,
            response_ip: None,
        }
    }
}

impl ProviderConfig {
    /// Load the configuration from the defaults and the environment.
    ///
    /// `YKP_*` variables map onto fields by name (`YKP_POLL_INTERVAL`,
    /// `YKP_YARN_ENDPOINT`, ...). The older `EG_POLL_INTERVAL`,
    /// `EG_MAX_POLL_ATTEMPTS` and `EG_YARN_SHUTDOWN_WAIT_TIME` variables are
    /// honored too, with `YKP_*` taking precedence.
    pub fn load() -> YKResult<Self> {
        Self::figment().extract().map_err(YKError::from)
    }

    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(ProviderConfig::default()))
            .merge(
                Env::prefixed("EG_")
                    .only(&["poll_interval", "max_poll_attempts", "yarn_shutdown_wait_time"])
                    .map(|key| key.as_str().replace("yarn_shutdown_wait_time", "shutdown_wait_time").into()),
            )
            .merge(Env::prefixed("YKP_"))
    }

    pub fn poll_interval(&self) -> Duration {
        seconds(self.poll_interval)
    }

    pub fn max_poll_interval(&self) -> Duration {
        seconds(self.max_poll_interval).max(self.poll_interval())
    }

    pub fn launch_timeout(&self) -> Duration {
        seconds(self.launch_timeout)
    }

    pub fn shutdown_wait_time(&self) -> Duration {
        seconds(self.shutdown_wait_time)
    }

    pub fn request_timeout(&self) -> Duration {
        seconds(self.request_timeout)
    }

    /// The delay before discovery attempt `attempt` (1-based), backing off
    /// geometrically from `poll_interval` up to `max_poll_interval`.
    pub fn discovery_delay(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.max(1.0);
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let cap = self.max_poll_interval.max(self.poll_interval);
        seconds((self.poll_interval * factor.powi(exponent)).min(cap))
    }

    /// Resolve the settings for one kernel: values in the kernelspec win over
    /// the provider-wide ones.
    pub fn for_kernel(&self, spec: &YarnLifecycleConfig) -> YKResult<KernelYarnConfig> {
        let (primary, alternate) = match &spec.yarn_endpoint {
            Some(primary) => (primary.clone(), spec.alt_yarn_endpoint.clone()),
            None => match &self.yarn_endpoint {
                Some(primary) => (
                    primary.clone(),
                    spec.alt_yarn_endpoint
                        .clone()
                        .or_else(|| self.alt_yarn_endpoint.clone()),
                ),
                None => {
                    log::info!(
                        "No YARN endpoint configured; using {}",
                        DEFAULT_YARN_ENDPOINT
                    );
                    (DEFAULT_YARN_ENDPOINT.to_string(), None)
                }
            },
        };

        let mut endpoints = vec![primary];
        if let Some(alternate) = alternate.filter(|alt| !alt.is_empty()) {
            endpoints.push(alternate);
        }

        let security_enabled = spec
            .yarn_endpoint_security_enabled
            .unwrap_or(self.yarn_endpoint_security_enabled);
        if security_enabled && self.spnego_token.is_none() {
            return Err(YKError::Config(
                "YARN endpoint security is enabled but no SPNEGO token is configured (YKP_SPNEGO_TOKEN)"
                    .to_string(),
            ));
        }

        let launch_timeout = match spec.launch_timeout {
            Some(secs) => seconds(secs),
            None => self.launch_timeout(),
        };

        Ok(KernelYarnConfig {
            endpoints,
            spnego_token: if security_enabled {
                self.spnego_token.clone()
            } else {
                None
            },
            launch_timeout,
        })
    }
}

/// The effective YARN settings for one kernel session.
#[derive(Debug, Clone)]
pub struct KernelYarnConfig {
    /// Primary endpoint first, then the alternate if configured
    pub endpoints: Vec<String>,

    /// The SPNEGO token when security is enabled
    pub spnego_token: Option<String>,

    pub launch_timeout: Duration,
}

/// Converts configured seconds to a `Duration`. Non-positive and NaN values
/// are zero; values too large for a `Duration` saturate.
fn seconds(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}
