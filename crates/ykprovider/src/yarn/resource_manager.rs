//
// resource_manager.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
//
//

//! A client for the YARN Resource Manager REST API, with failover between
//! high-availability endpoints.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::application::{YarnApplication, YarnApplicationState};

const CLUSTER_PATH: &str = "/ws/v1/cluster";

#[derive(Debug, Error)]
pub enum RmError {
    #[error("no Resource Manager reachable at {}", endpoints.join(", "))]
    Unreachable { endpoints: Vec<String> },

    #[error("application '{0}' not found")]
    NotFound(String),

    #[error("HTTP {status} from {url}: {body}")]
    Status {
        status: u16,
        url: String,
        body: String,
    },

    #[error("invalid response from {url}: {reason}")]
    InvalidResponse { url: String, reason: String },

    #[error("invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
}

/// Subset of `/ws/v1/cluster/info`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterInfo {
    #[serde(default)]
    pub state: Option<String>,

    /// `ACTIVE` or `STANDBY` when the Resource Managers run in HA mode
    #[serde(default)]
    pub ha_state: Option<String>,

    #[serde(default)]
    pub resource_manager_version: Option<String>,
}

#[derive(Deserialize)]
struct ClusterInfoResponse {
    #[serde(rename = "clusterInfo")]
    cluster_info: ClusterInfo,
}

#[derive(Deserialize)]
struct AppsResponse {
    apps: Option<AppsList>,
}

#[derive(Deserialize)]
struct AppsList {
    #[serde(default)]
    app: Vec<YarnApplication>,
}

#[derive(Deserialize)]
struct AppResponse {
    app: YarnApplication,
}

#[derive(Serialize, Deserialize)]
struct AppState {
    state: YarnApplicationState,
}

/// The Resource Manager operations the lifecycle manager relies on.
#[async_trait]
pub trait ResourceManagerApi: Send + Sync {
    /// Cluster information, including the HA state of the endpoint.
    async fn cluster_info(&self) -> Result<ClusterInfo, RmError>;

    /// Applications started at or after `started_time_begin` (ms since epoch).
    async fn cluster_applications(
        &self,
        started_time_begin: Option<i64>,
    ) -> Result<Vec<YarnApplication>, RmError>;

    async fn cluster_application(&self, application_id: &str) -> Result<YarnApplication, RmError>;

    async fn cluster_application_state(
        &self,
        application_id: &str,
    ) -> Result<YarnApplicationState, RmError>;

    /// Ask YARN to kill an application. Returns the state reported in the
    /// response, which may still be a running state while the kill proceeds.
    async fn cluster_application_kill(
        &self,
        application_id: &str,
    ) -> Result<YarnApplicationState, RmError>;

    /// The endpoint the next request will be sent to.
    fn active_endpoint(&self) -> String;
}

/// HTTP implementation of [`ResourceManagerApi`].
///
/// Requests go to the active endpoint. When it cannot be reached (connection
/// failure or timeout) the remaining endpoints are tried in order and the
/// first one that answers becomes the active endpoint.
pub struct ResourceManager {
    client: reqwest::Client,
    endpoints: Vec<String>,
    active: AtomicUsize,
    spnego_token: Option<String>,
}

impl ResourceManager {
    pub fn new(
        endpoints: &[String],
        request_timeout: Duration,
        spnego_token: Option<String>,
    ) -> Result<Self, RmError> {
        if endpoints.is_empty() {
            return Err(RmError::InvalidEndpoint {
                endpoint: String::new(),
                reason: "no endpoints configured".to_string(),
            });
        }
        let endpoints = endpoints
            .iter()
            .map(|e| normalize_endpoint(e))
            .collect::<Result<Vec<_>, _>>()?;

        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .connect_timeout(request_timeout)
            .build()
            .map_err(|e| RmError::InvalidEndpoint {
                endpoint: endpoints.join(", "),
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            endpoints,
            active: AtomicUsize::new(0),
            spnego_token,
        })
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    /// Probe each endpoint's cluster info and make the one reporting
    /// `haState: ACTIVE` the active endpoint. Without an HA answer the first
    /// reachable endpoint is used. Returns the chosen endpoint.
    pub async fn select_active_endpoint(&self) -> String {
        if self.endpoints.len() > 1 {
            let mut first_reachable = None;
            for (index, endpoint) in self.endpoints.iter().enumerate() {
                let url = format!("{}{}/info", endpoint, CLUSTER_PATH);
                match self.get_json::<ClusterInfoResponse>(&url).await {
                    Ok(info) => {
                        let ha_state = info.cluster_info.ha_state.unwrap_or_default();
                        log::debug!("Resource Manager {} reports HA state '{}'", endpoint, ha_state);
                        if ha_state.eq_ignore_ascii_case("ACTIVE") {
                            self.active.store(index, Ordering::SeqCst);
                            return endpoint.clone();
                        }
                        first_reachable.get_or_insert(index);
                    }
                    Err(err) => {
                        log::warn!("Resource Manager {} did not answer: {}", endpoint, err);
                    }
                }
            }
            if let Some(index) = first_reachable {
                self.active.store(index, Ordering::SeqCst);
            }
        }
        self.active_endpoint()
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, RmError> {
        let response = self
            .request(Method::GET, url)
            .send()
            .await
            .map_err(|e| RmError::InvalidResponse {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        Self::read_json(url, None, response).await
    }

    fn request(&self, method: Method, url: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.spnego_token {
            Some(token) => builder.header(AUTHORIZATION, format!("Negotiate {}", token)),
            None => builder,
        }
    }

    /// Send a request to the active endpoint, failing over to the others
    /// when it is unreachable.
    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&serde_json::Value>,
    ) -> Result<(String, reqwest::Response), RmError> {
        let start = self.active.load(Ordering::SeqCst);
        let count = self.endpoints.len();

        for offset in 0..count {
            let index = (start + offset) % count;
            let url = format!("{}{}{}", self.endpoints[index], CLUSTER_PATH, path);

            let mut builder = self.request(method.clone(), &url);
            if !query.is_empty() {
                builder = builder.query(query);
            }
            if let Some(body) = body {
                builder = builder.json(body);
            }

            match builder.send().await {
                Ok(response) => {
                    if index != start {
                        log::warn!(
                            "Resource Manager {} unreachable; switched to {}",
                            self.endpoints[start],
                            self.endpoints[index]
                        );
                        self.active.store(index, Ordering::SeqCst);
                    }
                    return Ok((url, response));
                }
                Err(err) if err.is_connect() || err.is_timeout() => {
                    log::warn!(
                        "Resource Manager address '{}' did not respond ({}). Is the resource manager running?",
                        self.endpoints[index],
                        err
                    );
                }
                Err(err) => {
                    return Err(RmError::InvalidResponse {
                        url,
                        reason: err.to_string(),
                    });
                }
            }
        }

        Err(RmError::Unreachable {
            endpoints: self.endpoints.clone(),
        })
    }

    async fn read_json<T: DeserializeOwned>(
        url: &str,
        application_id: Option<&str>,
        response: reqwest::Response,
    ) -> Result<T, RmError> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            if let Some(id) = application_id {
                return Err(RmError::NotFound(id.to_string()));
            }
        }
        let bytes = response.bytes().await.map_err(|e| RmError::InvalidResponse {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if !status.is_success() {
            return Err(RmError::Status {
                status: status.as_u16(),
                url: url.to_string(),
                body: String::from_utf8_lossy(&bytes).to_string(),
            });
        }
        serde_json::from_slice(&bytes).map_err(|e| RmError::InvalidResponse {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl ResourceManagerApi for ResourceManager {
    async fn cluster_info(&self) -> Result<ClusterInfo, RmError> {
        let (url, response) = self.send(Method::GET, "/info", &[], None).await?;
        let info: ClusterInfoResponse = Self::read_json(&url, None, response).await?;
        Ok(info.cluster_info)
    }

    async fn cluster_applications(
        &self,
        started_time_begin: Option<i64>,
    ) -> Result<Vec<YarnApplication>, RmError> {
        let query = match started_time_begin {
            Some(begin) => vec![("startedTimeBegin", begin.to_string())],
            None => vec![],
        };
        let (url, response) = self.send(Method::GET, "/apps", &query, None).await?;
        let apps: AppsResponse = Self::read_json(&url, None, response).await?;
        Ok(apps.apps.map(|list| list.app).unwrap_or_default())
    }

    async fn cluster_application(&self, application_id: &str) -> Result<YarnApplication, RmError> {
        let path = format!("/apps/{}", application_id);
        let (url, response) = self.send(Method::GET, &path, &[], None).await?;
        let app: AppResponse = Self::read_json(&url, Some(application_id), response).await?;
        Ok(app.app)
    }

    async fn cluster_application_state(
        &self,
        application_id: &str,
    ) -> Result<YarnApplicationState, RmError> {
        let path = format!("/apps/{}/state", application_id);
        let (url, response) = self.send(Method::GET, &path, &[], None).await?;
        let state: AppState = Self::read_json(&url, Some(application_id), response).await?;
        Ok(state.state)
    }

    async fn cluster_application_kill(
        &self,
        application_id: &str,
    ) -> Result<YarnApplicationState, RmError> {
        let path = format!("/apps/{}/state", application_id);
        let body = serde_json::json!({ "state": YarnApplicationState::Killed });
        let (url, response) = self.send(Method::PUT, &path, &[], Some(&body)).await?;
        let state: AppState = Self::read_json(&url, Some(application_id), response).await?;
        Ok(state.state)
    }

    fn active_endpoint(&self) -> String {
        self.endpoints[self.active.load(Ordering::SeqCst)].clone()
    }
}

/// Strip the trailing `/` and any trailing `/ws/v1/cluster` from an endpoint,
/// so both `http://rm:8088` and `http://rm:8088/ws/v1/cluster/` are accepted.
pub fn normalize_endpoint(endpoint: &str) -> Result<String, RmError> {
    let parsed = url::Url::parse(endpoint.trim()).map_err(|e| RmError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason: e.to_string(),
    })?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(RmError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: format!("unsupported scheme '{}'", parsed.scheme()),
        });
    }

    let mut normalized = parsed.as_str().trim_end_matches('/').to_string();
    if let Some(stripped) = normalized.strip_suffix(CLUSTER_PATH) {
        normalized = stripped.trim_end_matches('/').to_string();
    }
    Ok(normalized)
}
