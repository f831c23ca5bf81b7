//
// application.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
//
//

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// An application state as reported by the YARN Resource Manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum YarnApplicationState {
    New,
    NewSaving,
    Submitted,
    Accepted,
    Running,
    Finished,
    Failed,
    Killed,
    #[serde(other)]
    Unknown,
}

impl YarnApplicationState {
    /// The application will not change state again.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            YarnApplicationState::Finished
                | YarnApplicationState::Failed
                | YarnApplicationState::Killed
        )
    }

    /// The application is queued, starting, or running.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            YarnApplicationState::New
                | YarnApplicationState::NewSaving
                | YarnApplicationState::Submitted
                | YarnApplicationState::Accepted
                | YarnApplicationState::Running
        )
    }
}

impl fmt::Display for YarnApplicationState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            YarnApplicationState::New => "NEW",
            YarnApplicationState::NewSaving => "NEW_SAVING",
            YarnApplicationState::Submitted => "SUBMITTED",
            YarnApplicationState::Accepted => "ACCEPTED",
            YarnApplicationState::Running => "RUNNING",
            YarnApplicationState::Finished => "FINISHED",
            YarnApplicationState::Failed => "FAILED",
            YarnApplicationState::Killed => "KILLED",
            YarnApplicationState::Unknown => "UNKNOWN",
        };
        write!(f, "{}", s)
    }
}

/// A YARN application record, as returned by `/ws/v1/cluster/apps`.
/// Only the fields the lifecycle manager reads are kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YarnApplication {
    pub id: String,

    #[serde(default)]
    pub name: String,

    pub state: YarnApplicationState,

    #[serde(default)]
    pub final_status: Option<String>,

    /// `host:port` of the application master's web UI, once it is placed
    #[serde(default)]
    pub am_host_http_address: Option<String>,

    /// Milliseconds since the epoch
    #[serde(default)]
    pub started_time: Option<i64>,

    #[serde(default)]
    pub user: Option<String>,

    #[serde(default)]
    pub queue: Option<String>,

    #[serde(default)]
    pub tracking_url: Option<String>,
}

impl YarnApplication {
    /// The host the application master landed on, if it has been placed.
    pub fn am_host(&self) -> Option<&str> {
        let address = self.am_host_http_address.as_deref()?;
        let host = address.split(':').next().unwrap_or_default();
        if host.is_empty() {
            None
        } else {
            Some(host)
        }
    }
}

/// Orders application ids (`application_<cluster timestamp>_<sequence>`)
/// numerically, so `application_1_10000` sorts after `application_1_9999`.
/// Ids that don't follow the pattern are compared as strings.
pub fn compare_application_ids(a: &str, b: &str) -> Ordering {
    match (parse_application_id(a), parse_application_id(b)) {
        (Some(a), Some(b)) => a.cmp(&b),
        _ => a.cmp(b),
    }
}

fn parse_application_id(id: &str) -> Option<(u64, u64)> {
    let mut parts = id.strip_prefix("application_")?.split('_');
    let cluster = parts.next()?.parse().ok()?;
    let sequence = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((cluster, sequence))
}

/// Picks the newest application whose name carries `kernel_id`. Kernel
/// restarts reuse the kernel id, so several applications can match.
/// Applications in a final state are skipped when `ignore_final_states` is set.
pub fn select_kernel_application(
    apps: Vec<YarnApplication>,
    kernel_id: &str,
    ignore_final_states: bool,
) -> Option<YarnApplication> {
    apps.into_iter()
        .filter(|app| !app.id.is_empty() && app.name.contains(kernel_id))
        .filter(|app| !(ignore_final_states && app.state.is_final()))
        .max_by(|a, b| compare_application_ids(&a.id, &b.id))
}
