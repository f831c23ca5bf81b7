//
// session_state.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
//
//

use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::yarn::application::YarnApplicationState;

/// Where a kernel session is in its YARN lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    /// Created, launcher not started
    Init,

    /// Launcher started; waiting for YARN to report the application
    AwaitingApplicationId,

    /// Application id and host are known
    Running,

    /// YARN reports the application finished
    Completed,

    /// The application was killed
    Killed,

    /// The application failed or could not be started
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Killed | SessionStatus::Failed
        )
    }

    /// The session status corresponding to a terminal YARN state, if it is one.
    pub fn from_application_state(state: YarnApplicationState) -> Option<Self> {
        match state {
            YarnApplicationState::Finished => Some(SessionStatus::Completed),
            YarnApplicationState::Killed => Some(SessionStatus::Killed),
            YarnApplicationState::Failed => Some(SessionStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            SessionStatus::Init => "INIT",
            SessionStatus::AwaitingApplicationId => "AWAITING_APPLICATION_ID",
            SessionStatus::Running => "RUNNING",
            SessionStatus::Completed => "COMPLETED",
            SessionStatus::Killed => "KILLED",
            SessionStatus::Failed => "FAILED",
        };
        write!(f, "{}", s)
    }
}

/// The mutable state of one kernel session.
///
/// Does not implement the Clone trait; only one instance should exist per
/// kernel id.
#[derive(Debug)]
pub struct SessionState {
    /// The kernel id this session supervises.
    pub kernel_id: String,

    /// The session's current status.
    pub status: SessionStatus,

    /// The YARN application id, once discovered.
    pub application_id: Option<String>,

    /// The last application state YARN reported.
    pub last_known_state: Option<YarnApplicationState>,

    /// The host the application master was placed on.
    pub assigned_host: Option<String>,

    /// The resolved address of `assigned_host`.
    pub assigned_ip: Option<IpAddr>,

    /// The local launcher's process id, while it is running.
    pub launcher_pid: Option<u32>,
}

impl SessionState {
    pub fn new(kernel_id: String) -> Self {
        SessionState {
            kernel_id,
            status: SessionStatus::Init,
            application_id: None,
            last_known_state: None,
            assigned_host: None,
            assigned_ip: None,
            launcher_pid: None,
        }
    }

    /// Set the session's status.
    pub fn set_status(&mut self, status: SessionStatus, reason: Option<String>) {
        if self.status == status {
            return;
        }
        log::debug!(
            "[session {}] status '{}' => '{}' {}",
            self.kernel_id,
            self.status,
            status,
            match reason {
                Some(ref r) => format!("({})", r),
                None => "".to_string(),
            }
        );
        self.status = status;
    }

    /// Record a state reported by YARN, logging changes.
    pub fn observe(&mut self, state: YarnApplicationState) {
        if self.last_known_state != Some(state) {
            log::debug!(
                "[session {}] application {} is {}",
                self.kernel_id,
                self.application_id.as_deref().unwrap_or("<unknown>"),
                state
            );
            self.last_known_state = Some(state);
        }
    }

    /// Forget everything learned about the remote application.
    pub fn reset_application(&mut self) {
        self.application_id = None;
        self.last_known_state = None;
        self.assigned_host = None;
        self.assigned_ip = None;
    }
}
