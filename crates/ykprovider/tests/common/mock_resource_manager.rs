//
// mock_resource_manager.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
//
//

//! An in-memory Resource Manager whose answers are scripted by the test.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use ykprovider::yarn::resource_manager::{ClusterInfo, ResourceManagerApi, RmError};
use ykprovider::yarn::{YarnApplication, YarnApplicationState};

#[derive(Default)]
pub struct ScriptedResourceManager {
    /// Successive answers to the application listing; the last one repeats
    listings: Mutex<VecDeque<Vec<YarnApplication>>>,

    /// Applications known by id
    apps: Mutex<HashMap<String, YarnApplication>>,

    /// Successive answers to state queries, before falling back to the
    /// application's recorded state
    states: Mutex<VecDeque<YarnApplicationState>>,

    /// Kill requests report not-found
    kill_not_found: bool,

    /// Kill requests leave the application's state unchanged
    ignore_kill: bool,

    pub list_calls: AtomicUsize,
    pub app_calls: AtomicUsize,
    pub state_calls: AtomicUsize,
    pub kill_calls: AtomicUsize,
    pub started_time_begin: Mutex<Option<i64>>,
}

impl ScriptedResourceManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_listings(self, listings: Vec<Vec<YarnApplication>>) -> Self {
        *self.listings.lock().unwrap() = listings.into();
        self
    }

    pub fn with_app(self, app: YarnApplication) -> Self {
        self.apps.lock().unwrap().insert(app.id.clone(), app);
        self
    }

    pub fn with_states(self, states: Vec<YarnApplicationState>) -> Self {
        *self.states.lock().unwrap() = states.into();
        self
    }

    pub fn kill_not_found(mut self) -> Self {
        self.kill_not_found = true;
        self
    }

    pub fn ignore_kill(mut self) -> Self {
        self.ignore_kill = true;
        self
    }

    pub fn calls(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResourceManagerApi for ScriptedResourceManager {
    async fn cluster_info(&self) -> Result<ClusterInfo, RmError> {
        Ok(ClusterInfo {
            state: Some("STARTED".to_string()),
            ha_state: Some("ACTIVE".to_string()),
            resource_manager_version: Some("3.3.6".to_string()),
        })
    }

    async fn cluster_applications(
        &self,
        started_time_begin: Option<i64>,
    ) -> Result<Vec<YarnApplication>, RmError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        *self.started_time_begin.lock().unwrap() = started_time_begin;
        let mut listings = self.listings.lock().unwrap();
        if listings.len() > 1 {
            Ok(listings.pop_front().unwrap_or_default())
        } else {
            Ok(listings.front().cloned().unwrap_or_default())
        }
    }

    async fn cluster_application(&self, application_id: &str) -> Result<YarnApplication, RmError> {
        self.app_calls.fetch_add(1, Ordering::SeqCst);
        self.apps
            .lock()
            .unwrap()
            .get(application_id)
            .cloned()
            .ok_or_else(|| RmError::NotFound(application_id.to_string()))
    }

    async fn cluster_application_state(
        &self,
        application_id: &str,
    ) -> Result<YarnApplicationState, RmError> {
        self.state_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(state) = self.states.lock().unwrap().pop_front() {
            return Ok(state);
        }
        self.apps
            .lock()
            .unwrap()
            .get(application_id)
            .map(|app| app.state)
            .ok_or_else(|| RmError::NotFound(application_id.to_string()))
    }

    async fn cluster_application_kill(
        &self,
        application_id: &str,
    ) -> Result<YarnApplicationState, RmError> {
        self.kill_calls.fetch_add(1, Ordering::SeqCst);
        if self.kill_not_found {
            return Err(RmError::NotFound(application_id.to_string()));
        }
        let mut apps = self.apps.lock().unwrap();
        let app = apps
            .get_mut(application_id)
            .ok_or_else(|| RmError::NotFound(application_id.to_string()))?;
        let reported = app.state;
        if !self.ignore_kill && !app.state.is_final() {
            app.state = YarnApplicationState::Killed;
        }
        Ok(reported)
    }

    fn active_endpoint(&self) -> String {
        "http://scripted-rm:8088".to_string()
    }
}
