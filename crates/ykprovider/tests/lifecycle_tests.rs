//
// lifecycle_tests.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
//
//

//! Tests for the YARN lifecycle manager against a scripted Resource Manager

#[path = "common/mod.rs"]
mod common;

use std::sync::Arc;
use std::time::Duration;

use common::mock_resource_manager::ScriptedResourceManager;
use common::{application, connection_info, fast_config, loopback_handle, send_connection_info};
use tokio_util::sync::CancellationToken;
use ykprovider::config::ProviderConfig;
use ykprovider::error::YKError;
use ykprovider::lifecycle::{
    KernelLifecycleManager, LifecycleInfo, SessionStatus, YarnLifecycleManager,
};
use ykprovider::yarn::YarnApplicationState;
use ykshared::kernel_spec::KernelSpec;

const APP_ID: &str = "application_1700000000000_0001";

fn kernel_spec(argv: &[&str]) -> KernelSpec {
    serde_json::from_value(common::yarn_kernel_spec_json("Spark Python (YARN Cluster)", argv))
        .expect("Failed to parse kernelspec")
}

fn manager(
    kernel_id: &str,
    rm: &Arc<ScriptedResourceManager>,
    config: ProviderConfig,
) -> YarnLifecycleManager {
    let launch_timeout = config.launch_timeout();
    YarnLifecycleManager::with_resource_manager(
        loopback_handle(kernel_id),
        rm.clone(),
        config,
        launch_timeout,
    )
}

fn attached(kernel_id: &str, rm: &Arc<ScriptedResourceManager>) -> YarnLifecycleManager {
    let mut manager = manager(kernel_id, rm, fast_config());
    manager
        .load_lifecycle_info(LifecycleInfo {
            kernel_id: kernel_id.to_string(),
            application_id: Some(APP_ID.to_string()),
            assigned_host: Some("worker-7".to_string()),
            assigned_ip: None,
            launcher_pid: None,
            connection_info: None,
        })
        .unwrap();
    manager
}

#[tokio::test]
async fn test_discovers_application_after_failed_polls() {
    let rm = Arc::new(
        ScriptedResourceManager::new()
            .with_listings(vec![
                vec![],
                vec![],
                vec![
                    application("application_1700000000000_0000", "other-kernel", YarnApplicationState::Running, None),
                    application(APP_ID, "k1", YarnApplicationState::Accepted, None),
                ],
            ])
            .with_app(application(
                APP_ID,
                "k1",
                YarnApplicationState::Running,
                Some("127.0.0.1:8042"),
            )),
    );
    let config = ProviderConfig {
        max_discovery_attempts: 5,
        ..fast_config()
    };
    let mut manager = manager("k1", &rm, config);
    assert_eq!(manager.status(), SessionStatus::Init);

    let address = manager.handle().listener().response_address();
    let sender = tokio::spawn(async move {
        send_connection_info(address, &connection_info("10.1.2.3")).await;
    });

    let cancel = CancellationToken::new();
    let info = manager
        .launch(&kernel_spec(&["sh", "-c", "exit 0"]), &cancel)
        .await
        .expect("Launch should succeed");
    sender.await.unwrap();

    assert_eq!(manager.status(), SessionStatus::Running);
    assert_eq!(manager.application_id(), Some(APP_ID));
    assert_eq!(manager.assigned_host(), Some("127.0.0.1"));
    assert_eq!(ScriptedResourceManager::calls(&rm.list_calls), 3);

    // The reported ip is replaced by the host YARN placed the kernel on
    assert_eq!(info.ip, "127.0.0.1");
    assert_eq!(info.shell_port, 50002);
    assert_eq!(manager.connection_info(), Some(&info));

    // Only applications started after the launch are considered
    assert!(rm.started_time_begin.lock().unwrap().is_some());
}

#[tokio::test]
async fn test_launcher_receives_kernel_id_and_response_address() {
    let scratch = tempfile::tempdir().unwrap();
    let out = scratch.path().join("launcher.out");
    let script = format!(
        "printf '%s %s' \"$KERNEL_ID\" \"$RESPONSE\" > {}.tmp && mv {}.tmp {}",
        out.display(),
        out.display(),
        out.display()
    );

    let rm = Arc::new(
        ScriptedResourceManager::new()
            .with_listings(vec![vec![application(
                APP_ID,
                "spark-k2",
                YarnApplicationState::Running,
                Some("127.0.0.1:8042"),
            )]])
            .with_app(application(
                APP_ID,
                "spark-k2",
                YarnApplicationState::Running,
                Some("127.0.0.1:8042"),
            )),
    );
    let mut manager = manager("k2", &rm, fast_config());
    let address = manager.handle().listener().response_address();

    let mut spec = kernel_spec(&["sh", "-c", &script]);
    spec.env
        .insert("RESPONSE".to_string(), "{response_address}".to_string());

    // Report back only once the launcher has written what it saw
    let watched = out.clone();
    let sender = tokio::spawn(async move {
        while !watched.exists() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        send_connection_info(address, &connection_info("127.0.0.1")).await;
    });

    manager
        .launch(&spec, &CancellationToken::new())
        .await
        .expect("Launch should succeed");
    sender.await.unwrap();

    let seen = std::fs::read_to_string(&out).unwrap();
    assert_eq!(seen, format!("k2 {}", address));
    assert!(manager.launcher_pid().is_some());

    manager.cleanup().await.unwrap();
    assert!(manager.launcher_pid().is_none());
}

#[tokio::test]
async fn test_discovery_respects_attempt_bound() {
    let rm = Arc::new(ScriptedResourceManager::new().with_listings(vec![vec![application(
        "application_1700000000000_0009",
        "someone-else",
        YarnApplicationState::Running,
        None,
    )]]));
    let config = ProviderConfig {
        max_discovery_attempts: 3,
        ..fast_config()
    };
    let mut manager = manager("k3", &rm, config);

    let err = manager
        .launch(&kernel_spec(&["sh", "-c", "exit 0"]), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        YKError::DiscoveryTimeout { kernel_id, reason } => {
            assert_eq!(kernel_id, "k3");
            assert!(reason.starts_with("Application ID is None"), "{}", reason);
        }
        other => panic!("Unexpected error: {}", other),
    }
    assert_eq!(ScriptedResourceManager::calls(&rm.list_calls), 3);
    assert_eq!(ScriptedResourceManager::calls(&rm.kill_calls), 0);
    assert_eq!(manager.status(), SessionStatus::Failed);
}

#[tokio::test]
async fn test_timeout_while_application_is_queued() {
    let rm = Arc::new(
        ScriptedResourceManager::new()
            .with_listings(vec![vec![application(APP_ID, "k4", YarnApplicationState::Accepted, None)]])
            .with_app(application(APP_ID, "k4", YarnApplicationState::Accepted, None)),
    );
    let config = ProviderConfig {
        launch_timeout: 0.2,
        ..fast_config()
    };
    let mut manager = manager("k4", &rm, config);

    let err = manager
        .launch(&kernel_spec(&["sh", "-c", "exit 0"]), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        YKError::DiscoveryTimeout { reason, .. } => {
            assert!(reason.starts_with("YARN resources unavailable"), "{}", reason);
        }
        other => panic!("Unexpected error: {}", other),
    }

    // The queued application is killed before the error is reported
    assert_eq!(ScriptedResourceManager::calls(&rm.kill_calls), 1);
    assert_eq!(manager.status(), SessionStatus::Failed);
}

#[tokio::test]
async fn test_timeout_waiting_for_connection_info() {
    let rm = Arc::new(
        ScriptedResourceManager::new()
            .with_listings(vec![vec![application(APP_ID, "k5", YarnApplicationState::Running, None)]])
            .with_app(application(
                APP_ID,
                "k5",
                YarnApplicationState::Running,
                Some("127.0.0.1:8042"),
            )),
    );
    let config = ProviderConfig {
        launch_timeout: 0.3,
        ..fast_config()
    };
    let mut manager = manager("k5", &rm, config);

    let err = manager
        .launch(&kernel_spec(&["sh", "-c", "exit 0"]), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        YKError::DiscoveryTimeout { reason, .. } => {
            assert!(reason.contains("is RUNNING, but waited too long"), "{}", reason);
        }
        other => panic!("Unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_unexpected_terminal_state_during_startup() {
    let rm = Arc::new(
        ScriptedResourceManager::new()
            .with_listings(vec![vec![application(APP_ID, "k6", YarnApplicationState::Accepted, None)]])
            .with_app(application(APP_ID, "k6", YarnApplicationState::Failed, None)),
    );
    let mut manager = manager("k6", &rm, fast_config());

    let err = manager
        .launch(&kernel_spec(&["sh", "-c", "exit 0"]), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        YKError::UnexpectedTerminalState {
            application_id,
            state,
            ..
        } => {
            assert_eq!(application_id, APP_ID);
            assert_eq!(state, YarnApplicationState::Failed);
        }
        other => panic!("Unexpected error: {}", other),
    }
    assert_eq!(manager.status(), SessionStatus::Failed);
}

#[tokio::test]
async fn test_failed_launcher_is_detected() {
    let rm = Arc::new(ScriptedResourceManager::new());
    let config = ProviderConfig {
        max_discovery_attempts: 500,
        max_poll_interval: 0.01,
        ..fast_config()
    };
    let mut manager = manager("k7", &rm, config);

    let err = manager
        .launch(&kernel_spec(&["sh", "-c", "exit 3"]), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, YKError::LauncherExited { .. }), "{}", err);
    assert_eq!(err.code(), "YK-12");
}

#[tokio::test]
async fn test_missing_launcher_fails_to_start() {
    let rm = Arc::new(ScriptedResourceManager::new());
    let mut manager = manager("k8", &rm, fast_config());

    let err = manager
        .launch(
            &kernel_spec(&["/nonexistent/yarn-kernel-launcher/run.sh"]),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, YKError::LauncherStartFailed { .. }), "{}", err);
    assert_eq!(manager.status(), SessionStatus::Failed);
    assert_eq!(ScriptedResourceManager::calls(&rm.list_calls), 0);
}

#[tokio::test]
async fn test_cancellation_terminates_launch() {
    let rm = Arc::new(ScriptedResourceManager::new());
    let config = ProviderConfig {
        max_discovery_attempts: 10_000,
        ..fast_config()
    };
    let mut manager = manager("k9", &rm, config);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });
    }

    let err = manager
        .launch(&kernel_spec(&["sh", "-c", "sleep 30"]), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, YKError::Cancelled(_)), "{}", err);
    assert_eq!(manager.status(), SessionStatus::Killed);
}

#[tokio::test]
async fn test_kill_of_unknown_application_succeeds() {
    let rm = Arc::new(ScriptedResourceManager::new().kill_not_found());
    let mut manager = attached("k10", &rm);

    manager.terminate().await.expect("Kill of a missing app is not an error");
    assert_eq!(manager.status(), SessionStatus::Killed);
    assert_eq!(ScriptedResourceManager::calls(&rm.kill_calls), 1);
}

#[tokio::test]
async fn test_kill_of_finished_application_succeeds() {
    let rm = Arc::new(ScriptedResourceManager::new().with_app(application(
        APP_ID,
        "k11",
        YarnApplicationState::Finished,
        Some("worker-7:8042"),
    )));
    let mut manager = attached("k11", &rm);

    manager.terminate().await.unwrap();
    assert_eq!(manager.status(), SessionStatus::Completed);
}

#[tokio::test]
async fn test_terminate_polls_until_final_state() {
    let rm = Arc::new(
        ScriptedResourceManager::new()
            .with_app(application(APP_ID, "k12", YarnApplicationState::Running, None))
            .with_states(vec![YarnApplicationState::Running, YarnApplicationState::Running]),
    );
    let mut manager = attached("k12", &rm);

    manager.terminate().await.unwrap();
    assert_eq!(manager.status(), SessionStatus::Killed);
    assert_eq!(ScriptedResourceManager::calls(&rm.state_calls), 3);
}

#[tokio::test]
async fn test_terminate_gives_up_after_max_poll_attempts() {
    let rm = Arc::new(
        ScriptedResourceManager::new()
            .with_app(application(APP_ID, "k13", YarnApplicationState::Running, None))
            .ignore_kill(),
    );
    let mut manager = attached("k13", &rm);

    let err = manager.terminate().await.unwrap_err();
    assert!(matches!(err, YKError::TerminationUnconfirmed { .. }), "{}", err);

    // One query after the kill request, then `max_poll_attempts` retries
    let expected = fast_config().max_poll_attempts as usize + 1;
    assert_eq!(ScriptedResourceManager::calls(&rm.state_calls), expected);
}

#[tokio::test]
async fn test_monitor_reports_completion() {
    let rm = Arc::new(
        ScriptedResourceManager::new()
            .with_app(application(APP_ID, "k14", YarnApplicationState::Finished, None))
            .with_states(vec![YarnApplicationState::Running, YarnApplicationState::Running]),
    );
    let mut manager = attached("k14", &rm);
    assert_eq!(manager.status(), SessionStatus::Running);

    let status = manager.monitor(&CancellationToken::new()).await.unwrap();
    assert_eq!(status, SessionStatus::Completed);
    assert_eq!(ScriptedResourceManager::calls(&rm.kill_calls), 0);
}

#[tokio::test]
async fn test_monitor_cancellation_kills_application() {
    let rm = Arc::new(
        ScriptedResourceManager::new().with_app(application(
            APP_ID,
            "k15",
            YarnApplicationState::Running,
            None,
        )),
    );
    let mut manager = attached("k15", &rm);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });
    }

    let status = manager.monitor(&cancel).await.unwrap();
    assert_eq!(status, SessionStatus::Killed);
    assert_eq!(ScriptedResourceManager::calls(&rm.kill_calls), 1);
}

#[tokio::test]
async fn test_poll_treats_vanished_application_as_failed() {
    let rm = Arc::new(ScriptedResourceManager::new());
    let mut manager = attached("k16", &rm);

    assert_eq!(manager.poll().await.unwrap(), SessionStatus::Failed);
}

#[tokio::test]
async fn test_lifecycle_info_round_trip() {
    let rm = Arc::new(ScriptedResourceManager::new());
    let manager = attached("k17", &rm);

    let info = manager.lifecycle_info();
    assert_eq!(info.application_id.as_deref(), Some(APP_ID));
    assert_eq!(info.assigned_host.as_deref(), Some("worker-7"));

    let json = serde_json::to_value(&info).unwrap();
    assert_eq!(json["application_id"], APP_ID);
    assert!(json.get("assigned_ip").is_none());

    let mut other = crate::manager("k17", &rm, fast_config());
    other
        .load_lifecycle_info(serde_json::from_value(json).unwrap())
        .unwrap();
    assert_eq!(other.lifecycle_info(), info);
}

#[tokio::test]
async fn test_lifecycle_info_for_another_kernel_is_rejected() {
    let rm = Arc::new(ScriptedResourceManager::new());
    let mut manager = manager("k18", &rm, fast_config());

    let err = manager
        .load_lifecycle_info(LifecycleInfo {
            kernel_id: "someone-else".to_string(),
            application_id: Some(APP_ID.to_string()),
            assigned_host: None,
            assigned_ip: None,
            launcher_pid: None,
            connection_info: None,
        })
        .unwrap_err();
    assert!(matches!(err, YKError::Config(_)));
    assert_eq!(manager.status(), SessionStatus::Init);
}

#[tokio::test]
async fn test_cleanup_forgets_application() {
    let rm = Arc::new(ScriptedResourceManager::new());
    let mut manager = attached("k19", &rm);

    manager.cleanup().await.unwrap();
    assert_eq!(manager.application_id(), None);
    assert_eq!(manager.assigned_host(), None);
    assert_eq!(manager.shutdown_wait_time(), Duration::from_secs(15));
}
