//
// mod.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
//
//

#![allow(dead_code)]

pub mod mock_resource_manager;

use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;

use tokio::io::AsyncWriteExt;
use ykprovider::config::ProviderConfig;
use ykprovider::lifecycle::{KernelSessionHandle, ResponseListener};
use ykprovider::yarn::{YarnApplication, YarnApplicationState};
use ykshared::connection_info::ConnectionInfo;
use ykshared::kernel_spec::KERNEL_FILE;
use ykshared::port_range::PortRange;

/// A provider configuration that polls quickly.
pub fn fast_config() -> ProviderConfig {
    ProviderConfig {
        poll_interval: 0.01,
        max_poll_interval: 0.05,
        backoff_factor: 1.5,
        max_discovery_attempts: 20,
        max_poll_attempts: 5,
        launch_timeout: 10.0,
        request_timeout: 1.0,
        ..ProviderConfig::default()
    }
}

/// A session handle whose response listener is bound on loopback.
pub fn loopback_handle(kernel_id: &str) -> KernelSessionHandle {
    let listener = ResponseListener::bind(Some(IpAddr::V4(Ipv4Addr::LOCALHOST)), PortRange::ANY)
        .expect("Failed to bind response listener");
    KernelSessionHandle::new(kernel_id.to_string(), listener)
}

/// A YARN application record.
pub fn application(
    id: &str,
    name: &str,
    state: YarnApplicationState,
    am_host_http_address: Option<&str>,
) -> YarnApplication {
    YarnApplication {
        id: id.to_string(),
        name: name.to_string(),
        state,
        final_status: None,
        am_host_http_address: am_host_http_address.map(str::to_string),
        started_time: Some(1_700_000_000_000),
        user: Some("jovyan".to_string()),
        queue: Some("default".to_string()),
        tracking_url: None,
    }
}

/// Connection info as a launcher would report it.
pub fn connection_info(ip: &str) -> ConnectionInfo {
    ConnectionInfo {
        control_port: 50001,
        shell_port: 50002,
        stdin_port: 50003,
        hb_port: 50004,
        iopub_port: 50005,
        ip: ip.to_string(),
        key: "a0436f6c-1916-498b-8eb9-e81ab9368e84".to_string(),
        transport: "tcp".to_string(),
        signature_scheme: "hmac-sha256".to_string(),
        kernel_name: Some("yarnkp_spark_python".to_string()),
        pid: Some(4242),
        pgid: Some(4242),
        comm_port: Some(50006),
    }
}

/// Play the launcher's part of the response protocol.
pub async fn send_connection_info(address: SocketAddr, info: &ConnectionInfo) {
    let mut stream = tokio::net::TcpStream::connect(address)
        .await
        .expect("Failed to connect to response address");
    let payload = serde_json::to_vec(info).unwrap();
    stream.write_all(&payload).await.unwrap();
    stream.shutdown().await.unwrap();
}

/// A kernelspec descriptor with the given launcher argv.
pub fn yarn_kernel_spec_json(display_name: &str, argv: &[&str]) -> serde_json::Value {
    serde_json::json!({
        "display_name": display_name,
        "language": "python",
        "argv": argv,
        "env": {
            "SPARK_HOME": "/usr/hdp/current/spark2-client",
            "LAUNCH_OPTS": "--kernel-id {kernel_id}"
        },
        "metadata": {
            "lifecycle_manager": {
                "class_name": "yarn_kernel_provider.yarn.YarnKernelLifecycleManager",
                "config": {
                    "yarn_endpoint": "http://rm.example.com:8088/ws/v1/cluster"
                }
            },
            "debugger": false
        }
    })
}

/// Write `descriptor` as the kernelspec `name` under `root`.
pub fn write_kernel_spec(root: &Path, name: &str, descriptor: &serde_json::Value) {
    let dir = root.join(name);
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join(KERNEL_FILE),
        serde_json::to_string_pretty(descriptor).unwrap(),
    )
    .unwrap();
}
