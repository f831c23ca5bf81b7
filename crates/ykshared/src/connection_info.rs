//
// connection_info.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
//
//

use std::error::Error;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// The kernel's connection details, as reported by a remote launcher on the
/// response address. The port and key fields mirror the Jupyter connection
/// file; the trailing fields are launcher extras.
#[serde_with::skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ConnectionInfo {
    /// The port for control messages
    pub control_port: u16,

    /// The port for shell messages
    pub shell_port: u16,

    /// The port for stdin messages
    pub stdin_port: u16,

    /// The port for heartbeat messages
    pub hb_port: u16,

    /// The port for IOPub messages
    pub iopub_port: u16,

    /// The IP address for the connection
    pub ip: String,

    /// The key for messages
    #[serde(default)]
    pub key: String,

    /// The transport protocol
    #[serde(default = "default_transport")]
    pub transport: String,

    /// The signature scheme for messages
    #[serde(default = "default_signature_scheme")]
    pub signature_scheme: String,

    /// The kernel name, when the launcher reports one
    pub kernel_name: Option<String>,

    /// The launcher's process id on the remote host
    pub pid: Option<u32>,

    /// The launcher's process group id on the remote host
    pub pgid: Option<u32>,

    /// The port the launcher listens on for signal and shutdown requests
    pub comm_port: Option<u16>,
}

fn default_transport() -> String {
    "tcp".to_string()
}

fn default_signature_scheme() -> String {
    "hmac-sha256".to_string()
}

impl ConnectionInfo {
    /// Parse a connection info record from a launcher payload.
    pub fn from_slice(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    /// Read a connection file.
    pub fn from_file<P: AsRef<Path>>(connection_file: P) -> Result<Self, Box<dyn Error>> {
        let file = File::open(connection_file)?;
        let reader = BufReader::new(file);
        let info = serde_json::from_reader(reader)?;
        Ok(info)
    }

    /// Write this record as a Jupyter connection file.
    pub fn to_file<P: AsRef<Path>>(&self, connection_file: P) -> Result<(), Box<dyn Error>> {
        let file = File::create(connection_file)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    /// Given a port, return a URI-like string that can be used to connect to
    /// the port, given the other parameters in the connection info.
    ///
    /// Example: `32` => `"tcp://127.0.0.1:32"`
    pub fn endpoint(&self, port: u16) -> String {
        format!("{}://{}:{}", self.transport, self.ip, port)
    }
}
