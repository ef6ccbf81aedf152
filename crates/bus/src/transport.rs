use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::BusError;

/// Directory holding IPC socket files.
pub const IPC_DIR: &str = "/tmp/nexgrid";

/// Endpoint of a bus socket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "address")]
pub enum Transport {
    /// Unix domain socket under [`IPC_DIR`]; for same-host deployments.
    Ipc(String),

    /// TCP for distributed deployments.
    Tcp { host: String, port: u16 },
}

impl Transport {
    /// IPC transport named `name` (socket file `{IPC_DIR}/{name}.sock`).
    pub fn ipc(name: &str) -> Self {
        Self::Ipc(name.to_string())
    }

    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    /// ZeroMQ endpoint address string.
    pub fn endpoint(&self) -> String {
        match self {
            Self::Ipc(name) => format!("ipc://{IPC_DIR}/{name}.sock"),
            Self::Tcp { host, port } => format!("tcp://{host}:{port}"),
        }
    }

    /// Filesystem path of an IPC socket; `None` for TCP.
    pub fn ipc_path(&self) -> Option<PathBuf> {
        match self {
            Self::Ipc(name) => Some(Path::new(IPC_DIR).join(format!("{name}.sock"))),
            Self::Tcp { .. } => None,
        }
    }

    /// Create the IPC socket directory if needed. No-op for TCP.
    pub fn ensure_ipc_dir(&self) -> std::io::Result<()> {
        if let Some(parent) = self.ipc_path().as_deref().and_then(Path::parent) {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

impl FromStr for Transport {
    type Err = BusError;

    /// Parse `ipc:///tmp/nexgrid/<name>.sock` or `tcp://host:port`.
    fn from_str(endpoint: &str) -> Result<Self, Self::Err> {
        if let Some(path) = endpoint.strip_prefix("ipc://") {
            let name = Path::new(path)
                .file_stem()
                .and_then(|s| s.to_str())
                .filter(|s| !s.is_empty())
                .ok_or_else(|| BusError::Config(format!("ipc endpoint '{endpoint}' has no socket name")))?;
            return Ok(Self::ipc(name));
        }

        if let Some(addr) = endpoint.strip_prefix("tcp://") {
            let (host, port) = addr
                .rsplit_once(':')
                .ok_or_else(|| BusError::Config(format!("tcp endpoint '{endpoint}' has no port")))?;
            let port = port
                .parse()
                .map_err(|_| BusError::Config(format!("tcp endpoint '{endpoint}' has an invalid port")))?;
            if host.is_empty() {
                return Err(BusError::Config(format!("tcp endpoint '{endpoint}' has no host")));
            }
            return Ok(Self::tcp(host, port));
        }

        Err(BusError::Config(format!(
            "unsupported endpoint '{endpoint}', expected ipc:// or tcp://"
        )))
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.endpoint())
    }
}
