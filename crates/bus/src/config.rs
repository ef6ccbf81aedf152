use serde::{Deserialize, Serialize};

use crate::error::BusError;
use crate::transport::Transport;

/// Connection settings for the external broker.
///
/// Publishers connect to `frontend`, subscription streams to `backend`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusConfig {
    #[serde(default = "default_frontend")]
    pub frontend: String,

    #[serde(default = "default_backend")]
    pub backend: String,
}

fn default_frontend() -> String {
    "ipc:///tmp/nexgrid/bus-frontend.sock".into()
}

fn default_backend() -> String {
    "ipc:///tmp/nexgrid/bus-backend.sock".into()
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            frontend: default_frontend(),
            backend: default_backend(),
        }
    }
}

impl BusConfig {
    /// Broker reachable over TCP; the backend listens on `port + 1`.
    pub fn tcp(host: &str, port: u16) -> Result<Self, BusError> {
        let backend_port = port.checked_add(1).ok_or_else(|| {
            BusError::Config(format!("no backend port above frontend port {port}"))
        })?;
        Ok(Self {
            frontend: format!("tcp://{host}:{port}"),
            backend: format!("tcp://{host}:{backend_port}"),
        })
    }

    pub fn frontend_transport(&self) -> Result<Transport, BusError> {
        self.frontend.parse()
    }

    pub fn backend_transport(&self) -> Result<Transport, BusError> {
        self.backend.parse()
    }

    /// Apply `NEXGRID_BUS_FRONTEND` / `NEXGRID_BUS_BACKEND` as resolved by `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("NEXGRID_BUS_FRONTEND") {
            self.frontend = v;
        }
        if let Some(v) = lookup("NEXGRID_BUS_BACKEND") {
            self.backend = v;
        }
    }

    /// Both endpoints must parse, and must differ.
    pub fn validate(&self) -> Result<(), BusError> {
        let frontend = self.frontend_transport()?;
        let backend = self.backend_transport()?;
        if frontend == backend {
            return Err(BusError::Config(format!(
                "bus frontend and backend must differ (both '{frontend}')"
            )));
        }
        Ok(())
    }
}
