//! Port discovery for the API process.

use std::net::{Ipv4Addr, TcpListener};

use anyhow::{anyhow, Result};

/// Default first port tried for the API.
pub const DEFAULT_BASE_PORT: u16 = 5000;

/// Returns the first port at or above `base` that can be bound on loopback.
/// Port 0 is never returned; a base of 0 starts the scan at 1.
///
/// The probe listener is dropped before returning so the API can bind it.
pub fn allocate_port(base: u16) -> Result<u16> {
    for port in base.max(1)..=u16::MAX {
        if is_port_available(port) {
            tracing::debug!(port, "found available port");
            return Ok(port);
        }
    }
    Err(anyhow!("no available port at or above {}", base))
}

fn is_port_available(port: u16) -> bool {
    TcpListener::bind((Ipv4Addr::LOCALHOST, port)).is_ok()
}
