//! Port allocation.
//!
//! Each service draws from its own band so a runtime's ports are easy to
//! recognize, and two runtimes started side by side never collide.

use std::net::{Ipv4Addr, TcpListener};
use std::ops::RangeInclusive;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::util::config::PortsConfig;

pub const RUNTIME_PORTS: RangeInclusive<u16> = 55001..=55049;
pub const DATABASE_PORTS: RangeInclusive<u16> = 55100..=55149;
pub const WORKER_PORTS: RangeInclusive<u16> = 55200..=55249;

/// Ports allocated to one runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ports {
    pub runtime: u16,
    pub database: u16,
    pub worker: u16,
}

/// Whether `port` can be bound on the loopback interface right now.
pub fn is_port_free(port: u16) -> bool {
    TcpListener::bind((Ipv4Addr::LOCALHOST, port)).is_ok()
}

/// First free port in `range`.
pub fn find_free_port(range: RangeInclusive<u16>) -> Option<u16> {
    range.into_iter().find(|port| is_port_free(*port))
}

fn pick(name: &str, fixed: Option<u16>, band: RangeInclusive<u16>) -> Result<u16> {
    if let Some(port) = fixed {
        return Ok(port);
    }
    let (lo, hi) = (*band.start(), *band.end());
    find_free_port(band).with_context(|| format!("no free {} port in {}-{}", name, lo, hi))
}

/// Allocate all three ports, honoring fixed ports from config.
///
/// Fixed ports are taken as-is; a conflict surfaces when the service binds.
pub fn allocate_ports(config: &PortsConfig) -> Result<Ports> {
    let ports = Ports {
        runtime: pick("runtime", config.runtime, RUNTIME_PORTS)?,
        database: pick("database", config.database, DATABASE_PORTS)?,
        worker: pick("worker", config.worker, WORKER_PORTS)?,
    };
    tracing::debug!(
        "allocated ports: runtime {}, database {}, worker {}",
        ports.runtime,
        ports.database,
        ports.worker
    );
    Ok(ports)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_ports_are_kept() {
        let config = PortsConfig {
            runtime: Some(1),
            database: Some(2),
            worker: Some(3),
        };
        assert_eq!(
            allocate_ports(&config).unwrap(),
            Ports {
                runtime: 1,
                database: 2,
                worker: 3
            }
        );
    }

    #[test]
    fn test_occupied_port_is_skipped() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let taken = listener.local_addr().unwrap().port();

        assert!(!is_port_free(taken));
        assert_eq!(find_free_port(taken..=taken), None);
    }

    #[test]
    fn test_allocated_ports_fall_in_bands() {
        let ports = allocate_ports(&PortsConfig::default()).unwrap();
        assert!(RUNTIME_PORTS.contains(&ports.runtime));
        assert!(DATABASE_PORTS.contains(&ports.database));
        assert!(WORKER_PORTS.contains(&ports.worker));
    }
}
