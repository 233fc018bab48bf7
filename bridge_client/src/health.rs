//! TCP-level health probe for the four bridge ports.
//!
//! The bridge is healthy when every port accepts a connection. This says
//! nothing about whether the trading terminal behind it answers; use a `PING`
//! command for that.
use std::fmt;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use bridge_common::{BridgeConfig, Endpoint};
use log::debug;

/// Default per-port connect timeout.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Reachability of one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortStatus {
    /// Endpoint probed.
    pub endpoint: Endpoint,
    /// Port probed.
    pub port: u16,
    /// Whether a TCP connection was accepted in time.
    pub reachable: bool,
}

impl PortStatus {
    /// `Port 2201 (command endpoint, REQ/REP)`.
    pub fn describe(&self) -> String {
        let kind = match self.endpoint {
            Endpoint::Command => "REQ/REP",
            _ => "PUSH/PULL",
        };
        format!("Port {} ({} endpoint, {})", self.port, self.endpoint, kind)
    }
}

/// Outcome of probing all four endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    /// Host probed.
    pub host: String,
    /// One entry per endpoint, in `Endpoint::ALL` order.
    pub ports: Vec<PortStatus>,
}

impl HealthReport {
    /// Healthy only when every port is reachable.
    pub fn is_healthy(&self) -> bool {
        self.ports.iter().all(|status| status.reachable)
    }

    /// Unreachable ports.
    pub fn failures(&self) -> impl Iterator<Item = &PortStatus> {
        self.ports.iter().filter(|status| !status.reachable)
    }
}

impl fmt::Display for HealthReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_healthy() {
            return write!(f, "HEALTHY: All bridge ports on {} are accessible", self.host);
        }
        writeln!(f, "UNHEALTHY: The following checks failed:")?;
        let failures: Vec<String> = self
            .failures()
            .map(|status| format!("  - {} is not accessible", status.describe()))
            .collect();
        write!(f, "{}", failures.join("\n"))
    }
}

/// `true` when `host:port` accepts a TCP connection within `timeout`.
///
/// Resolution failures count as unreachable.
pub fn check_port(host: &str, port: u16, timeout: Duration) -> bool {
    let addrs = match (host, port).to_socket_addrs() {
        Ok(addrs) => addrs,
        Err(e) => {
            debug!("Cannot resolve {}: {}", host, e);
            return false;
        }
    };
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(_) => return true,
            Err(e) => debug!("Port check {} failed: {}", addr, e),
        }
    }
    false
}

/// Probes every endpoint in `config`.
pub fn probe(config: &BridgeConfig, timeout: Duration) -> HealthReport {
    let ports = Endpoint::ALL
        .iter()
        .map(|&endpoint| {
            let port = config.ports.get(endpoint);
            PortStatus {
                endpoint,
                port,
                reachable: check_port(&config.host, port, timeout),
            }
        })
        .collect();
    HealthReport {
        host: config.host.clone(),
        ports,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_common::Ports;
    use std::net::TcpListener;

    fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn live_and_closed_ports() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(check_port("127.0.0.1", port, PROBE_TIMEOUT));
        assert!(!check_port("127.0.0.1", closed_port(), PROBE_TIMEOUT));
        assert!(!check_port("no-such-host.invalid", port, PROBE_TIMEOUT));
    }

    #[test]
    fn report_lists_unreachable_endpoints() {
        let listeners: Vec<TcpListener> = (0..3)
            .map(|_| TcpListener::bind("127.0.0.1:0").unwrap())
            .collect();
        let port = |i: usize| listeners[i].local_addr().unwrap().port();
        let ports = Ports {
            command: port(0),
            result: port(1),
            quote: port(2),
            event: closed_port(),
        };
        let config = BridgeConfig::new("127.0.0.1").with_ports(ports);

        let report = probe(&config, PROBE_TIMEOUT);
        assert!(!report.is_healthy());
        let failed: Vec<Endpoint> = report.failures().map(|s| s.endpoint).collect();
        assert_eq!(failed, vec![Endpoint::Event]);
        assert!(report.to_string().starts_with("UNHEALTHY"));
        assert!(report.to_string().contains(&ports.event.to_string()));
    }

    #[test]
    fn all_reachable_is_healthy() {
        let listeners: Vec<TcpListener> = (0..4)
            .map(|_| TcpListener::bind("127.0.0.1:0").unwrap())
            .collect();
        let port = |i: usize| listeners[i].local_addr().unwrap().port();
        let config = BridgeConfig::new("127.0.0.1").with_ports(Ports {
            command: port(0),
            result: port(1),
            quote: port(2),
            event: port(3),
        });
        let report = probe(&config, PROBE_TIMEOUT);
        assert!(report.is_healthy());
        assert!(report.to_string().starts_with("HEALTHY"));
    }
}
