//! Replica address derivation.
//!
//! Every component is configured with a base `host:port`. Replica `i` listens
//! on the same host at `port + i`; nothing else about the address changes.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddrError {
    #[error("invalid address '{0}', expected host:port")]
    Invalid(String),

    #[error("port of '{addr}' plus offset {offset} exceeds 65535")]
    Overflow { addr: String, offset: u32 },
}

/// Split `host:port`. IPv6 hosts must be bracketed (`[::1]:4000`).
pub fn split_host_port(addr: &str) -> Result<(&str, u16), AddrError> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| AddrError::Invalid(addr.to_string()))?;
    if host.is_empty() || (host.contains(':') && !host.starts_with('[')) {
        return Err(AddrError::Invalid(addr.to_string()));
    }
    let port = port
        .parse::<u16>()
        .map_err(|_| AddrError::Invalid(addr.to_string()))?;
    Ok((host, port))
}

/// Address of replica `index` given the configured base address.
pub fn replica_addr(base: &str, index: u32) -> Result<String, AddrError> {
    let (host, port) = split_host_port(base)?;
    let port = u32::from(port)
        .checked_add(index)
        .and_then(|p| u16::try_from(p).ok())
        .ok_or_else(|| AddrError::Overflow {
            addr: base.to_string(),
            offset: index,
        })?;
    Ok(format!("{host}:{port}"))
}

/// Addresses of replicas `0..replicas`.
pub fn replica_addrs(base: &str, replicas: u32) -> Result<Vec<String>, AddrError> {
    (0..replicas).map(|i| replica_addr(base, i)).collect()
}

/// Address to dial for a listener bound to `addr`.
///
/// Wildcard binds are probed over loopback.
pub fn dial_addr(addr: &str) -> String {
    match split_host_port(addr) {
        Ok(("0.0.0.0", port)) => format!("127.0.0.1:{port}"),
        Ok(("[::]", port)) => format!("[::1]:{port}"),
        _ => addr.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replica_ports_are_contiguous() {
        for replicas in 1..=8u32 {
            let addrs = replica_addrs("127.0.0.1:4000", replicas).unwrap();
            let ports: Vec<u16> = addrs
                .iter()
                .map(|a| split_host_port(a).unwrap().1)
                .collect();
            let expected: Vec<u16> = (0..replicas).map(|i| 4000 + i as u16).collect();
            assert_eq!(ports, expected);
            assert!(addrs.iter().all(|a| a.starts_with("127.0.0.1:")));
        }
    }

    #[test]
    fn replica_zero_is_the_base_address() {
        assert_eq!(replica_addr("0.0.0.0:14100", 0).unwrap(), "0.0.0.0:14100");
        assert_eq!(replica_addr("localhost:14100", 2).unwrap(), "localhost:14102");
    }

    #[test]
    fn ipv6_hosts_are_preserved() {
        assert_eq!(replica_addr("[::1]:4000", 1).unwrap(), "[::1]:4001");
        assert!(split_host_port("::1:4000").is_err());
    }

    #[test]
    fn port_overflow_is_rejected() {
        assert_eq!(replica_addr("127.0.0.1:65535", 0).unwrap(), "127.0.0.1:65535");
        assert!(matches!(
            replica_addr("127.0.0.1:65535", 1),
            Err(AddrError::Overflow { offset: 1, .. })
        ));
    }

    #[test]
    fn malformed_addresses_are_rejected() {
        for bad in ["", "4000", ":4000", "host:", "host:port", "host:70000"] {
            assert!(split_host_port(bad).is_err(), "{bad} should be invalid");
        }
    }

    #[test]
    fn wildcard_is_dialed_over_loopback() {
        assert_eq!(dial_addr("0.0.0.0:4000"), "127.0.0.1:4000");
        assert_eq!(dial_addr("[::]:4000"), "[::1]:4000");
        assert_eq!(dial_addr("10.0.0.5:4000"), "10.0.0.5:4000");
    }
}
