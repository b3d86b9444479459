//! Utility functions for raftkv

use crate::common::config::PeerConfig;
use crate::common::{Error, Result};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

/// CRC32 checksum (IEEE)
pub fn crc32(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_idx])
}

/// Parse a peer list of the form `2=127.0.0.1:2318,3=127.0.0.1:2319`.
pub fn parse_peers(s: &str) -> Result<Vec<PeerConfig>> {
    s.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (id, addr) = part
                .split_once('=')
                .ok_or_else(|| Error::InvalidConfig(format!("peer must be id=addr: {}", part)))?;
            let id = id
                .trim()
                .parse::<u64>()
                .map_err(|_| Error::InvalidConfig(format!("invalid peer id: {}", id)))?;
            Ok(PeerConfig {
                id,
                addr: addr.trim().to_string(),
            })
        })
        .collect()
}

/// Does the address resolve to a loopback interface?
pub fn is_loopback(addr: &str) -> bool {
    resolve(addr).map(|a| a.ip().is_loopback()).unwrap_or(false)
}

/// Is something already accepting connections at `addr`?
pub fn is_listening(addr: &str, timeout: Duration) -> bool {
    match resolve(addr) {
        Some(socket) => TcpStream::connect_timeout(&socket, timeout).is_ok(),
        None => false,
    }
}

fn resolve(addr: &str) -> Option<SocketAddr> {
    addr.to_socket_addrs().ok()?.next()
}
