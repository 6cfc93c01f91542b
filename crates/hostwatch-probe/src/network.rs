use hostwatch_common::types::{NetworkConnection, NetworkInterfaceMetrics, NetworkMetrics};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use sysinfo::Networks;

/// Window between the two counter samples used for bandwidth.
const BANDWIDTH_WINDOW: Duration = Duration::from_secs(1);

pub fn collect() -> NetworkMetrics {
    let mut networks = Networks::new_with_refreshed_list();

    let before: HashMap<String, (u64, u64)> = networks
        .iter()
        .map(|(name, data)| {
            (
                name.clone(),
                (data.total_transmitted(), data.total_received()),
            )
        })
        .collect();
    let sampled = Instant::now();
    std::thread::sleep(BANDWIDTH_WINDOW);
    networks.refresh(true);
    let elapsed = sampled.elapsed().as_secs_f64();

    let mut interfaces = Vec::new();
    for (name, data) in networks.iter() {
        if name == "lo" || name.starts_with("Loopback") {
            continue;
        }
        let sent = data.total_transmitted();
        let received = data.total_received();
        let (sent_before, received_before) =
            before.get(name).copied().unwrap_or((sent, received));

        interfaces.push(NetworkInterfaceMetrics {
            name: name.clone(),
            bytes_sent: sent,
            bytes_received: received,
            packets_sent: data.total_packets_transmitted(),
            packets_received: data.total_packets_received(),
            bandwidth_sent: rate(sent, sent_before, elapsed),
            bandwidth_received: rate(received, received_before, elapsed),
        });
    }

    NetworkMetrics {
        interfaces,
        connections: connections(),
    }
}

fn rate(now: u64, before: u64, elapsed: f64) -> u64 {
    if elapsed <= 0.0 || now <= before {
        return 0;
    }
    ((now - before) as f64 / elapsed) as u64
}

#[cfg(target_os = "linux")]
fn connections() -> Vec<NetworkConnection> {
    let mut out = Vec::new();
    // Established TCP sessions plus bound UDP sockets.
    for (path, proto, established_only) in [
        ("/proc/net/tcp", "TCP", true),
        ("/proc/net/tcp6", "TCP", true),
        ("/proc/net/udp", "UDP", false),
        ("/proc/net/udp6", "UDP", false),
    ] {
        if let Ok(table) = std::fs::read_to_string(path) {
            parse_proc_net(&table, proto, established_only, &mut out);
        }
    }
    out
}

#[cfg(target_os = "linux")]
fn parse_proc_net(
    table: &str,
    proto: &str,
    established_only: bool,
    out: &mut Vec<NetworkConnection>,
) {
    for line in table.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            continue;
        }
        if established_only && fields[3] != "01" {
            continue;
        }
        let Some((local_ip, local_port)) = parse_hex_endpoint(fields[1]) else {
            continue;
        };
        let Some((remote_ip, remote_port)) = parse_hex_endpoint(fields[2]) else {
            continue;
        };
        out.push(NetworkConnection {
            local_ip,
            local_port,
            remote_ip,
            remote_port,
            protocol: proto.to_string(),
        });
    }
}

/// Decode a `/proc/net` endpoint such as `0100007F:1F90` (little-endian hex
/// address, hex port).
#[cfg(target_os = "linux")]
fn parse_hex_endpoint(field: &str) -> Option<(String, u16)> {
    let (addr_hex, port_hex) = field.split_once(':')?;
    let port = u16::from_str_radix(port_hex, 16).ok()?;
    match addr_hex.len() {
        8 => {
            let raw = u32::from_str_radix(addr_hex, 16).ok()?;
            Some((std::net::Ipv4Addr::from(raw.to_le_bytes()).to_string(), port))
        }
        32 => {
            let mut bytes = [0u8; 16];
            for (group, chunk) in bytes.chunks_exact_mut(4).enumerate() {
                let raw = u32::from_str_radix(&addr_hex[group * 8..group * 8 + 8], 16).ok()?;
                chunk.copy_from_slice(&raw.to_le_bytes());
            }
            Some((std::net::Ipv6Addr::from(bytes).to_string(), port))
        }
        _ => None,
    }
}

#[cfg(windows)]
fn connections() -> Vec<NetworkConnection> {
    let Some(output) = crate::tool::run_tool("netstat", &["-ano"], crate::tool::TOOL_TIMEOUT)
    else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for line in output.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 3 {
            continue;
        }
        let proto = match fields[0] {
            "TCP" => "TCP",
            "UDP" => "UDP",
            _ => continue,
        };
        let Some((local_ip, local_port)) = split_endpoint(fields[1]) else {
            continue;
        };
        let (remote_ip, remote_port) = split_endpoint(fields[2]).unwrap_or_default();
        out.push(NetworkConnection {
            local_ip,
            local_port,
            remote_ip,
            remote_port,
            protocol: proto.to_string(),
        });
    }
    out
}

#[cfg(windows)]
fn split_endpoint(field: &str) -> Option<(String, u16)> {
    let (ip, port) = field.rsplit_once(':')?;
    Some((ip.trim_matches(['[', ']']).to_string(), port.parse().ok()?))
}

#[cfg(not(any(target_os = "linux", windows)))]
fn connections() -> Vec<NetworkConnection> {
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_handles_zero_window_and_counter_resets() {
        assert_eq!(rate(100, 50, 0.0), 0);
        assert_eq!(rate(50, 100, 1.0), 0);
        assert_eq!(rate(2_000, 1_000, 1.0), 1_000);
        assert_eq!(rate(2_000, 1_000, 2.0), 500);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn decodes_proc_net_endpoints() {
        let (ip, port) = parse_hex_endpoint("0100007F:1F90").unwrap();
        assert_eq!(ip, "127.0.0.1");
        assert_eq!(port, 8080);

        let (ip, port) =
            parse_hex_endpoint("00000000000000000000000001000000:0050").unwrap();
        assert_eq!(ip, "::1");
        assert_eq!(port, 80);

        assert!(parse_hex_endpoint("garbage").is_none());
        assert!(parse_hex_endpoint("0100007F").is_none());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn parses_established_tcp_rows_only() {
        let table = "  sl  local_address rem_address   st ...\n\
             0: 0100007F:1F90 0200A8C0:01BB 01 rest\n\
             1: 0100007F:0016 00000000:0000 0A rest\n";
        let mut out = Vec::new();
        parse_proc_net(table, "TCP", true, &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].local_port, 8080);
        assert_eq!(out[0].remote_ip, "192.168.0.2");
        assert_eq!(out[0].remote_port, 443);
        assert_eq!(out[0].protocol, "TCP");
    }

    #[test]
    fn collect_produces_fresh_bandwidth_numbers() {
        let metrics = collect();
        for iface in &metrics.interfaces {
            assert!(!iface.name.is_empty());
            // Bandwidth over a ~1s window can never exceed the cumulative totals.
            assert!(iface.bandwidth_received <= iface.bytes_received.max(1));
        }
    }
}
