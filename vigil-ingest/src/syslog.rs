//! Syslog ingress on UDP and TCP.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use vigil_core::types::{Event, Severity};

use crate::EventPublisher;

/// Map RFC 3164/5424 numeric severities onto the pipeline bands.
fn map_severity(code: u8) -> Severity {
    match code {
        0..=2 => Severity::Critical, // emerg / alert / crit
        3 => Severity::High,         // err
        4 => Severity::Medium,       // warning
        5 => Severity::Low,          // notice
        _ => Severity::Info,         // info / debug
    }
}

/// Split `<PRI>payload` into (severity, facility, rest). Messages without
/// a priority header pass through as info.
fn parse_priority(msg: &str) -> (Severity, u8, &str) {
    if let Some(rest) = msg.strip_prefix('<') {
        if let Some(end) = rest.find('>') {
            if end <= 3 {
                if let Ok(pri) = rest[..end].parse::<u16>() {
                    let severity = map_severity((pri % 8) as u8);
                    let facility = (pri / 8) as u8;
                    return (severity, facility, &rest[end + 1..]);
                }
            }
        }
    }
    (Severity::Info, 0, msg)
}

/// Build the canonical event for one syslog line.
pub fn to_event(message: &str, remote_ip: &str) -> Event {
    let (severity, facility, body) = parse_priority(message.trim());
    let mut evt = Event::new("syslog", "system.log", severity);
    evt.source_ip = remote_ip.to_string();
    evt.raw_log = message.trim().to_string();
    evt.description = body.chars().take(160).collect();
    evt.metadata.insert("facility".into(), serde_json::Value::from(facility));
    evt
}

/// UDP datagram listener; one event per datagram.
pub async fn run_udp(
    socket: UdpSocket,
    publisher: Arc<dyn EventPublisher>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(addr = ?socket.local_addr().ok(), "syslog udp listener running");
    let mut buf = vec![0u8; 8192];
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            result = socket.recv_from(&mut buf) => {
                match result {
                    Ok((n, peer)) => {
                        let message = String::from_utf8_lossy(&buf[..n]);
                        let event = to_event(&message, &peer.ip().to_string());
                        if publisher.try_publish(event).is_err() {
                            debug!("publish buffer full, syslog datagram dropped");
                        }
                    }
                    Err(err) => warn!(error = %err, "syslog udp receive failed"),
                }
            }
        }
    }
}

/// TCP listener; one event per newline-delimited message.
pub async fn run_tcp(
    listener: TcpListener,
    publisher: Arc<dyn EventPublisher>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(addr = ?listener.local_addr().ok(), "syslog tcp listener running");
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            accepted = listener.accept() => {
                let Ok((stream, peer)) = accepted else { continue };
                let publisher = Arc::clone(&publisher);
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    let peer_ip = peer.ip().to_string();
                    let mut lines = BufReader::new(stream).lines();
                    let mut shutdown = shutdown;
                    loop {
                        tokio::select! {
                            _ = shutdown.changed() => return,
                            line = lines.next_line() => {
                                match line {
                                    Ok(Some(line)) if !line.trim().is_empty() => {
                                        let event = to_event(&line, &peer_ip);
                                        if publisher.try_publish(event).is_err() {
                                            debug!("publish buffer full, syslog line dropped");
                                        }
                                    }
                                    Ok(Some(_)) => {}
                                    _ => return,
                                }
                            }
                        }
                    }
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_parsing() {
        // <34> = facility 4, severity 2 (crit).
        let (sev, facility, rest) = parse_priority("<34>su: auth failure");
        assert_eq!(sev, Severity::Critical);
        assert_eq!(facility, 4);
        assert_eq!(rest, "su: auth failure");
    }

    #[test]
    fn test_severity_bands() {
        assert_eq!(map_severity(0), Severity::Critical);
        assert_eq!(map_severity(3), Severity::High);
        assert_eq!(map_severity(4), Severity::Medium);
        assert_eq!(map_severity(5), Severity::Low);
        assert_eq!(map_severity(6), Severity::Info);
        assert_eq!(map_severity(7), Severity::Info);
    }

    #[test]
    fn test_message_without_priority() {
        let (sev, _, rest) = parse_priority("plain message");
        assert_eq!(sev, Severity::Info);
        assert_eq!(rest, "plain message");
    }

    #[test]
    fn test_event_shape() {
        let evt = to_event("<13>sshd[88]: Accepted publickey", "192.0.2.10");
        assert_eq!(evt.source, "syslog");
        assert_eq!(evt.event_type, "system.log");
        assert_eq!(evt.source_ip, "192.0.2.10");
        assert_eq!(evt.severity, Severity::Low);
        assert!(evt.raw_log.starts_with("<13>"));
        assert!(!evt.description.starts_with('<'));
    }
}
