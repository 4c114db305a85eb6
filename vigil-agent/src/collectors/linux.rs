//! Linux-specific collectors: syslog datagram socket and audit log tail.

use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::Path;
use std::time::Duration;

use serde_json::Value;
use tokio::net::UnixDatagram;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use vigil_core::types::{Event, Severity};
use vigil_fabric::EventProducer;

const AUDIT_LOG: &str = "/var/log/audit/audit.log";
const AUDIT_POLL: Duration = Duration::from_secs(2);

/// Bind a datagram socket local daemons can be pointed at and turn each
/// message into a `system.log` event.
pub async fn run_syslog_socket(
    socket_path: String,
    producer: EventProducer,
    mut shutdown: watch::Receiver<bool>,
) {
    if let Some(parent) = Path::new(&socket_path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let _ = std::fs::remove_file(&socket_path);
    let socket = match UnixDatagram::bind(&socket_path) {
        Ok(socket) => socket,
        Err(err) => {
            warn!(path = %socket_path, error = %err, "syslog socket bind failed");
            return;
        }
    };
    info!(path = %socket_path, "syslog socket collector running");

    let mut buf = vec![0u8; 8192];
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                let _ = std::fs::remove_file(&socket_path);
                return;
            }
            result = socket.recv(&mut buf) => {
                match result {
                    Ok(n) => {
                        let line = String::from_utf8_lossy(&buf[..n]);
                        let mut evt = Event::new("agent", "system.log", syslog_severity(&line));
                        evt.raw_log = line.trim().to_string();
                        evt.description = evt.raw_log.chars().take(160).collect();
                        if producer.try_publish(evt).is_err() {
                            debug!("syslog event dropped, publish buffer full");
                        }
                    }
                    Err(err) => warn!(error = %err, "syslog socket receive failed"),
                }
            }
        }
    }
}

/// Map the `<PRI>` prefix of a syslog line onto pipeline severities.
fn syslog_severity(line: &str) -> Severity {
    let Some(rest) = line.strip_prefix('<') else {
        return Severity::Info;
    };
    let Some(end) = rest.find('>') else {
        return Severity::Info;
    };
    let Ok(pri) = rest[..end].parse::<u16>() else {
        return Severity::Info;
    };
    match (pri % 8) as u8 {
        0..=2 => Severity::Critical,
        3 => Severity::High,
        4 => Severity::Medium,
        5 => Severity::Low,
        _ => Severity::Info,
    }
}

/// Tail the audit log: follow appended lines, emitting one event each.
/// A missing audit log (no auditd) just disables the collector.
pub async fn run_audit_tail(producer: EventProducer, mut shutdown: watch::Receiver<bool>) {
    let Ok(file) = std::fs::File::open(AUDIT_LOG) else {
        info!(path = AUDIT_LOG, "audit log not present, collector disabled");
        return;
    };
    let mut reader = BufReader::new(file);
    if reader.seek(SeekFrom::End(0)).is_err() {
        return;
    }
    info!(path = AUDIT_LOG, "audit tail collector running");

    let mut ticker = tokio::time::interval(AUDIT_POLL);
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = ticker.tick() => {
                let mut line = String::new();
                loop {
                    line.clear();
                    match reader.read_line(&mut line) {
                        Ok(0) => break,
                        Ok(_) => {
                            let trimmed = line.trim();
                            if trimmed.is_empty() {
                                continue;
                            }
                            let mut evt = Event::new("agent", "audit.record", Severity::Low);
                            evt.raw_log = trimmed.to_string();
                            evt.metadata.insert("collector".into(), Value::from("auditd"));
                            if producer.try_publish(evt).is_err() {
                                debug!("audit event dropped, publish buffer full");
                            }
                        }
                        Err(err) => {
                            warn!(error = %err, "audit log read failed");
                            break;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_syslog_severity_mapping() {
        assert_eq!(syslog_severity("<34>su: failed"), Severity::Critical);
        assert_eq!(syslog_severity("<11>oops"), Severity::High);
        assert_eq!(syslog_severity("<13>notice-ish"), Severity::Low);
        assert_eq!(syslog_severity("no priority"), Severity::Info);
    }
}
