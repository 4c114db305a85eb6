//! Deep packet inspection for recognized application protocols.
//!
//! Every parser here runs against attacker-controlled bytes on the hot
//! path, so the shared rules are: validate at every offset, never index
//! past a declared length, and answer "no match" instead of erroring —
//! a malformed payload must never cost more than a bounds check.

pub mod dns;
pub mod http;
pub mod smb;
pub mod tls;

use serde_json::Value;

use vigil_core::types::FieldMap;

/// Which protocol parsers are active.
#[derive(Debug, Clone)]
pub struct DpiConfig {
    pub http_enabled: bool,
    pub dns_enabled: bool,
    pub tls_enabled: bool,
    pub smb_enabled: bool,
}

impl Default for DpiConfig {
    fn default() -> DpiConfig {
        DpiConfig {
            http_enabled: true,
            dns_enabled: true,
            tls_enabled: true,
            smb_enabled: true,
        }
    }
}

/// A decoded application-layer observation.
#[derive(Debug)]
pub struct AppObservation {
    pub protocol: &'static str,
    pub fields: FieldMap,
}

/// Dispatch on the destination port and run the matching parser.
pub fn inspect(cfg: &DpiConfig, dst_port: u16, payload: &[u8]) -> Option<AppObservation> {
    if payload.is_empty() {
        return None;
    }
    if cfg.tls_enabled && is_tls_port(dst_port) {
        let hello = tls::parse_client_hello(payload)?;
        let mut fields = FieldMap::new();
        fields.insert("tls_version".into(), Value::from(hello.version_name()));
        fields.insert("sni".into(), Value::from(hello.server_name));
        return Some(AppObservation { protocol: "TLS", fields });
    }
    if cfg.http_enabled && is_http_port(dst_port) {
        let req = http::parse_request(payload)?;
        let mut fields = FieldMap::new();
        fields.insert("method".into(), Value::from(req.method));
        fields.insert("host".into(), Value::from(req.host));
        fields.insert("uri".into(), Value::from(req.uri));
        return Some(AppObservation { protocol: "HTTP", fields });
    }
    if cfg.dns_enabled && is_dns_port(dst_port) {
        let query = dns::parse_query(payload)?;
        let mut fields = FieldMap::new();
        fields.insert("query".into(), Value::from(query.name));
        fields.insert("record_type".into(), Value::from(query.record_type));
        fields.insert("is_query".into(), Value::from(query.is_query));
        return Some(AppObservation { protocol: "DNS", fields });
    }
    if cfg.smb_enabled && is_smb_port(dst_port) {
        let msg = smb::parse_header(payload)?;
        let mut fields = FieldMap::new();
        fields.insert("command".into(), Value::from(msg.command));
        fields.insert("dialect".into(), Value::from(msg.dialect));
        if msg.session_id != 0 {
            fields.insert("session_id".into(), Value::from(msg.session_id));
        }
        return Some(AppObservation { protocol: "SMB", fields });
    }
    None
}

fn is_http_port(port: u16) -> bool {
    matches!(port, 80 | 8080 | 8008 | 3000 | 5000 | 8000)
}

fn is_dns_port(port: u16) -> bool {
    port == 53
}

fn is_tls_port(port: u16) -> bool {
    matches!(port, 443 | 8443 | 993 | 995 | 5223)
}

fn is_smb_port(port: u16) -> bool {
    matches!(port, 139 | 445)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_dispatch() {
        let cfg = DpiConfig::default();
        // TLS port with a junk payload: parser declines, no observation.
        assert!(inspect(&cfg, 443, b"junk").is_none());
        // Unrecognized port: nothing runs.
        assert!(inspect(&cfg, 9999, b"GET / HTTP/1.1\r\n").is_none());
    }

    #[test]
    fn test_disabled_parser_skipped() {
        let cfg = DpiConfig { http_enabled: false, ..DpiConfig::default() };
        assert!(inspect(&cfg, 80, b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").is_none());
    }
}
