//! IP address normalization shared by ingest and the sensor.

use std::net::IpAddr;

/// Normalize an IP string for the canonical event: IPv4-mapped IPv6
/// addresses (`::ffff:10.0.0.1`) collapse to their IPv4 form, everything
/// else is passed through in parsed canonical spelling. Unparseable input
/// is returned untouched — the pipeline treats addresses as labels, not
/// routing state.
pub fn normalize_ip(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.parse::<IpAddr>() {
        Ok(IpAddr::V6(v6)) => match v6.to_ipv4_mapped() {
            Some(v4) => v4.to_string(),
            None => v6.to_string(),
        },
        Ok(IpAddr::V4(v4)) => v4.to_string(),
        Err(_) => trimmed.to_string(),
    }
}

/// True for RFC 1918 and loopback addresses; intel lookups skip these.
pub fn is_private_ip(raw: &str) -> bool {
    match raw.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => v4.is_private() || v4.is_loopback(),
        Ok(IpAddr::V6(v6)) => v6.is_loopback(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapped_v6_collapses() {
        assert_eq!(normalize_ip("::ffff:10.0.0.1"), "10.0.0.1");
    }

    #[test]
    fn test_plain_addresses_pass_through() {
        assert_eq!(normalize_ip("192.168.1.5"), "192.168.1.5");
        assert_eq!(normalize_ip("2001:db8::1"), "2001:db8::1");
        assert_eq!(normalize_ip("not-an-ip"), "not-an-ip");
    }

    #[test]
    fn test_private_ranges() {
        assert!(is_private_ip("10.8.0.4"));
        assert!(is_private_ip("172.16.9.9"));
        assert!(is_private_ip("192.168.0.20"));
        assert!(is_private_ip("127.0.0.1"));
        assert!(!is_private_ip("1.2.3.4"));
    }
}
