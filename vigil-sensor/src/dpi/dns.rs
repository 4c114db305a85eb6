//! Minimal DNS parsing: header plus the first question.

/// DNS header is 12 bytes; anything shorter is not DNS.
const HEADER_LEN: usize = 12;
/// Compression-pointer chase limit.
const MAX_POINTER_HOPS: usize = 8;
/// Longest legal DNS name.
const MAX_NAME_LEN: usize = 253;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsQuery {
    pub transaction_id: u16,
    pub is_query: bool,
    pub name: String,
    pub record_type: String,
    pub response_code: u8,
}

/// Decode the header and the first question section entry.
pub fn parse_query(payload: &[u8]) -> Option<DnsQuery> {
    if payload.len() < HEADER_LEN {
        return None;
    }

    let transaction_id = u16::from_be_bytes([payload[0], payload[1]]);
    let flags = u16::from_be_bytes([payload[2], payload[3]]);
    let is_query = flags & 0x8000 == 0;
    let response_code = (flags & 0x000F) as u8;
    let question_count = u16::from_be_bytes([payload[4], payload[5]]);
    if question_count == 0 {
        return None;
    }

    let (name, offset) = parse_name(payload, HEADER_LEN)?;
    if offset + 4 > payload.len() {
        return None;
    }
    let qtype = u16::from_be_bytes([payload[offset], payload[offset + 1]]);

    Some(DnsQuery {
        transaction_id,
        is_query,
        name,
        record_type: type_name(qtype),
        response_code,
    })
}

/// Decode a (possibly compressed) DNS name starting at `offset`. Returns
/// the name and the offset just past it in the original buffer.
fn parse_name(data: &[u8], mut offset: usize) -> Option<(String, usize)> {
    let mut name = String::new();
    let mut hops = 0;
    let mut end_offset = None;

    loop {
        let len = *data.get(offset)? as usize;
        if len == 0 {
            offset += 1;
            break;
        }
        if len & 0xC0 == 0xC0 {
            // Compression pointer: two bytes, jump and remember where the
            // original sequence continues.
            hops += 1;
            if hops > MAX_POINTER_HOPS {
                return None;
            }
            let next = *data.get(offset + 1)? as usize;
            if end_offset.is_none() {
                end_offset = Some(offset + 2);
            }
            offset = ((len & 0x3F) << 8) | next;
            continue;
        }
        let label = data.get(offset + 1..offset + 1 + len)?;
        if !name.is_empty() {
            name.push('.');
        }
        for &b in label {
            // Labels are conventionally ASCII; anything else is rendered
            // escaped rather than trusted.
            if b.is_ascii_graphic() {
                name.push(b as char);
            } else {
                name.push('?');
            }
        }
        if name.len() > MAX_NAME_LEN {
            return None;
        }
        offset += 1 + len;
    }

    Some((name, end_offset.unwrap_or(offset)))
}

fn type_name(qtype: u16) -> String {
    match qtype {
        1 => "A".to_string(),
        2 => "NS".to_string(),
        5 => "CNAME".to_string(),
        6 => "SOA".to_string(),
        12 => "PTR".to_string(),
        15 => "MX".to_string(),
        16 => "TXT".to_string(),
        28 => "AAAA".to_string(),
        33 => "SRV".to_string(),
        other => format!("TYPE{other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query_packet(name_labels: &[&[u8]], qtype: u16) -> Vec<u8> {
        let mut pkt = vec![
            0xAB, 0xCD, // id
            0x01, 0x00, // flags: standard query, RD
            0x00, 0x01, // one question
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];
        for label in name_labels {
            pkt.push(label.len() as u8);
            pkt.extend_from_slice(label);
        }
        pkt.push(0);
        pkt.extend_from_slice(&qtype.to_be_bytes());
        pkt.extend_from_slice(&[0x00, 0x01]); // IN
        pkt
    }

    #[test]
    fn test_parses_simple_query() {
        let pkt = query_packet(&[b"example", b"com"], 1);
        let q = parse_query(&pkt).unwrap();
        assert_eq!(q.transaction_id, 0xABCD);
        assert!(q.is_query);
        assert_eq!(q.name, "example.com");
        assert_eq!(q.record_type, "A");
    }

    #[test]
    fn test_aaaa_and_unknown_types() {
        let q = parse_query(&query_packet(&[b"v6", b"test"], 28)).unwrap();
        assert_eq!(q.record_type, "AAAA");
        let q = parse_query(&query_packet(&[b"x"], 999)).unwrap();
        assert_eq!(q.record_type, "TYPE999");
    }

    #[test]
    fn test_short_payload_rejected() {
        assert!(parse_query(&[0u8; 11]).is_none());
    }

    #[test]
    fn test_zero_questions_rejected() {
        let mut pkt = query_packet(&[b"a"], 1);
        pkt[5] = 0;
        assert!(parse_query(&pkt).is_none());
    }

    #[test]
    fn test_self_pointing_compression_terminates() {
        // Question name is a pointer to itself: must fail, not spin.
        let mut pkt = vec![
            0x00, 0x01, 0x01, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];
        pkt.extend_from_slice(&[0xC0, 0x0C]); // pointer to offset 12 (itself)
        pkt.extend_from_slice(&[0x00, 0x01, 0x00, 0x01]);
        assert!(parse_query(&pkt).is_none());
    }

    #[test]
    fn test_truncated_label_rejected() {
        let mut pkt = query_packet(&[b"example"], 1);
        pkt.truncate(15); // cut inside the label
        assert!(parse_query(&pkt).is_none());
    }
}
