//! Minimal SMB header decoding: enough to name the command for detection.

/// SMB1 header magic.
const SMB1_MAGIC: [u8; 4] = [0xFF, b'S', b'M', b'B'];
/// SMB2/3 header magic.
const SMB2_MAGIC: [u8; 4] = [0xFE, b'S', b'M', b'B'];
/// Smallest header we interpret.
const MIN_HEADER: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmbMessage {
    pub dialect: &'static str,
    pub command: String,
    pub session_id: u64,
}

/// Identify the dialect and command of an SMB message. Anything that does
/// not carry the magic, or is shorter than a header, is not SMB.
pub fn parse_header(payload: &[u8]) -> Option<SmbMessage> {
    if payload.len() < MIN_HEADER {
        return None;
    }

    if payload[..4] == SMB2_MAGIC {
        // SMB2: command is a little-endian u16 at offset 12, session id a
        // u64 at offset 40 when present.
        let command = u16::from_le_bytes([payload[12], payload[13]]);
        let session_id = if payload.len() >= 48 {
            u64::from_le_bytes(payload[40..48].try_into().ok()?)
        } else {
            0
        };
        return Some(SmbMessage {
            dialect: "SMB2",
            command: smb2_command_name(command),
            session_id,
        });
    }

    if payload[..4] == SMB1_MAGIC {
        let command = payload[4];
        return Some(SmbMessage {
            dialect: "SMB1",
            command: smb1_command_name(command),
            session_id: 0,
        });
    }

    None
}

fn smb2_command_name(cmd: u16) -> String {
    match cmd {
        0x00 => "NEGOTIATE".to_string(),
        0x01 => "SESSION_SETUP".to_string(),
        0x02 => "LOGOFF".to_string(),
        0x03 => "TREE_CONNECT".to_string(),
        0x04 => "TREE_DISCONNECT".to_string(),
        0x05 => "CREATE".to_string(),
        0x06 => "CLOSE".to_string(),
        0x07 => "FLUSH".to_string(),
        0x08 => "READ".to_string(),
        0x09 => "WRITE".to_string(),
        0x0A => "LOCK".to_string(),
        0x0B => "IOCTL".to_string(),
        0x0C => "CANCEL".to_string(),
        0x0D => "ECHO".to_string(),
        0x0E => "QUERY_DIRECTORY".to_string(),
        0x0F => "CHANGE_NOTIFY".to_string(),
        0x10 => "QUERY_INFO".to_string(),
        0x11 => "SET_INFO".to_string(),
        0x12 => "OPLOCK_BREAK".to_string(),
        other => format!("0x{other:04X}"),
    }
}

fn smb1_command_name(cmd: u8) -> String {
    match cmd {
        0x72 => "NEGOTIATE".to_string(),
        0x73 => "SESSION_SETUP_ANDX".to_string(),
        0x75 => "TREE_CONNECT_ANDX".to_string(),
        0x2E => "READ_ANDX".to_string(),
        0x2F => "WRITE_ANDX".to_string(),
        0xA2 => "NT_CREATE_ANDX".to_string(),
        other => format!("0x{other:02X}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn smb2_frame(command: u16, session_id: u64) -> Vec<u8> {
        let mut frame = vec![0u8; 64];
        frame[..4].copy_from_slice(&SMB2_MAGIC);
        frame[12..14].copy_from_slice(&command.to_le_bytes());
        frame[40..48].copy_from_slice(&session_id.to_le_bytes());
        frame
    }

    #[test]
    fn test_smb2_write_command() {
        let msg = parse_header(&smb2_frame(0x09, 777)).unwrap();
        assert_eq!(msg.dialect, "SMB2");
        assert_eq!(msg.command, "WRITE");
        assert_eq!(msg.session_id, 777);
    }

    #[test]
    fn test_smb1_negotiate() {
        let mut frame = vec![0u8; 40];
        frame[..4].copy_from_slice(&SMB1_MAGIC);
        frame[4] = 0x72;
        let msg = parse_header(&frame).unwrap();
        assert_eq!(msg.dialect, "SMB1");
        assert_eq!(msg.command, "NEGOTIATE");
    }

    #[test]
    fn test_non_smb_rejected() {
        assert!(parse_header(b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n").is_none());
        assert!(parse_header(&[0xFE, b'S', b'M']).is_none());
    }

    #[test]
    fn test_unknown_command_rendered_hex() {
        let msg = parse_header(&smb2_frame(0x99, 0)).unwrap();
        assert_eq!(msg.command, "0x0099");
    }
}
