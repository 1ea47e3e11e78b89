//! Relay framing adapter: encodes/decodes the `bitchat1:` envelope used to
//! tunnel session traffic through the store-and-forward relay fallback when
//! the mesh transport is unavailable.
//!
//! # Packet format
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 8 1 2 3 4 5 6 7 8 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |    Type       |          Sender ID (8 bytes)          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  HasRecip     |    Recipient ID (0 or 8 bytes)        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |               Timestamp (8 bytes, ms, BE)             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |    TTL        |     Payload length (2 bytes, BE)       |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                  Payload (N bytes)                    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  SignatureFlag |
//! +-+-+-+-+-+-+-+-+
//! ```

use base64::Engine;

use crate::error::RelayError;
use crate::peer::{PeerId, SHORT_ID_LEN};

pub const TOKEN_PREFIX: &str = "bitchat1:";
pub const DEFAULT_TTL: u8 = 7;
const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    NoiseEncrypted = 0x01,
}

impl TryFrom<u8> for PacketType {
    type Error = RelayError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::NoiseEncrypted),
            other => Err(RelayError::UnknownPacketType(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NoisePayloadType {
    PrivateMessage = 0x01,
    Delivered = 0x02,
    ReadReceipt = 0x03,
}

impl TryFrom<u8> for NoisePayloadType {
    type Error = RelayError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::PrivateMessage),
            0x02 => Ok(Self::Delivered),
            0x03 => Ok(Self::ReadReceipt),
            other => Err(RelayError::UnknownPayloadType(other)),
        }
    }
}

/// A decoded BitChat packet carried over the relay fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitChatPacket {
    pub packet_type: PacketType,
    pub sender: PeerId,
    pub recipient: Option<PeerId>,
    pub timestamp_ms: u64,
    pub ttl: u8,
    pub payload: Vec<u8>,
    pub signed: bool,
}

impl BitChatPacket {
    pub fn encode(&self) -> Result<Vec<u8>, RelayError> {
        if self.payload.len() > MAX_PAYLOAD_LEN {
            return Err(RelayError::FieldTooLong("payload"));
        }

        let mut buf = Vec::with_capacity(1 + SHORT_ID_LEN + 1 + SHORT_ID_LEN + 8 + 1 + 2 + self.payload.len() + 1);
        buf.push(self.packet_type as u8);
        buf.extend_from_slice(self.sender.as_bytes());

        match self.recipient {
            Some(recipient) => {
                buf.push(1);
                buf.extend_from_slice(recipient.as_bytes());
            }
            None => buf.push(0),
        }

        buf.extend_from_slice(&self.timestamp_ms.to_be_bytes());
        buf.push(self.ttl);
        buf.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf.push(self.signed as u8);

        Ok(buf)
    }

    pub fn decode(buf: &[u8]) -> Result<Self, RelayError> {
        const FIXED_MIN: usize = 1 + SHORT_ID_LEN + 1 + 8 + 1 + 2 + 1;
        if buf.len() < FIXED_MIN {
            return Err(RelayError::TooShort { expected: FIXED_MIN, actual: buf.len() });
        }

        let mut cursor = 0usize;
        let packet_type = PacketType::try_from(buf[cursor])?;
        cursor += 1;

        let sender = read_peer_id(buf, &mut cursor)?;

        let has_recipient = buf[cursor];
        cursor += 1;
        let recipient = match has_recipient {
            0 => None,
            1 => Some(read_peer_id(buf, &mut cursor)?),
            _ => return Err(RelayError::FieldTooLong("has_recipient flag must be 0 or 1")),
        };

        let timestamp_ms = read_u64(buf, &mut cursor)?;
        let ttl = read_u8(buf, &mut cursor)?;
        let payload_len = read_u16(buf, &mut cursor)? as usize;

        if buf.len() < cursor + payload_len + 1 {
            return Err(RelayError::LengthMismatch { declared: payload_len, actual: buf.len().saturating_sub(cursor + 1) });
        }
        let payload = buf[cursor..cursor + payload_len].to_vec();
        cursor += payload_len;

        let signed = read_u8(buf, &mut cursor)? != 0;

        Ok(Self { packet_type, sender, recipient, timestamp_ms, ttl, payload, signed })
    }

    /// `bitchat1:<base64url(packet)>`, no padding.
    pub fn to_token(&self) -> Result<String, RelayError> {
        let bytes = self.encode()?;
        Ok(format!("{TOKEN_PREFIX}{}", base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)))
    }

    pub fn from_token(token: &str) -> Result<Self, RelayError> {
        let encoded = token.strip_prefix(TOKEN_PREFIX).ok_or(RelayError::InvalidPrefix)?;
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| RelayError::InvalidBase64)?;
        Self::decode(&bytes)
    }
}

fn read_peer_id(buf: &[u8], cursor: &mut usize) -> Result<PeerId, RelayError> {
    if buf.len() < *cursor + SHORT_ID_LEN {
        return Err(RelayError::TooShort { expected: *cursor + SHORT_ID_LEN, actual: buf.len() });
    }
    let mut bytes = [0u8; SHORT_ID_LEN];
    bytes.copy_from_slice(&buf[*cursor..*cursor + SHORT_ID_LEN]);
    *cursor += SHORT_ID_LEN;
    Ok(PeerId::from_bytes(bytes))
}

fn read_u8(buf: &[u8], cursor: &mut usize) -> Result<u8, RelayError> {
    if buf.len() < *cursor + 1 {
        return Err(RelayError::TooShort { expected: *cursor + 1, actual: buf.len() });
    }
    let v = buf[*cursor];
    *cursor += 1;
    Ok(v)
}

fn read_u16(buf: &[u8], cursor: &mut usize) -> Result<u16, RelayError> {
    if buf.len() < *cursor + 2 {
        return Err(RelayError::TooShort { expected: *cursor + 2, actual: buf.len() });
    }
    let v = u16::from_be_bytes(buf[*cursor..*cursor + 2].try_into().unwrap());
    *cursor += 2;
    Ok(v)
}

fn read_u64(buf: &[u8], cursor: &mut usize) -> Result<u64, RelayError> {
    if buf.len() < *cursor + 8 {
        return Err(RelayError::TooShort { expected: *cursor + 8, actual: buf.len() });
    }
    let v = u64::from_be_bytes(buf[*cursor..*cursor + 8].try_into().unwrap());
    *cursor += 8;
    Ok(v)
}

/// Builds a TLV body `{messageID, content}` for a private-message payload.
/// Returns `None` if either field would overflow the TLV's 16-bit length.
fn encode_pm_body(msg_id: &str, content: &str) -> Option<Vec<u8>> {
    let mut body = Vec::new();
    for field in [msg_id.as_bytes(), content.as_bytes()] {
        if field.len() > u16::MAX as usize {
            return None;
        }
        body.extend_from_slice(&(field.len() as u16).to_be_bytes());
        body.extend_from_slice(field);
    }
    Some(body)
}

/// Encodes a private message as a `bitchat1:` token. Returns `None` on
/// field-length violations rather than a hard error, matching the adapter's
/// "best effort, drop on malformed" contract.
pub fn encode_pm(content: &str, msg_id: &str, recipient: Option<PeerId>, sender: PeerId, now_ms: u64) -> Option<String> {
    let mut body = vec![NoisePayloadType::PrivateMessage as u8];
    body.extend(encode_pm_body(msg_id, content)?);

    let packet = BitChatPacket {
        packet_type: PacketType::NoiseEncrypted,
        sender,
        recipient,
        timestamp_ms: now_ms,
        ttl: DEFAULT_TTL,
        payload: body,
        signed: false,
    };
    packet.to_token().ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckKind {
    Delivered,
    ReadReceipt,
}

pub fn encode_ack(kind: AckKind, msg_id: &str, recipient: Option<PeerId>, sender: PeerId, now_ms: u64) -> Option<String> {
    if msg_id.len() > u16::MAX as usize {
        return None;
    }
    let payload_type = match kind {
        AckKind::Delivered => NoisePayloadType::Delivered,
        AckKind::ReadReceipt => NoisePayloadType::ReadReceipt,
    };
    let mut body = vec![payload_type as u8];
    body.extend_from_slice(msg_id.as_bytes());

    let packet = BitChatPacket {
        packet_type: PacketType::NoiseEncrypted,
        sender,
        recipient,
        timestamp_ms: now_ms,
        ttl: DEFAULT_TTL,
        payload: body,
        signed: false,
    };
    packet.to_token().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(byte: u8) -> PeerId {
        PeerId::from_bytes([byte; SHORT_ID_LEN])
    }

    #[test]
    fn encode_decode_round_trip_with_recipient() {
        let packet = BitChatPacket {
            packet_type: PacketType::NoiseEncrypted,
            sender: peer(1),
            recipient: Some(peer(2)),
            timestamp_ms: 1_700_000_000_000,
            ttl: DEFAULT_TTL,
            payload: b"ciphertext".to_vec(),
            signed: false,
        };
        let bytes = packet.encode().unwrap();
        assert_eq!(BitChatPacket::decode(&bytes).unwrap(), packet);
    }

    #[test]
    fn encode_decode_round_trip_without_recipient() {
        let packet = BitChatPacket {
            packet_type: PacketType::NoiseEncrypted,
            sender: peer(3),
            recipient: None,
            timestamp_ms: 42,
            ttl: 1,
            payload: vec![],
            signed: true,
        };
        let bytes = packet.encode().unwrap();
        assert_eq!(BitChatPacket::decode(&bytes).unwrap(), packet);
    }

    #[test]
    fn token_round_trips_and_uses_url_safe_alphabet() {
        let packet = BitChatPacket {
            packet_type: PacketType::NoiseEncrypted,
            sender: peer(9),
            recipient: None,
            timestamp_ms: 1,
            ttl: 7,
            payload: vec![0xff; 64],
            signed: false,
        };
        let token = packet.to_token().unwrap();
        assert!(token.starts_with(TOKEN_PREFIX));
        let encoded = &token[TOKEN_PREFIX.len()..];
        assert!(!encoded.contains('='));
        assert!(!encoded.contains('+'));
        assert!(!encoded.contains('/'));
        assert_eq!(BitChatPacket::from_token(&token).unwrap(), packet);
    }

    #[test]
    fn from_token_rejects_missing_prefix() {
        assert_eq!(BitChatPacket::from_token("nope:abc"), Err(RelayError::InvalidPrefix));
    }

    #[test]
    fn decode_rejects_truncated_buffer() {
        assert!(matches!(BitChatPacket::decode(&[1, 2, 3]), Err(RelayError::TooShort { .. })));
    }

    #[test]
    fn encode_pm_round_trips_through_decode() {
        let token = encode_pm("hello", "mid-1", Some(peer(5)), peer(4), 123).unwrap();
        let packet = BitChatPacket::from_token(&token).unwrap();
        assert_eq!(packet.payload[0], NoisePayloadType::PrivateMessage as u8);
        assert_eq!(packet.sender, peer(4));
        assert_eq!(packet.recipient, Some(peer(5)));
    }

    #[test]
    fn encode_ack_sets_the_right_payload_type() {
        let token = encode_ack(AckKind::Delivered, "mid-2", None, peer(1), 0).unwrap();
        let packet = BitChatPacket::from_token(&token).unwrap();
        assert_eq!(packet.payload[0], NoisePayloadType::Delivered as u8);
        assert_eq!(&packet.payload[1..], b"mid-2");
    }
}
