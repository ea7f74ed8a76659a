//! Minimal blocking MQTT 3.1.1 client
//!
//! Only what a wake cycle needs: CONNECT/CONNACK with a clean session,
//! PUBLISH at QoS 1 (so the broker's PUBACK confirms delivery), and
//! DISCONNECT. Nothing is subscribed, so the only packets expected from the
//! broker are CONNACK and PUBACK.

use embedded_io::{Error as _, Read, ReadExactError, Write};
use heapless::Vec;
use log::{debug, info, warn};

use super::{Uplink, UplinkError};
use crate::config::MqttConfig;

const CONNECT: u8 = 0x10;
const CONNACK: u8 = 0x20;
/// PUBLISH, QoS 1, no DUP, no RETAIN.
const PUBLISH_QOS1: u8 = 0x32;
const PUBACK: u8 = 0x40;
const DISCONNECT: u8 = 0xE0;

const PROTOCOL_LEVEL_3_1_1: u8 = 0x04;
const FLAG_CLEAN_SESSION: u8 = 0x02;
const FLAG_PASSWORD: u8 = 0x40;
const FLAG_USERNAME: u8 = 0x80;

/// Capacity for CONNECT and PUBLISH headers. Payload bytes are streamed
/// separately and never copied into this buffer.
const HEADER_CAPACITY: usize = 256;
/// Unrelated packets tolerated while waiting for an acknowledgement.
const MAX_STRAY_PACKETS: usize = 4;

type HeaderBuf = Vec<u8, HEADER_CAPACITY>;

/// Opens the byte stream an MQTT session runs over.
///
/// On the device this covers Wi-Fi association, TCP and TLS; on the host a
/// plain TCP socket.
pub trait Connector {
    type Stream: Read + Write;

    fn open(&mut self) -> Result<Self::Stream, UplinkError>;
}

pub struct MqttSession<'a, C: Connector> {
    connector: C,
    config: MqttConfig<'a>,
    stream: Option<C::Stream>,
    next_packet_id: u16,
}

impl<'a, C: Connector> MqttSession<'a, C> {
    pub fn new(connector: C, config: MqttConfig<'a>) -> Self {
        Self {
            connector,
            config,
            stream: None,
            next_packet_id: 1,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn packet_id(&mut self) -> u16 {
        let id = self.next_packet_id;
        // Zero is not a valid packet identifier
        self.next_packet_id = self.next_packet_id.checked_add(1).unwrap_or(1);
        id
    }
}

fn push(buf: &mut HeaderBuf, bytes: &[u8]) -> Result<(), UplinkError> {
    buf.extend_from_slice(bytes)
        .map_err(|_| UplinkError::PacketTooLarge)
}

fn push_str(buf: &mut HeaderBuf, s: &str) -> Result<(), UplinkError> {
    let len = u16::try_from(s.len()).map_err(|_| UplinkError::PacketTooLarge)?;
    push(buf, &len.to_be_bytes())?;
    push(buf, s.as_bytes())
}

/// MQTT variable-length "remaining length" encoding.
fn push_remaining_length(buf: &mut HeaderBuf, mut len: usize) -> Result<(), UplinkError> {
    if len > 268_435_455 {
        return Err(UplinkError::PacketTooLarge);
    }
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        push(buf, &[byte])?;
        if len == 0 {
            return Ok(());
        }
    }
}

pub(crate) fn encode_connect(config: &MqttConfig<'_>) -> Result<HeaderBuf, UplinkError> {
    let mut flags = FLAG_CLEAN_SESSION;
    if config.username.is_some() {
        flags |= FLAG_USERNAME;
        if config.password.is_some() {
            flags |= FLAG_PASSWORD;
        }
    }

    let mut body = HeaderBuf::new();
    push_str(&mut body, "MQTT")?;
    push(&mut body, &[PROTOCOL_LEVEL_3_1_1, flags])?;
    push(&mut body, &config.keep_alive_secs.to_be_bytes())?;
    push_str(&mut body, config.client_id)?;
    if let Some(username) = config.username {
        push_str(&mut body, username)?;
        if let Some(password) = config.password {
            push_str(&mut body, password)?;
        }
    }

    let mut packet = HeaderBuf::new();
    push(&mut packet, &[CONNECT])?;
    push_remaining_length(&mut packet, body.len())?;
    push(&mut packet, &body)?;
    Ok(packet)
}

/// Fixed header, topic and packet id of a QoS 1 PUBLISH. The payload follows
/// on the wire.
pub(crate) fn encode_publish_header(
    topic: &str,
    packet_id: u16,
    payload_len: usize,
) -> Result<HeaderBuf, UplinkError> {
    let remaining = 2 + topic.len() + 2 + payload_len;

    let mut packet = HeaderBuf::new();
    push(&mut packet, &[PUBLISH_QOS1])?;
    push_remaining_length(&mut packet, remaining)?;
    push_str(&mut packet, topic)?;
    push(&mut packet, &packet_id.to_be_bytes())?;
    Ok(packet)
}

fn read_exact<S: Read>(stream: &mut S, buf: &mut [u8]) -> Result<(), UplinkError> {
    stream.read_exact(buf).map_err(|e| match e {
        ReadExactError::UnexpectedEof => UplinkError::Closed,
        ReadExactError::Other(e) => UplinkError::Transport(e.kind()),
    })
}

fn write_all<S: Write>(stream: &mut S, bytes: &[u8]) -> Result<(), UplinkError> {
    stream
        .write_all(bytes)
        .map_err(|e| UplinkError::Transport(e.kind()))
}

fn flush<S: Write>(stream: &mut S) -> Result<(), UplinkError> {
    stream.flush().map_err(|e| UplinkError::Transport(e.kind()))
}

/// Read one packet. Returns its first header byte and its body, which must
/// fit `body`.
fn read_packet<'b, S: Read>(
    stream: &mut S,
    body: &'b mut [u8],
) -> Result<(u8, &'b [u8]), UplinkError> {
    let mut byte = [0u8; 1];
    read_exact(stream, &mut byte)?;
    let kind = byte[0];

    let mut len = 0usize;
    let mut shift = 0u32;
    loop {
        read_exact(stream, &mut byte)?;
        len |= ((byte[0] & 0x7F) as usize) << shift;
        if byte[0] & 0x80 == 0 {
            break;
        }
        shift += 7;
        if shift > 21 {
            return Err(UplinkError::Protocol("malformed remaining length"));
        }
    }

    let body = body
        .get_mut(..len)
        .ok_or(UplinkError::Protocol("unexpectedly large packet from broker"))?;
    read_exact(stream, body)?;
    Ok((kind, body))
}

impl<C: Connector> Uplink for MqttSession<'_, C> {
    fn connect(&mut self) -> Result<(), UplinkError> {
        self.stream = None;

        let mut stream = self.connector.open()?;
        info!(
            "Connecting to MQTT broker {}:{} as {}",
            self.config.endpoint, self.config.port, self.config.client_id
        );

        let packet = encode_connect(&self.config)?;
        write_all(&mut stream, &packet)?;
        flush(&mut stream)?;

        let mut body = [0u8; 8];
        let (kind, body) = read_packet(&mut stream, &mut body)?;
        if kind != CONNACK || body.len() != 2 {
            return Err(UplinkError::Protocol("expected CONNACK"));
        }
        if body[1] != 0 {
            return Err(UplinkError::Refused(body[1]));
        }

        self.stream = Some(stream);
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), UplinkError> {
        let packet_id = self.packet_id();
        let stream = self.stream.as_mut().ok_or(UplinkError::NotConnected)?;

        let header = encode_publish_header(topic, packet_id, payload.len())?;
        write_all(stream, &header)?;
        write_all(stream, payload)?;
        flush(stream)?;
        debug!("Published {} bytes to {} (id {})", payload.len(), topic, packet_id);

        let mut body = [0u8; 64];
        for _ in 0..MAX_STRAY_PACKETS {
            let (kind, body) = read_packet(stream, &mut body)?;
            if kind & 0xF0 != PUBACK {
                warn!("Ignoring packet type {:#04x} while waiting for PUBACK", kind);
                continue;
            }
            if body.len() != 2 {
                return Err(UplinkError::Protocol("malformed PUBACK"));
            }
            if u16::from_be_bytes([body[0], body[1]]) == packet_id {
                return Ok(());
            }
            warn!("PUBACK for unknown packet id, still waiting for {}", packet_id);
        }

        Err(UplinkError::NotAcknowledged)
    }

    fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if write_all(&mut stream, &[DISCONNECT, 0x00])
                .and_then(|_| flush(&mut stream))
                .is_err()
            {
                debug!("DISCONNECT could not be sent, dropping the stream anyway");
            }
        }
    }
}
