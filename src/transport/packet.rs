//! Typed MQTT 3.1.1 control packets (QoS 0 subset)
//!
//! Only the packets the broker speaks are modelled. Parsing enforces the
//! broker's limitations: QoS 0 only, no will message, no credentials.

use super::codec::{BodyReader, RawPacket, write_string};
use crate::utils::error::ProtocolError;

pub const PROTOCOL_NAME: &str = "MQTT";
pub const PROTOCOL_LEVEL: u8 = 4;

/// CONNACK, session present = 0, return code = accepted.
pub const CONNACK_ACCEPTED: [u8; 4] = [0x20, 0x02, 0x00, 0x00];
pub const PINGREQ: [u8; 2] = [0xC0, 0x00];
pub const PINGRESP: [u8; 2] = [0xD0, 0x00];
pub const DISCONNECT: [u8; 2] = [0xE0, 0x00];

// Connect flag bits the broker refuses: will flag, will QoS (2 bits),
// will retain, password, username.
const CONNECT_WILL_FLAG: u8 = 1 << 2;
const CONNECT_WILL_QOS: u8 = 0b11 << 3;
const CONNECT_WILL_RETAIN: u8 = 1 << 5;
const CONNECT_PASSWORD: u8 = 1 << 6;
const CONNECT_USERNAME: u8 = 1 << 7;
const CONNECT_UNSUPPORTED: u8 =
    CONNECT_WILL_FLAG | CONNECT_WILL_QOS | CONNECT_WILL_RETAIN | CONNECT_PASSWORD | CONNECT_USERNAME;
const CONNECT_CLEAN_SESSION: u8 = 1 << 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Connect = 1,
    ConnAck = 2,
    Publish = 3,
    Subscribe = 8,
    SubAck = 9,
    Unsubscribe = 10,
    UnsubAck = 11,
    PingReq = 12,
    PingResp = 13,
    Disconnect = 14,
}

impl PacketType {
    pub fn from_header(header: u8) -> Option<Self> {
        Some(match header >> 4 {
            1 => Self::Connect,
            2 => Self::ConnAck,
            3 => Self::Publish,
            8 => Self::Subscribe,
            9 => Self::SubAck,
            10 => Self::Unsubscribe,
            11 => Self::UnsubAck,
            12 => Self::PingReq,
            13 => Self::PingResp,
            14 => Self::Disconnect,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect {
    pub client_id: String,
    pub keep_alive: u16,
    pub clean_session: bool,
}

impl Connect {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            keep_alive: 60,
            clean_session: true,
        }
    }

    pub fn parse(body: &[u8]) -> Result<Self, ProtocolError> {
        let mut rd = BodyReader::new(body);

        let protocol = rd.read_string("protocol name")?;
        if protocol != PROTOCOL_NAME {
            return Err(ProtocolError::UnsupportedProtocol(protocol));
        }

        let level = rd.read_u8("protocol level")?;
        if level != PROTOCOL_LEVEL {
            return Err(ProtocolError::UnsupportedProtocolLevel(level));
        }

        let flags = rd.read_u8("connect flags")?;
        if flags & CONNECT_UNSUPPORTED != 0 {
            return Err(ProtocolError::UnsupportedConnectFlags(flags));
        }

        let keep_alive = rd.read_u16("keep alive")?;
        let client_id = rd.read_string("client id")?;

        Ok(Self {
            client_id,
            keep_alive,
            clean_session: flags & CONNECT_CLEAN_SESSION != 0,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut body = Vec::with_capacity(12 + self.client_id.len());
        write_string(&mut body, PROTOCOL_NAME, "protocol name")?;
        body.push(PROTOCOL_LEVEL);
        body.push(if self.clean_session { CONNECT_CLEAN_SESSION } else { 0 });
        body.extend_from_slice(&self.keep_alive.to_be_bytes());
        write_string(&mut body, &self.client_id, "client id")?;
        RawPacket::new(0x10, body).encode()
    }
}

/// A QoS 0 PUBLISH: no packet identifier, the payload is whatever follows the
/// topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl Publish {
    pub fn parse(header: u8, body: &[u8]) -> Result<Self, ProtocolError> {
        let qos = (header >> 1) & 0x03;
        if qos != 0 {
            return Err(ProtocolError::UnsupportedQos(qos));
        }

        let mut rd = BodyReader::new(body);
        let topic = rd.read_string("topic")?;
        let payload = rd.read_rest();
        Ok(Self { topic, payload })
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode_publish(&self.topic, &self.payload)
    }
}

/// Build a QoS 0 PUBLISH frame for `topic`.
pub fn encode_publish(topic: &str, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let mut body = Vec::with_capacity(2 + topic.len() + payload.len());
    write_string(&mut body, topic, "topic")?;
    body.extend_from_slice(payload);
    RawPacket::new(0x30, body).encode()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscribe {
    pub packet_id: u16,
    pub topics: Vec<String>,
}

impl Subscribe {
    pub fn parse(body: &[u8]) -> Result<Self, ProtocolError> {
        let mut rd = BodyReader::new(body);
        let packet_id = rd.read_u16("packet id")?;

        let mut topics = Vec::with_capacity(1);
        while rd.remaining() > 0 {
            let topic = rd.read_string("topic filter")?;
            if rd.remaining() == 0 {
                return Err(ProtocolError::MissingQos(topic));
            }
            let qos = rd.read_u8("requested qos")?;
            if qos != 0 {
                return Err(ProtocolError::UnsupportedQos(qos));
            }
            topics.push(topic);
        }

        if topics.is_empty() {
            return Err(ProtocolError::EmptySubscribe);
        }
        Ok(Self { packet_id, topics })
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut body = Vec::new();
        body.extend_from_slice(&self.packet_id.to_be_bytes());
        for topic in &self.topics {
            write_string(&mut body, topic, "topic filter")?;
            body.push(0x00);
        }
        RawPacket::new(0x82, body).encode()
    }
}

/// SUBACK granting QoS 0 to each of `count` requested topics.
pub fn encode_suback(packet_id: u16, count: usize) -> Result<Vec<u8>, ProtocolError> {
    let mut body = Vec::with_capacity(2 + count);
    body.extend_from_slice(&packet_id.to_be_bytes());
    body.resize(2 + count, 0x00);
    RawPacket::new(0x90, body).encode()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsubscribe {
    pub packet_id: u16,
}

impl Unsubscribe {
    /// Only the packet id is read; the broker drops every subscription
    /// regardless of the filters listed.
    pub fn parse(body: &[u8]) -> Result<Self, ProtocolError> {
        let mut rd = BodyReader::new(body);
        let packet_id = rd.read_u16("packet id")?;
        Ok(Self { packet_id })
    }

    pub fn encode(&self, topics: &[&str]) -> Result<Vec<u8>, ProtocolError> {
        let mut body = Vec::new();
        body.extend_from_slice(&self.packet_id.to_be_bytes());
        for topic in topics {
            write_string(&mut body, topic, "topic filter")?;
        }
        RawPacket::new(0xA2, body).encode()
    }
}

pub fn encode_unsuback(packet_id: u16) -> [u8; 4] {
    let [hi, lo] = packet_id.to_be_bytes();
    [0xB0, 0x02, hi, lo]
}

/// Client-to-broker packets the broker understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect(Connect),
    Publish(Publish),
    Subscribe(Subscribe),
    Unsubscribe(Unsubscribe),
    PingReq,
    Disconnect,
}

impl Packet {
    pub fn decode(raw: &RawPacket) -> Result<Self, ProtocolError> {
        match PacketType::from_header(raw.header) {
            Some(PacketType::Connect) => Connect::parse(&raw.body).map(Packet::Connect),
            Some(PacketType::Publish) => Publish::parse(raw.header, &raw.body).map(Packet::Publish),
            Some(PacketType::Subscribe) => Subscribe::parse(&raw.body).map(Packet::Subscribe),
            Some(PacketType::Unsubscribe) => Unsubscribe::parse(&raw.body).map(Packet::Unsubscribe),
            Some(PacketType::PingReq) => Ok(Packet::PingReq),
            Some(PacketType::Disconnect) => Ok(Packet::Disconnect),
            _ => Err(ProtocolError::UnsupportedPacketType(raw.packet_type())),
        }
    }
}
