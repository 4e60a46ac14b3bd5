use super::codec::{
    MAX_REMAINING_LENGTH, RawPacket, decode_remaining_length, encode_remaining_length, read_packet,
    read_remaining_length,
};
use super::packet::{
    CONNACK_ACCEPTED, Connect, Packet, Publish, Subscribe, Unsubscribe, encode_publish, encode_suback,
    encode_unsuback,
};
use crate::utils::error::ProtocolError;

async fn decode_publish(frame: &[u8]) -> Publish {
    let mut cursor = frame;
    let raw = read_packet(&mut cursor, MAX_REMAINING_LENGTH)
        .await
        .unwrap()
        .expect("frame should contain a packet");
    assert!(cursor.is_empty(), "decoder must consume exactly one frame");
    match Packet::decode(&raw).unwrap() {
        Packet::Publish(publish) => publish,
        other => panic!("Expected a publish, got {other:?}"),
    }
}

fn connect_body(level: u8, flags: u8, client_id: &str) -> Vec<u8> {
    let mut body = vec![0x00, 0x04, b'M', b'Q', b'T', b'T', level, flags, 0x00, 0x3C];
    body.extend_from_slice(&(client_id.len() as u16).to_be_bytes());
    body.extend_from_slice(client_id.as_bytes());
    body
}

#[test]
fn test_remaining_length_boundaries() {
    let cases: [(usize, &[u8]); 8] = [
        (0, &[0x00]),
        (127, &[0x7F]),
        (128, &[0x80, 0x01]),
        (16_383, &[0xFF, 0x7F]),
        (16_384, &[0x80, 0x80, 0x01]),
        (2_097_151, &[0xFF, 0xFF, 0x7F]),
        (2_097_152, &[0x80, 0x80, 0x80, 0x01]),
        (MAX_REMAINING_LENGTH, &[0xFF, 0xFF, 0xFF, 0x7F]),
    ];
    for (value, expected) in cases {
        let mut buf = Vec::new();
        encode_remaining_length(value, &mut buf).unwrap();
        assert_eq!(buf, expected, "encoding of {value}");
        assert_eq!(
            decode_remaining_length(&buf).unwrap(),
            Some((value, expected.len()))
        );
    }
}

#[test]
fn test_remaining_length_rejects_values_beyond_four_bytes() {
    let mut buf = Vec::new();
    let err = encode_remaining_length(MAX_REMAINING_LENGTH + 1, &mut buf).unwrap_err();
    assert!(matches!(err, ProtocolError::RemainingLengthTooLarge(_)));
}

#[test]
fn test_decode_remaining_length_needs_more_and_malformed() {
    assert_eq!(decode_remaining_length(&[0x80]).unwrap(), None);
    assert_eq!(decode_remaining_length(&[]).unwrap(), None);
    assert!(matches!(
        decode_remaining_length(&[0x80, 0x80, 0x80, 0x80, 0x01]),
        Err(ProtocolError::MalformedRemainingLength)
    ));
    assert!(matches!(
        decode_remaining_length(&[0x80, 0x80, 0x80, 0x80]),
        Err(ProtocolError::MalformedRemainingLength)
    ));
}

#[tokio::test]
async fn test_publish_round_trip_across_length_widths() {
    // Payload sizes chosen so the remaining length needs 1, 2, 3 and 4 bytes.
    let topic = "beacons/k1/readings";
    for payload_len in [10usize, 200, 20_000, 2_100_000] {
        let payload: Vec<u8> = (0..payload_len).map(|i| (i % 251) as u8).collect();
        let frame = encode_publish(topic, &payload).unwrap();
        let decoded = decode_publish(&frame).await;
        assert_eq!(decoded.topic, topic);
        assert_eq!(decoded.payload, payload);
    }
}

#[tokio::test]
async fn test_publish_with_empty_payload_and_unicode_topic() {
    let frame = encode_publish("catlocator/chambre-à-coucher", b"").unwrap();
    let decoded = decode_publish(&frame).await;
    assert_eq!(decoded.topic, "catlocator/chambre-à-coucher");
    assert!(decoded.payload.is_empty());
}

#[tokio::test]
async fn test_read_packet_clean_eof_returns_none() {
    let mut empty: &[u8] = &[];
    assert!(
        read_packet(&mut empty, MAX_REMAINING_LENGTH)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_read_packet_truncated_body_is_error() {
    let mut frame: &[u8] = &[0x30, 0x05, 0x00, 0x01];
    let err = read_packet(&mut frame, MAX_REMAINING_LENGTH)
        .await
        .unwrap_err();
    assert!(matches!(err, ProtocolError::Io(_)));
}

#[tokio::test]
async fn test_read_packet_fifth_length_byte_is_malformed() {
    let mut frame: &[u8] = &[0x30, 0x80, 0x80, 0x80, 0x80, 0x01];
    let err = read_packet(&mut frame, MAX_REMAINING_LENGTH)
        .await
        .unwrap_err();
    assert!(matches!(err, ProtocolError::MalformedRemainingLength));
}

#[tokio::test]
async fn test_stream_and_buffer_length_decoders_agree() {
    for value in [0, 127, 128, 16_383, 16_384, 2_097_151, 2_097_152, MAX_REMAINING_LENGTH] {
        let mut buf = Vec::new();
        encode_remaining_length(value, &mut buf).unwrap();
        let (decoded, consumed) = decode_remaining_length(&buf).unwrap().unwrap();
        buf.push(0xAA);

        let mut stream = buf.as_slice();
        assert_eq!(read_remaining_length(&mut stream).await.unwrap(), decoded);
        assert_eq!(stream, &[0xAA], "reader must stop after {consumed} length bytes");
    }

    let mut short: &[u8] = &[0x80, 0x80];
    assert!(matches!(
        read_remaining_length(&mut short).await.unwrap_err(),
        ProtocolError::Io(_)
    ));
}

#[tokio::test]
async fn test_read_packet_enforces_size_limit() {
    let frame = encode_publish("t", &[0u8; 64]).unwrap();
    let mut cursor = frame.as_slice();
    let err = read_packet(&mut cursor, 16).await.unwrap_err();
    assert!(matches!(
        err,
        ProtocolError::PacketTooLarge { size: 67, limit: 16 }
    ));
}

#[test]
fn test_publish_rejects_nonzero_qos() {
    let body = {
        let mut b = vec![0x00, 0x01, b't'];
        b.extend_from_slice(&[0x00, 0x01]);
        b
    };
    let err = Publish::parse(0x32, &body).unwrap_err();
    assert!(matches!(err, ProtocolError::UnsupportedQos(1)));
    let err = Publish::parse(0x34, &body).unwrap_err();
    assert!(matches!(err, ProtocolError::UnsupportedQos(2)));
}

#[test]
fn test_connect_parse_accepts_clean_session() {
    let connect = Connect::parse(&connect_body(4, 0x02, "beacon-1")).unwrap();
    assert_eq!(connect.client_id, "beacon-1");
    assert_eq!(connect.keep_alive, 60);
    assert!(connect.clean_session);
}

#[test]
fn test_connect_encode_parses_back() {
    let frame = Connect::new("sim").encode().unwrap();
    let raw = RawPacket::new(frame[0], frame[2..].to_vec());
    assert_eq!(raw.packet_type(), 1);
    assert_eq!(Packet::decode(&raw).unwrap(), Packet::Connect(Connect::new("sim")));
}

#[test]
fn test_connect_rejections() {
    assert!(matches!(
        Connect::parse(&connect_body(3, 0x02, "a")),
        Err(ProtocolError::UnsupportedProtocolLevel(3))
    ));
    assert!(matches!(
        Connect::parse(&connect_body(5, 0x02, "a")),
        Err(ProtocolError::UnsupportedProtocolLevel(5))
    ));
    for flag in [1u8 << 2, 1 << 3, 1 << 4, 1 << 5, 1 << 6, 1 << 7] {
        assert!(
            matches!(
                Connect::parse(&connect_body(4, 0x02 | flag, "a")),
                Err(ProtocolError::UnsupportedConnectFlags(_))
            ),
            "flag {flag:08b} should be rejected"
        );
    }

    let mut bad_name = connect_body(4, 0x02, "a");
    bad_name[2] = b'X';
    assert!(matches!(
        Connect::parse(&bad_name),
        Err(ProtocolError::UnsupportedProtocol(name)) if name == "XQTT"
    ));

    let truncated = &connect_body(4, 0x02, "abcdef")[..12];
    assert!(matches!(
        Connect::parse(truncated),
        Err(ProtocolError::Truncated("client id"))
    ));
}

#[test]
fn test_subscribe_parse_and_suback() {
    let frame = Subscribe {
        packet_id: 7,
        topics: vec!["a/b".to_string(), "c".to_string()],
    }
    .encode()
    .unwrap();
    assert_eq!(frame[0], 0x82);
    let subscribe = Subscribe::parse(&frame[2..]).unwrap();
    assert_eq!(subscribe.packet_id, 7);
    assert_eq!(subscribe.topics, vec!["a/b", "c"]);

    assert_eq!(encode_suback(7, 2).unwrap(), vec![0x90, 0x04, 0x00, 0x07, 0x00, 0x00]);
}

#[test]
fn test_subscribe_rejections() {
    // packet id 1, topic "t", qos 1
    let qos1 = [0x00, 0x01, 0x00, 0x01, b't', 0x01];
    assert!(matches!(
        Subscribe::parse(&qos1),
        Err(ProtocolError::UnsupportedQos(1))
    ));

    let missing_qos = [0x00, 0x01, 0x00, 0x01, b't'];
    assert!(matches!(
        Subscribe::parse(&missing_qos),
        Err(ProtocolError::MissingQos(topic)) if topic == "t"
    ));

    assert!(matches!(
        Subscribe::parse(&[0x00, 0x01]),
        Err(ProtocolError::EmptySubscribe)
    ));
}

#[test]
fn test_unsubscribe_and_unsuback() {
    let frame = Unsubscribe { packet_id: 0x1234 }
        .encode(&["a", "b"])
        .unwrap();
    assert_eq!(frame[0], 0xA2);
    assert_eq!(Unsubscribe::parse(&frame[2..]).unwrap().packet_id, 0x1234);
    assert_eq!(encode_unsuback(0x1234), [0xB0, 0x02, 0x12, 0x34]);
}

#[test]
fn test_packet_decode_rejects_unsupported_types() {
    let connack = RawPacket::new(CONNACK_ACCEPTED[0], CONNACK_ACCEPTED[2..].to_vec());
    assert!(matches!(
        Packet::decode(&connack),
        Err(ProtocolError::UnsupportedPacketType(2))
    ));
    let puback = RawPacket::new(0x40, vec![0x00, 0x01]);
    assert!(matches!(
        Packet::decode(&puback),
        Err(ProtocolError::UnsupportedPacketType(4))
    ));
    assert_eq!(
        Packet::decode(&RawPacket::new(0xC0, vec![])).unwrap(),
        Packet::PingReq
    );
    assert_eq!(
        Packet::decode(&RawPacket::new(0xE0, vec![])).unwrap(),
        Packet::Disconnect
    );
}
