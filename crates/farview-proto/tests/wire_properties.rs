//! Property-based tests for the wire codec.

use farview_proto::{
    MessageHeader, MessageType, encode_message, obfuscate::apply_keystream,
    payloads::{AuthenticationRequest, HandshakeResponse, KeyboardEvent, MouseEvent, ScreenData},
    try_parse,
};
use proptest::prelude::*;

fn arbitrary_message_type() -> impl Strategy<Value = MessageType> {
    prop_oneof![
        Just(MessageType::HandshakeRequest),
        Just(MessageType::HandshakeResponse),
        Just(MessageType::AuthChallenge),
        Just(MessageType::AuthenticationRequest),
        Just(MessageType::AuthenticationResponse),
        Just(MessageType::Heartbeat),
        Just(MessageType::ScreenData),
        Just(MessageType::MouseEvent),
        Just(MessageType::KeyboardEvent),
    ]
}

proptest! {
    #[test]
    fn obfuscation_is_an_involution(
        data in prop::collection::vec(any::<u8>(), 0..2048),
        sequence in any::<u32>(),
    ) {
        let mut transformed = data.clone();
        apply_keystream(&mut transformed, sequence);
        prop_assert_eq!(transformed.len(), data.len());
        apply_keystream(&mut transformed, sequence);
        prop_assert_eq!(transformed, data);
    }

    #[test]
    fn message_round_trip(
        msg_type in arbitrary_message_type(),
        sequence in any::<u32>(),
        payload in prop::collection::vec(any::<u8>(), 0..4096),
    ) {
        let wire = encode_message(msg_type, sequence, &payload).unwrap();
        prop_assert_eq!(wire.len(), MessageHeader::SIZE + payload.len());

        let parsed = try_parse(&wire).unwrap().unwrap();
        prop_assert_eq!(parsed.header.message_type(), Some(msg_type));
        prop_assert_eq!(parsed.header.sequence(), sequence);
        prop_assert_eq!(parsed.header.length() as usize, payload.len());
        prop_assert_eq!(parsed.payload.as_ref(), payload.as_slice());
        prop_assert_eq!(parsed.consumed, wire.len());
    }

    #[test]
    fn truncated_messages_never_parse(
        msg_type in arbitrary_message_type(),
        sequence in any::<u32>(),
        payload in prop::collection::vec(any::<u8>(), 1..512),
        cut in any::<prop::sample::Index>(),
    ) {
        let wire = encode_message(msg_type, sequence, &payload).unwrap();
        let cut = cut.index(wire.len() - 1);
        // A clean prefix either reports "need more" or, if shorter than a
        // header, cannot be a parse error.
        let result = try_parse(&wire[..cut]);
        prop_assert_eq!(result, Ok(None));
    }

    #[test]
    fn mouse_event_round_trip(
        x in any::<i32>(),
        y in any::<i32>(),
        buttons in any::<u8>(),
        wheel in any::<i32>(),
    ) {
        let event = MouseEvent { x, y, buttons, wheel_delta: wheel };
        prop_assert_eq!(MouseEvent::decode(&event.encode()).unwrap(), event);
    }

    #[test]
    fn keyboard_event_round_trip(
        key in any::<u32>(),
        modifiers in any::<u32>(),
        pressed in any::<bool>(),
    ) {
        let event = KeyboardEvent { key, modifiers, pressed };
        prop_assert_eq!(KeyboardEvent::decode(&event.encode()).unwrap(), event);
    }

    #[test]
    fn screen_data_round_trip(
        width in 1u32..8192,
        height in 1u32..8192,
        data in prop::collection::vec(any::<u8>(), 1..4096),
    ) {
        let frame = ScreenData {
            x: 0,
            y: 0,
            width,
            height,
            image_data: bytes::Bytes::from(data),
        };
        prop_assert_eq!(ScreenData::decode(&frame.encode()).unwrap(), frame);
    }

    #[test]
    fn auth_request_survives_framing(
        username in "[a-zA-Z0-9_]{0,40}",
        hash in "[0-9a-f]{0,64}",
        sequence in any::<u32>(),
    ) {
        let request = AuthenticationRequest {
            username: username.clone(),
            password_hash: hash.clone(),
            auth_method: 1,
        };
        let wire = encode_message(
            MessageType::AuthenticationRequest,
            sequence,
            &request.encode(),
        ).unwrap();
        let parsed = try_parse(&wire).unwrap().unwrap();
        let decoded = AuthenticationRequest::decode(&parsed.payload).unwrap();
        prop_assert_eq!(decoded.username, username);
        prop_assert_eq!(decoded.password_hash, hash);
    }
}

#[test]
fn handshake_response_geometry_survives_framing() {
    let response = HandshakeResponse {
        server_version: 1,
        screen_width: 2560,
        screen_height: 1440,
        color_depth: 32,
        features: 0,
        server_name: "Farview Server".to_string(),
        server_os: std::env::consts::OS.to_string(),
    };
    let wire = encode_message(MessageType::HandshakeResponse, 0, &response.encode()).unwrap();
    let parsed = try_parse(&wire).unwrap().unwrap();
    assert_eq!(HandshakeResponse::decode(&parsed.payload).unwrap(), response);
}
