//! Envelope encoding and decoding.
//!
//! # Wire Format
//!
//! Every [`SigningMessage`] is SBOR-encoded then LZ4-compressed:
//!
//! ```text
//! [LZ4 compressed SBOR payload]
//! ```
//!
//! The payload variant is carried inside the envelope, so there is no
//! topic-based dispatch: one decoder handles every message kind.

use crate::wire;
use thiserror::Error;
use tracing::trace;
use treesig_messages::SigningMessage;
use treesig_types::NetworkMessage;

/// Errors that can occur during message encoding/decoding.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Message too short")]
    MessageTooShort,

    #[error("SBOR decode error: {0}")]
    SborDecode(String),

    #[error("SBOR encode error: {0}")]
    SborEncode(String),

    #[error("Decompression error: {0}")]
    Decompress(#[from] wire::WireError),
}

/// SBOR-encode then LZ4-compress any network message.
pub fn encode_to_wire<M: NetworkMessage>(message: &M) -> Result<Vec<u8>, CodecError> {
    let sbor_bytes =
        sbor::basic_encode(message).map_err(|e| CodecError::SborEncode(format!("{:?}", e)))?;
    Ok(wire::compress(&sbor_bytes))
}

/// LZ4-decompress then SBOR-decode any network message.
pub fn decode_from_wire<M: NetworkMessage>(data: &[u8]) -> Result<M, CodecError> {
    if data.is_empty() {
        return Err(CodecError::MessageTooShort);
    }
    let payload = wire::decompress(data)?;
    sbor::basic_decode(&payload).map_err(|e| CodecError::SborDecode(format!("{:?}", e)))
}

/// Encode an envelope to wire format.
pub fn encode_message(message: &SigningMessage) -> Result<Vec<u8>, CodecError> {
    let bytes = encode_to_wire(message)?;
    trace!(
        kind = %message.kind(),
        from = %message.from,
        bytes = bytes.len(),
        "Encoded envelope"
    );
    Ok(bytes)
}

/// Decode an envelope from wire format.
pub fn decode_message(data: &[u8]) -> Result<SigningMessage, CodecError> {
    decode_from_wire(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use treesig_messages::{Announcement, Payload, SignatureBroadcast};
    use treesig_test_helpers::{byzantine, fixtures::make_signature, TestRoster};
    use treesig_types::{NodeId, RoundNumber, View, VoteIndex};

    #[test]
    fn test_encode_decode_announcement() {
        let message = SigningMessage::new(
            View(3),
            NodeId(1),
            VoteIndex(2),
            Payload::Announcement(Announcement {
                round: RoundNumber(9),
                message: b"hello world".to_vec(),
                data: vec![7; 32],
                vote: None,
            }),
        );

        let bytes = encode_message(&message).unwrap();
        assert!(!bytes.is_empty());
        assert_eq!(decode_message(&bytes).unwrap(), message);
    }

    #[test]
    fn test_signature_survives_the_wire() {
        let roster = TestRoster::new(5, 42);
        let signature = make_signature(&roster, &[0, 1, 3], b"wire");
        let message = SigningMessage::new(
            View(0),
            NodeId(0),
            VoteIndex(0),
            Payload::SignatureBroadcast(SignatureBroadcast {
                signature,
                vote: None,
            }),
        );

        let decoded = decode_message(&encode_message(&message).unwrap()).unwrap();
        let Payload::SignatureBroadcast(broadcast) = decoded.payload else {
            panic!("Expected SignatureBroadcast");
        };
        assert!(broadcast.signature.verify(&roster.public_keys()).is_ok());
    }

    #[test]
    fn test_hidden_exception_still_rejected_after_the_wire() {
        let roster = TestRoster::new(4, 42);
        let forged = byzantine::make_hidden_exception(&roster, 2, b"wire");
        let message = SigningMessage::new(
            View(0),
            NodeId(0),
            VoteIndex(0),
            Payload::SignatureBroadcast(SignatureBroadcast {
                signature: forged,
                vote: None,
            }),
        );

        let decoded = decode_message(&encode_message(&message).unwrap()).unwrap();
        let Payload::SignatureBroadcast(broadcast) = decoded.payload else {
            panic!("Expected SignatureBroadcast");
        };
        assert!(broadcast.signature.verify(&roster.public_keys()).is_err());
    }

    #[test]
    fn test_empty_input() {
        assert!(matches!(
            decode_message(&[]),
            Err(CodecError::MessageTooShort)
        ));
    }

    #[test]
    fn test_invalid_compressed_data() {
        let result = decode_message(&[99, 1, 2, 3]);
        assert!(matches!(result, Err(CodecError::Decompress(_))));
    }

    #[test]
    fn test_wrong_payload_type() {
        let bytes = wire::compress(&sbor::basic_encode(&(1u8, 2u64)).unwrap());
        assert!(matches!(
            decode_message(&bytes),
            Err(CodecError::SborDecode(_))
        ));
    }
}
