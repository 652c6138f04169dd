use ed25519_dalek::{Signature, VerifyingKey};
use steward_contracts::{
    Command, FollowupMessage, Interaction, InteractionAck, ACK_DEFERRED, ACK_PONG,
    INTERACTION_COMMAND, INTERACTION_PING,
};

/// Verifies a detached signature over `timestamp || raw_body`.
///
/// Fails closed: malformed hex, wrong key or signature length, and
/// verification mismatch all return false. Nothing here panics or errors.
pub fn verify_signature(
    public_key_hex: &str,
    timestamp: &str,
    raw_body: &[u8],
    signature_hex: &str,
) -> bool {
    let key_raw = match hex::decode(public_key_hex) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    let sig_raw = match hex::decode(signature_hex) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    let Ok(key_bytes) = <[u8; 32]>::try_from(key_raw.as_slice()) else {
        return false;
    };
    let Ok(sig_bytes) = <[u8; 64]>::try_from(sig_raw.as_slice()) else {
        return false;
    };
    let Ok(key) = VerifyingKey::from_bytes(&key_bytes) else {
        return false;
    };
    let sig = Signature::from_bytes(&sig_bytes);

    let mut message = Vec::with_capacity(timestamp.len() + raw_body.len());
    message.extend_from_slice(timestamp.as_bytes());
    message.extend_from_slice(raw_body);
    key.verify_strict(&message, &sig).is_ok()
}

/// Compares a caller-supplied key against the control shared secret.
/// An empty configured secret never matches anything.
pub fn shared_secret_matches(provided: &str, expected: &str) -> bool {
    !expected.is_empty() && provided == expected
}

/// What the router should do with a verified interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionKind {
    Ping,
    Command,
    Unsupported,
}

pub fn classify_interaction(interaction: &Interaction) -> InteractionKind {
    match interaction.kind {
        INTERACTION_PING => InteractionKind::Ping,
        INTERACTION_COMMAND => InteractionKind::Command,
        _ => InteractionKind::Unsupported,
    }
}

pub fn parse_command(interaction: &Interaction) -> Command {
    match interaction.data.as_ref().map(|d| d.name.as_str()) {
        Some("status") => Command::Status,
        Some("start") => Command::Start,
        Some("stop") => Command::Stop,
        _ => Command::Unknown,
    }
}

pub fn pong_ack() -> InteractionAck {
    InteractionAck { kind: ACK_PONG }
}

pub fn deferred_ack() -> InteractionAck {
    InteractionAck {
        kind: ACK_DEFERRED,
    }
}

/// The standard follow-up shape: plain content, no embeds, no mentions.
pub fn standard_response(content: impl Into<String>) -> FollowupMessage {
    FollowupMessage {
        content: content.into(),
        embeds: Vec::new(),
        tts: false,
        allowed_mentions: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};
    use steward_contracts::InteractionData;

    fn test_key() -> SigningKey {
        SigningKey::from_bytes(&[7u8; 32])
    }

    fn sign(key: &SigningKey, timestamp: &str, body: &[u8]) -> String {
        let mut message = timestamp.as_bytes().to_vec();
        message.extend_from_slice(body);
        hex::encode(key.sign(&message).to_bytes())
    }

    #[test]
    fn accepts_a_valid_signature() {
        let key = test_key();
        let public_key = hex::encode(key.verifying_key().to_bytes());
        let body = br#"{"type":1}"#;
        let signature = sign(&key, "1700000000", body);
        assert!(verify_signature(&public_key, "1700000000", body, &signature));
    }

    #[test]
    fn rejects_a_tampered_body() {
        let key = test_key();
        let public_key = hex::encode(key.verifying_key().to_bytes());
        let signature = sign(&key, "1700000000", br#"{"type":1}"#);
        assert!(!verify_signature(
            &public_key,
            "1700000000",
            br#"{"type":2}"#,
            &signature
        ));
    }

    #[test]
    fn rejects_a_shifted_timestamp() {
        let key = test_key();
        let public_key = hex::encode(key.verifying_key().to_bytes());
        let body = br#"{"type":1}"#;
        let signature = sign(&key, "1700000000", body);
        assert!(!verify_signature(&public_key, "1700000001", body, &signature));
    }

    #[test]
    fn rejects_malformed_inputs_without_panicking() {
        let key = test_key();
        let public_key = hex::encode(key.verifying_key().to_bytes());
        let body = br#"{"type":1}"#;
        let signature = sign(&key, "1700000000", body);

        assert!(!verify_signature("not-hex", "1700000000", body, &signature));
        assert!(!verify_signature(&public_key, "1700000000", body, "not-hex"));
        assert!(!verify_signature("abcd", "1700000000", body, &signature));
        assert!(!verify_signature(&public_key, "1700000000", body, "abcd"));
        assert!(!verify_signature("", "1700000000", body, ""));
    }

    #[test]
    fn shared_secret_never_matches_when_unset() {
        assert!(!shared_secret_matches("", ""));
        assert!(!shared_secret_matches("guess", ""));
        assert!(shared_secret_matches("hunter2", "hunter2"));
        assert!(!shared_secret_matches("hunter3", "hunter2"));
    }

    fn named(name: &str) -> Interaction {
        Interaction {
            kind: INTERACTION_COMMAND,
            data: Some(InteractionData {
                name: name.to_string(),
            }),
            member: None,
            token: None,
        }
    }

    #[test]
    fn parses_known_commands_and_falls_back() {
        assert_eq!(parse_command(&named("status")), Command::Status);
        assert_eq!(parse_command(&named("start")), Command::Start);
        assert_eq!(parse_command(&named("stop")), Command::Stop);
        assert_eq!(parse_command(&named("dance")), Command::Unknown);

        let no_data = Interaction {
            kind: INTERACTION_COMMAND,
            data: None,
            member: None,
            token: None,
        };
        assert_eq!(parse_command(&no_data), Command::Unknown);
    }

    #[test]
    fn classifies_interaction_types() {
        let ping = Interaction {
            kind: INTERACTION_PING,
            data: None,
            member: None,
            token: None,
        };
        assert_eq!(classify_interaction(&ping), InteractionKind::Ping);

        let odd = Interaction {
            kind: 9,
            data: None,
            member: None,
            token: None,
        };
        assert_eq!(classify_interaction(&odd), InteractionKind::Unsupported);
    }

    #[test]
    fn standard_response_has_no_mentions_or_tts() {
        let message = standard_response("hello");
        assert_eq!(message.content, "hello");
        assert!(message.embeds.is_empty());
        assert!(message.allowed_mentions.is_empty());
        assert!(!message.tts);
    }
}
