//! The duplex session message grammar (spec §6).
//!
//! Every record carries a `type` discriminator. Audio itself never appears in
//! either enum: binary WebSocket frames are handled directly in
//! `crate::websocket` alongside these JSON control frames on the same socket.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Frames a client sends.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    StartEnrollment {
        speaker_id: String,
        #[serde(default)]
        speaker_name: Option<String>,
    },
    RegisterPin {
        pin: String,
    },
    StartVerify {
        speaker_id: String,
    },
    VerifyPin {
        pin: String,
    },
}

/// Frames the server emits.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The full balanced prompt schedule, sent once on entering `AWAITING_AUDIO(0)`.
    Prompts {
        speaker_id: String,
        prompts: [String; 5],
        total_sets: u8,
        current_set: u8,
    },
    /// Per-set enrollment outcome.
    AsrResult {
        success: bool,
        asr_result: String,
        set_index: u8,
        #[serde(skip_serializing_if = "Option::is_none")]
        remaining_sets: Option<u8>,
        #[serde(skip_serializing_if = "Option::is_none")]
        retry_count: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        max_retries: Option<u32>,
        message: String,
    },
    EnrollmentComplete {
        speaker_id: String,
        registered_digits: [String; 10],
        has_pin: bool,
        status: &'static str,
    },
    /// The verification challenge.
    Prompt {
        prompt: String,
        length: u8,
    },
    VerifyResult {
        authenticated: bool,
        speaker_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        asr_result: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        asr_matched: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        voice_similarity: Option<f32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        digit_scores: Option<HashMap<String, f32>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        can_fallback_to_pin: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        auth_method: Option<&'static str>,
        message: String,
    },
    /// A malformed `register_pin` payload (not exactly four ASCII digits).
    /// Unlike `Error`, this is not fatal: the enrollment state machine stays in
    /// `AWAITING_PIN` and re-prompts (spec §4.8's "register_pin(invalid) ->
    /// AWAITING_PIN (re-prompt)"), so a dedicated non-terminal frame is used
    /// rather than overloading `Error`, whose table entry in spec §6 is
    /// explicitly fatal.
    PinRejected {
        message: String,
    },
    /// A fatal session error (spec §7); the connection closes after this frame.
    Error {
        code: &'static str,
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_message_tags_are_snake_case() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"start_enrollment","speaker_id":"u1","speaker_name":"Taro"}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::StartEnrollment { speaker_id, speaker_name } => {
                assert_eq!(speaker_id, "u1");
                assert_eq!(speaker_name.as_deref(), Some("Taro"));
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn server_message_omits_absent_optional_fields() {
        let msg = ServerMessage::VerifyResult {
            authenticated: true,
            speaker_id: "u1".to_string(),
            asr_result: None,
            asr_matched: Some(true),
            voice_similarity: Some(0.9),
            digit_scores: None,
            can_fallback_to_pin: None,
            auth_method: Some("voice"),
            message: "認証成功".to_string(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("digit_scores").is_none());
        assert!(json.get("can_fallback_to_pin").is_none());
        assert_eq!(json["auth_method"], "voice");
    }
}
