//! Client-visible error messages (spec §7: "a stable machine-readable `code`
//! and a localized human message (reference locale: Japanese)"). Only this
//! module's table ever reaches a client; an internal error's `Display` text
//! is logged via `tracing`, never serialized to the wire.

use voxkey_core::CoreError;

pub mod ja {
    use super::*;

    pub fn message(err: &CoreError) -> &'static str {
        match err {
            CoreError::DecodeError(_) => "音声データを解析できませんでした",
            CoreError::InvalidAudio(_) => "音声が短すぎるか長すぎます",
            CoreError::AsrFailed(_) => "音声認識に失敗しました",
            CoreError::SegmentationFailed(_) => "発話内容が一致しませんでした",
            CoreError::SpeakerNotFound(_) => "話者が見つかりません",
            CoreError::SpeakerAlreadyExists(_) => "この話者IDは既に登録されています",
            CoreError::PinNotSet => "PINが設定されていません",
            CoreError::MaxRetriesExceeded => "再試行回数の上限を超えました",
            CoreError::Timeout => "接続がタイムアウトしました",
            CoreError::Internal(_) => "内部エラーが発生しました",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_taxonomy_member_has_a_japanese_message() {
        let samples = [
            CoreError::DecodeError("x".into()),
            CoreError::InvalidAudio("x".into()),
            CoreError::AsrFailed("x".into()),
            CoreError::SegmentationFailed("x".into()),
            CoreError::SpeakerNotFound("x".into()),
            CoreError::SpeakerAlreadyExists("x".into()),
            CoreError::PinNotSet,
            CoreError::MaxRetriesExceeded,
            CoreError::Timeout,
            CoreError::Internal("x".into()),
        ];
        for err in &samples {
            assert!(!ja::message(err).is_empty());
        }
    }

    #[test]
    fn internal_error_message_never_contains_raw_detail() {
        let err = CoreError::Internal("super secret stack trace".into());
        assert!(!ja::message(&err).contains("secret"));
    }
}
