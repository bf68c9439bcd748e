//! Error taxonomy for the generation client and the playback core.
//!
//! Typed errors cross the client boundary; `anyhow` is reserved for
//! binary seams where no caller branches on the failure.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Sub-kind of a transport-level failure when talking to the
/// generation service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportKind {
    /// 401 — bad or expired credential.
    Auth,
    /// 402 — payment / quota exhausted.
    Quota,
    /// 429 — rate limited.
    RateLimit,
    /// Connection-level failure (offline, DNS, blocked request).
    Network,
    /// Any other HTTP failure (422 bad input, 404 unknown job, 5xx, ...).
    Unknown,
}

impl TransportKind {
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => TransportKind::Auth,
            402 => TransportKind::Quota,
            429 => TransportKind::RateLimit,
            _ => TransportKind::Unknown,
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransportKind::Auth => "authentication",
            TransportKind::Quota => "quota",
            TransportKind::RateLimit => "rate-limit",
            TransportKind::Network => "network",
            TransportKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Failure modes of a single `generate` call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerateError {
    #[error("no API credential configured")]
    CredentialMissing,

    #[error("unknown mood: {0}")]
    InvalidInput(String),

    #[error("transport error ({kind}): {detail}")]
    Transport { kind: TransportKind, detail: String },

    #[error("malformed service response: {0}")]
    MalformedResponse(String),

    #[error("generation failed: {0}")]
    GenerationFailed(String),

    #[error("generation job was cancelled")]
    GenerationCancelled,

    #[error("generation timed out before the job finished")]
    Timeout,
}

impl GenerateError {
    /// True when the right recovery is re-entering the API credential
    /// rather than a plain retry.
    pub fn needs_credential(&self) -> bool {
        matches!(
            self,
            GenerateError::CredentialMissing
                | GenerateError::Transport {
                    kind: TransportKind::Auth,
                    ..
                }
        )
    }

    /// Actionable, user-facing guidance for status displays.
    pub fn guidance(&self) -> String {
        match self {
            GenerateError::CredentialMissing => {
                "Set your API token before selecting a mood.".to_string()
            }
            GenerateError::Transport { kind, detail } => match kind {
                TransportKind::Auth => {
                    "Authentication failed (401). Check that your API token is correct and still valid."
                        .to_string()
                }
                TransportKind::Quota => {
                    "Payment required (402). Check your account balance or plan.".to_string()
                }
                TransportKind::RateLimit => {
                    "Too many requests (429). Wait a moment before trying again.".to_string()
                }
                TransportKind::Network => format!(
                    "Network request failed ({detail}). Check that you are online; if you are \
                     behind a proxy or firewall the request may be blocked."
                ),
                TransportKind::Unknown => format!("Request failed: {detail}"),
            },
            GenerateError::InvalidInput(mood) => format!("'{mood}' is not a known mood."),
            GenerateError::MalformedResponse(detail) => format!(
                "The service answered in an unexpected format ({detail}). Try again later."
            ),
            GenerateError::GenerationFailed(reason) => {
                format!("The service could not generate this track: {reason}")
            }
            GenerateError::GenerationCancelled => {
                "The generation job was cancelled on the service side.".to_string()
            }
            GenerateError::Timeout => {
                "Generation took too long and was abandoned. Try again later.".to_string()
            }
        }
    }
}

/// Classification of audio playback failures, as reported by the
/// audio-rendering primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackErrorKind {
    /// Playback was aborted before completion.
    Aborted,
    /// Download or decode failed mid-stream.
    NetworkDecode,
    /// The source format is not supported.
    Unsupported,
    Unknown,
}

impl PlaybackErrorKind {
    pub fn message(&self) -> &'static str {
        match self {
            PlaybackErrorKind::Aborted => "playback was aborted",
            PlaybackErrorKind::NetworkDecode => "a network or decode error interrupted playback",
            PlaybackErrorKind::Unsupported => "the audio format is not supported",
            PlaybackErrorKind::Unknown => "an unknown playback error occurred",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_kind_from_status() {
        assert_eq!(TransportKind::from_status(401), TransportKind::Auth);
        assert_eq!(TransportKind::from_status(402), TransportKind::Quota);
        assert_eq!(TransportKind::from_status(429), TransportKind::RateLimit);
        assert_eq!(TransportKind::from_status(422), TransportKind::Unknown);
        assert_eq!(TransportKind::from_status(500), TransportKind::Unknown);
    }

    #[test]
    fn test_credential_errors_trigger_capture_flow() {
        assert!(GenerateError::CredentialMissing.needs_credential());
        assert!(GenerateError::Transport {
            kind: TransportKind::Auth,
            detail: "401".to_string(),
        }
        .needs_credential());
        assert!(!GenerateError::Timeout.needs_credential());
    }

    #[test]
    fn test_guidance_names_the_status_code() {
        let err = GenerateError::Transport {
            kind: TransportKind::Quota,
            detail: "payment required".to_string(),
        };
        assert!(err.guidance().contains("402"));
    }
}
