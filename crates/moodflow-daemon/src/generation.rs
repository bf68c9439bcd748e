//! Client for the asynchronous text-to-audio job API.
//!
//! A generation is submit-then-poll: POST the mood prompt, then GET the
//! job record on a fixed interval until it reaches a terminal status.
//! Transient poll failures are swallowed as long as the attempt budget
//! lasts; only a missing job (404) aborts a poll loop early.

use moodflow_proto::config::ApiConfig;
use moodflow_proto::credentials::CredentialStore;
use moodflow_proto::error::{GenerateError, TransportKind};
use moodflow_proto::mood::Mood;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PollResponse {
    status: String,
    #[serde(default)]
    output: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

/// Pull the failure detail out of an error body shaped like
/// `{"detail": "..."}`; fall back to the raw body.
fn error_detail(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("detail").and_then(|d| d.as_str()).map(String::from))
        .unwrap_or_else(|| body.trim().to_string())
}

/// The job output is either a bare URL string or an array whose first
/// element is one.
fn extract_output(output: Option<&Value>) -> Result<String, GenerateError> {
    let candidate = match output {
        Some(Value::String(s)) => Some(s.as_str()),
        Some(Value::Array(items)) => items.first().and_then(|v| v.as_str()),
        _ => None,
    };
    match candidate {
        Some(url) if url.starts_with("http") => Ok(url.to_string()),
        Some(other) => Err(GenerateError::MalformedResponse(format!(
            "output is not an audio URL: {other}"
        ))),
        None => Err(GenerateError::MalformedResponse(
            "succeeded job carries no audio URL".to_string(),
        )),
    }
}

#[derive(Clone)]
pub struct GenerationClient {
    http: reqwest::Client,
    base_url: String,
    model_version: String,
    duration_secs: Option<u32>,
    poll_interval: Duration,
    max_poll_attempts: u32,
    credentials: Arc<CredentialStore>,
}

impl GenerationClient {
    pub fn new(api: &ApiConfig, credentials: Arc<CredentialStore>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base_url: api.base_url.trim_end_matches('/').to_string(),
            model_version: api.model_version.clone(),
            duration_secs: api.duration_secs.filter(|d| *d > 0),
            poll_interval: Duration::from_secs(api.poll_interval_secs),
            max_poll_attempts: api.max_poll_attempts.max(1),
            credentials,
        })
    }

    /// Generate one audio clip for `mood` and return its playable URL.
    /// Blocks (asynchronously) for the whole submit-and-poll cycle, so
    /// callers run it on its own task.
    pub async fn generate(&self, mood: &str) -> Result<String, GenerateError> {
        let token = self
            .credentials
            .get()
            .ok_or(GenerateError::CredentialMissing)?;
        let mood: Mood = mood
            .parse()
            .map_err(|_| GenerateError::InvalidInput(mood.to_string()))?;

        let job_id = self.submit(&token, mood).await?;
        info!("generation job {} submitted for {}", job_id, mood);
        self.poll(&token, &job_id).await
    }

    async fn submit(&self, token: &str, mood: Mood) -> Result<String, GenerateError> {
        let mut input = json!({ "lyrics": mood.prompt() });
        if let Some(duration) = self.duration_secs {
            input["duration"] = json!(duration);
        }
        let body = json!({ "version": self.model_version, "input": input });

        let response = self
            .http
            .post(&self.base_url)
            .header("Authorization", format!("Token {token}"))
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerateError::Transport {
                kind: TransportKind::Network,
                detail: e.to_string(),
            })?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(GenerateError::Transport {
                kind: TransportKind::from_status(status.as_u16()),
                detail: error_detail(&text),
            });
        }

        let parsed: SubmitResponse = serde_json::from_str(&text)
            .map_err(|e| GenerateError::MalformedResponse(format!("submit response: {e}")))?;
        parsed.id.ok_or_else(|| {
            GenerateError::MalformedResponse("submit response carries no job id".to_string())
        })
    }

    async fn poll(&self, token: &str, job_id: &str) -> Result<String, GenerateError> {
        let url = format!("{}/{}", self.base_url, job_id);

        for attempt in 1..=self.max_poll_attempts {
            // The job never finishes instantly; wait before the first
            // poll too.
            tokio::time::sleep(self.poll_interval).await;
            let last_attempt = attempt == self.max_poll_attempts;

            let response = match self
                .http
                .get(&url)
                .header("Authorization", format!("Token {token}"))
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    warn!("poll {}/{} failed: {}", attempt, self.max_poll_attempts, e);
                    if last_attempt {
                        return Err(GenerateError::Transport {
                            kind: TransportKind::Network,
                            detail: e.to_string(),
                        });
                    }
                    continue;
                }
            };

            let status = response.status();
            let text = response.text().await.unwrap_or_default();

            if status.as_u16() == 404 {
                // The job vanished; no amount of retrying brings it back.
                return Err(GenerateError::Transport {
                    kind: TransportKind::Unknown,
                    detail: format!("generation job {job_id} not found"),
                });
            }
            if !status.is_success() {
                warn!(
                    "poll {}/{} returned {}",
                    attempt, self.max_poll_attempts, status
                );
                if last_attempt {
                    return Err(GenerateError::Transport {
                        kind: TransportKind::from_status(status.as_u16()),
                        detail: error_detail(&text),
                    });
                }
                continue;
            }

            let parsed: PollResponse = match serde_json::from_str(&text) {
                Ok(p) => p,
                Err(e) => {
                    warn!("poll {}/{} unparseable: {}", attempt, self.max_poll_attempts, e);
                    if last_attempt {
                        return Err(GenerateError::MalformedResponse(format!(
                            "poll response: {e}"
                        )));
                    }
                    continue;
                }
            };

            debug!(
                "poll {}/{}: job {} is {}",
                attempt, self.max_poll_attempts, job_id, parsed.status
            );
            match parsed.status.as_str() {
                "succeeded" => return extract_output(parsed.output.as_ref()),
                "failed" => {
                    return Err(GenerateError::GenerationFailed(
                        parsed.error.unwrap_or_else(|| "unknown error".to_string()),
                    ))
                }
                "canceled" | "cancelled" => return Err(GenerateError::GenerationCancelled),
                // starting / processing — keep waiting
                _ => {}
            }
        }

        Err(GenerateError::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_output_accepts_string_and_array() {
        let direct = json!("https://cdn.example/clip.mp3");
        assert_eq!(
            extract_output(Some(&direct)).unwrap(),
            "https://cdn.example/clip.mp3"
        );

        let array = json!(["https://cdn.example/a.mp3", "https://cdn.example/b.mp3"]);
        assert_eq!(
            extract_output(Some(&array)).unwrap(),
            "https://cdn.example/a.mp3"
        );
    }

    #[test]
    fn test_extract_output_rejects_non_urls() {
        assert!(matches!(
            extract_output(Some(&json!("not-a-url"))),
            Err(GenerateError::MalformedResponse(_))
        ));
        assert!(matches!(
            extract_output(Some(&json!(42))),
            Err(GenerateError::MalformedResponse(_))
        ));
        assert!(matches!(
            extract_output(None),
            Err(GenerateError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_error_detail_prefers_detail_field() {
        assert_eq!(error_detail(r#"{"detail": "quota exceeded"}"#), "quota exceeded");
        assert_eq!(error_detail("plain text failure"), "plain text failure");
    }
}
