//! Speech-to-text through an asynchronous transcription job service.
//!
//! A job is started with the inline audio, polled until it settles, and the
//! transcript document it points to is fetched.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use scorchbook_shared::{Result, ScorchbookError, TranscribeConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument};
use url::Url;
use uuid::Uuid;

/// Converts a voice note to text.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &[u8], mime_type: &str) -> Result<String>;
}

/// Container format name for an audio mime type; `webm` when unknown.
pub fn map_media_format(mime_type: &str) -> &'static str {
    let mime = mime_type.to_ascii_lowercase();
    if mime.contains("mp3") || mime.contains("mpeg") {
        "mp3"
    } else if mime.contains("mp4") || mime.contains("m4a") || mime.contains("aac") {
        "mp4"
    } else if mime.contains("wav") {
        "wav"
    } else if mime.contains("flac") {
        "flac"
    } else if mime.contains("ogg") {
        "ogg"
    } else {
        "webm"
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct StartJobRequest<'a> {
    job_name: &'a str,
    language_code: &'a str,
    media_format: &'a str,
    media: JobMedia,
    settings: JobSettings,
}

#[derive(Debug, Serialize)]
struct JobMedia {
    content_base64: String,
}

#[derive(Debug, Serialize)]
struct JobSettings {
    show_speaker_labels: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum JobStatus {
    Queued,
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Deserialize)]
struct JobState {
    status: JobStatus,
    #[serde(default)]
    transcript_uri: Option<String>,
}

// ---------------------------------------------------------------------------
// HttpTranscriber
// ---------------------------------------------------------------------------

/// Client for a transcription job service exposing
/// `POST /transcription-jobs` and `GET /transcription-jobs/{name}`.
#[derive(Debug, Clone)]
pub struct HttpTranscriber {
    http: Client,
    endpoint: String,
    api_key: Option<String>,
    language: String,
    poll_interval: Duration,
    max_polls: u32,
}

impl HttpTranscriber {
    pub fn new(config: &TranscribeConfig, api_key: Option<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ScorchbookError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            language: config.language.clone(),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            max_polls: config.max_polls,
        })
    }

    pub fn from_config(config: &TranscribeConfig) -> Result<Self> {
        Self::new(config, scorchbook_shared::read_api_key(&config.api_key_env))
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn start_job(&self, job_name: &str, audio: &[u8], mime_type: &str) -> Result<()> {
        let body = StartJobRequest {
            job_name,
            language_code: &self.language,
            media_format: map_media_format(mime_type),
            media: JobMedia {
                content_base64: STANDARD.encode(audio),
            },
            settings: JobSettings {
                show_speaker_labels: false,
            },
        };
        let url = format!("{}/transcription-jobs", self.endpoint);
        let response = self
            .authorized(self.http.post(&url).json(&body))
            .send()
            .await
            .map_err(|e| ScorchbookError::Network(format!("{url}: {e}")))?;
        if !response.status().is_success() {
            return Err(ScorchbookError::Transcription(format!(
                "failed to start transcription job ({})",
                response.status()
            )));
        }
        Ok(())
    }

    async fn job_state(&self, job_name: &str) -> Result<JobState> {
        let url = format!("{}/transcription-jobs/{job_name}", self.endpoint);
        let response = self
            .authorized(self.http.get(&url))
            .send()
            .await
            .map_err(|e| ScorchbookError::Network(format!("{url}: {e}")))?;
        if !response.status().is_success() {
            return Err(ScorchbookError::Transcription(format!(
                "transcription job lookup failed ({})",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| ScorchbookError::parse(format!("invalid transcription job state: {e}")))
    }

    async fn fetch_transcript(&self, transcript_uri: &str) -> Result<String> {
        let url = match Url::parse(transcript_uri) {
            Ok(url) => url,
            Err(_) => Url::parse(&format!("{}/", self.endpoint))
                .and_then(|base| base.join(transcript_uri.trim_start_matches('/')))
                .map_err(|e| ScorchbookError::parse(format!("invalid transcript URI: {e}")))?,
        };
        let document: Value = self
            .authorized(self.http.get(url.clone()))
            .send()
            .await
            .map_err(|e| ScorchbookError::Network(format!("{url}: {e}")))?
            .json()
            .await
            .map_err(|e| ScorchbookError::parse(format!("invalid transcript document: {e}")))?;

        Ok(document
            .pointer("/results/transcripts/0/transcript")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    #[instrument(skip_all, fields(mime_type))]
    async fn transcribe(&self, audio: &[u8], mime_type: &str) -> Result<String> {
        let job_name = format!("scorchbook-{}-{}", chrono::Utc::now().timestamp_millis(), job_suffix());
        info!(job_name, bytes = audio.len(), "agent.transcribe.start");
        self.start_job(&job_name, audio, mime_type).await?;

        for attempt in 0..self.max_polls {
            tokio::time::sleep(self.poll_interval).await;
            let state = self.job_state(&job_name).await?;
            debug!(job_name, attempt, status = ?state.status, "transcription poll");
            match state.status {
                JobStatus::Completed => {
                    let uri = state.transcript_uri.filter(|u| !u.is_empty()).ok_or_else(|| {
                        ScorchbookError::Transcription(
                            "Transcribe completed without transcript URI".into(),
                        )
                    })?;
                    let transcript = self.fetch_transcript(&uri).await?;
                    info!(job_name, "agent.transcribe.completed");
                    return Ok(transcript);
                }
                JobStatus::Failed => {
                    return Err(ScorchbookError::Transcription("Transcribe job failed".into()));
                }
                JobStatus::Queued | JobStatus::InProgress => {}
            }
        }

        Err(ScorchbookError::Transcription("Transcribe job timed out".into()))
    }
}

/// Six random-ish characters from a fresh v7 UUID's random tail.
fn job_suffix() -> String {
    let simple = Uuid::now_v7().simple().to_string();
    simple[simple.len() - 6..].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transcriber(server: &MockServer, max_polls: u32) -> HttpTranscriber {
        let config = TranscribeConfig {
            endpoint: server.uri(),
            poll_interval_ms: 5,
            max_polls,
            ..TranscribeConfig::default()
        };
        HttpTranscriber::new(&config, Some("tx-key".into())).unwrap()
    }

    #[test]
    fn media_formats() {
        assert_eq!(map_media_format("audio/mpeg"), "mp3");
        assert_eq!(map_media_format("audio/mp4"), "mp4");
        assert_eq!(map_media_format("audio/x-wav"), "wav");
        assert_eq!(map_media_format("audio/flac"), "flac");
        assert_eq!(map_media_format("audio/ogg; codecs=opus"), "ogg");
        assert_eq!(map_media_format("audio/webm"), "webm");
        assert_eq!(map_media_format("application/octet-stream"), "webm");
    }

    #[tokio::test]
    async fn completed_job_returns_transcript() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/transcription-jobs"))
            .and(header("authorization", "Bearer tx-key"))
            .and(body_partial_json(json!({
                "language_code": "en-US",
                "media_format": "ogg",
                "media": {"content_base64": "YXVkaW8="}
            })))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/transcription-jobs/scorchbook-\d+-[0-9a-f]{6}$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "COMPLETED",
                "transcript_uri": "/transcripts/1.json"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/transcripts/1.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": {"transcripts": [{"transcript": "Smoky and sweet, eight out of ten."}]}
            })))
            .mount(&server)
            .await;

        let text = transcriber(&server, 3).transcribe(b"audio", "audio/ogg").await.unwrap();
        assert_eq!(text, "Smoky and sweet, eight out of ten.");
    }

    #[tokio::test]
    async fn failed_job_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "FAILED"})))
            .mount(&server)
            .await;

        let err = transcriber(&server, 3).transcribe(b"a", "audio/webm").await.unwrap_err();
        assert_eq!(err.to_string(), "transcription error: Transcribe job failed");
    }

    #[tokio::test]
    async fn completed_without_uri_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "COMPLETED"})))
            .mount(&server)
            .await;

        let err = transcriber(&server, 3).transcribe(b"a", "audio/webm").await.unwrap_err();
        assert!(err.to_string().contains("without transcript URI"));
    }

    #[tokio::test]
    async fn job_times_out_after_max_polls() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "IN_PROGRESS"})))
            .expect(2)
            .mount(&server)
            .await;

        let err = transcriber(&server, 2).transcribe(b"a", "audio/webm").await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
