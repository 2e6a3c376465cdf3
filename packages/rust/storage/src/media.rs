//! Filesystem media store for uploaded photos and voice notes.
//!
//! Objects are addressed by slash-separated keys (`images/{id}-{millis}.png`).
//! Each object's content type is kept in a `.content-type` sidecar file.

use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use regex::Regex;
use scorchbook_shared::{Result, ScorchbookError};

const SIDECAR_SUFFIX: &str = ".content-type";

/// Decoded upload body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaPayload {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// An object read back from the store.
#[derive(Debug, Clone)]
pub struct StoredMedia {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

impl StoredMedia {
    /// Standard base64 encoding of the object body.
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.bytes)
    }
}

/// Local directory acting as the media bucket.
#[derive(Debug, Clone)]
pub struct MediaStore {
    root: PathBuf,
    public_base_url: Option<String>,
}

impl MediaStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: Option<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.filter(|u| !u.trim().is_empty()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write an object and return its public URL.
    pub async fn upload(&self, key: &str, payload: &MediaPayload) -> Result<String> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ScorchbookError::io(parent, e))?;
        }
        tokio::fs::write(&path, &payload.bytes)
            .await
            .map_err(|e| ScorchbookError::io(&path, e))?;

        let sidecar = sidecar_path(&path);
        tokio::fs::write(&sidecar, payload.content_type.as_bytes())
            .await
            .map_err(|e| ScorchbookError::io(&sidecar, e))?;

        tracing::info!(
            key,
            content_type = %payload.content_type,
            bytes = payload.bytes.len(),
            "media.uploaded"
        );
        Ok(self.public_url(key))
    }

    /// Read an object and its stored content type.
    pub async fn download(&self, key: &str) -> Result<StoredMedia> {
        let path = self.object_path(key)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ScorchbookError::NotFound("Media object not found".into()));
            }
            Err(e) => return Err(ScorchbookError::io(&path, e)),
        };
        let content_type = tokio::fs::read_to_string(sidecar_path(&path))
            .await
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        Ok(StoredMedia {
            bytes,
            content_type,
        })
    }

    /// Remove an object; missing objects are not an error.
    pub async fn delete(&self, key: &str) -> Result<()> {
        let path = self.object_path(key)?;
        for target in [sidecar_path(&path), path] {
            match tokio::fs::remove_file(&target).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(ScorchbookError::io(&target, e)),
            }
        }
        Ok(())
    }

    /// URL clients use to fetch `key`: under the public base URL when one is
    /// configured, `media://{key}` otherwise.
    pub fn public_url(&self, key: &str) -> String {
        match &self.public_base_url {
            Some(base) => format!("{}/{key}", base.trim_end_matches('/')),
            None => format!("media://{key}"),
        }
    }

    /// Resolve a key to a path under the root, rejecting traversal.
    fn object_path(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && !key.ends_with(SIDECAR_SUFFIX)
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(ScorchbookError::validation(format!("invalid media key: {key}")));
        }
        Ok(self.root.join(relative))
    }
}

fn sidecar_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(SIDECAR_SUFFIX);
    PathBuf::from(name)
}

// ---------------------------------------------------------------------------
// Payload helpers
// ---------------------------------------------------------------------------

const LENIENT: GeneralPurposeConfig =
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent);
const STANDARD_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, LENIENT);
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, LENIENT);

/// Decode an upload field that is either a `data:{mime};base64,{data}` URL
/// or bare base64. Content type comes from the data URL, then the fallback,
/// then `application/octet-stream`, with any `;` parameters removed.
pub fn parse_base64_data(
    data: Option<&str>,
    fallback_mime_type: Option<&str>,
) -> Result<Option<MediaPayload>> {
    static DATA_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?s)^data:(.+);base64,(.+)$").expect("valid regex")
    });

    let Some(data) = data.filter(|d| !d.is_empty()) else {
        return Ok(None);
    };

    let (mime, encoded) = match DATA_URL_RE.captures(data) {
        Some(caps) => (
            caps.get(1).map(|m| m.as_str()),
            caps.get(2).map_or(data, |m| m.as_str()),
        ),
        None => (None, data),
    };

    let content_type = mime
        .or(fallback_mime_type)
        .and_then(normalize_mime_type)
        .unwrap_or_else(|| "application/octet-stream".to_string());

    let compact: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let bytes = STANDARD_LENIENT
        .decode(&compact)
        .or_else(|_| URL_SAFE_LENIENT.decode(&compact))
        .map_err(|e| ScorchbookError::validation(format!("invalid base64 media payload: {e}")))?;

    Ok(Some(MediaPayload {
        bytes,
        content_type,
    }))
}

/// Drop MIME parameters (`audio/webm;codecs=opus` → `audio/webm`).
/// Blank input yields `None`.
pub fn normalize_mime_type(value: &str) -> Option<String> {
    let base = value.split(';').next().unwrap_or_default().trim();
    (!base.is_empty()).then(|| base.to_string())
}

/// File extension for an object key: the MIME subtype, or `default`.
pub fn media_extension(content_type: &str, default: &str) -> String {
    content_type
        .split_once('/')
        .map(|(_, sub)| sub.trim())
        .filter(|sub| !sub.is_empty())
        .unwrap_or(default)
        .to_string()
}

/// Guess a content type from a key's extension.
pub fn infer_mime_type_from_key(key: &str) -> Option<&'static str> {
    let (_, ext) = key.rsplit_once('.')?;
    let mime = match ext.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "mp3" | "mpeg" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "webm" => "audio/webm",
        "m4a" | "mp4" => "audio/mp4",
        "flac" => "audio/flac",
        _ => return None,
    };
    Some(mime)
}
