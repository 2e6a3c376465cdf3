//! `/tastings` handlers.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use scorchbook_core::{ProcessJob, update_record_status};
use scorchbook_shared::{
    CreateTastingInput, ListFilters, ProcessingStatus, Result, ScorchbookError, TastingId,
    TastingRecord, UserContext, sanitize_optional, validate_create_tasting,
};
use scorchbook_storage::{
    MediaPayload, infer_mime_type_from_key, media_extension, normalize_mime_type,
    parse_base64_data,
};
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::AppState;
use crate::auth::verify_auth;
use crate::http::{ApiResult, json_response};

pub(crate) fn authorization(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok())
}

async fn caller(state: &AppState, headers: &HeaderMap) -> Result<UserContext> {
    verify_auth(state.auth.as_ref(), authorization(headers)).await
}

// ---------------------------------------------------------------------------
// GET /tastings
// ---------------------------------------------------------------------------

pub async fn list_tastings(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Response> {
    let filters = filters_from_query(&params);
    let tastings = state.storage.list_tastings(&filters).await?;
    Ok(json_response(StatusCode::OK, json!({ "data": tastings })))
}

/// Blank parameters are ignored; numbers that do not parse are dropped.
fn filters_from_query(params: &HashMap<String, String>) -> ListFilters {
    let text = |key: &str| params.get(key).filter(|v| !v.is_empty()).cloned();
    let number = |key: &str| {
        params
            .get(key)
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|n| n.is_finite())
    };
    ListFilters {
        name: text("name"),
        style: text("style"),
        min_score: number("minScore"),
        max_score: number("maxScore"),
        min_heat: number("minHeat"),
        max_heat: number("maxHeat"),
        date: text("date"),
    }
}

// ---------------------------------------------------------------------------
// POST /tastings
// ---------------------------------------------------------------------------

#[instrument(skip_all)]
pub async fn create_tasting(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let user = caller(&state, &headers).await?;
    let input = validate_create_tasting(parse_create_body(&body)?)?;
    let mut record = build_record(&input, Utc::now(), &user.sub);

    let image = parse_base64_data(input.image_base64.as_deref(), input.image_mime_type.as_deref())?;
    let back_image = parse_base64_data(
        input.back_image_base64.as_deref(),
        input.back_image_mime_type.as_deref(),
    )?;
    let voice = parse_base64_data(input.voice_base64.as_deref(), input.voice_mime_type.as_deref())?;

    let mut job = ProcessJob {
        record_id: record.id,
        image_mime_type: agent_mime_type(image.as_ref(), input.image_mime_type.as_deref()),
        back_image_mime_type: agent_mime_type(back_image.as_ref(), input.back_image_mime_type.as_deref()),
        voice_mime_type: agent_mime_type(voice.as_ref(), input.voice_mime_type.as_deref()),
        ..ProcessJob::default()
    };

    if let Some(payload) = &image {
        let key = media_key("images", &record.id, "", payload, "jpg");
        record.image_url = Some(state.media.upload(&key, payload).await?);
        record.image_key = Some(key);
    }
    if let Some(payload) = &back_image {
        let key = media_key("images", &record.id, "-back", payload, "jpg");
        record.back_image_url = Some(state.media.upload(&key, payload).await?);
        record.back_image_key = Some(key);
    }
    if let Some(payload) = &voice {
        let key = media_key("voice", &record.id, "", payload, "webm");
        let voice_url = state.media.upload(&key, payload).await?;
        info!(%voice_url, "voice.uploaded");
        record.voice_key = Some(key);
    }

    job.image_key = record.image_key.clone();
    job.back_image_key = record.back_image_key.clone();
    job.voice_key = record.voice_key.clone();

    state.storage.create_tasting(&record).await?;
    info!(record_id = %record.id, "tasting.created");
    enqueue_or_mark_failed(&state, &mut record, job).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

fn parse_create_body(body: &[u8]) -> Result<CreateTastingInput> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(ScorchbookError::validation("Missing body"));
    }
    serde_json::from_slice(body).map_err(|e| {
        if e.is_data() {
            ScorchbookError::validation(format!("Invalid request body: {e}"))
        } else {
            ScorchbookError::validation("Invalid JSON body")
        }
    })
}

/// A pending record owned by `created_by`, with user text stripped of HTML.
fn build_record(input: &CreateTastingInput, now: DateTime<Utc>, created_by: &str) -> TastingRecord {
    let mut record = TastingRecord::pending(TastingId::new(), now);
    record.name = sanitize_optional(input.name.as_deref());
    record.maker = sanitize_optional(input.maker.as_deref());
    record.style = sanitize_optional(input.style.as_deref());
    if let Some(date) = input.date.as_deref().filter(|d| !d.is_empty()) {
        record.date = date.to_string();
    }
    record.score = input.score;
    record.heat_user = input.heat_user;
    record.heat_vendor = input.heat_vendor;
    record.tasting_notes_user = sanitize_optional(input.tasting_notes_user.as_deref());
    record.tasting_notes_vendor = sanitize_optional(input.tasting_notes_vendor.as_deref());
    record.product_url = sanitize_optional(input.product_url.as_deref());
    record.created_by = Some(created_by.to_string());
    record
}

fn agent_mime_type(payload: Option<&MediaPayload>, declared: Option<&str>) -> Option<String> {
    payload
        .map(|p| p.content_type.as_str())
        .or(declared)
        .and_then(normalize_mime_type)
}

fn media_key(prefix: &str, id: &TastingId, suffix: &str, payload: &MediaPayload, default_ext: &str) -> String {
    format!(
        "{prefix}/{id}{suffix}-{}.{}",
        Utc::now().timestamp_millis(),
        media_extension(&payload.content_type, default_ext)
    )
}

/// Queue processing; if the queue refuses, the record is marked `error`
/// and the request still succeeds.
async fn enqueue_or_mark_failed(state: &AppState, record: &mut TastingRecord, job: ProcessJob) -> Result<()> {
    if let Err(e) = state.queue.enqueue(job) {
        let message = e.to_string();
        update_record_status(&state.storage, record, ProcessingStatus::Error, Some(&message)).await?;
        warn!(record_id = %record.id, error = %message, "agent.process.invoke.failed");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// DELETE /tastings/{id} and POST /tastings/{id}/rerun
// ---------------------------------------------------------------------------

/// Load a record the caller may modify.
async fn owned_record(state: &AppState, id: &str, user: &UserContext) -> Result<TastingRecord> {
    let not_found = || ScorchbookError::NotFound("Tasting not found".into());
    let id: TastingId = id.parse().map_err(|_| not_found())?;
    let record = state.storage.get_tasting(&id).await?.ok_or_else(not_found)?;
    if record.created_by.as_deref().is_some_and(|owner| owner != user.sub) {
        return Err(ScorchbookError::Forbidden("Forbidden".into()));
    }
    Ok(record)
}

#[instrument(skip_all)]
pub async fn delete_tasting(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let user = caller(&state, &headers).await?;
    let record = owned_record(&state, &id, &user).await?;
    state.storage.delete_tasting(&record.id).await?;
    info!(record_id = %record.id, "tasting.deleted");

    // media cleanup is best effort; the record is already gone
    for key in [&record.image_key, &record.back_image_key, &record.voice_key]
        .into_iter()
        .flatten()
    {
        if let Err(e) = state.media.delete(key).await {
            warn!(record_id = %record.id, %key, error = %e, "tasting.media.delete.failed");
        }
    }
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[instrument(skip_all)]
pub async fn rerun_tasting(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let user = caller(&state, &headers).await?;
    let mut record = owned_record(&state, &id, &user).await?;
    if !record.has_media() {
        return Err(ScorchbookError::validation("No media available to process").into());
    }

    update_record_status(&state.storage, &mut record, ProcessingStatus::Pending, None).await?;

    let mime_of = |key: &Option<String>| {
        key.as_deref()
            .and_then(infer_mime_type_from_key)
            .map(str::to_string)
    };
    let job = ProcessJob {
        record_id: record.id,
        image_key: record.image_key.clone(),
        image_mime_type: mime_of(&record.image_key),
        back_image_key: record.back_image_key.clone(),
        back_image_mime_type: mime_of(&record.back_image_key),
        voice_key: record.voice_key.clone(),
        voice_mime_type: mime_of(&record.voice_key),
        force_voice: true,
    };
    enqueue_or_mark_failed(&state, &mut record, job).await?;
    info!(record_id = %record.id, "tasting.rerun");
    Ok(StatusCode::NO_CONTENT.into_response())
}
