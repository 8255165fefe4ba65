//! Document upload ingress.
//!
//! Stages the file on local disk, enqueues a job pointing at the staged path,
//! and replies immediately. Results arrive later over the client's relay
//! connection.

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::Multipart,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{info, warn};

use docrelay_core::{ClientId, JobId};
use docrelay_relay::JobDescriptor;

use crate::app::errors::json_error;
use crate::app::services::AppServices;

pub async fn upload(
    Extension(services): Extension<Arc<AppServices>>,
    mut multipart: Multipart,
) -> Response {
    let mut client_id: Option<String> = None;
    let mut job_id: Option<String> = None;
    let mut job_type: Option<String> = None;
    let mut file: Option<(String, axum::body::Bytes)> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                return json_error(StatusCode::BAD_REQUEST, "malformed_multipart", e.to_string());
            }
        };
        let name = field.name().map(ToString::to_string);
        match name.as_deref() {
            Some("client_id") => match field.text().await {
                Ok(text) => client_id = Some(text),
                Err(e) => {
                    return json_error(StatusCode::BAD_REQUEST, "malformed_multipart", e.to_string());
                }
            },
            Some("job_id") => match field.text().await {
                Ok(text) => job_id = Some(text),
                Err(e) => {
                    return json_error(StatusCode::BAD_REQUEST, "malformed_multipart", e.to_string());
                }
            },
            Some("job_type") => match field.text().await {
                Ok(text) => job_type = Some(text),
                Err(e) => {
                    return json_error(StatusCode::BAD_REQUEST, "malformed_multipart", e.to_string());
                }
            },
            Some("file") => {
                let file_name = field
                    .file_name()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "upload.bin".to_string());
                match field.bytes().await {
                    Ok(bytes) => file = Some((file_name, bytes)),
                    Err(e) => {
                        return json_error(
                            StatusCode::BAD_REQUEST,
                            "malformed_multipart",
                            e.to_string(),
                        );
                    }
                }
            }
            _ => {}
        }
    }

    let Some(client_id) = client_id else {
        return json_error(StatusCode::BAD_REQUEST, "missing_field", "client_id is required");
    };
    let Some((file_name, bytes)) = file else {
        return json_error(StatusCode::BAD_REQUEST, "missing_field", "file is required");
    };

    let client = match ClientId::new(client_id) {
        Ok(client) => client,
        Err(e) => return json_error(StatusCode::BAD_REQUEST, "invalid_client_id", e.to_string()),
    };
    let job_id = match job_id {
        Some(raw) => match JobId::new(raw) {
            Ok(job_id) => job_id,
            Err(e) => return json_error(StatusCode::BAD_REQUEST, "invalid_job_id", e.to_string()),
        },
        None => JobId::generate(),
    };
    let job_type = job_type.unwrap_or_else(|| services.relay_config.default_job_type.clone());

    // Prefix with a fresh id so repeated uploads of one filename never
    // clobber each other.
    let staged_name = format!("{}_{}", uuid::Uuid::now_v7(), file_name);
    let staged_path = services.upload_dir.join(&staged_name);
    if let Err(e) = tokio::fs::create_dir_all(&services.upload_dir).await {
        warn!(error = %e, "failed to create upload directory");
        return json_error(StatusCode::INTERNAL_SERVER_ERROR, "staging_failed", e.to_string());
    }
    if let Err(e) = tokio::fs::write(&staged_path, &bytes).await {
        warn!(error = %e, "failed to stage upload");
        return json_error(StatusCode::INTERNAL_SERVER_ERROR, "staging_failed", e.to_string());
    }

    let descriptor = JobDescriptor::new(
        job_id.clone(),
        &client,
        job_type,
        json!({
            "file_path": staged_path.to_string_lossy(),
            "original_filename": file_name,
        }),
    );

    info!(client = %client, job_id = %job_id, file = %staged_name, "upload staged");

    // Enqueue off the request path; a queue outage surfaces on the relay
    // connection, not as an upload failure.
    let dispatcher = services.dispatcher.clone();
    {
        let job_id = job_id.clone();
        tokio::spawn(async move {
            if let Err(e) = dispatcher.submit(descriptor).await {
                warn!(job_id = %job_id, error = %e, "upload dispatch failed");
            }
        });
    }

    (
        StatusCode::OK,
        Json(json!({
            "job_id": job_id,
            "status": "submitted",
            "file": staged_name,
        })),
    )
        .into_response()
}
