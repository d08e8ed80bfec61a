//! Webhook endpoints for GitHub.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use hmac::{Hmac, Mac};
use launchpad_core::pipeline::Trigger;
use launchpad_core::source::PushEvent;
use serde_json::{Value, json};
use sha2::Sha256;
use tracing::{info, warn};

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new().route("/github", post(github_webhook))
}

type WebhookResponse = (StatusCode, Json<Value>);

fn ack(status: &str) -> WebhookResponse {
    (StatusCode::OK, Json(json!({ "status": status })))
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Handle GitHub webhook events.
async fn github_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<WebhookResponse, ApiError> {
    let event_type = header(&headers, "X-GitHub-Event").unwrap_or("unknown");
    let delivery = header(&headers, "X-GitHub-Delivery");

    if let Some(secret) = state.webhook_secret.as_deref() {
        let signature = header(&headers, "X-Hub-Signature-256");
        if !verify_github_signature(secret, &body, signature) {
            warn!(event = %event_type, delivery = ?delivery, "invalid webhook signature");
            return Err(ApiError::Unauthorized("invalid signature".to_string()));
        }
    }

    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid JSON: {}", e)))?;

    info!(event = %event_type, delivery = ?delivery, "received GitHub webhook");

    match event_type {
        "ping" => {
            info!("ping received, webhook is configured");
            Ok(ack("pong"))
        }
        "push" => handle_push(&state, &payload).await,
        other => {
            info!(event = %other, "ignoring event");
            Ok(ack("ignored"))
        }
    }
}

/// Queue a run when a push moves the watched branch of the watched repository.
async fn handle_push(state: &AppState, payload: &Value) -> Result<WebhookResponse, ApiError> {
    let push = PushEvent::from_github_payload(payload)
        .ok_or_else(|| ApiError::BadRequest("malformed push payload".to_string()))?;

    let watched = state.settings.repository.full_name();
    if !push.repository_full_name.eq_ignore_ascii_case(&watched) {
        warn!(repo = %push.repository_full_name, watched = %watched, "push for another repository");
        return Ok(ack("ignored"));
    }
    if !push.targets_branch(&state.settings.branch) {
        info!(git_ref = %push.r#ref, deletion = push.is_deletion(), "push does not move the watched branch");
        return Ok(ack("ignored"));
    }

    info!(
        repo = %push.repository_full_name,
        branch = %state.settings.branch,
        revision = %push.revision,
        pusher = %push.pusher,
        "queueing run"
    );
    state
        .dispatcher
        .submit(Trigger::push(
            &state.settings.branch,
            &push.revision,
            &push.pusher,
        ))
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "status": "queued", "revision": push.revision })),
    ))
}

/// Verify a GitHub `sha256=<hex>` webhook signature.
fn verify_github_signature(secret: &str, body: &[u8], signature: Option<&str>) -> bool {
    let Some(signature) = signature else {
        return false;
    };
    let Some(sig_hex) = signature.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(sig_bytes) = hex::decode(sig_hex) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&sig_bytes).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn test_valid_signature() {
        let body = br#"{"zen":"Keep it simple"}"#;
        let signature = sign("s3cret", body);
        assert!(verify_github_signature("s3cret", body, Some(&signature)));
    }

    #[test]
    fn test_invalid_signatures() {
        let body = br#"{"zen":"Keep it simple"}"#;
        let signature = sign("other", body);
        assert!(!verify_github_signature("s3cret", body, Some(&signature)));
        assert!(!verify_github_signature("s3cret", body, None));
        assert!(!verify_github_signature("s3cret", body, Some("sha1=abcd")));
        assert!(!verify_github_signature("s3cret", body, Some("sha256=zz")));
    }
}
