//! `POST /webhook/{kind}`: authenticate, acknowledge, schedule.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use bytes::Bytes;

use super::{ApiError, HttpState};
use crate::config::CollectionKind;
use crate::error::SyncError;
use crate::mac::{self, LEGACY_MAC_HEADER, MAC_HEADER};

pub async fn handler(
    State(state): State<HttpState>,
    Path(kind): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let collection: CollectionKind = kind.parse()?;
    let config = state.collections.get(&collection).ok_or_else(|| {
        SyncError::validation(format!("webhook type '{collection}' is not configured"))
    })?;

    let tag = headers
        .get(MAC_HEADER)
        .or_else(|| headers.get(LEGACY_MAC_HEADER))
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !mac::verify(&body, tag, &config.secret) {
        tracing::warn!(collection = %collection, "rejected webhook with bad content MAC");
        return Err(SyncError::Authentication(collection).into());
    }

    let handle = state.scheduler.enqueue(collection, body);
    tracing::info!(collection = %collection, task_id = handle.id(), "webhook accepted");
    Ok(Json(serde_json::json!({
        "message": format!("{collection} sync scheduled"),
    })))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::clock::SystemClock;
    use crate::config::{CollectionConfig, SchedulerConfig};
    use crate::http::router;
    use crate::mac::MacSecret;
    use crate::reconcile::Reconciler;
    use crate::retry::RetryPolicy;
    use crate::scheduler::TaskScheduler;
    use crate::stores::memory::{MemLedgerStore, MemTableStore};

    fn secret() -> MacSecret {
        MacSecret::new(b"agenda-secret".to_vec())
    }

    fn app() -> (axum::Router, TaskScheduler) {
        let reconciler = Reconciler::new(
            Arc::new(MemTableStore::new()),
            Arc::new(MemLedgerStore::new()),
            Arc::new(SystemClock),
        );
        let mut collections = BTreeMap::new();
        collections.insert(
            CollectionKind::Agenda,
            CollectionConfig::new(CollectionKind::Agenda, secret()),
        );
        let scheduler = TaskScheduler::new(
            reconciler,
            &SchedulerConfig::default(),
            RetryPolicy::default(),
            &collections,
        );
        let state = HttpState::new(scheduler.clone(), collections);
        (router(state), scheduler)
    }

    fn post(path: &str, header: Option<(&str, String)>, body: &'static str) -> Request<Body> {
        let mut builder = Request::builder().method("POST").uri(path);
        if let Some((name, value)) = header {
            builder = builder.header(name, value);
        }
        builder.body(Body::from(body)).expect("request")
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        serde_json::from_slice(&bytes).expect("json")
    }

    #[tokio::test]
    async fn unknown_type_is_bad_request() {
        let (app, scheduler) = app();
        let response = app
            .oneshot(post("/webhook/tickets", None, "{}"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(json_body(response).await["error"].is_string());
        assert_eq!(scheduler.in_flight(), 0);
    }

    #[tokio::test]
    async fn unconfigured_type_is_bad_request() {
        let (app, _) = app();
        let tag = mac::sign(b"{}", &secret());
        let response = app
            .oneshot(post("/webhook/alerts", Some((MAC_HEADER, tag)), "{}"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn bad_or_missing_mac_is_forbidden() {
        let (app, scheduler) = app();
        let wrong = mac::sign(b"{}", &MacSecret::new(b"other".to_vec()));
        let response = app
            .clone()
            .oneshot(post("/webhook/agenda", Some((MAC_HEADER, wrong)), "{}"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(json_body(response).await["error"].is_string());

        let response = app
            .oneshot(post("/webhook/agenda", None, "{}"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(scheduler.in_flight(), 0);
    }

    #[tokio::test]
    async fn valid_mac_is_accepted_and_scheduled() {
        let (app, scheduler) = app();
        let body = r#"{"base":{"id":"app"}}"#;
        let tag = mac::sign(body.as_bytes(), &secret());
        let response = app
            .oneshot(post("/webhook/agenda", Some((MAC_HEADER, tag)), body))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert!(json_body(response).await["message"].is_string());
        assert_eq!(scheduler.in_flight(), 1);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn legacy_header_name_is_accepted() {
        let (app, scheduler) = app();
        let tag = mac::sign(b"{}", &secret());
        let response = app
            .oneshot(post("/webhook/agenda", Some(("X-Airtable-Content-MAC", tag)), "{}"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn health_reports_in_flight_tasks() {
        let (app, _) = app();
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["ok"], true);
        assert_eq!(body["in_flight"], 0);
    }
}
