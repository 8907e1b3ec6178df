use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Router,
};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;

use fis_core::types::Partner;
use fis_storage::Database;

use crate::dispatcher::OutboxDispatcher;
use crate::feed::FlightFeed;
use crate::operations::FlightOperations;
use crate::{catalog, flights, telemetry};

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    storage: Database,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
    operations: FlightOperations,
    dispatcher: OutboxDispatcher,
    feed: FlightFeed,
}

impl AppState {
    /// `partners` lists the partners with a configured updater; only those
    /// receive outbox rows.
    pub fn new(
        metrics: PrometheusHandle,
        storage: Database,
        partners: Vec<Partner>,
        dispatcher: OutboxDispatcher,
        feed: FlightFeed,
        clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
    ) -> Self {
        let operations = FlightOperations::new(
            storage.clone(),
            partners,
            dispatcher.clone(),
            feed.clone(),
            clock.clone(),
        );
        Self {
            metrics,
            storage,
            clock,
            operations,
            dispatcher,
            feed,
        }
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn storage(&self) -> &Database {
        &self.storage
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub fn operations(&self) -> &FlightOperations {
        &self.operations
    }

    pub fn dispatcher(&self) -> &OutboxDispatcher {
        &self.dispatcher
    }

    pub fn feed(&self) -> &FlightFeed {
        &self.feed
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route(
            "/airlines",
            get(catalog::list_airlines).post(catalog::create_airline),
        )
        .route(
            "/airlines/:id",
            get(catalog::get_airline)
                .put(catalog::update_airline)
                .delete(catalog::delete_airline),
        )
        .route(
            "/airports",
            get(catalog::list_airports).post(catalog::create_airport),
        )
        .route(
            "/airports/:id",
            get(catalog::get_airport)
                .put(catalog::update_airport)
                .delete(catalog::delete_airport),
        )
        .route(
            "/airports/:id/terminals",
            get(catalog::list_terminals).post(catalog::create_terminal),
        )
        .route(
            "/terminals/:id",
            get(catalog::get_terminal)
                .put(catalog::update_terminal)
                .delete(catalog::delete_terminal),
        )
        .route(
            "/terminals/:id/gates",
            get(catalog::list_gates).post(catalog::create_gate),
        )
        .route(
            "/terminals/:id/baggage-claims",
            get(catalog::list_baggage_claims).post(catalog::create_baggage_claim),
        )
        .route(
            "/gates/:id",
            get(catalog::get_gate)
                .put(catalog::update_gate)
                .delete(catalog::delete_gate),
        )
        .route(
            "/baggage-claims/:id",
            get(catalog::get_baggage_claim)
                .put(catalog::update_baggage_claim)
                .delete(catalog::delete_baggage_claim),
        )
        .route(
            "/statuses",
            get(catalog::list_statuses).post(catalog::create_status),
        )
        .route(
            "/statuses/:code",
            get(catalog::get_status)
                .put(catalog::update_status)
                .delete(catalog::delete_status),
        )
        .route(
            "/flights",
            get(flights::list_flights).post(flights::create_flight),
        )
        .route("/flights/feed", get(flights::live_feed))
        .route(
            "/flights/:id",
            get(flights::get_flight)
                .put(flights::update_flight)
                .delete(flights::delete_flight),
        )
        .route("/flights/:id/status", put(flights::set_status))
        .route("/flights/:id/gate", put(flights::set_gate))
        .route("/flights/:id/baggage-claim", put(flights::set_baggage_claim))
        .route("/flights/:id/times", put(flights::set_times))
        .route("/flights/:id/events", get(flights::list_events))
        .route("/flights/:id/notifications", get(flights::list_notifications))
        .route(
            "/notifications/:id/retry",
            post(flights::retry_notification),
        )
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn metrics(State(state): State<AppState>) -> Response {
    let body = telemetry::render_metrics(state.metrics());
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        Body::from(body),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, http::Request};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;
    use crate::testing::{read_json, setup_context};

    #[tokio::test]
    async fn healthz_returns_ok() {
        let ctx = setup_context(Vec::new()).await;

        let response = ctx
            .router()
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_exports_build_info() {
        let ctx = setup_context(Vec::new()).await;

        let response = ctx
            .router()
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::OK);
        let collected = response
            .into_body()
            .collect()
            .await
            .expect("body should read");
        let body = String::from_utf8(collected.to_bytes().to_vec()).expect("utf-8");
        assert!(body.contains("app_build_info"));
        assert!(body.contains("app_uptime_seconds"));
    }

    #[tokio::test]
    async fn board_lists_enriched_flights() {
        let ctx = setup_context(Vec::new()).await;

        let response = ctx
            .router()
            .oneshot(
                Request::builder()
                    .uri("/flights")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::OK);
        let board = read_json(response).await;
        assert_eq!(board[0]["designator"], "BA117");
        assert_eq!(board[0]["origin_iata"], "LHR");
        assert_eq!(board[0]["status_description"], "Scheduled");
    }

    #[tokio::test]
    async fn unknown_flight_is_problem_json() {
        let ctx = setup_context(Vec::new()).await;

        let response = ctx
            .router()
            .oneshot(
                Request::builder()
                    .uri("/flights/4242")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/problem+json"
        );
    }
}
