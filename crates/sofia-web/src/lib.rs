//! Axum HTTP surface for SOFIA: liveness, health and the on-demand weekly run.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use sofia_sync::{Pipeline, PipelineKind, RunError};
use tokio::net::TcpListener;
use tracing::{error, info};

pub const LIVENESS_TEXT: &str = "SOFIA service is running";

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/runall", get(runall_handler))
        .layer(middleware::from_fn(log_traffic))
        .with_state(Arc::new(state))
}

pub async fn serve(listener: TcpListener, state: AppState) -> anyhow::Result<()> {
    info!(addr = %listener.local_addr()?, "SOFIA service listening");
    axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

async fn log_traffic(request: Request, next: Next) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;
    info!(
        target: "sofia::traffic",
        %method,
        path = %path,
        peer = %peer,
        status = response.status().as_u16(),
        "request"
    );
    response
}

async fn index_handler() -> &'static str {
    LIVENESS_TEXT
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    let report = state.pipeline.health().await;
    let status = if report.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report)).into_response()
}

async fn runall_handler(State(state): State<Arc<AppState>>) -> Response {
    info!("manual trigger for weekly pipeline");
    match state.pipeline.try_run(PipelineKind::Weekly).await {
        Ok(summary) => (StatusCode::OK, Json(summary)).into_response(),
        Err(RunError::Busy) => (
            StatusCode::CONFLICT,
            "A pipeline run is already in progress.",
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "manual weekly pipeline failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error executing weekly tasks: {err}"),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use sofia_adapters::{
        AdapterError, CompletionClient, MailTransport, OpportunityHit, OpportunitySource, SearchQuery, SheetSink,
    };
    use sofia_storage::{MemoryBackend, RecordStore, StoreError};
    use tokio::sync::Notify;
    use tower::ServiceExt;

    #[derive(Default)]
    struct Gate {
        entered: Notify,
        release: Notify,
        hold: bool,
    }

    struct StubSource(Arc<Gate>);

    #[async_trait]
    impl OpportunitySource for StubSource {
        async fn search(&self, _query: &SearchQuery) -> Result<Vec<OpportunityHit>, AdapterError> {
            if self.0.hold {
                self.0.entered.notify_one();
                self.0.release.notified().await;
            }
            Ok(Vec::new())
        }

        async fn fetch_description(&self, _url: &str) -> Result<String, AdapterError> {
            Ok(String::new())
        }

        async fn ping(&self) -> Result<(), AdapterError> {
            Ok(())
        }
    }

    struct StubAi;

    #[async_trait]
    impl CompletionClient for StubAi {
        async fn complete(&self, _system: &str, _prompt: &str) -> Result<String, AdapterError> {
            Ok("**One-line Description:** A\n**Summary:** B".into())
        }

        async fn ping(&self) -> Result<(), AdapterError> {
            Ok(())
        }
    }

    struct StubMailer;

    #[async_trait]
    impl MailTransport for StubMailer {
        async fn send_html(&self, _to: &str, _subject: &str, _html: &str) -> Result<(), AdapterError> {
            Ok(())
        }

        async fn ping(&self) -> Result<(), AdapterError> {
            Ok(())
        }
    }

    struct StubSheet;

    #[async_trait]
    impl SheetSink for StubSheet {
        async fn first_row_is_empty(&self) -> Result<bool, AdapterError> {
            Ok(false)
        }

        async fn append_rows(&self, _rows: Vec<Vec<String>>) -> Result<(), AdapterError> {
            Ok(())
        }

        async fn ping(&self) -> Result<(), AdapterError> {
            Ok(())
        }
    }

    fn pipeline(gate: Arc<Gate>) -> Pipeline {
        Pipeline::new(
            Arc::new(RecordStore::new(MemoryBackend::new())),
            Arc::new(StubSource(gate)),
            Arc::new(StubAi),
        )
        .with_mailer(Arc::new(StubMailer), vec!["team@example.com".into()])
    }

    fn get(uri: &str) -> axum::http::Request<Body> {
        axum::http::Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_text(resp: Response) -> String {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn handler_smoke_get_index() {
        let app = app(AppState::new(Arc::new(pipeline(Arc::default()))));
        let resp = app.oneshot(get("/")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_text(resp).await, LIVENESS_TEXT);
    }

    #[tokio::test]
    async fn health_is_ok_when_every_service_answers() {
        let p = pipeline(Arc::default()).with_sheet(Arc::new(StubSheet));
        let resp = app(AppState::new(Arc::new(p))).oneshot(get("/health")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let json: serde_json::Value = serde_json::from_str(&body_text(resp).await).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["services"]["samgov"], true);
        assert_eq!(json["services"]["storage"], true);
    }

    #[tokio::test]
    async fn health_is_unavailable_when_a_service_is_missing() {
        let resp = app(AppState::new(Arc::new(pipeline(Arc::default()))))
            .oneshot(get("/health"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

        let json: serde_json::Value = serde_json::from_str(&body_text(resp).await).unwrap();
        assert_eq!(json["status"], "fail");
        assert_eq!(json["services"]["sheets"], false);
    }

    #[tokio::test]
    async fn runall_returns_the_run_summary() {
        let resp = app(AppState::new(Arc::new(pipeline(Arc::default()))))
            .oneshot(get("/runall"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let json: serde_json::Value = serde_json::from_str(&body_text(resp).await).unwrap();
        assert_eq!(json["kind"], "weekly");
        assert_eq!(json["notify"]["status"], "completed");
        assert_eq!(json["publish"]["status"], "skipped");
    }

    #[tokio::test]
    async fn runall_conflicts_while_a_run_is_in_progress() {
        let gate = Arc::new(Gate {
            hold: true,
            ..Gate::default()
        });
        let app = app(AppState::new(Arc::new(pipeline(gate.clone()))));

        let first = tokio::spawn(app.clone().oneshot(get("/runall")));
        gate.entered.notified().await;

        let second = app.oneshot(get("/runall")).await.unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);

        gate.release.notify_one();
        let first = first.await.unwrap().unwrap();
        assert_eq!(first.status(), StatusCode::OK);
    }

    struct BrokenBackend;

    #[async_trait]
    impl sofia_storage::DocumentBackend for BrokenBackend {
        fn describe(&self) -> String {
            "broken".into()
        }

        async fn load(&self) -> Result<Option<Vec<u8>>, StoreError> {
            Err(StoreError::Blob("unreachable bucket".into()))
        }

        async fn save(&self, _bytes: &[u8]) -> Result<(), StoreError> {
            Err(StoreError::Blob("unreachable bucket".into()))
        }

        async fn ping(&self) -> Result<(), StoreError> {
            Err(StoreError::Blob("unreachable bucket".into()))
        }
    }

    #[tokio::test]
    async fn runall_reports_store_failure_as_server_error() {
        let p = Pipeline::new(
            Arc::new(RecordStore::new(BrokenBackend)),
            Arc::new(StubSource(Arc::default())),
            Arc::new(StubAi),
        );
        let resp = app(AppState::new(Arc::new(p))).oneshot(get("/runall")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body_text(resp).await.contains("store failure"));
    }
}
