use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use axum::{extract::DefaultBodyLimit, routing::post, Router};
use kernel::{ErrorBody, Limits, UploadForm, UPLOAD_ROUTE};
use tokio::net::TcpListener;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{
    classify::ServerErrorsFailureClass, limit::RequestBodyLimitLayer, trace::TraceLayer,
};
use tracing::Span;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub mod archive;
pub mod cleanup;
pub mod config;
pub mod converter;
pub mod domain;
pub mod error;
pub mod file_reply;
mod handlers;
pub mod heif;
pub mod storage;

#[cfg(test)] // <-- not needed in integration tests
extern crate rstest;

use crate::cleanup::Cleaner;
use crate::config::Settings;
use crate::converter::ImageCodec;
use crate::domain::Codec;
use crate::file_reply::FileReply;
use crate::storage::StorageRoots;

#[derive(OpenApi)]
#[openapi(
    paths(handlers::upload_and_convert),
    components(schemas(UploadForm, ErrorBody), responses(FileReply)),
    tags((name = "conversion", description = "Image format conversion"))
)]
struct ApiDoc;

/// Everything a request handler needs, shared by all requests.
#[derive(Clone)]
pub struct AppState {
    pub roots: Arc<StorageRoots>,
    pub limits: Limits,
    pub archive_grace: Duration,
    pub codec: Arc<dyn Codec>,
    pub cleaner: Cleaner,
}

impl AppState {
    #[must_use]
    pub fn new(settings: &Settings) -> Self {
        Self {
            roots: Arc::new(settings.roots()),
            limits: settings.limits,
            archive_grace: settings.archive_grace,
            codec: Arc::new(ImageCodec),
            cleaner: Cleaner::new(),
        }
    }

    #[must_use]
    pub fn with_codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }
}

pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "anytoany=debug,server=debug,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Runs the service until Ctrl+C or SIGTERM.
pub async fn run(settings: Settings) -> io::Result<()> {
    serve(settings, shutdown_signal()).await
}

/// Runs the service until `shutdown` completes, then flushes scheduled cleanups.
pub async fn serve<F>(settings: Settings, shutdown: F) -> io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let state = AppState::new(&settings);
    state.roots.create().await?;

    let listener = TcpListener::bind(settings.socket()).await?;
    tracing::debug!("listening on {}", listener.local_addr()?);

    let app = create_routes(state.clone(), settings.max_request_bytes);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!("flushing {} scheduled cleanups", state.cleaner.pending());
    state.cleaner.drain().await;
    Ok(())
}

pub fn create_routes(state: AppState, max_request_bytes: usize) -> Router {
    Router::new()
        .route(UPLOAD_ROUTE, post(handlers::upload_and_convert))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http().on_failure(
                    |error: ServerErrorsFailureClass, _latency: Duration, _span: &Span| {
                        tracing::error!("Server error: {error}");
                    },
                ))
                .layer(DefaultBodyLimit::disable())
                .layer(RequestBodyLimitLayer::new(max_request_bytes))
                .into_inner(),
        )
        .with_state(state)
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("signal received, starting graceful shutdown");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_documents_the_upload_route() {
        // Act
        let doc = ApiDoc::openapi();

        // Assert
        assert!(doc.paths.paths.contains_key(UPLOAD_ROUTE));
        let components = doc.components.unwrap();
        assert!(components.schemas.contains_key("ErrorBody"));
        assert!(components.responses.contains_key("FileReply"));
    }
}
