use std::net::SocketAddr;

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, FromRequestParts, Path, State};
use axum::http::request::Parts;
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use axum::{async_trait, Json, Router};
use chrono::{DateTime, TimeZone, Utc};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::controllers::paste;
use crate::db::Database;
use crate::html::HtmlError;
use crate::types::api::{CreatePaste, Health};
use crate::App;

/// Plain-text usage notes served at `/`.
const USAGE: &str = include_str!("../../assets/usage.txt");

/// Header carrying a pinned "now" in epoch milliseconds, honoured in test mode only.
pub const TEST_NOW_HEADER: &str = "x-test-now-ms";

pub async fn run(app: App) -> anyhow::Result<()> {
    let addr = SocketAddr::new(app.config.address, app.config.port);
    let database = app.database.clone();
    let router = router(app);

    info!("listening on http://{addr}");
    axum::Server::bind(&addr)
        .serve(router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    database.close().await;
    info!("server stopped");
    Ok(())
}

pub fn router(app: App) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/healthz", get(healthz))
        .route("/api/pastes", post(create_paste))
        .route("/api/pastes/:id", get(fetch_paste))
        .route("/p/:id", get(view_paste))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(app.config.limits.max_content_size))
        .layer(cors_layer(&app.config))
        .layer(TraceLayer::new_for_http())
        .with_state(app)
}

fn cors_layer(config: &Config) -> CorsLayer {
    let origin = match config.cors.frontend_origin.as_deref() {
        Some(origin) => match HeaderValue::from_str(origin) {
            Ok(value) => AllowOrigin::exact(value),
            Err(_) => {
                warn!("ignoring invalid frontend origin '{origin}', allowing any origin");
                AllowOrigin::any()
            }
        },
        None => AllowOrigin::any(),
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
}

/// The instant a request is evaluated at.
pub struct RequestTime(pub DateTime<Utc>);

#[async_trait]
impl FromRequestParts<App> for RequestTime {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, app: &App) -> Result<Self, Self::Rejection> {
        if app.config.test_mode {
            let pinned = parts
                .headers
                .get(TEST_NOW_HEADER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse::<i64>().ok())
                .and_then(|millis| Utc.timestamp_millis_opt(millis).single());
            if let Some(now) = pinned {
                return Ok(RequestTime(now));
            }
        }
        Ok(RequestTime(app.clock.now()))
    }
}

async fn index() -> &'static str {
    USAGE
}

async fn healthz(State(database): State<Database>) -> impl IntoResponse {
    match database.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(Health {
                ok: true,
                error: None,
            }),
        ),
        Err(err) => {
            error!(error = ?err, "health check failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(Health {
                    ok: false,
                    error: Some("database connection failed".to_owned()),
                }),
            )
        }
    }
}

async fn create_paste(
    State(app): State<App>,
    RequestTime(now): RequestTime,
    payload: Result<Json<CreatePaste>, JsonRejection>,
) -> crate::ApiResult<impl IntoResponse> {
    let Json(payload) = payload?;
    let upload = paste::create(&app, payload.into_new_paste()?, now).await?;
    let path = format!("/p/{}", upload.id);

    Ok((StatusCode::CREATED, [(header::LOCATION, path)], Json(upload)))
}

async fn fetch_paste(
    State(app): State<App>,
    RequestTime(now): RequestTime,
    Path(id): Path<String>,
) -> crate::ApiResult<impl IntoResponse> {
    Ok(Json(paste::fetch(&app, &id, now).await?))
}

async fn view_paste(
    State(app): State<App>,
    RequestTime(now): RequestTime,
    Path(id): Path<String>,
) -> Result<Html<String>, HtmlError> {
    paste::render(&app, &id, now)
        .await
        .map(Html)
        .map_err(|error| HtmlError {
            error,
            new_paste_url: app.config.frontend_url().to_owned(),
        })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("failed to listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!("failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
