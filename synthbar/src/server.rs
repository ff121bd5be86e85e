use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, post};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use synthbar_core::prelude::Portfolio;

use crate::control::ControlService;

pub fn router(control: Arc<ControlService>) -> Router {
    Router::new()
        .route("/api/portfolios", post(submit_portfolio))
        .route("/api/portfolios/{id}", delete(stop_portfolio))
        .with_state(control)
}

pub async fn serve(addr: &str, control: Arc<ControlService>, shutdown: CancellationToken) -> Result<()> {
    // Accept the bare ":8080" form as binding every interface.
    let addr = if addr.starts_with(':') {
        format!("0.0.0.0{addr}")
    } else {
        addr.to_string()
    };

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind control server on {addr}"))?;
    info!(%addr, "starting control server");

    axum::serve(listener, router(control))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .context("control server failed")
}

async fn submit_portfolio(
    State(control): State<Arc<ControlService>>,
    Json(portfolio): Json<Portfolio>,
) -> StatusCode {
    match control.submit_portfolio(portfolio).await {
        Ok(()) => StatusCode::OK,
        Err(err) if err.is_conflict() => {
            error!(%err, "failed to submit portfolio");
            StatusCode::CONFLICT
        }
        Err(err) => {
            error!(%err, "failed to submit portfolio");
            StatusCode::BAD_REQUEST
        }
    }
}

async fn stop_portfolio(State(control): State<Arc<ControlService>>, Path(id): Path<String>) -> StatusCode {
    match control.stop_portfolio(&id).await {
        Ok(()) => StatusCode::OK,
        Err(err) => {
            error!(%err, id, "failed to stop portfolio");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use synthbar_core::prelude::{Bus, MemoryBus};
    use tower::ServiceExt;

    fn app() -> Router {
        let bus: Arc<dyn Bus> = Arc::new(MemoryBus::new(64));
        let control = Arc::new(ControlService::new(bus, CancellationToken::new()));
        router(control)
    }

    fn submit(body: &str) -> Request<Body> {
        Request::post("/api/portfolios")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    const RATIO: &str =
        r#"{"id":"p1","symbols":["btcusdt","ethusdt"],"formula":"ethusdt/btcusdt","timeframe":"1m"}"#;

    #[test_log::test(tokio::test)]
    async fn submit_then_duplicate_then_stop() {
        let app = app();

        let response = app.clone().oneshot(submit(RATIO)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.clone().oneshot(submit(RATIO)).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let request = Request::delete("/api/portfolios/p1").body(Body::empty()).unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // Idempotent: stopping an unknown id still succeeds.
        let request = Request::delete("/api/portfolios/p1").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test_log::test(tokio::test)]
    async fn malformed_formula_is_a_bad_request() {
        let app = app();
        let body = r#"{"id":"p2","symbols":["btcusdt","ethusdt"],"formula":"a +","timeframe":"1m"}"#;

        let response = app.oneshot(submit(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
