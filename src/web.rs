//! Axum-based status and control API

use crate::config::{Config, WebConfig};
use crate::error::EcolitError;
use crate::policy::PolicyKind;
use crate::runtime::RuntimeHandle;
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

#[derive(Clone)]
pub struct AppState {
    pub runtime: RuntimeHandle,
    pub config: Arc<Config>,
}

#[derive(Deserialize)]
pub struct PolicyBody {
    pub policy: String,
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.runtime.latest())
}

async fn get_policy(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.runtime.latest();
    let available: Vec<&str> = PolicyKind::ALL.iter().map(|k| k.as_str()).collect();
    Json(serde_json::json!({
        "active": status.controller.policy,
        "available": available,
    }))
}

async fn set_policy(
    State(state): State<AppState>,
    Json(body): Json<PolicyBody>,
) -> impl IntoResponse {
    let kind = match body.policy.parse::<PolicyKind>() {
        Ok(kind) => kind,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": e.to_string()})),
            );
        }
    };
    match state.runtime.set_policy(kind).await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({"ok": true, "policy": kind.as_str()})),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"error": e.to_string()})),
        ),
    }
}

async fn get_config(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.config.as_ref().clone())
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/status", get(status))
        .route("/api/policy", get(get_policy).post(set_policy))
        .route("/api/config", get(get_config))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Serve until `shutdown` turns true
pub async fn serve(
    web: &WebConfig,
    state: AppState,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let router = build_router(state);
    let logger = crate::logging::get_logger("web");

    let addr = match web.host.parse::<IpAddr>() {
        Ok(ip) => SocketAddr::new(ip, web.port),
        Err(_) => {
            logger.warn(&format!(
                "Invalid host '{}'; falling back to 127.0.0.1",
                web.host
            ));
            ([127, 0, 0, 1], web.port).into()
        }
    };

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| EcolitError::web(format!("Failed to bind {}: {}", addr, e)))?;
    let local_addr = listener.local_addr()?;
    logger.info(&format!(
        "Web server listening at http://{}:{} (API /api)",
        local_addr.ip(),
        local_addr.port()
    ));

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            while shutdown.changed().await.is_ok() {
                if *shutdown.borrow() {
                    break;
                }
            }
        })
        .await?;
    logger.info("Web server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::replay::CsvReplaySource;
    use crate::runtime::{ControlCommand, Runtime};
    use crate::vehicle::SimulatedVehicle;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    fn runtime() -> (Runtime, Arc<Config>) {
        let mut config = Config::default();
        config.ev_charging.enabled = true;
        let source = CsvReplaySource::from_reader(
            "battery_soc,battery_power_w,grid_power_w,solar_power_w\n99,0,0,3000\n".as_bytes(),
            true,
        )
        .unwrap();
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::default());
        let runtime = Runtime::new(
            &config,
            Arc::new(source),
            Arc::new(SimulatedVehicle::new()),
            None,
            clock,
        )
        .unwrap();
        (runtime, Arc::new(config))
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_ok() {
        let (rt, config) = runtime();
        let router = build_router(AppState {
            runtime: rt.handle(),
            config,
        });
        let response = router
            .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn status_reports_controller() {
        let (rt, config) = runtime();
        let router = build_router(AppState {
            runtime: rt.handle(),
            config,
        });
        let response = router
            .oneshot(Request::builder().uri("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["controller"]["policy"], "ECO");
        assert_eq!(json["cycles"], 0);
    }

    #[tokio::test]
    async fn unknown_policy_is_rejected() {
        let (rt, config) = runtime();
        let router = build_router(AppState {
            runtime: rt.handle(),
            config,
        });
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/policy")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"policy":"turbo"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn policy_change_is_forwarded() {
        let (rt, config) = runtime();
        let (commands_tx, mut commands_rx) = mpsc::channel(4);
        let mut handle = rt.handle();
        handle.commands = commands_tx;
        let router = build_router(AppState {
            runtime: handle,
            config,
        });
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/policy")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"policy":"hurry"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            commands_rx.recv().await,
            Some(ControlCommand::SetPolicy(PolicyKind::Hurry))
        );
    }

    #[tokio::test]
    async fn port_in_use_is_a_web_error() {
        let (rt, config) = runtime();
        let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let web = WebConfig {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: taken.local_addr().unwrap().port(),
        };
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let err = serve(&web, AppState { runtime: rt.handle(), config }, shutdown_rx)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EcolitError>(),
            Some(EcolitError::Web { .. })
        ));
    }
}
