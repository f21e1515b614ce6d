use axum::{
    Router,
    extract::Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::task;

use crate::core::{
    EnsembleParams, EnsembleSummary, HouseholdConfig, ProjectionRow, RunMode, ShockMethod,
    SimulationContext, run_ensemble, run_projection,
};

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProjectionResponse {
    rows: Vec<ProjectionRow>,
    terminal_net_worth: f64,
    terminal_liquid: f64,
    first_shortfall_year: Option<i32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct EnsembleRequest {
    config: HouseholdConfig,
    runs: u32,
    seed: u64,
    method: ShockMethod,
}

impl Default for EnsembleRequest {
    fn default() -> Self {
        EnsembleRequest {
            config: HouseholdConfig::default(),
            runs: 1_000,
            seed: 42,
            method: ShockMethod::Parametric { volatility: 0.12 },
        }
    }
}

const MAX_ENSEMBLE_RUNS: u32 = 50_000;

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = Router::new()
        .route("/api/projection", post(projection_handler))
        .route("/api/ensemble", post(ensemble_handler))
        .fallback(not_found_handler);

    let listener = TcpListener::bind(addr).await?;
    log::info!("projection API listening on http://{addr}");

    axum::serve(listener, app).await
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

/// Single deterministic projection with full per-year rows.
async fn projection_handler(Json(config): Json<HouseholdConfig>) -> Response {
    if let Err(e) = config.validate() {
        return error_response(StatusCode::UNPROCESSABLE_ENTITY, &e.to_string());
    }

    let joined = task::spawn_blocking(move || {
        let mut ctx = SimulationContext::deterministic();
        run_projection(&config, &mut ctx, RunMode::Detailed)
    })
    .await;

    match joined {
        Ok(output) => json_response(
            StatusCode::OK,
            ProjectionResponse {
                rows: output.rows,
                terminal_net_worth: output.terminal_net_worth,
                terminal_liquid: output.terminal_liquid,
                first_shortfall_year: output.first_shortfall_year,
            },
        ),
        Err(_) => error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "background execution unavailable",
        ),
    }
}

/// Monte Carlo ensemble; the heavy loop runs off the async executor.
async fn ensemble_handler(Json(request): Json<EnsembleRequest>) -> Response {
    if let Err(e) = request.config.validate() {
        return error_response(StatusCode::UNPROCESSABLE_ENTITY, &e.to_string());
    }
    if request.runs == 0 || request.runs > MAX_ENSEMBLE_RUNS {
        return error_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            &format!("runs must be between 1 and {MAX_ENSEMBLE_RUNS}"),
        );
    }

    let joined = task::spawn_blocking(move || {
        let params = EnsembleParams {
            runs: request.runs,
            base_seed: request.seed,
            method: request.method,
        };
        run_ensemble(&request.config, &params)
    })
    .await;

    match joined {
        Ok(summary) => json_response::<EnsembleSummary>(StatusCode::OK, summary),
        Err(_) => error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "background execution unavailable",
        ),
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        "no-store".parse().expect("valid header"),
    );
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}
