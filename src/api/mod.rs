use std::net::SocketAddr;
use std::path::PathBuf;

use axum::{
    Router,
    extract::Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use clap::{Parser, Subcommand};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::net::TcpListener;

use crate::core::{
    MonteCarloConfig, MonteCarloResult, Scenario, ScenarioError, SimulationYear,
    run_monte_carlo,
};

const DEFAULT_YEARS: u32 = 60;
const MAX_YEARS: u32 = 120;
const MAX_SIMULATIONS: u32 = 20_000;

#[derive(Parser, Debug)]
#[command(
    name = "fireplan",
    about = "Year-by-year household finance projection (taxes, withdrawals, guardrails, Social Security)"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the JSON API.
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
    /// Project a scenario file deterministically.
    Simulate {
        #[arg(long)]
        scenario: PathBuf,
        #[arg(long, default_value_t = DEFAULT_YEARS)]
        years: u32,
        #[arg(long)]
        pretty: bool,
    },
    /// Run seeded simulations with random annual returns.
    MonteCarlo {
        #[arg(long)]
        scenario: PathBuf,
        #[arg(long, default_value_t = DEFAULT_YEARS)]
        years: u32,
        #[arg(long, default_value_t = 500)]
        simulations: u32,
        #[arg(long, default_value_t = 42)]
        seed: u64,
        #[arg(long, default_value_t = 15.0, help = "Annual return standard deviation, percent")]
        volatility: f64,
        #[arg(long)]
        pretty: bool,
    },
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Scenario(#[from] ScenarioError),
    #[error("{0}")]
    Request(String),
    #[error("Server error: {0}")]
    Server(#[from] std::io::Error),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SimulateRequest {
    scenario: Value,
    years: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct MonteCarloRequest {
    scenario: Value,
    config: MonteCarloConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimulateResponse {
    years_simulated: usize,
    final_net_worth: f64,
    solvent: bool,
    years: Vec<SimulationYear>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn checked_years(years: u32) -> Result<u32, String> {
    if years == 0 || years > MAX_YEARS {
        return Err(format!("years must be between 1 and {MAX_YEARS} (got {years})"));
    }
    Ok(years)
}

fn build_simulate_response(scenario: &Scenario, years: u32) -> Result<SimulateResponse, String> {
    let years = checked_years(years)?;
    scenario.validate().map_err(|e| e.to_string())?;

    let history = scenario.project(years);
    let last = history.last();
    Ok(SimulateResponse {
        years_simulated: history.len().saturating_sub(1),
        final_net_worth: last.map(|y| y.net_worth).unwrap_or(0.0),
        solvent: last.is_none_or(SimulationYear::is_solvent),
        years: history,
    })
}

fn build_monte_carlo_response(
    scenario: &Scenario,
    config: &MonteCarloConfig,
) -> Result<MonteCarloResult, String> {
    checked_years(config.years)?;
    if config.simulations > MAX_SIMULATIONS {
        return Err(format!(
            "simulations must be at most {MAX_SIMULATIONS} (got {})",
            config.simulations
        ));
    }
    if !config.volatility.is_finite() || config.volatility < 0.0 {
        return Err(format!(
            "volatility must be finite and >= 0 (got {})",
            config.volatility
        ));
    }
    scenario.validate().map_err(|e| e.to_string())?;

    run_monte_carlo(
        &scenario.accounts,
        &scenario.incomes,
        &scenario.expenses,
        &scenario.env(&scenario.tax_schedule),
        config,
    )
    .map_err(|e| e.to_string())
}

fn render<T: Serialize>(body: &T, pretty: bool) -> Result<String, CommandError> {
    let text = if pretty {
        serde_json::to_string_pretty(body).map_err(ScenarioError::from)?
    } else {
        serde_json::to_string(body).map_err(ScenarioError::from)?
    };
    Ok(text)
}

pub async fn run_cli(cli: Cli) -> Result<(), CommandError> {
    match cli.command {
        Command::Serve { port } => run_http_server(port).await?,
        Command::Simulate {
            scenario,
            years,
            pretty,
        } => {
            let scenario = Scenario::load(&scenario)?;
            let response =
                build_simulate_response(&scenario, years).map_err(CommandError::Request)?;
            println!("{}", render(&response, pretty)?);
        }
        Command::MonteCarlo {
            scenario,
            years,
            simulations,
            seed,
            volatility,
            pretty,
        } => {
            let scenario = Scenario::load(&scenario)?;
            let config = MonteCarloConfig {
                simulations,
                seed,
                years,
                volatility,
            };
            let result =
                build_monte_carlo_response(&scenario, &config).map_err(CommandError::Request)?;
            println!("{}", render(&result, pretty)?);
        }
    }
    Ok(())
}

fn router() -> Router {
    Router::new()
        .route("/api/simulate", post(simulate_handler))
        .route("/api/monte-carlo", post(monte_carlo_handler))
        .fallback(not_found_handler)
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("fireplan HTTP API listening on http://{addr}");
    info!("Local access: http://127.0.0.1:{port}/api/simulate");

    axum::serve(listener, router()).await
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn simulate_handler(Json(request): Json<SimulateRequest>) -> Response {
    let scenario = Scenario::from_value(&request.scenario);
    let years = request.years.unwrap_or(DEFAULT_YEARS);
    match build_simulate_response(&scenario, years) {
        Ok(response) => json_response(StatusCode::OK, response),
        Err(msg) => error_response(StatusCode::BAD_REQUEST, &msg),
    }
}

async fn monte_carlo_handler(Json(request): Json<MonteCarloRequest>) -> Response {
    let scenario = Scenario::from_value(&request.scenario);
    let config = request.config;
    let outcome =
        tokio::task::spawn_blocking(move || build_monte_carlo_response(&scenario, &config)).await;
    match outcome {
        Ok(Ok(result)) => json_response(StatusCode::OK, result),
        Ok(Err(msg)) => error_response(StatusCode::BAD_REQUEST, &msg),
        Err(err) => {
            warn!("Monte Carlo task failed: {err}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Simulation failed")
        }
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= 1e-6,
            "expected {expected}, got {actual}"
        );
    }

    fn sample_scenario() -> Value {
        json!({
            "accounts": [
                {"className": "SavedAccount", "id": "cash", "name": "Cash", "amount": 50000.0, "apr": 0.0},
                {"className": "InvestedAccount", "id": "brk", "name": "Brokerage", "amount": 400000.0,
                 "taxType": "Brokerage", "costBasis": 300000.0, "isContributionEligible": true}
            ],
            "incomes": [
                {"className": "WorkIncome", "id": "job", "name": "Job", "amount": 90000.0, "frequency": "Annually"}
            ],
            "expenses": [
                {"className": "FoodExpense", "id": "living", "name": "Living", "amount": 45000.0, "frequency": "Annually"}
            ],
            "assumptions": {
                "demographics": {"startAge": 50, "retirementAge": 55, "lifeExpectancy": 85},
                "priorities": [
                    {"id": "invest", "bucket": "INVESTMENT", "accountId": "brk", "cap": {"capType": "REMAINDER"}}
                ]
            }
        })
    }

    #[test]
    fn cli_parses_every_subcommand() {
        let cli = Cli::try_parse_from(["fireplan", "serve", "--port", "9000"]).expect("serve");
        assert!(matches!(cli.command, Command::Serve { port: 9000 }));

        let cli = Cli::try_parse_from([
            "fireplan",
            "simulate",
            "--scenario",
            "plan.json",
            "--years",
            "30",
            "--pretty",
        ])
        .expect("simulate");
        assert!(matches!(
            cli.command,
            Command::Simulate { years: 30, pretty: true, .. }
        ));

        let cli = Cli::try_parse_from([
            "fireplan",
            "monte-carlo",
            "--scenario",
            "plan.json",
            "--simulations",
            "100",
            "--volatility",
            "12.5",
        ])
        .expect("monte-carlo");
        match cli.command {
            Command::MonteCarlo {
                simulations,
                seed,
                volatility,
                years,
                ..
            } => {
                assert_eq!(simulations, 100);
                assert_eq!(seed, 42);
                assert_eq!(years, DEFAULT_YEARS);
                assert_approx(volatility, 12.5);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn simulate_response_stops_at_life_expectancy() {
        let scenario = Scenario::from_value(&sample_scenario());
        let response = build_simulate_response(&scenario, 60).expect("valid scenario");
        assert_eq!(response.years_simulated, 35);
        assert_eq!(response.years.len(), 36);
        assert!(response.solvent);
        assert_approx(
            response.final_net_worth,
            response.years.last().map(|y| y.net_worth).unwrap_or(f64::NAN),
        );
    }

    #[test]
    fn invalid_requests_are_rejected_with_messages() {
        let scenario = Scenario::from_value(&sample_scenario());
        let err = build_simulate_response(&scenario, 0).expect_err("zero years");
        assert!(err.contains("years must be between"));

        let mut broken = sample_scenario();
        broken["assumptions"]["withdrawalStrategy"] = json!(["missing"]);
        let err = build_simulate_response(&Scenario::from_value(&broken), 10)
            .expect_err("unknown withdrawal account");
        assert!(err.contains("missing"));

        let config = MonteCarloConfig {
            simulations: MAX_SIMULATIONS + 1,
            ..MonteCarloConfig::default()
        };
        let err = build_monte_carlo_response(&scenario, &config).expect_err("too many runs");
        assert!(err.contains("simulations"));
    }

    #[test]
    fn request_payloads_default_missing_fields() {
        let request: SimulateRequest = serde_json::from_str("{}").expect("empty body");
        assert!(request.years.is_none());
        assert!(request.scenario.is_null());

        let request: MonteCarloRequest =
            serde_json::from_str(r#"{"config": {"simulations": 10}}"#).expect("partial config");
        assert_eq!(request.config.simulations, 10);
        assert_eq!(request.config.seed, MonteCarloConfig::default().seed);
    }

    #[tokio::test]
    async fn handlers_return_json_without_caching() {
        let request = SimulateRequest {
            scenario: sample_scenario(),
            years: Some(5),
        };
        let response = simulate_handler(Json(request)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL),
            Some(&HeaderValue::from_static("no-store"))
        );

        let request = MonteCarloRequest {
            scenario: sample_scenario(),
            config: MonteCarloConfig {
                simulations: 0,
                ..MonteCarloConfig::default()
            },
        };
        let response = monte_carlo_handler(Json(request)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
