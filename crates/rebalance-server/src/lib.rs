//! JSON-over-stdio entry point for the rebalancing engine.
//!
//! One request on stdin, one response on stdout. Input validation failures
//! abort the whole request with an error; per-strategy solver failures are
//! recorded in the response and the run continues.

pub mod request;
pub mod response;

use anyhow::Context;
use tracing::info;

use rebalance_engine::Account;

pub use request::Request;
pub use response::{MaxWithdrawalOutput, Response, StrategyResultOutput};

/// Version string echoed in every response.
fn version() -> String {
    std::env::var("VERSION").unwrap_or_else(|_| "test".to_string())
}

/// Parse, validate, optimize, respond.
pub fn handle_request(raw: &str) -> anyhow::Result<Response> {
    let request: Request = serde_json::from_str(raw).context("malformed request")?;

    let tax_rates = request.tax_rates().context("invalid tax rates")?;
    let strategies = request.strategies().context("invalid strategies")?;
    let settings = request
        .optimization_settings()
        .context("invalid settings")?;

    let account = Account::new(
        request.oracle.current_date,
        tax_rates,
        request.oracle.stock_restrictions.clone(),
        request.oracle.recently_closed_lots.clone(),
        request
            .oracle
            .percentage_protection_from_inadvertent_wash_sales,
        strategies,
    );
    account.validate().context("invalid account inputs")?;

    info!(
        strategies = account.strategies().len(),
        date = %request.oracle.current_date,
        "handling optimization request"
    );

    let run = account.compute_optimal_trades(&settings);

    let mut results = std::collections::BTreeMap::new();
    for (strategy_id, result) in run.results {
        let label = account
            .strategy(strategy_id)
            .and_then(|s| s.label.clone());
        results.insert(
            strategy_id.to_string(),
            StrategyResultOutput {
                label,
                status: result.status,
                should_trade: result.should_trade,
                trades: result.trades,
                trade_summary: result.trade_summary,
            },
        );
    }

    // Max-withdrawal pass runs after the optimization, per strategy.
    let max_withdrawal_amount_results = match request
        .max_withdrawal_settings()
        .context("invalid max withdrawal settings")?
    {
        Some(settings_by_id) => {
            let mut outputs = std::collections::BTreeMap::new();
            for (strategy_id, withdrawal_settings) in settings_by_id {
                let result = account
                    .max_withdrawal(strategy_id, &withdrawal_settings)
                    .with_context(|| {
                        format!("max withdrawal failed for strategy {}", strategy_id)
                    })?;
                outputs.insert(strategy_id.to_string(), result.into());
            }
            Some(outputs)
        }
        None => None,
    };

    Ok(Response {
        version: version(),
        results,
        netted_trades: run.netted_trades,
        max_withdrawal_amount_results,
    })
}
