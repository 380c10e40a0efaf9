use serde::{Deserialize, Serialize};

use super::types::{InvestmentAssumptions, WithdrawalStrategy};

/// Cuts are not forced when fewer years than this remain in the plan.
pub const GUARDRAIL_FLOOR_YEARS: u32 = 15;

const PORTFOLIO_EPS: f64 = 0.005;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Guardrail {
    Initial,
    None,
    CapitalPreservation,
    CapitalPreservationSuppressed,
    Prosperity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyWithdrawal {
    pub strategy: WithdrawalStrategy,
    pub amount: f64,
    pub portfolio_value: f64,
    pub rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyAdjustment {
    pub guardrail: Guardrail,
    pub current_rate: f64,
    pub target_rate: f64,
    pub upper_limit: f64,
    pub lower_limit: f64,
    pub years_remaining: u32,
    pub discretionary_factor: f64,
    pub inflation_applied: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct StrategyInput {
    pub portfolio_value: f64,
    pub prior_withdrawal: Option<f64>,
    pub inflation: f64,
    pub years_remaining: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StrategyOutcome {
    pub withdrawal: StrategyWithdrawal,
    pub adjustment: Option<StrategyAdjustment>,
    pub discretionary_factor: f64,
}

pub fn classify_rate(
    current_rate: f64,
    target_rate: f64,
    upper_guardrail: f64,
    lower_guardrail: f64,
    years_remaining: u32,
) -> Guardrail {
    let upper = target_rate * (1.0 + upper_guardrail / 100.0);
    let lower = target_rate * (1.0 - lower_guardrail / 100.0);
    if current_rate > upper {
        if years_remaining < GUARDRAIL_FLOOR_YEARS {
            Guardrail::CapitalPreservationSuppressed
        } else {
            Guardrail::CapitalPreservation
        }
    } else if current_rate < lower {
        Guardrail::Prosperity
    } else {
        Guardrail::None
    }
}

fn rate_of(amount: f64, portfolio: f64) -> f64 {
    if portfolio <= PORTFOLIO_EPS {
        0.0
    } else {
        amount / portfolio
    }
}

pub fn evaluate_strategy(
    investments: &InvestmentAssumptions,
    input: &StrategyInput,
) -> StrategyOutcome {
    let portfolio = input.portfolio_value.max(0.0);
    let target_rate = investments.withdrawal_rate.max(0.0) / 100.0;
    let inflate = 1.0 + input.inflation / 100.0;

    let finish = |amount: f64, adjustment: Option<StrategyAdjustment>, factor: f64| {
        let amount = amount.max(0.0);
        StrategyOutcome {
            withdrawal: StrategyWithdrawal {
                strategy: investments.withdrawal_strategy,
                amount,
                portfolio_value: portfolio,
                rate: rate_of(amount, portfolio) * 100.0,
            },
            adjustment,
            discretionary_factor: factor,
        }
    };

    match (investments.withdrawal_strategy, input.prior_withdrawal) {
        (WithdrawalStrategy::Percentage, _) => finish(portfolio * target_rate, None, 1.0),
        (WithdrawalStrategy::FixedReal, Some(prior)) => finish(prior * inflate, None, 1.0),
        (WithdrawalStrategy::FixedReal, None) => finish(portfolio * target_rate, None, 1.0),
        (WithdrawalStrategy::GuytonKlinger, prior) => {
            let upper = target_rate * (1.0 + investments.gk_upper_guardrail / 100.0);
            let lower = target_rate * (1.0 - investments.gk_lower_guardrail / 100.0);
            let adjustment = |guardrail: Guardrail,
                              current_rate: f64,
                              factor: f64,
                              inflation_applied: bool| {
                Some(StrategyAdjustment {
                    guardrail,
                    current_rate: current_rate * 100.0,
                    target_rate: target_rate * 100.0,
                    upper_limit: upper * 100.0,
                    lower_limit: lower * 100.0,
                    years_remaining: input.years_remaining,
                    discretionary_factor: factor,
                    inflation_applied,
                })
            };

            let Some(prior) = prior else {
                let amount = portfolio * target_rate;
                return finish(
                    amount,
                    adjustment(Guardrail::Initial, target_rate, 1.0, false),
                    1.0,
                );
            };

            let current_rate = rate_of(prior, portfolio);
            let guardrail = if portfolio <= PORTFOLIO_EPS {
                Guardrail::None
            } else {
                classify_rate(
                    current_rate,
                    target_rate,
                    investments.gk_upper_guardrail,
                    investments.gk_lower_guardrail,
                    input.years_remaining,
                )
            };
            let step = investments.gk_adjustment_percent.max(0.0) / 100.0;
            let (amount, factor, inflated) = match guardrail {
                Guardrail::CapitalPreservation => (prior * (1.0 - step), 1.0 - step, false),
                Guardrail::Prosperity => (prior * inflate * (1.0 + step), 1.0 + step, true),
                _ => (prior * inflate, 1.0, true),
            };
            let factor = factor.max(0.0);
            finish(
                amount,
                adjustment(guardrail, current_rate, factor, inflated),
                factor,
            )
        }
    }
}
