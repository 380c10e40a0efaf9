use std::f64::consts::PI;

use log::debug;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::account::Account;
use super::error::ScenarioError;
use super::flows::{Expense, Income};
use super::simulation::{SimulationEnv, run_simulation};
use super::types::SimulationYear;

const RETURN_FLOOR: f64 = -95.0;
const RETURN_CEILING: f64 = 250.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MonteCarloConfig {
    pub simulations: u32,
    pub seed: u64,
    pub years: u32,
    pub volatility: f64,
}

impl Default for MonteCarloConfig {
    fn default() -> Self {
        Self {
            simulations: 500,
            seed: 42,
            years: 60,
            volatility: 15.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetWorthBand {
    pub year: i32,
    pub age: u32,
    pub p10: f64,
    pub p50: f64,
    pub p90: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonteCarloResult {
    pub simulations: u32,
    pub seed: u64,
    pub success_rate: f64,
    pub bands: Vec<NetWorthBand>,
}

struct RunSummary {
    net_worth: Vec<f64>,
    solvent: bool,
}

pub fn run_monte_carlo(
    accounts: &[Account],
    incomes: &[Income],
    expenses: &[Expense],
    env: &SimulationEnv<'_>,
    config: &MonteCarloConfig,
) -> Result<MonteCarloResult, ScenarioError> {
    if config.simulations == 0 {
        return Err(ScenarioError::NoSimulations);
    }
    let assumptions = env.assumptions;
    let horizon = config.years.min(assumptions.years_to_live());
    let mean = assumptions.investments.return_rates.ror;
    let volatility = config.volatility.max(0.0);

    let runs: Vec<RunSummary> = (0..config.simulations)
        .into_par_iter()
        .map(|run_id| {
            let mut rng = Rng::new(derive_seed(config.seed, horizon, run_id));
            let returns: Vec<f64> = (0..horizon)
                .map(|_| sample_return(&mut rng, mean, volatility))
                .collect();
            let years = run_simulation(horizon, accounts, incomes, expenses, env, &returns);
            RunSummary {
                solvent: years.last().is_some_and(SimulationYear::is_solvent),
                net_worth: years.iter().map(|y| y.net_worth).collect(),
            }
        })
        .collect();

    let successes = runs.iter().filter(|r| r.solvent).count();
    let start_year = assumptions.demographics.start_year;
    let start_age = assumptions.start_age();
    let bands = (0..=horizon as usize)
        .map(|offset| {
            let mut values: Vec<f64> = runs
                .iter()
                .filter_map(|r| r.net_worth.get(offset).copied())
                .collect();
            NetWorthBand {
                year: start_year + offset as i32,
                age: start_age + offset as u32,
                p10: percentile(&mut values, 10.0),
                p50: percentile(&mut values, 50.0),
                p90: percentile(&mut values, 90.0),
            }
        })
        .collect();

    let success_rate = successes as f64 / config.simulations as f64;
    debug!(
        "monte carlo: {} runs over {horizon} years, success rate {success_rate:.3}",
        config.simulations
    );
    Ok(MonteCarloResult {
        simulations: config.simulations,
        seed: config.seed,
        success_rate,
        bands,
    })
}

fn sample_return(rng: &mut Rng, mean: f64, volatility: f64) -> f64 {
    (mean + volatility * rng.standard_normal()).clamp(RETURN_FLOOR, RETURN_CEILING)
}

fn derive_seed(base_seed: u64, horizon: u32, run_id: u32) -> u64 {
    let mixed = base_seed ^ ((horizon as u64) << 32) ^ run_id as u64;
    splitmix64(mixed)
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

struct Rng {
    state: u64,
    cached_normal: Option<f64>,
}

impl Rng {
    fn new(seed: u64) -> Self {
        let state = if seed == 0 {
            0xA5A5_A5A5_A5A5_A5A5
        } else {
            seed
        };
        Self {
            state,
            cached_normal: None,
        }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545F4914F6CDD1D)
    }

    fn next_f64(&mut self) -> f64 {
        const DENOM: f64 = (1_u64 << 53) as f64;
        let v = self.next_u64() >> 11;
        ((v as f64) + 0.5) / DENOM
    }

    fn standard_normal(&mut self) -> f64 {
        if let Some(z) = self.cached_normal.take() {
            return z;
        }

        let u1 = self.next_f64().max(1e-12);
        let u2 = self.next_f64();
        let r = (-2.0 * u1.ln()).sqrt();
        let theta = 2.0 * PI * u2;

        self.cached_normal = Some(r * theta.sin());
        r * theta.cos()
    }
}

fn percentile(values: &mut [f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    values.sort_by(|a, b| a.total_cmp(b));

    let n = values.len();
    if n == 1 {
        return values[0];
    }

    let rank = (p / 100.0) * (n as f64 - 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;

    if lower == upper {
        values[lower]
    } else {
        let w = rank - lower as f64;
        values[lower] * (1.0 - w) + values[upper] * w
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::account::{InvestedAccount, SavedAccount, TaxCharacter};
    use crate::core::flows::{BasicExpense, Frequency};
    use crate::core::tax::{FlatTaxOracle, TaxState};
    use crate::core::types::Assumptions;
    use proptest::prelude::{any, prop_assert, proptest};

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-6,
            "expected {expected}, got {actual}"
        );
    }

    fn portfolio() -> Vec<Account> {
        vec![
            Account::Saved(SavedAccount {
                id: "cash".to_string(),
                name: "Cash".to_string(),
                amount: 20_000.0,
                apr: 0.0,
            }),
            Account::Invested(InvestedAccount {
                id: "brk".to_string(),
                name: "Brokerage".to_string(),
                amount: 600_000.0,
                employer_balance: 0.0,
                tenure_years: 0,
                expense_ratio: 0.0,
                tax_type: TaxCharacter::Brokerage,
                is_contribution_eligible: true,
                vested_per_year: 0.0,
                cost_basis: 600_000.0,
            }),
        ]
    }

    fn spending(amount: f64) -> Vec<Expense> {
        vec![Expense::Food(BasicExpense {
            id: "living".to_string(),
            name: "Living".to_string(),
            amount,
            frequency: Frequency::Annually,
            start_year: None,
            end_year: None,
            is_discretionary: false,
        })]
    }

    fn retiree() -> Assumptions {
        let mut assumptions = Assumptions::default();
        assumptions.demographics.start_age = Some(65);
        assumptions.demographics.retirement_age = 65;
        assumptions
    }

    #[test]
    fn percentile_interpolates_between_ranks() {
        let mut values = vec![4.0, 1.0, 3.0, 2.0];
        assert_approx(percentile(&mut values, 50.0), 2.5);
        assert_approx(percentile(&mut values, 0.0), 1.0);
        assert_approx(percentile(&mut values, 100.0), 4.0);
        assert_eq!(percentile(&mut [], 50.0), 0.0);
    }

    #[test]
    fn rng_is_deterministic_and_normal_deviates_are_centered() {
        let mut a = Rng::new(7);
        let mut b = Rng::new(7);
        let draws: Vec<f64> = (0..10_000).map(|_| a.standard_normal()).collect();
        let again: Vec<f64> = (0..10_000).map(|_| b.standard_normal()).collect();
        assert_eq!(draws, again);
        let mean = draws.iter().sum::<f64>() / draws.len() as f64;
        assert!(mean.abs() < 0.05, "mean {mean}");
    }

    #[test]
    fn zero_volatility_matches_the_deterministic_projection() {
        let assumptions = retiree();
        let state = TaxState::default();
        let oracle = FlatTaxOracle::default();
        let env = SimulationEnv {
            assumptions: &assumptions,
            tax_state: &state,
            oracle: &oracle,
        };
        let config = MonteCarloConfig {
            simulations: 8,
            seed: 1,
            years: 10,
            volatility: 0.0,
        };
        let accounts = portfolio();
        let expenses = spending(30_000.0);
        let result = run_monte_carlo(&accounts, &[], &expenses, &env, &config).expect("runs");
        let baseline = run_simulation(10, &accounts, &[], &expenses, &env, &[]);

        assert_eq!(result.bands.len(), baseline.len());
        for (band, year) in result.bands.iter().zip(&baseline) {
            assert_approx(band.p10, year.net_worth);
            assert_approx(band.p90, year.net_worth);
        }
        assert_eq!(result.success_rate, 1.0);
    }

    #[test]
    fn overspending_fails_every_run() {
        let assumptions = retiree();
        let state = TaxState::default();
        let oracle = FlatTaxOracle::default();
        let env = SimulationEnv {
            assumptions: &assumptions,
            tax_state: &state,
            oracle: &oracle,
        };
        let config = MonteCarloConfig {
            simulations: 16,
            years: 25,
            ..MonteCarloConfig::default()
        };
        let result =
            run_monte_carlo(&portfolio(), &[], &spending(400_000.0), &env, &config).expect("runs");
        assert_eq!(result.success_rate, 0.0);
    }

    #[test]
    fn zero_simulations_is_rejected() {
        let assumptions = retiree();
        let state = TaxState::default();
        let oracle = FlatTaxOracle::default();
        let env = SimulationEnv {
            assumptions: &assumptions,
            tax_state: &state,
            oracle: &oracle,
        };
        let config = MonteCarloConfig {
            simulations: 0,
            ..MonteCarloConfig::default()
        };
        assert!(matches!(
            run_monte_carlo(&portfolio(), &[], &[], &env, &config),
            Err(ScenarioError::NoSimulations)
        ));
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(12))]

        #[test]
        fn prop_same_seed_reproduces_and_bands_are_ordered(
            seed in any::<u64>(),
            simulations in 2u32..12,
            volatility in 0u32..30,
        ) {
            let assumptions = retiree();
            let state = TaxState::default();
            let oracle = FlatTaxOracle::default();
            let env = SimulationEnv {
                assumptions: &assumptions,
                tax_state: &state,
                oracle: &oracle,
            };
            let config = MonteCarloConfig {
                simulations,
                seed,
                years: 15,
                volatility: volatility as f64,
            };
            let accounts = portfolio();
            let expenses = spending(35_000.0);
            let first = run_monte_carlo(&accounts, &[], &expenses, &env, &config);
            let second = run_monte_carlo(&accounts, &[], &expenses, &env, &config);
            prop_assert!(first.is_ok());
            if let (Ok(first), Ok(second)) = (first, second) {
                prop_assert!(first == second);
                prop_assert!((0.0..=1.0).contains(&first.success_rate));
                for band in &first.bands {
                    prop_assert!(band.p10 <= band.p50 && band.p50 <= band.p90);
                    prop_assert!(band.p10.is_finite() && band.p90.is_finite());
                }
            }
        }
    }
}
