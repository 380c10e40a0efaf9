//! Social Security retirement benefit estimation.
//!
//! Dollar thresholds are 2024 values. In nominal projections the caller
//! passes an index factor that carries them forward with inflation.

use serde::{Deserialize, Serialize};

use super::flows::Income;
use super::types::{Assumptions, SimulationYear};

pub const THRESHOLD_BASE_YEAR: i32 = 2024;
pub const BEND_POINTS: (f64, f64) = (1_174.0, 7_078.0);
pub const TAXABLE_MAXIMUM: f64 = 168_600.0;
pub const EARNINGS_TEST_EXEMPT: f64 = 22_320.0;
pub const EARNINGS_TEST_FRA_YEAR_EXEMPT: f64 = 59_520.0;
pub const TAXABLE_BENEFIT_SHARE: f64 = 0.85;

const COMPUTATION_YEARS: usize = 35;
const EARLIEST_CLAIM_AGE: u32 = 62;
const LATEST_CREDIT_AGE: u32 = 70;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BenefitEstimate {
    pub aime: f64,
    pub pia: f64,
    pub full_retirement_age_months: u32,
    pub claiming_age: u32,
    pub claiming_factor: f64,
    pub monthly_benefit: f64,
}

pub fn full_retirement_age_months(birth_year: i32) -> u32 {
    match birth_year {
        ..=1937 => 65 * 12,
        1938..=1942 => 65 * 12 + 2 * (birth_year - 1937) as u32,
        1943..=1954 => 66 * 12,
        1955..=1959 => 66 * 12 + 2 * (birth_year - 1954) as u32,
        _ => 67 * 12,
    }
}

pub fn aime(earnings: &[f64]) -> f64 {
    let mut years: Vec<f64> = earnings
        .iter()
        .copied()
        .filter(|e| e.is_finite() && *e > 0.0)
        .collect();
    years.sort_by(|a, b| b.total_cmp(a));
    let total: f64 = years.iter().take(COMPUTATION_YEARS).sum();
    total / (COMPUTATION_YEARS as f64 * 12.0)
}

pub fn pia(aime: f64, bend_points: (f64, f64)) -> f64 {
    let (first, second) = bend_points;
    let aime = aime.max(0.0);
    0.9 * aime.min(first)
        + 0.32 * (aime.min(second) - first).max(0.0)
        + 0.15 * (aime - second).max(0.0)
}

pub fn claiming_factor(claim_months: u32, fra_months: u32) -> f64 {
    let claim_months = claim_months.clamp(EARLIEST_CLAIM_AGE * 12, LATEST_CREDIT_AGE * 12);
    if claim_months < fra_months {
        let early = (fra_months - claim_months) as f64;
        let first = early.min(36.0);
        let beyond = (early - 36.0).max(0.0);
        (1.0 - first * 5.0 / 900.0 - beyond * 5.0 / 1200.0).max(0.0)
    } else {
        let delayed = (claim_months - fra_months) as f64;
        1.0 + delayed * 2.0 / 300.0
    }
}

pub fn estimate_benefit(
    earnings: &[f64],
    birth_year: i32,
    claiming_age: u32,
    index_factor: f64,
) -> BenefitEstimate {
    let index_factor = index_factor.max(0.0);
    let fra = full_retirement_age_months(birth_year);
    let claiming_age = claiming_age.clamp(EARLIEST_CLAIM_AGE, LATEST_CREDIT_AGE);
    let aime = aime(earnings);
    let pia = pia(
        aime,
        (BEND_POINTS.0 * index_factor, BEND_POINTS.1 * index_factor),
    );
    let factor = claiming_factor(claiming_age * 12, fra);
    BenefitEstimate {
        aime,
        pia,
        full_retirement_age_months: fra,
        claiming_age,
        claiming_factor: factor,
        monthly_benefit: pia * factor,
    }
}

/// Benefits withheld under the retirement earnings test. Nothing is
/// withheld at or after full retirement age.
pub fn earnings_test_withholding(
    annual_benefit: f64,
    earned_income: f64,
    age: u32,
    fra_months: u32,
    index_factor: f64,
) -> f64 {
    let age_months = age * 12;
    if age_months >= fra_months || annual_benefit <= 0.0 {
        return 0.0;
    }
    let reaches_fra_this_year = age_months + 12 > fra_months;
    let withheld = if reaches_fra_this_year {
        (earned_income - EARNINGS_TEST_FRA_YEAR_EXEMPT * index_factor).max(0.0) / 3.0
    } else {
        (earned_income - EARNINGS_TEST_EXEMPT * index_factor).max(0.0) / 2.0
    };
    withheld.min(annual_benefit)
}

/// Covered earnings per year, expressed in `claim_year` dollars and capped
/// at the taxable maximum. Pre-simulation history is taken as start-year
/// dollars.
pub fn earnings_history(
    prior_years: &[SimulationYear],
    pre_simulation: &[f64],
    assumptions: &Assumptions,
    claim_year: i32,
) -> Vec<f64> {
    let inflation = assumptions.inflation_component() / 100.0;
    let carry = |from_year: i32| (1.0 + inflation).powi((claim_year - from_year).max(0));
    let cap = TAXABLE_MAXIMUM * index_factor(assumptions, claim_year);
    let start_year = assumptions.demographics.start_year;

    let simulated = prior_years
        .iter()
        .filter(|rec| !assumptions.is_retired(rec.year))
        .map(|rec| {
            let wages: f64 = rec
                .incomes
                .iter()
                .filter(|i| matches!(i, Income::Work(_)))
                .map(|i| i.annual_amount(rec.year))
                .sum();
            wages * carry(rec.year)
        });

    pre_simulation
        .iter()
        .map(|e| e.max(0.0) * carry(start_year))
        .chain(simulated)
        .map(|e| e.min(cap))
        .collect()
}

pub fn index_factor(assumptions: &Assumptions, year: i32) -> f64 {
    let inflation = assumptions.inflation_component() / 100.0;
    (1.0 + inflation).powi((year - THRESHOLD_BASE_YEAR).max(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn full_retirement_age_steps_by_birth_year() {
        assert_eq!(full_retirement_age_months(1936), 780);
        assert_eq!(full_retirement_age_months(1940), 786);
        assert_eq!(full_retirement_age_months(1950), 792);
        assert_eq!(full_retirement_age_months(1957), 798);
        assert_eq!(full_retirement_age_months(1985), 804);
    }

    #[test]
    fn aime_zero_fills_short_histories_and_keeps_top_35() {
        assert_close(aime(&[60_000.0; 10]), 600_000.0 / 420.0, 1e-9);

        let mut long = vec![10_000.0; 40];
        long[0] = 100_000.0;
        let expected = (100_000.0 + 34.0 * 10_000.0) / 420.0;
        assert_close(aime(&long), expected, 1e-9);
    }

    #[test]
    fn pia_applies_bend_points() {
        assert_close(pia(1_000.0, BEND_POINTS), 900.0, 1e-9);
        let expected = 0.9 * 1_174.0 + 0.32 * (7_078.0 - 1_174.0) + 0.15 * 922.0;
        assert_close(pia(8_000.0, BEND_POINTS), expected, 1e-9);
    }

    #[test]
    fn claiming_factor_reduces_early_and_credits_delay() {
        let fra = 67 * 12;
        assert_close(claiming_factor(62 * 12, fra), 0.70, 1e-12);
        assert_close(claiming_factor(64 * 12, fra), 0.80, 1e-12);
        assert_close(claiming_factor(fra, fra), 1.0, 1e-12);
        assert_close(claiming_factor(70 * 12, fra), 1.24, 1e-12);
        assert_close(claiming_factor(75 * 12, fra), 1.24, 1e-12);
    }

    #[test]
    fn earnings_test_withholds_one_for_two_below_fra_year() {
        let withheld = earnings_test_withholding(20_000.0, 42_320.0, 63, 804, 1.0);
        assert_close(withheld, 10_000.0, 1e-9);
    }

    #[test]
    fn earnings_test_uses_higher_exemption_in_fra_year() {
        // born 1957: FRA at 66 and 6 months
        let withheld = earnings_test_withholding(30_000.0, 89_520.0, 66, 798, 1.0);
        assert_close(withheld, 10_000.0, 1e-9);
    }

    #[test]
    fn earnings_test_never_applies_at_or_after_fra() {
        assert_eq!(earnings_test_withholding(30_000.0, 500_000.0, 67, 804, 1.0), 0.0);
    }

    #[test]
    fn estimate_combines_pia_and_claiming_factor() {
        let estimate = estimate_benefit(&[60_000.0; 35], 1965, 62, 1.0);
        let expected_pia = pia(5_000.0, BEND_POINTS);
        assert_close(estimate.aime, 5_000.0, 1e-9);
        assert_close(estimate.pia, expected_pia, 1e-9);
        assert_close(estimate.monthly_benefit, expected_pia * 0.7, 1e-9);
    }
}
