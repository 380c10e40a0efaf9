use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum FilingStatus {
    #[default]
    Single,
    MarriedJoint,
    MarriedSeparate,
    HeadOfHousehold,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum DeductionMethod {
    #[default]
    Standard,
    Itemized,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TaxOverrides {
    pub federal_rate: Option<f64>,
    pub state_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TaxState {
    pub filing_status: FilingStatus,
    pub jurisdiction: String,
    pub deduction_method: DeductionMethod,
    pub itemized_deduction: f64,
    pub overrides: TaxOverrides,
    pub year: i32,
}

impl Default for TaxState {
    fn default() -> Self {
        Self {
            filing_status: FilingStatus::Single,
            jurisdiction: "CA".to_string(),
            deduction_method: DeductionMethod::Standard,
            itemized_deduction: 0.0,
            overrides: TaxOverrides::default(),
            year: 2025,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TaxRequest<'a> {
    pub ordinary_income: f64,
    pub capital_gains: f64,
    pub earned_income: f64,
    pub tax_state: &'a TaxState,
    pub year: i32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxResult {
    pub fed: f64,
    pub state: f64,
    pub fica: f64,
    pub capital_gains_tax: f64,
}

impl TaxResult {
    pub fn total(&self) -> f64 {
        self.fed + self.state + self.fica + self.capital_gains_tax
    }
}

pub trait TaxOracle: Sync {
    fn compute_taxes(&self, request: &TaxRequest<'_>) -> TaxResult;

    /// Ordinary income at which the bracket containing `ordinary_income` ends.
    /// `None` means there is no higher bracket to stop at.
    fn ordinary_bracket_ceiling(
        &self,
        _ordinary_income: f64,
        _tax_state: &TaxState,
        _year: i32,
    ) -> Option<f64> {
        None
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FlatTaxOracle {
    pub ordinary_rate: f64,
    pub capital_gains_rate: f64,
    pub fica_rate: f64,
}

impl TaxOracle for FlatTaxOracle {
    fn compute_taxes(&self, request: &TaxRequest<'_>) -> TaxResult {
        TaxResult {
            fed: request.ordinary_income.max(0.0) * self.ordinary_rate / 100.0,
            state: 0.0,
            fica: request.earned_income.max(0.0) * self.fica_rate / 100.0,
            capital_gains_tax: request.capital_gains.max(0.0) * self.capital_gains_rate / 100.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TaxBracket {
    pub floor: f64,
    pub rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BracketTaxOracle {
    pub brackets: Vec<TaxBracket>,
    pub standard_deduction: f64,
    pub state_rate: f64,
    pub fica_rate: f64,
    pub capital_gains_rate: f64,
}

impl Default for BracketTaxOracle {
    fn default() -> Self {
        let brackets = [
            (0.0, 10.0),
            (11_600.0, 12.0),
            (47_150.0, 22.0),
            (100_525.0, 24.0),
            (191_950.0, 32.0),
            (243_725.0, 35.0),
            (609_350.0, 37.0),
        ]
        .into_iter()
        .map(|(floor, rate)| TaxBracket { floor, rate })
        .collect();

        Self {
            brackets,
            standard_deduction: 14_600.0,
            state_rate: 5.0,
            fica_rate: 7.65,
            capital_gains_rate: 15.0,
        }
    }
}

impl BracketTaxOracle {
    fn threshold_scale(status: FilingStatus) -> f64 {
        match status {
            FilingStatus::MarriedJoint => 2.0,
            FilingStatus::HeadOfHousehold => 1.5,
            FilingStatus::Single | FilingStatus::MarriedSeparate => 1.0,
        }
    }

    fn deduction(&self, tax_state: &TaxState) -> f64 {
        match tax_state.deduction_method {
            DeductionMethod::Standard => {
                self.standard_deduction * Self::threshold_scale(tax_state.filing_status)
            }
            DeductionMethod::Itemized => tax_state.itemized_deduction.max(0.0),
        }
    }

    fn progressive_tax(&self, taxable: f64, scale: f64) -> f64 {
        let taxable = taxable.max(0.0);
        let mut tax = 0.0;
        for (idx, bracket) in self.brackets.iter().enumerate() {
            let floor = bracket.floor * scale;
            if taxable <= floor {
                break;
            }
            let ceiling = self
                .brackets
                .get(idx + 1)
                .map(|next| next.floor * scale)
                .unwrap_or(f64::INFINITY);
            tax += (taxable.min(ceiling) - floor) * bracket.rate.clamp(0.0, 100.0) / 100.0;
        }
        tax
    }
}

impl TaxOracle for BracketTaxOracle {
    fn compute_taxes(&self, request: &TaxRequest<'_>) -> TaxResult {
        let tax_state = request.tax_state;
        let ordinary = request.ordinary_income.max(0.0);
        let scale = Self::threshold_scale(tax_state.filing_status);
        let taxable = (ordinary - self.deduction(tax_state)).max(0.0);

        let fed = match tax_state.overrides.federal_rate {
            Some(rate) => ordinary * rate / 100.0,
            None => self.progressive_tax(taxable, scale),
        };
        let state_rate = tax_state.overrides.state_rate.unwrap_or(self.state_rate);

        TaxResult {
            fed,
            state: taxable * state_rate / 100.0,
            fica: request.earned_income.max(0.0) * self.fica_rate / 100.0,
            capital_gains_tax: request.capital_gains.max(0.0) * self.capital_gains_rate / 100.0,
        }
    }

    fn ordinary_bracket_ceiling(
        &self,
        ordinary_income: f64,
        tax_state: &TaxState,
        _year: i32,
    ) -> Option<f64> {
        let deduction = self.deduction(tax_state);
        let taxable = ordinary_income.max(0.0) - deduction;
        if taxable < 0.0 {
            return Some(deduction);
        }
        let scale = Self::threshold_scale(tax_state.filing_status);
        self.brackets
            .iter()
            .map(|b| b.floor * scale)
            .find(|floor| *floor > taxable)
            .map(|floor| floor + deduction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn request(ordinary_income: f64, tax_state: &TaxState) -> TaxRequest<'_> {
        TaxRequest {
            ordinary_income,
            capital_gains: 0.0,
            earned_income: 0.0,
            tax_state,
            year: 2025,
        }
    }

    #[test]
    fn bracket_oracle_applies_progressive_rates_after_deduction() {
        let oracle = BracketTaxOracle::default();
        let state = TaxState::default();
        let taxes = oracle.compute_taxes(&request(64_600.0, &state));
        // 50,000 taxable: 11,600 @ 10% + 35,550 @ 12% + 2,850 @ 22%
        assert_approx(taxes.fed, 1_160.0 + 4_266.0 + 627.0);
        assert_approx(taxes.state, 2_500.0);
    }

    #[test]
    fn married_joint_doubles_thresholds() {
        let oracle = BracketTaxOracle::default();
        let single = TaxState::default();
        let joint = TaxState {
            filing_status: FilingStatus::MarriedJoint,
            ..TaxState::default()
        };
        let single_tax = oracle.compute_taxes(&request(100_000.0, &single)).fed;
        let joint_tax = oracle.compute_taxes(&request(200_000.0, &joint)).fed;
        assert_approx(joint_tax, single_tax * 2.0);
    }

    #[test]
    fn overrides_replace_computed_rates() {
        let oracle = BracketTaxOracle::default();
        let state = TaxState {
            overrides: TaxOverrides {
                federal_rate: Some(20.0),
                state_rate: Some(0.0),
            },
            ..TaxState::default()
        };
        let taxes = oracle.compute_taxes(&request(100_000.0, &state));
        assert_approx(taxes.fed, 20_000.0);
        assert_approx(taxes.state, 0.0);
    }

    #[test]
    fn bracket_ceiling_reports_top_of_current_bracket() {
        let oracle = BracketTaxOracle::default();
        let state = TaxState::default();
        assert_approx(
            oracle
                .ordinary_bracket_ceiling(30_000.0, &state, 2025)
                .expect("ceiling"),
            47_150.0 + 14_600.0,
        );
        assert_approx(
            oracle
                .ordinary_bracket_ceiling(5_000.0, &state, 2025)
                .expect("ceiling"),
            14_600.0,
        );
        assert!(
            oracle
                .ordinary_bracket_ceiling(1_000_000.0, &state, 2025)
                .is_none()
        );
    }

    #[test]
    fn itemized_deduction_uses_tax_state_amount() {
        let oracle = BracketTaxOracle::default();
        let state = TaxState {
            deduction_method: DeductionMethod::Itemized,
            itemized_deduction: 30_000.0,
            ..TaxState::default()
        };
        let taxes = oracle.compute_taxes(&request(30_000.0, &state));
        assert_approx(taxes.fed, 0.0);
    }
}
