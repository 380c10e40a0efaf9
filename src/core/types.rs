use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::account::Account;
use super::flows::{Expense, GrowthRates, Income};
use super::guyton_klinger::{StrategyAdjustment, StrategyWithdrawal};
use super::roth::RothConversion;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum WithdrawalStrategy {
    #[default]
    FixedReal,
    Percentage,
    GuytonKlinger,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MacroAssumptions {
    pub inflation_rate: f64,
    pub healthcare_inflation: f64,
    pub inflation_adjusted: bool,
}

impl Default for MacroAssumptions {
    fn default() -> Self {
        Self {
            inflation_rate: 3.0,
            healthcare_inflation: 5.5,
            inflation_adjusted: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IncomeAssumptions {
    pub salary_growth: f64,
    pub social_security_start_age: u32,
}

impl Default for IncomeAssumptions {
    fn default() -> Self {
        Self {
            salary_growth: 1.0,
            social_security_start_age: 67,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExpenseAssumptions {
    pub lifestyle_creep: f64,
    pub housing_appreciation: f64,
    pub rent_inflation: f64,
}

impl Default for ExpenseAssumptions {
    fn default() -> Self {
        Self {
            lifestyle_creep: 0.0,
            housing_appreciation: 1.0,
            rent_inflation: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReturnRates {
    pub ror: f64,
}

impl Default for ReturnRates {
    fn default() -> Self {
        Self { ror: 7.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InvestmentAssumptions {
    pub return_rates: ReturnRates,
    pub withdrawal_strategy: WithdrawalStrategy,
    pub withdrawal_rate: f64,
    pub gk_upper_guardrail: f64,
    pub gk_lower_guardrail: f64,
    pub gk_adjustment_percent: f64,
    pub auto_roth_conversions: bool,
}

impl Default for InvestmentAssumptions {
    fn default() -> Self {
        Self {
            return_rates: ReturnRates::default(),
            withdrawal_strategy: WithdrawalStrategy::FixedReal,
            withdrawal_rate: 4.0,
            gk_upper_guardrail: 20.0,
            gk_lower_guardrail: 20.0,
            gk_adjustment_percent: 10.0,
            auto_roth_conversions: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Demographics {
    pub start_age: Option<u32>,
    pub birth_year: Option<i32>,
    pub start_year: i32,
    pub retirement_age: u32,
    pub life_expectancy: u32,
}

impl Default for Demographics {
    fn default() -> Self {
        Self {
            start_age: Some(30),
            birth_year: None,
            start_year: 2025,
            retirement_age: 65,
            life_expectancy: 90,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WithdrawalRules {
    pub threshold_age: f64,
    pub early_withdrawal_penalty: f64,
}

impl Default for WithdrawalRules {
    fn default() -> Self {
        Self {
            threshold_age: 59.5,
            early_withdrawal_penalty: 10.0,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BucketKind {
    Debt,
    Investment,
    Savings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "capType", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CapPolicy {
    Max { amount: f64 },
    Fixed { monthly: f64 },
    Remainder,
    MultipleOfExpenses { months: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Priority {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub bucket: BucketKind,
    pub account_id: String,
    pub cap: CapPolicy,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Assumptions {
    #[serde(rename = "macro")]
    pub macro_: MacroAssumptions,
    pub income: IncomeAssumptions,
    pub expenses: ExpenseAssumptions,
    pub investments: InvestmentAssumptions,
    pub demographics: Demographics,
    pub withdrawal_rules: WithdrawalRules,
    pub priorities: Vec<Priority>,
    #[serde(rename = "withdrawalStrategy")]
    pub withdrawal_order: Vec<String>,
}

impl Assumptions {
    pub fn start_age(&self) -> u32 {
        let d = &self.demographics;
        match (d.birth_year, d.start_age) {
            (Some(birth_year), _) => (d.start_year - birth_year).max(0) as u32,
            (None, Some(age)) => age,
            (None, None) => Demographics::default().start_age.unwrap_or(30),
        }
    }

    pub fn birth_year(&self) -> i32 {
        self.demographics
            .birth_year
            .unwrap_or(self.demographics.start_year - self.start_age() as i32)
    }

    pub fn age_in(&self, year: i32) -> u32 {
        (year - self.birth_year()).max(0) as u32
    }

    pub fn is_retired(&self, year: i32) -> bool {
        self.age_in(year) >= self.demographics.retirement_age
    }

    pub fn years_to_live(&self) -> u32 {
        self.demographics
            .life_expectancy
            .saturating_sub(self.start_age())
    }

    pub fn inflation_component(&self) -> f64 {
        if self.macro_.inflation_adjusted {
            self.macro_.inflation_rate
        } else {
            0.0
        }
    }

    pub fn growth_rates(&self) -> GrowthRates {
        let inflation = self.inflation_component();
        let real_healthcare = self.macro_.healthcare_inflation - self.macro_.inflation_rate;
        GrowthRates {
            general: inflation,
            healthcare: real_healthcare + inflation,
            housing: self.expenses.housing_appreciation + inflation,
            rent: self.expenses.rent_inflation + inflation,
            salary: self.income.salary_growth + inflation,
            lifestyle_creep: self.expenses.lifestyle_creep,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Cashflow {
    pub total_income: f64,
    pub total_expense: f64,
    pub discretionary_expense: f64,
    pub invested: f64,
    pub bucket_allocations: BTreeMap<String, f64>,
    pub unallocated: f64,
    pub withdrawals: f64,
    pub withdrawal_detail: BTreeMap<String, f64>,
    pub deficit_paydown: f64,
    pub shortfall: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TaxBreakdown {
    pub fed: f64,
    pub state: f64,
    pub fica: f64,
    pub pre_tax: f64,
    pub insurance: f64,
    pub post_tax: f64,
    pub capital_gains: f64,
    pub penalties: f64,
}

impl TaxBreakdown {
    pub fn total_tax(&self) -> f64 {
        self.fed + self.state + self.fica + self.capital_gains + self.penalties
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationYear {
    pub year: i32,
    pub age: u32,
    pub accounts: Vec<Account>,
    pub incomes: Vec<Income>,
    pub expenses: Vec<Expense>,
    pub cashflow: Cashflow,
    pub taxes: TaxBreakdown,
    pub net_worth: f64,
    pub logs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy_withdrawal: Option<StrategyWithdrawal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy_adjustment: Option<StrategyAdjustment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roth_conversion: Option<RothConversion>,
}

impl SimulationYear {
    pub fn is_solvent(&self) -> bool {
        !self
            .accounts
            .iter()
            .any(|a| matches!(a, Account::DeficitDebt(_)))
    }
}
