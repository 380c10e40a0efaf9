use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::flows::Expense;

pub const DEFICIT_DEBT_ID: &str = "system-deficit-debt";
pub const DEFICIT_DEBT_NAME: &str = "Uncovered Deficit";

const BALANCE_EPS: f64 = 0.005;

/// Per-year override maps keyed by the year as a JSON string. Tagged enums
/// buffer their content, which loses serde_json's integer-key coercion.
mod year_keyed {
    use std::collections::BTreeMap;

    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(map: &BTreeMap<i32, f64>, s: S) -> Result<S::Ok, S::Error> {
        s.collect_map(map.iter().map(|(year, value)| (year.to_string(), value)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<BTreeMap<i32, f64>, D::Error> {
        BTreeMap::<String, f64>::deserialize(d)?
            .into_iter()
            .map(|(year, value)| {
                year.trim()
                    .parse::<i32>()
                    .map(|year| (year, value))
                    .map_err(|_| D::Error::custom(format!("invalid override year '{year}'")))
            })
            .collect()
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum TaxCharacter {
    Traditional,
    Roth,
    Brokerage,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum Financing {
    #[default]
    Owned,
    Mortgage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedAccount {
    pub id: String,
    pub name: String,
    pub amount: f64,
    pub apr: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestedAccount {
    pub id: String,
    pub name: String,
    pub amount: f64,
    #[serde(default)]
    pub employer_balance: f64,
    #[serde(default)]
    pub tenure_years: u32,
    #[serde(default)]
    pub expense_ratio: f64,
    pub tax_type: TaxCharacter,
    #[serde(default)]
    pub is_contribution_eligible: bool,
    #[serde(default)]
    pub vested_per_year: f64,
    #[serde(default)]
    pub cost_basis: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyAccount {
    pub id: String,
    pub name: String,
    pub amount: f64,
    #[serde(default)]
    pub financing: Financing,
    #[serde(default)]
    pub owed_amount: f64,
    #[serde(default)]
    pub loan_amount: f64,
    #[serde(default)]
    pub linked_expense_id: Option<String>,
    #[serde(default, with = "year_keyed", skip_serializing_if = "BTreeMap::is_empty")]
    pub value_overrides: BTreeMap<i32, f64>,
    #[serde(default, with = "year_keyed", skip_serializing_if = "BTreeMap::is_empty")]
    pub loan_overrides: BTreeMap<i32, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebtAccount {
    pub id: String,
    pub name: String,
    pub amount: f64,
    #[serde(default)]
    pub apr: f64,
    #[serde(default)]
    pub linked_expense_id: Option<String>,
    #[serde(default, with = "year_keyed", skip_serializing_if = "BTreeMap::is_empty")]
    pub balance_overrides: BTreeMap<i32, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeficitDebtAccount {
    pub id: String,
    pub name: String,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "className")]
pub enum Account {
    #[serde(rename = "SavedAccount")]
    Saved(SavedAccount),
    #[serde(rename = "InvestedAccount")]
    Invested(InvestedAccount),
    #[serde(rename = "PropertyAccount")]
    Property(PropertyAccount),
    #[serde(rename = "DebtAccount")]
    Debt(DebtAccount),
    #[serde(rename = "DeficitDebtAccount")]
    DeficitDebt(DeficitDebtAccount),
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AccountFlows {
    pub contribution: f64,
    pub employer_contribution: f64,
    pub withdrawal: f64,
    pub employer_withdrawal: f64,
    pub basis_withdrawn: f64,
    pub paydown: f64,
}

impl AccountFlows {
    pub fn outflow(&self) -> f64 {
        self.withdrawal + self.employer_withdrawal
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TransitionContext<'a> {
    pub year: i32,
    pub ror: f64,
    pub inflation: f64,
    pub housing_appreciation: f64,
    pub expenses: &'a [Expense],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VestedDraw {
    pub user: f64,
    pub employer: f64,
    pub overdraft: f64,
}

impl VestedDraw {
    pub fn total(self) -> f64 {
        self.user + self.employer
    }
}

impl SavedAccount {
    pub fn advance(&self, flows: &AccountFlows) -> SavedAccount {
        let after_draw = (self.amount - flows.withdrawal).max(0.0);
        let amount = after_draw * (1.0 + self.apr / 100.0) + flows.contribution.max(0.0);
        SavedAccount {
            amount: amount.max(0.0),
            ..self.clone()
        }
    }
}

impl InvestedAccount {
    pub fn vested_fraction(&self) -> f64 {
        (self.tenure_years as f64 * self.vested_per_year.max(0.0)).min(1.0)
    }

    pub fn non_vested_amount(&self) -> f64 {
        self.employer_balance.max(0.0) * (1.0 - self.vested_fraction())
    }

    pub fn user_equity(&self) -> f64 {
        (self.amount - self.employer_balance.max(0.0)).max(0.0)
    }

    pub fn vested_employer_amount(&self) -> f64 {
        self.employer_balance.max(0.0).min(self.amount.max(0.0)) * self.vested_fraction()
    }

    pub fn withdrawable(&self) -> f64 {
        self.user_equity() + self.vested_employer_amount()
    }

    /// User equity is drained first; only the vested employer portion may
    /// cover the rest.
    pub fn split_withdrawal(&self, requested: f64) -> VestedDraw {
        let requested = requested.max(0.0);
        let user = requested.min(self.user_equity());
        let employer = (requested - user).min(self.vested_employer_amount()).max(0.0);
        VestedDraw {
            user,
            employer,
            overdraft: (requested - user - employer).max(0.0),
        }
    }

    pub fn growth_factor(&self, ror: f64, inflation: f64) -> f64 {
        (1.0 + (ror - self.expense_ratio + inflation) / 100.0).max(0.0)
    }

    pub fn gain_fraction(&self) -> f64 {
        if self.amount <= BALANCE_EPS {
            return 0.0;
        }
        (1.0 - self.cost_basis.max(0.0) / self.amount).clamp(0.0, 1.0)
    }

    pub fn advance(&self, flows: &AccountFlows, ctx: &TransitionContext<'_>) -> InvestedAccount {
        let growth = self.growth_factor(ctx.ror, ctx.inflation);
        let deposits = flows.contribution.max(0.0) + flows.employer_contribution.max(0.0);
        let amount = ((self.amount - flows.outflow() + deposits) * growth).max(0.0);
        let employer_balance = ((self.employer_balance - flows.employer_withdrawal
            + flows.employer_contribution.max(0.0))
            * growth)
            .max(0.0)
            .min(amount);
        let cost_basis = (self.cost_basis - flows.basis_withdrawn + deposits)
            .max(0.0)
            .min(amount);

        InvestedAccount {
            amount,
            employer_balance,
            cost_basis,
            tenure_years: self.tenure_years + 1,
            ..self.clone()
        }
    }
}

impl PropertyAccount {
    pub fn advance(&self, flows: &AccountFlows, ctx: &TransitionContext<'_>) -> PropertyAccount {
        let amount = match self.value_overrides.get(&ctx.year) {
            Some(value) => value.max(0.0),
            None => {
                (self.amount * (1.0 + (ctx.housing_appreciation + ctx.inflation) / 100.0)).max(0.0)
            }
        };

        let owed_amount = match self.loan_overrides.get(&ctx.year) {
            Some(balance) => balance.max(0.0),
            None if self.financing == Financing::Owned => 0.0,
            None => {
                let (apr, monthly_payment) = linked_payment(ctx, self.linked_expense_id.as_deref());
                let (balance, _) = amortize_year(self.owed_amount, apr, monthly_payment);
                (balance - flows.paydown).max(0.0)
            }
        };

        PropertyAccount {
            amount,
            owed_amount,
            ..self.clone()
        }
    }
}

impl DebtAccount {
    pub fn advance(&self, flows: &AccountFlows, ctx: &TransitionContext<'_>) -> DebtAccount {
        let amount = match self.balance_overrides.get(&ctx.year) {
            Some(balance) => balance.max(0.0),
            None => {
                let (_, monthly_payment) = linked_payment(ctx, self.linked_expense_id.as_deref());
                let interest = self.amount.max(0.0) * self.apr / 100.0;
                let payment = monthly_payment * 12.0;
                (self.amount - (payment - interest) - flows.paydown).max(0.0)
            }
        };

        DebtAccount {
            amount,
            ..self.clone()
        }
    }
}

impl DeficitDebtAccount {
    pub fn new(amount: f64) -> Self {
        Self {
            id: DEFICIT_DEBT_ID.to_string(),
            name: DEFICIT_DEBT_NAME.to_string(),
            amount: amount.max(0.0),
        }
    }

    pub fn settle(&self, new_shortfall: f64, paydown: f64) -> Option<DeficitDebtAccount> {
        let amount = self.amount + new_shortfall.max(0.0) - paydown.max(0.0);
        if amount <= BALANCE_EPS {
            None
        } else {
            Some(DeficitDebtAccount::new(amount))
        }
    }
}

impl Account {
    pub fn id(&self) -> &str {
        match self {
            Account::Saved(a) => &a.id,
            Account::Invested(a) => &a.id,
            Account::Property(a) => &a.id,
            Account::Debt(a) => &a.id,
            Account::DeficitDebt(a) => &a.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Account::Saved(a) => &a.name,
            Account::Invested(a) => &a.name,
            Account::Property(a) => &a.name,
            Account::Debt(a) => &a.name,
            Account::DeficitDebt(a) => &a.name,
        }
    }

    pub fn amount(&self) -> f64 {
        match self {
            Account::Saved(a) => a.amount,
            Account::Invested(a) => a.amount,
            Account::Property(a) => a.amount,
            Account::Debt(a) => a.amount,
            Account::DeficitDebt(a) => a.amount,
        }
    }

    pub fn is_liability(&self) -> bool {
        matches!(self, Account::Debt(_) | Account::DeficitDebt(_))
    }

    pub fn portfolio_value(&self) -> f64 {
        match self {
            Account::Saved(a) => a.amount.max(0.0),
            Account::Invested(a) => a.amount.max(0.0),
            _ => 0.0,
        }
    }

    pub fn net_worth_contribution(&self) -> f64 {
        match self {
            Account::Saved(a) => a.amount,
            Account::Invested(a) => a.amount,
            Account::Property(a) => a.amount - a.owed_amount,
            Account::Debt(a) => -a.amount,
            Account::DeficitDebt(a) => -a.amount,
        }
    }

    pub fn as_invested(&self) -> Option<&InvestedAccount> {
        match self {
            Account::Invested(a) => Some(a),
            _ => None,
        }
    }

    pub fn advance(&self, flows: &AccountFlows, ctx: &TransitionContext<'_>) -> Account {
        match self {
            Account::Saved(a) => Account::Saved(a.advance(flows)),
            Account::Invested(a) => Account::Invested(a.advance(flows, ctx)),
            Account::Property(a) => Account::Property(a.advance(flows, ctx)),
            Account::Debt(a) => Account::Debt(a.advance(flows, ctx)),
            Account::DeficitDebt(a) => Account::DeficitDebt(a.clone()),
        }
    }
}

pub fn net_worth(accounts: &[Account]) -> f64 {
    accounts.iter().map(Account::net_worth_contribution).sum()
}

pub fn portfolio_value(accounts: &[Account]) -> f64 {
    accounts.iter().map(Account::portfolio_value).sum()
}

pub fn find_account<'a>(accounts: &'a [Account], id: &str) -> Option<&'a Account> {
    accounts.iter().find(|a| a.id() == id)
}

pub fn deficit_debt_balance(accounts: &[Account]) -> f64 {
    accounts
        .iter()
        .filter_map(|a| match a {
            Account::DeficitDebt(d) => Some(d.amount),
            _ => None,
        })
        .sum()
}

pub fn amortize_year(balance: f64, apr: f64, monthly_payment: f64) -> (f64, f64) {
    let monthly_rate = apr.max(0.0) / 100.0 / 12.0;
    let mut balance = balance.max(0.0);
    let mut interest_paid = 0.0;
    for _ in 0..12 {
        if balance <= BALANCE_EPS {
            return (0.0, interest_paid);
        }
        let interest = balance * monthly_rate;
        interest_paid += interest;
        balance = (balance + interest - monthly_payment.max(0.0)).max(0.0);
    }
    (balance, interest_paid)
}

fn linked_payment(ctx: &TransitionContext<'_>, expense_id: Option<&str>) -> (f64, f64) {
    let Some(id) = expense_id else {
        return (0.0, 0.0);
    };
    ctx.expenses
        .iter()
        .find(|e| e.id() == id)
        .and_then(|e| e.loan_terms().map(|apr| (apr, e.annual_amount(ctx.year) / 12.0)))
        .unwrap_or((0.0, 0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::flows::{Expense, Frequency, LoanExpense};
    use proptest::prelude::{prop_assert, proptest};

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn ctx(ror: f64, expenses: &[Expense]) -> TransitionContext<'_> {
        TransitionContext {
            year: 2030,
            ror,
            inflation: 0.0,
            housing_appreciation: 3.0,
            expenses,
        }
    }

    fn matched_401k(employer_balance: f64, tenure_years: u32) -> InvestedAccount {
        InvestedAccount {
            id: "401k".to_string(),
            name: "Employer 401k".to_string(),
            amount: employer_balance,
            employer_balance,
            tenure_years,
            expense_ratio: 0.4,
            tax_type: TaxCharacter::Traditional,
            is_contribution_eligible: true,
            vested_per_year: 0.25,
            cost_basis: 0.0,
        }
    }

    #[test]
    fn saved_account_pays_interest_then_receives_deposit() {
        let saved = SavedAccount {
            id: "hysa".to_string(),
            name: "HYSA".to_string(),
            amount: 1_000.0,
            apr: 5.0,
        };
        let next = saved.advance(&AccountFlows {
            contribution: 500.0,
            ..AccountFlows::default()
        });
        assert_approx(next.amount, 1_550.0);
        assert_approx(saved.amount, 1_000.0);
    }

    #[test]
    fn vesting_shrinks_non_vested_amount_as_tenure_grows() {
        let flows = AccountFlows {
            employer_contribution: 5_000.0,
            ..AccountFlows::default()
        };
        let expenses = Vec::new();
        let ctx = ctx(7.0, &expenses);

        let year_one = matched_401k(10_000.0, 0).advance(&flows, &ctx);
        assert_eq!(year_one.tenure_years, 1);
        assert_approx(year_one.non_vested_amount(), 11_992.5);

        let year_two = year_one.advance(&flows, &ctx);
        assert_approx(year_two.employer_balance, 22_375.34);
        assert_approx(year_two.non_vested_amount(), 11_187.67);
    }

    #[test]
    fn split_withdrawal_drains_user_equity_before_vested_employer_funds() {
        let mut account = matched_401k(8_000.0, 2);
        account.amount = 10_000.0;

        let draw = account.split_withdrawal(3_000.0);
        assert_approx(draw.user, 2_000.0);
        assert_approx(draw.employer, 1_000.0);
        assert_approx(draw.overdraft, 0.0);

        let capped = account.split_withdrawal(20_000.0);
        assert_approx(capped.user, 2_000.0);
        assert_approx(capped.employer, 4_000.0);
        assert_approx(capped.overdraft, 14_000.0);
    }

    #[test]
    fn fully_vested_tenure_caps_fraction_at_one() {
        let account = matched_401k(1_000.0, 12);
        assert_approx(account.vested_fraction(), 1.0);
        assert_approx(account.non_vested_amount(), 0.0);
    }

    #[test]
    fn amortize_year_matches_closed_form() {
        let balance = 200_000.0;
        let apr = 6.0;
        let payment = 1_199.10;
        let (closing, _) = amortize_year(balance, apr, payment);

        let r: f64 = apr / 100.0 / 12.0;
        let growth = (1.0 + r).powi(12);
        let expected = balance * growth - payment * (growth - 1.0) / r;
        assert!((closing - expected).abs() < 1e-6);
        assert!(closing < balance);
    }

    #[test]
    fn debt_reduces_by_payment_net_of_interest() {
        let loan = Expense::Loan(LoanExpense {
            id: "car-loan".to_string(),
            name: "Car loan".to_string(),
            amount: 250.0,
            frequency: Frequency::Monthly,
            start_year: None,
            end_year: None,
            apr: 5.0,
            linked_account_id: Some("car".to_string()),
        });
        let expenses = vec![loan];
        let debt = DebtAccount {
            id: "car".to_string(),
            name: "Car".to_string(),
            amount: 10_000.0,
            apr: 5.0,
            linked_expense_id: Some("car-loan".to_string()),
            balance_overrides: BTreeMap::new(),
        };
        let next = debt.advance(&AccountFlows::default(), &ctx(0.0, &expenses));
        assert_approx(next.amount, 7_500.0);
    }

    #[test]
    fn debt_override_sets_balance_directly() {
        let mut overrides = BTreeMap::new();
        overrides.insert(2030, 0.0);
        let debt = DebtAccount {
            id: "student".to_string(),
            name: "Student loan".to_string(),
            amount: 25_000.0,
            apr: 4.0,
            linked_expense_id: None,
            balance_overrides: overrides,
        };
        let expenses = Vec::new();
        let next = debt.advance(&AccountFlows::default(), &ctx(0.0, &expenses));
        assert_approx(next.amount, 0.0);
    }

    #[test]
    fn owned_property_appreciates_without_loan() {
        let home = PropertyAccount {
            id: "home".to_string(),
            name: "Home".to_string(),
            amount: 400_000.0,
            financing: Financing::Owned,
            owed_amount: 0.0,
            loan_amount: 0.0,
            linked_expense_id: None,
            value_overrides: BTreeMap::new(),
            loan_overrides: BTreeMap::new(),
        };
        let expenses = Vec::new();
        let next = home.advance(&AccountFlows::default(), &ctx(0.0, &expenses));
        assert_approx(next.amount, 412_000.0);
        assert_approx(next.owed_amount, 0.0);
    }

    #[test]
    fn deficit_debt_is_removed_when_fully_repaid() {
        let debt = DeficitDebtAccount::new(1_000.0);
        assert!(debt.settle(0.0, 1_000.0).is_none());
        let grown = debt.settle(250.0, 0.0).expect("still outstanding");
        assert_eq!(grown.id, DEFICIT_DEBT_ID);
        assert_approx(grown.amount, 1_250.0);
    }

    #[test]
    fn net_worth_subtracts_debts_and_property_loans() {
        let accounts = vec![
            Account::Saved(SavedAccount {
                id: "s".to_string(),
                name: "s".to_string(),
                amount: 10_000.0,
                apr: 0.0,
            }),
            Account::Property(PropertyAccount {
                id: "p".to_string(),
                name: "p".to_string(),
                amount: 300_000.0,
                financing: Financing::Mortgage,
                owed_amount: 200_000.0,
                loan_amount: 240_000.0,
                linked_expense_id: None,
                value_overrides: BTreeMap::new(),
                loan_overrides: BTreeMap::new(),
            }),
            Account::DeficitDebt(DeficitDebtAccount::new(5_000.0)),
        ];
        assert_approx(net_worth(&accounts), 105_000.0);
        assert_approx(portfolio_value(&accounts), 10_000.0);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(64))]

        #[test]
        fn prop_invested_advance_is_finite_and_non_negative(
            amount in 0u32..2_000_000,
            employer_share in 0u32..101,
            tenure in 0u32..10,
            withdrawal in 0u32..3_000_000,
            ror_bp in -9_000i32..3_000,
        ) {
            let mut account = matched_401k(0.0, tenure);
            account.amount = amount as f64;
            account.employer_balance = account.amount * employer_share as f64 / 100.0;
            let draw = account.split_withdrawal(withdrawal as f64);
            let flows = AccountFlows {
                withdrawal: draw.user,
                employer_withdrawal: draw.employer,
                ..AccountFlows::default()
            };
            let expenses = Vec::new();
            let next = account.advance(&flows, &ctx(ror_bp as f64 / 100.0, &expenses));
            prop_assert!(next.amount.is_finite() && next.amount >= 0.0);
            prop_assert!(next.employer_balance >= 0.0 && next.employer_balance <= next.amount + 1e-9);
            prop_assert!(next.non_vested_amount().is_finite());
            prop_assert!(draw.total() <= account.withdrawable() + 1e-9);
        }
    }
}
