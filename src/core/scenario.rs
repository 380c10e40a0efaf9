use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use log::warn;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::account::{Account, DeficitDebtAccount};
use super::error::ScenarioError;
use super::flows::{Expense, Income};
use super::simulation::{SimulationEnv, run_simulation};
use super::tax::{BracketTaxOracle, TaxOracle, TaxState};
use super::types::{Assumptions, Priority, SimulationYear};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Scenario {
    pub accounts: Vec<Account>,
    pub incomes: Vec<Income>,
    pub expenses: Vec<Expense>,
    pub assumptions: Assumptions,
    pub tax_state: TaxState,
    pub tax_schedule: BracketTaxOracle,
}

fn describe(value: &Value) -> String {
    let class = value
        .get("className")
        .and_then(Value::as_str)
        .unwrap_or("<no className>");
    let id = value.get("id").and_then(Value::as_str).unwrap_or("<no id>");
    format!("{class} {id}")
}

fn reconstruct<T: DeserializeOwned>(kind: &str, value: &Value) -> Option<T> {
    match T::deserialize(value) {
        Ok(item) => Some(item),
        Err(err) => {
            warn!("Dropping {kind} {}: {err}", describe(value));
            None
        }
    }
}

pub fn reconstruct_account(value: &Value) -> Option<Account> {
    match reconstruct("account", value)? {
        Account::DeficitDebt(debt) => Some(Account::DeficitDebt(DeficitDebtAccount::new(
            debt.amount,
        ))),
        account => Some(account),
    }
}

pub fn reconstruct_income(value: &Value) -> Option<Income> {
    reconstruct("income", value)
}

pub fn reconstruct_expense(value: &Value) -> Option<Expense> {
    reconstruct("expense", value)
}

fn collection<T>(raw: Option<&Value>, rebuild: impl Fn(&Value) -> Option<T>) -> Vec<T> {
    match raw {
        Some(Value::Array(items)) => items.iter().filter_map(rebuild).collect(),
        Some(Value::Null) | None => Vec::new(),
        Some(_) => {
            warn!("Expected an array; collection ignored");
            Vec::new()
        }
    }
}

fn merge_section<T>(name: &str, raw: Option<&Value>) -> T
where
    T: Serialize + DeserializeOwned + Default,
{
    let Some(raw) = raw else {
        return T::default();
    };
    if let Ok(section) = T::deserialize(raw) {
        return section;
    }
    let Value::Object(fields) = raw else {
        warn!("{name} is not an object; using defaults");
        return T::default();
    };
    let Ok(Value::Object(mut merged)) = serde_json::to_value(T::default()) else {
        return T::default();
    };

    for (key, field) in fields {
        let mut candidate = merged.clone();
        candidate.insert(key.clone(), field.clone());
        if T::deserialize(&Value::Object(candidate.clone())).is_ok() {
            merged = candidate;
        } else {
            warn!("{name}.{key} is malformed; using default");
        }
    }
    T::deserialize(&Value::Object(merged)).unwrap_or_default()
}

pub fn reconstruct_assumptions(raw: Option<&Value>) -> Assumptions {
    let Some(raw) = raw else {
        return Assumptions::default();
    };
    let Value::Object(fields) = raw else {
        warn!("assumptions is not an object; using defaults");
        return Assumptions::default();
    };
    let section = |key: &str| fields.get(key);

    Assumptions {
        macro_: merge_section("assumptions.macro", section("macro")),
        income: merge_section("assumptions.income", section("income")),
        expenses: merge_section("assumptions.expenses", section("expenses")),
        investments: merge_section("assumptions.investments", section("investments")),
        demographics: merge_section("assumptions.demographics", section("demographics")),
        withdrawal_rules: merge_section("assumptions.withdrawalRules", section("withdrawalRules")),
        priorities: collection(section("priorities"), |v| reconstruct::<Priority>("priority", v)),
        withdrawal_order: collection(section("withdrawalStrategy"), |v| {
            let id = v.as_str().map(str::to_string);
            if id.is_none() {
                warn!("Dropping non-string withdrawal order entry {v}");
            }
            id
        }),
    }
}

impl Scenario {
    /// Rebuilds a scenario from persisted JSON. Never fails: unreadable
    /// input yields the default scenario, bad entries are dropped and bad
    /// fields fall back to defaults.
    pub fn from_json(text: &str) -> Scenario {
        match serde_json::from_str::<Value>(text) {
            Ok(value) => Scenario::from_value(&value),
            Err(err) => {
                warn!("Scenario is not valid JSON ({err}); using defaults");
                Scenario::default()
            }
        }
    }

    pub fn from_value(value: &Value) -> Scenario {
        let empty = Map::new();
        let fields = match value {
            Value::Object(fields) => fields,
            _ => {
                warn!("Scenario is not an object; using defaults");
                &empty
            }
        };
        Scenario {
            accounts: collection(fields.get("accounts"), reconstruct_account),
            incomes: collection(fields.get("incomes"), reconstruct_income),
            expenses: collection(fields.get("expenses"), reconstruct_expense),
            assumptions: reconstruct_assumptions(fields.get("assumptions")),
            tax_state: merge_section("taxState", fields.get("taxState")),
            tax_schedule: merge_section("taxSchedule", fields.get("taxSchedule")),
        }
    }

    pub fn load(path: &Path) -> Result<Scenario, ScenarioError> {
        let text = fs::read_to_string(path).map_err(|source| ScenarioError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Scenario::from_json(&text))
    }

    pub fn to_json(&self, pretty: bool) -> Result<String, ScenarioError> {
        let text = if pretty {
            serde_json::to_string_pretty(self)?
        } else {
            serde_json::to_string(self)?
        };
        Ok(text)
    }

    pub fn validate(&self) -> Result<(), ScenarioError> {
        let mut ids = BTreeSet::new();
        for account in &self.accounts {
            if !ids.insert(account.id()) {
                return Err(ScenarioError::DuplicateAccountId(account.id().to_string()));
            }
            let amount = account.amount();
            if !amount.is_finite() || amount < 0.0 {
                return Err(ScenarioError::InvalidAmount {
                    field: format!("accounts.{}.amount", account.id()),
                    value: amount,
                });
            }
        }
        for income in &self.incomes {
            let amount = income.annual_amount(self.assumptions.demographics.start_year);
            if !amount.is_finite() || amount < 0.0 {
                return Err(ScenarioError::InvalidAmount {
                    field: format!("incomes.{}.amount", income.id()),
                    value: amount,
                });
            }
        }
        for expense in &self.expenses {
            let amount = expense.annual_amount(self.assumptions.demographics.start_year);
            if !amount.is_finite() || amount < 0.0 {
                return Err(ScenarioError::InvalidAmount {
                    field: format!("expenses.{}.amount", expense.id()),
                    value: amount,
                });
            }
        }

        let assumptions = &self.assumptions;
        if let Some(unknown) = assumptions
            .withdrawal_order
            .iter()
            .find(|id| !ids.contains(id.as_str()))
        {
            return Err(ScenarioError::UnknownWithdrawalAccount(unknown.clone()));
        }
        if let Some(priority) = assumptions
            .priorities
            .iter()
            .find(|p| !ids.contains(p.account_id.as_str()))
        {
            return Err(ScenarioError::UnknownPriorityAccount {
                priority: priority.id.clone(),
                account: priority.account_id.clone(),
            });
        }

        let demographics = &assumptions.demographics;
        let start_age = assumptions.start_age();
        if demographics.life_expectancy <= start_age {
            return Err(ScenarioError::LifeExpectancyBeforeStart {
                start_age,
                life_expectancy: demographics.life_expectancy,
            });
        }
        if demographics.retirement_age > demographics.life_expectancy {
            return Err(ScenarioError::RetirementAfterLifeExpectancy {
                retirement_age: demographics.retirement_age,
                life_expectancy: demographics.life_expectancy,
            });
        }
        let rate = assumptions.investments.withdrawal_rate;
        if !rate.is_finite() || rate <= 0.0 || rate > 100.0 {
            return Err(ScenarioError::InvalidWithdrawalRate(rate));
        }
        Ok(())
    }

    pub fn env<'a>(&'a self, oracle: &'a dyn TaxOracle) -> SimulationEnv<'a> {
        SimulationEnv {
            assumptions: &self.assumptions,
            tax_state: &self.tax_state,
            oracle,
        }
    }

    pub fn project(&self, years: u32) -> Vec<SimulationYear> {
        run_simulation(
            years,
            &self.accounts,
            &self.incomes,
            &self.expenses,
            &self.env(&self.tax_schedule),
            &[],
        )
    }
}
