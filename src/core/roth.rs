use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::account::{Account, InvestedAccount, TaxCharacter};
use super::tax::{TaxOracle, TaxState};

const CONVERSION_EPS: f64 = 0.005;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RothConversion {
    pub amount: f64,
    pub from_account_ids: BTreeMap<String, f64>,
    pub to_account_ids: BTreeMap<String, f64>,
}

/// Splits `amount` over `weights`; the last entry takes whatever the others
/// leave so the parts always sum to `amount`. Equal split when every weight
/// is zero.
fn distribute(amount: f64, weights: &[(&str, f64)]) -> BTreeMap<String, f64> {
    let mut parts = BTreeMap::new();
    let Some(((last_id, _), rest)) = weights.split_last() else {
        return parts;
    };
    let total: f64 = weights.iter().map(|(_, w)| w.max(0.0)).sum();
    let share = |w: f64| {
        if total > CONVERSION_EPS {
            w.max(0.0) / total
        } else {
            1.0 / weights.len() as f64
        }
    };

    let mut assigned = 0.0;
    for (id, weight) in rest {
        let part = (amount * share(*weight)).min(amount - assigned).max(0.0);
        assigned += part;
        *parts.entry((*id).to_string()).or_insert(0.0) += part;
    }
    *parts.entry((*last_id).to_string()).or_insert(0.0) += (amount - assigned).max(0.0);
    parts
}

fn invested_of(accounts: &[Account], tax_type: TaxCharacter) -> Vec<&InvestedAccount> {
    accounts
        .iter()
        .filter_map(Account::as_invested)
        .filter(|a| a.tax_type == tax_type)
        .collect()
}

pub fn plan_conversion(
    accounts: &[Account],
    ordinary_income: f64,
    oracle: &dyn TaxOracle,
    tax_state: &TaxState,
    year: i32,
) -> Option<RothConversion> {
    let ceiling = oracle.ordinary_bracket_ceiling(ordinary_income, tax_state, year)?;
    conversion_of(accounts, ceiling - ordinary_income.max(0.0))
}

pub fn conversion_of(accounts: &[Account], amount: f64) -> Option<RothConversion> {
    if amount.is_nan() {
        return None;
    }
    let sources = invested_of(accounts, TaxCharacter::Traditional);
    let destinations = invested_of(accounts, TaxCharacter::Roth);
    if sources.is_empty() || destinations.is_empty() {
        return None;
    }

    let convertible: f64 = sources.iter().map(|a| a.withdrawable()).sum();
    let amount = amount.min(convertible);
    if !amount.is_finite() || amount <= CONVERSION_EPS {
        return None;
    }

    let from_weights: Vec<(&str, f64)> = sources
        .iter()
        .map(|a| (a.id.as_str(), a.withdrawable()))
        .collect();
    let to_weights: Vec<(&str, f64)> = destinations
        .iter()
        .map(|a| (a.id.as_str(), a.amount.max(0.0)))
        .collect();

    Some(RothConversion {
        amount,
        from_account_ids: distribute(amount, &from_weights),
        to_account_ids: distribute(amount, &to_weights),
    })
}

pub fn apply_conversion(accounts: &[Account], conversion: &RothConversion) -> Vec<Account> {
    accounts
        .iter()
        .map(|account| {
            let Account::Invested(a) = account else {
                return account.clone();
            };
            if let Some(out) = conversion.from_account_ids.get(&a.id) {
                let draw = a.split_withdrawal(*out);
                return Account::Invested(InvestedAccount {
                    amount: (a.amount - draw.total()).max(0.0),
                    employer_balance: (a.employer_balance - draw.employer).max(0.0),
                    cost_basis: a.cost_basis.min((a.amount - draw.total()).max(0.0)),
                    ..a.clone()
                });
            }
            if let Some(deposit) = conversion.to_account_ids.get(&a.id) {
                return Account::Invested(InvestedAccount {
                    amount: a.amount + deposit.max(0.0),
                    cost_basis: a.cost_basis + deposit.max(0.0),
                    ..a.clone()
                });
            }
            account.clone()
        })
        .collect()
}
