use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::account::{Account, deficit_debt_balance, find_account};
use super::types::{BucketKind, CapPolicy, Priority};

const ALLOC_EPS: f64 = 0.005;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Allocation {
    pub priority_id: String,
    pub account_id: String,
    pub bucket: BucketKind,
    pub amount: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AllocationOutcome {
    pub deficit_paydown: f64,
    pub allocations: Vec<Allocation>,
    pub unallocated: f64,
    pub logs: Vec<String>,
}

impl AllocationOutcome {
    pub fn allocated_to(&self, account_id: &str) -> f64 {
        self.allocations
            .iter()
            .filter(|a| a.account_id == account_id)
            .map(|a| a.amount)
            .sum()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AllocationContext<'a> {
    pub annual_expenses: f64,
    pub contributed: &'a BTreeMap<String, f64>,
}

fn bucket_matches(bucket: BucketKind, account: &Account) -> Result<(), String> {
    match (bucket, account) {
        (BucketKind::Debt, Account::Debt(_) | Account::Property(_)) => Ok(()),
        (BucketKind::Investment, Account::Invested(a)) if a.is_contribution_eligible => Ok(()),
        (BucketKind::Investment, Account::Invested(_)) => {
            Err("is not contribution-eligible".to_string())
        }
        (BucketKind::Savings, Account::Saved(_)) => Ok(()),
        _ => Err(format!("cannot receive a {bucket:?} allocation")),
    }
}

fn outstanding(account: &Account) -> f64 {
    match account {
        Account::Debt(d) => d.amount.max(0.0),
        Account::Property(p) => p.owed_amount.max(0.0),
        _ => f64::INFINITY,
    }
}

pub fn allocate_surplus(
    surplus: f64,
    accounts: &[Account],
    priorities: &[Priority],
    ctx: &AllocationContext<'_>,
) -> AllocationOutcome {
    let mut outcome = AllocationOutcome::default();
    let mut remaining = surplus.max(0.0);

    let deficit_debt = deficit_debt_balance(accounts);
    if deficit_debt > 0.0 && remaining > 0.0 {
        let paydown = remaining.min(deficit_debt);
        remaining -= paydown;
        outcome.deficit_paydown = paydown;
        outcome
            .logs
            .push(format!("Paid {paydown:.2} toward deficit debt"));
    }

    let mut given: BTreeMap<&str, f64> = BTreeMap::new();
    for priority in priorities {
        if remaining <= ALLOC_EPS {
            break;
        }
        let Some(account) = find_account(accounts, &priority.account_id) else {
            outcome.logs.push(format!(
                "Priority {} skipped: unknown account {}",
                priority.id, priority.account_id
            ));
            continue;
        };
        if let Err(reason) = bucket_matches(priority.bucket, account) {
            outcome.logs.push(format!(
                "Priority {} skipped: account {} {reason}",
                priority.id, priority.account_id
            ));
            continue;
        }

        let already = given.get(account.id()).copied().unwrap_or(0.0);
        let room = match &priority.cap {
            CapPolicy::Max { amount } => {
                let contributed = ctx.contributed.get(account.id()).copied().unwrap_or(0.0);
                amount - contributed - already
            }
            CapPolicy::Fixed { monthly } => monthly * 12.0,
            CapPolicy::Remainder => remaining,
            CapPolicy::MultipleOfExpenses { months } => {
                let target = ctx.annual_expenses / 12.0 * months;
                target - account.amount() - already
            }
        };
        let mut amount = room.max(0.0).min(remaining);
        if priority.bucket == BucketKind::Debt {
            amount = amount.min((outstanding(account) - already).max(0.0));
        }
        if amount <= ALLOC_EPS {
            continue;
        }

        remaining -= amount;
        *given.entry(account.id()).or_insert(0.0) += amount;
        outcome.allocations.push(Allocation {
            priority_id: priority.id.clone(),
            account_id: priority.account_id.clone(),
            bucket: priority.bucket,
            amount,
        });
    }

    outcome.unallocated = remaining.max(0.0);
    if outcome.unallocated > ALLOC_EPS {
        outcome.logs.push(format!(
            "Unallocated surplus of {:.2} kept as discretionary cash",
            outcome.unallocated
        ));
    }
    outcome
}
