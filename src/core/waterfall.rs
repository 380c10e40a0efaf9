use log::warn;
use serde::{Deserialize, Serialize};

use super::account::{Account, InvestedAccount, TaxCharacter};
use super::tax::{TaxOracle, TaxRequest, TaxResult, TaxState};
use super::types::WithdrawalRules;

pub const SOLVER_TOLERANCE: f64 = 0.005;
pub const SOLVER_MAX_ITERATIONS: usize = 100;

const DRAIN_EPS: f64 = 0.005;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TaxBase {
    pub ordinary_income: f64,
    pub capital_gains: f64,
    pub earned_income: f64,
}

impl TaxBase {
    fn plus(self, ordinary: f64, gains: f64) -> TaxBase {
        TaxBase {
            ordinary_income: self.ordinary_income + ordinary,
            capital_gains: self.capital_gains + gains,
            ..self
        }
    }

    pub fn taxes(&self, oracle: &dyn TaxOracle, tax_state: &TaxState, year: i32) -> TaxResult {
        oracle.compute_taxes(&TaxRequest {
            ordinary_income: self.ordinary_income,
            capital_gains: self.capital_gains,
            earned_income: self.earned_income,
            tax_state,
            year,
        })
    }
}

pub struct WaterfallContext<'a> {
    pub oracle: &'a dyn TaxOracle,
    pub tax_state: &'a TaxState,
    pub year: i32,
    pub age: f64,
    pub rules: &'a WithdrawalRules,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Withdrawal {
    pub account_id: String,
    pub gross: f64,
    pub net: f64,
    pub tax: f64,
    pub penalty: f64,
    pub ordinary_income: f64,
    pub capital_gains: f64,
    pub basis_withdrawn: f64,
    pub employer_portion: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WaterfallOutcome {
    pub withdrawals: Vec<Withdrawal>,
    pub shortfall: f64,
    pub base: TaxBase,
    pub logs: Vec<String>,
}

impl WaterfallOutcome {
    pub fn total_gross(&self) -> f64 {
        self.withdrawals.iter().map(|w| w.gross).sum()
    }

    pub fn total_penalty(&self) -> f64 {
        self.withdrawals.iter().map(|w| w.penalty).sum()
    }
}

pub fn default_withdrawal_order(accounts: &[Account]) -> Vec<String> {
    let rank = |account: &Account| match account {
        Account::Saved(_) => Some(0),
        Account::Invested(a) => Some(match a.tax_type {
            TaxCharacter::Brokerage => 1,
            TaxCharacter::Traditional => 2,
            TaxCharacter::Roth => 3,
        }),
        _ => None,
    };
    let mut ranked: Vec<(usize, &str)> = accounts
        .iter()
        .filter_map(|a| rank(a).map(|r| (r, a.id())))
        .collect();
    ranked.sort_by_key(|(r, _)| *r);
    ranked.into_iter().map(|(_, id)| id.to_string()).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GainTreatment {
    CapitalGains,
    Ordinary,
    Exempt,
}

#[derive(Debug, Clone, Copy)]
struct DrawProfile {
    available: f64,
    basis_first: f64,
    gain_fraction: f64,
    gain_treatment: GainTreatment,
    fully_ordinary: bool,
    penalty_rate: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct DrawTax {
    ordinary: f64,
    gains: f64,
    basis: f64,
    penalty: f64,
}

impl DrawProfile {
    fn for_account(account: &Account, ctx: &WaterfallContext<'_>) -> Option<DrawProfile> {
        let early = ctx.age < ctx.rules.threshold_age;
        match account {
            Account::Saved(a) => Some(DrawProfile {
                available: a.amount.max(0.0),
                basis_first: 0.0,
                gain_fraction: 0.0,
                gain_treatment: GainTreatment::CapitalGains,
                fully_ordinary: false,
                penalty_rate: 0.0,
            }),
            Account::Invested(a) => Some(Self::for_invested(a, early, ctx.rules)),
            _ => None,
        }
    }

    fn for_invested(a: &InvestedAccount, early: bool, rules: &WithdrawalRules) -> DrawProfile {
        let available = a.withdrawable();
        match a.tax_type {
            TaxCharacter::Traditional => DrawProfile {
                available,
                basis_first: 0.0,
                gain_fraction: 0.0,
                gain_treatment: GainTreatment::CapitalGains,
                fully_ordinary: true,
                penalty_rate: if early {
                    rules.early_withdrawal_penalty.max(0.0) / 100.0
                } else {
                    0.0
                },
            },
            TaxCharacter::Roth => DrawProfile {
                available,
                basis_first: a.cost_basis.clamp(0.0, available),
                gain_fraction: 1.0,
                gain_treatment: if early {
                    GainTreatment::Ordinary
                } else {
                    GainTreatment::Exempt
                },
                fully_ordinary: false,
                penalty_rate: 0.0,
            },
            TaxCharacter::Brokerage => DrawProfile {
                available,
                basis_first: 0.0,
                gain_fraction: a.gain_fraction(),
                gain_treatment: GainTreatment::CapitalGains,
                fully_ordinary: false,
                penalty_rate: 0.0,
            },
        }
    }

    fn classify(&self, gross: f64) -> DrawTax {
        if self.fully_ordinary {
            return DrawTax {
                ordinary: gross,
                gains: 0.0,
                basis: 0.0,
                penalty: gross * self.penalty_rate,
            };
        }
        let from_basis = gross.min(self.basis_first);
        let rest = gross - from_basis;
        let gain = rest * self.gain_fraction;
        let basis = from_basis + (rest - gain);
        let (ordinary, gains) = match self.gain_treatment {
            GainTreatment::Ordinary => (gain, 0.0),
            GainTreatment::CapitalGains => (0.0, gain),
            GainTreatment::Exempt => (0.0, 0.0),
        };
        DrawTax {
            ordinary,
            gains,
            basis,
            penalty: 0.0,
        }
    }
}

struct NetFn<'a, 'b> {
    profile: DrawProfile,
    base: TaxBase,
    base_tax: f64,
    ctx: &'a WaterfallContext<'b>,
}

impl NetFn<'_, '_> {
    fn eval(&self, gross: f64) -> (f64, f64, DrawTax) {
        let split = self.profile.classify(gross);
        let tax = self
            .base
            .plus(split.ordinary, split.gains)
            .taxes(self.ctx.oracle, self.ctx.tax_state, self.ctx.year)
            .total();
        let delta = (tax - self.base_tax).max(0.0);
        (gross - delta - split.penalty, delta, split)
    }
}

/// Bisects for the gross draw whose net proceeds cover `need`.
/// Returns the upper bracket so the net never falls short by more than
/// the tolerance.
fn solve_gross(net_fn: &NetFn<'_, '_>, need: f64, available: f64, account_id: &str) -> f64 {
    let mut lo = 0.0;
    let mut hi = available;
    for _ in 0..SOLVER_MAX_ITERATIONS {
        if hi - lo <= SOLVER_TOLERANCE {
            return hi;
        }
        let mid = (lo + hi) * 0.5;
        let (net, _, _) = net_fn.eval(mid);
        if net < need {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    warn!(
        "gross-up for account {account_id} did not converge after {SOLVER_MAX_ITERATIONS} iterations"
    );
    hi.min(available)
}

/// Funds `deficit` by drawing from `order` in sequence. Whatever the listed
/// accounts cannot cover is returned as `shortfall`.
pub fn solve_deficit(
    deficit: f64,
    accounts: &[Account],
    order: &[String],
    base: TaxBase,
    ctx: &WaterfallContext<'_>,
) -> WaterfallOutcome {
    let mut outcome = WaterfallOutcome {
        base,
        ..WaterfallOutcome::default()
    };
    let mut need = deficit.max(0.0);
    let mut visited: Vec<&str> = Vec::new();

    for id in order {
        if need <= DRAIN_EPS {
            break;
        }
        if visited.contains(&id.as_str()) {
            continue;
        }
        visited.push(id);

        let Some(account) = accounts.iter().find(|a| a.id() == id) else {
            outcome
                .logs
                .push(format!("Withdrawal order skipped unknown account {id}"));
            continue;
        };
        let Some(profile) = DrawProfile::for_account(account, ctx) else {
            outcome
                .logs
                .push(format!("Account {id} cannot fund withdrawals"));
            continue;
        };
        if profile.available <= DRAIN_EPS {
            continue;
        }

        let net_fn = NetFn {
            profile,
            base: outcome.base,
            base_tax: outcome.base.taxes(ctx.oracle, ctx.tax_state, ctx.year).total(),
            ctx,
        };
        let (max_net, _, _) = net_fn.eval(profile.available);
        let gross = if max_net <= need + SOLVER_TOLERANCE {
            outcome.logs.push(format!(
                "Drained {id}: {:.2} gross covers {:.2} of {:.2} needed",
                profile.available,
                max_net.max(0.0),
                need
            ));
            profile.available
        } else {
            solve_gross(&net_fn, need, profile.available, id)
        };

        let (net, tax, split) = net_fn.eval(gross);
        let employer_portion = match account {
            Account::Invested(a) => a.split_withdrawal(gross).employer,
            _ => 0.0,
        };
        outcome.base = outcome.base.plus(split.ordinary, split.gains);
        need = (need - net.max(0.0)).max(0.0);
        outcome.withdrawals.push(Withdrawal {
            account_id: id.clone(),
            gross,
            net,
            tax,
            penalty: split.penalty,
            ordinary_income: split.ordinary,
            capital_gains: split.gains,
            basis_withdrawn: split.basis,
            employer_portion,
        });
    }

    if need > DRAIN_EPS {
        outcome.logs.push(format!(
            "Unfunded deficit of {need:.2} added to deficit debt"
        ));
        outcome.shortfall = need;
    }
    outcome
}
