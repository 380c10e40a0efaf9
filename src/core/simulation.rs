use std::collections::BTreeMap;

use log::debug;

use super::account::{
    Account, AccountFlows, DeficitDebtAccount, Financing, TransitionContext, find_account,
    net_worth, portfolio_value,
};
use super::allocator::{AllocationContext, AllocationOutcome, allocate_surplus};
use super::flows::{Expense, Income, discretionary_expenses, total_annual_expenses};
use super::guyton_klinger::{Guardrail, StrategyInput, StrategyOutcome, evaluate_strategy};
use super::roth::{RothConversion, apply_conversion, conversion_of, plan_conversion};
use super::social_security::{
    TAXABLE_BENEFIT_SHARE, earnings_history, earnings_test_withholding, estimate_benefit,
    full_retirement_age_months, index_factor,
};
use super::tax::{TaxOracle, TaxState};
use super::types::{Assumptions, Cashflow, SimulationYear, TaxBreakdown};
use super::waterfall::{
    TaxBase, WaterfallContext, WaterfallOutcome, default_withdrawal_order, solve_deficit,
};

const CASH_EPS: f64 = 0.005;
const CONVERSION_TOLERANCE: f64 = 0.01;
const CONVERSION_SEARCH_STEPS: usize = 40;

#[derive(Clone, Copy)]
pub struct SimulationEnv<'a> {
    pub assumptions: &'a Assumptions,
    pub tax_state: &'a TaxState,
    pub oracle: &'a dyn TaxOracle,
}

pub fn baseline_year(
    accounts: &[Account],
    incomes: &[Income],
    expenses: &[Expense],
    env: &SimulationEnv<'_>,
) -> SimulationYear {
    let assumptions = env.assumptions;
    let year = assumptions.demographics.start_year;
    SimulationYear {
        year,
        age: assumptions.start_age(),
        accounts: accounts.to_vec(),
        incomes: incomes.to_vec(),
        expenses: expenses.to_vec(),
        cashflow: Cashflow {
            total_income: incomes.iter().map(|i| i.annual_amount(year)).sum(),
            total_expense: total_annual_expenses(expenses, year),
            discretionary_expense: discretionary_expenses(expenses, year),
            ..Cashflow::default()
        },
        taxes: TaxBreakdown::default(),
        net_worth: net_worth(accounts),
        logs: vec!["Baseline year".to_string()],
        strategy_withdrawal: None,
        strategy_adjustment: None,
        roth_conversion: None,
    }
}

#[derive(Debug, Default)]
struct Payroll {
    wages: f64,
    pre_tax: f64,
    roth: f64,
    employer_match: f64,
    insurance: f64,
}

fn first_eligible<'a>(
    accounts: &'a [Account],
    tax_type: super::account::TaxCharacter,
) -> Option<&'a str> {
    accounts
        .iter()
        .filter_map(Account::as_invested)
        .find(|a| a.is_contribution_eligible && a.tax_type == tax_type)
        .map(|a| a.id.as_str())
}

fn route_payroll(
    incomes: &[Income],
    accounts: &[Account],
    year: i32,
    retired: bool,
    flows: &mut BTreeMap<String, AccountFlows>,
    logs: &mut Vec<String>,
) -> Payroll {
    use super::account::TaxCharacter;

    let mut payroll = Payroll::default();
    if retired {
        return payroll;
    }
    for income in incomes {
        let Income::Work(work) = income else { continue };
        if !income.is_active(year) {
            continue;
        }
        payroll.wages += income.annual_amount(year);
        payroll.pre_tax += work.pre_tax_contribution.max(0.0);
        payroll.roth += work.roth_contribution.max(0.0);
        payroll.employer_match += work.employer_match.max(0.0);
        payroll.insurance += work.insurance.max(0.0);
    }

    if payroll.pre_tax + payroll.employer_match > 0.0 {
        match first_eligible(accounts, TaxCharacter::Traditional) {
            Some(id) => {
                let entry = flows.entry(id.to_string()).or_default();
                entry.contribution += payroll.pre_tax;
                entry.employer_contribution += payroll.employer_match;
            }
            None => {
                logs.push(
                    "No contribution-eligible Traditional account; pre-tax contribution skipped"
                        .to_string(),
                );
                payroll.pre_tax = 0.0;
                payroll.employer_match = 0.0;
            }
        }
    }
    if payroll.roth > 0.0 {
        match first_eligible(accounts, TaxCharacter::Roth) {
            Some(id) => flows.entry(id.to_string()).or_default().contribution += payroll.roth,
            None => {
                logs.push(
                    "No contribution-eligible Roth account; Roth contribution skipped".to_string(),
                );
                payroll.roth = 0.0;
            }
        }
    }
    payroll
}

fn resolve_social_security(
    year: i32,
    incomes: Vec<Income>,
    wages: f64,
    prior_years: &[SimulationYear],
    assumptions: &Assumptions,
    logs: &mut Vec<String>,
) -> (Vec<Income>, f64) {
    let age = assumptions.age_in(year);
    let birth_year = assumptions.birth_year();
    let fra = full_retirement_age_months(birth_year);
    let factor = index_factor(assumptions, year);
    let mut withheld = 0.0;

    let incomes = incomes
        .into_iter()
        .map(|income| {
            let mut ss = match income {
                Income::SocialSecurity(ss) => ss,
                other => return other,
            };
            let claiming_age = ss
                .claiming_age
                .unwrap_or(assumptions.income.social_security_start_age);
            if ss.monthly_benefit.is_none() && age >= claiming_age.clamp(62, 70) {
                let history = earnings_history(prior_years, &ss.earnings_history, assumptions, year);
                let estimate = estimate_benefit(&history, birth_year, claiming_age, factor);
                logs.push(format!(
                    "Social Security benefit calculated: AIME {:.2}, PIA {:.2}, {:.2}/month at age {}",
                    estimate.aime, estimate.pia, estimate.monthly_benefit, estimate.claiming_age
                ));
                ss.monthly_benefit = Some(estimate.monthly_benefit);
            }

            let income = Income::SocialSecurity(ss);
            let annual = income.annual_amount(year);
            let held = earnings_test_withholding(annual, wages, age, fra, factor);
            if held > 0.0 {
                logs.push(format!(
                    "Social Security earnings test withheld {held:.2} of {annual:.2}"
                ));
                withheld += held;
            }
            income
        })
        .collect();
    (incomes, withheld)
}

fn cap_linked_payment(expense: &Expense, accounts: &[Account], year: i32) -> Expense {
    let (Some(apr), Some(link)) = (expense.loan_terms(), expense.linked_account_id()) else {
        return expense.clone();
    };
    let balance = match find_account(accounts, link) {
        Some(Account::Debt(d)) => d.amount,
        Some(Account::Property(p)) if p.financing == Financing::Mortgage => p.owed_amount,
        Some(Account::Property(_)) => 0.0,
        _ => return expense.clone(),
    };
    expense.capped_annual(year, balance.max(0.0) * (1.0 + apr.max(0.0) / 100.0))
}

fn apply_strategy(
    year: i32,
    accounts: &[Account],
    expenses: Vec<Expense>,
    env: &SimulationEnv<'_>,
    prior_years: &[SimulationYear],
    logs: &mut Vec<String>,
) -> (Vec<Expense>, StrategyOutcome) {
    let assumptions = env.assumptions;
    let input = StrategyInput {
        portfolio_value: portfolio_value(accounts),
        prior_withdrawal: prior_years
            .last()
            .and_then(|y| y.strategy_withdrawal.as_ref())
            .map(|w| w.amount),
        inflation: assumptions.inflation_component(),
        years_remaining: assumptions
            .demographics
            .life_expectancy
            .saturating_sub(assumptions.age_in(year)),
    };
    let outcome = evaluate_strategy(&assumptions.investments, &input);

    if let Some(adjustment) = &outcome.adjustment {
        match adjustment.guardrail {
            Guardrail::CapitalPreservation => logs.push(format!(
                "Guyton-Klinger capital preservation: withdrawal rate {:.2}% above {:.2}%, discretionary spending cut",
                adjustment.current_rate, adjustment.upper_limit
            )),
            Guardrail::CapitalPreservationSuppressed => logs.push(format!(
                "Guyton-Klinger capital preservation suppressed: {} years remaining",
                adjustment.years_remaining
            )),
            Guardrail::Prosperity => logs.push(format!(
                "Guyton-Klinger prosperity: withdrawal rate {:.2}% below {:.2}%, discretionary spending raised",
                adjustment.current_rate, adjustment.lower_limit
            )),
            Guardrail::Initial | Guardrail::None => {}
        }
    }

    let factor = outcome.discretionary_factor;
    let expenses = if (factor - 1.0).abs() > f64::EPSILON {
        expenses
            .iter()
            .map(|e| {
                if e.is_discretionary() {
                    e.scaled(factor)
                } else {
                    e.clone()
                }
            })
            .collect()
    } else {
        expenses
    };
    (expenses, outcome)
}

enum Resolution {
    Deficit(WaterfallOutcome),
    Surplus(AllocationOutcome),
}

struct CashPlan {
    surplus: f64,
    final_base: TaxBase,
    resolution: Resolution,
}

impl CashPlan {
    fn shortfall(&self) -> f64 {
        match &self.resolution {
            Resolution::Deficit(outcome) => outcome.shortfall,
            Resolution::Surplus(_) => 0.0,
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn settle_cash(
    cash_in: f64,
    total_expense: f64,
    base: TaxBase,
    accounts: &[Account],
    contributed: &BTreeMap<String, f64>,
    env: &SimulationEnv<'_>,
    year: i32,
    age: u32,
) -> CashPlan {
    let assumptions = env.assumptions;
    let net_cash = cash_in - base.taxes(env.oracle, env.tax_state, year).total();
    let surplus = net_cash - total_expense;

    if surplus < -CASH_EPS {
        let order = if assumptions.withdrawal_order.is_empty() {
            default_withdrawal_order(accounts)
        } else {
            assumptions.withdrawal_order.clone()
        };
        let ctx = WaterfallContext {
            oracle: env.oracle,
            tax_state: env.tax_state,
            year,
            age: age as f64,
            rules: &assumptions.withdrawal_rules,
        };
        let outcome = solve_deficit(-surplus, accounts, &order, base, &ctx);
        CashPlan {
            surplus,
            final_base: outcome.base,
            resolution: Resolution::Deficit(outcome),
        }
    } else {
        let ctx = AllocationContext {
            annual_expenses: total_expense,
            contributed,
        };
        let outcome = allocate_surplus(surplus.max(0.0), accounts, &assumptions.priorities, &ctx);
        CashPlan {
            surplus,
            final_base: base,
            resolution: Resolution::Surplus(outcome),
        }
    }
}

/// Largest conversion that keeps the year's ordinary income, withdrawals
/// included, inside the bracket those withdrawals left it in. The
/// conversion's own tax is paid from the surplus or by further withdrawals,
/// and may not deepen the year's shortfall.
fn fit_conversion(
    accounts: &[Account],
    base: TaxBase,
    unconverted: &CashPlan,
    env: &SimulationEnv<'_>,
    year: i32,
    settle: impl Fn(&[Account], TaxBase) -> CashPlan,
) -> Option<(RothConversion, Vec<Account>, CashPlan)> {
    let ordinary = unconverted.final_base.ordinary_income;
    let ceiling = env
        .oracle
        .ordinary_bracket_ceiling(ordinary, env.tax_state, year)?;
    let headroom = plan_conversion(accounts, ordinary, env.oracle, env.tax_state, year)?.amount;
    let shortfall = unconverted.shortfall();

    let attempt = |amount: f64| {
        let conversion = conversion_of(accounts, amount)?;
        let converted = apply_conversion(accounts, &conversion);
        let plan = settle(
            &converted,
            TaxBase {
                ordinary_income: base.ordinary_income + conversion.amount,
                ..base
            },
        );
        let fits = plan.final_base.ordinary_income <= ceiling + CONVERSION_TOLERANCE
            && plan.shortfall() <= shortfall + CASH_EPS;
        fits.then_some((conversion, converted, plan))
    };

    if let Some(found) = attempt(headroom) {
        return Some(found);
    }
    let mut best = None;
    let (mut lo, mut hi) = (0.0, headroom);
    for _ in 0..CONVERSION_SEARCH_STEPS {
        if hi - lo <= CONVERSION_TOLERANCE {
            break;
        }
        let mid = (lo + hi) * 0.5;
        match attempt(mid) {
            Some(found) => {
                lo = mid;
                best = Some(found);
            }
            None => hi = mid,
        }
    }
    best
}

fn record_withdrawals(outcome: &WaterfallOutcome, flows: &mut BTreeMap<String, AccountFlows>) {
    for w in &outcome.withdrawals {
        let entry = flows.entry(w.account_id.clone()).or_default();
        entry.withdrawal += (w.gross - w.employer_portion).max(0.0);
        entry.employer_withdrawal += w.employer_portion;
        entry.basis_withdrawn += w.basis_withdrawn;
    }
}

fn record_allocations(
    outcome: &AllocationOutcome,
    accounts: &[Account],
    flows: &mut BTreeMap<String, AccountFlows>,
) {
    for allocation in &outcome.allocations {
        let entry = flows.entry(allocation.account_id.clone()).or_default();
        match find_account(accounts, &allocation.account_id) {
            Some(Account::Debt(_) | Account::Property(_)) => entry.paydown += allocation.amount,
            _ => entry.contribution += allocation.amount,
        }
    }
}

/// Advances one year. `incomes`, `expenses` and `accounts` are the previous
/// year's values; none of them are modified.
pub fn simulate_one_year(
    year: i32,
    incomes: &[Income],
    expenses: &[Expense],
    accounts: &[Account],
    env: &SimulationEnv<'_>,
    prior_years: &[SimulationYear],
    return_override: Option<f64>,
) -> SimulationYear {
    let assumptions = env.assumptions;
    let age = assumptions.age_in(year);
    let retired = assumptions.is_retired(year);
    let rates = assumptions.growth_rates();
    let mut logs = Vec::new();
    let mut flows: BTreeMap<String, AccountFlows> = BTreeMap::new();

    if retired && !assumptions.is_retired(year - 1) {
        logs.push(format!("Retired at age {age}; work income stops"));
    }

    let incomes: Vec<Income> = incomes.iter().map(|i| i.advance(&rates)).collect();
    let expenses: Vec<Expense> = expenses.iter().map(|e| e.advance(&rates, retired)).collect();

    let payroll = route_payroll(&incomes, accounts, year, retired, &mut flows, &mut logs);
    let (incomes, ss_withheld) = resolve_social_security(
        year,
        incomes,
        payroll.wages,
        prior_years,
        assumptions,
        &mut logs,
    );

    let (expenses, strategy) = if retired {
        let (expenses, outcome) =
            apply_strategy(year, accounts, expenses, env, prior_years, &mut logs);
        (expenses, Some(outcome))
    } else {
        (expenses, None)
    };
    let expenses: Vec<Expense> = expenses
        .iter()
        .map(|e| cap_linked_payment(e, accounts, year))
        .collect();

    let annual_of = |pred: fn(&Income) -> bool| -> f64 {
        incomes
            .iter()
            .filter(|i| pred(i))
            .map(|i| i.annual_amount(year))
            .sum()
    };
    let social_security = (annual_of(|i| matches!(i, Income::SocialSecurity(_))) - ss_withheld).max(0.0);
    let passive = annual_of(|i| matches!(i, Income::Passive(_)));
    let windfall = annual_of(|i| matches!(i, Income::Windfall(_)));
    let total_income = payroll.wages + social_security + passive + windfall;

    let base = TaxBase {
        ordinary_income: (payroll.wages - payroll.pre_tax - payroll.insurance).max(0.0)
            + social_security * TAXABLE_BENEFIT_SHARE
            + passive,
        capital_gains: 0.0,
        earned_income: (payroll.wages - payroll.insurance).max(0.0),
    };

    let total_expense = total_annual_expenses(&expenses, year);
    let cash_in = total_income - payroll.pre_tax - payroll.roth - payroll.insurance;
    let contributed: BTreeMap<String, f64> = flows
        .iter()
        .map(|(id, f)| (id.clone(), f.contribution))
        .collect();
    let settle = |accounts: &[Account], base: TaxBase| {
        settle_cash(cash_in, total_expense, base, accounts, &contributed, env, year, age)
    };

    let mut working = accounts.to_vec();
    let mut plan = settle(&working, base);
    let mut roth_conversion: Option<RothConversion> = None;
    if retired && assumptions.investments.auto_roth_conversions {
        if let Some((conversion, converted, converted_plan)) =
            fit_conversion(&working, base, &plan, env, year, settle)
        {
            logs.push(format!(
                "Roth conversion of {:.2} from {} account(s) to {} account(s)",
                conversion.amount,
                conversion.from_account_ids.len(),
                conversion.to_account_ids.len()
            ));
            working = converted;
            plan = converted_plan;
            roth_conversion = Some(conversion);
        }
    }
    debug!(
        "year {year} age {age}: income {total_income:.2}, expenses {total_expense:.2}, surplus {:.2}",
        plan.surplus
    );

    let mut cashflow = Cashflow {
        total_income,
        total_expense,
        discretionary_expense: discretionary_expenses(&expenses, year),
        invested: payroll.pre_tax + payroll.roth + payroll.employer_match,
        ..Cashflow::default()
    };
    let final_base = plan.final_base;
    let mut penalties = 0.0;

    match plan.resolution {
        Resolution::Deficit(outcome) => {
            record_withdrawals(&outcome, &mut flows);
            penalties = outcome.total_penalty();
            cashflow.withdrawals = outcome.total_gross();
            for w in &outcome.withdrawals {
                *cashflow
                    .withdrawal_detail
                    .entry(w.account_id.clone())
                    .or_insert(0.0) += w.gross;
            }
            cashflow.shortfall = outcome.shortfall;
            logs.extend(outcome.logs);
        }
        Resolution::Surplus(outcome) => {
            record_allocations(&outcome, &working, &mut flows);
            cashflow.deficit_paydown = outcome.deficit_paydown;
            cashflow.unallocated = outcome.unallocated;
            for allocation in &outcome.allocations {
                *cashflow
                    .bucket_allocations
                    .entry(allocation.priority_id.clone())
                    .or_insert(0.0) += allocation.amount;
            }
            logs.extend(outcome.logs);
        }
    }

    let transition = TransitionContext {
        year,
        ror: return_override.unwrap_or(assumptions.investments.return_rates.ror),
        inflation: assumptions.inflation_component(),
        housing_appreciation: assumptions.expenses.housing_appreciation,
        expenses: &expenses,
    };
    let mut next_accounts: Vec<Account> = working
        .iter()
        .filter(|a| !matches!(a, Account::DeficitDebt(_)))
        .map(|a| a.advance(&flows.get(a.id()).copied().unwrap_or_default(), &transition))
        .collect();

    let prior_deficit = working.iter().find_map(|a| match a {
        Account::DeficitDebt(d) => Some(d),
        _ => None,
    });
    let deficit_debt = match prior_deficit {
        Some(d) => {
            let settled = d.settle(cashflow.shortfall, cashflow.deficit_paydown);
            if settled.is_none() {
                logs.push("Deficit debt fully repaid".to_string());
            }
            settled
        }
        None if cashflow.shortfall > CASH_EPS => {
            logs.push(format!("Deficit debt created: {:.2}", cashflow.shortfall));
            Some(DeficitDebtAccount::new(cashflow.shortfall))
        }
        None => None,
    };
    if let Some(debt) = deficit_debt {
        next_accounts.push(Account::DeficitDebt(debt));
    }

    let final_taxes = final_base.taxes(env.oracle, env.tax_state, year);
    let taxes = TaxBreakdown {
        fed: final_taxes.fed,
        state: final_taxes.state,
        fica: final_taxes.fica,
        pre_tax: payroll.pre_tax,
        insurance: payroll.insurance,
        post_tax: payroll.roth,
        capital_gains: final_taxes.capital_gains_tax,
        penalties,
    };

    let (strategy_withdrawal, strategy_adjustment) = match strategy {
        Some(outcome) => (Some(outcome.withdrawal), outcome.adjustment),
        None => (None, None),
    };

    SimulationYear {
        year,
        age,
        net_worth: net_worth(&next_accounts),
        accounts: next_accounts,
        incomes,
        expenses,
        cashflow,
        taxes,
        logs,
        strategy_withdrawal,
        strategy_adjustment,
        roth_conversion,
    }
}

pub fn run_simulation(
    num_years: u32,
    accounts: &[Account],
    incomes: &[Income],
    expenses: &[Expense],
    env: &SimulationEnv<'_>,
    yearly_return_overrides: &[f64],
) -> Vec<SimulationYear> {
    let assumptions = env.assumptions;
    let horizon = num_years.min(assumptions.years_to_live());
    let mut history = Vec::with_capacity(horizon as usize + 1);
    history.push(baseline_year(accounts, incomes, expenses, env));

    for offset in 1..=horizon {
        let year = assumptions.demographics.start_year + offset as i32;
        let return_override = yearly_return_overrides.get(offset as usize - 1).copied();
        let Some(prev) = history.last() else { break };
        let next = simulate_one_year(
            year,
            &prev.incomes,
            &prev.expenses,
            &prev.accounts,
            env,
            &history,
            return_override,
        );
        history.push(next);
    }
    history
}
