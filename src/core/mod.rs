mod account;
mod allocator;
mod error;
mod flows;
mod guyton_klinger;
mod monte_carlo;
mod roth;
mod scenario;
mod simulation;
mod social_security;
mod tax;
mod types;
mod waterfall;

pub use account::{
    Account, AccountFlows, DEFICIT_DEBT_ID, DebtAccount, DeficitDebtAccount, Financing,
    InvestedAccount, PropertyAccount, SavedAccount, TaxCharacter, net_worth, portfolio_value,
};
pub use allocator::{Allocation, AllocationOutcome, allocate_surplus};
pub use error::ScenarioError;
pub use flows::{
    BasicExpense, BasicIncome, Expense, Frequency, Income, InflationIndex, LoanExpense,
    SocialSecurityIncome, WorkIncome,
};
pub use guyton_klinger::{Guardrail, StrategyAdjustment, StrategyWithdrawal, evaluate_strategy};
pub use monte_carlo::{MonteCarloConfig, MonteCarloResult, NetWorthBand, run_monte_carlo};
pub use roth::{RothConversion, apply_conversion, plan_conversion};
pub use scenario::{Scenario, reconstruct_account, reconstruct_expense, reconstruct_income};
pub use simulation::{SimulationEnv, baseline_year, run_simulation, simulate_one_year};
pub use social_security::{BenefitEstimate, estimate_benefit};
pub use tax::{
    BracketTaxOracle, DeductionMethod, FilingStatus, FlatTaxOracle, TaxBracket, TaxOracle,
    TaxOverrides, TaxRequest, TaxResult, TaxState,
};
pub use types::{
    Assumptions, BucketKind, CapPolicy, Cashflow, Priority, SimulationYear, TaxBreakdown,
    WithdrawalStrategy,
};
pub use waterfall::{TaxBase, Withdrawal, WaterfallOutcome, default_withdrawal_order, solve_deficit};
