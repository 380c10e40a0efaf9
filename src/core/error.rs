use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("Duplicate account id: {0}")]
    DuplicateAccountId(String),

    #[error("Withdrawal order references unknown account '{0}'")]
    UnknownWithdrawalAccount(String),

    #[error("Priority '{priority}' references unknown account '{account}'")]
    UnknownPriorityAccount { priority: String, account: String },

    #[error("{field} must be finite and >= 0 (got {value})")]
    InvalidAmount { field: String, value: f64 },

    #[error("Life expectancy {life_expectancy} must be greater than start age {start_age}")]
    LifeExpectancyBeforeStart { start_age: u32, life_expectancy: u32 },

    #[error("Retirement age {retirement_age} must not exceed life expectancy {life_expectancy}")]
    RetirementAfterLifeExpectancy {
        retirement_age: u32,
        life_expectancy: u32,
    },

    #[error("Withdrawal rate must be between 0 and 100 (got {0})")]
    InvalidWithdrawalRate(f64),

    #[error("Monte Carlo simulations must be > 0")]
    NoSimulations,

    #[error("Failed to read scenario {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize scenario: {0}")]
    Serialize(#[from] serde_json::Error),
}
