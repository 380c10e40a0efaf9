use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum Frequency {
    Weekly,
    BiWeekly,
    #[default]
    Monthly,
    Quarterly,
    Annually,
}

impl Frequency {
    pub fn periods_per_year(self) -> f64 {
        match self {
            Frequency::Weekly => 52.0,
            Frequency::BiWeekly => 26.0,
            Frequency::Monthly => 12.0,
            Frequency::Quarterly => 4.0,
            Frequency::Annually => 1.0,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum InflationIndex {
    General,
    Healthcare,
    Housing,
    Rent,
    Salary,
    Fixed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GrowthRates {
    pub general: f64,
    pub healthcare: f64,
    pub housing: f64,
    pub rent: f64,
    pub salary: f64,
    pub lifestyle_creep: f64,
}

impl GrowthRates {
    pub fn rate_for(&self, index: InflationIndex) -> f64 {
        match index {
            InflationIndex::General => self.general,
            InflationIndex::Healthcare => self.healthcare,
            InflationIndex::Housing => self.housing,
            InflationIndex::Rent => self.rent,
            InflationIndex::Salary => self.salary,
            InflationIndex::Fixed => 0.0,
        }
    }
}

fn grow(amount: f64, rate: f64) -> f64 {
    (amount * (1.0 + rate / 100.0)).max(0.0)
}

fn within(start_year: Option<i32>, end_year: Option<i32>, year: i32) -> bool {
    start_year.is_none_or(|start| year >= start) && end_year.is_none_or(|end| year <= end)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkIncome {
    pub id: String,
    pub name: String,
    pub amount: f64,
    #[serde(default)]
    pub frequency: Frequency,
    #[serde(default)]
    pub start_year: Option<i32>,
    #[serde(default)]
    pub end_year: Option<i32>,
    #[serde(default)]
    pub pre_tax_contribution: f64,
    #[serde(default)]
    pub roth_contribution: f64,
    #[serde(default)]
    pub employer_match: f64,
    #[serde(default)]
    pub insurance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocialSecurityIncome {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub claiming_age: Option<u32>,
    #[serde(default)]
    pub earnings_history: Vec<f64>,
    #[serde(default)]
    pub monthly_benefit: Option<f64>,
    #[serde(default)]
    pub start_year: Option<i32>,
    #[serde(default)]
    pub end_year: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BasicIncome {
    pub id: String,
    pub name: String,
    pub amount: f64,
    #[serde(default)]
    pub frequency: Frequency,
    #[serde(default)]
    pub start_year: Option<i32>,
    #[serde(default)]
    pub end_year: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "className")]
pub enum Income {
    #[serde(rename = "WorkIncome")]
    Work(WorkIncome),
    #[serde(rename = "SocialSecurityIncome")]
    SocialSecurity(SocialSecurityIncome),
    #[serde(rename = "PassiveIncome")]
    Passive(BasicIncome),
    #[serde(rename = "WindfallIncome")]
    Windfall(BasicIncome),
}

impl Income {
    pub fn id(&self) -> &str {
        match self {
            Income::Work(i) => &i.id,
            Income::SocialSecurity(i) => &i.id,
            Income::Passive(i) | Income::Windfall(i) => &i.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Income::Work(i) => &i.name,
            Income::SocialSecurity(i) => &i.name,
            Income::Passive(i) | Income::Windfall(i) => &i.name,
        }
    }

    pub fn is_active(&self, year: i32) -> bool {
        match self {
            Income::Work(i) => within(i.start_year, i.end_year, year),
            Income::SocialSecurity(i) => within(i.start_year, i.end_year, year),
            Income::Passive(i) | Income::Windfall(i) => within(i.start_year, i.end_year, year),
        }
    }

    pub fn annual_amount(&self, year: i32) -> f64 {
        if !self.is_active(year) {
            return 0.0;
        }
        let amount = match self {
            Income::Work(i) => i.amount * i.frequency.periods_per_year(),
            Income::SocialSecurity(i) => i.monthly_benefit.unwrap_or(0.0) * 12.0,
            Income::Passive(i) | Income::Windfall(i) => i.amount * i.frequency.periods_per_year(),
        };
        amount.max(0.0)
    }

    pub fn index(&self) -> InflationIndex {
        match self {
            Income::Work(_) => InflationIndex::Salary,
            Income::SocialSecurity(_) | Income::Passive(_) => InflationIndex::General,
            Income::Windfall(_) => InflationIndex::Fixed,
        }
    }

    pub fn advance(&self, rates: &GrowthRates) -> Income {
        let rate = rates.rate_for(self.index());
        match self {
            Income::Work(i) => Income::Work(WorkIncome {
                amount: grow(i.amount, rate),
                ..i.clone()
            }),
            Income::SocialSecurity(i) => Income::SocialSecurity(SocialSecurityIncome {
                monthly_benefit: i.monthly_benefit.map(|b| grow(b, rate)),
                ..i.clone()
            }),
            Income::Passive(i) => Income::Passive(BasicIncome {
                amount: grow(i.amount, rate),
                ..i.clone()
            }),
            Income::Windfall(i) => Income::Windfall(i.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BasicExpense {
    pub id: String,
    pub name: String,
    pub amount: f64,
    #[serde(default)]
    pub frequency: Frequency,
    #[serde(default)]
    pub start_year: Option<i32>,
    #[serde(default)]
    pub end_year: Option<i32>,
    #[serde(default)]
    pub is_discretionary: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanExpense {
    pub id: String,
    pub name: String,
    pub amount: f64,
    #[serde(default)]
    pub frequency: Frequency,
    #[serde(default)]
    pub start_year: Option<i32>,
    #[serde(default)]
    pub end_year: Option<i32>,
    #[serde(default)]
    pub apr: f64,
    #[serde(default)]
    pub linked_account_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "className")]
pub enum Expense {
    #[serde(rename = "RentExpense")]
    Rent(BasicExpense),
    #[serde(rename = "MortgageExpense")]
    Mortgage(LoanExpense),
    #[serde(rename = "LoanExpense")]
    Loan(LoanExpense),
    #[serde(rename = "HousingExpense")]
    Housing(BasicExpense),
    #[serde(rename = "HealthcareExpense")]
    Healthcare(BasicExpense),
    #[serde(rename = "DependentExpense")]
    Dependent(BasicExpense),
    #[serde(rename = "FoodExpense")]
    Food(BasicExpense),
    #[serde(rename = "TransportExpense")]
    Transport(BasicExpense),
    #[serde(rename = "VacationExpense")]
    Vacation(BasicExpense),
    #[serde(rename = "OtherExpense")]
    Other(BasicExpense),
}

enum ExpenseRef<'a> {
    Basic(&'a BasicExpense),
    Loan(&'a LoanExpense),
}

impl Expense {
    fn view(&self) -> ExpenseRef<'_> {
        match self {
            Expense::Mortgage(e) | Expense::Loan(e) => ExpenseRef::Loan(e),
            Expense::Rent(e)
            | Expense::Housing(e)
            | Expense::Healthcare(e)
            | Expense::Dependent(e)
            | Expense::Food(e)
            | Expense::Transport(e)
            | Expense::Vacation(e)
            | Expense::Other(e) => ExpenseRef::Basic(e),
        }
    }

    pub fn id(&self) -> &str {
        match self.view() {
            ExpenseRef::Basic(e) => &e.id,
            ExpenseRef::Loan(e) => &e.id,
        }
    }

    pub fn name(&self) -> &str {
        match self.view() {
            ExpenseRef::Basic(e) => &e.name,
            ExpenseRef::Loan(e) => &e.name,
        }
    }

    fn schedule(&self) -> (f64, Frequency, Option<i32>, Option<i32>) {
        match self.view() {
            ExpenseRef::Basic(e) => (e.amount, e.frequency, e.start_year, e.end_year),
            ExpenseRef::Loan(e) => (e.amount, e.frequency, e.start_year, e.end_year),
        }
    }

    pub fn is_active(&self, year: i32) -> bool {
        let (_, _, start, end) = self.schedule();
        within(start, end, year)
    }

    pub fn annual_amount(&self, year: i32) -> f64 {
        if !self.is_active(year) {
            return 0.0;
        }
        let (amount, frequency, _, _) = self.schedule();
        (amount * frequency.periods_per_year()).max(0.0)
    }

    pub fn is_discretionary(&self) -> bool {
        match self {
            Expense::Vacation(_) => true,
            _ => matches!(self.view(), ExpenseRef::Basic(e) if e.is_discretionary),
        }
    }

    pub fn index(&self) -> InflationIndex {
        match self {
            Expense::Rent(_) => InflationIndex::Rent,
            Expense::Housing(_) => InflationIndex::Housing,
            Expense::Healthcare(_) => InflationIndex::Healthcare,
            Expense::Mortgage(_) | Expense::Loan(_) => InflationIndex::Fixed,
            _ => InflationIndex::General,
        }
    }

    pub fn loan_terms(&self) -> Option<f64> {
        match self.view() {
            ExpenseRef::Loan(e) => Some(e.apr),
            ExpenseRef::Basic(_) => None,
        }
    }

    pub fn linked_account_id(&self) -> Option<&str> {
        match self.view() {
            ExpenseRef::Loan(e) => e.linked_account_id.as_deref(),
            ExpenseRef::Basic(_) => None,
        }
    }

    fn with_amount(&self, amount: f64) -> Expense {
        let amount = amount.max(0.0);
        match self {
            Expense::Rent(e) => Expense::Rent(BasicExpense { amount, ..e.clone() }),
            Expense::Mortgage(e) => Expense::Mortgage(LoanExpense { amount, ..e.clone() }),
            Expense::Loan(e) => Expense::Loan(LoanExpense { amount, ..e.clone() }),
            Expense::Housing(e) => Expense::Housing(BasicExpense { amount, ..e.clone() }),
            Expense::Healthcare(e) => Expense::Healthcare(BasicExpense { amount, ..e.clone() }),
            Expense::Dependent(e) => Expense::Dependent(BasicExpense { amount, ..e.clone() }),
            Expense::Food(e) => Expense::Food(BasicExpense { amount, ..e.clone() }),
            Expense::Transport(e) => Expense::Transport(BasicExpense { amount, ..e.clone() }),
            Expense::Vacation(e) => Expense::Vacation(BasicExpense { amount, ..e.clone() }),
            Expense::Other(e) => Expense::Other(BasicExpense { amount, ..e.clone() }),
        }
    }

    pub fn advance(&self, rates: &GrowthRates, retired: bool) -> Expense {
        let mut rate = rates.rate_for(self.index());
        if self.is_discretionary() && !retired {
            rate += rates.lifestyle_creep;
        }
        let (amount, _, _, _) = self.schedule();
        self.with_amount(grow(amount, rate))
    }

    pub fn scaled(&self, factor: f64) -> Expense {
        let (amount, _, _, _) = self.schedule();
        self.with_amount(amount * factor.max(0.0))
    }

    pub fn capped_annual(&self, year: i32, cap: f64) -> Expense {
        let annual = self.annual_amount(year);
        if annual <= cap.max(0.0) {
            return self.clone();
        }
        let (_, frequency, _, _) = self.schedule();
        self.with_amount(cap.max(0.0) / frequency.periods_per_year())
    }
}

pub fn total_annual_expenses(expenses: &[Expense], year: i32) -> f64 {
    expenses.iter().map(|e| e.annual_amount(year)).sum()
}

pub fn discretionary_expenses(expenses: &[Expense], year: i32) -> f64 {
    expenses
        .iter()
        .filter(|e| e.is_discretionary())
        .map(|e| e.annual_amount(year))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn basic(amount: f64, is_discretionary: bool) -> BasicExpense {
        BasicExpense {
            id: "e".to_string(),
            name: "e".to_string(),
            amount,
            frequency: Frequency::Monthly,
            start_year: Some(2026),
            end_year: Some(2030),
            is_discretionary,
        }
    }

    #[test]
    fn annual_amount_respects_frequency_and_active_range() {
        let food = Expense::Food(basic(500.0, false));
        assert_approx(food.annual_amount(2025), 0.0);
        assert_approx(food.annual_amount(2026), 6_000.0);
        assert_approx(food.annual_amount(2030), 6_000.0);
        assert_approx(food.annual_amount(2031), 0.0);

        let salary = Income::Work(WorkIncome {
            id: "w".to_string(),
            name: "w".to_string(),
            amount: 2_000.0,
            frequency: Frequency::BiWeekly,
            start_year: None,
            end_year: None,
            pre_tax_contribution: 0.0,
            roth_contribution: 0.0,
            employer_match: 0.0,
            insurance: 0.0,
        });
        assert_approx(salary.annual_amount(2040), 52_000.0);
    }

    #[test]
    fn advance_follows_variant_index_and_lifestyle_creep() {
        let rates = GrowthRates {
            general: 3.0,
            healthcare: 6.0,
            housing: 4.0,
            rent: 2.0,
            salary: 5.0,
            lifestyle_creep: 1.0,
        };

        let care = Expense::Healthcare(basic(100.0, false)).advance(&rates, false);
        assert_approx(care.annual_amount(2026), 1_272.0);

        let trip = Expense::Vacation(basic(100.0, false));
        assert_approx(trip.advance(&rates, false).annual_amount(2026), 1_248.0);
        assert_approx(trip.advance(&rates, true).annual_amount(2026), 1_236.0);

        let loan = Expense::Loan(LoanExpense {
            id: "l".to_string(),
            name: "l".to_string(),
            amount: 300.0,
            frequency: Frequency::Monthly,
            start_year: None,
            end_year: None,
            apr: 6.0,
            linked_account_id: None,
        });
        assert_eq!(loan.advance(&rates, false), loan);
    }

    #[test]
    fn capped_annual_limits_payment_to_payoff() {
        let loan = Expense::Mortgage(LoanExpense {
            id: "m".to_string(),
            name: "m".to_string(),
            amount: 1_000.0,
            frequency: Frequency::Monthly,
            start_year: None,
            end_year: None,
            apr: 5.0,
            linked_account_id: Some("home".to_string()),
        });
        assert_approx(loan.capped_annual(2030, 3_000.0).annual_amount(2030), 3_000.0);
        assert_approx(loan.capped_annual(2030, 50_000.0).annual_amount(2030), 12_000.0);
    }

    #[test]
    fn windfall_does_not_grow() {
        let windfall = Income::Windfall(BasicIncome {
            id: "inheritance".to_string(),
            name: "Inheritance".to_string(),
            amount: 50_000.0,
            frequency: Frequency::Annually,
            start_year: Some(2035),
            end_year: Some(2035),
        });
        let rates = GrowthRates {
            general: 3.0,
            ..GrowthRates::default()
        };
        assert_eq!(windfall.advance(&rates), windfall);
        assert_approx(windfall.annual_amount(2035), 50_000.0);
        assert_approx(windfall.annual_amount(2036), 0.0);
    }
}
