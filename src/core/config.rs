use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::{AccountSet, BucketKind};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("strategy {0} order is empty")]
    EmptyOrder(&'static str),
    #[error("tax table is missing {0} brackets")]
    MissingBrackets(&'static str),
    #[error("{0} brackets must start at zero and be sorted ascending")]
    MalformedBrackets(&'static str),
    #[error("projection horizon must be at least one year")]
    BadHorizon,
    #[error("household has no living members")]
    NoPersons,
    #[error("person {0}: life expectancy {1} is before retirement age {2}")]
    BadAges(usize, u32, u32),
    #[error("{kind} owner {owner} is not a living household member")]
    BadOwner { kind: &'static str, owner: usize },
    #[error("{0} must be finite")]
    NonFinite(&'static str),
}

/// A progressive bracket: marginal `rate` applies to income above `threshold`.
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
pub struct Bracket {
    pub threshold: f64,
    pub rate: f64,
}

/// Surtax applied as a percentage of the provincial tax itself above a
/// provincial-tax threshold.
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
pub struct SurtaxTier {
    pub threshold: f64,
    pub rate: f64,
}

/// Payroll-style premium with its own exemption floor and earnings ceiling.
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
pub struct PayrollTier {
    pub exemption: f64,
    pub ceiling: f64,
    pub rate: f64,
}

/// Flat provincial premium phased in above an income floor.
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthPremium {
    pub floor: f64,
    pub cap: f64,
    pub phase_in_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaxTable {
    pub federal: Vec<Bracket>,
    pub provincial: Vec<Bracket>,
    pub surtax: Vec<SurtaxTier>,
    pub health_premium: HealthPremium,
    pub oas_clawback_threshold: f64,
    pub oas_clawback_rate: f64,
    pub payroll: Vec<PayrollTier>,
}

impl TaxTable {
    /// Copy of the table with every dollar threshold scaled by cumulative
    /// inflation. Rates are left untouched.
    pub fn inflated(&self, factor: f64) -> TaxTable {
        let factor = factor.max(0.0);
        let scale = |brackets: &[Bracket]| {
            brackets
                .iter()
                .map(|b| Bracket {
                    threshold: b.threshold * factor,
                    rate: b.rate,
                })
                .collect()
        };
        TaxTable {
            federal: scale(&self.federal),
            provincial: scale(&self.provincial),
            surtax: self
                .surtax
                .iter()
                .map(|t| SurtaxTier {
                    threshold: t.threshold * factor,
                    rate: t.rate,
                })
                .collect(),
            health_premium: HealthPremium {
                floor: self.health_premium.floor * factor,
                cap: self.health_premium.cap,
                phase_in_rate: self.health_premium.phase_in_rate,
            },
            oas_clawback_threshold: self.oas_clawback_threshold * factor,
            oas_clawback_rate: self.oas_clawback_rate,
            payroll: self
                .payroll
                .iter()
                .map(|t| PayrollTier {
                    exemption: t.exemption * factor,
                    ceiling: t.ceiling * factor,
                    rate: t.rate,
                })
                .collect(),
        }
    }

    /// Upper edge of the lowest federal bracket, used as the resolver's
    /// first pass ceiling. `None` when the table has a single bracket.
    pub fn lowest_bracket_ceiling(&self) -> Option<f64> {
        self.federal.get(1).map(|b| b.threshold)
    }
}

impl Default for TaxTable {
    /// 2025 federal + Ontario-style provincial table in today's dollars.
    fn default() -> Self {
        TaxTable {
            federal: vec![
                Bracket { threshold: 0.0, rate: 0.15 },
                Bracket { threshold: 57_375.0, rate: 0.205 },
                Bracket { threshold: 114_750.0, rate: 0.26 },
                Bracket { threshold: 177_882.0, rate: 0.29 },
                Bracket { threshold: 253_414.0, rate: 0.33 },
            ],
            provincial: vec![
                Bracket { threshold: 0.0, rate: 0.0505 },
                Bracket { threshold: 52_886.0, rate: 0.0915 },
                Bracket { threshold: 105_775.0, rate: 0.1116 },
                Bracket { threshold: 150_000.0, rate: 0.1216 },
                Bracket { threshold: 220_000.0, rate: 0.1316 },
            ],
            surtax: vec![
                SurtaxTier { threshold: 5_710.0, rate: 0.20 },
                SurtaxTier { threshold: 7_307.0, rate: 0.36 },
            ],
            health_premium: HealthPremium {
                floor: 20_000.0,
                cap: 900.0,
                phase_in_rate: 0.06,
            },
            oas_clawback_threshold: 93_454.0,
            oas_clawback_rate: 0.15,
            payroll: vec![
                // CPP employee premium.
                PayrollTier { exemption: 3_500.0, ceiling: 71_300.0, rate: 0.0595 },
                // EI employee premium.
                PayrollTier { exemption: 0.0, ceiling: 65_700.0, rate: 0.0164 },
            ],
        }
    }
}

/// Nominal annual return per account type for one person.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReturnRates {
    pub tfsa: f64,
    pub rrsp: f64,
    pub lira: f64,
    pub lif: f64,
    pub rrif: f64,
    pub non_registered: f64,
    /// Cash-yield component of the non-registered return; taxed annually and
    /// therefore subtracted from the account's reinvested growth.
    pub non_registered_yield: f64,
    pub cash: f64,
    pub crypto: f64,
}

impl Default for ReturnRates {
    fn default() -> Self {
        ReturnRates {
            tfsa: 0.05,
            rrsp: 0.05,
            lira: 0.05,
            lif: 0.05,
            rrif: 0.05,
            non_registered: 0.05,
            non_registered_yield: 0.02,
            cash: 0.015,
            crypto: 0.08,
        }
    }
}

/// Government benefit claim settings for one person. `annual_max` is the
/// entitlement at the reference age; `scale` is the person's fraction of it
/// (seed it from the entitlement engine for CPP).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BenefitConfig {
    pub enabled: bool,
    pub start_age: u32,
    pub annual_max: f64,
    pub scale: f64,
}

impl Default for BenefitConfig {
    fn default() -> Self {
        BenefitConfig {
            enabled: false,
            start_age: 65,
            annual_max: 0.0,
            scale: 1.0,
        }
    }
}

/// Defined-benefit pension: a lifetime component from `start_age` and a
/// bridge component that ends at 65.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DbPension {
    pub annual: f64,
    pub start_age: u32,
    pub bridge_annual: f64,
    pub indexed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Person {
    /// False models the sentinel second member of a single-person household.
    pub present: bool,
    pub birth_year: i32,
    pub retirement_age: u32,
    pub life_expectancy: u32,
    pub employment_income: f64,
    pub income_growth: f64,
    pub accounts: AccountSet,
    pub returns: ReturnRates,
    pub cpp: BenefitConfig,
    pub oas: BenefitConfig,
    pub db_pension: DbPension,
    /// Buckets whose contribution room is already used in the first
    /// projection year.
    pub skip_first_year: Vec<BucketKind>,
}

impl Default for Person {
    fn default() -> Self {
        Person {
            present: true,
            birth_year: 1985,
            retirement_age: 65,
            life_expectancy: 95,
            employment_income: 0.0,
            income_growth: 0.02,
            accounts: AccountSet::default(),
            returns: ReturnRates::default(),
            cpp: BenefitConfig::default(),
            oas: BenefitConfig::default(),
            db_pension: DbPension::default(),
            skip_first_year: Vec::new(),
        }
    }
}

impl Person {
    pub fn not_alive() -> Self {
        Person {
            present: false,
            ..Person::default()
        }
    }

    pub fn age_in(&self, year: i32) -> i32 {
        year - self.birth_year
    }

    pub fn retirement_year(&self) -> i32 {
        self.birth_year + self.retirement_age as i32
    }
}

/// Two ordered bucket lists: surplus priority and withdrawal priority.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Strategy {
    pub accumulation: Vec<BucketKind>,
    pub decumulation: Vec<BucketKind>,
}

impl Default for Strategy {
    fn default() -> Self {
        Strategy {
            accumulation: vec![
                BucketKind::TaxFree,
                BucketKind::TaxDeferred,
                BucketKind::Taxable,
                BucketKind::Cash,
            ],
            decumulation: vec![
                BucketKind::Cash,
                BucketKind::Taxable,
                BucketKind::TaxDeferred,
                BucketKind::TaxFree,
                BucketKind::CapitalAsset,
            ],
        }
    }
}

/// A point on the projection timeline, as a fractional calendar year or an
/// offset in years from the owner's retirement.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind", content = "value")]
pub enum TimePoint {
    Calendar(f64),
    RetirementOffset(f64),
}

impl TimePoint {
    pub fn resolve(self, owner: &Person) -> f64 {
        match self {
            TimePoint::Calendar(y) => y,
            TimePoint::RetirementOffset(offset) => owner.retirement_year() as f64 + offset,
        }
    }
}

/// Bounded-duration income generator, read-only to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomeStream {
    pub owner: usize,
    pub annual_amount: f64,
    pub growth: f64,
    pub taxable: bool,
    pub start: TimePoint,
    pub end: TimePoint,
}

/// One-time (no `end`) or recurring cash windfall.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Windfall {
    pub owner: usize,
    pub amount: f64,
    pub taxable: bool,
    pub start: TimePoint,
    pub end: Option<TimePoint>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleEvent {
    /// Primary person's age at which the property is sold.
    pub at_age: u32,
    /// Buy a smaller zero-debt replacement with this much of the proceeds.
    pub replacement_cost: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Property {
    pub value: f64,
    pub loan: f64,
    pub growth_rate: f64,
    pub loan_rate: f64,
    pub annual_payment: f64,
    pub selling_cost_rate: f64,
    pub include_in_net_worth: bool,
    pub sale: Option<SaleEvent>,
}

impl Default for Property {
    fn default() -> Self {
        Property {
            value: 0.0,
            loan: 0.0,
            growth_rate: 0.03,
            loan_rate: 0.04,
            annual_payment: 0.0,
            selling_cost_rate: 0.05,
            include_in_net_worth: true,
            sale: None,
        }
    }
}

/// Spending tier active while the primary person's age is below `up_to_age`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseTier {
    pub up_to_age: i32,
    pub annual_amount: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "mode")]
pub enum ExpenseModel {
    Simple { current: f64, retirement: f64 },
    Tiered { tiers: Vec<ExpenseTier> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Expenses {
    pub model: ExpenseModel,
    /// Portion of spending treated as discretionary.
    pub discretionary_fraction: f64,
    /// Whether the discretionary portion keeps pace with inflation.
    pub index_discretionary: bool,
}

impl Default for Expenses {
    fn default() -> Self {
        Expenses {
            model: ExpenseModel::Simple {
                current: 60_000.0,
                retirement: 48_000.0,
            },
            discretionary_fraction: 0.3,
            index_discretionary: true,
        }
    }
}

/// Contribution ceilings and statutory schedule parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Limits {
    pub tfsa_annual: f64,
    pub rrsp_earned_income_rate: f64,
    pub rrsp_cap: f64,
    pub crypto_annual: f64,
    pub rrif_minimum_start_age: u32,
    /// Annual LIF withdrawal cap as a fraction of the start-of-year balance.
    pub lif_max_fraction: f64,
    pub debt_repayment_rate: f64,
    /// Flat first-year return under the stress-test flag.
    pub stress_rate: f64,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            tfsa_annual: 7_000.0,
            rrsp_earned_income_rate: 0.18,
            rrsp_cap: 32_490.0,
            crypto_annual: 10_000.0,
            rrif_minimum_start_age: 72,
            lif_max_fraction: 0.08,
            debt_repayment_rate: 0.10,
            stress_rate: -0.30,
        }
    }
}

/// The full configuration bundle one run consumes. Immutable during a run;
/// every run deep-copies the mutable state it derives from this.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HouseholdConfig {
    pub start_year: i32,
    pub horizon_years: u32,
    pub inflation: f64,
    pub jurisdiction: String,
    pub persons: [Person; 2],
    pub strategy: Strategy,
    pub tax_table: TaxTable,
    pub expenses: Expenses,
    pub properties: Vec<Property>,
    pub income_streams: Vec<IncomeStream>,
    pub windfalls: Vec<Windfall>,
    pub limits: Limits,
    pub starting_debt: f64,
    pub stress_test: bool,
    pub income_splitting: bool,
    pub clawback_optimization: bool,
}

impl Default for HouseholdConfig {
    fn default() -> Self {
        HouseholdConfig {
            start_year: 2026,
            horizon_years: 60,
            inflation: 0.021,
            jurisdiction: "ON".to_string(),
            persons: [Person::default(), Person::not_alive()],
            strategy: Strategy::default(),
            tax_table: TaxTable::default(),
            expenses: Expenses::default(),
            properties: Vec::new(),
            income_streams: Vec::new(),
            windfalls: Vec::new(),
            limits: Limits::default(),
            starting_debt: 0.0,
            stress_test: false,
            income_splitting: true,
            clawback_optimization: false,
        }
    }
}

impl HouseholdConfig {
    /// Eager validation: configuration errors are rejected before a run
    /// starts; everything numeric inside the loop degrades to sentinels.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.horizon_years == 0 {
            return Err(ConfigError::BadHorizon);
        }
        if self.strategy.accumulation.is_empty() {
            return Err(ConfigError::EmptyOrder("accumulation"));
        }
        if self.strategy.decumulation.is_empty() {
            return Err(ConfigError::EmptyOrder("decumulation"));
        }
        if !self.persons.iter().any(|p| p.present) {
            return Err(ConfigError::NoPersons);
        }
        if !self.inflation.is_finite() {
            return Err(ConfigError::NonFinite("inflation"));
        }
        check_brackets("federal", &self.tax_table.federal)?;
        check_brackets("provincial", &self.tax_table.provincial)?;
        for (idx, person) in self.persons.iter().enumerate() {
            if person.present && (person.life_expectancy as i32) < person.retirement_age as i32 {
                return Err(ConfigError::BadAges(
                    idx,
                    person.life_expectancy,
                    person.retirement_age,
                ));
            }
        }
        for stream in &self.income_streams {
            self.check_owner("income stream", stream.owner)?;
        }
        for windfall in &self.windfalls {
            self.check_owner("windfall", windfall.owner)?;
        }
        Ok(())
    }

    fn check_owner(&self, kind: &'static str, owner: usize) -> Result<(), ConfigError> {
        if owner >= 2 || !self.persons[owner].present {
            return Err(ConfigError::BadOwner { kind, owner });
        }
        Ok(())
    }
}

fn check_brackets(label: &'static str, brackets: &[Bracket]) -> Result<(), ConfigError> {
    if brackets.is_empty() {
        return Err(ConfigError::MissingBrackets(label));
    }
    if brackets[0].threshold != 0.0 {
        return Err(ConfigError::MalformedBrackets(label));
    }
    if brackets.windows(2).any(|w| w[1].threshold <= w[0].threshold) {
        return Err(ConfigError::MalformedBrackets(label));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        HouseholdConfig::default().validate().expect("valid");
    }

    #[test]
    fn rejects_empty_decumulation_order() {
        let mut cfg = HouseholdConfig::default();
        cfg.strategy.decumulation.clear();
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::EmptyOrder("decumulation"))
        ));
    }

    #[test]
    fn rejects_missing_bracket_table() {
        let mut cfg = HouseholdConfig::default();
        cfg.tax_table.provincial.clear();
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::MissingBrackets("provincial"))
        ));
    }

    #[test]
    fn rejects_stream_owned_by_absent_person() {
        let mut cfg = HouseholdConfig::default();
        cfg.income_streams.push(IncomeStream {
            owner: 1,
            annual_amount: 1_000.0,
            growth: 0.0,
            taxable: true,
            start: TimePoint::Calendar(2030.0),
            end: TimePoint::Calendar(2035.0),
        });
        assert!(matches!(cfg.validate(), Err(ConfigError::BadOwner { .. })));
    }

    #[test]
    fn unknown_bucket_identifier_fails_deserialization() {
        let err = serde_json::from_str::<Strategy>(
            r#"{"accumulation":["tax-free","mystery-bucket"],"decumulation":["cash"]}"#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn inflated_table_scales_thresholds_not_rates() {
        let table = TaxTable::default();
        let doubled = table.inflated(2.0);
        assert_eq!(doubled.federal[1].threshold, table.federal[1].threshold * 2.0);
        assert_eq!(doubled.federal[1].rate, table.federal[1].rate);
        assert_eq!(
            doubled.oas_clawback_threshold,
            table.oas_clawback_threshold * 2.0
        );
    }
}
