use serde::{Deserialize, Serialize};

/// One named slot in an accumulation or decumulation strategy order.
///
/// `TaxDeferred` is a compound slot on the decumulation side: drawing from it
/// drains rrif, lif, lira and rrsp in that fixed sequence.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BucketKind {
    TaxFree,
    TaxDeferred,
    Taxable,
    Cash,
    CapitalAsset,
}

impl BucketKind {
    /// Buckets whose withdrawals add to taxable income and are therefore
    /// constrained by the resolver's pass ceilings.
    pub fn is_taxable(self) -> bool {
        matches!(
            self,
            BucketKind::TaxDeferred | BucketKind::Taxable | BucketKind::CapitalAsset
        )
    }
}

/// Sub-accounts drained, in order, by the compound `TaxDeferred` slot.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeferredAccount {
    Rrif,
    Lif,
    Lira,
    Rrsp,
}

/// Named balances for one person. Balances are never negative; all mutation
/// clamps against available room or balance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountSet {
    pub tfsa: f64,
    pub rrsp: f64,
    pub lira: f64,
    pub lif: f64,
    pub rrif: f64,
    pub non_registered: f64,
    pub non_registered_acb: f64,
    pub cash: f64,
    pub crypto: f64,
    pub crypto_acb: f64,
}

impl AccountSet {
    pub fn liquid_total(&self) -> f64 {
        self.tfsa
            + self.rrsp
            + self.lira
            + self.lif
            + self.rrif
            + self.non_registered
            + self.cash
            + self.crypto
    }

    pub fn deferred_total(&self) -> f64 {
        self.rrif + self.lif + self.lira + self.rrsp
    }

    /// Clamp every balance non-negative and both cost bases into legal range.
    pub fn normalize(&mut self) {
        for balance in [
            &mut self.tfsa,
            &mut self.rrsp,
            &mut self.lira,
            &mut self.lif,
            &mut self.rrif,
            &mut self.non_registered,
            &mut self.cash,
            &mut self.crypto,
        ] {
            *balance = balance.max(0.0);
        }
        self.non_registered_acb = self.non_registered_acb.max(0.0).min(self.non_registered);
        self.crypto_acb = self.crypto_acb.max(0.0).min(self.crypto);
    }
}

/// One audited draw produced by the deficit resolver.
#[derive(Debug, Clone, Serialize)]
pub struct WithdrawalRecord {
    pub person: usize,
    pub bucket: BucketKind,
    /// Set for draws routed through the compound tax-deferred slot.
    pub sub_account: Option<DeferredAccount>,
    pub gross: f64,
    pub net: f64,
    pub acb_consumed: f64,
    pub realized_gain: f64,
    pub taxable_portion: f64,
}

/// Full outcome of one resolver invocation. The conservation contract is
/// `net_obtained + unresolved == requested deficit` to within float noise.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResolutionReport {
    pub net_obtained: f64,
    pub unresolved: f64,
    pub taxable_added: [f64; 2],
    pub nontaxable_added: [f64; 2],
    pub withdrawals: Vec<WithdrawalRecord>,
}

/// One fill placed by the surplus allocator.
#[derive(Debug, Clone, Serialize)]
pub struct BucketFill {
    pub person: usize,
    pub bucket: BucketKind,
    pub amount: f64,
}

/// Outcome of one allocator invocation. Conservation contract:
/// the fills plus `unassigned` sum to the surplus exactly.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AllocationReport {
    pub fills: Vec<BucketFill>,
    pub unassigned: f64,
}

impl AllocationReport {
    pub fn placed_total(&self) -> f64 {
        self.fills.iter().map(|f| f.amount).sum()
    }
}

/// Per-person slice of one projection year.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonYear {
    pub age: i32,
    pub alive: bool,
    pub retired: bool,
    pub employment: f64,
    pub db_pension: f64,
    pub db_bridge: f64,
    pub cpp: f64,
    pub oas: f64,
    pub rrif_minimum: f64,
    pub streams_taxable: f64,
    pub streams_nontaxable: f64,
    pub windfalls_taxable: f64,
    pub windfalls_nontaxable: f64,
    pub taxable_income: f64,
    pub tax: f64,
    pub marginal_rate: f64,
    pub oas_clawback: f64,
    pub accounts: AccountSet,
}

/// Household-level slice of one projection year.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HouseholdYear {
    pub expenses: f64,
    pub mortgage_interest: f64,
    pub mortgage_principal: f64,
    pub debt_payment: f64,
    pub debt_balance: f64,
    pub surplus: f64,
    pub unassigned_surplus: f64,
    pub unresolved_deficit: f64,
    pub real_estate_value: f64,
    pub real_estate_debt: f64,
    /// Any property whose stated payment no longer covers interest this year.
    pub payment_too_low: bool,
    /// Longest remaining amortization among mortgaged properties; `None`
    /// when a loan can never be paid off at its stated payment.
    pub mortgage_years_remaining: Option<f64>,
    pub net_worth: f64,
}

/// The engine's per-year output in detailed mode. Immutable once produced;
/// the ordered sequence for one run is the trajectory.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionRow {
    pub year: i32,
    pub persons: [PersonYear; 2],
    pub household: HouseholdYear,
    pub events: Vec<String>,
}
