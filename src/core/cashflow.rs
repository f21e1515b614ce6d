use super::config::{IncomeStream, Person, Windfall};
use super::tax::{BenefitKind, adjusted_benefit};

/// All inflows recognized for one person in one simulated year. Additive and
/// never negative.
#[derive(Debug, Clone, Copy, Default)]
pub struct InflowBreakdown {
    pub employment: f64,
    pub db_pension: f64,
    pub db_bridge: f64,
    pub cpp: f64,
    pub oas: f64,
    pub streams_taxable: f64,
    pub streams_nontaxable: f64,
    pub windfalls_taxable: f64,
    pub windfalls_nontaxable: f64,
}

impl InflowBreakdown {
    pub fn total(&self) -> f64 {
        self.employment
            + self.db_pension
            + self.db_bridge
            + self.cpp
            + self.oas
            + self.streams_taxable
            + self.streams_nontaxable
            + self.windfalls_taxable
            + self.windfalls_nontaxable
    }

    /// The portion that counts toward taxable income.
    pub fn taxable(&self) -> f64 {
        self.employment
            + self.db_pension
            + self.db_bridge
            + self.cpp
            + self.oas
            + self.streams_taxable
            + self.windfalls_taxable
    }
}

pub fn person_inflows(
    person_idx: usize,
    cfg: &Person,
    age: i32,
    retired: bool,
    employment_income: f64,
    year: i32,
    price_index: f64,
    streams: &[IncomeStream],
    windfalls: &[Windfall],
) -> InflowBreakdown {
    let mut inflows = InflowBreakdown::default();

    if !retired {
        inflows.employment = employment_income.max(0.0);
    }

    if age >= cfg.db_pension.start_age as i32 {
        let index = if cfg.db_pension.indexed { price_index } else { 1.0 };
        inflows.db_pension = cfg.db_pension.annual.max(0.0) * index;
        // The bridge component only runs until 65.
        if age < 65 {
            inflows.db_bridge = cfg.db_pension.bridge_annual.max(0.0) * index;
        }
    }

    if cfg.cpp.enabled && age >= cfg.cpp.start_age as i32 {
        inflows.cpp = adjusted_benefit(
            cfg.cpp.annual_max,
            cfg.cpp.start_age,
            cfg.cpp.scale,
            cfg.retirement_age,
            BenefitKind::Cpp,
        ) * price_index;
    }
    if cfg.oas.enabled && age >= cfg.oas.start_age as i32 {
        inflows.oas = adjusted_benefit(
            cfg.oas.annual_max,
            cfg.oas.start_age,
            cfg.oas.scale,
            cfg.retirement_age,
            BenefitKind::Oas,
        ) * price_index;
    }

    for stream in streams.iter().filter(|s| s.owner == person_idx) {
        let amount = stream_amount(stream, cfg, year);
        if stream.taxable {
            inflows.streams_taxable += amount;
        } else {
            inflows.streams_nontaxable += amount;
        }
    }

    for windfall in windfalls.iter().filter(|w| w.owner == person_idx) {
        let amount = windfall_amount(windfall, cfg, year);
        if windfall.taxable {
            inflows.windfalls_taxable += amount;
        } else {
            inflows.windfalls_nontaxable += amount;
        }
    }

    inflows
}

/// Fraction of the calendar year `[year, year+1)` covered by `[start, end]`.
/// Partial first and last years pro-rate.
fn overlap_fraction(start: f64, end: f64, year: i32) -> f64 {
    let lo = (year as f64).max(start);
    let hi = ((year + 1) as f64).min(end);
    (hi - lo).clamp(0.0, 1.0)
}

fn stream_amount(stream: &IncomeStream, owner: &Person, year: i32) -> f64 {
    let start = stream.start.resolve(owner);
    let end = stream.end.resolve(owner);
    let fraction = overlap_fraction(start, end, year);
    if fraction <= 0.0 {
        return 0.0;
    }
    let years_running = (year as f64 - start).floor().max(0.0);
    stream.annual_amount.max(0.0) * (1.0 + stream.growth).powf(years_running) * fraction
}

fn windfall_amount(windfall: &Windfall, owner: &Person, year: i32) -> f64 {
    let start = windfall.start.resolve(owner);
    match windfall.end {
        // One-time: recognized in full in the year it lands.
        None => {
            if start.floor() as i32 == year {
                windfall.amount.max(0.0)
            } else {
                0.0
            }
        }
        Some(end) => {
            windfall.amount.max(0.0) * overlap_fraction(start, end.resolve(owner), year)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::TimePoint;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= 1e-6,
            "expected {expected}, got {actual}"
        );
    }

    fn owner() -> Person {
        Person {
            birth_year: 1980,
            retirement_age: 60,
            ..Person::default()
        }
    }

    #[test]
    fn stream_pro_rates_partial_first_and_last_years() {
        let stream = IncomeStream {
            owner: 0,
            annual_amount: 12_000.0,
            growth: 0.0,
            taxable: true,
            start: TimePoint::Calendar(2030.5),
            end: TimePoint::Calendar(2032.25),
        };
        let cfg = owner();
        assert_approx(stream_amount(&stream, &cfg, 2029), 0.0);
        assert_approx(stream_amount(&stream, &cfg, 2030), 6_000.0);
        assert_approx(stream_amount(&stream, &cfg, 2031), 12_000.0);
        assert_approx(stream_amount(&stream, &cfg, 2032), 3_000.0);
        assert_approx(stream_amount(&stream, &cfg, 2033), 0.0);
    }

    #[test]
    fn retirement_relative_stream_resolves_against_owner() {
        // Retirement year is 2040; the stream runs for the two years after.
        let stream = IncomeStream {
            owner: 0,
            annual_amount: 10_000.0,
            growth: 0.0,
            taxable: true,
            start: TimePoint::RetirementOffset(0.0),
            end: TimePoint::RetirementOffset(2.0),
        };
        let cfg = owner();
        assert_approx(stream_amount(&stream, &cfg, 2039), 0.0);
        assert_approx(stream_amount(&stream, &cfg, 2040), 10_000.0);
        assert_approx(stream_amount(&stream, &cfg, 2041), 10_000.0);
        assert_approx(stream_amount(&stream, &cfg, 2042), 0.0);
    }

    #[test]
    fn stream_growth_compounds_from_its_start() {
        let stream = IncomeStream {
            owner: 0,
            annual_amount: 1_000.0,
            growth: 0.10,
            taxable: true,
            start: TimePoint::Calendar(2030.0),
            end: TimePoint::Calendar(2040.0),
        };
        let cfg = owner();
        assert_approx(stream_amount(&stream, &cfg, 2030), 1_000.0);
        assert_approx(stream_amount(&stream, &cfg, 2032), 1_210.0);
    }

    #[test]
    fn one_time_windfall_lands_once() {
        let windfall = Windfall {
            owner: 0,
            amount: 50_000.0,
            taxable: false,
            start: TimePoint::Calendar(2031.7),
            end: None,
        };
        let cfg = owner();
        assert_approx(windfall_amount(&windfall, &cfg, 2030), 0.0);
        assert_approx(windfall_amount(&windfall, &cfg, 2031), 50_000.0);
        assert_approx(windfall_amount(&windfall, &cfg, 2032), 0.0);
    }

    #[test]
    fn bridge_pension_stops_at_sixty_five() {
        let mut cfg = owner();
        cfg.db_pension.annual = 30_000.0;
        cfg.db_pension.bridge_annual = 8_000.0;
        cfg.db_pension.start_age = 60;

        let at_60 = person_inflows(0, &cfg, 60, true, 0.0, 2040, 1.0, &[], &[]);
        assert_approx(at_60.db_pension, 30_000.0);
        assert_approx(at_60.db_bridge, 8_000.0);

        let at_65 = person_inflows(0, &cfg, 65, true, 0.0, 2045, 1.0, &[], &[]);
        assert_approx(at_65.db_pension, 30_000.0);
        assert_approx(at_65.db_bridge, 0.0);
    }

    #[test]
    fn employment_income_only_before_retirement() {
        let cfg = owner();
        let working = person_inflows(0, &cfg, 45, false, 90_000.0, 2025, 1.0, &[], &[]);
        assert_approx(working.employment, 90_000.0);
        let retired = person_inflows(0, &cfg, 61, true, 90_000.0, 2041, 1.0, &[], &[]);
        assert_approx(retired.employment, 0.0);
    }

    #[test]
    fn benefits_gated_by_flags_and_start_age() {
        let mut cfg = owner();
        cfg.cpp = crate::core::config::BenefitConfig {
            enabled: true,
            start_age: 65,
            annual_max: 17_000.0,
            scale: 1.0,
        };
        let before = person_inflows(0, &cfg, 64, true, 0.0, 2044, 1.0, &[], &[]);
        assert_approx(before.cpp, 0.0);
        let after = person_inflows(0, &cfg, 65, true, 0.0, 2045, 1.0, &[], &[]);
        assert!(after.cpp > 0.0);
    }
}
