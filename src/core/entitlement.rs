//! Lifetime pension entitlement from a full earnings history: base benefit
//! with caregiver and general drop-out provisions, plus the two-phase
//! enhancement overlay. Independent of the simulation loop; run once per
//! household member to seed the benefit inputs.

/// Year-maximum pensionable earnings, 1966 onward.
const YMPE_FIRST_YEAR: i32 = 1966;
const YMPE: &[f64] = &[
    5_000.0, 5_000.0, 5_100.0, 5_200.0, 5_300.0, 5_400.0, 5_500.0, 5_900.0, 6_600.0, 7_400.0,
    8_300.0, 9_300.0, 10_400.0, 11_700.0, 13_100.0, 14_700.0, 16_500.0, 18_500.0, 20_800.0,
    23_400.0, 25_800.0, 25_900.0, 26_500.0, 27_700.0, 28_900.0, 30_500.0, 32_200.0, 33_400.0,
    34_400.0, 34_900.0, 35_400.0, 35_800.0, 36_900.0, 37_400.0, 37_600.0, 38_300.0, 39_100.0,
    39_900.0, 40_500.0, 41_100.0, 42_100.0, 43_700.0, 44_900.0, 46_300.0, 47_200.0, 48_300.0,
    50_100.0, 51_100.0, 52_500.0, 53_600.0, 54_900.0, 55_300.0, 55_900.0, 57_400.0, 58_700.0,
    61_600.0, 64_900.0, 66_600.0, 68_500.0, 71_300.0, 74_600.0,
];

/// Year-additional-maximum pensionable earnings, 2024 onward.
const YAMPE_FIRST_YEAR: i32 = 2024;
const YAMPE: &[f64] = &[73_200.0, 81_200.0, 85_000.0];

const CONTRIBUTORY_START_AGE: i32 = 18;
const GENERAL_DROPOUT_RATE: f64 = 0.17;
const MIN_KEPT_MONTHS: u32 = 120;
const CAREGIVER_RATIO_FLOOR: f64 = 0.8;
const BASE_REPLACEMENT: f64 = 0.25;
const ENHANCEMENT_START_YEAR: i32 = 2019;
const ENHANCEMENT_TIER_TWO_START_YEAR: i32 = 2024;
const ENHANCEMENT_FIRST_REPLACEMENT: f64 = 0.0833;
const ENHANCEMENT_SECOND_REPLACEMENT: f64 = 0.3333;
/// Fixed 40-year denominator for both enhancement tiers, regardless of
/// actual contributory months.
const ENHANCEMENT_MONTHS: f64 = 480.0;

#[derive(Debug, Clone, Copy)]
pub struct EarningsRecord {
    pub year: i32,
    pub earnings: f64,
}

#[derive(Debug, Clone)]
pub struct EntitlementInput {
    pub records: Vec<EarningsRecord>,
    pub birth_year: i32,
    pub start_year: i32,
    pub caregiver_years: Vec<i32>,
}

/// Monthly base amount, enhancement components, and the diagnostic counts
/// needed to audit the drop-out arithmetic.
#[derive(Debug, Clone, Copy, Default)]
pub struct Entitlement {
    pub monthly_base: f64,
    pub monthly_enhancement_first: f64,
    pub monthly_enhancement_second: f64,
    pub contributory_months: u32,
    pub caregiver_months_dropped: u32,
    pub general_months_dropped: u32,
    pub years_averaged: u32,
}

impl Entitlement {
    pub fn monthly_total(&self) -> f64 {
        self.monthly_base + self.monthly_enhancement_first + self.monthly_enhancement_second
    }

    pub fn annual_total(&self) -> f64 {
        self.monthly_total() * 12.0
    }
}

fn ceiling_for(year: i32) -> f64 {
    let idx = (year - YMPE_FIRST_YEAR).clamp(0, YMPE.len() as i32 - 1) as usize;
    YMPE[idx]
}

fn secondary_ceiling_for(year: i32) -> f64 {
    if year < YAMPE_FIRST_YEAR {
        return ceiling_for(year);
    }
    let idx = ((year - YAMPE_FIRST_YEAR) as usize).min(YAMPE.len() - 1);
    YAMPE[idx]
}

/// Five-year trailing average of the ceiling ending at the start year.
fn trailing_average_ceiling(start_year: i32) -> f64 {
    let sum: f64 = (0..5).map(|back| ceiling_for(start_year - back)).sum();
    sum / 5.0
}

pub fn compute_entitlement(input: &EntitlementInput) -> Entitlement {
    let window_start = input.birth_year + CONTRIBUTORY_START_AGE;
    let window_end = input.start_year; // exclusive
    if window_end <= window_start {
        return Entitlement::default();
    }

    let contributory_months = ((window_end - window_start) * 12).max(0) as u32;

    // Pensionable ratio per contributory year; years without a record earn 0.
    let mut ratios: Vec<(i32, f64)> = (window_start..window_end)
        .map(|year| {
            let earnings = input
                .records
                .iter()
                .find(|r| r.year == year)
                .map(|r| r.earnings.max(0.0))
                .unwrap_or(0.0);
            let ceiling = ceiling_for(year);
            (year, (earnings.min(ceiling) / ceiling).clamp(0.0, 1.0))
        })
        .collect();

    // Caregiver drop-out first: it shrinks the month base the general
    // drop-out is sized against.
    let mut caregiver_months_dropped = 0_u32;
    ratios.retain(|(year, ratio)| {
        let drop = input.caregiver_years.contains(year) && *ratio < CAREGIVER_RATIO_FLOOR;
        if drop {
            caregiver_months_dropped += 12;
        }
        !drop
    });
    let months_after_caregiver = contributory_months.saturating_sub(caregiver_months_dropped);

    // General drop-out: floor(17% of remaining months), never reducing the
    // kept months below the statutory floor. Month counts always floor.
    let mut general_months = (GENERAL_DROPOUT_RATE * months_after_caregiver as f64).floor() as u32;
    if months_after_caregiver.saturating_sub(general_months) < MIN_KEPT_MONTHS {
        general_months = months_after_caregiver.saturating_sub(MIN_KEPT_MONTHS);
    }
    let dropout_years = (general_months / 12) as usize;

    ratios.sort_by(|a, b| a.1.total_cmp(&b.1));
    let kept = ratios.split_off(dropout_years.min(ratios.len()));
    let general_months_dropped = (ratios.len() as u32) * 12;

    let average_ratio = if kept.is_empty() {
        0.0
    } else {
        kept.iter().map(|(_, r)| r).sum::<f64>() / kept.len() as f64
    };
    let monthly_base =
        average_ratio * trailing_average_ceiling(input.start_year) * BASE_REPLACEMENT / 12.0;

    // Enhancement overlay: no drop-out, fixed 480-month denominator, earnings
    // inflated to the start-year ceilings.
    let start_ceiling = ceiling_for(input.start_year);
    let start_secondary = secondary_ceiling_for(input.start_year);
    let mut tier_one_sum = 0.0;
    let mut tier_two_sum = 0.0;
    for record in &input.records {
        if record.year < ENHANCEMENT_START_YEAR || record.year >= window_end {
            continue;
        }
        let ceiling = ceiling_for(record.year);
        tier_one_sum += (record.earnings.max(0.0).min(ceiling) / ceiling) * start_ceiling;

        if record.year >= ENHANCEMENT_TIER_TWO_START_YEAR {
            let secondary = secondary_ceiling_for(record.year);
            let band = secondary - ceiling;
            if band > 0.0 {
                let in_band = (record.earnings.min(secondary) - ceiling).max(0.0);
                tier_two_sum += (in_band / band) * (start_secondary - start_ceiling).max(0.0);
            }
        }
    }
    let monthly_enhancement_first = ENHANCEMENT_FIRST_REPLACEMENT * tier_one_sum / ENHANCEMENT_MONTHS;
    let monthly_enhancement_second =
        ENHANCEMENT_SECOND_REPLACEMENT * tier_two_sum / ENHANCEMENT_MONTHS;

    Entitlement {
        monthly_base,
        monthly_enhancement_first,
        monthly_enhancement_second,
        contributory_months,
        caregiver_months_dropped,
        general_months_dropped,
        years_averaged: kept.len() as u32,
    }
}
