use super::types::{AccountSet, AllocationReport, BucketFill, BucketKind};

/// Annual contribution room for one person, computed by the caller for the
/// simulated year (skip-first-year flags already applied).
#[derive(Debug, Clone, Copy, Default)]
pub struct ContributionRoom {
    pub tfsa: f64,
    pub rrsp: f64,
    pub crypto: f64,
}

const EPS: f64 = 1e-9;

/// Distribute a non-negative surplus across the accumulation order.
///
/// Capped buckets fill person 1 then person 2 against each person's room;
/// unlimited buckets (taxable, cash) split evenly between living people and
/// absorb whatever is left. Any residual after the full order falls through
/// unassigned; that is an accepted edge case, not an error.
pub fn allocate_surplus(
    surplus: f64,
    order: &[BucketKind],
    accounts: [&mut AccountSet; 2],
    alive: [bool; 2],
    rooms: [ContributionRoom; 2],
) -> AllocationReport {
    let mut report = AllocationReport::default();
    let mut remaining = surplus.max(0.0);
    let [first, second] = accounts;
    let mut accounts = [first, second];
    let mut rooms = rooms;

    for &bucket in order {
        if remaining <= EPS {
            break;
        }
        match bucket {
            BucketKind::TaxFree => {
                for person in 0..2 {
                    if !alive[person] {
                        continue;
                    }
                    let fill = remaining.min(rooms[person].tfsa).max(0.0);
                    if fill > 0.0 {
                        accounts[person].tfsa += fill;
                        rooms[person].tfsa -= fill;
                        remaining -= fill;
                        report.fills.push(BucketFill { person, bucket, amount: fill });
                    }
                }
            }
            BucketKind::TaxDeferred => {
                for person in 0..2 {
                    if !alive[person] {
                        continue;
                    }
                    let fill = remaining.min(rooms[person].rrsp).max(0.0);
                    if fill > 0.0 {
                        accounts[person].rrsp += fill;
                        rooms[person].rrsp -= fill;
                        remaining -= fill;
                        report.fills.push(BucketFill { person, bucket, amount: fill });
                    }
                }
            }
            BucketKind::CapitalAsset => {
                for person in 0..2 {
                    if !alive[person] {
                        continue;
                    }
                    let fill = remaining.min(rooms[person].crypto).max(0.0);
                    if fill > 0.0 {
                        accounts[person].crypto += fill;
                        accounts[person].crypto_acb += fill;
                        rooms[person].crypto -= fill;
                        remaining -= fill;
                        report.fills.push(BucketFill { person, bucket, amount: fill });
                    }
                }
            }
            BucketKind::Taxable | BucketKind::Cash => {
                let living = alive.iter().filter(|a| **a).count();
                if living == 0 {
                    continue;
                }
                let share = remaining / living as f64;
                for person in 0..2 {
                    if !alive[person] {
                        continue;
                    }
                    match bucket {
                        BucketKind::Taxable => {
                            accounts[person].non_registered += share;
                            accounts[person].non_registered_acb += share;
                        }
                        BucketKind::Cash => accounts[person].cash += share,
                        _ => unreachable!(),
                    }
                    report.fills.push(BucketFill { person, bucket, amount: share });
                }
                remaining = 0.0;
            }
        }
    }

    report.unassigned = remaining.max(0.0);
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{prop_assert, proptest};

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= 1e-6,
            "expected {expected}, got {actual}"
        );
    }

    fn room(tfsa: f64, rrsp: f64, crypto: f64) -> ContributionRoom {
        ContributionRoom { tfsa, rrsp, crypto }
    }

    #[test]
    fn fills_capped_buckets_person_one_first() {
        let mut a = AccountSet::default();
        let mut b = AccountSet::default();
        let report = allocate_surplus(
            10_000.0,
            &[BucketKind::TaxFree],
            [&mut a, &mut b],
            [true, true],
            [room(7_000.0, 0.0, 0.0), room(7_000.0, 0.0, 0.0)],
        );
        assert_approx(a.tfsa, 7_000.0);
        assert_approx(b.tfsa, 3_000.0);
        assert_approx(report.unassigned, 0.0);
    }

    #[test]
    fn unlimited_bucket_splits_evenly_between_living() {
        let mut a = AccountSet::default();
        let mut b = AccountSet::default();
        let report = allocate_surplus(
            9_000.0,
            &[BucketKind::Taxable],
            [&mut a, &mut b],
            [true, true],
            [room(0.0, 0.0, 0.0); 2],
        );
        assert_approx(a.non_registered, 4_500.0);
        assert_approx(b.non_registered, 4_500.0);
        assert_approx(a.non_registered_acb, 4_500.0);
        assert_approx(report.unassigned, 0.0);
    }

    #[test]
    fn sole_survivor_takes_full_even_split() {
        let mut a = AccountSet::default();
        let mut b = AccountSet::default();
        allocate_surplus(
            9_000.0,
            &[BucketKind::Cash],
            [&mut a, &mut b],
            [true, false],
            [room(0.0, 0.0, 0.0); 2],
        );
        assert_approx(a.cash, 9_000.0);
        assert_approx(b.cash, 0.0);
    }

    #[test]
    fn residual_after_full_order_is_unassigned() {
        let mut a = AccountSet::default();
        let mut b = AccountSet::default();
        let report = allocate_surplus(
            20_000.0,
            &[BucketKind::TaxFree, BucketKind::CapitalAsset],
            [&mut a, &mut b],
            [true, false],
            [room(7_000.0, 0.0, 5_000.0), room(7_000.0, 0.0, 5_000.0)],
        );
        assert_approx(a.tfsa, 7_000.0);
        assert_approx(a.crypto, 5_000.0);
        assert_approx(report.unassigned, 8_000.0);
    }

    #[test]
    fn capital_asset_contributions_raise_cost_base() {
        let mut a = AccountSet::default();
        let mut b = AccountSet::default();
        allocate_surplus(
            3_000.0,
            &[BucketKind::CapitalAsset],
            [&mut a, &mut b],
            [true, false],
            [room(0.0, 0.0, 5_000.0); 2],
        );
        assert_approx(a.crypto, 3_000.0);
        assert_approx(a.crypto_acb, 3_000.0);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(64))]

        #[test]
        fn prop_allocation_conserves_every_dollar(
            surplus in 0u32..500_000,
            tfsa_room in 0u32..20_000,
            rrsp_room in 0u32..40_000,
            crypto_room in 0u32..15_000,
            second_alive in proptest::bool::ANY,
            include_unlimited in proptest::bool::ANY,
        ) {
            let mut a = AccountSet::default();
            let mut b = AccountSet::default();
            let mut order = vec![
                BucketKind::TaxFree,
                BucketKind::TaxDeferred,
                BucketKind::CapitalAsset,
            ];
            if include_unlimited {
                order.push(BucketKind::Cash);
            }
            let rooms = [
                room(tfsa_room as f64, rrsp_room as f64, crypto_room as f64),
                room(tfsa_room as f64, rrsp_room as f64, crypto_room as f64),
            ];
            let report = allocate_surplus(
                surplus as f64,
                &order,
                [&mut a, &mut b],
                [true, second_alive],
                rooms,
            );
            let placed = report.placed_total();
            prop_assert!((placed + report.unassigned - surplus as f64).abs() <= 1e-6);
            prop_assert!(
                (a.liquid_total() + b.liquid_total() - placed).abs() <= 1e-6
            );
        }
    }
}
