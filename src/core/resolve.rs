use super::config::TaxTable;
use super::tax::marginal_rate_at;
use super::types::{
    AccountSet, BucketKind, DeferredAccount, ResolutionReport, WithdrawalRecord,
};

const EPS: f64 = 1e-9;
/// Draws smaller than this advance the cursor instead of looping on
/// near-zero amounts; the unresolved remainder stays visible either way.
const MIN_DRAW: f64 = 0.01;
/// Running incomes closer than this are treated as tied.
const TIE_TOLERANCE: f64 = 1.0;
/// Hard bound on iterations per pass; guards numeric edge cases where a
/// ceiling sits a rounding error above current income.
const MAX_PASS_ITERATIONS: u32 = 256;
const CAPITAL_GAINS_INCLUSION: f64 = 0.5;
const MAX_MARGINAL: f64 = 0.90;

/// One person's withdrawable state, borrowed for the duration of a resolver
/// call.
pub struct ResolveTarget<'a> {
    pub accounts: &'a mut AccountSet,
    pub alive: bool,
    pub age: i32,
    /// Remaining LIF withdrawal allowance for the year.
    pub lif_cap_remaining: &'a mut f64,
}

pub struct ResolveParams<'a> {
    pub order: &'a [BucketKind],
    pub table: &'a TaxTable,
    pub oas_received: [f64; 2],
    pub clawback_optimization: bool,
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum PassCeiling {
    LowestBracket,
    ClawbackThreshold,
    Unbounded,
}

/// Meet a positive deficit by withdrawing across the decumulation order in
/// three sweeps: capped at the lowest bracket, capped at the clawback
/// threshold, then unconstrained. Returns a structured report; the caller
/// folds the taxable additions into its running incomes.
pub fn resolve_deficit(
    deficit: f64,
    mut targets: [ResolveTarget; 2],
    starting_taxable_income: [f64; 2],
    params: &ResolveParams,
) -> ResolutionReport {
    let mut report = ResolutionReport::default();
    let mut remaining = deficit.max(0.0);
    let mut incomes = starting_taxable_income;

    let clawback_pass_applies = params.clawback_optimization
        && targets.iter().any(|t| t.alive && t.age >= 65);

    for ceiling_kind in [
        PassCeiling::LowestBracket,
        PassCeiling::ClawbackThreshold,
        PassCeiling::Unbounded,
    ] {
        if remaining <= EPS {
            break;
        }
        let ceiling = match ceiling_kind {
            PassCeiling::LowestBracket => match params.table.lowest_bracket_ceiling() {
                Some(c) => Some(c),
                None => continue,
            },
            PassCeiling::ClawbackThreshold => {
                if !clawback_pass_applies {
                    continue;
                }
                Some(params.table.oas_clawback_threshold)
            }
            PassCeiling::Unbounded => None,
        };
        remaining = run_pass(
            remaining,
            ceiling,
            &mut targets,
            &mut incomes,
            params,
            &mut report,
        );
    }

    report.unresolved = remaining.max(0.0);
    report.net_obtained = report.withdrawals.iter().map(|w| w.net).sum();
    report
}

fn run_pass(
    deficit: f64,
    ceiling: Option<f64>,
    targets: &mut [ResolveTarget; 2],
    incomes: &mut [f64; 2],
    params: &ResolveParams,
    report: &mut ResolutionReport,
) -> f64 {
    let mut remaining = deficit;
    let mut cursor = [0usize; 2];

    for _ in 0..MAX_PASS_ITERATIONS {
        if remaining <= EPS {
            break;
        }

        let pos = [
            next_eligible(&targets[0], cursor[0], incomes[0], ceiling, params),
            next_eligible(&targets[1], cursor[1], incomes[1], ceiling, params),
        ];
        for person in 0..2 {
            if let Some(p) = pos[person] {
                cursor[person] = p;
            }
        }

        let drawn = match (pos[0], pos[1]) {
            (None, None) => break,
            (Some(_), None) => {
                draw_step(0, remaining, ceiling, targets, incomes, params, report, &mut cursor)
            }
            (None, Some(_)) => {
                draw_step(1, remaining, ceiling, targets, incomes, params, report, &mut cursor)
            }
            (Some(a), Some(b)) if a < b => {
                draw_step(0, remaining, ceiling, targets, incomes, params, report, &mut cursor)
            }
            (Some(a), Some(b)) if b < a => {
                draw_step(1, remaining, ceiling, targets, incomes, params, report, &mut cursor)
            }
            (Some(position), Some(_)) => {
                // Tied position. Taxable buckets route to whichever person
                // has the lower running income; non-taxable buckets and
                // near-equal incomes split evenly.
                let bucket = params.order[position];
                if bucket.is_taxable() && (incomes[0] - incomes[1]).abs() > TIE_TOLERANCE {
                    let person = if incomes[0] < incomes[1] { 0 } else { 1 };
                    draw_step(person, remaining, ceiling, targets, incomes, params, report, &mut cursor)
                } else {
                    let half = remaining / 2.0;
                    let first =
                        draw_step(0, half, ceiling, targets, incomes, params, report, &mut cursor);
                    let second =
                        draw_step(1, half, ceiling, targets, incomes, params, report, &mut cursor);
                    first + second
                }
            }
        };

        remaining -= drawn;
    }

    remaining
}

/// Draw toward `net_target` from one person's bucket at their cursor.
/// A draw too small to matter advances the cursor so the pass always
/// terminates.
#[allow(clippy::too_many_arguments)]
fn draw_step(
    person: usize,
    net_target: f64,
    ceiling: Option<f64>,
    targets: &mut [ResolveTarget; 2],
    incomes: &mut [f64; 2],
    params: &ResolveParams,
    report: &mut ResolutionReport,
    cursor: &mut [usize; 2],
) -> f64 {
    if net_target <= EPS || cursor[person] >= params.order.len() {
        return 0.0;
    }
    let bucket = params.order[cursor[person]];
    let oas = params.oas_received[person];
    let target = &mut targets[person];
    let income = &mut incomes[person];

    let net = match bucket {
        BucketKind::TaxFree => {
            let x = target.accounts.tfsa.min(net_target);
            target.accounts.tfsa -= x;
            if x > 0.0 {
                report.nontaxable_added[person] += x;
                report.withdrawals.push(WithdrawalRecord {
                    person,
                    bucket,
                    sub_account: None,
                    gross: x,
                    net: x,
                    acb_consumed: 0.0,
                    realized_gain: 0.0,
                    taxable_portion: 0.0,
                });
            }
            x
        }
        BucketKind::Cash => {
            let x = target.accounts.cash.min(net_target);
            target.accounts.cash -= x;
            if x > 0.0 {
                report.nontaxable_added[person] += x;
                report.withdrawals.push(WithdrawalRecord {
                    person,
                    bucket,
                    sub_account: None,
                    gross: x,
                    net: x,
                    acb_consumed: 0.0,
                    realized_gain: 0.0,
                    taxable_portion: 0.0,
                });
            }
            x
        }
        BucketKind::TaxDeferred => draw_compound(
            person, net_target, ceiling, target, income, oas, params, report,
        ),
        BucketKind::Taxable => {
            let (balance, acb) = {
                let a = &mut *target.accounts;
                (&mut a.non_registered, &mut a.non_registered_acb)
            };
            draw_capital(
                person, bucket, net_target, ceiling, balance, acb, income, oas, params, report,
            )
        }
        BucketKind::CapitalAsset => {
            let (balance, acb) = {
                let a = &mut *target.accounts;
                (&mut a.crypto, &mut a.crypto_acb)
            };
            draw_capital(
                person, bucket, net_target, ceiling, balance, acb, income, oas, params, report,
            )
        }
    };

    if net < MIN_DRAW.min(net_target) {
        cursor[person] += 1;
    }
    net
}

/// The compound long-term registered slot: drains rrif, lif, lira then rrsp
/// in strict sequence. Internal to the bucket and invisible to the order
/// walk.
#[allow(clippy::too_many_arguments)]
fn draw_compound(
    person: usize,
    net_target: f64,
    ceiling: Option<f64>,
    target: &mut ResolveTarget,
    income: &mut f64,
    oas: f64,
    params: &ResolveParams,
    report: &mut ResolutionReport,
) -> f64 {
    let mut net_needed = net_target;
    let mut net_total = 0.0;

    for sub in [
        DeferredAccount::Rrif,
        DeferredAccount::Lif,
        DeferredAccount::Lira,
        DeferredAccount::Rrsp,
    ] {
        if net_needed <= EPS {
            break;
        }
        let marginal = marginal_rate_at(*income, params.table, oas).min(MAX_MARGINAL);
        let net_per_gross = 1.0 - marginal;

        let balance = match sub {
            DeferredAccount::Rrif => target.accounts.rrif,
            DeferredAccount::Lif => target.accounts.lif,
            DeferredAccount::Lira => target.accounts.lira,
            DeferredAccount::Rrsp => target.accounts.rrsp,
        };
        let mut gross_cap = balance;
        if sub == DeferredAccount::Lif {
            gross_cap = gross_cap.min((*target.lif_cap_remaining).max(0.0));
        }
        if let Some(c) = ceiling {
            gross_cap = gross_cap.min((c - *income).max(0.0));
        }
        let gross = (net_needed / net_per_gross).min(gross_cap).max(0.0);
        if gross <= EPS {
            continue;
        }
        let net = gross * net_per_gross;

        match sub {
            DeferredAccount::Rrif => target.accounts.rrif -= gross,
            DeferredAccount::Lif => {
                target.accounts.lif -= gross;
                *target.lif_cap_remaining -= gross;
            }
            DeferredAccount::Lira => target.accounts.lira -= gross,
            DeferredAccount::Rrsp => target.accounts.rrsp -= gross,
        }
        *income += gross;
        report.taxable_added[person] += gross;
        report.withdrawals.push(WithdrawalRecord {
            person,
            bucket: BucketKind::TaxDeferred,
            sub_account: Some(sub),
            gross,
            net,
            acb_consumed: 0.0,
            realized_gain: 0.0,
            taxable_portion: gross,
        });

        net_total += net;
        net_needed -= net;
    }

    net_total
}

/// Capital-gain bucket draw: consumes cost base proportionally to the
/// fraction of balance liquidated and recognizes half the realized gain as
/// taxable income.
#[allow(clippy::too_many_arguments)]
fn draw_capital(
    person: usize,
    bucket: BucketKind,
    net_target: f64,
    ceiling: Option<f64>,
    balance: &mut f64,
    acb: &mut f64,
    income: &mut f64,
    oas: f64,
    params: &ResolveParams,
    report: &mut ResolutionReport,
) -> f64 {
    if *balance <= EPS || net_target <= EPS {
        return 0.0;
    }

    let gain_fraction = (1.0 - (*acb / *balance)).clamp(0.0, 1.0);
    let taxable_per_gross = gain_fraction * CAPITAL_GAINS_INCLUSION;
    let marginal = marginal_rate_at(*income, params.table, oas).min(MAX_MARGINAL);
    let net_per_gross = 1.0 - taxable_per_gross * marginal;

    let mut gross_cap = *balance;
    if let Some(c) = ceiling {
        if taxable_per_gross > EPS {
            gross_cap = gross_cap.min((c - *income).max(0.0) / taxable_per_gross);
        }
    }
    let gross = (net_target / net_per_gross).min(gross_cap).max(0.0);
    if gross <= EPS {
        return 0.0;
    }

    let acb_consumed = (*acb * (gross / *balance)).min(*acb);
    *balance -= gross;
    *acb = (*acb - acb_consumed).max(0.0).min(*balance);

    let realized_gain = (gross - acb_consumed).max(0.0);
    let taxable_portion = realized_gain * CAPITAL_GAINS_INCLUSION;
    let net = gross - taxable_portion * marginal;

    *income += taxable_portion;
    report.taxable_added[person] += taxable_portion;
    report.nontaxable_added[person] += gross - taxable_portion;
    report.withdrawals.push(WithdrawalRecord {
        person,
        bucket,
        sub_account: None,
        gross,
        net,
        acb_consumed,
        realized_gain,
        taxable_portion,
    });

    net
}

/// Find the next bucket position at or after `from` that this person can
/// draw from under the active ceiling.
fn next_eligible(
    target: &ResolveTarget,
    from: usize,
    income: f64,
    ceiling: Option<f64>,
    params: &ResolveParams,
) -> Option<usize> {
    if !target.alive {
        return None;
    }
    for (offset, &bucket) in params.order[from.min(params.order.len())..].iter().enumerate() {
        let position = from + offset;
        let balance = match bucket {
            BucketKind::TaxFree => target.accounts.tfsa,
            BucketKind::Cash => target.accounts.cash,
            BucketKind::TaxDeferred => target.accounts.deferred_total(),
            BucketKind::Taxable => target.accounts.non_registered,
            BucketKind::CapitalAsset => target.accounts.crypto,
        };
        if balance <= EPS {
            continue;
        }
        if bucket.is_taxable() {
            if let Some(c) = ceiling {
                let has_room = match bucket {
                    BucketKind::TaxDeferred => c - income > EPS,
                    // A capital bucket with no unrealized gain adds no
                    // taxable income and is always in bounds.
                    BucketKind::Taxable => {
                        let a = target.accounts.non_registered_acb;
                        a >= balance - EPS || c - income > EPS
                    }
                    BucketKind::CapitalAsset => {
                        let a = target.accounts.crypto_acb;
                        a >= balance - EPS || c - income > EPS
                    }
                    _ => true,
                };
                if !has_room {
                    continue;
                }
            }
        }
        return Some(position);
    }
    None
}
