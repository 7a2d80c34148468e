//! Bound each fallback's share of the total weight from above and below.
//!
//! Every function takes the fallbacks sorted by descending weight (see
//! [`sort_fallbacks`](crate::sort_fallbacks)) and returns them in that order.

use tracing::{debug, info};

use crate::num::{within_tolerance, TOLERANCE};
use crate::{Config, Error, Fallback, Result, Weight};

/// What cap-and-redistribute changed.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Reweighting {
    /// The per-fallback ceiling, `total * target_max_weight_fraction * reweighting_fudge_factor`.
    pub max_acceptable: f64,
    /// Fallbacks clamped down to `max_acceptable`.
    pub reduced: usize,
    /// Fallbacks raised by a share of the excess.
    pub increased: usize,
    /// Total weight removed from the clamped fallbacks and handed to the others.
    pub excess: f64,
}

/// What exclusion below the floor removed.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Exclusion {
    pub count: usize,
    pub weight: f64,
}

pub fn total_weight(fallbacks: &[Fallback]) -> f64 {
    fallbacks.iter().map(|f| f.weight.current().as_f64()).sum()
}

fn weight(value: f64) -> Result<Weight> {
    Weight::new(value).ok_or_else(|| Error::InvariantViolation {
        stage: "redistribution",
        reason: format!("computed invalid weight {value}"),
    })
}

/// Keep the `max_count` heaviest fallbacks.
pub fn truncate(mut fallbacks: Vec<Fallback>, max_count: usize) -> Vec<Fallback> {
    if fallbacks.len() > max_count {
        debug!(dropped = fallbacks.len() - max_count, "truncating to max_fallback_count");
        fallbacks.truncate(max_count);
    }
    fallbacks
}

/// Clamp every fallback above the ceiling to the ceiling, then hand the removed excess to the
/// remaining fallbacks in proportion to their weight, without raising any of them above the
/// ceiling. Total weight is unchanged.
///
/// This is a single pass: excess that would push a fallback over the ceiling is not offered to
/// the others. If any excess remains unplaced the run fails with
/// [`Error::RedistributionUnachievable`].
pub fn cap_and_redistribute<'r>(
    mut fallbacks: Vec<Fallback<'r>>,
    config: &Config,
) -> Result<(Vec<Fallback<'r>>, Reweighting)> {
    let total = total_weight(&fallbacks);
    let max_acceptable = total * config.capped_fraction();
    let mut outcome = Reweighting {
        max_acceptable,
        ..Default::default()
    };
    if fallbacks.is_empty() || total <= 0.0 {
        return Ok((fallbacks, outcome));
    }

    let members = fallbacks.len();
    let capacity = members as f64 * max_acceptable;
    if capacity < total && !within_tolerance(capacity, total) {
        return Err(Error::RedistributionUnachievable {
            members,
            max_acceptable,
            leftover: total - capacity,
        });
    }

    let mut capped = vec![false; members];
    let mut total_excess = 0.0;
    for (fallback, capped) in fallbacks.iter_mut().zip(capped.iter_mut()) {
        let current = fallback.weight.current().as_f64();
        if current > max_acceptable {
            total_excess += current - max_acceptable;
            fallback.weight = fallback.weight.reweighted(weight(max_acceptable)?);
            *capped = true;
            outcome.reduced += 1;
        }
    }
    if outcome.reduced == 0 {
        return Ok((fallbacks, outcome));
    }

    let remaining: f64 = fallbacks
        .iter()
        .zip(&capped)
        .filter(|(_, capped)| !**capped)
        .map(|(f, _)| f.weight.current().as_f64())
        .sum();
    let mut leftover = total_excess;
    if remaining > 0.0 {
        for (fallback, _) in fallbacks
            .iter_mut()
            .zip(&capped)
            .filter(|(_, capped)| !**capped)
        {
            let current = fallback.weight.current().as_f64();
            let raised = (current + total_excess * current / remaining).min(max_acceptable);
            if raised > current {
                leftover -= raised - current;
                fallback.weight = fallback.weight.reweighted(weight(raised)?);
                outcome.increased += 1;
            }
        }
    }
    if leftover > TOLERANCE * total {
        return Err(Error::RedistributionUnachievable {
            members,
            max_acceptable,
            leftover,
        });
    }
    outcome.excess = total_excess;
    crate::sort_fallbacks(&mut fallbacks);

    info!(
        max_acceptable,
        reduced = outcome.reduced,
        increased = outcome.increased,
        excess = total_excess,
        "redistributed excess weight"
    );
    Ok((fallbacks, outcome))
}

/// Drop fallbacks carrying less than `min_fraction` of the total weight. The dropped weight is
/// not redistributed.
pub fn exclude_below_floor(
    fallbacks: Vec<Fallback>,
    min_fraction: f64,
) -> (Vec<Fallback>, Exclusion) {
    let total = total_weight(&fallbacks);
    let mut exclusion = Exclusion::default();
    let kept = fallbacks
        .into_iter()
        .filter(|fallback| {
            let current = fallback.weight.current();
            if current.fraction_of(total) >= min_fraction {
                return true;
            }
            debug!(
                fingerprint = fallback.relay.fingerprint(),
                weight = current.as_f64(),
                "excluded: weight fraction below minimum"
            );
            exclusion.count += 1;
            exclusion.weight += current.as_f64();
            false
        })
        .collect();
    (kept, exclusion)
}

/// Fail if the heaviest fallback exceeds `target` as a fraction of the total weight.
pub fn check_ceiling(fallbacks: &[Fallback], target: f64) -> Result<()> {
    let total = total_weight(fallbacks);
    let Some(heaviest) = fallbacks.first() else {
        return Ok(());
    };
    let fraction = heaviest.weight.current().fraction_of(total);
    if fraction > target && !within_tolerance(fraction, target) {
        return Err(Error::PostConditionViolation { fraction, target });
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test::assert_within;
    use crate::test::{fallbacks, records};
    use crate::RelayWeight;

    fn config(target: f64, fudge: f64) -> Config {
        Config {
            target_max_weight_fraction: target,
            reweighting_fudge_factor: fudge,
            ..Default::default()
        }
    }

    fn currents(fallbacks: &[Fallback]) -> Vec<f64> {
        fallbacks.iter().map(|f| f.weight.current().as_f64()).collect()
    }

    #[test]
    fn two_members_share_the_cap() {
        let records = records(&[900.0, 100.0]);
        let (result, outcome) =
            cap_and_redistribute(fallbacks(&records), &config(0.5, 1.0)).unwrap();
        assert_eq!(currents(&result), vec![500.0, 500.0]);
        assert_eq!(outcome.max_acceptable, 500.0);
        assert_eq!(outcome.excess, 400.0);
        assert_eq!((outcome.reduced, outcome.increased), (1, 1));
        let originals: Vec<f64> = result.iter().map(|f| f.weight.original().as_f64()).collect();
        // Equal weights fall back to fingerprint order.
        assert_eq!(result[0].relay.fingerprint(), "F000");
        assert_eq!(originals, vec![900.0, 100.0]);
    }

    #[test]
    fn nothing_over_the_cap_is_a_noop() {
        let records = records(&[30.0, 30.0, 20.0, 20.0]);
        let input = fallbacks(&records);
        let (result, outcome) = cap_and_redistribute(input.clone(), &config(0.5, 0.8)).unwrap();
        assert_eq!(currents(&result), currents(&input));
        assert!(result.iter().all(|f| !f.weight.is_adjusted()));
        assert_eq!(outcome.reduced, 0);
        assert_eq!(outcome.excess, 0.0);
    }

    #[test]
    fn excess_is_shared_proportionally() {
        let records = records(&[700.0, 200.0, 100.0]);
        let (result, outcome) =
            cap_and_redistribute(fallbacks(&records), &config(0.5, 1.0)).unwrap();
        // 200 excess split 2:1 between the others
        assert_within(result[0].weight.current().as_f64(), 500.0, 1e-9);
        assert_within(result[1].weight.current().as_f64(), 333.333_333_333, 1e-6);
        assert_within(result[2].weight.current().as_f64(), 166.666_666_667, 1e-6);
        assert_within(total_weight(&result), 1000.0, 1e-9);
        assert_eq!(outcome.increased, 2);
    }

    #[test]
    fn unreachable_ceiling_fails() {
        let records = records(&[900.0, 100.0]);
        assert!(matches!(
            cap_and_redistribute(fallbacks(&records), &config(0.4, 1.0)),
            Err(Error::RedistributionUnachievable { members: 2, .. })
        ));
    }

    #[test]
    fn overflowing_share_is_not_redistributed() {
        // Capacity is sufficient overall, but a proportional single pass pushes the second
        // member over the cap while the small ones cannot absorb the rest.
        let records = records(&[1000.0, 240.0, 10.0, 10.0, 10.0, 10.0]);
        assert!(matches!(
            cap_and_redistribute(fallbacks(&records), &config(0.25, 1.0)),
            Err(Error::RedistributionUnachievable { .. })
        ));
    }

    #[test]
    fn floor_drops_light_members() {
        let records = records(&[500.0, 400.0, 99.0, 1.0]);
        let (kept, exclusion) = exclude_below_floor(fallbacks(&records), 0.01);
        assert_eq!(currents(&kept), vec![500.0, 400.0, 99.0]);
        assert_eq!(exclusion, Exclusion { count: 1, weight: 1.0 });
        assert_eq!(total_weight(&kept), 1000.0 - exclusion.weight);
    }

    #[test]
    fn ceiling_is_checked_against_target() {
        let records = records(&[500.0, 500.0]);
        assert!(check_ceiling(&fallbacks(&records), 0.5).is_ok());
        assert!(matches!(
            check_ceiling(&fallbacks(&records), 0.4),
            Err(Error::PostConditionViolation { .. })
        ));
        assert!(check_ceiling(&[], 0.1).is_ok());
    }

    #[test]
    fn truncate_keeps_heaviest() {
        let records = records(&[5.0, 4.0, 3.0, 2.0]);
        let kept = truncate(fallbacks(&records), 2);
        assert_eq!(currents(&kept), vec![5.0, 4.0]);
        assert_eq!(truncate(fallbacks(&records), 10).len(), 4);
    }

    #[test]
    fn reweighted_members_keep_original() {
        let records = records(&[900.0, 100.0]);
        let (result, _) = cap_and_redistribute(fallbacks(&records), &config(0.5, 1.0)).unwrap();
        assert!(result.iter().all(|f| f.weight.is_adjusted()));
        assert_eq!(
            result[1].weight,
            RelayWeight::new(Weight::new(100.0).unwrap()).reweighted(Weight::new(500.0).unwrap())
        );
    }
}
