//! Live market drift.
//!
//! Each tick every record is independently selected with a fixed probability and
//! nudged by a bounded uniform delta. Records that are not selected, or whose
//! rounded value does not move, are left untouched including their timestamp.
//!
//! The active-GPU estimate in [`GridState`](crate::model::GridState) is held stable
//! and never passes through here.

use crate::{
    config::MutationConfig,
    fallback::round_to,
    model::{ComputeRecord, TokenRecord},
};
use chrono::{DateTime, Utc};
use rand::Rng;

const COMPUTE_DECIMALS: i32 = 3;
const TOKEN_DECIMALS: i32 = 4;

/// Number of records changed by one [`mutate`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MutationReport {
    pub compute_changed: usize,
    pub token_changed: usize,
}

/// Apply one tick of drift to both record sets.
pub fn mutate<R>(
    compute: &mut [ComputeRecord],
    tokens: &mut [TokenRecord],
    config: &MutationConfig,
    rng: &mut R,
    now: DateTime<Utc>,
) -> MutationReport
where
    R: Rng + ?Sized,
{
    MutationReport {
        compute_changed: mutate_compute(compute, config, rng, now),
        token_changed: mutate_tokens(tokens, config, rng, now),
    }
}

/// Drift compute prices by at most `compute_delta`, rounded to 3 dp and clamped
/// to `price_floor`.
pub fn mutate_compute<R>(
    records: &mut [ComputeRecord],
    config: &MutationConfig,
    rng: &mut R,
    now: DateTime<Utc>,
) -> usize
where
    R: Rng + ?Sized,
{
    let mut changed = 0;
    for record in records.iter_mut() {
        if !rng.random_bool(config.compute_probability) {
            continue;
        }

        let next = drift(
            record.price_per_hour,
            config.compute_delta,
            COMPUTE_DECIMALS,
            config.price_floor,
            rng,
        );
        if next != record.price_per_hour {
            record.price_per_hour = next;
            record.updated_at = now;
            changed += 1;
        }
    }
    changed
}

/// Drift token input prices by at most `token_delta`, rounded to 4 dp and clamped
/// to `token_price_floor`. Output prices are not drifted.
pub fn mutate_tokens<R>(
    records: &mut [TokenRecord],
    config: &MutationConfig,
    rng: &mut R,
    now: DateTime<Utc>,
) -> usize
where
    R: Rng + ?Sized,
{
    let mut changed = 0;
    for record in records.iter_mut() {
        if !rng.random_bool(config.token_probability) {
            continue;
        }

        let next = drift(
            record.input_price,
            config.token_delta,
            TOKEN_DECIMALS,
            config.token_price_floor,
            rng,
        );
        if next != record.input_price {
            record.input_price = next;
            record.updated_at = now;
            changed += 1;
        }
    }
    changed
}

/// Round first, then clamp, so the floor holds for any floor precision.
fn drift<R>(value: f64, magnitude: f64, decimals: i32, floor: f64, rng: &mut R) -> f64
where
    R: Rng + ?Sized,
{
    let delta = if magnitude > 0.0 {
        rng.random_range(-magnitude..=magnitude)
    } else {
        0.0
    };
    round_to(value + delta, decimals).max(floor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fallback::{synthesise_compute, synthesise_tokens};
    use chrono::TimeZone;
    use rand::{RngCore, SeedableRng, rngs::StdRng};

    /// Rng whose output never satisfies `random_bool(p)` for `p < 1`.
    struct NeverSelect;

    impl RngCore for NeverSelect {
        fn next_u32(&mut self) -> u32 {
            u32::MAX
        }

        fn next_u64(&mut self) -> u64 {
            u64::MAX
        }

        fn fill_bytes(&mut self, dst: &mut [u8]) {
            dst.fill(u8::MAX);
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap()
    }

    fn t1() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 3).unwrap()
    }

    #[test]
    fn test_unselected_records_are_bit_identical() {
        let mut compute = synthesise_compute(1, t0());
        let mut tokens = synthesise_tokens(1, t0());
        let before = (compute.clone(), tokens.clone());

        let report = mutate(
            &mut compute,
            &mut tokens,
            &MutationConfig::default(),
            &mut NeverSelect,
            t1(),
        );

        assert_eq!(report, MutationReport::default());
        assert_eq!((compute, tokens), before);
    }

    #[test]
    fn test_zero_probability_never_selects() {
        let mut compute = synthesise_compute(2, t0());
        let before = compute.clone();
        let config = MutationConfig {
            compute_probability: 0.0,
            ..MutationConfig::default()
        };

        let mut rng = StdRng::seed_from_u64(9);
        for _ in 0..100 {
            assert_eq!(mutate_compute(&mut compute, &config, &mut rng, t1()), 0);
        }
        assert_eq!(compute, before);
    }

    #[test]
    fn test_changed_records_refresh_timestamp_only() {
        let mut compute = synthesise_compute(3, t0());
        let before = compute.clone();
        let config = MutationConfig {
            compute_probability: 1.0,
            ..MutationConfig::default()
        };

        let changed = mutate_compute(&mut compute, &config, &mut StdRng::seed_from_u64(3), t1());
        assert!(changed > 0);

        for (after, before) in compute.iter().zip(&before) {
            let delta = (after.price_per_hour - before.price_per_hour).abs();
            assert!(delta <= config.compute_delta + 1e-9, "{after:?}");
            if after.price_per_hour == before.price_per_hour {
                assert_eq!(after, before);
            } else {
                assert_eq!(after.updated_at, t1());
                assert_eq!(after.id, before.id);
                assert_eq!(after.availability_pct, before.availability_pct);
            }
        }
    }

    #[test]
    fn test_price_floor_holds() {
        struct TestCase {
            start: f64,
            delta: f64,
        }

        let tests = vec![
            TestCase {
                // TC0: at the floor with default magnitude
                start: 0.1,
                delta: 0.05,
            },
            TestCase {
                // TC1: just above the floor with large magnitude
                start: 0.12,
                delta: 5.0,
            },
            TestCase {
                // TC2: source price already below the floor
                start: 0.01,
                delta: 0.05,
            },
        ];

        let config = MutationConfig {
            compute_probability: 1.0,
            ..MutationConfig::default()
        };
        let mut rng = StdRng::seed_from_u64(17);

        for (index, test) in tests.into_iter().enumerate() {
            let mut records = synthesise_compute(0, t0());
            records.iter_mut().for_each(|r| r.price_per_hour = test.start);
            let config = MutationConfig {
                compute_delta: test.delta,
                ..config.clone()
            };

            for _ in 0..200 {
                mutate_compute(&mut records, &config, &mut rng, t1());
                assert!(
                    records.iter().all(|r| r.price_per_hour >= 0.1),
                    "TC{} failed",
                    index
                );
            }
        }
    }

    #[test]
    fn test_token_drift_rounds_to_four_decimals() {
        let mut tokens = synthesise_tokens(5, t0());
        let before = tokens.clone();
        let config = MutationConfig {
            token_probability: 1.0,
            ..MutationConfig::default()
        };

        mutate_tokens(&mut tokens, &config, &mut StdRng::seed_from_u64(5), t1());

        for (after, before) in tokens.iter().zip(&before) {
            assert_eq!(after.output_price, before.output_price);
            assert!(after.input_price >= 0.0);
            assert!((after.input_price - before.input_price).abs() <= 0.025 + 1e-9);
            let scaled = after.input_price * 10_000.0;
            assert!((scaled - scaled.round()).abs() < 1e-6, "{after:?}");
        }
    }

    #[test]
    fn test_seeded_mutation_is_replayable() {
        let config = MutationConfig::default();
        let run = || {
            let mut compute = synthesise_compute(4, t0());
            let mut tokens = synthesise_tokens(4, t0());
            let mut rng = StdRng::seed_from_u64(99);
            for _ in 0..10 {
                mutate(&mut compute, &mut tokens, &config, &mut rng, t1());
            }
            (compute, tokens)
        };

        assert_eq!(run(), run());
    }
}
