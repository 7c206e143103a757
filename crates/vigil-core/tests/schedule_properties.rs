use chrono::{Duration, TimeZone, Utc};
use contracts::CadenceRule;
use proptest::prelude::*;
use vigil_core::{classify, next_occurrence, roll_forward, NextSpawn, Outlook};

fn base_instant() -> chrono::DateTime<chrono::Utc> {
    Utc.with_ymd_and_hms(2025, 3, 10, 0, 0, 0).unwrap()
}

#[test]
fn property_board_never_predicts_the_past() {
    let last = base_instant();
    for offset_min in [0, 1, 119, 120, 121, 500, 10_000] {
        let now = last + Duration::minutes(offset_min);
        let (next, _) = roll_forward(last, 120, now);
        assert!(next >= now, "offset {offset_min}: {next} < {now}");
    }
}

#[test]
fn property_fixed_schedule_kinds_never_report_misses() {
    let rule = CadenceRule::DailyHours {
        hours: vec![11, 17, 21],
        weekdays_only: false,
    };
    let now = Utc.with_ymd_and_hms(2025, 3, 12, 23, 0, 0).unwrap();
    match next_occurrence(&rule, None, now) {
        NextSpawn::At { missed, .. } => assert_eq!(missed, 0),
        other => panic!("expected a prediction, got {other:?}"),
    }
}

proptest! {
    #[test]
    fn property_roll_forward_lands_strictly_after_now(
        cadence in 1_i64..3_000,
        elapsed_min in 0_i64..100_000,
        elapsed_sec in 0_i64..60,
    ) {
        let last = base_instant();
        let now = last + Duration::minutes(elapsed_min) + Duration::seconds(elapsed_sec);
        let (next, missed) = roll_forward(last, cadence, now);

        prop_assert!(next >= now);
        prop_assert!(missed >= 0);
        // The prediction is at most one cadence ahead of now.
        prop_assert!(next - now <= Duration::minutes(cadence));
    }

    #[test]
    fn property_missed_is_zero_iff_within_first_cadence(
        cadence in 1_i64..3_000,
        elapsed_min in 0_i64..100_000,
    ) {
        let last = base_instant();
        let now = last + Duration::minutes(elapsed_min);
        let (_, missed) = roll_forward(last, cadence, now);

        if elapsed_min <= cadence {
            prop_assert_eq!(missed, 0);
        } else {
            prop_assert!(missed >= 1);
        }
    }

    #[test]
    fn property_next_lands_on_the_cadence_grid(
        cadence in 1_i64..3_000,
        elapsed_min in 0_i64..100_000,
    ) {
        let last = base_instant();
        let now = last + Duration::minutes(elapsed_min);
        let (next, _) = roll_forward(last, cadence, now);

        let delta = (next - last).num_minutes();
        prop_assert_eq!(delta % cadence, 0);
        prop_assert!(delta >= cadence);
    }

    #[test]
    fn property_classification_is_monotone_in_misses(
        missed in 0_i64..1_000,
        threshold in 1_i64..10,
    ) {
        let here = classify(missed, threshold);
        let worse = classify(missed + 1, threshold);
        if here == Outlook::Forgotten {
            prop_assert_eq!(worse, Outlook::Forgotten);
        }
    }
}
