// src/eval/summary.rs
// Aggregates per-trajectory scores into named metrics. Single-tier tasks report under an
// `original_` prefix, two-tier tasks under their own names.

use super::{EvalConfig, OrderingBucket, ScoreRecord, TwoTierScore, WrongOrderScore};
use std::collections::BTreeMap;

fn mean<I: IntoIterator<Item = f64>>(values: I) -> f64 {
    let (sum, n) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    if n == 0 { 0.0 } else { sum / n as f64 }
}

fn rate(count: usize, total: usize) -> f64 {
    if total == 0 { 0.0 } else { count as f64 / total as f64 }
}

fn room_rate<I: IntoIterator<Item = Option<bool>>>(flags: I) -> Option<f64> {
    let flags: Vec<bool> = flags.into_iter().collect::<Option<_>>()?;
    Some(rate(flags.iter().filter(|&&f| f).count(), flags.len()))
}

/// Named metrics over `records`; room rates are reported when `rooms` is set
pub fn summarize(records: &[ScoreRecord], config: &EvalConfig, rooms: bool) -> BTreeMap<String, f64> {
    let mut summary = BTreeMap::new();
    let mut put = |key: &str, value: f64| {
        summary.insert(key.to_string(), value);
    };

    let successes = records.iter().filter(|r| r.is_success(config)).count();
    put("num", records.len() as f64);
    put("success_rate", rate(successes, records.len()));

    let single: Vec<&ScoreRecord> = records.iter().filter(|r| r.two_tier.is_none()).collect();
    if !single.is_empty() {
        let n = single.len();
        put("original_num", n as f64);
        put("original_nav_error", mean(single.iter().map(|r| r.nav_error)));
        put("original_oracle_error", mean(single.iter().map(|r| r.oracle_error)));
        put("original_length", mean(single.iter().map(|r| r.length)));
        put("original_steps", mean(single.iter().map(|r| r.steps as f64)));
        put(
            "original_success_rate",
            rate(single.iter().filter(|r| config.is_success(r.nav_error)).count(), n),
        );
        put(
            "original_oracle_rate",
            rate(single.iter().filter(|r| config.is_success(r.oracle_error)).count(), n),
        );
        if rooms {
            if let Some(v) = room_rate(single.iter().map(|r| r.room_success)) {
                put("original_room_success_rate", v);
            }
        }
    }

    let dual: Vec<(&ScoreRecord, &TwoTierScore)> = records
        .iter()
        .filter_map(|r| r.two_tier.as_ref().map(|t| (r, t)))
        .collect();
    if dual.is_empty() {
        return summary;
    }
    let n = dual.len();
    put("multi_priority_num", n as f64);
    put("first_nav_error", mean(dual.iter().map(|(_, t)| t.first_nav_error)));
    put("second_nav_error", mean(dual.iter().map(|(r, _)| r.nav_error)));
    put("oracle_error", mean(dual.iter().map(|(r, _)| r.oracle_error)));
    put("steps", mean(dual.iter().map(|(r, _)| r.steps as f64)));
    put("length", mean(dual.iter().map(|(r, _)| r.length)));
    put(
        "first_success_rate",
        rate(dual.iter().filter(|(_, t)| config.is_success(t.first_nav_error)).count(), n),
    );
    put(
        "second_success_rate",
        rate(dual.iter().filter(|(r, _)| config.is_success(r.nav_error)).count(), n),
    );
    put(
        "oracle_rate",
        rate(dual.iter().filter(|(r, _)| config.is_success(r.oracle_error)).count(), n),
    );

    let bucket_count = |b: OrderingBucket| dual.iter().filter(|(_, t)| t.bucket == b).count();
    let both = bucket_count(OrderingBucket::Both);
    put("first_succeed_second_fail_rate", rate(bucket_count(OrderingBucket::FirstOnly), n));
    put("first_fail_second_succeed_rate", rate(bucket_count(OrderingBucket::SecondOnly), n));
    put("both_succeed_rate", rate(both, n));
    put("both_fail_rate", rate(bucket_count(OrderingBucket::Neither), n));
    if both > 0 {
        put(
            "both_succeed_steps",
            mean(
                dual.iter()
                    .filter(|(_, t)| t.bucket == OrderingBucket::Both)
                    .map(|(r, _)| r.steps as f64),
            ),
        );
    }

    if rooms {
        if let Some(v) = room_rate(dual.iter().map(|(_, t)| t.first_room_success)) {
            put("first_room_success_rate", v);
        }
        if let Some(v) = room_rate(dual.iter().map(|(r, _)| r.room_success)) {
            put("second_room_success_rate", v);
        }
    }

    let swapped: Vec<(&ScoreRecord, &WrongOrderScore)> = dual
        .iter()
        .filter_map(|(r, t)| t.wrong_order.as_ref().map(|w| (*r, w)))
        .collect();
    if swapped.is_empty() {
        return summary;
    }
    let total = swapped.len();
    put("wrong_first_nav_error", mean(swapped.iter().map(|(_, w)| w.first_nav_error)));
    put("wrong_second_nav_error", mean(swapped.iter().map(|(_, w)| w.second_nav_error)));

    let expected = |w: &WrongOrderScore| 0.5 * w.short_steps as f64 + 0.5 * w.long_steps as f64;
    let correct: Vec<&(&ScoreRecord, &WrongOrderScore)> =
        swapped.iter().filter(|(r, _)| r.correct_order(config)).collect();
    let wrong: Vec<&(&ScoreRecord, &WrongOrderScore)> =
        swapped.iter().filter(|(r, _)| r.wrong_order(config)).collect();

    put("correct_order_success_rate", rate(correct.len(), total));
    put("wrong_order_success_rate", rate(wrong.len(), total));
    put(
        "correct_and_wrong_order_success_rate",
        rate(correct.len() + wrong.len(), total),
    );
    if !correct.is_empty() {
        put("correct_order_actual_steps", mean(correct.iter().map(|(r, _)| r.steps as f64)));
        put("correct_order_expected_steps", mean(correct.iter().map(|(_, w)| expected(w))));
        put("correct_order_longer_steps", mean(correct.iter().map(|(_, w)| w.long_steps as f64)));
    }
    if !wrong.is_empty() {
        put("wrong_order_actual_steps", mean(wrong.iter().map(|(r, _)| r.steps as f64)));
        put("wrong_order_expected_steps", mean(wrong.iter().map(|(_, w)| expected(w))));
        put("wrong_order_shorter_steps", mean(wrong.iter().map(|(_, w)| w.short_steps as f64)));
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dual(first: f64, second: f64, steps: usize) -> ScoreRecord {
        ScoreRecord {
            instr_id: format!("{}-{}", first, second),
            steps,
            length: steps as f64,
            nav_error: second,
            oracle_error: second,
            room_success: None,
            two_tier: Some(TwoTierScore {
                first_nav_error: first,
                first_room_success: None,
                bucket: OrderingBucket::classify(first <= 2.0, second <= 2.0),
                wrong_order: None,
            }),
        }
    }

    #[test]
    fn bucket_rates_partition() {
        let records = vec![dual(0.0, 0.0, 8), dual(0.0, 5.0, 3), dual(5.0, 0.0, 4), dual(5.0, 5.0, 2)];
        let s = summarize(&records, &EvalConfig::default(), false);
        let total: f64 = [
            "first_succeed_second_fail_rate",
            "first_fail_second_succeed_rate",
            "both_succeed_rate",
            "both_fail_rate",
        ]
        .iter()
        .map(|k| s[*k])
        .sum();
        assert!((total - 1.0).abs() < 1e-12);
        assert_eq!(s["both_succeed_steps"], 8.0);
        assert_eq!(s["success_rate"], 0.5);
        assert!(!s.contains_key("original_num"));
        assert!(!s.contains_key("first_room_success_rate"));
    }

    #[test]
    fn wrong_order_counts_separately() {
        let mut wrong = dual(5.0, 5.0, 12);
        if let Some(t) = wrong.two_tier.as_mut() {
            t.wrong_order = Some(WrongOrderScore {
                first_nav_error: 0.5,
                second_nav_error: 1.0,
                short_steps: 10,
                long_steps: 20,
            });
        }
        let records = vec![wrong];
        let strict = EvalConfig::default();
        let s = summarize(&records, &strict, false);
        assert_eq!(s["wrong_order_success_rate"], 1.0);
        assert_eq!(s["correct_order_success_rate"], 0.0);
        assert_eq!(s["wrong_order_expected_steps"], 15.0);
        assert_eq!(s["wrong_order_shorter_steps"], 10.0);
        assert!(!s.contains_key("correct_order_actual_steps"));
        assert_eq!(s["success_rate"], 0.0);

        let lenient = EvalConfig {
            accept_wrong_order: true,
            ..EvalConfig::default()
        };
        assert_eq!(summarize(&records, &lenient, false)["success_rate"], 1.0);
    }
}
