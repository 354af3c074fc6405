use mpnav::dataset::save_results;
use mpnav::eval::OrderingBucket;
use mpnav::{
    AgentResult, EpisodeConfig, EpisodeDriver, EvalConfig, Evaluation, Goals, GraphSimulator,
    OrderingPolicy, RegionMap, ScanGraph, ScanStore, ScoreError, SimulatorConfig, Task,
    TrajectoryPoint,
};
use nalgebra::Vector3;
use rstest::rstest;
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;

// n2 - n1 - s - f1 - f2 along the y axis, two metres apart
fn store() -> Arc<ScanStore> {
    let store = ScanStore::in_memory();
    store.insert(
        ScanGraph::builder("house")
            .node("n2", Vector3::new(0.0, 4.0, 0.0))
            .node("n1", Vector3::new(0.0, 2.0, 0.0))
            .node("s", Vector3::new(0.0, 0.0, 0.0))
            .node("f1", Vector3::new(0.0, -2.0, 0.0))
            .node("f2", Vector3::new(0.0, -4.0, 0.0))
            .edge("n2", "n1")
            .edge("n1", "s")
            .edge("s", "f1")
            .edge("f1", "f2")
            .build()
            .unwrap(),
    );
    Arc::new(store)
}

fn tasks() -> Vec<Task> {
    let single = Task::new("1", "house", "s", 0.0, Goals::Single { goals: vec!["n2".into()] });
    let mut dual = Task::new(
        "2",
        "house",
        "s",
        0.0,
        Goals::Dual {
            first: vec!["n1".into()],
            second: vec!["f2".into()],
        },
    );
    dual.short_path_length = Some(11);
    dual.long_path_length = Some(17);
    vec![single, dual]
}

fn evaluation(config: EvalConfig) -> Evaluation {
    Evaluation::new(store(), &config, tasks(), vec!["val_seen".into()]).unwrap()
}

fn result(id: &str, path: &[&str]) -> AgentResult {
    AgentResult {
        instr_id: id.into(),
        trajectory: path.iter().map(|&vp| TrajectoryPoint::at(vp)).collect(),
    }
}

fn implicit() -> EvalConfig {
    EvalConfig {
        ordering: OrderingPolicy::Implicit,
        ..EvalConfig::default()
    }
}

#[test]
fn reference_paths_score_perfectly() {
    let eval = evaluation(EvalConfig::default());
    let report = eval
        .score(
            &[result("1", &["s", "n1", "n2"]), result("2", &["s", "n1", "s", "f1", "f2"])],
            "results.json",
        )
        .unwrap();
    let single = &report.records[0];
    assert_eq!(single.nav_error, 0.0);
    assert_eq!(single.steps, 2);
    assert!((single.length - 4.0).abs() < 1e-12);
    let two = report.records[1].two_tier.as_ref().unwrap();
    assert_eq!(two.first_nav_error, 0.0);
    assert_eq!(two.bucket, OrderingBucket::Both);
    assert_eq!(report.is_success, vec![("1".to_string(), true), ("2".to_string(), true)]);
    assert_eq!(report.summary["success_rate"], 1.0);
    assert_eq!(report.summary["original_num"], 1.0);
    assert_eq!(report.summary["multi_priority_num"], 1.0);
    assert_eq!(report.summary["both_succeed_steps"], 4.0);
}

#[rstest]
#[case(&["s", "n1", "s", "f1", "f2"], OrderingBucket::Both)]
#[case(&["s", "n1"], OrderingBucket::FirstOnly)]
#[case(&["s", "f1", "f2"], OrderingBucket::SecondOnly)]
#[case(&["s"], OrderingBucket::Neither)]
fn ordering_buckets(#[case] path: &[&str], #[case] bucket: OrderingBucket) {
    let eval = evaluation(EvalConfig {
        success_radius: 1.0,
        ..EvalConfig::default()
    });
    let record = eval.score_item("2", &result("2", path).trajectory).unwrap();
    assert_eq!(record.two_tier.unwrap().bucket, bucket);
}

#[test]
fn success_follows_the_final_tier() {
    let eval = evaluation(EvalConfig {
        success_radius: 1.0,
        ..EvalConfig::default()
    });
    // Ends on the second tier without passing the first
    let report = eval
        .score(&[result("1", &["s"]), result("2", &["s", "f1", "f2"])], "results.json")
        .unwrap();
    assert_eq!(report.records[1].nav_error, 0.0);
    assert_eq!(report.is_success, vec![("1".to_string(), false), ("2".to_string(), true)]);
    assert_eq!(report.summary["success_rate"], 0.5);
    assert_eq!(report.summary["first_fail_second_succeed_rate"], 1.0);
    assert_eq!(report.summary["both_succeed_rate"], 0.0);
}

#[test]
fn driven_episodes_score_zero_error() {
    let store = store();
    let eval = Evaluation::new(store.clone(), &EvalConfig::default(), tasks(), vec!["val".into()]).unwrap();
    let scan = store.load("house").unwrap();
    let driver = EpisodeDriver::new(&EpisodeConfig::default());
    for task in tasks() {
        let mut sim = GraphSimulator::new(store.clone(), &SimulatorConfig::default());
        let outcome = driver.run(&mut sim, &scan, &task).unwrap();
        assert!(outcome.terminated);
        let record = eval.score_item(&task.instr_id, &outcome.visited).unwrap();
        assert_eq!(record.nav_error, 0.0);
        assert_eq!(record.steps, outcome.steps());
        if let Some(two) = &record.two_tier {
            assert_eq!(two.first_nav_error, 0.0);
        }
        assert!(record.is_success(eval.config()));
    }
}

#[test]
fn bucket_rates_sum_to_one() {
    let eval = evaluation(EvalConfig {
        success_radius: 1.0,
        ..EvalConfig::default()
    });
    let report = eval
        .score(&[result("2", &["s", "f1"]), result("1", &["s"])], "results.json")
        .unwrap();
    let total: f64 = [
        "first_succeed_second_fail_rate",
        "first_fail_second_succeed_rate",
        "both_succeed_rate",
        "both_fail_rate",
    ]
    .iter()
    .map(|k| report.summary[*k])
    .sum();
    assert!((total - 1.0).abs() < 1e-12);
    assert_eq!(report.summary["both_fail_rate"], 1.0);
}

#[test]
fn wrong_order_counts_only_when_accepted() {
    let path = ["s", "f1", "f2", "f1", "s", "n1"];
    let strict = evaluation(implicit());
    let record = strict.score_item("2", &result("2", &path).trajectory).unwrap();
    let two = record.two_tier.as_ref().unwrap();
    assert_eq!(two.bucket, OrderingBucket::FirstOnly);
    let wrong = two.wrong_order.as_ref().unwrap();
    assert_eq!(wrong.first_nav_error, 0.0);
    assert_eq!(wrong.second_nav_error, 0.0);
    assert_eq!((wrong.short_steps, wrong.long_steps), (10, 16));
    assert!(!record.is_success(strict.config()));

    let lenient = evaluation(EvalConfig {
        accept_wrong_order: true,
        ..implicit()
    });
    assert!(record.is_success(lenient.config()));

    let report = strict
        .score(&[result("1", &["s", "n1", "n2"]), result("2", &path)], "results.json")
        .unwrap();
    assert_eq!(report.summary["wrong_order_success_rate"], 1.0);
    assert_eq!(report.summary["correct_order_success_rate"], 0.0);
    assert_eq!(report.summary["wrong_order_actual_steps"], 5.0);
    assert_eq!(report.summary["wrong_order_expected_steps"], 13.0);
}

#[test]
fn implicit_scoring_needs_path_lengths() {
    let mut tasks = tasks();
    tasks[1].long_path_length = None;
    let eval = Evaluation::new(store(), &implicit(), tasks, vec!["val".into()]).unwrap();
    let err = eval.score_item("2", &result("2", &["s"]).trajectory).unwrap_err();
    assert!(matches!(err, ScoreError::MissingPathLengths(id) if id == "2"));
}

#[test]
fn missing_ids_are_fatal() {
    let eval = evaluation(EvalConfig::default());
    let err = eval
        .score(&[result("1", &["s"]), result("77", &["s"])], "results.json")
        .unwrap_err();
    assert!(matches!(err, ScoreError::MissingInstructions { missing: 1, total: 2, .. }));
    assert_eq!(
        err.to_string(),
        "Missing 1 of 2 instruction ids from val_seen - not in results.json"
    );
}

#[test]
fn duplicate_and_unknown_ids_are_ignored() {
    let eval = evaluation(EvalConfig::default());
    let report = eval
        .score(
            &[
                result("1", &["s", "n1", "n2"]),
                result("99", &["s"]),
                result("1", &["s"]),
                result("2", &["s"]),
            ],
            "results.json",
        )
        .unwrap();
    assert_eq!(report.records.len(), 2);
    assert_eq!(report.records[0].nav_error, 0.0);
}

#[test]
fn trajectory_must_start_at_start_viewpoint() {
    let eval = evaluation(EvalConfig::default());
    let err = eval.score_item("1", &result("1", &["n1", "n2"]).trajectory).unwrap_err();
    assert!(matches!(err, ScoreError::StartMismatch { .. }));
    let err = eval.score_item("1", &[]).unwrap_err();
    assert!(matches!(err, ScoreError::StartMismatch { .. }));
    assert!(matches!(
        eval.score_item("5", &result("5", &["s"]).trajectory),
        Err(ScoreError::UnknownInstruction(_))
    ));
}

#[test]
fn room_success_uses_region_labels() {
    let mut eval = evaluation(EvalConfig::default());
    eval.set_regions(
        "house",
        RegionMap::from_pairs([
            ("n2", "bedroom"),
            ("n1", "bedroom"),
            ("s", "hall"),
            ("f1", "kitchen"),
            ("f2", "kitchen"),
        ]),
    );
    // Two metres short of the goal, but in the right room
    let near = eval.score_item("1", &result("1", &["s", "n1"]).trajectory).unwrap();
    assert_eq!(near.room_success, Some(true));
    let far = eval.score_item("1", &result("1", &["s"]).trajectory).unwrap();
    assert_eq!(far.room_success, Some(false));

    let two = eval
        .score_item("2", &result("2", &["s", "n1", "s", "f1"]).trajectory)
        .unwrap();
    assert_eq!(two.room_success, Some(true));
    assert_eq!(two.two_tier.unwrap().first_room_success, Some(true));

    let report = eval
        .score(&[result("1", &["s"]), result("2", &["s", "f1"])], "results.json")
        .unwrap();
    assert_eq!(report.summary["original_room_success_rate"], 0.0);
    assert_eq!(report.summary["second_room_success_rate"], 1.0);
}

#[test]
fn unlabelled_goal_region_is_fatal() {
    let mut eval = evaluation(EvalConfig::default());
    eval.set_regions("house", RegionMap::from_pairs([("s", "hall")]));
    let err = eval.score_item("1", &result("1", &["s"]).trajectory).unwrap_err();
    assert!(matches!(err, ScoreError::AmbiguousGoalRegion(_)));
}

#[test]
fn results_file_ids_may_be_numbers() {
    let eval = evaluation(EvalConfig::default());
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"[
            {{"instr_id": 1, "trajectory": [["s", 0.0, 0.0], ["n1", 0.0, 0.0], ["n2", 0.5, 0.0]]}},
            {{"instr_id": "2", "trajectory": [["s", 0.0, 0.0]]}}
        ]"#
    )
    .unwrap();
    let report = eval.score_file(file.path()).unwrap();
    assert_eq!(report.records[0].instr_id, "1");
    assert_eq!(report.summary["original_success_rate"], 1.0);
}

#[test]
fn saved_results_score_like_in_memory_ones() {
    let eval = evaluation(EvalConfig::default());
    let results = [result("1", &["s", "n1", "n2"]), result("2", &["s", "n1", "s", "f1"])];
    let file = NamedTempFile::new().unwrap();
    save_results(file.path(), &results).unwrap();
    let from_file = eval.score_file(file.path()).unwrap();
    let in_memory = eval.score(&results, "results.json").unwrap();
    assert_eq!(from_file.is_success, in_memory.is_success);
    assert_eq!(from_file.summary, in_memory.summary);
}
