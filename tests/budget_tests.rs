use mpnav::budget::{randomized_round, BudgetConfig, KeyBasis, QueryBudget, TaskClassKey};
use mpnav::{GenerationConfig, Goals, Task, TrajLenEstimates};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rstest::rstest;
use tempfile::NamedTempFile;

fn task(id: &str, start: &str, end: &str, lengths: &[usize]) -> Task {
    let mut t = Task::new(id, "house", "a", 0.0, Goals::Single { goals: vec!["b".into()] });
    t.trajectories = lengths.iter().map(|&n| vec![(0, 1, 0); n]).collect();
    t.start_region_name = Some(start.into());
    t.end_region_name = Some(end.into());
    t
}

#[test]
fn randomized_round_is_unbiased() {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let draws = 100_000;
    let mut total = 0usize;
    for _ in 0..draws {
        let v = randomized_round(3.7, &mut rng);
        assert!(v == 3 || v == 4);
        total += v;
    }
    let mean = total as f64 / draws as f64;
    assert!((mean - 3.7).abs() < 0.05, "mean {}", mean);
}

#[rstest]
#[case(8, false)]
#[case(10, true)]
#[case(30, true)]
#[case(50, true)]
#[case(52, false)]
fn combined_length_window(#[case] actions: usize, #[case] accepted: bool) {
    assert_eq!(GenerationConfig::default().accepts_length(actions), accepted);
}

#[test]
fn eval_budget_uses_class_bound() {
    let tasks = vec![
        task("1", "kitchen", "bathroom", &[10, 14]),
        task("2", "kitchen", "bathroom", &[12]),
        task("3", "hall", "bedroom", &[20]),
    ];
    let config = BudgetConfig::default();
    let mut budget = QueryBudget::from_tasks(&config, &tasks).unwrap();

    // kitchen -> bathroom: mean 12, sample sd 2, sem 2/sqrt(3)
    let bound = 12.0 + 1.95 * 2.0 / 3f64.sqrt();
    assert!((budget.length_estimate(&tasks[0], true).unwrap() - bound).abs() < 1e-9);
    assert_eq!(budget.assign(&tasks[0], true).unwrap().traj_len, 14);
    // A single observation falls back to the maximum
    assert_eq!(budget.assign(&tasks[2], true).unwrap().traj_len, 50);
    // Training uses the task's own mean
    assert_eq!(budget.assign(&tasks[0], false).unwrap().traj_len, 12);
}

#[test]
fn unseen_classes_take_max_length() {
    let train = vec![task("1", "kitchen", "bathroom", &[10, 14])];
    let config = BudgetConfig::default();
    let budget = QueryBudget::new(&config, TrajLenEstimates::empty(50.0))
        .with_estimates(QueryBudget::from_tasks(&config, &train).unwrap().estimates().clone());
    let unseen = task("9", "garage", "attic", &[5, 5]);
    assert_eq!(budget.length_estimate(&unseen, true).unwrap(), 50.0);
    let key = TaskClassKey::for_task(&train[0], KeyBasis::Region).unwrap();
    assert!(budget.estimates().contains(&key));
}

#[test]
fn query_allowance_tracks_ratio() {
    let config = BudgetConfig {
        query_ratio: 0.5,
        n_subgoal_steps: 5,
        ..BudgetConfig::default()
    };
    let mut budget = QueryBudget::new(&config, TrajLenEstimates::empty(50.0));
    // 0.5 * 20 / 5 is integral
    for _ in 0..50 {
        assert_eq!(budget.sample_max_queries(20), 2);
    }
    let draws: Vec<usize> = (0..1000).map(|_| budget.sample_max_queries(21)).collect();
    assert!(draws.iter().all(|&q| q == 2 || q == 3));
    assert!(draws.contains(&2) && draws.contains(&3));
}

#[test]
fn estimates_survive_a_file_round_trip() {
    let tasks = vec![
        task("1", "kitchen", "bathroom", &[10, 14]),
        task("2", "hall", "bedroom", &[20, 22, 24]),
    ];
    let config = BudgetConfig::default();
    let estimates = QueryBudget::from_tasks(&config, &tasks).unwrap().estimates().clone();
    let file = NamedTempFile::new().unwrap();
    estimates.save(file.path()).unwrap();
    assert_eq!(TrajLenEstimates::load(file.path()).unwrap(), estimates);
}
