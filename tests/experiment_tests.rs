use conformal_intervals::conformal::ConformalMethod;
use conformal_intervals::experiment::{run_experiment, run_experiments, DataSplit, Dataset, ExperimentConfig, SyntheticKind};
use std::fs;

fn quick_config() -> ExperimentConfig {
    ExperimentConfig {
        n_experiments: 1,
        iterations: 20,
        max_rows: 400,
        save: false,
        ..Default::default()
    }
}

#[test]
fn test_every_method_covers_synthetic_data() {
    let dataset = Dataset::synthetic(SyntheticKind::Heteroscedastic, 3000, 2, 7).unwrap();
    let config = quick_config();
    let split = DataSplit::new(&dataset, 0.15, config.max_rows, 3).unwrap();
    for method in ConformalMethod::ALL {
        let res = run_experiment(method, &split, &config, 3).unwrap();
        assert!(
            res.marginal_coverage > 0.8,
            "{} coverage {}",
            method,
            res.marginal_coverage
        );
        assert!(res.average_length > 0.0);
    }
}

#[test]
fn test_run_experiments_and_save() {
    let datasets = vec![
        Dataset::synthetic(SyntheticKind::Linear, 600, 2, 1).unwrap(),
        Dataset::synthetic(SyntheticKind::Heteroscedastic, 600, 2, 2).unwrap(),
    ];
    let config = ExperimentConfig {
        n_experiments: 2,
        methods: vec![ConformalMethod::CP, ConformalMethod::CondHist],
        ..quick_config()
    };
    let table = run_experiments(&config, &datasets).unwrap();
    assert_eq!(table.records.len(), 2 * 2 * 2);
    assert_eq!(table.records[0].dataset, "linear");
    assert_eq!(table.records[1].method, ConformalMethod::CondHist);
    assert_eq!(run_experiments(&config, &datasets).unwrap(), table);

    let path = std::env::temp_dir().join("conformal_intervals_results_test.csv");
    let path = path.to_string_lossy().into_owned();
    table.save_csv(&path).unwrap();
    let written = fs::read_to_string(&path).unwrap();
    let mut lines = written.lines();
    assert_eq!(
        lines.next().unwrap(),
        "exp_num,dataset,method,marginal_coverage,average_length"
    );
    assert_eq!(lines.count(), 8);
    fs::remove_file(&path).unwrap();
}

#[test]
fn test_dataset_from_csv() {
    let path = std::env::temp_dir().join("conformal_intervals_dataset_test.csv");
    fs::write(&path, "a, y, b\n1.0, 10.0, 2.0\n3.0, 30.0, 4.0\n5.0, 50.0, 6.0\n").unwrap();
    let path = path.to_string_lossy().into_owned();
    let ds = Dataset::from_csv(&path, "toy", "y").unwrap();
    assert_eq!(ds.n_features, 2);
    assert_eq!(ds.y, vec![10.0, 30.0, 50.0]);
    assert_eq!(ds.x, vec![1.0, 3.0, 5.0, 2.0, 4.0, 6.0]);
    assert!(Dataset::from_csv(&path, "toy", "missing").is_err());
    fs::remove_file(&path).unwrap();
}
