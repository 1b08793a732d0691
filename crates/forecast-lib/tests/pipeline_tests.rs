//! End-to-end pipeline tests

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use forecast_lib::dataset::read_hourly_csv;
use forecast_lib::split::SplitPolicy;
use forecast_lib::{
    DailyRecord, ModelKind, Pipeline, ReportingError, RunConfig, TimeSeriesPoint, Utility,
    CAMPUS_SCOPE,
};
use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::io::Write;

fn sinusoid(hours: usize) -> Vec<TimeSeriesPoint> {
    let start = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
    (0..hours)
        .map(|i| TimeSeriesPoint {
            entity_scope: CAMPUS_SCOPE.to_string(),
            utility: Utility::Electricity,
            timestamp: start + Duration::hours(i as i64),
            value: 200.0 + 50.0 * (2.0 * PI * (i % 24) as f64 / 24.0).sin(),
            regressors: BTreeMap::new(),
        })
        .collect()
}

fn daily_with_spikes() -> Vec<DailyRecord> {
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    let mut records = Vec::new();
    for d in 0..50i64 {
        let base = 800.0 + (d % 13) as f64 * 12.0;
        for (entity, energy) in [
            ("lab", if d % 10 == 6 { base * 100.0 } else { base }),
            ("library", base * 0.9),
        ] {
            records.push(DailyRecord {
                entity_id: entity.to_string(),
                utility: Utility::Electricity,
                date: start + Duration::days(d),
                energy_value: Some(energy),
                eui: None,
                gross_area: Some(8_000.0),
                mean_temperature: None,
                building_name: Some(format!("{entity} building")),
            });
        }
    }
    records
}

fn config(models: Vec<ModelKind>) -> RunConfig {
    let mut config = RunConfig::default().with_models(models);
    config.boosting = config.boosting.with_estimators(100);
    config
}

#[tokio::test]
async fn test_full_year_sinusoid_is_recovered() {
    let pipeline = Pipeline::new(config(vec![
        ModelKind::Decomposition,
        ModelKind::GradientBoosted,
    ]));
    let output = pipeline.run(sinusoid(8760), None).await.unwrap();

    assert!(output.comparison.failures.is_empty());
    for model in [ModelKind::Decomposition, ModelKind::GradientBoosted] {
        let evaluation = output.evaluation(model).unwrap();
        assert!(
            evaluation.metrics.mae < 5.0,
            "{model} mae {}",
            evaluation.metrics.mae
        );
        assert!(evaluation.forecasts.iter().all(|f| f.actual.is_some()));
    }
    let decomposition = output.evaluation(ModelKind::Decomposition).unwrap();
    assert_eq!(decomposition.test_rows, 30 * 24);
}

#[tokio::test]
async fn test_importances_sum_to_one_and_are_sorted() {
    let pipeline = Pipeline::new(config(vec![ModelKind::GradientBoosted]));
    let output = pipeline.run(sinusoid(24 * 30), None).await.unwrap();
    let evaluation = output.evaluation(ModelKind::GradientBoosted).unwrap();

    let total: f64 = evaluation
        .feature_importance
        .iter()
        .map(|f| f.importance)
        .sum();
    assert!((total - 1.0).abs() < 1e-9, "total {total}");
    assert!(evaluation
        .feature_importance
        .windows(2)
        .all(|w| w[0].importance >= w[1].importance));

    let top = &output.comparison.feature_importance[&ModelKind::GradientBoosted];
    assert!(top.len() <= 10);
    assert_eq!(top[0], evaluation.feature_importance[0]);
}

#[tokio::test]
async fn test_anomaly_injection_tops_summary() {
    let pipeline = Pipeline::new(config(vec![ModelKind::GradientBoosted]));
    let output = pipeline
        .run(sinusoid(24 * 14), Some(daily_with_spikes()))
        .await
        .unwrap();

    let report = output.anomalies.unwrap().unwrap();
    assert_eq!(report.records.len(), 100);
    assert_eq!(report.anomaly_count(), 5);
    let top = &report.summary[0];
    assert_eq!(top.entity_id, "lab");
    assert_eq!(top.anomaly_count, 5);
    assert_eq!(top.building_name.as_deref(), Some("lab building"));
    assert!(top.mean_anomalous_value > 50_000.0);
}

#[tokio::test]
async fn test_runs_are_idempotent() {
    let first = Pipeline::new(config(vec![ModelKind::GradientBoosted]))
        .run(sinusoid(24 * 14), Some(daily_with_spikes()))
        .await
        .unwrap();
    let second = Pipeline::new(config(vec![ModelKind::GradientBoosted]))
        .run(sinusoid(24 * 14), Some(daily_with_spikes()))
        .await
        .unwrap();

    assert_eq!(first.comparison.ranking, second.comparison.ranking);
    let labels = |output: &forecast_lib::PipelineOutput| -> Vec<(String, bool)> {
        let report = output.anomalies.as_ref().unwrap().as_ref().unwrap();
        report
            .records
            .iter()
            .map(|r| (r.entity_id.clone(), r.is_anomaly))
            .collect()
    };
    assert_eq!(labels(&first), labels(&second));
}

#[tokio::test]
async fn test_partial_failure_keeps_the_comparison() {
    let mut config = config(ModelKind::ALL.to_vec());
    config.decomposition = config.decomposition.with_split(SplitPolicy::last_days(1));
    let pipeline = Pipeline::new(config);
    let output = pipeline.run(sinusoid(24 * 5), None).await.unwrap();

    assert_eq!(output.comparison.best(), Some(ModelKind::Decomposition));
    assert_eq!(output.comparison.succeeded(), 1);
    let failed: Vec<ModelKind> = output.comparison.failures.iter().map(|f| f.model).collect();
    assert_eq!(failed, vec![ModelKind::GradientBoosted, ModelKind::Sequence]);
    assert!(output.comparison.failures[0].error.contains("insufficient history"));
}

#[tokio::test]
async fn test_no_models_succeeded() {
    let pipeline = Pipeline::new(RunConfig::default());
    let err = pipeline.run(sinusoid(48), None).await.unwrap_err();
    assert_eq!(err, ReportingError::NoModelsSucceeded { failures: 3 });
}

#[tokio::test]
async fn test_sampled_run_from_csv() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "timestamp,utility,energy_kwh,temperature_2m").unwrap();
    for point in sinusoid(24 * 20) {
        writeln!(
            file,
            "{},electricity,{},{}",
            point.timestamp.to_rfc3339(),
            point.value,
            55.0
        )
        .unwrap();
    }
    file.flush().unwrap();

    let points = read_hourly_csv(std::fs::File::open(file.path()).unwrap(), "energy_kwh").unwrap();
    assert_eq!(points.len(), 24 * 20);

    // Sampling breaks hourly contiguity, so use the model without lag features
    let mut config = config(vec![ModelKind::Decomposition]);
    config.decomposition = config.decomposition.with_split(SplitPolicy::last_days(5));
    config.sample_fraction = 0.9;
    let output = Pipeline::new(config).run(points, None).await.unwrap();
    let evaluation = output.evaluation(ModelKind::Decomposition).unwrap();
    assert!(evaluation.train_rows + evaluation.test_rows < 24 * 20);
    assert!(evaluation.metrics.mae.is_finite());
}
