//! CLI integration tests

use chrono::{Duration, NaiveDate};
use std::fmt::Write as _;
use std::path::Path;
use std::process::{Command, Output};

fn cef() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_cef"));
    command.env("RUST_LOG", "warn").env("NO_COLOR", "1");
    command
}

fn run(command: &mut Command) -> Output {
    command.output().expect("Failed to execute cef")
}

/// Six weeks of hourly electricity with a daily cycle and a temperature column
fn write_hourly(path: &Path) {
    let mut csv = String::from("timestamp,utility,energy_kwh,temperature_2m\n");
    for i in 0..24 * 42 {
        let day = i / 24;
        let hour = i % 24;
        let value = 500.0 + 120.0 * (2.0 * std::f64::consts::PI * hour as f64 / 24.0).sin();
        let temperature = 40.0 + (hour as f64 - 12.0).abs();
        writeln!(
            csv,
            "{} {:02}:00:00,electricity,{:.3},{:.1}",
            calendar_date(day),
            hour,
            value,
            temperature
        )
        .unwrap();
    }
    std::fs::write(path, csv).unwrap();
}

/// Two buildings over fifty days; one has five extreme days
fn write_daily(path: &Path) {
    let mut csv = String::from("entity_id,utility,date,energy_kwh,gross_area,building_name\n");
    for d in 0..50 {
        let date = calendar_date(d);
        let base = 1_000.0 + (d % 11) as f64 * 15.0;
        let b2 = if d % 10 == 3 { base * 100.0 } else { base * 1.1 };
        writeln!(csv, "B1,electricity,{date},{base},10000,North Hall").unwrap();
        writeln!(csv, "B2,electricity,{date},{b2},10000,South Hall").unwrap();
    }
    std::fs::write(path, csv).unwrap();
}

fn calendar_date(offset: i64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Duration::days(offset)
}

#[test]
fn test_cli_help() {
    let output = run(cef().arg("--help"));
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("Campus Energy Forecaster"), "Should show app name");
    assert!(stdout.contains("run"), "Should show run command");
    assert!(stdout.contains("forecast"), "Should show forecast command");
    assert!(stdout.contains("anomalies"), "Should show anomalies command");
}

#[test]
fn test_cli_version() {
    let output = run(cef().arg("--version"));
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("cef"), "Should show binary name");
}

#[test]
fn test_run_help() {
    let output = run(cef().args(["run", "--help"]));
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("--hourly"));
    assert!(stdout.contains("--daily"));
    assert!(stdout.contains("--output-dir"));
    assert!(stdout.contains("--sample-fraction"));
}

#[test]
fn test_run_writes_output_tables() {
    let dir = tempfile::tempdir().unwrap();
    let hourly = dir.path().join("hourly.csv");
    let daily = dir.path().join("daily.csv");
    let out = dir.path().join("out");
    write_hourly(&hourly);
    write_daily(&daily);

    let output = run(cef()
        .env("CEF_BOOSTING__N_ESTIMATORS", "30")
        .args(["run", "--models", "gradient-boosted,decomposition", "--hourly"])
        .arg(&hourly)
        .arg("--daily")
        .arg(&daily)
        .arg("--output-dir")
        .arg(&out));
    assert!(
        output.status.success(),
        "run failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    for name in [
        "forecasts_gradient-boosted.csv",
        "forecasts_decomposition.csv",
        "feature_importance.csv",
        "model_comparison.csv",
        "anomalies.csv",
        "anomaly_summary.csv",
    ] {
        assert!(out.join(name).exists(), "missing {name}");
    }

    let comparison = std::fs::read_to_string(out.join("model_comparison.csv")).unwrap();
    assert!(comparison.starts_with("model,mae,mape,rmse"));
    assert_eq!(comparison.lines().count(), 3);

    let importance = std::fs::read_to_string(out.join("feature_importance.csv")).unwrap();
    assert!(importance.starts_with("model,feature,importance\n"));
    assert!(importance.lines().skip(1).all(|l| l.starts_with("gradient-boosted,")));
    assert!(importance.lines().count() <= 11, "top 10 features expected");

    let forecasts = std::fs::read_to_string(out.join("forecasts_decomposition.csv")).unwrap();
    assert!(forecasts.starts_with(
        "timestamp,predicted,actual,lower_bound,upper_bound,trend,daily_pattern,weekly_pattern,yearly_pattern,utility,model"
    ));

    let summary = std::fs::read_to_string(out.join("anomaly_summary.csv")).unwrap();
    let first = summary.lines().nth(1).unwrap();
    assert!(first.starts_with("B2,South Hall,5,"), "summary row: {first}");
}

#[test]
fn test_run_json_output() {
    let dir = tempfile::tempdir().unwrap();
    let hourly = dir.path().join("hourly.csv");
    write_hourly(&hourly);

    let output = run(cef()
        .env("CEF_BOOSTING__N_ESTIMATORS", "20")
        .args(["--format", "json", "run", "--models", "gradient-boosted", "--hourly"])
        .arg(&hourly));
    assert!(output.status.success());

    let document: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(document["comparison"]["ranking"][0]["model"], "gradient-boosted");
    assert!(document["anomalies"].is_null());
}

#[test]
fn test_anomalies_csv_output() {
    let dir = tempfile::tempdir().unwrap();
    let daily = dir.path().join("daily.csv");
    write_daily(&daily);

    let output = run(cef().args(["--format", "csv", "anomalies", "--daily"]).arg(&daily));
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut lines = stdout.lines();
    assert_eq!(
        lines.next(),
        Some("entity,building_name,anomaly_count,mean_anomalous_value")
    );
    assert!(lines.next().unwrap().starts_with("B2,South Hall,5,"));
}

#[test]
fn test_forecast_disabled_model_fails() {
    let dir = tempfile::tempdir().unwrap();
    let hourly = dir.path().join("hourly.csv");
    let config = dir.path().join("cef.toml");
    write_hourly(&hourly);
    std::fs::write(&config, "models = [\"decomposition\"]\n").unwrap();

    let output = run(cef()
        .arg("--config")
        .arg(&config)
        .args(["forecast", "--model", "sequence", "--hourly"])
        .arg(&hourly));
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("disabled"), "stderr: {stderr}");
}

#[test]
fn test_missing_target_column_fails() {
    let dir = tempfile::tempdir().unwrap();
    let hourly = dir.path().join("hourly.csv");
    std::fs::write(&hourly, "timestamp,utility,kwh\n2024-01-01 00:00:00,electricity,1\n").unwrap();

    let output = run(cef().args(["run", "--hourly"]).arg(&hourly));
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("energy_kwh"), "stderr: {stderr}");
}
