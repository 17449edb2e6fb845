//! Tests for the registry invariants.

use assert_matches::assert_matches;
use prometheus_client::metrics::gauge::Gauge;
use rand::{rng, Rng};

use std::{collections::HashMap, thread, time::Duration};

use super::*;

fn metric(key: &str, metric_type: &str) -> Metric {
    Metric {
        key: key.to_owned(),
        name: key.to_owned(),
        description: format!("Test metric {key}"),
        metric_type: metric_type.to_owned(),
        ..Metric::default()
    }
}

fn tags(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|&(name, value)| (name.to_owned(), value.to_owned()))
        .collect()
}

fn encoded_lines(registry: &MeasureRegistry) -> Vec<String> {
    let mut buffer = String::new();
    registry.encode(&mut buffer, Format::OpenMetrics).unwrap();
    buffer.lines().map(str::to_owned).collect()
}

fn points<'a>(lines: &'a [String], name: &str) -> Vec<&'a str> {
    let prefix = format!("{name}{{");
    lines
        .iter()
        .filter(|line| line.starts_with(&prefix))
        .map(String::as_str)
        .collect()
}

fn team_registry(export_empty_labels: bool) -> MeasureRegistry {
    let registry =
        MeasureRegistry::new("sonar", HashMap::new(), ["team"], export_empty_labels).unwrap();
    registry
        .init_metrics(&[metric("bugs", "INT"), metric("coverage", "PERCENT")])
        .unwrap();
    registry
}

#[test]
fn unsupported_metrics_are_not_registered() {
    let registry =
        MeasureRegistry::new("sonar", HashMap::new(), Vec::<String>::new(), false).unwrap();
    let catalog = [metric("bugs", "INT"), metric("coverage", "DATA")];
    let registered = registry.init_metrics(&catalog).unwrap();

    assert_eq!(registered, ["bugs"]);
    assert_eq!(registry.registered_keys(), ["bugs"]);
    let lines = encoded_lines(&registry);
    assert!(lines.contains(&"# TYPE sonar_bugs gauge".to_owned()), "{lines:#?}");
    assert!(!lines.iter().any(|line| line.contains("sonar_coverage")));
}

#[test]
fn repeated_registrations_are_ignored() {
    let registry =
        MeasureRegistry::new("sonar", HashMap::new(), Vec::<String>::new(), false).unwrap();
    let catalog = [metric("bugs", "INT"), metric("bugs", "FLOAT")];
    assert_eq!(registry.init_metrics(&catalog).unwrap(), ["bugs"]);

    let catalog = [metric("bugs", "INT"), metric("ncloc", "INT")];
    assert_eq!(registry.init_metrics(&catalog).unwrap(), ["ncloc"]);
    assert_eq!(registry.registered_keys(), ["bugs", "ncloc"]);

    let lines = encoded_lines(&registry);
    let type_lines = lines
        .iter()
        .filter(|line| line.starts_with("# TYPE sonar_bugs "))
        .count();
    assert_eq!(type_lines, 1);
}

#[test]
fn colliding_metric_names_are_an_error() {
    let registry =
        MeasureRegistry::new("sonar", HashMap::new(), Vec::<String>::new(), false).unwrap();
    let catalog = [metric("code_smells", "INT"), metric("code-smells", "INT")];
    let err = registry.init_metrics(&catalog).unwrap_err();

    assert_matches!(
        err,
        RegistrationError::DuplicateName { name, key, existing_key }
            if name == "sonar_code_smells" && key == "code-smells" && existing_key == "code_smells"
    );
}

#[test]
fn internal_metrics_share_name_checks() {
    let registry =
        MeasureRegistry::new("sonar", HashMap::new(), Vec::<String>::new(), false).unwrap();
    registry.init_metrics(&[metric("bugs", "INT")]).unwrap();

    let err = registry
        .register_internal("sonar_bugs", "Clash", None, Gauge::<i64>::default())
        .unwrap_err();
    assert_matches!(err, RegistrationError::DuplicateName { existing_key, .. } if existing_key == "bugs");

    registry
        .register_internal("sonar_exporter_components", "Components", None, Gauge::<i64>::default())
        .unwrap();
    registry
        .register_internal(
            "sonar_exporter_latency",
            "Latency",
            Some(Unit::Seconds),
            Gauge::<i64>::default(),
        )
        .unwrap();
    let err = registry
        .register_internal("sonar_exporter_latency_seconds", "Clash", None, Gauge::<i64>::default())
        .unwrap_err();
    assert_matches!(err, RegistrationError::DuplicateName { .. });
}

#[test]
fn namespace_and_keys_are_escaped() {
    let registry =
        MeasureRegistry::new("my-ns", HashMap::new(), Vec::<String>::new(), false).unwrap();
    assert_eq!(registry.metric_name("new_bugs"), "my_ns_new_bugs");
    assert_eq!(registry.metric_name("sqale-index"), "my_ns_sqale_index");

    let registry = MeasureRegistry::new("", HashMap::new(), Vec::<String>::new(), false).unwrap();
    assert_eq!(registry.metric_name("bugs"), "bugs");
}

#[test]
fn component_without_all_labels_is_not_reported() {
    let registry = team_registry(false);
    let outcome = registry.report("proj1", HashMap::new(), &[Measure::new("bugs", "3")]);

    assert_matches!(
        outcome,
        ReportOutcome::Rejected(MissingLabels { missing }) if missing == ["team"]
    );
    let lines = encoded_lines(&registry);
    assert!(points(&lines, "sonar_bugs").is_empty(), "{lines:#?}");
}

#[test]
fn empty_labels_are_exported_if_configured() {
    let registry = team_registry(true);
    let outcome = registry.report("proj1", HashMap::new(), &[Measure::new("bugs", "3")]);

    assert_eq!(outcome, ReportOutcome::Reported { updated: 1, skipped: 0 });
    let lines = encoded_lines(&registry);
    assert_eq!(
        points(&lines, "sonar_bugs"),
        [r#"sonar_bugs{component="proj1",team=""} 3.0"#]
    );
}

#[test]
fn unknown_labels_are_discarded() {
    let registry = team_registry(false);
    let labels = tags(&[("team", "core"), ("owner", "me")]);
    registry.report("proj1", labels, &[Measure::new("bugs", "3")]);

    let lines = encoded_lines(&registry);
    assert_eq!(
        points(&lines, "sonar_bugs"),
        [r#"sonar_bugs{component="proj1",team="core"} 3.0"#]
    );
}

#[test]
fn unparsable_measures_are_skipped() {
    let registry = team_registry(false);
    let measures = [
        Measure::new("bugs", "abc"),
        Measure::new("coverage", "87.5"),
        Measure::new("unknown", "1"),
    ];
    let outcome = registry.report("proj1", tags(&[("team", "core")]), &measures);

    assert_eq!(outcome, ReportOutcome::Reported { updated: 1, skipped: 2 });
    let lines = encoded_lines(&registry);
    assert!(points(&lines, "sonar_bugs").is_empty(), "{lines:#?}");
    assert_eq!(
        points(&lines, "sonar_coverage"),
        [r#"sonar_coverage{component="proj1",team="core"} 87.5"#]
    );
}

#[test]
fn reporting_booleans_and_period_values() {
    let registry =
        MeasureRegistry::new("sonar", HashMap::new(), Vec::<String>::new(), false).unwrap();
    registry
        .init_metrics(&[metric("alert", "BOOL"), metric("new_coverage", "PERCENT")])
        .unwrap();
    let measures = [
        Measure::new("alert", "true"),
        Measure::with_period("new_coverage", "42.5"),
    ];
    registry.report("proj1", HashMap::new(), &measures);

    let lines = encoded_lines(&registry);
    assert_eq!(
        points(&lines, "sonar_alert"),
        [r#"sonar_alert{component="proj1"} 1.0"#]
    );
    assert_eq!(
        points(&lines, "sonar_new_coverage"),
        [r#"sonar_new_coverage{component="proj1"} 42.5"#]
    );

    registry.report("proj1", HashMap::new(), &[Measure::new("alert", "not-a-bool")]);
    let lines = encoded_lines(&registry);
    assert_eq!(
        points(&lines, "sonar_alert"),
        [r#"sonar_alert{component="proj1"} 0.0"#]
    );
}

#[test]
fn changing_tags_evicts_stale_points() {
    let registry = team_registry(false);
    let measures = [Measure::new("bugs", "3"), Measure::new("coverage", "80")];
    registry.report("proj1", tags(&[("team", "core")]), &measures);
    registry.report("proj2", tags(&[("team", "core")]), &measures);

    let lines = encoded_lines(&registry);
    assert_eq!(points(&lines, "sonar_bugs").len(), 2);

    // Only a single metric is reported with the new labels; the stale point must be evicted
    // for all metrics nevertheless.
    let outcome = registry.report(
        "proj1",
        tags(&[("team", "platform")]),
        &[Measure::new("bugs", "5")],
    );
    assert_eq!(outcome, ReportOutcome::Reported { updated: 1, skipped: 0 });

    let lines = encoded_lines(&registry);
    let mut bug_points = points(&lines, "sonar_bugs");
    bug_points.sort_unstable();
    assert_eq!(
        bug_points,
        [
            r#"sonar_bugs{component="proj1",team="platform"} 5.0"#,
            r#"sonar_bugs{component="proj2",team="core"} 3.0"#,
        ]
    );
    assert_eq!(
        points(&lines, "sonar_coverage"),
        [r#"sonar_coverage{component="proj2",team="core"} 80.0"#]
    );
}

#[test]
fn reporting_same_labels_keeps_points() {
    let registry = team_registry(false);
    let labels = tags(&[("team", "core")]);
    registry.report("proj1", labels.clone(), &[Measure::new("bugs", "3")]);
    registry.report("proj1", labels, &[Measure::new("bugs", "4")]);

    let point_labels = [
        ("component".to_owned(), "proj1".to_owned()),
        ("team".to_owned(), "core".to_owned()),
    ];
    assert_eq!(registry.gauge_value("bugs", &point_labels), Some(4.0));
    assert_eq!(registry.gauge_value("coverage", &point_labels), None);
    assert_eq!(registry.gauge_value("unknown", &point_labels), None);

    let lines = encoded_lines(&registry);
    assert_eq!(
        points(&lines, "sonar_bugs"),
        [r#"sonar_bugs{component="proj1",team="core"} 4.0"#]
    );
}

#[test]
fn static_labels_are_attached_to_all_metrics() {
    let static_labels = HashMap::from([("env".to_owned(), "prod".to_owned())]);
    let registry =
        MeasureRegistry::new("sonar", static_labels, Vec::<String>::new(), false).unwrap();
    registry.init_metrics(&[metric("bugs", "INT")]).unwrap();
    registry.report("proj1", HashMap::new(), &[Measure::new("bugs", "1")]);

    let lines = encoded_lines(&registry);
    let bug_points = points(&lines, "sonar_bugs");
    assert_eq!(bug_points.len(), 1);
    assert!(bug_points[0].contains(r#"env="prod""#), "{bug_points:?}");
    assert!(bug_points[0].contains(r#"component="proj1""#), "{bug_points:?}");
}

#[test]
fn static_labels_cannot_clash_with_other_labels() {
    let static_labels = tags(&[("component", "x")]);
    let err =
        MeasureRegistry::new("sonar", static_labels, Vec::<String>::new(), false).unwrap_err();
    assert_matches!(err, RegistrationError::LabelClash { name } if name == "component");

    let static_labels = tags(&[("te-am", "static")]);
    let err = MeasureRegistry::new("sonar", static_labels, ["team", "te-am"], false).unwrap_err();
    assert_matches!(err, RegistrationError::LabelClash { name } if name == "te_am");

    let static_labels = tags(&[("dc-1", "eu"), ("dc_1", "us")]);
    let err =
        MeasureRegistry::new("sonar", static_labels, Vec::<String>::new(), false).unwrap_err();
    assert_matches!(err, RegistrationError::LabelClash { name } if name == "dc_1");

    let static_labels = tags(&[("env", "prod")]);
    MeasureRegistry::new("sonar", static_labels, ["team"], false).unwrap();
}

#[test]
fn concurrent_reports_keep_registry_consistent() {
    const COMPONENT_COUNT: usize = 100;

    let registry = team_registry(false);
    thread::scope(|scope| {
        for i in 0..COMPONENT_COUNT {
            let registry = &registry;
            scope.spawn(move || {
                let mut rng = rng();
                let component = format!("proj{i}");
                let measures = [Measure::new("bugs", i.to_string()), Measure::new("coverage", "50")];

                thread::sleep(Duration::from_millis(rng.random_range(0..10)));
                registry.report(&component, tags(&[("team", "initial")]), &measures);
                thread::sleep(Duration::from_millis(rng.random_range(0..10)));
                let team = format!("team{}", i % 7);
                registry.report(&component, tags(&[("team", team.as_str())]), &measures);
            });
        }
    });

    assert_eq!(registry.registered_keys(), ["bugs", "coverage"]);
    let lines = encoded_lines(&registry);
    for name in ["sonar_bugs", "sonar_coverage"] {
        let metric_points = points(&lines, name);
        assert_eq!(metric_points.len(), COMPONENT_COUNT, "{metric_points:#?}");
        assert!(
            metric_points.iter().all(|line| !line.contains("initial")),
            "{metric_points:#?}"
        );
    }
    for i in 0..COMPONENT_COUNT {
        let expected = format!(r#"sonar_bugs{{component="proj{i}",team="team{}"}} {i}.0"#, i % 7);
        assert!(lines.contains(&expected), "{expected} is missing");
    }
}
