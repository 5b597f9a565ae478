//! Golden records written, read back and compared from disk.

use std::fs;

use chrono::{TimeZone, Utc};
use osv_testkit::golden::{CallRecord, CompareKind, GoldenComparator, GoldenError, GoldenValue};
use osv_testkit::testing::init_test_logging;
use tempfile::TempDir;

fn vulnerability(modified_day: u32, aliases: &[&str]) -> GoldenValue {
    let modified = Utc.with_ymd_and_hms(2021, 1, modified_day, 12, 30, 0).unwrap();
    GoldenValue::dict([
        ("id", GoldenValue::from("PYSEC-2021-1")),
        ("aliases", GoldenValue::from(aliases.to_vec())),
        ("modified", GoldenValue::from(modified)),
        ("withdrawn", GoldenValue::None),
        ("affected_count", GoldenValue::from(3)),
        ("source", GoldenValue::bytes(b"source.yaml".to_vec())),
    ])
}

#[test]
fn test_regenerate_then_compare() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let expected = vulnerability(2, &["CVE-2021-0001"]);

    GoldenComparator::new(dir.path(), true)
        .expect_map_equal("impact_analysis", "pysec", &expected)
        .unwrap();
    let path = dir.path().join("impact_analysis_pysec.txt");
    let text = fs::read_to_string(&path).unwrap();
    assert!(text.ends_with('\n'));
    assert!(text.contains("DatetimeWithNanoseconds(2021, 1, 2, 12, 30"));

    let checker = GoldenComparator::new(dir.path(), false);
    checker
        .expect_map_equal("impact_analysis", "pysec", &expected)
        .unwrap();

    let err = checker
        .expect_map_equal(
            "impact_analysis",
            "pysec",
            &vulnerability(3, &["CVE-2021-0001", "GHSA-xxxx"]),
        )
        .unwrap_err();
    let GoldenError::Mismatch { kind, report, .. } = err else {
        panic!("expected a mismatch");
    };
    assert_eq!(kind, CompareKind::StructuralEqual);
    assert!(report.contains("~ 'aliases': values differ"), "{report}");
    assert!(report.contains("~ 'modified': values differ"), "{report}");
    assert!(!report.contains("~ 'id'"), "{report}");
}

#[test]
fn test_hand_written_record_with_calls() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("pubsub_publish.txt"),
        "[\n\
         \x20   # one message per affected commit\n\
         \x20   call('projects/test/topics/tasks', data=b'', type='impact'),\n\
         \x20   call('projects/test/topics/tasks', data=b'', type='regressed'),\n\
         ]\n",
    )
    .unwrap();

    let publish = |kind: &str| {
        GoldenValue::from(
            CallRecord::new("")
                .arg("projects/test/topics/tasks")
                .kwarg("data", GoldenValue::bytes(Vec::new()))
                .kwarg("type", kind),
        )
    };
    let comparator = GoldenComparator::new(dir.path(), false);
    comparator
        .expect_equal(
            "pubsub",
            "publish",
            &GoldenValue::from(vec![publish("impact"), publish("regressed")]),
        )
        .unwrap();

    let err = comparator
        .expect_equal("pubsub", "publish", &GoldenValue::from(vec![publish("impact")]))
        .unwrap_err();
    assert!(err.is_mismatch());
    assert!(err.to_string().contains("plain-equal"));
}

#[test]
fn test_line_records_diff() {
    let dir = TempDir::new().unwrap();
    let comparator = GoldenComparator::new(dir.path(), true);
    comparator
        .expect_lines_equal("bisect", "log", &["good a1", "bad b2", "first bad b2"])
        .unwrap();

    let checker = GoldenComparator::new(dir.path(), false);
    let err = checker
        .expect_lines_equal("bisect", "log", &["good a1", "bad c3", "first bad c3"])
        .unwrap_err();
    let GoldenError::Mismatch { report, .. } = err else {
        panic!("expected a mismatch");
    };
    assert!(report.contains("--- expected"));
    assert!(report.contains("+++ actual"));
    assert!(report.contains("-bad b2"));
    assert!(report.contains("+bad c3"));
    assert!(report.contains(" good a1"));
}

#[test]
fn test_record_with_code_is_rejected() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("unsafe_record.txt"),
        "{'id': __import__('os').system('true')}\n",
    )
    .unwrap();

    let err = GoldenComparator::new(dir.path(), false)
        .expect_map_equal("unsafe", "record", &GoldenValue::dict([("id", "x")]))
        .unwrap_err();
    assert!(err.is_rejection(), "{err}");
    assert!(!err.is_mismatch());
}

#[test]
fn test_missing_record_points_at_regeneration() {
    let dir = TempDir::new().unwrap();
    let err = GoldenComparator::new(dir.path(), false)
        .expect_equal("absent", "case", &GoldenValue::from(1))
        .unwrap_err();
    assert!(matches!(err, GoldenError::Missing { .. }));
    assert!(err.to_string().contains("TESTS_GENERATE=1"));
}

#[test]
fn test_keys_cannot_escape_directory() {
    let dir = TempDir::new().unwrap();
    let comparator = GoldenComparator::new(dir.path(), true);
    let err = comparator
        .expect_equal("../outside", "case", &GoldenValue::from(1))
        .unwrap_err();
    assert!(matches!(err, GoldenError::InvalidKey { .. }));
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}
