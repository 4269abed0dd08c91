use std::collections::HashSet;

use bio_batch::input::{scan, CsvItems, InputError};
use tempfile::TempDir;

const NINA: &str = "7c9e6679-7425-40de-944b-e07fc1f90ae7";
const MILES: &str = "550e8400-e29b-41d4-a716-446655440000";

#[test]
fn reads_quoted_payloads_from_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("artists.csv");
    std::fs::write(
        &path,
        format!(
            "uuid,name,data\n{NINA},\"Simone, Nina\",\"Singer, \"\"High Priestess of Soul\"\"\"\n{MILES},Miles Davis,\n"
        ),
    )
    .unwrap();

    let summary = scan(&path, &HashSet::new()).unwrap();
    assert_eq!(summary.parsed, 2);
    assert_eq!(summary.skipped, 1);

    let items: Vec<_> = CsvItems::open(&path, HashSet::new()).unwrap().collect();
    assert_eq!(items[0].name, "Simone, Nina");
    assert_eq!(
        items[0].payload.as_deref(),
        Some("Singer, \"High Priestess of Soul\"")
    );
    assert_eq!(items[1].payload, None);
}

#[test]
fn comment_and_blank_rows_are_skipped_not_errors() {
    let text = format!("# exported 2024-05-01\n\n   \n{NINA},Nina Simone\n#{MILES},Miles Davis\n");
    let items = CsvItems::from_reader(text.as_bytes(), HashSet::new());
    let counts = items.counts();
    assert_eq!(items.count(), 1);
    let summary = counts.summary();
    assert_eq!(summary.errors, 0);
    assert!(summary.skipped >= 2);
}

#[test]
fn resume_filter_drops_done_ids() {
    let text = format!("{NINA},Nina Simone\n{MILES},Miles Davis\n");
    let done = HashSet::from([NINA.to_string(), MILES.to_string()]);
    let items = CsvItems::from_reader(text.as_bytes(), done);
    let counts = items.counts();
    assert_eq!(items.count(), 0);
    assert_eq!(counts.summary().excluded, 2);
}

#[test]
fn scan_counts_without_exclusions_leaking() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("artists.csv");
    std::fs::write(&path, format!("{NINA},Nina Simone\nbad,Row\n{MILES},Miles Davis\n")).unwrap();

    let done = HashSet::from([NINA.to_string()]);
    let summary = scan(&path, &done).unwrap();
    assert_eq!(summary.parsed, 1);
    assert_eq!(summary.excluded, 1);
    assert_eq!(summary.errors, 1);

    // The same exclusions, applied lazily, yield what the scan counted.
    let items: Vec<_> = CsvItems::open(&path, done).unwrap().quiet().collect();
    assert_eq!(items.len() as u64, summary.parsed);
    assert_eq!(items[0].id, MILES);
}

#[test]
fn missing_file_is_not_found() {
    let dir = TempDir::new().unwrap();
    let err = scan(dir.path().join("nope.csv"), &HashSet::new()).unwrap_err();
    assert!(matches!(err, InputError::NotFound(_)));
}
