//! Resume from an existing JSONL output

use super::support::{config, csv, item_id, FakeService};
use bio_batch::input::{scan, CsvItems};
use bio_batch::runner::{Orchestrator, RunStatus};
use bio_batch::sink::jsonl::read_records;
use bio_batch::sink::{JsonlSink, OpenMode};
use std::collections::HashSet;
use std::io::Write;
use std::sync::Arc;
use tempfile::TempDir;

fn write_input(dir: &TempDir, count: usize) -> std::path::PathBuf {
    let path = dir.path().join("artists.csv");
    std::fs::write(&path, csv(count)).unwrap();
    path
}

#[tokio::test]
async fn test_resume_yields_exactly_n_records() {
    let dir = TempDir::new().unwrap();
    let input = write_input(&dir, 10);
    let output = dir.path().join("out.jsonl");

    // First run only gets through the first four items.
    {
        let items = CsvItems::open(&input, HashSet::new()).unwrap();
        let (sink, done) = JsonlSink::open(&output, OpenMode::Fresh).unwrap();
        assert!(done.is_empty());
        let report = Orchestrator::new(config(2), Arc::new(FakeService::new()), Arc::new(sink))
            .unwrap()
            .run(items.take(4))
            .await;
        assert_eq!(report.stats.succeeded, 4);
    }

    let service = Arc::new(FakeService::new());
    let (sink, done) = JsonlSink::open(&output, OpenMode::Resume).unwrap();
    assert_eq!(done.len(), 4);
    let summary = scan(&input, &done).unwrap();
    assert_eq!(summary.parsed, 6);
    assert_eq!(summary.excluded, 4);
    let items = CsvItems::open(&input, done).unwrap().quiet();

    let report = Orchestrator::new(config(3), service.clone(), Arc::new(sink))
        .unwrap()
        .run(items)
        .await;
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(service.calls(), 6);

    let records = read_records(&output).unwrap();
    assert_eq!(records.len(), 10);
    let ids: HashSet<_> = records.iter().map(|r| r.id.clone()).collect();
    assert_eq!(ids.len(), 10);
    assert!(ids.contains(&item_id(9)));
}

#[tokio::test]
async fn test_resume_after_torn_write() {
    let dir = TempDir::new().unwrap();
    let input = write_input(&dir, 3);
    let output = dir.path().join("out.jsonl");

    {
        let items = CsvItems::open(&input, HashSet::new()).unwrap();
        let (sink, _) = JsonlSink::open(&output, OpenMode::Fresh).unwrap();
        Orchestrator::new(config(1), Arc::new(FakeService::new()), Arc::new(sink))
            .unwrap()
            .run(items.take(1))
            .await;
    }

    // Simulate a crash halfway through the second record.
    let mut file = std::fs::OpenOptions::new().append(true).open(&output).unwrap();
    write!(file, "{{\"id\":\"{}\",\"name\":\"Art", item_id(1)).unwrap();
    drop(file);

    let (sink, done) = JsonlSink::open(&output, OpenMode::Resume).unwrap();
    assert_eq!(done, HashSet::from([item_id(0)]));
    let items = CsvItems::open(&input, done).unwrap();
    Orchestrator::new(config(2), Arc::new(FakeService::new()), Arc::new(sink))
        .unwrap()
        .run(items)
        .await;

    let records = read_records(&output).unwrap();
    let ids: HashSet<_> = records.iter().map(|r| r.id.clone()).collect();
    assert_eq!(records.len(), 3);
    assert_eq!(ids.len(), 3);
}

#[tokio::test]
async fn test_output_locked_while_run_holds_it() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("out.jsonl");

    let (_sink, _) = JsonlSink::open(&output, OpenMode::Fresh).unwrap();
    assert!(JsonlSink::open(&output, OpenMode::Resume).is_err());
}
