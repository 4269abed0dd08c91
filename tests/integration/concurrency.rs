//! Worker pool bounds and record integrity under concurrency

use super::support::{config, items, FakeService};
use bio_batch::runner::{Orchestrator, RunStatus};
use bio_batch::sink::jsonl::read_records;
use bio_batch::sink::{JsonlSink, OpenMode};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

#[tokio::test(start_paused = true)]
async fn test_eight_workers_keep_exactly_eight_in_flight() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("out.jsonl");
    let (sink, _) = JsonlSink::open(&output, OpenMode::Fresh).unwrap();
    let service = Arc::new(FakeService::new().with_delay(Duration::from_millis(5)));

    let report = Orchestrator::new(config(8), service.clone(), Arc::new(sink))
        .unwrap()
        .run(items(64))
        .await;

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(service.max_in_flight(), 8);

    // Every line parses on its own: no interleaving.
    let text = std::fs::read_to_string(&output).unwrap();
    assert_eq!(text.lines().count(), 64);
    for line in text.lines() {
        serde_json::from_str::<serde_json::Value>(line).unwrap();
    }
    let ids: HashSet<_> = read_records(&output)
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(ids.len(), 64);
}

#[tokio::test(start_paused = true)]
async fn test_dispatch_follows_input_order_with_one_worker() {
    let sink = Arc::new(bio_batch::sink::MemorySink::new());
    let input = items(5);
    let expected: Vec<_> = input.iter().map(|i| i.id.clone()).collect();

    Orchestrator::new(config(1), Arc::new(FakeService::new()), sink.clone())
        .unwrap()
        .run(input)
        .await;

    let order: Vec<_> = sink.outcomes().into_iter().map(|o| o.id).collect();
    assert_eq!(order, expected);
}
