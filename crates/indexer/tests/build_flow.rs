#![cfg(unix)]

mod common;

use capdex_indexer::{
    CorpusLocator, EntryStatus, IndexBuilder, IndexEntry, IndexStore, ProtocolCounts,
    ProtocolIndex, RunContext,
};
use common::Workspace;
use pretty_assertions::assert_eq;

fn counts(pairs: &[(&str, u64)]) -> ProtocolCounts {
    pairs
        .iter()
        .map(|(name, count)| (name.to_string(), *count))
        .collect()
}

#[tokio::test]
async fn indexes_the_reference_scenario() {
    let ws = Workspace::with_scenario();
    let store = IndexStore::new(ws.index_path());
    let mut index = store.load().await.expect("load");

    let files = index.unindexed(CorpusLocator::new([&ws.corpus]).locate());
    assert_eq!(files.len(), 3);

    let report = IndexBuilder::new(ws.engine(), store.clone())
        .run(&RunContext::new(2), &mut index, files)
        .await
        .expect("build");

    assert_eq!(report.indexed, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.cancelled, 0);
    assert!(!report.interrupted);

    let persisted = store.load().await.expect("reload");
    assert_eq!(persisted, index);

    let by_name: Vec<(String, EntryStatus, ProtocolCounts)> = persisted
        .entries()
        .map(|(file, entry)| (file.file_name_lossy(), entry.status, entry.protocols.clone()))
        .collect();
    assert_eq!(
        by_name,
        vec![
            (
                "a.pcap".to_string(),
                EntryStatus::Indexed,
                counts(&[("eth", 1), ("ip", 1), ("tcp", 1)])
            ),
            (
                "b.pcap".to_string(),
                EntryStatus::Indexed,
                counts(&[("eth", 1), ("ip", 1), ("udp", 1)])
            ),
            ("c.pcap".to_string(), EntryStatus::Failed, ProtocolCounts::new()),
        ]
    );

    let tcp: Vec<String> = persisted
        .list_files_with_protocols(&["tcp"])
        .iter()
        .map(|f| f.file_name_lossy())
        .collect();
    assert_eq!(tcp, vec!["a.pcap"]);
    assert_eq!(
        persisted.list_all_protocols(),
        counts(&[("eth", 2), ("ip", 2), ("tcp", 1), ("udp", 1)])
    );
}

#[tokio::test]
async fn reindexing_an_unchanged_corpus_is_idempotent() {
    let ws = Workspace::with_scenario();
    let engine = ws.engine();
    let store = IndexStore::new(ws.index_path());
    let builder = IndexBuilder::new(engine, store.clone());
    let ctx = RunContext::new(3);

    let mut first = ProtocolIndex::new();
    builder
        .run(&ctx, &mut first, CorpusLocator::new([&ws.corpus]).locate())
        .await
        .expect("first build");
    let first_bytes = std::fs::read(ws.index_path()).expect("read index");

    let mut second = ProtocolIndex::new();
    builder
        .run(&ctx, &mut second, CorpusLocator::new([&ws.corpus]).locate())
        .await
        .expect("second build");
    let second_bytes = std::fs::read(ws.index_path()).expect("read index");

    assert_eq!(first, second);
    assert_eq!(first_bytes, second_bytes);
}

#[tokio::test]
async fn incremental_runs_only_process_new_files() {
    let ws = Workspace::with_scenario();
    let store = IndexStore::new(ws.index_path());
    let builder = IndexBuilder::new(ws.engine(), store.clone());
    let ctx = RunContext::new(2);

    let mut index = store.load().await.expect("load");
    let files = index.unindexed(CorpusLocator::new([&ws.corpus]).locate());
    builder.run(&ctx, &mut index, files).await.expect("build");

    ws.capture("d.pcap", "eth:ipv6:icmpv6\n");
    let mut index = store.load().await.expect("reload");
    let files = index.unindexed(CorpusLocator::new([&ws.corpus]).locate());
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].file_name_lossy(), "d.pcap");

    let report = builder.run(&ctx, &mut index, files).await.expect("build");
    assert_eq!(report.processed(), 1);
    assert_eq!(store.load().await.expect("reload").len(), 4);
}

#[tokio::test]
async fn failed_files_are_retried_only_on_request() {
    let ws = Workspace::with_scenario();
    let store = IndexStore::new(ws.index_path());
    let builder = IndexBuilder::new(ws.engine(), store.clone());
    let ctx = RunContext::new(2);

    let mut index = ProtocolIndex::new();
    builder
        .run(&ctx, &mut index, CorpusLocator::new([&ws.corpus]).locate())
        .await
        .expect("build");

    // Without a retry the failed file counts as done.
    assert!(index
        .unindexed(CorpusLocator::new([&ws.corpus]).locate())
        .is_empty());

    // Repair the capture and retry failures.
    let fixed = ws.capture("c.pcap", "eth:arp\n");
    assert_eq!(index.remove_failed(), 1);
    let files = index.unindexed(CorpusLocator::new([&ws.corpus]).locate());
    assert_eq!(files, vec![fixed.clone()]);

    builder.run(&ctx, &mut index, files).await.expect("retry");
    assert_eq!(
        index.get(&fixed),
        Some(&IndexEntry::indexed(counts(&[("arp", 1), ("eth", 1)])))
    );
}

#[tokio::test]
async fn checkpoints_and_entry_callbacks_see_every_result() {
    let ws = Workspace::new();
    for n in 0..5 {
        ws.capture(&format!("f{n}.pcap"), "eth:ip\neth:ip:tcp\n");
    }
    let store = IndexStore::new(ws.index_path());
    let builder = IndexBuilder::new(ws.engine(), store.clone()).with_checkpoint_every(2);

    let mut seen = Vec::new();
    let mut index = ProtocolIndex::new();
    builder
        .run_with(
            &RunContext::new(2),
            &mut index,
            CorpusLocator::new([&ws.corpus]).locate(),
            |file, entry| seen.push((file.file_name_lossy(), entry.protocols.clone())),
        )
        .await
        .expect("build");

    seen.sort();
    assert_eq!(seen.len(), 5);
    assert!(seen
        .iter()
        .all(|(_, protocols)| protocols == &counts(&[("eth", 2), ("ip", 2), ("tcp", 1)])));
    assert_eq!(store.load().await.expect("reload").len(), 5);
}
