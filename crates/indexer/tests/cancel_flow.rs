#![cfg(unix)]

mod common;

use capdex_indexer::{
    CancelToken, CorpusLocator, IndexBuilder, IndexEntry, IndexStore, ProtocolIndex, RunContext,
};
use common::Workspace;
use pretty_assertions::assert_eq;
use std::time::Duration;

fn names(index: &ProtocolIndex) -> Vec<String> {
    index
        .entries()
        .map(|(file, _)| file.file_name_lossy())
        .collect()
}

#[tokio::test]
async fn kill_persists_only_completed_entries() {
    let ws = Workspace::new();
    let earlier = ws.capture("earlier.pcap", "eth:arp\n");
    ws.capture("a.pcap", "eth:ip:tcp\n");
    ws.capture("b.pcap", "eth:ip:udp\n");
    ws.capture("slow1.pcap", "SLOW\n");
    ws.capture("slow2.pcap", "SLOW\n");

    let store = IndexStore::new(ws.index_path());
    let mut before = ProtocolIndex::new();
    before.insert(
        earlier,
        IndexEntry::indexed([("arp".to_string(), 1), ("eth".to_string(), 1)].into()),
    );
    store.save(&before).await.expect("seed index");

    let mut index = store.load().await.expect("load");
    let files = index.unindexed(CorpusLocator::new([&ws.corpus]).locate());
    assert_eq!(files.len(), 4);

    let ctx = RunContext::new(4).with_cancel(CancelToken::default());
    let cancel = ctx.cancel().clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        cancel.request_stop();
        cancel.kill();
    });

    let report = tokio::time::timeout(
        Duration::from_secs(15),
        IndexBuilder::new(ws.engine(), store.clone()).run(&ctx, &mut index, files),
    )
    .await
    .expect("kill ends the run")
    .expect("build");

    assert!(report.interrupted);
    assert_eq!(report.indexed, 2);
    assert_eq!(report.cancelled, 2);

    let persisted = store.load().await.expect("reload");
    assert_eq!(names(&persisted), vec!["a.pcap", "b.pcap", "earlier.pcap"]);
    assert_eq!(persisted, index);
}

#[tokio::test]
async fn graceful_stop_finishes_in_flight_files_and_skips_the_rest() {
    let ws = Workspace::new();
    for n in 0..6 {
        ws.capture(&format!("f{n}.pcap"), "eth:ip\n");
    }
    let store = IndexStore::new(ws.index_path());
    let ctx = RunContext::new(1);

    let mut index = ProtocolIndex::new();
    let cancel = ctx.cancel().clone();
    let report = IndexBuilder::new(ws.engine(), store.clone())
        .run_with(
            &ctx,
            &mut index,
            CorpusLocator::new([&ws.corpus]).locate(),
            |_, _| cancel.request_stop(),
        )
        .await
        .expect("build");

    assert!(report.interrupted);
    // One worker: the first result triggers the stop, at most one more was already started.
    assert!(report.indexed >= 1 && report.indexed <= 2, "{report:?}");
    assert_eq!(report.indexed + report.cancelled, 6);

    let persisted = store.load().await.expect("reload");
    assert_eq!(persisted.len(), report.indexed);

    // The next run picks up exactly what was skipped.
    let rest = persisted.unindexed(CorpusLocator::new([&ws.corpus]).locate());
    assert_eq!(rest.len(), report.cancelled);
}
