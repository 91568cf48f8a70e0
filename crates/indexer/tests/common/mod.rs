#![allow(dead_code)]

use capdex_indexer::{CaptureFileRef, DissectionEngine};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Fake engine: a capture file's content is its own protocol-chain output.
///
/// Markers inside a capture change behaviour: `FAIL` exits 2, `SLOW` sleeps first.
/// `extra` is spliced in before the output so a second build can diverge.
pub fn write_engine(dir: &Path, name: &str, extra: &str) -> PathBuf {
    let path = dir.join(name);
    let body = format!(
        r#"#!/bin/sh
for last; do :; done
if grep -q SLOW "$last"; then sleep 30; fi
if grep -q FAIL "$last"; then
  echo "$(basename "$last"): malformed capture" >&2
  exit 2
fi
{extra}
case "$1" in
  -Tfields) cat "$last" ;;
  *) echo "Dissection of $(basename "$last")"; sed 's/:/ > /g' "$last" ;;
esac
"#
    );
    std::fs::write(&path, body).expect("write engine");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("chmod engine");
    path
}

pub fn write_capture(dir: &Path, name: &str, contents: &str) -> CaptureFileRef {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create capture dir");
    }
    std::fs::write(&path, contents).expect("write capture");
    CaptureFileRef::new(std::fs::canonicalize(&path).expect("canonicalize")).expect("file ref")
}

pub struct Workspace {
    pub temp: TempDir,
    pub corpus: PathBuf,
    pub bin: PathBuf,
}

impl Workspace {
    pub fn new() -> Self {
        let temp = TempDir::new().expect("tempdir");
        let corpus = temp.path().join("corpus");
        let bin = temp.path().join("bin");
        std::fs::create_dir_all(&corpus).expect("create corpus");
        std::fs::create_dir_all(&bin).expect("create bin");
        Self { temp, corpus, bin }
    }

    /// a.pcap -> eth:ip:tcp, b.pcap -> eth:ip:udp, c.pcap fails to dissect.
    pub fn with_scenario() -> Self {
        let ws = Self::new();
        ws.capture("a.pcap", "eth:ip:tcp\n");
        ws.capture("b.pcap", "eth:ip:udp\n");
        ws.capture("c.pcap", "FAIL\n");
        ws
    }

    pub fn capture(&self, name: &str, contents: &str) -> CaptureFileRef {
        write_capture(&self.corpus, name, contents)
    }

    pub fn engine(&self) -> DissectionEngine {
        self.engine_named("tshark", "")
    }

    pub fn engine_named(&self, name: &str, extra: &str) -> DissectionEngine {
        DissectionEngine::new(write_engine(&self.bin, name, extra))
    }

    pub fn index_path(&self) -> PathBuf {
        self.temp.path().join("corpus.idx")
    }
}
