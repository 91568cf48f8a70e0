#![allow(dead_code)]

use assert_cmd::Command;
use std::path::{Path, PathBuf};

#[allow(deprecated)]
pub fn capdex() -> Command {
    let mut cmd = Command::cargo_bin("capdex").expect("binary");
    cmd.env_remove("CAPDEX_CONCURRENCY")
        .env_remove("CAPDEX_TASK_TIMEOUT_SECS")
        .env_remove("RUST_LOG");
    cmd
}

/// Index with a.pcap (eth:ip:tcp), b.pcap (eth:ip:udp) and a failed c.pcap.
pub const SCENARIO_INDEX: &str = concat!(
    r#"{"format":"capdex-index","schema_version":1}"#,
    "\n",
    r#"{"path":"/corpus/a.pcap","status":"indexed","protocols":{"eth":1,"ip":1,"tcp":1}}"#,
    "\n",
    r#"{"path":"/corpus/b.pcap","status":"indexed","protocols":{"eth":1,"ip":1,"udp":1}}"#,
    "\n",
    r#"{"path":"/corpus/c.pcap","status":"failed","protocols":{},"error":"exit status 2"}"#,
    "\n",
);

pub fn write_index(dir: &Path, contents: &str) -> PathBuf {
    let path = dir.join("corpus.idx");
    std::fs::write(&path, contents).expect("write index");
    path
}

/// Fake engine named `tshark` in `dir`: a capture's content is its protocol-chain output,
/// a capture containing `FAIL` exits 2 and one containing `SLOW` hangs for 30s.
#[cfg(unix)]
pub fn write_engine(dir: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    std::fs::create_dir_all(dir).expect("create bin dir");
    let path = dir.join("tshark");
    let body = r#"#!/bin/sh
for last; do :; done
if grep -q SLOW "$last"; then
  sleep 30
fi
if grep -q FAIL "$last"; then
  echo "$(basename "$last"): malformed capture" >&2
  exit 2
fi
case "$1" in
  -Tfields) cat "$last" ;;
  *) echo "Dissection of $(basename "$last")"; cat "$last" ;;
esac
"#;
    std::fs::write(&path, body).expect("write engine");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("chmod engine");
    path
}
