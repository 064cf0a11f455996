//! Stand-in tool scripts for tests that drive real subprocesses.
//!
//! Every script a test binary needs is written once, before the first test
//! spawns anything: a fork taken while a script is still open for writing
//! makes executing that script fail with ETXTBSY.

#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use vidcap::CaptureAdapter;

pub const WAIT: Duration = Duration::from_secs(10);

/// Fresh directory for this test process.
pub fn tool_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("vidcap-{tag}-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Write an executable `sh` script called `name` into `dir`.
pub fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// `printf` command writing `bytes` verbatim.
pub fn printf(bytes: &[u8]) -> String {
    let escaped: String = bytes.iter().map(|b| format!("\\{b:03o}")).collect();
    format!("printf '{escaped}'")
}

/// Write `bytes` in pieces of `sizes` (the rest goes last), pausing between
/// pieces so each lands in a separate read.
pub fn printf_in_pieces(bytes: &[u8], sizes: &[usize]) -> String {
    let mut lines = Vec::new();
    let mut rest = bytes;
    for &size in sizes {
        let (piece, tail) = rest.split_at(size.min(rest.len()));
        lines.push(printf(piece));
        lines.push("sleep 0.1".to_string());
        rest = tail;
    }
    if !rest.is_empty() {
        lines.push(printf(rest));
    }
    lines.join("\n")
}

/// Shell line appending the script's arguments to `log`.
pub fn log_args(log: &Path) -> String {
    format!("echo \"$*\" >> '{}'", log.display())
}

/// Lines logged so far; empty when nothing has run yet.
pub fn logged(log: &Path) -> Vec<String> {
    std::fs::read_to_string(log)
        .map(|text| text.lines().map(str::to_string).collect())
        .unwrap_or_default()
}

pub async fn wait_for_lines(log: &Path, count: usize) -> Vec<String> {
    tokio::time::timeout(WAIT, async {
        loop {
            let lines = logged(log);
            if lines.len() >= count {
                return lines;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("tool was not launched")
}

pub async fn wait_idle(adapter: &impl CaptureAdapter) {
    tokio::time::timeout(WAIT, async {
        while adapter.is_capturing() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("adapter never went idle");
}
