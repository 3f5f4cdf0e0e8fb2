//! Shared fixtures for integration tests
#![allow(dead_code)]

use crm_p3_core::constants::{DENSIZE, ISIZE, RCOLLSIZE, RIMSIZE};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

#[ctor::ctor]
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Ice record value: distinct and positive for every (record, column)
pub fn ice_value(dens: usize, rime: usize, size: usize, column: usize) -> f64 {
    ((((dens * RIMSIZE + rime) * ISIZE + size) * 15 + column) + 1) as f64
}

/// Collection record value: a power of ten offset so log10 is easy to check
pub fn collect_value(column: usize, collector: usize) -> f64 {
    10f64.powi((column + collector) as i32 % 7) * 2.0
}

/// Text of a complete ice table file
pub fn table_text(version: &str) -> String {
    let mut out = format!("VERSION {version}\n");
    for dens in 0..DENSIZE {
        for rime in 0..RIMSIZE {
            for size in 0..ISIZE {
                let _ = write!(out, "{:>4}{:>4}", dens + 1, size + 1);
                for column in 0..15 {
                    let _ = write!(out, " {:.6e}", ice_value(dens, rime, size, column));
                }
                out.push('\n');
            }
            for size in 0..ISIZE {
                for collector in 0..RCOLLSIZE {
                    let _ = write!(out, "{:>4}{:>4}", size + 1, collector + 1);
                    for column in 0..6 {
                        let _ = write!(out, " {:.6e}", collect_value(column, collector));
                    }
                    out.push('\n');
                }
            }
        }
    }
    out
}

/// Ice table written into a temporary directory, removed on drop.
pub struct TableFile {
    _dir: TempDir,
    /// Base path to configure; the version is appended when loading
    pub base: PathBuf,
}

/// Write `<tmp>/p3_lookup_table_1.dat-v<file_version>` whose header says
/// `header_version`. Keep the returned guard alive while the file is read.
pub fn write_table(file_version: &str, header_version: &str) -> TableFile {
    let dir = tempfile::tempdir().expect("create temp dir");
    let base = dir.path().join("p3_lookup_table_1.dat-v");
    std::fs::write(versioned(&base, file_version), table_text(header_version))
        .expect("write table");
    TableFile { _dir: dir, base }
}

fn versioned(base: &Path, version: &str) -> PathBuf {
    let mut path = base.as_os_str().to_owned();
    path.push(version);
    PathBuf::from(path)
}
