//! Input source-list parsing and batch id derivation.
//!
//! The input file contains one URL per line; lines starting with `#` are
//! comments and blank lines are ignored. Invalid lines are reported with
//! their line numbers but do not fail the whole list.

use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::Path;
use url::Url;

/// One accepted source reference, with the line it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLine {
    pub line: u32,
    pub url: String,
}

/// A line that was skipped during parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedLine {
    pub line: u32,
    pub content: String,
}

/// Parsed source list: accepted references in input order, plus rejects.
#[derive(Debug, Clone, Default)]
pub struct SourceList {
    pub sources: Vec<SourceLine>,
    pub rejected: Vec<RejectedLine>,
}

/// True for references the fetch collaborator can plausibly resolve:
/// http(s) URLs, or the scheme-less `www.` form people paste.
pub fn is_valid_source(s: &str) -> bool {
    if s.starts_with("www.") {
        return Url::parse(&format!("https://{}", s)).is_ok();
    }
    match Url::parse(s) {
        Ok(url) => matches!(url.scheme(), "http" | "https"),
        Err(_) => false,
    }
}

/// Read a source list from a file.
pub fn read_source_list(path: &Path) -> io::Result<SourceList> {
    let data = fs::read_to_string(path)?;
    Ok(parse_source_list(&data))
}

/// Parse source-list text. Line numbers are 1-based.
pub fn parse_source_list(data: &str) -> SourceList {
    let mut list = SourceList::default();
    for (idx, raw) in data.lines().enumerate() {
        let line_no = idx as u32 + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if is_valid_source(line) {
            list.sources.push(SourceLine {
                line: line_no,
                url: line.to_string(),
            });
        } else {
            tracing::warn!(line = line_no, "skipping invalid source: {}", line);
            list.rejected.push(RejectedLine {
                line: line_no,
                content: line.to_string(),
            });
        }
    }
    list
}

/// Derive the batch id from the canonical input file path.
///
/// The same file always maps to the same id, which is what makes
/// `run --resume` find the right ledger. The list content is deliberately
/// not folded into the id: a changed list must land on the *same* ledger so
/// drift detection can refuse it, instead of silently starting a new batch.
pub fn batch_id(path: &Path) -> String {
    let canonical = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string_lossy().as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..8])
}
