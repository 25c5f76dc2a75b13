//! Output paths: per-reference-date directory, deterministic file names, staging suffix.

use chrono::NaiveDate;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::partition::PartitionKey;

/// Temporary file suffix used before atomic rename.
pub const TEMP_SUFFIX: &str = ".part";

/// Longest file stem, so `<stem>.csv.part` still fits NAME_MAX.
const MAX_STEM: usize = 240;

/// Hex digits of the key hash appended to altered names.
const TAG_LEN: usize = 8;

/// `<root>/<YYYY-MM-DD>`.
pub fn partition_dir(root: &Path, reference: NaiveDate) -> PathBuf {
    root.join(reference.format("%Y-%m-%d").to_string())
}

/// Final file name for a partition: the key plus `.csv` when the key is
/// already a safe name, otherwise the sanitized key plus `-<hash>` of the raw
/// key so distinct keys never share a file.
pub fn artifact_file_name(key: &PartitionKey) -> String {
    let raw = key.as_str();
    let stem = sanitize_file_name(raw);
    if !stem.is_empty() && stem == raw {
        return format!("{stem}.csv");
    }
    let digest = hex::encode(Sha256::digest(raw.as_bytes()));
    let tag = &digest[..TAG_LEN];
    let stem = truncate_at_char(&stem, MAX_STEM - TAG_LEN - 1);
    if stem.is_empty() {
        format!("partition-{tag}.csv")
    } else {
        format!("{stem}-{tag}.csv")
    }
}

/// Path for the staging file: appends `.part` to the final path (e.g. `x.csv` → `x.csv.part`).
pub fn temp_path(final_path: &Path) -> PathBuf {
    let mut o = final_path.as_os_str().to_owned();
    o.push(TEMP_SUFFIX);
    PathBuf::from(o)
}

/// Sanitizes a candidate file name for safe use on Linux.
///
/// - Replaces NUL, `/`, `\`, whitespace and control characters with `_`
/// - Collapses consecutive underscores
/// - Trims leading/trailing dots and underscores
/// - Limits length to 240 bytes so `.csv.part` still fits NAME_MAX
pub fn sanitize_file_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut prev_underscore = false;
    for c in name.chars() {
        let c = if c == '\0' || c == '/' || c == '\\' || c.is_control() || c.is_whitespace() {
            '_'
        } else {
            c
        };
        if c == '_' {
            if !prev_underscore {
                out.push('_');
            }
            prev_underscore = true;
        } else {
            out.push(c);
            prev_underscore = false;
        }
    }

    let trimmed = out.trim_matches(|c| c == '.' || c == '_');
    truncate_at_char(trimmed, MAX_STEM).to_string()
}

fn truncate_at_char(s: &str, max: usize) -> &str {
    let mut take = s.len().min(max);
    while take > 0 && !s.is_char_boundary(take) {
        take -= 1;
    }
    &s[..take]
}
