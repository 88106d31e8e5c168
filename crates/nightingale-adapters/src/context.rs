//! Failure-log context gathering
//!
//! Picks the repository files a failure log actually mentions so the proposer
//! sees the code under suspicion.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Per-file content cap handed to the proposer.
pub const MAX_CONTEXT_CHARS: usize = 3_000;

/// Files from `inventory` whose path appears in `failure_log`, earliest
/// mention first, at most `limit` of them. Content is cut to
/// [`MAX_CONTEXT_CHARS`]; unreadable or non-UTF-8 files are skipped.
pub fn gather_context_files<S: AsRef<str>>(
    root: &Path,
    inventory: &[S],
    failure_log: &str,
    limit: usize,
) -> BTreeMap<String, String> {
    let mut mentioned: Vec<(usize, &str)> = inventory
        .iter()
        .map(|path| path.as_ref())
        .filter_map(|path| failure_log.find(path).map(|pos| (pos, path)))
        .collect();
    // a longer path at the same offset is the more specific mention
    mentioned.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.len().cmp(&a.1.len())));

    let mut files = BTreeMap::new();
    for (_, path) in mentioned {
        if files.len() >= limit {
            break;
        }
        match fs::read_to_string(root.join(path)) {
            Ok(content) => {
                files.insert(path.to_string(), head_chars(&content, MAX_CONTEXT_CHARS));
            }
            Err(err) => {
                tracing::debug!(path, "skipping context file: {}", err);
            }
        }
    }
    files
}

fn head_chars(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
