//! Append-only Markdown mirror of the memory store, one file per session,
//! for human inspection. Writes are best-effort: a failure is logged by the
//! caller and never affects the SQLite source of truth.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::types::MemoryEntry;

/// File path for a session's audit log.
pub fn session_file(dir: &Path, session_id: &str) -> PathBuf {
    let sanitized: String = session_id
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            other => other,
        })
        .collect();
    dir.join(format!("{sanitized}.md"))
}

/// Append one entry block, creating the file (with a heading) on first use.
pub fn append_entry(dir: &Path, entry: &MemoryEntry) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    let path = session_file(dir, &entry.session_id);
    let is_new = !path.exists();

    let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
    if is_new {
        writeln!(file, "# Memory log — {}\n", entry.session_id)?;
    }
    writeln!(
        file,
        "### {} — {}\n\n{}\n",
        entry.kind,
        entry.created_at.to_rfc3339(),
        entry.content.trim()
    )?;
    Ok(())
}
