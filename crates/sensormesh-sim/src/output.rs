use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;

/// JSONL destination: stdout, plus a file when `--output-dir` is given.
pub struct JsonlOutput {
    file: Option<BufWriter<File>>,
}

impl JsonlOutput {
    pub fn stdout_only() -> Self {
        Self { file: None }
    }

    /// Also write to `<dir>/<mode>_<YYYYMMDD-HHMMSS>.jsonl`.
    pub fn with_file(dir: &Path, mode: &str) -> io::Result<(Self, PathBuf)> {
        fs::create_dir_all(dir)?;
        let timestamp = chrono::Local::now().format("%Y%m%d-%H%M%S").to_string();
        let path = unique_path(dir, &format!("{mode}_{timestamp}"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok((
            Self {
                file: Some(BufWriter::new(file)),
            },
            path,
        ))
    }

    /// Emit one JSONL line, flushed immediately for piped output.
    pub fn emit<T: Serialize>(&mut self, event: &T) -> io::Result<()> {
        let json = serde_json::to_string(event)?;
        let stdout = io::stdout();
        let mut lock = stdout.lock();
        writeln!(lock, "{json}")?;
        lock.flush()?;

        if let Some(file) = self.file.as_mut() {
            writeln!(file, "{json}")?;
            file.flush()?;
        }
        Ok(())
    }
}

/// First of `<base>.jsonl`, `<base>_2.jsonl`, ... that does not exist yet.
fn unique_path(dir: &Path, base: &str) -> PathBuf {
    let candidate = dir.join(format!("{base}.jsonl"));
    if !candidate.exists() {
        return candidate;
    }
    (2u32..)
        .map(|i| dir.join(format!("{base}_{i}.jsonl")))
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}
