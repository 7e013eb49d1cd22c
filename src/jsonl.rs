//! Newline-delimited JSON helpers shared by the record stores.
//!
//! Reads are strict: every non-empty line must deserialize into the target
//! type, otherwise the whole read fails with the file and line number.
//! Whole-file writes go through a temp file and `rename` so readers never
//! observe a partially written store.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use crate::error::StoreError;

/// A parsed line with its 1-based line number and starting byte offset.
#[derive(Debug, Clone)]
pub struct Line<T> {
    pub line: usize,
    pub offset: u64,
    pub value: T,
}

/// Read every record in `path`. A missing file reads as empty.
pub fn read_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<Line<T>>, StoreError> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StoreError::io(path, e)),
    };
    let mut reader = BufReader::new(file);
    let mut out = Vec::new();
    let mut offset: u64 = 0;
    let mut line_no = 0usize;
    let mut buf = String::new();

    loop {
        buf.clear();
        let n = reader
            .read_line(&mut buf)
            .map_err(|e| StoreError::io(path, e))?;
        if n == 0 {
            break;
        }
        line_no += 1;
        let start = offset;
        offset += n as u64;

        let trimmed = buf.trim_end_matches(&['\n', '\r'][..]);
        if trimmed.trim().is_empty() {
            continue;
        }
        let value = serde_json::from_str::<T>(trimmed).map_err(|e| StoreError::Malformed {
            path: path.to_path_buf(),
            line: line_no,
            message: e.to_string(),
        })?;
        out.push(Line {
            line: line_no,
            offset: start,
            value,
        });
    }

    Ok(out)
}

/// Append one record as a single line and return the offset it was written at.
pub fn append_record<T: Serialize>(path: &Path, record: &T) -> Result<u64, StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }
    let mut line = serde_json::to_string(record).map_err(|e| StoreError::Invalid {
        id: path.display().to_string(),
        message: e.to_string(),
    })?;
    line.push('\n');

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| StoreError::io(path, e))?;
    let offset = file
        .metadata()
        .map_err(|e| StoreError::io(path, e))?
        .len();
    file.write_all(line.as_bytes())
        .map_err(|e| StoreError::io(path, e))?;
    file.flush().map_err(|e| StoreError::io(path, e))?;
    Ok(offset)
}

/// Serialize `records` one per line.
pub fn to_lines<T: Serialize>(records: &[T]) -> Result<String, serde_json::Error> {
    let mut out = String::new();
    for r in records {
        out.push_str(&serde_json::to_string(r)?);
        out.push('\n');
    }
    Ok(out)
}

/// Replace `path` with `contents` atomically (temp file + rename).
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "out".to_string());
    let tmp = parent.join(format!(".{}.tmp-{}", file_name, std::process::id()));

    {
        let mut f = File::create(&tmp).map_err(|e| StoreError::io(&tmp, e))?;
        f.write_all(contents).map_err(|e| StoreError::io(&tmp, e))?;
        f.sync_all().map_err(|e| StoreError::io(&tmp, e))?;
    }
    fs::rename(&tmp, path).map_err(|e| StoreError::io(path, e))?;
    Ok(())
}

/// Pretty-print `value` as JSON and write it atomically.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let mut json = serde_json::to_string_pretty(value).map_err(|e| StoreError::Invalid {
        id: path.display().to_string(),
        message: e.to_string(),
    })?;
    json.push('\n');
    write_atomic(path, json.as_bytes())
}

/// Read a JSON document. A missing file reads as `None`.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::io(path, e)),
    };
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| StoreError::Malformed {
            path: path.to_path_buf(),
            line: e.line(),
            message: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Rec {
        id: u32,
        name: String,
    }

    #[test]
    fn append_then_read_tracks_offsets() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("r.jsonl");
        let o1 = append_record(&path, &Rec { id: 1, name: "a".into() }).unwrap();
        let o2 = append_record(&path, &Rec { id: 2, name: "bb".into() }).unwrap();
        assert_eq!(o1, 0);
        assert!(o2 > 0);

        let lines: Vec<Line<Rec>> = read_records(&path).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].offset, o2);
        assert_eq!(lines[1].line, 2);
        assert_eq!(lines[1].value.name, "bb");
    }

    #[test]
    fn missing_file_reads_empty() {
        let tmp = TempDir::new().unwrap();
        let lines: Vec<Line<Rec>> = read_records(&tmp.path().join("nope.jsonl")).unwrap();
        assert!(lines.is_empty());
    }

    #[test]
    fn malformed_line_reports_line_number() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("r.jsonl");
        fs::write(&path, "{\"id\":1,\"name\":\"a\"}\n{\"id\":\"oops\"}\n").unwrap();
        let err = read_records::<Rec>(&path).unwrap_err();
        match err {
            StoreError::Malformed { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn write_atomic_replaces_contents() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("sub").join("f.json");
        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "two");
    }
}
