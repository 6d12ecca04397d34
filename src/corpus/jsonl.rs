// JSONL persistence for SFT examples
//
// One independently parseable `{"messages": [...]}` record per line.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use super::error::{CorpusError, Result};
use super::types::SftExample;

/// Write examples to `path`, creating parent directories.
pub fn write_jsonl(path: &Path, examples: &[SftExample]) -> Result<()> {
    let io_err = |source| CorpusError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }

    let mut writer = BufWriter::new(File::create(path).map_err(io_err)?);
    for (idx, example) in examples.iter().enumerate() {
        let json = serde_json::to_string(example).map_err(|source| CorpusError::Json {
            path: path.to_path_buf(),
            line: idx + 1,
            source,
        })?;
        writeln!(writer, "{}", json).map_err(io_err)?;
    }
    writer.flush().map_err(io_err)?;

    tracing::debug!("Wrote {} examples to {}", examples.len(), path.display());
    Ok(())
}

/// Read examples back, skipping blank lines.
pub fn read_jsonl(path: &Path) -> Result<Vec<SftExample>> {
    if !path.exists() {
        return Err(CorpusError::NotFound(path.to_path_buf()));
    }
    let io_err = |source| CorpusError::Io {
        path: path.to_path_buf(),
        source,
    };

    let reader = BufReader::new(File::open(path).map_err(io_err)?);
    let mut examples = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(io_err)?;
        if line.trim().is_empty() {
            continue;
        }
        let example: SftExample = serde_json::from_str(&line).map_err(|source| CorpusError::Json {
            path: path.to_path_buf(),
            line: idx + 1,
            source,
        })?;
        examples.push(example);
    }

    Ok(examples)
}
