use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

/// Errors raised while saving or loading a title dump
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to open {location}")]
    Open {
        location: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to write titles to {location}")]
    Write {
        location: String,
        #[source]
        source: io::Error,
    },
}

/// Somewhere a finished crawl can be written to
pub trait DestinationSink {
    /// Human-readable description used in messages
    fn location(&self) -> String;

    fn open(&mut self) -> io::Result<Box<dyn Write + '_>>;
}

/// UTF-8 text file on the local filesystem
#[derive(Debug, Clone)]
pub struct FileDestination {
    path: PathBuf,
}

impl FileDestination {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl DestinationSink for FileDestination {
    fn location(&self) -> String {
        self.path.display().to_string()
    }

    fn open(&mut self) -> io::Result<Box<dyn Write + '_>> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = File::create(&self.path)?;
        Ok(Box::new(BufWriter::new(file)))
    }
}

/// Write one title per line, each terminated by `\n`.
///
/// Line breaks inside a title are folded to spaces so every title stays on
/// its own line.
pub fn write_titles<W: Write>(titles: &[String], mut writer: W) -> io::Result<()> {
    for title in titles {
        let line = title.replace(['\r', '\n'], " ");
        writeln!(writer, "{}", line)?;
    }
    writer.flush()
}

/// Write `titles` to `destination`, returning how many were written
pub fn save_titles(titles: &[String], destination: &mut dyn DestinationSink) -> Result<usize, StorageError> {
    let location = destination.location();

    let writer = destination.open()
        .map_err(|source| StorageError::Open { location: location.clone(), source })?;

    write_titles(titles, writer)
        .map_err(|source| StorageError::Write { location: location.clone(), source })?;

    debug!("Saved {} titles to {}", titles.len(), location);

    Ok(titles.len())
}

/// In-memory destination for tests
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct MemoryDestination {
    pub buffer: Vec<u8>,
}

#[cfg(test)]
impl DestinationSink for MemoryDestination {
    fn location(&self) -> String {
        "memory".to_string()
    }

    fn open(&mut self) -> io::Result<Box<dyn Write + '_>> {
        self.buffer.clear();
        Ok(Box::new(&mut self.buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufRead;

    fn read_titles<R: BufRead>(reader: R) -> Vec<String> {
        reader.lines().collect::<io::Result<_>>().unwrap()
    }

    fn titles(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn saved_lines_read_back_unchanged() {
        let original = titles(&["A", "B", "C"]);
        let mut destination = MemoryDestination::default();

        let written = save_titles(&original, &mut destination).unwrap();
        assert_eq!(written, 3);
        assert_eq!(destination.buffer, b"A\nB\nC\n");

        let text = String::from_utf8(destination.buffer.clone()).unwrap();
        let lines: Vec<&str> = text.strip_suffix('\n').unwrap().split('\n').collect();
        assert_eq!(lines, ["A", "B", "C"]);

        assert_eq!(read_titles(destination.buffer.as_slice()), original);
    }

    #[test]
    fn embedded_newlines_are_folded() {
        let mut buffer = Vec::new();
        write_titles(&titles(&["first\nline", "second\r\nline"]), &mut buffer).unwrap();

        assert_eq!(
            read_titles(buffer.as_slice()),
            titles(&["first line", "second  line"])
        );
    }

    #[test]
    fn empty_result_writes_empty_file() {
        let mut buffer = Vec::new();
        write_titles(&[], &mut buffer).unwrap();
        assert!(buffer.is_empty());
    }

    #[test]
    fn file_destination_round_trip() {
        let dir = std::env::temp_dir().join(format!("title-crawler-{}", uuid::Uuid::new_v4()));
        let path = dir.join("nested").join("titles.txt");
        let mut destination = FileDestination::new(&path);
        let original = titles(&["티스토리 첫 글", "Second post"]);

        save_titles(&original, &mut destination).unwrap();

        let file = File::open(&path).unwrap();
        assert_eq!(read_titles(io::BufReader::new(file)), original);

        let _ = fs::remove_dir_all(dir);
    }
}
