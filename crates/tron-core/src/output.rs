//! Output streams of a task's action run.

use crate::error::CoreError;
use crate::ids::RunId;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Which output stream a line belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    /// File name used for this stream.
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// Sink for the output a task produces while it is tracked.
pub trait TaskSerializer: Send + Sync {
    /// Append one line to `stream`.
    fn write(&self, stream: OutputStream, line: &str) -> Result<(), CoreError>;
}

/// Appends lines to `<base>/<run_id>/stdout` and `<base>/<run_id>/stderr`.
#[derive(Debug, Clone)]
pub struct FileSerializer {
    dir: PathBuf,
}

impl FileSerializer {
    /// Serializer for `run_id` under the `base` output directory.
    ///
    /// The run id becomes a single directory name, so it must not be empty,
    /// `.`, `..` or contain a path separator.
    pub fn new(base: impl AsRef<Path>, run_id: &RunId) -> Result<Self, CoreError> {
        let name = run_id.as_str();
        let escapes = name == "." || name == ".." || name.contains(|c: char| c == '/' || c == '\\');
        if name.is_empty() || escapes {
            return Err(CoreError::InvalidInput(format!(
                "run id '{}' is not a valid output directory name",
                name
            )));
        }
        Ok(Self {
            dir: base.as_ref().join(name),
        })
    }

    /// Directory holding this run's streams.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl TaskSerializer for FileSerializer {
    fn write(&self, stream: OutputStream, line: &str) -> Result<(), CoreError> {
        fs::create_dir_all(&self.dir)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(stream.file_name()))?;
        writeln!(file, "{}", line)?;
        Ok(())
    }
}

/// Discards all output.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSerializer;

impl TaskSerializer for NullSerializer {
    fn write(&self, _stream: OutputStream, _line: &str) -> Result<(), CoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_serializer_appends_per_stream() {
        let tmp = tempfile::tempdir().unwrap();
        let serializer = FileSerializer::new(tmp.path(), &RunId::new("job.1.action")).unwrap();

        serializer.write(OutputStream::Stderr, "first").unwrap();
        serializer.write(OutputStream::Stderr, "second").unwrap();
        serializer.write(OutputStream::Stdout, "out").unwrap();

        let stderr = fs::read_to_string(serializer.dir().join("stderr")).unwrap();
        assert_eq!(stderr, "first\nsecond\n");
        let stdout = fs::read_to_string(serializer.dir().join("stdout")).unwrap();
        assert_eq!(stdout, "out\n");
    }

    #[test]
    fn test_file_serializer_rejects_run_ids_escaping_base() {
        let tmp = tempfile::tempdir().unwrap();
        for bad in ["", ".", "..", "../etc", "job/1", "job\\1"] {
            let result = FileSerializer::new(tmp.path(), &RunId::new(bad));
            assert!(
                matches!(result, Err(CoreError::InvalidInput(_))),
                "run id {:?} should be rejected",
                bad
            );
        }
    }
}
