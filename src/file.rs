//! File access the decoder session reads scripts through.

use std::cell::Cell;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// A readable, rewindable script source.
pub trait FileSource {
    /// Size in bytes.
    fn size(&mut self) -> io::Result<u64>;

    /// Read the whole content from the start.
    fn read_all(&mut self) -> io::Result<Vec<u8>>;

    /// Rewind to the start, also for sources that cannot seek freely.
    fn reopen(&mut self) -> io::Result<()>;

    /// Background poll while the host is idle.
    fn on_idle(&mut self) {}
}

/// A file on disk.
#[derive(Debug)]
pub struct StdFileSource {
    path: PathBuf,
    file: File,
}

impl StdFileSource {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        Ok(StdFileSource { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FileSource for StdFileSource {
    fn size(&mut self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn read_all(&mut self) -> io::Result<Vec<u8>> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut data = Vec::new();
        self.file.read_to_end(&mut data)?;
        Ok(data)
    }

    fn reopen(&mut self) -> io::Result<()> {
        self.file = File::open(&self.path)?;
        Ok(())
    }
}

/// In-memory bytes, for embedding and tests. Clones share their call
/// counters.
#[derive(Debug, Clone, Default)]
pub struct MemoryFileSource {
    data: Vec<u8>,
    reads: Rc<Cell<usize>>,
    reopens: Rc<Cell<usize>>,
    idle_polls: Rc<Cell<usize>>,
}

impl MemoryFileSource {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        MemoryFileSource {
            data: data.into(),
            ..MemoryFileSource::default()
        }
    }

    /// Calls to `size` and `read_all`.
    pub fn reads(&self) -> usize {
        self.reads.get()
    }

    pub fn reopens(&self) -> usize {
        self.reopens.get()
    }

    pub fn idle_polls(&self) -> usize {
        self.idle_polls.get()
    }
}

fn bump(counter: &Cell<usize>) {
    counter.set(counter.get() + 1);
}

impl FileSource for MemoryFileSource {
    fn size(&mut self) -> io::Result<u64> {
        bump(&self.reads);
        Ok(self.data.len() as u64)
    }

    fn read_all(&mut self) -> io::Result<Vec<u8>> {
        bump(&self.reads);
        Ok(self.data.clone())
    }

    fn reopen(&mut self) -> io::Result<()> {
        bump(&self.reopens);
        Ok(())
    }

    fn on_idle(&mut self) {
        bump(&self.idle_polls);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn std_file_reads_and_reopens() {
        let path = std::env::temp_dir().join(format!("csd_input_file_test_{}.csd", std::process::id()));
        {
            let mut f = File::create(&path).unwrap();
            f.write_all(b"<CsoundSynthesizer/>").unwrap();
        }
        let mut source = StdFileSource::open(&path).unwrap();
        assert_eq!(source.size().unwrap(), 20);
        assert_eq!(source.read_all().unwrap(), b"<CsoundSynthesizer/>");
        source.reopen().unwrap();
        assert_eq!(source.read_all().unwrap().len(), 20);
        assert_eq!(source.path(), path.as_path());
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = StdFileSource::open("/definitely/not/here.csd").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn memory_source_counts_calls() {
        let mut source = MemoryFileSource::new("abc");
        assert_eq!(source.size().unwrap(), 3);
        source.reopen().unwrap();
        source.on_idle();
        source.on_idle();
        assert_eq!(source.reopens(), 1);
        assert_eq!(source.idle_polls(), 2);
        assert_eq!(source.read_all().unwrap(), b"abc");
        assert_eq!(source.reads(), 2);

        let shared = source.clone();
        source.on_idle();
        assert_eq!(shared.idle_polls(), 3);
    }
}
