// SPDX-License-Identifier: Apache-2.0

use std::fs::{File, Metadata};
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::receivers::eventlog::input::file_id::FileId;

/// Line reader over one open file.
///
/// `offset` only advances past complete, newline-terminated lines. Bytes of a
/// line still being written are held back until its terminator arrives, so
/// the offset is always a safe resume point.
pub struct FileReader {
    path: PathBuf,
    id: FileId,
    reader: BufReader<File>,
    offset: u64,
    partial: Vec<u8>,
}

impl FileReader {
    pub fn open(path: impl AsRef<Path>, offset: u64) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        Self::from_file(path, file, offset)
    }

    pub fn from_file(path: PathBuf, mut file: File, offset: u64) -> io::Result<Self> {
        let id = FileId::from_file(&file)?;
        if offset > 0 {
            file.seek(SeekFrom::Start(offset))?;
        }
        Ok(Self {
            path,
            id,
            reader: BufReader::new(file),
            offset,
            partial: Vec::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_id(&self) -> FileId {
        self.id
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Bytes read past `offset` that do not yet form a full line.
    pub fn pending_len(&self) -> usize {
        self.partial.len()
    }

    pub fn metadata(&self) -> io::Result<Metadata> {
        self.reader.get_ref().metadata()
    }

    /// Next complete line without its terminator, or None when no full line
    /// is available yet. Invalid UTF-8 is replaced rather than rejected.
    pub fn read_line(&mut self) -> io::Result<Option<String>> {
        let n = self.reader.read_until(b'\n', &mut self.partial)?;
        if n == 0 || self.partial.last() != Some(&b'\n') {
            return Ok(None);
        }
        Ok(Some(self.take_partial()))
    }

    /// Like `read_line`, but at end of file an unterminated remainder is
    /// returned as the last line. Only for files that will not grow again.
    pub fn read_final_line(&mut self) -> io::Result<Option<String>> {
        if let Some(line) = self.read_line()? {
            return Ok(Some(line));
        }
        if self.partial.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.take_partial()))
    }

    /// Start over from the beginning of the same handle, used after the file
    /// was truncated in place.
    pub fn rewind(&mut self) -> io::Result<()> {
        self.reader.seek(SeekFrom::Start(0))?;
        self.offset = 0;
        self.partial.clear();
        Ok(())
    }

    fn take_partial(&mut self) -> String {
        self.offset += self.partial.len() as u64;
        let mut bytes = std::mem::take(&mut self.partial);
        if bytes.last() == Some(&b'\n') {
            bytes.pop();
        }
        if bytes.last() == Some(&b'\r') {
            bytes.pop();
        }
        match String::from_utf8(bytes) {
            Ok(s) => s,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        }
    }
}
