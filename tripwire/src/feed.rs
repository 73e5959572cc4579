// tripwire/src/feed.rs
//
// Follows a JSONL feed file that the platform client keeps appending to.
//
// A line is handed out only once its trailing newline is on disk; a writer
// caught mid-line leaves the fragment buffered until the rest arrives. When
// the file shrinks below what has been read (truncated, or rotated to a fresh
// file under the same path) reading restarts from the top.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tracing::warn;

pub struct FeedTail {
    path:    PathBuf,
    reader:  BufReader<File>,
    /// Bytes consumed from the current file, fragment included.
    offset:  u64,
    line_no: u64,
    partial: String,
}

impl FeedTail {
    /// Open `path`; with `from_end`, lines already in the file are skipped.
    pub async fn open(path: impl AsRef<Path>, from_end: bool) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path).await?;
        let offset = if from_end { file.seek(SeekFrom::End(0)).await? } else { 0 };
        Ok(Self {
            path,
            reader:  BufReader::new(file),
            offset,
            line_no: 0,
            partial: String::new(),
        })
    }

    /// The next complete line, or `None` when nothing new is on disk yet.
    pub async fn poll_line(&mut self) -> std::io::Result<Option<String>> {
        let n = self.reader.read_line(&mut self.partial).await?;
        if n == 0 {
            let len = tokio::fs::metadata(&self.path).await?.len();
            if len < self.offset {
                warn!(path = %self.path.display(), len, offset = self.offset, "Feed shrank; reading from the start");
                self.restart().await?;
            }
            return Ok(None);
        }
        self.offset += n as u64;
        if !self.partial.ends_with('\n') {
            return Ok(None);
        }
        self.line_no += 1;
        Ok(Some(std::mem::take(&mut self.partial)))
    }

    /// Complete lines handed out since the file was opened or restarted.
    pub fn line_number(&self) -> u64 { self.line_no }

    pub fn offset(&self) -> u64 { self.offset }

    async fn restart(&mut self) -> std::io::Result<()> {
        self.reader  = BufReader::new(File::open(&self.path).await?);
        self.offset  = 0;
        self.line_no = 0;
        self.partial.clear();
        Ok(())
    }
}
