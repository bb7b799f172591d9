// Append-only JSON-lines sample history, written by a dedicated task fed over a channel.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};
use tokio::sync::mpsc;
use tracing::instrument;

use crate::error::SinkError;
use crate::models::Sample;

/// One sample per line; existing lines are never rewritten.
pub struct JsonLinesSink {
    path: PathBuf,
    file: tokio::fs::File,
    /// The file may end in a torn record; start the next one on a new line.
    needs_newline: bool,
}

impl JsonLinesSink {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .await?;
        let needs_newline = !ends_with_newline(&mut file).await?;
        Ok(Self {
            path,
            file,
            needs_newline,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[instrument(skip(self, sample), fields(sink = "jsonl", operation = "append", timestamp = sample.timestamp))]
    pub async fn append(&mut self, sample: &Sample) -> Result<(), SinkError> {
        let mut line = Vec::new();
        if self.needs_newline {
            line.push(b'\n');
        }
        serde_json::to_writer(&mut line, sample)?;
        line.push(b'\n');
        let written = async {
            self.file.write_all(&line).await?;
            self.file.flush().await
        }
        .await;
        // A failed write may have left part of the record behind.
        self.needs_newline = written.is_err();
        Ok(written?)
    }
}

/// `true` for an empty file or one whose last byte is a newline.
async fn ends_with_newline(file: &mut tokio::fs::File) -> std::io::Result<bool> {
    if file.metadata().await?.len() == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::End(-1)).await?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last).await?;
    Ok(last[0] == b'\n')
}

/// Read back a history file. Lines that fail to parse (e.g. a torn final write)
/// are skipped with a warning.
pub async fn load_history(path: impl AsRef<Path>) -> Result<Vec<Sample>, SinkError> {
    let content = match tokio::fs::read_to_string(path.as_ref()).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut samples = Vec::new();
    for (i, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Sample>(line) {
            Ok(s) => samples.push(s),
            Err(e) => tracing::warn!(line = i + 1, error = %e, "skipping unreadable history line"),
        }
    }
    Ok(samples)
}

/// Spawns the task that appends every received sample to the sink.
/// When the scheduler drops its sender, this task drains what is left and exits.
pub fn spawn_sample_writer(
    mut rx: mpsc::Receiver<Sample>,
    mut sink: JsonLinesSink,
    samples_saved_total: Arc<AtomicU64>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(sample) = rx.recv().await {
            match sink.append(&sample).await {
                Ok(()) => {
                    samples_saved_total.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    tracing::warn!(error = %e, path = %sink.path().display(), "sample writer: append failed");
                }
            }
        }
        tracing::debug!("Sample writer shutting down");
    })
}
