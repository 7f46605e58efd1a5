use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::PathBuf;

use bytes::Bytes;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::error::StorageError;
use super::layout::FileLayout;

/// A verified piece handed to the writer.
#[derive(Debug)]
pub struct PieceWrite {
    pub index: u32,
    pub data: Bytes,
}

/// The session's single disk-writing task.
///
/// Owns every file handle. `create` opens the files, makes parent
/// directories, and sparsely pre-extends each file to its declared
/// length; `run` then serves piece writes until the channel closes,
/// flushing everything on the way out.
pub struct StorageWriter {
    base: PathBuf,
    layout: FileLayout,
    handles: HashMap<usize, File>,
}

impl StorageWriter {
    pub async fn create(base: PathBuf, layout: FileLayout) -> Result<Self, StorageError> {
        tokio::fs::create_dir_all(&base)
            .await
            .map_err(StorageError::from_io)?;

        let mut writer = Self {
            base,
            layout,
            handles: HashMap::new(),
        };

        for file_index in 0..writer.layout.files().len() {
            writer.open(file_index).await?;
        }

        info!(
            files = writer.layout.files().len(),
            bytes = writer.layout.total_length(),
            "storage ready"
        );

        Ok(writer)
    }

    /// Serves writes until all senders drop, then flushes and closes.
    pub async fn run(mut self, mut rx: mpsc::Receiver<PieceWrite>) -> Result<(), StorageError> {
        while let Some(write) = rx.recv().await {
            self.write_piece(write.index, &write.data).await?;
        }

        self.sync_all().await
    }

    async fn open(&mut self, file_index: usize) -> Result<(), StorageError> {
        let entry = &self.layout.files()[file_index];
        let path = self.base.join(&entry.path);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(StorageError::from_io)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .await
            .map_err(StorageError::from_io)?;

        // Sparse pre-extension: reserves the address range without
        // writing zeros.
        let current = file.metadata().await.map_err(StorageError::from_io)?.len();
        if current < entry.length {
            file.set_len(entry.length)
                .await
                .map_err(StorageError::from_io)?;
        }

        self.handles.insert(file_index, file);
        Ok(())
    }

    async fn write_piece(&mut self, index: u32, data: &[u8]) -> Result<(), StorageError> {
        if data.len() as u64 != self.layout.piece_len(index) {
            return Err(StorageError::BadPieceLength { index });
        }

        for span in self.layout.piece_spans(index) {
            let file = self
                .handles
                .get_mut(&span.file_index)
                .ok_or(StorageError::InvalidLayout("missing file handle"))?;

            file.seek(SeekFrom::Start(span.file_offset))
                .await
                .map_err(StorageError::from_io)?;
            file.write_all(&data[span.piece_offset..span.piece_offset + span.length])
                .await
                .map_err(StorageError::from_io)?;
        }

        debug!(piece = index, bytes = data.len(), "piece written");
        Ok(())
    }

    async fn sync_all(&mut self) -> Result<(), StorageError> {
        for file in self.handles.values_mut() {
            file.flush().await.map_err(StorageError::from_io)?;
            file.sync_data().await.map_err(StorageError::from_io)?;
        }
        Ok(())
    }
}
