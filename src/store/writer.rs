use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, WriteBytesExt};

use super::annotation::TrialAnnotation;
use super::format::{
    encode_attributes, encode_samples, write_chunk, ChunkKind, Header, FLAG_FINALIZED,
    OFFSET_FLAGS, OFFSET_TIMESTEPS,
};
use super::metadata::SessionMetadata;
use crate::core::SampleMatrix;
use crate::error::{Result, SessionError};
use crate::hal::SampleFormat;

#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Fail if the file already exists
    pub exclusive: bool,
    /// Timesteps buffered before a sample chunk is written
    pub chunk_timesteps: usize,
    /// fsync after every trial annotation
    pub sync_each_trial: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            exclusive: true,
            chunk_timesteps: 1024,
            sync_each_trial: false,
        }
    }
}

/// Append-only writer for a session store.
///
/// Holds one `C x T` sample matrix growing along `T`, plus the session
/// metadata header. `close` consumes the writer, so a closed store cannot
/// be written again.
///
/// The first I/O failure poisons the store: buffered bytes are discarded,
/// later writes are refused and the header is never finalized, leaving
/// readers to recover the chunks that made it to disk.
#[derive(Debug)]
pub struct PersistentStore {
    path: PathBuf,
    file: Option<BufWriter<File>>,
    options: StoreOptions,
    channel_count: usize,
    format: SampleFormat,
    pending: SampleMatrix,
    pending_start: u64,
    timesteps: u64,
    chunks_written: u64,
    poisoned: bool,
}

impl PersistentStore {
    pub fn open(path: impl AsRef<Path>, metadata: &SessionMetadata, channel_count: usize) -> Result<Self> {
        Self::open_with(path, metadata, channel_count, StoreOptions::default())
    }

    pub fn open_with(
        path: impl AsRef<Path>,
        metadata: &SessionMetadata,
        channel_count: usize,
        options: StoreOptions,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let create_err = |reason: String| SessionError::StoreCreate {
            path: path.clone(),
            reason,
        };

        if channel_count == 0 {
            return Err(create_err("channel count must be positive".to_string()));
        }

        let mut open = OpenOptions::new();
        open.write(true);
        if options.exclusive {
            open.create_new(true);
        } else {
            open.create(true).truncate(true);
        }
        let file = open.open(&path).map_err(|e| create_err(e.to_string()))?;

        let attributes = encode_attributes(&metadata.to_attributes());
        let header = Header::new(channel_count, metadata.sample_format, attributes.len());

        let mut writer = BufWriter::new(file);
        writer
            .write_all(&header.encode())
            .and_then(|_| writer.write_all(&attributes))
            .and_then(|_| writer.flush())
            .map_err(|e| create_err(e.to_string()))?;

        log::info!(
            "Opened store {:?} ({} channels, {})",
            path,
            channel_count,
            metadata.sample_format.dtype_name()
        );

        Ok(Self {
            path,
            file: Some(writer),
            pending: SampleMatrix::with_capacity(channel_count, options.chunk_timesteps),
            options,
            channel_count,
            format: metadata.sample_format,
            pending_start: 0,
            timesteps: 0,
            chunks_written: 0,
            poisoned: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    /// Timesteps appended so far, buffered ones included
    pub fn timesteps(&self) -> u64 {
        self.timesteps
    }

    pub fn chunks_written(&self) -> u64 {
        self.chunks_written
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Extend the matrix by `frames.timesteps()` along the time axis.
    pub fn append(&mut self, frames: &SampleMatrix) -> Result<()> {
        self.writer()?;
        if frames.channel_count() != self.channel_count {
            return Err(SessionError::StoreWrite(format!(
                "append of {} channels to a {}-channel store",
                frames.channel_count(),
                self.channel_count
            )));
        }

        let chunk = self.options.chunk_timesteps.max(1);
        let mut offset = 0;
        while offset < frames.timesteps() {
            let room = chunk - self.pending.timesteps();
            let take = room.min(frames.timesteps() - offset);
            self.pending
                .append_range(frames, offset, take)
                .map_err(SessionError::store_write)?;
            offset += take;
            self.timesteps += take as u64;

            if self.pending.timesteps() >= chunk {
                self.flush_pending()?;
            }
        }
        Ok(())
    }

    /// Record a completed trial. Buffered samples are written first so the
    /// annotation never precedes its samples on disk.
    pub fn annotate(&mut self, annotation: &TrialAnnotation) -> Result<()> {
        self.flush_pending()?;

        let payload = serde_json::to_vec(annotation).map_err(SessionError::store_write)?;
        let sync = self.options.sync_each_trial;
        let written = {
            let writer = self.writer()?;
            write_chunk(writer, ChunkKind::Trial, &payload)
                .and_then(|_| writer.flush())
                .and_then(|_| if sync { writer.get_ref().sync_data() } else { Ok(()) })
        };
        written.map_err(|e| self.poison(e))
    }

    /// Flush the tail chunk and finalize the header.
    pub fn close(mut self) -> Result<()> {
        self.finalize()
    }

    fn writer(&mut self) -> Result<&mut BufWriter<File>> {
        if self.poisoned {
            return Err(SessionError::StoreWrite(
                "store disabled by an earlier write failure".to_string(),
            ));
        }
        self.file
            .as_mut()
            .ok_or_else(|| SessionError::StoreWrite("store already closed".to_string()))
    }

    /// Stop writing after `err`. Nothing buffered is retried.
    fn poison(&mut self, err: impl std::fmt::Display) -> SessionError {
        if let Some(writer) = self.file.take() {
            discard(writer);
        }
        log::error!(
            "Write to store {:?} failed, {} buffered timesteps discarded: {}",
            self.path,
            self.pending.timesteps(),
            err
        );
        self.pending.clear();
        self.poisoned = true;
        SessionError::store_write(err)
    }

    fn flush_pending(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let payload = encode_samples(self.pending_start, &self.pending, self.format);
        let written = write_chunk(self.writer()?, ChunkKind::Samples, &payload);
        written.map_err(|e| self.poison(e))?;

        log::debug!(
            "Wrote sample chunk t0={} k={}",
            self.pending_start,
            self.pending.timesteps()
        );
        self.pending_start += self.pending.timesteps() as u64;
        self.pending.clear();
        self.chunks_written += 1;
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        if self.poisoned {
            log::warn!("Store {:?} left unfinalized after a write failure", self.path);
            return Ok(());
        }
        if self.file.is_none() {
            return Ok(());
        }
        self.flush_pending()?;

        let Some(writer) = self.file.take() else {
            return Ok(());
        };
        let mut file = match writer.into_inner() {
            Ok(file) => file,
            Err(e) => {
                let (err, writer) = e.into_parts();
                discard(writer);
                self.poisoned = true;
                return Err(SessionError::store_write(err));
            }
        };

        let rewrite = |file: &mut File, timesteps: u64| -> std::io::Result<()> {
            file.seek(SeekFrom::Start(OFFSET_TIMESTEPS))?;
            file.write_u64::<LittleEndian>(timesteps)?;
            file.seek(SeekFrom::Start(OFFSET_FLAGS))?;
            file.write_u32::<LittleEndian>(FLAG_FINALIZED)?;
            file.sync_all()
        };
        if let Err(e) = rewrite(&mut file, self.timesteps) {
            self.poisoned = true;
            return Err(SessionError::store_write(e));
        }

        log::info!(
            "Closed store {:?}: {} timesteps in {} chunks",
            self.path,
            self.timesteps,
            self.chunks_written
        );
        Ok(())
    }
}

/// Drop a writer without flushing what it still buffers.
fn discard(writer: BufWriter<File>) {
    let (_file, _unflushed) = writer.into_parts();
}

impl Drop for PersistentStore {
    fn drop(&mut self) {
        if self.file.is_some() {
            log::warn!("Store {:?} dropped without close, finalizing", self.path);
            if let Err(e) = self.finalize() {
                log::error!("Failed to finalize store {:?}: {}", self.path, e);
            }
        }
    }
}
