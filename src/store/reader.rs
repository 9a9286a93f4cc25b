use anyhow::{bail, Context, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use memmap2::Mmap;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Cursor;
use std::path::Path;

use super::annotation::TrialAnnotation;
use super::format::{
    decode_attributes, decode_samples, AttrValue, ChunkKind, Header, CHUNK_HEADER_LEN,
    CHUNK_MAGIC, HEADER_LEN,
};
use crate::core::SampleMatrix;
use crate::hal::SampleFormat;

/// Read-only view of a session store.
///
/// Stores that were never finalized are still readable; decoding stops at
/// the first incomplete chunk and `recovered()` reports true.
#[derive(Debug)]
pub struct StoreReader {
    header: Header,
    attributes: Vec<(String, AttrValue)>,
    samples: SampleMatrix,
    trials: Vec<TrialAnnotation>,
    recovered: bool,
}

impl StoreReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).context(format!("Failed to open store {:?}", path))?;
        let mmap = unsafe { Mmap::map(&file) }.context(format!("Failed to map store {:?}", path))?;
        Self::from_bytes(&mmap).context(format!("Failed to read store {:?}", path))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let header = Header::decode(bytes)?;
        let attr_end = HEADER_LEN + header.attr_len as usize;
        if bytes.len() < attr_end {
            bail!("Attribute table truncated");
        }
        let attributes = decode_attributes(&bytes[HEADER_LEN..attr_end])?;

        let mut samples = SampleMatrix::new(header.channel_count as usize);
        let mut trials = Vec::new();
        let mut recovered = !header.is_finalized();
        let mut pos = attr_end;

        while pos < bytes.len() {
            let Some((kind, payload)) = next_chunk(bytes, pos)? else {
                if header.is_finalized() {
                    bail!("Truncated chunk at offset {} in finalized store", pos);
                }
                log::warn!("Store ends in a partial chunk at offset {}", pos);
                recovered = true;
                break;
            };
            pos += CHUNK_HEADER_LEN + payload.len();

            match ChunkKind::from_code(kind) {
                Some(ChunkKind::Samples) => {
                    let (t0, chunk) = decode_samples(payload, header.format)?;
                    if t0 != samples.timesteps() as u64 {
                        bail!(
                            "Sample chunk starts at t0={}, expected {}",
                            t0,
                            samples.timesteps()
                        );
                    }
                    samples.extend(&chunk)?;
                }
                Some(ChunkKind::Trial) => {
                    let annotation: TrialAnnotation =
                        serde_json::from_slice(payload).context("Invalid trial annotation")?;
                    trials.push(annotation);
                }
                None => log::warn!("Skipping unknown chunk kind {}", kind),
            }
        }

        if header.is_finalized() && header.timesteps != samples.timesteps() as u64 {
            bail!(
                "Header records {} timesteps, chunks hold {}",
                header.timesteps,
                samples.timesteps()
            );
        }

        Ok(Self {
            header,
            attributes,
            samples,
            trials,
            recovered,
        })
    }

    pub fn channel_count(&self) -> usize {
        self.header.channel_count as usize
    }

    pub fn timesteps(&self) -> usize {
        self.samples.timesteps()
    }

    pub fn format(&self) -> SampleFormat {
        self.header.format
    }

    pub fn is_finalized(&self) -> bool {
        self.header.is_finalized()
    }

    /// True when the store was not closed cleanly
    pub fn recovered(&self) -> bool {
        self.recovered
    }

    pub fn samples(&self) -> &SampleMatrix {
        &self.samples
    }

    pub fn trials(&self) -> &[TrialAnnotation] {
        &self.trials
    }

    pub fn attributes(&self) -> &[(String, AttrValue)] {
        &self.attributes
    }

    pub fn attribute(&self, key: &str) -> Option<&AttrValue> {
        self.attributes.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn channel_mapping(&self) -> Result<BTreeMap<String, usize>> {
        let text = self
            .attribute("channel_mapping")
            .and_then(AttrValue::as_text)
            .context("Store has no channel mapping")?;
        serde_json::from_str(text).context("Invalid channel mapping")
    }
}

/// Kind and payload of the chunk at `pos`, or `None` if it is incomplete.
fn next_chunk(bytes: &[u8], pos: usize) -> Result<Option<(u8, &[u8])>> {
    if bytes.len() - pos < CHUNK_HEADER_LEN {
        return Ok(None);
    }

    let mut r = Cursor::new(&bytes[pos..pos + CHUNK_HEADER_LEN]);
    let magic = r.read_u32::<LittleEndian>()?;
    if magic != CHUNK_MAGIC {
        bail!("Bad chunk magic at offset {}", pos);
    }
    let kind = r.read_u8()?;
    let len = r.read_u64::<LittleEndian>()? as usize;

    let start = pos + CHUNK_HEADER_LEN;
    if bytes.len() - start < len {
        return Ok(None);
    }
    Ok(Some((kind, &bytes[start..start + len])))
}
