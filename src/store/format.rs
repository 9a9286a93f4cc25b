//! On-disk layout of a session store.
//!
//! ```text
//! [header: 64 bytes][attribute table: attr_len bytes][chunk]*
//! chunk = [CHUNK_MAGIC u32][kind u8][payload_len u64][payload]
//! ```
//!
//! All integers and floats are little-endian.

use anyhow::{anyhow, bail, Context, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Read, Write};

use crate::core::SampleMatrix;
use crate::hal::SampleFormat;

pub const MAGIC: &[u8; 8] = b"NSTORE01";
pub const FORMAT_VERSION: u32 = 1;
pub const HEADER_LEN: usize = 64;

pub const OFFSET_VERSION: u64 = 8;
pub const OFFSET_FLAGS: u64 = 12;
pub const OFFSET_CHANNELS: u64 = 16;
pub const OFFSET_TIMESTEPS: u64 = 24;
pub const OFFSET_FORMAT: u64 = 32;
pub const OFFSET_ATTR_LEN: u64 = 40;

/// Set once `close()` has rewritten the header
pub const FLAG_FINALIZED: u32 = 1;

pub const CHUNK_MAGIC: u32 = 0x4B4E_4843; // "CHNK"
pub const CHUNK_HEADER_LEN: usize = 4 + 1 + 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    Samples = 1,
    Trial = 2,
}

impl ChunkKind {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Samples),
            2 => Some(Self::Trial),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub version: u32,
    pub flags: u32,
    pub channel_count: u64,
    pub timesteps: u64,
    pub format: SampleFormat,
    pub attr_len: u64,
}

impl Header {
    pub fn new(channel_count: usize, format: SampleFormat, attr_len: usize) -> Self {
        Self {
            version: FORMAT_VERSION,
            flags: 0,
            channel_count: channel_count as u64,
            timesteps: 0,
            format,
            attr_len: attr_len as u64,
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.flags & FLAG_FINALIZED != 0
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[..8].copy_from_slice(MAGIC);
        let mut w = Cursor::new(&mut buf[..]);
        w.set_position(OFFSET_VERSION);
        // Writes into a fixed 64-byte array cannot fail
        let _ = w.write_u32::<LittleEndian>(self.version);
        let _ = w.write_u32::<LittleEndian>(self.flags);
        let _ = w.write_u64::<LittleEndian>(self.channel_count);
        let _ = w.write_u64::<LittleEndian>(self.timesteps);
        let _ = w.write_u8(self.format.code());
        w.set_position(OFFSET_ATTR_LEN);
        let _ = w.write_u64::<LittleEndian>(self.attr_len);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            bail!("File too short for header ({} bytes)", bytes.len());
        }
        if &bytes[..8] != MAGIC {
            bail!("Not a session store (bad magic)");
        }

        let mut r = Cursor::new(&bytes[..HEADER_LEN]);
        r.set_position(OFFSET_VERSION);
        let version = r.read_u32::<LittleEndian>()?;
        if version != FORMAT_VERSION {
            bail!("Unsupported store version {}", version);
        }
        let flags = r.read_u32::<LittleEndian>()?;
        let channel_count = r.read_u64::<LittleEndian>()?;
        let timesteps = r.read_u64::<LittleEndian>()?;
        let format_code = r.read_u8()?;
        let format = SampleFormat::from_code(format_code)
            .ok_or_else(|| anyhow!("Unknown sample format code {}", format_code))?;
        r.set_position(OFFSET_ATTR_LEN);
        let attr_len = r.read_u64::<LittleEndian>()?;

        Ok(Self {
            version,
            flags,
            channel_count,
            timesteps,
            format,
            attr_len,
        })
    }
}

/// Header attribute value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    /// Plain text, or JSON for structured values
    Text(String),
}

impl AttrValue {
    fn tag(&self) -> u8 {
        match self {
            Self::Int(_) => 1,
            Self::Float(_) => 2,
            Self::Bool(_) => 3,
            Self::Text(_) => 4,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

fn write_str(w: &mut Vec<u8>, s: &str) {
    let _ = w.write_u32::<LittleEndian>(s.len() as u32);
    w.extend_from_slice(s.as_bytes());
}

fn read_str(r: &mut Cursor<&[u8]>) -> Result<String> {
    let len = r.read_u32::<LittleEndian>()? as usize;
    let mut bytes = vec![0u8; len];
    r.read_exact(&mut bytes)?;
    String::from_utf8(bytes).context("Attribute text is not UTF-8")
}

pub fn encode_attributes(attrs: &[(String, AttrValue)]) -> Vec<u8> {
    let mut buf = Vec::new();
    let _ = buf.write_u32::<LittleEndian>(attrs.len() as u32);
    for (key, value) in attrs {
        write_str(&mut buf, key);
        buf.push(value.tag());
        match value {
            AttrValue::Int(v) => {
                let _ = buf.write_i64::<LittleEndian>(*v);
            }
            AttrValue::Float(v) => {
                let _ = buf.write_f64::<LittleEndian>(*v);
            }
            AttrValue::Bool(v) => buf.push(u8::from(*v)),
            AttrValue::Text(s) => write_str(&mut buf, s),
        }
    }
    buf
}

pub fn decode_attributes(bytes: &[u8]) -> Result<Vec<(String, AttrValue)>> {
    let mut r = Cursor::new(bytes);
    let count = r.read_u32::<LittleEndian>().context("Truncated attribute table")?;
    let mut attrs = Vec::with_capacity(count as usize);

    for _ in 0..count {
        let key = read_str(&mut r)?;
        let value = match r.read_u8()? {
            1 => AttrValue::Int(r.read_i64::<LittleEndian>()?),
            2 => AttrValue::Float(r.read_f64::<LittleEndian>()?),
            3 => AttrValue::Bool(r.read_u8()? != 0),
            4 => AttrValue::Text(read_str(&mut r)?),
            tag => bail!("Unknown attribute tag {} for {:?}", tag, key),
        };
        attrs.push((key, value));
    }
    Ok(attrs)
}

pub fn write_chunk<W: Write>(w: &mut W, kind: ChunkKind, payload: &[u8]) -> std::io::Result<()> {
    w.write_u32::<LittleEndian>(CHUNK_MAGIC)?;
    w.write_u8(kind as u8)?;
    w.write_u64::<LittleEndian>(payload.len() as u64)?;
    w.write_all(payload)
}

/// `[t0 u64][k u32][C u32]` then `C` runs of `k` values.
pub fn encode_samples(t0: u64, matrix: &SampleMatrix, format: SampleFormat) -> Vec<u8> {
    let k = matrix.timesteps();
    let c = matrix.channel_count();
    let mut buf = Vec::with_capacity(16 + k * c * format.element_size());

    let _ = buf.write_u64::<LittleEndian>(t0);
    let _ = buf.write_u32::<LittleEndian>(k as u32);
    let _ = buf.write_u32::<LittleEndian>(c as u32);
    for row in matrix.channels() {
        for &v in row {
            let _ = match format {
                SampleFormat::F32 => buf.write_f32::<LittleEndian>(v as f32),
                SampleFormat::F64 => buf.write_f64::<LittleEndian>(v),
            };
        }
    }
    buf
}

pub fn decode_samples(payload: &[u8], format: SampleFormat) -> Result<(u64, SampleMatrix)> {
    let mut r = Cursor::new(payload);
    let t0 = r.read_u64::<LittleEndian>()?;
    let k = r.read_u32::<LittleEndian>()? as usize;
    let c = r.read_u32::<LittleEndian>()? as usize;

    let expected = 16 + k * c * format.element_size();
    if payload.len() != expected {
        bail!(
            "Sample chunk at t0={} has {} bytes, expected {}",
            t0,
            payload.len(),
            expected
        );
    }

    let mut channels = Vec::with_capacity(c);
    for _ in 0..c {
        let mut row = Vec::with_capacity(k);
        for _ in 0..k {
            row.push(match format {
                SampleFormat::F32 => r.read_f32::<LittleEndian>()? as f64,
                SampleFormat::F64 => r.read_f64::<LittleEndian>()?,
            });
        }
        channels.push(row);
    }
    Ok((t0, SampleMatrix::from_channels(channels)?))
}
