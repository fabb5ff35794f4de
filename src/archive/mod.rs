//! # Archive Record Format
//!
//! This module defines the [`Block`] exchanged between every pipeline stage and its
//! on-wire form, the *record*. An archive is nothing but a sequence of records; there
//! is no header, footer, index or checksum.
//!
//! ```text
//! record := path_len(u16 BE) path_bytes flag(u8) [ data_len(u16 BE) data_bytes ]
//! flag   := START (0b010) | END (0b100) | DATA (0b001)
//! ```
//!
//! `data_len`/`data_bytes` are present only on DATA records. The stream ends with a
//! clean end-of-input exactly at a record boundary; every other truncation is fatal.

use byteorder::{BigEndian, ByteOrder, ReadBytesExt, WriteBytesExt};
use std::borrow::Cow;
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::error::{ArchiverError, Result};

/// Flag byte of a DATA record.
pub const DATA_FLAG: u8 = 1 << 0;
/// Flag byte of a START record.
pub const START_FLAG: u8 = 1 << 1;
/// Flag byte of an END record.
pub const END_FLAG: u8 = 1 << 2;

/// Largest path or data chunk a record can carry (16-bit count fields).
pub const MAX_FIELD_LEN: usize = u16::MAX as usize;

/// The unit handed from one pipeline stage to the next.
///
/// Every block carries the path of the file it belongs to. For any one path the
/// sequence is always one `Start`, zero or more `Data` in production order, then one
/// `End`. Blocks of different paths may interleave freely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    /// Beginning of a logical file.
    Start { path: Arc<Path> },
    /// One chunk of file contents, at most [`MAX_FIELD_LEN`] bytes.
    Data { path: Arc<Path>, data: Vec<u8> },
    /// Logical end of file.
    End { path: Arc<Path> },
}

impl Block {
    pub fn path(&self) -> &Arc<Path> {
        match self {
            Block::Start { path } | Block::Data { path, .. } | Block::End { path } => path,
        }
    }

    /// The flag byte this block is framed with.
    pub fn flag(&self) -> u8 {
        match self {
            Block::Start { .. } => START_FLAG,
            Block::Data { .. } => DATA_FLAG,
            Block::End { .. } => END_FLAG,
        }
    }
}

/// Byte form of a path as stored in a record.
#[cfg(unix)]
pub fn encode_path(path: &Path) -> Cow<'_, [u8]> {
    use std::os::unix::ffi::OsStrExt;
    Cow::Borrowed(path.as_os_str().as_bytes())
}

/// Byte form of a path as stored in a record.
///
/// Separators are written as `/` so archives made here extract elsewhere.
#[cfg(not(unix))]
pub fn encode_path(path: &Path) -> Cow<'_, [u8]> {
    Cow::Owned(path.to_string_lossy().replace('\\', "/").into_bytes())
}

#[cfg(unix)]
fn decode_path(bytes: Vec<u8>) -> PathBuf {
    use std::ffi::OsString;
    use std::os::unix::ffi::OsStringExt;
    PathBuf::from(OsString::from_vec(bytes))
}

#[cfg(not(unix))]
fn decode_path(bytes: Vec<u8>) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(&bytes).into_owned())
}

/// Serialize one block as a record.
///
/// The caller owns buffering and flushing; any error here leaves the stream
/// inconsistent with its own framing and must be treated as fatal.
pub fn write_block<W: Write + ?Sized>(out: &mut W, block: &Block) -> Result<()> {
    let path = encode_path(block.path());
    if path.len() > MAX_FIELD_LEN {
        return Err(ArchiverError::PathTooLong { path: block.path().to_path_buf(), len: path.len() });
    }

    out.write_u16::<BigEndian>(path.len() as u16)?;
    out.write_all(&path)?;
    out.write_u8(block.flag())?;

    if let Block::Data { data, .. } = block {
        let len = u16::try_from(data.len()).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, format!("data chunk of {} bytes exceeds {}", data.len(), MAX_FIELD_LEN))
        })?;
        out.write_u16::<BigEndian>(len)?;
        out.write_all(data)?;
    }

    Ok(())
}

/// Read the next record from the stream.
///
/// Returns `Ok(None)` on a clean end-of-input at a record boundary.
pub fn read_block<R: Read + ?Sized>(input: &mut R) -> Result<Option<Block>> {
    let mut len_buf = [0u8; 2];
    match read_fully(input, &mut len_buf)? {
        0 => return Ok(None),
        2 => {}
        _ => return Err(ArchiverError::Truncated("path length")),
    }

    let mut path = vec![0u8; BigEndian::read_u16(&len_buf) as usize];
    input.read_exact(&mut path).map_err(truncated("path"))?;
    let path: Arc<Path> = Arc::from(decode_path(path));

    let flag = input.read_u8().map_err(truncated("flag"))?;
    match flag {
        START_FLAG => Ok(Some(Block::Start { path })),
        END_FLAG => Ok(Some(Block::End { path })),
        DATA_FLAG => {
            let len = input.read_u16::<BigEndian>().map_err(truncated("data length"))?;
            let mut data = vec![0u8; len as usize];
            input.read_exact(&mut data).map_err(truncated("data"))?;
            Ok(Some(Block::Data { path, data }))
        }
        other => Err(ArchiverError::UnknownFlag(other)),
    }
}

/// Iterator over the records of a stream, stopping after the first error.
pub struct Records<R> {
    input: R,
    done: bool,
}

/// Walk every record of `input` in stream order.
pub fn records<R: Read>(input: R) -> Records<R> {
    Records { input, done: false }
}

impl<R: Read> Iterator for Records<R> {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match read_block(&mut self.input) {
            Ok(Some(block)) => Some(Ok(block)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Turn an archived path into one that is safe to join onto an extraction directory.
///
/// Leading root and prefix components are stripped the way tar does it and `.` is
/// dropped. A `..` anywhere, or nothing left at all, is rejected.
pub fn sanitize_path(path: &Path) -> Result<PathBuf> {
    let mut out = PathBuf::new();

    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::CurDir => {}
            Component::ParentDir => return Err(ArchiverError::UnsafePath(path.to_path_buf())),
            Component::Normal(part) => out.push(part),
        }
    }

    if out.as_os_str().is_empty() {
        return Err(ArchiverError::UnsafePath(path.to_path_buf()));
    }
    Ok(out)
}

/// Like `read_exact`, but reports how many bytes arrived before end-of-input.
fn read_fully<R: Read + ?Sized>(input: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn truncated(field: &'static str) -> impl FnOnce(io::Error) -> ArchiverError {
    move |e| match e.kind() {
        io::ErrorKind::UnexpectedEof => ArchiverError::Truncated(field),
        _ => ArchiverError::Stream(e),
    }
}
