// In: src/codec/stream.rs

//! Streaming open/read/write over the supported archive formats.
//!
//! Raw dumps are only ever *read*: bzip2, gzip and zstd archives are decoded on the
//! fly, never extracted to a temporary file. Every handle returned here is an owned
//! value, so the underlying file (and decoder state) is released on every exit path
//! when it is dropped.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use bzip2::read::MultiBzDecoder;
use flate2::read::MultiGzDecoder;

use crate::error::{BloarkError, CodecError};

/// Read buffer for decoded source streams.
const READ_BUFFER_SIZE: usize = 256 * 1024;

//==================================================================================
// I. Source (read-only) formats
//==================================================================================

/// Formats a raw source dump may arrive in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Plain,
    Bzip2,
    Gzip,
    Zstd,
}

impl SourceFormat {
    /// Picks the decoder from the file extension. Unknown extensions (including
    /// `.7z`, which cannot be streamed) are reported as unsupported.
    pub fn detect(path: &Path) -> Result<Self, CodecError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("xml") | Some("txt") => Ok(SourceFormat::Plain),
            Some("bz2") => Ok(SourceFormat::Bzip2),
            Some("gz") => Ok(SourceFormat::Gzip),
            Some("zst") => Ok(SourceFormat::Zstd),
            _ => Err(CodecError::Unsupported {
                path: path.to_path_buf(),
            }),
        }
    }

    /// Leading bytes every stream of this format must start with.
    fn magic(self) -> &'static [u8] {
        match self {
            SourceFormat::Plain => b"",
            SourceFormat::Bzip2 => b"BZh",
            SourceFormat::Gzip => &[0x1f, 0x8b],
            SourceFormat::Zstd => &[0x28, 0xb5, 0x2f, 0xfd],
        }
    }
}

/// A decoded, buffered byte stream over a source file.
pub struct SourceStream {
    path: PathBuf,
    format: SourceFormat,
    inner: Box<dyn BufRead + Send>,
}

impl SourceStream {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> SourceFormat {
        self.format
    }
}

impl Read for SourceStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl BufRead for SourceStream {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.inner.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.inner.consume(amt)
    }
}

/// Opens a source file for streaming reads, decoding it if compressed.
///
/// The magic bytes are checked up front so an obviously mislabeled or empty archive
/// is reported as corrupt before any parser sees it.
pub fn open_read(path: &Path) -> Result<SourceStream, BloarkError> {
    let format = SourceFormat::detect(path)?;
    let mut raw = BufReader::with_capacity(READ_BUFFER_SIZE, File::open(path)?);

    let magic = format.magic();
    if !magic.is_empty() {
        let head = raw.fill_buf()?;
        if !head.starts_with(magic) {
            return Err(CodecError::Corrupt {
                path: path.to_path_buf(),
                reason: format!("missing {:?} magic bytes", format),
            }
            .into());
        }
    }

    let inner: Box<dyn BufRead + Send> = match format {
        SourceFormat::Plain => Box::new(raw),
        SourceFormat::Bzip2 => Box::new(BufReader::with_capacity(
            READ_BUFFER_SIZE,
            MultiBzDecoder::new(raw),
        )),
        SourceFormat::Gzip => Box::new(BufReader::with_capacity(
            READ_BUFFER_SIZE,
            MultiGzDecoder::new(raw),
        )),
        SourceFormat::Zstd => {
            let decoder = zstd::stream::Decoder::with_buffer(raw).map_err(|e| CodecError::Corrupt {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
            Box::new(BufReader::with_capacity(READ_BUFFER_SIZE, decoder))
        }
    };

    Ok(SourceStream {
        path: path.to_path_buf(),
        format,
        inner,
    })
}

//==================================================================================
// II. Sinks
//==================================================================================

/// Formats we can write as a whole-file stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkFormat {
    Plain,
    Zstd { level: i32 },
}

enum SinkInner {
    Plain(io::BufWriter<File>),
    Zstd(zstd::stream::Encoder<'static, io::BufWriter<File>>),
}

/// A write handle that must be `finish`ed to produce a complete file.
pub struct ByteSink {
    inner: SinkInner,
}

impl ByteSink {
    /// Flushes all buffered data, closes the compression frame and syncs the file.
    pub fn finish(self) -> Result<(), BloarkError> {
        let writer = match self.inner {
            SinkInner::Plain(w) => w,
            SinkInner::Zstd(encoder) => encoder.finish()?,
        };
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok(())
    }
}

impl Write for ByteSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.inner {
            SinkInner::Plain(w) => w.write(buf),
            SinkInner::Zstd(e) => e.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.inner {
            SinkInner::Plain(w) => w.flush(),
            SinkInner::Zstd(e) => e.flush(),
        }
    }
}

/// Creates (truncating) `path` and returns a sink writing in `format`.
pub fn open_write(path: &Path, format: SinkFormat) -> Result<ByteSink, BloarkError> {
    let writer = io::BufWriter::new(File::create(path)?);
    let inner = match format {
        SinkFormat::Plain => SinkInner::Plain(writer),
        SinkFormat::Zstd { level } => SinkInner::Zstd(zstd::stream::Encoder::new(writer, level)?),
    };
    Ok(ByteSink { inner })
}
