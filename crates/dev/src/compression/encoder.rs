//! Gzip / brotli encoders over an in-memory sink.

use std::io::{self, Write};

use bytes::{Bytes, BytesMut};
use flate2::Compression;
use flate2::write::GzEncoder;
use tracing::trace;

use crate::compression::EncodingChoice;

const BROTLI_BUFFER_SIZE: usize = 4096;
const BROTLI_LGWIN: i32 = 22;
const BROTLI_DEFAULT_QUALITY: i32 = 11;
const BROTLI_MAX_QUALITY: i32 = 11;
const GZIP_MAX_LEVEL: i32 = 9;

/// Collects encoder output until it is taken.
#[derive(Debug)]
pub(crate) struct Writer {
    buf: BytesMut,
    #[cfg(test)]
    broken: bool,
}

impl Writer {
    fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
            #[cfg(test)]
            broken: false,
        }
    }

    fn take(&mut self) -> Bytes {
        self.buf.split().freeze()
    }
}

impl io::Write for Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        #[cfg(test)]
        if self.broken {
            return Err(io::Error::other("encoder output broken"));
        }
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// One body's compressor.
pub(crate) enum Encoder {
    Gzip(GzEncoder<Writer>),
    Br(Box<brotli::CompressorWriter<Writer>>),
}

impl Encoder {
    /// Builds the encoder for `choice`.
    ///
    /// `level` is the configured level, `-1` meaning the encoder default. `size_hint`
    /// is the expected body length, used by brotli only. Fails with
    /// [`io::ErrorKind::InvalidInput`] for an out-of-range level or for
    /// [`EncodingChoice::None`].
    pub fn new(choice: EncodingChoice, level: i32, size_hint: u64) -> io::Result<Self> {
        match choice {
            EncodingChoice::Gzip => Self::gzip(level),
            EncodingChoice::Brotli => Self::br(level, size_hint),
            EncodingChoice::None => Err(io::Error::new(io::ErrorKind::InvalidInput, "no encoder for identity encoding")),
        }
    }

    fn gzip(level: i32) -> io::Result<Self> {
        let compression = match level {
            -1 => Compression::default(),
            0..=GZIP_MAX_LEVEL => Compression::new(level.unsigned_abs()),
            _ => return Err(invalid_level("gzip", level)),
        };
        Ok(Self::Gzip(GzEncoder::new(Writer::new(), compression)))
    }

    fn br(level: i32, size_hint: u64) -> io::Result<Self> {
        let quality = match level {
            -1 => BROTLI_DEFAULT_QUALITY,
            0..=BROTLI_MAX_QUALITY => level,
            _ => return Err(invalid_level("brotli", level)),
        };
        let params = brotli::enc::BrotliEncoderParams {
            quality,
            lgwin: BROTLI_LGWIN,
            size_hint: usize::try_from(size_hint).unwrap_or(usize::MAX),
            ..Default::default()
        };
        Ok(Self::Br(Box::new(brotli::CompressorWriter::with_params(Writer::new(), BROTLI_BUFFER_SIZE, &params))))
    }

    pub fn choice(&self) -> EncodingChoice {
        match self {
            Encoder::Gzip(_) => EncodingChoice::Gzip,
            Encoder::Br(_) => EncodingChoice::Brotli,
        }
    }

    /// Feeds `data` into the compressor.
    pub fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let result = match self {
            Self::Gzip(encoder) => encoder.write_all(data),
            Self::Br(encoder) => encoder.write_all(data),
        };
        if let Err(e) = &result {
            trace!(encoding = ?self.choice(), cause = %e, "encoder rejected input");
        }
        result
    }

    /// Makes every later write of compressed output fail.
    #[cfg(test)]
    pub fn break_output(&mut self) {
        match self {
            Self::Gzip(encoder) => encoder.get_mut().broken = true,
            Self::Br(encoder) => encoder.get_mut().broken = true,
        }
    }

    /// Takes whatever compressed output is ready so far, possibly nothing.
    pub fn take(&mut self) -> Bytes {
        match self {
            Self::Gzip(encoder) => encoder.get_mut().take(),
            Self::Br(encoder) => encoder.get_mut().take(),
        }
    }

    /// Ends the stream and returns the remaining output, trailer included.
    pub fn finish(self) -> io::Result<Bytes> {
        match self {
            Self::Gzip(encoder) => encoder.finish().map(|writer| writer.buf.freeze()),
            Self::Br(mut encoder) => {
                encoder.flush()?;
                Ok(encoder.into_inner().buf.freeze())
            }
        }
    }
}

impl std::fmt::Debug for Encoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Encoder").field(&self.choice()).finish()
    }
}

fn invalid_level(encoding: &str, level: i32) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, format!("invalid {encoding} compression level: {level}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn compress(mut encoder: Encoder, input: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        for chunk in input.chunks(700) {
            encoder.write(chunk).unwrap();
            out.extend_from_slice(&encoder.take());
        }
        out.extend_from_slice(&encoder.finish().unwrap());
        out
    }

    fn sample() -> Vec<u8> {
        (0..5000).flat_map(|i| format!("line {i} of some javascript;\n").into_bytes()).collect()
    }

    #[test]
    fn gzip_round_trip() {
        let input = sample();
        let compressed = compress(Encoder::new(EncodingChoice::Gzip, 4, 0).unwrap(), &input);
        assert!(compressed.len() < input.len());

        let mut decoded = Vec::new();
        flate2::read::GzDecoder::new(compressed.as_slice()).read_to_end(&mut decoded).unwrap();
        assert_eq!(decoded, input);
    }

    #[test]
    fn brotli_round_trip() {
        let input = sample();
        let compressed = compress(Encoder::new(EncodingChoice::Brotli, 4, input.len() as u64).unwrap(), &input);
        assert!(compressed.len() < input.len());

        let mut decoded = Vec::new();
        brotli::Decompressor::new(compressed.as_slice(), 4096).read_to_end(&mut decoded).unwrap();
        assert_eq!(decoded, input);
    }

    #[test]
    fn default_levels_are_accepted() {
        assert_eq!(Encoder::new(EncodingChoice::Gzip, -1, 0).unwrap().choice(), EncodingChoice::Gzip);
        assert_eq!(Encoder::new(EncodingChoice::Brotli, -1, 0).unwrap().choice(), EncodingChoice::Brotli);
    }

    #[test]
    fn out_of_range_levels_are_rejected() {
        assert_eq!(Encoder::new(EncodingChoice::Gzip, 10, 0).unwrap_err().kind(), io::ErrorKind::InvalidInput);
        assert_eq!(Encoder::new(EncodingChoice::Brotli, 12, 0).unwrap_err().kind(), io::ErrorKind::InvalidInput);
        assert_eq!(Encoder::new(EncodingChoice::Gzip, -2, 0).unwrap_err().kind(), io::ErrorKind::InvalidInput);
        assert!(Encoder::new(EncodingChoice::None, -1, 0).is_err());
    }
}
