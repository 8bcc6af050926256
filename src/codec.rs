//! Streaming gzip transform applied in transit, plus the content fingerprint
//! used by incremental backups.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use md5::{Digest, Md5};

pub const DEFAULT_LEVEL: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Codec {
    level: u32,
}

impl Default for Codec {
    fn default() -> Self {
        Self { level: DEFAULT_LEVEL }
    }
}

impl Codec {
    /// `level` is clamped to gzip's 0..=9.
    pub fn new(level: u32) -> Self {
        Self { level: level.min(9) }
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    /// Wrap a sink; bytes written are compressed. Call `finish()` on the
    /// encoder to flush the trailer and get the sink back.
    pub fn encoder<W: Write>(&self, sink: W) -> GzEncoder<W> {
        GzEncoder::new(sink, Compression::new(self.level))
    }

    pub fn decoder<R: Read>(&self, source: R) -> GzDecoder<R> {
        GzDecoder::new(source)
    }

    /// Lowercase hex MD5 of the *compressed* form of `source`, i.e. the digest
    /// an archive copy written with this codec would carry.
    ///
    /// The digest depends on the compression level; changing the level makes
    /// every previously archived object look modified.
    pub fn fingerprint<R: Read>(&self, mut source: R) -> io::Result<String> {
        let mut encoder = self.encoder(DigestWriter(Md5::new()));
        io::copy(&mut source, &mut encoder)?;
        let DigestWriter(hasher) = encoder.finish()?;
        Ok(hex::encode(hasher.finalize()))
    }
}

// Write adapter feeding everything into a hash accumulator.
struct DigestWriter(Md5);

impl Write for DigestWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Decompress one archived file into `<out_dir>/<basename>_decompressed`.
pub fn decompress_file(codec: &Codec, input: &Path, out_dir: &Path) -> Result<PathBuf> {
    let file =
        File::open(input).with_context(|| format!("cannot open {}", input.display()))?;
    let name = input
        .file_name()
        .with_context(|| format!("{} has no file name", input.display()))?;
    let mut out_name = name.to_os_string();
    out_name.push("_decompressed");
    let out_path = out_dir.join(out_name);

    let mut reader = codec.decoder(BufReader::new(file));
    let mut writer = BufWriter::new(
        File::create(&out_path)
            .with_context(|| format!("cannot create {}", out_path.display()))?,
    );
    let n = io::copy(&mut reader, &mut writer)
        .with_context(|| format!("decompressing {} failed", input.display()))?;
    writer.flush()?;
    tracing::info!("decompressed {} -> {} ({} bytes)", input.display(), out_path.display(), n);
    Ok(out_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compress(codec: &Codec, data: &[u8]) -> Vec<u8> {
        let mut enc = codec.encoder(Vec::new());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    #[test]
    fn fingerprint_matches_digest_of_compressed_bytes() {
        let codec = Codec::default();
        let data = b"the quick brown fox jumps over the lazy dog".repeat(50);
        let stored = compress(&codec, &data);
        assert_eq!(codec.fingerprint(&data[..]).unwrap(), crate::store::md5_hex(&stored));
    }

    #[test]
    fn fingerprint_is_stable_and_content_sensitive() {
        let codec = Codec::default();
        let a = codec.fingerprint(&b"alpha"[..]).unwrap();
        assert_eq!(a, codec.fingerprint(&b"alpha"[..]).unwrap());
        assert_ne!(a, codec.fingerprint(&b"alphA"[..]).unwrap());
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn decompress_file_writes_sibling_output() {
        let codec = Codec::new(9);
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("report.csv");
        std::fs::write(&input, compress(&codec, b"a,b\n1,2\n")).unwrap();
        let out = decompress_file(&codec, &input, dir.path()).unwrap();
        assert_eq!(out.file_name().unwrap(), "report.csv_decompressed");
        assert_eq!(std::fs::read(out).unwrap(), b"a,b\n1,2\n");
    }

    #[test]
    fn decompress_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("junk");
        std::fs::write(&input, b"not gzip at all").unwrap();
        assert!(decompress_file(&Codec::default(), &input, dir.path()).is_err());
    }
}
