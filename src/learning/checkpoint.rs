//! Weight file persistence.
//!
//! # Binary Formats
//!
//! All integers and weights are little-endian.
//!
//! ## Legacy Format
//!
//! | Size | Field | Description |
//! |------|-------|-------------|
//! | 4 | table_count | u32, must equal the configured pattern count |
//! | 4 × R^k | table\[i\] | f32 weights, one table per pattern in order |
//!
//! Table sizes are not stored; they come from the running `NTupleConfig`.
//!
//! ## Versioned Format
//!
//! | Offset | Size | Field | Description |
//! |--------|------|-------|-------------|
//! | 0 | 4 | magic | "NTW1" |
//! | 4 | 4 | version | u32 (current: 1) |
//! | 8 | 4 | flags | bit 0: compressed |
//! | 12 | 4 | checksum | CRC32 of the stored body |
//! | 16 | 4 | alphabet | u32 |
//! | 20 | 4 | pattern_count | u32 |
//! | 24 | var | patterns | per pattern: u8 k, then k u8 positions |
//! | var | var | body | legacy layout, gzip-compressed when flag bit 0 is set |
//!
//! Loading autodetects the layout from the first four bytes. Saves write
//! `<path>.tmp` first and rename it over the target.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crc32fast::Hasher as Crc32Hasher;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use crate::evaluator::{Evaluator, WeightStore, WeightTable};
use crate::learning::LearningError;
use crate::pattern::{MAX_PATTERNS, NTupleConfig, Pattern};

/// Magic bytes of the versioned format.
pub const WEIGHT_FILE_MAGIC: &[u8; 4] = b"NTW1";

/// Current versioned format number.
pub const WEIGHT_FILE_VERSION: u32 = 1;

/// Flag bit: body is gzip-compressed.
pub const FLAG_COMPRESSED: u32 = 1;

/// Delay before the single retry of a failed save.
pub const SAVE_RETRY_DELAY_SECS: u64 = 5;

/// Byte offset of the checksum field, patched after the body is written.
const CHECKSUM_OFFSET: u64 = 12;

/// Number of weights converted per I/O chunk.
const IO_CHUNK_ENTRIES: usize = 1 << 16;

/// On-disk layout selector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WeightFormat {
    /// Table count followed by raw tables.
    Legacy,
    /// Header describing the n-tuple configuration, checksummed body.
    #[default]
    Versioned,
}

/// Header of the versioned format.
#[derive(Clone, Debug, PartialEq)]
pub struct WeightHeader {
    /// Format version number.
    pub version: u32,
    /// Flags (bit 0: compressed).
    pub flags: u32,
    /// CRC32 checksum of the stored body.
    pub checksum: u32,
    /// Alphabet size the tables were built for.
    pub alphabet: u32,
    /// Pattern definitions the tables were built for.
    pub patterns: Vec<Pattern>,
}

impl WeightHeader {
    /// Size of the fixed part including magic.
    pub const FIXED_SIZE: usize = 24;

    /// Create a header describing `config`.
    pub fn new(config: &NTupleConfig, compressed: bool) -> Self {
        Self {
            version: WEIGHT_FILE_VERSION,
            flags: if compressed { FLAG_COMPRESSED } else { 0 },
            checksum: 0, // Patched after the body is written
            alphabet: config.alphabet() as u32,
            patterns: config.patterns().to_vec(),
        }
    }

    /// Check if compression flag is set.
    pub fn is_compressed(&self) -> bool {
        self.flags & FLAG_COMPRESSED != 0
    }

    /// Serialize header (magic included) to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Self::FIXED_SIZE + self.patterns.len() * 9);
        bytes.extend_from_slice(WEIGHT_FILE_MAGIC);
        bytes.extend_from_slice(&self.version.to_le_bytes());
        bytes.extend_from_slice(&self.flags.to_le_bytes());
        bytes.extend_from_slice(&self.checksum.to_le_bytes());
        bytes.extend_from_slice(&self.alphabet.to_le_bytes());
        bytes.extend_from_slice(&(self.patterns.len() as u32).to_le_bytes());
        for pattern in &self.patterns {
            bytes.push(pattern.k);
            bytes.extend_from_slice(pattern.cells());
        }
        bytes
    }

    /// Read the fields that follow the magic bytes.
    ///
    /// # Errors
    ///
    /// Returns error on unknown version or flags, malformed pattern descriptors,
    /// or a truncated header.
    pub fn read_after_magic<R: Read>(reader: &mut R) -> Result<Self, LearningError> {
        let version = read_u32(reader).map_err(corrupt)?;
        if version != WEIGHT_FILE_VERSION {
            return Err(LearningError::InvalidCheckpoint(format!(
                "Incompatible weight file version: expected {}, got {}",
                WEIGHT_FILE_VERSION, version
            )));
        }

        let flags = read_u32(reader).map_err(corrupt)?;
        if flags & !FLAG_COMPRESSED != 0 {
            return Err(LearningError::InvalidCheckpoint(format!(
                "Unknown flags: {:#x}",
                flags
            )));
        }

        let checksum = read_u32(reader).map_err(corrupt)?;
        let alphabet = read_u32(reader).map_err(corrupt)?;
        let count = read_u32(reader).map_err(corrupt)? as usize;
        if count > MAX_PATTERNS {
            return Err(LearningError::InvalidCheckpoint(format!(
                "Implausible pattern count: {}",
                count
            )));
        }

        let mut patterns = Vec::with_capacity(count);
        for id in 0..count {
            let mut k = [0u8; 1];
            reader.read_exact(&mut k).map_err(corrupt)?;
            let mut positions = vec![0u8; k[0] as usize];
            reader.read_exact(&mut positions).map_err(corrupt)?;
            let pattern = Pattern::new(id as u8, &positions).map_err(|e| {
                LearningError::InvalidCheckpoint(format!("Bad pattern descriptor {}: {}", id, e))
            })?;
            patterns.push(pattern);
        }

        Ok(Self {
            version,
            flags,
            checksum,
            alphabet,
            patterns,
        })
    }

    /// Verify that the stored configuration is the running one.
    pub fn check_compatible(&self, config: &NTupleConfig) -> Result<(), LearningError> {
        let same_patterns = self.patterns.len() == config.len()
            && self
                .patterns
                .iter()
                .zip(config.patterns())
                .all(|(stored, expected)| stored.cells() == expected.cells());

        if self.alphabet != config.alphabet() as u32 || !same_patterns {
            return Err(LearningError::InvalidCheckpoint(format!(
                "N-tuple configuration mismatch: file has alphabet {} with {} patterns, \
                 expected alphabet {} with {} patterns",
                self.alphabet,
                self.patterns.len(),
                config.alphabet(),
                config.len()
            )));
        }
        Ok(())
    }
}

/// Weight file writer/reader with a fixed layout choice.
///
/// # Example
///
/// ```no_run
/// use tiletd::evaluator::Evaluator;
/// use tiletd::learning::checkpoint::{WeightFile, WeightFormat};
/// use tiletd::pattern::NTupleConfig;
///
/// let config = NTupleConfig::from_positions(16, &[&[0, 1, 2, 3]]).unwrap();
/// let evaluator = Evaluator::new(config.clone());
///
/// let file = WeightFile::new(WeightFormat::Versioned).with_compression(true);
/// file.save("weights.bin", &evaluator)?;
/// let restored = file.load("weights.bin", &config)?;
/// # Ok::<(), tiletd::learning::LearningError>(())
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WeightFile {
    format: WeightFormat,
    compress: bool,
}

impl WeightFile {
    /// Create a weight file handler for `format`, uncompressed.
    pub fn new(format: WeightFormat) -> Self {
        Self {
            format,
            compress: false,
        }
    }

    /// Enable or disable gzip compression (versioned format only).
    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    /// Layout used for saves.
    pub fn format(&self) -> WeightFormat {
        self.format
    }

    /// Whether saves are compressed.
    pub fn compression_enabled(&self) -> bool {
        self.compress && self.format == WeightFormat::Versioned
    }

    /// Save all tables atomically.
    ///
    /// # Returns
    ///
    /// Size of the written file in bytes.
    pub fn save<P: AsRef<Path>>(&self, path: P, evaluator: &Evaluator) -> Result<u64, LearningError> {
        let path = path.as_ref();
        let start_time = Instant::now();
        let temp_path = temp_path_for(path);

        if self.compress && self.format == WeightFormat::Legacy {
            log::warn!("Compression is not available for the legacy layout, writing raw tables");
        }

        let written = match self.format {
            WeightFormat::Legacy => write_legacy(&temp_path, evaluator.store()),
            WeightFormat::Versioned => {
                write_versioned(&temp_path, evaluator, self.compression_enabled())
            }
        };
        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }

        // Atomic rename
        fs::rename(&temp_path, path)?;

        let file_size = fs::metadata(path)?.len();
        log::info!(
            "Weights saved: {} ({} bytes, {:.2}s, format: {:?}, compression: {})",
            path.display(),
            file_size,
            start_time.elapsed().as_secs_f64(),
            self.format,
            self.compression_enabled()
        );

        Ok(file_size)
    }

    /// Load tables for `config`; the layout is detected from the file.
    pub fn load<P: AsRef<Path>>(
        &self,
        path: P,
        config: &NTupleConfig,
    ) -> Result<Evaluator, LearningError> {
        load_weights(path, config)
    }
}

/// Save with the default layout (versioned, uncompressed).
pub fn save_weights<P: AsRef<Path>>(path: P, evaluator: &Evaluator) -> Result<u64, LearningError> {
    WeightFile::default().save(path, evaluator)
}

/// Load a weight file of either layout into a fresh evaluator.
///
/// Nothing is returned unless every table was read and verified.
///
/// # Errors
///
/// - `LearningError::Io` when the file cannot be opened
/// - `LearningError::InvalidCheckpoint` on a count or configuration mismatch,
///   truncation, trailing data, or checksum mismatch
pub fn load_weights<P: AsRef<Path>>(
    path: P,
    config: &NTupleConfig,
) -> Result<Evaluator, LearningError> {
    let path = path.as_ref();
    let start_time = Instant::now();

    let file = File::open(path)?;
    let mut reader = BufReader::new(file);

    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic).map_err(corrupt)?;

    let (format, store) = if &magic == WEIGHT_FILE_MAGIC {
        (WeightFormat::Versioned, read_versioned(reader, config)?)
    } else {
        let count = u32::from_le_bytes(magic);
        let store = read_table_body(&mut reader, count, config)?;
        ensure_eof(&mut reader)?;
        (WeightFormat::Legacy, store)
    };

    let evaluator = Evaluator::with_store(config.clone(), store)?;

    log::info!(
        "Weights loaded: {} ({:?}, {} tables, {:.2}s)",
        path.display(),
        format,
        config.len(),
        start_time.elapsed().as_secs_f64()
    );

    Ok(evaluator)
}

/// Run `save_fn`, retrying once after `SAVE_RETRY_DELAY_SECS` on failure.
pub fn save_weights_with_retry<F>(save_fn: F) -> Result<(), LearningError>
where
    F: FnMut() -> Result<(), LearningError>,
{
    save_weights_with_retry_after(Duration::from_secs(SAVE_RETRY_DELAY_SECS), save_fn)
}

/// Run `save_fn`, retrying once after `delay` on failure.
///
/// Returns the second error when the retry fails too.
pub fn save_weights_with_retry_after<F>(delay: Duration, mut save_fn: F) -> Result<(), LearningError>
where
    F: FnMut() -> Result<(), LearningError>,
{
    match save_fn() {
        Ok(()) => Ok(()),
        Err(first_error) => {
            log::warn!(
                "Weight save failed, retrying in {:.1} seconds: {}",
                delay.as_secs_f64(),
                first_error
            );

            std::thread::sleep(delay);

            match save_fn() {
                Ok(()) => {
                    log::info!("Weight save succeeded on retry");
                    Ok(())
                }
                Err(second_error) => {
                    log::warn!("Weight save failed after retry: {}", second_error);
                    Err(second_error)
                }
            }
        }
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

fn write_legacy(temp_path: &Path, store: &WeightStore) -> Result<(), LearningError> {
    let file = File::create(temp_path)?;
    let mut writer = BufWriter::new(file);
    write_tables(&mut writer, store)?;
    writer.flush()?;
    writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;
    Ok(())
}

fn write_versioned(
    temp_path: &Path,
    evaluator: &Evaluator,
    compress: bool,
) -> Result<(), LearningError> {
    let file = File::create(temp_path)?;
    let mut writer = BufWriter::new(file);

    let header = WeightHeader::new(evaluator.config(), compress);
    writer.write_all(&header.to_bytes())?;

    let body = ChecksumWriter::new(&mut writer);
    let body = if compress {
        let mut encoder = GzEncoder::new(body, Compression::fast());
        write_tables(&mut encoder, evaluator.store())?;
        encoder.finish()?
    } else {
        let mut body = body;
        write_tables(&mut body, evaluator.store())?;
        body
    };
    let checksum = body.finalize();

    writer.flush()?;
    let mut file = writer.into_inner().map_err(|e| e.into_error())?;
    file.seek(SeekFrom::Start(CHECKSUM_OFFSET))?;
    file.write_all(&checksum.to_le_bytes())?;
    file.sync_all()?;
    Ok(())
}

fn read_versioned<R: Read>(
    mut reader: R,
    config: &NTupleConfig,
) -> Result<WeightStore, LearningError> {
    let header = WeightHeader::read_after_magic(&mut reader)?;
    header.check_compatible(config)?;

    let mut body = ChecksumReader::new(reader);
    let store = if header.is_compressed() {
        let mut decoder = GzDecoder::new(&mut body);
        let store = read_tables(&mut decoder, config)?;
        ensure_eof(&mut decoder)?;
        store
    } else {
        let store = read_tables(&mut body, config)?;
        ensure_eof(&mut body)?;
        store
    };

    // Anything after the gzip stream still counts toward the checksum
    io::copy(&mut body, &mut io::sink())?;

    let computed = body.finalize();
    if computed != header.checksum {
        return Err(LearningError::InvalidCheckpoint(format!(
            "Checksum mismatch: expected {:#010x}, computed {:#010x}. Data may be corrupted.",
            header.checksum, computed
        )));
    }

    Ok(store)
}

fn write_tables<W: Write>(writer: &mut W, store: &WeightStore) -> io::Result<()> {
    writer.write_all(&(store.len() as u32).to_le_bytes())?;

    let mut buffer = Vec::with_capacity(IO_CHUNK_ENTRIES * 4);
    for table in store.tables() {
        for chunk in table.as_slice().chunks(IO_CHUNK_ENTRIES) {
            buffer.clear();
            for &weight in chunk {
                buffer.extend_from_slice(&weight.to_le_bytes());
            }
            writer.write_all(&buffer)?;
        }
    }
    Ok(())
}

fn read_tables<R: Read>(reader: &mut R, config: &NTupleConfig) -> Result<WeightStore, LearningError> {
    let count = read_u32(reader).map_err(corrupt)?;
    read_table_body(reader, count, config)
}

fn read_table_body<R: Read>(
    reader: &mut R,
    count: u32,
    config: &NTupleConfig,
) -> Result<WeightStore, LearningError> {
    if count as usize != config.len() {
        return Err(LearningError::InvalidCheckpoint(format!(
            "Table count mismatch: file has {}, configuration has {}",
            count,
            config.len()
        )));
    }

    let mut buffer = vec![0u8; IO_CHUNK_ENTRIES * 4];
    let mut tables = Vec::with_capacity(config.len());
    for pattern_id in 0..config.len() {
        let mut table = WeightTable::new(config.table_size(pattern_id));
        for chunk in table.as_mut_slice().chunks_mut(IO_CHUNK_ENTRIES) {
            let bytes = &mut buffer[..chunk.len() * 4];
            reader.read_exact(bytes).map_err(corrupt)?;
            for (weight, raw) in chunk.iter_mut().zip(bytes.chunks_exact(4)) {
                *weight = f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
            }
        }
        tables.push(table);
    }

    Ok(WeightStore::from_tables(tables))
}

fn ensure_eof<R: Read>(reader: &mut R) -> Result<(), LearningError> {
    let mut probe = [0u8; 1];
    match reader.read(&mut probe).map_err(corrupt)? {
        0 => Ok(()),
        _ => Err(LearningError::InvalidCheckpoint(
            "Trailing data after weight tables".to_string(),
        )),
    }
}

fn read_u32<R: Read>(reader: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

/// Classify read failures: short or undecodable data is a bad file, the rest is I/O.
fn corrupt(e: io::Error) -> LearningError {
    match e.kind() {
        io::ErrorKind::UnexpectedEof | io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput => {
            LearningError::InvalidCheckpoint(format!("Truncated or corrupted data: {}", e))
        }
        _ => LearningError::Io(e),
    }
}

/// Reader that checksums every byte passing through.
struct ChecksumReader<R> {
    inner: R,
    hasher: Crc32Hasher,
}

impl<R: Read> ChecksumReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Crc32Hasher::new(),
        }
    }

    fn finalize(self) -> u32 {
        self.hasher.finalize()
    }
}

impl<R: Read> Read for ChecksumReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}

/// Writer that checksums every byte passing through.
struct ChecksumWriter<W> {
    inner: W,
    hasher: Crc32Hasher,
}

impl<W: Write> ChecksumWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Crc32Hasher::new(),
        }
    }

    fn finalize(self) -> u32 {
        self.hasher.finalize()
    }
}

impl<W: Write> Write for ChecksumWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
