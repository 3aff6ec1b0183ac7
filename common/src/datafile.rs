//! Versioned binary data files and sectioned key/value files.
//!
//! Every `.dat` file starts with a little-endian `u32` version. Readers
//! gate on it: newer fields are appended behind `version >= N` checks and
//! older files get defaults, so a reader must never see a field order it
//! doesn't understand. Writers always emit the current version.
//!
//! Durability contract: [`write_with_backup`] stages the new content in a
//! sibling temp file, renames the previous file to `<path>.bak`, then
//! renames the temp file into place. After a crash mid-write the path
//! holds either the complete prior version (recoverable via `.bak`) or
//! the complete new one, never a truncated file.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors from reading or writing data files.
#[derive(Debug, Error)]
pub enum DataFileError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("{path}: version {found} outside supported range {min}..={max}")]
    BadVersion {
        path: String,
        found: u32,
        min: u32,
        max: u32,
    },
    #[error("{0}: truncated or malformed field")]
    Malformed(String),
    #[error("{0}: string field is not valid UTF-8")]
    BadUtf8(String),
}

// --- OutputDataFile --- //

/// A buffered writer for one versioned binary file. Callers `put_*` fields
/// in a fixed order and must [`commit`](Self::commit) to flush.
pub struct OutputDataFile {
    w: BufWriter<File>,
    path: PathBuf,
}

impl OutputDataFile {
    /// Creates (truncating) `path` and writes the version header.
    pub fn create(
        path: impl AsRef<Path>,
        version: u32,
    ) -> Result<Self, DataFileError> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        let mut out = Self {
            w: BufWriter::new(file),
            path,
        };
        out.put_u32(version)?;
        Ok(out)
    }

    pub fn put_u8(&mut self, v: u8) -> Result<(), DataFileError> {
        self.w.write_all(&[v]).map_err(Into::into)
    }

    pub fn put_bool(&mut self, v: bool) -> Result<(), DataFileError> {
        self.put_u8(u8::from(v))
    }

    pub fn put_u16(&mut self, v: u16) -> Result<(), DataFileError> {
        self.w.write_all(&v.to_le_bytes()).map_err(Into::into)
    }

    pub fn put_u32(&mut self, v: u32) -> Result<(), DataFileError> {
        self.w.write_all(&v.to_le_bytes()).map_err(Into::into)
    }

    pub fn put_i32(&mut self, v: i32) -> Result<(), DataFileError> {
        self.w.write_all(&v.to_le_bytes()).map_err(Into::into)
    }

    pub fn put_i64(&mut self, v: i64) -> Result<(), DataFileError> {
        self.w.write_all(&v.to_le_bytes()).map_err(Into::into)
    }

    pub fn put_f64(&mut self, v: f64) -> Result<(), DataFileError> {
        self.w.write_all(&v.to_le_bytes()).map_err(Into::into)
    }

    /// Length-prefixed UTF-8.
    pub fn put_str(&mut self, s: &str) -> Result<(), DataFileError> {
        self.put_u32(s.len() as u32)?;
        self.w.write_all(s.as_bytes()).map_err(Into::into)
    }

    /// Flushes and fsyncs. Dropping without committing loses buffered data.
    pub fn commit(mut self) -> Result<(), DataFileError> {
        self.w.flush()?;
        self.w.get_ref().sync_all()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

// --- InputDataFile --- //

/// A buffered reader for one versioned binary file. [`open`](Self::open)
/// gates the version header against the supported range.
#[derive(Debug)]
pub struct InputDataFile {
    r: BufReader<File>,
    path: PathBuf,
    version: u32,
}

impl InputDataFile {
    pub fn open(
        path: impl AsRef<Path>,
        min_version: u32,
        max_version: u32,
    ) -> Result<Self, DataFileError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let mut input = Self {
            r: BufReader::new(file),
            path,
            version: 0,
        };
        input.version = input.get_u32()?;
        if input.version < min_version || input.version > max_version {
            return Err(DataFileError::BadVersion {
                path: input.path.display().to_string(),
                found: input.version,
                min: min_version,
                max: max_version,
            });
        }
        Ok(input)
    }

    /// The version read from the file header.
    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn fill(&mut self, buf: &mut [u8]) -> Result<(), DataFileError> {
        self.r.read_exact(buf).map_err(|_| {
            DataFileError::Malformed(self.path.display().to_string())
        })
    }

    pub fn get_u8(&mut self) -> Result<u8, DataFileError> {
        let mut buf = [0u8; 1];
        self.fill(&mut buf)?;
        Ok(buf[0])
    }

    pub fn get_bool(&mut self) -> Result<bool, DataFileError> {
        Ok(self.get_u8()? != 0)
    }

    pub fn get_u16(&mut self) -> Result<u16, DataFileError> {
        let mut buf = [0u8; 2];
        self.fill(&mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    pub fn get_u32(&mut self) -> Result<u32, DataFileError> {
        let mut buf = [0u8; 4];
        self.fill(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn get_i32(&mut self) -> Result<i32, DataFileError> {
        let mut buf = [0u8; 4];
        self.fill(&mut buf)?;
        Ok(i32::from_le_bytes(buf))
    }

    pub fn get_i64(&mut self) -> Result<i64, DataFileError> {
        let mut buf = [0u8; 8];
        self.fill(&mut buf)?;
        Ok(i64::from_le_bytes(buf))
    }

    pub fn get_f64(&mut self) -> Result<f64, DataFileError> {
        let mut buf = [0u8; 8];
        self.fill(&mut buf)?;
        Ok(f64::from_le_bytes(buf))
    }

    pub fn get_str(&mut self) -> Result<String, DataFileError> {
        let len = self.get_u32()? as usize;
        let mut buf = vec![0u8; len];
        self.fill(&mut buf)?;
        String::from_utf8(buf).map_err(|_| {
            DataFileError::BadUtf8(self.path.display().to_string())
        })
    }
}

// --- Backup-then-write --- //

/// Writes a new version of `path` durably: the content is staged in a
/// sibling temp file first, the existing file (if any) is renamed to
/// `<path>.bak`, then the temp file is renamed into place.
pub fn write_with_backup<T>(
    path: impl AsRef<Path>,
    version: u32,
    write: impl FnOnce(&mut OutputDataFile) -> Result<T, DataFileError>,
) -> Result<T, DataFileError> {
    let path = path.as_ref();
    let tmp_path = sibling_with_extension(path, "tmp");
    let mut out = OutputDataFile::create(&tmp_path, version)?;
    let value = match write(&mut out) {
        Ok(value) => value,
        Err(e) => {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }
    };
    out.commit()?;
    if path.exists() {
        fs::rename(path, sibling_with_extension(path, "bak"))?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(value)
}

fn sibling_with_extension(path: &Path, ext: &str) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".");
    os.push(ext);
    PathBuf::from(os)
}

// --- KeyValueFile --- //

/// A sectioned `[Section] key=value` file, used for the configuration
/// overlays and the license key file. Values read from an overlay win
/// over the binary settings file; both are written on save.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct KeyValueFile {
    sections: BTreeMap<String, BTreeMap<String, String>>,
}

impl KeyValueFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads `path`, returning an empty file if it does not exist.
    /// Lines starting with `#` or `;` are comments.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DataFileError> {
        let file = match File::open(path.as_ref()) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(Self::new())
            }
            Err(e) => return Err(e.into()),
        };
        let mut kv = Self::new();
        let mut section = String::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';')
            {
                continue;
            }
            if let Some(name) =
                line.strip_prefix('[').and_then(|s| s.strip_suffix(']'))
            {
                section = name.trim().to_owned();
                kv.sections.entry(section.clone()).or_default();
            } else if let Some((key, value)) = line.split_once('=') {
                kv.sections
                    .entry(section.clone())
                    .or_default()
                    .insert(key.trim().to_owned(), value.trim().to_owned());
            }
        }
        Ok(kv)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), DataFileError> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        let mut w = BufWriter::new(File::create(path.as_ref())?);
        for (section, entries) in &self.sections {
            writeln!(w, "[{section}]")?;
            for (key, value) in entries {
                writeln!(w, "{key}={value}")?;
            }
            writeln!(w)?;
        }
        w.flush()?;
        Ok(())
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections.get(section)?.get(key).map(String::as_str)
    }

    pub fn get_i32(&self, section: &str, key: &str) -> Option<i32> {
        self.get(section, key)?.parse().ok()
    }

    pub fn get_bool(&self, section: &str, key: &str) -> Option<bool> {
        match self.get(section, key)? {
            "1" | "true" | "yes" => Some(true),
            "0" | "false" | "no" => Some(false),
            _ => None,
        }
    }

    pub fn set(
        &mut self,
        section: &str,
        key: &str,
        value: impl ToString,
    ) -> &mut Self {
        self.sections
            .entry(section.to_owned())
            .or_default()
            .insert(key.to_owned(), value.to_string());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.sections.values().all(BTreeMap::is_empty)
    }

    /// Section names in sorted order.
    pub fn sections(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(String::as_str)
    }
}
