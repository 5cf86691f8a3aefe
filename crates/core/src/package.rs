//! Package records and `.ipk` archive parsing.
//!
//! An `.ipk` archive comes in one of two containers:
//! - an `ar` archive (as produced by current opkg-build), or
//! - a gzipped tar archive (older opkg-build).
//!
//! Either container holds `debian-binary`, `control.tar.gz` and
//! `data.tar.gz`. Only `control.tar.gz` is inspected; its `control` member is
//! the package's control stanza.

use crate::checksum::{ChecksumSelection, Checksums};
use crate::error::{Error, Result};
use flate2::read::GzDecoder;
use std::io::Read;
use std::path::Path;
use time::OffsetDateTime;

const AR_MAGIC: &[u8] = b"!<arch>\n";
const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const CONTROL_TARBALL: &str = "control.tar.gz";
const CONTROL_FILE: &str = "control";

/// One parsed package archive.
///
/// Records are created once while scanning and never mutated afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackageRecord {
    /// Archive file name (no directory component).
    pub filename: String,
    /// Archive size in bytes.
    pub size: u64,
    /// Archive modification time.
    pub modified: OffsetDateTime,
    /// Raw control stanza as stored in the archive.
    pub control: String,
    /// First line of the `Description:` field.
    pub description: String,
    /// Checksums over the archive bytes.
    pub checksums: Checksums,
}

impl PackageRecord {
    /// Read and parse `dir/filename`.
    ///
    /// This performs blocking file I/O.
    pub fn from_file(dir: &Path, filename: &str, checksums: ChecksumSelection) -> Result<Self> {
        let path = dir.join(filename);
        let metadata = std::fs::metadata(&path)?;
        let modified = metadata
            .modified()
            .map(OffsetDateTime::from)
            .unwrap_or(OffsetDateTime::UNIX_EPOCH);
        let data = std::fs::read(&path)?;

        let mut record = Self::from_bytes(filename, &data, checksums)?;
        record.modified = modified;
        Ok(record)
    }

    /// Parse an archive already held in memory.
    ///
    /// The modification time is left at the Unix epoch.
    pub fn from_bytes(filename: &str, data: &[u8], checksums: ChecksumSelection) -> Result<Self> {
        let control = extract_control(data)?;
        let description = describe(&control);

        Ok(Self {
            filename: filename.to_string(),
            size: data.len() as u64,
            modified: OffsetDateTime::UNIX_EPOCH,
            control,
            description,
            checksums: Checksums::compute(data, checksums),
        })
    }

    /// Value of the `Package:` field, if present.
    pub fn package_name(&self) -> Option<&str> {
        control_field(&self.control, "Package")
    }

    /// Write this record's stanza for the `Packages` document.
    pub fn write_stanza(&self, out: &mut String) {
        out.push_str(self.control.trim_end_matches(['\n', '\r']));
        out.push('\n');
        out.push_str(&format!("Filename: {}\n", self.filename));
        out.push_str(&format!("Size: {}\n", self.size));
        for (field, digest) in self.checksums.fields() {
            out.push_str(&format!("{field}: {digest}\n"));
        }
    }
}

/// Extract the control stanza from an archive.
pub fn extract_control(data: &[u8]) -> Result<String> {
    let control_tarball = if data.starts_with(AR_MAGIC) {
        control_tarball_from_ar(data)?
    } else if data.starts_with(GZIP_MAGIC) {
        control_tarball_from_tgz(data)?
    } else {
        return Err(Error::InvalidPackage(
            "neither an ar archive nor a gzipped tarball".to_string(),
        ));
    };

    let control = control_from_tarball(&control_tarball)?;
    if control_field(&control, "Package").is_none() {
        return Err(Error::InvalidPackage(
            "control file has no Package field".to_string(),
        ));
    }
    Ok(control)
}

fn control_tarball_from_ar(data: &[u8]) -> Result<Vec<u8>> {
    let mut archive = ar::Archive::new(data);
    while let Some(entry) = archive.next_entry() {
        let mut entry = entry?;
        // GNU ar terminates member names with a slash
        let name = entry.header().identifier().to_vec();
        let name = name.strip_suffix(b"/").unwrap_or(&name);
        if name == CONTROL_TARBALL.as_bytes() {
            let mut buf = Vec::new();
            entry.read_to_end(&mut buf)?;
            return Ok(buf);
        }
    }
    Err(Error::MissingControl)
}

fn control_tarball_from_tgz(data: &[u8]) -> Result<Vec<u8>> {
    let mut archive = tar::Archive::new(GzDecoder::new(data));
    for entry in archive.entries()? {
        let mut entry = entry?;
        if has_file_name(&entry.path()?, CONTROL_TARBALL) {
            let mut buf = Vec::new();
            entry.read_to_end(&mut buf)?;
            return Ok(buf);
        }
    }
    Err(Error::MissingControl)
}

fn control_from_tarball(data: &[u8]) -> Result<String> {
    let mut archive = tar::Archive::new(GzDecoder::new(data));
    for entry in archive.entries()? {
        let mut entry = entry?;
        if has_file_name(&entry.path()?, CONTROL_FILE) {
            let mut buf = Vec::new();
            entry.read_to_end(&mut buf)?;
            return String::from_utf8(buf)
                .map_err(|e| Error::InvalidPackage(format!("control file is not UTF-8: {e}")));
        }
    }
    Err(Error::MissingControl)
}

fn has_file_name(path: &Path, name: &str) -> bool {
    path.file_name().is_some_and(|n| n == name)
}

/// Value of a single-line control field.
fn control_field<'a>(control: &'a str, field: &str) -> Option<&'a str> {
    control.lines().find_map(|line| {
        line.strip_prefix(field)
            .and_then(|rest| rest.strip_prefix(':'))
            .map(str::trim)
    })
}

/// One-line description derived from the control stanza.
fn describe(control: &str) -> String {
    control_field(control, "Description")
        .unwrap_or_default()
        .to_string()
}
