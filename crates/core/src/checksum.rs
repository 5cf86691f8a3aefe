//! Checksums computed over package archive bytes.

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

/// Which checksums to compute while scanning.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumSelection {
    pub md5: bool,
    pub sha1: bool,
}

impl ChecksumSelection {
    /// Select no checksums at all.
    pub fn none() -> Self {
        Self::default()
    }

    /// Select both MD5 and SHA-1.
    pub fn all() -> Self {
        Self {
            md5: true,
            sha1: true,
        }
    }
}

/// Lowercase hex digests of one archive.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksums {
    pub md5: Option<String>,
    pub sha1: Option<String>,
}

impl Checksums {
    /// Compute the selected checksums of `data`.
    pub fn compute(data: &[u8], selection: ChecksumSelection) -> Self {
        let mut hasher = ChecksumHasher::new(selection);
        hasher.update(data);
        hasher.finalize()
    }

    /// Iterate `(field name, hex digest)` pairs in index order.
    ///
    /// Field names are the ones written into the `Packages` document.
    pub fn fields(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [("MD5sum", self.md5.as_deref()), ("SHA1sum", self.sha1.as_deref())]
            .into_iter()
            .filter_map(|(name, value)| value.map(|v| (name, v)))
    }

    pub fn is_empty(&self) -> bool {
        self.md5.is_none() && self.sha1.is_none()
    }
}

/// Incremental hasher for the selected checksums.
pub struct ChecksumHasher {
    md5: Option<md5::Context>,
    sha1: Option<Sha1>,
}

impl ChecksumHasher {
    pub fn new(selection: ChecksumSelection) -> Self {
        Self {
            md5: selection.md5.then(md5::Context::new),
            sha1: selection.sha1.then(Sha1::new),
        }
    }

    /// Update every selected hasher with data.
    pub fn update(&mut self, data: &[u8]) {
        if let Some(ctx) = self.md5.as_mut() {
            ctx.consume(data);
        }
        if let Some(hasher) = self.sha1.as_mut() {
            hasher.update(data);
        }
    }

    /// Finalize and return the hex digests.
    pub fn finalize(self) -> Checksums {
        Checksums {
            md5: self.md5.map(|ctx| format!("{:x}", ctx.compute())),
            sha1: self.sha1.map(|hasher| to_hex(&hasher.finalize())),
        }
    }
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
