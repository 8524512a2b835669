//! SHA-256 fingerprints of computed graphs.

use sha2::{Digest, Sha256};

/// Length of a short fingerprint in hex characters.
pub const SHORT_LEN: usize = 16;

/// Incremental hasher over delimited string components.
///
/// Each component is terminated so that `["ab", "c"]` and `["a", "bc"]`
/// hash differently.
#[derive(Default)]
pub struct Fingerprint {
    hasher: Sha256,
}

impl Fingerprint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one component.
    pub fn update_str(&mut self, s: &str) -> &mut Self {
        self.hasher.update(s.as_bytes());
        self.hasher.update([0u8]);
        self
    }

    /// Add a sequence of components, prefixed by its length.
    pub fn update_strs<'a>(&mut self, items: impl IntoIterator<Item = &'a str>) -> &mut Self {
        let items: Vec<&str> = items.into_iter().collect();
        self.hasher.update((items.len() as u64).to_le_bytes());
        for s in items {
            self.update_str(s);
        }
        self
    }

    /// Add a component that may be missing.
    pub fn update_opt(&mut self, opt: Option<&str>) -> &mut Self {
        match opt {
            Some(s) => {
                self.hasher.update([1u8]);
                self.update_str(s)
            }
            None => {
                self.hasher.update([2u8]);
                self
            }
        }
    }

    /// Full lowercase hex digest.
    pub fn finish(self) -> String {
        hex::encode(self.hasher.finalize())
    }

    /// The first [`SHORT_LEN`] hex characters of the digest.
    pub fn finish_short(self) -> String {
        let mut full = self.finish();
        full.truncate(SHORT_LEN);
        full
    }
}
