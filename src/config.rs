//! Deployment parameters shared by client and server.

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::modp;

/// Parameters sizing the encrypted index. Client and server must agree on
/// them for a deployment; they are not secret.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Upper bound on document identifiers. Must be in [1, 2^60).
    pub max_files: u64,
    /// Upper bound on trigrams per query. Its bit length is the per-file
    /// counter width and must divide 256.
    pub max_search_trigrams: u16,
    /// Fraction of query trigrams a document must match, in (0, 1].
    pub search_threshold: f64,
}

impl Config {
    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.max_files == 0 || self.max_files >= 1 << 60 {
            return Err(Error::ConfigInvalid(format!(
                "maximum number of files out of range: {}",
                self.max_files
            )));
        }
        if self.max_search_trigrams == 0 || 256 % self.file_bit_len() != 0 {
            return Err(Error::ConfigInvalid(format!(
                "invalid maximum number of search trigrams: {}",
                self.max_search_trigrams
            )));
        }
        if self.search_threshold <= 0.0 || self.search_threshold > 1.0 {
            return Err(Error::ConfigInvalid(
                "search threshold out of range".to_string(),
            ));
        }
        Ok(())
    }

    /// Width in bits of one per-file match counter.
    pub(crate) fn file_bit_len(&self) -> u64 {
        u64::from(16 - self.max_search_trigrams.leading_zeros() as u16)
    }

    /// Total payload bits in the index.
    pub(crate) fn index_bit_len(&self) -> u64 {
        self.max_files * self.file_bit_len()
    }

    /// Number of 33-byte blocks backing the index.
    pub(crate) fn index_blocks(&self) -> u64 {
        (self.index_bit_len() + 255) / 256
    }

    /// Byte length of an encrypted index.
    pub(crate) fn index_len(&self) -> usize {
        modp::BLOCK_SIZE * self.index_blocks() as usize
    }
}
