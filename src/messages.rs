//! Wire formats for tokens, results, and persisted state.
//!
//! Everything crossing the client/server boundary is encoded with one fixed
//! bincode configuration so blobs stay portable across a deployment.

use bincode::Options;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// The codec used for every token, result, and state blob.
pub(crate) fn codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .allow_trailing_bytes()
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, Error> {
    codec()
        .serialize(value)
        .map_err(|e| Error::Serde(e.to_string()))
}

pub(crate) fn decode<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, Error> {
    codec()
        .with_limit(bytes.len() as u64)
        .deserialize(bytes)
        .map_err(|e| Error::Serde(e.to_string()))
}

/// One per-trigram entry of a search token.
#[derive(Clone, Serialize, Deserialize)]
pub(crate) struct SearchTokenEntry {
    pub update_count: i64,
    pub internal_search_token: [u8; 32],
    pub update_key: [u8; 32],
}

/// The server's combined answer to a search token.
#[derive(Clone, Serialize, Deserialize)]
pub(crate) struct SearchResultBody {
    pub encrypted_index: Vec<u8>,
    pub tag: Vec<u8>,
}

/// One per-trigram update emitted by the client.
#[derive(Clone, Serialize, Deserialize)]
pub(crate) struct UpdateTokenBody {
    pub next_internal_update_token: [u8; 32],
    pub masked_internal_search_token: [u8; 32],
    pub encrypted_index: Vec<u8>,
    pub tag: Vec<u8>,
}
