//! Role traits for the searchable-encryption protocol.
//!
//! Tokens and results are opaque byte strings: their layout is an
//! implementation detail of the codec, and callers only move them between
//! the two sides. Document identifiers are fixed to `u64`.

use crate::client::Query;
use crate::error::Error;

/// An opaque search token produced by a searcher.
pub type SearchToken = Vec<u8>;

/// An opaque encrypted search result produced by a resolver.
pub type SearchResult = Vec<u8>;

/// An opaque per-trigram update token produced by an updater.
pub type UpdateToken = Vec<u8>;

/// A document revision, described by the diff from its previous content.
#[derive(Clone, Debug)]
pub struct Change {
    pub file_id: u64,
    pub diff: Vec<u8>,
}

/// The query side of the trusted client.
pub trait Searcher {
    fn search(&self, query: &Query) -> Result<SearchToken, Error>;
    fn open_result(&self, query: &Query, result: &SearchResult) -> Result<Vec<u64>, Error>;
}

/// The indexing side of the trusted client.
pub trait Updater {
    fn update(&mut self, changes: &[Change]) -> Result<Vec<UpdateToken>, Error>;
}

/// The untrusted server's search half.
pub trait SearchResolver {
    fn resolve_search(&mut self, token: &SearchToken) -> Result<SearchResult, Error>;
}

/// The untrusted server's update half.
pub trait UpdateResolver {
    fn resolve_updates(&mut self, tokens: &[UpdateToken]) -> Result<(), Error>;
}
