//! Dynamic searchable symmetric encryption with trigram substring search.
//!
//! A trusted [`Client`] holds a master key and turns document revisions into
//! encrypted per-trigram index deltas; an untrusted [`Server`] stores them in
//! per-trigram hash chains it cannot read or link. Searches walk the chains
//! backwards with a client-supplied token, sum the additively homomorphic
//! deltas and tags, and return one encrypted, authenticated result. Update
//! tokens are unlinkable before a search (forward privacy), and any tampering
//! with the stored index is caught when the result is opened.
//!
//! Neither type is safe for concurrent mutation; callers serialize `update`,
//! `load_state`, `resolve_updates`, and `resolve_search` externally.

pub mod ahe;
pub mod ahmac;
pub mod bitset;
pub mod client;
pub mod config;
pub mod error;
pub mod modp;
pub mod server;
pub mod sse;

mod diff;
mod kdf;
mod messages;

pub use client::{Client, Query};
pub use config::Config;
pub use diff::{diff, parse_diff};
pub use error::Error;
pub use server::Server;
pub use sse::{
    Change, SearchResolver, SearchResult, SearchToken, Searcher, UpdateResolver, UpdateToken,
    Updater,
};
