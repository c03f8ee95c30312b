//! The untrusted server: opaque chain storage and search resolution.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::Error;
use crate::kdf::ChainHashes;
use crate::messages::{self, SearchResultBody, SearchTokenEntry, UpdateTokenBody};
use crate::sse::{SearchResolver, SearchResult, SearchToken, UpdateResolver, UpdateToken};
use crate::{ahe, ahmac};

/// One stored chain node. A missing mask marks a coalesced chain origin.
#[derive(Clone, Serialize, Deserialize)]
struct ServerNode {
    masked_internal_search_token: Option<[u8; 32]>,
    encrypted_index: Vec<u8>,
    tag: Vec<u8>,
}

/// A fully walked chain, staged before any server state is touched.
struct ChainWalk {
    removals: Vec<[u8; 32]>,
    head: [u8; 32],
    encrypted_index: Vec<u8>,
    tag: Vec<u8>,
}

/// The untrusted side of the protocol. Holds only ciphertexts and hashes,
/// keyed by internal update tokens.
pub struct Server {
    state: HashMap<[u8; 32], ServerNode>,
    config: Config,
}

impl Server {
    pub fn new(config: Config) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            state: HashMap::new(),
            config,
        })
    }

    /// Serialize the node map. It contains no secrets, though it still
    /// reveals update and search patterns.
    pub fn state(&self) -> Result<Vec<u8>, Error> {
        messages::encode(&self.state)
    }

    pub fn load_state(&mut self, blob: &[u8]) -> Result<(), Error> {
        self.state = messages::decode(blob)?;
        Ok(())
    }

    /// Store update tokens. O(1) per token; trigrams are never visible here.
    /// Applying the same token twice overwrites the node with itself.
    pub fn resolve_updates(&mut self, tokens: &[UpdateToken]) -> Result<(), Error> {
        for token in tokens {
            let body: UpdateTokenBody = messages::decode(token)?;
            if body.encrypted_index.len() != self.config.index_len()
                || body.tag.len() != ahmac::SIZE
            {
                return Err(Error::Serde(
                    "update token does not match configuration".to_string(),
                ));
            }
            self.state.insert(
                body.next_internal_update_token,
                ServerNode {
                    masked_internal_search_token: Some(body.masked_internal_search_token),
                    encrypted_index: body.encrypted_index,
                    tag: body.tag,
                },
            );
        }
        Ok(())
    }

    /// Combine the stored chains named by a search token into one encrypted
    /// result, coalescing each walked chain into a single origin node.
    ///
    /// The walk happens in two phases: every chain is resolved read-only
    /// first, so a malformed token leaves the server state unchanged.
    pub fn resolve_search(&mut self, token: &SearchToken) -> Result<SearchResult, Error> {
        let entries: Vec<SearchTokenEntry> = messages::decode(token)?;
        let mut walks = Vec::with_capacity(entries.len());
        for entry in &entries {
            walks.push(self.walk_chain(entry)?);
        }

        let mut encrypted_index = vec![0u8; self.config.index_len()];
        let mut tag = vec![0u8; ahmac::SIZE];
        for walk in walks {
            for node_address in &walk.removals {
                self.state.remove(node_address);
            }
            ahe::add(&mut encrypted_index, &walk.encrypted_index)?;
            ahmac::add(&mut tag, &walk.tag)?;
            self.state.insert(
                walk.head,
                ServerNode {
                    masked_internal_search_token: None,
                    encrypted_index: walk.encrypted_index,
                    tag: walk.tag,
                },
            );
        }

        messages::encode(&SearchResultBody {
            encrypted_index,
            tag,
        })
    }

    /// Walk one trigram's chain backwards from the client-supplied search
    /// token, accumulating the encrypted deltas and tags. The coalesced
    /// replacement node goes back in at the chain head, the address the next
    /// search for this trigram probes first.
    fn walk_chain(&self, entry: &SearchTokenEntry) -> Result<ChainWalk, Error> {
        if entry.update_count < 0 {
            return Err(Error::Serde(
                "negative update count in search token".to_string(),
            ));
        }
        let hashes = ChainHashes::new(&entry.update_key);
        let mut ist = entry.internal_search_token;
        let head = hashes.node_address(&ist);

        let mut encrypted_index = vec![0u8; self.config.index_len()];
        let mut tag = vec![0u8; ahmac::SIZE];
        let mut removals = Vec::new();
        let mut remaining = entry.update_count;
        loop {
            let node_address = hashes.node_address(&ist);
            let node = self.state.get(&node_address).ok_or_else(|| {
                log::warn!("chain walk hit a missing node; rejecting search token");
                Error::ProtocolInvariant
            })?;
            removals.push(node_address);
            ahe::add(&mut encrypted_index, &node.encrypted_index)?;
            ahmac::add(&mut tag, &node.tag)?;
            match node.masked_internal_search_token {
                None => break,
                Some(mask) => {
                    let pad = hashes.mask_pad(&ist);
                    for (out, (m, p)) in ist.iter_mut().zip(mask.iter().zip(pad.iter())) {
                        *out = m ^ p;
                    }
                }
            }
            remaining -= 1;
            if remaining < 0 {
                break;
            }
        }

        Ok(ChainWalk {
            removals,
            head,
            encrypted_index,
            tag,
        })
    }
}

impl SearchResolver for Server {
    fn resolve_search(&mut self, token: &SearchToken) -> Result<SearchResult, Error> {
        Server::resolve_search(self, token)
    }
}

impl UpdateResolver for Server {
    fn resolve_updates(&mut self, tokens: &[UpdateToken]) -> Result<(), Error> {
        Server::resolve_updates(self, tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Client, Query};
    use crate::sse::Change;

    const KEY: &[u8] = b"YELLOW SUBMARINE, BLACK WIZARDRY";
    const NONCE: &[u8] = b"THIS USER IS FOR TESTING";

    fn config() -> Config {
        Config {
            max_files: 4,
            max_search_trigrams: 10,
            search_threshold: 0.75,
        }
    }

    fn pair() -> (Client, Server) {
        (
            Client::new(KEY, NONCE, config()).unwrap(),
            Server::new(config()).unwrap(),
        )
    }

    fn insert(diff: &[u8]) -> Change {
        Change {
            file_id: 0,
            diff: diff.to_vec(),
        }
    }

    #[test]
    fn test_resolve_updates_is_idempotent() {
        let (mut client, mut server) = pair();
        let tokens = client.update(&[insert(b"+aaa")]).unwrap();
        server.resolve_updates(&tokens).unwrap();
        server.resolve_updates(&tokens).unwrap();
        assert_eq!(server.state.len(), 1);
    }

    #[test]
    fn test_resolve_updates_rejects_foreign_config() {
        let mut small = Client::new(
            KEY,
            NONCE,
            Config {
                max_files: 1000,
                ..config()
            },
        )
        .unwrap();
        let mut server = Server::new(config()).unwrap();
        let tokens = small.update(&[insert(b"+aaa")]).unwrap();
        assert!(matches!(
            server.resolve_updates(&tokens),
            Err(Error::Serde(_))
        ));
        assert!(server.state.is_empty());
    }

    #[test]
    fn test_search_coalesces_chain_to_single_node() {
        let (mut client, mut server) = pair();
        for _ in 0..3 {
            let tokens = client.update(&[insert(b"+aaa")]).unwrap();
            server.resolve_updates(&tokens).unwrap();
        }
        assert_eq!(server.state.len(), 3);

        let query = Query::from("aaaa");
        let token = client.search(&query).unwrap();
        let result = server.resolve_search(&token).unwrap();
        assert_eq!(server.state.len(), 1);
        let node = server.state.values().next().unwrap();
        assert!(node.masked_internal_search_token.is_none());
        assert_eq!(client.open_result(&query, &result).unwrap(), vec![0]);
    }

    #[test]
    fn test_search_update_search_extends_coalesced_chain() {
        let (mut client, mut server) = pair();
        let tokens = client.update(&[insert(b"+aaa")]).unwrap();
        server.resolve_updates(&tokens).unwrap();

        let query = Query::from("aaaa");
        let token = client.search(&query).unwrap();
        server.resolve_search(&token).unwrap();

        let tokens = client.update(&[insert(b"+aaa")]).unwrap();
        server.resolve_updates(&tokens).unwrap();
        assert_eq!(server.state.len(), 2);

        let token = client.search(&query).unwrap();
        let result = server.resolve_search(&token).unwrap();
        assert_eq!(server.state.len(), 1);
        assert_eq!(client.open_result(&query, &result).unwrap(), vec![0]);
    }

    #[test]
    fn test_repeated_search_hits_origin_immediately() {
        let (mut client, mut server) = pair();
        let tokens = client.update(&[insert(b"+aaa")]).unwrap();
        server.resolve_updates(&tokens).unwrap();

        let query = Query::from("aaaa");
        for _ in 0..3 {
            let token = client.search(&query).unwrap();
            let result = server.resolve_search(&token).unwrap();
            assert_eq!(server.state.len(), 1);
            assert_eq!(client.open_result(&query, &result).unwrap(), vec![0]);
        }
    }

    #[test]
    fn test_failed_search_leaves_state_untouched() {
        let (mut client, mut server) = pair();
        let tokens = client.update(&[insert(b"+aaa+bbb")]).unwrap();
        server.resolve_updates(&tokens).unwrap();
        let before = server.state.len();

        // A client the server never heard from names chains that do not exist.
        let mut stranger = Client::new(KEY, b"ANOTHER TEST USER NONCE!", config()).unwrap();
        stranger.update(&[insert(b"+aaa")]).unwrap();
        let token = stranger.search(&Query::from("aaaa")).unwrap();
        assert!(matches!(
            server.resolve_search(&token),
            Err(Error::ProtocolInvariant)
        ));
        assert_eq!(server.state.len(), before);
    }

    #[test]
    fn test_empty_token_yields_zero_result() {
        let (client, mut server) = pair();
        let token = client.search(&Query::from("not indexed")).unwrap();
        let result = server.resolve_search(&token).unwrap();
        assert!(server.state.is_empty());
        let ids = client.open_result(&Query::from("not indexed"), &result).unwrap();
        assert!(ids.is_empty());
    }

    #[test]
    fn test_server_state_roundtrip() {
        let (mut client, mut server) = pair();
        let tokens = client.update(&[insert(b"+abc+bcd")]).unwrap();
        server.resolve_updates(&tokens).unwrap();

        let blob = server.state().unwrap();
        let mut restored = Server::new(config()).unwrap();
        restored.load_state(&blob).unwrap();

        let query = Query::from("abcd");
        let token = client.search(&query).unwrap();
        let result = restored.resolve_search(&token).unwrap();
        assert_eq!(client.open_result(&query, &result).unwrap(), vec![0]);
    }
}
