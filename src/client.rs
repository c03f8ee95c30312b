//! The trusted client: index updates, search tokens, result opening.

use std::collections::BTreeMap;

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::bitset::BitSet;
use crate::config::Config;
use crate::diff::{parse_diff, trigrams};
use crate::error::Error;
use crate::kdf::{derive_key, ChainHashes};
use crate::messages::{self, SearchResultBody, SearchTokenEntry, UpdateTokenBody};
use crate::sse::{Change, SearchResult, SearchToken, Searcher, UpdateToken, Updater};
use crate::{ahe, ahmac};

const ENCRYPTION_KEY_LABEL: &[u8] = b"index encryption";
const INTEGRITY_KEY_LABEL: &[u8] = b"index integrity";
const AUTHENTICATION_KEY_LABEL: &[u8] = b"index authentication";
const UPDATE_KEY_LABEL: &[u8] = b"update token derivation";
const CLIENT_STATE_KEY_LABEL: &[u8] = b"client state dump encryption";
const CLIENT_STATE_AAD: &[u8] = b"client state dump";

/// A substring query. Must contain at least three Unicode scalars.
#[derive(Clone, Debug, Default)]
pub struct Query {
    pub text: String,
}

impl From<&str> for Query {
    fn from(text: &str) -> Self {
        Self { text: text.to_owned() }
    }
}

impl From<String> for Query {
    fn from(text: String) -> Self {
        Self { text }
    }
}

#[derive(Clone, Serialize, Deserialize)]
struct TrigramState {
    update_count: i64,
    internal_search_token: [u8; 32],
}

/// The trusted side of the protocol. Holds the master key and the head of
/// every trigram's update chain.
pub struct Client {
    key: [u8; 32],
    user_nonce: [u8; 24],
    integrity_key: [u8; ahmac::SIZE],
    state: BTreeMap<String, TrigramState>,
    config: Config,
}

#[derive(Clone, Copy, PartialEq)]
enum UpdateOp {
    Add,
    Del,
}

impl Client {
    /// Create a client from a 32-byte master key and 24-byte user nonce.
    pub fn new(key: &[u8], user_nonce: &[u8], config: Config) -> Result<Self, Error> {
        let key: [u8; 32] = key
            .try_into()
            .map_err(|_| Error::KeyOrNonceSize("key size must be exactly 32 bytes"))?;
        let user_nonce: [u8; 24] = user_nonce
            .try_into()
            .map_err(|_| Error::KeyOrNonceSize("nonce size must be exactly 24 bytes"))?;
        config.validate()?;
        let integrity_key = ahmac::uniform_key(&derive_key(
            &key,
            &[&user_nonce, INTEGRITY_KEY_LABEL],
        ));
        Ok(Self {
            key,
            user_nonce,
            integrity_key,
            state: BTreeMap::new(),
            config,
        })
    }

    /// Serialize the per-trigram state, sealed with an AEAD under a derived
    /// key. The blob is nonce-prefixed and authenticated; it is the only
    /// copy of the chain heads, so persist it before trusting the server
    /// with the matching update tokens.
    pub fn state(&self) -> Result<Vec<u8>, Error> {
        let plaintext = messages::encode(&self.state)?;
        let state_key = derive_key(&self.key, &[&self.user_nonce, CLIENT_STATE_KEY_LABEL]);
        let aead = ChaCha20Poly1305::new((&state_key).into());
        let mut nonce = [0u8; 12];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = aead
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &plaintext,
                    aad: CLIENT_STATE_AAD,
                },
            )
            .map_err(|_| Error::CryptoIntegrity)?;
        let mut blob = nonce.to_vec();
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    /// Replace the per-trigram state with a previously sealed dump.
    pub fn load_state(&mut self, blob: &[u8]) -> Result<(), Error> {
        if blob.len() < 12 {
            return Err(Error::Serde("state blob too short".to_string()));
        }
        let (nonce, ciphertext) = blob.split_at(12);
        let state_key = derive_key(&self.key, &[&self.user_nonce, CLIENT_STATE_KEY_LABEL]);
        let aead = ChaCha20Poly1305::new((&state_key).into());
        let plaintext = aead
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: CLIENT_STATE_AAD,
                },
            )
            .map_err(|_| Error::CryptoIntegrity)?;
        self.state = messages::decode(&plaintext)?;
        Ok(())
    }

    /// Build a search token for `query`.
    ///
    /// Query trigrams never updated through this client are dropped; if none
    /// survive the token is an empty list, which the server answers with the
    /// zero result.
    pub fn search(&self, query: &Query) -> Result<SearchToken, Error> {
        let q = self.query_trigrams(query)?;
        let mut token = Vec::with_capacity(q.len());
        for trigram in &q {
            let state = &self.state[trigram];
            token.push(SearchTokenEntry {
                update_count: state.update_count,
                internal_search_token: state.internal_search_token,
                update_key: self.update_key(trigram),
            });
        }
        messages::encode(&token)
    }

    /// Verify and decrypt a search result into matching document ids.
    pub fn open_result(&self, query: &Query, result: &SearchResult) -> Result<Vec<u64>, Error> {
        let q = self.query_trigrams(query)?;
        if q.is_empty() {
            return Ok(Vec::new());
        }
        let res: SearchResultBody = messages::decode(result)?;
        if res.encrypted_index.len() != self.config.index_len() || res.tag.len() != ahmac::SIZE {
            return Err(Error::Serde(
                "search result does not match configuration".to_string(),
            ));
        }

        let blocks = self.config.index_blocks();
        let mut encryption_key = vec![0u8; self.config.index_len()];
        let mut authentication_key = [0u8; ahmac::SIZE];
        for trigram in &q {
            for count in 0..=self.state[trigram].update_count {
                let seed = self.index_encryption_seed(trigram, count);
                ahe::add(&mut encryption_key, &ahe::key_from_seed(&seed, blocks))?;
                ahmac::add(
                    &mut authentication_key,
                    &self.authentication_key(trigram, count),
                )?;
            }
        }

        let tag = ahmac::mac(&self.integrity_key, &authentication_key, &res.encrypted_index)?;
        if !bool::from(tag.as_slice().ct_eq(&res.tag)) {
            return Err(Error::CryptoIntegrity);
        }

        let index = ahe::decrypt(&encryption_key, &res.encrypted_index)?;
        let index = BitSet::from_bytes(index, self.config.index_bit_len());
        let required = self.required_matches(&query.text);
        let width = self.config.file_bit_len();
        let mut ids = Vec::new();
        for file_id in 0..self.config.max_files {
            let field = index.bits_at(file_id * width, width)?;
            let matches = u16::from_be_bytes([field[0], field[1]]);
            if matches >= required {
                ids.push(file_id);
            }
        }
        Ok(ids)
    }

    /// Turn document changes into per-trigram update tokens.
    ///
    /// Apply the returned tokens with `Server::resolve_updates` and persist
    /// the client state; losing it orphans the chains extended here.
    pub fn update(&mut self, changes: &[Change]) -> Result<Vec<UpdateToken>, Error> {
        let mut removed: BTreeMap<String, Vec<u64>> = BTreeMap::new();
        let mut inserted: BTreeMap<String, Vec<u64>> = BTreeMap::new();
        for change in changes {
            if change.file_id >= self.config.max_files {
                return Err(Error::FileIdOutOfRange(change.file_id));
            }
            let (rem, ins) = parse_diff(&change.diff)?;
            for trigram in rem {
                removed.entry(trigram).or_default().push(change.file_id);
            }
            for trigram in ins {
                inserted.entry(trigram).or_default().push(change.file_id);
            }
        }
        let mut out = Vec::with_capacity(removed.len() + inserted.len());
        for (trigram, ids) in &removed {
            out.push(self.update_trigram(ids, trigram, UpdateOp::Del)?);
        }
        for (trigram, ids) in &inserted {
            out.push(self.update_trigram(ids, trigram, UpdateOp::Add)?);
        }
        Ok(out)
    }

    fn update_trigram(
        &mut self,
        ids: &[u64],
        trigram: &str,
        op: UpdateOp,
    ) -> Result<UpdateToken, Error> {
        let (count, current_ist) = match self.state.get(trigram) {
            Some(state) => (state.update_count, state.internal_search_token),
            None => {
                let mut ist = [0u8; 32];
                OsRng.fill_bytes(&mut ist);
                (-1, ist)
            }
        };
        let mut next_ist = [0u8; 32];
        OsRng.fill_bytes(&mut next_ist);
        self.state.insert(
            trigram.to_owned(),
            TrigramState {
                update_count: count + 1,
                internal_search_token: next_ist,
            },
        );

        let hashes = ChainHashes::new(&self.update_key(trigram));
        let next_iut = hashes.node_address(&next_ist);
        let pad = hashes.mask_pad(&next_ist);
        let mut masked_ist = [0u8; 32];
        for (m, (c, p)) in masked_ist.iter_mut().zip(current_ist.iter().zip(pad.iter())) {
            *m = c ^ p;
        }

        let mut delta = BitSet::new(self.config.index_bit_len());
        for &id in ids {
            delta.set(id * self.config.file_bit_len())?;
        }
        if op == UpdateOp::Del {
            delta.neg()?;
        }

        let seed = self.index_encryption_seed(trigram, count + 1);
        let encryption_key = ahe::key_from_seed(&seed, self.config.index_blocks());
        let encrypted_index = ahe::encrypt(&encryption_key, delta.as_bytes())?;
        let tag = ahmac::mac(
            &self.integrity_key,
            &self.authentication_key(trigram, count + 1),
            &encrypted_index,
        )?;

        messages::encode(&UpdateTokenBody {
            next_internal_update_token: next_iut,
            masked_internal_search_token: masked_ist,
            encrypted_index,
            tag: tag.to_vec(),
        })
    }

    /// The sorted query trigrams this client has state for.
    fn query_trigrams(&self, query: &Query) -> Result<Vec<String>, Error> {
        if query.text.chars().count() < 3 {
            return Err(Error::QueryTooShort);
        }
        let mut q = trigrams(&query.text);
        q.retain(|trigram| self.state.contains_key(trigram));
        if q.len() > usize::from(self.config.max_search_trigrams) {
            return Err(Error::QueryTooLong);
        }
        Ok(q)
    }

    /// Match count a file needs before it is reported, over the full
    /// (unfiltered) trigram set of the query text. Never below one, so files
    /// matching nothing are never reported.
    fn required_matches(&self, query_text: &str) -> u16 {
        let scaled = self.config.search_threshold * trigrams(query_text).len() as f64;
        (scaled as u16).max(1)
    }

    fn update_key(&self, trigram: &str) -> [u8; 32] {
        derive_key(
            &self.key,
            &[&self.user_nonce, UPDATE_KEY_LABEL, trigram.as_bytes()],
        )
    }

    fn index_encryption_seed(&self, trigram: &str, count: i64) -> [u8; 32] {
        derive_key(
            &self.key,
            &[
                &self.user_nonce,
                ENCRYPTION_KEY_LABEL,
                trigram.as_bytes(),
                count.to_string().as_bytes(),
            ],
        )
    }

    fn authentication_key(&self, trigram: &str, count: i64) -> [u8; ahmac::SIZE] {
        ahmac::uniform_key(&derive_key(
            &self.key,
            &[
                &self.user_nonce,
                AUTHENTICATION_KEY_LABEL,
                trigram.as_bytes(),
                count.to_string().as_bytes(),
            ],
        ))
    }
}

impl Searcher for Client {
    fn search(&self, query: &Query) -> Result<SearchToken, Error> {
        Client::search(self, query)
    }

    fn open_result(&self, query: &Query, result: &SearchResult) -> Result<Vec<u64>, Error> {
        Client::open_result(self, query, result)
    }
}

impl Updater for Client {
    fn update(&mut self, changes: &[Change]) -> Result<Vec<UpdateToken>, Error> {
        Client::update(self, changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::decode;

    const KEY: &[u8] = b"YELLOW SUBMARINE, BLACK WIZARDRY";
    const NONCE: &[u8] = b"THIS USER IS FOR TESTING";

    fn config() -> Config {
        Config {
            max_files: 4,
            max_search_trigrams: 10,
            search_threshold: 0.75,
        }
    }

    fn client() -> Client {
        Client::new(KEY, NONCE, config()).unwrap()
    }

    #[test]
    fn test_new_rejects_bad_sizes() {
        assert!(matches!(
            Client::new(&KEY[..31], NONCE, config()),
            Err(Error::KeyOrNonceSize(_))
        ));
        assert!(matches!(
            Client::new(KEY, &NONCE[..23], config()),
            Err(Error::KeyOrNonceSize(_))
        ));
        assert!(matches!(
            Client::new(
                KEY,
                NONCE,
                Config { max_files: 0, ..config() }
            ),
            Err(Error::ConfigInvalid(_))
        ));
    }

    #[test]
    fn test_update_tracks_counts_per_trigram() {
        let mut client = client();
        let change = |diff: &[u8]| Change { file_id: 0, diff: diff.to_vec() };
        client.update(&[change(b"+aaa+bbb")]).unwrap();
        client.update(&[change(b"-aaa")]).unwrap();
        assert_eq!(client.state["aaa"].update_count, 1);
        assert_eq!(client.state["bbb"].update_count, 0);
    }

    #[test]
    fn test_update_rotates_search_token() {
        let mut client = client();
        let change = Change { file_id: 1, diff: b"+xyz".to_vec() };
        client.update(&[change.clone()]).unwrap();
        let first = client.state["xyz"].internal_search_token;
        client.update(&[change]).unwrap();
        assert_ne!(client.state["xyz"].internal_search_token, first);
    }

    #[test]
    fn test_update_rejects_out_of_range_file() {
        let mut client = client();
        let result = client.update(&[Change { file_id: 4, diff: b"+aaa".to_vec() }]);
        assert!(matches!(result, Err(Error::FileIdOutOfRange(4))));
    }

    #[test]
    fn test_search_query_length_limits() {
        let client = client();
        assert!(matches!(
            client.search(&Query::from("ab")),
            Err(Error::QueryTooShort)
        ));

        let mut narrow = Client::new(
            KEY,
            NONCE,
            Config { max_search_trigrams: 1, ..config() },
        )
        .unwrap();
        narrow
            .update(&[Change { file_id: 0, diff: b"+abc+bcd".to_vec() }])
            .unwrap();
        assert!(matches!(
            narrow.search(&Query::from("abcd")),
            Err(Error::QueryTooLong)
        ));
    }

    #[test]
    fn test_search_with_unknown_trigrams_is_empty() {
        let client = client();
        let token = client.search(&Query::from("never indexed")).unwrap();
        let entries: Vec<crate::messages::SearchTokenEntry> = decode(&token).unwrap();
        assert!(entries.is_empty());
        assert!(client
            .open_result(&Query::from("never indexed"), &token)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_state_roundtrip_preserves_search_tokens() {
        let mut first = client();
        first
            .update(&[Change { file_id: 2, diff: diff_bytes("", "rust crate") }])
            .unwrap();
        let dump = first.state().unwrap();

        let mut second = client();
        second.load_state(&dump).unwrap();
        let query = Query::from("rust");
        assert_eq!(
            first.search(&query).unwrap(),
            second.search(&query).unwrap()
        );
    }

    #[test]
    fn test_load_state_detects_tampering() {
        let mut client = client();
        client
            .update(&[Change { file_id: 0, diff: b"+abc".to_vec() }])
            .unwrap();
        let mut dump = client.state().unwrap();
        let last = dump.len() - 1;
        dump[last] ^= 0x01;
        assert!(matches!(
            client.load_state(&dump),
            Err(Error::CryptoIntegrity)
        ));
    }

    #[test]
    fn test_required_matches_truncates_with_floor_one() {
        let client = client();
        // "hello" has three trigrams; 0.75 * 3 truncates to 2.
        assert_eq!(client.required_matches("hello"), 2);
        let permissive = Client::new(
            KEY,
            NONCE,
            Config { search_threshold: 0.1, ..config() },
        )
        .unwrap();
        assert_eq!(permissive.required_matches("abc"), 1);
    }

    fn diff_bytes(old: &str, new: &str) -> Vec<u8> {
        crate::diff::diff(old, new)
    }
}
