//! Domain-separated key derivation.
//!
//! Every subkey in the protocol comes from BLAKE3's derive-key mode over a
//! canonicalized context vector prefixed with the protocol label. The
//! canonical form is the LE64 context count followed by an LE64 length and
//! the raw bytes of each context; the top bit of each length's final byte is
//! cleared, capping lengths at 63 bits so the framing stays injective. The
//! derive-key API takes its context as a string, so the canonical bytes are
//! hex-encoded into it.

const PROTOCOL_LABEL: &[u8] = b"emys-sse.org/v1";

/// Derive a 32-byte subkey from `master` and a non-empty context vector.
pub(crate) fn derive_key(master: &[u8], contexts: &[&[u8]]) -> [u8; 32] {
    assert!(
        !contexts.is_empty(),
        "key derivation without context is insecure"
    );
    let canon = canonicalize(contexts);
    blake3::derive_key(&hex::encode(canon), master)
}

fn canonicalize(contexts: &[&[u8]]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + 8 + PROTOCOL_LABEL.len() + 16 * contexts.len());
    buf.extend_from_slice(&le63(contexts.len() as u64 + 1));
    buf.extend_from_slice(&le63(PROTOCOL_LABEL.len() as u64));
    buf.extend_from_slice(PROTOCOL_LABEL);
    for context in contexts {
        buf.extend_from_slice(&le63(context.len() as u64));
        buf.extend_from_slice(context);
    }
    buf
}

fn le63(n: u64) -> [u8; 8] {
    (n & (u64::MAX >> 1)).to_le_bytes()
}

/// The keyed hash pair walking a trigram's update chain: H1 addresses server
/// nodes, H2 pads the masked link to the previous search token.
pub(crate) struct ChainHashes {
    k1: [u8; 32],
    k2: [u8; 32],
}

impl ChainHashes {
    pub(crate) fn new(update_key: &[u8; 32]) -> Self {
        Self {
            k1: derive_key(update_key, &[b"h1"]),
            k2: derive_key(update_key, &[b"h2"]),
        }
    }

    /// H1: the server-side address of the chain node for `ist`.
    pub(crate) fn node_address(&self, ist: &[u8; 32]) -> [u8; 32] {
        *blake3::keyed_hash(&self.k1, ist).as_bytes()
    }

    /// H2: the pad hiding the previous search token behind `ist`.
    pub(crate) fn mask_pad(&self, ist: &[u8; 32]) -> [u8; 32] {
        *blake3::keyed_hash(&self.k2, ist).as_bytes()
    }
}
