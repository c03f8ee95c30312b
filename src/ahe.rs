//! Additive homomorphic encryption over p.
//!
//! A key is a sequence of uniform residues; encryption adds the key to the
//! plaintext block by block, so ciphertexts under independent keys can be
//! summed and opened with the sum of the keys. With a fresh key per message
//! this is a one-time pad.

use crate::error::Error;
use crate::modp;

/// Byte length of one key, plaintext, or ciphertext block.
pub const BLOCK_SIZE: usize = modp::BLOCK_SIZE;

/// Deterministically expand a seed into `blocks` uniform residues.
pub fn key_from_seed(seed: &[u8; 32], blocks: u64) -> Vec<u8> {
    let mut hasher = blake3::Hasher::new();
    hasher.update(seed);
    let mut xof = hasher.finalize_xof();
    let mut key = Vec::with_capacity(BLOCK_SIZE * blocks as usize);
    for _ in 0..blocks {
        key.extend_from_slice(&modp::sample(&mut xof));
    }
    key
}

/// Encrypt a block-aligned plaintext: c_i = (p_i + k_i) mod p.
pub fn encrypt(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, Error> {
    let blocks = matched_blocks(key, plaintext)?;
    let mut ciphertext = vec![0u8; plaintext.len()];
    for i in 0..blocks {
        let range = i * BLOCK_SIZE..(i + 1) * BLOCK_SIZE;
        let k = modp::decode(&key[range.clone()])?;
        let p = modp::decode(&plaintext[range.clone()])?;
        modp::encode(&(p + k), &mut ciphertext[range]);
    }
    Ok(ciphertext)
}

/// Decrypt a block-aligned ciphertext: p_i = (c_i - k_i) mod p.
pub fn decrypt(key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
    let blocks = matched_blocks(key, ciphertext)?;
    let mut plaintext = vec![0u8; ciphertext.len()];
    for i in 0..blocks {
        let range = i * BLOCK_SIZE..(i + 1) * BLOCK_SIZE;
        let k = modp::decode(&key[range.clone()])?;
        let c = modp::decode(&ciphertext[range.clone()])?;
        modp::encode(&(c - k), &mut plaintext[range]);
    }
    Ok(plaintext)
}

/// Add `src` into `dst` block by block. Works on ciphertexts and keys alike.
pub fn add(dst: &mut [u8], src: &[u8]) -> Result<(), Error> {
    let blocks = matched_blocks(dst, src)?;
    for i in 0..blocks {
        let range = i * BLOCK_SIZE..(i + 1) * BLOCK_SIZE;
        let out = modp::decode(&dst[range.clone()])?;
        let inp = modp::decode(&src[range.clone()])?;
        modp::encode(&(out + inp), &mut dst[range]);
    }
    Ok(())
}

fn matched_blocks(a: &[u8], b: &[u8]) -> Result<usize, Error> {
    if a.len() != b.len() {
        return Err(Error::ModularDomain("buffers have different lengths"));
    }
    if a.len() % BLOCK_SIZE != 0 {
        return Err(Error::ModularDomain(
            "buffer is not a multiple of the block size",
        ));
    }
    Ok(a.len() / BLOCK_SIZE)
}
