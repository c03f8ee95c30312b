//! Homomorphic one-time MAC over p.
//!
//! The tag is a polynomial evaluation: t = sum_i m_i * ik^(n-i) + ak. The
//! integrity key `ik` is long-lived per client while the authentication key
//! `ak` is fresh per message, so tags over equal-length messages under the
//! same integrity key add up to the tag of the summed message under the
//! summed authentication keys.

use crate::error::Error;
use crate::modp;
use crate::modp::Elem;

/// Byte length of keys and tags.
pub const SIZE: usize = modp::BLOCK_SIZE;

/// Draw a single uniform residue from a 32-byte seed.
pub fn uniform_key(seed: &[u8; 32]) -> [u8; SIZE] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(seed);
    let mut xof = hasher.finalize_xof();
    modp::sample(&mut xof)
}

/// Compute the tag of a block-aligned message.
pub fn mac(ikey: &[u8], akey: &[u8], message: &[u8]) -> Result<[u8; SIZE], Error> {
    if ikey.len() != SIZE {
        return Err(Error::ModularDomain(
            "integrity key must be exactly 33 bytes",
        ));
    }
    if akey.len() != SIZE {
        return Err(Error::ModularDomain(
            "authentication key must be exactly 33 bytes",
        ));
    }
    if message.len() % SIZE != 0 {
        return Err(Error::ModularDomain(
            "message is not a multiple of the block size",
        ));
    }
    let ik = modp::decode(ikey)?;
    let ak = modp::decode(akey)?;
    let mut t = Elem::ZERO;
    for block in message.chunks(SIZE) {
        let m = modp::decode(block)?;
        t = (t + m) * ik;
    }
    t = t + ak;
    let mut tag = [0u8; SIZE];
    modp::encode(&t, &mut tag);
    Ok(tag)
}

/// Add `src` into `dst`, both single residues.
pub fn add(dst: &mut [u8], src: &[u8]) -> Result<(), Error> {
    if dst.len() != SIZE || src.len() != SIZE {
        return Err(Error::ModularDomain("tag must be exactly 33 bytes"));
    }
    let out = modp::decode(dst)?;
    let inp = modp::decode(src)?;
    modp::encode(&(out + inp), dst);
    Ok(())
}
