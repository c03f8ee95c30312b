//! Fixed-width arithmetic modulo p = 2^256 + 2^96 - 1.
//!
//! Every residue is encoded big-endian in exactly 33 bytes ([`BLOCK_SIZE`]).
//! The modulus has 257 significant bits, so the top byte of an encoded block
//! carries a single payload bit. All higher-level primitives (AHE, AHMAC,
//! bitset) go through this module and never leave the fixed-width domain.

use crypto_bigint::modular::constant_mod::{Residue, ResidueParams};
use crypto_bigint::{impl_modulus, Encoding, U320};

use crate::error::Error;

/// Byte length of an encoded residue.
pub const BLOCK_SIZE: usize = 33;

impl_modulus!(
    ModulusP,
    U320,
    "00000000000000010000000000000000000000000000000000000000ffffffffffffffffffffffff"
);

pub(crate) type Elem = Residue<ModulusP, { ModulusP::LIMBS }>;

/// Decode a 33-byte big-endian block into a residue.
///
/// Values outside [0, p) are rejected rather than reduced.
pub(crate) fn decode(block: &[u8]) -> Result<Elem, Error> {
    if block.len() != BLOCK_SIZE {
        return Err(Error::ModularDomain("block must be exactly 33 bytes"));
    }
    let mut wide = [0u8; 40];
    wide[40 - BLOCK_SIZE..].copy_from_slice(block);
    let value = U320::from_be_slice(&wide);
    if value >= ModulusP::MODULUS {
        return Err(Error::ModularDomain("block is not a residue modulo p"));
    }
    Ok(Elem::new(&value))
}

/// Encode a residue into a 33-byte big-endian block.
pub(crate) fn encode(x: &Elem, out: &mut [u8]) {
    debug_assert_eq!(out.len(), BLOCK_SIZE);
    let wide = x.retrieve().to_be_bytes();
    out.copy_from_slice(&wide[40 - BLOCK_SIZE..]);
}

/// Draw a uniform residue from a BLAKE3 XOF stream.
///
/// Reads 33 bytes at a time, masks the top byte down to the modulus bit
/// length, and rejects draws that are not below p. The mask-and-reject
/// procedure is part of the protocol: key streams must reproduce it
/// byte-for-byte to interoperate.
pub(crate) fn sample(xof: &mut blake3::OutputReader) -> [u8; BLOCK_SIZE] {
    let mut block = [0u8; BLOCK_SIZE];
    loop {
        xof.fill(&mut block);
        block[0] &= 0x01;
        let mut wide = [0u8; 40];
        wide[40 - BLOCK_SIZE..].copy_from_slice(&block);
        if U320::from_be_slice(&wide) < ModulusP::MODULUS {
            return block;
        }
    }
}
