// Copyright (C) 2021 Quentin Kniep <hello@quentinkniep.com>
// Distributed under terms of the MIT license.

//! Pseudo-random key generator: a resumable iterator over the one-time key
//! pairs of a tree, driven entirely by a 32-byte master seed.

use std::fmt;

use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use sha3::{Digest, Sha3_256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::lmots::{self, LMOpts, PrivateKey, IDENTIFIER_SIZE, N};

/// Size of the master seed in bytes.
pub const SEED_SIZE: usize = N;

/// Tags extending the LM-OTS domain space for seed-derived values.
const D_IDNT: u16 = 0x8484;
const D_SKEY: u16 = 0x8585;

/// Yields the i-th one-time private key of a key pair family. The i-th key
/// is a pure function of `(seed, I, i)`, so an iterator can be resumed from
/// its serialized `(seed, offset, opts)` triple alone. The seed is wiped on
/// drop and never appears in `Debug` output.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct KeyIterator {
    seed: [u8; SEED_SIZE],
    /// 0-based index of the next key to emit.
    pub(crate) offset: u32,
    pub(crate) opts: LMOpts,
}

impl fmt::Debug for KeyIterator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyIterator")
            .field("seed", &"<redacted>")
            .field("offset", &self.offset)
            .field("opts", &self.opts)
            .finish()
    }
}

impl KeyIterator {
    /// Creates an iterator at offset 0. The 16-byte family identifier `I`
    /// is derived from the seed, so it survives a rebuild from seed alone.
    pub fn new(seed: [u8; SEED_SIZE]) -> Self {
        let opts = LMOpts {
            ident: derive_ident(&seed),
            ..LMOpts::default()
        };
        Self {
            seed,
            offset: 0,
            opts,
        }
    }

    /// Emits the next private key and advances the offset.
    pub fn next(&mut self) -> PrivateKey {
        self.opts.key_idx = self.offset;
        let mut rng = ChaCha20Rng::from_seed(key_seed(&self.seed, self.offset));
        let sk = lmots::generate_key(&self.opts, &mut rng);
        self.offset += 1;
        sk
    }

    /// 0-based index of the next key returned by this iterator.
    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub(crate) fn from_parts(seed: [u8; SEED_SIZE], offset: u32, opts: LMOpts) -> Self {
        Self { seed, offset, opts }
    }

    pub(crate) fn seed(&self) -> &[u8; SEED_SIZE] {
        &self.seed
    }
}

fn derive_ident(seed: &[u8; SEED_SIZE]) -> [u8; IDENTIFIER_SIZE] {
    let mut sha = Sha3_256::new();
    sha.update(D_IDNT.to_be_bytes());
    sha.update(seed);
    let digest = sha.finalize();

    let mut ident = [0u8; IDENTIFIER_SIZE];
    ident.copy_from_slice(&digest[..IDENTIFIER_SIZE]);
    ident
}

/// Expands the master seed into the 32-byte generator seed for key `idx`.
fn key_seed(seed: &[u8; SEED_SIZE], idx: u32) -> [u8; 32] {
    let mut sha = Sha3_256::new();
    sha.update(D_SKEY.to_be_bytes());
    sha.update(idx.to_be_bytes());
    sha.update(seed);
    sha.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_offsets() {
        let mut prkg = KeyIterator::new([0u8; SEED_SIZE]);
        assert_eq!(prkg.offset(), 0);

        let sk = prkg.next();
        assert_eq!(sk.public_key.opts.key_idx, 0);
        assert_eq!(prkg.offset(), 1);

        let sk = prkg.next();
        assert_eq!(sk.public_key.opts.key_idx, 1);
        assert_eq!(prkg.offset(), 2);
    }

    #[test]
    fn keys_are_pure_functions_of_seed_and_index() {
        let mut a = KeyIterator::new([42u8; SEED_SIZE]);
        let mut b = KeyIterator::new([42u8; SEED_SIZE]);

        for _ in 0..4 {
            assert_eq!(a.next(), b.next());
        }

        let mut c = KeyIterator::new([43u8; SEED_SIZE]);
        assert_ne!(a.next(), c.next());
    }

    #[test]
    fn ident_is_stable_and_seed_bound() {
        let a = KeyIterator::new([1u8; SEED_SIZE]);
        let b = KeyIterator::new([1u8; SEED_SIZE]);
        let c = KeyIterator::new([2u8; SEED_SIZE]);
        assert_eq!(a.opts.ident, b.opts.ident);
        assert_ne!(a.opts.ident, c.opts.ident);
    }

    #[test]
    fn resumes_from_serialized_state() {
        let mut prkg = KeyIterator::new([7u8; SEED_SIZE]);
        prkg.next();

        let bytes = prkg.serialize();
        let mut resumed = KeyIterator::deserialize(&bytes).unwrap();
        assert_eq!(resumed.serialize(), bytes);

        for _ in 0..3 {
            assert_eq!(prkg.next(), resumed.next());
        }
    }
}
