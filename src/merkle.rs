// Copyright (C) 2021 Quentin Kniep <hello@quentinkniep.com>
// Distributed under terms of the MIT license.

//! Merkle signature engine over LM-OTS one-time keys.
//!
//! A `MerkleAgent` owns a tree of 2^H one-time key pairs whose public key
//! hashes form the leaves of a binary hash tree; the root is the long-lived
//! public key. Signing consumes one leaf and then advances H interleaved
//! tree hash instances, so the authentication path for the next leaf is
//! always ready without ever rebuilding the tree.

use sha3::{Digest, Sha3_256};
use subtle::ConstantTimeEq;
use tracing::{debug, trace, warn};

use crate::errors::LmsError;
use crate::lmots::{self, LMOpts, PrivateKey, PublicKey, D_LEAF, N};
use crate::prkg::{KeyIterator, SEED_SIZE};
use crate::treehash::{merge, TreeHashStack};

/// Stateful signer for one tree of 2^H one-time keys.
///
/// Single-writer: `sign` takes `&mut self` and is the only mutator, so the
/// borrow checker enforces the no-concurrent-signing rule. Verification
/// needs only the root and is freely shareable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleAgent {
    pub(crate) h: u32,
    /// `auth[i]` is the level-i sibling hash authenticating the current leaf.
    pub(crate) auth: Vec<[u8; N]>,
    pub(crate) root: [u8; N],
    /// All 2^H leaf hashes, precomputed at setup.
    pub(crate) leaves: Vec<[u8; N]>,
    /// Instance i precomputes the next value of `auth[i]`.
    pub(crate) stacks: Vec<TreeHashStack>,
    pub(crate) prkg: KeyIterator,
}

/// A Merkle signature: the key pair options of the consumed leaf, the
/// one-time signature, and the authentication path up to the root. The
/// one-time public key is not stored; verification recovers it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleSig {
    pub opts: LMOpts,
    pub ots_sig: lmots::Sig,
    pub auth: Vec<[u8; N]>,
}

/// Result of one signing operation.
#[derive(Debug)]
pub struct Signed {
    /// The consumed one-time key; callers may discard it.
    pub private_key: PrivateKey,
    pub signature: MerkleSig,
    /// Set on the final signature the tree can produce. That signature is
    /// valid; the next `sign` fails with `OutOfKeys`.
    pub last: bool,
}

/// Leaf hash binding a one-time public key into the tree:
/// `H(I || BE32(key_idx + 2^H) || BE16(D_LEAF) || typecode || I || BE32(key_idx) || K)`.
pub fn leaf_hash(pk: &PublicKey, tree_height: u32) -> [u8; N] {
    let node_idx = pk.opts.key_idx + (1u32 << tree_height);
    let mut sha = Sha3_256::new();
    sha.update(pk.opts.ident);
    sha.update(node_idx.to_be_bytes());
    sha.update(D_LEAF.to_be_bytes());
    sha.update(pk.opts.typecode);
    sha.update(pk.opts.ident);
    sha.update(pk.opts.key_idx.to_be_bytes());
    sha.update(pk.k);
    sha.finalize().into()
}

/// Gets a high-entropy master seed from the OS.
pub fn random_seed() -> Result<[u8; SEED_SIZE], getrandom::Error> {
    let mut buf = [0u8; SEED_SIZE];
    getrandom::getrandom(&mut buf)?;
    Ok(buf)
}

impl MerkleAgent {
    /// Builds an agent of height `h` from a master seed: derives all 2^h
    /// leaves, computes the root and the initial authentication path in a
    /// single left-to-right tree hash pass, and seeds the per-level tree
    /// hash instances along the way. The key iterator is rewound to leaf 0
    /// afterwards, since setup consumed every key once.
    pub fn new(h: u32, seed: [u8; SEED_SIZE]) -> Result<Self, LmsError> {
        if h < 2 {
            return Err(LmsError::InvalidHeight);
        }

        let mut prkg = KeyIterator::new(seed);
        let snapshot = prkg.serialize();

        let num_leaf = 1u32 << h;
        let mut leaves = Vec::with_capacity(num_leaf as usize);
        for _ in 0..num_leaf {
            let sk = prkg.next();
            leaves.push(leaf_hash(&sk.public_key, h));
        }

        let ident = prkg.opts.ident;
        let mut scratch = TreeHashStack::new(0, h);
        let mut stacks = Vec::with_capacity(h as usize);
        let mut auth = Vec::with_capacity(h as usize);

        for level in 0..h {
            scratch.update(1, &ident, &leaves);
            let mut ths = TreeHashStack::new(0, level);
            ths.node_stack.push(
                scratch
                    .top()
                    .expect("scratch stack holds a node after every update")
                    .clone(),
            );
            // the seeded instance already holds the height-`level` subtree
            // over the leftmost leaves; mark it completed
            ths.set_leaf(1 << level);
            stacks.push(ths);

            scratch.update((1 << (level + 1)) - 1, &ident, &leaves);
            auth.push(
                scratch
                    .top()
                    .expect("scratch stack holds a node after every update")
                    .nu,
            );
        }

        scratch.update(1, &ident, &leaves);
        let root = scratch
            .top()
            .expect("scratch stack holds the root after the full pass")
            .nu;

        // rewind to leaf 0: setup consumed all 2^h keys building the leaves
        let prkg = KeyIterator::deserialize(&snapshot)?;

        debug!(height = h, "merkle agent initialized");

        Ok(Self {
            h,
            auth,
            root,
            leaves,
            stacks,
            prkg,
        })
    }

    /// Signs a message with the next unused leaf.
    ///
    /// On success the agent has already advanced to the following leaf. A
    /// signature must not be released before the serialized secret state
    /// reflecting it has been durably persisted, or a crash could reuse a
    /// one-time key.
    pub fn sign(&mut self, msg: &[u8]) -> Result<Signed, LmsError> {
        if self.exhausted() {
            return Err(LmsError::OutOfKeys);
        }

        let leaf_idx = self.prkg.offset();
        let sk = self.prkg.next();
        let ots_sig = lmots::sign(&sk, msg);

        let signature = MerkleSig {
            opts: sk.public_key.opts.clone(),
            ots_sig,
            auth: self.auth.clone(),
        };

        self.traverse();

        let last = self.exhausted();
        trace!(leaf = leaf_idx, last, "produced signature");
        if last {
            warn!("final one-time key consumed; the next sign will fail");
        }

        Ok(Signed {
            private_key: sk,
            signature,
            last,
        })
    }

    /// The tree root authenticating every signature of this agent.
    pub fn root(&self) -> [u8; N] {
        self.root
    }

    /// 0-based index of the next leaf to sign with.
    pub fn leaf_idx(&self) -> u32 {
        self.prkg.offset()
    }

    /// True once all 2^H one-time keys have been consumed.
    pub fn exhausted(&self) -> bool {
        self.prkg.offset() >= (1u32 << self.h)
    }

    /// Advances the traversal state so `auth` describes the next leaf.
    fn traverse(&mut self) {
        self.refresh_auth();
        self.refresh_stacks();
    }

    /// Swaps in the precomputed sibling for every level whose subtree
    /// boundary the new leaf index crosses, and retargets the drained
    /// instance at the following sibling range.
    fn refresh_auth(&mut self) {
        let next = self.prkg.offset();
        for level in 0..self.h {
            let pow = 1u32 << level;
            if next % pow == 0 {
                let i = level as usize;
                let nu = self.stacks[i]
                    .top()
                    .expect("tree hash instance incomplete at its consumption point")
                    .nu;
                self.auth[i] = nu;
                self.stacks[i].init((next + pow) ^ pow, level);
            }
        }
    }

    /// Distributes 2H - 1 update steps across the instances, always feeding
    /// the one with the lowest tail (ties to the lowest level). Completed
    /// instances report `u32::MAX` and are never selected.
    fn refresh_stacks(&mut self) {
        let num_op = 2 * self.h - 1;
        let ident = self.prkg.opts.ident;

        for _ in 0..num_op {
            let mut focus = None;
            let mut min_tail = u32::MAX;
            for (i, ths) in self.stacks.iter().enumerate() {
                let tail = ths.lowest_tail_height();
                if tail < min_tail {
                    min_tail = tail;
                    focus = Some(i);
                }
            }

            match focus {
                Some(i) => self.stacks[i].update(1, &ident, &self.leaves),
                None => break,
            }
        }
    }
}

impl MerkleSig {
    /// Verifies the signature against a tree root. Stateless; recovers the
    /// one-time public key from the signature and folds the authentication
    /// path up to the root.
    pub fn verify(&self, root: &[u8; N], msg: &[u8]) -> bool {
        let height = self.auth.len() as u32;
        if height >= 32 || self.opts.key_idx >= (1u32 << height) {
            return false;
        }

        let k = match lmots::recover_k(&self.opts, msg, &self.ots_sig) {
            Ok(k) => k,
            Err(_) => return false,
        };
        let pk = PublicKey {
            opts: self.opts.clone(),
            k,
        };

        let mut parent = leaf_hash(&pk, height);
        let mut idx = self.opts.key_idx + (1u32 << height);
        for sibling in &self.auth {
            parent = if idx % 2 == 1 {
                merge(&self.opts.ident, idx / 2, sibling, &parent)
            } else {
                merge(&self.opts.ident, idx / 2, &parent, sibling)
            };
            idx /= 2;
        }

        parent.ct_eq(root).unwrap_u8() == 1
    }
}
