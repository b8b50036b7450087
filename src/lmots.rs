// Copyright (C) 2021 Quentin Kniep <hello@quentinkniep.com>
// Distributed under terms of the MIT license.

//! Leighton-Micali One-Time Signature (LM-OTS) scheme.
//!
//! Winternitz-style chains over a keyed SHA3-256, with the W4/N32 parameter
//! profile. Every hash input is bound to the key pair family identifier `I`
//! and the key index `q`, so chains from different leaves never collide.
//! A key pair must sign at most one message.

use std::fmt;

use rand::RngCore;
use sha3::{Digest, Sha3_256};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::errors::LmsError;

/// Security parameter, hash output size in bytes.
pub const N: usize = 32;

/// Size of the key pair family identifier `I` in bytes.
pub const IDENTIFIER_SIZE: usize = 16;

/// The Winternitz parameter, determining the time-space tradeoff.
pub const W: usize = 16;
pub const LOG2_W: usize = 4;

/// Length of the base `W` representation of an N-byte message digest.
const L1: usize = 8 * N / LOG2_W;

/// Length of the base `W` checksum appended to the digest.
const L2: usize = 3;

/// Total number of function chains, i.e. number of N-byte hashes in a signature.
pub const L: usize = L1 + L2;

/// Left shift applied to the checksum before coefficient extraction.
const LS: usize = 4;

/// 4-byte type identifier of this parameter profile.
pub const TYPECODE: [u8; 4] = [0x00, 0x00, 0x00, 0x03];

/// Domain separation tags bound big-endian into hash inputs.
pub const D_PBLC: u16 = 0x8080;
pub const D_MESG: u16 = 0x8181;
pub const D_LEAF: u16 = 0x8282;
pub const D_INTR: u16 = 0x8383;

/// Options shared by all artifacts of one key pair: the family identifier
/// `I`, the parameter typecode, and the 0-based leaf index of the key.
#[derive(Debug, Clone, PartialEq, Eq, Zeroize)]
pub struct LMOpts {
    pub ident: [u8; IDENTIFIER_SIZE],
    pub typecode: [u8; 4],
    pub key_idx: u32,
}

impl Default for LMOpts {
    fn default() -> Self {
        Self {
            ident: [0u8; IDENTIFIER_SIZE],
            typecode: TYPECODE,
            key_idx: 0,
        }
    }
}

/// LM-OTS public key: the options plus the chain-tip digest `K`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    pub opts: LMOpts,
    pub k: [u8; N],
}

/// LM-OTS private key. Chain heads and the signature randomizer are wiped
/// from memory on drop and never appear in `Debug` output.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct PrivateKey {
    #[zeroize(skip)]
    pub public_key: PublicKey,
    x: Vec<[u8; N]>,
    c: [u8; N],
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("public_key", &self.public_key)
            .field("x", &"<redacted>")
            .field("c", &"<redacted>")
            .finish()
    }
}

/// LM-OTS signature: randomizer `C` plus one partially evaluated chain per
/// message coefficient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sig {
    pub typecode: [u8; 4],
    pub c: [u8; N],
    pub sigma: Vec<[u8; N]>,
}

/// Generates a key pair at the index fixed by `opts.key_idx`, drawing the
/// chain heads and the signature randomizer from `rng` in a fixed order.
pub fn generate_key(opts: &LMOpts, rng: &mut impl RngCore) -> PrivateKey {
    let mut x = Vec::with_capacity(L);
    for _ in 0..L {
        let mut head = [0u8; N];
        rng.fill_bytes(&mut head);
        x.push(head);
    }
    let mut c = [0u8; N];
    rng.fill_bytes(&mut c);

    let mut sha = public_key_hasher(opts);
    for (i, head) in x.iter().enumerate() {
        sha.update(chain(head, i, 0, W - 1, opts));
    }
    let k = sha.finalize().into();

    PrivateKey {
        public_key: PublicKey {
            opts: opts.clone(),
            k,
        },
        x,
        c,
    }
}

/// Signs a message. Deterministic: the randomizer `C` was fixed at key
/// generation, so the same key and message always yield the same bytes.
pub fn sign(sk: &PrivateKey, msg: &[u8]) -> Sig {
    let opts = &sk.public_key.opts;
    let coefs = coefficients(&message_digest(opts, &sk.c, msg));

    let mut sigma = Vec::with_capacity(L);
    for (i, &a) in coefs.iter().enumerate() {
        sigma.push(chain(&sk.x[i], i, 0, a as usize, opts));
    }

    Sig {
        typecode: opts.typecode,
        c: sk.c,
        sigma,
    }
}

/// Recomputes the public key value `K` implied by a signature over `msg`.
/// The caller compares the result against a trusted copy of `K`, or feeds
/// it into the Merkle leaf hash.
pub fn recover_k(opts: &LMOpts, msg: &[u8], sig: &Sig) -> Result<[u8; N], LmsError> {
    if sig.typecode != opts.typecode {
        return Err(LmsError::Ots("typecode mismatch"));
    }
    if sig.sigma.len() != L {
        return Err(LmsError::Ots("wrong number of signature chains"));
    }

    let coefs = coefficients(&message_digest(opts, &sig.c, msg));

    let mut sha = public_key_hasher(opts);
    for (i, &a) in coefs.iter().enumerate() {
        sha.update(chain(&sig.sigma[i], i, a as usize, W - 1, opts));
    }
    Ok(sha.finalize().into())
}

/// Verifies the signature against the full public key.
pub fn verify(pk: &PublicKey, msg: &[u8], sig: &Sig) -> bool {
    match recover_k(&pk.opts, msg, sig) {
        Ok(k) => k.ct_eq(&pk.k).unwrap_u8() == 1,
        Err(_) => false,
    }
}

/// Applies the keyed hash for chain `idx` to `value`, for steps `from..to`.
fn chain(value: &[u8; N], idx: usize, from: usize, to: usize, opts: &LMOpts) -> [u8; N] {
    let mut tmp = *value;
    for j in from..to {
        let mut sha = Sha3_256::new();
        sha.update(opts.ident);
        sha.update(opts.key_idx.to_be_bytes());
        sha.update((idx as u16).to_be_bytes());
        sha.update([j as u8]);
        sha.update(tmp);
        tmp = sha.finalize().into();
    }
    tmp
}

/// Randomized message digest `Q = H(I || q || D_MESG || C || msg)`.
fn message_digest(opts: &LMOpts, c: &[u8; N], msg: &[u8]) -> [u8; N] {
    let mut sha = Sha3_256::new();
    sha.update(opts.ident);
    sha.update(opts.key_idx.to_be_bytes());
    sha.update(D_MESG.to_be_bytes());
    sha.update(c);
    sha.update(msg);
    sha.finalize().into()
}

/// Hasher preloaded with the public key domain `I || q || D_PBLC`.
fn public_key_hasher(opts: &LMOpts) -> Sha3_256 {
    let mut sha = Sha3_256::new();
    sha.update(opts.ident);
    sha.update(opts.key_idx.to_be_bytes());
    sha.update(D_PBLC.to_be_bytes());
    sha
}

/// Splits a digest into `L1` base-16 coefficients and appends the `L2`
/// checksum coefficients of `sum(15 - a_i) << LS`.
fn coefficients(digest: &[u8; N]) -> [u8; L] {
    let mut coefs = [0u8; L];
    for i in 0..L1 {
        coefs[i] = nibble(digest, i);
    }

    let sum: u16 = coefs[..L1].iter().map(|&a| (W - 1) as u16 - a as u16).sum();
    let csum = (sum << LS).to_be_bytes();
    coefs[L1] = csum[0] >> 4;
    coefs[L1 + 1] = csum[0] & 0x0f;
    coefs[L1 + 2] = csum[1] >> 4;

    coefs
}

fn nibble(bytes: &[u8; N], i: usize) -> u8 {
    if i % 2 == 0 {
        bytes[i / 2] >> 4
    } else {
        bytes[i / 2] & 0x0f
    }
}
