// Copyright (C) 2021 Quentin Kniep <hello@quentinkniep.com>
// Distributed under terms of the MIT license.

//! Stateful Leighton-Micali (LMS) hash-based signatures.
//!
//! A tree of height H authenticates 2^H one-time LM-OTS key pairs under a
//! single 32-byte root. The agent keeps the next authentication path ready
//! with the log-space tree traversal algorithm, so each signature costs a
//! bounded number of hash operations instead of a tree rebuild.
//!
//! ```
//! use lms::{random_seed, MerkleAgent};
//!
//! let seed = random_seed().unwrap();
//! let mut agent = MerkleAgent::new(4, seed).unwrap();
//! let root = agent.root();
//!
//! let signed = agent.sign(b"attack at dawn").unwrap();
//! assert!(signed.signature.verify(&root, b"attack at dawn"));
//! ```
//!
//! Signing mutates the agent; a one-time key must never be reused. Persist
//! the secret state (`serialize_secret_key`) durably before releasing a
//! signature, and rebuild with [`MerkleAgent::rebuild`].

pub mod errors;
pub mod lmots;
pub mod merkle;
pub mod prkg;
pub mod stack;
pub mod treehash;

mod encoding;

pub use errors::LmsError;
pub use merkle::{leaf_hash, random_seed, MerkleAgent, MerkleSig, Signed};
pub use prkg::{KeyIterator, SEED_SIZE};
