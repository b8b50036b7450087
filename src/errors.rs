// Copyright (C) 2021 Quentin Kniep <hello@quentinkniep.com>
// Distributed under terms of the MIT license.

//! Errors surfaced while running a Merkle agent.

use thiserror::Error;

/// Failures of the signing engine. The agent is a one-way state machine:
/// any error after the key iterator has advanced means the agent must be
/// discarded, not retried.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LmsError {
    /// The tree height must be at least 2.
    #[error("tree height must be at least 2")]
    InvalidHeight,

    /// All 2^H one-time key pairs of the tree have been consumed.
    #[error("one-time key pairs on the tree are totally used")]
    OutOfKeys,

    /// Malformed bytes handed to a deserializer.
    #[error("malformed encoding: {0}")]
    Serialization(&'static str),

    /// The one-time signature layer rejected its input.
    #[error("one-time signature layer: {0}")]
    Ots(&'static str),
}
