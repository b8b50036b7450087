// Copyright (C) 2021 Quentin Kniep <hello@quentinkniep.com>
// Distributed under terms of the MIT license.

//! Binary persistence for signatures and traversal state.
//!
//! The wire format is the external interface: little-endian integers, every
//! variable-length byte string preceded by a 32-bit length, fixed-size
//! fields raw. Deserializers either return a complete value or an error;
//! they never hand back partially populated state, and they reject trailing
//! bytes.

use crate::errors::LmsError;
use crate::lmots::{LMOpts, Sig, IDENTIFIER_SIZE, N};
use crate::merkle::{MerkleAgent, MerkleSig};
use crate::prkg::{KeyIterator, SEED_SIZE};
use crate::stack::Stack;
use crate::treehash::{Node, TreeHashStack};

struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }

    fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn hash(&mut self, value: &[u8; N]) {
        self.u32(N as u32);
        self.raw(value);
    }

    fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], LmsError> {
        if self.buf.len() - self.pos < n {
            return Err(LmsError::Serialization("truncated input"));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u32(&mut self) -> Result<u32, LmsError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn array<const S: usize>(&mut self) -> Result<[u8; S], LmsError> {
        let bytes = self.take(S)?;
        Ok(bytes.try_into().unwrap())
    }

    fn hash(&mut self) -> Result<[u8; N], LmsError> {
        if self.u32()? as usize != N {
            return Err(LmsError::Serialization("unexpected hash length"));
        }
        self.array::<N>()
    }

    fn finish(self) -> Result<(), LmsError> {
        if self.pos != self.buf.len() {
            return Err(LmsError::Serialization("trailing bytes"));
        }
        Ok(())
    }
}

fn write_opts(w: &mut Writer, opts: &LMOpts) {
    w.raw(&opts.ident);
    w.raw(&opts.typecode);
    w.u32(opts.key_idx);
}

fn read_opts(r: &mut Reader) -> Result<LMOpts, LmsError> {
    Ok(LMOpts {
        ident: r.array::<IDENTIFIER_SIZE>()?,
        typecode: r.array::<4>()?,
        key_idx: r.u32()?,
    })
}

fn write_node(w: &mut Writer, node: &Node) {
    w.u32(node.height);
    w.u32(node.index);
    w.hash(&node.nu);
}

fn read_node(r: &mut Reader) -> Result<Node, LmsError> {
    Ok(Node {
        height: r.u32()?,
        index: r.u32()?,
        nu: r.hash()?,
    })
}

fn write_hashes(w: &mut Writer, hashes: &[[u8; N]]) {
    w.u32(hashes.len() as u32);
    for value in hashes {
        w.hash(value);
    }
}

fn read_hashes(r: &mut Reader) -> Result<Vec<[u8; N]>, LmsError> {
    let count = r.u32()?;
    // counts come from untrusted bytes; grow while reading instead of
    // preallocating
    let mut hashes = Vec::new();
    for _ in 0..count {
        hashes.push(r.hash()?);
    }
    Ok(hashes)
}

impl TreeHashStack {
    fn write(&self, w: &mut Writer) {
        w.u32(self.leaf);
        w.u32(self.leaf_upper);
        w.u32(self.height);
        w.u32(self.node_stack.len() as u32);
        for node in self.node_stack.iter() {
            write_node(w, node);
        }
    }

    fn read(r: &mut Reader) -> Result<Self, LmsError> {
        let leaf = r.u32()?;
        let leaf_upper = r.u32()?;
        let height = r.u32()?;
        let count = r.u32()?;

        let mut node_stack = Stack::new();
        for _ in 0..count {
            node_stack.push(read_node(r)?);
        }

        Ok(Self {
            leaf,
            leaf_upper,
            height,
            node_stack,
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut w = Writer::new();
        self.write(&mut w);
        w.into_bytes()
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, LmsError> {
        let mut r = Reader::new(bytes);
        let ths = Self::read(&mut r)?;
        r.finish()?;
        Ok(ths)
    }
}

impl KeyIterator {
    /// Secret state: seed, offset, and the one-time key options. Store
    /// encrypted, and persist durably before releasing any signature made
    /// at the serialized offset.
    pub fn serialize(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.u32(SEED_SIZE as u32);
        w.raw(self.seed());
        w.u32(self.offset);
        write_opts(&mut w, &self.opts);
        w.into_bytes()
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, LmsError> {
        let mut r = Reader::new(bytes);
        if r.u32()? as usize != SEED_SIZE {
            return Err(LmsError::Serialization("unexpected seed length"));
        }
        let seed = r.array::<SEED_SIZE>()?;
        let offset = r.u32()?;
        let opts = read_opts(&mut r)?;
        r.finish()?;
        Ok(Self::from_parts(seed, offset, opts))
    }
}

impl MerkleSig {
    /// Wire layout: `I[16] || typecode[4] || LE32(key_idx) || LE32(N) || C
    /// || sigma || auth`. The one-time signature shares the options'
    /// typecode, so it is written once.
    pub fn serialize(&self) -> Vec<u8> {
        let mut w = Writer::new();
        write_opts(&mut w, &self.opts);
        w.hash(&self.ots_sig.c);
        write_hashes(&mut w, &self.ots_sig.sigma);
        write_hashes(&mut w, &self.auth);
        w.into_bytes()
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, LmsError> {
        let mut r = Reader::new(bytes);
        let opts = read_opts(&mut r)?;
        let c = r.hash()?;
        let sigma = read_hashes(&mut r)?;
        let auth = read_hashes(&mut r)?;
        r.finish()?;
        let ots_sig = Sig {
            typecode: opts.typecode,
            c,
            sigma,
        };
        Ok(Self {
            opts,
            ots_sig,
            auth,
        })
    }
}

impl MerkleAgent {
    /// Public traversal state: height, root, authentication path, leaf
    /// cache, and the tree hash instances. Safe to store in plaintext; the
    /// key iterator is not part of it.
    pub fn serialize(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.u32(self.h);
        w.hash(&self.root);
        write_hashes(&mut w, &self.auth);
        write_hashes(&mut w, &self.leaves);
        w.u32(self.stacks.len() as u32);
        for ths in &self.stacks {
            ths.write(&mut w);
        }
        w.into_bytes()
    }

    /// Secret state; see [`KeyIterator::serialize`] for the storage
    /// obligations.
    pub fn serialize_secret_key(&self) -> Vec<u8> {
        self.prkg.serialize()
    }

    /// Reconstitutes an agent from its public and secret bytes. The rebuilt
    /// agent signs byte-identically to the original from the next leaf on.
    pub fn rebuild(public: &[u8], secret: &[u8]) -> Result<Self, LmsError> {
        let mut r = Reader::new(public);
        let h = r.u32()?;
        let root = r.hash()?;
        let auth = read_hashes(&mut r)?;
        let leaves = read_hashes(&mut r)?;
        let stack_count = r.u32()?;
        let mut stacks = Vec::new();
        for _ in 0..stack_count {
            stacks.push(TreeHashStack::read(&mut r)?);
        }
        r.finish()?;

        if h < 2 || h >= 32 {
            return Err(LmsError::Serialization("implausible tree height"));
        }
        if auth.len() != h as usize
            || stacks.len() != h as usize
            || leaves.len() != 1usize << h
        {
            return Err(LmsError::Serialization("inconsistent agent state"));
        }

        let prkg = KeyIterator::deserialize(secret)?;

        Ok(Self {
            h,
            auth,
            root,
            leaves,
            stacks,
            prkg,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lmots;
    use rand::{thread_rng, Rng, RngCore};

    fn random_hash() -> [u8; N] {
        let mut value = [0u8; N];
        thread_rng().fill_bytes(&mut value);
        value
    }

    fn mock_merkle_sig() -> MerkleSig {
        let mut opts = LMOpts::default();
        thread_rng().fill_bytes(&mut opts.ident);
        opts.key_idx = thread_rng().gen();

        let sk = lmots::generate_key(&opts, &mut thread_rng());
        let ots_sig = lmots::sign(&sk, b"hello lms");

        MerkleSig {
            opts,
            ots_sig,
            auth: (0..16).map(|_| random_hash()).collect(),
        }
    }

    fn mock_tree_hash_stack() -> TreeHashStack {
        let mut rng = thread_rng();
        let leaf = rng.gen::<u32>() % 1024;
        let mut ths = TreeHashStack::new(leaf, rng.gen::<u32>() % 20 + 1);
        for _ in 0..rng.gen::<u32>() % 32 {
            ths.node_stack.push(Node {
                height: rng.gen(),
                index: rng.gen(),
                nu: random_hash(),
            });
        }
        ths
    }

    #[test]
    fn merkle_sig_round_trip() {
        let sig = mock_merkle_sig();
        let bytes = sig.serialize();

        let decoded = MerkleSig::deserialize(&bytes).unwrap();
        assert_eq!(decoded, sig);
        assert_eq!(decoded.serialize(), bytes);
    }

    #[test]
    fn merkle_sig_rejects_malformed_bytes() {
        let sig = mock_merkle_sig();
        let bytes = sig.serialize();

        // truncation
        assert!(matches!(
            MerkleSig::deserialize(&bytes[..bytes.len() - 3]),
            Err(LmsError::Serialization(_))
        ));

        // corrupt the length prefix of C (right after the 24-byte options)
        let mut bad = bytes.clone();
        bad[24] = 0xff;
        assert!(matches!(
            MerkleSig::deserialize(&bad),
            Err(LmsError::Serialization(_))
        ));

        // trailing garbage
        let mut long = bytes.clone();
        long.push(0);
        assert!(matches!(
            MerkleSig::deserialize(&long),
            Err(LmsError::Serialization(_))
        ));
    }

    #[test]
    fn key_iterator_round_trip() {
        let mut prkg = KeyIterator::new([9u8; SEED_SIZE]);
        prkg.next();
        prkg.next();

        let bytes = prkg.serialize();
        let decoded = KeyIterator::deserialize(&bytes).unwrap();
        assert_eq!(decoded, prkg);
        assert_eq!(decoded.serialize(), bytes);
    }

    #[test]
    fn tree_hash_stack_round_trip() {
        for _ in 0..8 {
            let ths = mock_tree_hash_stack();
            let bytes = ths.serialize();
            let decoded = TreeHashStack::deserialize(&bytes).unwrap();
            assert_eq!(decoded, ths);
            assert_eq!(decoded.serialize(), bytes);
        }
    }

    #[test]
    fn rebuilt_agent_matches_original_bytes() {
        let mut agent = MerkleAgent::new(3, [4u8; SEED_SIZE]).unwrap();
        for round in 0..thread_rng().gen::<u32>() % 8 {
            agent.sign(format!("msg {}", round).as_bytes()).unwrap();
        }

        let public = agent.serialize();
        let secret = agent.serialize_secret_key();

        let rebuilt = MerkleAgent::rebuild(&public, &secret).unwrap();
        assert_eq!(rebuilt.serialize(), public);
        assert_eq!(rebuilt.serialize_secret_key(), secret);
        assert_eq!(rebuilt, agent);
    }

    #[test]
    fn rebuilt_agent_continues_signing() {
        // sign once, persist, reload, and the reloaded agent's next
        // signature must verify against the original root
        let mut agent = MerkleAgent::new(4, [21u8; SEED_SIZE]).unwrap();
        let root = agent.root();
        agent.sign(b"first").unwrap();

        let public = agent.serialize();
        let secret = agent.serialize_secret_key();
        let mut reloaded = MerkleAgent::rebuild(&public, &secret).unwrap();

        let signed = reloaded.sign(b"second").unwrap();
        assert_eq!(signed.signature.verify(&root, b"second"), true);
        assert_eq!(reloaded.leaf_idx(), 2);
    }

    #[test]
    fn rebuilt_agent_signs_byte_identically() {
        let seed: [u8; SEED_SIZE] =
            hex::decode("202122232425262728292a2b2c2d2e2f303132333435363738393a3b3c3d3e3f")
                .unwrap()
                .try_into()
                .unwrap();
        let mut original = MerkleAgent::new(4, seed).unwrap();
        for i in 0..7u8 {
            original.sign(&[i; 32]).unwrap();
        }

        let mut rebuilt = MerkleAgent::rebuild(
            &original.serialize(),
            &original.serialize_secret_key(),
        )
        .unwrap();

        let msg = [0xabu8; 32];
        let a = original.sign(&msg).unwrap();
        let b = rebuilt.sign(&msg).unwrap();
        assert_eq!(a.signature, b.signature);
        assert_eq!(a.signature.serialize(), b.signature.serialize());
    }

    #[test]
    fn rebuild_rejects_inconsistent_state() {
        let agent = MerkleAgent::new(3, [1u8; SEED_SIZE]).unwrap();
        let public = agent.serialize();
        let secret = agent.serialize_secret_key();

        assert!(matches!(
            MerkleAgent::rebuild(&public[..public.len() - 1], &secret),
            Err(LmsError::Serialization(_))
        ));
        assert!(matches!(
            MerkleAgent::rebuild(&public, &secret[..4]),
            Err(LmsError::Serialization(_))
        ));

        // a height that disagrees with the serialized arrays
        let mut bad = public.clone();
        bad[0] = 4;
        assert!(matches!(
            MerkleAgent::rebuild(&bad, &secret),
            Err(LmsError::Serialization(_))
        ));
    }
}
