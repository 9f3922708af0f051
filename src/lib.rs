//! `fastsum` computes a two-level SHA-256 digest for every file on the
//! command line, expanding directories recursively.
//!
//! Each file is split into 16 KiB blocks; every block is hashed
//! independently on a pool of hashing threads, and the concatenation of
//! the block digests is hashed once more to yield the file digest. This is
//! deliberately not the whole-file SHA-256: the digest is specific to the
//! block layout, and reproducible whenever the same block size is used.

pub mod cli;
pub mod errors;
pub mod output;
pub mod pipeline;
