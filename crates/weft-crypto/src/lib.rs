//! Hashing primitives for Weft.
//!
//! Provides domain-separated BLAKE3 hashing for content addressing and
//! event identity. All crypto operations wrap established libraries.

pub mod hasher;

pub use hasher::ContentHasher;
