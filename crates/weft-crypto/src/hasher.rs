use weft_types::ContentHash;

/// Domain-separated BLAKE3 content hasher.
///
/// Each hasher carries a domain tag (e.g. `"weft-content-v1"`) that is
/// prepended to every hash computation, so a payload and an event with
/// identical bytes never share an address.
pub struct ContentHasher {
    domain: &'static str,
}

impl ContentHasher {
    /// Hasher for stored payloads.
    pub const CONTENT: Self = Self {
        domain: "weft-content-v1",
    };
    /// Hasher for lifecycle event identities.
    pub const EVENT: Self = Self {
        domain: "weft-event-v1",
    };

    /// Hash raw bytes with domain separation.
    pub fn hash(&self, data: &[u8]) -> ContentHash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        hasher.update(data);
        ContentHash::from_hash(*hasher.finalize().as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        let data = b"hello world";
        assert_eq!(
            ContentHasher::CONTENT.hash(data),
            ContentHasher::CONTENT.hash(data)
        );
    }

    #[test]
    fn different_domains_produce_different_hashes() {
        let data = b"same content";
        assert_ne!(
            ContentHasher::CONTENT.hash(data),
            ContentHasher::EVENT.hash(data)
        );
    }

    #[test]
    fn domain_separated_from_plain_blake3() {
        assert_ne!(
            ContentHasher::CONTENT.hash(b"x"),
            ContentHash::from_bytes(b"x")
        );
    }
}
