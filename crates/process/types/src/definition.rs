//! Process definitions: immutable, versioned, checksummed graphs
//!
//! A definition pairs the raw source bytes it was registered from with the
//! parsed [`ProcessGraph`]. The checksum is a pure function of the raw bytes,
//! which is what lets a restored engine prove it is running the same process.

use sha2::{Digest, Sha256};

use crate::{ElementId, Element, ProcessGraph, ProcessKey};

// ── Checksum ─────────────────────────────────────────────────────────

/// SHA-256 digest of a definition's raw bytes
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Checksum(pub [u8; 32]);

impl Checksum {
    /// Digest the given bytes
    pub fn of(raw: &[u8]) -> Self {
        Self(Sha256::digest(raw).into())
    }

    /// 64 lowercase hex characters
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a 64-character hex digest
    pub fn from_hex(text: &str) -> Option<Self> {
        let bytes = hex::decode(text).ok()?;
        let array: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(array))
    }
}

impl std::fmt::Debug for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Checksum({})", self.to_hex())
    }
}

impl std::fmt::Display for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

// ── Process Definition ───────────────────────────────────────────────

/// A registered version of a process
#[derive(Clone, Debug, PartialEq)]
pub struct ProcessDefinition {
    /// Process identifier shared by all versions
    pub process_id: String,
    /// Engine-wide unique version key
    pub process_key: ProcessKey,
    /// Per-identifier version number, starting at 1
    pub version: u32,
    /// Where the definition came from, if known
    pub resource_name: Option<String>,
    /// Digest of `raw`
    pub checksum: Checksum,
    /// Source bytes exactly as registered
    pub raw: Vec<u8>,
    /// Parsed element graph
    pub graph: ProcessGraph,
}

impl ProcessDefinition {
    pub fn new(
        process_key: ProcessKey,
        version: u32,
        raw: Vec<u8>,
        resource_name: Option<String>,
        graph: ProcessGraph,
    ) -> Self {
        Self {
            process_id: graph.process_id.clone(),
            process_key,
            version,
            resource_name,
            checksum: Checksum::of(&raw),
            raw,
            graph,
        }
    }

    pub fn element(&self, id: &ElementId) -> Option<&Element> {
        self.graph.element(id)
    }

    /// Whether the stored checksum still matches the raw bytes
    pub fn verify(&self) -> bool {
        Checksum::of(&self.raw) == self.checksum
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_hex_round_trip() {
        let checksum = Checksum::of(b"hello");
        let hex = checksum.to_hex();
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
        assert_eq!(Checksum::from_hex(&hex), Some(checksum));
        assert_eq!(
            hex,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_checksum_rejects_bad_hex() {
        assert_eq!(Checksum::from_hex("zz"), None);
        assert_eq!(Checksum::from_hex("abcd"), None);
    }

    #[test]
    fn test_definition_verifies_raw_bytes() {
        let graph = ProcessGraph::new("order")
            .with_element(Element::start("start"))
            .with_element(Element::end("end"));
        let mut definition =
            ProcessDefinition::new(ProcessKey(1), 1, b"raw".to_vec(), None, graph);
        assert_eq!(definition.process_id, "order");
        assert!(definition.verify());

        definition.raw.push(b'!');
        assert!(!definition.verify());
    }
}
