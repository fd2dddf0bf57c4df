//! Canonical node encoding and digesting
//!
//! A node is encoded as compact JSON whose keys are written in lexicographic
//! order, no matter in which order the parser produced them.
//! The encoding is prefixed with [`ENCODING_VERSION`] so corpora built under a
//! different layout can never silently match.

use std::fmt;
use std::str::FromStr;

use alloy::primitives::keccak256;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};

use crate::ast::SyntaxNode;
use crate::fingerprint::FingerprintError;

/// Version of the canonical encoding layout
pub const ENCODING_VERSION: u32 = 1;

/// Digest function applied to a canonical encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    /// SHA-1, 160-bit
    #[default]
    Sha1,
    Sha256,
    Sha512,
    /// Ethereum's Keccak-256
    Keccak256,
}

impl Algorithm {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
            Self::Keccak256 => "keccak256",
        }
    }

    /// Hex digest of `bytes`
    pub fn digest(&self, bytes: &[u8]) -> String {
        match self {
            Self::Sha1 => hex::encode(Sha1::digest(bytes)),
            Self::Sha256 => hex::encode(Sha256::digest(bytes)),
            Self::Sha512 => hex::encode(Sha512::digest(bytes)),
            Self::Keccak256 => hex::encode(keccak256(bytes)),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Algorithm {
    type Err = FingerprintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sha1" => Ok(Self::Sha1),
            "sha256" => Ok(Self::Sha256),
            "sha512" => Ok(Self::Sha512),
            "keccak256" => Ok(Self::Keccak256),
            _ => Err(FingerprintError::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

/// What a fingerprint is sensitive to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HashMode {
    /// The contract as parsed: names, order and literal text all count
    #[serde(rename = "AST_EXACT")]
    Exact,
    /// Identifier names and declaration order erased
    #[serde(rename = "AST_STRUCTURE")]
    Structure,
}

/// Both modes, in the order records are produced
pub const HASH_MODES: [HashMode; 2] = [HashMode::Exact, HashMode::Structure];

impl HashMode {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Exact => "AST_EXACT",
            Self::Structure => "AST_STRUCTURE",
        }
    }
}

impl fmt::Display for HashMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashMode {
    type Err = FingerprintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "AST_EXACT" => Ok(Self::Exact),
            "AST_STRUCTURE" => Ok(Self::Structure),
            _ => Err(FingerprintError::UnsupportedMode(s.to_string())),
        }
    }
}

/// Options a single fingerprint was computed with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HashOptions {
    pub algorithm: Algorithm,
    pub mode: HashMode,
}

impl HashOptions {
    pub fn new(algorithm: Algorithm, mode: HashMode) -> Self {
        Self { algorithm, mode }
    }
}

/// Hex digest of a node's canonical encoding
pub fn digest_node(node: &SyntaxNode, algorithm: Algorithm) -> String {
    algorithm.digest(&encode_node(node, None))
}

/// Like [`digest_node`], with the children under `field` already reduced to
/// `digests`
pub fn digest_node_with(
    node: &SyntaxNode,
    field: &str,
    digests: &[String],
    algorithm: Algorithm,
) -> String {
    algorithm.digest(&encode_node(node, Some((field, digests))))
}

/// Canonical byte encoding of a node: the version prefix followed by the
/// node's compact JSON form. With `replace`, the children under that field
/// are written as the given digest list.
pub fn encode_node(node: &SyntaxNode, replace: Option<(&str, &[String])>) -> Vec<u8> {
    let mut value = node.to_json();
    if let (Some((field, digests)), Value::Object(object)) = (replace, &mut value) {
        if let Some(slot) = object.get_mut(field) {
            *slot = Value::from(digests.to_vec());
        }
    }
    format!("v{ENCODING_VERSION}:{value}").into_bytes()
}
