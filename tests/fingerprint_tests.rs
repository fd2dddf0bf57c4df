//! Integration tests for contract fingerprinting
//!
//! Fixtures are JSON syntax trees in the shape produced by
//! `@solidity-parser/parser`.

use solidity_doppelganger::{
    fingerprint, Algorithm, FingerprintOptions, HashMode, HashedContract, SyntaxNode,
};

fn load_fixture(name: &str) -> SyntaxNode {
    let path = format!("tests/fixtures/{}", name);
    let content = std::fs::read_to_string(&path)
        .unwrap_or_else(|_| panic!("Failed to read fixture: {}", path));
    serde_json::from_str(&content).unwrap_or_else(|e| panic!("Invalid AST in {}: {}", path, e))
}

fn hashes(name: &str, mode: HashMode) -> Vec<HashedContract> {
    let options = FingerprintOptions::new(Algorithm::Sha1, [mode]).unwrap();
    fingerprint(&load_fixture(name), &options, Some(name)).unwrap()
}

fn single_hash(name: &str, mode: HashMode) -> String {
    let records = hashes(name, mode);
    assert_eq!(records.len(), 1, "{name} should hold one contract");
    records[0].hash().to_string()
}

/// Two contracts that differ only in names: same structure, different text
#[test]
fn test_pair_structure_equal_exact_different() {
    let options = FingerprintOptions::default();
    let records = fingerprint(&load_fixture("pair.json"), &options, Some("pair.sol")).unwrap();

    // mode outer, contracts in source order
    assert_eq!(records.len(), 4);
    let summary: Vec<(&str, HashMode)> = records
        .iter()
        .map(|r| (r.name(), r.options().mode))
        .collect();
    assert_eq!(
        summary,
        [
            ("A", HashMode::Exact),
            ("B", HashMode::Exact),
            ("A", HashMode::Structure),
            ("B", HashMode::Structure),
        ]
    );

    assert_ne!(records[0].hash(), records[1].hash());
    assert_eq!(records[2].hash(), records[3].hash());
    assert!(records.iter().all(|r| r.path() == Some("pair.sol")));
    assert!(records.iter().all(|r| r.hash().len() == 40));
}

#[test]
fn test_fingerprint_is_deterministic() {
    let first = hashes("vault.json", HashMode::Structure);
    let second = hashes("vault.json", HashMode::Structure);
    assert_eq!(first, second);

    let first = hashes("vault.json", HashMode::Exact);
    let second = hashes("vault.json", HashMode::Exact);
    assert_eq!(first, second);
}

/// Renaming every identifier, reordering declarations and struct members,
/// and changing a require message keeps the structure digest
#[test]
fn test_renamed_and_reordered_vault_matches() {
    assert_eq!(
        single_hash("vault.json", HashMode::Structure),
        single_hash("vault_renamed.json", HashMode::Structure)
    );
    assert_ne!(
        single_hash("vault.json", HashMode::Exact),
        single_hash("vault_renamed.json", HashMode::Exact)
    );
}

#[test]
fn test_changed_type_is_detected() {
    assert_ne!(
        single_hash("vault.json", HashMode::Structure),
        single_hash("vault_retyped.json", HashMode::Structure)
    );
    assert_ne!(
        single_hash("vault.json", HashMode::Exact),
        single_hash("vault_retyped.json", HashMode::Exact)
    );
}

/// Turning `total += value` into `total -= value` changes both digests
#[test]
fn test_changed_body_logic_is_detected() {
    for mode in [HashMode::Exact, HashMode::Structure] {
        assert_ne!(
            single_hash("vault.json", mode),
            single_hash("vault_altered.json", mode),
            "operator change kept the {mode} digest"
        );
    }
}

#[test]
fn test_source_locations_are_ignored() {
    for mode in [HashMode::Exact, HashMode::Structure] {
        assert_eq!(
            single_hash("vault.json", mode),
            single_hash("vault_located.json", mode),
            "locations changed the {mode} digest"
        );
    }
}

#[test]
fn test_contract_model_is_extracted() {
    let records = hashes("vault.json", HashMode::Exact);
    let vault = &records[0];

    assert_eq!(vault.name(), "Vault");
    assert_eq!(vault.functions().len(), 1);
    assert_eq!(vault.state_vars().len(), 2);
    // the struct and the event
    assert_eq!(vault.type_declarations().len(), 2);
    assert!(vault.base_contracts().is_empty());

    let entry = vault.to_entry();
    assert_eq!(entry.name, "Vault");
    assert_eq!(entry.path.as_deref(), Some("vault.json"));
    assert_eq!(entry.options.algorithm, "sha1");
    assert_eq!(entry.options.mode, "AST_EXACT");
}

/// Every algorithm yields a digest of its own width
#[test]
fn test_algorithms_digest_widths() {
    let document = load_fixture("vault.json");
    for (algorithm, width) in [
        (Algorithm::Sha1, 40),
        (Algorithm::Sha256, 64),
        (Algorithm::Sha512, 128),
        (Algorithm::Keccak256, 64),
    ] {
        let options = FingerprintOptions::new(algorithm, [HashMode::Structure]).unwrap();
        let records = fingerprint(&document, &options, None).unwrap();
        assert_eq!(records[0].hash().len(), width, "{algorithm}");
        assert!(records[0].hash().chars().all(|c| c.is_ascii_hexdigit()));
    }
}
