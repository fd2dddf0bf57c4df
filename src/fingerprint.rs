//! Contract fingerprinting
//!
//! Turns every contract of a parsed document into one [`HashedContract`] per
//! requested [`HashMode`]. EXACT hashes the contract as parsed; STRUCTURE
//! hashes its canonical form (see [`crate::normalize`]).

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::ast::{AstError, ContractDefinition, ContractKind, SyntaxNode};
use crate::database::DatabaseEntry;
use crate::hash::{self, Algorithm, HashMode, HashOptions, HASH_MODES};
use crate::normalize::{self, NormalizeError};

/// Errors that can occur during fingerprinting
#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("invalid input: {0}")]
    InvalidTree(#[from] AstError),

    #[error("invalid input: expected a SourceUnit or ContractDefinition, got {0}")]
    InvalidInput(String),

    #[error("normalization invariant violated: {0}")]
    NormalizationInvariantViolation(#[source] NormalizeError),

    #[error("unsupported hash mode `{0}` (expected AST_EXACT or AST_STRUCTURE)")]
    UnsupportedMode(String),

    #[error("unsupported hash algorithm `{0}`")]
    UnsupportedAlgorithm(String),

    #[error("at least one hash mode is required")]
    NoModes,
}

impl From<NormalizeError> for FingerprintError {
    fn from(err: NormalizeError) -> Self {
        match err {
            NormalizeError::NotAContract(kind) => Self::InvalidInput(kind),
            other => Self::NormalizationInvariantViolation(other),
        }
    }
}

/// Algorithm plus the non-empty set of modes to fingerprint with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintOptions {
    algorithm: Algorithm,
    modes: Vec<HashMode>,
}

impl Default for FingerprintOptions {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::default(),
            modes: HASH_MODES.to_vec(),
        }
    }
}

impl FingerprintOptions {
    /// Duplicate modes are collapsed, keeping first occurrence order
    pub fn new(
        algorithm: Algorithm,
        modes: impl IntoIterator<Item = HashMode>,
    ) -> Result<Self, FingerprintError> {
        let mut unique = Vec::new();
        for mode in modes {
            if !unique.contains(&mode) {
                unique.push(mode);
            }
        }
        if unique.is_empty() {
            return Err(FingerprintError::NoModes);
        }
        Ok(Self {
            algorithm,
            modes: unique,
        })
    }

    /// Parse a comma separated list such as `AST_EXACT,AST_STRUCTURE`
    pub fn parse_modes(list: &str) -> Result<Vec<HashMode>, FingerprintError> {
        list.split(',')
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::parse)
            .collect()
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn modes(&self) -> &[HashMode] {
        &self.modes
    }
}

/// A base contract as named in the inheritance list
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BaseContract {
    pub name: String,
    pub arguments: Vec<SyntaxNode>,
}

/// A contract's declarations, partitioned for reporting
#[derive(Debug, Clone, PartialEq)]
pub struct ContractModel {
    pub name: String,
    pub kind: ContractKind,
    pub base_contracts: Vec<BaseContract>,
    /// Structs, events, enums, using-for and anything else
    pub type_declarations: Vec<SyntaxNode>,
    pub state_vars: Vec<SyntaxNode>,
    /// Functions and modifiers
    pub functions: Vec<SyntaxNode>,
}

impl ContractModel {
    pub fn extract(contract: &ContractDefinition) -> Self {
        let base_contracts = contract
            .base_contracts
            .iter()
            .filter_map(|base| match base {
                SyntaxNode::InheritanceSpecifier(spec) => Some(BaseContract {
                    name: match spec.base_name.as_ref() {
                        SyntaxNode::UserDefinedTypeName(ty) => ty.name_path.clone(),
                        _ => String::new(),
                    },
                    arguments: spec.arguments.clone(),
                }),
                _ => None,
            })
            .collect();

        let mut model = Self {
            name: contract.name.clone(),
            kind: contract.kind,
            base_contracts,
            type_declarations: Vec::new(),
            state_vars: Vec::new(),
            functions: Vec::new(),
        };
        for node in &contract.sub_nodes {
            match node {
                SyntaxNode::FunctionDefinition(_) | SyntaxNode::ModifierDefinition(_) => {
                    model.functions.push(node.clone())
                }
                SyntaxNode::StateVariableDeclaration(_) => model.state_vars.push(node.clone()),
                _ => model.type_declarations.push(node.clone()),
            }
        }
        model
    }
}

/// Fingerprint of one contract under one mode
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HashedContract {
    name: String,
    kind: ContractKind,
    base_contracts: Vec<BaseContract>,
    type_declarations: Vec<SyntaxNode>,
    state_vars: Vec<SyntaxNode>,
    functions: Vec<SyntaxNode>,
    hash: String,
    options: HashOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
}

impl HashedContract {
    /// Fingerprint a single `ContractDefinition` node
    pub fn from_ast(
        node: &SyntaxNode,
        options: HashOptions,
        path: Option<&str>,
    ) -> Result<Self, FingerprintError> {
        let SyntaxNode::ContractDefinition(contract) = node else {
            return Err(FingerprintError::InvalidInput(node.kind_name().to_string()));
        };

        let hash = match options.mode {
            HashMode::Exact => hash::digest_node(node, options.algorithm),
            HashMode::Structure => normalize::canonicalize(node.clone(), options.algorithm)?.digest(),
        };
        let model = ContractModel::extract(contract);

        debug!(
            contract = %model.name,
            mode = %options.mode,
            algorithm = %options.algorithm,
            hash = %hash,
            "hashed_contract"
        );

        Ok(Self {
            name: model.name,
            kind: model.kind,
            base_contracts: model.base_contracts,
            type_declarations: model.type_declarations,
            state_vars: model.state_vars,
            functions: model.functions,
            hash,
            options,
            path: path.map(str::to_string),
        })
    }

    /// Contract name as declared
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared contract kind
    pub fn kind(&self) -> ContractKind {
        self.kind
    }

    pub fn base_contracts(&self) -> &[BaseContract] {
        &self.base_contracts
    }

    pub fn type_declarations(&self) -> &[SyntaxNode] {
        &self.type_declarations
    }

    pub fn state_vars(&self) -> &[SyntaxNode] {
        &self.state_vars
    }

    pub fn functions(&self) -> &[SyntaxNode] {
        &self.functions
    }

    /// Hex digest
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Algorithm and mode this hash was computed with
    pub fn options(&self) -> HashOptions {
        self.options
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Corpus record for this fingerprint
    pub fn to_entry(&self) -> DatabaseEntry {
        DatabaseEntry::new(
            self.hash.clone(),
            self.name.clone(),
            self.path.clone(),
            self.options,
        )
    }
}

/// Fingerprint every contract in `document` under every requested mode.
///
/// `document` is either a whole `SourceUnit` or a single
/// `ContractDefinition`. Records are ordered mode by mode, contracts in source
/// order within each mode.
pub fn fingerprint(
    document: &SyntaxNode,
    options: &FingerprintOptions,
    path: Option<&str>,
) -> Result<Vec<HashedContract>, FingerprintError> {
    let contracts: Vec<&SyntaxNode> = match document {
        SyntaxNode::SourceUnit(unit) => unit
            .children
            .iter()
            .filter(|child| matches!(child, SyntaxNode::ContractDefinition(_)))
            .collect(),
        SyntaxNode::ContractDefinition(_) => vec![document],
        other => return Err(FingerprintError::InvalidInput(other.kind_name().to_string())),
    };

    let mut records = Vec::with_capacity(contracts.len() * options.modes().len());
    for &mode in options.modes() {
        let hash_options = HashOptions::new(options.algorithm(), mode);
        for contract in &contracts {
            records.push(HashedContract::from_ast(contract, hash_options, path)?);
        }
    }

    debug!(
        path = path.unwrap_or_default(),
        contracts = contracts.len(),
        records = records.len(),
        "fingerprinted_document"
    );
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ownable_token() -> SyntaxNode {
        SyntaxNode::from_json(json!({
            "type": "ContractDefinition",
            "name": "Token",
            "kind": "contract",
            "baseContracts": [{
                "type": "InheritanceSpecifier",
                "baseName": { "type": "UserDefinedTypeName", "namePath": "Ownable" },
                "arguments": [{ "type": "NumberLiteral", "number": "1", "subdenomination": null }]
            }],
            "subNodes": [
                { "type": "StateVariableDeclaration", "variables": [], "initialValue": null },
                { "type": "EventDefinition", "name": "Transfer", "parameters": [], "isAnonymous": false },
                { "type": "FunctionDefinition", "name": "mint", "parameters": [], "body": null },
                { "type": "ModifierDefinition", "name": "onlyOwner", "parameters": null, "body": null },
                { "type": "StructDefinition", "name": "Checkpoint", "members": [] },
                { "type": "UsingForDeclaration", "libraryName": "SafeMath", "typeName": null }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_extract_partitions_declarations() {
        let SyntaxNode::ContractDefinition(contract) = ownable_token() else {
            unreachable!()
        };
        let model = ContractModel::extract(&contract);

        assert_eq!(model.name, "Token");
        assert_eq!(model.kind, ContractKind::Contract);
        assert_eq!(model.functions.len(), 2);
        assert_eq!(model.state_vars.len(), 1);
        assert_eq!(model.type_declarations.len(), 3);
        assert_eq!(model.base_contracts.len(), 1);
        assert_eq!(model.base_contracts[0].name, "Ownable");
        assert_eq!(model.base_contracts[0].arguments[0].kind_name(), "NumberLiteral");
    }

    #[test]
    fn test_structure_record_keeps_name_and_raw_functions() {
        let options = HashOptions::new(Algorithm::Sha1, HashMode::Structure);
        let record = HashedContract::from_ast(&ownable_token(), options, Some("Token.sol")).unwrap();

        assert_eq!(record.name(), "Token");
        assert_eq!(record.path(), Some("Token.sol"));
        assert_eq!(record.hash().len(), 40);
        assert_eq!(record.functions()[0].to_json()["name"], "mint");
    }

    #[test]
    fn test_one_record_per_mode_and_contract() {
        let unit = SyntaxNode::from_json(json!({
            "type": "SourceUnit",
            "children": [
                { "type": "PragmaDirective", "name": "solidity", "value": "^0.8.0" },
                { "type": "ContractDefinition", "name": "A", "kind": "contract", "baseContracts": [], "subNodes": [] },
                { "type": "ContractDefinition", "name": "L", "kind": "library", "baseContracts": [], "subNodes": [] }
            ]
        }))
        .unwrap();

        let records = fingerprint(&unit, &FingerprintOptions::default(), None).unwrap();
        let summary: Vec<_> = records
            .iter()
            .map(|r| (r.options().mode, r.name().to_string()))
            .collect();
        assert_eq!(
            summary,
            [
                (HashMode::Exact, "A".to_string()),
                (HashMode::Exact, "L".to_string()),
                (HashMode::Structure, "A".to_string()),
                (HashMode::Structure, "L".to_string()),
            ]
        );
        assert_eq!(records[1].kind(), ContractKind::Library);
    }

    #[test]
    fn test_rejects_other_documents() {
        let node = SyntaxNode::from_json(json!({ "type": "Block", "statements": [] })).unwrap();
        assert!(matches!(
            fingerprint(&node, &FingerprintOptions::default(), None),
            Err(FingerprintError::InvalidInput(kind)) if kind == "Block"
        ));
    }

    #[test]
    fn test_options_validation() {
        assert!(matches!(
            FingerprintOptions::new(Algorithm::Sha1, []),
            Err(FingerprintError::NoModes)
        ));

        let modes = FingerprintOptions::parse_modes("AST_STRUCTURE, AST_EXACT,AST_STRUCTURE").unwrap();
        let options = FingerprintOptions::new(Algorithm::Sha256, modes).unwrap();
        assert_eq!(options.modes(), [HashMode::Structure, HashMode::Exact]);

        assert!(matches!(
            FingerprintOptions::parse_modes("AST_EXACT,FUZZY"),
            Err(FingerprintError::UnsupportedMode(m)) if m == "FUZZY"
        ));
    }

    #[test]
    fn test_normalize_errors_are_classified() {
        let wrong_root: FingerprintError = NormalizeError::NotAContract("Block".to_string()).into();
        assert!(matches!(wrong_root, FingerprintError::InvalidInput(kind) if kind == "Block"));

        let broken: FingerprintError =
            NormalizeError::DeclarationCountChanged { before: 3, after: 2 }.into();
        assert!(matches!(
            broken,
            FingerprintError::NormalizationInvariantViolation(_)
        ));
        assert!(broken.to_string().contains("3 before, 2 after"));
    }
}
