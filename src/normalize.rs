//! Structure-only canonical form of a contract
//!
//! Two contracts that differ only in identifier names, in the order of their
//! top-level declarations, or in the order of fields inside a struct end up
//! with the same canonical form and therefore the same STRUCTURE digest.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::trace;

use crate::ast::{Attr, ContractDefinition, SyntaxNode};
use crate::hash::{self, Algorithm};

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("expected a ContractDefinition, got {0}")]
    NotAContract(String),

    #[error("declaration count changed during canonicalization ({before} before, {after} after)")]
    DeclarationCountChanged { before: usize, after: usize },
}

/// A contract reduced to its canonical form
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalContract {
    /// The contract with identifiers erased and `subNodes` emptied
    node: SyntaxNode,
    /// One digest per top-level declaration, sorted
    child_digests: Vec<String>,
    algorithm: Algorithm,
}

impl CanonicalContract {
    pub fn child_digests(&self) -> &[String] {
        &self.child_digests
    }

    pub fn digest(&self) -> String {
        hash::digest_node_with(&self.node, "subNodes", &self.child_digests, self.algorithm)
    }
}

/// Canonicalize a contract subtree. Takes ownership: erasure rewrites the tree
/// in place.
pub fn canonicalize(
    mut root: SyntaxNode,
    algorithm: Algorithm,
) -> Result<CanonicalContract, NormalizeError> {
    erase_identifiers(&mut root);
    let mut contract = match root {
        SyntaxNode::ContractDefinition(contract) => contract,
        other => return Err(NormalizeError::NotAContract(other.kind_name().to_string())),
    };
    let child_digests = digest_declarations(&mut contract, algorithm)?;

    Ok(CanonicalContract {
        node: SyntaxNode::ContractDefinition(contract),
        child_digests,
        algorithm,
    })
}

/// Clear every name-bearing field below (and including) `root`.
///
/// Assertion messages passed to `require`/`assert` are blanked too. The
/// anonymity flag of events is reset; other flags are left as parsed.
pub fn erase_identifiers(root: &mut SyntaxNode) {
    root.walk_mut(&mut |node| match node {
        SyntaxNode::ContractDefinition(n) => n.name.clear(),
        SyntaxNode::FunctionDefinition(n)
        | SyntaxNode::ModifierDefinition(n)
        | SyntaxNode::VariableDeclaration(n)
        | SyntaxNode::Identifier(n) => n.name = Some(String::new()),
        SyntaxNode::EventDefinition(n) => {
            n.name = Some(String::new());
            n.is_anonymous = None;
        }
        SyntaxNode::StructDefinition(n) => n.name = Some(String::new()),
        SyntaxNode::UsingForDeclaration(n) => n.library_name = Some(String::new()),
        SyntaxNode::UserDefinedTypeName(n) => n.name_path.clear(),
        SyntaxNode::MemberAccess(n) => n.member_name.clear(),
        // Runs before the callee identifier itself is erased
        SyntaxNode::FunctionCall(call) if call.is_assertion() => {
            for arg in &mut call.arguments {
                if let SyntaxNode::StringLiteral(lit) = arg {
                    lit.value.clear();
                    if let Some(Attr::List(parts)) = lit.attrs.get_mut("parts") {
                        parts.clear();
                    }
                }
            }
        }
        _ => {}
    });
}

/// Replace the contract's declarations by their sorted digests
fn digest_declarations(
    contract: &mut ContractDefinition,
    algorithm: Algorithm,
) -> Result<Vec<String>, NormalizeError> {
    let before = contract.sub_nodes.len();

    let mut buckets: BTreeMap<String, Vec<SyntaxNode>> = BTreeMap::new();
    for child in std::mem::take(&mut contract.sub_nodes) {
        buckets
            .entry(child.kind_name().to_string())
            .or_default()
            .push(child);
    }

    let mut digests = Vec::with_capacity(before);
    for (kind, children) in buckets {
        trace!(kind = %kind, count = children.len(), "declaration_bucket");
        for child in children {
            let digest = match child {
                SyntaxNode::StructDefinition(mut strukt) => {
                    let mut members = std::mem::take(&mut strukt.members)
                        .iter()
                        .map(|member| hash::digest_node(member, algorithm))
                        .collect::<Vec<_>>();
                    members.sort_unstable();
                    hash::digest_node_with(
                        &SyntaxNode::StructDefinition(strukt),
                        "members",
                        &members,
                        algorithm,
                    )
                }
                other => hash::digest_node(&other, algorithm),
            };
            digests.push(digest);
        }
    }
    digests.sort_unstable();

    if digests.len() != before {
        return Err(NormalizeError::DeclarationCountChanged {
            before,
            after: digests.len(),
        });
    }
    Ok(digests)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn var(name: &str, ty: &str) -> Value {
        json!({
            "type": "VariableDeclaration",
            "name": name,
            "typeName": { "type": "ElementaryTypeName", "name": ty },
            "identifier": { "type": "Identifier", "name": name },
            "isIndexed": false
        })
    }

    fn contract(name: &str, sub_nodes: Vec<Value>) -> SyntaxNode {
        SyntaxNode::from_json(json!({
            "type": "ContractDefinition",
            "name": name,
            "kind": "contract",
            "baseContracts": [],
            "subNodes": sub_nodes
        }))
        .unwrap()
    }

    fn strukt(name: &str, fields: &[(&str, &str)]) -> Value {
        let members: Vec<Value> = fields.iter().map(|(n, t)| var(n, t)).collect();
        json!({ "type": "StructDefinition", "name": name, "members": members })
    }

    fn require_call(message: &str) -> Value {
        json!({
            "type": "ExpressionStatement",
            "expression": {
                "type": "FunctionCall",
                "expression": { "type": "Identifier", "name": "require" },
                "arguments": [
                    { "type": "BooleanLiteral", "value": true },
                    { "type": "StringLiteral", "value": message, "parts": [message] }
                ]
            }
        })
    }

    fn function(name: &str, statements: Vec<Value>) -> Value {
        json!({
            "type": "FunctionDefinition",
            "name": name,
            "parameters": [],
            "body": { "type": "Block", "statements": statements },
            "visibility": "public",
            "isConstructor": false
        })
    }

    fn structure_hash(node: SyntaxNode) -> String {
        canonicalize(node, Algorithm::Sha1).unwrap().digest()
    }

    #[test]
    fn test_erase_identifiers() {
        let mut node = contract(
            "Token",
            vec![
                var("owner", "address"),
                json!({
                    "type": "EventDefinition",
                    "name": "Transfer",
                    "parameters": [],
                    "isAnonymous": true
                }),
                json!({
                    "type": "UsingForDeclaration",
                    "libraryName": "SafeMath",
                    "typeName": null
                }),
            ],
        );
        erase_identifiers(&mut node);

        let json = node.to_json();
        assert_eq!(json["name"], "");
        assert_eq!(json["subNodes"][0]["name"], "");
        assert_eq!(json["subNodes"][0]["identifier"]["name"], "");
        // elementary types and flags other than event anonymity stay
        assert_eq!(json["subNodes"][0]["typeName"]["name"], "address");
        assert_eq!(json["subNodes"][0]["isIndexed"], false);
        assert_eq!(json["subNodes"][1]["name"], "");
        assert_eq!(json["subNodes"][1]["isAnonymous"], Value::Null);
        assert_eq!(json["subNodes"][2]["libraryName"], "");
    }

    #[test]
    fn test_assertion_messages_blanked() {
        let mut node = SyntaxNode::from_json(require_call("only owner")).unwrap();
        erase_identifiers(&mut node);

        let json = node.to_json();
        assert_eq!(json["expression"]["arguments"][1]["value"], "");
        assert_eq!(json["expression"]["arguments"][1]["parts"], json!([]));
        assert_eq!(json["expression"]["expression"]["name"], "");
    }

    #[test]
    fn test_other_call_messages_kept() {
        let mut node = SyntaxNode::from_json(json!({
            "type": "FunctionCall",
            "expression": { "type": "Identifier", "name": "revertWith" },
            "arguments": [{ "type": "StringLiteral", "value": "nope", "parts": ["nope"] }]
        }))
        .unwrap();
        erase_identifiers(&mut node);

        assert_eq!(node.to_json()["arguments"][0]["value"], "nope");
    }

    #[test]
    fn test_rename_invariance() {
        let a = contract(
            "A",
            vec![var("x", "uint"), function("f", vec![require_call("a")])],
        );
        let b = contract(
            "B",
            vec![var("y", "uint"), function("g", vec![require_call("b")])],
        );
        assert_eq!(structure_hash(a), structure_hash(b));
    }

    #[test]
    fn test_reorder_invariance() {
        let a = contract(
            "A",
            vec![
                var("x", "uint"),
                function("f", vec![]),
                strukt("S", &[("a", "uint"), ("b", "address")]),
            ],
        );
        let b = contract(
            "A",
            vec![
                strukt("S", &[("b", "address"), ("a", "uint")]),
                function("f", vec![]),
                var("x", "uint"),
            ],
        );
        assert_eq!(structure_hash(a), structure_hash(b));
    }

    #[test]
    fn test_type_change_detected() {
        let a = contract("A", vec![var("x", "uint")]);
        let b = contract("A", vec![var("x", "address")]);
        assert_ne!(structure_hash(a), structure_hash(b));
    }

    #[test]
    fn test_body_logic_change_detected() {
        let increment = json!({
            "type": "ExpressionStatement",
            "expression": {
                "type": "BinaryOperation",
                "operator": "+=",
                "left": { "type": "Identifier", "name": "total" },
                "right": { "type": "NumberLiteral", "number": "1" }
            }
        });
        let mut decrement = increment.clone();
        decrement["expression"]["operator"] = json!("-=");

        let a = contract("A", vec![function("f", vec![increment])]);
        let b = contract("A", vec![function("f", vec![decrement])]);
        assert_ne!(structure_hash(a.clone()), structure_hash(b.clone()));
        assert_ne!(
            hash::digest_node(&a, Algorithm::Sha1),
            hash::digest_node(&b, Algorithm::Sha1)
        );
    }

    #[test]
    fn test_declaration_count_preserved() {
        let node = contract(
            "A",
            vec![
                var("x", "uint"),
                var("x", "uint"),
                function("f", vec![]),
                strukt("S", &[]),
            ],
        );
        let canonical = canonicalize(node, Algorithm::Sha1).unwrap();
        assert_eq!(canonical.child_digests().len(), 4);

        let mut sorted = canonical.child_digests().to_vec();
        sorted.sort();
        assert_eq!(sorted, canonical.child_digests());
    }

    #[test]
    fn test_rejects_non_contract() {
        let node = SyntaxNode::from_json(json!({ "type": "SourceUnit", "children": [] })).unwrap();
        assert!(matches!(
            canonicalize(node, Algorithm::Sha1),
            Err(NormalizeError::NotAContract(kind)) if kind == "SourceUnit"
        ));
    }
}
