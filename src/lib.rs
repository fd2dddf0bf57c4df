pub mod ast;
pub mod compare;
pub mod database;
pub mod fingerprint;
pub mod hash;
pub mod normalize;

pub use ast::{AstError, ContractKind, SyntaxNode};
pub use compare::{
    find_duplicates, match_records, CompareError, CompareResult, Doppelganger, DuplicateGroup,
    MatchGroup, MatchKey,
};
pub use database::{Corpus, CorpusError, DatabaseEntry, EntryOptions};
pub use fingerprint::{
    fingerprint, BaseContract, ContractModel, FingerprintError, FingerprintOptions, HashedContract,
};
pub use hash::{Algorithm, HashMode, HashOptions, ENCODING_VERSION, HASH_MODES};
pub use normalize::{canonicalize, CanonicalContract, NormalizeError};
