//! File parsing and per-language fact extraction

pub mod cst;
pub mod error;
pub mod extractor;
pub mod imports;
pub mod languages;
pub mod parser_pool;
pub mod scope;


pub use cst::{Cst, TextEdit};
pub use error::SyntaxError;
pub use extractor::{
    FactsBuilder, FileFacts, ImportFact, LanguageExtractor, NameRef, RefKind, ReferenceFact,
    SymbolFact, extract,
};
pub use imports::{Candidate, Fallback, ModulePlan, plan, rewrite_module_uses, rewrite_specifier};
pub use parser_pool::{ParseRequest, ParserPool, grammar_for};
pub use scope::{Decl, Scope, ScopeId, ScopeKind, ScopeTree};
