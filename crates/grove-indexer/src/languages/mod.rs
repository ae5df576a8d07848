//! Language extractors for the supported grammars

pub mod go;
pub mod java;
pub mod javascript;
pub mod python;
pub mod rust;
pub mod typescript;

use crate::extractor::LanguageExtractor;
use grove_core::Language;

/// Get the extractor for a language. `Language::Other` has none.
pub fn get_extractor(language: Language) -> Option<&'static dyn LanguageExtractor> {
    match language {
        Language::Python => Some(&python::PythonExtractor),
        Language::JavaScript => Some(&javascript::JavaScriptExtractor),
        Language::TypeScript => Some(&typescript::TypeScriptExtractor),
        Language::Go => Some(&go::GoExtractor),
        Language::Rust => Some(&rust::RustExtractor),
        Language::Java => Some(&java::JavaExtractor),
        Language::Other => None,
    }
}
