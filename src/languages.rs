//! Tree-sitter grammar registry.
//!
//! Maps each [`Language`] to its grammar. `.tsx` files use the TSX variant
//! of the TypeScript grammar; everything else has one grammar per language.

use kontext_core::models::Language;

/// The grammar used to parse `language`.
pub fn grammar(language: Language) -> tree_sitter::Language {
    match language {
        Language::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
        Language::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
        Language::Python => tree_sitter_python::LANGUAGE.into(),
        Language::Rust => tree_sitter_rust::LANGUAGE.into(),
        Language::Go => tree_sitter_go::LANGUAGE.into(),
    }
}

/// The grammar for a concrete file, honouring JSX-flavoured extensions.
pub fn grammar_for_path(language: Language, path: &str) -> tree_sitter::Language {
    let lower = path.to_ascii_lowercase();
    if language == Language::TypeScript && lower.ends_with(".tsx") {
        tree_sitter_typescript::LANGUAGE_TSX.into()
    } else {
        grammar(language)
    }
}

/// Whether `id` names a language the parser can handle.
pub fn supports(id: &str) -> bool {
    Language::from_id(id).is_some()
}
