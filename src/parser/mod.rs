//! Structural parsing with tree-sitter.
//!
//! Each [`Language`] binds to a [`LanguageExtractor`] that walks a parsed
//! tree and emits flat [`AstNode`]s: functions, classes, methods, types,
//! constants, and imports. Parsing is best-effort. Unsupported languages
//! and unreadable files yield no nodes, and a tree with syntax errors still
//! yields every declaration whose own subtree parsed cleanly.
//!
//! ```text
//! source ──▶ tree_sitter::Parser ──▶ Tree ──▶ extractor_for(lang).extract() ──▶ Vec<AstNode>
//! ```

mod ecma;
mod golang;
mod python;
mod rust;

use std::path::Path;

use tree_sitter::{Node, Parser, Tree};

use kontext_core::models::{AstNode, Language, NodeKind};

use crate::languages;

/// Parser output: whatever nodes were recovered plus an optional
/// diagnostic describing the first syntax error.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseOutcome {
    pub nodes: Vec<AstNode>,
    pub diagnostic: Option<String>,
}

/// Per-language declaration extraction over a parsed tree.
pub trait LanguageExtractor: Send + Sync {
    fn language(&self) -> Language;

    /// Emit the declarations of `tree`, which was parsed from `source`.
    fn extract(&self, tree: &Tree, source: &str) -> Vec<AstNode>;
}

static TYPESCRIPT: ecma::EcmaExtractor = ecma::EcmaExtractor::new(Language::TypeScript);
static JAVASCRIPT: ecma::EcmaExtractor = ecma::EcmaExtractor::new(Language::JavaScript);
static PYTHON: python::PythonExtractor = python::PythonExtractor;
static RUST: rust::RustExtractor = rust::RustExtractor;
static GO: golang::GoExtractor = golang::GoExtractor;

/// The extractor bound to `language`.
pub fn extractor_for(language: Language) -> &'static dyn LanguageExtractor {
    match language {
        Language::TypeScript => &TYPESCRIPT,
        Language::JavaScript => &JAVASCRIPT,
        Language::Python => &PYTHON,
        Language::Rust => &RUST,
        Language::Go => &GO,
    }
}

/// Parse in-memory source text.
pub fn parse_source(text: &str, language: Language) -> ParseOutcome {
    parse_with(languages::grammar(language), text, language)
}

/// Parse in-memory source text that was read from `path`. The path only
/// selects a grammar variant (`.tsx`).
pub fn parse_source_at(path: &str, text: &str, language: Language) -> ParseOutcome {
    parse_with(languages::grammar_for_path(language, path), text, language)
}

/// Read and parse `path`. Unknown languages and unreadable files yield an
/// empty list.
pub fn parse_file(path: &Path, language_id: &str) -> Vec<AstNode> {
    let Some(language) = Language::from_id(language_id) else {
        tracing::debug!(language = language_id, "unsupported language");
        return Vec::new();
    };
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "cannot read file for parsing");
            return Vec::new();
        }
    };

    let outcome = parse_source_at(&path.to_string_lossy(), &text, language);
    if let Some(diagnostic) = &outcome.diagnostic {
        tracing::debug!(path = %path.display(), %diagnostic, "partial parse");
    }
    outcome.nodes
}

fn parse_with(grammar: tree_sitter::Language, text: &str, language: Language) -> ParseOutcome {
    let mut parser = Parser::new();
    if let Err(e) = parser.set_language(&grammar) {
        return ParseOutcome {
            nodes: Vec::new(),
            diagnostic: Some(format!("grammar for {language} failed to load: {e}")),
        };
    }
    let Some(tree) = parser.parse(text, None) else {
        return ParseOutcome {
            nodes: Vec::new(),
            diagnostic: Some("parser produced no tree".to_string()),
        };
    };

    let mut nodes = extractor_for(language).extract(&tree, text);
    nodes.sort_by(|a, b| {
        a.line_start
            .cmp(&b.line_start)
            .then(b.line_end.cmp(&a.line_end))
    });

    ParseOutcome {
        nodes,
        diagnostic: first_error_line(tree.root_node())
            .map(|line| format!("syntax error at line {line}")),
    }
}

/// 1-indexed line of the first error or missing node, if any.
fn first_error_line(root: Node<'_>) -> Option<usize> {
    if !root.has_error() {
        return None;
    }
    let mut cursor = root.walk();
    loop {
        let node = cursor.node();
        if node.is_error() || node.is_missing() {
            return Some(node.start_position().row + 1);
        }
        if node.has_error() && cursor.goto_first_child() {
            continue;
        }
        loop {
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                return None;
            }
        }
    }
}

// ── Shared extraction helpers ─────────────────────────────────────────

/// Accumulates nodes for one file.
pub(crate) struct Collector<'s> {
    source: &'s str,
    language: Language,
    nodes: Vec<AstNode>,
}

impl<'s> Collector<'s> {
    pub(crate) fn new(source: &'s str, language: Language) -> Self {
        Self {
            source,
            language,
            nodes: Vec::new(),
        }
    }

    pub(crate) fn source(&self) -> &'s str {
        self.source
    }

    /// Record a declaration spanning `span`. Returns `None` (and records
    /// nothing) when the span contains a syntax error.
    pub(crate) fn push(
        &mut self,
        span: Node<'_>,
        kind: NodeKind,
        name: Option<String>,
    ) -> Option<&mut AstNode> {
        if span.has_error() {
            return None;
        }
        let raw = &self.source[span.byte_range()];
        let text = raw.trim_end();
        if text.trim().is_empty() {
            return None;
        }
        let line_start = span.start_position().row as u32 + 1;
        let line_end = line_start + text.matches('\n').count() as u32;

        self.nodes.push(AstNode {
            kind,
            name,
            line_start,
            line_end,
            parent: None,
            params: Vec::new(),
            return_type: None,
            docstring: None,
            exports: false,
            text: text.to_string(),
            language: self.language,
            imports: Vec::new(),
        });
        self.nodes.last_mut()
    }

    pub(crate) fn nodes_mut(&mut self) -> &mut [AstNode] {
        &mut self.nodes
    }

    pub(crate) fn finish(self) -> Vec<AstNode> {
        self.nodes
    }
}

/// Source text of `node`.
pub(crate) fn node_text<'s>(node: Node<'_>, source: &'s str) -> &'s str {
    &source[node.byte_range()]
}

/// Text of the named field `field` of `node`.
pub(crate) fn field_text<'s>(node: Node<'_>, field: &str, source: &'s str) -> Option<&'s str> {
    node.child_by_field_name(field).map(|n| node_text(n, source))
}

pub(crate) fn named_children<'t>(node: Node<'t>) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor).collect()
}

/// Declaration candidates under `root`. Children of top-level `ERROR`
/// nodes are flattened in so declarations swallowed by error recovery are
/// still visited.
pub(crate) fn declarations(root: Node<'_>) -> Vec<Node<'_>> {
    let mut out = Vec::new();
    for child in named_children(root) {
        if child.is_error() {
            out.extend(declarations(child));
        } else {
            out.push(child);
        }
    }
    out
}

/// The comment block directly above `node`, if every comment in it
/// satisfies `accept`. Siblings whose kind is in `skip` (attributes,
/// decorators) may sit between the comments and the node.
pub(crate) fn leading_comment(
    node: Node<'_>,
    source: &str,
    comment_kinds: &[&str],
    skip: &[&str],
    accept: impl Fn(&str) -> bool,
) -> Option<String> {
    let mut parts = Vec::new();
    let mut next_row = node.start_position().row;
    let mut current = node.prev_sibling();

    while let Some(sibling) = current {
        if sibling.end_position().row + 1 < next_row {
            break;
        }
        if skip.contains(&sibling.kind()) {
            next_row = sibling.start_position().row;
            current = sibling.prev_sibling();
            continue;
        }
        if !comment_kinds.contains(&sibling.kind()) {
            break;
        }
        let raw = node_text(sibling, source);
        if !accept(raw) {
            break;
        }
        parts.push(raw);
        next_row = sibling.start_position().row;
        current = sibling.prev_sibling();
    }

    if parts.is_empty() {
        return None;
    }
    parts.reverse();
    let cleaned = clean_comment(&parts.join("\n"));
    (!cleaned.is_empty()).then_some(cleaned)
}

/// Strip comment markers (`/** */`, `///`, `//`, leading `*`).
pub(crate) fn clean_comment(raw: &str) -> String {
    raw.lines()
        .map(|line| {
            let line = line.trim();
            let line = line
                .strip_prefix("/**")
                .or_else(|| line.strip_prefix("/*"))
                .or_else(|| line.strip_prefix("//!"))
                .or_else(|| line.strip_prefix("///"))
                .or_else(|| line.strip_prefix("//"))
                .unwrap_or(line);
            let line = line.strip_suffix("*/").unwrap_or(line).trim();
            line.strip_prefix('*').unwrap_or(line).trim()
        })
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Strip quotes and string prefixes from a string literal.
pub(crate) fn unquote(literal: &str) -> String {
    literal
        .trim()
        .trim_start_matches(|c: char| c.is_ascii_alphabetic())
        .trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .trim()
        .to_string()
}

/// Strip a leading `:` or `->` from a return type annotation.
pub(crate) fn clean_type_annotation(raw: &str) -> String {
    let raw = raw.trim();
    let raw = raw
        .strip_prefix("->")
        .or_else(|| raw.strip_prefix(':'))
        .unwrap_or(raw);
    raw.trim().to_string()
}

/// Parameter texts of a parameter-list node, excluding punctuation and
/// comments.
pub(crate) fn param_texts(params: Node<'_>, source: &str) -> Vec<String> {
    named_children(params)
        .into_iter()
        .filter(|p| !p.kind().contains("comment"))
        .map(|p| node_text(p, source).trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_comment() {
        assert_eq!(
            clean_comment("/**\n * Validate a token.\n * @param t - it\n */"),
            "Validate a token.\n@param t - it"
        );
        assert_eq!(clean_comment("/// Open the pool.\n/// Twice."), "Open the pool.\nTwice.");
        assert_eq!(clean_comment("// Serve runs the loop."), "Serve runs the loop.");
    }

    #[test]
    fn test_unquote() {
        assert_eq!(unquote("\"express\""), "express");
        assert_eq!(unquote("'./db'"), "./db");
        assert_eq!(unquote("r\"\"\"Doc.\"\"\""), "Doc.");
    }

    #[test]
    fn test_clean_type_annotation() {
        assert_eq!(clean_type_annotation(": User | null"), "User | null");
        assert_eq!(clean_type_annotation("-> bool"), "bool");
        assert_eq!(clean_type_annotation("error"), "error");
    }

    #[test]
    fn test_unknown_language_and_missing_file_are_empty() {
        assert!(parse_file(Path::new("/nonexistent/file.ts"), "typescript").is_empty());
        assert!(parse_file(Path::new("Cargo.toml"), "haskell").is_empty());
    }

    #[test]
    fn test_clean_source_has_no_diagnostic() {
        let outcome = parse_source("def f():\n    return 1\n", Language::Python);
        assert!(outcome.diagnostic.is_none());
        assert_eq!(outcome.nodes.len(), 1);
    }

    #[test]
    fn test_syntax_error_reports_line() {
        let src = "function ok() {\n  return 1;\n}\n\nfunction broken( {\n";
        let outcome = parse_source(src, Language::JavaScript);
        assert!(outcome.diagnostic.is_some());
        assert!(outcome
            .nodes
            .iter()
            .any(|n| n.name.as_deref() == Some("ok")));
    }

    #[test]
    fn test_every_node_is_tight_and_nonempty() {
        let src = "fn a() {}\n\n\npub struct B;\n";
        for node in parse_source(src, Language::Rust).nodes {
            assert!(node.line_start >= 1);
            assert!(node.line_end >= node.line_start);
            assert!(!node.text.trim().is_empty());
            assert_eq!(node.text, node.text.trim_end());
        }
    }
}
