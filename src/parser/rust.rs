//! Rust extraction.
//!
//! `pub` visibility (any form) marks a declaration exported. Methods come
//! from `impl` and `trait` bodies and carry the implementing type as
//! parent. Inline modules are walked like the file root.

use tree_sitter::{Node, Tree};

use kontext_core::models::{AstNode, Language, NodeKind};

use super::{
    clean_type_annotation, declarations, field_text, leading_comment, named_children, node_text,
    param_texts, Collector, LanguageExtractor,
};

pub struct RustExtractor;

impl LanguageExtractor for RustExtractor {
    fn language(&self) -> Language {
        Language::Rust
    }

    fn extract(&self, tree: &Tree, source: &str) -> Vec<AstNode> {
        let mut out = Collector::new(source, Language::Rust);
        items(&mut out, declarations(tree.root_node()));
        out.finish()
    }
}

fn is_pub(item: Node<'_>) -> bool {
    named_children(item)
        .iter()
        .any(|c| c.kind() == "visibility_modifier")
}

fn doc_comment(item: Node<'_>, source: &str) -> Option<String> {
    leading_comment(
        item,
        source,
        &["line_comment", "block_comment"],
        &["attribute_item"],
        |c| c.starts_with("///") || c.starts_with("/**"),
    )
}

/// `Foo<T>` / `crate::a::Foo` / `&Foo` → `Foo`.
fn base_type_name(raw: &str) -> String {
    let head = raw.split('<').next().unwrap_or(raw);
    let head = head.rsplit("::").next().unwrap_or(head);
    head.trim_start_matches(['&', '*'])
        .trim_start_matches("mut ")
        .trim()
        .to_string()
}

/// Module path referenced by a `use` argument, without the brace group or
/// alias: `crate::db::{connect, Pool}` → `crate::db`.
fn use_path(argument: &str) -> String {
    let path = argument.split("::{").next().unwrap_or(argument);
    let path = path.split(" as ").next().unwrap_or(path);
    path.trim().to_string()
}

fn items(out: &mut Collector<'_>, nodes: Vec<Node<'_>>) {
    for item in nodes {
        item_node(out, item);
    }
}

fn item_node(out: &mut Collector<'_>, item: Node<'_>) {
    let source = out.source();
    let simple_kind = match item.kind() {
        "function_item" | "function_signature_item" => Some(NodeKind::Function),
        "struct_item" | "enum_item" | "union_item" => Some(NodeKind::Class),
        "trait_item" | "type_item" => Some(NodeKind::Type),
        "const_item" | "static_item" => Some(NodeKind::Constant),
        _ => None,
    };

    if let Some(kind) = simple_kind {
        let name = field_text(item, "name", source).map(str::to_string);
        let doc = doc_comment(item, source);
        if let Some(n) = out.push(item, kind, name.clone()) {
            if kind == NodeKind::Function {
                fill_signature(n, item, source);
            }
            n.docstring = doc;
            n.exports = is_pub(item);
        }
        if item.kind() == "trait_item" {
            if let (Some(name), Some(body)) = (name, item.child_by_field_name("body")) {
                methods(out, body, &name, true);
            }
        }
        return;
    }

    match item.kind() {
        "use_declaration" => {
            let module = field_text(item, "argument", source).map(use_path);
            if let Some(n) = out.push(item, NodeKind::Import, None) {
                n.imports = module.into_iter().collect();
                n.exports = is_pub(item);
            }
        }
        "extern_crate_declaration" => {
            let module = field_text(item, "name", source).map(str::to_string);
            if let Some(n) = out.push(item, NodeKind::Import, None) {
                n.imports = module.into_iter().collect();
            }
        }
        "impl_item" => {
            let Some(type_name) = field_text(item, "type", source).map(base_type_name) else {
                return;
            };
            if let Some(body) = item.child_by_field_name("body") {
                methods(out, body, &type_name, false);
            }
        }
        "mod_item" => {
            if let Some(body) = item.child_by_field_name("body") {
                items(out, declarations(body));
            }
        }
        _ => {}
    }
}

/// Functions of an `impl` or `trait` body. Trait methods are public with
/// their trait.
fn methods(out: &mut Collector<'_>, body: Node<'_>, parent: &str, trait_body: bool) {
    let source = out.source();
    for member in named_children(body) {
        if !matches!(member.kind(), "function_item" | "function_signature_item") {
            continue;
        }
        let name = field_text(member, "name", source).map(str::to_string);
        let doc = doc_comment(member, source);
        if let Some(n) = out.push(member, NodeKind::Method, name) {
            fill_signature(n, member, source);
            n.parent = Some(parent.to_string());
            n.docstring = doc;
            n.exports = trait_body || is_pub(member);
        }
    }
}

fn fill_signature(n: &mut AstNode, func: Node<'_>, source: &str) {
    if let Some(params) = func.child_by_field_name("parameters") {
        n.params = param_texts(params, source)
            .into_iter()
            .filter(|p| !p.starts_with('#'))
            .collect();
    }
    n.return_type = field_text(func, "return_type", source).map(clean_type_annotation);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;

    #[test]
    fn test_helpers() {
        assert_eq!(base_type_name("Store<T>"), "Store");
        assert_eq!(base_type_name("crate::db::Pool"), "Pool");
        assert_eq!(use_path("crate::db::{connect, Pool}"), "crate::db");
        assert_eq!(use_path("std::io::Result as IoResult"), "std::io::Result");
    }

    #[test]
    fn test_impl_methods_and_visibility() {
        let src = r#"
use std::collections::HashMap;

/// A keyed cache.
#[derive(Debug)]
pub struct Cache {
    inner: HashMap<String, String>,
}

impl Cache {
    /// Look up a key.
    pub fn get(&self, key: &str) -> Option<&String> {
        self.inner.get(key)
    }

    fn evict(&mut self) {}
}

const LIMIT: usize = 10;
"#;
        let nodes = parse_source(src, Language::Rust).nodes;

        let import = nodes.iter().find(|n| n.kind == NodeKind::Import).unwrap();
        assert_eq!(import.imports, vec!["std::collections::HashMap"]);

        let cache = nodes
            .iter()
            .find(|n| n.name.as_deref() == Some("Cache"))
            .unwrap();
        assert_eq!(cache.kind, NodeKind::Class);
        assert!(cache.exports);
        assert_eq!(cache.docstring.as_deref(), Some("A keyed cache."));

        let get = nodes
            .iter()
            .find(|n| n.name.as_deref() == Some("get"))
            .unwrap();
        assert_eq!(get.kind, NodeKind::Method);
        assert_eq!(get.parent.as_deref(), Some("Cache"));
        assert_eq!(get.params, vec!["&self", "key: &str"]);
        assert_eq!(get.return_type.as_deref(), Some("Option<&String>"));
        assert!(get.exports);

        let evict = nodes
            .iter()
            .find(|n| n.name.as_deref() == Some("evict"))
            .unwrap();
        assert!(!evict.exports);

        let limit = nodes
            .iter()
            .find(|n| n.name.as_deref() == Some("LIMIT"))
            .unwrap();
        assert_eq!(limit.kind, NodeKind::Constant);
        assert!(!limit.exports);
    }
}
