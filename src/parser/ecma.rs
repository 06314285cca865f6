//! TypeScript and JavaScript extraction.
//!
//! Both grammars share node kinds for everything extracted here; the
//! TypeScript-only kinds (interfaces, type aliases, enums, return type
//! annotations) simply never occur in JavaScript trees.

use std::collections::HashSet;

use tree_sitter::{Node, Tree};

use kontext_core::models::{AstNode, Language, NodeKind};

use super::{
    clean_type_annotation, declarations, field_text, leading_comment, named_children, node_text,
    param_texts, unquote, Collector, LanguageExtractor,
};

pub struct EcmaExtractor {
    language: Language,
}

impl EcmaExtractor {
    pub const fn new(language: Language) -> Self {
        Self { language }
    }
}

impl LanguageExtractor for EcmaExtractor {
    fn language(&self) -> Language {
        self.language
    }

    fn extract(&self, tree: &Tree, source: &str) -> Vec<AstNode> {
        let mut out = Collector::new(source, self.language);
        let mut exported_names = HashSet::new();

        for node in declarations(tree.root_node()) {
            match node.kind() {
                "export_statement" => export_statement(&mut out, node, &mut exported_names),
                "expression_statement" => commonjs_exports(node, source, &mut exported_names),
                _ => declaration(&mut out, node, node, false),
            }
        }

        // `export { a }` and CommonJS exports name declarations made elsewhere.
        for n in out.nodes_mut() {
            let owner = n.parent.as_deref().or(n.name.as_deref());
            if owner.is_some_and(|name| exported_names.contains(name)) {
                n.exports = true;
            }
        }
        out.finish()
    }
}

fn jsdoc(span: Node<'_>, source: &str) -> Option<String> {
    leading_comment(span, source, &["comment"], &["decorator"], |c| {
        c.starts_with("/**")
    })
}

fn export_statement(out: &mut Collector<'_>, node: Node<'_>, exported: &mut HashSet<String>) {
    let source = out.source();
    if let Some(decl) = node.child_by_field_name("declaration") {
        declaration(out, decl, node, true);
        return;
    }

    // `export default function name() {}` parsed as an expression.
    if let Some(value) = node.child_by_field_name("value") {
        if matches!(value.kind(), "function_expression" | "function") {
            let name = field_text(value, "name", source).map(str::to_string);
            let doc = jsdoc(node, source);
            if let Some(n) = out.push(node, NodeKind::Function, name) {
                fill_signature(n, value, source);
                n.docstring = doc;
                n.exports = true;
            }
        } else if value.kind() == "identifier" {
            exported.insert(node_text(value, source).to_string());
        }
        return;
    }

    // Re-export: `export { x } from "./y"` references another module.
    if let Some(module) = field_text(node, "source", source) {
        if let Some(n) = out.push(node, NodeKind::Import, None) {
            n.imports = vec![unquote(module)];
            n.exports = true;
        }
        return;
    }

    for child in named_children(node) {
        match child.kind() {
            "export_clause" => {
                for spec in named_children(child) {
                    if let Some(name) = field_text(spec, "name", source) {
                        exported.insert(name.to_string());
                    }
                }
            }
            "identifier" => {
                exported.insert(node_text(child, source).to_string());
            }
            _ => {}
        }
    }
}

/// Extract one declaration. `span` is the node whose text and doc comment
/// represent it (the enclosing `export` statement when there is one).
fn declaration(out: &mut Collector<'_>, decl: Node<'_>, span: Node<'_>, exported: bool) {
    let source = out.source();
    match decl.kind() {
        "import_statement" => {
            if let Some(module) = field_text(decl, "source", source) {
                if let Some(n) = out.push(span, NodeKind::Import, None) {
                    n.imports = vec![unquote(module)];
                }
            }
        }
        "function_declaration" | "generator_function_declaration" | "function_signature" => {
            let name = field_text(decl, "name", source).map(str::to_string);
            let doc = jsdoc(span, source);
            if let Some(n) = out.push(span, NodeKind::Function, name) {
                fill_signature(n, decl, source);
                n.docstring = doc;
                n.exports = exported;
            }
        }
        "class_declaration" | "abstract_class_declaration" | "class" => {
            class_declaration(out, decl, span, exported);
        }
        "interface_declaration" | "type_alias_declaration" | "enum_declaration" => {
            let name = field_text(decl, "name", source).map(str::to_string);
            let doc = jsdoc(span, source);
            if let Some(n) = out.push(span, NodeKind::Type, name) {
                n.docstring = doc;
                n.exports = exported;
            }
        }
        "lexical_declaration" | "variable_declaration" => {
            variable_declaration(out, decl, span, exported);
        }
        _ => {}
    }
}

fn class_declaration(out: &mut Collector<'_>, decl: Node<'_>, span: Node<'_>, exported: bool) {
    let source = out.source();
    let Some(class_name) = field_text(decl, "name", source).map(str::to_string) else {
        return;
    };
    let doc = jsdoc(span, source);
    if let Some(n) = out.push(span, NodeKind::Class, Some(class_name.clone())) {
        n.docstring = doc;
        n.exports = exported;
    }

    let Some(body) = decl.child_by_field_name("body") else {
        return;
    };
    for member in named_children(body) {
        if member.kind() != "method_definition" {
            continue;
        }
        let name = field_text(member, "name", source).map(str::to_string);
        let doc = jsdoc(member, source);
        if let Some(n) = out.push(member, NodeKind::Method, name) {
            fill_signature(n, member, source);
            n.parent = Some(class_name.clone());
            n.docstring = doc;
            n.exports = exported;
        }
    }
}

fn variable_declaration(out: &mut Collector<'_>, decl: Node<'_>, span: Node<'_>, exported: bool) {
    let source = out.source();
    let is_const = decl
        .child(0)
        .is_some_and(|keyword| keyword.kind() == "const");
    let declarators: Vec<Node<'_>> = named_children(decl)
        .into_iter()
        .filter(|c| c.kind() == "variable_declarator")
        .collect();
    let single = declarators.len() == 1;

    for declarator in declarators {
        let span = if single { span } else { declarator };
        let value = declarator.child_by_field_name("value");

        if let Some(module) = value.and_then(|v| require_target(v, source)) {
            if let Some(n) = out.push(span, NodeKind::Import, None) {
                n.imports = vec![module];
            }
            continue;
        }

        let Some(name_node) = declarator.child_by_field_name("name") else {
            continue;
        };
        if name_node.kind() != "identifier" {
            continue;
        }
        let name = node_text(name_node, source).to_string();
        let doc = jsdoc(span, source);

        match value.map(|v| v.kind()) {
            Some("arrow_function" | "function_expression" | "function" | "generator_function") => {
                if let Some(n) = out.push(span, NodeKind::Function, Some(name)) {
                    if let Some(v) = value {
                        fill_signature(n, v, source);
                    }
                    n.docstring = doc;
                    n.exports = exported;
                }
            }
            _ if is_const => {
                if let Some(n) = out.push(span, NodeKind::Constant, Some(name)) {
                    n.docstring = doc;
                    n.exports = exported;
                }
            }
            _ => {}
        }
    }
}

/// `require("x")` → `x`.
fn require_target(value: Node<'_>, source: &str) -> Option<String> {
    if value.kind() != "call_expression" {
        return None;
    }
    if field_text(value, "function", source)? != "require" {
        return None;
    }
    let args = value.child_by_field_name("arguments")?;
    let first = named_children(args).into_iter().next()?;
    (first.kind() == "string").then(|| unquote(node_text(first, source)))
}

/// Names exported through `module.exports = ...` or `exports.x = ...`.
fn commonjs_exports(stmt: Node<'_>, source: &str, exported: &mut HashSet<String>) {
    let Some(assign) = named_children(stmt)
        .into_iter()
        .find(|c| c.kind() == "assignment_expression")
    else {
        return;
    };
    let Some(left) = field_text(assign, "left", source) else {
        return;
    };
    let left = left.trim();

    if left == "module.exports" {
        let Some(right) = assign.child_by_field_name("right") else {
            return;
        };
        match right.kind() {
            "identifier" => {
                exported.insert(node_text(right, source).to_string());
            }
            "object" => {
                for prop in named_children(right) {
                    let key = match prop.kind() {
                        "shorthand_property_identifier" => Some(node_text(prop, source)),
                        "pair" => field_text(prop, "value", source)
                            .filter(|v| v.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '$')),
                        _ => None,
                    };
                    if let Some(key) = key {
                        exported.insert(key.to_string());
                    }
                }
            }
            _ => {}
        }
    } else if let Some(name) = left
        .strip_prefix("module.exports.")
        .or_else(|| left.strip_prefix("exports."))
    {
        exported.insert(name.to_string());
        if let Some(right) = field_text(assign, "right", source) {
            exported.insert(right.trim().to_string());
        }
    }
}

fn fill_signature(n: &mut AstNode, func: Node<'_>, source: &str) {
    if let Some(params) = func.child_by_field_name("parameters") {
        n.params = param_texts(params, source);
    } else if let Some(param) = func.child_by_field_name("parameter") {
        n.params = vec![node_text(param, source).to_string()];
    }
    n.return_type = field_text(func, "return_type", source).map(clean_type_annotation);
}
