//! Go extraction.
//!
//! A name is exported when it starts with an uppercase letter. Methods
//! carry their receiver's base type (pointer and type parameters stripped)
//! as parent.

use tree_sitter::{Node, Tree};

use kontext_core::models::{AstNode, Language, NodeKind};

use super::{
    declarations, field_text, leading_comment, named_children, node_text, param_texts, unquote,
    Collector, LanguageExtractor,
};

pub struct GoExtractor;

impl LanguageExtractor for GoExtractor {
    fn language(&self) -> Language {
        Language::Go
    }

    fn extract(&self, tree: &Tree, source: &str) -> Vec<AstNode> {
        let mut out = Collector::new(source, Language::Go);
        for decl in declarations(tree.root_node()) {
            match decl.kind() {
                "import_declaration" => import_declaration(&mut out, decl),
                "function_declaration" | "method_declaration" => function(&mut out, decl),
                "type_declaration" => type_declaration(&mut out, decl),
                "const_declaration" => const_declaration(&mut out, decl),
                _ => {}
            }
        }
        out.finish()
    }
}

fn is_exported(name: &str) -> bool {
    name.chars().next().is_some_and(char::is_uppercase)
}

fn doc(node: Node<'_>, source: &str) -> Option<String> {
    leading_comment(node, source, &["comment"], &[], |c| c.starts_with("//"))
}

fn import_declaration(out: &mut Collector<'_>, decl: Node<'_>) {
    let source = out.source();
    let mut specs = Vec::new();
    for child in named_children(decl) {
        match child.kind() {
            "import_spec" => specs.push(child),
            "import_spec_list" => specs.extend(
                named_children(child)
                    .into_iter()
                    .filter(|c| c.kind() == "import_spec"),
            ),
            _ => {}
        }
    }
    let modules: Vec<String> = specs
        .into_iter()
        .filter_map(|spec| field_text(spec, "path", source).map(unquote))
        .collect();
    if let Some(n) = out.push(decl, NodeKind::Import, None) {
        n.imports = modules;
    }
}

fn receiver_type(method: Node<'_>, source: &str) -> Option<String> {
    let receiver = method.child_by_field_name("receiver")?;
    let param = named_children(receiver)
        .into_iter()
        .find(|c| c.kind() == "parameter_declaration")?;
    let raw = field_text(param, "type", source)?;
    let base = raw.trim_start_matches('*');
    let base = base.split('[').next().unwrap_or(base);
    Some(base.trim().to_string())
}

fn function(out: &mut Collector<'_>, decl: Node<'_>) {
    let source = out.source();
    let Some(name) = field_text(decl, "name", source).map(str::to_string) else {
        return;
    };
    let parent = if decl.kind() == "method_declaration" {
        receiver_type(decl, source)
    } else {
        None
    };
    let kind = if parent.is_some() {
        NodeKind::Method
    } else {
        NodeKind::Function
    };
    let docstring = doc(decl, source);

    if let Some(n) = out.push(decl, kind, Some(name.clone())) {
        if let Some(params) = decl.child_by_field_name("parameters") {
            n.params = param_texts(params, source);
        }
        n.return_type = field_text(decl, "result", source).map(|r| r.trim().to_string());
        n.exports = is_exported(&name);
        n.parent = parent;
        n.docstring = docstring;
    }
}

fn type_declaration(out: &mut Collector<'_>, decl: Node<'_>) {
    let source = out.source();
    let specs: Vec<Node<'_>> = named_children(decl)
        .into_iter()
        .filter(|c| matches!(c.kind(), "type_spec" | "type_alias"))
        .collect();
    let single = specs.len() == 1;

    for spec in specs {
        let span = if single { decl } else { spec };
        let Some(name) = field_text(spec, "name", source).map(str::to_string) else {
            continue;
        };
        let kind = match spec.child_by_field_name("type").map(|t| t.kind()) {
            Some("struct_type") => NodeKind::Class,
            _ => NodeKind::Type,
        };
        let docstring = doc(span, source);
        if let Some(n) = out.push(span, kind, Some(name.clone())) {
            n.exports = is_exported(&name);
            n.docstring = docstring;
        }
    }
}

fn const_declaration(out: &mut Collector<'_>, decl: Node<'_>) {
    let source = out.source();
    let specs: Vec<Node<'_>> = named_children(decl)
        .into_iter()
        .filter(|c| c.kind() == "const_spec")
        .collect();
    let single = specs.len() == 1;

    for spec in specs {
        let span = if single { decl } else { spec };
        let docstring = doc(span, source);
        let mut cursor = spec.walk();
        let names: Vec<String> = spec
            .children_by_field_name("name", &mut cursor)
            .map(|n| node_text(n, source).to_string())
            .collect();
        for name in names {
            if let Some(n) = out.push(span, NodeKind::Constant, Some(name.clone())) {
                n.exports = is_exported(&name);
                n.docstring = docstring.clone();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::parser::parse_source;
    use kontext_core::models::{Language, NodeKind};

    #[test]
    fn test_grouped_declarations() {
        let src = r#"package store

import (
	"context"
	db "database/sql"
)

const (
	MaxConns = 10
	timeout  = 5
)

type (
	Pool struct{}
	ID   int64
)
"#;
        let nodes = parse_source(src, Language::Go).nodes;

        let import = nodes.iter().find(|n| n.kind == NodeKind::Import).unwrap();
        assert_eq!(import.imports, vec!["context", "database/sql"]);

        let max = nodes
            .iter()
            .find(|n| n.name.as_deref() == Some("MaxConns"))
            .unwrap();
        assert_eq!(max.kind, NodeKind::Constant);
        assert!(max.exports);
        assert_eq!(max.line_start, 9);

        let timeout = nodes
            .iter()
            .find(|n| n.name.as_deref() == Some("timeout"))
            .unwrap();
        assert!(!timeout.exports);

        let pool = nodes
            .iter()
            .find(|n| n.name.as_deref() == Some("Pool"))
            .unwrap();
        assert_eq!(pool.kind, NodeKind::Class);
        let id = nodes
            .iter()
            .find(|n| n.name.as_deref() == Some("ID"))
            .unwrap();
        assert_eq!(id.kind, NodeKind::Type);
    }
}
