//! Python extraction.
//!
//! Exports follow the naming convention: a name is public unless it starts
//! with `_`. Module-level assignments to UPPER_CASE names are constants.

use tree_sitter::{Node, Tree};

use kontext_core::models::{AstNode, Language, NodeKind};

use super::{
    clean_type_annotation, declarations, field_text, named_children, node_text, unquote,
    Collector, LanguageExtractor,
};

pub struct PythonExtractor;

impl LanguageExtractor for PythonExtractor {
    fn language(&self) -> Language {
        Language::Python
    }

    fn extract(&self, tree: &Tree, source: &str) -> Vec<AstNode> {
        let mut out = Collector::new(source, Language::Python);
        for node in declarations(tree.root_node()) {
            statement(&mut out, node, node);
        }
        out.finish()
    }
}

fn is_public(name: &str) -> bool {
    !name.starts_with('_')
}

fn is_constant_name(name: &str) -> bool {
    name.chars().any(|c| c.is_ascii_uppercase())
        && name
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

fn statement(out: &mut Collector<'_>, node: Node<'_>, span: Node<'_>) {
    let source = out.source();
    match node.kind() {
        "import_statement" => {
            let modules: Vec<String> = named_children(node)
                .into_iter()
                .filter_map(|c| match c.kind() {
                    "dotted_name" => Some(node_text(c, source).to_string()),
                    "aliased_import" => field_text(c, "name", source).map(str::to_string),
                    _ => None,
                })
                .collect();
            if let Some(n) = out.push(span, NodeKind::Import, None) {
                n.imports = modules;
            }
        }
        "import_from_statement" => {
            let module = field_text(node, "module_name", source).map(str::to_string);
            if let Some(n) = out.push(span, NodeKind::Import, None) {
                n.imports = module.into_iter().collect();
            }
        }
        "decorated_definition" => {
            if let Some(def) = node.child_by_field_name("definition") {
                statement(out, def, span);
            }
        }
        "function_definition" => {
            function(out, node, span, None);
        }
        "class_definition" => {
            class(out, node, span);
        }
        "expression_statement" => {
            let Some(assign) = named_children(node)
                .into_iter()
                .find(|c| c.kind() == "assignment")
            else {
                return;
            };
            let Some(left) = assign.child_by_field_name("left") else {
                return;
            };
            if left.kind() != "identifier" {
                return;
            }
            let name = node_text(left, source);
            if !is_constant_name(name) {
                return;
            }
            if let Some(n) = out.push(span, NodeKind::Constant, Some(name.to_string())) {
                n.exports = is_public(name);
            }
        }
        _ => {}
    }
}

fn function(out: &mut Collector<'_>, def: Node<'_>, span: Node<'_>, parent: Option<&str>) {
    let source = out.source();
    let Some(name) = field_text(def, "name", source).map(str::to_string) else {
        return;
    };
    let mut params: Vec<String> = def
        .child_by_field_name("parameters")
        .map(|p| {
            named_children(p)
                .into_iter()
                .filter(|c| c.kind() != "comment")
                .map(|c| node_text(c, source).to_string())
                .collect()
        })
        .unwrap_or_default();
    if parent.is_some() && params.first().is_some_and(|p| p == "self" || p == "cls") {
        params.remove(0);
    }
    let docstring = body_docstring(def, source);
    let kind = if parent.is_some() {
        NodeKind::Method
    } else {
        NodeKind::Function
    };

    if let Some(n) = out.push(span, kind, Some(name.clone())) {
        n.params = params;
        n.return_type = field_text(def, "return_type", source).map(clean_type_annotation);
        n.docstring = docstring;
        n.parent = parent.map(str::to_string);
        n.exports = is_public(&name) && parent.map_or(true, is_public);
    }
}

fn class(out: &mut Collector<'_>, def: Node<'_>, span: Node<'_>) {
    let source = out.source();
    let Some(name) = field_text(def, "name", source).map(str::to_string) else {
        return;
    };
    let docstring = body_docstring(def, source);
    if let Some(n) = out.push(span, NodeKind::Class, Some(name.clone())) {
        n.docstring = docstring;
        n.exports = is_public(&name);
    }

    let Some(body) = def.child_by_field_name("body") else {
        return;
    };
    for member in named_children(body) {
        match member.kind() {
            "function_definition" => function(out, member, member, Some(name.as_str())),
            "decorated_definition" => {
                if let Some(inner) = member
                    .child_by_field_name("definition")
                    .filter(|d| d.kind() == "function_definition")
                {
                    function(out, inner, member, Some(name.as_str()));
                }
            }
            _ => {}
        }
    }
}

/// The string literal opening a function or class body.
fn body_docstring(def: Node<'_>, source: &str) -> Option<String> {
    let body = def.child_by_field_name("body")?;
    let first = named_children(body).into_iter().next()?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let literal = named_children(first).into_iter().next()?;
    if literal.kind() != "string" {
        return None;
    }
    let doc = unquote(node_text(literal, source));
    (!doc.is_empty()).then_some(doc)
}

#[cfg(test)]
mod tests {
    use crate::parser::parse_source;
    use kontext_core::models::{Language, NodeKind};

    #[test]
    fn test_private_names_and_decorators() {
        let src = r#"
@cache
def _helper(x):
    return x

class Repo:
    @property
    def size(self) -> int:
        return 0
"#;
        let nodes = parse_source(src, Language::Python).nodes;
        let helper = nodes
            .iter()
            .find(|n| n.name.as_deref() == Some("_helper"))
            .unwrap();
        assert!(!helper.exports);
        assert!(helper.text.starts_with("@cache"));

        let size = nodes
            .iter()
            .find(|n| n.name.as_deref() == Some("size"))
            .unwrap();
        assert_eq!(size.kind, NodeKind::Method);
        assert_eq!(size.parent.as_deref(), Some("Repo"));
        assert!(size.params.is_empty());
        assert_eq!(size.return_type.as_deref(), Some("int"));
    }

    #[test]
    fn test_lowercase_assignment_is_not_constant() {
        let nodes = parse_source("timeout = 3\nTIMEOUT = 3\n", Language::Python).nodes;
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].name.as_deref(), Some("TIMEOUT"));
    }
}
