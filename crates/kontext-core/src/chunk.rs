//! Structural chunker.
//!
//! Turns parser output ([`AstNode`]s) into persisted retrieval units
//! ([`Chunk`]s). Chunk identity is a SHA-256 of the chunk text only, so
//! identical code at two places in a file yields two chunks with the same
//! hash.
//!
//! # Policy
//!
//! 1. Nodes are visited in source order.
//! 2. Each run of consecutive import nodes becomes a single `import`
//!    chunk whose text is the contiguous file slice covering the run.
//! 3. Every other node yields one chunk, unless its estimated size exceeds
//!    `max_tokens`, in which case it is split on line boundaries
//!    (preferring blank lines) into pieces that keep the node's
//!    kind, name, and parent.
//! 4. Every chunk carries the file's full import list.
//!
//! Every emitted chunk has `line_end >= line_start` and non-blank text.
//!
//! # Example
//!
//! ```rust
//! use kontext_core::chunk::{estimate_tokens, content_hash};
//!
//! assert_eq!(estimate_tokens("abcdefgh"), 2);
//! assert_eq!(content_hash("x"), content_hash("x"));
//! ```

use sha2::{Digest, Sha256};

use crate::models::{AstNode, Chunk, NodeKind};

/// Approximate characters-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Size budgets applied by [`chunk_nodes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    /// Nodes estimated above this are split.
    pub max_tokens: usize,
    /// Import runs are always merged; named declarations are never merged,
    /// so this only affects how aggressively oversized nodes are split:
    /// a trailing piece below this size is folded into its predecessor.
    pub min_tokens: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            min_tokens: 16,
        }
    }
}

/// Approximate token count: `ceil(chars / 4)`. Monotonic in length.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Lowercase hex SHA-256 of `text`.
pub fn content_hash(text: &str) -> String {
    hash_bytes(text.as_bytes())
}

/// Lowercase hex SHA-256 of raw bytes (whole-file hashing).
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Derive chunks for one file from its parsed nodes.
///
/// `file_text` is the full source the nodes were parsed from; it supplies
/// the contiguous slice for merged import runs.
pub fn chunk_nodes(nodes: &[AstNode], file_text: &str, config: &ChunkerConfig) -> Vec<Chunk> {
    let mut ordered: Vec<&AstNode> = nodes
        .iter()
        .filter(|n| !n.text.trim().is_empty() && n.line_end >= n.line_start)
        .collect();
    ordered.sort_by(|a, b| {
        a.line_start
            .cmp(&b.line_start)
            .then(b.line_end.cmp(&a.line_end))
    });

    let file_imports = collect_imports(&ordered);
    let file_lines: Vec<&str> = file_text.lines().collect();
    let mut chunks = Vec::new();

    let mut i = 0;
    while i < ordered.len() {
        let node = ordered[i];
        if node.kind == NodeKind::Import {
            let run_end = ordered[i..]
                .iter()
                .position(|n| n.kind != NodeKind::Import)
                .map(|p| i + p)
                .unwrap_or(ordered.len());
            chunks.push(import_chunk(&ordered[i..run_end], &file_lines, &file_imports));
            i = run_end;
            continue;
        }

        if estimate_tokens(&node.text) > config.max_tokens {
            chunks.extend(split_node(node, config, &file_imports));
        } else {
            chunks.push(make_chunk(
                node,
                node.line_start,
                node.line_end,
                node.text.clone(),
                &file_imports,
            ));
        }
        i += 1;
    }

    chunks
}

fn collect_imports(nodes: &[&AstNode]) -> Vec<String> {
    let mut imports: Vec<String> = Vec::new();
    for node in nodes.iter().filter(|n| n.kind == NodeKind::Import) {
        for module in &node.imports {
            if !imports.contains(module) {
                imports.push(module.clone());
            }
        }
    }
    imports
}

fn import_chunk(run: &[&AstNode], file_lines: &[&str], file_imports: &[String]) -> Chunk {
    let line_start = run.iter().map(|n| n.line_start).min().unwrap_or(1);
    let line_end = run.iter().map(|n| n.line_end).max().unwrap_or(line_start);

    let from = (line_start as usize).saturating_sub(1);
    let to = (line_end as usize).min(file_lines.len());
    let text = if from < to {
        file_lines[from..to].join("\n")
    } else {
        String::new()
    };
    // Source slice unavailable (text/node mismatch): fall back to node texts.
    let text = if text.trim().is_empty() {
        run.iter()
            .map(|n| n.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    } else {
        text
    };

    Chunk {
        line_start,
        line_end,
        kind: NodeKind::Import,
        name: None,
        parent: None,
        hash: content_hash(&text),
        text,
        imports: file_imports.to_vec(),
        exports: false,
    }
}

fn make_chunk(
    node: &AstNode,
    line_start: u32,
    line_end: u32,
    text: String,
    file_imports: &[String],
) -> Chunk {
    Chunk {
        line_start,
        line_end,
        kind: node.kind,
        name: node.name.clone(),
        parent: node.parent.clone(),
        hash: content_hash(&text),
        text,
        imports: file_imports.to_vec(),
        exports: node.exports,
    }
}

/// Split an oversized node into line windows of at most `max_tokens`
/// (a single overlong line is kept whole).
fn split_node(node: &AstNode, config: &ChunkerConfig, file_imports: &[String]) -> Vec<Chunk> {
    let max_chars = config.max_tokens.max(1) * CHARS_PER_TOKEN;
    let lines: Vec<&str> = node.text.lines().collect();

    // (start, end) line indices into `lines`, end exclusive.
    let mut windows: Vec<(usize, usize)> = Vec::new();
    let mut start = 0;
    while start < lines.len() {
        let mut end = start;
        let mut chars = 0;
        let mut last_blank: Option<usize> = None;
        while end < lines.len() {
            let len = lines[end].chars().count() + 1;
            if chars + len > max_chars && end > start {
                break;
            }
            if lines[end].trim().is_empty() && end > start {
                last_blank = Some(end);
            }
            chars += len;
            end += 1;
        }
        if end < lines.len() {
            if let Some(blank) = last_blank {
                end = blank + 1;
            }
        }
        windows.push((start, end));
        start = end;
    }

    // Fold an undersized tail into its predecessor.
    if windows.len() > 1 {
        let (tail_start, tail_end) = windows[windows.len() - 1];
        let tail_chars: usize = lines[tail_start..tail_end]
            .iter()
            .map(|l| l.chars().count() + 1)
            .sum();
        if tail_chars.div_ceil(CHARS_PER_TOKEN) < config.min_tokens {
            windows.pop();
            if let Some(last) = windows.last_mut() {
                last.1 = tail_end;
            }
        }
    }

    let mut chunks = Vec::with_capacity(windows.len());
    for (start, end) in windows {
        let mut first = start;
        let mut last = end;
        while first < last && lines[first].trim().is_empty() {
            first += 1;
        }
        while last > first && lines[last - 1].trim().is_empty() {
            last -= 1;
        }
        if first == last {
            continue;
        }
        let text = lines[first..last].join("\n");
        let line_start = node.line_start + first as u32;
        let line_end = node.line_start + last as u32 - 1;
        chunks.push(make_chunk(node, line_start, line_end, text, file_imports));
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Language;

    fn node(kind: NodeKind, name: Option<&str>, start: u32, text: &str) -> AstNode {
        let lines = text.lines().count().max(1) as u32;
        AstNode {
            kind,
            name: name.map(String::from),
            line_start: start,
            line_end: start + lines - 1,
            parent: None,
            params: Vec::new(),
            return_type: None,
            docstring: None,
            exports: false,
            text: text.to_string(),
            language: Language::TypeScript,
            imports: Vec::new(),
        }
    }

    fn import(start: u32, text: &str, module: &str) -> AstNode {
        let mut n = node(NodeKind::Import, None, start, text);
        n.imports = vec![module.to_string()];
        n
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("a"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_estimate_tokens_monotonic() {
        let mut prev = 0;
        let mut s = String::new();
        for _ in 0..100 {
            s.push('x');
            let t = estimate_tokens(&s);
            assert!(t >= prev);
            prev = t;
        }
    }

    #[test]
    fn test_hash_is_sha256_hex() {
        let h = content_hash("hello");
        assert_eq!(h.len(), 64);
        assert_eq!(
            h,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_ne!(content_hash("hello"), content_hash("hello "));
    }

    #[test]
    fn test_one_chunk_per_declaration() {
        let src = "function a() {}\n\nfunction b() {}";
        let nodes = vec![
            node(NodeKind::Function, Some("a"), 1, "function a() {}"),
            node(NodeKind::Function, Some("b"), 3, "function b() {}"),
        ];
        let chunks = chunk_nodes(&nodes, src, &ChunkerConfig::default());
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].name.as_deref(), Some("a"));
        assert_eq!(chunks[1].line_start, 3);
    }

    #[test]
    fn test_consecutive_imports_merge() {
        let src = "import a from \"a\";\nimport b from \"b\";\n\nfunction f() {}";
        let nodes = vec![
            import(1, "import a from \"a\";", "a"),
            import(2, "import b from \"b\";", "b"),
            node(NodeKind::Function, Some("f"), 4, "function f() {}"),
        ];
        let chunks = chunk_nodes(&nodes, src, &ChunkerConfig::default());
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].kind, NodeKind::Import);
        assert_eq!((chunks[0].line_start, chunks[0].line_end), (1, 2));
        assert_eq!(chunks[0].text, "import a from \"a\";\nimport b from \"b\";");
        assert_eq!(chunks[1].imports, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_duplicate_text_collides() {
        let src = "const X = 1;\nconst X = 1;";
        let nodes = vec![
            node(NodeKind::Constant, Some("X"), 1, "const X = 1;"),
            node(NodeKind::Constant, Some("X"), 2, "const X = 1;"),
        ];
        let chunks = chunk_nodes(&nodes, src, &ChunkerConfig::default());
        assert_eq!(chunks[0].hash, chunks[1].hash);
    }

    #[test]
    fn test_oversized_node_splits_on_blank_lines() {
        let mut body = String::from("function big() {\n");
        for block in 0..6 {
            for line in 0..5 {
                body.push_str(&format!("  let v{block}_{line} = compute({block}, {line});\n"));
            }
            body.push('\n');
        }
        body.push('}');
        let big = node(NodeKind::Function, Some("big"), 10, &body);
        let config = ChunkerConfig {
            max_tokens: 60,
            min_tokens: 4,
        };
        let chunks = chunk_nodes(&[big.clone()], &body, &config);

        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.line_end >= c.line_start);
            assert!(!c.text.trim().is_empty());
            assert_eq!(c.name.as_deref(), Some("big"));
            assert!(c.line_start >= big.line_start && c.line_end <= big.line_end);
            assert!(!c.text.starts_with('\n') && !c.text.ends_with('\n'));
        }
        assert_eq!(chunks[0].line_start, 10);
        assert_eq!(chunks.last().unwrap().line_end, big.line_end);
    }

    #[test]
    fn test_blank_nodes_skipped() {
        let nodes = vec![node(NodeKind::Constant, Some("X"), 1, "   ")];
        assert!(chunk_nodes(&nodes, "   ", &ChunkerConfig::default()).is_empty());
    }

    #[test]
    fn test_empty_input() {
        assert!(chunk_nodes(&[], "", &ChunkerConfig::default()).is_empty());
    }
}
