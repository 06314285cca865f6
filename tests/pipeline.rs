//! End-to-end pipeline tests: discovery, change detection, parsing,
//! chunking, and retrieval against a real SQLite index.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use kontext::config::{self, Config};
use kontext::discovery::discover;
use kontext::incremental::{compute_changes, UnchangedHint};
use kontext::indexer::Indexer;
use kontext::sqlite_store::SqliteStore;
use kontext_core::changes::PriorSnapshot;
use kontext_core::models::{ChangeSet, Language, NodeKind, SearchFilters};
use kontext_core::plan::{default_plan, execute_plan};
use kontext_core::search::dependency::{self, Direction};
use kontext_core::search::symbol;
use kontext_core::store::{MatchMode, Store, SymbolQuery};
use tempfile::TempDir;

const AUTH_TS: &str = r#"import { db } from "./db";

export function validateToken(token: string): boolean {
  return token.length > 0 && db.has(token);
}
"#;

const SESSION_TS: &str = r#"import { validateToken } from "./auth";

export class Session {
  constructor(private token: string) {}

  isValid(): boolean {
    return validateToken(this.token);
  }
}
"#;

const APP_PY: &str = r#"MAX_RETRIES = 3


def connect(url):
    for _ in range(MAX_RETRIES):
        pass
    return url
"#;

fn setup_tree() -> TempDir {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("src");
    fs::create_dir_all(&src).unwrap();
    fs::write(src.join("auth.ts"), AUTH_TS).unwrap();
    fs::write(src.join("session.ts"), SESSION_TS).unwrap();
    fs::write(tmp.path().join("app.py"), APP_PY).unwrap();
    tmp
}

async fn open_store(root: &Path) -> Arc<SqliteStore> {
    fs::create_dir_all(config::ctx_dir(root)).unwrap();
    let (store, _) = SqliteStore::open(&config::db_path(root)).await.unwrap();
    Arc::new(store)
}

fn indexer(root: &Path, store: &Arc<SqliteStore>) -> Indexer {
    Indexer::new(root, store.clone(), None, Config::default())
}

/// Classify the working tree against what the store holds, without writing.
async fn detect(root: &Path, store: &SqliteStore) -> ChangeSet {
    let discovered = discover(root, &Config::default().indexing).unwrap();
    let prior = PriorSnapshot::from_records(&store.list_files().await.unwrap());
    compute_changes(&discovered, &prior, &UnchangedHint::none(), 4).await
}

#[tokio::test]
async fn test_index_then_exact_symbol_lookup() {
    let tmp = setup_tree();
    let store = open_store(tmp.path()).await;

    let report = indexer(tmp.path(), &store).index_root(false).await.unwrap();
    assert_eq!(report.files_scanned, 3);
    assert_eq!(report.files_indexed, 3);
    assert!(report.errors.is_empty(), "{:?}", report.errors);

    let query = SymbolQuery {
        name: Some("validateToken".into()),
        mode: MatchMode::Exact,
        ..Default::default()
    };
    let results = symbol::search(store.as_ref(), &query, 10).await.unwrap();
    assert_eq!(results.len(), 1);
    let hit = &results[0];
    assert_eq!(hit.file_path, "src/auth.ts");
    assert_eq!(hit.kind, NodeKind::Function);
    assert_eq!(hit.score, 1.0);
    assert_eq!((hit.line_start, hit.line_end), (3, 5));

    let paths = store.get_all_file_paths().await.unwrap();
    assert_eq!(paths, vec!["app.py", "src/auth.ts", "src/session.ts"]);
}

#[tokio::test]
async fn test_second_pass_reports_everything_unchanged() {
    let tmp = setup_tree();
    let store = open_store(tmp.path()).await;
    indexer(tmp.path(), &store).index_root(false).await.unwrap();

    let changes = detect(tmp.path(), &store).await;
    assert_eq!(
        changes.unchanged,
        vec!["app.py", "src/auth.ts", "src/session.ts"]
    );
    assert!(changes.added.is_empty());
    assert!(changes.modified.is_empty());
    assert!(changes.deleted.is_empty());

    let report = indexer(tmp.path(), &store).index_root(false).await.unwrap();
    assert_eq!(report.files_indexed, 0);
    assert_eq!(report.files_unchanged, 3);
}

#[tokio::test]
async fn test_modified_file_is_the_only_change() {
    let tmp = setup_tree();
    let store = open_store(tmp.path()).await;
    indexer(tmp.path(), &store).index_root(false).await.unwrap();

    fs::write(
        tmp.path().join("app.py"),
        format!("{APP_PY}\n\ndef disconnect():\n    pass\n"),
    )
    .unwrap();

    let changes = detect(tmp.path(), &store).await;
    assert_eq!(changes.modified, vec!["app.py"]);
    assert_eq!(changes.unchanged, vec!["src/auth.ts", "src/session.ts"]);
    assert!(changes.added.is_empty());
    assert!(changes.deleted.is_empty());

    let report = indexer(tmp.path(), &store).index_root(false).await.unwrap();
    assert_eq!(report.files_indexed, 1);

    let query = SymbolQuery {
        name: Some("disconnect".into()),
        mode: MatchMode::Exact,
        ..Default::default()
    };
    let results = symbol::search(store.as_ref(), &query, 10).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].language, Language::Python);
}

#[tokio::test]
async fn test_deleted_file_leaves_the_index() {
    let tmp = setup_tree();
    let store = open_store(tmp.path()).await;
    indexer(tmp.path(), &store).index_root(false).await.unwrap();

    fs::remove_file(tmp.path().join("src/session.ts")).unwrap();

    let changes = detect(tmp.path(), &store).await;
    assert_eq!(changes.deleted, vec!["src/session.ts"]);
    assert_eq!(changes.unchanged, vec!["app.py", "src/auth.ts"]);

    let report = indexer(tmp.path(), &store).index_root(false).await.unwrap();
    assert_eq!(report.files_removed, 1);
    assert_eq!(
        store.get_all_file_paths().await.unwrap(),
        vec!["app.py", "src/auth.ts"]
    );
    assert_eq!(store.chunks_for_file("src/session.ts").await.unwrap().len(), 0);
}

#[tokio::test]
async fn test_hybrid_find_surfaces_declaration() {
    let tmp = setup_tree();
    let store = open_store(tmp.path()).await;
    indexer(tmp.path(), &store).index_root(false).await.unwrap();

    let plan = default_plan("validateToken", false);
    let results = execute_plan(
        store.as_ref(),
        None,
        &plan,
        5,
        50,
        &SearchFilters::default(),
    )
    .await
    .unwrap();
    let top = results
        .iter()
        .take(2)
        .find(|r| r.name.as_deref() == Some("validateToken"))
        .expect("declaration should rank near the top");
    assert_eq!(top.file_path, "src/auth.ts");

    let python_only = execute_plan(
        store.as_ref(),
        None,
        &default_plan("connect", false),
        5,
        50,
        &SearchFilters::language(Language::Python),
    )
    .await
    .unwrap();
    assert!(python_only.iter().all(|r| r.language == Language::Python));
}

#[tokio::test]
async fn test_reverse_dependencies() {
    let tmp = setup_tree();
    let store = open_store(tmp.path()).await;
    indexer(tmp.path(), &store).index_root(false).await.unwrap();

    let importers = dependency::search(
        store.as_ref(),
        "src/auth.ts",
        Direction::Importers,
        10,
        &SearchFilters::default(),
    )
    .await
    .unwrap();
    assert!(importers.iter().any(|r| r.file_path == "src/session.ts"));
    assert!(importers.iter().all(|r| r.file_path != "src/auth.ts"));
}

#[tokio::test]
async fn test_chunk_at_location() {
    let tmp = setup_tree();
    let store = open_store(tmp.path()).await;
    indexer(tmp.path(), &store).index_root(false).await.unwrap();

    let record = store.chunk_at("src/auth.ts", 4).await.unwrap().unwrap();
    assert_eq!(record.chunk.name.as_deref(), Some("validateToken"));
    assert!(store.chunk_at("src/auth.ts", 400).await.unwrap().is_none());
}
