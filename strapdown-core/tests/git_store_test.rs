//! Git-backed engine integration tests
//!
//! Drive the edit coordinator, diff engine and resolver against a real git
//! repository in a scratch directory.

use bytes::Bytes;
use std::sync::Arc;
use strapdown_core::{
    DiffEngine, DocPath, EditCoordinator, EngineError, GitStore, PathResolver, Resolution, RevisionPrefix,
    VersionStore, WorkingState,
};
use tempfile::TempDir;

fn doc(p: &str) -> DocPath {
    DocPath::parse(p).unwrap()
}

fn open(temp_dir: &TempDir) -> (Arc<GitStore>, EditCoordinator) {
    let store = Arc::new(GitStore::open_or_init(temp_dir.path()).unwrap());
    let coordinator = EditCoordinator::new(temp_dir.path(), store.clone());
    (store, coordinator)
}

#[tokio::test]
async fn test_edit_history_and_versions() {
    let temp_dir = TempDir::new().unwrap();
    let (store, coordinator) = open(&temp_dir);
    let d = doc("test.md");

    let r1 = coordinator.edit(&d, Bytes::from_static(b"B1"), "anonymous@127.0.0.1").await.unwrap();
    let r2 = coordinator.edit(&d, Bytes::from_static(b"B2"), "anonymous@127.0.0.1").await.unwrap();

    let history = store.history(&d, None).await.unwrap();
    assert!(history.len() >= 2);
    assert_eq!(history[0].id, r2.revision);
    assert_eq!(history[1].id, r1.revision);
    assert_eq!(store.read(&d, history[0].id).await.unwrap(), Bytes::from_static(b"B2"));
    assert_eq!(store.read(&d, history[1].id).await.unwrap(), Bytes::from_static(b"B1"));

    // the commit is visible through plain git as well
    let repo = git2::Repository::open(temp_dir.path()).unwrap();
    let head = repo.head().unwrap().peel_to_commit().unwrap();
    assert_eq!(head.id().to_string(), r2.revision.to_hex());
    assert_eq!(head.message(), Some("update test.md"));
}

#[tokio::test]
async fn test_prefix_resolution_matches_full_id() {
    let temp_dir = TempDir::new().unwrap();
    let (store, coordinator) = open(&temp_dir);
    let d = doc("prefix.md");
    let outcome = coordinator.edit(&d, Bytes::from_static(b"x"), "a").await.unwrap();
    let full = outcome.revision.to_hex();

    for len in 7..=40 {
        let prefix = RevisionPrefix::parse(&full[..len]).unwrap();
        assert_eq!(store.resolve(&d, &prefix).await.unwrap(), outcome.revision);
    }
}

#[tokio::test]
async fn test_diff_between_revisions() {
    let temp_dir = TempDir::new().unwrap();
    let (store, coordinator) = open(&temp_dir);
    let d = doc("test_diff.md");

    coordinator.edit(&d, Bytes::from_static(b"# test diff\n\n"), "a").await.unwrap();
    coordinator
        .edit(&d, Bytes::from_static(b"# test diff\n\nadd an newline here \n"), "a")
        .await
        .unwrap();
    let history = store.history(&d, None).await.unwrap();
    let (newest, oldest) = (history[0].id.to_hex(), history[1].id.to_hex());

    let engine = DiffEngine::new(store.clone());
    let a = RevisionPrefix::parse(&newest[..13]).unwrap();
    let b = RevisionPrefix::parse(&oldest[..13]).unwrap();
    let result = engine.diff(&d, &a, &b).await.unwrap();
    assert_eq!(result.title(), format!("Diff for file from {} to {}", &newest[..13], &oldest[..13]));
    assert_eq!(result.deletions(), 1);

    assert!(matches!(engine.diff(&d, &a, &a).await, Err(EngineError::BadParameter(_))));

    // a revision of another document does not count
    let other = coordinator.edit(&doc("other.md"), Bytes::from_static(b"o"), "a").await.unwrap();
    let other_prefix = RevisionPrefix::parse(&other.revision.to_hex()).unwrap();
    let first = RevisionPrefix::parse(&oldest).unwrap();
    assert!(matches!(
        engine.diff(&doc("other.md"), &first, &other_prefix).await,
        Err(EngineError::BadParameter(_))
    ));
}

#[tokio::test]
async fn test_external_modification_is_detected() {
    let temp_dir = TempDir::new().unwrap();
    let (store, coordinator) = open(&temp_dir);
    let d = doc("live.md");

    let outcome = coordinator.edit(&d, Bytes::from_static(b"committed"), "a").await.unwrap();
    std::fs::write(temp_dir.path().join("live.md"), "edited outside").unwrap();

    assert_eq!(coordinator.working_state(&d).await.unwrap(), WorkingState::Modified(outcome.revision));
    assert_eq!(store.history(&d, None).await.unwrap().len(), 1);
    assert_eq!(store.read(&d, outcome.revision).await.unwrap(), Bytes::from_static(b"committed"));
}

#[tokio::test]
async fn test_resolver_sees_committed_documents() {
    let temp_dir = TempDir::new().unwrap();
    let (_store, coordinator) = open(&temp_dir);
    coordinator.edit(&doc("sub/.md"), Bytes::from_static(b"index"), "a").await.unwrap();

    let resolver = PathResolver::new(temp_dir.path());
    assert_eq!(
        resolver.resolve("/sub/").await.unwrap(),
        Resolution::IndexDocument { dir: doc("sub"), doc: doc("sub/.md"), exists: true }
    );
    assert_eq!(resolver.resolve("/.git/HEAD").await.unwrap(), Resolution::Hidden(doc(".git/HEAD")));
}

#[tokio::test]
async fn test_concurrent_edits_of_different_documents() {
    let temp_dir = TempDir::new().unwrap();
    let (store, coordinator) = open(&temp_dir);
    let coordinator = Arc::new(coordinator);

    let mut tasks = Vec::new();
    for i in 0..6 {
        let coordinator = coordinator.clone();
        tasks.push(tokio::spawn(async move {
            let d = DocPath::parse(&format!("doc{}.md", i)).unwrap();
            coordinator.edit(&d, Bytes::from(format!("content {}", i)), "a").await.unwrap();
            d
        }));
    }
    for task in tasks {
        let d = task.await.unwrap();
        let history = store.history(&d, None).await.unwrap();
        assert_eq!(history.len(), 1);
    }
}
