//! Abbreviated versions shared by two revisions of a document

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Request, StatusCode};
use std::collections::HashMap;
use std::sync::Arc;
use strapdown_core::{CommitMeta, DocPath, MemoryStore, RevisionId, VersionStore};
use strapdown_http::{Config, WikiHandler};

/// Commit until two revisions of `doc` share their first seven hex digits
async fn colliding_revisions(store: &MemoryStore, doc: &DocPath) -> (String, RevisionId, RevisionId) {
    let mut seen = HashMap::new();
    for i in 0..300_000 {
        let id = store
            .commit(doc, Bytes::from(format!("v{}\n", i)), CommitMeta::new("t", "m"))
            .await
            .unwrap();
        let short = id.to_hex()[..7].to_string();
        if let Some(first) = seen.insert(short.clone(), id) {
            return (short, first, id);
        }
    }
    panic!("no shared prefix found");
}

async fn status_of(handler: &WikiHandler, uri: &str) -> StatusCode {
    let req = Request::builder().uri(uri).body(Full::new(Bytes::new())).unwrap();
    handler.handle(req).await.status()
}

#[tokio::test]
async fn test_ambiguous_version_is_conflict() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = MemoryStore::new();
    let doc = DocPath::parse("doc.md").unwrap();
    let (short, first, second) = colliding_revisions(&store, &doc).await;
    let (_, latest) = store.head_content(&doc).await.unwrap().unwrap();
    std::fs::write(dir.path().join("doc.md"), &latest).unwrap();

    let config = Config {
        root: dir.path().to_path_buf(),
        ..Config::default()
    };
    let handler = WikiHandler::new(config, Arc::new(store));

    assert_eq!(status_of(&handler, &format!("/doc?version={}", short)).await, StatusCode::CONFLICT);
    assert_eq!(status_of(&handler, &format!("/doc?version={}", first.to_hex())).await, StatusCode::OK);

    assert_eq!(
        status_of(&handler, &format!("/doc?diff={},{}", short, second.to_hex())).await,
        StatusCode::CONFLICT
    );
    assert_eq!(
        status_of(&handler, &format!("/doc?diff={},{}", first.to_hex(), second.to_hex())).await,
        StatusCode::OK
    );
}
