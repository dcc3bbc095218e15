//! End-to-end tests driving `RelgraphService` over the in-memory datastore.

use std::sync::Arc;

use futures::StreamExt;
use metrics_exporter_prometheus::PrometheusBuilder;

use relgraph_domain::model::{parse, TupleKey, UserRef};
use relgraph_domain::resolver::{
    CheckRequest, ExpandNode, ExpandRequest, ListObjectsRequest, ListUsersRequest, UserFilter,
};
use relgraph_domain::{DomainError, ErrorCode};
use relgraph_server::handlers::{Assertion, ReadFilter, WriteRequest};
use relgraph_server::observability::MetricsState;
use relgraph_server::{RelgraphService, ServerConfig};
use relgraph_storage::{MemoryDataStore, TupleOperation};

const MODEL: &str = r#"
model
  schema 1.1

type user

type group
  relations
    define member: [user, group#member]

type folder
  relations
    define parent: [folder]
    define viewer: [user] or viewer from parent

type document
  relations
    define owner: [user]
    define parent: [folder]
    define viewer: [user, user:*, group#member] or owner or viewer from parent
    define blocked: [user]
    define commenter: viewer but not blocked
"#;

type Service = RelgraphService<MemoryDataStore>;

struct Fixture {
    service: Service,
    store_id: String,
    model_id: String,
}

async fn fixture_with(config: ServerConfig) -> Fixture {
    let service = RelgraphService::new(MemoryDataStore::new_shared(), &config);
    let store = service.create_store("tests").await.unwrap();
    let model_id = service
        .write_authorization_model(&store.id, parse(MODEL).unwrap())
        .await
        .unwrap();
    Fixture {
        service,
        store_id: store.id,
        model_id,
    }
}

async fn fixture() -> Fixture {
    fixture_with(ServerConfig::default()).await
}

fn key(object: &str, relation: &str, user: &str) -> TupleKey {
    TupleKey::new(object, relation, user)
}

impl Fixture {
    async fn write(&self, tuples: &[(&str, &str, &str)]) {
        let request = tuples
            .iter()
            .fold(WriteRequest::new(&self.store_id), |request, (o, r, u)| {
                request.write(key(o, r, u))
            });
        self.service.write(&request).await.unwrap();
    }

    async fn check(&self, object: &str, relation: &str, user: &str) -> bool {
        self.service
            .check(&CheckRequest::new(&self.store_id, object, relation, user))
            .await
            .unwrap()
            .allowed
    }

    async fn all_tuples(&self) -> Vec<TupleKey> {
        let mut tuples = self
            .service
            .read(&self.store_id, &ReadFilter::default(), Some(100), None)
            .await
            .unwrap()
            .tuples;
        tuples.sort_by(|a, b| a.to_string().cmp(&b.to_string()));
        tuples
    }
}

// ========== Section 1: Scenarios ==========

#[tokio::test]
async fn test_owner_is_a_viewer() {
    let f = fixture().await;
    f.write(&[("document:1", "owner", "user:anne")]).await;

    assert!(f.check("document:1", "viewer", "user:anne").await);
    assert!(f.check("document:1", "owner", "user:anne").await);
    assert!(!f.check("document:1", "viewer", "user:bob").await);
}

#[tokio::test]
async fn test_group_userset_membership() {
    let f = fixture().await;
    f.write(&[
        ("group:eng", "member", "user:anne"),
        ("group:all", "member", "group:eng#member"),
        ("document:1", "viewer", "group:all#member"),
    ])
    .await;

    assert!(f.check("document:1", "viewer", "user:anne").await);
    assert!(f.check("document:1", "viewer", "group:eng#member").await);
    assert!(!f.check("document:1", "viewer", "user:bob").await);
}

#[tokio::test]
async fn test_folder_inheritance_and_cycles() {
    let f = fixture().await;
    f.write(&[
        ("folder:a", "parent", "folder:b"),
        ("folder:b", "parent", "folder:a"),
        ("folder:b", "viewer", "user:anne"),
        ("document:1", "parent", "folder:a"),
    ])
    .await;

    assert!(f.check("document:1", "viewer", "user:anne").await);
    assert!(!f.check("document:1", "viewer", "user:bob").await);
}

#[tokio::test]
async fn test_two_document_list_objects_paging() {
    let f = fixture().await;
    f.write(&[
        ("document:2", "owner", "user:anne"),
        ("document:1", "viewer", "user:anne"),
    ])
    .await;

    let request = ListObjectsRequest::new(&f.store_id, "document", "viewer", "user:anne");
    let first = f
        .service
        .list_objects(&request.clone().with_page(1, None))
        .await
        .unwrap();
    assert_eq!(first.objects, vec!["document:1".to_string()]);
    let token = first.continuation_token.expect("second page");

    let second = f
        .service
        .list_objects(&request.clone().with_page(1, Some(token)))
        .await
        .unwrap();
    assert_eq!(second.objects, vec!["document:2".to_string()]);
    assert!(second.continuation_token.is_none());

    let err = f
        .service
        .list_objects(&request.with_page(1, Some("garbage".to_string())))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidContinuationToken);
}

#[tokio::test]
async fn test_streamed_list_objects() {
    let f = fixture().await;
    f.write(&[
        ("document:1", "viewer", "user:anne"),
        ("document:2", "owner", "user:anne"),
        ("document:3", "viewer", "user:bob"),
    ])
    .await;

    let stream = f
        .service
        .streamed_list_objects(&ListObjectsRequest::new(
            &f.store_id,
            "document",
            "viewer",
            "user:anne",
        ))
        .await
        .unwrap();
    assert_eq!(stream.model_id(), Some(f.model_id.as_str()));

    let mut objects: Vec<String> = stream.map(Result::unwrap).collect().await;
    objects.sort();
    assert_eq!(objects, vec!["document:1", "document:2"]);
}

#[tokio::test]
async fn test_expand_and_list_users() {
    let f = fixture().await;
    f.write(&[
        ("document:1", "viewer", "user:*"),
        ("document:1", "blocked", "user:bob"),
        ("document:1", "owner", "user:anne"),
    ])
    .await;

    let expanded = f
        .service
        .expand(&ExpandRequest::new(&f.store_id, "document:1", "viewer"))
        .await
        .unwrap();
    assert!(matches!(expanded.tree.root, ExpandNode::Union { .. }));

    let users = f
        .service
        .list_users(&ListUsersRequest::new(
            &f.store_id,
            "document:1",
            "commenter",
            vec![UserFilter::new("user")],
        ))
        .await
        .unwrap();
    assert!(users.users.contains(&UserRef::wildcard("user")));
    assert!(users.users.contains(&UserRef::object("user", "anne")));
    assert_eq!(users.excluded_users, vec![UserRef::object("user", "bob")]);
}

// ========== Section 2: Writes ==========

#[tokio::test]
async fn test_write_conflicts_apply_nothing() {
    let f = fixture().await;
    f.write(&[("document:1", "viewer", "user:anne")]).await;

    let duplicate = WriteRequest::new(&f.store_id)
        .write(key("document:2", "viewer", "user:bob"))
        .write(key("document:1", "viewer", "user:anne"));
    let err = f.service.write(&duplicate).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::ConditionalWriteError);

    let missing = WriteRequest::new(&f.store_id)
        .write(key("document:3", "viewer", "user:bob"))
        .delete(key("document:9", "viewer", "user:anne"));
    let err = f.service.write(&missing).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::ConditionalWriteError);

    assert_eq!(
        f.all_tuples().await,
        vec![key("document:1", "viewer", "user:anne")]
    );
}

#[tokio::test]
async fn test_write_validation() {
    let mut config = ServerConfig::default();
    config.storage.max_tuples_per_write = 2;
    let f = fixture_with(config).await;

    let err = f
        .service
        .write(&WriteRequest::new(&f.store_id))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ValidationError);

    let too_many = WriteRequest::new(&f.store_id)
        .write(key("document:1", "viewer", "user:a"))
        .write(key("document:1", "viewer", "user:b"))
        .write(key("document:1", "viewer", "user:c"));
    let err = f.service.write(&too_many).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::ValidationError);

    let repeated = WriteRequest::new(&f.store_id)
        .write(key("document:1", "viewer", "user:a"))
        .delete(key("document:1", "viewer", "user:a"));
    let err = f.service.write(&repeated).await.unwrap_err();
    assert!(matches!(err, DomainError::InvalidTuple { .. }));

    for (object, relation, user) in [
        ("document:1", "nope", "user:anne"),
        ("document:1", "commenter", "user:anne"),
        ("document:1", "owner", "group:eng#member"),
        ("document:1", "owner", "robot:r2"),
        ("widget:1", "viewer", "user:anne"),
    ] {
        let request = WriteRequest::new(&f.store_id).write(key(object, relation, user));
        let err = f.service.write(&request).await.unwrap_err();
        assert_eq!(
            err.code(),
            ErrorCode::ValidationError,
            "{object}#{relation}@{user} should be rejected"
        );
    }

    let unknown_store = WriteRequest::new("missing").write(key("document:1", "viewer", "user:a"));
    let err = f.service.write(&unknown_store).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);

    assert!(f.all_tuples().await.is_empty());
}

// ========== Section 3: Models and Assertions ==========

#[tokio::test]
async fn test_model_commands() {
    let f = fixture().await;

    let model = f
        .service
        .read_authorization_model(&f.store_id, &f.model_id)
        .await
        .unwrap();
    assert_eq!(model.id.as_deref(), Some(f.model_id.as_str()));
    assert_eq!(model.type_definitions.len(), 4);

    let invalid = parse("type document\n  relations\n    define viewer: editor\n").unwrap();
    let err = f
        .service
        .write_authorization_model(&f.store_id, invalid)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ValidationError);

    let err = f
        .service
        .read_authorization_model(&f.store_id, "01ARZ3NDEKTSV4RRFFQ69G5FAV")
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);
}

#[tokio::test]
async fn test_newest_model_serves_queries() {
    let f = fixture().await;
    f.write(&[("document:1", "owner", "user:anne")]).await;

    let stricter = MODEL.replace(
        "define viewer: [user, user:*, group#member] or owner or viewer from parent",
        "define viewer: [user, user:*, group#member] or viewer from parent",
    );
    let newer = f
        .service
        .write_authorization_model(&f.store_id, parse(&stricter).unwrap())
        .await
        .unwrap();

    assert!(!f.check("document:1", "viewer", "user:anne").await);
    let pinned = f
        .service
        .check(
            &CheckRequest::new(&f.store_id, "document:1", "viewer", "user:anne")
                .with_model_id(&f.model_id),
        )
        .await
        .unwrap();
    assert!(pinned.allowed);

    let page = f
        .service
        .read_authorization_models(&f.store_id, Some(1), None)
        .await
        .unwrap();
    assert_eq!(page.models[0].id.as_deref(), Some(newer.as_str()));
}

#[tokio::test]
async fn test_read_authorization_models_pages_newest_first() {
    let f = fixture().await;
    let mut written = vec![f.model_id.clone()];
    for _ in 0..2 {
        written.push(
            f.service
                .write_authorization_model(&f.store_id, parse(MODEL).unwrap())
                .await
                .unwrap(),
        );
    }
    written.reverse();

    let first = f
        .service
        .read_authorization_models(&f.store_id, Some(2), None)
        .await
        .unwrap();
    let token = first.continuation_token.clone().expect("one more model");
    let second = f
        .service
        .read_authorization_models(&f.store_id, Some(2), Some(token))
        .await
        .unwrap();
    assert!(second.continuation_token.is_none());

    let ids: Vec<String> = first
        .models
        .iter()
        .chain(&second.models)
        .filter_map(|m| m.id.clone())
        .collect();
    assert_eq!(ids, written);
}

#[tokio::test]
async fn test_read_authorization_models_invalid_continuation_token() {
    let f = fixture().await;
    let err = f
        .service
        .read_authorization_models(&f.store_id, None, Some("not-a-token".to_string()))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidContinuationToken);
}

#[tokio::test]
async fn test_assertions_round_trip() {
    let f = fixture().await;

    assert!(f
        .service
        .read_assertions(&f.store_id, &f.model_id)
        .await
        .unwrap()
        .is_empty());

    let assertions = vec![
        Assertion::new(key("document:1", "viewer", "user:anne"), true),
        Assertion::new(key("document:1", "owner", "user:bob"), false),
    ];
    f.service
        .write_assertions(&f.store_id, &f.model_id, assertions.clone())
        .await
        .unwrap();
    assert_eq!(
        f.service
            .read_assertions(&f.store_id, &f.model_id)
            .await
            .unwrap(),
        assertions
    );

    let err = f
        .service
        .write_assertions(&f.store_id, "01ARZ3NDEKTSV4RRFFQ69G5FAV", assertions)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);

    let bad = vec![Assertion::new(key("document:1", "commenter", "user:anne"), true)];
    let err = f
        .service
        .write_assertions(&f.store_id, &f.model_id, bad)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ValidationError);
}

// ========== Section 4: Reads and the Change Feed ==========

#[tokio::test]
async fn test_read_pagination() {
    let f = fixture().await;
    f.write(&[
        ("document:1", "viewer", "user:a"),
        ("document:1", "viewer", "user:b"),
        ("document:1", "viewer", "user:c"),
        ("document:2", "viewer", "user:a"),
    ])
    .await;

    let filter = ReadFilter {
        object: Some("document:1".to_string()),
        ..Default::default()
    };
    let first = f
        .service
        .read(&f.store_id, &filter, Some(2), None)
        .await
        .unwrap();
    assert_eq!(first.tuples.len(), 2);
    let second = f
        .service
        .read(&f.store_id, &filter, Some(2), first.continuation_token.clone())
        .await
        .unwrap();
    assert_eq!(second.tuples.len(), 1);
    assert!(second.continuation_token.is_none());

    let other_filter = ReadFilter {
        object: Some("document:2".to_string()),
        ..Default::default()
    };
    let err = f
        .service
        .read(&f.store_id, &other_filter, Some(2), first.continuation_token)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidContinuationToken);

    let by_user = ReadFilter {
        object: Some("document:".to_string()),
        relation: Some("viewer".to_string()),
        user: Some("user:a".to_string()),
    };
    let page = f
        .service
        .read(&f.store_id, &by_user, None, None)
        .await
        .unwrap();
    assert_eq!(page.tuples.len(), 2);

    let err = f
        .service
        .read(&f.store_id, &filter, Some(101), None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ValidationError);

    let err = f
        .service
        .read(&f.store_id, &filter, None, Some("garbage".to_string()))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidContinuationToken);
}

#[tokio::test]
async fn test_read_changes_follows_commit_order() {
    let f = fixture().await;
    f.write(&[("document:1", "viewer", "user:a")]).await;
    f.write(&[("folder:x", "viewer", "user:a")]).await;
    f.service
        .write(&WriteRequest::new(&f.store_id).delete(key("document:1", "viewer", "user:a")))
        .await
        .unwrap();

    let first = f
        .service
        .read_changes(&f.store_id, None, Some(2), None)
        .await
        .unwrap();
    let operations: Vec<TupleOperation> = first.changes.iter().map(|c| c.operation).collect();
    assert_eq!(operations, vec![TupleOperation::Write, TupleOperation::Write]);
    assert_eq!(
        first.changes[1].tuple_key,
        key("folder:x", "viewer", "user:a")
    );

    let second = f
        .service
        .read_changes(&f.store_id, None, Some(2), first.continuation_token)
        .await
        .unwrap();
    assert_eq!(second.changes.len(), 1);
    assert_eq!(second.changes[0].operation, TupleOperation::Delete);
    assert!(second.changes[0].timestamp >= first.changes[0].timestamp);

    let idle = f
        .service
        .read_changes(&f.store_id, None, Some(2), second.continuation_token.clone())
        .await
        .unwrap();
    assert!(idle.changes.is_empty());
    assert_eq!(idle.continuation_token, second.continuation_token);

    let documents = f
        .service
        .read_changes(&f.store_id, Some("document"), None, None)
        .await
        .unwrap();
    assert_eq!(documents.changes.len(), 2);
}

// ========== Section 5: Stores ==========

#[tokio::test]
async fn test_store_commands() {
    let service = RelgraphService::new(Arc::new(MemoryDataStore::new()), &ServerConfig::default());

    let err = service.create_store("  ").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::ValidationError);

    let a = service.create_store("a").await.unwrap();
    let b = service.create_store("b").await.unwrap();
    assert_ne!(a.id, b.id);
    assert_eq!(service.get_store(&a.id).await.unwrap().name, "a");

    let page = service.list_stores(Some(1), None).await.unwrap();
    assert_eq!(page.stores.len(), 1);
    let rest = service
        .list_stores(Some(1), page.continuation_token)
        .await
        .unwrap();
    assert_eq!(rest.stores.len(), 1);
    assert!(rest.continuation_token.is_none());

    service.delete_store(&a.id).await.unwrap();
    let err = service.get_store(&a.id).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);

    let err = service
        .check(&CheckRequest::new(&a.id, "document:1", "viewer", "user:anne"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);
}

#[tokio::test]
async fn test_deleted_store_stops_serving_cached_models() {
    let f = fixture().await;
    let self_member = CheckRequest::new(&f.store_id, "group:eng", "member", "group:eng#member");
    assert!(f.service.check(&self_member).await.unwrap().allowed);
    f.service
        .read_authorization_model(&f.store_id, &f.model_id)
        .await
        .unwrap();

    f.service.delete_store(&f.store_id).await.unwrap();

    let err = f
        .service
        .read_authorization_model(&f.store_id, &f.model_id)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);
    let err = f.service.check(&self_member).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);
    let pinned = self_member.clone().with_model_id(&f.model_id);
    let err = f.service.check(&pinned).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);
}

#[test]
fn test_service_from_config_uses_memory_backend() {
    let service = RelgraphService::from_config(&ServerConfig::default()).unwrap();
    assert_eq!(service.resolver().config().max_depth, 25);

    let mut config = ServerConfig::default();
    config.storage.backend = "postgres".to_string();
    assert!(RelgraphService::from_config(&config).is_err());
}

// ========== Section 6: Metrics ==========

#[test]
fn test_rpc_metrics_are_recorded() {
    let recorder = PrometheusBuilder::new().build_recorder();
    let state = MetricsState::new(recorder.handle());
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    metrics::with_local_recorder(&recorder, || {
        runtime.block_on(async {
            let f = fixture().await;
            f.write(&[("document:1", "viewer", "user:anne")]).await;
            assert!(f.check("document:1", "viewer", "user:anne").await);
            let _ = f
                .service
                .check(&CheckRequest::new("missing", "document:1", "viewer", "user:anne"))
                .await;

            let stream = f
                .service
                .streamed_list_objects(&ListObjectsRequest::new(
                    &f.store_id,
                    "document",
                    "viewer",
                    "user:anne",
                ))
                .await
                .unwrap();
            let objects: Vec<_> = stream.collect().await;
            assert_eq!(objects.len(), 1);
        })
    });

    let output = state.render();
    assert!(output.contains("relgraph_rpc_handled_total"));
    assert!(output.contains(r#"rpc_service="relgraph.v1.RelgraphService""#));
    assert!(output.contains(r#"rpc_method="Check""#));
    assert!(output.contains(r#"rpc_code="OK""#));
    assert!(output.contains(r#"rpc_code="NotFound""#));
    assert!(output.contains(r#"rpc_method="Write""#));
    assert!(output.contains(r#"rpc_method="StreamedListObjects""#));
    assert!(output.contains("relgraph_rpc_handling_seconds"));
}
