//! End-to-end events query tests against the in-memory store.

mod common;

use common::{event_id, request, TestContext, TestEventBuilder, BACKEND, FRONTEND};
use discover_lib::core::{DiscoverError, OutputType, Value};
use discover_lib::query::{EventsRequest, Principal};
use pretty_assertions::assert_eq;

#[tokio::test]
async fn test_round_trip_filtered_to_one_project() {
    let ctx = TestContext::new();
    ctx.store(TestEventBuilder::error('a', FRONTEND, "boom").build());
    ctx.store(TestEventBuilder::error('b', BACKEND, "boom").build());

    let response = ctx
        .query(&request(&["id", "project.id"]).projects(&[FRONTEND as i64]))
        .await
        .unwrap();

    assert_eq!(response.data.len(), 1);
    let row = &response.data[0];
    assert_eq!(row.len(), 2);
    assert_eq!(row.get("id"), Some(&Value::from(event_id('a'))));
    assert_eq!(row.get("project.id"), Some(&Value::Integer(1)));
    assert_eq!(response.meta.get("id"), Some(&OutputType::String));
    assert_eq!(response.meta.get("project.id"), Some(&OutputType::Integer));
}

#[tokio::test]
async fn test_field_limit_boundary() {
    let ctx = TestContext::new();
    let twenty: Vec<String> = (0..20).map(|i| format!("tag{i}")).collect();
    assert!(ctx.query(&EventsRequest::new(&twenty).stats_period("24h")).await.is_ok());

    let mut too_many = twenty.clone();
    too_many.push("tag20".to_string());
    match ctx.query(&EventsRequest::new(&too_many).stats_period("24h")).await {
        Err(DiscoverError::TooManyFields { max }) => assert_eq!(max, 20),
        other => panic!("Expected TooManyFields, got {:?}", other),
    }
}

#[tokio::test]
async fn test_identical_requests_are_idempotent() {
    let ctx = TestContext::new();
    for (i, c) in ['a', 'b', 'c', 'd'].into_iter().enumerate() {
        let project = if i % 2 == 0 { FRONTEND } else { BACKEND };
        ctx.store(
            TestEventBuilder::error(c, project, "boom")
                .tag("browser", if i < 2 { "firefox" } else { "chrome" })
                .build(),
        );
    }

    let request = request(&["browser", "count()", "project"]).sort(&["-count"]);
    let first = ctx.query(&request).await.unwrap();
    let second = ctx.query(&request).await.unwrap();
    assert_eq!(first.data, second.data);
    assert_eq!(first.meta, second.meta);
    assert_eq!(first.data.len(), 4);
}

#[tokio::test]
async fn test_deleted_issue_renders_unknown() {
    let ctx = TestContext::new();
    ctx.store(TestEventBuilder::error('a', FRONTEND, "first failure").build());
    let second = ctx
        .store(TestEventBuilder::error('b', FRONTEND, "second failure").build())
        .unwrap();
    assert!(ctx.store.delete_group(second));

    let response = ctx
        .query(&request(&["issue", "count()"]).sort(&["issue"]).projects(&[FRONTEND as i64]))
        .await
        .unwrap();

    assert_eq!(response.data.len(), 2);
    assert_eq!(response.data[0].get("issue"), Some(&Value::from("FRONTEND-1")));
    assert_eq!(response.data[1].get("issue"), Some(&Value::from("unknown")));
    assert_eq!(response.data[1].get("count"), Some(&Value::Integer(1)));
    assert_eq!(response.meta.get("issue"), Some(&OutputType::String));
}

#[tokio::test]
async fn test_misery_and_apdex() {
    let ctx = TestContext::new();
    let alice = [50.0, 100.0, 150.0, 200.0, 250.0, 280.0];
    let bob = [100.0, 200.0, 400.0, 500.0, 600.0, 1500.0];
    for (n, duration) in alice.iter().enumerate() {
        ctx.store(
            TestEventBuilder::transaction(n, FRONTEND, "/checkout", *duration)
                .user("alice")
                .build(),
        );
    }
    for (n, duration) in bob.iter().enumerate() {
        ctx.store(
            TestEventBuilder::transaction(n + 6, FRONTEND, "/checkout", *duration)
                .user("bob")
                .build(),
        );
    }

    let response = ctx
        .query(&request(&["transaction", "user_misery(300)", "apdex(300)"]))
        .await
        .unwrap();

    assert_eq!(response.data.len(), 1);
    let row = &response.data[0];
    assert_eq!(row.get("user_misery_300"), Some(&Value::Number(1.0)));
    match row.get("apdex_300") {
        // 8 satisfied, 3 tolerated, 1 frustrated
        Some(Value::Number(apdex)) => assert!((apdex - 9.5 / 12.0).abs() < 1e-9, "apdex was {apdex}"),
        other => panic!("Expected numeric apdex, got {:?}", other),
    }
    assert_eq!(response.meta.get("apdex_300"), Some(&OutputType::Number));
}

#[tokio::test]
async fn test_negated_project_filter() {
    let ctx = TestContext::new();
    ctx.store(TestEventBuilder::error('a', FRONTEND, "boom").build());
    ctx.store(TestEventBuilder::error('b', BACKEND, "boom").build());
    ctx.store(TestEventBuilder::error('c', FRONTEND, "bang").build());

    let response = ctx
        .query(&request(&["id", "project.name"]).query("!project:\"backend\""))
        .await
        .unwrap();

    assert_eq!(response.data.len(), 2);
    for row in &response.data {
        assert_eq!(row.get("project.name"), Some(&Value::from("frontend")));
    }
}

#[tokio::test]
async fn test_double_ampersand_is_free_text() {
    let ctx = TestContext::new();
    for n in 0..3 {
        ctx.store(TestEventBuilder::transaction(n, FRONTEND, "/home", 100.0).build());
    }

    let plain = ctx
        .query(&request(&["transaction", "count()"]).query("count():>0 event.type:transaction"))
        .await
        .unwrap();
    assert_eq!(plain.data.len(), 1);

    // `&&` is not an operator; the whole term searches event text instead.
    let quirk = ctx
        .query(&request(&["transaction", "count()"]).query("count():>0&& event.type:transaction"))
        .await
        .unwrap();
    assert!(quirk.data.is_empty());
}

#[tokio::test]
async fn test_syntax_error_reports_column() {
    let ctx = TestContext::new();
    match ctx.query(&request(&["id"]).query("(environment:prod")).await {
        Err(err @ DiscoverError::SearchSyntax { .. }) => {
            assert!(err.to_string().contains("column 1"));
            assert_eq!(err.status_code(), 400);
        },
        other => panic!("Expected SearchSyntax, got {:?}", other),
    }
}

#[tokio::test]
async fn test_project_name_added_next_to_id() {
    let ctx = TestContext::new();
    ctx.store(TestEventBuilder::error('a', BACKEND, "boom").build());

    let response = ctx.query(&request(&["id"])).await.unwrap();
    let keys: Vec<&str> = response.data[0].keys().collect();
    assert_eq!(keys, vec!["id", "project.name"]);
    assert_eq!(response.data[0].get("project.name"), Some(&Value::from("backend")));
}

#[tokio::test]
async fn test_pagination_links() {
    let ctx = TestContext::new();
    for (minutes, c) in [(10, 'a'), (20, 'b'), (30, 'c')] {
        ctx.store(TestEventBuilder::error(c, FRONTEND, "boom").minutes_ago(minutes).build());
    }

    let base = request(&["id", "timestamp"]).sort(&["-timestamp"]).per_page(2);
    let first = ctx.query(&base).await.unwrap();
    assert_eq!(first.data.len(), 2);
    assert_eq!(first.data[0].get("id"), Some(&Value::from(event_id('a'))));
    let links = first.links.unwrap();
    assert!(!links.previous.results);
    assert!(links.next.results);
    assert_eq!(links.next.cursor, "2:2:0");

    let second = ctx.query(&base.clone().cursor(links.next.cursor)).await.unwrap();
    assert_eq!(second.data.len(), 1);
    assert_eq!(second.data[0].get("id"), Some(&Value::from(event_id('c'))));
    let links = second.links.unwrap();
    assert!(links.previous.results);
    assert!(!links.next.results);

    let all = ctx
        .query(&request(&["id", "timestamp"]).sort(&["-timestamp"]).no_pagination())
        .await
        .unwrap();
    assert_eq!(all.data.len(), 3);
    assert!(all.links.is_none());

    // Without an explicit page size the cursor's own size applies.
    let resumed = ctx
        .query(&request(&["id", "timestamp"]).sort(&["-timestamp"]).cursor("2:2:0"))
        .await
        .unwrap();
    assert_eq!(resumed.data.len(), 1);
    assert_eq!(resumed.links.unwrap().next.cursor, "2:4:0");
}

#[tokio::test]
async fn test_cursor_at_largest_offset() {
    let ctx = TestContext::new();
    ctx.store(TestEventBuilder::error('a', FRONTEND, "boom").build());

    let response = ctx
        .query(&request(&["id"]).per_page(50).cursor(format!("50:{}:0", usize::MAX)))
        .await
        .unwrap();
    assert!(response.data.is_empty());
    let links = response.links.unwrap();
    assert!(!links.next.results);
    assert_eq!(links.next.cursor, format!("50:{}:0", usize::MAX));
}

#[tokio::test]
async fn test_invalid_page_size() {
    let ctx = TestContext::new();
    assert!(matches!(
        ctx.query(&request(&["id"]).per_page(500)).await,
        Err(DiscoverError::InvalidSearchQuery(_))
    ));
    assert!(matches!(
        ctx.query(&request(&["id"]).cursor("bogus")).await,
        Err(DiscoverError::InvalidSearchQuery(_))
    ));
    assert!(matches!(
        ctx.query(&request(&["id"]).cursor("500:0:0")).await,
        Err(DiscoverError::InvalidSearchQuery(_))
    ));
}

#[tokio::test]
async fn test_key_transaction_filter() {
    let ctx = TestContext::new();
    ctx.store(TestEventBuilder::transaction(0, FRONTEND, "/checkout", 100.0).build());
    ctx.store(TestEventBuilder::transaction(1, FRONTEND, "/home", 100.0).build());
    ctx.store.star_transaction(1, 1, FRONTEND, "/checkout");

    let response = ctx
        .query(&request(&["transaction", "count()"]).query("key_transaction:true"))
        .await
        .unwrap();

    assert_eq!(response.data.len(), 1);
    assert_eq!(response.data[0].get("transaction"), Some(&Value::from("/checkout")));
}

#[tokio::test]
async fn test_key_transaction_ignores_other_organizations() {
    let ctx = TestContext::new();
    ctx.store(TestEventBuilder::transaction(0, FRONTEND, "/checkout", 100.0).build());
    ctx.store.star_transaction(1, 2, FRONTEND, "/checkout");

    let response = ctx
        .query(&request(&["transaction", "count()"]).query("key_transaction:true"))
        .await
        .unwrap();
    assert!(response.data.is_empty());

    let response = ctx
        .query(&request(&["transaction", "key_transaction"]))
        .await
        .unwrap();
    assert_eq!(response.data[0].get("key_transaction"), Some(&Value::Integer(0)));
}

async fn ids_matching(ctx: &TestContext, query: &str) -> Vec<String> {
    let response = ctx.query(&request(&["id"]).query(query)).await.unwrap();
    let mut ids: Vec<String> = response
        .data
        .iter()
        .filter_map(|row| match row.get("id") {
            Some(Value::String(id)) => Some(id.clone()),
            _ => None,
        })
        .collect();
    ids.sort();
    ids
}

#[tokio::test]
async fn test_handled_and_unhandled_filters() {
    let ctx = TestContext::new();
    ctx.store(TestEventBuilder::error('a', FRONTEND, "handled").handled(Some(true)).build());
    ctx.store(TestEventBuilder::error('b', FRONTEND, "unhandled").handled(Some(false)).build());
    ctx.store(TestEventBuilder::error('c', FRONTEND, "undetermined").handled(None).build());

    // An undetermined mechanism counts as handled.
    assert_eq!(ids_matching(&ctx, "error.handled:1").await, vec![event_id('a'), event_id('c')]);
    assert_eq!(ids_matching(&ctx, "error.handled:0").await, vec![event_id('b')]);
    assert_eq!(ids_matching(&ctx, "error.unhandled:1").await, vec![event_id('b')]);
    assert_eq!(ids_matching(&ctx, "error.unhandled:0").await, vec![event_id('a'), event_id('c')]);
}

#[tokio::test]
async fn test_multiple_projects_need_global_views() {
    let mut ctx = TestContext::new();
    ctx.principal = Principal::new(1, 1);

    match ctx.query(&request(&["id"]).projects(&[1, 2])).await {
        Err(err @ DiscoverError::MultipleProjectsDenied) => assert_eq!(err.status_code(), 400),
        other => panic!("Expected MultipleProjectsDenied, got {:?}", other),
    }
    assert!(ctx.query(&request(&["id"]).projects(&[2])).await.is_ok());
}

#[tokio::test]
async fn test_inaccessible_project_scope_is_empty() {
    let mut ctx = TestContext::new();
    ctx.store(TestEventBuilder::error('a', FRONTEND, "boom").build());
    ctx.store.add_member(9, 77);
    ctx.principal = Principal::new(9, 1);

    let response = ctx.query(&request(&["id"])).await.unwrap();
    assert!(response.data.is_empty());
    assert!(response.meta.is_empty());
}

#[tokio::test]
async fn test_retention_and_range_errors() {
    let ctx = TestContext::new();
    assert!(matches!(
        ctx.query(&EventsRequest::new(&["id"]).range("2020-01-01T00:00:00", "2020-01-02T00:00:00"))
            .await,
        Err(DiscoverError::RetentionExceeded)
    ));
    assert!(matches!(
        ctx.query(&EventsRequest::new(&["id"]).stats_period("91d")).await,
        Err(DiscoverError::RetentionExceeded)
    ));
    assert!(matches!(
        ctx.query(&EventsRequest::new(&["id"]).range("2020-06-01T10:00:00", "2020-06-01T09:00:00"))
            .await,
        Err(DiscoverError::InvalidSearchQuery(_))
    ));
}

#[tokio::test]
async fn test_unknown_tag_renders_empty_string() {
    let ctx = TestContext::new();
    ctx.store(TestEventBuilder::error('a', FRONTEND, "boom").build());

    let response = ctx.query(&request(&["id", "no_such_tag"])).await.unwrap();
    assert_eq!(response.data[0].get("no_such_tag"), Some(&Value::from("")));
    assert_eq!(response.meta.get("no_such_tag"), Some(&OutputType::String));
}

#[tokio::test]
async fn test_unknown_field_and_bad_function() {
    let ctx = TestContext::new();
    assert!(matches!(
        ctx.query(&request(&["bad field!"])).await,
        Err(DiscoverError::UnknownField(_))
    ));
    assert!(matches!(
        ctx.query(&request(&["percentile(transaction.duration, 2)"])).await,
        Err(DiscoverError::InvalidFunctionArguments(_))
    ));
    for field in ["percentile(transaction.duration, nan)", "apdex(NaN)", "apdex(inf)"] {
        assert!(
            matches!(ctx.query(&request(&[field])).await, Err(DiscoverError::InvalidFunctionArguments(_))),
            "{field} was accepted"
        );
    }
}
