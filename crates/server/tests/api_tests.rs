//! End-to-end scenarios over the HTTP API.

mod common;

use axum::body::Body;
use axum::http::header::LOCATION;
use axum::http::{Request, StatusCode};
use common::TestServer;
use serde_json::{Value, json};
use tower::ServiceExt;

const BASE: &str = "https://postbox.test";

/// Perform a request and decode the JSON body.
async fn request(
    router: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
    token: Option<&str>,
) -> (StatusCode, Value, axum::http::HeaderMap) {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("Accept", "application/activity+json");
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }
    let body = match body {
        Some(v) => {
            builder = builder.header("Content-Type", "application/activity+json");
            Body::from(serde_json::to_vec(&v).unwrap())
        }
        None => Body::empty(),
    };
    let response = router
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value, headers)
}

async fn get(router: &axum::Router, uri: &str) -> (StatusCode, Value) {
    let (status, value, _) = request(router, "GET", uri, None, None).await;
    (status, value)
}

fn local_path(iri: &str) -> String {
    iri.strip_prefix(BASE).expect("local IRI").to_string()
}

#[tokio::test]
async fn bootstrap_serves_the_self_service_actor() {
    let server = TestServer::new().await;
    let (status, body) = get(&server.router, "/").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], BASE);
    assert_eq!(body["type"], "Service");
    let pem = body["publicKey"]["publicKeyPem"].as_str().unwrap();
    assert!(pem.starts_with("-----BEGIN PUBLIC KEY-----"));
}

#[tokio::test]
async fn create_actor_materializes_empty_collections() {
    let server = TestServer::new().await;
    let (admin, token) = server.make_actor("admin").await;

    let (status, _, headers) = request(
        &server.router,
        "POST",
        &TestServer::actor_path(&admin, "outbox"),
        Some(json!({
            "type": "Create",
            "object": {"type": "Person", "preferredUsername": "alice"},
        })),
        Some(&token),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let location = headers.get(LOCATION).unwrap().to_str().unwrap().to_string();
    assert!(
        location.starts_with(&format!("{BASE}/actors/")),
        "unexpected Location: {location}"
    );

    let (status, person) = get(&server.router, &local_path(&location)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(person["type"], "Person");
    assert_eq!(person["preferredUsername"], "alice");

    for collection in ["inbox", "outbox", "followers", "following", "liked"] {
        let collection_iri = person[collection].as_str().unwrap();
        let (status, page) = get(&server.router, &local_path(collection_iri)).await;
        assert_eq!(status, StatusCode::OK, "GET {collection}");
        assert_eq!(page["type"], "OrderedCollection");
        assert_eq!(page["totalItems"], 0);
    }
}

#[tokio::test]
async fn follow_then_accept_links_both_actors() {
    let server = TestServer::new().await;
    let (alice, alice_token) = server.make_actor("alice").await;
    let (bob, bob_token) = server.make_actor("bob").await;
    let alice_iri = alice.id().unwrap().to_string();
    let bob_iri = bob.id().unwrap().to_string();

    // Out-of-band completion: the Follow is only acknowledged.
    let (status, follow, _) = request(
        &server.router,
        "POST",
        &TestServer::actor_path(&alice, "outbox"),
        Some(json!({"type": "Follow", "object": bob_iri})),
        Some(&alice_token),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let follow_iri = follow["id"].as_str().unwrap().to_string();

    // The follow reached bob's inbox.
    let (_, inbox) = get(&server.router, &TestServer::actor_path(&bob, "inbox")).await;
    let inbox_ids: Vec<&str> = inbox["orderedItems"]
        .as_array()
        .unwrap()
        .iter()
        .map(|it| it["id"].as_str().unwrap())
        .collect();
    assert!(inbox_ids.contains(&follow_iri.as_str()));

    let (status, _, _) = request(
        &server.router,
        "POST",
        &TestServer::actor_path(&bob, "outbox"),
        Some(json!({"type": "Accept", "object": follow_iri})),
        Some(&bob_token),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, following) = get(&server.router, &TestServer::actor_path(&alice, "following")).await;
    assert_eq!(following["totalItems"], 1);
    assert_eq!(following["orderedItems"][0]["id"], bob_iri);

    let (_, followers) = get(&server.router, &TestServer::actor_path(&bob, "followers")).await;
    assert_eq!(followers["totalItems"], 1);
    assert_eq!(followers["orderedItems"][0]["id"], alice_iri);
}

#[tokio::test]
async fn like_appears_in_liked_and_likes() {
    let server = TestServer::new().await;
    let (alice, token) = server.make_actor("alice").await;

    let (_, _, headers) = request(
        &server.router,
        "POST",
        &TestServer::actor_path(&alice, "outbox"),
        Some(json!({"type": "Create", "object": {"type": "Note", "content": "hello"}})),
        Some(&token),
    )
    .await;
    let note_iri = headers.get(LOCATION).unwrap().to_str().unwrap().to_string();

    let (status, like, _) = request(
        &server.router,
        "POST",
        &TestServer::actor_path(&alice, "outbox"),
        Some(json!({"type": "Like", "object": note_iri})),
        Some(&token),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let like_iri = like["id"].as_str().unwrap().to_string();

    let (_, liked) = get(&server.router, &TestServer::actor_path(&alice, "liked")).await;
    assert_eq!(liked["orderedItems"][0]["id"], note_iri);

    let (_, likes) = get(&server.router, &format!("{}/likes", local_path(&note_iri))).await;
    assert_eq!(likes["totalItems"], 1);
    assert_eq!(likes["orderedItems"][0]["id"], like_iri);
}

#[tokio::test]
async fn undo_like_clears_membership_and_tombstones_the_like() {
    let server = TestServer::new().await;
    let (alice, token) = server.make_actor("alice").await;

    let (_, _, headers) = request(
        &server.router,
        "POST",
        &TestServer::actor_path(&alice, "outbox"),
        Some(json!({"type": "Create", "object": {"type": "Note", "content": "hi"}})),
        Some(&token),
    )
    .await;
    let note_iri = headers.get(LOCATION).unwrap().to_str().unwrap().to_string();

    let (_, like, _) = request(
        &server.router,
        "POST",
        &TestServer::actor_path(&alice, "outbox"),
        Some(json!({"type": "Like", "object": note_iri})),
        Some(&token),
    )
    .await;
    let like_iri = like["id"].as_str().unwrap().to_string();

    let (status, _, _) = request(
        &server.router,
        "POST",
        &TestServer::actor_path(&alice, "outbox"),
        Some(json!({"type": "Undo", "object": like_iri})),
        Some(&token),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, liked) = get(&server.router, &TestServer::actor_path(&alice, "liked")).await;
    assert_eq!(liked["totalItems"], 0);
    let (_, likes) = get(&server.router, &format!("{}/likes", local_path(&note_iri))).await;
    assert_eq!(likes["totalItems"], 0);

    // The undone Like now resolves to a tombstone.
    let (status, body) = get(&server.router, &local_path(&like_iri)).await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body["type"], "Tombstone");
}

#[tokio::test]
async fn delete_serves_gone_and_conflicts_on_update() {
    let server = TestServer::new().await;
    let (alice, token) = server.make_actor("alice").await;

    let (_, _, headers) = request(
        &server.router,
        "POST",
        &TestServer::actor_path(&alice, "outbox"),
        Some(json!({"type": "Create", "object": {"type": "Note", "content": "bye"}})),
        Some(&token),
    )
    .await;
    let note_iri = headers.get(LOCATION).unwrap().to_str().unwrap().to_string();

    let (status, _, _) = request(
        &server.router,
        "POST",
        &TestServer::actor_path(&alice, "outbox"),
        Some(json!({"type": "Delete", "object": note_iri})),
        Some(&token),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = get(&server.router, &local_path(&note_iri)).await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body["type"], "Tombstone");
    assert_eq!(body["formerType"], "Note");
    assert!(body["deleted"].as_str().is_some());

    let (status, _, _) = request(
        &server.router,
        "POST",
        &TestServer::actor_path(&alice, "outbox"),
        Some(json!({
            "type": "Update",
            "object": {"type": "Note", "id": note_iri, "content": "resurrected"},
        })),
        Some(&token),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn anonymous_outbox_post_is_unauthorized() {
    let server = TestServer::new().await;
    let (alice, _token) = server.make_actor("alice").await;

    let (status, _, _) = request(
        &server.router,
        "POST",
        &TestServer::actor_path(&alice, "outbox"),
        Some(json!({"type": "Create", "object": {"type": "Note"}})),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn posting_to_a_foreign_outbox_is_forbidden() {
    let server = TestServer::new().await;
    let (alice, _) = server.make_actor("alice").await;
    let (_bob, bob_token) = server.make_actor("bob").await;

    let (status, _, _) = request(
        &server.router,
        "POST",
        &TestServer::actor_path(&alice, "outbox"),
        Some(json!({"type": "Create", "object": {"type": "Note"}})),
        Some(&bob_token),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn html_without_frontend_is_not_acceptable() {
    let server = TestServer::new().await;
    let req = Request::builder()
        .method("GET")
        .uri("/")
        .header("Accept", "text/html")
        .body(Body::empty())
        .unwrap();
    let response = server.router.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
}

#[tokio::test]
async fn html_redirects_to_the_configured_frontend() {
    let server = TestServer::with_config(|config| {
        config.frontend_url = Some("https://front.postbox.test".to_string());
    })
    .await;
    let req = Request::builder()
        .method("GET")
        .uri("/actors")
        .header("Accept", "text/html")
        .body(Body::empty())
        .unwrap();
    let response = server.router.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        response.headers().get(LOCATION).unwrap(),
        "https://front.postbox.test/actors"
    );
}

#[tokio::test]
async fn unknown_collections_are_not_found() {
    let server = TestServer::new().await;
    let (status, _) = get(&server.router, "/nonsense").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = get(&server.router, "/objects/missing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn top_level_collections_list_created_items() {
    let server = TestServer::new().await;
    let (alice, token) = server.make_actor("alice").await;

    for i in 0..3 {
        let (status, _, _) = request(
            &server.router,
            "POST",
            &TestServer::actor_path(&alice, "outbox"),
            Some(json!({"type": "Create", "object": {"type": "Note", "content": format!("n{i}")}})),
            Some(&token),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, page) = get(&server.router, "/objects").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["totalItems"], 3);
    assert_eq!(page["type"], "OrderedCollection");
    assert!(page["first"].as_str().is_some());

    // Filters compose over the same collection.
    let (_, filtered) = get(&server.router, "/activities?type=Create").await;
    assert_eq!(filtered["totalItems"], 3);
    let (_, none) = get(&server.router, "/activities?type=Like").await;
    assert_eq!(none["totalItems"], 0);
}

#[tokio::test]
async fn filtered_pagination_keeps_predicates_across_pages() {
    let server = TestServer::new().await;
    let (alice, token) = server.make_actor("alice").await;

    // Five Create activities interleaved with Likes, so an unfiltered
    // follow-up page would show the difference.
    let mut note_iris = Vec::new();
    for i in 0..5 {
        let (status, _, headers) = request(
            &server.router,
            "POST",
            &TestServer::actor_path(&alice, "outbox"),
            Some(json!({"type": "Create", "object": {"type": "Note", "content": format!("n{i}")}})),
            Some(&token),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        note_iris.push(headers.get(LOCATION).unwrap().to_str().unwrap().to_string());
    }
    for note_iri in &note_iris[..2] {
        let (status, _, _) = request(
            &server.router,
            "POST",
            &TestServer::actor_path(&alice, "outbox"),
            Some(json!({"type": "Like", "object": note_iri})),
            Some(&token),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    // Walk the filtered collection two members at a time, following the
    // served next links.
    let mut uri = "/activities?type=Create&maxItems=2".to_string();
    let mut seen = Vec::new();
    loop {
        let (status, page) = get(&server.router, &uri).await;
        assert_eq!(status, StatusCode::OK, "GET {uri}");
        assert_eq!(page["totalItems"], 5);
        for member in page["orderedItems"].as_array().unwrap() {
            assert_eq!(member["type"], "Create", "filter dropped on {uri}");
            seen.push(member["id"].as_str().unwrap().to_string());
        }
        match page["next"].as_str() {
            Some(next) => {
                assert!(next.contains("type=Create"), "next link lost the filter: {next}");
                uri = local_path(next);
            }
            None => break,
        }
    }

    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), 5, "every Create reached exactly once");

    // The first-page link carries the filter too.
    let (_, page) = get(&server.router, "/activities?type=Create&maxItems=2").await;
    assert!(page["first"].as_str().unwrap().contains("type=Create"));
}

#[tokio::test]
async fn responses_carry_the_self_link() {
    let server = TestServer::new().await;
    let (status, _, headers) = request(&server.router, "GET", "/", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let link = headers.get("link").unwrap().to_str().unwrap();
    assert!(link.contains("rel=\"self\""));
    assert!(link.contains(BASE));
}
