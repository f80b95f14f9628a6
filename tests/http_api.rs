//! End-to-end API tests against a real server on an ephemeral port.

use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use serde_json::{Value, json};
use ulid::Ulid;

use bookd::directory::StaticDirectory;
use bookd::engine::Engine;
use bookd::http;
use bookd::model::Ms;

struct TestServer {
    base: String,
    client: reqwest::Client,
    directory: Arc<StaticDirectory>,
}

async fn spawn_server(name: &str) -> TestServer {
    let dir = std::env::temp_dir().join("bookd_test_http");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);

    let directory = Arc::new(StaticDirectory::new());
    let engine = Arc::new(Engine::new(path, directory.clone()).unwrap());
    let app = http::router(engine);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        base: format!("http://{addr}"),
        client: reqwest::Client::new(),
        directory,
    }
}

fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

fn in_minutes(m: i64) -> Ms {
    now_ms() + m * 60_000
}

fn booking_body(resource_id: &str, client_id: &str, slot: Ms) -> Value {
    json!({
        "resourceId": resource_id,
        "clientId": client_id,
        "slot": slot,
        "serviceName": "Haircut",
        "serviceDurationMinutes": 30,
    })
}

#[tokio::test]
async fn health_endpoint() {
    let srv = spawn_server("health.wal").await;
    let resp = srv.client.get(format!("{}/health", srv.base)).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn full_booking_flow() {
    let srv = spawn_server("booking_flow.wal").await;
    let rid = Ulid::new().to_string();
    let start = in_minutes(60);

    // Open a slot.
    let resp = srv
        .client
        .post(format!("{}/slots", srv.base))
        .json(&json!({ "resourceId": rid, "start": start, "durationMinutes": 60 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let slot: Value = resp.json().await.unwrap();
    assert_eq!(slot["start"], start);
    assert_eq!(slot["end"], start + 3_600_000);

    // It shows as available.
    let available: Vec<Value> = srv
        .client
        .get(format!("{}/slots/resource/{rid}", srv.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(available.len(), 1);

    // Book it. The status is forced to PENDING.
    let client_a = Ulid::new().to_string();
    let resp = srv
        .client
        .post(format!("{}/reservations", srv.base))
        .json(&booking_body(&rid, &client_a, start))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let reservation: Value = resp.json().await.unwrap();
    assert_eq!(reservation["status"], "PENDING");
    let reservation_id = reservation["id"].as_str().unwrap().to_string();

    // A second client racing for the same instant loses with 409.
    let resp = srv
        .client
        .post(format!("{}/reservations", srv.base))
        .json(&booking_body(&rid, &Ulid::new().to_string(), start))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
    let err: Value = resp.json().await.unwrap();
    assert_eq!(err["code"], "SLOT_ALREADY_BOOKED");

    // The slot vanished from the availability listing.
    let available: Vec<Value> = srv
        .client
        .get(format!("{}/slots/resource/{rid}", srv.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(available.is_empty());

    // Decline frees the instant.
    let resp = srv
        .client
        .put(format!("{}/reservations/{reservation_id}/status", srv.base))
        .json(&json!({ "status": "DECLINED" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let declined: Value = resp.json().await.unwrap();
    assert_eq!(declined["status"], "DECLINED");

    // Rebooking the same instant now succeeds.
    let resp = srv
        .client
        .post(format!("{}/reservations", srv.base))
        .json(&booking_body(&rid, &Ulid::new().to_string(), start))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);

    // History shows both the new active record and the archived decline.
    let history: Vec<Value> = srv
        .client
        .get(format!("{}/reservations/resource/{rid}/history", srv.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    let archived: Vec<&Value> = history
        .iter()
        .filter(|v| v.get("archivedAt").is_some())
        .collect();
    assert_eq!(archived.len(), 1);
    assert_eq!(archived[0]["status"], "DECLINED");
}

#[tokio::test]
async fn error_responses() {
    let srv = spawn_server("errors.wal").await;
    let rid = Ulid::new().to_string();
    let start = in_minutes(60);

    // Duplicate slot start.
    for expected in [201, 409] {
        let resp = srv
            .client
            .post(format!("{}/slots", srv.base))
            .json(&json!({ "resourceId": rid, "start": start }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), expected);
    }

    // Bad service duration.
    let mut body = booking_body(&rid, &Ulid::new().to_string(), start);
    body["serviceDurationMinutes"] = json!(0);
    let resp = srv
        .client
        .post(format!("{}/reservations", srv.base))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let err: Value = resp.json().await.unwrap();
    assert_eq!(err["code"], "INVALID_INPUT");

    // Unknown ids.
    let unknown = Ulid::new();
    let resp = srv
        .client
        .delete(format!("{}/slots/{unknown}", srv.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let resp = srv
        .client
        .put(format!("{}/reservations/{unknown}/status", srv.base))
        .json(&json!({ "status": "APPROVED" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    // Banned client.
    let banned = Ulid::new();
    srv.directory.set_banned(banned, true);
    let resp = srv
        .client
        .post(format!("{}/reservations", srv.base))
        .json(&booking_body(&rid, &banned.to_string(), in_minutes(120)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);
    let err: Value = resp.json().await.unwrap();
    assert_eq!(err["code"], "FORBIDDEN");
}

#[tokio::test]
async fn client_listing_is_enriched_with_usernames() {
    let srv = spawn_server("enrichment.wal").await;
    let client_id = Ulid::new();
    srv.directory.insert(client_id, "fatjon");

    let resp = srv
        .client
        .post(format!("{}/reservations", srv.base))
        .json(&booking_body(
            &Ulid::new().to_string(),
            &client_id.to_string(),
            in_minutes(60),
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);

    let mine: Vec<Value> = srv
        .client
        .get(format!("{}/reservations/client/{client_id}", srv.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0]["clientUsername"], "fatjon");
}

#[tokio::test]
async fn notices_listing_and_read_flags() {
    let srv = spawn_server("notices.wal").await;
    let rid = Ulid::new().to_string();

    // Two operations, two notices.
    srv.client
        .post(format!("{}/slots", srv.base))
        .json(&json!({ "resourceId": rid, "start": in_minutes(60) }))
        .send()
        .await
        .unwrap();
    srv.client
        .post(format!("{}/reservations", srv.base))
        .json(&booking_body(&rid, &Ulid::new().to_string(), in_minutes(60)))
        .send()
        .await
        .unwrap();

    let notices: Vec<Value> = srv
        .client
        .get(format!("{}/notices", srv.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(notices.len(), 2);
    // Newest first: the booking came after the slot.
    assert_eq!(notices[0]["kind"], "BOOKED");
    assert_eq!(notices[1]["kind"], "SLOT_CREATED");
    assert_eq!(notices[0]["read"], false);

    // Flip one read flag.
    let id = notices[0]["id"].as_str().unwrap();
    let resp = srv
        .client
        .put(format!("{}/notices/{id}/read?value=true", srv.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let updated: Value = resp.json().await.unwrap();
    assert_eq!(updated["read"], true);

    // Unknown notice is a 404.
    let resp = srv
        .client
        .put(format!("{}/notices/{}/read", srv.base, Ulid::new()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    // Mark everything read.
    let resp = srv
        .client
        .put(format!("{}/notices/read-all", srv.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);
    let notices: Vec<Value> = srv
        .client
        .get(format!("{}/notices", srv.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(notices.iter().all(|n| n["read"] == true));
}

#[tokio::test]
async fn live_stream_handshake_and_push() {
    let srv = spawn_server("sse.wal").await;

    let resp = srv
        .client
        .get(format!("{}/notices/stream", srv.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(resp
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let mut stream = resp.bytes_stream();
    let mut buf = String::new();

    // Handshake: event name, payload, and reconnect hint.
    read_until(&mut stream, &mut buf, "data: connected").await;
    assert!(buf.contains("event: hello"));
    assert!(buf.contains("retry: 3000"));

    // A booking made while connected is pushed as a notification event.
    srv.client
        .post(format!("{}/reservations", srv.base))
        .json(&booking_body(
            &Ulid::new().to_string(),
            &Ulid::new().to_string(),
            in_minutes(60),
        ))
        .send()
        .await
        .unwrap();

    read_until(&mut stream, &mut buf, "event: notification").await;
    read_until(&mut stream, &mut buf, "\"kind\":\"BOOKED\"").await;
}

async fn read_until<B, S>(stream: &mut S, buf: &mut String, needle: &str)
where
    B: AsRef<[u8]>,
    S: Stream<Item = reqwest::Result<B>> + Unpin,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !buf.contains(needle) {
            let chunk = stream.next().await.expect("stream ended").unwrap();
            buf.push_str(&String::from_utf8_lossy(chunk.as_ref()));
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {needle:?}"));
}
