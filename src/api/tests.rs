use super::*;
use crate::testing::{eventually, Harness, DEVICE_JID};
use axum::body::Body;
use axum::http::{header, Request as HttpRequest};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Utc;
use http_body_util::BodyExt;
use tower::ServiceExt;
use wagate_core::protocol::{MediaKind, OutgoingContent, QrEvent};
use wagate_core::records::{Direction, MediaRecord, MessageStatus, SessionStatus};
use wagate_core::traits::ObjectStore;

const KEY: &str = "test-key";
const PEER: &str = "5511888887777@s.whatsapp.net";

/// Build a test router over a fresh harness.
async fn test_app(api_key: Option<&str>) -> (Harness, Router) {
    let h = Harness::new().await;
    let mut config = Config::default();
    config.api.api_key = api_key.unwrap_or_default().to_string();
    config.webhook.allow_loopback = true;
    let state = ApiState::new(Arc::clone(&h.registry), &config).unwrap();
    (h, build_router(state, 4 * 1024 * 1024))
}

/// A session that is paired and online.
async fn online(h: &Harness, name: &str) -> String {
    let s = h.registry.create(name).await.unwrap();
    h.factory.client(&s.id).set_device(Some(DEVICE_JID));
    h.registry.connect(name).await.unwrap();
    assert!(eventually(|| h.registry.get(name).unwrap().status == SessionStatus::Connected).await);
    s.id
}

async fn body_json(resp: Response) -> Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn call(app: &Router, req: HttpRequest<Body>) -> Response {
    app.clone().oneshot(req).await.unwrap()
}

fn get_req(uri: &str) -> HttpRequest<Body> {
    HttpRequest::get(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> HttpRequest<Body> {
    HttpRequest::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn stored_media(session_id: &str, msg_id: &str, url: &str) -> MediaRecord {
    MediaRecord {
        id: format!("media-{msg_id}"),
        session_id: session_id.to_string(),
        msg_id: msg_id.to_string(),
        chat_jid: PEER.to_string(),
        sender_jid: PEER.to_string(),
        direction: Direction::Received,
        media_type: "image".into(),
        mime_type: "image/jpeg".into(),
        file_size: 4,
        file_name: None,
        wa_direct_path: String::new(),
        wa_media_key: Vec::new(),
        wa_file_sha256: Vec::new(),
        wa_file_enc_sha256: Vec::new(),
        wa_media_key_timestamp: 0,
        width: None,
        height: None,
        storage_key: Some(format!("{session_id}/received/{msg_id}.jpg")),
        storage_url: Some(url.to_string()),
        stored_at: Some(Utc::now()),
        downloaded: true,
        download_error: None,
        download_attempts: 0,
        created_at: Utc::now(),
    }
}

// ---------------------------------------------------------------------------
// Auth and health
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_health_needs_no_key() {
    let (h, app) = test_app(Some(KEY)).await;
    h.registry.create("s1").await.unwrap();

    let resp = call(&app, get_req("/health")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["sessions"], 1);
    assert_eq!(json["connected"], 0);
    assert_eq!(json["backend"], "mock");
    assert_eq!(json["webhooks"]["delivered"], 0);
    assert!(json["uptime_secs"].is_u64());
}

#[tokio::test]
async fn test_missing_key_returns_401() {
    let (_h, app) = test_app(Some(KEY)).await;
    let resp = call(&app, get_req("/sessions")).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(resp).await["error"], "missing api key");
}

#[tokio::test]
async fn test_wrong_key_returns_401() {
    let (_h, app) = test_app(Some(KEY)).await;
    let req = HttpRequest::get("/sessions")
        .header("apikey", "nope")
        .body(Body::empty())
        .unwrap();
    assert_eq!(call(&app, req).await.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_key_accepted_in_header_or_query() {
    let (_h, app) = test_app(Some(KEY)).await;
    let req = HttpRequest::get("/sessions")
        .header("apikey", KEY)
        .body(Body::empty())
        .unwrap();
    assert_eq!(call(&app, req).await.status(), StatusCode::OK);

    let resp = call(&app, get_req(&format!("/sessions?apikey={KEY}"))).await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_no_key_configured_allows_all() {
    let (_h, app) = test_app(None).await;
    let resp = call(&app, get_req("/sessions")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["sessions"], json!([]));
}

#[test]
fn test_constant_time_eq() {
    assert!(constant_time_eq("abc", "abc"));
    assert!(!constant_time_eq("abc", "abd"));
    assert!(!constant_time_eq("abc", "ab"));
}

// ---------------------------------------------------------------------------
// Session lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_create_returns_201_then_409() {
    let (_h, app) = test_app(None).await;
    let resp = call(&app, post_json("/sessions/s1/create", json!({}))).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let json = body_json(resp).await;
    assert_eq!(json["name"], "s1");
    assert_eq!(json["status"], "disconnected");
    assert!(json.get("qr_code").is_none());

    let resp = call(&app, post_json("/sessions/s1/create", json!({}))).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    assert!(body_json(resp).await["error"].is_string());
}

#[tokio::test]
async fn test_create_invalid_name_returns_400() {
    let (_h, app) = test_app(None).await;
    let resp = call(&app, post_json("/sessions/bad.name/create", json!({}))).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_session_returns_404() {
    let (_h, app) = test_app(None).await;
    let resp = call(&app, get_req("/sessions/nope/info")).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert!(body_json(resp).await["error"].is_string());
}

#[tokio::test]
async fn test_delete_session() {
    let (h, app) = test_app(None).await;
    h.registry.create("s1").await.unwrap();
    let req = HttpRequest::delete("/sessions/s1/delete")
        .body(Body::empty())
        .unwrap();
    assert_eq!(call(&app, req).await.status(), StatusCode::OK);
    assert_eq!(h.registry.len(), 0);
}

#[tokio::test]
async fn test_connect_then_qr_json_and_image() {
    let (h, app) = test_app(None).await;
    h.registry.create("s1").await.unwrap();

    let resp = call(&app, post_json("/sessions/s1/connect", json!({}))).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["status"], "connecting");
    assert!(json["message"].as_str().unwrap().contains("QR"));

    let resp = call(&app, get_req("/sessions/s1/qr")).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    h.client("s1").send_qr(QrEvent::Code("2@abc,def".into())).await;
    assert!(eventually(|| h.registry.get("s1").unwrap().status == SessionStatus::Qr).await);

    let resp = call(&app, get_req("/sessions/s1/qr?format=json")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["qr"], "2@abc,def");
    assert_eq!(json["status"], "qr");
    assert!(json["qr_base64"]
        .as_str()
        .unwrap()
        .starts_with("data:image/png;base64,"));

    let resp = call(&app, get_req("/sessions/s1/qr?format=image")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "image/png");
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..4], b"\x89PNG");
}

#[tokio::test]
async fn test_pair_returns_formatted_code() {
    let (h, app) = test_app(None).await;
    h.registry.create("s1").await.unwrap();

    let resp = call(
        &app,
        post_json("/sessions/s1/pair", json!({"phone": "+55 11 99999-0000"})),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["code"], "ABCD-1234");

    let resp = call(&app, post_json("/sessions/s1/pair", json!({}))).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_logout_and_restart() {
    let (h, app) = test_app(None).await;
    online(&h, "s1").await;

    let resp = call(&app, post_json("/sessions/s1/restart", json!({}))).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(eventually(|| h.registry.get("s1").unwrap().status == SessionStatus::Connected).await);

    let resp = call(&app, post_json("/sessions/s1/logout", json!({}))).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["status"], "disconnected");
    assert!(h.registry.get("s1").unwrap().device_jid.is_none());
}

// ---------------------------------------------------------------------------
// Messaging
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_send_requires_connected_session() {
    let (h, app) = test_app(None).await;
    h.registry.create("s1").await.unwrap();
    let resp = call(
        &app,
        post_json("/sessions/s1/send/text", json!({"to": "5511888887777", "text": "hi"})),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_send_text_is_recorded_as_sent() {
    let (h, app) = test_app(None).await;
    let sid = online(&h, "s1").await;

    let resp = call(
        &app,
        post_json("/sessions/s1/send/text", json!({"to": "5511888887777", "text": "hello"})),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    let msg_id = json["messageId"].as_str().unwrap().to_string();
    assert_eq!(json["timestamp"], 1_736_000_000);

    let client = h.client("s1");
    let sent = client.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, PEER);
    assert!(matches!(&sent[0].1, OutgoingContent::Text { body, .. } if body == "hello"));

    let mut stored = None;
    for _ in 0..200 {
        stored = h.store.get_message(&sid, &msg_id).await.unwrap();
        if stored.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let stored = stored.expect("sent message persisted");
    assert!(stored.from_me);
    assert_eq!(stored.status, MessageStatus::Sent);
    assert_eq!(stored.content, "hello");
    assert_eq!(stored.chat_jid, PEER);

    let resp = call(&app, get_req("/sessions/s1/messages?chat=5511888887777")).await;
    let json = body_json(resp).await;
    assert_eq!(json["messages"].as_array().unwrap().len(), 1);

    let resp = call(&app, get_req(&format!("/sessions/s1/messages/{msg_id}"))).await;
    let json = body_json(resp).await;
    assert_eq!(json["message"]["content"], "hello");
    assert!(json["media"].is_null());
}

#[tokio::test]
async fn test_send_text_validation() {
    let (h, app) = test_app(None).await;
    online(&h, "s1").await;

    let resp = call(
        &app,
        post_json("/sessions/s1/send/text", json!({"to": "5511888887777", "text": "  "})),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = call(
        &app,
        post_json("/sessions/s1/send/text", json!({"to": "not-a-number", "text": "hi"})),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = call(&app, post_json("/sessions/s1/send/text", json!({"to": "5511888887777"}))).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_send_image_base64_keeps_a_copy() {
    let (h, app) = test_app(None).await;
    let sid = online(&h, "s1").await;

    let body = json!({
        "to": "5511888887777",
        "base64": BASE64.encode(b"fake-jpeg"),
        "mimetype": "image/jpeg",
        "caption": "look",
    });
    let resp = call(&app, post_json("/sessions/s1/send/image", body)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let msg_id = body_json(resp).await["messageId"]
        .as_str()
        .unwrap()
        .to_string();

    let sent = h.client("s1").sent.lock().unwrap().clone();
    match &sent[0].1 {
        OutgoingContent::Media {
            kind,
            caption,
            mimetype,
            ..
        } => {
            assert_eq!(*kind, MediaKind::Image);
            assert_eq!(caption.as_deref(), Some("look"));
            assert_eq!(mimetype, "image/jpeg");
        }
        other => panic!("expected media, got {other:?}"),
    }

    let media = h.store.get_media(&sid, &msg_id).await.unwrap().unwrap();
    assert!(media.downloaded);
    assert_eq!(media.direction, Direction::Sent);
    let key = media.storage_key.unwrap();
    assert!(key.starts_with(&format!("{sid}/sent/")));
    assert_eq!(h.objects.get(&key).await.unwrap(), b"fake-jpeg");

    let resp = call(&app, get_req(&format!("/sessions/s1/media/{msg_id}"))).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["media"]["downloaded"], true);
    assert!(json["url"].as_str().unwrap().starts_with("memory://media/"));
}

#[tokio::test]
async fn test_send_document_multipart() {
    let (h, app) = test_app(None).await;
    online(&h, "s1").await;

    let boundary = "XBOUNDARY";
    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"to\"\r\n\r\n5511888887777\r\n\
         --{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"report.pdf\"\r\n\
         Content-Type: application/pdf\r\n\r\n%PDF-1.4 body\r\n--{b}--\r\n",
        b = boundary
    );
    let req = HttpRequest::post("/sessions/s1/send/document")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap();
    let resp = call(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let sent = h.client("s1").sent.lock().unwrap().clone();
    match &sent[0].1 {
        OutgoingContent::Media {
            kind,
            file_name,
            mimetype,
            upload,
            ..
        } => {
            assert_eq!(*kind, MediaKind::Document);
            assert_eq!(file_name.as_deref(), Some("report.pdf"));
            assert_eq!(mimetype, "application/pdf");
            assert_eq!(upload.file_length, b"%PDF-1.4 body".len() as u64);
        }
        other => panic!("expected media, got {other:?}"),
    }
}

#[tokio::test]
async fn test_send_media_rejects_ambiguous_source_and_unknown_kind() {
    let (h, app) = test_app(None).await;
    online(&h, "s1").await;

    let body = json!({"to": "5511888887777", "base64": "AAAA", "url": "https://x.example/a.png"});
    let resp = call(&app, post_json("/sessions/s1/send/image", body)).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let body = json!({"to": "5511888887777", "base64": "AAAA"});
    let resp = call(&app, post_json("/sessions/s1/send/hologram", body)).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_send_location_and_poll_validation() {
    let (h, app) = test_app(None).await;
    online(&h, "s1").await;

    let resp = call(
        &app,
        post_json(
            "/sessions/s1/send/location",
            json!({"to": "5511888887777", "latitude": -23.55, "longitude": -46.63, "name": "SP"}),
        ),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = call(
        &app,
        post_json(
            "/sessions/s1/send/location",
            json!({"to": "5511888887777", "latitude": 123.0, "longitude": 0.0}),
        ),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = call(
        &app,
        post_json(
            "/sessions/s1/send/poll",
            json!({"to": "5511888887777", "name": "lunch?", "options": ["yes"]}),
        ),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_send_contact_builds_vcard() {
    let (h, app) = test_app(None).await;
    online(&h, "s1").await;

    let resp = call(
        &app,
        post_json(
            "/sessions/s1/send/contact",
            json!({"to": "5511888887777", "name": "Ana", "phone": "+55 11 97777-6666"}),
        ),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let sent = h.client("s1").sent.lock().unwrap().clone();
    match &sent[0].1 {
        OutgoingContent::Contact(c) => {
            assert_eq!(c.display_name, "Ana");
            assert!(c.vcard.contains("waid=5511977776666"));
        }
        other => panic!("expected contact, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Chats and groups
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_archive_updates_chat_row() {
    let (h, app) = test_app(None).await;
    let sid = online(&h, "s1").await;

    let resp = call(
        &app,
        post_json("/sessions/s1/chat/archive", json!({"chat": "5511888887777"})),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(h.client("s1").called(&format!("archive:{PEER}:true")));

    let chats = h.store.list_chats(&sid).await.unwrap();
    assert!(chats.iter().any(|c| c.jid == PEER && c.archived));

    let resp = call(&app, get_req("/sessions/s1/chats")).await;
    assert_eq!(body_json(resp).await["chats"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_mark_read_in_group_needs_sender() {
    let (h, app) = test_app(None).await;
    online(&h, "s1").await;

    let body = json!({"chat": "120363000000000001@g.us", "message_ids": ["M1"]});
    let resp = call(&app, post_json("/sessions/s1/chat/read", body)).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let body = json!({"chat": "5511888887777", "message_ids": ["M1", "M2"]});
    let resp = call(&app, post_json("/sessions/s1/chat/read", body)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(h.client("s1").called(&format!("read:{PEER}:M1,M2")));
}

#[tokio::test]
async fn test_chat_presence() {
    let (h, app) = test_app(None).await;
    online(&h, "s1").await;

    let body = json!({"chat": "5511888887777", "state": "composing"});
    let resp = call(&app, post_json("/sessions/s1/chat/presence", body)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(h.client("s1").called(&format!("chat_presence:{PEER}:Composing")));

    let body = json!({"chat": "5511888887777", "state": "shouting"});
    let resp = call(&app, post_json("/sessions/s1/chat/presence", body)).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_group_create_and_list() {
    let (h, app) = test_app(None).await;
    online(&h, "s1").await;

    let body = json!({"name": "team", "participants": ["5511888887777"]});
    let resp = call(&app, post_json("/sessions/s1/groups/create", body)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["jid"], "120363000000000001@g.us");
    assert_eq!(json["participants"][0]["jid"], PEER);

    let resp = call(&app, get_req("/sessions/s1/groups")).await;
    assert_eq!(body_json(resp).await["groups"][0]["name"], "team");

    let body = json!({"jid": "120363000000000001@g.us", "participants": ["5511888887777"]});
    let resp = call(&app, post_json("/sessions/s1/groups/participants/explode", body)).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = call(
        &app,
        get_req("/sessions/s1/groups/info?jid=5511888887777"),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// Webhooks
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_webhook_crud() {
    let (h, app) = test_app(None).await;
    h.registry.create("s1").await.unwrap();

    let body = json!({"url": "http://127.0.0.1:9/hook", "events": ["bogus.event"]});
    let resp = call(&app, post_json("/sessions/s1/webhook", body)).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let body = json!({"url": "ftp://127.0.0.1/hook"});
    let resp = call(&app, post_json("/sessions/s1/webhook", body)).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let body = json!({
        "url": "http://127.0.0.1:9/hook",
        "events": ["message.received"],
        "secret": "s3cret",
    });
    let resp = call(&app, post_json("/sessions/s1/webhook", body)).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let hook = body_json(resp).await;
    assert!(hook.get("secret").is_none());
    assert_eq!(hook["enabled"], true);
    let id = hook["id"].as_str().unwrap().to_string();

    let resp = call(&app, get_req("/sessions/s1/webhook")).await;
    assert_eq!(body_json(resp).await["webhooks"].as_array().unwrap().len(), 1);

    let req = HttpRequest::put(format!("/sessions/s1/webhook/{id}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({"enabled": false}).to_string()))
        .unwrap();
    let resp = call(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["enabled"], false);

    let delete = || {
        HttpRequest::delete(format!("/sessions/s1/webhook/{id}"))
            .body(Body::empty())
            .unwrap()
    };
    assert_eq!(call(&app, delete()).await.status(), StatusCode::OK);
    assert_eq!(call(&app, delete()).await.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_webhook_test_ping() {
    use axum::routing::post as post_route;
    use tokio::sync::mpsc;

    let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
    let receiver = Router::new().route(
        "/hook",
        post_route(move |Json(body): Json<Value>| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(body);
                StatusCode::OK
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, receiver).await.unwrap();
    });

    let (h, app) = test_app(None).await;
    let s = h.registry.create("s1").await.unwrap();
    let hook = h
        .store
        .create_webhook(&s.id, &format!("http://{addr}/hook"), &[], true, None)
        .await
        .unwrap();

    let resp = call(
        &app,
        post_json(&format!("/sessions/s1/webhook/{}/test", hook.id), json!({})),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["status"], 200);
    assert_eq!(json["ok"], true);

    let delivered = rx.recv().await.unwrap();
    assert_eq!(delivered["event"], "webhook.test");
    assert_eq!(delivered["sessionId"], s.id.as_str());
}

// ---------------------------------------------------------------------------
// Media
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_media_retry_unknown_message_returns_404() {
    let (h, app) = test_app(None).await;
    online(&h, "s1").await;
    let resp = call(
        &app,
        post_json("/sessions/s1/media/retry?messageId=MISSING", json!({})),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_media_stream_redirects_public_urls() {
    let (h, app) = test_app(None).await;
    let s = h.registry.create("s1").await.unwrap();
    h.store
        .upsert_media(&stored_media(&s.id, "M1", "https://cdn.example.com/a.jpg"))
        .await
        .unwrap();

    let resp = call(&app, get_req("/sessions/s1/media/stream?messageId=M1")).await;
    assert_eq!(resp.status(), StatusCode::FOUND);
    assert_eq!(
        resp.headers()[header::LOCATION],
        "https://cdn.example.com/a.jpg"
    );

    let resp = call(&app, get_req("/sessions/s1/media/stream?messageId=M2")).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_media_stream_proxies_private_urls() {
    let objects = Router::new().route(
        "/bucket/a.jpg",
        get(|| async { ([(header::CONTENT_TYPE, "image/jpeg")], b"jpeg".to_vec()) }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, objects).await.unwrap();
    });

    let (h, app) = test_app(None).await;
    let s = h.registry.create("s1").await.unwrap();
    h.store
        .upsert_media(&stored_media(
            &s.id,
            "M1",
            &format!("http://{addr}/bucket/a.jpg"),
        ))
        .await
        .unwrap();

    let resp = call(&app, get_req("/sessions/s1/media/stream?messageId=M1")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "image/jpeg");
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"jpeg");
}

// ---------------------------------------------------------------------------
// Live events
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_sse_opens_with_connected_event() {
    let (h, app) = test_app(None).await;
    let s = h.registry.create("s1").await.unwrap();

    let resp = call(&app, get_req("/sessions/s1/sse/events")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let mut body = resp.into_body();
    let frame = body.frame().await.unwrap().unwrap();
    let text = String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap();
    assert!(text.contains("event: connected"), "got: {text}");
    assert!(text.contains(&s.id));
    assert_eq!(h.registry.dispatcher().hub().client_count(&s.id), 1);
}

#[tokio::test]
async fn test_sse_unknown_session_returns_404() {
    let (_h, app) = test_app(None).await;
    let resp = call(&app, get_req("/sessions/nope/sse/events")).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
