//! QQ-bot transport tests against a mock open-platform API.

use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use chatbridge::config::QqBotConfig;
use chatbridge::outbound::qqbot::QqBotTransport;
use chatbridge::outbound::Transport;

fn qq_config() -> QqBotConfig {
    QqBotConfig {
        app_id: Some("102001".into()),
        client_secret: Some("secret".into()),
        ..QqBotConfig::default()
    }
}

async fn mount_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/app/getAppAccessToken"))
        .and(body_partial_json(json!({ "appId": "102001" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "qq-token",
            "expires_in": "7200"
        })))
        .mount(server)
        .await;
}

fn transport(server: &MockServer) -> QqBotTransport {
    QqBotTransport::new(&qq_config())
        .unwrap()
        .with_endpoints(server.uri(), format!("{}/app/getAppAccessToken", server.uri()))
}

#[tokio::test]
async fn c2c_text_send_carries_reply_id_and_seq() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("POST"))
        .and(path("/v2/users/u1/messages"))
        .and(header("Authorization", "QQBot qq-token"))
        .and(body_partial_json(json!({
            "content": "hello",
            "msg_type": 0,
            "msg_id": "m1",
            "msg_seq": 1
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "out-1" })))
        .expect(1)
        .mount(&server)
        .await;

    let transport = transport(&server);
    let receipt = transport.send_text("user:u1", "hello", Some("m1")).await.unwrap();
    assert_eq!(receipt.message_id, "out-1");
}

#[tokio::test]
async fn group_text_uses_group_endpoint() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("POST"))
        .and(path("/v2/groups/g1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "out-2" })))
        .expect(1)
        .mount(&server)
        .await;

    transport(&server)
        .send_text("group:g1", "hello", None)
        .await
        .unwrap();
}

#[tokio::test]
async fn channel_text_uses_v1_shape_without_seq() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("POST"))
        .and(path("/channels/c1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "out-3" })))
        .expect(1)
        .mount(&server)
        .await;

    transport(&server)
        .send_text("channel:c1", "hello", Some("m3"))
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let send = requests
        .iter()
        .find(|r| r.url.path() == "/channels/c1/messages")
        .expect("channel send");
    let body: serde_json::Value = serde_json::from_slice(&send.body).unwrap();
    assert_eq!(body["content"], "hello");
    assert_eq!(body["msg_id"], "m3");
    assert!(body.get("msg_type").is_none());
    assert!(body.get("msg_seq").is_none());
}

#[tokio::test]
async fn token_is_cached_across_sends() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/app/getAppAccessToken"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "qq-token",
            "expires_in": 7200
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/users/u1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "out" })))
        .expect(2)
        .mount(&server)
        .await;

    let transport = transport(&server);
    transport.send_text("user:u1", "one", None).await.unwrap();
    transport.send_text("user:u1", "two", None).await.unwrap();
}

#[tokio::test]
async fn seq_increments_across_sends() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("POST"))
        .and(path("/v2/users/u1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "out" })))
        .expect(2)
        .mount(&server)
        .await;

    let transport = transport(&server);
    transport.send_text("user:u1", "one", None).await.unwrap();
    transport.send_text("user:u1", "two", None).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let seqs: Vec<i64> = requests
        .iter()
        .filter(|r| r.url.path() == "/v2/users/u1/messages")
        .map(|r| {
            let body: serde_json::Value = serde_json::from_slice(&r.body).unwrap();
            body["msg_seq"].as_i64().unwrap()
        })
        .collect();
    assert_eq!(seqs, vec![1, 2]);
}

#[tokio::test]
async fn remote_media_uploads_by_url_then_sends_rich_message() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("POST"))
        .and(path("/v2/groups/g1/files"))
        .and(body_partial_json(json!({
            "file_type": 1,
            "url": "https://cdn.example/cat.png",
            "srv_send_msg": false
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "file_info": "fi-abc" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/groups/g1/messages"))
        .and(body_partial_json(json!({
            "msg_type": 7,
            "media": { "file_info": "fi-abc" }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "out-m" })))
        .expect(1)
        .mount(&server)
        .await;

    let receipt = transport(&server)
        .send_media("group:g1", "https://cdn.example/cat.png", None)
        .await
        .unwrap();
    assert_eq!(receipt.message_id, "out-m");
}

#[tokio::test]
async fn local_media_uploads_base64_file_data() {
    use std::io::Write as _;

    let mut file = tempfile::NamedTempFile::with_suffix(".png").unwrap();
    file.write_all(b"png-bytes").unwrap();

    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("POST"))
        .and(path("/v2/users/u1/files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "file_info": "fi-local" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/users/u1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "out" })))
        .expect(1)
        .mount(&server)
        .await;

    transport(&server)
        .send_media("user:u1", &file.path().display().to_string(), None)
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let upload = requests
        .iter()
        .find(|r| r.url.path() == "/v2/users/u1/files")
        .expect("upload request");
    let body: serde_json::Value = serde_json::from_slice(&upload.body).unwrap();
    use base64::Engine as _;
    assert_eq!(
        body["file_data"].as_str().unwrap(),
        base64::engine::general_purpose::STANDARD.encode(b"png-bytes")
    );
    assert!(body.get("url").is_none());
}

#[tokio::test]
async fn channel_media_is_rejected() {
    let server = MockServer::start().await;
    mount_token(&server).await;

    let err = transport(&server)
        .send_media("channel:c1", "https://cdn.example/cat.png", None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("guild channel"), "{err}");
}

#[tokio::test]
async fn failed_send_reports_status_and_body() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("POST"))
        .and(path("/v2/users/u1/messages"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "code": 40034006,
            "message": "message was rejected"
        })))
        .mount(&server)
        .await;

    let err = transport(&server)
        .send_text("user:u1", "hello", None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("40034006"), "{err}");
}
