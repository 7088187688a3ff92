//! Comment posting and reactions against scripted comment servers.

use std::collections::BTreeMap;
use std::time::Duration;

use nico_thread::mock::{form, legacy_json, meta_error, meta_ok, Exchange, MockTransport};
use nico_thread::{
    ErrorCode, ErrorKind, LegacyMeta, MessageInfo, ProtocolMeta, ThreadClient, ThreadDescriptor,
    UnifiedMeta, WireFormat,
};
use serde_json::{json, Value};

const NMSG: &str = "https://nmsg.example/api.json/";
const NV: &str = "https://nv.example";
const POSTKEY: &str = "https://flapi.nicovideo.jp/api/getpostkey?thread=1&block_no=2";

fn legacy_message() -> MessageInfo {
    MessageInfo {
        video_id: "sm9".to_string(),
        user_id: 42,
        is_premium: true,
        language: "ja-jp".to_string(),
        duration: 50,
        when: None,
        is_184_forced: false,
        threads: vec![ThreadDescriptor::main(1)],
        protocol: ProtocolMeta::Legacy(LegacyMeta {
            server: NMSG.to_string(),
            format: WireFormat::Json,
            user_key: Some("uk".to_string()),
            res_from: None,
        }),
        thread_info: None,
        thread_keys: BTreeMap::new(),
    }
}

fn unified_message() -> MessageInfo {
    MessageInfo {
        video_id: "sm9".to_string(),
        user_id: 42,
        is_premium: false,
        language: "en-us".to_string(),
        duration: 320,
        when: None,
        is_184_forced: false,
        threads: vec![ThreadDescriptor::main(10)],
        protocol: ProtocolMeta::Unified(UnifiedMeta {
            server: NV.to_string(),
            params: json!({"targets": [{"id": "10", "fork": "main"}]}),
            thread_key: "tk1".to_string(),
        }),
        thread_info: None,
        thread_keys: BTreeMap::new(),
    }
}

fn legacy_threads(ticket: &str, last_res: u64) -> Value {
    json!([
        {"thread": {"resultcode": 0, "thread": "1", "last_res": last_res, "ticket": ticket}},
        {"chat": {"thread": "1", "no": last_res, "vpos": 500, "date": 1500000000, "fork": 1, "content": "owner says hi", "nicoru": 7}}
    ])
}

fn unified_threads() -> Value {
    json!({
        "globalComments": [{"count": 5}],
        "threads": [{"id": "10", "fork": "main", "commentCount": 5, "comments": [
            {"id": "c5", "no": 5, "vposMs": 2000, "body": "wwww", "commands": [], "userId": "u",
             "isPremium": false, "score": 0, "nicoruCount": 1, "postedAt": "2024-05-01T00:00:00Z"}
        ]}]
    })
}

fn chat_result(status: i64, no: u64) -> Value {
    json!([{"chat_result": {"thread": "1", "status": status, "no": no}}])
}

fn body_json(body: Option<&str>) -> Value {
    serde_json::from_str(body.expect("request body")).expect("json body")
}

async fn loaded_legacy_client(mut exchanges: Vec<Exchange>) -> (ThreadClient<MockTransport>, MessageInfo) {
    exchanges.insert(0, Exchange::post(NMSG, legacy_json(legacy_threads("0x1", 199))));
    let mut client = ThreadClient::new(MockTransport::new(exchanges));
    let mut info = legacy_message();
    client.load(&mut info).await.unwrap();
    (client, info)
}

/// Legacy post status 3: one reload, one retry, and the retry's number is returned.
#[tokio::test(start_paused = true)]
async fn test_legacy_post_reloads_once_and_retries() {
    let (mut client, mut info) = loaded_legacy_client(vec![
        Exchange::get(POSTKEY, form("postkey=pk1")),
        Exchange::post(NMSG, legacy_json(chat_result(3, 0))),
        Exchange::post(NMSG, legacy_json(legacy_threads("0x2", 200))),
        Exchange::get(POSTKEY, form("postkey=pk2")),
        Exchange::post(NMSG, legacy_json(chat_result(0, 201))),
    ])
    .await;

    let posted = client
        .post_chat(&mut info, "hello", "184 red", Duration::from_millis(12_345))
        .await
        .unwrap();

    assert_eq!(posted.no, 201);
    assert!(client.transport().is_complete());
    assert_eq!(info.thread_info.as_ref().and_then(|t| t.ticket()), Some("0x2"));

    let sent = client.transport().requests_to(NMSG);
    assert_eq!(sent.len(), 4);
    let first = body_json(sent[1].request.body.as_deref());
    let retry = body_json(sent[3].request.body.as_deref());
    assert_eq!(first[0]["chat"]["ticket"], json!("0x1"));
    assert_eq!(first[0]["chat"]["postkey"], json!("pk1"));
    assert_eq!(first[0]["chat"]["vpos"], json!(1234));
    assert_eq!(first[0]["chat"]["mail"], json!("184 red"));
    assert_eq!(retry[0]["chat"]["ticket"], json!("0x2"));
    assert_eq!(retry[0]["chat"]["postkey"], json!("pk2"));
    assert!(sent[3].at - sent[1].at >= Duration::from_secs(3));
}

/// Legacy post status 2: retried without reloading.
#[tokio::test(start_paused = true)]
async fn test_legacy_post_retry_without_reload() {
    let (mut client, mut info) = loaded_legacy_client(vec![
        Exchange::get(POSTKEY, form("postkey=pk1")),
        Exchange::post(NMSG, legacy_json(chat_result(2, 0))),
        Exchange::get(POSTKEY, form("postkey=pk2")),
        Exchange::post(NMSG, legacy_json(chat_result(2, 0))),
    ])
    .await;

    let err = client
        .post_chat(&mut info, "hello", "", Duration::ZERO)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Terminal);
    assert_eq!(err.to_string(), "comment post failed");
    assert_eq!(err.code(), Some(&ErrorCode::Status(2)));
    assert_eq!(client.transport().requests_to(NMSG).len(), 3);
    assert!(client.transport().is_complete());
}

/// A non-recoverable post status neither reloads nor retries.
#[tokio::test(start_paused = true)]
async fn test_legacy_post_fatal_status() {
    let (mut client, mut info) = loaded_legacy_client(vec![
        Exchange::get(POSTKEY, form("postkey=pk1")),
        Exchange::post(NMSG, legacy_json(chat_result(1, 0))),
    ])
    .await;

    let err = client
        .post_chat(&mut info, "hello", "", Duration::ZERO)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Terminal);
    assert_eq!(err.to_string(), "comment post failed");
    assert_eq!(err.code(), Some(&ErrorCode::Status(1)));
    assert_eq!(client.transport().requests_to(NMSG).len(), 2);
    assert!(client.transport().is_complete());
}

/// A post key failure is not retried.
#[tokio::test(start_paused = true)]
async fn test_post_key_failure_is_fatal() {
    let (mut client, mut info) = loaded_legacy_client(vec![Exchange::get(POSTKEY, form("postkey="))]).await;

    let err = client
        .post_chat(&mut info, "hello", "", Duration::ZERO)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::KeyFetchFailed);
    assert!(client.transport().is_complete());
}

/// Unified INVALID_TOKEN: reload with a fresh thread key, then retry.
#[tokio::test(start_paused = true)]
async fn test_unified_post_invalid_token_reloads() {
    let mock = MockTransport::new(vec![
        Exchange::post(format!("{NV}/v1/threads"), meta_ok(unified_threads())),
        Exchange::get(
            "https://nvapi.nicovideo.jp/v1/comment/keys/post?threadId=10",
            meta_ok(json!({"postKey": "pk1"})),
        ),
        Exchange::post(format!("{NV}/v1/threads/10/comments"), meta_error(400, "INVALID_TOKEN")),
        Exchange::get(
            "https://nvapi.nicovideo.jp/v1/comment/keys/thread?videoId=sm9",
            meta_ok(json!({"threadKey": "tk2"})),
        ),
        Exchange::post(format!("{NV}/v1/threads"), meta_ok(unified_threads())),
        Exchange::get(
            "https://nvapi.nicovideo.jp/v1/comment/keys/post?threadId=10",
            meta_ok(json!({"postKey": "pk2"})),
        ),
        Exchange::post(
            format!("{NV}/v1/threads/10/comments"),
            meta_ok(json!({"no": 6, "id": "c6"})),
        ),
    ]);
    let mut client = ThreadClient::new(mock);
    let mut info = unified_message();
    client.load(&mut info).await.unwrap();

    let posted = client
        .post_chat(&mut info, "hi", "big\u{3000}red", Duration::from_secs(2))
        .await
        .unwrap();

    assert_eq!(posted.no, 6);
    assert_eq!(posted.id.as_deref(), Some("c6"));
    assert!(client.transport().is_complete());

    let posts = client.transport().requests_to(&format!("{NV}/v1/threads/10/comments"));
    let retry = body_json(posts[1].request.body.as_deref());
    assert_eq!(
        retry,
        json!({"body": "hi", "commands": ["big", "red"], "vposMs": 2000, "postKey": "pk2", "videoId": "sm9"})
    );
    match &info.protocol {
        ProtocolMeta::Unified(meta) => assert_eq!(meta.thread_key, "tk2"),
        other => panic!("unexpected protocol {other:?}"),
    }
}

/// Reacting twice to the same legacy comment: the second is already done.
#[tokio::test(start_paused = true)]
async fn test_legacy_second_reaction_is_already_done() {
    let nicoru_ok = json!([{"nicoru_result": {"status": 0, "nicoru_count": 8}}]);
    let nicoru_again = json!([{"nicoru_result": {"status": 4}}]);
    let mock = MockTransport::new(vec![
        Exchange::post(NMSG, legacy_json(legacy_threads("0x1", 199))),
        Exchange::get("https://nvapi.nicovideo.jp/v1/nicorukey?language=0&threadId=1&fork=1", meta_ok(json!({"nicorukey": "nk1"}))),
        Exchange::post(NMSG, legacy_json(nicoru_ok)),
        Exchange::get("https://nvapi.nicovideo.jp/v1/nicorukey", meta_ok(json!({"nicorukey": "nk2"}))),
        Exchange::post(NMSG, legacy_json(nicoru_again)),
    ]);
    let mut client = ThreadClient::new(mock);
    let mut info = legacy_message();
    let loaded = client.load_comments(&mut info).await.unwrap();
    let chat = &loaded.chats[0];

    let reaction = client.react(&info, chat).await.unwrap();
    assert_eq!(reaction.count, 8);

    let err = client.react(&info, chat).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyDone);
    assert!(err.is_already_done());
    assert_eq!(err.code(), Some(&ErrorCode::Status(4)));

    let sent = client.transport().requests_to(NMSG);
    let packet = body_json(sent[1].request.body.as_deref());
    assert_eq!(packet[0]["nicoru"]["id"], json!("199"));
    assert_eq!(packet[0]["nicoru"]["nicorukey"], json!("nk1"));
    assert_eq!(packet[0]["nicoru"]["postdate"], json!(1_500_000_000));
    assert!(client.transport().is_complete());
}

/// Legacy reaction statuses other than 0 and 4 are terminal and not retried.
#[tokio::test(start_paused = true)]
async fn test_legacy_reaction_other_status_is_terminal() {
    let mock = MockTransport::new(vec![
        Exchange::post(NMSG, legacy_json(legacy_threads("0x1", 199))),
        Exchange::get("https://nvapi.nicovideo.jp/v1/nicorukey", meta_ok(json!({"nicorukey": "nk1"}))),
        Exchange::post(NMSG, legacy_json(json!([{"nicoru_result": {"status": 2}}]))),
    ]);
    let mut client = ThreadClient::new(mock);
    let mut info = legacy_message();
    let loaded = client.load_comments(&mut info).await.unwrap();

    let err = client.react(&info, &loaded.chats[0]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Terminal);
    assert_eq!(err.code(), Some(&ErrorCode::Status(2)));
    assert!(client.transport().is_complete());
}

/// Unified ALREADY_NICORUED maps to the already-done outcome.
#[tokio::test(start_paused = true)]
async fn test_unified_second_reaction_is_already_done() {
    let mock = MockTransport::new(vec![
        Exchange::post(format!("{NV}/v1/threads"), meta_ok(unified_threads())),
        Exchange::get(
            "https://nvapi.nicovideo.jp/v1/comment/keys/nicoru?threadId=10",
            meta_ok(json!({"nicoruKey": "nk1"})),
        ),
        Exchange::post(
            format!("{NV}/v1/threads/10/nicorus"),
            meta_ok(json!({"nicoruId": "n1", "nicoruCount": 2})),
        ),
        Exchange::get(
            "https://nvapi.nicovideo.jp/v1/comment/keys/nicoru?threadId=10",
            meta_ok(json!({"nicoruKey": "nk2"})),
        ),
        Exchange::post(
            format!("{NV}/v1/threads/10/nicorus"),
            meta_error(400, "ALREADY_NICORUED"),
        ),
    ]);
    let mut client = ThreadClient::new(mock);
    let mut info = unified_message();
    let loaded = client.load_comments(&mut info).await.unwrap();
    let chat = &loaded.chats[0];

    let reaction = client.react(&info, chat).await.unwrap();
    assert_eq!(reaction.reaction_id.as_deref(), Some("n1"));
    assert_eq!(reaction.count, 2);

    let err = client.react(&info, chat).await.unwrap_err();
    assert!(err.is_already_done());

    let keys = client
        .transport()
        .requests_to("https://nvapi.nicovideo.jp/v1/comment/keys/nicoru");
    assert_eq!(keys.len(), 2);
    assert_eq!(keys[0].request.header("X-Niconico-Language"), Some("en-us"));

    let nicorus = client.transport().requests_to(&format!("{NV}/v1/threads/10/nicorus"));
    let packet = body_json(nicorus[0].request.body.as_deref());
    assert_eq!(
        packet,
        json!({"content": "wwww", "fork": "main", "no": 5, "nicoruKey": "nk1", "videoId": "sm9"})
    );
}
