//! Role façade integration tests
//!
//! Each façade is pointed at the mock pool through `with_builder` and
//! checked for the frames it sends and the topics it republishes.

mod common;

use common::{error_reply, fast_builder, push_frame, reply, MockWsServer, Recorder};
use hdpool_client::{AccountApi, HeightFilter, MiningApi, PublicApi};
use hdpool_core::Error;
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn test_mining_heartbeat_identifies_miner() {
    let server = MockWsServer::new().await;
    let api = MiningApi::with_builder("key-1", "rig", 4096, fast_builder([server.url()])).unwrap();
    api.init().await.unwrap();

    let heartbeat = server.wait_for_cmd("poolmgr.heartbeat").await.unwrap();
    assert_eq!(heartbeat["para"]["account_key"], "key-1");
    assert_eq!(heartbeat["para"]["miner_name"], "rig");
    assert_eq!(heartbeat["para"]["miner_mark"], "rig.hdproxy.exe.20181212");
    assert_eq!(heartbeat["para"]["capacity"], 4096);

    api.destroy(true).await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_mining_info_filtered_by_height() {
    let server = MockWsServer::new().await;
    let api = MiningApi::with_builder("key-1", "rig", 4096, fast_builder([server.url()])).unwrap();
    let info = Recorder::new();
    api.on_mining_info(info.callback());
    api.init().await.unwrap();

    server.push(push_frame("poolmgr.mining_info", json!({"height": 100})));
    server.push(push_frame("poolmgr.mining_info", json!({"height": 150})));
    server.push(push_frame("poolmgr.mining_info", json!({"height": 151})));
    server.push(push_frame("poolmgr.mining_info", json!({"height": 152})));

    // Only the jump itself is dropped; the chain then follows the new height
    assert!(info.wait_for(3).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    let heights: Vec<_> = info.seen().iter().map(|p| p["height"].clone()).collect();
    assert_eq!(heights, vec![json!(100), json!(151), json!(152)]);

    api.destroy(true).await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_mining_filter_resets_on_reconnect() {
    let server = MockWsServer::new().await;
    let api = MiningApi::with_builder("key-1", "rig", 4096, fast_builder([server.url()]))
        .unwrap()
        .with_height_filter(HeightFilter::new(5));
    let info = Recorder::new();
    api.on_mining_info(info.callback());
    api.init().await.unwrap();

    server.push(push_frame("poolmgr.mining_info", json!({"height": 100})));
    assert!(info.wait_for(1).await);

    api.session().reconnect().await.unwrap();

    // Far from 100, but the first push on a fresh connection
    server.push(push_frame("poolmgr.mining_info", json!({"height": 500})));
    assert!(info.wait_for(2).await);
    assert_eq!(info.seen()[1]["height"], 500);

    api.destroy(true).await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_mining_info_request() {
    let server = MockWsServer::acking(|_, frame| {
        if frame["cmd"] == "mining_info" {
            vec![reply(frame, json!({"height": 200, "baseTarget": 42}))]
        } else {
            Vec::new()
        }
    })
    .await;
    let api = MiningApi::with_builder("key-1", "rig", 4096, fast_builder([server.url()])).unwrap();
    api.init().await.unwrap();

    let info = api.get_mining_info().await.unwrap();
    assert_eq!(info["baseTarget"], 42);

    let sent = server.received_cmd("mining_info");
    assert_eq!(sent[0]["para"], json!({}));
    assert!(sent[0].get("chk").is_none());

    api.destroy(true).await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_submit_nonce_is_fire_and_forget() {
    let server = MockWsServer::new().await;
    let api = MiningApi::with_builder("key-1", "rig", 4096, fast_builder([server.url()])).unwrap();
    api.init().await.unwrap();

    api.submit_nonce(7, 150_000, 99, 1234).await.unwrap();
    assert_eq!(api.session().pending_requests().await, 0);

    let frame = server.wait_for_cmd("poolmgr.submit_nonce").await.unwrap();
    assert_eq!(frame["para"]["account_key"], "key-1");
    assert_eq!(frame["para"]["submit"][0]["nonce"], 99);
    assert_eq!(frame["para"]["submit"][0]["deadline"], 1234);

    api.destroy(true).await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_public_pool_stats_carry_mark() {
    let server = MockWsServer::acking(|_, frame| {
        if frame["cmd"] == "apid.get_pool_stat" {
            vec![reply(frame, json!({"pool": frame["mark"], "miners": 12}))]
        } else {
            Vec::new()
        }
    })
    .await;
    let api = PublicApi::with_builder("bhd_co", fast_builder([server.url()])).unwrap();
    api.init().await.unwrap();

    let stats = api.get_pool_stats().await.unwrap();
    assert_eq!(stats["pool"], "bhd_co");
    assert_eq!(stats["miners"], 12);

    let sent = server.received_cmd("apid.get_pool_stat");
    assert!(sent[0]["chk"].is_i64());
    assert_eq!(sent[0]["para"], json!({}));

    api.destroy(true).await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_public_best_mining_info_survives_reconnect() {
    let server = MockWsServer::new().await;
    let api = PublicApi::with_builder("bhd_co", fast_builder([server.url()])).unwrap();
    let best = Recorder::new();
    api.on_best_mining_info(best.callback());
    api.init().await.unwrap();

    server.push(push_frame("apid.best_mining_info", json!({"height": 1})));
    assert!(best.wait_for(1).await);

    api.session().reconnect().await.unwrap();
    server.push(push_frame("apid.best_mining_info", json!({"height": 2})));
    assert!(best.wait_for(2).await);

    // Not duplicated by a second init on a live session
    api.init().await.unwrap();
    server.push(push_frame("apid.best_mining_info", json!({"height": 3})));
    assert!(best.wait_for(3).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(best.len(), 3);

    api.destroy(true).await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_account_commands() {
    let server = MockWsServer::acking(|_, frame| match frame["cmd"].as_str() {
        Some("apid.get_mill_list") => {
            vec![reply(frame, json!({"data": [{"name": "rig"}], "total": 1}))]
        }
        Some("apid.get_award_list") => vec![reply(frame, frame["para"].clone())],
        _ => Vec::new(),
    })
    .await;
    let url = format!("{}/?uid=42&key=secret", server.url());
    let api = AccountApi::with_builder("42", fast_builder([url])).unwrap();
    api.init().await.unwrap();

    let miners = api.get_miners().await.unwrap();
    assert_eq!(miners, json!([{"name": "rig"}]));

    let echoed = api.get_earnings_history(None).await.unwrap();
    assert_eq!(
        echoed,
        json!({"uid": "42", "type": "bhd", "offset": 0, "count": 10})
    );

    api.destroy(true).await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_account_session_expiry() {
    let server = MockWsServer::acking(|_, frame| {
        vec![error_reply(frame, "EFATAL", "uid not equ. session")]
    })
    .await;
    let url = format!("{}/?uid=42&key=stale", server.url());
    let api = AccountApi::with_builder("42", fast_builder([url])).unwrap();
    let expired = Recorder::new();
    api.subscribe("sessionExpired", expired.callback());
    api.init().await.unwrap();

    assert!(api.get_user_info().await.is_err());
    assert!(expired.wait_for(1).await);
    assert!(api.session().is_expired());
    assert!(matches!(api.init().await, Err(Error::SessionExpired)));

    server.shutdown().await;
}
