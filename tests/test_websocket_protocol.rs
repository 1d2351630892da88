//! WebSocket protocol scenarios against an in-process server.

mod common;

use std::time::Duration;

use gpio_sequencer::dispatcher::DispatchOptions;
use gpio_sequencer::engine::Level;
use gpio_sequencer::output::PinLevel;
use gpio_sequencer::protocol::ServerEvent;
use serde_json::json;

use common::{TestServer, wait_until};

#[tokio::test]
async fn greeting_reports_mapping_and_availability() {
    let server = TestServer::start().await;
    let mut client = server.connect_raw().await;

    let status = client.recv().await;
    assert_eq!(
        status,
        json!({
            "type": "connection_status",
            "data": {
                "connected": true,
                "gpio_available": false,
                "channel_mapping": {
                    "0": 2, "1": 3, "2": 4, "3": 17,
                    "4": 27, "5": 22, "6": 10, "7": 9
                }
            }
        })
    );
    assert_eq!(server.registry.len(), 1);

    client.close().await;
    server.stop().await;
}

#[tokio::test]
async fn immediate_trigger_pulses_and_releases() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    let reply = client
        .request(&json!({"type": "immediate_trigger", "data": {"channel": 0, "duration": 100}}))
        .await;
    assert_eq!(
        reply,
        json!({
            "type": "immediate_trigger_response",
            "data": {"channel": 0, "duration": 100, "success": true}
        })
    );
    assert_eq!(server.engine.level(0), Some(Level::Active));

    assert!(wait_until(|| server.engine.level(0) == Some(Level::Idle)).await);
    assert_eq!(server.output.level(2), Some(PinLevel::High));
    assert_eq!(
        server.output.writes_for(2),
        vec![PinLevel::High, PinLevel::Low, PinLevel::High]
    );

    client.close().await;
    server.stop().await;
}

#[tokio::test]
async fn gpio_trigger_reports_partial_failure() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    let reply = client
        .request(&json!({"type": "gpio_trigger", "data": {"channels": [0, 99], "duration": 30}}))
        .await;
    assert_eq!(reply["type"], "gpio_trigger_response");
    assert_eq!(reply["data"]["channels"], json!([0, 99]));
    assert_eq!(reply["data"]["duration"], 30);
    assert_eq!(reply["data"]["results"], json!({"0": true, "99": false}));
    assert_eq!(reply["data"]["success"], false);

    assert!(wait_until(|| server.engine.active_channels().is_empty()).await);
    assert_eq!(server.engine.level(0), Some(Level::Idle));

    client.close().await;
    server.stop().await;
}

#[tokio::test]
async fn stop_channels_without_list_stops_everything() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    let reply = client
        .request(&json!({"type": "gpio_trigger", "data": {"channels": [1, 2, 5], "duration": 60000}}))
        .await;
    assert_eq!(reply["data"]["success"], true);
    assert_eq!(server.engine.active_channels(), vec![1, 2, 5]);

    let reply = client
        .request(&json!({"type": "stop_channels", "data": {}}))
        .await;
    assert_eq!(
        reply,
        json!({"type": "stop_channels_response", "data": {"channels": "all", "success": true}})
    );
    assert!(server.engine.active_channels().is_empty());
    for channel in 0..8 {
        assert_eq!(server.engine.level(channel), Some(Level::Idle));
    }

    client.close().await;
    server.stop().await;
}

#[tokio::test]
async fn ping_replies_with_timestamp() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    let reply = client.request(&json!({"type": "ping"})).await;
    assert_eq!(reply["type"], "pong");
    assert!(reply["data"]["timestamp"].as_f64().unwrap() > 0.0);

    client.close().await;
    server.stop().await;
}

#[tokio::test]
async fn empty_gpio_trigger_gets_no_reply() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    client
        .send(&json!({"type": "gpio_trigger", "data": {"channels": []}}))
        .await;
    // the next frame must answer the ping, not the empty trigger
    let reply = client.request(&json!({"type": "ping"})).await;
    assert_eq!(reply["type"], "pong");

    client.close().await;
    server.stop().await;
}

#[tokio::test]
async fn unknown_type_reports_error_and_keeps_connection() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    let reply = client.request(&json!({"type": "dance", "data": {}})).await;
    assert_eq!(
        reply,
        json!({"type": "error", "data": {"error": "Unknown message type: dance"}})
    );

    let reply = client
        .request(&json!({"type": "immediate_trigger", "data": {"duration": 10}}))
        .await;
    assert_eq!(reply["data"]["error"], "Channel is required");

    let reply = client.request(&json!({"type": "ping"})).await;
    assert_eq!(reply["type"], "pong");

    client.close().await;
    server.stop().await;
}

#[tokio::test]
async fn invalid_json_reports_error_and_closes() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    client.send_raw("{this is not json").await;
    let reply = client.recv().await;
    assert_eq!(reply["type"], "error");
    client.expect_closed().await;

    assert!(wait_until(|| server.registry.is_empty()).await);
    server.stop().await;
}

#[tokio::test]
async fn disconnect_unregisters_connection() {
    let server = TestServer::start().await;
    let first = server.connect().await;
    let second = server.connect().await;
    assert_eq!(server.registry.len(), 2);

    first.close().await;
    assert!(wait_until(|| server.registry.len() == 1).await);
    second.close().await;
    assert!(wait_until(|| server.registry.is_empty()).await);

    server.stop().await;
}

#[tokio::test]
async fn broadcast_reaches_every_client() {
    let server = TestServer::start().await;
    let mut first = server.connect().await;
    let mut second = server.connect().await;

    let delivered = server.registry.broadcast(&ServerEvent::error("maintenance"));
    assert_eq!(delivered, 2);
    assert_eq!(first.recv().await["data"]["error"], "maintenance");
    assert_eq!(second.recv().await["data"]["error"], "maintenance");

    first.close().await;
    second.close().await;
    server.stop().await;
}

#[tokio::test]
async fn channel_state_is_shared_across_connections() {
    let server = TestServer::start().await;
    let mut first = server.connect().await;
    let mut second = server.connect().await;

    first
        .request(&json!({"type": "immediate_trigger", "data": {"channel": 3, "duration": 60000}}))
        .await;
    assert_eq!(server.engine.active_channels(), vec![3]);

    let reply = second
        .request(&json!({"type": "stop_channels", "data": {"channels": [3]}}))
        .await;
    assert_eq!(reply["data"]["channels"], json!([3]));
    assert!(server.engine.active_channels().is_empty());
    assert_eq!(server.output.level(17), Some(PinLevel::High));

    first.close().await;
    second.close().await;
    server.stop().await;
}

#[tokio::test]
async fn shutdown_closes_open_connections() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;
    client
        .request(&json!({"type": "immediate_trigger", "data": {"channel": 6, "duration": 60000}}))
        .await;

    server.cancel();
    client.expect_closed().await;

    let output = server.output.clone();
    server.stop().await;
    assert!(output.is_released());
    assert_eq!(output.writes_for(10).last(), Some(&PinLevel::High));
}

#[tokio::test]
async fn deferred_stop_option_ends_pulse_from_dispatcher() {
    let server = TestServer::start_with(DispatchOptions {
        deferred_stop: true,
    })
    .await;
    let mut client = server.connect().await;

    client
        .request(&json!({"type": "immediate_trigger", "data": {"channel": 1, "duration": 200}}))
        .await;
    // retrigger directly with a long pulse; the deferred stop still fires
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(server.engine.trigger(1, Duration::from_secs(60)));

    assert!(wait_until(|| server.engine.level(1) == Some(Level::Idle)).await);

    client.close().await;
    server.stop().await;
}
