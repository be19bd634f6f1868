//! Integration tests for the composed feed.
//!
//! Each test runs a throwaway in-process server (raw HTTP for backfill, a
//! real WebSocket accept loop for the stream) and exercises the public
//! `Datafeed` surface: connect → subscribe → receive → unsubscribe → close,
//! plus reconnection and failure reporting. No external network access.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use chartfeed::prelude::*;

const TEST_TIMEOUT: Duration = Duration::from_secs(5);

fn fast_ws_config(url: String) -> WsConfig {
    WsConfig {
        url,
        reconnect: true,
        base_reconnect_delay_ms: 10,
        max_reconnect_delay_ms: 100,
        max_reconnect_attempts: 5,
    }
}

async fn bind_ws() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    (listener, url)
}

fn chart_update_json(instrument: &str, close: f64) -> String {
    format!(
        r#"{{"type":"chartUpdate","instrumentAddress":"{instrument}","data":{{"unixTime":60,"open":10.0,"high":12.0,"low":9.0,"close":{close},"volume":100.0}}}}"#
    )
}

/// Serve exactly one HTTP request with a canned response, then exit.
async fn spawn_history_server(status_line: &'static str, body: String) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());

    tokio::spawn(async move {
        if let Ok((mut stream, _)) = listener.accept().await {
            let mut buf = [0u8; 4096];
            let _ = stream.read(&mut buf).await;
            let resp = format!(
                "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = stream.write_all(resp.as_bytes()).await;
            let _ = stream.shutdown().await;
        }
    });

    base_url
}

// ─── Historical backfill ─────────────────────────────────────────────────────

#[tokio::test]
async fn history_applies_multiplier_and_unit_conversion() {
    let body = r#"[{"time":60,"open":10.0,"high":12.0,"low":9.0,"close":11.0,"volume":100.0}]"#;
    let base_url = spawn_history_server("200 OK", body.to_string()).await;

    let feed = Datafeed::builder()
        .api_url(&base_url)
        .price_multiplier(2.0)
        .build()
        .unwrap();

    let candles = feed
        .history_candles(&"TOK".into(), &"5m".into(), 0, 300_000)
        .await
        .unwrap();

    assert_eq!(
        candles,
        vec![Candle {
            timestamp: 60_000,
            open: 20.0,
            high: 24.0,
            low: 18.0,
            close: 22.0,
            volume: 100.0,
        }]
    );
}

#[tokio::test]
async fn history_failure_returns_empty_and_reports_on_side_channel() {
    let base_url = spawn_history_server("500 Internal Server Error", "boom".to_string()).await;

    let feed = Datafeed::builder()
        .api_url(&base_url)
        .build()
        .unwrap();

    let candles = feed
        .history_candles(&"TOK".into(), &"5m".into(), 0, 300_000)
        .await
        .unwrap();
    assert!(candles.is_empty());

    // Empty alone does not mean failure; the advisory stream does.
    let events = feed.events();
    tokio::pin!(events);
    let event = timeout(TEST_TIMEOUT, events.next())
        .await
        .expect("timed out waiting for HistoryError")
        .expect("event stream ended");
    assert!(matches!(event, FeedEvent::HistoryError(_)));
}

// ─── Live stream lifecycle ───────────────────────────────────────────────────

#[tokio::test]
async fn subscribe_receives_scaled_candles_and_raw_price_broadcast() {
    let (listener, url) = bind_ws().await;

    // Server: expect one subscribe for TOK (and nothing for the empty id),
    // then push an update and stay open.
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();

        let first = timeout(TEST_TIMEOUT, ws.next()).await.unwrap().unwrap().unwrap();
        let text = match first {
            Message::Text(t) => t.as_str().to_string(),
            other => panic!("expected text frame, got: {other:?}"),
        };
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["type"], "subscribeToChart");
        assert_eq!(parsed["instrumentAddress"], "TOK");
        assert_eq!(parsed["timeframe"], "5m");

        ws.send(Message::Text(chart_update_json("TOK", 3.0).into()))
            .await
            .unwrap();

        // No further announcements should arrive (the empty-id subscribe
        // must have been a no-op).
        let extra = timeout(Duration::from_millis(300), ws.next()).await;
        assert!(extra.is_err(), "unexpected extra message: {extra:?}");
    });

    let mut feed = Datafeed::builder()
        .ws_config(fast_ws_config(url))
        .price_multiplier(5.0)
        .build()
        .unwrap();

    let (candle_tx, mut candle_rx) = mpsc::unbounded_channel();
    feed.subscribe("".into(), "5m".into(), |_c| {
        panic!("empty-id subscription must never fire");
    });
    feed.subscribe("TOK".into(), "5m".into(), move |c| {
        let _ = candle_tx.send(c);
    });
    let mut prices = feed.price_updates();

    feed.connect().await.unwrap();

    let candle = timeout(TEST_TIMEOUT, candle_rx.recv())
        .await
        .expect("timed out waiting for candle")
        .unwrap();
    assert_eq!(candle.close, 15.0); // 3.0 * multiplier 5
    assert_eq!(candle.timestamp, 60_000);
    assert_eq!(candle.volume, 100.0);

    let update = timeout(TEST_TIMEOUT, prices.recv())
        .await
        .expect("timed out waiting for price broadcast")
        .unwrap();
    assert_eq!(update.price, 3.0); // raw, pre-multiplier
    assert_eq!(update.instrument.as_str(), "TOK");

    assert_eq!(feed.current_price(&"TOK".into()), Some(3.0));

    server.await.unwrap();
    feed.close().await;
    assert_eq!(feed.connection_state(), ConnectionState::Closed);
}

#[tokio::test]
async fn unsubscribe_announces_and_stops_delivery() {
    let (listener, url) = bind_ws().await;
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<()>();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();

        // subscribe announcement
        let msg = timeout(TEST_TIMEOUT, ws.next()).await.unwrap().unwrap().unwrap();
        assert!(matches!(&msg, Message::Text(t) if t.as_str().contains("subscribeToChart")));

        ws.send(Message::Text(chart_update_json("TOK", 1.0).into()))
            .await
            .unwrap();

        // unsubscribe announcement, carrying the registered timeframe
        let msg = timeout(TEST_TIMEOUT, ws.next()).await.unwrap().unwrap().unwrap();
        let text = match msg {
            Message::Text(t) => t.as_str().to_string(),
            other => panic!("expected text frame, got: {other:?}"),
        };
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["type"], "unsubscribeFromChart");
        assert_eq!(parsed["timeframe"], "1m");

        // A push after unsubscribe must be dropped client-side.
        ws.send(Message::Text(chart_update_json("TOK", 2.0).into()))
            .await
            .unwrap();
        let _ = done_tx.send(());
        tokio::time::sleep(Duration::from_millis(500)).await;
    });

    let mut feed = Datafeed::builder()
        .ws_config(fast_ws_config(url))
        .build()
        .unwrap();

    let (candle_tx, mut candle_rx) = mpsc::unbounded_channel();
    feed.subscribe("TOK".into(), "1m".into(), move |c| {
        let _ = candle_tx.send(c);
    });
    feed.connect().await.unwrap();

    let first = timeout(TEST_TIMEOUT, candle_rx.recv()).await.unwrap().unwrap();
    assert_eq!(first.close, 1.0);

    feed.unsubscribe(&"TOK".into(), &"1m".into());

    timeout(TEST_TIMEOUT, done_rx.recv()).await.unwrap();
    let late = timeout(Duration::from_millis(300), candle_rx.recv()).await;
    assert!(late.is_err(), "candle delivered after unsubscribe: {late:?}");

    feed.close().await;
    server.await.unwrap();
}

#[tokio::test]
async fn reconnect_resubscribes_all_instruments_in_order() {
    let (listener, url) = bind_ws().await;
    let (subs_tx, mut subs_rx) = mpsc::unbounded_channel::<Vec<String>>();

    let server = tokio::spawn(async move {
        for round in 0..2 {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();

            let mut addresses = Vec::new();
            while addresses.len() < 2 {
                let msg = timeout(TEST_TIMEOUT, ws.next()).await.unwrap().unwrap().unwrap();
                if let Message::Text(t) = msg {
                    let parsed: serde_json::Value = serde_json::from_str(t.as_str()).unwrap();
                    assert_eq!(parsed["type"], "subscribeToChart");
                    addresses.push(parsed["instrumentAddress"].as_str().unwrap().to_string());
                }
            }
            subs_tx.send(addresses).unwrap();

            if round == 0 {
                // Drop the connection to force a reconnect.
                let _ = ws.close(None).await;
            } else {
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        }
    });

    let mut feed = Datafeed::builder()
        .ws_config(fast_ws_config(url))
        .build()
        .unwrap();

    feed.subscribe("AAA".into(), "5m".into(), |_c| {});
    feed.subscribe("BBB".into(), "1m".into(), |_c| {});
    feed.connect().await.unwrap();

    let first = timeout(TEST_TIMEOUT, subs_rx.recv()).await.unwrap().unwrap();
    assert_eq!(first, vec!["AAA".to_string(), "BBB".to_string()]);

    // No consumer action here; the registry re-announces on its own.
    let second = timeout(TEST_TIMEOUT, subs_rx.recv()).await.unwrap().unwrap();
    assert_eq!(second, vec!["AAA".to_string(), "BBB".to_string()]);

    feed.close().await;
    server.await.unwrap();
}

#[tokio::test]
async fn retry_budget_exhaustion_is_observable_not_fatal() {
    // Bind then drop to get a port nothing listens on.
    let (listener, url) = bind_ws().await;
    drop(listener);

    let mut feed = Datafeed::builder()
        .ws_config(WsConfig {
            max_reconnect_attempts: 2,
            ..fast_ws_config(url)
        })
        .build()
        .unwrap();

    feed.connect().await.unwrap();

    {
        let events = feed.events();
        tokio::pin!(events);
        let exhausted = timeout(TEST_TIMEOUT, async {
            while let Some(ev) = events.next().await {
                if ev == FeedEvent::Exhausted {
                    return true;
                }
            }
            false
        })
        .await
        .expect("timed out waiting for Exhausted");
        assert!(exhausted);
    }

    assert_eq!(feed.connection_state(), ConnectionState::Exhausted);

    // A later explicit connect() starts a fresh cycle.
    feed.connect().await.unwrap();
    assert_ne!(feed.connection_state(), ConnectionState::Closed);
    feed.close().await;
}

#[tokio::test]
async fn failed_connect_is_disconnected_while_retry_is_pending() {
    let (listener, url) = bind_ws().await;
    drop(listener);

    // A long backoff keeps the retry pending while we inspect the state.
    let mut feed = Datafeed::builder()
        .ws_config(WsConfig {
            base_reconnect_delay_ms: 2_000,
            ..fast_ws_config(url)
        })
        .build()
        .unwrap();
    feed.connect().await.unwrap();

    {
        let events = feed.events();
        tokio::pin!(events);
        let event = timeout(TEST_TIMEOUT, events.next())
            .await
            .expect("timed out waiting for Disconnected")
            .expect("event stream ended");
        assert!(matches!(event, FeedEvent::Disconnected { .. }));
    }

    // The attempt is over and a retry is scheduled: not Connecting.
    assert_eq!(feed.connection_state(), ConnectionState::Disconnected);

    feed.close().await;
}

#[tokio::test]
async fn close_during_hung_connect_attempt_stays_closed() {
    // Accept the TCP connection but never answer the WebSocket handshake,
    // so the connect attempt hangs until its own timeout.
    let (listener, url) = bind_ws().await;
    let hold = tokio::spawn(async move {
        let (_stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
    });

    let mut feed = Datafeed::builder()
        .ws_config(fast_ws_config(url))
        .build()
        .unwrap();
    feed.connect().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    feed.close().await;
    assert_eq!(feed.connection_state(), ConnectionState::Closed);

    // The abandoned attempt must not resurrect the connection later.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(feed.connection_state(), ConnectionState::Closed);
    hold.abort();
}

#[tokio::test]
async fn malformed_push_is_dropped_without_breaking_the_stream() {
    let (listener, url) = bind_ws().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();

        let _ = timeout(TEST_TIMEOUT, ws.next()).await.unwrap(); // subscribe

        // Missing "close": must be dropped, not crash the task.
        ws.send(Message::Text(
            r#"{"type":"chartUpdate","instrumentAddress":"TOK","data":{"unixTime":60,"open":1.0,"high":2.0,"low":0.5,"volume":10.0}}"#.into(),
        ))
        .await
        .unwrap();

        // A well-formed follow-up must still be delivered.
        ws.send(Message::Text(chart_update_json("TOK", 7.0).into()))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
    });

    let mut feed = Datafeed::builder()
        .ws_config(fast_ws_config(url))
        .build()
        .unwrap();

    let (candle_tx, mut candle_rx) = mpsc::unbounded_channel();
    feed.subscribe("TOK".into(), "5m".into(), move |c| {
        let _ = candle_tx.send(c);
    });
    feed.connect().await.unwrap();

    let candle = timeout(TEST_TIMEOUT, candle_rx.recv()).await.unwrap().unwrap();
    assert_eq!(candle.close, 7.0);
    assert!(candle_rx.try_recv().is_err(), "malformed candle was delivered");

    feed.close().await;
    server.await.unwrap();
}
