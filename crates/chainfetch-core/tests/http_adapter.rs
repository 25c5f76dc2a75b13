//! Integration tests: libcurl adapter against a local JSON server, alone and inside a run.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chainfetch_core::error::FetchError;
use chainfetch_core::fetch::{
    FetchAdapter, FetchSettings, FieldValue, HttpAdapter, HttpAdapterOptions, RetryingAdapter,
};
use chainfetch_core::partition::{PartitionKey, PartitionWindow};
use chainfetch_core::retry::RetryPolicy;
use chainfetch_core::scheduler::{ParallelFetchScheduler, SchedulerEvent};
use chainfetch_core::Pipeline;
use common::json_server::{self, Reply, Routes};
use tempfile::tempdir;

fn adapter(base_url: &str) -> HttpAdapter {
    HttpAdapter::new(HttpAdapterOptions {
        base_url: base_url.to_string(),
        connect_timeout: Duration::from_secs(2),
        timeout: Duration::from_secs(5),
    })
    .unwrap()
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(10),
    }
}

#[tokio::test]
async fn lists_and_fetches_over_http() {
    let server = json_server::start(
        Routes::new(&["20240119", "20240126"]).records(
            "20240119",
            vec![Reply::json(
                r#"[{"strike":470,"right":"C","bid":1.5,"halted":false,"note":null}]"#,
            )],
        ),
    );
    let http = adapter(&server.base_url);

    let keys = http.list_partitions().await.unwrap();
    assert_eq!(keys, vec![PartitionKey::new("20240119"), PartitionKey::new("20240126")]);

    let request = FetchSettings::default().request_for(&keys[0], "2024-01-15");
    let records = http.fetch(&request).await.unwrap();
    assert_eq!(records.len(), 1);
    let r = &records[0];
    assert_eq!(r.get("strike"), Some(&FieldValue::Int(470)));
    assert_eq!(r.get("right"), Some(&FieldValue::Text("C".into())));
    assert_eq!(r.get("bid"), Some(&FieldValue::Float(1.5)));
    assert_eq!(r.get("halted"), Some(&FieldValue::Bool(false)));
    assert_eq!(r.get("note"), Some(&FieldValue::Null));

    assert_eq!(
        server.hits("/records?partition=20240119&reference_date=2024-01-15&interval=1m&trading_hours_only=true"),
        1
    );
}

#[tokio::test]
async fn http_errors_are_classified() {
    let server = json_server::start(
        Routes::new(&[])
            .records("500", vec![Reply::status(500, "upstream exploded")])
            .records("429", vec![Reply::rate_limited(7)])
            .records("bad", vec![Reply::json("{not json")]),
    );
    let http = adapter(&server.base_url);
    let settings = FetchSettings::default();

    let err = http
        .fetch(&settings.request_for(&PartitionKey::new("500"), "2024-01-15"))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        FetchError::Api {
            status_code: 500,
            message: "upstream exploded".into()
        }
    );

    let err = http
        .fetch(&settings.request_for(&PartitionKey::new("429"), "2024-01-15"))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        FetchError::RateLimit {
            retry_after: Some(Duration::from_secs(7))
        }
    );

    let err = http
        .fetch(&settings.request_for(&PartitionKey::new("bad"), "2024-01-15"))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Decode(_)));

    let err = http
        .fetch(&settings.request_for(&PartitionKey::new("missing"), "2024-01-15"))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Api { status_code: 404, .. }));
}

#[tokio::test]
async fn connection_refused_is_a_connection_error() {
    // Bind then drop to get a port nothing listens on.
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let http = adapter(&format!("http://127.0.0.1:{port}/"));
    let err = http.list_partitions().await.unwrap_err();
    assert!(matches!(err, FetchError::Connection(_)));
}

#[tokio::test]
async fn retrying_adapter_rides_out_transient_errors() {
    let server = json_server::start(Routes::new(&["20240119"]).records(
        "20240119",
        vec![
            Reply::status(503, "warming up"),
            Reply::rate_limited(0),
            Reply::json(r#"[{"strike":470}]"#),
        ],
    ));
    let retrying = RetryingAdapter::new(adapter(&server.base_url), fast_retry());
    let request = FetchSettings::default().request_for(&PartitionKey::new("20240119"), "2024-01-15");
    let records = retrying.fetch(&request).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(server.hits("partition=20240119"), 3);
}

#[tokio::test]
async fn full_run_over_http() {
    let server = json_server::start(
        Routes::new(&["20240115", "20240117", "20240119", "20240301"])
            .records(
                "20240115",
                vec![Reply::json(
                    r#"[{"strike":470,"root":"SPY, Inc"},{"strike":475,"root":"SPY"},{"strike":480,"root":"SPY"}]"#,
                )],
            )
            .records("20240117", vec![Reply::status(500, "boom")])
            .records("20240119", vec![Reply::json(r#"[{"strike":1,"root":"SPY"}]"#)]),
    );
    let upstream = RetryingAdapter::new(
        adapter(&server.base_url),
        RetryPolicy {
            max_attempts: 2,
            ..fast_retry()
        },
    );
    let out = tempdir().unwrap();
    let pipeline = Pipeline::new(Arc::new(upstream), FetchSettings::default())
        .with_columns(Some(vec!["root".into(), "strike".into()]));

    let metrics = pipeline
        .run(&PartitionWindow::new("2024-01-15", Some(7)), 2, 2, out.path())
        .await
        .unwrap();

    assert_eq!(metrics.total_partitions, 3);
    assert_eq!(metrics.successful_partitions, 2);
    assert_eq!(metrics.failed_partitions, 1);
    assert_eq!(metrics.total_records, 4);
    // Retried once, then given up.
    assert_eq!(server.hits("partition=20240117"), 2);
    assert_eq!(server.hits("partition=20240301"), 0);

    let body = std::fs::read_to_string(out.path().join("2024-01-15/20240115.csv")).unwrap();
    assert_eq!(body, "root,strike\n\"SPY, Inc\",470\nSPY,475\nSPY,480\n");
}

#[tokio::test]
async fn shutting_down_the_stream_closes_a_stalled_connection() {
    use std::io::{ErrorKind, Read};
    use std::sync::mpsc;

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let base_url = format!("http://{}/", listener.local_addr().unwrap());
    let (received_tx, received_rx) = mpsc::channel::<()>();
    let (closed_tx, closed_rx) = mpsc::channel::<bool>();
    std::thread::spawn(move || {
        let (mut sock, _) = listener.accept().unwrap();
        let mut buf = [0u8; 4096];
        let _ = sock.read(&mut buf);
        received_tx.send(()).unwrap();
        // Never reply; wait for the client to hang up.
        sock.set_read_timeout(Some(Duration::from_secs(20))).unwrap();
        loop {
            match sock.read(&mut buf) {
                Ok(0) => break closed_tx.send(true).unwrap(),
                Ok(_) => continue,
                Err(e) if e.kind() == ErrorKind::ConnectionReset => {
                    break closed_tx.send(true).unwrap()
                }
                Err(_) => break closed_tx.send(false).unwrap(),
            }
        }
    });

    let http = HttpAdapter::new(HttpAdapterOptions {
        base_url,
        connect_timeout: Duration::from_secs(2),
        timeout: Duration::from_secs(60),
    })
    .unwrap();
    let request = FetchSettings::default().request_for(&PartitionKey::new("20240119"), "2024-01-15");
    let mut stream = ParallelFetchScheduler::new(Arc::new(http), 1).spawn(vec![request]);

    assert!(matches!(stream.next().await, Some(SchedulerEvent::Dispatched { .. })));
    tokio::task::spawn_blocking(move || received_rx.recv_timeout(Duration::from_secs(10)))
        .await
        .unwrap()
        .unwrap();

    stream.shutdown().await;
    let closed = tokio::task::spawn_blocking(move || closed_rx.recv_timeout(Duration::from_secs(5)))
        .await
        .unwrap();
    assert_eq!(closed, Ok(true));
}
