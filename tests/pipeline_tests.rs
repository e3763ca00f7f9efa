//! End-to-end pipelines: parsed query -> graph -> channel-backed sources ->
//! collecting sink.

mod common;

use common::{ChannelSourceFactory, CollectSink, event, wait_for};
use std::sync::Arc;
use std::time::Duration;
use streamql::error::StreamQlError;
use streamql::{EngineConfig, QueryBuilder, sql};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn seeded_stream(count: usize) -> Vec<streamql::SharedEvent> {
    (0..count)
        .map(|i| {
            event(
                i as i64,
                &[
                    ("CorrelationID", i.to_string().as_str()),
                    ("StringPayload", format!("This is message {i}").as_str()),
                ],
            )
        })
        .collect()
}

#[tokio::test]
async fn filter_and_projection_pipeline() {
    let factory = Arc::new(ChannelSourceFactory::new().with_stream("streamA", seeded_stream(20)));
    let (sink, received) = CollectSink::new();

    let stmt = sql::parse("SELECT StringPayload FROM streamA WHERE CorrelationID = '1'").unwrap();
    let builder = QueryBuilder::new(factory, EngineConfig::default()).with_terminal(sink);

    let token = CancellationToken::new();
    let (errors, _errors_rx) = mpsc::channel(16);
    let graph = builder.build(&stmt, &token, &errors).unwrap();
    assert_eq!(graph.processor_count(), 4);

    let runner = tokio::spawn(graph.run(token.clone()));

    let got_one = {
        let received = received.clone();
        wait_for(
            move || !received.lock().unwrap().is_empty(),
            Duration::from_secs(2),
        )
        .await
    };
    assert!(got_one, "sink never received an event");
    // Let any stragglers drain before asserting exact counts.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let results = received.lock().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].get_string("StringPayload"), "This is message 1");
    // Projection keeps only the selected field.
    assert_eq!(results[0].field("CorrelationID"), None);
    drop(results);

    token.cancel();
    let outcome = runner.await.unwrap();
    assert!(matches!(outcome, Err(StreamQlError::Cancelled)));
}

#[tokio::test]
async fn wildcard_select_bypasses_projection() {
    let factory = Arc::new(ChannelSourceFactory::new().with_stream("streamA", seeded_stream(3)));
    let (sink, received) = CollectSink::new();

    let stmt = sql::parse("SELECT * FROM streamA").unwrap();
    let builder = QueryBuilder::new(factory, EngineConfig::default()).with_terminal(sink);

    let token = CancellationToken::new();
    let (errors, _errors_rx) = mpsc::channel(16);
    let graph = builder.build(&stmt, &token, &errors).unwrap();
    // Source and sink only; no ColumnFilter in between.
    assert_eq!(graph.processor_count(), 2);

    let runner = tokio::spawn(graph.run(token.clone()));

    let got_all = {
        let received = received.clone();
        wait_for(
            move || received.lock().unwrap().len() == 3,
            Duration::from_secs(2),
        )
        .await
    };
    assert!(got_all, "sink did not receive every event");

    let results = received.lock().unwrap();
    // All fields survive.
    assert!(results[0].field("CorrelationID").is_some());
    assert!(results[0].field("StringPayload").is_some());
    drop(results);

    token.cancel();
    let _ = runner.await.unwrap();
}

#[tokio::test]
async fn join_pipeline_pairs_streams() {
    let lefts = vec![
        event(0, &[("k", "1"), ("side", "l")]),
        event(5, &[("k", "2"), ("side", "l")]),
    ];
    let rights = vec![
        event(30, &[("k", "1"), ("side", "r")]),
        event(35, &[("k", "9"), ("side", "r")]),
    ];
    let factory = Arc::new(
        ChannelSourceFactory::new()
            .with_stream("streamA", lefts)
            .with_stream("streamB", rights),
    );
    let (sink, received) = CollectSink::new();

    let stmt =
        sql::parse("SELECT * FROM streamA a JOIN streamB b ON a.k = b.k WITHIN 1 MINUTES").unwrap();
    let builder = QueryBuilder::new(factory, EngineConfig::default()).with_terminal(sink);

    let token = CancellationToken::new();
    let (errors, _errors_rx) = mpsc::channel(16);
    let graph = builder.build(&stmt, &token, &errors).unwrap();

    let runner = tokio::spawn(graph.run(token.clone()));

    let got_pair = {
        let received = received.clone();
        wait_for(
            move || !received.lock().unwrap().is_empty(),
            Duration::from_secs(2),
        )
        .await
    };
    assert!(got_pair, "join never emitted");
    tokio::time::sleep(Duration::from_millis(100)).await;

    let results = received.lock().unwrap();
    // Only k=1 pairs; k=2 and k=9 have no counterpart.
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].get_string("left.side"), "l");
    assert_eq!(results[0].get_string("right.side"), "r");
    assert_eq!(results[0].get_string("left.k"), "1");
    drop(results);

    token.cancel();
    let _ = runner.await.unwrap();
}

#[tokio::test]
async fn unknown_stream_fails_the_build() {
    let factory = Arc::new(ChannelSourceFactory::new());
    let stmt = sql::parse("SELECT * FROM nosuch").unwrap();
    let builder = QueryBuilder::new(factory, EngineConfig::default());

    let token = CancellationToken::new();
    let (errors, _errors_rx) = mpsc::channel(16);
    let err = builder.build(&stmt, &token, &errors).unwrap_err();
    assert!(matches!(err, StreamQlError::Build(_)));
}

#[tokio::test]
async fn malformed_on_clause_is_semantic() {
    let factory = Arc::new(
        ChannelSourceFactory::new()
            .with_stream("a", Vec::new())
            .with_stream("b", Vec::new()),
    );
    let token = CancellationToken::new();
    let (errors, _errors_rx) = mpsc::channel(16);

    // Constant on one side: not an equi-join shape.
    let stmt = sql::parse("SELECT * FROM a JOIN b ON a.k = 1 WITHIN 1 MINUTES").unwrap();
    let err = QueryBuilder::new(factory.clone(), EngineConfig::default())
        .build(&stmt, &token, &errors)
        .unwrap_err();
    assert!(matches!(err, StreamQlError::Semantic(_)));

    // Unqualified fields: ambiguous side assignment.
    let stmt = sql::parse("SELECT * FROM a JOIN b ON k = k WITHIN 1 MINUTES").unwrap();
    let err = QueryBuilder::new(factory.clone(), EngineConfig::default())
        .build(&stmt, &token, &errors)
        .unwrap_err();
    assert!(matches!(err, StreamQlError::Semantic(_)));

    // Both fields from the same side.
    let stmt = sql::parse("SELECT * FROM a JOIN b ON a.k = a.v WITHIN 1 MINUTES").unwrap();
    let err = QueryBuilder::new(factory, EngineConfig::default())
        .build(&stmt, &token, &errors)
        .unwrap_err();
    assert!(matches!(err, StreamQlError::Semantic(_)));
}
