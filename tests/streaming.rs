//! Streaming query event order and termination.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{Behavior, ScriptedProvider, builder, with_web_search};
use futures_util::StreamExt;
use ragstudy::agent::{ConversationStore, InMemoryConversations, Query, StreamEvent};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

async fn collect(engine: &Arc<ragstudy::AgenticEngine>, query: Query) -> Vec<StreamEvent> {
    engine
        .query_stream(query, CancellationToken::new())
        .collect()
        .await
}

#[tokio::test]
async fn events_arrive_in_order() {
    let provider = ScriptedProvider::streaming("openai", "Rust 1.30 shipped with new features.");
    let engine = Arc::new(
        builder(vec![provider])
            .tools(with_web_search())
            .build()
            .unwrap(),
    );

    let events = collect(
        &engine,
        Query::new("What is the latest Rust release?").web_search(true),
    )
    .await;

    let names: Vec<&str> = events.iter().map(StreamEvent::event_name).collect();
    assert_eq!(names.first(), Some(&"thinking"));
    assert_eq!(names.last(), Some(&"done"));
    let web = names.iter().position(|n| *n == "web_search").unwrap();
    let first_chunk = names.iter().position(|n| *n == "chunk").unwrap();
    assert!(web < first_chunk);

    let answer: String = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Chunk { content } => Some(content.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(answer, "Rust 1.30 shipped with new features.");

    match events.last() {
        Some(StreamEvent::Done { citations, .. }) => assert_eq!(citations.len(), 3),
        other => panic!("unexpected last event {other:?}"),
    }
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
}

#[tokio::test]
async fn non_streaming_provider_sends_one_chunk() {
    let provider = ScriptedProvider::answering("openai", "Tides follow the moon.");
    let engine = Arc::new(builder(vec![provider]).build().unwrap());

    let events = collect(&engine, Query::new("Explain tides")).await;

    let chunks = events
        .iter()
        .filter(|e| matches!(e, StreamEvent::Chunk { .. }))
        .count();
    assert_eq!(chunks, 1);
    assert!(matches!(events.last(), Some(StreamEvent::Done { .. })));
}

#[tokio::test]
async fn provider_failure_ends_with_error() {
    let provider = ScriptedProvider::new("openai", Behavior::Fail);
    let engine = Arc::new(builder(vec![provider]).build().unwrap());

    let events = collect(&engine, Query::new("Explain tides")).await;

    assert_eq!(events.first().map(StreamEvent::event_name), Some("thinking"));
    match events.last() {
        Some(StreamEvent::Error { message }) => assert!(message.contains("connection refused")),
        other => panic!("unexpected last event {other:?}"),
    }
    assert!(!events.iter().any(|e| matches!(e, StreamEvent::Done { .. })));
}

#[tokio::test]
async fn invalid_question_is_a_single_error() {
    let provider = ScriptedProvider::answering("openai", "unused");
    let engine = Arc::new(builder(vec![Arc::clone(&provider)]).build().unwrap());

    let events = collect(&engine, Query::new("   ")).await;

    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], StreamEvent::Error { .. }));
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn cancelled_stream_ends_with_error() {
    let provider = ScriptedProvider::answering("openai", "Tides follow the moon.");
    let engine = Arc::new(builder(vec![provider]).build().unwrap());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let events: Vec<StreamEvent> = engine
        .query_stream(Query::new("Explain tides"), cancel)
        .collect()
        .await;

    assert!(events.last().is_some_and(StreamEvent::is_terminal));
    assert!(!events.iter().any(|e| matches!(e, StreamEvent::Done { .. })));
}

/// Engine over a slowly streaming provider, sharing its conversation store.
fn slow_engine() -> (Arc<ragstudy::AgenticEngine>, Arc<InMemoryConversations>) {
    let provider = ScriptedProvider::slow_streaming(
        "openai",
        "Tides follow the pull of the moon and the sun together.",
        Duration::from_millis(50),
    );
    let conversations = Arc::new(InMemoryConversations::new(20, 10));
    let engine = builder(vec![provider])
        .conversations(Arc::<InMemoryConversations>::clone(&conversations))
        .build()
        .unwrap();
    (Arc::new(engine), conversations)
}

async fn until_first_chunk(events: &mut ReceiverStream<StreamEvent>) {
    loop {
        match events.next().await {
            Some(StreamEvent::Chunk { .. }) => return,
            Some(event) if event.is_terminal() => panic!("ended before any chunk: {event:?}"),
            Some(_) => {}
            None => panic!("stream closed before any chunk"),
        }
    }
}

#[tokio::test]
async fn dropping_the_stream_mid_answer_records_nothing() {
    let (engine, conversations) = slow_engine();

    let mut events = engine.query_stream(
        Query::new("Explain tides").with_session("s-1"),
        CancellationToken::new(),
    );
    until_first_chunk(&mut events).await;
    drop(events);

    // Longer than the whole answer would take to stream.
    tokio::time::sleep(Duration::from_millis(800)).await;
    assert!(conversations.is_empty());
    assert!(conversations.history("s-1").is_empty());
}

#[tokio::test]
async fn cancelling_mid_answer_ends_with_error() {
    let (engine, conversations) = slow_engine();
    let cancel = CancellationToken::new();

    let mut events = engine.query_stream(
        Query::new("Explain tides").with_session("s-1"),
        cancel.clone(),
    );
    until_first_chunk(&mut events).await;
    cancel.cancel();
    let rest: Vec<StreamEvent> = events.collect().await;

    assert!(rest.last().is_some_and(StreamEvent::is_terminal));
    assert!(matches!(rest.last(), Some(StreamEvent::Error { .. })));
    assert!(!rest.iter().any(|e| matches!(e, StreamEvent::Done { .. })));
    assert!(conversations.is_empty());
}
