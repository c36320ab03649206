//! End-to-end scenarios for the agentic engine with scripted providers.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use std::sync::Arc;

use common::{
    Behavior, FailingStore, FixedStore, RejectingVerifier, ScriptedProvider, builder,
    builder_with, with_web_search,
};
use ragstudy::agent::{
    ChatMessage, CitationKind, EngineConfig, EngineState, Query, Role, StepKind, ToolCall,
};
use ragstudy::error::{AgentError, ProviderError};
use ragstudy::tools::{ToolRegistry, calculator, web_search};
use serde_json::json;

#[tokio::test]
async fn arithmetic_is_answered_with_the_calculator() {
    let provider = ScriptedProvider::answering("openai", "2 + 2 = 4.");
    let engine = builder(vec![Arc::clone(&provider)]).build().unwrap();

    let response = engine.query(&Query::new("What is 2+2?")).await.unwrap();

    assert!(response.answer.contains('4'));
    assert!(response.citations.is_empty());
    assert!(response.trace.plan.has(StepKind::Compute));
    let calc = &response.trace.tool_calls[0];
    assert!(calc.success);
    assert_eq!(calc.payload["formatted"], "4");
    assert_eq!(response.trace.state, EngineState::Done);
    assert!(response.trace.verdict.as_ref().unwrap().supported);
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn citations_only_reference_the_selected_source() {
    let store = FixedStore::new(&[
        (
            "handbook",
            "Employee Handbook",
            "Employees accrue 25 vacation days per year.",
        ),
        ("memo", "Memo", "Vacation requests go through the portal."),
    ]);
    let provider = ScriptedProvider::answering(
        "openai",
        "Employees accrue 25 vacation days per year [Source 1].",
    );
    let engine = builder(vec![Arc::clone(&provider)])
        .store(store)
        .build()
        .unwrap();

    let query = Query::new("How many vacation days do employees accrue?")
        .with_sources(vec!["handbook".to_string()]);
    let response = engine.query(&query).await.unwrap();

    assert!(!response.citations.is_empty());
    assert!(response.citations.iter().all(|c| c.source_id == "handbook"));
    assert!(response.citations.iter().all(|c| c.kind == CitationKind::Document));
    let prompt = &provider.prompts()[0];
    assert!(prompt.contains("[Source 1: Employee Handbook"));
    assert!(!prompt.contains("portal"));
}

#[tokio::test]
async fn web_results_are_returned_and_cited() {
    let provider = ScriptedProvider::answering("openai", "Rust 1.30 was released with new features.");
    let engine = builder(vec![provider])
        .tools(with_web_search())
        .build()
        .unwrap();

    let response = engine
        .query(&Query::new("What is the latest Rust release?").web_search(true))
        .await
        .unwrap();

    assert_eq!(response.web_results.len(), 3);
    let web: Vec<_> = response
        .citations
        .iter()
        .filter(|c| c.kind == CitationKind::Web)
        .collect();
    assert_eq!(web.len(), 3);
    assert!(web[0].source_id.starts_with("https://example.com/"));
}

#[tokio::test]
async fn failing_provider_is_an_error() {
    let provider = ScriptedProvider::new("openai", Behavior::Fail);
    let engine = builder(vec![provider]).build().unwrap();

    let result = engine.query(&Query::new("Explain photosynthesis")).await;

    assert!(matches!(
        result,
        Err(AgentError::Provider(ProviderError::Request { .. }))
    ));
}

#[tokio::test]
async fn no_provider_is_reported() {
    let engine = builder(Vec::new()).build().unwrap();
    let result = engine.query(&Query::new("Explain photosynthesis")).await;
    assert!(matches!(result, Err(AgentError::NoProvider { .. })));
}

#[tokio::test]
async fn redrafts_are_bounded() {
    let provider = ScriptedProvider::answering("openai", "Tides are caused by the moon.");
    let config = EngineConfig::builder().max_redrafts(2).build().unwrap();
    let engine = builder_with(config, vec![Arc::clone(&provider)])
        .verifier(Arc::new(RejectingVerifier))
        .build()
        .unwrap();

    let response = engine.query(&Query::new("Tell me about tides")).await.unwrap();

    assert_eq!(response.trace.drafts, 3);
    assert_eq!(provider.calls(), 3);
    let redrafts = response
        .trace
        .states
        .iter()
        .filter(|s| **s == EngineState::Redrafting)
        .count();
    assert_eq!(redrafts, 2);
    assert!(!response.trace.verdict.unwrap().supported);
    assert_eq!(response.trace.state, EngineState::Done);
    // Notes from the rejection reach the next draft.
    assert!(provider.prompts()[1].contains("does not mention the source"));
}

#[tokio::test]
async fn non_agentic_queries_draft_once() {
    let provider = ScriptedProvider::answering("openai", "Tides are caused by the moon.");
    let engine = builder(vec![Arc::clone(&provider)])
        .verifier(Arc::new(RejectingVerifier))
        .build()
        .unwrap();

    let response = engine
        .query(&Query::new("Tell me about tides").agentic(false))
        .await
        .unwrap();

    assert_eq!(response.trace.drafts, 1);
    assert!(response.trace.verdict.is_none());
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn tool_failures_do_not_abort_the_query() {
    let provider = ScriptedProvider::answering("openai", "I could not compute that.");
    let engine = builder(vec![provider])
        .tools(ToolRegistry::new())
        .build()
        .unwrap();

    let response = engine
        .query(&Query::new("What is 2+2?").web_search(true))
        .await
        .unwrap();

    assert_eq!(response.trace.state, EngineState::Done);
    let failed: Vec<StepKind> = response.trace.failed_steps().map(|s| s.kind).collect();
    assert!(failed.contains(&StepKind::Compute));
    assert!(failed.contains(&StepKind::WebSearch));
    assert!(response.trace.tool_calls.iter().all(|t| !t.success));
    assert!(response.citations.is_empty());
}

#[tokio::test]
async fn failing_retrieval_still_answers() {
    let provider = ScriptedProvider::answering("openai", "No documents were available.");
    let engine = builder(vec![provider])
        .store(Arc::new(FailingStore))
        .build()
        .unwrap();

    let response = engine
        .query(&Query::new("What does the report conclude?").agentic(false))
        .await
        .unwrap();

    assert_eq!(response.trace.state, EngineState::Done);
    assert_eq!(response.trace.steps[0].kind, StepKind::Retrieve);
    assert!(!response.trace.steps[0].success);
    assert!(response.citations.is_empty());
}

#[tokio::test]
async fn rate_limited_provider_fails_over() {
    let limited = ScriptedProvider::new("groq", Behavior::RateLimited);
    let backup = ScriptedProvider::answering("openai", "Answer from the backup.");
    let engine = builder(vec![Arc::clone(&limited), Arc::clone(&backup)])
        .build()
        .unwrap();

    let response = engine.query(&Query::new("Explain tides")).await.unwrap();

    assert_eq!(response.answer, "Answer from the backup.");
    assert_eq!(limited.calls(), 1);
    assert_eq!(backup.calls(), 1);
    let by_provider = engine.usage().by_provider();
    assert!(by_provider.contains_key("groq"));
    assert!(by_provider.contains_key("openai"));
}

#[tokio::test]
async fn sessions_are_kept_and_cleared() {
    let provider = ScriptedProvider::answering("openai", "Hello again.");
    let engine = builder(vec![provider]).build().unwrap();

    let first = engine
        .query(&Query::new("Explain tides").with_session("s-1"))
        .await
        .unwrap();
    assert_eq!(first.session_id, "s-1");

    let generated = engine.query(&Query::new("Explain tides")).await.unwrap();
    assert!(!generated.session_id.is_empty());
    assert_ne!(generated.session_id, "s-1");

    assert!(engine.clear_session("s-1"));
    assert!(!engine.clear_session("s-1"));
}

#[tokio::test]
async fn history_reaches_the_next_draft() {
    let provider = ScriptedProvider::answering("openai", "Tides are caused by the moon.");
    let engine = builder(vec![Arc::clone(&provider)]).build().unwrap();

    engine
        .query(&Query::new("Explain tides").with_session("s-1"))
        .await
        .unwrap();
    engine
        .query(&Query::new("What about spring tides?").with_session("s-1"))
        .await
        .unwrap();
    engine
        .query(&Query::new("Explain tides").with_session("s-2"))
        .await
        .unwrap();

    let requests = provider.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[0].len(), 2);

    let second = &requests[1];
    assert_eq!(second.len(), 4);
    assert_eq!(second[0].role, Role::System);
    assert_eq!(
        second[1],
        ChatMessage {
            role: Role::User,
            content: "Explain tides".to_string(),
        }
    );
    assert_eq!(
        second[2],
        ChatMessage {
            role: Role::Assistant,
            content: "Tides are caused by the moon.".to_string(),
        }
    );
    assert!(second[3].content.contains("What about spring tides?"));

    // Another session starts without that history.
    assert_eq!(requests[2].len(), 2);
}

#[tokio::test]
async fn anonymous_sessions_are_bounded() {
    let provider = ScriptedProvider::answering("openai", "Tides are caused by the moon.");
    let config = EngineConfig::builder().max_sessions(3).build().unwrap();
    let engine = builder_with(config, vec![provider]).build().unwrap();

    let mut ids = Vec::new();
    for _ in 0..5 {
        let response = engine.query(&Query::new("Explain tides")).await.unwrap();
        ids.push(response.session_id);
    }

    assert!(!engine.clear_session(&ids[0]));
    assert!(!engine.clear_session(&ids[1]));
    assert!(engine.clear_session(&ids[4]));
}

#[tokio::test]
async fn compute_only_runs_offered_tools() {
    let provider = ScriptedProvider::calling_tools(
        "openai",
        "The area is 12 square meters.",
        vec![
            ToolCall::new("c1", web_search::TOOL_NAME, json!({"query": "garden area"})),
            ToolCall::new("c2", calculator::TOOL_NAME, json!({"expression": "3*4"})),
        ],
    );
    let engine = builder(vec![provider])
        .tools(with_web_search())
        .build()
        .unwrap();

    let response = engine
        .query(&Query::new("Can you calculate the area of the garden?"))
        .await
        .unwrap();

    assert!(response.trace.plan.has(StepKind::Compute));
    assert!(response.web_results.is_empty());
    let names: Vec<&str> = response
        .trace
        .tool_calls
        .iter()
        .map(|t| t.name.as_str())
        .collect();
    assert_eq!(names, vec![calculator::TOOL_NAME]);
    assert_eq!(response.trace.tool_calls[0].payload["formatted"], "12");
}

#[tokio::test]
async fn compute_with_only_unoffered_tools_fails_the_step() {
    let provider = ScriptedProvider::calling_tools(
        "openai",
        "I could not work that out.",
        vec![ToolCall::new("c1", web_search::TOOL_NAME, json!({"query": "garden area"}))],
    );
    let engine = builder(vec![provider])
        .tools(with_web_search())
        .build()
        .unwrap();

    let response = engine
        .query(&Query::new("Can you calculate the area of the garden?"))
        .await
        .unwrap();

    assert_eq!(response.trace.state, EngineState::Done);
    assert!(response.trace.tool_calls.is_empty());
    let failed: Vec<StepKind> = response.trace.failed_steps().map(|s| s.kind).collect();
    assert_eq!(failed, vec![StepKind::Compute]);
}

#[tokio::test]
async fn provider_can_be_switched() {
    let a = ScriptedProvider::answering("groq", "from groq");
    let b = ScriptedProvider::answering("openai", "from openai");
    let engine = builder(vec![a, b]).build().unwrap();

    assert_eq!(engine.current_provider().unwrap().provider, "groq");
    engine.set_provider("openai", None).unwrap();
    let response = engine.query(&Query::new("Explain tides")).await.unwrap();
    assert_eq!(response.answer, "from openai");

    let overridden = engine
        .query(&Query::new("Explain tides").with_provider("groq", None))
        .await
        .unwrap();
    assert_eq!(overridden.answer, "from groq");

    assert!(engine.set_provider("mistral", None).is_err());
}
