mod common;

use std::sync::Arc;

use common::{FakePage, FakeSession, ScriptedModel, click, done};
use page_pilot::error::PilotError;
use page_pilot::{ActionKind, Agent, AgentEvent, EventSink, PilotConfig, Severity, TaskEnd};
use serde_json::json;

fn agent(page: Arc<FakePage>, model: Arc<ScriptedModel>) -> Agent<FakeSession> {
    Agent::new(FakeSession::new(page), model, PilotConfig::default(), EventSink::default())
}

#[tokio::test(start_paused = true)]
async fn extract_parses_structured_data() {
    let model = ScriptedModel::new(vec![json!({ "data": "{\"a\":1}", "confidence": 0.9 })]);
    let mut agent = agent(FakePage::search_page(), model.clone());

    let extraction = agent.extract("the value of a").await.unwrap();

    assert_eq!(extraction.data, json!({ "a": 1 }));
    assert_eq!(extraction.confidence, 0.9);
    let request = &model.requests()[0];
    assert!(request.user_text.contains("Find anything"));
    assert!(request.image_jpeg.is_none());
}

#[tokio::test(start_paused = true)]
async fn extract_keeps_plain_text() {
    let model = ScriptedModel::new(vec![json!({ "data": "not json", "confidence": 0.4 })]);
    let mut agent = agent(FakePage::search_page(), model);

    let extraction = agent.extract("the heading").await.unwrap();

    assert_eq!(extraction.data, json!("not json"));
}

#[tokio::test(start_paused = true)]
async fn extract_caps_page_text() {
    let long = "z".repeat(20_000);
    let page = FakePage::search_page().with(|s| s.text = long);
    let model = ScriptedModel::new(vec![json!({ "data": "x", "confidence": 1.0 })]);
    let mut agent = agent(page, model.clone());

    agent.extract("anything").await.unwrap();

    let sent = model.requests()[0].user_text.matches('z').count();
    assert_eq!(sent, PilotConfig::default().agent.extract_char_cap);
}

#[tokio::test(start_paused = true)]
async fn extract_without_reply_is_a_model_error() {
    let mut agent = agent(FakePage::search_page(), ScriptedModel::new(vec![]));

    let err = agent.extract("anything").await.unwrap_err();

    assert!(matches!(err, PilotError::Model(_)), "{err:?}");
}

#[tokio::test(start_paused = true)]
async fn observe_returns_at_most_the_configured_count() {
    let model = ScriptedModel::new(vec![json!({
        "observations": ["Search", "Open Home", "Open About", "Scroll down", "Type a query", "Go back"]
    })]);
    let mut agent = agent(FakePage::search_page(), model.clone());

    let observations = agent.observe().await.unwrap();

    assert_eq!(observations.len(), 5);
    assert_eq!(observations[0], "Search");
    assert_eq!(model.requests()[0].schema_name, "observations");
}

#[tokio::test(start_paused = true)]
async fn observe_without_reply_is_empty() {
    let mut agent = agent(FakePage::search_page(), ScriptedModel::new(vec![]));

    assert!(agent.observe().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn act_reports_success_and_refreshes_state() {
    let page = FakePage::search_page();
    let mut agent = agent(page.clone(), ScriptedModel::new(vec![click("3")]));
    let mut events = agent.events().subscribe();

    let outcome = agent.act("Click the search button").await;

    assert!(outcome.success);
    assert_eq!(outcome.action, Some(ActionKind::Click));
    assert_eq!(page.calls().len(), 1);

    let status = events.recv().await.unwrap();
    assert!(matches!(status, AgentEvent::Status { severity: Severity::Info, .. }));
    match events.recv().await.unwrap() {
        AgentEvent::StateUpdate { url, title, screenshot, pages_count } => {
            assert_eq!(url, "https://search.example/");
            assert_eq!(title, "Example Search");
            assert!(screenshot.is_some());
            assert_eq!(pages_count, 1);
        }
        other => panic!("expected state update, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn act_failure_is_reported_as_a_value() {
    let page = FakePage::search_page().with(|s| s.fail_clicks = 2);
    let mut agent = agent(page, ScriptedModel::new(vec![click("3"), click("3")]));
    let mut events = agent.events().subscribe();

    let outcome = agent.act("Click the search button").await;

    assert!(!outcome.success);
    assert!(outcome.message.unwrap().contains("not clickable"));
    let status = events.recv().await.unwrap();
    assert!(matches!(status, AgentEvent::Status { severity: Severity::Error, .. }));
}

#[tokio::test(start_paused = true)]
async fn task_runs_until_done() {
    let page = FakePage::search_page();
    let model = ScriptedModel::new(vec![click("2"), click("3"), done("results are shown")]);
    let mut agent = agent(page.clone(), model);

    let outcome = agent.run_task("Search for rust").await;

    assert_eq!(outcome.end, TaskEnd::Done);
    assert_eq!(outcome.steps, 3);
    assert_eq!(outcome.summary, "results are shown");
    assert_eq!(page.calls().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn task_stops_at_the_step_limit() {
    let page = FakePage::search_page();
    let model = ScriptedModel::new(vec![json!({ "action": "wait", "reasoning": "still loading" }); 10]);
    let mut config = PilotConfig::default();
    config.agent.max_steps = 3;
    let mut agent = Agent::new(FakeSession::new(page), model.clone(), config, EventSink::default());

    let outcome = agent.run_task("Wait forever").await;

    assert_eq!(outcome.end, TaskEnd::StepLimit);
    assert_eq!(outcome.steps, 3);
    assert_eq!(model.requests().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn task_fails_on_the_first_failed_step() {
    let mut agent = agent(FakePage::search_page(), ScriptedModel::new(vec![]));

    let outcome = agent.run_task("Anything").await;

    assert_eq!(outcome.end, TaskEnd::Failed);
    assert_eq!(outcome.steps, 1);
    assert!(outcome.summary.contains("no decision"));
}

#[tokio::test(start_paused = true)]
async fn show_then_cleanup_report_status() {
    let mut agent = agent(FakePage::search_page(), ScriptedModel::new(vec![]));
    let mut events = agent.events().subscribe();

    agent.show().await.unwrap();
    agent.cleanup();

    assert_eq!(events.recv().await.unwrap(), AgentEvent::info("browser shown"));
    assert_eq!(events.recv().await.unwrap(), AgentEvent::info("browser closed"));
}

#[tokio::test(start_paused = true)]
async fn refresh_state_returns_the_emitted_update() {
    let mut agent = agent(FakePage::search_page().with(|s| s.screenshot_fails = true), ScriptedModel::new(vec![]));
    let mut events = agent.events().subscribe();

    let event = agent.refresh_state().await.unwrap();

    assert_eq!(events.recv().await.unwrap(), event);
    match event {
        AgentEvent::StateUpdate { screenshot, .. } => assert!(screenshot.is_none()),
        other => panic!("expected state update, got {other:?}"),
    }
}
