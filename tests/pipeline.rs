//! End-to-end pipeline tests with scripted collaborators.

mod support;

use adjutant::actions::{ActionKind, ActionStore};
use adjutant::config::{Config, ConfigHandle};
use adjutant::pipeline::{ChatEvent, ChatRequest, Pipeline, PipelineParams};
use adjutant::security::MemoryAudit;
use adjutant::sources::{NoteHit, SessionContext};
use futures_util::StreamExt;
use std::sync::Arc;
use support::{
    CountingSearch, FailingLlm, FailingNotes, MemorySink, ScriptedLlm, StaticNotes, StaticTasks,
    task,
};
use tokio_util::sync::CancellationToken;

struct Harness {
    pipeline: Pipeline,
    store: Arc<ActionStore>,
    sink: Arc<MemorySink>,
}

async fn harness(
    llm: Arc<dyn adjutant::llm::CompletionClient>,
    search: Option<Arc<support::CountingSearch>>,
) -> Harness {
    let store = Arc::new(ActionStore::in_memory().await.expect("store"));
    let sink = MemorySink::new();
    let pipeline = Pipeline::new(PipelineParams {
        config: ConfigHandle::new(Config::default()),
        audit: Arc::new(MemoryAudit::new()),
        llm,
        search: search.map(|s| s as Arc<dyn adjutant::lookup::WebSearch>),
        fetcher: None,
        store: store.clone(),
        sink: Some(sink.clone()),
    })
    .expect("pipeline");

    Harness {
        pipeline,
        store,
        sink,
    }
}

async fn run(
    harness: &Harness,
    session: SessionContext,
    message: &str,
) -> Vec<ChatEvent> {
    let request = ChatRequest {
        message: message.into(),
        history: Vec::new(),
        toggles: adjutant::context::SourceToggles::default(),
    };
    let stream = harness
        .pipeline
        .respond(session, request, CancellationToken::new());
    futures_util::pin_mut!(stream);

    let mut events = Vec::new();
    while let Some(event) = stream.next().await {
        events.push(event);
    }
    events
}

fn content_of(events: &[ChatEvent]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            ChatEvent::Content { content } => Some(content.as_str()),
            _ => None,
        })
        .collect()
}

fn assert_contract(events: &[ChatEvent]) {
    assert!(
        matches!(events.first(), Some(ChatEvent::Meta { .. })),
        "stream must open with meta"
    );
    let terminals = events.iter().filter(|e| e.is_terminal()).count();
    assert_eq!(terminals, 1, "exactly one terminal event");
    assert!(events.last().is_some_and(ChatEvent::is_terminal));
}

#[tokio::test]
async fn task_question_flows_task_context_into_the_prompt() {
    let llm = ScriptedLlm::new(vec![vec![
        "You have one task today: Pay rent, due 2024-03-15.",
    ]]);
    let harness = harness(llm.clone(), None).await;

    let session = SessionContext {
        tasks: Some(Arc::new(StaticTasks(vec![task(
            "Pay rent",
            Some("2024-03-15T00:00:00"),
        )]))),
        ..SessionContext::unlinked("t")
    };

    let events = run(&harness, session, "What tasks do I have today?").await;

    assert_contract(&events);
    assert!(content_of(&events).contains("Pay rent"));

    // The sanitized task fragment reached the model inside the TASKS section.
    let requests = llm.requests();
    assert_eq!(requests.len(), 1);
    let system = &requests[0].system;
    let tasks_section = system
        .split("===== BEGIN TASKS CONTEXT =====")
        .nth(1)
        .and_then(|rest| rest.split("===== END TASKS CONTEXT =====").next())
        .expect("tasks section present");
    assert!(tasks_section.contains("Pay rent"));
    assert!(tasks_section.contains("(due: 2024-03-15)"));
}

#[tokio::test]
async fn notes_sources_are_cited_in_meta_and_message() {
    let llm = ScriptedLlm::new(vec![vec!["The plan says ship in April."]]);
    let harness = harness(llm, None).await;

    let session = SessionContext {
        notes: Some(Arc::new(StaticNotes(vec![NoteHit {
            id: "Projects/plan.md".into(),
            text: "Ship the beta by April.".into(),
            score: 0.9,
        }]))),
        ..SessionContext::unlinked("t")
    };

    let events = run(&harness, session, "write down what the plan says").await;

    assert_contract(&events);
    match events.first() {
        Some(ChatEvent::Meta { sources }) => {
            assert_eq!(sources, &vec!["Projects/plan.md".to_string()]);
        }
        other => panic!("expected meta first, got {other:?}"),
    }

    let messages = harness.sink.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].sources, vec!["Projects/plan.md".to_string()]);
}

#[tokio::test]
async fn failing_notes_provider_degrades_to_empty_sources() {
    let llm = ScriptedLlm::new(vec![vec!["I could not reach your notes."]]);
    let harness = harness(llm, None).await;

    let session = SessionContext {
        notes: Some(Arc::new(FailingNotes)),
        tasks: Some(Arc::new(StaticTasks(vec![task("Pay rent", None)]))),
        ..SessionContext::unlinked("t")
    };

    let events = run(&harness, session, "what do my notes say about tasks").await;

    assert_contract(&events);
    match events.first() {
        Some(ChatEvent::Meta { sources }) => assert!(sources.is_empty()),
        other => panic!("expected meta first, got {other:?}"),
    }
    assert!(matches!(events.last(), Some(ChatEvent::Done)));
}

#[tokio::test]
async fn search_directive_runs_once_and_never_reaches_the_client() {
    let llm = ScriptedLlm::new(vec![
        vec!["Let me look that up.\n", "SEARCH: current weather Edinburgh\n"],
        vec!["It is raining lightly in Edinburgh right now."],
    ]);
    let search = CountingSearch::new();
    let harness = harness(llm.clone(), Some(search.clone())).await;

    let events = run(
        &harness,
        SessionContext::unlinked("t"),
        "look up the current weather in Edinburgh",
    )
    .await;

    assert_contract(&events);
    assert_eq!(search.count(), 1);

    let content = content_of(&events);
    assert!(content.contains("raining lightly in Edinburgh"));
    assert!(!content.contains("SEARCH:"));
    assert!(!content.contains("current weather Edinburgh\n"));

    // The second generation pass saw the fenced search results.
    let requests = llm.requests();
    assert_eq!(requests.len(), 2);
    let followup = &requests[1];
    let results_turn = followup
        .turns
        .iter()
        .map(|t| t.content.as_str())
        .find(|c| c.contains("WEB SEARCH RESULTS"))
        .expect("search results folded into the dialogue");
    assert!(results_turn.contains("Edinburgh weather"));
}

#[tokio::test]
async fn valid_action_is_stored_and_markers_stripped_from_persisted_message() {
    let llm = ScriptedLlm::new(vec![vec![
        "I'll set that up.\n\n",
        "```ACTION\n{\"type\": \"create_task\", \"title\": \"Pay rent\", \"due_date\": \"2024-03-15T00:00:00\"}\n```\n\n",
        "```ACTION\n{\"type\": \"create_event\", \"subject\": \"Sync\", \"start_datetime\": \"2024-03-15T10:00:00\"}\n```\n\n",
        "Approve it when ready.",
    ]]);
    let harness = harness(llm, None).await;

    let events = run(&harness, SessionContext::unlinked("t"), "hello there").await;
    assert_contract(&events);

    // Only the schema-valid block became a proposal.
    let pending = harness.store.list_pending().await.expect("pending");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].kind(), ActionKind::CreateTask);

    // The persisted assistant message is marker-free narrative.
    let messages = harness.sink.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].content.contains("I'll set that up."));
    assert!(messages[0].content.contains("Approve it when ready."));
    assert!(!messages[0].content.contains("```"));
    assert!(!messages[0].content.contains("create_task"));
    assert_eq!(messages[0].proposed_actions.len(), 1);
    assert_eq!(messages[0].proposed_actions[0].id, pending[0].id);
}

#[tokio::test]
async fn llm_failure_yields_meta_then_generic_error() {
    let harness = harness(Arc::new(FailingLlm), None).await;

    let events = run(&harness, SessionContext::unlinked("t"), "hello").await;

    assert_contract(&events);
    match events.last() {
        Some(ChatEvent::Error { message }) => {
            assert!(!message.contains("secret internal detail"));
        }
        other => panic!("expected error, got {other:?}"),
    }
    // Nothing is persisted for a failed generation.
    assert!(harness.sink.messages().is_empty());
    assert!(
        harness
            .store
            .list_pending()
            .await
            .expect("pending")
            .is_empty()
    );
}

#[tokio::test]
async fn history_is_replayed_to_the_model_in_order() {
    let llm = ScriptedLlm::new(vec![vec!["As I said, the answer is 42."]]);
    let harness = harness(llm.clone(), None).await;

    let request = ChatRequest {
        message: "and what was it again?".into(),
        history: vec![
            adjutant::pipeline::Message::user("what is the answer?"),
            adjutant::pipeline::Message::assistant("The answer is 42."),
        ],
        toggles: adjutant::context::SourceToggles::default(),
    };
    let stream = harness.pipeline.respond(
        SessionContext::unlinked("t"),
        request,
        CancellationToken::new(),
    );
    futures_util::pin_mut!(stream);
    while stream.next().await.is_some() {}

    let requests = llm.requests();
    assert_eq!(requests.len(), 1);
    let turns = &requests[0].turns;
    assert_eq!(turns.len(), 3);
    assert_eq!(turns[0].content, "what is the answer?");
    assert_eq!(turns[1].content, "The answer is 42.");
    assert_eq!(turns[2].content, "and what was it again?");
}
