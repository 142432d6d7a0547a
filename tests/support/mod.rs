//! Shared test doubles for the integration suites.

use adjutant::llm::{CompletionClient, CompletionRequest, TokenStream};
use adjutant::lookup::{SearchHit, WebSearch};
use adjutant::pipeline::{ConversationSink, Message};
use adjutant::sources::{NoteHit, NoteSearch, TaskReader, TaskRecord};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Scripted completion client. Each invocation pops the next canned
/// response (pre-chunked) and records the request it was given.
pub struct ScriptedLlm {
    scripts: Mutex<Vec<Vec<String>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedLlm {
    pub fn new(scripts: Vec<Vec<&str>>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(
                scripts
                    .into_iter()
                    .map(|chunks| chunks.into_iter().map(str::to_string).collect())
                    .collect(),
            ),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().expect("lock").clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().expect("lock").len()
    }
}

#[async_trait]
impl CompletionClient for ScriptedLlm {
    async fn stream(&self, request: &CompletionRequest) -> anyhow::Result<TokenStream> {
        self.requests.lock().expect("lock").push(request.clone());
        let mut scripts = self.scripts.lock().expect("lock");
        if scripts.is_empty() {
            anyhow::bail!("scripted llm exhausted");
        }
        let chunks: Vec<anyhow::Result<String>> = scripts.remove(0).into_iter().map(Ok).collect();
        Ok(Box::pin(futures_util::stream::iter(chunks)))
    }
}

/// Completion client that always fails to start.
pub struct FailingLlm;

#[async_trait]
impl CompletionClient for FailingLlm {
    async fn stream(&self, _request: &CompletionRequest) -> anyhow::Result<TokenStream> {
        anyhow::bail!("provider exploded with secret internal detail")
    }
}

pub struct StaticTasks(pub Vec<TaskRecord>);

#[async_trait]
impl TaskReader for StaticTasks {
    async fn recent(&self, _n: usize) -> anyhow::Result<Vec<TaskRecord>> {
        Ok(self.0.clone())
    }
}

pub struct FailingNotes;

#[async_trait]
impl NoteSearch for FailingNotes {
    async fn search(&self, _query: &str, _k: usize) -> anyhow::Result<Vec<NoteHit>> {
        anyhow::bail!("vector index offline")
    }
}

pub struct StaticNotes(pub Vec<NoteHit>);

#[async_trait]
impl NoteSearch for StaticNotes {
    async fn search(&self, _query: &str, _k: usize) -> anyhow::Result<Vec<NoteHit>> {
        Ok(self.0.clone())
    }
}

/// Counts searches and returns one fixed hit.
pub struct CountingSearch {
    pub calls: AtomicUsize,
}

impl CountingSearch {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }

    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WebSearch for CountingSearch {
    async fn search(&self, _query: &str) -> anyhow::Result<Vec<SearchHit>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![SearchHit {
            title: "Edinburgh weather".into(),
            snippet: "Light rain, 12C".into(),
            url: "https://example.com/weather".into(),
        }])
    }
}

/// Captures appended conversation messages.
#[derive(Default)]
pub struct MemorySink {
    messages: Mutex<Vec<Message>>,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn messages(&self) -> Vec<Message> {
        self.messages.lock().expect("lock").clone()
    }
}

#[async_trait]
impl ConversationSink for MemorySink {
    async fn append(&self, message: &Message) -> anyhow::Result<()> {
        self.messages.lock().expect("lock").push(message.clone());
        Ok(())
    }
}

pub fn task(title: &str, due: Option<&str>) -> TaskRecord {
    TaskRecord {
        id: "task-1".into(),
        list_id: None,
        title: title.into(),
        body: None,
        status: "notStarted".into(),
        importance: "normal".into(),
        due: due.map(str::to_string),
    }
}
