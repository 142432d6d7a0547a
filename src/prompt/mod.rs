//! System prompt assembly.
//!
//! Merges the global and role instruction preambles with capability-gated
//! directive/action grammars and the fenced per-source context sections,
//! rendered through a tera one-off template.

use crate::context::{ContextDocument, SourceKind};
use crate::error::PromptError;
use crate::roles::Capabilities;

/// Grammar the model uses to propose state-changing actions.
const ACTION_INSTRUCTIONS: &str = r#"ACTIONS - You can propose actions for the user to approve:
When the user asks you to create, add, or schedule something, output an ACTION block:

For calendar events:
```ACTION
{"type": "create_event", "subject": "Event title", "start_datetime": "YYYY-MM-DDTHH:MM:SS", "end_datetime": "YYYY-MM-DDTHH:MM:SS", "body": "optional description"}
```

For creating tasks:
```ACTION
{"type": "create_task", "title": "Task title", "body": "optional details", "due_date": "YYYY-MM-DDTHH:MM:SS"}
```

For updating existing tasks (use task_id and list_id from context):
```ACTION
{"type": "update_task", "task_id": "task-id", "list_id": "list-id", "title": "new title", "status": "inProgress"}
```

For notes:
```ACTION
{"type": "create_note", "folder": "Inbox", "filename": "note-name.md", "content": "Note content in markdown"}
```

For email drafts:
```ACTION
{"type": "draft_email", "to": ["person@example.com"], "subject": "Subject", "body": "Body text"}
```

Always include a brief explanation before or after the ACTION block. The user
will see the proposed action and can approve or reject it. Actions are never
executed without approval."#;

/// Grammar for the mid-response web search directive.
const SEARCH_INSTRUCTIONS: &str = "WEB SEARCH - You can look up current information:\n\
If you need up-to-date facts you don't know, emit a directive on its own line:\n\
\n\
SEARCH: your search query\n\
\n\
The line must begin with SEARCH:. Generation pauses while the search runs and\n\
the results are added to your context before you continue.";

/// Grammar for the mid-response page fetch directive.
const FETCH_INSTRUCTIONS: &str = "URL FETCH - You can read the content of public web pages:\n\
If the user provides a URL or you need a specific page, emit a directive on its own line:\n\
\n\
FETCH: https://example.com/page\n\
\n\
The line must begin with FETCH:. Only public http/https pages are allowed.";

const SYSTEM_TEMPLATE: &str = "{{ instructions }}\n\
{% if grammars %}\n{{ grammars }}\n{% endif %}\
\nCurrent date and time: {{ current_date }}\n\
\n===== BEGIN NOTES CONTEXT =====\n{{ notes_context }}\n===== END NOTES CONTEXT =====\n\
\n===== BEGIN TASKS CONTEXT =====\n{{ tasks_context }}\n===== END TASKS CONTEXT =====\n\
\n===== BEGIN CALENDAR CONTEXT =====\n{{ calendar_context }}\n===== END CALENDAR CONTEXT =====\n\
\n===== BEGIN EMAIL CONTEXT =====\n{{ email_context }}\n===== END EMAIL CONTEXT =====\n";

/// Inputs for one system prompt render.
pub struct SystemPromptParams<'a> {
    /// Merged global + role instruction preamble.
    pub instructions: &'a str,
    pub capabilities: Capabilities,
    pub document: &'a ContextDocument,
    /// Formatted current date/time, e.g. "2024-03-15 09:30".
    pub current_date: &'a str,
}

pub struct PromptBuilder;

impl PromptBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Render the full system prompt for one generation pass.
    pub fn build_system(&self, params: &SystemPromptParams<'_>) -> Result<String, PromptError> {
        let mut grammars = Vec::new();
        if params.capabilities.enable_actions {
            grammars.push(ACTION_INSTRUCTIONS);
        }
        if params.capabilities.enable_search {
            grammars.push(SEARCH_INSTRUCTIONS);
        }
        if params.capabilities.enable_fetch {
            grammars.push(FETCH_INSTRUCTIONS);
        }

        let notes = params.document.section_body(SourceKind::Notes);
        let notes_context = if notes.is_empty() {
            "No relevant notes found."
        } else {
            notes
        };

        let mut context = tera::Context::new();
        context.insert("instructions", params.instructions);
        context.insert("grammars", &grammars.join("\n\n"));
        context.insert("current_date", params.current_date);
        context.insert("notes_context", notes_context);
        context.insert(
            "tasks_context",
            params.document.section_body(SourceKind::Tasks),
        );
        context.insert(
            "calendar_context",
            params.document.section_body(SourceKind::Calendar),
        );
        context.insert(
            "email_context",
            params.document.section_body(SourceKind::Email),
        );

        tera::Tera::one_off(SYSTEM_TEMPLATE, &context, false)
            .map_err(|e| PromptError::Render(e.to_string()))
    }
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Wrap lookup results in the fenced block appended to the dialogue when a
/// directive completes.
pub fn wrap_lookup_results(heading: &str, content: &str) -> String {
    format!("===== {heading} =====\n{content}\n===== END {heading} =====")
}
