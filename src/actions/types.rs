use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

// ─── Action kinds and payloads ───────────────────────────────────────────────

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ActionKind {
    CreateTask,
    UpdateTask,
    CreateEvent,
    CreateNote,
    EditNote,
    MoveNote,
    DraftEmail,
}

/// Typed payload for each proposed action, tagged by `type` in the marker
/// grammar. Required fields are enforced at deserialization; cross-field
/// rules live in [`ActionPayload::validate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionPayload {
    CreateTask(TaskDraft),
    UpdateTask(TaskUpdate),
    CreateEvent(EventDraft),
    CreateNote(NoteDraft),
    EditNote(NoteEdit),
    MoveNote(NoteMove),
    DraftEmail(EmailDraft),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDraft {
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub list_id: Option<String>,
    #[serde(default = "default_importance")]
    pub importance: String,
}

fn default_importance() -> String {
    "normal".into()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskUpdate {
    pub task_id: String,
    pub list_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub due_date: Option<String>,
    /// "notStarted" | "inProgress" | "completed"
    #[serde(default)]
    pub status: Option<String>,
    /// "low" | "normal" | "high"
    #[serde(default)]
    pub importance: Option<String>,
}

impl TaskUpdate {
    pub fn has_changes(&self) -> bool {
        self.title.is_some()
            || self.body.is_some()
            || self.due_date.is_some()
            || self.status.is_some()
            || self.importance.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDraft {
    pub subject: String,
    pub start_datetime: String,
    pub end_datetime: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub attendees: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteDraft {
    pub folder: String,
    pub filename: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteEdit {
    pub folder: String,
    pub filename: String,
    pub content: String,
    /// Previous content, kept so the approval surface can show a diff.
    #[serde(default)]
    pub original_content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteMove {
    pub filename: String,
    pub source_folder: String,
    pub target_folder: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailDraft {
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    /// Original message id when this drafts a reply.
    #[serde(default)]
    pub reply_to_id: Option<String>,
}

impl ActionPayload {
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::CreateTask(_) => ActionKind::CreateTask,
            Self::UpdateTask(_) => ActionKind::UpdateTask,
            Self::CreateEvent(_) => ActionKind::CreateEvent,
            Self::CreateNote(_) => ActionKind::CreateNote,
            Self::EditNote(_) => ActionKind::EditNote,
            Self::MoveNote(_) => ActionKind::MoveNote,
            Self::DraftEmail(_) => ActionKind::DraftEmail,
        }
    }

    /// Cross-field schema rules beyond what deserialization enforces.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::CreateTask(draft) => {
                if draft.title.trim().is_empty() {
                    return Err("create_task requires a non-empty title".into());
                }
            }
            Self::UpdateTask(update) => {
                if update.task_id.trim().is_empty() || update.list_id.trim().is_empty() {
                    return Err("update_task requires task_id and list_id".into());
                }
                if !update.has_changes() {
                    return Err("update_task requires at least one changed field".into());
                }
            }
            Self::CreateEvent(draft) => {
                if draft.subject.trim().is_empty() {
                    return Err("create_event requires a non-empty subject".into());
                }
                if draft.start_datetime.trim().is_empty() || draft.end_datetime.trim().is_empty() {
                    return Err("create_event requires start and end datetimes".into());
                }
            }
            Self::CreateNote(draft) => {
                if draft.folder.trim().is_empty() || draft.filename.trim().is_empty() {
                    return Err("create_note requires folder and filename".into());
                }
            }
            Self::EditNote(edit) => {
                if edit.folder.trim().is_empty() || edit.filename.trim().is_empty() {
                    return Err("edit_note requires folder and filename".into());
                }
            }
            Self::MoveNote(mv) => {
                if mv.filename.trim().is_empty()
                    || mv.source_folder.trim().is_empty()
                    || mv.target_folder.trim().is_empty()
                {
                    return Err("move_note requires filename, source and target folders".into());
                }
            }
            Self::DraftEmail(draft) => {
                if draft.to.is_empty() {
                    return Err("draft_email requires at least one recipient".into());
                }
                if draft.subject.trim().is_empty() {
                    return Err("draft_email requires a subject".into());
                }
            }
        }
        Ok(())
    }
}

// ─── Lifecycle ───────────────────────────────────────────────────────────────

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ActionStatus {
    Pending,
    Approved,
    Rejected,
    Executed,
    Failed,
}

impl ActionStatus {
    /// Terminal statuses permit no further transition.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Executed | Self::Failed)
    }
}

/// A structured, user-approvable side effect extracted from model output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposedAction {
    /// Globally unique, immutable id (short uuid form).
    pub id: String,
    /// Kept under its own key: payload variants carry fields (e.g. an
    /// `update_task` status) that would collide with the lifecycle fields
    /// if flattened.
    pub payload: ActionPayload,
    pub reason: String,
    pub status: ActionStatus,
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub decided_at: Option<DateTime<Utc>>,
}

impl ProposedAction {
    pub fn pending(payload: ActionPayload, reason: &str) -> Self {
        Self {
            id: new_action_id(),
            payload,
            reason: reason.to_string(),
            status: ActionStatus::Pending,
            error: None,
            created_at: Utc::now(),
            decided_at: None,
        }
    }

    pub fn kind(&self) -> ActionKind {
        self.payload.kind()
    }
}

/// Lightweight reference carried on assistant messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRef {
    pub id: String,
    pub kind: ActionKind,
}

/// Short uuid form, enough entropy for a per-user action log.
pub fn new_action_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}
