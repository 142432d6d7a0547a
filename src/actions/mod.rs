pub mod dispatch;
pub mod extract;
pub mod store;
pub mod types;

pub use dispatch::{
    ActionExecutor, CalendarWriter, ExecutionReceipt, MailDrafter, NoteWriter, ProviderHandle,
    ProviderWriters, TaskWriter,
};
pub use extract::{ActionExtractor, Extraction};
pub use store::{ActionStore, ApproveOutcome, RejectOutcome};
pub use types::{
    ActionKind, ActionPayload, ActionRef, ActionStatus, EmailDraft, EventDraft, NoteDraft,
    NoteEdit, NoteMove, ProposedAction, TaskDraft, TaskUpdate,
};
