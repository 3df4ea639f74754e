pub mod errors;
pub mod events;
pub mod ids;
pub mod transcript;

pub use errors::OrchestratorError;
pub use events::{Event, EventKind, ResponseStatus};
pub use ids::{ResponseId, TerminalId};
pub use transcript::{MessageRole, TranscriptError, TranscriptStore};
