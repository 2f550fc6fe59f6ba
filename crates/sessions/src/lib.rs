pub mod naming;
pub mod notes;
pub mod store;
pub mod transcript;
pub mod workspace;

pub use store::{SessionEntry, SessionInfo, SessionStore};
pub use transcript::{DecodedEvent, EventRecord, TranscriptLog};
pub use workspace::Workspace;
