//! Talecraft engine core.
//!
//! The server-side runtime of an LLM-driven interactive-fiction engine:
//! a per-session state machine that expands player actions into typed
//! narrative steps via a chat-completion model, applies the resulting
//! deltas to persistent world documents, and publishes events for the
//! streaming delivery layer.
//!
//! ## Pipeline
//!
//! ```text
//! action ─▶ SessionManager ─▶ prompt ─▶ NarrativeModel ─▶ parser
//!              │                                             │
//!              └────◀── GameStore ◀── StatusEngine ◀── DeltaBundle
//! ```
//!
//! The delivery layer (stream hub), image pipeline and task manager live
//! in the `talecraft-runtime` crate.

pub mod error;
pub mod mission;
pub mod parser;
pub mod prompt;
pub mod session;
pub mod status;
pub mod store;
pub mod world;

pub use error::{EngineError, Result};
pub use mission::{MissionEngine, PathResult, StorylineStatus};
pub use parser::{Change, DeltaBundle, ItemAction, ParsedReply, Step};
pub use prompt::LiteraryStyle;
pub use session::{
    ActionOutcome, ConversationState, EventSink, GameEvent, ModelOptions, NarrativeModel,
    NullSink, OpenAiModel, ProcessMode, SessionManager, SessionSnapshot,
};
pub use status::StatusEngine;
pub use store::{DocKind, GameStore};
pub use world::WorldDocs;
