//! On-screen guidance engine.
//!
//! A vision model proposes the next UI step for a captured frame; the engine maps the proposal
//! onto physical screen coordinates, presents it through the overlay shell and watches raw input
//! events until the user has actually performed it.

pub mod classifier;
pub mod error;
pub mod history;
pub mod mapper;
pub mod orchestrator;
pub mod proposal;
pub mod session;
pub mod types;

pub use classifier::{InputEvent, KeyStroke, Verdict};
pub use error::{
    ConfigurationError, EngineError, HistoryError, IntrospectionError, MappingError, ProposalError,
};
pub use history::{HistoryEntry, HistoryLog};
pub use orchestrator::{
    AskRequest, CycleOutcome, ElementProbe, FrameSource, Inbound, NoProbe, Orchestrator, Services,
    ShellEvent, StatusTone, Timings,
};
pub use proposal::{AskMode, PlannedCall, Proposer, ReasonerPlan};
pub use session::{ActionSession, Advance, Completion, InputOutcome, Presentation};
pub use types::{
    ActionKind, ActionProposal, Callout, ChatMessage, DisplayInfo, Frame, Point, Rect,
    ResolvedAction, Role, Size,
};
