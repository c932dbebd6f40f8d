//! Chat request gateway core.
//!
//! Routes a user message to a backend reasoning profile, keeps the
//! conversation going across turns, calls the retrieval agent in blocking
//! or streaming mode, and post-processes the answer (citation links and a
//! diagnostic trace) before it reaches the caller.

pub mod backend;
pub mod citations;
pub mod error;
pub mod orchestrator;
pub mod router;
pub mod session;
pub mod stream;
pub mod trace;

pub use backend::{
    BackendEvent, BackendEventStream, BackendReply, BackendRequest, HttpBackend, RawResponse,
    RetrievalBackend, ScriptStep, ScriptedBackend,
};
pub use citations::{CitationLink, CitationRewriter};
pub use error::ChatError;
pub use orchestrator::{ChatEventStream, ChatOrchestrator, ChatOutcome};
pub use router::{BackendRouter, ProfileId};
pub use session::SessionManager;
pub use trace::{ExtractionWarning, TraceExtractor};
