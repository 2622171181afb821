//! Quiz relay server: per-connection relay sessions with a pluggable
//! reaction rule, plus the batch question/answer calls.

pub mod batch;
pub mod relay;
pub mod rule;
pub mod server;
pub mod store;

pub use relay::{CloseReason, RelayContext, RelaySession, SessionReport, SessionState};
pub use rule::{FnRule, ReactionRule, SystemIdentity, TemplateRule};
pub use server::{QuizServer, QuizState};
pub use store::SessionStore;
