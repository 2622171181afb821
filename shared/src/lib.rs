//! Wire types, framing and configuration shared by the quiz server and client.

pub mod config;
pub mod error;
pub mod logging;
pub mod message;
pub mod net;
pub mod util;

pub mod prelude {
    //! Common imports that are frequently used across binaries.
    pub use crate::config::{
        BatchConfig, ClientConfig, QuestionSeed, ReactionConfig, RulePreset, ServerConfig,
    };
    pub use crate::error::{FrameError, StoreError};
    pub use crate::logging::init_tracing;
    pub use crate::message::{
        roles, Answer, CallMethod, CallRequest, Empty, MessageType, Question, QuizMessage,
        RelayReply, SubmitReply,
    };
    pub use crate::net::{read_frame, read_message, write_message, FramedStream};
    pub use crate::util::{current_millis, current_secs, render_template};
}
