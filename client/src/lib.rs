//! Participant side of the quiz relay: submit messages, receive an ordered
//! stream of replies, and the batch question/answer calls.

pub mod app;
pub mod client;

pub use client::{connect, open_relay, stream_questions, submit_answers, MessageStream, RelayHandle};
