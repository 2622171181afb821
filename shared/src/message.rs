use serde::{Deserialize, Serialize};

use crate::util::current_millis;

/// Well-known role tags. Roles stay free-form strings on the wire so new
/// participants can be introduced without a protocol change.
pub mod roles {
    pub const INSTRUCTOR: &str = "instructor";
    pub const STUDENT: &str = "student";
    /// Reserved for messages synthesized by the relay itself.
    pub const SYSTEM: &str = "system";
}

/// Kind of a relay message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Question,
    Answer,
    Feedback,
}

impl Default for MessageType {
    fn default() -> Self {
        MessageType::Question
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MessageType::Question => "Question",
            MessageType::Answer => "Answer",
            MessageType::Feedback => "Feedback",
        };
        f.write_str(name)
    }
}

/// Unit exchanged in both directions on a relay connection.
///
/// Every field but `content` is opaque to the relay: ids are never
/// validated and answers are not checked against previously seen questions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct QuizMessage {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub sender_id: String,
    pub sender_role: String,
    pub quiz_id: String,
    pub question_id: String,
    pub content: String,
    /// Seconds or milliseconds since the epoch; the relay does not normalize it.
    pub timestamp: i64,
}

impl QuizMessage {
    pub fn new(kind: MessageType, sender_id: impl Into<String>, sender_role: impl Into<String>) -> Self {
        Self {
            kind,
            sender_id: sender_id.into(),
            sender_role: sender_role.into(),
            ..Self::default()
        }
    }

    pub fn with_quiz(mut self, quiz_id: impl Into<String>) -> Self {
        self.quiz_id = quiz_id.into();
        self
    }

    pub fn with_question(mut self, question_id: impl Into<String>) -> Self {
        self.question_id = question_id.into();
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Feedback message shown to a participant in place of a failed stream.
    pub fn error_feedback(description: impl std::fmt::Display) -> Self {
        QuizMessage::new(MessageType::Feedback, roles::SYSTEM, roles::SYSTEM)
            .with_content(format!("Error: {description}"))
            .with_timestamp(current_millis())
    }
}

/// Item of the batch question broadcast.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Question {
    pub id: String,
    pub text: String,
    pub timestamp: i64,
}

/// Answer submitted through the batch answer stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Answer {
    pub student_id: String,
    pub question_id: String,
    pub answer_text: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Empty {}

/// Call selected by the first frame a client writes on a new connection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CallMethod {
    ConductQuiz,
    StreamQuestions,
    SubmitAnswers,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallRequest {
    pub method: CallMethod,
    #[serde(default)]
    pub client_version: String,
}

impl CallRequest {
    pub fn new(method: CallMethod) -> Self {
        Self {
            method,
            client_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Frames written by the server on a relay connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum RelayReply {
    Message(QuizMessage),
    /// Terminal: the server closes the session after sending it.
    Error(String),
}

/// Single reply closing a `submit_answers` call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum SubmitReply {
    Ack(Empty),
    Error(String),
}
