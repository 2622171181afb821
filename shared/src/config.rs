use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::{roles, MessageType};

/// Named reaction rules shipped with the server.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RulePreset {
    /// Answers from students are acknowledged with a Feedback message.
    AnswerFeedback,
    /// Questions from instructors are echoed back as system Questions.
    QuestionEcho,
    /// Use the trigger/reply fields of [`ReactionConfig`] verbatim.
    Custom,
}

/// Declarative description of the relay reaction rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReactionConfig {
    pub preset: RulePreset,
    pub trigger_type: MessageType,
    pub trigger_role: String,
    pub reply_type: MessageType,
    /// Supports `{sender_id}`, `{sender_role}`, `{question_id}`, `{quiz_id}` and `{content}`.
    pub reply_template: String,
    pub system_sender_id: String,
    pub system_role: String,
}

impl ReactionConfig {
    pub fn answer_feedback() -> Self {
        Self {
            preset: RulePreset::AnswerFeedback,
            trigger_type: MessageType::Answer,
            trigger_role: roles::STUDENT.to_string(),
            reply_type: MessageType::Feedback,
            reply_template: "Answer received from {sender_id}.".to_string(),
            system_sender_id: roles::SYSTEM.to_string(),
            system_role: roles::SYSTEM.to_string(),
        }
    }

    pub fn question_echo() -> Self {
        Self {
            preset: RulePreset::QuestionEcho,
            trigger_type: MessageType::Question,
            trigger_role: roles::INSTRUCTOR.to_string(),
            reply_type: MessageType::Question,
            reply_template: "Question {question_id} from {sender_id}: {content}".to_string(),
            system_sender_id: roles::SYSTEM.to_string(),
            system_role: roles::SYSTEM.to_string(),
        }
    }

    /// Apply the preset, keeping the configured system identity.
    pub fn resolved(&self) -> Self {
        let base = match self.preset {
            RulePreset::AnswerFeedback => Self::answer_feedback(),
            RulePreset::QuestionEcho => Self::question_echo(),
            RulePreset::Custom => return self.clone(),
        };
        Self {
            system_sender_id: self.system_sender_id.clone(),
            system_role: self.system_role.clone(),
            ..base
        }
    }
}

impl Default for ReactionConfig {
    fn default() -> Self {
        Self::answer_feedback()
    }
}

/// A question served by the batch broadcast.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestionSeed {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Delay between consecutive streamed questions.
    pub question_delay_ms: u64,
    pub questions: Vec<QuestionSeed>,
}

impl BatchConfig {
    pub fn question_delay(&self) -> Duration {
        Duration::from_millis(self.question_delay_ms)
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            question_delay_ms: 2000,
            questions: vec![
                QuestionSeed {
                    id: "Q1".to_string(),
                    text: "What is Rust?".to_string(),
                },
                QuestionSeed {
                    id: "Q2".to_string(),
                    text: "What is a bidirectional stream?".to_string(),
                },
            ],
        }
    }
}

/// Configuration loaded by the server binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host/interface to bind for incoming connections.
    pub listen_host: String,
    pub listen_port: u16,
    /// Seconds without an inbound message before a relay session is closed. Zero disables.
    pub idle_timeout_secs: u64,
    /// Keep a session's history in the store after it closes.
    pub retain_closed_sessions: bool,
    pub reaction: ReactionConfig,
    pub batch: BatchConfig,
}

impl ServerConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let content = fs::read_to_string(path_ref).with_context(|| {
            format!("Failed to read server config from {}", path_ref.display())
        })?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Invalid server config {}", path_ref.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(content).context("Failed to parse server config")?;
        config.finalize()?;
        Ok(config)
    }

    fn finalize(&mut self) -> Result<()> {
        self.reaction = self.reaction.resolved();
        if self.reaction.system_role.trim().is_empty() {
            bail!("reaction.system_role must not be empty");
        }

        if self.batch.questions.is_empty() {
            bail!("batch.questions must contain at least one question");
        }
        let mut seen = HashSet::new();
        for question in &self.batch.questions {
            if !seen.insert(question.id.as_str()) {
                bail!("duplicate batch question id {}", question.id);
            }
        }
        Ok(())
    }

    /// Return the socket address string used for binding (`host:port`).
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_host, self.listen_port)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_host: "0.0.0.0".to_string(),
            listen_port: 50051,
            idle_timeout_secs: 300,
            retain_closed_sessions: false,
            reaction: ReactionConfig::default(),
            batch: BatchConfig::default(),
        }
    }
}

/// Configuration loaded by the client binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server_ip: String,
    pub server_port: u16,
    /// Participant id; generated when left empty.
    pub sender_id: String,
    pub sender_role: String,
    pub quiz_id: String,
}

impl ClientConfig {
    /// Load configuration from a JSON file.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let content = fs::read_to_string(path_ref).with_context(|| {
            format!("Failed to read client config from {}", path_ref.display())
        })?;
        let mut config: Self = serde_json::from_str(&content).with_context(|| {
            format!("Failed to parse client config {}", path_ref.display())
        })?;
        config.finalize();
        Ok(config)
    }

    fn finalize(&mut self) {
        if self.sender_id.trim().is_empty() {
            self.sender_id = Uuid::new_v4().to_string();
        }
        if self.sender_role.trim().is_empty() {
            self.sender_role = roles::STUDENT.to_string();
        }
    }

    /// Return the address of the server (`host:port`).
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_ip, self.server_port)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_ip: "127.0.0.1".to_string(),
            server_port: 50051,
            sender_id: String::new(),
            sender_role: roles::STUDENT.to_string(),
            quiz_id: String::new(),
        }
    }
}
