use std::sync::Arc;

use anyhow::{bail, Context, Result};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{error, info, warn};
use uuid::Uuid;

use shared::prelude::*;

use crate::client::{connect, open_relay, stream_questions, submit_answers, RelayHandle};

/// A line typed by the participant.
#[derive(Debug, PartialEq, Eq)]
pub enum ConsoleInput {
    Help,
    Ask(String),
    Answer { question_id: String, text: String },
    /// Plain text, interpreted according to the participant's role.
    Say(String),
    Quit,
}

impl ConsoleInput {
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        let (head, rest) = match trimmed.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (trimmed, ""),
        };
        let input = match head {
            "help" => ConsoleInput::Help,
            "quit" | "exit" => ConsoleInput::Quit,
            "ask" => {
                if rest.is_empty() {
                    bail!("usage: ask <text>");
                }
                ConsoleInput::Ask(rest.to_string())
            }
            "answer" => {
                let Some((question_id, text)) = rest.split_once(char::is_whitespace) else {
                    bail!("usage: answer <question_id> <text>");
                };
                ConsoleInput::Answer {
                    question_id: question_id.to_string(),
                    text: text.trim().to_string(),
                }
            }
            _ => ConsoleInput::Say(trimmed.to_string()),
        };
        Ok(Some(input))
    }
}

/// Turns console input into relay messages for one participant.
#[derive(Clone)]
pub struct Composer {
    sender_id: String,
    sender_role: String,
    quiz_id: String,
    last_question: Arc<Mutex<Option<String>>>,
}

impl Composer {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            sender_id: config.sender_id.clone(),
            sender_role: config.sender_role.clone(),
            quiz_id: config.quiz_id.clone(),
            last_question: Arc::new(Mutex::new(None)),
        }
    }

    /// Track the latest question seen on the relay so plain answers can refer to it.
    pub fn observe(&self, message: &QuizMessage) {
        if message.kind == MessageType::Question && !message.question_id.is_empty() {
            *self.last_question.lock() = Some(message.question_id.clone());
        }
    }

    pub fn compose(&self, input: ConsoleInput) -> Option<QuizMessage> {
        let (kind, question_id, text) = match input {
            ConsoleInput::Ask(text) => (MessageType::Question, fresh_question_id(), text),
            ConsoleInput::Answer { question_id, text } => (MessageType::Answer, question_id, text),
            ConsoleInput::Say(text) if self.sender_role == roles::INSTRUCTOR => {
                (MessageType::Question, fresh_question_id(), text)
            }
            ConsoleInput::Say(text) => {
                let question_id = self
                    .last_question
                    .lock()
                    .clone()
                    .unwrap_or_else(fresh_question_id);
                (MessageType::Answer, question_id, text)
            }
            ConsoleInput::Help | ConsoleInput::Quit => return None,
        };

        Some(
            QuizMessage::new(kind, &self.sender_id, &self.sender_role)
                .with_quiz(&self.quiz_id)
                .with_question(question_id)
                .with_content(text)
                .with_timestamp(current_millis()),
        )
    }
}

fn fresh_question_id() -> String {
    format!("q_{}", Uuid::new_v4())
}

/// `<role>: <content> (<type>)`
pub fn render_message(message: &QuizMessage) -> String {
    format!("{}: {} ({})", message.sender_role, message.content, message.kind)
}

pub struct QuizApp {
    config: ClientConfig,
}

impl QuizApp {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    pub async fn run_relay(self) -> Result<()> {
        let address = self.config.server_addr();
        info!(%address, role = %self.config.sender_role, sender = %self.config.sender_id, "joining quiz relay");
        let stream = connect(&address).await?;
        let (handle, mut messages) = open_relay(stream).await?;

        let composer = Composer::new(&self.config);
        spawn_console(handle, composer.clone());

        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("received Ctrl+C, leaving");
            }
            _ = async {
                while let Some(message) = messages.next().await {
                    composer.observe(&message);
                    println!("{}", render_message(&message));
                }
            } => {
                info!("relay stream ended");
            }
        }
        Ok(())
    }

    pub async fn run_questions(self) -> Result<()> {
        let stream = connect(&self.config.server_addr()).await?;
        let questions = stream_questions(stream).await?;
        futures::pin_mut!(questions);
        while let Some(question) = questions.next().await {
            let question = question.context("Question stream failed")?;
            println!("[{}] {}", question.id, question.text);
        }
        info!("question stream finished");
        Ok(())
    }

    /// Submit one answer, or read `<question_id> <text>` lines from stdin when
    /// no question id is given.
    pub async fn run_answers(self, question_id: Option<String>, text: Vec<String>) -> Result<()> {
        let answers = match question_id {
            Some(question_id) => vec![Answer {
                student_id: self.config.sender_id.clone(),
                question_id,
                answer_text: text.join(" "),
            }],
            None => self.read_answer_lines().await?,
        };
        let count = answers.len();
        let stream = connect(&self.config.server_addr()).await?;
        submit_answers(stream, answers).await?;
        info!(count, "answers acknowledged");
        Ok(())
    }

    async fn read_answer_lines(&self) -> Result<Vec<Answer>> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut answers = Vec::new();
        while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
            match parse_answer_line(&self.config.sender_id, &line) {
                Some(answer) => answers.push(answer),
                None if line.trim().is_empty() => {}
                None => warn!(%line, "expected `<question_id> <text>`"),
            }
        }
        Ok(answers)
    }
}

fn parse_answer_line(student_id: &str, line: &str) -> Option<Answer> {
    let (question_id, text) = line.trim().split_once(char::is_whitespace)?;
    Some(Answer {
        student_id: student_id.to_string(),
        question_id: question_id.to_string(),
        answer_text: text.trim().to_string(),
    })
}

fn spawn_console(handle: RelayHandle, composer: Composer) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let input = match ConsoleInput::parse(&line) {
                Ok(Some(input)) => input,
                Ok(None) => continue,
                Err(err) => {
                    warn!("{err:#}");
                    continue;
                }
            };
            match input {
                ConsoleInput::Help => print_help(),
                ConsoleInput::Quit => break,
                other => {
                    if let Some(message) = composer.compose(other) {
                        if let Err(err) = handle.submit(message) {
                            error!(?err, "failed to submit message");
                            break;
                        }
                    }
                }
            }
        }
        handle.close();
    });
}

fn print_help() {
    println!(
        "commands:\n  <text>                      ask (instructor) or answer the latest question (student)\n  ask <text>                  send a question\n  answer <question_id> <text> answer a specific question\n  quit                        leave the relay"
    );
}
