use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};
use uuid::Uuid;

use shared::prelude::*;

use crate::batch::{AnswerStore, QuestionBank};
use crate::relay::{RelayContext, RelaySession};
use crate::rule::{SystemIdentity, TemplateRule};
use crate::store::SessionStore;

#[derive(Debug, PartialEq, Eq)]
pub enum ServerCommand {
    Help,
    ListSessions,
    ShowHistory { connection_id: Uuid },
    ListAnswers,
    Quit,
}

impl ServerCommand {
    /// Parse an operator console line. `Ok(None)` means the line was blank.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let mut parts = line.split_whitespace();
        let Some(head) = parts.next() else {
            return Ok(None);
        };
        let command = match head {
            "help" => ServerCommand::Help,
            "sessions" => ServerCommand::ListSessions,
            "history" => {
                let raw = parts
                    .next()
                    .context("usage: history <connection_id>")?;
                let connection_id = Uuid::parse_str(raw)
                    .with_context(|| format!("invalid connection id {raw}"))?;
                ServerCommand::ShowHistory { connection_id }
            }
            "answers" => ServerCommand::ListAnswers,
            "quit" | "exit" => ServerCommand::Quit,
            other => bail!("unknown command {other}"),
        };
        Ok(Some(command))
    }
}

/// Shared state handed to every connection task.
pub struct QuizState {
    relay: RelayContext,
    questions: QuestionBank,
    answers: AnswerStore,
}

impl QuizState {
    pub fn new(config: &ServerConfig) -> Self {
        let mut relay = RelayContext::new(
            Arc::new(SessionStore::new()),
            Arc::new(TemplateRule::from_config(&config.reaction)),
        );
        relay.identity = SystemIdentity::from(&config.reaction);
        relay.idle_timeout = config.idle_timeout();
        relay.retain_closed_sessions = config.retain_closed_sessions;

        Self {
            relay,
            questions: QuestionBank::from_config(&config.batch),
            answers: AnswerStore::new(),
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.relay.store
    }

    pub fn answers(&self) -> &AnswerStore {
        &self.answers
    }
}

pub struct QuizServer {
    config: ServerConfig,
    state: Arc<QuizState>,
    running: AtomicBool,
}

impl QuizServer {
    pub fn new(config: ServerConfig) -> Self {
        let state = Arc::new(QuizState::new(&config));
        Self {
            config,
            state,
            running: AtomicBool::new(false),
        }
    }

    pub async fn run(&self, enable_console: bool) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            bail!("Quiz server already running");
        }

        let addr = self.config.listen_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to listen on {addr}"))?;
        info!(%addr, rule = ?self.config.reaction.preset, "quiz server listening");

        let state = self.state.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        if let Err(err) = stream.set_nodelay(true) {
                            warn!(?err, %peer, "failed to set TCP_NODELAY");
                        }
                        let state = state.clone();
                        tokio::spawn(async move {
                            let (reader, writer) = stream.into_split();
                            if let Err(err) = handle_connection(state, reader, writer, peer).await {
                                error!(err = %format!("{err:#}"), %peer, "connection failed");
                            }
                        });
                    }
                    Err(err) => {
                        error!(?err, "listener failed");
                        break;
                    }
                }
            }
        });

        if enable_console {
            info!("type help for console commands");
        }
        tokio::select! {
            result = self.command_loop(), if enable_console => {
                if let Err(err) = result {
                    error!(?err, "console loop failed");
                }
            }
            _ = signal::ctrl_c() => {
                info!("shutdown signal received");
            }
        }

        self.running.store(false, Ordering::SeqCst);
        accept_task.abort();
        info!(open_sessions = self.state.sessions().len(), "quiz server stopped");
        Ok(())
    }

    async fn command_loop(&self) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await.context("Failed to read console")? {
            match ServerCommand::parse(&line) {
                Ok(Some(command)) => {
                    if self.execute_command(command) {
                        break;
                    }
                }
                Ok(None) => {}
                Err(err) => warn!("{err:#}"),
            }
        }
        Ok(())
    }

    /// Returns true when the server should stop.
    fn execute_command(&self, command: ServerCommand) -> bool {
        match command {
            ServerCommand::Help => self.print_help(),
            ServerCommand::ListSessions => self.print_sessions(),
            ServerCommand::ShowHistory { connection_id } => self.print_history(connection_id),
            ServerCommand::ListAnswers => self.print_answers(),
            ServerCommand::Quit => return true,
        }
        false
    }

    fn print_help(&self) {
        println!(
            "commands:\n  help                 show this help\n  sessions             list relay sessions\n  history <id>         show a session's inbound messages\n  answers              list submitted batch answers\n  quit                 stop the server"
        );
    }

    fn print_sessions(&self) {
        let sessions = self.state.sessions().summaries();
        if sessions.is_empty() {
            println!("no relay sessions");
            return;
        }
        for session in sessions {
            println!("- {} ({} messages)", session.connection_id, session.messages);
        }
    }

    fn print_history(&self, connection_id: Uuid) {
        match self.state.sessions().history(connection_id) {
            Some(history) => {
                for message in history {
                    println!(
                        "{}({}) -> {}: {}",
                        message.sender_role, message.sender_id, message.kind, message.content
                    );
                }
            }
            None => println!("unknown session {connection_id}"),
        }
    }

    fn print_answers(&self) {
        let answers = self.state.answers().all();
        if answers.is_empty() {
            println!("no answers submitted");
            return;
        }
        for answer in answers {
            println!(
                "- {} / {}: {}",
                answer.student_id, answer.question_id, answer.answer_text
            );
        }
    }
}

/// Read the call header and serve the selected call on the connection.
pub async fn handle_connection<R, W>(
    state: Arc<QuizState>,
    mut reader: R,
    mut writer: W,
    peer: SocketAddr,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let request: CallRequest = read_message(&mut reader)
        .await
        .context("Failed to read call header")?;
    info!(%peer, method = ?request.method, client = %request.client_version, "call started");

    match request.method {
        CallMethod::ConductQuiz => {
            let session = RelaySession::open(state.relay.clone(), reader, writer);
            let report = session.run().await;
            info!(
                %peer,
                connection = %report.connection_id,
                history = report.history.len(),
                "relay call finished"
            );
        }
        CallMethod::StreamQuestions => {
            let sent = state
                .questions
                .stream_to(&mut writer)
                .await
                .context("Failed to stream questions")?;
            info!(%peer, sent, "question stream finished");
        }
        CallMethod::SubmitAnswers => {
            let recorded = state
                .answers
                .collect_from(&mut reader, &mut writer)
                .await
                .context("Failed to collect answers")?;
            info!(%peer, recorded, total = state.answers.len(), "answer stream finished");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};

    use super::*;

    fn test_state() -> Arc<QuizState> {
        let mut config = ServerConfig::default();
        config.batch.question_delay_ms = 0;
        config.retain_closed_sessions = true;
        Arc::new(QuizState::new(&config))
    }

    fn connect(
        state: Arc<QuizState>,
    ) -> (
        ReadHalf<DuplexStream>,
        WriteHalf<DuplexStream>,
        tokio::task::JoinHandle<Result<()>>,
    ) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (server_reader, server_writer) = tokio::io::split(server);
        let peer: SocketAddr = "127.0.0.1:40000".parse().unwrap();
        let task = tokio::spawn(handle_connection(state, server_reader, server_writer, peer));
        let (reader, writer) = tokio::io::split(client);
        (reader, writer, task)
    }

    #[test]
    fn console_commands_parse() {
        assert_eq!(ServerCommand::parse("  ").unwrap(), None);
        assert_eq!(
            ServerCommand::parse("sessions").unwrap(),
            Some(ServerCommand::ListSessions)
        );
        let id = Uuid::new_v4();
        assert_eq!(
            ServerCommand::parse(&format!("history {id}")).unwrap(),
            Some(ServerCommand::ShowHistory { connection_id: id })
        );
        assert!(ServerCommand::parse("history").is_err());
        assert!(ServerCommand::parse("history nope").is_err());
        assert!(ServerCommand::parse("dance").is_err());
        assert_eq!(ServerCommand::parse("exit").unwrap(), Some(ServerCommand::Quit));
    }

    #[tokio::test]
    async fn relay_call_is_dispatched() {
        let state = test_state();
        let (mut reader, mut writer, task) = connect(state.clone());

        write_message(&mut writer, &CallRequest::new(CallMethod::ConductQuiz))
            .await
            .unwrap();
        let answer = QuizMessage::new(MessageType::Answer, "s1", roles::STUDENT)
            .with_question("q1")
            .with_content("42");
        write_message(&mut writer, &answer).await.unwrap();
        writer.shutdown().await.unwrap();

        let reply: RelayReply = read_message(&mut reader).await.unwrap();
        match reply {
            RelayReply::Message(msg) => {
                assert_eq!(msg.kind, MessageType::Feedback);
                assert_eq!(msg.question_id, "q1");
            }
            other => panic!("unexpected reply {other:?}"),
        }
        task.await.unwrap().unwrap();

        let sessions = state.sessions().summaries();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].messages, 1);
    }

    #[tokio::test]
    async fn question_stream_call_ends_after_bank() {
        let state = test_state();
        let (mut reader, mut writer, task) = connect(state);
        write_message(&mut writer, &CallRequest::new(CallMethod::StreamQuestions))
            .await
            .unwrap();

        let mut ids = Vec::new();
        while let Some(question) = read_frame::<_, Question>(&mut reader).await.unwrap() {
            ids.push(question.id);
        }
        assert_eq!(ids, ["Q1", "Q2"]);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn submit_answers_call_records_answers() {
        let state = test_state();
        let (mut reader, mut writer, task) = connect(state.clone());
        write_message(&mut writer, &CallRequest::new(CallMethod::SubmitAnswers))
            .await
            .unwrap();
        let answer = Answer {
            student_id: "s1".into(),
            question_id: "Q1".into(),
            answer_text: "A systems language".into(),
        };
        write_message(&mut writer, &answer).await.unwrap();
        writer.shutdown().await.unwrap();

        let reply: SubmitReply = read_message(&mut reader).await.unwrap();
        assert_eq!(reply, SubmitReply::Ack(Empty {}));
        task.await.unwrap().unwrap();
        assert_eq!(state.answers().answers_for("s1", "Q1"), vec![answer]);
    }

    #[tokio::test]
    async fn missing_call_header_is_an_error() {
        let (_reader, mut writer, task) = connect(test_state());
        writer.shutdown().await.unwrap();
        let err = task.await.unwrap().unwrap_err();
        assert!(format!("{err:#}").contains("call header"));
    }
}
