use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::time;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use shared::prelude::*;

use crate::rule::{ReactionRule, SystemIdentity};
use crate::store::SessionStore;

/// Settings shared by every relay session of a server.
#[derive(Clone)]
pub struct RelayContext {
    pub store: Arc<SessionStore>,
    pub rule: Arc<dyn ReactionRule>,
    pub identity: SystemIdentity,
    pub idle_timeout: Option<Duration>,
    pub retain_closed_sessions: bool,
}

impl RelayContext {
    pub fn new(store: Arc<SessionStore>, rule: Arc<dyn ReactionRule>) -> Self {
        Self {
            store,
            rule,
            identity: SystemIdentity::default(),
            idle_timeout: None,
            retain_closed_sessions: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Active,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    PeerClosed,
    IdleTimeout,
    Transport(String),
    Malformed(String),
    WriteFailed(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::PeerClosed => f.write_str("peer closed"),
            CloseReason::IdleTimeout => f.write_str("idle timeout"),
            CloseReason::Transport(err) => write!(f, "transport failure: {err}"),
            CloseReason::Malformed(err) => write!(f, "malformed message: {err}"),
            CloseReason::WriteFailed(err) => write!(f, "reply write failed: {err}"),
        }
    }
}

/// Outcome of a finished relay session.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub connection_id: Uuid,
    pub reason: CloseReason,
    pub received: usize,
    pub replies: usize,
    /// Inbound messages in arrival order.
    pub history: Vec<QuizMessage>,
    /// States the session passed through, ending with `Closed`.
    pub states: Vec<SessionState>,
}

/// One duplex relay connection. Inbound messages are archived, logged and
/// run through the reaction rule; a reply is written before the next
/// inbound message is read.
pub struct RelaySession<R, W> {
    connection_id: Uuid,
    context: RelayContext,
    reader: R,
    writer: W,
    states: Vec<SessionState>,
    received: usize,
    replies: usize,
}

impl<R, W> RelaySession<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Allocate a connection id and register it with the store.
    pub fn open(context: RelayContext, reader: R, writer: W) -> Self {
        let connection_id = Uuid::new_v4();
        context.store.open(connection_id);
        info!(connection = %connection_id, "relay session opened");
        Self {
            connection_id,
            context,
            reader,
            writer,
            states: vec![SessionState::Open],
            received: 0,
            replies: 0,
        }
    }

    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    pub fn state(&self) -> SessionState {
        self.states
            .last()
            .copied()
            .unwrap_or(SessionState::Open)
    }

    fn transition(&mut self, next: SessionState) {
        if self.state() != next {
            debug!(connection = %self.connection_id, from = ?self.state(), to = ?next, "relay session state");
            self.states.push(next);
        }
    }

    /// Drive the session until the peer closes, the transport fails or the
    /// idle timeout fires.
    pub async fn run(mut self) -> SessionReport {
        self.transition(SessionState::Active);
        let reason = self.receive_loop().await;
        self.close(reason).await
    }

    async fn receive_loop(&mut self) -> CloseReason {
        loop {
            let read = read_frame::<_, QuizMessage>(&mut self.reader);
            let next = match self.context.idle_timeout {
                Some(limit) => match time::timeout(limit, read).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(connection = %self.connection_id, ?limit, "relay session idle");
                        self.reject(format!("idle timeout after {}s", limit.as_secs()))
                            .await;
                        return CloseReason::IdleTimeout;
                    }
                },
                None => read.await,
            };

            match next {
                Ok(Some(message)) => {
                    if let Err(err) = self.handle_message(message).await {
                        error!(connection = %self.connection_id, %err, "failed to write reply");
                        return CloseReason::WriteFailed(err.to_string());
                    }
                }
                Ok(None) => return CloseReason::PeerClosed,
                Err(FrameError::Malformed(err)) => {
                    warn!(connection = %self.connection_id, %err, "rejecting malformed message");
                    self.reject(format!("malformed message: {err}")).await;
                    return CloseReason::Malformed(err.to_string());
                }
                Err(err) => {
                    warn!(connection = %self.connection_id, %err, "relay transport failed");
                    return CloseReason::Transport(err.to_string());
                }
            }
        }
    }

    async fn handle_message(&mut self, message: QuizMessage) -> Result<(), FrameError> {
        self.received += 1;

        if let Err(err) = self.context.store.append(self.connection_id, message.clone()) {
            error!(connection = %self.connection_id, %err, "failed to archive message");
        }

        info!(
            connection = %self.connection_id,
            role = %message.sender_role,
            sender = %message.sender_id,
            kind = %message.kind,
            content = %message.content,
            "message received"
        );

        if self.context.rule.matches(&message) {
            let draft = self.context.rule.respond(&message);
            let reply = self.context.identity.stamp(draft, &message);
            write_message(&mut self.writer, &RelayReply::Message(reply.clone())).await?;
            self.replies += 1;
            debug!(
                connection = %self.connection_id,
                kind = %reply.kind,
                question = %reply.question_id,
                "reply sent"
            );
        }
        Ok(())
    }

    async fn reject(&mut self, description: String) {
        if let Err(err) = write_message(&mut self.writer, &RelayReply::Error(description)).await {
            debug!(connection = %self.connection_id, %err, "could not deliver error to peer");
        }
    }

    async fn close(mut self, reason: CloseReason) -> SessionReport {
        self.transition(SessionState::Closed);
        if let Err(err) = self.writer.shutdown().await {
            debug!(connection = %self.connection_id, %err, "relay writer shutdown failed");
        }

        let history = if self.context.retain_closed_sessions {
            self.context.store.history(self.connection_id)
        } else {
            self.context.store.remove(self.connection_id)
        };
        let history = history.unwrap_or_default();

        info!(
            connection = %self.connection_id,
            %reason,
            received = self.received,
            replies = self.replies,
            "relay session closed"
        );

        SessionReport {
            connection_id: self.connection_id,
            reason,
            received: self.received,
            replies: self.replies,
            history,
            states: self.states,
        }
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use tokio::io::{AsyncReadExt, DuplexStream, ReadHalf, WriteHalf};

    use super::*;
    use crate::rule::{FnRule, TemplateRule};

    struct Peer {
        reader: ReadHalf<DuplexStream>,
        writer: WriteHalf<DuplexStream>,
    }

    impl Peer {
        async fn send(&mut self, message: &QuizMessage) {
            write_message(&mut self.writer, message).await.unwrap();
        }

        async fn finish(&mut self) {
            self.writer.shutdown().await.unwrap();
        }

        async fn replies(&mut self) -> Vec<RelayReply> {
            let mut replies = Vec::new();
            while let Some(reply) = read_frame(&mut self.reader).await.unwrap() {
                replies.push(reply);
            }
            replies
        }
    }

    fn spawn_session(
        context: RelayContext,
    ) -> (Peer, tokio::task::JoinHandle<SessionReport>) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        let (reader, writer) = tokio::io::split(client);
        let session = RelaySession::open(context, server_read, server_write);
        assert_eq!(session.state(), SessionState::Open);
        (Peer { reader, writer }, tokio::spawn(session.run()))
    }

    fn context_with(config: &ReactionConfig) -> RelayContext {
        let mut context = RelayContext::new(
            Arc::new(SessionStore::new()),
            Arc::new(TemplateRule::from_config(config)),
        );
        context.identity = SystemIdentity::from(config);
        context
    }

    fn only_messages(replies: Vec<RelayReply>) -> Vec<QuizMessage> {
        replies
            .into_iter()
            .map(|reply| match reply {
                RelayReply::Message(message) => message,
                RelayReply::Error(err) => panic!("unexpected error reply: {err}"),
            })
            .collect()
    }

    #[tokio::test]
    async fn student_answer_gets_one_feedback() {
        let (mut peer, session) = spawn_session(context_with(&ReactionConfig::answer_feedback()));
        let answer = QuizMessage::new(MessageType::Answer, "s1", roles::STUDENT)
            .with_question("q1")
            .with_content("42");
        peer.send(&answer).await;
        peer.finish().await;

        let replies = only_messages(peer.replies().await);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].kind, MessageType::Feedback);
        assert_eq!(replies[0].sender_role, roles::SYSTEM);
        assert_eq!(replies[0].question_id, "q1");
        assert!(replies[0].content.contains("s1"));

        let report = session.await.unwrap();
        assert_eq!(report.reason, CloseReason::PeerClosed);
        assert_eq!(report.history, vec![answer]);
        assert_eq!(report.replies, 1);
        assert_eq!(
            report.states,
            [SessionState::Open, SessionState::Active, SessionState::Closed]
        );
    }

    #[tokio::test]
    async fn instructor_question_under_each_rule() {
        let question = QuizMessage::new(MessageType::Question, "i1", roles::INSTRUCTOR)
            .with_question("q7")
            .with_content("What is a trait?");

        let (mut peer, session) = spawn_session(context_with(&ReactionConfig::question_echo()));
        peer.send(&question).await;
        peer.finish().await;
        let replies = only_messages(peer.replies().await);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].kind, MessageType::Question);
        assert_eq!(replies[0].sender_role, roles::SYSTEM);
        assert_eq!(replies[0].question_id, "q7");
        session.await.unwrap();

        let (mut peer, session) = spawn_session(context_with(&ReactionConfig::answer_feedback()));
        peer.send(&question).await;
        peer.finish().await;
        assert!(peer.replies().await.is_empty());
        let report = session.await.unwrap();
        assert_eq!(report.received, 1);
        assert_eq!(report.replies, 0);
    }

    #[tokio::test]
    async fn closing_without_messages_leaves_empty_history() {
        let context = context_with(&ReactionConfig::answer_feedback());
        let store = Arc::clone(&context.store);
        let (mut peer, session) = spawn_session(context);
        peer.finish().await;

        assert!(peer.replies().await.is_empty());
        let report = session.await.unwrap();
        assert_eq!(report.reason, CloseReason::PeerClosed);
        assert!(report.history.is_empty());
        assert_eq!(
            report.states,
            [SessionState::Open, SessionState::Active, SessionState::Closed]
        );
        assert!(store.is_empty(), "closed sessions are evicted by default");
    }

    #[tokio::test]
    async fn history_matches_inbound_sequence_and_keeps_duplicates() {
        let mut context = context_with(&ReactionConfig::answer_feedback());
        context.retain_closed_sessions = true;
        let store = Arc::clone(&context.store);
        let (mut peer, session) = spawn_session(context);

        let mut sent = Vec::new();
        for (i, role) in [roles::STUDENT, roles::INSTRUCTOR, roles::STUDENT].iter().enumerate() {
            let msg = QuizMessage::new(MessageType::Answer, format!("p{i}"), *role)
                .with_question("q1")
                .with_content(i.to_string());
            peer.send(&msg).await;
            sent.push(msg);
        }
        peer.send(&sent[0]).await;
        sent.push(sent[0].clone());
        peer.finish().await;

        let replies = only_messages(peer.replies().await);
        assert_eq!(replies.len(), 3, "every matching answer is acknowledged");

        let report = session.await.unwrap();
        assert_eq!(report.history, sent);
        assert_eq!(store.history(report.connection_id).unwrap(), sent);
    }

    #[tokio::test]
    async fn replies_follow_inbound_order() {
        let archived_before_reply = Arc::new(Mutex::new(Vec::new()));
        let store = Arc::new(SessionStore::new());
        let rule = {
            let observed = Arc::clone(&archived_before_reply);
            let store = Arc::clone(&store);
            FnRule::new(
                |_: &QuizMessage| true,
                move |m: &QuizMessage| {
                    let archived: usize = store.summaries().iter().map(|s| s.messages).sum();
                    observed.lock().push(archived);
                    QuizMessage::new(MessageType::Feedback, "", "").with_content(m.content.clone())
                },
            )
        };
        let (mut peer, session) = spawn_session(RelayContext::new(store, Arc::new(rule)));

        for i in 0..5 {
            let msg = QuizMessage::new(MessageType::Question, "i1", roles::INSTRUCTOR)
                .with_question(format!("q{i}"));
            peer.send(&msg).await;
        }
        peer.finish().await;

        let ids: Vec<String> = only_messages(peer.replies().await)
            .into_iter()
            .map(|m| m.question_id)
            .collect();
        assert_eq!(ids, ["q0", "q1", "q2", "q3", "q4"]);
        assert_eq!(*archived_before_reply.lock(), vec![1, 2, 3, 4, 5]);
        assert_eq!(session.await.unwrap().replies, 5);
    }

    #[tokio::test]
    async fn malformed_frame_is_rejected_and_closes_session() {
        let (mut peer, session) = spawn_session(context_with(&ReactionConfig::answer_feedback()));
        let garbage = br#"{"type":"shout"}"#;
        peer.writer.write_u32_le(garbage.len() as u32).await.unwrap();
        peer.writer.write_all(garbage).await.unwrap();

        let replies = peer.replies().await;
        assert_eq!(replies.len(), 1);
        assert!(matches!(&replies[0], RelayReply::Error(err) if err.starts_with("malformed message")));

        let report = session.await.unwrap();
        assert!(matches!(report.reason, CloseReason::Malformed(_)));
        assert_eq!(report.received, 0);
    }

    #[tokio::test]
    async fn truncated_frame_is_a_transport_failure() {
        let (mut peer, session) = spawn_session(context_with(&ReactionConfig::answer_feedback()));
        peer.writer.write_u32_le(64).await.unwrap();
        peer.writer.write_all(b"{\"type\"").await.unwrap();
        peer.finish().await;

        let report = session.await.unwrap();
        assert!(matches!(report.reason, CloseReason::Transport(_)));
        let mut rest = Vec::new();
        peer.reader.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_session_times_out() {
        let mut context = context_with(&ReactionConfig::answer_feedback());
        context.idle_timeout = Some(Duration::from_secs(30));
        let (mut peer, session) = spawn_session(context);

        let replies = peer.replies().await;
        assert!(matches!(&replies[..], [RelayReply::Error(err)] if err.contains("idle timeout")));
        assert_eq!(session.await.unwrap().reason, CloseReason::IdleTimeout);
    }

    #[tokio::test]
    async fn failed_reply_write_closes_session() {
        let (client, server) = tokio::io::duplex(4096);
        let (sink_peer, sink) = tokio::io::duplex(1024);
        drop(sink_peer);
        let session = RelaySession::open(
            context_with(&ReactionConfig::answer_feedback()),
            server,
            sink,
        );
        let task = tokio::spawn(session.run());

        let (_reader, mut writer) = tokio::io::split(client);
        let answer = QuizMessage::new(MessageType::Answer, "s1", roles::STUDENT)
            .with_question("q1")
            .with_content("42");
        write_message(&mut writer, &answer).await.unwrap();

        let report = task.await.unwrap();
        assert!(matches!(report.reason, CloseReason::WriteFailed(_)));
        assert_eq!(report.received, 1);
        assert_eq!(report.history, vec![answer]);
        assert_eq!(report.replies, 0);
        assert_eq!(report.states.last(), Some(&SessionState::Closed));
    }

    #[tokio::test]
    async fn evicted_session_keeps_processing() {
        let context = context_with(&ReactionConfig::answer_feedback());
        let store = Arc::clone(&context.store);
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        let session = RelaySession::open(context, server_read, server_write);
        assert!(store.remove(session.connection_id()).is_some());
        let task = tokio::spawn(session.run());

        let (reader, writer) = tokio::io::split(client);
        let mut peer = Peer { reader, writer };
        for question in ["q1", "q2"] {
            let answer = QuizMessage::new(MessageType::Answer, "s1", roles::STUDENT)
                .with_question(question)
                .with_content("42");
            peer.send(&answer).await;
        }
        peer.finish().await;

        let ids: Vec<String> = only_messages(peer.replies().await)
            .into_iter()
            .map(|m| m.question_id)
            .collect();
        assert_eq!(ids, ["q1", "q2"]);

        let report = task.await.unwrap();
        assert_eq!(report.reason, CloseReason::PeerClosed);
        assert_eq!(report.received, 2);
        assert_eq!(report.replies, 2);
        assert!(report.history.is_empty());
        assert!(store.is_empty());
    }
}
