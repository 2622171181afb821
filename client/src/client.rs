use anyhow::{bail, Context, Result};
use futures::Stream;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, warn};

use shared::prelude::*;

/// Ordered, unbounded stream of messages received on a relay call.
pub type MessageStream = UnboundedReceiverStream<QuizMessage>;

pub async fn connect(address: &str) -> Result<TcpStream> {
    let stream = TcpStream::connect(address)
        .await
        .with_context(|| format!("Failed to connect to {address}"))?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Outbound side of a relay call. Dropping every handle (or calling
/// [`RelayHandle::close`]) ends the outbound stream.
#[derive(Clone)]
pub struct RelayHandle {
    outbound: mpsc::UnboundedSender<QuizMessage>,
}

impl RelayHandle {
    pub fn submit(&self, message: QuizMessage) -> Result<()> {
        self.outbound
            .send(message)
            .map_err(|_| anyhow::anyhow!("relay connection is closed"))
    }

    pub fn close(self) {
        drop(self);
    }
}

/// Start a relay call on `stream`.
///
/// Messages submitted through the handle are written in order by a single
/// writer task. A server error or transport failure is delivered as one
/// `Error: ...` feedback message, after which the stream ends.
pub async fn open_relay<S>(stream: S) -> Result<(RelayHandle, MessageStream)>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    write_message(&mut writer, &CallRequest::new(CallMethod::ConductQuiz))
        .await
        .context("Failed to start relay call")?;

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<QuizMessage>();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<QuizMessage>();

    tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if let Err(err) = write_message(&mut writer, &message).await {
                warn!(%err, "failed to send relay message");
                break;
            }
        }
        if let Err(err) = writer.shutdown().await {
            debug!(%err, "relay writer shutdown failed");
        }
    });

    tokio::spawn(async move {
        loop {
            let delivered = match read_frame::<_, RelayReply>(&mut reader).await {
                Ok(Some(RelayReply::Message(message))) => inbound_tx.send(message).is_ok(),
                Ok(Some(RelayReply::Error(description))) => {
                    let _ = inbound_tx.send(QuizMessage::error_feedback(description));
                    false
                }
                Ok(None) => false,
                Err(err) => {
                    let _ = inbound_tx.send(QuizMessage::error_feedback(&err));
                    false
                }
            };
            if !delivered {
                break;
            }
        }
    });

    Ok((
        RelayHandle {
            outbound: outbound_tx,
        },
        UnboundedReceiverStream::new(inbound_rx),
    ))
}

/// Request the batch question broadcast. The stream ends when the server has
/// sent every question.
pub async fn stream_questions<S>(
    stream: S,
) -> Result<impl Stream<Item = Result<Question, FrameError>>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed: FramedStream<S, Question, CallRequest> = FramedStream::new(stream);
    framed
        .send(&CallRequest::new(CallMethod::StreamQuestions))
        .await
        .context("Failed to start question stream")?;

    Ok(futures::stream::unfold(Some(framed), |state| async move {
        let mut framed = state?;
        match framed.recv().await {
            Ok(Some(question)) => Some((Ok(question), Some(framed))),
            Ok(None) => None,
            Err(err) => Some((Err(err), None)),
        }
    }))
}

/// Send every answer, half-close, and wait for the server's acknowledgement.
pub async fn submit_answers<S, I>(mut stream: S, answers: I) -> Result<Empty>
where
    S: AsyncRead + AsyncWrite + Unpin,
    I: IntoIterator<Item = Answer>,
{
    write_message(&mut stream, &CallRequest::new(CallMethod::SubmitAnswers))
        .await
        .context("Failed to start answer submission")?;

    let mut framed: FramedStream<S, SubmitReply, Answer> = FramedStream::new(stream);
    for answer in answers {
        framed.send(&answer).await.context("Failed to send answer")?;
    }
    framed.finish().await?;

    match framed.recv().await.context("Failed to read acknowledgement")? {
        Some(SubmitReply::Ack(empty)) => Ok(empty),
        Some(SubmitReply::Error(message)) => bail!("server rejected answers: {message}"),
        None => bail!("server closed the stream without acknowledging"),
    }
}
