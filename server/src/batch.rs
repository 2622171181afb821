use std::collections::BTreeMap;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::time;
use tracing::{info, warn};

use shared::prelude::*;

/// Fixed, ordered questions served by the `stream_questions` call.
#[derive(Debug, Clone)]
pub struct QuestionBank {
    questions: Vec<Question>,
    delay: Duration,
}

impl QuestionBank {
    pub fn new(questions: Vec<Question>, delay: Duration) -> Self {
        Self { questions, delay }
    }

    /// Build the bank from configuration, timestamping every question now.
    pub fn from_config(config: &BatchConfig) -> Self {
        let created = current_secs();
        let questions = config
            .questions
            .iter()
            .map(|seed| Question {
                id: seed.id.clone(),
                text: seed.text.clone(),
                timestamp: created,
            })
            .collect();
        Self::new(questions, config.question_delay())
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    /// Write every question in order, pausing between consecutive items, then
    /// half-close the writer.
    pub async fn stream_to<W>(&self, writer: &mut W) -> Result<usize, FrameError>
    where
        W: AsyncWrite + Unpin,
    {
        for (index, question) in self.questions.iter().enumerate() {
            if index > 0 && !self.delay.is_zero() {
                time::sleep(self.delay).await;
            }
            write_message(writer, question).await?;
            info!(question = %question.id, "question streamed");
        }
        writer.shutdown().await?;
        Ok(self.questions.len())
    }
}

/// Submitted answers keyed by `(student_id, question_id)`, each list in
/// submission order.
#[derive(Default)]
pub struct AnswerStore {
    answers: RwLock<BTreeMap<(String, String), Vec<Answer>>>,
}

impl AnswerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, answer: Answer) {
        let key = (answer.student_id.clone(), answer.question_id.clone());
        self.answers.write().entry(key).or_default().push(answer);
    }

    pub fn answers_for(&self, student_id: &str, question_id: &str) -> Vec<Answer> {
        self.answers
            .read()
            .get(&(student_id.to_string(), question_id.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    /// Every answer, ordered by student then question.
    pub fn all(&self) -> Vec<Answer> {
        self.answers.read().values().flatten().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.answers.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.answers.read().is_empty()
    }

    /// Drain a client stream of answers and send the closing acknowledgement.
    /// Returns how many answers were recorded.
    pub async fn collect_from<R, W>(&self, reader: &mut R, writer: &mut W) -> Result<usize, FrameError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut recorded = 0;
        loop {
            match read_frame::<_, Answer>(reader).await {
                Ok(Some(answer)) => {
                    info!(
                        student = %answer.student_id,
                        question = %answer.question_id,
                        answer = %answer.answer_text,
                        "answer submitted"
                    );
                    self.record(answer);
                    recorded += 1;
                }
                Ok(None) => break,
                Err(FrameError::Malformed(err)) => {
                    warn!(%err, recorded, "rejecting malformed answer");
                    write_message(writer, &SubmitReply::Error(format!("malformed answer: {err}")))
                        .await?;
                    writer.shutdown().await?;
                    return Err(FrameError::Malformed(err));
                }
                Err(err) => return Err(err),
            }
        }

        write_message(writer, &SubmitReply::Ack(Empty::default())).await?;
        writer.shutdown().await?;
        Ok(recorded)
    }
}
