use shared::prelude::*;

/// Decides whether an inbound relay message gets a reply, and what it says.
pub trait ReactionRule: Send + Sync {
    fn matches(&self, message: &QuizMessage) -> bool;

    /// Build the reply for a message accepted by [`ReactionRule::matches`].
    /// The relay stamps sender, correlation ids and timestamp afterwards.
    fn respond(&self, trigger: &QuizMessage) -> QuizMessage;
}

/// Identity the relay uses for every synthesized reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemIdentity {
    pub sender_id: String,
    pub sender_role: String,
}

impl SystemIdentity {
    pub fn new(sender_id: impl Into<String>, sender_role: impl Into<String>) -> Self {
        Self {
            sender_id: sender_id.into(),
            sender_role: sender_role.into(),
        }
    }

    /// Overwrite the reply's sender, copy correlation ids from the trigger and
    /// timestamp it now.
    pub fn stamp(&self, mut reply: QuizMessage, trigger: &QuizMessage) -> QuizMessage {
        reply.sender_id = self.sender_id.clone();
        reply.sender_role = self.sender_role.clone();
        reply.question_id = trigger.question_id.clone();
        reply.quiz_id = trigger.quiz_id.clone();
        reply.timestamp = current_secs();
        reply
    }
}

impl Default for SystemIdentity {
    fn default() -> Self {
        Self::new(roles::SYSTEM, roles::SYSTEM)
    }
}

impl From<&ReactionConfig> for SystemIdentity {
    fn from(config: &ReactionConfig) -> Self {
        Self::new(&config.system_sender_id, &config.system_role)
    }
}

/// Rule keyed on `(type, sender_role)` that replies from a text template.
#[derive(Debug, Clone)]
pub struct TemplateRule {
    trigger_type: MessageType,
    trigger_role: String,
    reply_type: MessageType,
    reply_template: String,
}

impl TemplateRule {
    pub fn new(
        trigger_type: MessageType,
        trigger_role: impl Into<String>,
        reply_type: MessageType,
        reply_template: impl Into<String>,
    ) -> Self {
        Self {
            trigger_type,
            trigger_role: trigger_role.into(),
            reply_type,
            reply_template: reply_template.into(),
        }
    }

    pub fn from_config(config: &ReactionConfig) -> Self {
        let config = config.resolved();
        Self::new(
            config.trigger_type,
            config.trigger_role,
            config.reply_type,
            config.reply_template,
        )
    }
}

impl ReactionRule for TemplateRule {
    fn matches(&self, message: &QuizMessage) -> bool {
        message.kind == self.trigger_type && message.sender_role == self.trigger_role
    }

    fn respond(&self, trigger: &QuizMessage) -> QuizMessage {
        let content = render_template(
            &self.reply_template,
            &[
                ("sender_id", trigger.sender_id.as_str()),
                ("sender_role", trigger.sender_role.as_str()),
                ("question_id", trigger.question_id.as_str()),
                ("quiz_id", trigger.quiz_id.as_str()),
                ("content", trigger.content.as_str()),
            ],
        );
        QuizMessage::new(self.reply_type, "", "").with_content(content)
    }
}

/// Rule assembled from a predicate and a responder closure.
pub struct FnRule<P, F> {
    predicate: P,
    responder: F,
}

impl<P, F> FnRule<P, F>
where
    P: Fn(&QuizMessage) -> bool + Send + Sync,
    F: Fn(&QuizMessage) -> QuizMessage + Send + Sync,
{
    pub fn new(predicate: P, responder: F) -> Self {
        Self {
            predicate,
            responder,
        }
    }
}

impl<P, F> ReactionRule for FnRule<P, F>
where
    P: Fn(&QuizMessage) -> bool + Send + Sync,
    F: Fn(&QuizMessage) -> QuizMessage + Send + Sync,
{
    fn matches(&self, message: &QuizMessage) -> bool {
        (self.predicate)(message)
    }

    fn respond(&self, trigger: &QuizMessage) -> QuizMessage {
        (self.responder)(trigger)
    }
}
