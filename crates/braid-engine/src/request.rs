use braid_ids::SignedId;
use braid_types::TriggerKind;

/// A submit/edit/regenerate request, after authentication.
///
/// Client-proposed message ids arrive as signed pairs and are verified
/// before any write; `target_message_id` names the message being edited or
/// regenerated and refers to an id already in the store.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub user_id: String,
    /// Absent on the first message of a fresh thread; the orchestrator
    /// mints one.
    pub thread_id: Option<String>,
    /// Session id of the submitting client, recorded on the thread so other
    /// sessions know the stream is not theirs.
    pub client_id: Option<String>,
    pub trigger: TriggerKind,
    /// Overrides the thread's model for this generation only; the thread's
    /// stored settings are left as they are.
    pub model: Option<String>,
    /// New user message text; required for submit and edit.
    pub text: Option<String>,
    pub user_message_id: Option<SignedId>,
    pub assistant_message_id: Option<SignedId>,
    pub target_message_id: Option<String>,
}

impl CompletionRequest {
    pub fn submit(user_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            thread_id: None,
            client_id: None,
            trigger: TriggerKind::SubmitMessage,
            model: None,
            text: Some(text.into()),
            user_message_id: None,
            assistant_message_id: None,
            target_message_id: None,
        }
    }

    pub fn thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn client(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }
}
