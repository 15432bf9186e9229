// Answer composition
// Turns a question plus conversation history into a grounded chat completion


use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::chat::{ChatMessage, ChatModel, Role};
use crate::config::Config;
use crate::database::lancedb::SearchResult;
use crate::retrieval::ContextRetriever;
use crate::Result;

const CONTEXT_PLACEHOLDER: &str = "{context}";
const CONTEXT_SEPARATOR: &str = "\n\n";

/// One prior message of a conversation as supplied by a chat front end
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: MessageContent,
}

/// Either a bare string or a list of typed parts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    /// Images and any other part kind; dropped when flattening
    #[serde(other)]
    Unsupported,
}

impl MessageContent {
    /// Text parts joined by a single space; other parts are ignored
    #[inline]
    pub fn to_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::Unsupported => None,
                })
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

impl ConversationTurn {
    #[inline]
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    #[inline]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
        }
    }

    #[inline]
    pub fn to_message(&self) -> ChatMessage {
        ChatMessage {
            role: self.role,
            content: self.content.to_text(),
        }
    }
}

/// Flatten every turn to plain text, keeping order and roles
#[inline]
pub fn normalize(history: &[ConversationTurn]) -> Vec<ChatMessage> {
    history.iter().map(ConversationTurn::to_message).collect()
}

/// Prior user texts followed by the question, one per line
#[inline]
pub fn combined_question(history: &[ChatMessage], question: &str) -> String {
    history
        .iter()
        .filter(|message| message.role == Role::User)
        .map(|message| message.content.as_str())
        .chain(std::iter::once(question))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Chunk texts in retrieval order, separated by a blank line
#[inline]
pub fn context_block(chunks: &[SearchResult]) -> String {
    chunks
        .iter()
        .map(|chunk| chunk.chunk_metadata.content.as_str())
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR)
}

#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    /// Chunks the answer was grounded on, nearest first
    pub context: Vec<SearchResult>,
}

pub struct AnswerComposer {
    retriever: Arc<dyn ContextRetriever>,
    chat: Arc<dyn ChatModel>,
    system_prompt: String,
}

impl AnswerComposer {
    /// `system_prompt` may contain `{context}`, which is replaced by the
    /// retrieved text. Without it the context is appended.
    #[inline]
    pub fn new(
        retriever: Arc<dyn ContextRetriever>,
        chat: Arc<dyn ChatModel>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            retriever,
            chat,
            system_prompt: system_prompt.into(),
        }
    }

    #[inline]
    pub fn from_config(
        config: &Config,
        retriever: Arc<dyn ContextRetriever>,
        chat: Arc<dyn ChatModel>,
    ) -> Self {
        Self::new(retriever, chat, config.chat.system_prompt.clone())
    }

    #[inline]
    pub fn system_message(&self, context: &str) -> ChatMessage {
        let content = if self.system_prompt.contains(CONTEXT_PLACEHOLDER) {
            self.system_prompt.replace(CONTEXT_PLACEHOLDER, context)
        } else {
            format!("{}{}{}", self.system_prompt, CONTEXT_SEPARATOR, context)
        };
        ChatMessage::system(content)
    }

    /// Answer `question` given the earlier turns of the conversation
    #[inline]
    pub async fn answer(&self, question: &str, history: &[ConversationTurn]) -> Result<Answer> {
        let history = normalize(history);
        let query = combined_question(&history, question);
        debug!("Combined retrieval query spans {} lines", query.lines().count());

        let context = self.retriever.retrieve(&query).await?;
        let context_text = context_block(&context);

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(self.system_message(&context_text));
        messages.extend(history);
        messages.push(ChatMessage::user(question));

        info!(
            "Answering with {} context chunks via {}",
            context.len(),
            self.chat.model_name()
        );
        let text = self.chat.complete(&messages)?;

        Ok(Answer { text, context })
    }
}
