use crate::embeddings::Embedder;
use crate::llm::{ChatMessage, ChatModel};
use crate::models::{
    Answer, CollectionCheck, CollectionSpec, ConversationTurn, RetrievedChunk, SourceRef,
    DEFAULT_TOP_K,
};
use crate::session::{ConversationHistory, SessionStore};
use crate::traits::{CollectionState, VectorIndex};
use crate::RagError;
use chrono::Utc;
use std::collections::HashSet;
use tracing::{debug, info};

pub const NOT_FOUND_SENTINEL: &str = "Not found in context.";
pub const ANSWER_INSTRUCTION: &str =
    "Answer strictly based on the documents. If answer is not available, say 'Not found in context.'";

const CONTEXT_PROMPT: &str = "Use the following pieces of context to answer the user's question. \
If you don't know the answer, just say that you don't know, don't try to make up an answer.";

const CONDENSE_PROMPT: &str = "Given the conversation so far and a follow up question, rephrase the \
follow up question to be a standalone question, in its original language. Reply with the question only.";

#[derive(Debug, Clone)]
pub struct ConversationOptions {
    pub top_k: usize,
    /// Collapse sources sharing (file, page). Off by default: one entry per
    /// retrieved chunk.
    pub dedupe_sources: bool,
    /// Rewrite follow-up questions into standalone ones before retrieval.
    pub condense_follow_ups: bool,
}

impl Default for ConversationOptions {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            dedupe_sources: false,
            condense_follow_ups: false,
        }
    }
}

pub fn wrap_question(question: &str) -> String {
    format!("{ANSWER_INSTRUCTION}\n\n{question}")
}

/// System message with the retrieved context, prior turns, then the wrapped
/// question.
pub fn build_messages(
    history: &ConversationHistory,
    context: &[RetrievedChunk],
    question: &str,
) -> Vec<ChatMessage> {
    let context_text = context
        .iter()
        .map(|hit| hit.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    let mut messages = Vec::with_capacity(history.turns().len() * 2 + 2);
    messages.push(ChatMessage::system(format!(
        "{CONTEXT_PROMPT}\n----------------\n{context_text}"
    )));
    messages.extend(history.to_messages());
    messages.push(ChatMessage::user(wrap_question(question)));
    messages
}

fn collect_sources(hits: &[RetrievedChunk], dedupe: bool) -> Vec<SourceRef> {
    let sources = hits.iter().map(SourceRef::from_hit);
    if !dedupe {
        return sources.collect();
    }

    let mut seen = HashSet::new();
    sources.filter(|source| seen.insert(source.clone())).collect()
}

pub struct ConversationEngine<E, V, L> {
    embedder: E,
    store: V,
    llm: L,
    sessions: SessionStore,
    options: ConversationOptions,
}

impl<E, V, L> ConversationEngine<E, V, L>
where
    E: Embedder,
    V: VectorIndex,
    L: ChatModel,
{
    pub fn new(embedder: E, store: V, llm: L) -> Self {
        Self {
            embedder,
            store,
            llm,
            sessions: SessionStore::new(),
            options: ConversationOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ConversationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_sessions(mut self, sessions: SessionStore) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Creates the collection when it is missing, so questions against an
    /// empty index get an answer with no sources instead of a store error.
    pub async fn ensure_collection(
        &self,
        collection: &CollectionSpec,
        check: CollectionCheck,
    ) -> Result<CollectionState, RagError> {
        let state = self
            .store
            .ensure_collection(collection.dimensions, collection.distance, check)
            .await
            .map_err(RagError::VectorStore)?;
        info!(collection = %collection.name, ?state, "collection ready");
        Ok(state)
    }

    /// Retrieves context for `question`, asks the model and records the turn
    /// in the session's history. Each call makes at least three outbound
    /// requests (embedding, search, completion), any of which may fail.
    pub async fn ask(&self, session_id: &str, question: &str) -> Result<Answer, RagError> {
        if question.trim().is_empty() {
            return Err(RagError::EmptyQuestion);
        }

        let history = self.sessions.history(session_id).await;
        let retrieval_query = if self.options.condense_follow_ups && !history.is_empty() {
            self.condense(&history, question).await?
        } else {
            question.to_string()
        };

        let vector = self
            .embedder
            .embed_query(&retrieval_query)
            .await
            .map_err(RagError::Embedding)?;
        let hits = self
            .store
            .query(&vector, self.options.top_k)
            .await
            .map_err(RagError::VectorStore)?;
        debug!(session = session_id, hits = hits.len(), "retrieved context");

        let messages = build_messages(&history, &hits, question);
        let answer = self.llm.complete(&messages).await.map_err(RagError::Llm)?;
        let sources = collect_sources(&hits, self.options.dedupe_sources);

        self.sessions
            .append(
                session_id,
                ConversationTurn {
                    question: question.to_string(),
                    answer: answer.clone(),
                    source_documents: hits,
                    asked_at: Utc::now(),
                },
            )
            .await;

        Ok(Answer {
            answer,
            sources,
            question: question.to_string(),
        })
    }

    pub async fn clear(&self, session_id: &str) {
        self.sessions.clear(session_id).await;
        info!(session = session_id, "conversation cleared");
    }

    async fn condense(
        &self,
        history: &ConversationHistory,
        question: &str,
    ) -> Result<String, RagError> {
        let mut messages = vec![ChatMessage::system(CONDENSE_PROMPT)];
        messages.extend(history.to_messages());
        messages.push(ChatMessage::user(question));

        let standalone = self.llm.complete(&messages).await.map_err(RagError::Llm)?;
        let standalone = standalone.trim();
        Ok(if standalone.is_empty() {
            question.to_string()
        } else {
            standalone.to_string()
        })
    }
}
