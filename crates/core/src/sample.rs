//! Chat-format samples assembled from lineage chains.

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, SampleError};
use crate::extract::PostMapping;
use crate::lineage::Chain;
use crate::normalize::{char_len, truncate_chars};
use crate::{
    DEFAULT_SYSTEM_PROMPT, MAX_CHAINS_PER_FIRST_USER, MAX_CONTEXT_CHARS, MAX_CONTEXT_DEPTH,
    MAX_RESPONSE_CHARS, MIN_CONTEXT_CHARS, MIN_RESPONSE_CHARS,
};

/// Tuning knobs for sample construction. Passed explicitly, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScrapeConfig {
    /// Ancestors walked above each leaf.
    pub max_depth: usize,
    /// Minimum characters across the context turns.
    pub min_context_chars: usize,
    /// Minimum characters in the leaf post for it to seed a sample.
    pub min_response_chars: usize,
    pub max_context_chars: usize,
    pub max_response_chars: usize,
    /// Samples kept per distinct opening user message within one thread.
    pub max_chains_per_first_user: usize,
    pub system_prompt: String,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            max_depth: MAX_CONTEXT_DEPTH,
            min_context_chars: MIN_CONTEXT_CHARS,
            min_response_chars: MIN_RESPONSE_CHARS,
            max_context_chars: MAX_CONTEXT_CHARS,
            max_response_chars: MAX_RESPONSE_CHARS,
            max_chains_per_first_user: MAX_CHAINS_PER_FIRST_USER,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

impl ScrapeConfig {
    /// Reject values that would silently produce an empty corpus.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_chains_per_first_user == 0 {
            return Err(ConfigError::ZeroDiversityCap);
        }
        if self.max_depth == 0 {
            return Err(ConfigError::ZeroDepth);
        }
        if self.max_response_chars == 0 {
            return Err(ConfigError::ZeroResponseCap);
        }
        Ok(())
    }

    /// Longest chain walked from a leaf: the ancestors plus the leaf itself.
    pub fn max_chain_len(&self) -> usize {
        self.max_depth + 1
    }

    /// Character budget for a whole chain before it gets trimmed.
    pub fn chain_char_budget(&self) -> usize {
        self.max_context_chars + self.max_response_chars
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A single message in a sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// One training example: a system message, then strictly alternating
/// user/assistant turns ending on assistant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sample {
    messages: Vec<ChatMessage>,
}

impl Sample {
    /// Validate a message list against the sample shape.
    pub fn from_messages(messages: Vec<ChatMessage>) -> Result<Self, SampleError> {
        if messages.len() < 3 {
            return Err(SampleError::TooShort(messages.len()));
        }
        for (index, message) in messages.iter().enumerate() {
            let expected = match index {
                0 => Role::System,
                i if i % 2 == 1 => Role::User,
                _ => Role::Assistant,
            };
            if message.role != expected {
                return Err(SampleError::WrongRole {
                    index,
                    expected: expected.as_str(),
                    found: message.role.as_str(),
                });
            }
        }
        // Odd positions are user turns, so an even length ends on a user
        if messages.len() % 2 == 0 {
            return Err(SampleError::WrongRole {
                index: messages.len() - 1,
                expected: Role::Assistant.as_str(),
                found: Role::User.as_str(),
            });
        }
        Ok(Self { messages })
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Content of the opening user turn.
    pub fn first_user_content(&self) -> &str {
        &self.messages[1].content
    }

    pub fn char_count(&self) -> usize {
        self.messages.iter().map(|m| char_len(&m.content)).sum()
    }
}

/// Turn a chain into a sample, or `None` when it falls short of the policy.
///
/// Chain entries alternate user/assistant starting from user. A trailing user
/// turn is dropped, the final assistant turn is capped at `max_response_chars`,
/// and then the context turns (everything between the system message and the
/// final turn) must reach `min_context_chars`.
pub fn assemble_sample(chain: &Chain, posts: &PostMapping, config: &ScrapeConfig) -> Option<Sample> {
    let mut messages = Vec::with_capacity(chain.len() + 1);
    messages.push(ChatMessage::system(config.system_prompt.clone()));

    for (i, id) in chain.iter().enumerate() {
        let content = posts.get(id).map(|p| p.text.trim()).unwrap_or("");
        messages.push(if i % 2 == 0 {
            ChatMessage::user(content)
        } else {
            ChatMessage::assistant(content)
        });
    }

    if messages.last().is_some_and(|m| m.role == Role::User) {
        messages.pop();
    }
    if messages.len() < 3 {
        return None;
    }

    let last = messages.len() - 1;
    if char_len(&messages[last].content) > config.max_response_chars {
        messages[last].content = truncate_chars(&messages[last].content, config.max_response_chars);
    }

    let context_chars: usize = messages[1..last].iter().map(|m| char_len(&m.content)).sum();
    if context_chars < config.min_context_chars {
        return None;
    }

    Some(Sample { messages })
}
