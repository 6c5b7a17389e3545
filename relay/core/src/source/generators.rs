//! Built-in Generators
//!
//! - [`ScriptedGenerator`]: replays a fixed list of fragments
//! - [`MessageGenerator`]: numbered, timestamped [`MessageRecord`]s
//! - [`PromptGenerator`]: echoes the prompt, then walks a fixed vocabulary

use std::collections::VecDeque;

use async_trait::async_trait;

use super::traits::{GenerationError, TokenGenerator};
use crate::token::{MessageRecord, Token};

/// Lines streamed by the plain-text endpoint
pub const TEXT_STREAM_LINES: &[&str] = &[
    "Starting text stream...\n",
    "This is the first line of text\n",
    "This is the second line of text\n",
    "Processing data...\n",
    "Data 1: done\n",
    "Data 2: done\n",
    "Data 3: done\n",
    "All data processed\n",
    "Text stream finished\n",
];

/// Vocabulary the pipeline generator walks after echoing the prompt
pub const PIPELINE_VOCABULARY: &[&str] = &[
    "Streaming",
    " output",
    " arrives",
    " one",
    " token",
    " at",
    " a",
    " time",
    ",",
    " produced",
    " independently",
    " of",
    " the",
    " network",
    " and",
    " relayed",
    " through",
    " a",
    " bounded",
    " buffer",
    ".",
];

/// Replays a fixed list of tokens in order
#[derive(Clone, Debug)]
pub struct ScriptedGenerator {
    remaining: VecDeque<Token>,
    fail_at: Option<usize>,
    emitted: usize,
}

impl ScriptedGenerator {
    /// Create a generator over the given fragments
    pub fn new<I, T>(tokens: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Token>,
    {
        Self {
            remaining: tokens.into_iter().map(Into::into).collect(),
            fail_at: None,
            emitted: 0,
        }
    }

    /// Fail with [`GenerationError::Failed`] instead of producing token `index`
    #[must_use]
    pub fn failing_at(mut self, index: usize) -> Self {
        self.fail_at = Some(index);
        self
    }
}

#[async_trait]
impl TokenGenerator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn next_token(&mut self) -> Result<Option<Token>, GenerationError> {
        if self.fail_at == Some(self.emitted) {
            return Err(GenerationError::Failed(format!(
                "scripted failure at token {}",
                self.emitted
            )));
        }
        let next = self.remaining.pop_front();
        if next.is_some() {
            self.emitted += 1;
        }
        Ok(next)
    }
}

/// Produces `count` numbered message records
///
/// The content template's `{n}` placeholder is replaced with the record id.
#[derive(Clone, Debug)]
pub struct MessageGenerator {
    template: String,
    count: u32,
    next_id: u32,
}

impl MessageGenerator {
    /// Create a generator for `count` records
    pub fn new(template: impl Into<String>, count: u32) -> Self {
        Self {
            template: template.into(),
            count,
            next_id: 1,
        }
    }
}

#[async_trait]
impl TokenGenerator for MessageGenerator {
    fn name(&self) -> &str {
        "messages"
    }

    async fn next_token(&mut self) -> Result<Option<Token>, GenerationError> {
        if self.next_id > self.count {
            return Ok(None);
        }
        let id = self.next_id;
        self.next_id += 1;

        let record = MessageRecord::now(id, self.template.replace("{n}", &id.to_string()));
        Token::record(&record)
            .map(Some)
            .map_err(|e| GenerationError::Failed(e.to_string()))
    }
}

/// Pipeline generator: echoes the prompt, then emits the vocabulary
#[derive(Clone, Debug, Default)]
pub struct PromptGenerator {
    plan: VecDeque<String>,
}

impl PromptGenerator {
    /// Create an unprepared generator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenGenerator for PromptGenerator {
    fn name(&self) -> &str {
        "prompt"
    }

    async fn prepare(&mut self, prompt: &str) -> Result<(), GenerationError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(GenerationError::InvalidPrompt("prompt is empty".into()));
        }

        self.plan.clear();
        self.plan.push_back("Prompt: ".to_string());
        self.plan.push_back(prompt.to_string());
        self.plan.push_back("\n".to_string());
        self.plan
            .extend(PIPELINE_VOCABULARY.iter().map(|word| (*word).to_string()));
        Ok(())
    }

    async fn next_token(&mut self) -> Result<Option<Token>, GenerationError> {
        Ok(self.plan.pop_front().map(Token::Text))
    }
}
