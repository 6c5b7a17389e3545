//! Token Generator Traits
//!
//! Trait definitions for generators. A generator is the "model" behind a
//! token source: it decides what comes next. The source decides when, owns
//! pacing and cancellation, and hands tokens to the relay.
//!
//! # Design Philosophy
//!
//! The `TokenGenerator` trait keeps generation logic free of any transport or
//! concurrency concerns:
//! - `prepare` receives the prompt once, before the first token
//! - `next_token` yields tokens one at a time until exhausted
//! - errors end the stream as a failure, never as a hang

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use thiserror::Error;

use crate::token::Token;

/// Generation failure raised by a [`TokenGenerator`]
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GenerationError {
    /// The prompt was rejected before generation started
    #[error("invalid prompt: {0}")]
    InvalidPrompt(String),

    /// Generation broke down mid-stream
    #[error("generation failed: {0}")]
    Failed(String),
}

/// Source of ordered tokens
///
/// Implement this trait to plug a different generator into a token source.
#[async_trait]
pub trait TokenGenerator: Send {
    /// Short identifier for logs (e.g., "scripted", "prompt")
    fn name(&self) -> &str;

    /// Called once with the request prompt before the first `next_token`
    async fn prepare(&mut self, _prompt: &str) -> Result<(), GenerationError> {
        Ok(())
    }

    /// Produce the next token, or `None` once the plan is exhausted
    async fn next_token(&mut self) -> Result<Option<Token>, GenerationError>;
}

/// Builds a fresh generator for each session
pub trait GeneratorFactory: Send + Sync {
    /// Create a generator for one session
    fn create(&self) -> Box<dyn TokenGenerator>;
}

impl<F> GeneratorFactory for F
where
    F: Fn() -> Box<dyn TokenGenerator> + Send + Sync,
{
    fn create(&self) -> Box<dyn TokenGenerator> {
        self()
    }
}

/// Inter-token delay applied by a token source
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Pacing {
    /// No delay between tokens
    #[default]
    Immediate,
    /// The same delay before every token after the first
    Fixed(Duration),
    /// A random delay in `base..=base + spread`
    Jitter {
        /// Minimum delay
        base: Duration,
        /// Maximum extra delay added on top of `base`
        spread: Duration,
    },
}

impl Pacing {
    /// Fixed pacing from milliseconds (zero means immediate)
    #[must_use]
    pub fn from_millis(ms: u64) -> Self {
        if ms == 0 {
            Self::Immediate
        } else {
            Self::Fixed(Duration::from_millis(ms))
        }
    }

    /// Delay to wait before the next emission
    #[must_use]
    pub fn next_delay(&self) -> Duration {
        match *self {
            Self::Immediate => Duration::ZERO,
            Self::Fixed(delay) => delay,
            Self::Jitter { base, spread } => {
                let extra_ms = u64::try_from(spread.as_millis()).unwrap_or(u64::MAX);
                let extra = rand::thread_rng().gen_range(0..=extra_ms);
                base + Duration::from_millis(extra)
            }
        }
    }
}
