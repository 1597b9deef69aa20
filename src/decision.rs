//! Operator confirmations
//!
//! Registry and checkpoint code never read from the terminal directly; they
//! ask a [`Decision`]. The default asks on the terminal, headless callers and
//! tests substitute [`Fixed`] or [`Scripted`].

use std::collections::VecDeque;

use dialoguer::Confirm;
use tracing::{info, warn};

/// Source of yes/no answers for interactive confirmations
#[cfg_attr(test, mockall::automock)]
pub trait Decision {
    /// Ask the operator; `default` is the answer an empty reply means
    fn confirm(&mut self, prompt: &str, default: bool) -> bool;
}

/// Ask on the controlling terminal
#[derive(Debug, Default, Clone, Copy)]
pub struct Terminal;

impl Decision for Terminal {
    fn confirm(&mut self, prompt: &str, default: bool) -> bool {
        match Confirm::new().with_prompt(prompt).default(default).interact() {
            Ok(answer) => answer,
            Err(e) => {
                // No terminal to ask; refuse rather than guess.
                warn!("Could not read confirmation ({}): treating as no", e);
                false
            }
        }
    }
}

/// Always give the same answer
#[derive(Debug, Clone, Copy)]
pub struct Fixed(pub bool);

impl Decision for Fixed {
    fn confirm(&mut self, prompt: &str, _default: bool) -> bool {
        info!("{} -> {}", prompt, if self.0 { "yes" } else { "no" });
        self.0
    }
}

/// Replay a fixed sequence of answers and record every prompt.
///
/// Once the answers run out every further prompt is declined.
#[derive(Debug, Default, Clone)]
pub struct Scripted {
    answers: VecDeque<bool>,
    prompts: Vec<String>,
}

impl Scripted {
    /// Create a script from answers in the order they will be asked
    pub fn new(answers: impl IntoIterator<Item = bool>) -> Self {
        Self {
            answers: answers.into_iter().collect(),
            prompts: Vec::new(),
        }
    }

    /// Every prompt seen so far
    pub fn prompts(&self) -> &[String] {
        &self.prompts
    }
}

impl Decision for Scripted {
    fn confirm(&mut self, prompt: &str, _default: bool) -> bool {
        self.prompts.push(prompt.to_string());
        self.answers.pop_front().unwrap_or(false)
    }
}

impl<D: Decision + ?Sized> Decision for Box<D> {
    fn confirm(&mut self, prompt: &str, default: bool) -> bool {
        (**self).confirm(prompt, default)
    }
}

impl<D: Decision + ?Sized> Decision for &mut D {
    fn confirm(&mut self, prompt: &str, default: bool) -> bool {
        (**self).confirm(prompt, default)
    }
}
