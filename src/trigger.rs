//! The process-or-ignore decision for a single message.
//!
//! A message is processed only if all of the following hold, checked in order:
//!
//! 1. it has a subject,
//! 2. it has a `From` value containing an address,
//! 3. the subject matches the trigger,
//! 4. the sender address is on the allow-list.
//!
//! Anything else is an [`Action::Ignore`] with the first failed check as the
//! reason. Evaluation never fails.
//!
//! ```
//! use report_bot::allow_list::AllowList;
//! use report_bot::gateway::InboundMessage;
//! use report_bot::trigger::{evaluate, Action};
//!
//! let allowed: AllowList = ["a@b.com"].into_iter().collect();
//! let message = InboundMessage::new("m1")
//!     .with_subject("Please GENERATE REPORT now")
//!     .with_sender("Jane <a@b.com>");
//!
//! assert_eq!(
//!     evaluate(&message, &allowed),
//!     Action::Process { sender: "a@b.com".into() }
//! );
//! ```

use crate::allow_list::AllowList;
use crate::gateway::InboundMessage;
use crate::matcher::{Matcher, PhraseMatcher};
use crate::parser::extract_email_address;

/// What to do with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Run the report pipeline for `sender` (normalized address).
    Process {
        /// Address to send the report to.
        sender: String,
    },
    /// Leave the message alone.
    Ignore(IgnoreReason),
}

impl Action {
    /// Returns `true` for [`Action::Process`].
    #[must_use]
    pub fn is_process(&self) -> bool {
        matches!(self, Action::Process { .. })
    }
}

/// Why a message was ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// No `Subject` header.
    MissingSubject,
    /// No `From` header, or no address in it.
    MissingSender,
    /// Subject does not contain the trigger.
    NoTrigger,
    /// Sender is not on the allow-list.
    NotAuthorized,
}

impl std::fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IgnoreReason::MissingSubject => write!(f, "missing subject"),
            IgnoreReason::MissingSender => write!(f, "missing sender"),
            IgnoreReason::NoTrigger => write!(f, "no trigger phrase"),
            IgnoreReason::NotAuthorized => write!(f, "sender not authorized"),
        }
    }
}

/// Evaluates messages against a trigger [`Matcher`].
pub struct TriggerEvaluator {
    matcher: Box<dyn Matcher>,
}

impl TriggerEvaluator {
    /// Creates an evaluator using `matcher` as the trigger.
    #[must_use]
    pub fn new(matcher: impl Matcher + 'static) -> Self {
        Self {
            matcher: Box::new(matcher),
        }
    }

    /// Creates an evaluator for a case-insensitive trigger phrase.
    #[must_use]
    pub fn phrase(phrase: impl Into<String>) -> Self {
        Self::new(PhraseMatcher::new(phrase))
    }

    /// Returns the trigger's description.
    #[must_use]
    pub fn description(&self) -> &str {
        self.matcher.description()
    }

    /// Decides whether `message` should be processed.
    #[must_use]
    pub fn evaluate(&self, message: &InboundMessage, allowed: &AllowList) -> Action {
        let Some(subject) = message.subject.as_deref() else {
            return Action::Ignore(IgnoreReason::MissingSubject);
        };
        let Some(sender) = message.sender.as_deref().and_then(extract_email_address) else {
            return Action::Ignore(IgnoreReason::MissingSender);
        };
        if !self.matcher.is_match(subject) {
            return Action::Ignore(IgnoreReason::NoTrigger);
        }
        if !allowed.contains(&sender) {
            return Action::Ignore(IgnoreReason::NotAuthorized);
        }
        Action::Process { sender }
    }
}

impl Default for TriggerEvaluator {
    fn default() -> Self {
        Self::new(PhraseMatcher::default())
    }
}

impl std::fmt::Debug for TriggerEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerEvaluator")
            .field("matcher", &self.matcher.description())
            .finish()
    }
}

/// Evaluates `message` against the default `generate report` trigger.
#[must_use]
pub fn evaluate(message: &InboundMessage, allowed: &AllowList) -> Action {
    TriggerEvaluator::default().evaluate(message, allowed)
}
