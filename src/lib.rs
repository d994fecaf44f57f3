//! # mailsift - a local delivery agent with a processor pipeline
//!
//! This crate provides both a library as well as a standalone binary that an
//! MTA invokes once per incoming mail. The message is handed through an
//! ordered list of [`Processor`]s (spam filter, report scrapers, Maildir++
//! delivery, a backup as last resort) until one of them consumes it.
//!
//! Spam verdicts and folder names come from rule scripts. The bundled
//! evaluator reads them as JSON files, example rule file:
//! ```json
//! [{
//!     "name": "lottery",
//!     "desc": "Nobody wins like that",
//!     "rules": [
//!         {"@subject": "WIN MONEY",
//!          "@from-domain": ["example\\.com", "example\\.org"]},
//!         {"X-Spam-Flag": "^YES$"}
//!     ],
//!     "result": {"status": "spam", "rule": "lottery"}
//! }]
//! ```
//!
//! [`Processor`]: processor/trait.Processor.html

use serde::{Deserialize, Serialize};

pub mod config;
pub mod deliver;
pub mod error;
pub mod evaluator;
pub mod filter;
pub mod maildir;
pub mod message;
pub mod metrics;
pub mod pipeline;
pub mod processor;
pub mod spam;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use error::{Error, Result};
pub use evaluator::{Evaluator, RuleEvaluator};
pub use filter::Filter;
pub use message::Message;
pub use metrics::{Metrics, MetricsFile};
pub use pipeline::Verdict;
pub use processor::{Outcome, Processor};

/// To make the `.json` files more legible in case they are hand-crafted,
/// provide different options for the same fields when it makes sense for them
/// to be flexible.
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
#[serde(untagged)]
pub enum Value {
    Single(String),
    Multiple(Vec<String>),
    Bool(bool),
}
