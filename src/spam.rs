//! Turning rule script results into spam verdicts

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::*;
use crate::evaluator::Evaluator;
use crate::message::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    Spam,
    MaybeSpam,
    Ham,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Spam => "spam",
            Status::MaybeSpam => "maybe-spam",
            Status::Ham => "ham",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub status: Status,
    /// Name of the rule that decided, may be empty
    #[serde(default)]
    pub rule: String,
}

impl Verdict {
    /// Value of the `X-LDA-Antispam` annotation
    pub fn header_value(&self) -> String {
        format!("status:{},rule:{}", self.status, self.rule)
    }
}

/// Anything that isn't `{status, rule?}` with a known status is no opinion
pub fn parse_verdict(value: Option<Value>) -> Option<Verdict> {
    serde_json::from_value(value?).ok()
}

/// Runs the spam script against the message
pub fn check(evaluator: &dyn Evaluator, script: &Path, msg: &Message) -> Result<Option<Verdict>> {
    let doc = msg.to_document()?;
    let result = evaluator.evaluate(script, &doc, &Map::new())?;
    Ok(parse_verdict(result))
}
