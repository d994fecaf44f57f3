//! The capability rule-driven processors depend on.
//!
//! A processor hands a script path, the message document and a few extra
//! bindings to an [`Evaluator`] and interprets whatever comes back. The
//! bundled [`RuleEvaluator`] reads scripts as JSON filter files, see
//! [`Filter`].
//!
//! [`Evaluator`]: trait.Evaluator.html
//! [`RuleEvaluator`]: struct.RuleEvaluator.html
//! [`Filter`]: ../filter/struct.Filter.html

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use log::debug;
use regex::Regex;
use serde_json::{Map, Value};

use crate::error::Error::*;
use crate::error::*;
use crate::filter::{filters_from_file, Filter};
use crate::message::canonical_key;

pub trait Evaluator {
    /// Runs the script at `script` against `doc`. `Ok(None)` means the script
    /// had no opinion, which includes empty scripts.
    fn evaluate(
        &self,
        script: &Path,
        doc: &Value,
        bindings: &Map<String, Value>,
    ) -> Result<Option<Value>>;
}

/// Evaluates JSON filter files. Compiled scripts are cached per path for the
/// lifetime of the evaluator.
#[derive(Default)]
pub struct RuleEvaluator {
    cache: RefCell<HashMap<PathBuf, Rc<Vec<Filter>>>>,
}

impl RuleEvaluator {
    pub fn new() -> Self {
        Default::default()
    }

    fn load(&self, script: &Path) -> Result<Rc<Vec<Filter>>> {
        if let Some(filters) = self.cache.borrow().get(script) {
            return Ok(Rc::clone(filters));
        }

        let filters = filters_from_file(script)
            .map_err(|e| ScriptError(script.display().to_string(), e.to_string()))?;
        debug!(
            "Compiled {} filter(s) from {}",
            filters.len(),
            script.display()
        );

        let filters = Rc::new(filters);
        self.cache
            .borrow_mut()
            .insert(script.to_path_buf(), Rc::clone(&filters));
        Ok(filters)
    }
}

impl Evaluator for RuleEvaluator {
    fn evaluate(
        &self,
        script: &Path,
        doc: &Value,
        bindings: &Map<String, Value>,
    ) -> Result<Option<Value>> {
        let filters = self.load(script)?;
        for filter in filters.iter() {
            if filter.is_match(doc, bindings)? {
                debug!("Filter {} matched", filter.name());
                return Ok(filter.result().cloned());
            }
        }
        Ok(None)
    }
}

fn address_of(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) => Some(s),
        Value::Object(o) => o.get("address").and_then(Value::as_str),
        _ => None,
    }
}

/// Domain part of an address, given either as a string or as an
/// `{address}` object
pub fn domain(value: &Value) -> Option<String> {
    let address = address_of(value)?;
    address
        .rsplit_once('@')
        .map(|(_, domain)| domain.to_string())
}

/// Local part of an address. A string without `@` is all user.
pub fn user(value: &Value) -> Option<String> {
    let address = address_of(value)?;
    if address.is_empty() {
        return None;
    }
    match address.rsplit_once('@') {
        Some((user, _)) => Some(user.to_string()),
        None => Some(address.to_string()),
    }
}

pub fn matches_any(input: &str, patterns: &[Regex]) -> bool {
    patterns.iter().any(|re| re.is_match(input))
}

/// First value of a header in a message document, if present
pub fn header_value<'a>(doc: &'a Value, name: &str) -> Option<&'a str> {
    doc.get("headers")?
        .get(canonical_key(name))?
        .get(0)?
        .as_str()
}

/// First value of a header, `""` when missing
pub fn header(doc: &Value, name: &str) -> String {
    header_value(doc, name).unwrap_or("").to_string()
}
