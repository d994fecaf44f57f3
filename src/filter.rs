use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::convert::AsRef;
use std::fs::File;
use std::hash::Hasher;
use std::io::Read;
use std::iter::Iterator;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::error::Error::*;
use crate::error::*;
use crate::evaluator::{domain, header_value, matches_any, user};

use crate::Value;
use crate::Value::*;

#[derive(Debug, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Filter {
    name: Option<String>,
    /// Description
    ///
    /// Not used for anything, but may be good for users to remember what this
    /// specific filter is doing
    pub desc: Option<String>,
    /// List of rules
    ///
    /// This list is an OR list, meaning the filter will match if any rule
    /// matches. However, AND combinations may happen within a rule
    // at the moment, since we are generating a hash in the name function this
    // field needs to be consistent in the order it prints its key/value pairs
    pub rules: Vec<BTreeMap<String, Value>>,
    /// What the script evaluates to if this filter is the first one to match.
    /// `null` means "no opinion".
    #[serde(default)]
    pub result: JsonValue,
    #[serde(skip)]
    re: Vec<Vec<(Field, Matcher)>>,
}

/// The part of the message document a rule key refers to
#[derive(Debug, Clone, PartialEq)]
enum Field {
    Subject,
    Body,
    Date,
    Address {
        key: &'static str,
        part: AddressPart,
    },
    Binding(String),
    Header(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum AddressPart {
    Address,
    Name,
    Domain,
    User,
}

#[derive(Debug)]
enum Matcher {
    /// Any of the expressions has to match any of the values
    Any(Vec<Regex>),
    /// Every expression has to match the value
    All(Vec<Regex>),
    /// Whether the field is there at all
    Present(bool),
}

impl Field {
    fn parse(key: &str) -> Result<Field> {
        if let Some(name) = key.strip_prefix('$') {
            return Ok(Field::Binding(name.to_string()));
        }

        let name = match key.strip_prefix('@') {
            Some(name) => name,
            None => return Ok(Field::Header(key.to_string())),
        };

        match name {
            "subject" => return Ok(Field::Subject),
            "body" => return Ok(Field::Body),
            "date" => return Ok(Field::Date),
            _ => {}
        }

        let (base, part) = if let Some(base) = name.strip_suffix("-name") {
            (base, AddressPart::Name)
        } else if let Some(base) = name.strip_suffix("-domain") {
            (base, AddressPart::Domain)
        } else if let Some(base) = name.strip_suffix("-user") {
            (base, AddressPart::User)
        } else {
            (name, AddressPart::Address)
        };

        let key = match base {
            "from" => "from",
            "to" => "to",
            "reply-to" => "replyTo",
            "delivered-to" => "deliveredTo",
            _ => return Err(UnsupportedValue(format!("unknown field '{}'", key))),
        };

        Ok(Field::Address { key, part })
    }

    fn values(&self, doc: &JsonValue, bindings: &Map<String, JsonValue>) -> Vec<String> {
        fn non_empty(value: Option<&str>) -> Vec<String> {
            value
                .filter(|v| !v.is_empty())
                .map(|v| vec![v.to_string()])
                .unwrap_or_default()
        }

        match self {
            Field::Subject => non_empty(doc.get("subject").and_then(JsonValue::as_str)),
            Field::Body => non_empty(doc.get("body").and_then(JsonValue::as_str)),
            Field::Date => non_empty(doc.get("date").and_then(JsonValue::as_str)),
            Field::Address { key, part } => {
                let addr = match doc.get(*key) {
                    Some(addr) => addr,
                    None => return Vec::new(),
                };
                match part {
                    AddressPart::Address => non_empty(addr.get("address").and_then(JsonValue::as_str)),
                    AddressPart::Name => non_empty(addr.get("name").and_then(JsonValue::as_str)),
                    AddressPart::Domain => non_empty(domain(addr).as_deref()),
                    AddressPart::User => non_empty(user(addr).as_deref()),
                }
            }
            Field::Binding(name) => match bindings.get(name) {
                Some(JsonValue::String(s)) => vec![s.clone()],
                Some(JsonValue::Null) | None => Vec::new(),
                Some(other) => vec![other.to_string()],
            },
            // headers keep empty values, an empty header is still present
            Field::Header(name) => header_value(doc, name)
                .map(|v| vec![v.to_string()])
                .unwrap_or_default(),
        }
    }
}

impl Matcher {
    fn is_match(&self, values: &[String]) -> bool {
        match self {
            Matcher::Any(res) => values.iter().any(|v| matches_any(v, res)),
            Matcher::All(res) => match values.first() {
                Some(value) => res.iter().all(|re| re.is_match(value)),
                None => false,
            },
            Matcher::Present(present) => values.is_empty() != *present,
        }
    }
}

impl Filter {
    pub fn new() -> Self {
        Default::default()
    }

    /// Returns either the set name, or a hash of [`Filter::rules`]. Please
    /// note: hashed names are not used for serialization.
    ///
    /// [`Filter::rules`]: struct.Filter.html#structfield.rules
    pub fn name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => {
                // XXX This seems dumb, there has to be a better way
                let mut h = DefaultHasher::new();
                let buf = format!("{:?}", self.rules);
                for byte in buf.as_bytes() {
                    h.write_u8(*byte);
                }
                format!("{:x}", h.finish())
            }
        }
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = Some(name.to_string());
    }

    /// When filters are deserialized from json or have been assembled via code,
    /// the regular expressions contained in [`Filter::rules`] need to be
    /// compiled before any matches are to be made.
    ///
    /// [`Filter::rules`]: struct.Filter.html#structfield.rules
    pub fn compile(mut self) -> Result<Self> {
        let mut compiled = Vec::with_capacity(self.rules.len());
        for rule in &self.rules {
            let mut fields = Vec::with_capacity(rule.len());
            for (key, value) in rule.iter() {
                let field = Field::parse(key)?;
                let mut res = Vec::new();
                match value {
                    Single(re) => res.push(Regex::new(re)?),
                    Multiple(mre) => {
                        for re in mre {
                            res.push(Regex::new(re)?);
                        }
                    }
                    Bool(present) => {
                        fields.push((field, Matcher::Present(*present)));
                        continue;
                    }
                }
                let matcher = match field {
                    Field::Header(_) => Matcher::All(res),
                    _ => Matcher::Any(res),
                };
                fields.push((field, matcher));
            }
            compiled.push(fields);
        }
        self.re = compiled;
        Ok(self)
    }

    /// Checks if the supplied message document matches any of the
    /// combinations described in [`Filter::rules`]
    ///
    /// [`Filter::rules`]: struct.Filter.html#structfield.rules
    pub fn is_match(&self, doc: &JsonValue, bindings: &Map<String, JsonValue>) -> Result<bool> {
        // self.re will only be populated after self.compile()
        if self.re.len() != self.rules.len() {
            let e = "Filters need to be compiled before tested".to_string();
            return Err(RegexUncompiled(e));
        }

        for rule in &self.re {
            let mut is_match = true;
            for (field, matcher) in rule {
                is_match = matcher.is_match(&field.values(doc, bindings)) && is_match;
                if !is_match {
                    break;
                }
            }
            if is_match {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// The result this filter yields, `None` standing in for `null`
    pub fn result(&self) -> Option<&JsonValue> {
        match &self.result {
            JsonValue::Null => None,
            value => Some(value),
        }
    }
}

/// Deserialize filters from bytes
pub fn filters_from(buf: &[u8]) -> Result<Vec<Filter>> {
    serde_json::from_slice::<Vec<Filter>>(buf)?
        .into_iter()
        .map(|f| f.compile())
        .collect()
}

/// Deserialize filters from file. An empty (or whitespace only) file holds no
/// filters at all.
pub fn filters_from_file<P>(filename: &P) -> Result<Vec<Filter>>
where
    P: AsRef<Path> + ?Sized,
{
    let mut buf = Vec::new();
    let mut file = File::open(filename)?;
    file.read_to_end(&mut buf)?;
    if buf.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    filters_from(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{github_issue_closed, MessageBuilder};

    fn compile(json: &str) -> Vec<Filter> {
        filters_from(json.as_bytes()).unwrap()
    }

    #[test]
    fn rules_are_or_keys_are_and() {
        let filters = compile(
            r#"[{
                "name": "github",
                "rules": [
                    {"@from-domain": "github\\.com", "@subject": "nothing like this"},
                    {"@from-domain": "github\\.com", "Precedence": "^list$"}
                ],
                "result": "github"
            }]"#,
        );
        let doc = github_issue_closed().to_document().unwrap();

        assert!(filters[0].is_match(&doc, &Map::new()).unwrap());
        assert_eq!(filters[0].result(), Some(&JsonValue::from("github")));
    }

    #[test]
    fn header_expressions_must_all_match() {
        let filters = compile(
            r#"[
                {"rules": [{"list-id": ["Firefox-UI-Fix", "black7375"]}]},
                {"rules": [{"list-id": ["Firefox-UI-Fix", "somebody-else"]}]}
            ]"#,
        );
        let doc = github_issue_closed().to_document().unwrap();

        assert!(filters[0].is_match(&doc, &Map::new()).unwrap());
        assert!(!filters[1].is_match(&doc, &Map::new()).unwrap());
    }

    #[test]
    fn address_fields() {
        let filters = compile(
            r#"[
                {"rules": [{"@from": "^notifications@github\\.com$"}]},
                {"rules": [{"@from-user": "^notifications$", "@to-name": "Firefox"}]},
                {"rules": [{"@reply-to-domain": "reply\\.github\\.com"}]},
                {"rules": [{"@delivered-to": "."}]}
            ]"#,
        );
        let doc = github_issue_closed().to_document().unwrap();
        let matched: Vec<bool> = filters
            .iter()
            .map(|f| f.is_match(&doc, &Map::new()).unwrap())
            .collect();

        assert_eq!(matched, vec![true, true, true, false]);
    }

    #[test]
    fn presence_checks() {
        let filters = compile(
            r#"[
                {"rules": [{"List-Unsubscribe": true}]},
                {"rules": [{"X-Spam-Flag": true}]},
                {"rules": [{"X-Spam-Flag": false}]}
            ]"#,
        );
        let doc = github_issue_closed().to_document().unwrap();
        let matched: Vec<bool> = filters
            .iter()
            .map(|f| f.is_match(&doc, &Map::new()).unwrap())
            .collect();

        assert_eq!(matched, vec![true, false, true]);
    }

    #[test]
    fn bindings() {
        let filters = compile(r#"[{"rules": [{"$mode": "^test$"}]}]"#);
        let doc = MessageBuilder::new().build().to_document().unwrap();

        let mut bindings = Map::new();
        assert!(!filters[0].is_match(&doc, &bindings).unwrap());
        bindings.insert("mode".to_string(), JsonValue::from("test"));
        assert!(filters[0].is_match(&doc, &bindings).unwrap());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let res = filters_from(br#"[{"rules": [{"@cc": "x"}]}]"#);
        assert!(matches!(res, Err(UnsupportedValue(_))));

        let res = filters_from(br#"[{"rules": [{"@subject": "("}]}]"#);
        assert!(matches!(res, Err(RegexError(_))));

        let res = filters_from(br#"[{"rules": [], "op": {}}]"#);
        assert!(matches!(res, Err(JSONError(_))));
    }

    #[test]
    fn uncompiled_filters_refuse_to_match() {
        let mut filter = Filter::new();
        filter.rules.push(BTreeMap::new());
        let doc = MessageBuilder::new().build().to_document().unwrap();

        assert!(matches!(
            filter.is_match(&doc, &Map::new()),
            Err(RegexUncompiled(_))
        ));
    }

    #[test]
    fn names() {
        let mut filters = compile(r#"[{"rules": [{"@subject": "a"}]}]"#);
        let hashed = filters[0].name();
        assert_eq!(hashed, filters[0].name());
        assert!(!hashed.is_empty());

        filters[0].set_name("named");
        assert_eq!(filters[0].name(), "named");
    }
}
