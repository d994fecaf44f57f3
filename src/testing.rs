//! Helpers shared by the unit tests

use std::io::Write;

use tempfile::NamedTempFile;

use crate::message::Message;

pub const GITHUB_ISSUE_CLOSED: &[u8] = include_bytes!("../testdata/github-issue-closed.eml");

pub fn github_issue_closed() -> Message {
    Message::parse(GITHUB_ISSUE_CLOSED.to_vec()).unwrap()
}

/// Assembles raw messages header by header
pub struct MessageBuilder {
    headers: Vec<(String, String)>,
    date: String,
    body: String,
}

impl MessageBuilder {
    pub fn new() -> Self {
        MessageBuilder {
            headers: Vec::new(),
            date: "Sat, 17 Feb 2024 15:20:18 +0000".to_string(),
            body: "Hello.\r\n".to_string(),
        }
    }

    pub fn with_raw_header(mut self, key: &str, value: &str) -> Self {
        self.headers.push((key.to_string(), value.to_string()));
        self
    }

    pub fn with_subject(self, subject: &str) -> Self {
        self.with_raw_header("Subject", subject)
    }

    pub fn with_from(self, from: &str) -> Self {
        self.with_raw_header("From", from)
    }

    pub fn with_to(self, to: &str) -> Self {
        self.with_raw_header("To", to)
    }

    pub fn with_reply_to(self, reply_to: &str) -> Self {
        self.with_raw_header("Reply-To", reply_to)
    }

    pub fn with_date(mut self, date: &str) -> Self {
        self.date = date.to_string();
        self
    }

    pub fn with_body(mut self, body: &str) -> Self {
        self.body = body.to_string();
        self
    }

    pub fn raw(&self) -> Vec<u8> {
        let mut raw = format!("Date: {}\r\n", self.date);
        for (key, value) in &self.headers {
            raw.push_str(&format!("{}: {}\r\n", key, value));
        }
        raw.push_str("\r\n");
        raw.push_str(&self.body);
        raw.into_bytes()
    }

    pub fn build(self) -> Message {
        Message::parse(self.raw()).unwrap()
    }
}

/// Writes a rule script to a temporary file
pub fn temp_script(script: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(script.as_bytes()).unwrap();
    file
}
