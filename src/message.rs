//! Parsed view of the single e-mail an invocation is handling.
//!
//! The raw bytes are kept verbatim next to the parsed header multimap, so
//! backups always contain exactly what the MTA handed over. Header changes
//! made while the message travels through the pipeline only touch the
//! multimap; [`Message::render`] is the one place where they are written out.
//!
//! [`Message::render`]: struct.Message.html#method.render

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Datelike, FixedOffset, NaiveDateTime, TimeZone};
use log::debug;
use mailparse::{addrparse, parse_header, parse_headers, parse_mail, MailAddr, MailHeaderMap};
use serde::Serialize;

use crate::error::Error::*;
use crate::error::*;

/// Case-insensitive header multimap. Keys are kept in canonical MIME form
/// (`Delivered-To`, `X-Lda-Antispam`), values in the order they were added.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Headers(BTreeMap<String, Vec<String>>);

impl Headers {
    pub fn new() -> Self {
        Default::default()
    }

    /// First value of the header, if present
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(&canonical_key(key))
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn get_all(&self, key: &str) -> &[String] {
        self.0
            .get(&canonical_key(key))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(&canonical_key(key))
    }

    /// Appends a value, keeping whatever is already there
    pub fn add(&mut self, key: &str, value: &str) {
        self.0
            .entry(canonical_key(key))
            .or_default()
            .push(value.to_string());
    }

    /// Replaces all values of the header
    pub fn set(&mut self, key: &str, value: &str) {
        self.0.insert(canonical_key(key), vec![value.to_string()]);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

/// Canonical MIME form of a header name: first letter and every letter after
/// a hyphen upper case, everything else lower case.
pub fn canonical_key(key: &str) -> String {
    let mut upper = true;
    key.trim()
        .chars()
        .map(|c| {
            let c = if upper {
                c.to_ascii_uppercase()
            } else {
                c.to_ascii_lowercase()
            };
            upper = c == '-';
            c
        })
        .collect()
}

/// A single mailbox taken from an address-list header
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Address {
    /// Decoded display name, empty if the header had none
    pub name: String,
    pub address: String,
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            write!(f, "<{}>", self.address)
        } else {
            write!(f, "{:?} <{}>", self.name, self.address)
        }
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    pub headers: Headers,
    /// Everything after the header/body separator, undecoded
    pub body: String,
    raw: Vec<u8>,
    annotations: Vec<(String, String)>,
}

impl Message {
    /// Parses an RFC 5322 message. The header block has to be terminated by
    /// an empty line and every header line needs a `name: value` shape.
    pub fn parse(raw: Vec<u8>) -> Result<Self> {
        let offset = header_length(&raw)?;
        let (parsed, _) = parse_headers(&raw[..offset])?;

        let mut headers = Headers::new();
        for header in &parsed {
            headers.add(&header.get_key(), &unfold(header.get_value_raw()));
        }

        let body = String::from_utf8_lossy(&raw[offset..]).into_owned();

        Ok(Message {
            headers,
            body,
            raw,
            annotations: Vec::new(),
        })
    }

    /// The bytes exactly as they were received
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// The received bytes with every annotation added during this run
    /// prepended as header lines.
    pub fn render(&self) -> Vec<u8> {
        let eol: &[u8] = if self.raw.windows(2).any(|w| w == b"\r\n") {
            b"\r\n"
        } else {
            b"\n"
        };

        let mut rendered = Vec::with_capacity(self.raw.len() + 64 * self.annotations.len());
        for (key, value) in &self.annotations {
            rendered.extend_from_slice(key.as_bytes());
            rendered.extend_from_slice(b": ");
            rendered.extend_from_slice(value.as_bytes());
            rendered.extend_from_slice(eol);
        }
        rendered.extend_from_slice(&self.raw);
        rendered
    }

    /// Adds a diagnostic header. Existing values are never replaced, so
    /// annotations from different processors accumulate. [`render`] writes
    /// the key exactly as given here.
    ///
    /// [`render`]: #method.render
    pub fn annotate(&mut self, key: &str, value: &str) {
        let value = value.replace(|c: char| c == '\r' || c == '\n', " ");
        self.headers.add(key, &value);
        self.annotations.push((key.trim().to_string(), value));
    }

    pub fn annotations(&self) -> &[(String, String)] {
        &self.annotations
    }

    pub fn set_header(&mut self, key: &str, value: &str) {
        self.headers.set(key, value);
    }

    /// Decoded Subject, empty if missing
    pub fn subject(&self) -> String {
        decode_words(self.headers.get("Subject").unwrap_or(""))
    }

    pub fn from(&self) -> Option<Address> {
        self.address("From")
    }

    pub fn to(&self) -> Option<Address> {
        self.address("To")
    }

    pub fn reply_to(&self) -> Option<Address> {
        self.address("Reply-To")
    }

    /// Some MTAs put the bare local user name in the first Delivered-To
    /// header, so the first value that is an actual address wins.
    pub fn delivered_to(&self) -> Option<Address> {
        self.headers
            .get_all("Delivered-To")
            .iter()
            .find_map(|value| first_address(value))
    }

    /// First address of an address-list header. Any further addresses in the
    /// list are ignored.
    pub fn address(&self, header: &str) -> Option<Address> {
        self.headers.get(header).and_then(first_address)
    }

    pub fn is_header_name(&self, header: &str, names: &[&str]) -> bool {
        match self.address(header) {
            Some(addr) => {
                let name = addr.name.to_lowercase();
                names.iter().any(|n| n.to_lowercase() == name)
            }
            None => false,
        }
    }

    pub fn is_header_address(&self, header: &str, addresses: &[&str]) -> bool {
        match self.address(header) {
            Some(addr) => addresses
                .iter()
                .any(|a| a.eq_ignore_ascii_case(&addr.address)),
            None => false,
        }
    }

    pub fn is_header_domain(&self, header: &str, domains: &[&str]) -> bool {
        match self.address(header) {
            Some(addr) => {
                let address = addr.address.to_lowercase();
                domains
                    .iter()
                    .any(|d| address.ends_with(&format!("@{}", d.to_lowercase())))
            }
            None => false,
        }
    }

    pub fn is_from_name(&self, names: &[&str]) -> bool {
        self.is_header_name("From", names)
    }

    pub fn is_to_name(&self, names: &[&str]) -> bool {
        self.is_header_name("To", names)
    }

    pub fn is_from_address(&self, addresses: &[&str]) -> bool {
        self.is_header_address("From", addresses)
    }

    pub fn is_to_address(&self, addresses: &[&str]) -> bool {
        self.is_header_address("To", addresses)
    }

    pub fn is_from_domain(&self, domains: &[&str]) -> bool {
        self.is_header_domain("From", domains)
    }

    pub fn is_reply_to_domain(&self, domains: &[&str]) -> bool {
        self.is_header_domain("Reply-To", domains)
    }

    /// Parses the Date header, trying [`DATE_LAYOUTS`] in order.
    pub fn date(&self) -> Result<DateTime<FixedOffset>> {
        let value = self.headers.get("Date").unwrap_or("");
        parse_date(value).ok_or_else(|| InvalidDate(value.to_string()))
    }

    /// Body of the first top-level MIME part with the given media type,
    /// with its transfer encoding removed. Non-multipart messages yield an
    /// empty string.
    pub fn multipart_body(&self, content_type: &str) -> Result<String> {
        let outer = match self.headers.get("Content-Type") {
            Some(value) => media_type(value)?,
            None => return Ok(String::new()),
        };
        if !outer.starts_with("multipart/") {
            return Ok(String::new());
        }

        let wanted = content_type.to_ascii_lowercase();
        let parsed = parse_mail(&self.raw)?;
        for part in &parsed.subparts {
            let media = match part.headers.get_first_value("Content-Type") {
                Some(value) => media_type(&value)?,
                None => "text/plain".to_string(),
            };
            if media == wanted {
                return Ok(part.get_body()?);
            }
        }

        Ok(String::new())
    }

    /// Plain structured view of the message handed to rule scripts
    pub fn to_document(&self) -> Result<serde_json::Value> {
        let date = match self.date() {
            Ok(date) => Some(date.to_rfc3339()),
            Err(e) => {
                debug!("Document will have no date: {}", e);
                None
            }
        };

        let document = Document {
            from: self.from().unwrap_or_default(),
            to: self.to().unwrap_or_default(),
            reply_to: self.reply_to().unwrap_or_default(),
            delivered_to: self.delivered_to().unwrap_or_default(),
            subject: self.subject(),
            date,
            body: &self.body,
            headers: &self.headers,
        };

        Ok(serde_json::to_value(document)?)
    }

    /// One line for the log
    pub fn summary(&self) -> String {
        fn show(addr: Option<Address>) -> String {
            addr.map(|a| a.to_string())
                .unwrap_or_else(|| "(none)".to_string())
        }

        format!(
            "from={} to={} subject={:?}",
            show(self.from()),
            show(self.to()),
            self.subject()
        )
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Document<'a> {
    from: Address,
    to: Address,
    reply_to: Address,
    delivered_to: Address,
    subject: String,
    date: Option<String>,
    body: &'a str,
    headers: &'a Headers,
}

/// Decodes RFC 2047 encoded-words (`=?utf-8?q?...?=`) in a header value.
/// Values without encoded-words are returned unchanged.
pub fn decode_words(value: &str) -> String {
    if !value.is_ascii() || !value.contains("=?") {
        return value.to_string();
    }

    match parse_header(format!("X: {}", value).as_bytes()) {
        Ok((header, _)) => header.get_value(),
        Err(_) => value.to_string(),
    }
}

fn first_address(value: &str) -> Option<Address> {
    let list = addrparse(value).ok()?;
    let (name, address) = match list.iter().next()? {
        MailAddr::Single(info) => (info.display_name.as_deref(), info.addr.as_str()),
        MailAddr::Group(group) => {
            let info = group.addrs.first()?;
            (info.display_name.as_deref(), info.addr.as_str())
        }
    };

    if !address.contains('@') {
        return None;
    }

    Some(Address {
        name: name.map(decode_words).unwrap_or_default(),
        address: address.to_string(),
    })
}

/// Joins folded header lines with a single space
fn unfold(value: &[u8]) -> String {
    String::from_utf8_lossy(value)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Length of the header block including the empty separator line
fn header_length(raw: &[u8]) -> Result<usize> {
    let mut offset = 0;
    let mut seen_header = false;

    for line in raw.split_inclusive(|b| *b == b'\n') {
        offset += line.len();
        let content = line.strip_suffix(&b"\n"[..]).unwrap_or(line);
        let content = content.strip_suffix(&b"\r"[..]).unwrap_or(content);

        if content.is_empty() {
            if line.ends_with(b"\n") {
                return Ok(offset);
            }
            break;
        }

        if content[0] == b' ' || content[0] == b'\t' {
            if !seen_header {
                return Err(MalformedMessage(
                    "continuation line before the first header".to_string(),
                ));
            }
            continue;
        }

        match content.iter().position(|b| *b == b':') {
            Some(colon) if colon > 0 && content[..colon].iter().all(u8::is_ascii_graphic) => {
                seen_header = true;
            }
            _ => {
                return Err(MalformedMessage(format!(
                    "malformed header line {:?}",
                    String::from_utf8_lossy(content)
                )))
            }
        }
    }

    Err(MalformedMessage(
        "missing header/body separator".to_string(),
    ))
}

/// `type/subtype` of a Content-Type value, lower cased
fn media_type(value: &str) -> Result<String> {
    fn is_token(s: &str) -> bool {
        !s.is_empty()
            && s.chars()
                .all(|c| c.is_ascii_graphic() && !"()<>@,;:\\\"/[]?=".contains(c))
    }

    let media = value
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    match media.split_once('/') {
        Some((kind, sub)) if is_token(kind) && is_token(sub) => Ok(media),
        _ => Err(InvalidMediaType(value.to_string())),
    }
}

#[derive(Debug, Clone, Copy)]
enum Zone {
    /// `MST`
    Name,
    /// `-0700`
    Offset,
    /// `MST (-0700)`
    NameOffset,
    /// `-0700 (MST)`
    OffsetName,
}

struct Layout {
    /// Leading `Mon, `
    weekday: bool,
    format: &'static str,
    zone: Zone,
}

const fn layout(weekday: bool, format: &'static str, zone: Zone) -> Layout {
    Layout {
        weekday,
        format,
        zone,
    }
}

/// Date layouts seen in the wild, strictest first. The order matters: the
/// looser two-digit-year and unpadded-day layouts would otherwise accept
/// dates that a stricter layout reads differently.
const DATE_LAYOUTS: &[Layout] = &[
    // RFC 822
    layout(false, "%d %b %y %H:%M", Zone::Name),
    layout(false, "%d %b %y %H:%M", Zone::Offset),
    // RFC 1123
    layout(true, "%d %b %Y %H:%M:%S", Zone::Name),
    layout(true, "%d %b %Y %H:%M:%S", Zone::Offset),
    layout(true, "%d %b %Y %H:%M:%S", Zone::NameOffset),
    layout(true, "%d %b %Y %H:%M:%S", Zone::OffsetName),
    // no weekday
    layout(false, "%d %b %y %H:%M:%S", Zone::Name),
    layout(false, "%d %b %y %H:%M:%S", Zone::Offset),
    layout(false, "%d %b %Y %H:%M:%S", Zone::Name),
    layout(false, "%d %b %Y %H:%M:%S", Zone::Offset),
    // day of month without leading zero
    layout(false, "%e %b %y %H:%M:%S", Zone::Name),
    layout(false, "%e %b %y %H:%M:%S", Zone::Offset),
    layout(false, "%e %b %Y %H:%M:%S", Zone::Name),
    layout(false, "%e %b %Y %H:%M:%S", Zone::Offset),
    layout(true, "%e %b %Y %H:%M:%S", Zone::Name),
    layout(true, "%e %b %Y %H:%M:%S", Zone::Offset),
];

fn parse_date(value: &str) -> Option<DateTime<FixedOffset>> {
    let value = value.trim();
    DATE_LAYOUTS
        .iter()
        .find_map(|layout| parse_with_layout(value, layout))
}

fn parse_with_layout(value: &str, layout: &Layout) -> Option<DateTime<FixedOffset>> {
    let mut rest = value;
    if layout.weekday {
        let (day, tail) = rest.split_once(',')?;
        let day = day.trim();
        if day.is_empty() || !day.chars().all(|c| c.is_ascii_alphabetic()) {
            return None;
        }
        rest = tail.trim_start();
    }

    let (rest, seconds) = split_zone(rest, layout.zone)?;
    let naive = NaiveDateTime::parse_from_str(rest.trim_end(), layout.format).ok()?;
    // %Y happily reads "06" as the year 6
    if layout.format.contains("%Y") && naive.year() < 1000 {
        return None;
    }

    FixedOffset::east_opt(seconds)?
        .from_local_datetime(&naive)
        .single()
}

fn split_zone(value: &str, zone: Zone) -> Option<(&str, i32)> {
    let (rest, last) = value.trim_end().rsplit_once(char::is_whitespace)?;
    match zone {
        Zone::Name => Some((rest, zone_name_offset(last)?)),
        Zone::Offset => Some((rest, numeric_offset(last)?)),
        Zone::NameOffset => {
            let offset = numeric_offset(last.strip_prefix('(')?.strip_suffix(')')?)?;
            let (rest, name) = rest.trim_end().rsplit_once(char::is_whitespace)?;
            zone_name_offset(name)?;
            Some((rest, offset))
        }
        Zone::OffsetName => {
            zone_name_offset(last.strip_prefix('(')?.strip_suffix(')')?)?;
            let (rest, offset) = rest.trim_end().rsplit_once(char::is_whitespace)?;
            Some((rest, numeric_offset(offset)?))
        }
    }
}

/// Offset in seconds for the zone names RFC 822 knows about. Other
/// alphabetic names are accepted with a zero offset.
fn zone_name_offset(name: &str) -> Option<i32> {
    if name.is_empty() || name.len() > 5 || !name.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }

    let hours = match name.to_ascii_uppercase().as_str() {
        "EDT" => -4,
        "EST" | "CDT" => -5,
        "CST" | "MDT" => -6,
        "MST" | "PDT" => -7,
        "PST" => -8,
        _ => 0,
    };
    Some(hours * 3600)
}

fn numeric_offset(value: &str) -> Option<i32> {
    let bytes = value.as_bytes();
    if bytes.len() != 5 || !bytes[1..].iter().all(u8::is_ascii_digit) {
        return None;
    }

    let sign = match bytes[0] {
        b'+' => 1,
        b'-' => -1,
        _ => return None,
    };
    let hours: i32 = value[1..3].parse().ok()?;
    let minutes: i32 = value[3..5].parse().ok()?;
    Some(sign * (hours * 3600 + minutes * 60))
}
