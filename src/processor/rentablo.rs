//! Weekly Rentablo investment reports. The performance numbers are only in
//! the text/plain part of the body and German formatted (`1.234,56`).

use std::path::PathBuf;

use chrono::{DateTime, Datelike, Days, SecondsFormat, TimeZone, Utc, Weekday};
use log::info;
use regex::Regex;

use crate::error::Error::*;
use crate::error::*;
use crate::message::Message;
use crate::metrics::Metrics;
use crate::processor::{append_record, Outcome, Processor};

pub struct Rentablo {
    csv: PathBuf,
    subject: Regex,
    week: Regex,
    month: Regex,
    half_year: Regex,
    year: Regex,
}

#[derive(Debug, PartialEq)]
struct Report {
    time: DateTime<Utc>,
    week: f64,
    month: f64,
    half_year: f64,
    year: f64,
}

impl Rentablo {
    pub fn new(csv: PathBuf) -> Result<Self> {
        Ok(Rentablo {
            csv,
            subject: Regex::new(r"Ihr Rentablo Investment-Report")?,
            week: Regex::new(r"• ([0-9.,-]+) %\s+seit 7 Tagen")?,
            month: Regex::new(r"• ([0-9.,-]+) %\s+seit einem Monat")?,
            half_year: Regex::new(r"Seit 6 Monaten:\s+Sie:\s+([0-9.,-]+) %")?,
            year: Regex::new(r"Seit 12 Monaten:\s+Sie:\s+([0-9.,-]+) %")?,
        })
    }

    fn parse(&self, msg: &Message) -> Result<Report> {
        let body = msg.multipart_body("text/plain")?;
        if body.is_empty() {
            return Err(ProcessorError("mail has no text/plain part".to_string()));
        }

        Ok(Report {
            time: report_time(msg)?,
            week: number(&self.week, &body, "1-week performance")?,
            month: number(&self.month, &body, "1-month performance")?,
            half_year: number(&self.half_year, &body, "6-month performance")?,
            year: number(&self.year, &body, "1-year performance")?,
        })
    }
}

/// Reports are filed under the Sunday of the week they were sent in, at noon
fn report_time(msg: &Message) -> Result<DateTime<Utc>> {
    let mut date = msg.date()?.date_naive();
    while date.weekday() != Weekday::Sun {
        date = date
            .checked_add_days(Days::new(1))
            .ok_or_else(|| ProcessorError("date out of range".to_string()))?;
    }

    date.and_hms_opt(12, 0, 0)
        .map(|t| Utc.from_utc_datetime(&t))
        .ok_or_else(|| ProcessorError(format!("invalid report date {}", date)))
}

/// German formatted, `1.234,5`
fn number(re: &Regex, body: &str, what: &str) -> Result<f64> {
    let caps = re
        .captures(body)
        .ok_or_else(|| ProcessorError(format!("failed to determine {}", what)))?;
    caps[1]
        .replace('.', "")
        .replace(',', ".")
        .parse()
        .map_err(|e| ProcessorError(format!("invalid {} {:?}: {}", what, &caps[1], e)))
}

impl Processor for Rentablo {
    fn name(&self) -> &str {
        "rentablo"
    }

    fn process(&self, msg: &mut Message, _: &mut Metrics) -> Result<Outcome> {
        if !self.subject.is_match(&msg.subject()) {
            return Ok(Outcome::NotMatched);
        }

        info!("Handling Rentablo report");
        let report = self.parse(msg)?;

        append_record(
            &self.csv,
            &format!(
                "{};{:.2};{:.2};{:.2};{:.2}",
                report.time.to_rfc3339_opts(SecondsFormat::Secs, true),
                report.week,
                report.month,
                report.half_year,
                report.year
            ),
        )?;

        Ok(Outcome::Consumed)
    }
}
