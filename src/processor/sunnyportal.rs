//! Daily Sunny Portal reports carry everything in the subject, e.g.
//! `Sunny Portal Info Report Fam. Doe 1/29/2022 Daily Production: 6.205 kWh /
//! Daily Revenue: 0.496 EUR / Daily CO2 Reduction: 4.344 kg`

use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, SecondsFormat, TimeZone, Utc};
use log::info;
use regex::Regex;

use crate::error::Error::*;
use crate::error::*;
use crate::message::Message;
use crate::metrics::Metrics;
use crate::processor::{append_record, Outcome, Processor};

const SUBJECT: &str = "Sunny Portal Info Report";

pub struct SunnyPortal {
    csv: PathBuf,
    production: Regex,
    revenue: Regex,
    co2: Regex,
    date: Regex,
}

#[derive(Debug, PartialEq)]
struct Report {
    time: DateTime<Utc>,
    production: f64,
    revenue: f64,
    co2: f64,
}

impl SunnyPortal {
    pub fn new(csv: PathBuf) -> Result<Self> {
        Ok(SunnyPortal {
            csv,
            production: Regex::new(r"Daily Production: ([0-9.,]+) kWh")?,
            revenue: Regex::new(r"Daily Revenue: ([0-9.,]+) EUR")?,
            co2: Regex::new(r"Daily CO2 Reduction: ([0-9.,]+) kg")?,
            date: Regex::new(r"([0-9]+)/([0-9]+)/(2[0-9]+)")?,
        })
    }

    fn parse(&self, subject: &str) -> Result<Report> {
        let production = number(&self.production, subject, "daily production")?;
        let revenue = number(&self.revenue, subject, "daily revenue")?;
        let co2 = number(&self.co2, subject, "daily CO2 reduction")?;

        let caps = self
            .date
            .captures(subject)
            .ok_or_else(|| ProcessorError("failed to determine date".to_string()))?;
        let part = |i: usize| caps[i].parse::<u32>().ok();
        let date = match (caps[3].parse::<i32>().ok(), part(1), part(2)) {
            (Some(y), Some(m), Some(d)) => NaiveDate::from_ymd_opt(y, m, d),
            _ => None,
        };
        let time = date
            .and_then(|d| d.and_hms_opt(12, 0, 0))
            .map(|t| Utc.from_utc_datetime(&t))
            .ok_or_else(|| ProcessorError(format!("invalid date {:?}", &caps[0])))?;

        Ok(Report {
            time,
            production,
            revenue,
            co2,
        })
    }
}

/// US formatted, `1,234.5`
fn number(re: &Regex, subject: &str, what: &str) -> Result<f64> {
    let caps = re
        .captures(subject)
        .ok_or_else(|| ProcessorError(format!("failed to determine {}", what)))?;
    caps[1]
        .replace(',', "")
        .parse()
        .map_err(|e| ProcessorError(format!("failed to determine {}: {}", what, e)))
}

impl Processor for SunnyPortal {
    fn name(&self) -> &str {
        "sunnyportal"
    }

    fn process(&self, msg: &mut Message, _: &mut Metrics) -> Result<Outcome> {
        let subject = msg.subject();
        if !subject.contains(SUBJECT) {
            return Ok(Outcome::NotMatched);
        }

        info!("Handling Sunny Portal report");
        let report = self.parse(&subject)?;

        append_record(
            &self.csv,
            &format!(
                "{};{:.4} kWh;{:.4} EUR;{:.4} kg",
                report.time.to_rfc3339_opts(SecondsFormat::Secs, true),
                report.production,
                report.revenue,
                report.co2
            ),
        )?;

        Ok(Outcome::Consumed)
    }
}
