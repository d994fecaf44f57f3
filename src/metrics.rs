//! Delivery counters kept in `metrics.json`.
//!
//! The file is read at the start of an invocation and written back at the
//! end. Nothing locks it, so two invocations finishing at the same time lose
//! one of their updates.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};

use log::error;
use serde::{Deserialize, Serialize};

use crate::error::*;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metrics {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub valid: u64,
    #[serde(default)]
    pub discarded: u64,
    #[serde(default)]
    pub folders: BTreeMap<String, u64>,
    #[serde(default, rename = "spamRules")]
    pub spam_rules: BTreeMap<String, u64>,
}

impl Metrics {
    /// A missing file is a fresh set of counters
    pub fn load<P>(path: &P) -> Result<Self>
    where
        P: AsRef<Path> + ?Sized,
    {
        match fs::read(path) {
            Ok(buf) => Ok(serde_json::from_slice(&buf)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Default::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save<P>(&self, path: &P) -> Result<()>
    where
        P: AsRef<Path> + ?Sized,
    {
        let mut buf = serde_json::to_vec_pretty(self)?;
        buf.push(b'\n');
        fs::write(path, buf)?;
        Ok(())
    }

    pub fn count_folder(&mut self, folder: &str) {
        *self.folders.entry(folder.to_string()).or_default() += 1;
    }

    /// A spam message was dropped because of `rule`
    pub fn count_discarded(&mut self, rule: &str) {
        self.discarded += 1;
        *self.spam_rules.entry(rule.to_string()).or_default() += 1;
    }
}

/// Metrics that write themselves back to their file when dropped
#[derive(Debug)]
pub struct MetricsFile {
    path: PathBuf,
    metrics: Metrics,
}

impl MetricsFile {
    pub fn open<P>(path: &P) -> Result<Self>
    where
        P: AsRef<Path> + ?Sized,
    {
        let path = path.as_ref().to_path_buf();
        let metrics = Metrics::load(&path)?;
        Ok(MetricsFile { path, metrics })
    }
}

impl Deref for MetricsFile {
    type Target = Metrics;

    fn deref(&self) -> &Metrics {
        &self.metrics
    }
}

impl DerefMut for MetricsFile {
    fn deref_mut(&mut self) -> &mut Metrics {
        &mut self.metrics
    }
}

impl Drop for MetricsFile {
    fn drop(&mut self) {
        if let Err(e) = self.metrics.save(&self.path) {
            error!("Failed to save metrics to {}: {}", self.path.display(), e);
        }
    }
}
