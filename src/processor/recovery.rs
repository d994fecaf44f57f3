use std::path::PathBuf;

use log::{error, info};

use crate::error::*;
use crate::maildir::write_email;
use crate::message::Message;
use crate::metrics::Metrics;
use crate::processor::{Outcome, Processor};

/// Last resort: keeps a copy of the message in the unprocessable directory.
/// Always consumes, even if the copy could not be written.
pub struct Recovery {
    dir: PathBuf,
}

impl Recovery {
    pub fn new(dir: PathBuf) -> Self {
        Recovery { dir }
    }

    /// Writes the raw message, logging instead of failing
    pub fn backup(&self, msg: &Message) -> Option<PathBuf> {
        match write_email(&self.dir, msg.raw()) {
            Ok(path) => {
                info!("Saved unprocessable mail as {}", path.display());
                Some(path)
            }
            Err(e) => {
                error!(
                    "Cannot save unprocessable mail in {}: {}",
                    self.dir.display(),
                    e
                );
                None
            }
        }
    }
}

impl Processor for Recovery {
    fn name(&self) -> &str {
        "recovery"
    }

    fn process(&self, msg: &mut Message, _: &mut Metrics) -> Result<Outcome> {
        self.backup(msg);
        Ok(Outcome::Consumed)
    }
}
