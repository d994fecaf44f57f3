use std::path::PathBuf;
use std::rc::Rc;

use log::{debug, error, info};

use crate::error::*;
use crate::evaluator::Evaluator;
use crate::maildir::write_email;
use crate::message::Message;
use crate::metrics::Metrics;
use crate::processor::{Outcome, Processor};
use crate::spam::{check, Status};

pub const HEADER: &str = "X-LDA-Antispam";

/// Drops messages the spam script says are spam
pub struct Antispam {
    evaluator: Rc<dyn Evaluator>,
    script: PathBuf,
    /// Where dropped messages are kept, if anywhere
    backup_dir: Option<PathBuf>,
}

impl Antispam {
    pub fn new(evaluator: Rc<dyn Evaluator>, script: PathBuf, backup_dir: Option<PathBuf>) -> Self {
        Antispam {
            evaluator,
            script,
            backup_dir,
        }
    }
}

impl Processor for Antispam {
    fn name(&self) -> &str {
        "antispam"
    }

    fn process(&self, msg: &mut Message, metrics: &mut Metrics) -> Result<Outcome> {
        let verdict = match check(self.evaluator.as_ref(), &self.script, msg)? {
            Some(verdict) => verdict,
            None => return Ok(Outcome::NotMatched),
        };

        msg.annotate(HEADER, &verdict.header_value());

        if verdict.status != Status::Spam {
            debug!("Passed spam test ({}, rule {:?})", verdict.status, verdict.rule);
            return Ok(Outcome::NotMatched);
        }

        if let Some(dir) = &self.backup_dir {
            match write_email(dir, &msg.render()) {
                Ok(path) => debug!("Spam backed up to {}", path.display()),
                Err(e) => {
                    // without a copy the message has to go to the mailbox
                    error!("Failed to back up spam, delivering it instead: {}", e);
                    return Ok(Outcome::NotMatched);
                }
            }
        }

        info!("Dropping spam (rule {:?})", verdict.rule);
        metrics.count_discarded(&verdict.rule);

        Ok(Outcome::Consumed)
    }
}
