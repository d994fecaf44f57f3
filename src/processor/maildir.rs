use std::path::PathBuf;
use std::rc::Rc;

use log::info;
use serde_json::{Map, Value};

use crate::error::Error::*;
use crate::error::*;
use crate::evaluator::Evaluator;
use crate::maildir::Maildir;
use crate::message::Message;
use crate::metrics::Metrics;
use crate::processor::{Outcome, Processor};

/// Delivers everything that got this far, into the folder the folder script
/// picks
pub struct MaildirDelivery {
    maildir: Maildir,
    evaluator: Rc<dyn Evaluator>,
    folder_script: Option<PathBuf>,
}

impl MaildirDelivery {
    pub fn new(maildir: Maildir, evaluator: Rc<dyn Evaluator>, folder_script: Option<PathBuf>) -> Self {
        MaildirDelivery {
            maildir,
            evaluator,
            folder_script,
        }
    }

    /// The empty string is the inbox
    fn folder(&self, msg: &Message) -> Result<String> {
        let script = match &self.folder_script {
            Some(script) => script,
            None => return Ok(String::new()),
        };

        let doc = msg.to_document()?;
        match self.evaluator.evaluate(script, &doc, &Map::new())? {
            None => Ok(String::new()),
            Some(Value::String(folder)) => Ok(folder),
            Some(other) => Err(UnsupportedValue(format!(
                "folder script did not return a string, but {}",
                other
            ))),
        }
    }
}

impl Processor for MaildirDelivery {
    fn name(&self) -> &str {
        "maildir"
    }

    fn process(&self, msg: &mut Message, metrics: &mut Metrics) -> Result<Outcome> {
        let folder = self.folder(msg)?;

        info!("Delivering to folder {:?}", folder);
        self.maildir.deliver(&folder, msg.raw())?;
        metrics.count_folder(&folder);

        Ok(Outcome::Consumed)
    }
}
