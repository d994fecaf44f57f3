//! The units of work a message is handed through, see [`pipeline::run`].
//!
//! [`pipeline::run`]: ../pipeline/fn.run.html

use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use crate::error::*;
use crate::maildir::FILE_PERMISSIONS;
use crate::message::Message;
use crate::metrics::Metrics;

pub mod antispam;
pub mod headers;
pub mod maildir;
pub mod recovery;
pub mod rentablo;
pub mod sunnyportal;

pub use self::antispam::Antispam;
pub use self::headers::DeliveredTo;
pub use self::maildir::MaildirDelivery;
pub use self::recovery::Recovery;
pub use self::rentablo::Rentablo;
pub use self::sunnyportal::SunnyPortal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The message has been taken care of, nothing after this processor
    /// gets to see it
    Consumed,
    NotMatched,
}

pub trait Processor {
    /// Used in log lines and the `X-LDA-<name>-Error` annotation
    fn name(&self) -> &str;

    /// Processors may change the message headers in place, later processors
    /// see those changes. An error that should stop the pipeline even though
    /// the message is gone has to be wrapped in [`Error::Consumed`].
    ///
    /// [`Error::Consumed`]: ../error/enum.Error.html#variant.Consumed
    fn process(&self, msg: &mut Message, metrics: &mut Metrics) -> Result<Outcome>;
}

/// Appends one line to a data file, creating it if needed
fn append_record(path: &Path, line: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .mode(FILE_PERMISSIONS)
        .open(path)?;
    writeln!(file, "{}", line)?;
    Ok(())
}
