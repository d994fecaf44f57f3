//! Everything a `deliver` run needs to know, and where it keeps its files.

use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::error::Error::*;
use crate::error::*;
use crate::evaluator::Evaluator;
use crate::maildir::{ensure_dir, Maildir};
use crate::processor::{
    Antispam, DeliveredTo, MaildirDelivery, Processor, Recovery, Rentablo, SunnyPortal,
};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    /// Root holding one Maildir++ directory per user
    pub maildir: PathBuf,
    /// Metrics, logs, backups and report data
    pub datadir: PathBuf,
    /// Address the message is delivered to, its local part picks the user
    pub destination: String,
    /// Envelope sender as passed by the MTA, informational only
    pub from: Option<String>,
    pub spam_script: Option<PathBuf>,
    pub folder_script: Option<PathBuf>,
    /// Keep a copy of dropped spam in `<datadir>/spam`
    pub backup_spam: bool,
    pub rentablo: bool,
    pub sunnyportal: bool,
}

impl Config {
    /// Checks that the required options are set, that the mail root exists and
    /// creates the data directory if needed.
    pub fn validate(&self) -> Result<()> {
        if self.maildir.as_os_str().is_empty() {
            return Err(ConfigError("--maildir must be configured".to_string()));
        }
        if self.datadir.as_os_str().is_empty() {
            return Err(ConfigError("--datadir must be configured".to_string()));
        }
        if self.destination.is_empty() {
            return Err(ConfigError("--destination must be configured".to_string()));
        }
        if !self.maildir.is_dir() {
            let e = format!("maildir {} is not a directory", self.maildir.display());
            return Err(ConfigError(e));
        }

        ensure_dir(&self.datadir).map_err(|e| {
            ConfigError(format!("invalid datadir {}: {}", self.datadir.display(), e))
        })
    }

    /// `<maildir>/<local part of the destination>`
    pub fn user_maildir(&self) -> PathBuf {
        let user = self.destination.split('@').next().unwrap_or_default();
        self.maildir.join(user)
    }

    pub fn metrics_file(&self) -> PathBuf {
        self.datadir.join("metrics.json")
    }

    pub fn spam_dir(&self) -> PathBuf {
        self.datadir.join("spam")
    }

    pub fn unprocessable_dir(&self) -> PathBuf {
        self.datadir.join("unprocessable")
    }

    pub fn log_file(&self) -> PathBuf {
        self.datadir.join("mails.log")
    }

    pub fn debug_file(&self) -> PathBuf {
        self.datadir.join("debug.log")
    }

    pub fn rentablo_file(&self) -> PathBuf {
        self.datadir.join("rentablo.csv")
    }

    pub fn sunnyportal_file(&self) -> PathBuf {
        self.datadir.join("sunnyportal.csv")
    }

    /// The pipeline in the order it runs
    pub fn processors(&self, evaluator: Rc<dyn Evaluator>) -> Result<Vec<Box<dyn Processor>>> {
        let mut processors: Vec<Box<dyn Processor>> = Vec::new();

        processors.push(Box::new(DeliveredTo::new(&self.destination)));

        if self.rentablo {
            processors.push(Box::new(Rentablo::new(self.rentablo_file())?));
        }
        if self.sunnyportal {
            processors.push(Box::new(SunnyPortal::new(self.sunnyportal_file())?));
        }

        if let Some(script) = script(&self.spam_script) {
            let backup_dir = if self.backup_spam {
                Some(self.spam_dir())
            } else {
                None
            };
            processors.push(Box::new(Antispam::new(
                Rc::clone(&evaluator),
                script,
                backup_dir,
            )));
        }

        // always consumes, unless it fails
        processors.push(Box::new(MaildirDelivery::new(
            Maildir::new(&self.user_maildir()),
            evaluator,
            script(&self.folder_script),
        )));

        processors.push(Box::new(Recovery::new(self.unprocessable_dir())));

        Ok(processors)
    }
}

/// An empty path is no script at all
fn script(path: &Option<PathBuf>) -> Option<PathBuf> {
    path.as_deref()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
}

/// Defaults for command line options from the `[deliver]` section of an ini
/// file:
/// ```ini
/// [deliver]
/// maildir = /var/mail
/// datadir = /var/lib/mailsift
/// spam-script = /etc/mailsift/spam.json
/// backup-spam = yes
/// ```
#[cfg(feature = "standalone")]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Defaults {
    pub maildir: Option<PathBuf>,
    pub datadir: Option<PathBuf>,
    pub destination: Option<String>,
    pub from: Option<String>,
    pub spam_script: Option<PathBuf>,
    pub folder_script: Option<PathBuf>,
    pub backup_spam: Option<bool>,
    pub rentablo: Option<bool>,
    pub sunnyportal: Option<bool>,
}

#[cfg(feature = "standalone")]
impl Defaults {
    pub fn from_file<P>(path: &P) -> Result<Self>
    where
        P: AsRef<Path> + ?Sized,
    {
        let ini = ini::Ini::load_from_file(path.as_ref())?;
        let section = match ini.section(Some("deliver")) {
            Some(section) => section,
            None => return Ok(Default::default()),
        };

        let string = |key: &str| section.get(key).map(str::to_string);
        let path = |key: &str| section.get(key).map(PathBuf::from);
        let flag = |key: &str| -> Result<Option<bool>> {
            match section.get(key) {
                None => Ok(None),
                Some(value) => match value.to_ascii_lowercase().as_str() {
                    "1" | "true" | "yes" | "on" => Ok(Some(true)),
                    "0" | "false" | "no" | "off" => Ok(Some(false)),
                    _ => Err(ConfigError(format!("{}: not a boolean: {:?}", key, value))),
                },
            }
        };

        Ok(Defaults {
            maildir: path("maildir"),
            datadir: path("datadir"),
            destination: string("destination"),
            from: string("from"),
            spam_script: path("spam-script"),
            folder_script: path("folder-script"),
            backup_spam: flag("backup-spam")?,
            rentablo: flag("rentablo")?,
            sunnyportal: flag("sunnyportal")?,
        })
    }
}
