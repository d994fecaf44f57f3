use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use log::{debug, LevelFilter};

use mailsift::config::Defaults;
use mailsift::maildir::FILE_PERMISSIONS;
use mailsift::{deliver, Config, RuleEvaluator};

#[derive(Parser, Debug)]
#[command(name = "mailsift", version, about = "Sorts incoming mail into Maildir++ folders")]
struct Cli {
    /// Ini file with defaults for the deliver options
    #[arg(short, long, global = true, value_name = "FILE", env = "MAILSIFT_CONFIG")]
    config: Option<PathBuf>,

    /// Log debug messages too
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Deliver the mail on stdin
    Deliver(DeliverArgs),
    /// Print the spam verdict for the mail on stdin
    Spamtest {
        #[arg(long, value_name = "FILE", env = "MAILSIFT_SPAM_SCRIPT")]
        spam_script: Option<PathBuf>,
    },
    /// Append options, environment and stdin to <datadir>/debug.log
    Debug(DeliverArgs),
}

#[derive(Args, Debug)]
struct DeliverArgs {
    /// Root of the users' Maildir directories
    #[arg(long, value_name = "DIR", env = "MAILSIFT_MAILDIR")]
    maildir: Option<PathBuf>,

    /// Where metrics, logs and backups are kept
    #[arg(long, value_name = "DIR", env = "MAILSIFT_DATADIR")]
    datadir: Option<PathBuf>,

    /// Destination address
    #[arg(short, long)]
    destination: Option<String>,

    /// Envelope sender
    #[arg(short, long)]
    from: Option<String>,

    /// Rule file deciding whether a mail is spam
    #[arg(long, value_name = "FILE", env = "MAILSIFT_SPAM_SCRIPT")]
    spam_script: Option<PathBuf>,

    /// Rule file picking the target folder
    #[arg(long, value_name = "FILE", env = "MAILSIFT_FOLDER_SCRIPT")]
    folder_script: Option<PathBuf>,

    /// Keep a copy of dropped spam
    #[arg(long, env = "MAILSIFT_BACKUP_SPAM")]
    backup_spam: bool,

    /// Record Rentablo investment reports
    #[arg(long, env = "MAILSIFT_RENTABLO")]
    rentablo: bool,

    /// Record Sunny Portal production reports
    #[arg(long, env = "MAILSIFT_SUNNYPORTAL")]
    sunnyportal: bool,
}

impl DeliverArgs {
    /// Command line first, then the ini file
    fn into_config(self, defaults: Defaults) -> Config {
        Config {
            maildir: self.maildir.or(defaults.maildir).unwrap_or_default(),
            datadir: self.datadir.or(defaults.datadir).unwrap_or_default(),
            destination: self
                .destination
                .or(defaults.destination)
                .unwrap_or_default(),
            from: self.from.or(defaults.from),
            spam_script: self.spam_script.or(defaults.spam_script),
            folder_script: self.folder_script.or(defaults.folder_script),
            backup_spam: self.backup_spam || defaults.backup_spam.unwrap_or(false),
            rentablo: self.rentablo || defaults.rentablo.unwrap_or(false),
            sunnyportal: self.sunnyportal || defaults.sunnyportal.unwrap_or(false),
        }
    }
}

fn load_defaults(path: Option<PathBuf>) -> anyhow::Result<Defaults> {
    let (path, explicit) = match path {
        Some(p) => (p, true),
        None => match dirs::config_dir() {
            Some(mut p) => {
                p.push("mailsift");
                p.push("config.ini");
                (p, false)
            }
            None => return Ok(Defaults::default()),
        },
    };

    if !explicit && !path.exists() {
        return Ok(Defaults::default());
    }

    Defaults::from_file(&path).with_context(|| format!("cannot load {}", path.display()))
}

fn init_logging(level: LevelFilter, log_file: Option<&Path>) {
    let mut builder = env_logger::Builder::from_default_env();
    builder.filter_level(level);

    if let Some(path) = log_file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .mode(FILE_PERMISSIONS)
            .open(path);
        match file {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(e) => eprintln!("Cannot open {}, logging to stderr: {}", path.display(), e),
        }
    }

    builder.init();
}

fn debug_command(config: &Config) -> anyhow::Result<()> {
    if config.datadir.as_os_str().is_empty() {
        bail!("--datadir must be configured");
    }

    let path = config.debug_file();
    let mut file: File = OpenOptions::new()
        .create(true)
        .append(true)
        .mode(0o600)
        .open(&path)
        .with_context(|| format!("cannot open {}", path.display()))?;

    let show = |p: &Option<PathBuf>| {
        p.as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default()
    };
    let options = [
        ("from", config.from.clone().unwrap_or_default()),
        ("destination", config.destination.clone()),
        ("spamScript", show(&config.spam_script)),
        ("folderScript", show(&config.folder_script)),
        ("maildir", config.maildir.display().to_string()),
        ("datadir", config.datadir.display().to_string()),
        ("backupSpam", config.backup_spam.to_string()),
        ("rentablo", config.rentablo.to_string()),
        ("sunnyportal", config.sunnyportal.to_string()),
    ];

    deliver::debug(&mut file, &options, io::stdin().lock())?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let defaults = load_defaults(cli.config)?;

    match cli.command {
        Command::Deliver(args) => {
            let config = args.into_config(defaults);
            config.validate()?;
            init_logging(level, Some(&config.log_file()));
            debug!("{:?}", config);

            let evaluator = Rc::new(RuleEvaluator::new());
            deliver::deliver(&config, io::stdin().lock(), evaluator)
                .context("cannot deliver mail")?;
        }
        Command::Spamtest { spam_script } => {
            init_logging(level, None);

            let script = match spam_script.or(defaults.spam_script) {
                Some(script) => script,
                None => bail!("--spam-script must be configured"),
            };
            let evaluator = RuleEvaluator::new();
            match deliver::spamtest(&script, io::stdin().lock(), &evaluator)? {
                Some(verdict) => println!("status: {}\nrule: {}", verdict.status, verdict.rule),
                None => println!("(no match)"),
            }
        }
        Command::Debug(args) => {
            let config = args.into_config(defaults);
            debug_command(&config)?;
        }
    }

    Ok(())
}
