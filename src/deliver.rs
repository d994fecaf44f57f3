//! The commands the binary offers, minus argument parsing.

use std::env;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use log::{error, info, warn};

use crate::config::Config;
use crate::error::*;
use crate::evaluator::Evaluator;
use crate::message::Message;
use crate::metrics::MetricsFile;
use crate::pipeline::{self, Verdict};
use crate::processor::Recovery;
use crate::spam;

/// Reads one message from `input` and runs it through the pipeline
/// described by `config`.
///
/// Errors are returned for problems before the pipeline starts: unreadable
/// input, unusable metrics, unparsable messages. Once the pipeline ran, the
/// message is handled one way or the other and `Ok` is returned. A message
/// nobody took ([`Verdict::Exhausted`]) or one whose handling failed
/// ([`Verdict::Failed`]) ends up in the unprocessable directory.
///
/// [`Verdict::Exhausted`]: ../pipeline/enum.Verdict.html#variant.Exhausted
/// [`Verdict::Failed`]: ../pipeline/enum.Verdict.html#variant.Failed
pub fn deliver<R: Read>(config: &Config, mut input: R, evaluator: Rc<dyn Evaluator>) -> Result<Verdict> {
    let mut raw = Vec::new();
    input.read_to_end(&mut raw)?;

    let mut metrics = MetricsFile::open(&config.metrics_file())?;
    metrics.total += 1;

    let mut msg = Message::parse(raw)?;
    metrics.valid += 1;

    info!("Delivering {} to {}", msg.summary(), config.destination);

    let processors = config.processors(evaluator)?;
    let result = pipeline::run(&processors, &mut msg, &mut metrics);
    Ok(settle(config.unprocessable_dir(), &msg, result))
}

/// Backs up what the pipeline did not deliver
fn settle(unprocessable: PathBuf, msg: &Message, result: Result<Verdict>) -> Verdict {
    let verdict = match result {
        Ok(Verdict::Exhausted) => {
            warn!("No processor took the message");
            Verdict::Exhausted
        }
        Ok(verdict) => return verdict,
        Err(e) => {
            error!("Message is unprocessable: {}", e);
            Verdict::Failed {
                error: e.to_string(),
            }
        }
    };
    Recovery::new(unprocessable).backup(msg);
    verdict
}

/// Classifies one message without delivering it
pub fn spamtest<R: Read>(script: &Path, mut input: R, evaluator: &dyn Evaluator) -> Result<Option<spam::Verdict>> {
    let mut raw = Vec::new();
    input.read_to_end(&mut raw)?;

    let msg = Message::parse(raw)?;
    spam::check(evaluator, script, &msg)
}

/// Dumps the options, the environment and whatever comes in on `input`, to
/// see what an MTA actually passes along.
pub fn debug<R, W>(out: &mut W, options: &[(&str, String)], mut input: R) -> Result<()>
where
    R: Read,
    W: Write,
{
    writeln!(out, "Options:")?;
    for (key, value) in options {
        writeln!(out, "  {}: {:?}", key, value)?;
    }

    let mut vars: Vec<(String, String)> = env::vars_os()
        .map(|(k, v)| (k.to_string_lossy().into_owned(), v.to_string_lossy().into_owned()))
        .collect();
    vars.sort();

    writeln!(out, "Environment:")?;
    for (key, value) in vars {
        writeln!(out, "  {}={}", key, value)?;
    }

    writeln!(out, "stdin:")?;
    io::copy(&mut input, out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::RuleEvaluator;
    use crate::spam::Status;
    use crate::testing::{temp_script, MessageBuilder};

    #[test]
    fn spamtest_reports_verdicts() {
        let script = temp_script(
            r#"[{"rules": [{"@subject": "WIN"}], "result": {"status": "spam", "rule": "foo"}}]"#,
        );
        let evaluator = RuleEvaluator::new();

        let raw = MessageBuilder::new().with_subject("WIN MONEY NOW").raw();
        let verdict = spamtest(script.path(), &raw[..], &evaluator).unwrap().unwrap();
        assert_eq!(verdict.status, Status::Spam);

        let raw = MessageBuilder::new().with_subject("hello").raw();
        assert_eq!(spamtest(script.path(), &raw[..], &evaluator).unwrap(), None);

        assert!(spamtest(script.path(), &b"garbage"[..], &evaluator).is_err());
    }

    fn backups(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
    }

    #[test]
    fn failed_handling_is_not_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let unprocessable = dir.path().join("unprocessable");
        let msg = MessageBuilder::new().with_subject("hi").build();

        let err = Error::Consumed(Box::new(Error::ProcessorError("disk full".to_string())));
        let verdict = settle(unprocessable.clone(), &msg, Err(err));
        match verdict {
            Verdict::Failed { error } => assert!(error.contains("disk full"), "{}", error),
            other => panic!("expected a failure, got {:?}", other),
        }
        assert_eq!(backups(&unprocessable), 1);

        let verdict = settle(unprocessable.clone(), &msg, Ok(Verdict::Exhausted));
        assert_eq!(verdict, Verdict::Exhausted);
        assert_eq!(backups(&unprocessable), 2);

        let by = "maildir".to_string();
        let verdict = settle(unprocessable.clone(), &msg, Ok(Verdict::Consumed { by }));
        assert!(matches!(verdict, Verdict::Consumed { .. }));
        assert_eq!(backups(&unprocessable), 2);
    }

    #[test]
    fn debug_output() {
        let mut out = Vec::new();
        let options = [("datadir", "/tmp/data".to_string()), ("rentablo", "false".to_string())];

        debug(&mut out, &options, &b"Subject: hi\r\n\r\nbody"[..]).unwrap();

        let out = String::from_utf8(out).unwrap();
        assert!(out.starts_with("Options:\n  datadir: \"/tmp/data\"\n  rentablo: \"false\"\nEnvironment:\n"));
        assert!(out.ends_with("stdin:\nSubject: hi\r\n\r\nbody"));
    }
}
