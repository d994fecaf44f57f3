//! Hands a message to processors in order until one of them consumes it.
//!
//! Errors of a single processor are recorded on the message as an
//! `X-LDA-<name>-Error` header and the next processor gets its turn. The
//! exception is [`Error::Consumed`]: the processor claimed the message and
//! failed, so nothing else may touch it. Panics inside a processor are
//! caught and treated like any other error.
//!
//! [`Error::Consumed`]: ../error/enum.Error.html#variant.Consumed

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use log::{debug, info, warn};

use crate::error::Error::*;
use crate::error::*;
use crate::message::Message;
use crate::metrics::Metrics;
use crate::processor::{Outcome, Processor};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Processor `by` took the message
    Consumed { by: String },
    /// Nobody wanted it
    Exhausted,
    /// A processor claimed the message and then failed on it
    Failed { error: String },
}

pub fn error_header(processor: &str) -> String {
    format!("X-LDA-{}-Error", processor)
}

pub fn run(
    processors: &[Box<dyn Processor>],
    msg: &mut Message,
    metrics: &mut Metrics,
) -> Result<Verdict> {
    for processor in processors {
        let name = processor.name();
        match try_processor(processor.as_ref(), msg, metrics) {
            Ok(Outcome::Consumed) => {
                info!("Message consumed by {}", name);
                return Ok(Verdict::Consumed {
                    by: name.to_string(),
                });
            }
            Ok(Outcome::NotMatched) => debug!("{} did not match", name),
            Err(e) => {
                msg.annotate(&error_header(name), &e.to_string());
                if matches!(e, Consumed(_)) {
                    return Err(e);
                }
                warn!("Processor {} failed: {}", name, e);
            }
        }
    }

    Ok(Verdict::Exhausted)
}

fn try_processor(
    processor: &dyn Processor,
    msg: &mut Message,
    metrics: &mut Metrics,
) -> Result<Outcome> {
    // a panicking processor may leave msg or metrics half-updated, both stay
    // usable for the processors after it
    match catch_unwind(AssertUnwindSafe(|| processor.process(msg, metrics))) {
        Ok(res) => res,
        Err(payload) => Err(Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MessageBuilder;

    struct Fake {
        name: &'static str,
        result: fn() -> Result<Outcome>,
    }

    impl Fake {
        fn boxed(name: &'static str, result: fn() -> Result<Outcome>) -> Box<dyn Processor> {
            Box::new(Fake { name, result })
        }
    }

    impl Processor for Fake {
        fn name(&self) -> &str {
            self.name
        }

        fn process(&self, msg: &mut Message, metrics: &mut Metrics) -> Result<Outcome> {
            msg.annotate("X-Seen-By", self.name);
            metrics.count_folder(self.name);
            (self.result)()
        }
    }

    fn not_matched() -> Result<Outcome> {
        Ok(Outcome::NotMatched)
    }

    fn consumed() -> Result<Outcome> {
        Ok(Outcome::Consumed)
    }

    fn failed() -> Result<Outcome> {
        Err(ProcessorError("it broke".to_string()))
    }

    fn failed_after_consuming() -> Result<Outcome> {
        Err(Consumed(Box::new(ProcessorError("half way".to_string()))))
    }

    fn panicked() -> Result<Outcome> {
        panic!("boom")
    }

    #[test]
    fn error_then_consume() {
        let processors = vec![
            Fake::boxed("A", not_matched),
            Fake::boxed("B", failed),
            Fake::boxed("C", consumed),
            Fake::boxed("D", consumed),
        ];
        let mut msg = MessageBuilder::new().build();
        let mut metrics = Metrics::default();

        let verdict = run(&processors, &mut msg, &mut metrics).unwrap();

        assert_eq!(verdict, Verdict::Consumed { by: "C".to_string() });
        assert_eq!(msg.headers.get("X-LDA-B-Error"), Some("it broke"));
        assert!(!msg.headers.contains("X-LDA-A-Error"));
        assert_eq!(
            msg.headers.get_all("X-Seen-By"),
            &["A".to_string(), "B".to_string(), "C".to_string()]
        );
        assert!(!metrics.folders.contains_key("D"));
    }

    #[test]
    fn panics_are_contained() {
        let processors = vec![
            Fake::boxed("A", panicked),
            Fake::boxed("B", consumed),
        ];
        let mut msg = MessageBuilder::new().build();
        let mut metrics = Metrics::default();

        let verdict = run(&processors, &mut msg, &mut metrics).unwrap();

        assert_eq!(verdict, Verdict::Consumed { by: "B".to_string() });
        assert_eq!(
            msg.headers.get("X-LDA-A-Error"),
            Some("processor panicked: boom")
        );
    }

    #[test]
    fn consumed_errors_stop_the_pipeline() {
        let processors = vec![
            Fake::boxed("A", failed_after_consuming),
            Fake::boxed("B", consumed),
        ];
        let mut msg = MessageBuilder::new().build();
        let mut metrics = Metrics::default();

        match run(&processors, &mut msg, &mut metrics) {
            Err(Consumed(inner)) => assert!(matches!(*inner, ProcessorError(_))),
            other => panic!("expected a consumed error, got {:?}", other),
        }
        assert_eq!(msg.headers.get("X-LDA-A-Error"), Some("half way"));
        assert!(!metrics.folders.contains_key("B"));
    }

    #[test]
    fn exhausted() {
        let processors = vec![Fake::boxed("A", not_matched), Fake::boxed("B", failed)];
        let mut msg = MessageBuilder::new().build();

        let verdict = run(&processors, &mut msg, &mut Metrics::default()).unwrap();

        assert_eq!(verdict, Verdict::Exhausted);
        assert!(msg.headers.contains("X-LDA-B-Error"));
        assert_eq!(run(&[], &mut msg, &mut Metrics::default()).unwrap(), Verdict::Exhausted);
    }

    #[test]
    fn every_failure_is_kept() {
        let processors = vec![Fake::boxed("A", failed), Fake::boxed("A", panicked)];
        let mut msg = MessageBuilder::new().build();

        run(&processors, &mut msg, &mut Metrics::default()).unwrap();

        assert_eq!(
            msg.headers.get_all("X-LDA-A-Error"),
            &["it broke".to_string(), "processor panicked: boom".to_string()]
        );
        assert_eq!(msg.annotations().len(), 4);
    }
}
