use crate::error::*;
use crate::message::Message;
use crate::metrics::Metrics;
use crate::processor::{Outcome, Processor};

/// Records who the message is being delivered to, so scripts can use
/// `deliveredTo`
pub struct DeliveredTo {
    destination: String,
}

impl DeliveredTo {
    pub fn new(destination: &str) -> Self {
        DeliveredTo {
            destination: destination.to_string(),
        }
    }
}

impl Processor for DeliveredTo {
    fn name(&self) -> &str {
        "headers"
    }

    fn process(&self, msg: &mut Message, _: &mut Metrics) -> Result<Outcome> {
        msg.set_header("Delivered-To", &self.destination);
        Ok(Outcome::NotMatched)
    }
}
