use crate::domain::application::{Amount, Currency};
use crate::domain::event::GatewayEvent;
use crate::error::{PipelineError, Result};
use serde::Deserialize;
use std::io::{BufRead, BufReader, Read};

/// One line of a pipeline replay file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReplayRecord {
    /// Seeds an application with an open payment order.
    Application {
        id: i64,
        order_id: String,
        #[serde(default)]
        amount: Option<Amount>,
        #[serde(default)]
        currency: Currency,
    },
    /// A gateway webhook delivery, verbatim.
    Webhook(GatewayEvent),
}

/// Reads replay records from a JSON-lines source.
///
/// Wraps any `Read` and yields `Result<ReplayRecord>` lazily, so large
/// replay files stream without loading into memory. Blank lines are
/// skipped; a malformed line is an error item, not a hard stop.
pub struct ReplayReader<R: Read> {
    reader: BufReader<R>,
}

impl<R: Read> ReplayReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            reader: BufReader::new(source),
        }
    }

    pub fn records(self) -> impl Iterator<Item = Result<ReplayRecord>> {
        self.reader.lines().filter_map(|line| match line {
            Ok(line) if line.trim().is_empty() => None,
            Ok(line) => Some(serde_json::from_str(&line).map_err(PipelineError::from)),
            Err(e) => Some(Err(PipelineError::from(e))),
        })
    }
}
