pub mod metrics;
pub mod queue;
pub mod recovery;
pub mod scanner;
pub mod tokens;
pub mod webhook;
