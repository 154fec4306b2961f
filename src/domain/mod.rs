pub mod application;
pub mod event;
pub mod metrics;
pub mod ports;
pub mod recovery;
pub mod reminder;
pub mod token;
