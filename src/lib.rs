//! Payment reconciliation and permit-generation pipeline for vehicle-permit
//! applications.
//!
//! The pipeline ingests at-least-once webhook deliveries from a payment
//! gateway behind a durable idempotency ledger, drives an application
//! state machine whose status updates commit atomically with an append-only
//! payment event ledger, and hands confirmed payments to a bounded worker
//! pool that produces permit artifacts through the issuance backend.
//! Independent timers reconcile payments stuck mid-flight, sample queue
//! health into a durable time series, and emit exactly-once expiration
//! reminders.

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod interfaces;
