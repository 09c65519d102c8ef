//! Court-share settlement and payment reconciliation.
//!
//! Sessions split their court and shuttlecock costs across participants;
//! the ledger aggregates what each player owes or is owed; the matcher turns
//! inbound bank-transfer notifications into payments, oldest debt first.

pub mod config;
pub mod content;
pub mod demo;
pub mod error;
pub mod event;
pub mod ledger;
pub mod matcher;
pub mod player;
pub mod ports;
pub mod rng;
pub mod session;
pub mod settlement;
pub mod splitter;
pub mod store;
pub mod transaction;
pub mod types;
