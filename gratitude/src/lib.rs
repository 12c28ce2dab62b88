//! Tiny Gratitude core library
//!
//! Local-first journaling: one short entry per day in SQLite, optional
//! passcode encryption, a client-side router and an offline agent that
//! keeps the app usable with no network at all.

pub mod app;
pub mod config;
pub mod crypto;
pub mod database;
pub mod error;
pub mod observable;
pub mod offline;
pub mod router;
pub mod services;
