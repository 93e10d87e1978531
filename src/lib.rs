//! Interactive multi-session remote-shell handler.
//!
//! The hard engineering lives in [`channel`] and [`transaction`]: turning a
//! hostile, echoing, prompt-polluting byte stream into a reliable framed
//! command channel. Everything above that ([`platform`], [`session`],
//! [`manager`], [`cli`]) is built on top of the guarantee those two modules
//! provide.

pub mod channel;
pub mod cli;
pub mod config;
pub mod error;
pub mod ids;
pub mod listener;
pub mod manager;
pub mod platform;
pub mod session;
pub mod style;
pub mod transaction;
pub mod transport;
