//! `gpio-sequencer` - WebSocket-controlled GPIO trigger server
//!
//! Clients connect over a WebSocket and fire timed pulses on a small set of
//! output lines ("channels"). The [`engine`] owns channel state and release
//! timing, the [`dispatcher`] maps protocol commands onto it, and the
//! [`server`] exposes both over HTTP.

pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod observability;
pub mod output;
pub mod protocol;
pub mod registry;
pub mod server;
