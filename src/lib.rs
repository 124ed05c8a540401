// ABOUTME: Library root for canal-relay
// ABOUTME: Relays binlog row changes from a Canal server into a destination MySQL database

pub mod apply;
pub mod change;
pub mod commands;
pub mod config;
pub mod destination;
pub mod logging;
pub mod primary_keys;
pub mod source;
pub mod sql;
pub mod sync;
pub mod translate;
