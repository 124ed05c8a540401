// ABOUTME: Command implementations invoked by the CLI
// ABOUTME: Exports the relay command

pub mod relay;

pub use relay::{relay, RelayOptions};
