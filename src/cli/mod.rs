//! Command-line flows for the `safe` binary

pub mod commands;

pub use commands::{
    cmd_balance, cmd_deploy, cmd_faucet, cmd_keys_generate, cmd_pending, cmd_serve,
    cmd_sign_message, cmd_transfer, load_relay, CliResult, ServeOptions,
};
