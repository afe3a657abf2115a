//! Command-line interface

use std::path::PathBuf;
use std::time::Duration;

use broker_core::{EnvironmentClass, humantime_serde::parse_duration};
use clap::{Parser, Subcommand};

/// Profile used when `--profile` is not given
pub const DEFAULT_PROFILE: &str = "default";

/// Credential Broker - browser login to short-lived cloud role credentials
#[derive(Parser, Debug)]
#[command(name = "credential-broker")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "CREDENTIAL_BROKER_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "warn",
        env = "CREDENTIAL_BROKER_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "CREDENTIAL_BROKER_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Stage (overrides the configured default)
    #[arg(short, long, global = true)]
    pub stage: Option<String>,

    /// Environment class: pci or nonpci (overrides the configured default)
    #[arg(short, long, global = true)]
    pub environment: Option<EnvironmentClass>,

    /// Subcommand
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Log in through the browser and cache the identity session
    Login,

    /// Refresh the cached identity session
    Refresh,

    /// List the roles the current identity may assume
    Groups,

    /// Print credentials for a role
    Creds(CredsArgs),

    /// Print credentials in the credential-process format
    Cproc(CredsArgs),

    /// Open the web console signed in as a role
    Console(ConsoleArgs),

    /// Show the cached identity and cloud sessions
    Info {
        /// Profile whose cloud session is shown
        #[arg(short, long, default_value = DEFAULT_PROFILE)]
        profile: String,
    },

    /// Remove cached sessions
    Logout {
        /// Only remove the cloud session of this profile
        #[arg(short, long, conflicts_with = "all")]
        profile: Option<String>,

        /// Remove every identity and cloud session
        #[arg(long)]
        all: bool,
    },

    /// Run the authorization service
    Serve,
}

/// Arguments shared by credential commands
#[derive(clap::Args, Debug, Clone)]
pub struct CredsArgs {
    /// Profile the cloud session is cached under
    #[arg(short, long, default_value = DEFAULT_PROFILE)]
    pub profile: String,

    /// Role to assume; may be omitted when exactly one role is permitted
    #[arg(short, long)]
    pub role_arn: Option<String>,

    /// Session duration (e.g. 15m, 1h); class default when omitted
    #[arg(short = 't', long, value_parser = parse_duration)]
    pub duration: Option<Duration>,

    /// Fail instead of opening the browser when no session is usable
    #[arg(long)]
    pub no_login: bool,
}

/// Arguments of the `console` command
#[derive(clap::Args, Debug, Clone)]
pub struct ConsoleArgs {
    /// Credential selection
    #[command(flatten)]
    pub creds: CredsArgs,

    /// Print the sign-in URL instead of opening it
    #[arg(long)]
    pub stdout: bool,

    /// Region to open the console in (overrides the configured one)
    #[arg(long)]
    pub region: Option<String>,
}
