//! Command-line interface and session configuration.
//!
//! The CLI is flat: one binary, no subcommands. `--listen` and `--connect`
//! select the connection topology; the terminal role is negotiated
//! separately and defaults to following the topology.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use protocol::Role;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("exactly one of --listen or --connect must be given")]
    ModeMissing,

    #[error("--listen and --connect are mutually exclusive")]
    ModeConflict,
}

/// Establish a TLS-tunneled shell session between two peers.
#[derive(Parser, Debug)]
#[command(name = "shellpipe", version, about)]
pub struct Cli {
    /// Listen for an incoming connection.
    #[arg(long, conflicts_with = "connect")]
    pub listen: bool,

    /// Connect to a listening peer at this host.
    #[arg(long, value_name = "HOST")]
    pub connect: Option<String>,

    /// TCP port to listen on or connect to.
    #[arg(short, long, default_value = "4433")]
    pub port: u16,

    /// Own certificate chain (PEM).
    #[arg(long, value_name = "FILE")]
    pub cert: Option<PathBuf>,

    /// Own private key (PEM).
    #[arg(long, value_name = "FILE")]
    pub key: Option<PathBuf>,

    /// Trust-anchor bundle used to verify the peer (PEM).
    #[arg(long, value_name = "FILE")]
    pub cacert: Option<PathBuf>,

    /// Generate a self-signed certificate if none is configured.
    #[arg(long)]
    pub auto_cert: bool,

    /// Key algorithm for --auto-cert.
    #[arg(long, value_enum, default_value = "ecdsa")]
    pub key_type: KeyType,

    /// Reject peers that do not present a certificate chaining to --cacert.
    #[arg(long, requires = "cacert")]
    pub verify_required: bool,

    /// Print negotiated protocol version and cipher suite.
    #[arg(long)]
    pub tls_info: bool,

    /// Terminal role to propose to the peer.
    #[arg(long, value_enum, default_value = "none")]
    pub role: RoleArg,

    /// Ask the host for admin mode (client side).
    #[arg(long)]
    pub request_admin: bool,

    /// Allow granting admin mode when requested (host side).
    #[arg(long)]
    pub allow_admin: bool,

    /// Shell to run on the host side instead of $SHELL.
    #[arg(long, value_name = "CMD")]
    pub shell: Option<String>,

    /// Mirror shell output to the local terminal (host side).
    #[arg(long)]
    pub mirror_output: bool,

    /// Forward local keystrokes into the shell (host side).
    #[arg(long)]
    pub mirror_input: bool,

    /// Shorthand for --mirror-output --mirror-input.
    #[arg(long)]
    pub mirror: bool,

    /// Strip escape sequences from the mirrored output copy.
    #[arg(long)]
    pub mirror_clean: bool,

    /// Log file path.
    #[arg(long, value_name = "FILE", default_value = "shellpipe.log")]
    pub log_file: PathBuf,

    /// Enable debug logging.
    #[arg(short, long)]
    pub debug: bool,
}

/// Key algorithm for generated certificates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KeyType {
    /// ECDSA P-256.
    Ecdsa,
    /// Ed25519.
    Ed25519,
}

/// Terminal role proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RoleArg {
    /// Follow the connection topology.
    None,
    /// Run the shell here.
    Host,
    /// Drive the remote shell from here.
    Client,
}

impl From<RoleArg> for Role {
    fn from(arg: RoleArg) -> Self {
        match arg {
            RoleArg::None => Role::None,
            RoleArg::Host => Role::Host,
            RoleArg::Client => Role::Client,
        }
    }
}

/// Connection topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerMode {
    /// Accept one inbound connection.
    Listen,
    /// Dial the given host.
    Connect(String),
}

/// Validated session configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub peer_mode: PeerMode,
    pub port: u16,
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
    pub cacert: Option<PathBuf>,
    pub auto_cert: bool,
    pub key_type: KeyType,
    pub verify_required: bool,
    pub tls_info: bool,
    pub role: Role,
    pub request_admin: bool,
    pub allow_admin: bool,
    pub shell: Option<String>,
    pub mirror_output: bool,
    pub mirror_input: bool,
    pub mirror_clean: bool,
    pub log_file: PathBuf,
    pub debug: bool,
}

impl Config {
    /// Validate parsed arguments into a session configuration.
    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        let peer_mode = match (cli.listen, cli.connect) {
            (true, None) => PeerMode::Listen,
            (false, Some(host)) => PeerMode::Connect(host),
            (false, None) => return Err(ConfigError::ModeMissing),
            (true, Some(_)) => return Err(ConfigError::ModeConflict),
        };

        // --mirror is shorthand for both directions.
        let mirror_output = cli.mirror_output || cli.mirror;
        let mirror_input = cli.mirror_input || cli.mirror;

        // Auto-cert fills in default paths when none were given.
        let (cert, key) = if cli.auto_cert {
            (
                Some(cli.cert.unwrap_or_else(|| PathBuf::from("cert.pem"))),
                Some(cli.key.unwrap_or_else(|| PathBuf::from("key.pem"))),
            )
        } else {
            (cli.cert, cli.key)
        };

        Ok(Config {
            peer_mode,
            port: cli.port,
            cert,
            key,
            cacert: cli.cacert,
            auto_cert: cli.auto_cert,
            key_type: cli.key_type,
            verify_required: cli.verify_required,
            tls_info: cli.tls_info,
            role: cli.role.into(),
            request_admin: cli.request_admin,
            allow_admin: cli.allow_admin,
            shell: cli.shell,
            mirror_output,
            mirror_input,
            mirror_clean: cli.mirror_clean,
            log_file: cli.log_file,
            debug: cli.debug,
        })
    }
}
