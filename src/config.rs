//! Server configuration
//!
//! Settings come from command-line flags. Every flag has a default, so a
//! bare `respite` listens on `0.0.0.0:6379`.

use crate::connection::ConnectionLimits;
use crate::protocol::parser::{RespParser, MAX_BULK_SIZE};
use thiserror::Error;

/// Errors from command-line parsing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} requires a value")]
    MissingValue(String),

    #[error("invalid value for {flag}: {value:?}")]
    InvalidValue { flag: String, value: String },

    #[error("unknown argument: {0}")]
    UnknownArgument(String),
}

/// What the command line asked the binary to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    Run(Config),
    Help,
    Version,
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Listen backlog depth
    pub backlog: i32,
    /// Largest unparsed input per client before it is disconnected
    pub max_query_buffer: usize,
    /// Largest accepted bulk string
    pub proto_max_bulk_len: usize,
    /// Largest accepted array nesting depth
    pub proto_max_depth: usize,
    /// Queued output per client at which reading from it pauses
    pub output_high_watermark: usize,
    /// Default log filter, overridden by `RUST_LOG`
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        let limits = ConnectionLimits::default();
        Self {
            host: crate::DEFAULT_HOST.to_string(),
            port: crate::DEFAULT_PORT,
            backlog: crate::DEFAULT_BACKLOG,
            max_query_buffer: limits.max_query_buffer,
            proto_max_bulk_len: MAX_BULK_SIZE,
            proto_max_depth: 1024,
            output_high_watermark: limits.output_high_watermark,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Parses command-line arguments (without the program name).
    pub fn from_args<I>(args: I) -> Result<Invocation, ConfigError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut config = Config::default();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--help" => return Ok(Invocation::Help),
                "--version" | "-v" => return Ok(Invocation::Version),
                "--host" | "-h" => config.host = value_for(&arg, args.next())?,
                "--port" | "-p" => config.port = parse_value(&arg, args.next())?,
                "--backlog" => config.backlog = parse_value(&arg, args.next())?,
                "--max-query-buffer" => config.max_query_buffer = parse_value(&arg, args.next())?,
                "--proto-max-bulk-len" => {
                    config.proto_max_bulk_len = parse_value(&arg, args.next())?
                }
                "--proto-max-depth" => config.proto_max_depth = parse_value(&arg, args.next())?,
                "--output-high-watermark" => {
                    config.output_high_watermark = parse_value(&arg, args.next())?
                }
                "--log-level" => config.log_level = value_for(&arg, args.next())?,
                _ => return Err(ConfigError::UnknownArgument(arg)),
            }
        }

        Ok(Invocation::Run(config))
    }

    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Decoder configured with this server's protocol limits.
    pub fn parser(&self) -> RespParser {
        RespParser::new()
            .with_max_bulk_len(self.proto_max_bulk_len)
            .with_max_depth(self.proto_max_depth)
    }

    pub fn connection_limits(&self) -> ConnectionLimits {
        ConnectionLimits {
            max_query_buffer: self.max_query_buffer,
            output_high_watermark: self.output_high_watermark,
        }
    }
}

fn value_for(flag: &str, value: Option<String>) -> Result<String, ConfigError> {
    value.ok_or_else(|| ConfigError::MissingValue(flag.to_string()))
}

fn parse_value<T: std::str::FromStr>(flag: &str, value: Option<String>) -> Result<T, ConfigError> {
    let value = value_for(flag, value)?;
    value.parse().map_err(|_| ConfigError::InvalidValue {
        flag: flag.to_string(),
        value,
    })
}

/// Usage text for `--help`.
pub fn help_text() -> String {
    format!(
        r#"
respite {} - A minimal RESP server on a single-threaded event loop

USAGE:
    respite [OPTIONS]

OPTIONS:
    -h, --host <HOST>                  Host to bind to (default: {})
    -p, --port <PORT>                  Port to listen on (default: {})
        --backlog <N>                  Listen backlog depth (default: {})
        --max-query-buffer <BYTES>     Max unparsed input per client (default: 1073741824)
        --proto-max-bulk-len <BYTES>   Max bulk string length (default: {})
        --proto-max-depth <N>          Max array nesting depth (default: 1024)
        --output-high-watermark <BYTES>
                                       Queued output that pauses reads (default: 1048576)
        --log-level <FILTER>           Log filter when RUST_LOG is unset (default: info)
    -v, --version                      Print version information
        --help                         Print this help message

CONNECTING:
    $ redis-cli -p {}
    127.0.0.1:{}> PING
    PONG
"#,
        crate::VERSION,
        crate::DEFAULT_HOST,
        crate::DEFAULT_PORT,
        crate::DEFAULT_BACKLOG,
        MAX_BULK_SIZE,
        crate::DEFAULT_PORT,
        crate::DEFAULT_PORT,
    )
}
