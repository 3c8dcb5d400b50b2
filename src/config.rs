//! Command-line configuration for the server and the CLI client.
//!
//! Parsing is hand-rolled: both binaries take a handful of flags and
//! nothing else. Parsers return a [`CliAction`] instead of exiting so the
//! binaries decide how to print help or version text.

use crate::connection::ConnectionLimits;
use crate::protocol::FrameLimits;
use crate::storage::DEFAULT_MAX_LOAD_FACTOR;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Errors produced while parsing command-line arguments.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{0} requires a value")]
    MissingValue(String),

    #[error("invalid value for {flag}: {value}")]
    InvalidValue { flag: String, value: String },

    #[error("unknown argument: {0}")]
    UnknownArgument(String),

    #[error("no command given")]
    MissingCommand,
}

/// What the binary should do after parsing its arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum CliAction<T> {
    Run(T),
    Help,
    Version,
}

fn take_value<I: Iterator<Item = String>>(flag: &str, args: &mut I) -> Result<String, ConfigError> {
    args.next()
        .ok_or_else(|| ConfigError::MissingValue(flag.to_string()))
}

fn parse_value<T, I>(flag: &str, args: &mut I) -> Result<T, ConfigError>
where
    T: FromStr,
    I: Iterator<Item = String>,
{
    let value = take_value(flag, args)?;
    value.parse().map_err(|_| ConfigError::InvalidValue {
        flag: flag.to_string(),
        value,
    })
}

fn parse_millis<I: Iterator<Item = String>>(flag: &str, args: &mut I) -> Result<Duration, ConfigError> {
    let ms: u64 = parse_value(flag, args)?;
    if ms == 0 {
        return Err(ConfigError::InvalidValue {
            flag: flag.to_string(),
            value: ms.to_string(),
        });
    }
    Ok(Duration::from_millis(ms))
}

/// Server configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Connections silent for this long are closed
    pub idle_timeout: Duration,
    /// TTL given to keys set without one
    pub default_ttl: Duration,
    /// Hash index load factor that triggers a resize
    pub max_load_factor: f64,
    /// Per-connection frame and buffer limits
    pub limits: ConnectionLimits,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: crate::DEFAULT_HOST.to_string(),
            port: crate::DEFAULT_PORT,
            idle_timeout: crate::IDLE_TIMEOUT,
            default_ttl: crate::DEFAULT_TTL,
            max_load_factor: DEFAULT_MAX_LOAD_FACTOR,
            limits: ConnectionLimits::default(),
        }
    }
}

impl ServerConfig {
    /// Parses server flags. `args` excludes the program name.
    pub fn from_args<I, S>(args: I) -> Result<CliAction<Self>, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut config = ServerConfig::default();
        let mut args = args.into_iter().map(Into::into);

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--host" | "-h" => config.host = take_value(&arg, &mut args)?,
                "--port" | "-p" => config.port = parse_value(&arg, &mut args)?,
                "--idle-timeout" => config.idle_timeout = parse_millis(&arg, &mut args)?,
                "--default-ttl" => config.default_ttl = parse_millis(&arg, &mut args)?,
                "--max-load-factor" => {
                    let factor: f64 = parse_value(&arg, &mut args)?;
                    if !(factor.is_finite() && factor > 0.0) {
                        return Err(ConfigError::InvalidValue {
                            flag: arg,
                            value: factor.to_string(),
                        });
                    }
                    config.max_load_factor = factor;
                }
                "--help" => return Ok(CliAction::Help),
                "--version" | "-v" => return Ok(CliAction::Version),
                _ => return Err(ConfigError::UnknownArgument(arg)),
            }
        }

        Ok(CliAction::Run(config))
    }

    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Frame limits for incoming requests.
    pub fn frame_limits(&self) -> FrameLimits {
        self.limits.frame
    }
}

/// CLI client configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Command name followed by its arguments
    pub command: Vec<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: crate::DEFAULT_PORT,
            command: Vec::new(),
        }
    }
}

impl ClientConfig {
    /// Parses client flags followed by the command. Everything from the
    /// first non-flag argument onwards belongs to the command.
    pub fn from_args<I, S>(args: I) -> Result<CliAction<Self>, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut config = ClientConfig::default();
        let mut args = args.into_iter().map(Into::into);

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--host" | "-h" => config.host = take_value(&arg, &mut args)?,
                "--port" | "-p" => config.port = parse_value(&arg, &mut args)?,
                "--help" => return Ok(CliAction::Help),
                "--version" | "-v" => return Ok(CliAction::Version),
                _ => {
                    config.command.push(arg);
                    config.command.extend(args.by_ref());
                }
            }
        }

        if config.command.is_empty() {
            return Err(ConfigError::MissingCommand);
        }
        Ok(CliAction::Run(config))
    }

    /// Returns the server address as a string
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(action: CliAction<ServerConfig>) -> ServerConfig {
        match action {
            CliAction::Run(config) => config,
            other => panic!("expected Run, got {:?}", other),
        }
    }

    #[test]
    fn test_server_defaults() {
        let config = run(ServerConfig::from_args(Vec::<String>::new()).unwrap());
        assert_eq!(config.bind_address(), "0.0.0.0:1234");
        assert_eq!(config.idle_timeout, Duration::from_millis(5000));
        assert_eq!(config.default_ttl, Duration::from_millis(20_000));
        assert_eq!(config.max_load_factor, 1.0);
        assert_eq!(config.frame_limits().max_frame, 32 << 20);
        assert_eq!(config.frame_limits().max_args, 200_000);
    }

    #[test]
    fn test_server_flags() {
        let config = run(
            ServerConfig::from_args([
                "--host",
                "127.0.0.1",
                "-p",
                "4000",
                "--idle-timeout",
                "250",
                "--default-ttl",
                "100",
                "--max-load-factor",
                "0.75",
            ])
            .unwrap(),
        );
        assert_eq!(config.bind_address(), "127.0.0.1:4000");
        assert_eq!(config.idle_timeout, Duration::from_millis(250));
        assert_eq!(config.default_ttl, Duration::from_millis(100));
        assert_eq!(config.max_load_factor, 0.75);
    }

    #[test]
    fn test_server_help_and_version() {
        assert_eq!(ServerConfig::from_args(["--help"]), Ok(CliAction::Help));
        assert_eq!(ServerConfig::from_args(["-v"]), Ok(CliAction::Version));
    }

    #[test]
    fn test_server_errors() {
        assert_eq!(
            ServerConfig::from_args(["--port"]),
            Err(ConfigError::MissingValue("--port".into()))
        );
        assert!(matches!(
            ServerConfig::from_args(["--port", "99999"]),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            ServerConfig::from_args(["--idle-timeout", "0"]),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            ServerConfig::from_args(["--max-load-factor", "-1"]),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert_eq!(
            ServerConfig::from_args(["--bogus"]),
            Err(ConfigError::UnknownArgument("--bogus".into()))
        );
    }

    #[test]
    fn test_client_command_after_flags() {
        let action = ClientConfig::from_args(["-p", "4000", "set", "k", "--port"]).unwrap();
        let CliAction::Run(config) = action else {
            panic!("expected Run");
        };
        assert_eq!(config.address(), "127.0.0.1:4000");
        assert_eq!(config.command, vec!["set", "k", "--port"]);
    }

    #[test]
    fn test_client_requires_command() {
        assert_eq!(
            ClientConfig::from_args(["--host", "localhost"]),
            Err(ConfigError::MissingCommand)
        );
    }
}
