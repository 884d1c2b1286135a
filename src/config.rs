//! Configuration management for the solo mining client
//!
//! Supports configuration via command line arguments, environment variables,
//! and configuration files (YAML/JSON) with validation and defaults. The
//! parsed [`Config`] is turned into the immutable [`ClientConfig`] the
//! client state machine runs with.

use crate::block::DEV_FEE_PERCENT;
use crate::coin::{Coin, MiningAddress, Payee};
use crate::rpc::{Credentials, Endpoint};
use crate::{Algorithm, Error, Result};
use clap::parser::ValueSource;
use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level: tracing::Level = (*self).into();
        write!(f, "{}", level.as_str().to_ascii_lowercase())
    }
}

/// Complete configuration for the solo mining client
#[derive(Debug, Clone, Parser, Serialize, Deserialize)]
#[command(
    name = "solo-rpc-miner",
    version = env!("CARGO_PKG_VERSION"),
    about = "Solo mining client for getblocktemplate/submitblock nodes",
    long_about = "Polls a full node for block templates, builds block candidates for the attached mining backends and submits solved blocks back to the node"
)]
pub struct Config {
    /// Print the parsed configuration and exit
    #[arg(long)]
    #[serde(skip)]
    pub print_config: bool,

    /// Configuration file path (YAML or JSON)
    #[arg(long, value_name = "FILE")]
    #[serde(skip)]
    pub config_file: Option<PathBuf>,

    /// Node RPC host
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    #[serde(default = "default_host")]
    pub host: String,

    /// Node RPC port
    #[arg(short = 'p', long, default_value = "10225")]
    #[serde(default = "default_port")]
    pub port: u16,

    /// Use TLS to connect to the node
    #[arg(short = 't', long)]
    #[serde(default)]
    pub tls: bool,

    /// Accept self-signed TLS certificates
    #[arg(short = 'x', long)]
    #[serde(default)]
    pub insecure: bool,

    /// RPC user name
    #[arg(short = 'u', long, env = "RPC_USER")]
    #[serde(default)]
    pub user: Option<String>,

    /// RPC password
    #[arg(short = 'P', long, env = "RPC_PASSWORD", hide_env_values = true)]
    #[serde(default, skip_serializing)]
    pub password: Option<String>,

    /// Payout address, `[coin/][devAddress:]miningAddress`
    #[arg(short = 'a', long)]
    #[serde(default)]
    pub address: Option<String>,

    /// Coin used when the address carries no coin prefix
    #[arg(short = 'c', long, default_value = "raptoreum")]
    #[serde(default = "default_coin")]
    pub coin: String,

    /// Algorithm tag for jobs (default: the coin's algorithm)
    #[arg(long)]
    #[serde(default)]
    pub algo: Option<String>,

    /// Template polling interval in milliseconds
    #[arg(long, default_value = "1000")]
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,

    /// Maximum job age in milliseconds before a template is refetched
    #[arg(long, default_value = "15000")]
    #[serde(default = "default_job_timeout")]
    pub job_timeout: u64,

    /// Pause before reconnecting after a failure, in milliseconds
    #[arg(long, default_value = "5000")]
    #[serde(default = "default_retry_pause")]
    pub retry_pause: u64,

    /// HTTP request timeout in milliseconds
    #[arg(long, default_value = "30000")]
    #[serde(default = "default_http_timeout")]
    pub http_timeout: u64,

    /// Log level
    #[arg(short = 'l', long, default_value = "info")]
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,

    /// Also write logs to this file
    #[arg(long, value_name = "FILE")]
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    #[serde(default)]
    pub log_json: bool,

    /// Ask the node to mine N blocks to the mining address once connected
    /// (regtest)
    #[arg(long, value_name = "N")]
    #[serde(default)]
    pub generate: Option<u32>,
}

impl Config {
    /// Parse the command line, merge the config file and validate
    pub async fn load() -> Result<Self> {
        let matches = Self::command().get_matches();
        Self::load_from_matches(&matches).await
    }

    async fn load_from_matches(matches: &ArgMatches) -> Result<Self> {
        let mut config = Self::from_arg_matches(matches)
            .map_err(|e| Error::config(format!("Invalid arguments: {}", e)))?;

        if let Some(config_file) = config.config_file.clone() {
            let file_config = Self::load_from_file(&config_file).await?;
            config = config.merge_with_file(file_config, |id| {
                matches!(
                    matches.value_source(id),
                    Some(ValueSource::CommandLine | ValueSource::EnvVariable)
                )
            });
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file
    async fn load_from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;

        if path.extension().and_then(|s| s.to_str()) == Some("json") {
            serde_json::from_str(&content).map_err(Error::from)
        } else {
            serde_yaml::from_str(&content).map_err(Error::from)
        }
    }

    /// Take file values for every option not given explicitly
    fn merge_with_file(mut self, file: Self, explicit: impl Fn(&str) -> bool) -> Self {
        if !explicit("host") {
            self.host = file.host;
        }
        if !explicit("port") {
            self.port = file.port;
        }
        if !explicit("tls") {
            self.tls = file.tls;
        }
        if !explicit("insecure") {
            self.insecure = file.insecure;
        }
        if !explicit("user") {
            self.user = file.user;
        }
        if !explicit("password") {
            self.password = file.password;
        }
        if !explicit("address") {
            self.address = file.address;
        }
        if !explicit("coin") {
            self.coin = file.coin;
        }
        if !explicit("algo") {
            self.algo = file.algo;
        }
        if !explicit("poll_interval") {
            self.poll_interval = file.poll_interval;
        }
        if !explicit("job_timeout") {
            self.job_timeout = file.job_timeout;
        }
        if !explicit("retry_pause") {
            self.retry_pause = file.retry_pause;
        }
        if !explicit("http_timeout") {
            self.http_timeout = file.http_timeout;
        }
        if !explicit("log_level") {
            self.log_level = file.log_level;
        }
        if !explicit("log_file") {
            self.log_file = file.log_file;
        }
        if !explicit("log_json") {
            self.log_json = file.log_json;
        }
        if !explicit("generate") {
            self.generate = file.generate;
        }
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.endpoint().url())
            .map_err(|e| Error::config(format!("Invalid node URL: {}", e)))?;

        let coin = Coin::from_name(&self.coin)?;
        let address = self.mining_address()?;
        Payee::resolve(&address, coin)?;

        if self.poll_interval == 0 {
            return Err(Error::config("Poll interval must be greater than 0"));
        }
        if self.job_timeout == 0 {
            return Err(Error::config("Job timeout must be greater than 0"));
        }
        if self.retry_pause == 0 {
            return Err(Error::config("Retry pause must be greater than 0"));
        }
        if self.http_timeout == 0 {
            return Err(Error::config("HTTP timeout must be greater than 0"));
        }
        if self.password.is_some() && self.user.is_none() {
            return Err(Error::config("RPC password given without a user"));
        }

        Ok(())
    }

    /// Node endpoint
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port, self.tls)
    }

    /// RPC credentials, when a user is configured
    pub fn credentials(&self) -> Option<Credentials> {
        self.user.as_ref().map(|user| Credentials {
            user: user.clone(),
            password: self.password.clone().unwrap_or_default(),
        })
    }

    /// Parsed payout address argument
    pub fn mining_address(&self) -> Result<MiningAddress> {
        self.address
            .as_deref()
            .ok_or_else(|| Error::config("A mining address is required, use --address"))?
            .parse()
    }

    /// Immutable client configuration
    pub fn client_config(&self) -> Result<ClientConfig> {
        let mut config = ClientConfig::new(self.endpoint(), self.mining_address()?)
            .with_coin(Coin::from_name(&self.coin)?)
            .with_poll_interval(Duration::from_millis(self.poll_interval))
            .with_job_timeout(Duration::from_millis(self.job_timeout))
            .with_retry_pause(Duration::from_millis(self.retry_pause));

        if let Some(credentials) = self.credentials() {
            config = config.with_credentials(credentials);
        }
        if let Some(algo) = &self.algo {
            config = config.with_algorithm(Algorithm::new(algo.clone()));
        }
        Ok(config)
    }

    /// Get HTTP timeout duration
    pub fn http_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.http_timeout)
    }
}

// Default value functions for serde
fn default_host() -> String { "127.0.0.1".to_string() }
fn default_port() -> u16 { 10225 }
fn default_coin() -> String { "raptoreum".to_string() }
fn default_poll_interval() -> u64 { 1000 }
fn default_job_timeout() -> u64 { 15000 }
fn default_retry_pause() -> u64 { 5000 }
fn default_http_timeout() -> u64 { 30000 }
fn default_log_level() -> LogLevel { LogLevel::Info }

/// Settings a client runs with. Replaced wholesale on reconfiguration.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub endpoint: Endpoint,
    pub credentials: Option<Credentials>,
    pub address: MiningAddress,
    /// Coin used when the address has no coin prefix
    pub coin: Coin,
    /// Overrides the coin's algorithm tag
    pub algorithm: Option<Algorithm>,
    pub poll_interval: Duration,
    pub job_timeout: Duration,
    pub retry_pause: Duration,
    pub dev_fee_percent: u8,
    /// Fixed seed for the dev-round draw
    pub seed: Option<u64>,
}

impl ClientConfig {
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);
    pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_millis(15000);
    pub const DEFAULT_RETRY_PAUSE: Duration = Duration::from_millis(5000);

    pub fn new(endpoint: Endpoint, address: MiningAddress) -> Self {
        Self {
            endpoint,
            credentials: None,
            address,
            coin: Coin::RAPTOREUM,
            algorithm: None,
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
            job_timeout: Self::DEFAULT_JOB_TIMEOUT,
            retry_pause: Self::DEFAULT_RETRY_PAUSE,
            dev_fee_percent: DEV_FEE_PERCENT,
            seed: None,
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_coin(mut self, coin: Coin) -> Self {
        self.coin = coin;
        self
    }

    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = Some(algorithm);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn with_retry_pause(mut self, pause: Duration) -> Self {
        self.retry_pause = pause;
        self
    }

    pub fn with_dev_fee_percent(mut self, percent: u8) -> Self {
        self.dev_fee_percent = percent;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}
