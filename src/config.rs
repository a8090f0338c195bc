use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// GPT Limit Tester - concurrent chat completion load tester
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Server host address
    #[arg(short = 'H', long, env = "SERVER_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Server port
    #[arg(short, long, env = "PORT", default_value = "3000")]
    pub port: u16,

    /// Upstream API key
    #[arg(short = 'k', long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Upstream base URL
    #[arg(long, env = "OPENAI_BASE_URL", default_value = "https://api.openai.com/v1")]
    pub base_url: String,

    /// Directory for stored test runs
    #[arg(short = 'd', long, env = "DATA_DIR", default_value = "data")]
    pub data_dir: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log format (pretty, json)
    #[arg(long, env = "LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,

    /// SSE keep-alive interval in seconds
    #[arg(long, env = "SSE_KEEP_ALIVE_SECS", default_value = "20")]
    pub keep_alive: u64,

    /// How long a new test waits for its event subscriber, in milliseconds
    #[arg(long, env = "SUBSCRIBER_WAIT_MS", default_value = "2000")]
    pub subscriber_wait_ms: u64,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "300")]
    pub http_timeout: u64,

    /// Serve a built-in mock upstream and send all completions to it
    #[arg(long, env = "MOCK_UPSTREAM")]
    pub mock_upstream: bool,
}

#[derive(Clone, Debug)]
pub struct Config {
    // Server settings
    pub server_host: String,
    pub server_port: u16,

    // Upstream
    pub api_key: Option<String>,
    pub base_url: String,
    pub mock_upstream: bool,

    // Storage
    pub data_dir: PathBuf,

    // Event stream
    pub keep_alive: Duration,
    pub subscriber_wait: Duration,

    // HTTP client
    pub http_max_connections: usize,
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,

    // Logging
    pub log_level: String,
    pub log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl Config {
    /// Load configuration from all sources with priority: CLI > ENV > .env > defaults
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        Ok(Self::from_args(CliArgs::parse()))
    }

    /// Build configuration from parsed arguments plus env-only settings
    pub fn from_args(args: CliArgs) -> Self {
        Config {
            server_host: args.host,
            server_port: args.port,

            // An empty key counts as no key
            api_key: args.api_key.filter(|key| !key.trim().is_empty()),
            base_url: args.base_url.trim_end_matches('/').to_string(),
            mock_upstream: args.mock_upstream,

            data_dir: expand_tilde(&args.data_dir),

            keep_alive: Duration::from_secs(args.keep_alive),
            subscriber_wait: Duration::from_millis(args.subscriber_wait_ms),

            http_max_connections: env_or("HTTP_MAX_CONNECTIONS", 100),
            http_connect_timeout: env_or("HTTP_CONNECT_TIMEOUT", 30),
            http_request_timeout: args.http_timeout,

            log_level: args.log_level,
            log_format: parse_log_format(&args.log_format),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.server_port == 0 {
            anyhow::bail!("PORT must be greater than 0");
        }

        if self.keep_alive.is_zero() {
            anyhow::bail!("SSE_KEEP_ALIVE_SECS must be greater than 0");
        }

        if self.base_url.trim().is_empty() {
            anyhow::bail!("OPENAI_BASE_URL must not be empty");
        }

        if self.data_dir.exists() && !self.data_dir.is_dir() {
            anyhow::bail!(
                "DATA_DIR exists but is not a directory: {}",
                self.data_dir.display()
            );
        }

        Ok(())
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Parse log format from string
fn parse_log_format(s: &str) -> LogFormat {
    match s.to_lowercase().as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Pretty,
    }
}
