use std::env;
use std::path::PathBuf;

use crate::error::AppError;

/// Default model used for every generated stage.
pub const DEFAULT_MODEL: &str = "@cf/meta/llama-3.3-70b-instruct-fp8-fast";

/// Default stage offsets (years after the divergence).
pub const DEFAULT_OFFSETS: &[u32] = &[0, 1, 10, 50, 100, 250];

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub generation: GenerationConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub request: RequestConfig,
    pub pipeline: PipelineConfig,
    pub server: ServerConfig,
}

/// Generation endpoint configuration
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Per-attempt request budget and retry policy for stage work
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
}

/// Stage pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Stage offsets, first must be 0 and the rest strictly increasing.
    pub offsets: Vec<u32>,
    /// Opt-in single timeline key shared by every run.
    pub shared_timeline_id: Option<String>,
    /// Maximum accepted seed length in characters.
    pub max_input_chars: usize,
}

/// HTTP server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let api_key = env::var("GENERATION_API_KEY").map_err(|_| AppError::Config {
            message: "GENERATION_API_KEY is required".to_string(),
        })?;

        let base_url = match env::var("GENERATION_BASE_URL") {
            Ok(url) => url,
            Err(_) => {
                let account = env::var("GENERATION_ACCOUNT_ID").map_err(|_| AppError::Config {
                    message: "GENERATION_BASE_URL or GENERATION_ACCOUNT_ID is required"
                        .to_string(),
                })?;
                format!("https://api.cloudflare.com/client/v4/accounts/{}", account)
            }
        };

        let generation = GenerationConfig {
            api_key,
            base_url,
            model: env::var("GENERATION_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
        };

        let database = DatabaseConfig {
            path: PathBuf::from(
                env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/timeline.db".to_string()),
            ),
            max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let defaults = RequestConfig::default();
        let request = RequestConfig {
            timeout_ms: parse_var("REQUEST_TIMEOUT_MS").unwrap_or(defaults.timeout_ms),
            max_retries: parse_var("MAX_RETRIES").unwrap_or(defaults.max_retries),
            retry_delay_ms: parse_var("RETRY_DELAY_MS").unwrap_or(defaults.retry_delay_ms),
            max_retry_delay_ms: parse_var("MAX_RETRY_DELAY_MS")
                .unwrap_or(defaults.max_retry_delay_ms),
        };

        let offsets = match env::var("PIPELINE_OFFSETS") {
            Ok(raw) => parse_offsets(&raw)?,
            Err(_) => DEFAULT_OFFSETS.to_vec(),
        };

        let pipeline = PipelineConfig {
            offsets,
            shared_timeline_id: env::var("SHARED_TIMELINE_ID")
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            max_input_chars: parse_var("MAX_INPUT_CHARS").unwrap_or(2000),
        };

        let server = ServerConfig {
            bind_addr: env::var("SERVER_ADDR").unwrap_or_else(|_| "127.0.0.1:8787".to_string()),
        };

        Ok(Config {
            generation,
            database,
            logging,
            request,
            pipeline,
            server,
        })
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|s| s.parse().ok())
}

/// Parse a comma-separated offset list such as `0,1,10,100`.
///
/// The list must start at 0 and be strictly increasing.
pub fn parse_offsets(raw: &str) -> Result<Vec<u32>, AppError> {
    let offsets = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u32>().map_err(|_| AppError::Config {
                message: format!("PIPELINE_OFFSETS contains a non-numeric value: {}", s),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    validate_offsets(&offsets).map_err(|message| AppError::Config { message })?;
    Ok(offsets)
}

/// Check the offset sequence invariants shared by config and pipeline definitions.
pub(crate) fn validate_offsets(offsets: &[u32]) -> Result<(), String> {
    match offsets.first() {
        None => return Err("pipeline needs at least one stage".to_string()),
        Some(0) => {}
        Some(first) => {
            return Err(format!("first stage offset must be 0, got {}", first));
        }
    }

    if let Some(pair) = offsets.windows(2).find(|w| w[1] <= w[0]) {
        return Err(format!(
            "stage offsets must strictly increase ({} then {})",
            pair[0], pair[1]
        ));
    }

    Ok(())
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30000,
            max_retries: 3,
            retry_delay_ms: 1000,
            max_retry_delay_ms: 30000,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            offsets: DEFAULT_OFFSETS.to_vec(),
            shared_timeline_id: None,
            max_input_chars: 2000,
        }
    }
}
