use clap::{Parser, ValueEnum};
use image::imageops::FilterType;
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::{PipelineError, Result};

pub const DEFAULT_INPUT_KEY: &str = "input_1";
pub const DEFAULT_OUTPUT_PREFIX: &str = "output";
pub const DEFAULT_IMAGE_SIZE: u32 = 512;
pub const DEFAULT_THRESHOLD: f32 = 0.5;

/// What the handler hands back to the trigger framework when a stage fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ErrorPolicy {
    /// Log the failure and return `false`.
    Report,
    /// Return the error so the host's own retry applies.
    Propagate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ResizeFilter {
    Nearest,
    Triangle,
    CatmullRom,
    Gaussian,
    Lanczos3,
}

impl ResizeFilter {
    pub const fn filter_type(self) -> FilterType {
        match self {
            Self::Nearest => FilterType::Nearest,
            Self::Triangle => FilterType::Triangle,
            Self::CatmullRom => FilterType::CatmullRom,
            Self::Gaussian => FilterType::Gaussian,
            Self::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

/// Process-wide settings, read once at startup.
///
/// Every field can be given on the command line or through its environment
/// variable, which is how the Lambda host passes them.
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Name of the SageMaker inference endpoint
    #[arg(long, env = "ENDPOINT_NAME")]
    pub endpoint_name: Option<String>,

    /// Region the endpoint (and the client) live in
    #[arg(long, env = "REGION_NAME")]
    pub region: Option<String>,

    /// JSON key the model expects the input tensor under
    #[arg(long, env = "INPUT_KEY_NAME", default_value = DEFAULT_INPUT_KEY)]
    pub input_key: String,

    /// Key prefix masks are written under, in the source bucket
    #[arg(long, env = "OUTPUT_PREFIX", default_value = DEFAULT_OUTPUT_PREFIX)]
    pub output_prefix: String,

    #[arg(long, env = "IMAGE_SIZE", default_value_t = DEFAULT_IMAGE_SIZE)]
    pub image_size: u32,

    #[arg(
        long,
        env = "MASK_THRESHOLD",
        default_value_t = DEFAULT_THRESHOLD,
        value_parser = check_threshold
    )]
    pub threshold: f32,

    /// Rescale pixel intensities to [0, 1] before inference
    #[arg(long, env = "NORMALIZE_INPUT")]
    pub normalize: bool,

    #[arg(long, env = "RESIZE_FILTER", value_enum, default_value_t = ResizeFilter::CatmullRom)]
    pub resize_filter: ResizeFilter,

    #[arg(long, env = "ERROR_POLICY", value_enum, default_value_t = ErrorPolicy::Report)]
    pub error_policy: ErrorPolicy,

    /// Where rendered masks are written before upload (defaults to the OS temp dir)
    #[arg(long, env = "SCRATCH_DIR")]
    pub scratch_dir: Option<PathBuf>,

    #[arg(long, env = "CONNECT_TIMEOUT_SECS", default_value_t = 5)]
    pub connect_timeout_secs: u64,

    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = 60)]
    pub request_timeout_secs: u64,

    /// Total attempts per collaborator call; 1 disables retries
    #[arg(long, env = "MAX_ATTEMPTS", default_value_t = 1)]
    pub max_attempts: u32,
}

impl Config {
    /// Defaults for everything except the endpoint coordinates.
    pub fn new(endpoint_name: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            endpoint_name: Some(endpoint_name.into()),
            region: Some(region.into()),
            input_key: DEFAULT_INPUT_KEY.to_string(),
            output_prefix: DEFAULT_OUTPUT_PREFIX.to_string(),
            image_size: DEFAULT_IMAGE_SIZE,
            threshold: DEFAULT_THRESHOLD,
            normalize: false,
            resize_filter: ResizeFilter::CatmullRom,
            error_policy: ErrorPolicy::Report,
            scratch_dir: None,
            connect_timeout_secs: 5,
            request_timeout_secs: 60,
            max_attempts: 1,
        }
    }

    pub fn with_input_key(mut self, input_key: impl Into<String>) -> Self {
        self.input_key = input_key.into();
        self
    }

    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    pub fn with_request_timeout_secs(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.endpoint_name()?;
        self.region()?;

        if self.input_key.trim().is_empty() {
            return Err(PipelineError::configuration("input key must not be empty"));
        }
        if self.output_prefix.trim_matches('/').is_empty() {
            return Err(PipelineError::configuration(
                "output prefix must not be empty",
            ));
        }
        if self.image_size == 0 {
            return Err(PipelineError::configuration("image size must be positive"));
        }
        threshold_in_range(self.threshold).map_err(PipelineError::configuration)?;
        if self.max_attempts == 0 {
            return Err(PipelineError::configuration("max attempts must be at least 1"));
        }
        if self.connect_timeout_secs == 0 || self.request_timeout_secs == 0 {
            return Err(PipelineError::configuration("timeouts must be positive"));
        }
        Ok(())
    }

    pub fn endpoint_name(&self) -> Result<&str> {
        required(self.endpoint_name.as_deref(), "ENDPOINT_NAME")
    }

    pub fn region(&self) -> Result<&str> {
        required(self.region.as_deref(), "REGION_NAME")
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.scratch_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn required<'a>(value: Option<&'a str>, name: &str) -> Result<&'a str> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(PipelineError::configuration(format!("{name} is not set"))),
    }
}

fn check_threshold(s: &str) -> std::result::Result<f32, String> {
    let value: f32 = s.parse().map_err(|_| format!("{s} is not a number"))?;
    threshold_in_range(value)
}

fn threshold_in_range(value: f32) -> std::result::Result<f32, String> {
    if value > 0.0 && value < 1.0 {
        Ok(value)
    } else {
        Err(format!("threshold {value} must lie strictly between 0 and 1"))
    }
}
