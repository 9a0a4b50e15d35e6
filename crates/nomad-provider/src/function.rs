//! Function definitions and validation.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use std::time::Duration;

use crate::error::ProviderError;

/// Maximum length for a function name (one DNS label).
pub const MAX_FUNCTION_NAME_LENGTH: usize = 63;

/// Replicas scheduled when a function does not declare a minimum.
pub const DEFAULT_MIN_REPLICAS: u32 = 1;

/// Upper replica bound when a function does not declare one.
pub const DEFAULT_MAX_REPLICAS: u32 = 20;

/// Port a function's watchdog listens on when not overridden.
pub const DEFAULT_FUNCTION_PORT: u16 = 8080;

/// CPU reserved for a function without limits, in MHz.
pub const DEFAULT_CPU_MHZ: u32 = 100;

/// Memory reserved for a function without limits, in MB.
pub const DEFAULT_MEMORY_MB: u32 = 128;

static FUNCTION_NAME_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([a-z0-9-]*[a-z0-9])?$").ok());

/// A function as the provider understands it, independent of any wire format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSpec {
    pub name: String,
    pub image: String,
    /// Process the watchdog forks per request (`fprocess`).
    pub env_process: Option<String>,
    pub env: BTreeMap<String, String>,
    pub limits: ResourceLimits,
    pub port: u16,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub secrets: Vec<String>,
    /// Placement constraints in `<attribute> <operator> <value>` form.
    pub constraints: Vec<String>,
    pub read_only_root_filesystem: bool,
    pub scaling: ScalingBounds,
    pub timeout: Option<Duration>,
}

impl FunctionSpec {
    /// A spec with defaults for everything but identity.
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            env_process: None,
            env: BTreeMap::new(),
            limits: ResourceLimits::default(),
            port: DEFAULT_FUNCTION_PORT,
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            secrets: Vec::new(),
            constraints: Vec::new(),
            read_only_root_filesystem: false,
            scaling: ScalingBounds::default(),
            timeout: None,
        }
    }

    /// Rejects specs that cannot be scheduled.
    pub fn validate(&self) -> Result<(), ProviderError> {
        if self.name.is_empty() {
            return Err(ProviderError::invalid_spec("function name cannot be empty"));
        }
        validate_function_name(&self.name)
            .map_err(|e| ProviderError::invalid_spec(e.to_string()))?;

        if self.image.trim().is_empty() {
            return Err(ProviderError::invalid_spec("image cannot be empty"));
        }

        if self.scaling.min > self.scaling.max {
            return Err(ProviderError::invalid_spec(format!(
                "minimum replicas ({}) exceeds maximum ({})",
                self.scaling.min, self.scaling.max
            )));
        }

        if self.port == 0 {
            return Err(ProviderError::invalid_spec("port cannot be zero"));
        }

        Ok(())
    }
}

/// Resources reserved for each replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    pub cpu_mhz: u32,
    pub memory_mb: u32,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_mhz: DEFAULT_CPU_MHZ,
            memory_mb: DEFAULT_MEMORY_MB,
        }
    }
}

/// Replica bounds declared by a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalingBounds {
    pub min: u32,
    pub max: u32,
}

impl Default for ScalingBounds {
    fn default() -> Self {
        Self {
            min: DEFAULT_MIN_REPLICAS,
            max: DEFAULT_MAX_REPLICAS,
        }
    }
}

impl ScalingBounds {
    /// Replicas to schedule on first deploy; never zero.
    pub fn initial_count(&self) -> u32 {
        self.min.max(1)
    }
}

/// Validate a function name.
pub fn validate_function_name(name: &str) -> Result<(), ProviderError> {
    if name.is_empty() {
        return Err(ProviderError::InvalidFunctionName(
            "function name cannot be empty".into(),
        ));
    }

    if name.len() > MAX_FUNCTION_NAME_LENGTH {
        return Err(ProviderError::InvalidFunctionName(format!(
            "function name exceeds maximum length of {MAX_FUNCTION_NAME_LENGTH} characters"
        )));
    }

    let Some(pattern) = FUNCTION_NAME_PATTERN.as_ref() else {
        return Err(ProviderError::InvalidFunctionName(
            "function name validation unavailable".into(),
        ));
    };

    if !pattern.is_match(name) {
        return Err(ProviderError::InvalidFunctionName(format!(
            "{name:?} must contain only lowercase letters, numbers, and hyphens"
        )));
    }

    Ok(())
}

/// Converts a memory quantity (`128m`, `128Mi`, `1G`, `1Gi`, bytes) to megabytes.
pub fn parse_memory_mb(value: &str) -> Result<u32, ProviderError> {
    let value = value.trim();
    let invalid = || ProviderError::invalid_spec(format!("invalid memory quantity: {value:?}"));

    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, unit) = value.split_at(split);
    let amount: u64 = digits.parse().map_err(|_| invalid())?;

    let megabytes = match unit.to_ascii_lowercase().as_str() {
        "" => amount / (1024 * 1024),
        "k" | "ki" => amount / 1024,
        "m" | "mi" => amount,
        "g" | "gi" => amount.saturating_mul(1024),
        _ => return Err(invalid()),
    };

    u32::try_from(megabytes)
        .ok()
        .filter(|mb| *mb > 0)
        .ok_or_else(invalid)
}

/// Converts a CPU quantity (`500m` millicores or `0.5` cores) to MHz.
pub fn parse_cpu_mhz(value: &str) -> Result<u32, ProviderError> {
    let value = value.trim();
    let invalid = || ProviderError::invalid_spec(format!("invalid cpu quantity: {value:?}"));

    let millicores = if let Some(milli) = value.strip_suffix('m') {
        milli.parse::<u64>().map_err(|_| invalid())?
    } else {
        let cores: f64 = value.parse().map_err(|_| invalid())?;
        if !cores.is_finite() || cores < 0.0 {
            return Err(invalid());
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let milli = (cores * 1000.0).round() as u64;
        milli
    };

    // 1 core == 1000 MHz
    u32::try_from(millicores)
        .ok()
        .filter(|mhz| *mhz > 0)
        .ok_or_else(invalid)
}
