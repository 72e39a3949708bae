use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("CSV export error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Invalid value '{value}' for {field}: {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Malformed component manifest at line {line}: {message}")]
    ManifestError { line: usize, message: String },

    #[error("Component species '{name}' is declared more than once")]
    DuplicateSpecies { name: String },

    #[error("Unknown component species '{name}'")]
    UnknownSpecies { name: String },

    #[error("Attribute '{attribute}' of '{instance}' has no value and no formula")]
    UnresolvedAttribute { instance: String, attribute: String },

    #[error("Attribute '{attribute}' of '{instance}' depends on itself")]
    AttributeCycle { instance: String, attribute: String },

    #[error("Instance name '{name}' is already used in platform '{topology}'")]
    DuplicateInstance { topology: String, name: String },

    #[error("No instance named '{name}' in platform '{topology}'")]
    UnknownInstance { topology: String, name: String },

    #[error("Instance '{instance}' cannot take another {direction} port (limit {limit})")]
    PortCapacityExceeded {
        instance: String,
        direction: PortDirection,
        limit: u32,
    },

    #[error("Port '{port}' of '{instance}' is already bound")]
    PortAlreadyBound { instance: String, port: String },

    #[error("Unsupported document format: {format}")]
    UnsupportedFormat { format: String },

    #[error("Invalid time quantity '{value}': {reason}")]
    InvalidTime { value: String, reason: String },

    #[error("Simulation engine failed: {message}")]
    ExecutionFailure { message: String },

    #[error("Simulation interrupted")]
    Interrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    Input,
    Output,
}

impl std::fmt::Display for PortDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortDirection::Input => write!(f, "input"),
            PortDirection::Output => write!(f, "output"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Topology,
    Serialization,
    Execution,
    Io,
}

impl PlatformError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            PlatformError::ConfigError { .. }
            | PlatformError::TomlError(_)
            | PlatformError::MissingConfigError { .. }
            | PlatformError::InvalidConfigValueError { .. }
            | PlatformError::ManifestError { .. }
            | PlatformError::DuplicateSpecies { .. }
            | PlatformError::UnknownSpecies { .. }
            | PlatformError::UnresolvedAttribute { .. }
            | PlatformError::AttributeCycle { .. } => ErrorCategory::Configuration,
            PlatformError::DuplicateInstance { .. }
            | PlatformError::UnknownInstance { .. }
            | PlatformError::PortCapacityExceeded { .. }
            | PlatformError::PortAlreadyBound { .. } => ErrorCategory::Topology,
            PlatformError::UnsupportedFormat { .. } | PlatformError::InvalidTime { .. } => {
                ErrorCategory::Serialization
            }
            PlatformError::ExecutionFailure { .. } | PlatformError::Interrupted => {
                ErrorCategory::Execution
            }
            PlatformError::IoError(_)
            | PlatformError::SerializationError(_)
            | PlatformError::CsvError(_) => ErrorCategory::Io,
        }
    }

    /// Configuration problems leave no usable system behind.
    pub fn is_fatal(&self) -> bool {
        self.category() == ErrorCategory::Configuration
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            PlatformError::MissingConfigError { .. } => {
                "Set PLATSIM_ENGINE to the path of the simulation engine executable"
            }
            PlatformError::ManifestError { .. } | PlatformError::DuplicateSpecies { .. } => {
                "Check that the engine binary is complete and matches this tool's version"
            }
            PlatformError::UnknownSpecies { .. } => {
                "Run with --schema to list the component species the engine provides"
            }
            PlatformError::UnresolvedAttribute { .. } => {
                "Set the attribute on the instance or register a formula for it"
            }
            PlatformError::AttributeCycle { .. } => {
                "Break the cycle by setting one of the attributes explicitly"
            }
            PlatformError::PortCapacityExceeded { .. } | PlatformError::PortAlreadyBound { .. } => {
                "Review the links of the platform description"
            }
            PlatformError::UnsupportedFormat { .. } => "Use the 'xml' document format",
            PlatformError::Interrupted => "Re-run the simulation when ready",
            _ => "Check the logs for details",
        }
    }
}

pub type Result<T> = std::result::Result<T, PlatformError>;
