//! Process exit codes for the pms-core CLI.
//!
//! Ranges:
//! - 0: success
//! - 10-19: caller errors (arguments, settings, inputs, unreliable result)
//! - 20-29: internal and I/O errors

use pms_common::{Error, ErrorCategory};

/// Stable exit codes; automation may depend on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Ok = 0,

    /// Malformed command line.
    ArgsError = 10,
    /// Settings file missing, unparseable or invalid.
    ConfigError = 11,
    /// Scenario, design or estimation rule rejected.
    InvalidInput = 12,
    /// Too many simulated futures failed for a trustworthy estimate.
    Unreliable = 13,

    /// Bug or sampler failure outside any future.
    InternalError = 20,
    IoError = 21,
}

impl ExitCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn is_success(self) -> bool {
        self == ExitCode::Ok
    }

    pub fn code_name(self) -> &'static str {
        match self {
            ExitCode::Ok => "OK",
            ExitCode::ArgsError => "ARGS_ERROR",
            ExitCode::ConfigError => "CONFIG_ERROR",
            ExitCode::InvalidInput => "INVALID_INPUT",
            ExitCode::Unreliable => "UNRELIABLE",
            ExitCode::InternalError => "INTERNAL_ERROR",
            ExitCode::IoError => "IO_ERROR",
        }
    }

    /// Exit code for a failed command.
    pub fn for_error(err: &Error) -> ExitCode {
        match err {
            Error::UnreliableEstimate { .. } => ExitCode::Unreliable,
            Error::EstimationRuleUnsupported(_) => ExitCode::InvalidInput,
            Error::Json(_) => ExitCode::InvalidInput,
            _ => match err.category() {
                ErrorCategory::Config => ExitCode::ConfigError,
                ErrorCategory::Design => ExitCode::InvalidInput,
                ErrorCategory::Io => ExitCode::IoError,
                ErrorCategory::Inference | ErrorCategory::Utility => ExitCode::InternalError,
            },
        }
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code.as_i32()
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.code_name(), self.as_i32())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(ExitCode::Ok.as_i32(), 0);
        assert_eq!(ExitCode::ArgsError.as_i32(), 10);
        assert_eq!(ExitCode::ConfigError.as_i32(), 11);
        assert_eq!(ExitCode::InvalidInput.as_i32(), 12);
        assert_eq!(ExitCode::Unreliable.as_i32(), 13);
        assert_eq!(ExitCode::InternalError.as_i32(), 20);
        assert_eq!(ExitCode::IoError.as_i32(), 21);
    }

    #[test]
    fn errors_map_to_codes() {
        assert_eq!(
            ExitCode::for_error(&Error::UnreliableEstimate { failures: 6, total: 10 }),
            ExitCode::Unreliable
        );
        assert_eq!(
            ExitCode::for_error(&Error::InvalidDesign("sum".into())),
            ExitCode::InvalidInput
        );
        assert_eq!(
            ExitCode::for_error(&Error::EstimationRuleUnsupported("median".into())),
            ExitCode::InvalidInput
        );
        assert_eq!(
            ExitCode::for_error(&Error::InvalidSettings("thin".into())),
            ExitCode::ConfigError
        );
        assert_eq!(
            ExitCode::for_error(&Error::Io(std::io::Error::other("disk"))),
            ExitCode::IoError
        );
        assert_eq!(
            ExitCode::for_error(&Error::Inference("diverged".into())),
            ExitCode::InternalError
        );
    }

    #[test]
    fn display_includes_name_and_number() {
        assert_eq!(ExitCode::Unreliable.to_string(), "UNRELIABLE (13)");
        assert!(!ExitCode::IoError.is_success());
    }
}
