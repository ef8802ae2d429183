use std::borrow::Cow;
use std::ffi::c_int;

use thiserror::Error;

/// Status codes returned by HLML entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnCode {
    Success,
    Uninitialized,
    InvalidArgument,
    NotSupported,
    AlreadyInitialized,
    NotFound,
    InsufficientSize,
    DriverNotLoaded,
    Timeout,
    AipIsLost,
    Memory,
    NoData,
    Unknown,
    Other(c_int),
}

impl ReturnCode {
    pub fn from_raw(raw: c_int) -> Self {
        match raw {
            0 => Self::Success,
            1 => Self::Uninitialized,
            2 => Self::InvalidArgument,
            3 => Self::NotSupported,
            5 => Self::AlreadyInitialized,
            6 => Self::NotFound,
            7 => Self::InsufficientSize,
            9 => Self::DriverNotLoaded,
            10 => Self::Timeout,
            15 => Self::AipIsLost,
            20 => Self::Memory,
            21 => Self::NoData,
            49 => Self::Unknown,
            other => Self::Other(other),
        }
    }

    pub fn message(&self) -> Cow<'static, str> {
        match self {
            Self::Success => "Success".into(),
            Self::Uninitialized => "HLML not initialized".into(),
            Self::InvalidArgument => "Invalid argument".into(),
            Self::NotSupported => "Not supported".into(),
            Self::AlreadyInitialized => "HLML already initialized".into(),
            Self::NotFound => "Not found".into(),
            Self::InsufficientSize => "Insufficient size".into(),
            Self::DriverNotLoaded => "Driver not loaded".into(),
            Self::Timeout => "Timeout".into(),
            Self::AipIsLost => "AIP is lost".into(),
            Self::Memory => "Memory error".into(),
            Self::NoData => "No data".into(),
            Self::Unknown => "Unknown error".into(),
            Self::Other(code) => format!("Invalid HLML error return code {code}").into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum HlmlError {
    #[error("Failed to load HLML library: {0}")]
    Library(#[from] libloading::Error),

    #[error("`{function}` failed: {}", code.message())]
    Call {
        function: &'static str,
        code: ReturnCode,
    },

    #[error("Could not find device with serial number `{0}`")]
    SerialNotFound(String),
}

pub type Result<T> = std::result::Result<T, HlmlError>;

/// Converts a raw return value into a `Result`, tagging failures with the C entry point.
pub(crate) fn check(function: &'static str, raw: c_int) -> Result<()> {
    match ReturnCode::from_raw(raw) {
        ReturnCode::Success => Ok(()),
        code => Err(HlmlError::Call { function, code }),
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn known_codes_round_trip_from_raw() {
        assert_eq!(ReturnCode::from_raw(0), ReturnCode::Success);
        assert_eq!(ReturnCode::from_raw(15), ReturnCode::AipIsLost);
        assert_eq!(ReturnCode::from_raw(49), ReturnCode::Unknown);
        assert_eq!(ReturnCode::from_raw(42), ReturnCode::Other(42));
    }

    #[test]
    fn check_names_the_failing_function() {
        let err = check("hlml_device_get_count", 9).expect_err("driver not loaded");
        assert_eq!(
            err.to_string(),
            "`hlml_device_get_count` failed: Driver not loaded"
        );
        assert!(check("hlml_init", 0).is_ok());
    }
}
