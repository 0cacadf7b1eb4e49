//! Amount validation applied to externally sourced money.
//!
//! The validator is built once from configuration and handed to whatever
//! needs it; there is no process-wide registry.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("amount must not be negative (got {micros} micros)")]
    Negative { micros: i64 },
    #[error("amount must be positive (got {micros} micros)")]
    NotPositive { micros: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmountValidator {
    allow_zero: bool,
}

impl Default for AmountValidator {
    /// Zero spend is a normal day for a paused ad.
    fn default() -> Self {
        Self { allow_zero: true }
    }
}

impl AmountValidator {
    pub fn new(allow_zero: bool) -> Self {
        Self { allow_zero }
    }

    pub fn validate_micros(&self, micros: i64) -> Result<(), ValidationError> {
        if micros < 0 {
            return Err(ValidationError::Negative { micros });
        }
        if micros == 0 && !self.allow_zero {
            return Err(ValidationError::NotPositive { micros });
        }
        Ok(())
    }
}
