//! Validation helpers shared by the configuration domains

use crate::error::{ConfigError, ConfigResult};

/// Implemented by every configuration domain; validation runs eagerly at
/// load time so misconfiguration surfaces before any round starts.
pub trait Validatable {
    fn validate(&self) -> ConfigResult<()>;

    /// Name used in error messages, e.g. `"workers"`.
    fn domain_name(&self) -> &'static str;
}

/// Fail when a numeric setting is zero.
pub fn validate_positive<T: PartialOrd + Default + std::fmt::Display>(
    value: T,
    field: &str,
    domain: &str,
) -> ConfigResult<()> {
    if value <= T::default() {
        return Err(ConfigError::domain(
            domain,
            format!("{field} must be positive, got {value}"),
        ));
    }
    Ok(())
}

/// Fail when a required string setting is empty or whitespace.
pub fn validate_required_string(value: &str, field: &str, domain: &str) -> ConfigResult<()> {
    if value.trim().is_empty() {
        return Err(ConfigError::domain(domain, format!("{field} must not be empty")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_positive() {
        assert!(validate_positive(1u64, "n", "d").is_ok());
        assert!(validate_positive(0u64, "n", "d").is_err());
    }

    #[test]
    fn test_validate_required_string() {
        assert!(validate_required_string("x", "s", "d").is_ok());
        assert!(validate_required_string("  ", "s", "d").is_err());
    }
}
