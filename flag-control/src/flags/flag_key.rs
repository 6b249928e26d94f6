use crate::api::errors::FlagError;

pub const NAMESPACE_DELIMITER: char = ':';
pub const MAX_FLAG_NAME_LENGTH: usize = 255;

/// Store key for a flag. Names must already have passed [`validate_flag_name`].
pub fn flag_key(namespace: &str, name: &str) -> String {
    format!("{namespace}{NAMESPACE_DELIMITER}{name}")
}

/// SCAN pattern matching every flag key under `namespace`.
pub fn scan_pattern(namespace: &str) -> String {
    format!("{namespace}{NAMESPACE_DELIMITER}*")
}

/// Recovers the flag name from a key produced by [`flag_key`], or `None` if the
/// key belongs to a different namespace.
pub fn flag_name_from_key<'a>(namespace: &str, key: &'a str) -> Option<&'a str> {
    key.strip_prefix(namespace)?
        .strip_prefix(NAMESPACE_DELIMITER)
        .filter(|name| !name.is_empty())
}

pub fn validate_flag_name(name: &str) -> Result<(), FlagError> {
    if name.is_empty() {
        return Err(FlagError::InvalidFlagName(
            "Feature name cannot be empty".to_string(),
        ));
    }
    if name.contains(NAMESPACE_DELIMITER) {
        return Err(FlagError::InvalidFlagName(format!(
            "Feature name cannot contain '{NAMESPACE_DELIMITER}'"
        )));
    }
    if name.chars().count() > MAX_FLAG_NAME_LENGTH {
        return Err(FlagError::InvalidFlagName(format!(
            "Feature name cannot be longer than {MAX_FLAG_NAME_LENGTH} characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_round_trips_through_name() {
        for name in ["new_checkout", "dark-mode", "ünïcode", "with space"] {
            let key = flag_key("feature", name);
            assert_eq!(flag_name_from_key("feature", &key), Some(name));
        }
    }

    #[test]
    fn test_key_format() {
        assert_eq!(flag_key("feature", "beta"), "feature:beta");
        assert_eq!(scan_pattern("feature"), "feature:*");
    }

    #[test]
    fn test_foreign_keys_have_no_name() {
        assert_eq!(flag_name_from_key("feature", "rate_limit:admin:1"), None);
        assert_eq!(flag_name_from_key("feature", "features:beta"), None);
        assert_eq!(flag_name_from_key("feature", "feature:"), None);
    }

    #[test]
    fn test_validate_flag_name() {
        assert!(validate_flag_name("beta").is_ok());
        assert!(matches!(
            validate_flag_name(""),
            Err(FlagError::InvalidFlagName(_))
        ));
        assert!(matches!(
            validate_flag_name("a:b"),
            Err(FlagError::InvalidFlagName(_))
        ));
        assert!(validate_flag_name(&"x".repeat(MAX_FLAG_NAME_LENGTH)).is_ok());
        assert!(matches!(
            validate_flag_name(&"x".repeat(MAX_FLAG_NAME_LENGTH + 1)),
            Err(FlagError::InvalidFlagName(_))
        ));
    }
}
