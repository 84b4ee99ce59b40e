use crate::utils::address;
use crate::utils::error::{NoticeError, Result};
use url::Url;

pub trait Validate {
    fn validate(&self) -> Result<()>;
}

pub fn validate_url(field_name: &str, url_str: &str) -> Result<()> {
    if url_str.is_empty() {
        return Err(NoticeError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: url_str.to_string(),
            reason: "URL cannot be empty".to_string(),
        });
    }

    match Url::parse(url_str) {
        Ok(url) => match url.scheme() {
            "http" | "https" => Ok(()),
            scheme => Err(NoticeError::InvalidConfigValueError {
                field: field_name.to_string(),
                value: url_str.to_string(),
                reason: format!("Unsupported URL scheme: {}", scheme),
            }),
        },
        Err(e) => Err(NoticeError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: url_str.to_string(),
            reason: format!("Invalid URL format: {}", e),
        }),
    }
}

pub fn validate_database_url(field_name: &str, url_str: &str) -> Result<()> {
    match Url::parse(url_str) {
        Ok(url) if matches!(url.scheme(), "postgres" | "postgresql") => Ok(()),
        Ok(url) => Err(NoticeError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: url_str.to_string(),
            reason: format!("Unsupported database scheme: {}", url.scheme()),
        }),
        Err(e) => Err(NoticeError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: url_str.to_string(),
            reason: format!("Invalid database URL: {}", e),
        }),
    }
}

pub fn validate_positive_number(field_name: &str, value: u64, min_value: u64) -> Result<()> {
    if value < min_value {
        return Err(NoticeError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: format!("Value must be at least {}", min_value),
        });
    }
    Ok(())
}

pub fn validate_required_field<'a, T>(field_name: &str, value: &'a Option<T>) -> Result<&'a T> {
    value.as_ref().ok_or_else(|| NoticeError::MissingConfigError {
        field: field_name.to_string(),
    })
}

pub fn validate_range<T: PartialOrd + std::fmt::Display + Copy>(
    field_name: &str,
    value: T,
    min: T,
    max: T,
) -> Result<()> {
    if value < min || value > max {
        return Err(NoticeError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: format!("Value must be between {} and {}", min, max),
        });
    }
    Ok(())
}

// Request payload checks below report ValidationError rather than config errors.

pub fn validate_non_empty_string(field_name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(NoticeError::validation(
            field_name,
            "Value cannot be empty or whitespace-only",
        ));
    }
    Ok(())
}

pub fn validate_max_chars(field_name: &str, value: &str, max: usize) -> Result<()> {
    let count = value.chars().count();
    if count > max {
        return Err(NoticeError::validation(
            field_name,
            format!("{} characters exceeds the limit of {}", count, max),
        ));
    }
    Ok(())
}

pub fn validate_address(field_name: &str, value: &str) -> Result<()> {
    if !address::is_valid_address(value) {
        return Err(NoticeError::validation(
            field_name,
            format!("'{}' is not a valid TRON address", value),
        ));
    }
    Ok(())
}

/// Transaction ids are 32-byte hashes rendered as 64 hex characters.
pub fn validate_tx_hash(field_name: &str, value: &str) -> Result<()> {
    let body = value.strip_prefix("0x").unwrap_or(value);
    if body.len() != 64 || !body.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(NoticeError::validation(
            field_name,
            format!("'{}' is not a 64-character hex transaction hash", value),
        ));
    }
    Ok(())
}

/// Accepts CIDv0 (`Qm...`, 46 base58 chars) and base32 CIDv1 (`b...`).
pub fn validate_ipfs_hash(field_name: &str, value: &str) -> Result<()> {
    let v0 = value.len() == 46
        && value.starts_with("Qm")
        && value.bytes().all(|b| b.is_ascii_alphanumeric() && !b"0OIl".contains(&b));
    let v1 = value.len() >= 50
        && value.starts_with('b')
        && value
            .bytes()
            .all(|b| b.is_ascii_lowercase() || (b'2'..=b'7').contains(&b));
    if !(v0 || v1) {
        return Err(NoticeError::validation(
            field_name,
            format!("'{}' is not an IPFS content id", value),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_url() {
        assert!(validate_url("chain.endpoint", "https://api.trongrid.io").is_ok());
        assert!(validate_url("chain.endpoint", "http://localhost:8090").is_ok());
        assert!(validate_url("chain.endpoint", "").is_err());
        assert!(validate_url("chain.endpoint", "invalid-url").is_err());
        assert!(validate_url("chain.endpoint", "ftp://example.com").is_err());
    }

    #[test]
    fn test_validate_database_url() {
        assert!(validate_database_url("database.url", "postgres://u:p@localhost/notices").is_ok());
        assert!(validate_database_url("database.url", "mysql://localhost/notices").is_err());
    }

    #[test]
    fn test_validate_positive_number() {
        assert!(validate_positive_number("sync.poll_interval_ms", 3000, 100).is_ok());
        assert!(validate_positive_number("sync.poll_interval_ms", 0, 100).is_err());
    }

    #[test]
    fn test_validate_tx_hash() {
        let hash = "a".repeat(64);
        assert!(validate_tx_hash("transaction_hash", &hash).is_ok());
        assert!(validate_tx_hash("transaction_hash", &format!("0x{}", hash)).is_ok());
        assert!(validate_tx_hash("transaction_hash", "abc").is_err());
        assert!(validate_tx_hash("transaction_hash", &"g".repeat(64)).is_err());
    }

    #[test]
    fn test_validate_ipfs_hash() {
        assert!(validate_ipfs_hash(
            "ipfs_hash",
            "QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG"
        )
        .is_ok());
        assert!(validate_ipfs_hash("ipfs_hash", "QmShort").is_err());
    }

    #[test]
    fn test_validate_max_chars_counts_chars_not_bytes() {
        assert!(validate_max_chars("public_text", "é".repeat(10).as_str(), 10).is_ok());
        assert!(validate_max_chars("public_text", "é".repeat(11).as_str(), 10).is_err());
    }

    #[test]
    fn test_validate_address_and_required_field() {
        tokio_test::assert_ok!(validate_address(
            "server_address",
            "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t"
        ));
        tokio_test::assert_err!(validate_address("server_address", "not-an-address"));

        let present = Some(5u64);
        let value = tokio_test::assert_ok!(validate_required_field("max_connections", &present));
        assert_eq!(*value, 5);
        tokio_test::assert_err!(validate_required_field::<u64>("max_connections", &None));
    }

    #[test]
    fn test_validate_range() {
        tokio_test::assert_ok!(validate_range("chain.page_size", 200usize, 1, 200));
        tokio_test::assert_err!(validate_range("chain.page_size", 201usize, 1, 200));
    }
}
