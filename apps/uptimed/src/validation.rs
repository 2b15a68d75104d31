use url::Url;

use crate::error::{ServiceError, ServiceResult};

const MAX_NAME_LEN: usize = 100;

/// Validate HTTP/HTTPS URL endpoint
pub fn validate_http_endpoint(target: &str) -> ServiceResult<()> {
    if target.trim().is_empty() {
        return Err(invalid("URL cannot be empty"));
    }

    match Url::parse(target) {
        Ok(url) => {
            let scheme = url.scheme();
            if scheme != "http" && scheme != "https" {
                return Err(invalid(format!("Invalid scheme '{scheme}'. Must be http or https")));
            }

            if url.host_str().is_none() {
                return Err(invalid("URL must have a valid host"));
            }

            Ok(())
        }
        Err(e) => {
            // If it fails to parse, check if it's missing a scheme
            if !target.contains("://") {
                Err(invalid("URL must include scheme (http:// or https://)"))
            } else {
                Err(invalid(format!("Invalid URL: {e}")))
            }
        }
    }
}

/// Validate monitor name
pub fn validate_monitor_name(name: &str) -> ServiceResult<()> {
    let trimmed = name.trim();

    if trimmed.is_empty() {
        return Err(invalid("Name cannot be empty"));
    }

    if trimmed.len() != name.len() {
        return Err(invalid("Name cannot start or end with whitespace"));
    }

    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(invalid(format!("Name too long (max {MAX_NAME_LEN} characters)")));
    }

    Ok(())
}

fn invalid(message: impl Into<String>) -> ServiceError {
    ServiceError::InvalidArgument(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_validation() {
        assert!(validate_http_endpoint("http://example.com").is_ok());
        assert!(validate_http_endpoint("https://example.com").is_ok());
        assert!(validate_http_endpoint("http://192.168.1.1").is_ok());
        assert!(validate_http_endpoint("http://example.com:8080/path").is_ok());

        assert!(validate_http_endpoint("").is_err());
        assert!(validate_http_endpoint("example.com").is_err());
        assert!(validate_http_endpoint("ftp://example.com").is_err());
    }

    #[test]
    fn test_name_validation() {
        assert!(validate_monitor_name("My Monitor").is_ok());
        assert!(validate_monitor_name("Test123").is_ok());

        assert!(validate_monitor_name("").is_err());
        assert!(validate_monitor_name("   ").is_err());
        assert!(validate_monitor_name(" padded ").is_err());
        assert!(validate_monitor_name(&"x".repeat(101)).is_err());
    }

    #[test]
    fn test_errors_are_invalid_argument() {
        assert!(matches!(
            validate_http_endpoint("mailto:ops@example.com"),
            Err(ServiceError::InvalidArgument(_))
        ));
    }
}
