use crate::error::ValidationError;

/// Healthy iff the status code is in `200..300`
pub fn validate(status: u16) -> Result<(), ValidationError> {
    if (200..300).contains(&status) {
        Ok(())
    } else {
        Err(ValidationError::Validator(format!("status {status}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_range() {
        assert!(validate(200).is_ok());
        assert!(validate(204).is_ok());
        assert!(validate(299).is_ok());
    }

    #[test]
    fn test_failure_reason() {
        assert_eq!(validate(500), Err(ValidationError::Validator("status 500".to_string())));
        assert!(validate(301).is_err());
        assert!(validate(199).is_err());
    }
}
