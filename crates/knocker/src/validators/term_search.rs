use crate::checker::ProbeResponse;
use crate::error::ValidationError;

/// Healthy iff the body contains `term` (exact, case-sensitive)
pub fn validate(term: Option<&str>, response: &ProbeResponse) -> Result<(), ValidationError> {
    let term = match term {
        Some(term) if !term.is_empty() => term,
        _ => return Err(ValidationError::Configuration("empty search term".to_string())),
    };

    if response.body_text()?.contains(term) {
        Ok(())
    } else {
        Err(ValidationError::Validator(format!("term {term:?} not found in response body")))
    }
}
