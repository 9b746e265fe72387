//! Admission checks shared by the queue and the HTTP layer.

use crate::error::ValidationError;
use crate::types::{JobType, Payload, Target};

/// Hard ceiling on per-job retries regardless of configuration.
pub const MAX_RETRY_CEILING: u32 = 10;

pub fn validate_payload(payload: &Payload) -> Result<(), ValidationError> {
    if payload.title.trim().is_empty() || payload.body.trim().is_empty() {
        return Err(ValidationError::MissingContent);
    }
    Ok(())
}

pub fn validate_target(target: &Target) -> Result<(), ValidationError> {
    match target {
        Target::User(user_id) => validate_identifier(JobType::SingleUser, user_id, |_| true),
        Target::Topic(topic) => validate_identifier(JobType::Topic, topic, is_topic_char),
        Target::Tokens(tokens) => {
            if tokens.is_empty() {
                return Err(ValidationError::EmptyTarget);
            }
            for token in tokens {
                validate_identifier(JobType::TokenList, token, |_| true)?;
            }
            Ok(())
        }
    }
}

pub fn validate_max_retries(max_retries: u32) -> Result<(), ValidationError> {
    if max_retries > MAX_RETRY_CEILING {
        return Err(ValidationError::TooManyRetries {
            requested: max_retries,
            limit: MAX_RETRY_CEILING,
        });
    }
    Ok(())
}

fn validate_identifier(
    kind: JobType,
    value: &str,
    allowed: impl Fn(char) -> bool,
) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::EmptyTarget);
    }
    if value.chars().any(|c| c.is_whitespace() || !allowed(c)) {
        return Err(ValidationError::MalformedTarget {
            kind,
            value: value.to_string(),
        });
    }
    Ok(())
}

fn is_topic_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~' | '%')
}
