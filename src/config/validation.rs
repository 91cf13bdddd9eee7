//! Configuration validation.
//!
//! # Responsibilities
//! - Gate every reload behind an ordered list of validators
//! - Give validators the old snapshot read-only and the candidate mutably
//! - Provide the stock `RequireKeys` check used at startup and on reload
//!
//! # Design Decisions
//! - Validators run in registration order; the first rejection wins
//! - `RequireKeys` reports every missing key at once, not just the first
//! - Closures are validators, so ad-hoc checks need no new type

use std::sync::Arc;
use thiserror::Error;

use crate::config::schema::ConfigSnapshot;

/// Reason a candidate snapshot was refused.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing required settings: {}", .0.join(", "))]
    MissingKeys(Vec<String>),

    #[error("{0}")]
    Rejected(String),
}

/// A check run against every reload candidate before it is published.
pub trait ConfigValidator: Send + Sync {
    fn validate(&self, old: &ConfigSnapshot, new: &mut ConfigSnapshot)
        -> Result<(), ValidationError>;
}

impl<F> ConfigValidator for F
where
    F: Fn(&ConfigSnapshot, &mut ConfigSnapshot) -> Result<(), ValidationError> + Send + Sync,
{
    fn validate(
        &self,
        old: &ConfigSnapshot,
        new: &mut ConfigSnapshot,
    ) -> Result<(), ValidationError> {
        self(old, new)
    }
}

/// Rejects candidates in which any listed path resolves to an empty string.
#[derive(Debug, Clone)]
pub struct RequireKeys {
    paths: Vec<String>,
}

impl RequireKeys {
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }

    /// Check a single snapshot outside of a reload.
    pub fn check(&self, snapshot: &ConfigSnapshot) -> Result<(), ValidationError> {
        let missing: Vec<String> = self
            .paths
            .iter()
            .filter(|path| snapshot.get(path).is_empty())
            .cloned()
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::MissingKeys(missing))
        }
    }
}

impl ConfigValidator for RequireKeys {
    fn validate(
        &self,
        _old: &ConfigSnapshot,
        new: &mut ConfigSnapshot,
    ) -> Result<(), ValidationError> {
        self.check(new)
    }
}

/// Run `validators` in order against a candidate, stopping at the first rejection.
pub fn run_validators(
    validators: &[Arc<dyn ConfigValidator>],
    old: &ConfigSnapshot,
    new: &mut ConfigSnapshot,
) -> Result<(), ValidationError> {
    for validator in validators {
        validator.validate(old, new)?;
    }
    Ok(())
}
