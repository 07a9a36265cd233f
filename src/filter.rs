// src/filter.rs
//! Allow/deny topic filtering with MQTT wildcards
//!
//! The same [`TopicFilter`] type is used on both sides of a trace: the
//! recorder discards inbound messages that do not match, and the player skips
//! frames that do not match. A trace recorded with a broad filter can
//! therefore be replayed with a narrower one.

use crate::utils::errors::{BagError, Result};

/// Multi-level wildcard, valid only as the last level
pub const MULTI_LEVEL: &str = "#";

/// Single-level wildcard
pub const SINGLE_LEVEL: &str = "+";

/// Immutable allow/deny filter set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicFilter {
    allow: Vec<String>,
    deny: Vec<String>,
}

impl TopicFilter {
    /// Build a filter set, validating every filter expression
    pub fn new<A, D>(allow: A, deny: D) -> Result<Self>
    where
        A: IntoIterator,
        A::Item: Into<String>,
        D: IntoIterator,
        D::Item: Into<String>,
    {
        let allow = allow.into_iter().map(Into::into).collect::<Vec<String>>();
        let deny = deny.into_iter().map(Into::into).collect::<Vec<String>>();

        for filter in allow.iter().chain(deny.iter()) {
            validate_filter(filter)?;
        }

        Ok(Self { allow, deny })
    }

    /// Filter that accepts every topic
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Whether `topic` should be recorded or played
    ///
    /// Deny wins over allow; an empty allow list accepts everything.
    pub fn matches(&self, topic: &str) -> bool {
        if self.deny.iter().any(|filter| filter_matches(filter, topic)) {
            return false;
        }
        self.allow.is_empty() || self.allow.iter().any(|filter| filter_matches(filter, topic))
    }

    pub fn allow(&self) -> &[String] {
        &self.allow
    }

    pub fn deny(&self) -> &[String] {
        &self.deny
    }

    /// Broker subscriptions for recording
    ///
    /// The allow list (or `#` when empty) minus filters that are also listed
    /// verbatim in the deny list. May be empty if everything was denied.
    pub fn subscriptions(&self) -> Vec<String> {
        if self.allow.is_empty() {
            if self.deny.iter().any(|d| d == MULTI_LEVEL) {
                return Vec::new();
            }
            return vec![MULTI_LEVEL.to_string()];
        }

        self.allow
            .iter()
            .filter(|filter| !self.deny.contains(filter))
            .cloned()
            .collect()
    }
}

/// Check a filter expression against the topic filter grammar
pub fn validate_filter(filter: &str) -> Result<()> {
    let invalid = |reason: &str| BagError::InvalidFilter {
        filter: filter.to_string(),
        reason: reason.to_string(),
    };

    if filter.is_empty() {
        return Err(invalid("filter is empty"));
    }

    let levels: Vec<&str> = filter.split('/').collect();
    let last = levels.len() - 1;

    for (i, level) in levels.iter().enumerate() {
        if level.contains('#') {
            if *level != MULTI_LEVEL {
                return Err(invalid("'#' must occupy an entire level"));
            }
            if i != last {
                return Err(invalid("'#' is only allowed as the last level"));
            }
        }
        if level.contains('+') && *level != SINGLE_LEVEL {
            return Err(invalid("'+' must occupy an entire level"));
        }
    }

    Ok(())
}

/// Match a concrete topic against a single filter expression
pub fn filter_matches(filter: &str, topic: &str) -> bool {
    // Wildcards at the first level never match reserved `$` topics
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut topic_levels = topic.split('/');

    for level in filter.split('/') {
        match level {
            MULTI_LEVEL => return true,
            SINGLE_LEVEL => {
                if topic_levels.next().is_none() {
                    return false;
                }
            }
            literal => {
                if topic_levels.next() != Some(literal) {
                    return false;
                }
            }
        }
    }

    topic_levels.next().is_none()
}
