//! Subscription filtering by tag.
//!
//! A subscription is written `topic~tagFilter`. The filter is either `*`
//! (every message, tagged or not) or a `||` separated list of tags.

use std::collections::BTreeSet;
use std::fmt;

use crate::utils::error::SettingsError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagFilter {
    All,
    Tags(BTreeSet<String>),
}

impl TagFilter {
    pub fn parse(expression: &str) -> Self {
        let tags: BTreeSet<String> = expression
            .split("||")
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
            .map(str::to_string)
            .collect();

        if tags.is_empty() || tags.contains("*") {
            TagFilter::All
        } else {
            TagFilter::Tags(tags)
        }
    }

    pub fn matches(&self, tag: Option<&str>) -> bool {
        match self {
            TagFilter::All => true,
            TagFilter::Tags(tags) => tag.is_some_and(|t| tags.contains(t)),
        }
    }
}

impl fmt::Display for TagFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagFilter::All => write!(f, "*"),
            TagFilter::Tags(tags) => {
                let joined: Vec<&str> = tags.iter().map(String::as_str).collect();
                write!(f, "{}", joined.join(" || "))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub topic: String,
    pub filter: TagFilter,
}

impl Subscription {
    pub fn new(topic: impl Into<String>, filter: TagFilter) -> Self {
        Self {
            topic: topic.into(),
            filter,
        }
    }

    /// Parses a `topic~tagFilter` pair. Both halves are required.
    pub fn parse(entry: &str) -> Result<Self, SettingsError> {
        let invalid = || SettingsError::InvalidSubscription(entry.to_string());

        let (topic, filter) = entry.split_once('~').ok_or_else(invalid)?;
        let topic = topic.trim();
        if topic.is_empty() || filter.trim().is_empty() {
            return Err(invalid());
        }
        Ok(Self::new(topic, TagFilter::parse(filter)))
    }

    /// Subscription to every message of `topic`.
    pub fn all(topic: impl Into<String>) -> Self {
        Self::new(topic, TagFilter::All)
    }
}
