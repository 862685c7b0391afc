// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! MQTT topic name and topic filter grammar (MQTT 3.1.1 §4.7), used by the bridge runtime to
//! validate configured source filters/target names (spec §4.5) and to match an inbound publish's
//! topic against a source's registered filter (spec §4.6).
//!
//! Shared subscriptions (`$share/...`) are not modeled: the bridge always opens exactly one MQTT
//! client per connection (spec §3) and has no notion of multiple consumers load-balancing one
//! subscription, so the grammar below is the single-client subset of the full spec.

use std::fmt;

use thiserror::Error;

const LEVEL_SEPARATOR: char = '/';
const MULTI_LEVEL_WILDCARD: &str = "#";
const SINGLE_LEVEL_WILDCARD: &str = "+";

/// Error parsing a [`TopicName`] or [`TopicFilter`].
#[derive(Error, Debug)]
pub enum TopicParseError {
    /// The string is empty.
    #[error("must be at least one character long")]
    Empty,
    /// A topic name contains a wildcard character, which is only meaningful in a filter.
    #[error("wildcard characters not allowed in topic name: {0}")]
    WildcardInTopicName(String),
    /// A wildcard does not occupy an entire level of the filter.
    #[error("wildcard characters must occupy an entire level of the topic filter: {0}")]
    WildcardNotAlone(String),
    /// A multi-level wildcard appears before the last level of the filter.
    #[error("multi-level wildcard must be the last character specified: {0}")]
    WildcardNotLast(String),
}

/// Levels are the unit both `TopicName` and `TopicFilter` split on (MQTT 3.1.1 §4.7.1.1); the
/// separator itself carries no meaning beyond delimiting them.
fn levels_of(topic: &str) -> Vec<&str> {
    topic.split(LEVEL_SEPARATOR).collect()
}

/// An MQTT topic name: the address an actual publish carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicName {
    levels: Vec<String>,
    raw: String,
}

impl TopicName {
    /// Parse `topic_name`, rejecting wildcards (MQTT 3.1.1 §4.7.1).
    ///
    /// # Errors
    /// Returns [`TopicParseError`] if `topic_name` is empty or contains a wildcard character.
    pub fn from_string(topic_name: String) -> Result<Self, TopicParseError> {
        if topic_name.is_empty() {
            return Err(TopicParseError::Empty);
        }
        if topic_name.contains(MULTI_LEVEL_WILDCARD) || topic_name.contains(SINGLE_LEVEL_WILDCARD) {
            return Err(TopicParseError::WildcardInTopicName(topic_name));
        }
        let levels = levels_of(&topic_name).into_iter().map(str::to_string).collect();
        Ok(Self { levels, raw: topic_name })
    }

    /// True if this name is matched by `filter` (spec §4.6).
    #[must_use]
    pub fn matches_topic_filter(&self, filter: &TopicFilter) -> bool {
        topic_matches(self, filter)
    }
}

impl fmt::Display for TopicName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// An MQTT topic filter: what a source subscribes against, possibly containing `+`/`#`
/// wildcards (MQTT 3.1.1 §4.7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicFilter {
    levels: Vec<String>,
    raw: String,
}

impl TopicFilter {
    /// Parse `topic_filter`, validating wildcard placement (MQTT 3.1.1 §4.7.1.2/.3).
    ///
    /// # Errors
    /// Returns [`TopicParseError`] if `topic_filter` is empty, or a wildcard shares a level with
    /// other characters, or `#` appears before the last level.
    pub fn from_string(topic_filter: String) -> Result<Self, TopicParseError> {
        if topic_filter.is_empty() {
            return Err(TopicParseError::Empty);
        }
        let raw_levels = levels_of(&topic_filter);
        let mut seen_multi_level = false;
        for level in &raw_levels {
            if seen_multi_level {
                return Err(TopicParseError::WildcardNotLast(topic_filter));
            }
            let is_multi = *level == MULTI_LEVEL_WILDCARD;
            let is_single = *level == SINGLE_LEVEL_WILDCARD;
            if !is_multi && !is_single && (level.contains(MULTI_LEVEL_WILDCARD) || level.contains(SINGLE_LEVEL_WILDCARD)) {
                return Err(TopicParseError::WildcardNotAlone(topic_filter));
            }
            seen_multi_level = is_multi;
        }
        let levels = raw_levels.into_iter().map(str::to_string).collect();
        Ok(Self { levels, raw: topic_filter })
    }

    /// True if `name` is matched by this filter (spec §4.6).
    #[must_use]
    pub fn matches_topic_name(&self, name: &TopicName) -> bool {
        topic_matches(name, self)
    }
}

impl fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// Match `name` against `filter`, level by level, per MQTT 3.1.1 §4.7.1's wildcard rules.
#[must_use]
pub fn topic_matches(name: &TopicName, filter: &TopicFilter) -> bool {
    let mut name_levels = name.levels.iter();
    for filter_level in &filter.levels {
        match filter_level.as_str() {
            MULTI_LEVEL_WILDCARD => return true,
            SINGLE_LEVEL_WILDCARD => {
                if name_levels.next().is_none() {
                    return false;
                }
            }
            exact => {
                if name_levels.next().map(String::as_str) != Some(exact) {
                    return false;
                }
            }
        }
    }
    name_levels.next().is_none()
}
