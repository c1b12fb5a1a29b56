// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log group and log stream name templates.
//!
//! A template is static text with optional tag placeholders:
//!
//! - `$(tag)` expands to the whole record tag
//! - `$(tag[N])` expands to the N-th `.`-separated part of the tag
//!
//! ```
//! use cloudwatch_logs_core::template::NameTemplate;
//!
//! let template = NameTemplate::parse("/app/$(tag[1])").unwrap();
//! assert_eq!(template.render("kube.web.pod").unwrap(), "/app/web");
//! ```

use regex::Regex;

use crate::errors::{ConfigError, ResolveError};

const PLACEHOLDER_PATTERN: &str = r"\$\(tag(?:\[([0-9]+)\])?\)";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Tag,
    TagPart(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl NameTemplate {
    pub fn parse(source: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidTemplate {
            template: source.to_string(),
            reason: reason.to_string(),
        };
        if source.trim().is_empty() {
            return Err(invalid("template is empty"));
        }
        let placeholder = Regex::new(PLACEHOLDER_PATTERN).map_err(|e| invalid(&e.to_string()))?;

        let mut segments = Vec::new();
        let mut last = 0;
        for captures in placeholder.captures_iter(source) {
            let Some(whole) = captures.get(0) else {
                continue;
            };
            push_literal(&mut segments, &source[last..whole.start()]);
            match captures.get(1) {
                Some(index) => {
                    let index = index
                        .as_str()
                        .parse::<usize>()
                        .map_err(|_| invalid("tag part index is too large"))?;
                    segments.push(Segment::TagPart(index));
                }
                None => segments.push(Segment::Tag),
            }
            last = whole.end();
        }
        push_literal(&mut segments, &source[last..]);

        let dangling = segments.iter().any(|segment| match segment {
            Segment::Literal(text) => text.contains("$("),
            _ => false,
        });
        if dangling {
            return Err(invalid("only $(tag) and $(tag[N]) placeholders are supported"));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// Whether rendering depends on the tag at all.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.segments
            .iter()
            .all(|segment| matches!(segment, Segment::Literal(_)))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn render(&self, tag: &str) -> Result<String, ResolveError> {
        let mut rendered = String::with_capacity(self.source.len() + tag.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => rendered.push_str(text),
                Segment::Tag => rendered.push_str(tag),
                Segment::TagPart(index) => {
                    let part = tag.split('.').nth(*index).ok_or_else(|| {
                        ResolveError::TagPartOutOfRange {
                            tag: tag.to_string(),
                            template: self.source.clone(),
                            index: *index,
                        }
                    })?;
                    rendered.push_str(part);
                }
            }
        }
        Ok(rendered)
    }
}

fn push_literal(segments: &mut Vec<Segment>, text: &str) {
    if !text.is_empty() {
        segments.push(Segment::Literal(text.to_string()));
    }
}
