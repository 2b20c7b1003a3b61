// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Metric name templates such as `servers.{{.Hostname}}.dnscache.{{.Metric}}`.

use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;

use crate::errors::TemplateError;
use crate::host::HostIdentity;
use crate::metric::MetricName;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Hostname,
    Service,
    Metric,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(Field),
}

/// A parsed metric name template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameTemplate {
    segments: Vec<Segment>,
}

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        #[allow(clippy::expect_used)]
        Regex::new(r"\{\{\s*\.([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("placeholder pattern")
    })
}

impl NameTemplate {
    pub fn parse(template: &str) -> Result<Self, TemplateError> {
        if template.trim().is_empty() {
            return Err(TemplateError::Empty);
        }

        let mut segments = Vec::new();
        let mut literal_start = 0;
        for caps in placeholder().captures_iter(template) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            push_literal(&mut segments, &template[literal_start..whole.start()], template)?;
            let field = match name.as_str() {
                "Hostname" => Field::Hostname,
                "Service" => Field::Service,
                "Metric" => Field::Metric,
                other => return Err(TemplateError::UnknownField(other.to_string())),
            };
            segments.push(Segment::Field(field));
            literal_start = whole.end();
        }
        push_literal(&mut segments, &template[literal_start..], template)?;

        Ok(Self { segments })
    }

    /// Renders the name of `metric` for this host.
    #[must_use]
    pub fn render(&self, metric: MetricName, host: &HostIdentity) -> String {
        let mut name = String::with_capacity(64);
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => name.push_str(text),
                Segment::Field(Field::Hostname) => name.push_str(&host.hostname),
                Segment::Field(Field::Service) => name.push_str(&host.service),
                Segment::Field(Field::Metric) => name.push_str(&metric.to_string()),
            }
        }
        name
    }
}

fn push_literal(
    segments: &mut Vec<Segment>,
    text: &str,
    template: &str,
) -> Result<(), TemplateError> {
    if text.contains("{{") || text.contains("}}") {
        return Err(TemplateError::Unterminated(template.to_string()));
    }
    if !text.is_empty() {
        segments.push(Segment::Literal(text.to_string()));
    }
    Ok(())
}

/// `servers.{{.Hostname}}.dnscache.{{.Metric}}`
impl Default for NameTemplate {
    fn default() -> Self {
        Self {
            segments: vec![
                Segment::Literal("servers.".to_string()),
                Segment::Field(Field::Hostname),
                Segment::Literal(".dnscache.".to_string()),
                Segment::Field(Field::Metric),
            ],
        }
    }
}

impl FromStr for NameTemplate {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NameTemplate::parse(s)
    }
}
