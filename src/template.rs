use std::collections::{BTreeMap, HashSet};

use crate::error::{Error, Result};

/// A compiled path template such as `{service}/{environment}/{region}/{module}`.
///
/// Literal segments must match verbatim; each `{name}` placeholder matches
/// exactly one path segment and binds its value under `name`.
#[derive(Debug, Clone)]
pub struct PathTemplate {
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

impl PathTemplate {
    /// Compile a pattern string into a matcher.
    ///
    /// Rejected patterns: empty pattern, empty segments (`a//b`), duplicate
    /// placeholder names, and placeholders embedded inside a literal segment
    /// (`pre{x}` or `{x}post`).
    pub fn parse(pattern: &str) -> Result<Self> {
        let trimmed = pattern.trim().trim_matches('/');
        if trimmed.is_empty() {
            return Err(Error::config("structure.pattern must not be empty"));
        }

        let mut segments = Vec::new();
        let mut seen = HashSet::new();

        for raw in trimmed.split('/') {
            if raw.is_empty() {
                return Err(Error::config(format!(
                    "structure.pattern '{}' contains an empty segment",
                    pattern
                )));
            }

            if raw.starts_with('{') && raw.ends_with('}') {
                let name = &raw[1..raw.len() - 1];
                if name.is_empty() {
                    return Err(Error::config(format!(
                        "structure.pattern '{}' contains an unnamed placeholder",
                        pattern
                    )));
                }
                if name.contains('{') || name.contains('}') {
                    return Err(Error::config(format!(
                        "invalid placeholder segment '{}' in pattern '{}'",
                        raw, pattern
                    )));
                }
                if !seen.insert(name.to_string()) {
                    return Err(Error::config(format!(
                        "duplicate placeholder '{{{}}}' in pattern '{}'",
                        name, pattern
                    )));
                }
                segments.push(Segment::Placeholder(name.to_string()));
            } else if raw.contains('{') || raw.contains('}') {
                // Placeholders must span a whole segment
                return Err(Error::config(format!(
                    "placeholder embedded in literal segment '{}' in pattern '{}'",
                    raw, pattern
                )));
            } else {
                segments.push(Segment::Literal(raw.to_string()));
            }
        }

        Ok(Self { segments })
    }

    /// Number of path segments the template spans; bounds the discovery walk.
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// Match a workspace-relative path (forward slashes) against the
    /// template, returning placeholder bindings on success.
    pub fn matches(&self, relative_path: &str) -> Option<BTreeMap<String, String>> {
        let parts: Vec<&str> = relative_path
            .trim_matches('/')
            .split('/')
            .filter(|p| !p.is_empty())
            .collect();

        if parts.len() != self.segments.len() {
            return None;
        }

        let mut bindings = BTreeMap::new();
        for (segment, part) in self.segments.iter().zip(&parts) {
            match segment {
                Segment::Literal(lit) => {
                    if lit != part {
                        return None;
                    }
                }
                Segment::Placeholder(name) => {
                    bindings.insert(name.clone(), (*part).to_string());
                }
            }
        }

        Some(bindings)
    }

    /// Names of the placeholders, in pattern order.
    pub fn placeholder_names(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Placeholder(name) => Some(name.as_str()),
                Segment::Literal(_) => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_parse_standard_pattern() {
        let template = PathTemplate::parse("{service}/{environment}/{region}/{module}").unwrap();
        assert_eq!(template.depth(), 4);
        assert_eq!(
            template.placeholder_names(),
            vec!["service", "environment", "region", "module"]
        );
    }

    #[test]
    fn test_match_binds_placeholders() {
        let template = PathTemplate::parse("{service}/{environment}/{region}/{module}").unwrap();
        let bindings = template.matches("platform/stage/eu-central-1/vpc").unwrap();

        assert_eq!(bindings["service"], "platform");
        assert_eq!(bindings["environment"], "stage");
        assert_eq!(bindings["region"], "eu-central-1");
        assert_eq!(bindings["module"], "vpc");
    }

    #[test]
    fn test_match_literal_segments() {
        let template = PathTemplate::parse("infra/{environment}/{module}").unwrap();

        assert!(template.matches("infra/stage/vpc").is_some());
        assert!(template.matches("apps/stage/vpc").is_none());
    }

    #[rstest]
    #[case("platform/stage/eu-central-1")]
    #[case("platform/stage/eu-central-1/vpc/subnet")]
    #[case("")]
    fn test_match_rejects_wrong_depth(#[case] path: &str) {
        let template = PathTemplate::parse("{service}/{environment}/{region}/{module}").unwrap();
        assert!(template.matches(path).is_none());
    }

    #[test]
    fn test_match_ignores_surrounding_slashes() {
        let template = PathTemplate::parse("{env}/{module}").unwrap();
        assert!(template.matches("/stage/vpc/").is_some());
    }

    #[rstest]
    #[case("")]
    #[case("a//b")]
    #[case("{env}/{env}")]
    #[case("pre{env}/module")]
    #[case("{env}post/module")]
    #[case("{}/module")]
    fn test_parse_rejects_invalid_patterns(#[case] pattern: &str) {
        let result = PathTemplate::parse(pattern);
        assert!(result.is_err(), "pattern '{}' should be rejected", pattern);
    }

    #[test]
    fn test_parse_rejects_duplicate_reports_name() {
        let err = PathTemplate::parse("{module}/{module}").unwrap_err();
        assert!(err.to_string().contains("duplicate placeholder '{module}'"));
    }

    #[test]
    fn test_mixed_literal_and_placeholder_depth() {
        let template = PathTemplate::parse("envs/{environment}/stacks/{module}").unwrap();
        assert_eq!(template.depth(), 4);

        let bindings = template.matches("envs/prod/stacks/eks").unwrap();
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings["environment"], "prod");
        assert_eq!(bindings["module"], "eks");
    }
}
