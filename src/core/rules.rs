//! Compiled routing rules
//!
//! A [`Rule`] carries its pattern as text; [`CompiledRule`] holds the
//! precompiled regex so evaluation never recompiles.

use crate::error::{CourierError, Result};
use courier_core_interface::{Rule, RuleType};
use regex::Regex;

/// A rule with its pattern compiled
#[derive(Debug, Clone)]
pub struct CompiledRule {
    rule: Rule,
    regex: Regex,
}

impl CompiledRule {
    pub fn compile(rule: &Rule) -> Result<Self> {
        let regex = Regex::new(&rule.pattern).map_err(|e| CourierError::InvalidRule {
            pattern: rule.pattern.clone(),
            source: e,
        })?;

        Ok(Self {
            rule: rule.clone(),
            regex,
        })
    }

    pub fn kind(&self) -> RuleType {
        self.rule.kind
    }

    pub fn rule(&self) -> &Rule {
        &self.rule
    }

    pub fn is_match(&self, subject: &str) -> bool {
        self.regex.is_match(subject)
    }

    /// Relative path this rule gives a task whose default relative path is `base`
    pub fn relative_path(&self, base: &str) -> String {
        join_posix(&self.rule.dir, base)
    }
}

/// Join two `/`-separated paths and clean the result
///
/// Empty and `.` segments are dropped and `..` removes the segment before
/// it. A rooted path never climbs above `/`.
pub fn join_posix(dir: &str, rest: &str) -> String {
    let absolute = dir.starts_with('/') || (dir.is_empty() && rest.starts_with('/'));
    let mut segments: Vec<&str> = Vec::new();
    for segment in dir.split('/').chain(rest.split('/')) {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.last().is_some_and(|last| *last != "..") {
                    segments.pop();
                } else if !absolute {
                    segments.push("..");
                }
            }
            _ => segments.push(segment),
        }
    }

    let joined = segments.join("/");
    if absolute {
        format!("/{}", joined)
    } else {
        joined
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_and_match() {
        let rule = Rule::new(RuleType::FileNameRegex, r"\.png$", "", "images");
        let compiled = CompiledRule::compile(&rule).unwrap();

        assert!(compiled.is_match("x.png"));
        assert!(!compiled.is_match("x.jpg"));
        assert_eq!(compiled.kind(), RuleType::FileNameRegex);
    }

    #[test]
    fn test_invalid_pattern() {
        let rule = Rule::new(RuleType::MessageRegex, "(unclosed", "", "");
        let err = CompiledRule::compile(&rule).unwrap_err();

        assert!(err.is_routing());
        assert!(err.to_string().contains("(unclosed"));
    }

    #[test]
    fn test_relative_path() {
        let rule = Rule::new(RuleType::FileNameRegex, ".*", "", "photos/2024/");
        let compiled = CompiledRule::compile(&rule).unwrap();
        assert_eq!(compiled.relative_path("x.png"), "photos/2024/x.png");

        let rule = Rule::new(RuleType::FileNameRegex, ".*", "", "");
        let compiled = CompiledRule::compile(&rule).unwrap();
        assert_eq!(compiled.relative_path("x.png"), "x.png");
    }

    #[test]
    fn test_join_posix() {
        assert_eq!(join_posix("a", "b/c"), "a/b/c");
        assert_eq!(join_posix("/srv/", "/x.bin"), "/srv/x.bin");
        assert_eq!(join_posix("", "x.bin"), "x.bin");
        assert_eq!(join_posix("a//b", "./c"), "a/b/c");
        assert_eq!(join_posix("", ""), "");
    }

    #[test]
    fn test_join_posix_resolves_parent_segments() {
        assert_eq!(join_posix("a/../b", "x.png"), "b/x.png");
        assert_eq!(join_posix("a/b/..", "../x.png"), "x.png");
        assert_eq!(join_posix("/srv/../..", "x.png"), "/x.png");
        assert_eq!(join_posix("..", "x.png"), "../x.png");
        assert_eq!(join_posix("../..", "x.png"), "../../x.png");
    }

    #[test]
    fn test_rule_dir_with_parent_segment() {
        let rule = Rule::new(RuleType::FileNameRegex, ".*", "", "a/../b");
        let compiled = CompiledRule::compile(&rule).unwrap();
        assert_eq!(compiled.relative_path("x.png"), "b/x.png");
    }
}
