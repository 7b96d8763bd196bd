//! Pattern compilation and match enumeration.

mod named;

pub use named::{extract_named_groups, NamedGroups};

use fancy_regex::{Captures, Regex};
use std::ops::Range;

/// A compiled `from` pattern together with the group names declared in its source.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    regex: Regex,
    names: NamedGroups,
}

impl CompiledPattern {
    /// Compile a pattern and scan its source for named groups.
    ///
    /// Look-around and backreferences are accepted.
    pub fn compile(source: &str) -> Result<Self, MatcherError> {
        let regex = Regex::new(source).map_err(MatcherError::InvalidRegex)?;
        let names = NamedGroups::extract(source);
        Ok(Self { regex, names })
    }

    /// The pattern source as given.
    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }

    pub fn regex(&self) -> &Regex {
        &self.regex
    }

    /// Named groups declared in the pattern source.
    pub fn names(&self) -> &NamedGroups {
        &self.names
    }

    /// Number of capture groups, excluding the implicit whole-match group.
    pub fn group_count(&self) -> usize {
        self.regex.captures_len() - 1
    }

    /// Enumerate the leftmost non-overlapping matches in `subject`.
    ///
    /// Every call starts a fresh scan from the beginning of `subject`.
    pub fn matches<'p, 'h>(&'p self, subject: &'h str) -> PatternMatches<'p, 'h> {
        PatternMatches {
            pattern: self,
            subject,
            position: 0,
        }
    }
}

/// A single match of a [`CompiledPattern`] against a subject.
#[derive(Debug)]
pub struct PatternMatch<'p, 'h> {
    pattern: &'p CompiledPattern,
    captures: Captures<'h>,
}

impl<'p, 'h> PatternMatch<'p, 'h> {
    /// Byte offset where the match starts.
    pub fn start(&self) -> usize {
        self.span().start
    }

    /// Byte offset just past the end of the match.
    pub fn end(&self) -> usize {
        self.span().end
    }

    pub fn span(&self) -> Range<usize> {
        // Group 0 always participates in a successful match.
        self.captures.get(0).map_or(0..0, |m| m.start()..m.end())
    }

    pub fn as_str(&self) -> &'h str {
        self.captures.get(0).map_or("", |m| m.as_str())
    }

    /// The pattern that produced this match.
    pub fn pattern(&self) -> &'p CompiledPattern {
        self.pattern
    }

    /// Positional groups 1..=N; non-participating groups are `None`.
    pub fn groups(&self) -> Vec<Option<&'h str>> {
        self.captures
            .iter()
            .skip(1)
            .map(|m| m.map(|m| m.as_str()))
            .collect()
    }

    /// Value of a named group, if it participated in this match.
    pub fn named(&self, name: &str) -> Option<&'h str> {
        self.captures.name(name).map(|m| m.as_str())
    }
}

/// Iterator over the matches of a pattern, see [`CompiledPattern::matches`].
///
/// After a non-empty match the next search starts at its end. After an empty
/// match it starts one character further, so the scan always moves forward.
/// Searches run against the whole subject so anchors and word boundaries
/// see the surrounding text.
#[derive(Debug)]
pub struct PatternMatches<'p, 'h> {
    pattern: &'p CompiledPattern,
    subject: &'h str,
    position: usize,
}

impl<'p, 'h> Iterator for PatternMatches<'p, 'h> {
    type Item = Result<PatternMatch<'p, 'h>, MatcherError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position > self.subject.len() {
            return None;
        }

        let captures = match self
            .pattern
            .regex
            .captures_from_pos(self.subject, self.position)
        {
            Ok(Some(caps)) => caps,
            Ok(None) => {
                self.position = self.subject.len() + 1;
                return None;
            }
            Err(e) => {
                self.position = self.subject.len() + 1;
                return Some(Err(MatcherError::Match(e)));
            }
        };

        let span = captures
            .get(0)
            .map_or(self.position..self.position, |m| m.start()..m.end());
        self.position = if span.is_empty() {
            next_char_boundary(self.subject, span.end)
        } else {
            span.end
        };

        Some(Ok(PatternMatch {
            pattern: self.pattern,
            captures,
        }))
    }
}

/// Offset of the character after `offset`, or `len + 1` at the end of input.
fn next_char_boundary(subject: &str, offset: usize) -> usize {
    subject[offset..]
        .chars()
        .next()
        .map_or(subject.len() + 1, |c| offset + c.len_utf8())
}

/// Errors that can occur while compiling or running a pattern.
#[derive(Debug, thiserror::Error)]
pub enum MatcherError {
    #[error("Invalid regex pattern: {0}")]
    InvalidRegex(#[source] fancy_regex::Error),

    #[error("Regex matching failed: {0}")]
    Match(#[source] fancy_regex::Error),
}
