//! URIs and path patterns.
//!
//! A concrete [`Uri`] is an optional authority plus pre-split path segments.
//! A [`PathPattern`] is the parsed form of a spec path like
//! `/page/{title}{/format}` or `/static/{+path}`: a sequence of
//! [`PatternSegment`]s the route tree uses as child edges.
//!
//! Pattern grammar per segment:
//! - a literal (`page`)
//! - `{name}` — captures one segment, optionally constrained: `{name:[0-9]+}`
//! - `{+name}` — greedy, captures the remainder; must be terminal
//! - `{/name}` — optional trailing segment; must be terminal
//!
//! Meta segments are never parsed from text; the loader synthesises them to
//! mark API roots.

use std::fmt;

use regex::Regex;

use crate::spec::error::SpecError;

/// A concrete request URI: optional `scheme://authority` plus path segments.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Uri {
    pub authority: Option<String>,
    pub path: Vec<String>,
    pub trailing_slash: bool,
}

impl Uri {
    /// Parses a URI reference, returning the URI and the raw query string.
    pub fn parse(input: &str) -> (Uri, Option<String>) {
        let (rest, authority) = match input.split_once("://") {
            Some((scheme, tail)) if matches!(scheme, "http" | "https") => {
                match tail.find('/') {
                    Some(idx) => {
                        (&tail[idx..], Some(format!("{}://{}", scheme, &tail[..idx])))
                    }
                    None => ("", Some(input.to_string())),
                }
            }
            _ => (input, None),
        };

        let (path_part, query) = match rest.split_once('?') {
            Some((p, q)) => (p, Some(q.to_string())),
            None => (rest, None),
        };

        let trailing_slash = path_part.len() > 1 && path_part.ends_with('/');
        let path = path_part
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect::<Vec<_>>();

        (Uri { authority, path, trailing_slash: trailing_slash || path_part == "/" }, query)
    }

    /// True for `http(s)://` URIs, which bypass local routing.
    pub fn is_absolute(&self) -> bool {
        self.authority.is_some()
    }

    pub fn segment(&self, index: usize) -> Option<&str> {
        self.path.get(index).map(String::as_str)
    }
}

impl From<&str> for Uri {
    fn from(value: &str) -> Self {
        Uri::parse(value).0
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(authority) = &self.authority {
            f.write_str(authority)?;
        }
        if self.path.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.path {
            write!(f, "/{segment}")?;
        }
        if self.trailing_slash {
            f.write_str("/")?;
        }
        Ok(())
    }
}

/// One edge of the route tree.
#[derive(Clone, Debug)]
pub enum PatternSegment {
    Literal(String),
    Param { name: String, pattern: Option<Regex> },
    Greedy { name: String },
    Optional { name: String },
    Meta { name: String },
}

impl PatternSegment {
    pub fn name(&self) -> Option<&str> {
        match self {
            PatternSegment::Literal(_) => None,
            PatternSegment::Param { name, .. }
            | PatternSegment::Greedy { name }
            | PatternSegment::Optional { name }
            | PatternSegment::Meta { name } => Some(name),
        }
    }

    /// Match specificity: lower ranks win when several children accept the
    /// same token.
    pub fn rank(&self) -> u8 {
        match self {
            PatternSegment::Literal(_) => 0,
            PatternSegment::Param { pattern: Some(_), .. } => 1,
            PatternSegment::Param { pattern: None, .. } => 2,
            PatternSegment::Optional { .. } => 3,
            PatternSegment::Greedy { .. } => 4,
            PatternSegment::Meta { .. } => 5,
        }
    }

    /// Whether a concrete path token is accepted by this segment.
    pub fn accepts(&self, token: &str) -> bool {
        match self {
            PatternSegment::Literal(lit) => lit == token,
            PatternSegment::Param { pattern: Some(re), .. } => re.is_match(token),
            PatternSegment::Param { pattern: None, .. } => true,
            PatternSegment::Optional { .. } | PatternSegment::Greedy { .. } => true,
            PatternSegment::Meta { .. } => false,
        }
    }
}

impl PartialEq for PatternSegment {
    fn eq(&self, other: &Self) -> bool {
        use PatternSegment::*;
        match (self, other) {
            (Literal(a), Literal(b)) => a == b,
            (Param { name: a, pattern: pa }, Param { name: b, pattern: pb }) => {
                a == b && pa.as_ref().map(Regex::as_str) == pb.as_ref().map(Regex::as_str)
            }
            (Greedy { name: a }, Greedy { name: b }) => a == b,
            (Optional { name: a }, Optional { name: b }) => a == b,
            (Meta { name: a }, Meta { name: b }) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for PatternSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternSegment::Literal(lit) => f.write_str(lit),
            PatternSegment::Param { name, .. } => write!(f, "{{{name}}}"),
            PatternSegment::Greedy { name } => write!(f, "{{+{name}}}"),
            PatternSegment::Optional { name } => write!(f, "{{/{name}}}"),
            PatternSegment::Meta { name } => write!(f, "{{meta:{name}}}"),
        }
    }
}

/// A parsed spec path pattern.
#[derive(Clone, Debug, PartialEq)]
pub struct PathPattern {
    pub segments: Vec<PatternSegment>,
}

impl PathPattern {
    pub fn parse(pattern: &str) -> Result<PathPattern, SpecError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = pattern.chars().peekable();

        let flush = |literal: &mut String, segments: &mut Vec<PatternSegment>| {
            if !literal.is_empty() {
                segments.push(PatternSegment::Literal(std::mem::take(literal)));
            }
        };

        while let Some(c) = chars.next() {
            match c {
                '/' => flush(&mut literal, &mut segments),
                '{' => {
                    let mut expr = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(ec) => expr.push(ec),
                            None => {
                                return Err(SpecError::invalid_pattern(
                                    pattern,
                                    "unterminated '{' expression",
                                ))
                            }
                        }
                    }
                    let segment = if let Some(name) = expr.strip_prefix('+') {
                        PatternSegment::Greedy { name: name.to_string() }
                    } else if let Some(name) = expr.strip_prefix('/') {
                        // The optional modifier owns its slash, so any pending
                        // literal text is a complete segment.
                        flush(&mut literal, &mut segments);
                        PatternSegment::Optional { name: name.to_string() }
                    } else if let Some((name, re)) = expr.split_once(':') {
                        let pattern = Regex::new(&format!("^(?:{re})$")).map_err(|e| {
                            SpecError::invalid_pattern(pattern, format!("bad parameter regex: {e}"))
                        })?;
                        PatternSegment::Param { name: name.to_string(), pattern: Some(pattern) }
                    } else {
                        PatternSegment::Param { name: expr.clone(), pattern: None }
                    };
                    if !literal.is_empty() {
                        return Err(SpecError::invalid_pattern(
                            pattern,
                            "parameters must span a whole path segment",
                        ));
                    }
                    segments.push(segment);
                }
                other => literal.push(other),
            }
        }
        flush(&mut literal, &mut segments);

        // Greedy and optional modifiers only make sense on the last segment.
        for (i, segment) in segments.iter().enumerate() {
            let terminal = i + 1 == segments.len();
            match segment {
                PatternSegment::Greedy { .. } if !terminal => {
                    return Err(SpecError::invalid_pattern(pattern, "'{+x}' must be terminal"))
                }
                PatternSegment::Optional { .. } if !terminal => {
                    return Err(SpecError::invalid_pattern(pattern, "'{/x}' must be terminal"))
                }
                _ => {}
            }
        }

        Ok(PathPattern { segments })
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            match segment {
                // Optional segments render their own slash form.
                PatternSegment::Optional { name } => write!(f, "{{/{name}}}")?,
                other => write!(f, "/{other}")?,
            }
        }
        Ok(())
    }
}
