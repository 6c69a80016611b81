//! Version constraints with full interval algebra.
//!
//! `semver::VersionReq` can test a version against a requirement but cannot
//! intersect two requirements or decide emptiness, both of which the solver
//! needs.  `VersionConstraint` therefore models a constraint as a normalized
//! union of intervals over [`semver::Version`] and implements the algebra
//! directly.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

pub use semver::Version;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConstraintError {
    #[error("empty version constraint")]
    Empty,

    #[error("invalid version \"{version}\": {message}")]
    InvalidVersion { version: String, message: String },

    #[error("unrecognized constraint \"{0}\"")]
    Unrecognized(String),
}

/// One contiguous span of versions.  `None` bounds are infinite.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Interval {
    min: Option<Version>,
    include_min: bool,
    max: Option<Version>,
    include_max: bool,
}

impl Interval {
    fn any() -> Self {
        Self {
            min: None,
            include_min: false,
            max: None,
            include_max: false,
        }
    }

    fn exact(v: Version) -> Self {
        Self {
            min: Some(v.clone()),
            include_min: true,
            max: Some(v),
            include_max: true,
        }
    }

    fn allows(&self, v: &Version) -> bool {
        if let Some(min) = &self.min {
            match v.cmp(min) {
                Ordering::Less => return false,
                Ordering::Equal if !self.include_min => return false,
                _ => {}
            }
        }
        if let Some(max) = &self.max {
            match v.cmp(max) {
                Ordering::Greater => return false,
                Ordering::Equal if !self.include_max => return false,
                _ => {}
            }
        }
        true
    }

    /// A valid interval contains at least one point.
    fn is_valid(&self) -> bool {
        match (&self.min, &self.max) {
            (Some(min), Some(max)) => match min.cmp(max) {
                Ordering::Less => true,
                Ordering::Equal => self.include_min && self.include_max,
                Ordering::Greater => false,
            },
            _ => true,
        }
    }

    fn intersect(&self, other: &Interval) -> Option<Interval> {
        let (min, include_min) = match (&self.min, &other.min) {
            (None, None) => (None, false),
            (Some(a), None) => (Some(a.clone()), self.include_min),
            (None, Some(b)) => (Some(b.clone()), other.include_min),
            (Some(a), Some(b)) => match a.cmp(b) {
                Ordering::Greater => (Some(a.clone()), self.include_min),
                Ordering::Less => (Some(b.clone()), other.include_min),
                Ordering::Equal => (Some(a.clone()), self.include_min && other.include_min),
            },
        };
        let (max, include_max) = match (&self.max, &other.max) {
            (None, None) => (None, false),
            (Some(a), None) => (Some(a.clone()), self.include_max),
            (None, Some(b)) => (Some(b.clone()), other.include_max),
            (Some(a), Some(b)) => match a.cmp(b) {
                Ordering::Less => (Some(a.clone()), self.include_max),
                Ordering::Greater => (Some(b.clone()), other.include_max),
                Ordering::Equal => (Some(a.clone()), self.include_max && other.include_max),
            },
        };
        let out = Interval {
            min,
            include_min,
            max,
            include_max,
        };
        out.is_valid().then_some(out)
    }

    /// Whether `self` ends strictly before `other` begins, with a gap that
    /// cannot be bridged (so the two must stay separate intervals).
    fn ends_before(&self, other: &Interval) -> bool {
        match (&self.max, &other.min) {
            (Some(max), Some(min)) => match max.cmp(min) {
                Ordering::Less => true,
                Ordering::Equal => !self.include_max && !other.include_min,
                Ordering::Greater => false,
            },
            _ => false,
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.min, &self.max) {
            (None, None) => write!(f, "any"),
            (Some(min), Some(max)) if min == max => write!(f, "{min}"),
            (min, max) => {
                if let Some(min) = min {
                    let op = if self.include_min { ">=" } else { ">" };
                    write!(f, "{op}{min}")?;
                    if max.is_some() {
                        write!(f, " ")?;
                    }
                }
                if let Some(max) = max {
                    let op = if self.include_max { "<=" } else { "<" };
                    write!(f, "{op}{max}")?;
                }
                Ok(())
            }
        }
    }
}

/// A constraint over the versions of one package.
///
/// Internally a sorted union of disjoint intervals; the empty union allows
/// nothing and is what a failed intersection produces.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionConstraint {
    intervals: Vec<Interval>,
}

impl VersionConstraint {
    /// The constraint allowing every version.
    pub fn any() -> Self {
        Self {
            intervals: vec![Interval::any()],
        }
    }

    /// The constraint allowing no version at all.
    pub fn none() -> Self {
        Self {
            intervals: Vec::new(),
        }
    }

    /// The constraint allowing exactly `version`.
    pub fn exact(version: Version) -> Self {
        Self {
            intervals: vec![Interval::exact(version)],
        }
    }

    /// A half-open compatibility span `>=min <max`.
    pub fn between(min: Version, max: Version) -> Self {
        let iv = Interval {
            min: Some(min),
            include_min: true,
            max: Some(max),
            include_max: false,
        };
        if iv.is_valid() {
            Self { intervals: vec![iv] }
        } else {
            Self::none()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn is_any(&self) -> bool {
        self.intervals.len() == 1
            && self.intervals[0].min.is_none()
            && self.intervals[0].max.is_none()
    }

    pub fn allows(&self, version: &Version) -> bool {
        self.intervals.iter().any(|iv| iv.allows(version))
    }

    /// The constraint allowing exactly the versions allowed by both inputs.
    #[must_use]
    pub fn intersect(&self, other: &VersionConstraint) -> VersionConstraint {
        let mut out = Vec::new();
        for a in &self.intervals {
            for b in &other.intervals {
                if let Some(iv) = a.intersect(b) {
                    out.push(iv);
                }
            }
        }
        Self::normalized(out)
    }

    /// The constraint allowing the versions allowed by either input.
    #[must_use]
    pub fn union(&self, other: &VersionConstraint) -> VersionConstraint {
        let mut all = self.intervals.clone();
        all.extend(other.intervals.iter().cloned());
        Self::normalized(all)
    }

    /// Sort intervals and merge the ones that touch or overlap.
    fn normalized(mut intervals: Vec<Interval>) -> Self {
        intervals.sort_by(|a, b| match (&a.min, &b.min) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(x), Some(y)) => x.cmp(y).then_with(|| {
                // Inclusive lower bound starts first.
                b.include_min.cmp(&a.include_min)
            }),
        });

        let mut merged: Vec<Interval> = Vec::with_capacity(intervals.len());
        for iv in intervals {
            match merged.last_mut() {
                Some(last) if !last.ends_before(&iv) => {
                    // Extend the running interval if `iv` reaches further.
                    let extend = match (&last.max, &iv.max) {
                        (None, _) => false,
                        (_, None) => true,
                        (Some(a), Some(b)) => match a.cmp(b) {
                            Ordering::Less => true,
                            Ordering::Equal => !last.include_max && iv.include_max,
                            Ordering::Greater => false,
                        },
                    };
                    if extend {
                        last.max = iv.max;
                        last.include_max = iv.include_max;
                    }
                }
                _ => merged.push(iv),
            }
        }
        Self { intervals: merged }
    }

    /// Parse the textual constraint syntax.
    ///
    /// Accepted forms: `any` / `*`, exact versions (`1.2.3`, `=1.2.3`),
    /// caret (`^1.2.3`), tilde (`~1.2`), and comparator lists separated by
    /// spaces or commas (`>=1.0.0 <2.0.0`).  A comparator list is a
    /// conjunction; ` or ` joins alternatives into a union.
    pub fn parse(input: &str) -> Result<Self, ConstraintError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ConstraintError::Empty);
        }
        if trimmed == "any" || trimmed == "*" {
            return Ok(Self::any());
        }
        if trimmed == "none" {
            return Ok(Self::none());
        }

        let mut union = Self::none();
        for alternative in trimmed.split(" or ") {
            let mut result = Self::any();
            let mut saw_token = false;
            for token in alternative.split(|c: char| c == ',' || c.is_whitespace()) {
                if token.is_empty() {
                    continue;
                }
                saw_token = true;
                result = result.intersect(&Self::parse_comparator(token)?);
            }
            if !saw_token {
                return Err(ConstraintError::Unrecognized(input.to_string()));
            }
            union = union.union(&result);
        }
        Ok(union)
    }

    fn parse_comparator(token: &str) -> Result<Self, ConstraintError> {
        if let Some(rest) = token.strip_prefix('^') {
            let (v, _) = parse_loose(rest)?;
            return Ok(Self::between(v.clone(), caret_upper(&v)));
        }
        if let Some(rest) = token.strip_prefix('~') {
            let (v, segments) = parse_loose(rest)?;
            return Ok(Self::between(v.clone(), tilde_upper(&v, segments)));
        }
        if let Some(rest) = token.strip_prefix(">=") {
            let (v, _) = parse_loose(rest)?;
            return Ok(Self {
                intervals: vec![Interval {
                    min: Some(v),
                    include_min: true,
                    max: None,
                    include_max: false,
                }],
            });
        }
        if let Some(rest) = token.strip_prefix("<=") {
            let (v, _) = parse_loose(rest)?;
            return Ok(Self {
                intervals: vec![Interval {
                    min: None,
                    include_min: false,
                    max: Some(v),
                    include_max: true,
                }],
            });
        }
        if let Some(rest) = token.strip_prefix('>') {
            let (v, _) = parse_loose(rest)?;
            return Ok(Self {
                intervals: vec![Interval {
                    min: Some(v),
                    include_min: false,
                    max: None,
                    include_max: false,
                }],
            });
        }
        if let Some(rest) = token.strip_prefix('<') {
            let (v, _) = parse_loose(rest)?;
            return Ok(Self {
                intervals: vec![Interval {
                    min: None,
                    include_min: false,
                    max: Some(v),
                    include_max: false,
                }],
            });
        }
        if let Some(rest) = token.strip_prefix('=') {
            let (v, _) = parse_loose(rest)?;
            return Ok(Self::exact(v));
        }
        if token.starts_with(|c: char| c.is_ascii_digit()) {
            let (v, _) = parse_loose(token)?;
            return Ok(Self::exact(v));
        }
        Err(ConstraintError::Unrecognized(token.to_string()))
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.intervals.is_empty() {
            return write!(f, "none");
        }
        for (i, iv) in self.intervals.iter().enumerate() {
            if i > 0 {
                write!(f, " or ")?;
            }
            write!(f, "{iv}")?;
        }
        Ok(())
    }
}

impl std::str::FromStr for VersionConstraint {
    type Err = ConstraintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for VersionConstraint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for VersionConstraint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(D::Error::custom)
    }
}

/// Parse a version that may omit trailing segments (`1`, `1.2`, `1.2.3`).
/// Returns the padded version and how many segments were written out.
fn parse_loose(input: &str) -> Result<(Version, usize), ConstraintError> {
    let invalid = |message: String| ConstraintError::InvalidVersion {
        version: input.to_string(),
        message,
    };
    if input.is_empty() {
        return Err(invalid("missing version".to_string()));
    }
    let segments = input
        .split('-')
        .next()
        .unwrap_or(input)
        .split('+')
        .next()
        .unwrap_or(input)
        .split('.')
        .count();
    let padded = match segments {
        1 => format!("{input}.0.0"),
        2 => {
            // Keep any pre-release/build suffix attached to the last segment.
            match input.find(['-', '+']) {
                Some(at) => format!("{}.0{}", &input[..at], &input[at..]),
                None => format!("{input}.0"),
            }
        }
        _ => input.to_string(),
    };
    let version = Version::parse(&padded).map_err(|e| invalid(e.to_string()))?;
    Ok((version, segments))
}

/// Exclusive upper bound for `^v`: next major, or next minor/patch while the
/// leading segment is zero.
fn caret_upper(v: &Version) -> Version {
    if v.major > 0 {
        Version::new(v.major + 1, 0, 0)
    } else if v.minor > 0 {
        Version::new(0, v.minor + 1, 0)
    } else {
        Version::new(0, 0, v.patch + 1)
    }
}

/// Exclusive upper bound for `~v`: next minor when a minor was written,
/// otherwise next major.
fn tilde_upper(v: &Version, segments: usize) -> Version {
    if segments >= 2 {
        Version::new(v.major, v.minor + 1, 0)
    } else {
        Version::new(v.major + 1, 0, 0)
    }
}
