//! Ordered box versions and version constraints.

use std::cmp::Ordering;
use std::str::FromStr;
use std::fmt;


/// An ordered box version: a non-empty dot-separated sequence of segments,
/// each segment alphanumeric (with `-`, `_` and `+` accepted). Numeric
/// segments compare numerically, textual segments (pre-release style) compare
/// lexicographically and rank below numeric ones, and missing trailing
/// segments count as zero, so `1.0` and `1` are the same version.
#[derive(Clone)]
pub struct Version {
    raw: Box<str>,
}

impl Version {

    /// Parse a version, none if the string is not a valid version.
    pub fn new(raw: &str) -> Option<Self> {

        if raw.is_empty() {
            return None;
        }

        for segment in raw.split('.') {
            if segment.is_empty() {
                return None;
            }
            if !segment.bytes().all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'+')) {
                return None;
            }
        }

        Some(Self { raw: raw.into() })

    }

    /// Get the representation of the version as a string, as it was parsed.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    fn segments(&self) -> impl Iterator<Item = Segment<'_>> + '_ {
        self.raw.split('.').map(|s| match s.parse::<u64>() {
            Ok(n) => Segment::Number(n),
            Err(_) => Segment::Text(s),
        })
    }

    /// The smallest version strictly above every version sharing this one's
    /// prefix: the last segment is dropped (when there are at least two) and
    /// the new last segment incremented. Used for pessimistic constraints,
    /// none if the segment to increment is not numeric.
    fn bump(&self) -> Option<Version> {

        let mut parts = self.raw.split('.').map(str::to_string).collect::<Vec<_>>();
        if parts.len() > 1 {
            parts.pop();
        }

        let last = parts.last_mut().unwrap();
        let n = last.parse::<u64>().ok()?;
        *last = (n + 1).to_string();

        Version::new(&parts.join("."))

    }

}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Segment<'a> {
    Number(u64),
    Text(&'a str),
}

impl Ord for Segment<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Segment::Number(a), Segment::Number(b)) => a.cmp(b),
            (Segment::Text(a), Segment::Text(b)) => a.cmp(b),
            (Segment::Number(_), Segment::Text(_)) => Ordering::Greater,
            (Segment::Text(_), Segment::Number(_)) => Ordering::Less,
        }
    }
}

impl PartialOrd for Segment<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {

        let mut a = self.segments();
        let mut b = other.segments();

        loop {
            match (a.next(), b.next()) {
                (None, None) => return Ordering::Equal,
                (Some(x), None) => match x {
                    Segment::Number(0) => continue,
                    Segment::Number(_) => return Ordering::Greater,
                    Segment::Text(_) => return Ordering::Less,
                },
                (None, Some(y)) => match y {
                    Segment::Number(0) => continue,
                    Segment::Number(_) => return Ordering::Less,
                    Segment::Text(_) => return Ordering::Greater,
                },
                (Some(x), Some(y)) => match x.cmp(&y) {
                    Ordering::Equal => continue,
                    ord => return ord,
                },
            }
        }

    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version { }

impl FromStr for Version {

    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s).ok_or(())
    }

}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Version").field(&self.raw).finish()
    }
}

/// The comparison operator of a single version requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    Pessimistic,
}

/// A version constraint: comma-separated requirements that must all hold,
/// each an operator (`=`, `!=`, `>`, `<`, `>=`, `<=`, `~>`) followed by a
/// version. A bare version is an equality requirement, and `~> 1.2` accepts
/// every `1.x` at least `1.2` (`~> 1.2.3` every `1.2.x` at least `1.2.3`).
#[derive(Clone)]
pub struct VersionConstraint {
    reqs: Vec<(Op, Version)>,
    raw: Box<str>,
}

impl VersionConstraint {

    /// Parse a constraint, none if any requirement is malformed.
    pub fn new(raw: &str) -> Option<Self> {

        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }

        let mut reqs = Vec::new();
        for part in raw.split(',') {

            let part = part.trim();
            let (op, rest) = if let Some(rest) = part.strip_prefix("~>") {
                (Op::Pessimistic, rest)
            } else if let Some(rest) = part.strip_prefix(">=") {
                (Op::Ge, rest)
            } else if let Some(rest) = part.strip_prefix("<=") {
                (Op::Le, rest)
            } else if let Some(rest) = part.strip_prefix("!=") {
                (Op::Ne, rest)
            } else if let Some(rest) = part.strip_prefix('>') {
                (Op::Gt, rest)
            } else if let Some(rest) = part.strip_prefix('<') {
                (Op::Lt, rest)
            } else if let Some(rest) = part.strip_prefix('=') {
                (Op::Eq, rest)
            } else {
                (Op::Eq, part)
            };

            reqs.push((op, Version::new(rest.trim())?));

        }

        Some(Self { reqs, raw: raw.into() })

    }

    /// Return true if the given version satisfies every requirement.
    pub fn matches(&self, version: &Version) -> bool {
        self.reqs.iter().all(|(op, req)| match op {
            Op::Eq => version == req,
            Op::Ne => version != req,
            Op::Gt => version > req,
            Op::Lt => version < req,
            Op::Ge => version >= req,
            Op::Le => version <= req,
            Op::Pessimistic => version >= req && match req.bump() {
                Some(upper) => *version < upper,
                None => true,
            },
        })
    }

    /// Get the representation of the constraint as a string, as parsed.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

}

impl FromStr for VersionConstraint {

    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s).ok_or(())
    }

}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl fmt::Debug for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("VersionConstraint").field(&self.raw).finish()
    }
}


#[cfg(test)]
mod tests {

    use super::*;

    fn v(s: &str) -> Version {
        Version::new(s).unwrap()
    }

    fn c(s: &str) -> VersionConstraint {
        VersionConstraint::new(s).unwrap()
    }

    #[test]
    fn invalid() {
        assert!(Version::new("").is_none());
        assert!(Version::new(".").is_none());
        assert!(Version::new("1..2").is_none());
        assert!(Version::new("1.2.").is_none());
        assert!(Version::new("1.2 beta").is_none());
        assert!(Version::new("1.2/3").is_none());
    }

    #[test]
    fn ordering() {

        assert!(v("0.5") < v("0.7"));
        assert!(v("0.7") < v("1.5"));
        assert!(v("1.9") < v("1.10"));
        assert!(v("2") < v("10"));
        assert!(v("1.2.3") < v("1.2.4"));

        assert_eq!(v("1.0"), v("1"));
        assert_eq!(v("1.0.0"), v("1"));

        // Pre-release style segments rank below the plain release.
        assert!(v("1.0.rc1") < v("1.0"));
        assert!(v("1.0.rc1") < v("1.0.rc2"));

    }

    #[test]
    fn constraints() {

        assert!(c("0.7").matches(&v("0.7")));
        assert!(!c("0.7").matches(&v("0.5")));
        assert!(c("= 0.7").matches(&v("0.7")));

        assert!(c(">= 0.5").matches(&v("0.7")));
        assert!(c(">= 0.5").matches(&v("0.5")));
        assert!(!c("> 0.5").matches(&v("0.5")));
        assert!(c("< 1.0").matches(&v("0.7")));
        assert!(c("<= 0.7").matches(&v("0.7")));
        assert!(c("!= 0.6").matches(&v("0.7")));
        assert!(!c("!= 0.7").matches(&v("0.7")));

        assert!(c(">= 0.5, < 1.0").matches(&v("0.7")));
        assert!(!c(">= 0.5, < 1.0").matches(&v("1.5")));

        assert!(c("~> 1.2").matches(&v("1.2")));
        assert!(c("~> 1.2").matches(&v("1.9")));
        assert!(!c("~> 1.2").matches(&v("2.0")));
        assert!(c("~> 1.2.3").matches(&v("1.2.5")));
        assert!(!c("~> 1.2.3").matches(&v("1.3.0")));

        assert!(VersionConstraint::new("").is_none());
        assert!(VersionConstraint::new(">= ").is_none());
        assert!(VersionConstraint::new("about 1.0").is_none());

    }

}
