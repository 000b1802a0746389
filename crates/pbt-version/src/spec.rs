//! Version intervals and the comparator grammar that produces them.
//!
//! Supported rules:
//! - `*` matches every version.
//! - `^1.2.3` caret: up to the next major; for `0.x` the bump level shrinks
//!   (`^0.2.3` is `<0.3.0`, `^0.0.3` is `<0.0.4`, `^0` is `<1.0.0`).
//! - `~1.2.3` / `~1.2` tilde: up to the next minor; `~1` up to the next major.
//! - `1.2.3`, `=1.2.3`, `==1.2.3` exact.
//! - `>`, `>=`, `<`, `<=`, optionally paired as `>=1.0, <2.0` or `>=1.0 <2.0`.
//!
//! Anything else (`!=`, `~=`, wildcards, `||` range sets) is a parse error.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, OnceLock};

use semver::Version;

use crate::error::SpecError;
use crate::version::parse_version_parts;

/// A contiguous range of versions with optional, independently inclusive bounds.
///
/// `None` on either side means unbounded on that side.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionSpec {
    pub lowerbound: Option<Version>,
    pub upperbound: Option<Version>,
    pub lower_inclusive: bool,
    pub upper_inclusive: bool,
}

impl VersionSpec {
    /// The interval containing every version.
    pub fn any() -> Self {
        Self {
            lowerbound: None,
            upperbound: None,
            lower_inclusive: true,
            upper_inclusive: false,
        }
    }

    /// The interval containing exactly `version`.
    pub fn exact(version: Version) -> Self {
        Self {
            lowerbound: Some(version.clone()),
            upperbound: Some(version),
            lower_inclusive: true,
            upper_inclusive: true,
        }
    }

    /// Whether `version` lies inside this interval.
    pub fn is_version_compatible(&self, version: &Version) -> bool {
        if let Some(lb) = &self.lowerbound {
            let below = if self.lower_inclusive {
                version < lb
            } else {
                version <= lb
            };
            if below {
                return false;
            }
        }
        if let Some(ub) = &self.upperbound {
            let above = if self.upper_inclusive {
                version > ub
            } else {
                version >= ub
            };
            if above {
                return false;
            }
        }
        true
    }

    /// Intersect two intervals, keeping the stricter bound on each side.
    ///
    /// # Errors
    /// Returns [`SpecError::IncompatibleVersionSpec`] if the intersection is empty,
    /// e.g. `^1.0.0` and `^2.0.0`.
    pub fn intersect(&self, other: &VersionSpec) -> Result<VersionSpec, SpecError> {
        let mut lb = self.lowerbound.clone();
        let mut lb_inclusive = self.lower_inclusive;
        if let Some(other_lb) = &other.lowerbound {
            match &lb {
                None => {
                    lb = Some(other_lb.clone());
                    lb_inclusive = other.lower_inclusive;
                }
                Some(current) if other_lb > current => {
                    lb = Some(other_lb.clone());
                    lb_inclusive = other.lower_inclusive;
                }
                Some(current) if other_lb == current => {
                    lb_inclusive = lb_inclusive && other.lower_inclusive;
                }
                Some(_) => {}
            }
        }

        let mut ub = self.upperbound.clone();
        let mut ub_inclusive = self.upper_inclusive;
        if let Some(other_ub) = &other.upperbound {
            match &ub {
                None => {
                    ub = Some(other_ub.clone());
                    ub_inclusive = other.upper_inclusive;
                }
                Some(current) if other_ub < current => {
                    ub = Some(other_ub.clone());
                    ub_inclusive = other.upper_inclusive;
                }
                Some(current) if other_ub == current => {
                    ub_inclusive = ub_inclusive && other.upper_inclusive;
                }
                Some(_) => {}
            }
        }

        let merged = VersionSpec {
            lower_inclusive: lb.is_none() || lb_inclusive,
            upper_inclusive: ub.is_some() && ub_inclusive,
            lowerbound: lb,
            upperbound: ub,
        };
        if merged.is_empty() {
            return Err(SpecError::IncompatibleVersionSpec {
                left: self.to_string(),
                right: other.to_string(),
            });
        }
        Ok(merged)
    }

    /// Raise the lower bound to `version` if it is newer than the current one.
    ///
    /// Returns `Ok(None)` when the spec already starts at or above `version`.
    ///
    /// # Errors
    /// Returns [`SpecError::VersionIncompatibleToSpec`] if `version` is outside
    /// this spec; widening a spec is left to a human.
    pub fn update_version(&self, version: &Version) -> Result<Option<VersionSpec>, SpecError> {
        if !self.is_version_compatible(version) {
            return Err(SpecError::VersionIncompatibleToSpec {
                version: version.to_string(),
                spec: self.to_string(),
            });
        }
        match &self.lowerbound {
            Some(lb) if lb >= version => Ok(None),
            _ => Ok(Some(VersionSpec {
                lowerbound: Some(version.clone()),
                upperbound: self.upperbound.clone(),
                lower_inclusive: true,
                upper_inclusive: self.upper_inclusive,
            })),
        }
    }

    /// Whether no version can satisfy this interval.
    pub fn is_empty(&self) -> bool {
        match (&self.lowerbound, &self.upperbound) {
            (Some(lb), Some(ub)) => {
                lb > ub || (lb == ub && !(self.lower_inclusive && self.upper_inclusive))
            }
            _ => false,
        }
    }
}

impl fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.lowerbound, &self.upperbound) {
            (None, None) => f.write_str("*"),
            (Some(lb), Some(ub)) if lb == ub && self.lower_inclusive && self.upper_inclusive => {
                write!(f, "=={lb}")
            }
            (lb, ub) => {
                if let Some(lb) = lb {
                    let op = if self.lower_inclusive { ">=" } else { ">" };
                    write!(f, "{op}{lb}")?;
                    if ub.is_some() {
                        f.write_str(", ")?;
                    }
                }
                if let Some(ub) = ub {
                    let op = if self.upper_inclusive { "<=" } else { "<" };
                    write!(f, "{op}{ub}")?;
                }
                Ok(())
            }
        }
    }
}

static SPEC_CACHE: OnceLock<Mutex<HashMap<String, VersionSpec>>> = OnceLock::new();

/// Parse a version rule into an interval. Results are memoized per rule text.
///
/// # Errors
/// Returns [`SpecError::Parse`] for syntax outside the supported grammar.
pub fn parse_version_spec(rule: &str) -> Result<VersionSpec, SpecError> {
    let cache = SPEC_CACHE.get_or_init(Default::default);
    if let Ok(map) = cache.lock() {
        if let Some(spec) = map.get(rule) {
            return Ok(spec.clone());
        }
    }

    let spec = parse_uncached(rule)?;
    if let Ok(mut map) = cache.lock() {
        map.insert(rule.to_owned(), spec.clone());
    }
    Ok(spec)
}

/// Rewrite the version literal that defines the lower bound of `rule` to
/// `version`, keeping the operator and any upper-bound clause as written.
///
/// `^0.5.1` becomes `^1.0.0`, `>=1.0, <2.0` becomes `>=1.5.0, <2.0`. An
/// exclusive `>` becomes `>=` so the new version is admitted. Rules with no
/// lower clause get `>=version` prepended.
///
/// # Errors
/// Returns a parse error for unsupported rules, or [`SpecError::CannotRewrite`]
/// if the rewritten rule still excludes `version` (its upper bound is too low).
pub fn rewrite_lowerbound(rule: &str, version: &Version) -> Result<String, SpecError> {
    let trimmed = rule.trim();
    let literal = version.to_string();

    let rewritten = if trimmed == "*" {
        format!(">={literal}")
    } else {
        let clauses = tokenize(trimmed)?;
        let lower = clauses.iter().find(|c| c.op.defines_lowerbound());
        match lower {
            Some(clause) if clause.op == Op::Gt => splice(
                trimmed,
                clause.op_start,
                clause.version_end,
                &format!(">={literal}"),
            ),
            Some(clause) => splice(trimmed, clause.version_start, clause.version_end, &literal),
            None => format!(">={literal}, {trimmed}"),
        }
    };

    let spec = parse_version_spec(&rewritten)?;
    if !spec.is_version_compatible(version) {
        return Err(SpecError::CannotRewrite {
            rule: rule.to_owned(),
            version: literal,
        });
    }
    Ok(rewritten)
}

fn splice(text: &str, start: usize, end: usize, replacement: &str) -> String {
    let head = text.get(..start).unwrap_or_default();
    let tail = text.get(end..).unwrap_or_default();
    format!("{head}{replacement}{tail}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Caret,
    Tilde,
    Exact,
    Gt,
    Ge,
    Lt,
    Le,
}

impl Op {
    fn defines_lowerbound(self) -> bool {
        matches!(self, Op::Caret | Op::Tilde | Op::Exact | Op::Gt | Op::Ge)
    }
}

/// One `<op><version>` clause with byte offsets into the rule.
#[derive(Debug)]
struct Clause<'a> {
    op: Op,
    op_start: usize,
    version: &'a str,
    version_start: usize,
    version_end: usize,
}

fn tokenize(rule: &str) -> Result<Vec<Clause<'_>>, SpecError> {
    let mut clauses = Vec::new();
    let mut chars = rule.char_indices().peekable();

    loop {
        while chars
            .peek()
            .is_some_and(|&(_, c)| c.is_whitespace() || c == ',')
        {
            chars.next();
        }
        let Some(&(op_start, _)) = chars.peek() else {
            break;
        };

        let mut op_end = op_start;
        while let Some(&(i, c)) = chars.peek() {
            if !matches!(c, '<' | '>' | '=' | '^' | '~' | '!') {
                break;
            }
            chars.next();
            op_end = i + c.len_utf8();
        }
        let op_text = rule.get(op_start..op_end).unwrap_or_default();

        while chars.peek().is_some_and(|&(_, c)| c.is_whitespace()) {
            chars.next();
        }
        let version_start = chars.peek().map_or(rule.len(), |&(i, _)| i);
        let mut version_end = version_start;
        while let Some(&(i, c)) = chars.peek() {
            if c.is_whitespace() || c == ',' {
                break;
            }
            chars.next();
            version_end = i + c.len_utf8();
        }
        let version = rule.get(version_start..version_end).unwrap_or_default();
        if version.is_empty() {
            return Err(parse_error(rule, &format!("missing version after `{op_text}`")));
        }

        let op = match op_text {
            "" | "=" | "==" => Op::Exact,
            "^" => Op::Caret,
            "~" => Op::Tilde,
            ">" => Op::Gt,
            ">=" => Op::Ge,
            "<" => Op::Lt,
            "<=" => Op::Le,
            other => return Err(parse_error(rule, &format!("unsupported operator `{other}`"))),
        };

        clauses.push(Clause {
            op,
            op_start,
            version,
            version_start,
            version_end,
        });
    }

    Ok(clauses)
}

fn parse_uncached(rule: &str) -> Result<VersionSpec, SpecError> {
    let trimmed = rule.trim();
    if trimmed == "*" {
        return Ok(VersionSpec::any());
    }

    let clauses = tokenize(trimmed)?;
    let spec = match clauses.as_slice() {
        [] => return Err(parse_error(rule, "empty rule")),
        [single] => single_clause(rule, single)?,
        [first, second] => paired_clauses(rule, first, second)?,
        _ => return Err(parse_error(rule, "at most two comparators are supported")),
    };

    if spec.is_empty() {
        return Err(parse_error(rule, "lower bound is above upper bound"));
    }
    Ok(spec)
}

fn single_clause(rule: &str, clause: &Clause<'_>) -> Result<VersionSpec, SpecError> {
    let (version, components) = parse_version_parts(clause.version)
        .map_err(|e| parse_error(rule, &e.to_string()))?;

    let spec = match clause.op {
        Op::Caret => {
            let upper = if version.major > 0 || components == 1 {
                bump_major(&version)
            } else if version.minor > 0 || components == 2 {
                bump_minor(&version)
            } else {
                bump_patch(&version)
            };
            half_open(version, upper)
        }
        Op::Tilde => {
            let upper = if components == 1 {
                bump_major(&version)
            } else {
                bump_minor(&version)
            };
            half_open(version, upper)
        }
        Op::Exact => VersionSpec::exact(version),
        Op::Gt | Op::Ge => VersionSpec {
            lowerbound: Some(version),
            upperbound: None,
            lower_inclusive: clause.op == Op::Ge,
            upper_inclusive: false,
        },
        Op::Lt | Op::Le => VersionSpec {
            lowerbound: None,
            upperbound: Some(version),
            lower_inclusive: true,
            upper_inclusive: clause.op == Op::Le,
        },
    };
    Ok(spec)
}

fn paired_clauses(
    rule: &str,
    first: &Clause<'_>,
    second: &Clause<'_>,
) -> Result<VersionSpec, SpecError> {
    let is_lower = |c: &Clause<'_>| matches!(c.op, Op::Gt | Op::Ge);
    let is_upper = |c: &Clause<'_>| matches!(c.op, Op::Lt | Op::Le);

    let (lower, upper) = if is_lower(first) && is_upper(second) {
        (first, second)
    } else if is_upper(first) && is_lower(second) {
        (second, first)
    } else {
        return Err(parse_error(
            rule,
            "a paired rule needs one lower (`>`/`>=`) and one upper (`<`/`<=`) comparator",
        ));
    };

    let lb = parse_version_parts(lower.version)
        .map_err(|e| parse_error(rule, &e.to_string()))?
        .0;
    let ub = parse_version_parts(upper.version)
        .map_err(|e| parse_error(rule, &e.to_string()))?
        .0;

    Ok(VersionSpec {
        lowerbound: Some(lb),
        upperbound: Some(ub),
        lower_inclusive: lower.op == Op::Ge,
        upper_inclusive: upper.op == Op::Le,
    })
}

fn half_open(lower: Version, upper: Version) -> VersionSpec {
    VersionSpec {
        lowerbound: Some(lower),
        upperbound: Some(upper),
        lower_inclusive: true,
        upper_inclusive: false,
    }
}

fn bump_major(v: &Version) -> Version {
    Version::new(v.major.saturating_add(1), 0, 0)
}

fn bump_minor(v: &Version) -> Version {
    Version::new(v.major, v.minor.saturating_add(1), 0)
}

fn bump_patch(v: &Version) -> Version {
    Version::new(v.major, v.minor, v.patch.saturating_add(1))
}

fn parse_error(rule: &str, reason: &str) -> SpecError {
    SpecError::Parse {
        rule: rule.to_owned(),
        reason: reason.to_owned(),
    }
}
