//! Label selector parsing and matching.
//!
//! Accepts the equality- and set-based selector syntax used by the
//! workload registry:
//!
//! ```text
//! app=web,tier!=cache,env in (prod,staging),!canary,track
//! ```
//!
//! The selector string is passed through to the registry verbatim; parsing
//! here validates it at startup and lets in-process registries evaluate it.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use regex::Regex;

use crate::error::{ReplicantError, ReplicantResult};

const KEY: &str = r"(?:[a-z0-9](?:[-a-z0-9.]*[a-z0-9])?/)?[A-Za-z0-9](?:[-A-Za-z0-9_.]*[A-Za-z0-9])?";
const VALUE: &str = r"(?:[A-Za-z0-9](?:[-A-Za-z0-9_.]*[A-Za-z0-9])?)?";

/// Comparison applied by one selector term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operator {
    Equals,
    NotEquals,
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

/// One comma-separated term of a selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub key: String,
    pub op: Operator,
    pub values: Vec<String>,
}

impl Requirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let value = labels.get(&self.key);
        match self.op {
            Operator::Equals | Operator::In => {
                value.is_some_and(|v| self.values.iter().any(|want| want == v))
            }
            Operator::NotEquals | Operator::NotIn => {
                value.is_none_or(|v| self.values.iter().all(|want| want != v))
            }
            Operator::Exists => value.is_some(),
            Operator::DoesNotExist => value.is_none(),
        }
    }
}

/// A parsed, validated label selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSelector {
    raw: String,
    requirements: Vec<Requirement>,
}

impl LabelSelector {
    /// Parse and validate a selector string.
    pub fn parse(raw: &str) -> ReplicantResult<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ReplicantError::Config(
                "selector must not be empty".to_string(),
            ));
        }

        let equality = compile(&format!(r"^({KEY})\s*(==|=|!=)\s*({VALUE})$"))?;
        let set = compile(&format!(r"^({KEY})\s+(in|notin)\s+\(([^()]*)\)$"))?;
        let exists = compile(&format!(r"^(!?)\s*({KEY})$"))?;
        let value = compile(&format!(r"^{VALUE}$"))?;

        let mut requirements = Vec::new();
        for term in split_terms(raw)? {
            let term = term.trim();
            if let Some(caps) = equality.captures(term) {
                let op = if &caps[2] == "!=" {
                    Operator::NotEquals
                } else {
                    Operator::Equals
                };
                requirements.push(Requirement {
                    key: caps[1].to_string(),
                    op,
                    values: vec![caps[3].to_string()],
                });
            } else if let Some(caps) = set.captures(term) {
                let values: Vec<String> = caps[3]
                    .split(',')
                    .map(|v| v.trim().to_string())
                    .collect();
                if values.iter().any(|v| v.is_empty() || !value.is_match(v)) {
                    return Err(malformed(raw, term));
                }
                let op = if &caps[2] == "in" {
                    Operator::In
                } else {
                    Operator::NotIn
                };
                requirements.push(Requirement {
                    key: caps[1].to_string(),
                    op,
                    values,
                });
            } else if let Some(caps) = exists.captures(term) {
                let op = if caps[1].is_empty() {
                    Operator::Exists
                } else {
                    Operator::DoesNotExist
                };
                requirements.push(Requirement {
                    key: caps[2].to_string(),
                    op,
                    values: Vec::new(),
                });
            } else {
                return Err(malformed(raw, term));
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            requirements,
        })
    }

    /// The selector as given, suitable for passing to the registry.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    /// Whether a label set satisfies every term.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

impl FromStr for LabelSelector {
    type Err = ReplicantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn compile(pattern: &str) -> ReplicantResult<Regex> {
    Regex::new(pattern)
        .map_err(|e| ReplicantError::Config(format!("selector pattern: {e}")))
}

fn malformed(raw: &str, term: &str) -> ReplicantError {
    ReplicantError::Config(format!("malformed selector {raw:?}: bad term {term:?}"))
}

/// Split on commas that are not inside a parenthesised value list.
fn split_terms(raw: &str) -> ReplicantResult<Vec<&str>> {
    let mut terms = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in raw.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| malformed(raw, &raw[start..=i]))?;
            }
            ',' if depth == 0 => {
                terms.push(&raw[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(malformed(raw, &raw[start..]));
    }
    terms.push(&raw[start..]);
    Ok(terms)
}
