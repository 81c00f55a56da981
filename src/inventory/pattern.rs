//! Host pattern resolution for ad-hoc commands
//!
//! A pattern is a list of terms separated by `:` or `,`:
//!
//! - `all` or `*` → every host
//! - a group name → the hosts of that group
//! - anything else → a glob over host names (`*`, `?`)
//!
//! A term prefixed with `!` removes its hosts from the selection, one prefixed
//! with `&` intersects the selection with its hosts. Plain terms are unions.

use std::collections::BTreeSet;

use regex::Regex;

use super::InventoryDocument;
use super::error::{InventoryError, InventoryResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Union,
    Intersect,
    Exclude,
}

#[derive(Debug)]
enum Selector {
    All,
    /// Group name or literal host name
    Name(String),
    Glob(Regex),
}

#[derive(Debug)]
struct Term {
    op: Op,
    selector: Selector,
}

/// A parsed host pattern
#[derive(Debug)]
pub struct HostPattern {
    raw: String,
    terms: Vec<Term>,
}

fn glob_to_regex(glob: &str) -> InventoryResult<Regex> {
    let mut expr = String::with_capacity(glob.len() + 2);
    expr.push('^');
    for ch in glob.chars() {
        match ch {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');

    Regex::new(&expr).map_err(|e| InventoryError::InvalidPattern(format!("{glob}: {e}")))
}

impl HostPattern {
    pub fn parse(pattern: &str) -> InventoryResult<Self> {
        let mut terms = Vec::new();

        for raw_term in pattern.split([':', ',']).map(str::trim) {
            if raw_term.is_empty() {
                continue;
            }

            let (op, body) = match raw_term.chars().next() {
                Some('!') => (Op::Exclude, &raw_term[1..]),
                Some('&') => (Op::Intersect, &raw_term[1..]),
                _ => (Op::Union, raw_term),
            };

            if body.is_empty() {
                return Err(InventoryError::InvalidPattern(format!(
                    "empty term in '{pattern}'"
                )));
            }

            let selector = if body == "all" || body == "*" {
                Selector::All
            } else if body.contains(['*', '?']) {
                Selector::Glob(glob_to_regex(body)?)
            } else {
                Selector::Name(body.to_string())
            };

            terms.push(Term { op, selector });
        }

        if terms.is_empty() {
            return Err(InventoryError::InvalidPattern(format!(
                "pattern '{pattern}' has no terms"
            )));
        }

        Ok(Self {
            raw: pattern.to_string(),
            terms,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    fn select(selector: &Selector, doc: &InventoryDocument) -> BTreeSet<String> {
        match selector {
            Selector::All => doc.all_hosts().into_iter().collect(),
            Selector::Name(name) => {
                if doc.groups.contains_key(name) {
                    doc.hosts_in_group(name).into_iter().collect()
                } else if doc.host(name).is_some() {
                    BTreeSet::from([name.clone()])
                } else {
                    BTreeSet::new()
                }
            }
            Selector::Glob(re) => doc
                .all_hosts()
                .into_iter()
                .filter(|host| re.is_match(host))
                .collect(),
        }
    }

    /// Resolve the pattern to a sorted list of host names
    pub fn resolve(&self, doc: &InventoryDocument) -> Vec<String> {
        let mut selected = BTreeSet::new();

        // unions first, then narrow, so term order does not matter
        for term in self.terms.iter().filter(|t| t.op == Op::Union) {
            selected.extend(Self::select(&term.selector, doc));
        }
        for term in self.terms.iter().filter(|t| t.op == Op::Intersect) {
            let hosts = Self::select(&term.selector, doc);
            selected.retain(|host| hosts.contains(host));
        }
        for term in self.terms.iter().filter(|t| t.op == Op::Exclude) {
            let hosts = Self::select(&term.selector, doc);
            selected.retain(|host| !hosts.contains(host));
        }

        selected.into_iter().collect()
    }
}
