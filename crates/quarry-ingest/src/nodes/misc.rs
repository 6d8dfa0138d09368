//! Field-level combinators: `assign`, `sub`, `skip_if`.

use crate::Result;
use crate::pipeline::{Flow, Node, RunContext};
use indexmap::IndexMap;
use quarry_core::{Record, interpolate};
use regex::Regex;

/// Sets fields on every record, optionally expanding `%(field)s` placeholders
/// against the record's existing values.
pub struct Assign {
    values: IndexMap<String, String>,
    interpolate: bool,
}

/// Build an [`Assign`] node.
pub fn assign<K, V>(values: impl IntoIterator<Item = (K, V)>, interpolate: bool) -> Assign
where
    K: Into<String>,
    V: Into<String>,
{
    Assign {
        values: values
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect(),
        interpolate,
    }
}

impl Node for Assign {
    fn name(&self) -> &str {
        "assign"
    }

    fn process<'a>(&'a self, _ctx: &'a RunContext, record: Record) -> Result<Flow<'a>> {
        let mut out = record.clone();
        for (field, value) in &self.values {
            let value = if self.interpolate {
                interpolate(value, &record)?
            } else {
                value.clone()
            };
            out.insert(field.clone(), value);
        }
        Ok(Flow::one(out))
    }
}

/// Rewrites string fields with regex substitutions.
///
/// Replacements use the `regex` crate syntax (`$1`, `${name}`). Rules for a
/// field apply in order; records without the field pass through untouched.
pub struct Sub {
    rules: Vec<(String, Vec<(Regex, String)>)>,
}

/// Build a [`Sub`] node from `field -> {pattern -> replacement}`.
pub fn sub(rules: &IndexMap<String, IndexMap<String, String>>) -> Result<Sub> {
    let rules = rules
        .iter()
        .map(|(field, subs)| {
            let compiled = subs
                .iter()
                .map(|(pattern, repl)| Ok((Regex::new(pattern)?, repl.clone())))
                .collect::<Result<Vec<_>>>()?;
            Ok((field.clone(), compiled))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Sub { rules })
}

impl Node for Sub {
    fn name(&self) -> &str {
        "sub"
    }

    fn process<'a>(&'a self, _ctx: &'a RunContext, mut record: Record) -> Result<Flow<'a>> {
        for (field, subs) in &self.rules {
            let Some(value) = record.get_str(field) else {
                continue;
            };
            let mut value = value.to_string();
            for (pattern, repl) in subs {
                value = pattern.replace_all(&value, repl.as_str()).into_owned();
            }
            record.insert(field.clone(), value);
        }
        Ok(Flow::one(record))
    }
}

/// How a [`SkipIf`] condition compares a field.
#[derive(Debug, Clone)]
pub enum FieldTest {
    /// Exact string equality.
    Equals(String),
    /// Regex search anywhere in the value.
    Matches(Regex),
}

impl FieldTest {
    fn check(&self, value: &str) -> bool {
        match self {
            Self::Equals(expected) => value == expected,
            Self::Matches(re) => re.is_match(value),
        }
    }
}

/// Drops records for which every condition holds (or, when negated, for
/// which some condition fails). A missing field never satisfies a condition.
pub struct SkipIf {
    conditions: Vec<(String, FieldTest)>,
    negate: bool,
}

/// Build a regex-based [`SkipIf`] node.
pub fn skip_if<K, P>(conditions: impl IntoIterator<Item = (K, P)>, negate: bool) -> Result<SkipIf>
where
    K: Into<String>,
    P: AsRef<str>,
{
    let conditions = conditions
        .into_iter()
        .map(|(field, pattern)| Ok((field.into(), FieldTest::Matches(Regex::new(pattern.as_ref())?))))
        .collect::<Result<Vec<_>>>()?;
    Ok(SkipIf { conditions, negate })
}

impl SkipIf {
    /// Skip on exact field values instead of patterns.
    pub fn equals<K, V>(conditions: impl IntoIterator<Item = (K, V)>, negate: bool) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            conditions: conditions
                .into_iter()
                .map(|(k, v)| (k.into(), FieldTest::Equals(v.into())))
                .collect(),
            negate,
        }
    }

    fn matches(&self, record: &Record) -> bool {
        self.conditions.iter().all(|(field, test)| {
            record
                .get(field)
                .is_some_and(|value| test.check(&value.to_string()))
        })
    }
}

impl Node for SkipIf {
    fn name(&self) -> &str {
        "skip_if"
    }

    fn process<'a>(&'a self, _ctx: &'a RunContext, record: Record) -> Result<Flow<'a>> {
        if self.matches(&record) != self.negate {
            tracing::debug!(url = record.get_str("url").unwrap_or("-"), "Skipping record");
            return Ok(Flow::none());
        }
        Ok(Flow::one(record))
    }
}
