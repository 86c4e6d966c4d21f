//! `Filter`: evaluates a predicate over tag-key/tag-value pairs (§4.3).
//! Composition is short-circuit: `And`/`Or` stop evaluating children once
//! the result is determined, `Not` never evaluates more than its one child.

use tsq_core::TimeSeriesId;

/// A single tag-key/value comparison.
#[derive(Debug, Clone)]
pub enum TagOp {
    Literal(String),
    Regex(regex::Regex),
    Wildcard(String),
    /// Inclusive numeric range; the tag value must parse as `f64`.
    Range(f64, f64),
}

impl TagOp {
    pub fn literal(v: impl Into<String>) -> Self {
        TagOp::Literal(v.into())
    }

    pub fn regex(pattern: &str) -> Result<Self, tsq_core::TsqError> {
        regex::Regex::new(pattern)
            .map(TagOp::Regex)
            .map_err(|e| tsq_core::TsqError::ParseError(format!("bad filter regex '{pattern}': {e}")))
    }

    /// `*` matches any run of characters, `?` matches exactly one.
    pub fn wildcard(pattern: impl Into<String>) -> Self {
        TagOp::Wildcard(pattern.into())
    }

    pub fn range(lo: f64, hi: f64) -> Self {
        TagOp::Range(lo, hi)
    }

    fn matches(&self, value: &str) -> bool {
        match self {
            TagOp::Literal(expected) => value == expected,
            TagOp::Regex(re) => re.is_match(value),
            TagOp::Wildcard(pattern) => wildcard_match(pattern, value),
            TagOp::Range(lo, hi) => value.parse::<f64>().map(|v| v >= *lo && v <= *hi).unwrap_or(false),
        }
    }
}

fn wildcard_match(pattern: &str, value: &str) -> bool {
    fn rec(p: &[u8], v: &[u8]) -> bool {
        match p.first() {
            None => v.is_empty(),
            Some(b'*') => rec(&p[1..], v) || (!v.is_empty() && rec(p, &v[1..])),
            Some(b'?') => !v.is_empty() && rec(&p[1..], &v[1..]),
            Some(c) => v.first() == Some(c) && rec(&p[1..], &v[1..]),
        }
    }
    rec(pattern.as_bytes(), value.as_bytes())
}

/// A predicate tree over an id's tags (§4.3 `AND`/`OR`/`NOT` composition).
#[derive(Debug, Clone)]
pub enum Predicate {
    Tag { key: String, op: TagOp },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn tag(key: impl Into<String>, op: TagOp) -> Self {
        Predicate::Tag { key: key.into(), op }
    }

    pub fn evaluate(&self, id: &TimeSeriesId) -> bool {
        match self {
            Predicate::Tag { key, op } => id.tags.get(key).map(|v| op.matches(v)).unwrap_or(false),
            Predicate::And(children) => children.iter().all(|c| c.evaluate(id)),
            Predicate::Or(children) => children.iter().any(|c| c.evaluate(id)),
            Predicate::Not(child) => !child.evaluate(id),
        }
    }
}

/// Filter a batch of ids in place against `predicate`, keeping evaluation
/// order stable (original series order preserved among survivors).
pub fn filter_ids<'a>(ids: impl IntoIterator<Item = &'a TimeSeriesId>, predicate: &Predicate) -> Vec<&'a TimeSeriesId> {
    ids.into_iter().filter(|id| predicate.evaluate(id)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id_with(host: &str) -> TimeSeriesId {
        TimeSeriesId::metric_only("sys.cpu.user").with_tag("host", host)
    }

    #[test]
    fn literal_matches_exact_value_only() {
        let p = Predicate::tag("host", TagOp::literal("web01"));
        assert!(p.evaluate(&id_with("web01")));
        assert!(!p.evaluate(&id_with("web02")));
    }

    #[test]
    fn wildcard_star_matches_prefix() {
        let p = Predicate::tag("host", TagOp::wildcard("web*"));
        assert!(p.evaluate(&id_with("web01")));
        assert!(!p.evaluate(&id_with("db01")));
    }

    #[test]
    fn and_short_circuits_on_first_false() {
        let p = Predicate::And(vec![
            Predicate::tag("host", TagOp::literal("web01")),
            Predicate::tag("missing", TagOp::literal("x")),
        ]);
        assert!(!p.evaluate(&id_with("web01")));
    }

    #[test]
    fn not_inverts_child() {
        let p = Predicate::Not(Box::new(Predicate::tag("host", TagOp::literal("web01"))));
        assert!(!p.evaluate(&id_with("web01")));
        assert!(p.evaluate(&id_with("web02")));
    }

    #[test]
    fn range_parses_tag_value_as_number() {
        let id = TimeSeriesId::metric_only("m").with_tag("shard", "3");
        let p = Predicate::tag("shard", TagOp::range(0.0, 5.0));
        assert!(p.evaluate(&id));
        let p2 = Predicate::tag("shard", TagOp::range(4.0, 5.0));
        assert!(!p2.evaluate(&id));
    }
}
