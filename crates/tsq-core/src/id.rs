//! Time series identity: the string form used by the planner/query layer and
//! the byte form used once an id crosses a storage/wire boundary.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use crate::error::TsqError;

/// Identity of one series in its human-readable, string-keyed form.
///
/// Invariants (enforced by [`TimeSeriesIdBuilder`], not by direct
/// construction): tag keys are unique (guaranteed structurally by using a
/// `BTreeMap`), and `aggregated_tags`/`disjoint_tags` are disjoint from the
/// keys of `tags`. Two ids are equal iff every field matches exactly — the
/// derived `PartialEq` on `BTreeMap`/`BTreeSet` gives that for free.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct TimeSeriesId {
    pub namespace: Option<String>,
    pub metric: String,
    pub tags: BTreeMap<String, String>,
    pub aggregated_tags: Option<BTreeSet<String>>,
    pub disjoint_tags: Option<BTreeSet<String>>,
    pub alias: Option<String>,
}

impl TimeSeriesId {
    /// Construct an id, checking the disjointness invariant.
    pub fn new(
        namespace: Option<String>,
        metric: impl Into<String>,
        tags: BTreeMap<String, String>,
        aggregated_tags: Option<BTreeSet<String>>,
        disjoint_tags: Option<BTreeSet<String>>,
        alias: Option<String>,
    ) -> Result<Self, TsqError> {
        let id = Self {
            namespace,
            metric: metric.into(),
            tags,
            aggregated_tags,
            disjoint_tags,
            alias,
        };
        id.check_invariants()?;
        Ok(id)
    }

    /// A bare metric id with no tags, for tests and quick construction.
    pub fn metric_only(metric: impl Into<String>) -> Self {
        Self {
            namespace: None,
            metric: metric.into(),
            tags: BTreeMap::new(),
            aggregated_tags: None,
            disjoint_tags: None,
            alias: None,
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    fn check_invariants(&self) -> Result<(), TsqError> {
        if let Some(agg) = &self.aggregated_tags {
            for k in agg {
                if self.tags.contains_key(k) {
                    return Err(TsqError::Internal(format!(
                        "aggregated tag '{k}' also present in tags map"
                    )));
                }
            }
        }
        if let Some(disj) = &self.disjoint_tags {
            for k in disj {
                if self.tags.contains_key(k) {
                    return Err(TsqError::Internal(format!(
                        "disjoint tag '{k}' also present in tags map"
                    )));
                }
            }
        }
        if let (Some(agg), Some(disj)) = (&self.aggregated_tags, &self.disjoint_tags) {
            if !agg.is_disjoint(disj) {
                return Err(TsqError::Internal(
                    "aggregated_tags and disjoint_tags are not disjoint".into(),
                ));
            }
        }
        Ok(())
    }

    /// Encode to the opaque byte form used once an id crosses a
    /// storage/wire boundary (§3, "byte form").
    pub fn to_bytes(&self) -> TimeSeriesIdBytes {
        TimeSeriesIdBytes {
            namespace: self.namespace.as_ref().map(|s| s.as_bytes().to_vec()),
            metric: self.metric.as_bytes().to_vec(),
            tags: self
                .tags
                .iter()
                .map(|(k, v)| (k.as_bytes().to_vec(), v.as_bytes().to_vec()))
                .collect(),
            aggregated_tags: self
                .aggregated_tags
                .as_ref()
                .map(|s| s.iter().map(|k| k.as_bytes().to_vec()).collect()),
            disjoint_tags: self
                .disjoint_tags
                .as_ref()
                .map(|s| s.iter().map(|k| k.as_bytes().to_vec()).collect()),
            alias: self.alias.as_ref().map(|s| s.as_bytes().to_vec()),
        }
    }
}

/// Storage-encoded identity: the same fields as [`TimeSeriesId`] as opaque
/// byte sequences. Equality is byte-for-byte via derived `PartialEq`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct TimeSeriesIdBytes {
    pub namespace: Option<Vec<u8>>,
    pub metric: Vec<u8>,
    pub tags: BTreeMap<Vec<u8>, Vec<u8>>,
    pub aggregated_tags: Option<BTreeSet<Vec<u8>>>,
    pub disjoint_tags: Option<BTreeSet<Vec<u8>>>,
    pub alias: Option<Vec<u8>>,
}

impl TimeSeriesIdBytes {
    /// Decode back to the string form. Errors if any field is not valid
    /// UTF-8 (storage encodings are always UTF-8 metric/tag text in this
    /// engine; binary tag values are not supported).
    pub fn to_string_form(&self) -> Result<TimeSeriesId, TsqError> {
        fn s(b: &[u8]) -> Result<String, TsqError> {
            String::from_utf8(b.to_vec())
                .map_err(|e| TsqError::Internal(format!("non-utf8 id field: {e}")))
        }
        let namespace = self.namespace.as_deref().map(s).transpose()?;
        let metric = s(&self.metric)?;
        let mut tags = BTreeMap::new();
        for (k, v) in &self.tags {
            tags.insert(s(k)?, s(v)?);
        }
        let aggregated_tags = self
            .aggregated_tags
            .as_ref()
            .map(|set| set.iter().map(|k| s(k)).collect::<Result<BTreeSet<_>, _>>())
            .transpose()?;
        let disjoint_tags = self
            .disjoint_tags
            .as_ref()
            .map(|set| set.iter().map(|k| s(k)).collect::<Result<BTreeSet<_>, _>>())
            .transpose()?;
        let alias = self.alias.as_deref().map(s).transpose()?;
        TimeSeriesId::new(namespace, metric, tags, aggregated_tags, disjoint_tags, alias)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_roundtrip_is_exact() {
        let id = TimeSeriesId::metric_only("sys.cpu.user")
            .with_tag("host", "web01")
            .with_tag("dc", "iad");
        let bytes = id.to_bytes();
        let back = bytes.to_string_form().unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn rejects_overlapping_aggregated_tag() {
        let mut agg = BTreeSet::new();
        agg.insert("host".to_string());
        let result = TimeSeriesId::new(
            None,
            "sys.cpu.user",
            BTreeMap::from([("host".to_string(), "web01".to_string())]),
            Some(agg),
            None,
            None,
        );
        assert!(result.is_err());
    }

    #[test]
    fn equal_iff_all_fields_match() {
        let a = TimeSeriesId::metric_only("m").with_tag("a", "1");
        let b = TimeSeriesId::metric_only("m").with_tag("a", "1");
        let c = TimeSeriesId::metric_only("m").with_tag("a", "2");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
