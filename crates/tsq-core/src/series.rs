//! `TimeSeries`: an id plus lazy, independently-cursorable access to data
//! typed by a type token (§3).

use std::collections::HashMap;
use std::sync::Arc;

use crate::id::TimeSeriesId;
use crate::timestamp::Timestamp;
use crate::value::{TypeToken, TypedValue};

/// A lazy cursor over one series' points for one value type. Each call to
/// [`TimeSeries::cursor`] returns a fresh cursor; cursors never share
/// mutable state with each other (the underlying point data is held behind
/// an `Arc` and is immutable, only the cursor's own position advances).
pub trait ValueCursor: Send {
    fn next(&mut self) -> Option<(Timestamp, TypedValue)>;
}

struct SliceCursor {
    data: Arc<Vec<(Timestamp, TypedValue)>>,
    pos: usize,
}

impl ValueCursor for SliceCursor {
    fn next(&mut self) -> Option<(Timestamp, TypedValue)> {
        let item = self.data.get(self.pos).cloned();
        if item.is_some() {
            self.pos += 1;
        }
        item
    }
}

/// Identity plus multi-typed data access. A single series may expose more
/// than one type simultaneously (e.g. raw numeric and a rollup summary for
/// the same id).
pub trait TimeSeries: Send + Sync {
    fn id(&self) -> &TimeSeriesId;

    /// Value types this series has data for.
    fn types(&self) -> &[TypeToken];

    /// A fresh, independent cursor over this series' data for `token`, or
    /// `None` if the series does not expose that type.
    fn cursor(&self, token: TypeToken) -> Option<Box<dyn ValueCursor>>;
}

/// Reference in-memory implementation of [`TimeSeries`], used by the
/// `MemoryDataSource` plugin and throughout the test suite. Storage plugins
/// outside this core would typically implement `TimeSeries` directly over
/// their own decoded buffers instead of materializing this type.
pub struct InMemoryTimeSeries {
    id: TimeSeriesId,
    types: Vec<TypeToken>,
    data: HashMap<TypeToken, Arc<Vec<(Timestamp, TypedValue)>>>,
}

impl InMemoryTimeSeries {
    pub fn new(id: TimeSeriesId) -> Self {
        Self {
            id,
            types: Vec::new(),
            data: HashMap::new(),
        }
    }

    /// Attach a fully-materialized set of points for one type. Points should
    /// already be in increasing timestamp order; this is not re-validated
    /// here since it is cheap for callers (sources, kernels) to maintain.
    pub fn with_points(mut self, token: TypeToken, points: Vec<(Timestamp, TypedValue)>) -> Self {
        self.types.push(token);
        self.data.insert(token, Arc::new(points));
        self
    }

    pub fn points(&self, token: TypeToken) -> Option<&[(Timestamp, TypedValue)]> {
        self.data.get(&token).map(|v| v.as_slice())
    }
}

impl TimeSeries for InMemoryTimeSeries {
    fn id(&self) -> &TimeSeriesId {
        &self.id
    }

    fn types(&self) -> &[TypeToken] {
        &self.types
    }

    fn cursor(&self, token: TypeToken) -> Option<Box<dyn ValueCursor>> {
        self.data.get(&token).map(|data| {
            Box::new(SliceCursor {
                data: data.clone(),
                pos: 0,
            }) as Box<dyn ValueCursor>
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::NumericValue;
    use crate::timestamp::Resolution;

    #[test]
    fn independent_cursors_do_not_share_position() {
        let id = TimeSeriesId::metric_only("m");
        let pts = vec![
            (Timestamp::new(0, Resolution::Millis), TypedValue::Numeric(NumericValue::Int(1))),
            (Timestamp::new(1, Resolution::Millis), TypedValue::Numeric(NumericValue::Int(2))),
        ];
        let series = InMemoryTimeSeries::new(id).with_points(TypeToken::NUMERIC, pts);

        let mut c1 = series.cursor(TypeToken::NUMERIC).unwrap();
        let mut c2 = series.cursor(TypeToken::NUMERIC).unwrap();
        assert_eq!(c1.next().unwrap().1, TypedValue::Numeric(NumericValue::Int(1)));
        // c2 starts fresh, unaffected by c1 having advanced.
        assert_eq!(c2.next().unwrap().1, TypedValue::Numeric(NumericValue::Int(1)));
        assert_eq!(c1.next().unwrap().1, TypedValue::Numeric(NumericValue::Int(2)));
    }
}
