//! The closed set of value types (§3) and the type-token that identifies
//! each one for dispatch (§4.1).

use std::collections::HashMap;

/// Opaque identifier for a value type, used to dispatch operators and codecs
/// without a virtual-dispatch inheritance hierarchy (§9, "Dynamic dispatch
/// over types"). The four built-ins are registered by `tsq-core` at process
/// start; new types register their own token via [`crate::registry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct TypeToken(pub u32);

impl TypeToken {
    pub const NUMERIC: TypeToken = TypeToken(0);
    pub const NUMERIC_SUMMARY: TypeToken = TypeToken(1);
    pub const NUMERIC_ARRAY: TypeToken = TypeToken(2);
    pub const EVENT: TypeToken = TypeToken(3);
    pub const ANNOTATION: TypeToken = TypeToken(4);
}

/// One scalar per timestamp, integer or floating.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum NumericValue {
    Int(i64),
    Float(f64),
}

impl NumericValue {
    pub fn as_f64(self) -> f64 {
        match self {
            NumericValue::Int(v) => v as f64,
            NumericValue::Float(v) => v,
        }
    }

    pub fn is_nan(self) -> bool {
        matches!(self, NumericValue::Float(f) if f.is_nan())
    }
}

/// Summary-id constants from §3: `sum=0, count=1, min=2, max=3, avg=5,
/// first=6, last=7` (4 is intentionally unused in the source system).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum SummaryId {
    Sum = 0,
    Count = 1,
    Min = 2,
    Max = 3,
    Avg = 5,
    First = 6,
    Last = 7,
}

impl SummaryId {
    pub const ALL: [SummaryId; 7] = [
        SummaryId::Sum,
        SummaryId::Count,
        SummaryId::Min,
        SummaryId::Max,
        SummaryId::Avg,
        SummaryId::First,
        SummaryId::Last,
    ];

    pub const fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(SummaryId::Sum),
            1 => Some(SummaryId::Count),
            2 => Some(SummaryId::Min),
            3 => Some(SummaryId::Max),
            5 => Some(SummaryId::Avg),
            6 => Some(SummaryId::First),
            7 => Some(SummaryId::Last),
            _ => None,
        }
    }
}

/// A mapping from summary-id to scalar, per timestamp.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct NumericSummaryValue {
    pub values: HashMap<u8, f64>,
}

impl NumericSummaryValue {
    pub fn get(&self, id: SummaryId) -> Option<f64> {
        self.values.get(&(id as u8)).copied()
    }

    pub fn set(&mut self, id: SummaryId, v: f64) {
        self.values.insert(id as u8, v);
    }
}

/// A fixed-interval dense array of scalars with a single start timestamp;
/// stride comes from the enclosing [`crate::result::TimeSpecification`].
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct NumericArrayValue {
    pub values: Vec<f64>,
    /// `true` at index `i` means `values[i]` is a real observation; `false`
    /// means it is a filled/missing slot (the "missing-value mask" of §4.6).
    pub present: Vec<bool>,
}

impl NumericArrayValue {
    pub fn dense(values: Vec<f64>) -> Self {
        let present = vec![true; values.len()];
        Self { values, present }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EventValue {
    pub kind: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AnnotationValue {
    pub description: String,
    pub payload: serde_json::Value,
}

/// A value tagged with the type it was decoded as, so a generic cursor can
/// carry any of the closed set without the caller needing to know in
/// advance which token it dispatched on.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum TypedValue {
    Numeric(NumericValue),
    Summary(NumericSummaryValue),
    Array(NumericArrayValue),
    Event(EventValue),
    Annotation(AnnotationValue),
}

impl TypedValue {
    pub fn type_token(&self) -> TypeToken {
        match self {
            TypedValue::Numeric(_) => TypeToken::NUMERIC,
            TypedValue::Summary(_) => TypeToken::NUMERIC_SUMMARY,
            TypedValue::Array(_) => TypeToken::NUMERIC_ARRAY,
            TypedValue::Event(_) => TypeToken::EVENT,
            TypedValue::Annotation(_) => TypeToken::ANNOTATION,
        }
    }

    pub fn as_numeric(&self) -> Option<NumericValue> {
        match self {
            TypedValue::Numeric(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_summary(&self) -> Option<&NumericSummaryValue> {
        match self {
            TypedValue::Summary(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&NumericArrayValue> {
        match self {
            TypedValue::Array(v) => Some(v),
            _ => None,
        }
    }
}
