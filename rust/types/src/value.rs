use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A single column value as observed in a record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ScalarValue {
    Null,
    Bool(bool),
    Signed(i64),
    Unsigned(u64),
    Float(f64),
    Text(String),
}

impl ScalarValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ScalarValue::Null)
    }

    /// Numeric view of the value. Text that parses as a number counts as numeric,
    /// since log fields frequently carry numbers as strings.
    pub fn as_number(&self) -> Option<Number> {
        match self {
            ScalarValue::Signed(v) => Some(Number::Signed(*v)),
            ScalarValue::Unsigned(v) => Some(
                i64::try_from(*v)
                    .map(Number::Signed)
                    .unwrap_or(Number::Float(*v as f64)),
            ),
            ScalarValue::Float(v) => Some(Number::Float(*v)),
            ScalarValue::Text(s) => {
                if let Ok(v) = s.parse::<i64>() {
                    Some(Number::Signed(v))
                } else {
                    s.parse::<f64>().ok().map(Number::Float)
                }
            }
            ScalarValue::Null | ScalarValue::Bool(_) => None,
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Null => f.write_str("null"),
            ScalarValue::Bool(b) => write!(f, "{b}"),
            ScalarValue::Signed(v) => write!(f, "{v}"),
            ScalarValue::Unsigned(v) => write!(f, "{v}"),
            ScalarValue::Float(v) => write!(f, "{v}"),
            ScalarValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for ScalarValue {
    fn from(value: &str) -> Self {
        ScalarValue::Text(value.to_string())
    }
}

impl From<String> for ScalarValue {
    fn from(value: String) -> Self {
        ScalarValue::Text(value)
    }
}

impl From<i64> for ScalarValue {
    fn from(value: i64) -> Self {
        ScalarValue::Signed(value)
    }
}

impl From<u64> for ScalarValue {
    fn from(value: u64) -> Self {
        ScalarValue::Unsigned(value)
    }
}

impl From<f64> for ScalarValue {
    fn from(value: f64) -> Self {
        ScalarValue::Float(value)
    }
}

impl From<bool> for ScalarValue {
    fn from(value: bool) -> Self {
        ScalarValue::Bool(value)
    }
}

/// A numeric statistic. Integer arithmetic stays exact until it overflows or meets
/// a float, at which point the result is promoted to `Float`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Number {
    Signed(i64),
    Float(f64),
}

#[allow(clippy::should_implement_trait)]
impl Number {
    pub fn as_f64(&self) -> f64 {
        match self {
            Number::Signed(v) => *v as f64,
            Number::Float(v) => *v,
        }
    }

    pub fn add(self, other: Number) -> Number {
        match (self, other) {
            (Number::Signed(a), Number::Signed(b)) => match a.checked_add(b) {
                Some(sum) => Number::Signed(sum),
                None => Number::Float(a as f64 + b as f64),
            },
            (a, b) => Number::Float(a.as_f64() + b.as_f64()),
        }
    }

    pub fn sub(self, other: Number) -> Number {
        match (self, other) {
            (Number::Signed(a), Number::Signed(b)) => match a.checked_sub(b) {
                Some(diff) => Number::Signed(diff),
                None => Number::Float(a as f64 - b as f64),
            },
            (a, b) => Number::Float(a.as_f64() - b.as_f64()),
        }
    }

    pub fn mul(self, other: Number) -> Number {
        match (self, other) {
            (Number::Signed(a), Number::Signed(b)) => match a.checked_mul(b) {
                Some(product) => Number::Signed(product),
                None => Number::Float(a as f64 * b as f64),
            },
            (a, b) => Number::Float(a.as_f64() * b.as_f64()),
        }
    }

    /// Division always yields a float.
    pub fn div(self, other: Number) -> Number {
        Number::Float(self.as_f64() / other.as_f64())
    }

    pub fn total_cmp(&self, other: &Number) -> Ordering {
        match (self, other) {
            (Number::Signed(a), Number::Signed(b)) => a.cmp(b),
            (a, b) => a.as_f64().total_cmp(&b.as_f64()),
        }
    }

    pub fn min(self, other: Number) -> Number {
        match self.total_cmp(&other) {
            Ordering::Greater => other,
            _ => self,
        }
    }

    pub fn max(self, other: Number) -> Number {
        match self.total_cmp(&other) {
            Ordering::Less => other,
            _ => self,
        }
    }
}

/// Running sum whose result does not depend on the order values arrive in.
/// Integers are summed exactly in 128 bits and floats are summed separately, so
/// the sum is only narrowed when it is read.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExactSum {
    pub int: i128,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub float: Option<f64>,
}

impl ExactSum {
    pub fn add_number(&mut self, value: Number) {
        match value {
            Number::Signed(v) => self.int = self.int.saturating_add(i128::from(v)),
            Number::Float(v) => *self.float.get_or_insert(0.0) += v,
        }
    }

    pub fn merge(&mut self, other: &ExactSum) {
        self.int = self.int.saturating_add(other.int);
        if let Some(v) = other.float {
            *self.float.get_or_insert(0.0) += v;
        }
    }

    /// The sum as a [`Number`]: `Signed` while it is all integers and fits in an
    /// `i64`, `Float` otherwise.
    pub fn value(&self) -> Number {
        match self.float {
            None => i64::try_from(self.int)
                .map(Number::Signed)
                .unwrap_or(Number::Float(self.int as f64)),
            Some(v) => Number::Float(self.int as f64 + v),
        }
    }
}

impl From<Number> for ExactSum {
    fn from(value: Number) -> Self {
        let mut sum = ExactSum::default();
        sum.add_number(value);
        sum
    }
}

impl From<Number> for MeasureValue {
    fn from(value: Number) -> Self {
        match value {
            Number::Signed(v) => MeasureValue::Signed(v),
            Number::Float(v) => MeasureValue::Float(v),
        }
    }
}

impl From<Number> for ScalarValue {
    fn from(value: Number) -> Self {
        match value {
            Number::Signed(v) => ScalarValue::Signed(v),
            Number::Float(v) => ScalarValue::Float(v),
        }
    }
}

/// The final value of one measure, as exposed to result consumers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum MeasureValue {
    Null,
    Signed(i64),
    Float(f64),
    Text(String),
    TextList(Vec<String>),
}

impl MeasureValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MeasureValue::Signed(v) => Some(*v as f64),
            MeasureValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Plain string form. String lists are rendered as a JSON array.
    pub fn to_plain_string(&self) -> String {
        match self {
            MeasureValue::Null => String::new(),
            MeasureValue::Signed(v) => v.to_string(),
            MeasureValue::Float(v) => v.to_string(),
            MeasureValue::Text(s) => s.clone(),
            MeasureValue::TextList(values) => {
                serde_json::to_string(values).unwrap_or_else(|_| values.join(","))
            }
        }
    }

    /// Parses a value pushed down by a coordinator. Thousands separators are dropped,
    /// then the text is tried as an integer, then as a float, and kept as text otherwise.
    pub fn parse_lenient(raw: &str) -> MeasureValue {
        let cleaned = raw.replace(',', "");
        if let Ok(v) = cleaned.parse::<i64>() {
            MeasureValue::Signed(v)
        } else if let Ok(v) = cleaned.parse::<f64>() {
            MeasureValue::Float(v)
        } else {
            MeasureValue::Text(cleaned)
        }
    }
}
