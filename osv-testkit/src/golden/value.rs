//! Value model for golden records.
//!
//! Records hold plain literals plus two tagged constructors: call records
//! (`call.method(args, key=value)`) and UTC timestamps with nanosecond
//! precision (`DatetimeWithNanoseconds(...)`). Nothing else can be expressed,
//! so loading a record never runs code.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Timelike, Utc};

/// A recorded method call: `call.a.b(1, key='v')`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct CallRecord {
    /// Attribute path after `call`; empty for a bare `call(...)`.
    pub path: Vec<String>,
    pub args: Vec<GoldenValue>,
    pub kwargs: BTreeMap<String, GoldenValue>,
}

impl CallRecord {
    /// A call of `call.<dotted>`; pass `""` for a bare call.
    ///
    /// Path parts and keyword names must be identifiers (see
    /// [`is_identifier`]). The comparator refuses records that break this
    /// with [`GoldenValue::unrepresentable`] before anything is written.
    pub fn new(dotted: &str) -> Self {
        Self {
            path: dotted
                .split('.')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, value: impl Into<GoldenValue>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<GoldenValue>) -> Self {
        self.kwargs.insert(name.into(), value.into());
        self
    }
}

/// A wall-clock instant with nanosecond precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    pub naive: NaiveDateTime,
    /// `tzinfo=datetime.timezone.utc` when set; a naive datetime otherwise.
    pub utc: bool,
}

impl Timestamp {
    /// A UTC timestamp. A leap second is folded into second 59.
    pub fn utc(instant: DateTime<Utc>) -> Self {
        Self {
            naive: fold_leap_second(instant.naive_utc()),
            utc: true,
        }
    }

    /// A timestamp without a zone. A leap second is folded into second 59.
    pub fn naive(naive: NaiveDateTime) -> Self {
        Self {
            naive: fold_leap_second(naive),
            utc: false,
        }
    }

    pub fn nanosecond(&self) -> u32 {
        self.naive.nanosecond()
    }

    /// chrono marks a leap second with a nanosecond field of 1e9 or more.
    pub fn is_leap_second(&self) -> bool {
        self.naive.nanosecond() >= NANOS_PER_SECOND
    }
}

const NANOS_PER_SECOND: u32 = 1_000_000_000;

pub(crate) fn fold_leap_second(naive: NaiveDateTime) -> NaiveDateTime {
    let nanos = naive.nanosecond();
    if nanos < NANOS_PER_SECOND {
        return naive;
    }
    naive.with_nanosecond(nanos - NANOS_PER_SECOND).unwrap_or(naive)
}

/// True for names the record reader accepts after `call.` or before `=`:
/// a letter or `_`, then letters, digits or `_`.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_alphabetic() || first == '_' => {
            chars.all(|c| c.is_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

/// One node of a golden record.
///
/// Equality and ordering are total so values can key a mapping: floats
/// compare with `f64::total_cmp`, except that all NaNs are equal.
#[derive(Debug, Clone)]
pub enum GoldenValue {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<GoldenValue>),
    Tuple(Vec<GoldenValue>),
    Dict(BTreeMap<GoldenValue, GoldenValue>),
    Call(CallRecord),
    Datetime(Timestamp),
}

impl GoldenValue {
    pub fn bytes(data: impl Into<Vec<u8>>) -> Self {
        Self::Bytes(data.into())
    }

    pub fn tuple<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<GoldenValue>,
    {
        Self::Tuple(items.into_iter().map(Into::into).collect())
    }

    pub fn dict<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<GoldenValue>,
        V: Into<GoldenValue>,
    {
        Self::Dict(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// A list of strings, the shape line comparisons work on.
    pub fn lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::List(lines.into_iter().map(|l| Self::Str(l.into())).collect())
    }

    /// Short name of the variant, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Bytes(_) => "bytes",
            Self::List(_) => "list",
            Self::Tuple(_) => "tuple",
            Self::Dict(_) => "dict",
            Self::Call(_) => "call",
            Self::Datetime(_) => "datetime",
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<GoldenValue, GoldenValue>> {
        match self {
            Self::Dict(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The strings of a list or tuple of strings.
    pub fn as_lines(&self) -> Option<Vec<&str>> {
        match self {
            Self::List(items) | Self::Tuple(items) => items.iter().map(Self::as_str).collect(),
            _ => None,
        }
    }

    /// Why this value has no record text that reads back to it, if it has
    /// none: a call path part or keyword name that is not an identifier, or
    /// a leap-second timestamp built from raw fields.
    pub fn unrepresentable(&self) -> Option<String> {
        match self {
            Self::List(items) | Self::Tuple(items) => {
                items.iter().find_map(Self::unrepresentable)
            }
            Self::Dict(map) => map
                .iter()
                .find_map(|(k, v)| k.unrepresentable().or_else(|| v.unrepresentable())),
            Self::Call(call) => {
                if let Some(part) = call.path.iter().find(|p| !is_identifier(p)) {
                    return Some(format!("call path part {part:?} is not an identifier"));
                }
                if let Some(name) = call.kwargs.keys().find(|k| !is_identifier(k)) {
                    return Some(format!("keyword argument {name:?} is not an identifier"));
                }
                call.args
                    .iter()
                    .chain(call.kwargs.values())
                    .find_map(Self::unrepresentable)
            }
            Self::Datetime(ts) if ts.is_leap_second() => Some(format!(
                "leap-second timestamp {}; build it with Timestamp::utc or Timestamp::naive",
                ts.naive
            )),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::None => 0,
            Self::Bool(_) => 1,
            Self::Int(_) => 2,
            Self::Float(_) => 3,
            Self::Str(_) => 4,
            Self::Bytes(_) => 5,
            Self::List(_) => 6,
            Self::Tuple(_) => 7,
            Self::Dict(_) => 8,
            Self::Call(_) => 9,
            Self::Datetime(_) => 10,
        }
    }
}

impl Ord for GoldenValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::None, Self::None) => Ordering::Equal,
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Float(a), Self::Float(b)) => cmp_floats(*a, *b),
            (Self::Str(a), Self::Str(b)) => a.cmp(b),
            (Self::Bytes(a), Self::Bytes(b)) => a.cmp(b),
            (Self::List(a), Self::List(b)) | (Self::Tuple(a), Self::Tuple(b)) => a.cmp(b),
            (Self::Dict(a), Self::Dict(b)) => a.cmp(b),
            (Self::Call(a), Self::Call(b)) => a.cmp(b),
            (Self::Datetime(a), Self::Datetime(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

/// Total order on floats where every NaN is equal and sorts last.
fn cmp_floats(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.total_cmp(&b),
    }
}

impl PartialOrd for GoldenValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for GoldenValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for GoldenValue {}

impl From<bool> for GoldenValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

macro_rules! from_int {
    ($($ty:ty),*) => {
        $(impl From<$ty> for GoldenValue {
            fn from(value: $ty) -> Self {
                Self::Int(i64::from(value))
            }
        })*
    };
}

from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<f64> for GoldenValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for GoldenValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for GoldenValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<&String> for GoldenValue {
    fn from(value: &String) -> Self {
        Self::Str(value.clone())
    }
}

impl<T: Into<GoldenValue>> From<Vec<T>> for GoldenValue {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<GoldenValue>> From<Option<T>> for GoldenValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::None, Into::into)
    }
}

impl<K: Into<GoldenValue>, V: Into<GoldenValue>> From<BTreeMap<K, V>> for GoldenValue {
    fn from(map: BTreeMap<K, V>) -> Self {
        Self::dict(map)
    }
}

impl From<CallRecord> for GoldenValue {
    fn from(call: CallRecord) -> Self {
        Self::Call(call)
    }
}

impl From<Timestamp> for GoldenValue {
    fn from(ts: Timestamp) -> Self {
        Self::Datetime(ts)
    }
}

impl From<DateTime<Utc>> for GoldenValue {
    fn from(instant: DateTime<Utc>) -> Self {
        Self::Datetime(Timestamp::utc(instant))
    }
}

impl From<&serde_json::Value> for GoldenValue {
    fn from(value: &serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => Self::None,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Self::Str(s.clone()),
            Value::Array(items) => Self::List(items.iter().map(Self::from).collect()),
            Value::Object(map) => Self::Dict(
                map.iter()
                    .map(|(k, v)| (Self::Str(k.clone()), Self::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<serde_json::Value> for GoldenValue {
    fn from(value: serde_json::Value) -> Self {
        Self::from(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_total_equality_on_floats() {
        assert_eq!(GoldenValue::Float(f64::NAN), GoldenValue::Float(f64::NAN));
        assert_ne!(GoldenValue::Float(1.0), GoldenValue::Int(1));
    }

    #[test]
    fn test_list_and_tuple_differ() {
        assert_ne!(
            GoldenValue::from(vec![1, 2]),
            GoldenValue::tuple([1, 2])
        );
    }

    #[test]
    fn test_dict_equality_ignores_insertion_order() {
        let a = GoldenValue::dict([("x", 1), ("y", 2)]);
        let b = GoldenValue::dict([("y", 2), ("x", 1)]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_from_json() {
        let value = GoldenValue::from(json!({
            "id": "OSV-1",
            "affected": [{"versions": ["1.0", "1.1"]}],
            "withdrawn": null,
            "score": 7.5,
        }));
        let map = value.as_dict().unwrap();
        assert_eq!(map[&GoldenValue::from("id")], GoldenValue::from("OSV-1"));
        assert_eq!(map[&GoldenValue::from("withdrawn")], GoldenValue::None);
        assert_eq!(map[&GoldenValue::from("score")], GoldenValue::Float(7.5));
    }

    #[test]
    fn test_call_record_builder() {
        let call = CallRecord::new("publish.assert_called")
            .arg("topic")
            .kwarg("retry", true);
        assert_eq!(call.path, vec!["publish", "assert_called"]);
        assert_eq!(call.args, vec![GoldenValue::from("topic")]);
        assert_eq!(call.kwargs["retry"], GoldenValue::Bool(true));
        assert!(CallRecord::new("").path.is_empty());
    }

    #[test]
    fn test_identifiers() {
        for name in ["publish", "_private", "assert_called_with", "v2", "café"] {
            assert!(is_identifier(name), "{name}");
        }
        for name in ["", "retry-count", "get-item", "2fast", "a.b", "a b"] {
            assert!(!is_identifier(name), "{name}");
        }
    }

    #[test]
    fn test_unrepresentable_names_are_reported() {
        let bad_kwarg = GoldenValue::from(CallRecord::new("publish").kwarg("retry-count", 1));
        assert!(bad_kwarg.unrepresentable().unwrap().contains("retry-count"));

        let bad_path = GoldenValue::from(vec![GoldenValue::from(CallRecord::new("get-item"))]);
        assert!(bad_path.unrepresentable().unwrap().contains("get-item"));

        let nested = GoldenValue::dict([(
            "calls",
            GoldenValue::tuple([CallRecord::new("").kwarg("ok", CallRecord::new("x y"))]),
        )]);
        assert!(nested.unrepresentable().is_some());

        let fine = GoldenValue::from(CallRecord::new("publish").kwarg("retry_count", 1));
        assert_eq!(fine.unrepresentable(), None);
    }

    #[test]
    fn test_leap_second_is_folded() {
        let leap = chrono::NaiveDate::from_ymd_opt(2016, 12, 31)
            .unwrap()
            .and_hms_nano_opt(23, 59, 59, 1_500_000_000)
            .unwrap();
        let folded = Timestamp::naive(leap);
        assert!(!folded.is_leap_second());
        assert_eq!(folded.naive.second(), 59);
        assert_eq!(folded.nanosecond(), 500_000_000);
        assert_eq!(GoldenValue::from(folded).unrepresentable(), None);

        let utc = Timestamp::utc(leap.and_utc());
        assert_eq!(utc.nanosecond(), 500_000_000);

        let raw = GoldenValue::Datetime(Timestamp {
            naive: leap,
            utc: true,
        });
        assert!(raw.unrepresentable().unwrap().contains("leap-second"));
    }
}
