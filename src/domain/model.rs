use crate::domain::time::TimeQuantity;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Value of a component attribute, either set explicitly on an instance,
/// produced by a formula, or taken from the schema default.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    Time(TimeQuantity),
}

impl AttrValue {
    /// Booleans become `1`/`0` and time quantities become picoseconds.
    pub fn normalized(&self) -> AttrValue {
        match self {
            AttrValue::Bool(b) => AttrValue::Int(i64::from(*b)),
            AttrValue::Time(t) => AttrValue::Int(t.as_picos()),
            other => other.clone(),
        }
    }

    /// Integer view; text is accepted in decimal or `0x` hexadecimal.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttrValue::Int(v) => Some(*v),
            AttrValue::Bool(b) => Some(i64::from(*b)),
            AttrValue::Time(t) => Some(t.as_picos()),
            AttrValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            AttrValue::Float(_) => None,
            AttrValue::Text(s) => parse_int(s),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(b) => Some(*b),
            AttrValue::Text(s) => match s.trim() {
                "true" | "True" => Some(true),
                "false" | "False" => Some(false),
                other => parse_int(other).map(|v| v != 0),
            },
            other => other.as_i64().map(|v| v != 0),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

pub(crate) fn parse_int(text: &str) -> Option<i64> {
    let t = text.trim();
    let (negative, digits) = match t.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, t),
    };
    let magnitude = match digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        Some(hex) => i64::from_str_radix(hex, 16).ok()?,
        None => digits.parse::<i64>().ok()?,
    };
    Some(if negative { -magnitude } else { magnitude })
}

/// Renders the normalized form, which is what ends up in documents.
impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Int(v) => write!(f, "{}", v),
            AttrValue::Float(v) => write!(f, "{}", v),
            AttrValue::Bool(b) => write!(f, "{}", i64::from(*b)),
            AttrValue::Text(s) => write!(f, "{}", s),
            AttrValue::Time(t) => write!(f, "{}", t.as_picos()),
        }
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Int(v)
    }
}

impl From<i32> for AttrValue {
    fn from(v: i32) -> Self {
        AttrValue::Int(i64::from(v))
    }
}

impl From<u32> for AttrValue {
    fn from(v: u32) -> Self {
        AttrValue::Int(i64::from(v))
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        AttrValue::Float(v)
    }
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        AttrValue::Bool(v)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        AttrValue::Text(v.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        AttrValue::Text(v)
    }
}

impl From<TimeQuantity> for AttrValue {
    fn from(v: TimeQuantity) -> Self {
        AttrValue::Time(v)
    }
}

/// Node of the simulation-wide settings tree attached to a platform.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub attrs: BTreeMap<String, String>,
    pub children: Vec<ParamChild>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParamChild {
    Value(AttrValue),
    Node(Param),
}

impl Param {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attrs: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }

    pub fn with_value(mut self, value: impl Into<AttrValue>) -> Self {
        self.children.push(ParamChild::Value(value.into()));
        self
    }

    pub fn with_child(mut self, child: Param) -> Self {
        self.children.push(ParamChild::Node(child));
        self
    }

    pub fn first_value(&self) -> Option<&AttrValue> {
        self.children.iter().find_map(|c| match c {
            ParamChild::Value(v) => Some(v),
            ParamChild::Node(_) => None,
        })
    }
}

/// One metric as reported by the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatValue {
    pub value: f64,
    pub unit: String,
}

/// Statistics of one run, keyed by component then metric.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Stats {
    components: BTreeMap<String, BTreeMap<String, StatValue>>,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last write wins for a repeated (component, metric) pair.
    pub fn insert(&mut self, component: &str, metric: &str, value: f64, unit: &str) {
        self.components
            .entry(component.to_string())
            .or_default()
            .insert(
                metric.to_string(),
                StatValue {
                    value,
                    unit: unit.to_string(),
                },
            );
    }

    pub fn get(&self, component: &str, metric: &str) -> Option<&StatValue> {
        self.components.get(component)?.get(metric)
    }

    pub fn component(&self, component: &str) -> Option<&BTreeMap<String, StatValue>> {
        self.components.get(component)
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.components.keys().map(String::as_str)
    }

    /// Flat `(component, metric, value)` rows in sorted order.
    pub fn rows(&self) -> impl Iterator<Item = (&str, &str, &StatValue)> {
        self.components.iter().flat_map(|(component, metrics)| {
            metrics
                .iter()
                .map(move |(metric, value)| (component.as_str(), metric.as_str(), value))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn metric_count(&self) -> usize {
        self.components.values().map(BTreeMap::len).sum()
    }
}

/// Directed binding between an output port and an input port, resolved to
/// instance and port names. Derived from the topology on demand.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Link {
    pub src_instance: String,
    pub src_port: String,
    pub dst_instance: String,
    pub dst_port: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunId(pub u64);

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run-{}", self.0)
    }
}

/// Result of one finished run. `stats` is `None` when the engine produced
/// no statistics line at all, including when it could not be started.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub id: RunId,
    pub topology: String,
    pub stats: Option<Stats>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization() {
        assert_eq!(AttrValue::Bool(true).normalized(), AttrValue::Int(1));
        assert_eq!(AttrValue::Bool(false).normalized(), AttrValue::Int(0));
        assert_eq!(
            AttrValue::Time(TimeQuantity::ns(3)).normalized(),
            AttrValue::Int(3_000)
        );
        assert_eq!(AttrValue::from("x").normalized(), AttrValue::from("x"));
    }

    #[test]
    fn test_display_is_normalized() {
        assert_eq!(AttrValue::Bool(true).to_string(), "1");
        assert_eq!(AttrValue::Time(TimeQuantity::us(1)).to_string(), "1000000");
        assert_eq!(AttrValue::Int(-4).to_string(), "-4");
    }

    #[test]
    fn test_integer_views() {
        assert_eq!(AttrValue::from("0x10").as_i64(), Some(16));
        assert_eq!(AttrValue::from(" 42 ").as_i64(), Some(42));
        assert_eq!(AttrValue::from("-0x2").as_i64(), Some(-2));
        assert_eq!(AttrValue::from("abc").as_i64(), None);
        assert_eq!(AttrValue::Float(2.5).as_i64(), None);
        assert_eq!(AttrValue::from("False").as_bool(), Some(false));
        assert_eq!(AttrValue::from("1").as_bool(), Some(true));
    }

    #[test]
    fn test_stats_last_write_wins() {
        let mut stats = Stats::new();
        stats.insert("cpu0", "cycles", 10.0, "");
        stats.insert("cpu0", "cycles", 20.0, "cyc");
        stats.insert("l2", "misses", 3.0, "");

        assert_eq!(stats.metric_count(), 2);
        let cycles = stats.get("cpu0", "cycles").unwrap();
        assert_eq!(cycles.value, 20.0);
        assert_eq!(cycles.unit, "cyc");
        assert_eq!(stats.components().collect::<Vec<_>>(), vec!["cpu0", "l2"]);
    }

    #[test]
    fn test_param_builder() {
        let p = Param::new("quantum")
            .with_attr("scope", "global")
            .with_value(TimeQuantity::ns(10))
            .with_child(Param::new("nested"));
        assert_eq!(p.first_value(), Some(&AttrValue::Time(TimeQuantity::ns(10))));
        assert_eq!(p.children.len(), 2);
    }
}
