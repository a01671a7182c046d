//! A small interpreter for JSON-logic style rule conditions.
//!
//! Conditions are compiled into a closed [`Expression`] tree when the rule set is parsed and
//! evaluated against the per-rule evaluation context (a JSON object). Supported operators are
//! listed on [`Operator`].
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Number, Value};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConditionError {
    #[error("unrecognized operation {0}")]
    UnknownOperator(String),
    #[error("{operator} expects {expected} arguments, got {actual}")]
    Arity {
        operator: &'static str,
        expected: &'static str,
        actual: usize,
    },
    #[error("{operator} cannot be applied to {value}")]
    TypeMismatch {
        operator: &'static str,
        value: String,
    },
}

/// A rule condition: the JSON it was parsed from and its compiled form.
///
/// A condition that fails to compile does not fail rule set parsing. The compile error is
/// returned every time the condition is evaluated instead, so a single bad rule only affects
/// itself.
#[derive(Debug, Clone)]
pub struct Condition {
    raw: Value,
    compiled: Result<Expression, ConditionError>,
}

impl Condition {
    pub fn new(raw: Value) -> Condition {
        let compiled = Expression::compile(&raw);
        Condition { raw, compiled }
    }

    /// The condition as it appeared in the artifact.
    pub fn as_json(&self) -> &Value {
        &self.raw
    }

    /// Evaluate the condition against `data`. Any non-truthy result is `false`.
    pub fn evaluate(&self, data: &Value) -> Result<bool, ConditionError> {
        let expression = self.compiled.as_ref().map_err(Clone::clone)?;
        Ok(truthy(&expression.apply(data)?))
    }
}

impl PartialEq for Condition {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<'de> Deserialize<'de> for Condition {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Condition::new)
    }
}

impl Serialize for Condition {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.raw.serialize(serializer)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(Value),
    Array(Vec<Expression>),
    Operation(Operator, Vec<Expression>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Var,
    Missing,
    MissingSome,
    If,
    Equals,
    NotEquals,
    StrictEquals,
    StrictNotEquals,
    Not,
    DoubleNot,
    And,
    Or,
    Lt,
    Lte,
    Gt,
    Gte,
    Min,
    Max,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    In,
    Cat,
    Substr,
    Merge,
    Some,
    All,
    None,
    Map,
    Filter,
}

impl Operator {
    fn from_name(name: &str) -> Option<Operator> {
        let op = match name {
            "var" => Self::Var,
            "missing" => Self::Missing,
            "missing_some" => Self::MissingSome,
            "if" | "?:" => Self::If,
            "==" => Self::Equals,
            "!=" => Self::NotEquals,
            "===" => Self::StrictEquals,
            "!==" => Self::StrictNotEquals,
            "!" => Self::Not,
            "!!" => Self::DoubleNot,
            "and" => Self::And,
            "or" => Self::Or,
            "<" => Self::Lt,
            "<=" => Self::Lte,
            ">" => Self::Gt,
            ">=" => Self::Gte,
            "min" => Self::Min,
            "max" => Self::Max,
            "+" => Self::Add,
            "-" => Self::Sub,
            "*" => Self::Mul,
            "/" => Self::Div,
            "%" => Self::Mod,
            "in" => Self::In,
            "cat" => Self::Cat,
            "substr" => Self::Substr,
            "merge" => Self::Merge,
            "some" => Self::Some,
            "all" => Self::All,
            "none" => Self::None,
            "map" => Self::Map,
            "filter" => Self::Filter,
            _ => return None,
        };
        Some(op)
    }

    fn name(self) -> &'static str {
        match self {
            Self::Var => "var",
            Self::Missing => "missing",
            Self::MissingSome => "missing_some",
            Self::If => "if",
            Self::Equals => "==",
            Self::NotEquals => "!=",
            Self::StrictEquals => "===",
            Self::StrictNotEquals => "!==",
            Self::Not => "!",
            Self::DoubleNot => "!!",
            Self::And => "and",
            Self::Or => "or",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Min => "min",
            Self::Max => "max",
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::In => "in",
            Self::Cat => "cat",
            Self::Substr => "substr",
            Self::Merge => "merge",
            Self::Some => "some",
            Self::All => "all",
            Self::None => "none",
            Self::Map => "map",
            Self::Filter => "filter",
        }
    }

    /// Accepted argument count as `(min, max, description)`.
    fn arity(self) -> (usize, usize, &'static str) {
        match self {
            Self::Var => (0, 2, "0 to 2"),
            Self::MissingSome => (2, 2, "2"),
            Self::Equals | Self::NotEquals | Self::StrictEquals | Self::StrictNotEquals => {
                (2, 2, "2")
            }
            Self::Not | Self::DoubleNot => (1, 1, "1"),
            Self::And | Self::Or | Self::Mul => (1, usize::MAX, "at least 1"),
            Self::Lt | Self::Lte => (2, 3, "2 or 3"),
            Self::Gt | Self::Gte | Self::Div | Self::Mod | Self::In => (2, 2, "2"),
            Self::Sub => (1, 2, "1 or 2"),
            Self::Substr => (2, 3, "2 or 3"),
            Self::Some | Self::All | Self::None | Self::Map | Self::Filter => (2, 2, "2"),
            Self::Missing | Self::If | Self::Min | Self::Max | Self::Add | Self::Cat
            | Self::Merge => (0, usize::MAX, "any number of"),
        }
    }
}

impl Expression {
    pub fn compile(value: &Value) -> Result<Expression, ConditionError> {
        match value {
            Value::Array(items) => items
                .iter()
                .map(Expression::compile)
                .collect::<Result<_, _>>()
                .map(Expression::Array),
            // Objects with a single key are operations. Anything else is data.
            Value::Object(map) if map.len() == 1 => {
                let Some((name, args)) = map.iter().next() else {
                    return Ok(Expression::Literal(value.clone()));
                };
                let op = Operator::from_name(name)
                    .ok_or_else(|| ConditionError::UnknownOperator(name.clone()))?;
                let args = match args {
                    Value::Array(items) => items
                        .iter()
                        .map(Expression::compile)
                        .collect::<Result<Vec<_>, _>>()?,
                    single => vec![Expression::compile(single)?],
                };
                let (min, max, expected) = op.arity();
                if args.len() < min || args.len() > max {
                    return Err(ConditionError::Arity {
                        operator: op.name(),
                        expected,
                        actual: args.len(),
                    });
                }
                Ok(Expression::Operation(op, args))
            }
            other => Ok(Expression::Literal(other.clone())),
        }
    }

    pub fn apply(&self, data: &Value) -> Result<Value, ConditionError> {
        match self {
            Expression::Literal(value) => Ok(value.clone()),
            Expression::Array(items) => items
                .iter()
                .map(|item| item.apply(data))
                .collect::<Result<_, _>>()
                .map(Value::Array),
            Expression::Operation(op, args) => apply_operation(*op, args, data),
        }
    }
}

fn apply_operation(op: Operator, args: &[Expression], data: &Value) -> Result<Value, ConditionError> {
    // Operators that control evaluation of their own arguments.
    match op {
        Operator::If => {
            for chunk in args.chunks(2) {
                match chunk {
                    [condition, then] => {
                        if truthy(&condition.apply(data)?) {
                            return then.apply(data);
                        }
                    }
                    [otherwise] => return otherwise.apply(data),
                    _ => unreachable!("chunks(2) yields one or two elements"),
                }
            }
            return Ok(Value::Null);
        }
        Operator::And => {
            let mut last = Value::Null;
            for arg in args {
                last = arg.apply(data)?;
                if !truthy(&last) {
                    return Ok(last);
                }
            }
            return Ok(last);
        }
        Operator::Or => {
            let mut last = Value::Null;
            for arg in args {
                last = arg.apply(data)?;
                if truthy(&last) {
                    return Ok(last);
                }
            }
            return Ok(last);
        }
        Operator::Some | Operator::All | Operator::None | Operator::Map | Operator::Filter => {
            let items = match args[0].apply(data)? {
                Value::Array(items) => items,
                Value::Null => Vec::new(),
                other => {
                    return Err(ConditionError::TypeMismatch {
                        operator: op.name(),
                        value: other.to_string(),
                    })
                }
            };
            let predicate = &args[1];
            return match op {
                Operator::Map => items
                    .iter()
                    .map(|item| predicate.apply(item))
                    .collect::<Result<_, _>>()
                    .map(Value::Array),
                Operator::Filter => {
                    let mut kept = Vec::new();
                    for item in items {
                        if truthy(&predicate.apply(&item)?) {
                            kept.push(item);
                        }
                    }
                    Ok(Value::Array(kept))
                }
                _ => {
                    let mut matched = 0;
                    for item in &items {
                        if truthy(&predicate.apply(item)?) {
                            matched += 1;
                        }
                    }
                    Ok(Value::Bool(match op {
                        Operator::Some => matched > 0,
                        Operator::All => !items.is_empty() && matched == items.len(),
                        _ => matched == 0,
                    }))
                }
            };
        }
        _ => {}
    }

    let values = args
        .iter()
        .map(|arg| arg.apply(data))
        .collect::<Result<Vec<_>, _>>()?;

    let result = match op {
        Operator::Var => {
            let path = values.first().unwrap_or(&Value::Null);
            match lookup(data, path) {
                Some(found) if !found.is_null() => found.clone(),
                _ => values.get(1).cloned().unwrap_or(Value::Null),
            }
        }
        Operator::Missing => {
            let keys = match values.as_slice() {
                [Value::Array(keys)] => keys.clone(),
                _ => values,
            };
            Value::Array(missing_keys(data, &keys))
        }
        Operator::MissingSome => {
            let need = as_number(&values[0]).unwrap_or(0.0);
            let keys = match &values[1] {
                Value::Array(keys) => keys.clone(),
                other => vec![other.clone()],
            };
            let missing = missing_keys(data, &keys);
            if (keys.len() - missing.len()) as f64 >= need {
                Value::Array(Vec::new())
            } else {
                Value::Array(missing)
            }
        }
        Operator::Equals => Value::Bool(loose_equals(&values[0], &values[1])),
        Operator::NotEquals => Value::Bool(!loose_equals(&values[0], &values[1])),
        Operator::StrictEquals => Value::Bool(strict_equals(&values[0], &values[1])),
        Operator::StrictNotEquals => Value::Bool(!strict_equals(&values[0], &values[1])),
        Operator::Not => Value::Bool(!truthy(&values[0])),
        Operator::DoubleNot => Value::Bool(truthy(&values[0])),
        Operator::Lt | Operator::Lte => {
            let cmp = |a: &Value, b: &Value| {
                if op == Operator::Lt {
                    less_than(a, b)
                } else {
                    less_than(a, b) || loose_equals_numeric(a, b)
                }
            };
            match values.as_slice() {
                [a, b] => Value::Bool(cmp(a, b)),
                [a, b, c] => Value::Bool(cmp(a, b) && cmp(b, c)),
                _ => unreachable!("arity is checked at compile time"),
            }
        }
        Operator::Gt => Value::Bool(less_than(&values[1], &values[0])),
        Operator::Gte => Value::Bool(
            less_than(&values[1], &values[0]) || loose_equals_numeric(&values[0], &values[1]),
        ),
        Operator::Min | Operator::Max => {
            let numbers = numbers(op, &values)?;
            let folded = numbers.into_iter().reduce(|a, b| {
                if op == Operator::Min {
                    a.min(b)
                } else {
                    a.max(b)
                }
            });
            folded.map_or(Value::Null, number)
        }
        Operator::Add => number(numbers(op, &values)?.into_iter().sum()),
        Operator::Mul => number(numbers(op, &values)?.into_iter().product()),
        Operator::Sub => match numbers(op, &values)?.as_slice() {
            [a] => number(-a),
            [a, b] => number(a - b),
            _ => unreachable!("arity is checked at compile time"),
        },
        Operator::Div | Operator::Mod => {
            let numbers = numbers(op, &values)?;
            let (a, b) = (numbers[0], numbers[1]);
            if op == Operator::Div {
                number(a / b)
            } else {
                number(a % b)
            }
        }
        Operator::In => Value::Bool(match &values[1] {
            Value::String(haystack) => haystack.contains(&to_js_string(&values[0])),
            Value::Array(items) => items.iter().any(|item| strict_equals(item, &values[0])),
            _ => false,
        }),
        Operator::Cat => Value::String(values.iter().map(to_js_string).collect()),
        Operator::Substr => {
            let source: Vec<char> = to_js_string(&values[0]).chars().collect();
            let len = source.len() as i64;
            // Float to int casts saturate, so only the additions need guarding.
            let start = as_number(&values[1]).unwrap_or(0.0) as i64;
            let start = if start < 0 {
                len.saturating_add(start).max(0)
            } else {
                start.min(len)
            };
            let end = match values.get(2).and_then(as_number) {
                Some(count) if count < 0.0 => len.saturating_add(count as i64).max(start),
                Some(count) => start.saturating_add(count as i64).min(len),
                Option::None => len,
            };
            Value::String(source[start as usize..end as usize].iter().collect())
        }
        Operator::Merge => Value::Array(
            values
                .into_iter()
                .flat_map(|value| match value {
                    Value::Array(items) => items,
                    other => vec![other],
                })
                .collect(),
        ),
        Operator::If
        | Operator::And
        | Operator::Or
        | Operator::Some
        | Operator::All
        | Operator::None
        | Operator::Map
        | Operator::Filter => unreachable!("handled above"),
    };

    Ok(result)
}

/// JavaScript truthiness, as used by JSON-logic.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(_) => true,
    }
}

/// Resolve a dotted `path` in `data`. An empty path or `null` selects `data` itself.
fn lookup<'a>(data: &'a Value, path: &Value) -> Option<&'a Value> {
    let path = match path {
        Value::Null => return Some(data),
        Value::String(s) if s.is_empty() => return Some(data),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    path.split('.').try_fold(data, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn missing_keys(data: &Value, keys: &[Value]) -> Vec<Value> {
    keys.iter()
        .filter(|key| match lookup(data, key) {
            Option::None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.is_empty(),
            Some(_) => false,
        })
        .cloned()
        .collect()
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) if s.trim().is_empty() => Some(0.0),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Null => Some(0.0),
        Value::Array(_) | Value::Object(_) => Option::None,
    }
}

fn numbers(op: Operator, values: &[Value]) -> Result<Vec<f64>, ConditionError> {
    values
        .iter()
        .map(|value| {
            as_number(value).ok_or_else(|| ConditionError::TypeMismatch {
                operator: op.name(),
                value: value.to_string(),
            })
        })
        .collect()
}

fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        Value::Number(Number::from(n as i64))
    } else {
        Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}

fn loose_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Array(_) | Value::Object(_), Value::Array(_) | Value::Object(_)) => a == b,
        (Value::Array(_) | Value::Object(_), _) | (_, Value::Array(_) | Value::Object(_)) => {
            to_js_string(a) == to_js_string(b)
        }
        _ => loose_equals_numeric(a, b),
    }
}

fn loose_equals_numeric(a: &Value, b: &Value) -> bool {
    if let (Value::String(a), Value::String(b)) = (a, b) {
        return a == b;
    }
    match (as_number(a), as_number(b)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

fn strict_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => a == b,
    }
}

fn less_than(a: &Value, b: &Value) -> bool {
    if let (Value::String(a), Value::String(b)) = (a, b) {
        return a < b;
    }
    match (as_number(a), as_number(b)) {
        (Some(a), Some(b)) => a < b,
        _ => false,
    }
}

fn to_js_string(value: &Value) -> String {
    match value {
        Value::Null => "null".to_owned(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 1e21 => format!("{}", f as i64),
            Some(f) => f.to_string(),
            Option::None => n.to_string(),
        },
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(to_js_string)
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => "[object Object]".to_owned(),
    }
}

/// Build an evaluation context object from key/value pairs. Test helper shared with other
/// modules.
#[cfg(test)]
pub(crate) fn context(pairs: impl IntoIterator<Item = (&'static str, Value)>) -> Value {
    Value::Object(
        pairs
            .into_iter()
            .map(|(k, v)| (k.to_owned(), v))
            .collect::<serde_json::Map<String, Value>>(),
    )
}
