//! Argument values attached to selectors.

use std::cell::Cell;
use std::collections::HashSet;
use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use tessera_types::Digest;

use crate::error::{CallError, CallResult};
use crate::id::CallId;

/// How deeply literals may nest, counting lists, objects and nested calls.
pub const MAX_NESTING_DEPTH: usize = 128;

/// A literal argument value.
///
/// Literals are either plain data or references to other calls
/// ([`Literal::Id`]). Object fields are kept in the order given; field names
/// must be unique or the value cannot be digested.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// An enum member name.
    Enum(String),
    /// A pinned content digest.
    Digest(Digest),
    /// The value produced by another call.
    Id(CallId),
    List(Vec<Literal>),
    Object(Vec<Argument>),
}

impl Literal {
    /// Returns `true` if this literal references a tainted call.
    pub fn is_tainted(&self) -> bool {
        match self {
            Self::Id(id) => id.is_tainted(),
            Self::List(values) => values.iter().any(Literal::is_tainted),
            Self::Object(fields) => fields.iter().any(|f| f.value.is_tainted()),
            _ => false,
        }
    }

    /// Canonicalize every nested call reference.
    pub(crate) fn canonical(&self) -> Self {
        match self {
            Self::Id(id) => Self::Id(id.canonical()),
            Self::List(values) => Self::List(values.iter().map(Literal::canonical).collect()),
            Self::Object(fields) => Self::Object(fields.iter().map(Argument::canonical).collect()),
            other => other.clone(),
        }
    }

    /// Returns `true` if canonicalization would change this literal.
    pub(crate) fn has_meta(&self) -> bool {
        match self {
            Self::Id(id) => id.has_meta(),
            Self::List(values) => values.iter().any(Literal::has_meta),
            Self::Object(fields) => fields.iter().any(|f| f.value.has_meta()),
            _ => false,
        }
    }

    /// Check that this literal has exactly one deterministic encoding.
    pub(crate) fn validate(&self, path: &str) -> CallResult<()> {
        self.validate_at(path, 1)
    }

    fn validate_at(&self, path: &str, depth: usize) -> CallResult<()> {
        if depth > MAX_NESTING_DEPTH {
            return Err(CallError::NestingTooDeep {
                path: path.to_string(),
                limit: MAX_NESTING_DEPTH,
            });
        }
        match self {
            Self::Float(f) if f.is_nan() => Err(CallError::NanFloat {
                path: path.to_string(),
            }),
            Self::Id(id) => id.validate_at(depth),
            Self::List(values) => {
                for (i, v) in values.iter().enumerate() {
                    v.validate_at(&format!("{path}[{i}]"), depth + 1)?;
                }
                Ok(())
            }
            Self::Object(fields) => validate_arguments(fields, path, depth + 1),
            _ => Ok(()),
        }
    }

    /// Collect nested call references in first-seen order.
    pub(crate) fn collect_ids<'a>(&'a self, out: &mut Vec<&'a CallId>) {
        match self {
            Self::Id(id) => out.push(id),
            Self::List(values) => values.iter().for_each(|v| v.collect_ids(out)),
            Self::Object(fields) => fields.iter().for_each(|f| f.value.collect_ids(out)),
            _ => {}
        }
    }
}

thread_local! {
    static DECODE_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Counts one level of literal nesting for the duration of a decode.
struct DepthGuard;

impl DepthGuard {
    fn enter() -> Option<Self> {
        DECODE_DEPTH.with(|depth| {
            let next = depth.get() + 1;
            depth.set(next);
            let guard = Self;
            (next <= MAX_NESTING_DEPTH).then_some(guard)
        })
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        DECODE_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Decoding mirror of [`Literal`]; variant order must match.
#[derive(Deserialize)]
#[serde(rename = "Literal")]
enum LiteralRepr {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Enum(String),
    Digest(Digest),
    Id(CallId),
    List(Vec<Literal>),
    Object(Vec<Argument>),
}

impl From<LiteralRepr> for Literal {
    fn from(repr: LiteralRepr) -> Self {
        match repr {
            LiteralRepr::Null => Self::Null,
            LiteralRepr::Bool(b) => Self::Bool(b),
            LiteralRepr::Int(i) => Self::Int(i),
            LiteralRepr::Float(x) => Self::Float(x),
            LiteralRepr::String(s) => Self::String(s),
            LiteralRepr::Enum(e) => Self::Enum(e),
            LiteralRepr::Digest(d) => Self::Digest(d),
            LiteralRepr::Id(id) => Self::Id(id),
            LiteralRepr::List(values) => Self::List(values),
            LiteralRepr::Object(fields) => Self::Object(fields),
        }
    }
}

impl<'de> Deserialize<'de> for Literal {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Fails past MAX_NESTING_DEPTH instead of recursing further.
        let Some(_guard) = DepthGuard::enter() else {
            return Err(D::Error::custom(format!(
                "literal nesting exceeds {MAX_NESTING_DEPTH} levels"
            )));
        };
        LiteralRepr::deserialize(deserializer).map(Literal::from)
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x:?}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Enum(e) => f.write_str(e),
            Self::Digest(d) => write!(f, "{d}"),
            Self::Id(id) => write!(f, "{{{}}}", id.path()),
            Self::List(values) => {
                f.write_str("[")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{v}")?;
                }
                f.write_str("]")
            }
            Self::Object(fields) => {
                f.write_str("{")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{field}")?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<bool> for Literal {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Literal {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for Literal {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<&str> for Literal {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Literal {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<Digest> for Literal {
    fn from(d: Digest) -> Self {
        Self::Digest(d)
    }
}

impl From<CallId> for Literal {
    fn from(id: CallId) -> Self {
        Self::Id(id)
    }
}

impl<T: Into<Literal>> From<Vec<T>> for Literal {
    fn from(values: Vec<T>) -> Self {
        Self::List(values.into_iter().map(Into::into).collect())
    }
}

/// A named argument: a selector argument or an object field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Argument {
    pub name: String,
    pub value: Literal,
}

impl Argument {
    pub fn new(name: impl Into<String>, value: impl Into<Literal>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub(crate) fn canonical(&self) -> Self {
        Self {
            name: self.name.clone(),
            value: self.value.canonical(),
        }
    }
}

impl fmt::Display for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.value)
    }
}

/// Reject duplicate names and undeterministic values in an argument list
/// whose values sit at nesting level `depth`.
pub(crate) fn validate_arguments(args: &[Argument], path: &str, depth: usize) -> CallResult<()> {
    let mut seen = HashSet::with_capacity(args.len());
    for arg in args {
        if !seen.insert(arg.name.as_str()) {
            return Err(CallError::DuplicateField {
                path: path.to_string(),
                name: arg.name.clone(),
            });
        }
        arg.value.validate_at(&format!("{path}.{}", arg.name), depth)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_scalars() {
        assert_eq!(Literal::Null.to_string(), "null");
        assert_eq!(Literal::from(true).to_string(), "true");
        assert_eq!(Literal::from(42i64).to_string(), "42");
        assert_eq!(Literal::from(1.5f64).to_string(), "1.5");
        assert_eq!(Literal::from("alpine").to_string(), "\"alpine\"");
        assert_eq!(Literal::Enum("TCP".into()).to_string(), "TCP");
    }

    #[test]
    fn display_nested() {
        let lit = Literal::Object(vec![
            Argument::new("args", vec!["ls", "-l"]),
            Argument::new("expand", false),
        ]);
        assert_eq!(lit.to_string(), "{args: [\"ls\", \"-l\"], expand: false}");
    }

    #[test]
    fn nan_is_rejected_with_path() {
        let lit = Literal::List(vec![Literal::Float(1.0), Literal::Float(f64::NAN)]);
        assert_eq!(
            lit.validate("root"),
            Err(CallError::NanFloat {
                path: "root[1]".into()
            })
        );
    }

    #[test]
    fn infinity_is_accepted() {
        assert!(Literal::Float(f64::INFINITY).validate("x").is_ok());
    }

    #[test]
    fn duplicate_object_fields_are_rejected() {
        let lit = Literal::Object(vec![Argument::new("a", 1i64), Argument::new("a", 2i64)]);
        assert_eq!(
            lit.validate("opts"),
            Err(CallError::DuplicateField {
                path: "opts".into(),
                name: "a".into()
            })
        );
    }

    #[test]
    fn nesting_limit_is_enforced() {
        let mut lit = Literal::Null;
        for _ in 1..MAX_NESTING_DEPTH {
            lit = Literal::List(vec![lit]);
        }
        assert!(lit.validate("v").is_ok());
        let lit = Literal::List(vec![lit]);
        assert!(matches!(
            lit.validate("v"),
            Err(CallError::NestingTooDeep { limit: MAX_NESTING_DEPTH, .. })
        ));
    }

    #[test]
    fn plain_data_is_never_tainted() {
        let lit = Literal::List(vec![Literal::from("a"), Literal::Int(3)]);
        assert!(!lit.is_tainted());
        assert!(!lit.has_meta());
    }
}
