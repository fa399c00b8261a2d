//! Declarative authorization policies and their evaluator.
//!
//! A policy is `login` plus an ordered list of [`Rule`]s, all ANDed. The
//! evaluator is a pure function of policy and session; the order of rules only
//! decides which failure is reported.
//!
//! Two notions of "empty" are kept apart:
//!
//! - **falsy**: absent, `null`, `false`, `0`, `""`, `[]`, `{}`
//! - **nullish**: absent or `null` only
//!
//! A present `0` is falsy but not nullish.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::session::Session;

/// JSON value categories a [`Rule::TypeIs`] can require.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    /// JSON string.
    String,
    /// JSON number.
    Number,
    /// JSON boolean.
    Boolean,
    /// JSON object.
    Object,
    /// JSON array.
    Array,
}

impl ValueKind {
    /// Category of a value; `None` for `null`.
    #[must_use]
    pub fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(_) => Some(Self::Boolean),
            Value::Number(_) => Some(Self::Number),
            Value::String(_) => Some(Self::String),
            Value::Array(_) => Some(Self::Array),
            Value::Object(_) => Some(Self::Object),
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
        };
        f.write_str(name)
    }
}

/// One session field check.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "camelCase")]
pub enum Rule {
    /// Field must be truthy.
    Truthy {
        /// Session field.
        key: String,
    },
    /// Field must be falsy (absent counts).
    Falsy {
        /// Session field.
        key: String,
    },
    /// Field must equal a literal. Numbers compare by value.
    Equals {
        /// Session field.
        key: String,
        /// Expected literal.
        value: Value,
    },
    /// Field must be of a JSON kind. Nullish fields pass.
    TypeIs {
        /// Session field.
        key: String,
        /// Expected kind.
        #[serde(rename = "type")]
        kind: ValueKind,
    },
    /// Field must be absent or `null`.
    Nullish {
        /// Session field.
        key: String,
    },
    /// Field must be present and not `null`.
    NotNullish {
        /// Session field.
        key: String,
    },
}

impl Rule {
    /// Shorthand for [`Rule::Truthy`].
    pub fn truthy(key: impl Into<String>) -> Self {
        Self::Truthy { key: key.into() }
    }

    /// Shorthand for [`Rule::Falsy`].
    pub fn falsy(key: impl Into<String>) -> Self {
        Self::Falsy { key: key.into() }
    }

    /// Shorthand for [`Rule::Equals`].
    pub fn equals(key: impl Into<String>, value: Value) -> Self {
        Self::Equals {
            key: key.into(),
            value,
        }
    }

    /// Shorthand for [`Rule::TypeIs`].
    pub fn type_is(key: impl Into<String>, kind: ValueKind) -> Self {
        Self::TypeIs {
            key: key.into(),
            kind,
        }
    }

    /// Shorthand for [`Rule::Nullish`].
    pub fn nullish(key: impl Into<String>) -> Self {
        Self::Nullish { key: key.into() }
    }

    /// Shorthand for [`Rule::NotNullish`].
    pub fn not_nullish(key: impl Into<String>) -> Self {
        Self::NotNullish { key: key.into() }
    }

    /// Session field this rule inspects.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Truthy { key }
            | Self::Falsy { key }
            | Self::Equals { key, .. }
            | Self::TypeIs { key, .. }
            | Self::Nullish { key }
            | Self::NotNullish { key } => key,
        }
    }

    /// Check against a session; `Err` carries a human-readable failure.
    pub fn check(&self, session: &Session) -> Result<(), String> {
        let field = session.get(self.key());
        let key = self.key();
        let passed = match self {
            Self::Truthy { .. } => is_truthy(field),
            Self::Falsy { .. } => !is_truthy(field),
            Self::Equals { value, .. } => field.is_some_and(|actual| loosely_equal(actual, value)),
            Self::TypeIs { kind, .. } => field.and_then(ValueKind::of).is_none_or(|k| k == *kind),
            Self::Nullish { .. } => is_nullish(field),
            Self::NotNullish { .. } => !is_nullish(field),
        };
        if passed {
            return Ok(());
        }
        Err(match self {
            Self::Truthy { .. } => format!("`{key}` must be truthy"),
            Self::Falsy { .. } => format!("`{key}` must be falsy"),
            Self::Equals { value, .. } => format!("`{key}` must equal {value}"),
            Self::TypeIs { kind, .. } => format!("`{key}` must be of type {kind}"),
            Self::Nullish { .. } => format!("`{key}` must be unset"),
            Self::NotNullish { .. } => format!("`{key}` must be set"),
        })
    }
}

/// Absent, `null`, `false`, `0`, `""`, `[]` and `{}` are falsy.
#[must_use]
pub fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(map)) => !map.is_empty(),
    }
}

/// Only absent and `null` are nullish.
#[must_use]
pub fn is_nullish(value: Option<&Value>) -> bool {
    matches!(value, None | Some(Value::Null))
}

/// Structural equality, except that numbers compare by value (`1 == 1.0`).
fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => x.as_f64() == y.as_f64(),
        },
        _ => a == b,
    }
}

/// Per-route authorization requirements.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthPolicy {
    /// Require a valid identity token.
    pub login: bool,
    /// Additional rules, all of which must pass.
    pub additional: Vec<Rule>,
}

impl AuthPolicy {
    /// No requirements at all.
    #[must_use]
    pub fn open() -> Self {
        Self::default()
    }

    /// Require login and nothing else.
    #[must_use]
    pub fn login_required() -> Self {
        Self {
            login: true,
            additional: Vec::new(),
        }
    }

    /// Append a rule.
    #[must_use]
    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.additional.push(rule);
        self
    }
}

/// Why a policy denied a session.
#[derive(Clone, Debug, PartialEq)]
pub enum Denial {
    /// `login` was required and the session has no identity.
    Unauthenticated,
    /// The rule at `index` failed.
    Rule {
        /// Position in `additional`.
        index: usize,
        /// Failure description.
        message: String,
    },
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unauthenticated => f.write_str("login required"),
            Self::Rule { index, message } => write!(f, "rule {index}: {message}"),
        }
    }
}

/// Outcome of [`evaluate`].
#[derive(Clone, Debug, PartialEq)]
pub struct AuthVerdict {
    /// Whether the session satisfies the policy.
    pub allowed: bool,
    /// The first failure, when denied.
    pub reason: Option<Denial>,
}

impl AuthVerdict {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn deny(reason: Denial) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
        }
    }
}

/// Evaluate `policy` against `session`.
#[must_use]
pub fn evaluate(policy: &AuthPolicy, session: &Session) -> AuthVerdict {
    if policy.login && !session.is_authenticated() {
        return AuthVerdict::deny(Denial::Unauthenticated);
    }
    for (index, rule) in policy.additional.iter().enumerate() {
        if let Err(message) = rule.check(session) {
            return AuthVerdict::deny(Denial::Rule { index, message });
        }
    }
    AuthVerdict::allow()
}
