use std::sync::Arc;

use crate::error::Result;
use crate::pattern::Glob;
use crate::sourcepref::SourcePref;
use crate::value::Value;

/// How a filter compares the values it inspects against its operand.
pub(crate) enum FilterOp {
    Equal(Value),
    Smaller(Value),
    Greater(Value),
    Match(Glob),
    Token(String),
    Custom(Arc<dyn Fn(&Value) -> bool + Send + Sync>),
}

pub(crate) struct Filter {
    pub key: String,
    pub op: FilterOp,
    pub pref: Option<SourcePref>,
    pub caseless: bool,
    /// Evaluate against the anchor entry itself instead of its attributes.
    pub parent: bool,
}

pub(crate) enum Node {
    Filter(Filter),
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
}

/// A tree of filters combined with AND/OR/NOT, selecting the entries a
/// query returns rows for.
///
/// Filters are built through [`FilterBuilder`]:
///
/// ```ignore
/// let cond = Condition::equal("entry", "a").parent().caseless().build()?;
/// ```
pub struct Condition {
    pub(crate) node: Node,
}

impl Condition {
    pub fn equal(key: &str, operand: impl Into<Value>) -> FilterBuilder {
        FilterBuilder::new(key, BuilderKind::Equal(operand.into()))
    }

    /// Matches when a value sorts strictly below the operand.
    pub fn smaller(key: &str, operand: impl Into<Value>) -> FilterBuilder {
        FilterBuilder::new(key, BuilderKind::Smaller(operand.into()))
    }

    /// Matches when a value sorts strictly above the operand.
    pub fn greater(key: &str, operand: impl Into<Value>) -> FilterBuilder {
        FilterBuilder::new(key, BuilderKind::Greater(operand.into()))
    }

    /// Matches string values against a glob pattern (`*`, `?`).
    pub fn matches(key: &str, pattern: &str) -> FilterBuilder {
        FilterBuilder::new(key, BuilderKind::Match(pattern.to_owned()))
    }

    /// Matches string values containing `token` as a whitespace-separated
    /// word.
    pub fn has_token(key: &str, token: &str) -> FilterBuilder {
        FilterBuilder::new(key, BuilderKind::Token(token.to_owned()))
    }

    /// Matches values the supplied predicate accepts.
    pub fn custom(
        key: &str,
        predicate: impl Fn(&Value) -> bool + Send + Sync + 'static,
    ) -> FilterBuilder {
        FilterBuilder::new(key, BuilderKind::Custom(Arc::new(predicate)))
    }

    /// Matches entries every subcondition matches. `and(vec![])` matches
    /// everything.
    pub fn and(conditions: Vec<Condition>) -> Condition {
        Condition {
            node: Node::And(conditions),
        }
    }

    /// Matches entries any subcondition matches. `or(vec![])` matches
    /// nothing.
    pub fn or(conditions: Vec<Condition>) -> Condition {
        Condition {
            node: Node::Or(conditions),
        }
    }

    pub fn not(condition: Condition) -> Condition {
        Condition {
            node: Node::Not(Box::new(condition)),
        }
    }
}

impl std::fmt::Debug for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.node {
            Node::Filter(filter) => f
                .debug_struct("Filter")
                .field("key", &filter.key)
                .field("parent", &filter.parent)
                .finish_non_exhaustive(),
            Node::And(children) => f.debug_tuple("And").field(&children.len()).finish(),
            Node::Or(children) => f.debug_tuple("Or").field(&children.len()).finish(),
            Node::Not(_) => f.debug_tuple("Not").finish(),
        }
    }
}

enum BuilderKind {
    Equal(Value),
    Smaller(Value),
    Greater(Value),
    Match(String),
    Token(String),
    Custom(Arc<dyn Fn(&Value) -> bool + Send + Sync>),
}

/// Pending filter; `build` produces the final [`Condition`] (compiling the
/// glob for match filters, which is the one step that can fail).
pub struct FilterBuilder {
    key: String,
    kind: BuilderKind,
    pref: Option<SourcePref>,
    caseless: bool,
    parent: bool,
}

impl FilterBuilder {
    fn new(key: &str, kind: BuilderKind) -> Self {
        Self {
            key: key.to_owned(),
            kind,
            pref: None,
            caseless: false,
            parent: false,
        }
    }

    /// Compare strings case-insensitively.
    pub fn caseless(mut self) -> Self {
        self.caseless = true;
        self
    }

    /// Evaluate against the anchor entry rather than its attributes.
    pub fn parent(mut self) -> Self {
        self.parent = true;
        self
    }

    /// Only test values asserted by the best-ranked source under this
    /// preference.
    pub fn source_pref(mut self, pref: &SourcePref) -> Self {
        self.pref = Some(pref.clone());
        self
    }

    pub fn build(self) -> Result<Condition> {
        let op = match self.kind {
            BuilderKind::Equal(v) => FilterOp::Equal(v),
            BuilderKind::Smaller(v) => FilterOp::Smaller(v),
            BuilderKind::Greater(v) => FilterOp::Greater(v),
            BuilderKind::Match(pattern) => FilterOp::Match(Glob::new(&pattern, self.caseless)?),
            BuilderKind::Token(token) => FilterOp::Token(token),
            BuilderKind::Custom(f) => FilterOp::Custom(f),
        };
        Ok(Condition {
            node: Node::Filter(Filter {
                key: self.key,
                op,
                pref: self.pref,
                caseless: self.caseless,
                parent: self.parent,
            }),
        })
    }
}
