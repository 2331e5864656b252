//! SQL-like subset filters for file-backed layers.
//!
//! The text is parsed with `sqlparser` and compiled into a small predicate
//! tree covering what catalogs actually use: comparisons, `LIKE`, `IN`,
//! `BETWEEN`, `IS NULL`, and boolean combinations. Field names may be bare
//! or double-quoted and are matched case-insensitively. `LIKE` is
//! case-insensitive, as in OGR SQL.
//!
//! Evaluation uses SQL three-valued logic: a comparison with a null is
//! unknown, `NOT unknown` is still unknown, and only a predicate that is
//! definitely true selects the feature.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use regex::Regex;
use sqlparser::ast::{self, BinaryOperator, UnaryOperator, Value};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::{Parser, ParserError};
use sqlparser::tokenizer::Token;
use thiserror::Error;

use crate::layer::{AttributeValue, Feature, Layer};

/// Errors raised while parsing or binding a filter expression.
#[derive(Debug, Error)]
pub enum FilterError {
    /// The expression text is not valid SQL.
    #[error("Invalid filter: {0}")]
    Parse(#[from] ParserError),

    /// The expression is valid SQL but uses a construct filters do not
    /// support (functions, subqueries, arithmetic, ...).
    #[error("Unsupported filter expression: {expr}")]
    Unsupported {
        /// The offending sub-expression, as SQL.
        expr: String,
    },

    /// The expression references a field the layer does not have.
    #[error("Filter references unknown field: {name}")]
    UnknownField {
        /// The field name as written in the expression.
        name: String,
    },

    /// A `LIKE` pattern could not be compiled.
    #[error("Invalid LIKE pattern: {0}")]
    Pattern(#[from] regex::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone)]
enum Operand {
    Field(String),
    Literal(AttributeValue),
}

#[derive(Debug, Clone)]
enum Predicate {
    And(Box<Self>, Box<Self>),
    Or(Box<Self>, Box<Self>),
    Not(Box<Self>),
    Compare(Operand, CompareOp, Operand),
    Like {
        operand: Operand,
        pattern: Regex,
        negated: bool,
    },
    In {
        operand: Operand,
        values: Vec<Operand>,
        negated: bool,
    },
    IsNull {
        operand: Operand,
        negated: bool,
    },
    Value(Operand),
}

/// A parsed subset filter.
#[derive(Debug, Clone)]
pub struct FilterExpression {
    source: String,
    root: Predicate,
}

impl FilterExpression {
    /// Parses a filter. Blank text means "no filter" and yields `None`.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::Parse`] if the text is not a valid SQL
    /// expression, or [`FilterError::Unsupported`] if it uses constructs
    /// beyond plain predicates.
    pub fn parse(text: &str) -> Result<Option<Self>, FilterError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }

        let dialect = GenericDialect {};
        let mut parser = Parser::new(&dialect).try_with_sql(trimmed)?;
        let expr = parser.parse_expr()?;

        let trailing = parser.peek_token();
        if trailing.token != Token::EOF {
            return Err(FilterError::Parse(ParserError::ParserError(format!(
                "unexpected {} after expression",
                trailing.token
            ))));
        }

        Ok(Some(Self {
            source: trimmed.to_string(),
            root: compile_predicate(&expr)?,
        }))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Every field name the expression reads.
    #[must_use]
    pub fn referenced_fields(&self) -> BTreeSet<String> {
        let mut fields = BTreeSet::new();
        collect_fields(&self.root, &mut fields);
        fields
    }

    /// Checks that every referenced field exists on `layer`.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::UnknownField`] for the first missing field.
    pub fn validate_for(&self, layer: &Layer) -> Result<(), FilterError> {
        for name in self.referenced_fields() {
            if !layer.has_field(&name) {
                return Err(FilterError::UnknownField { name });
            }
        }
        Ok(())
    }

    /// Whether the predicate is true for `feature`. Unknown (null-driven)
    /// results do not match.
    #[must_use]
    pub fn matches(&self, feature: &Feature) -> bool {
        eval(&self.root, feature) == Some(true)
    }
}

fn unsupported(expr: &ast::Expr) -> FilterError {
    FilterError::Unsupported {
        expr: expr.to_string(),
    }
}

fn compile_predicate(expr: &ast::Expr) -> Result<Predicate, FilterError> {
    let predicate = match expr {
        ast::Expr::Nested(inner) => compile_predicate(inner)?,
        ast::Expr::UnaryOp {
            op: UnaryOperator::Not,
            expr: inner,
        } => Predicate::Not(Box::new(compile_predicate(inner)?)),
        ast::Expr::BinaryOp { left, op, right } => match op {
            BinaryOperator::And => Predicate::And(
                Box::new(compile_predicate(left)?),
                Box::new(compile_predicate(right)?),
            ),
            BinaryOperator::Or => Predicate::Or(
                Box::new(compile_predicate(left)?),
                Box::new(compile_predicate(right)?),
            ),
            BinaryOperator::Eq => compare(left, CompareOp::Eq, right)?,
            BinaryOperator::NotEq => compare(left, CompareOp::Ne, right)?,
            BinaryOperator::Lt => compare(left, CompareOp::Lt, right)?,
            BinaryOperator::LtEq => compare(left, CompareOp::Le, right)?,
            BinaryOperator::Gt => compare(left, CompareOp::Gt, right)?,
            BinaryOperator::GtEq => compare(left, CompareOp::Ge, right)?,
            _ => return Err(unsupported(expr)),
        },
        ast::Expr::IsNull(inner) => Predicate::IsNull {
            operand: compile_operand(inner)?,
            negated: false,
        },
        ast::Expr::IsNotNull(inner) => Predicate::IsNull {
            operand: compile_operand(inner)?,
            negated: true,
        },
        ast::Expr::Like {
            negated,
            expr: inner,
            pattern,
            ..
        }
        | ast::Expr::ILike {
            negated,
            expr: inner,
            pattern,
            ..
        } => {
            let ast::Expr::Value(Value::SingleQuotedString(text)) = pattern.as_ref() else {
                return Err(unsupported(pattern));
            };
            Predicate::Like {
                operand: compile_operand(inner)?,
                pattern: like_to_regex(text)?,
                negated: *negated,
            }
        }
        ast::Expr::InList {
            expr: inner,
            list,
            negated,
        } => Predicate::In {
            operand: compile_operand(inner)?,
            values: list
                .iter()
                .map(|item| match compile_operand(item)? {
                    literal @ Operand::Literal(_) => Ok(literal),
                    Operand::Field(_) => Err(unsupported(item)),
                })
                .collect::<Result<_, _>>()?,
            negated: *negated,
        },
        ast::Expr::Between {
            expr: inner,
            negated,
            low,
            high,
        } => {
            let range = Predicate::And(
                Box::new(compare(inner, CompareOp::Ge, low)?),
                Box::new(compare(inner, CompareOp::Le, high)?),
            );
            if *negated {
                Predicate::Not(Box::new(range))
            } else {
                range
            }
        }
        other => Predicate::Value(compile_operand(other)?),
    };

    Ok(predicate)
}

fn compare(left: &ast::Expr, op: CompareOp, right: &ast::Expr) -> Result<Predicate, FilterError> {
    Ok(Predicate::Compare(
        compile_operand(left)?,
        op,
        compile_operand(right)?,
    ))
}

fn compile_operand(expr: &ast::Expr) -> Result<Operand, FilterError> {
    let operand = match expr {
        ast::Expr::Nested(inner) => compile_operand(inner)?,
        ast::Expr::Identifier(ident) => Operand::Field(ident.value.clone()),
        ast::Expr::CompoundIdentifier(parts) => match parts.last() {
            Some(ident) => Operand::Field(ident.value.clone()),
            None => return Err(unsupported(expr)),
        },
        ast::Expr::Value(value) => Operand::Literal(literal(value).ok_or_else(|| unsupported(expr))?),
        ast::Expr::UnaryOp {
            op: UnaryOperator::Minus,
            expr: inner,
        } => match compile_operand(inner)? {
            Operand::Literal(AttributeValue::Real(n)) => Operand::Literal(AttributeValue::Real(-n)),
            _ => return Err(unsupported(expr)),
        },
        _ => return Err(unsupported(expr)),
    };

    Ok(operand)
}

fn literal(value: &Value) -> Option<AttributeValue> {
    match value {
        Value::Number(text, _) => text.parse().ok().map(AttributeValue::Real),
        Value::SingleQuotedString(text) => Some(AttributeValue::Text(text.clone())),
        Value::Boolean(b) => Some(AttributeValue::Boolean(*b)),
        Value::Null => Some(AttributeValue::Null),
        _ => None,
    }
}

fn collect_fields(predicate: &Predicate, fields: &mut BTreeSet<String>) {
    match predicate {
        Predicate::And(a, b) | Predicate::Or(a, b) => {
            collect_fields(a, fields);
            collect_fields(b, fields);
        }
        Predicate::Not(inner) => collect_fields(inner, fields),
        Predicate::Compare(left, _, right) => {
            add_field(left, fields);
            add_field(right, fields);
        }
        Predicate::Like { operand, .. }
        | Predicate::In { operand, .. }
        | Predicate::IsNull { operand, .. }
        | Predicate::Value(operand) => add_field(operand, fields),
    }
}

fn add_field(operand: &Operand, fields: &mut BTreeSet<String>) {
    if let Operand::Field(name) = operand {
        fields.insert(name.clone());
    }
}

fn resolve(operand: &Operand, feature: &Feature) -> AttributeValue {
    match operand {
        Operand::Field(name) => feature
            .attribute(name)
            .cloned()
            .unwrap_or(AttributeValue::Null),
        Operand::Literal(value) => value.clone(),
    }
}

/// Three-valued evaluation; `None` is SQL's unknown.
fn eval(predicate: &Predicate, feature: &Feature) -> Option<bool> {
    match predicate {
        Predicate::And(a, b) => match (eval(a, feature), eval(b, feature)) {
            (Some(false), _) | (_, Some(false)) => Some(false),
            (Some(true), Some(true)) => Some(true),
            _ => None,
        },
        Predicate::Or(a, b) => match (eval(a, feature), eval(b, feature)) {
            (Some(true), _) | (_, Some(true)) => Some(true),
            (Some(false), Some(false)) => Some(false),
            _ => None,
        },
        Predicate::Not(inner) => eval(inner, feature).map(|value| !value),
        Predicate::Compare(left, op, right) => {
            let ordering = compare_values(&resolve(left, feature), &resolve(right, feature))?;
            Some(match op {
                CompareOp::Eq => ordering == Ordering::Equal,
                CompareOp::Ne => ordering != Ordering::Equal,
                CompareOp::Lt => ordering == Ordering::Less,
                CompareOp::Le => ordering != Ordering::Greater,
                CompareOp::Gt => ordering == Ordering::Greater,
                CompareOp::Ge => ordering != Ordering::Less,
            })
        }
        Predicate::Like {
            operand,
            pattern,
            negated,
        } => {
            let value = resolve(operand, feature);
            if value.is_null() {
                return None;
            }
            Some(pattern.is_match(&value.to_string()) != *negated)
        }
        Predicate::In {
            operand,
            values,
            negated,
        } => {
            let value = resolve(operand, feature);
            if value.is_null() {
                return None;
            }
            let mut saw_null = false;
            for candidate in values {
                match compare_values(&value, &resolve(candidate, feature)) {
                    Some(Ordering::Equal) => return Some(!*negated),
                    None => saw_null = true,
                    Some(_) => {}
                }
            }
            if saw_null { None } else { Some(*negated) }
        }
        Predicate::IsNull { operand, negated } => {
            Some(resolve(operand, feature).is_null() != *negated)
        }
        Predicate::Value(operand) => match resolve(operand, feature) {
            AttributeValue::Boolean(b) => Some(b),
            AttributeValue::Null => None,
            other => Some(other.as_f64().is_some_and(|n| n != 0.0)),
        },
    }
}

/// Compares two values, numerically when both sides have a numeric view
/// and textually otherwise. Nulls never compare.
fn compare_values(left: &AttributeValue, right: &AttributeValue) -> Option<Ordering> {
    if left.is_null() || right.is_null() {
        return None;
    }

    if let (AttributeValue::Boolean(a), AttributeValue::Boolean(b)) = (left, right) {
        return Some(a.cmp(b));
    }

    let numeric_side = matches!(left, AttributeValue::Integer(_) | AttributeValue::Real(_))
        || matches!(right, AttributeValue::Integer(_) | AttributeValue::Real(_));

    if numeric_side {
        if let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) {
            return a.partial_cmp(&b);
        }
    }

    Some(left.to_string().cmp(&right.to_string()))
}

fn like_to_regex(pattern: &str) -> Result<Regex, FilterError> {
    let mut out = String::from("(?is)^");
    for c in pattern.chars() {
        match c {
            '%' => out.push_str(".*"),
            '_' => out.push('.'),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    Ok(Regex::new(&out)?)
}
