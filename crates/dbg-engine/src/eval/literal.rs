//! Literal construction: turning a parsed expression's indexer/member text
//! into a concrete eval call for each element-type case (spec §4.4
//! "Literal construction").

use crate::engine_api::{EvalCall, TypeToken};
use crate::error::{DebuggerError, Result};

/// One constructible literal, classified the way the evaluator decides
/// which `EvalCall` variant to issue (spec §4.4).
#[derive(Debug, Clone, PartialEq)]
pub enum LiteralRequest {
    Bool(bool),
    Char(char),
    SignedInt(i64),
    UnsignedInt(u64),
    Float(f64),
    String(String),
    Null,
}

/// Parse a literal's source text into a [`LiteralRequest`] (spec §4.4:
/// `true`/`false`, a single-quoted char, a double-quoted string, `null`,
/// or a numeric literal with an optional `u`/`f` suffix).
pub fn classify_literal(text: &str) -> Result<LiteralRequest> {
    let text = text.trim();
    match text {
        "true" => return Ok(LiteralRequest::Bool(true)),
        "false" => return Ok(LiteralRequest::Bool(false)),
        "null" => return Ok(LiteralRequest::Null),
        _ => {}
    }
    if let Some(inner) = text.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')) {
        let mut chars = inner.chars();
        let c = chars
            .next()
            .ok_or_else(|| DebuggerError::ParseError("empty char literal".into()))?;
        if chars.next().is_some() {
            return Err(DebuggerError::ParseError("char literal has more than one character".into()));
        }
        return Ok(LiteralRequest::Char(c));
    }
    if let Some(inner) = text.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        return Ok(LiteralRequest::String(inner.to_string()));
    }
    if let Some(stripped) = text.strip_suffix(['u', 'U']) {
        return stripped
            .parse::<u64>()
            .map(LiteralRequest::UnsignedInt)
            .map_err(|_| DebuggerError::ParseError(format!("not an unsigned integer literal: {text}")));
    }
    if text.strip_suffix(['f', 'F']).is_some() || text.contains('.') {
        let without_suffix = text.trim_end_matches(['f', 'F']);
        return without_suffix
            .parse::<f64>()
            .map(LiteralRequest::Float)
            .map_err(|_| DebuggerError::ParseError(format!("not a floating-point literal: {text}")));
    }
    text.parse::<i64>()
        .map(LiteralRequest::SignedInt)
        .map_err(|_| DebuggerError::ParseError(format!("not a numeric literal: {text}")))
}

/// Build the eval call for constructing a literal of the evaluator's
/// resolved target type (spec §4.4): strings and nulls have dedicated
/// `EvalCall` shapes; everything else becomes a `CreateValue` carrying the
/// already-typed bit pattern, written by the evaluator once it knows the
/// target's primitive width.
pub fn construct_literal(request: &LiteralRequest, ty: TypeToken) -> Result<EvalCall> {
    match request {
        LiteralRequest::String(s) => Ok(EvalCall::NewString { contents: s.clone() }),
        LiteralRequest::Null => Err(DebuggerError::invalid_state(
            "null literal does not require a function eval",
        )),
        LiteralRequest::Bool(_)
        | LiteralRequest::Char(_)
        | LiteralRequest::SignedInt(_)
        | LiteralRequest::UnsignedInt(_)
        | LiteralRequest::Float(_) => Ok(EvalCall::CreateValue { ty }),
    }
}
