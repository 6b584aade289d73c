use std::{borrow::Cow, fmt};

use crate::srcinfo::SrcInfo;

/// A surface-syntax violation. Carries the offending span and a one-line
/// reason. Never retried; propagated to the caller.
#[derive(Debug, Clone)]
pub enum ParseError {
    /// The source is not a well-formed procedure, config, or fragment.
    Syntax { msg: Cow<'static, str>, span: SrcInfo },
    /// A host-language construct the surface language deliberately rejects.
    Unsupported { msg: Cow<'static, str>, span: SrcInfo },
    /// Failure inside the unquote protocol: an unresolvable name, a host
    /// value of the wrong kind, or host code outside the evaluable subset.
    Unquote { msg: Cow<'static, str>, span: SrcInfo },
}

impl ParseError {
    pub(crate) fn syntax(msg: impl Into<Cow<'static, str>>, span: SrcInfo) -> Self {
        Self::Syntax { msg: msg.into(), span }
    }

    pub(crate) fn unsupported(msg: impl Into<Cow<'static, str>>, span: SrcInfo) -> Self {
        Self::Unsupported { msg: msg.into(), span }
    }

    pub(crate) fn unquote(msg: impl Into<Cow<'static, str>>, span: SrcInfo) -> Self {
        Self::Unquote { msg: msg.into(), span }
    }

    pub fn span(&self) -> &SrcInfo {
        match self {
            Self::Syntax { span, .. } | Self::Unsupported { span, .. } | Self::Unquote { span, .. } => span,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Syntax { msg, .. } | Self::Unsupported { msg, .. } | Self::Unquote { msg, .. } => msg,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.span(), self.message())
    }
}

impl std::error::Error for ParseError {}

/// A scheduling directive could not be applied: the target was not found,
/// a structural precondition failed, or the rewrite would break
/// well-formedness. Always recoverable by the caller.
#[derive(Debug, Clone)]
pub struct SchedulingError {
    msg: String,
    span: Option<SrcInfo>,
}

impl SchedulingError {
    pub(crate) fn new(msg: impl Into<String>) -> Self {
        Self {
            msg: msg.into(),
            span: None,
        }
    }

    pub(crate) fn at(msg: impl Into<String>, span: SrcInfo) -> Self {
        Self {
            msg: msg.into(),
            span: Some(span),
        }
    }

    pub fn message(&self) -> &str {
        &self.msg
    }

    pub fn span(&self) -> Option<&SrcInfo> {
        self.span.as_ref()
    }
}

impl fmt::Display for SchedulingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.span {
            Some(span) => write!(f, "{span}: {}", self.msg),
            None => f.write_str(&self.msg),
        }
    }
}

impl std::error::Error for SchedulingError {}

/// An IR node was constructed with arguments violating its variant's
/// invariants. Indicates a compiler bug rather than a user mistake.
#[derive(Debug, Clone)]
pub struct ValidationError {
    msg: String,
}

impl ValidationError {
    pub(crate) fn new(msg: impl Into<String>) -> Self {
        Self { msg: msg.into() }
    }

    pub fn message(&self) -> &str {
        &self.msg
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid IR: {}", self.msg)
    }
}

impl std::error::Error for ValidationError {}
