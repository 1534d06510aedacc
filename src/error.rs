//! Compiler diagnostics.

use std::fmt::{self, Display};
use std::io;

use crate::types::FileSpan;

/// The kind of a compiler diagnostic. The runtime kinds (`Overflow`,
/// `Underflow`, `DivByZero`, `NegativeExponent`) never appear here; they
/// exist only in the generated C, surfaced by the `raise` helper.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
  /// Bad command-line arguments.
  Usage,
  /// Missing file, module, or identifier.
  NotFound,
  /// Lexical or syntactic error, raised by the parser collaborator.
  Parse,
  /// Unification failed.
  TypeMismatch,
  /// A language feature reached a not-yet-implemented path.
  Unimplemented,
  /// Semantically ill-formed IR.
  InvalidArgument,
  /// Invariant violation.
  Internal,
}

impl ErrorKind {
  /// A string description of this error kind.
  #[must_use] pub fn to_str(self) -> &'static str {
    match self {
      ErrorKind::Usage => "usage",
      ErrorKind::NotFound => "not found",
      ErrorKind::Parse => "parse error",
      ErrorKind::TypeMismatch => "type mismatch",
      ErrorKind::Unimplemented => "unimplemented",
      ErrorKind::InvalidArgument => "invalid argument",
      ErrorKind::Internal => "internal error",
    }
  }
}

/// A compiler diagnostic: an error kind, a message, and an optional
/// location to pin it to.
#[derive(Clone, Debug)]
pub struct CompileError {
  /// The error kind.
  pub kind: ErrorKind,
  /// The source location, if the error is attached to program text.
  pub span: Option<FileSpan>,
  /// The rendered message.
  pub msg: String,
}

impl CompileError {
  /// Construct an error with a location.
  #[must_use] pub fn new(kind: ErrorKind, span: FileSpan, msg: impl Into<String>) -> Self {
    Self { kind, span: Some(span), msg: msg.into() }
  }

  /// Construct an error with no location.
  #[must_use] pub fn unlocated(kind: ErrorKind, msg: impl Into<String>) -> Self {
    Self { kind, span: None, msg: msg.into() }
  }
}

impl Display for CompileError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.span {
      Some(span) => write!(f, "{span}: {}: {}", self.kind.to_str(), self.msg),
      None => write!(f, "{}: {}", self.kind.to_str(), self.msg),
    }
  }
}

impl std::error::Error for CompileError {}

impl From<io::Error> for CompileError {
  fn from(e: io::Error) -> Self {
    Self::unlocated(ErrorKind::NotFound, e.to_string())
  }
}

/// The result type used throughout the compiler.
pub type Result<T, E = CompileError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
  use super::*;
  use crate::intern;
  use crate::types::FileSpan;

  #[test]
  fn display_is_location_prefixed() {
    let span = FileSpan::new(intern("/tmp/a.vl"), 7);
    let e = CompileError::new(ErrorKind::TypeMismatch, span, "expected u64, found string");
    assert_eq!(e.to_string(), "/tmp/a.vl:7: type mismatch: expected u64, found string");
  }
}
