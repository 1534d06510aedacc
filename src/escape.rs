//! The format-string rewriter.
//!
//! Source-language format specifiers (`%i32`, `%u`, `%x`, `%f64`, ...)
//! are rewritten into C format strings. Integer specifiers widen to the
//! smallest `PRI` width in {8, 16, 32, 64} that fits the requested bit
//! width, splicing the `<inttypes.h>` macro into the literal, e.g.
//! `%i32` becomes `%" PRId32 "`.

use crate::error::{CompileError, ErrorKind, Result};
use crate::types::{FileSpan, Size};

/// The rewriter states.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum State {
  /// Copying ordinary characters.
  Copy,
  /// Just consumed `%`, reading the specifier character.
  FormatSpecifier,
  /// Reading the decimal width of an integer or float specifier.
  FormatWidth,
}

/// The integer specifier family.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum FormatChar {
  /// `%i`: signed decimal, `PRId`.
  Signed,
  /// `%u`: unsigned decimal, `PRIu`.
  Unsigned,
  /// `%x`: hexadecimal, `PRIx`.
  Hex,
  /// `%f`: floating point.
  Float,
}

impl FormatChar {
  fn pri(self) -> &'static str {
    match self {
      FormatChar::Signed => "d",
      FormatChar::Unsigned => "u",
      FormatChar::Hex => "x",
      FormatChar::Float => unreachable!("floats do not use PRI macros"),
    }
  }
}

/// The result of a rewrite, with the prelude features the output needs.
#[derive(Debug, Default)]
pub struct Escaped {
  /// The rewritten string, ready to splice between quotes in C source.
  pub text: String,
  /// Whether a `PRI` macro was spliced, demanding `<inttypes.h>`.
  pub needs_inttypes: bool,
  /// Whether a float format was spliced, demanding the `STRINGIFY`
  /// macro pair and the significant-digit defines.
  pub needs_stringify: bool,
}

/// Rewrite a format string. In printf mode, `%` starts a specifier and
/// quotes and backslashes are escaped for embedding in C source; outside
/// printf mode the string passes through with doubled percents collapsed,
/// so a second non-printf pass over printf output is the identity.
pub fn escape(span: FileSpan, s: &str, printf: bool) -> Result<Escaped> {
  let mut out = Escaped::default();
  let mut state = State::Copy;
  let mut fmt = FormatChar::Signed;
  let mut width = 0u32;
  let mut chars = s.chars().peekable();

  while let Some(c) = chars.next() {
    match state {
      State::Copy => match c {
        '%' if printf => state = State::FormatSpecifier,
        '%' if chars.peek() == Some(&'%') => {
          chars.next();
          out.text.push('%');
        }
        '"' if printf => out.text.push_str("\\\""),
        '\\' if printf => out.text.push_str("\\\\"),
        '\n' if printf => out.text.push_str("\\n"),
        '\t' if printf => out.text.push_str("\\t"),
        _ => out.text.push(c),
      },
      State::FormatSpecifier => {
        state = State::Copy;
        match c {
          '%' => out.text.push('%'),
          's' => out.text.push_str("%s"),
          'i' => { fmt = FormatChar::Signed; width = 0; state = State::FormatWidth }
          'u' => { fmt = FormatChar::Unsigned; width = 0; state = State::FormatWidth }
          'x' => { fmt = FormatChar::Hex; width = 0; state = State::FormatWidth }
          'f' => { fmt = FormatChar::Float; width = 0; state = State::FormatWidth }
          // TODO: render booleans as true/false rather than 0/1.
          'b' => out.text.push_str("%d"),
          // Unknown specifiers produce no output.
          _ => {}
        }
      }
      State::FormatWidth => {
        if let Some(d) = c.to_digit(10) {
          width = width.saturating_mul(10).saturating_add(d);
        } else {
          close_spec(span, &mut out, fmt, width)?;
          state = State::Copy;
          // The closing character belongs to the surrounding text.
          match c {
            '"' if printf => out.text.push_str("\\\""),
            '\\' if printf => out.text.push_str("\\\\"),
            '%' if printf => state = State::FormatSpecifier,
            _ => out.text.push(c),
          }
        }
      }
    }
  }
  match state {
    State::Copy => {}
    State::FormatSpecifier => {}
    State::FormatWidth => close_spec(span, &mut out, fmt, width)?,
  }
  Ok(out)
}

fn close_spec(span: FileSpan, out: &mut Escaped, fmt: FormatChar, width: u32) -> Result<()> {
  if fmt == FormatChar::Float {
    let digits = if width == 32 { "FLT_SIG_DIGITS" } else { "DBL_SIG_DIGITS" };
    out.text.push_str("%.\" STRINGIFY(");
    out.text.push_str(digits);
    out.text.push_str(") \"g");
    out.needs_stringify = true;
    return Ok(())
  }
  let size = if width == 0 {
    Size::S64
  } else {
    Size::from_bits(width).ok_or_else(|| {
      CompileError::new(ErrorKind::Unimplemented, span,
        format!("format width {width} exceeds 64 bits"))
    })?
  };
  out.text.push_str("%\" PRI");
  out.text.push_str(fmt.pri());
  out.text.push_str(&size.bits().to_string());
  out.text.push_str(" \"");
  out.needs_inttypes = true;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::intern;

  fn span() -> FileSpan { FileSpan::new(intern("/t.vl"), 1) }

  fn pf(s: &str) -> String { escape(span(), s, true).unwrap().text }

  #[test]
  fn plain_text_copies() {
    assert_eq!(pf("Hello, World!"), "Hello, World!");
  }

  #[test]
  fn integer_specifiers_widen() {
    assert_eq!(pf("This is a sum: %i32"), "This is a sum: %\" PRId32 \"");
    assert_eq!(pf("a=%u"), "a=%\" PRIu64 \"");
    assert_eq!(pf("v=%u12!"), "v=%\" PRIu16 \"!");
    assert_eq!(pf("0x%x"), "0x%\" PRIx64 \"");
  }

  #[test]
  fn percent_and_string() {
    assert_eq!(pf("100%% sure"), "100% sure");
    assert_eq!(pf("name=%s"), "name=%s");
    assert_eq!(pf("flag=%b"), "flag=%d");
  }

  #[test]
  fn quotes_escape_in_printf_mode() {
    assert_eq!(pf("say \"hi\""), "say \\\"hi\\\"");
    assert_eq!(escape(span(), "say \"hi\"", false).unwrap().text, "say \"hi\"");
  }

  #[test]
  fn floats_use_sig_digits() {
    assert_eq!(pf("x=%f32"), "x=%.\" STRINGIFY(FLT_SIG_DIGITS) \"g");
    assert_eq!(pf("x=%f64"), "x=%.\" STRINGIFY(DBL_SIG_DIGITS) \"g");
    assert!(escape(span(), "x=%f32", true).unwrap().needs_stringify);
  }

  #[test]
  fn width_over_64_is_an_error() {
    assert!(escape(span(), "%u128", true).is_err());
  }

  #[test]
  fn unknown_specifier_drops() {
    assert_eq!(pf("a%qb"), "ab");
  }

  #[test]
  fn second_nonprintf_pass_is_identity() {
    for s in ["Hello", "sum: %i32", "0x%x and %s and 100%%", "q=\"%u8\""] {
      let once = pf(s);
      let twice = escape(span(), &once, false).unwrap().text;
      assert_eq!(twice, once);
    }
  }
}
