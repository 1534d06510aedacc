//! The runtime-feature registry.
//!
//! The C backend does not carry a static runtime library; instead, every
//! helper the generated program needs is synthesized into the prelude of
//! the translation unit, and this registry tracks which ones were
//! demanded: includes, defines, named code fragments with dependencies,
//! the checked-arithmetic families per bit width, rotations, the
//! `tostring` family, and the global string writer.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;

use crate::error::{CompileError, ErrorKind, Result};
use crate::types::Size;

/// The checked arithmetic operations.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum CheckedOp {
  /// Checked addition.
  Add,
  /// Checked subtraction.
  Sub,
  /// Checked multiplication.
  Mul,
  /// Checked division.
  Div,
  /// Checked exponentiation.
  Exp,
}

impl CheckedOp {
  /// The suffix of the helper name for this operation.
  #[must_use] pub fn suffix(self) -> &'static str {
    match self {
      CheckedOp::Add => "add",
      CheckedOp::Sub => "sub",
      CheckedOp::Mul => "mul",
      CheckedOp::Div => "div",
      CheckedOp::Exp => "exp",
    }
  }
}

/// A named code fragment with explicit dependencies on other fragments.
#[derive(Debug)]
struct Fragment {
  name: &'static str,
  deps: Vec<&'static str>,
  code: String,
}

/// The per-compilation registry of demanded runtime features.
#[derive(Debug, Default)]
pub struct RuntimeReg {
  includes: Vec<&'static str>,
  defines: Vec<String>,
  fragments: Vec<Fragment>,
  need_bool: bool,
  need_string: bool,
  need_float: bool,
  need_double: bool,
  need_stringify: bool,
  need_raise: bool,
  signed: BTreeMap<CheckedOp, BTreeSet<u32>>,
  unsigned: BTreeMap<CheckedOp, BTreeSet<u32>>,
  rotl: BTreeSet<u32>,
  rotr: BTreeSet<u32>,
  tostring: BTreeSet<String>,
  need_string_writer: bool,
  need_array_runtime: bool,
}

/// The canonical include order of the translation unit.
const INCLUDE_ORDER: [&str; 8] = [
  "stdint.h", "inttypes.h", "stdio.h", "stdlib.h",
  "stdarg.h", "string.h", "assert.h", "float.h",
];

impl RuntimeReg {
  /// Construct an empty registry.
  #[must_use] pub fn new() -> Self { Self::default() }

  /// Request an include, unique by text.
  pub fn add_include(&mut self, name: &'static str) {
    if !self.includes.contains(&name) { self.includes.push(name) }
  }

  /// Request a `#define` line, unique by text.
  pub fn add_define(&mut self, text: impl Into<String>) {
    let text = text.into();
    if !self.defines.contains(&text) { self.defines.push(text) }
  }

  /// Register a named code fragment. Re-registration is a no-op.
  pub fn add_fragment(&mut self, name: &'static str, deps: &[&'static str], code: String) {
    if self.fragments.iter().any(|f| f.name == name) { return }
    self.fragments.push(Fragment { name, deps: deps.to_vec(), code });
  }

  /// Demand the `bool` typedef.
  pub fn demand_bool(&mut self) {
    self.need_bool = true;
    self.add_include("stdint.h");
  }

  /// Demand the `string` typedef.
  pub fn demand_string(&mut self) { self.need_string = true }

  /// Demand float formatting support.
  pub fn demand_float(&mut self) {
    self.need_float = true;
    self.need_stringify = true;
    self.add_include("float.h");
  }

  /// Demand double formatting support.
  pub fn demand_double(&mut self) {
    self.need_double = true;
    self.need_stringify = true;
    self.add_include("float.h");
  }

  /// Demand the `STRINGIFY` macro pair.
  pub fn demand_stringify(&mut self) { self.need_stringify = true }

  /// Demand `<inttypes.h>` for `PRI` macros.
  pub fn demand_inttypes(&mut self) { self.add_include("inttypes.h") }

  /// Demand a checked arithmetic helper, returning its name. Widths
  /// above 64 are rejected.
  pub fn demand_checked(&mut self, signed: bool, op: CheckedOp, width: u32) -> Result<String> {
    if Size::from_bits(width).is_none() {
      return Err(CompileError::unlocated(ErrorKind::Unimplemented,
        format!("checked arithmetic at width {width} exceeds 64 bits")))
    }
    self.need_raise = true;
    self.add_include("stdint.h");
    self.add_include("stdio.h");
    self.add_include("stdlib.h");
    let family = if signed { &mut self.signed } else { &mut self.unsigned };
    family.entry(op).or_default().insert(width);
    Ok(format!("{}{width}_{}", if signed { "i" } else { "u" }, op.suffix()))
  }

  /// Demand a rotation helper, returning its name.
  pub fn demand_rotate(&mut self, left: bool, width: u32) -> Result<String> {
    if Size::from_bits(width).is_none() {
      return Err(CompileError::unlocated(ErrorKind::Unimplemented,
        format!("rotation at width {width} exceeds 64 bits")))
    }
    self.add_include("stdint.h");
    if left { self.rotl.insert(width) } else { self.rotr.insert(width) };
    Ok(format!("u{width}_rot{}", if left { "l" } else { "r" }))
  }

  /// Demand the global string writer used by `print`/`println`.
  pub fn demand_string_writer(&mut self) {
    self.need_string_writer = true;
    self.add_include("stdio.h");
    self.add_include("stdarg.h");
    self.add_include("string.h");
  }

  /// Demand a `tostring` helper by key (`u64`, `i32`, `bool`, `string`,
  /// `f32`, `f64`), returning its name.
  pub fn demand_tostring(&mut self, key: &str) -> String {
    self.demand_string_writer();
    match key {
      "bool" => self.demand_bool(),
      "string" => self.demand_string(),
      "f32" => self.demand_float(),
      "f64" => self.demand_double(),
      _ => self.demand_inttypes(),
    }
    self.tostring.insert(key.to_owned());
    format!("tostring_{key}")
  }

  /// Demand the generic array runtime.
  pub fn demand_array_runtime(&mut self) {
    self.need_array_runtime = true;
    self.need_raise = true;
    self.add_include("stdint.h");
    self.add_include("stdlib.h");
    self.add_include("string.h");
  }

  /// Render the whole prelude in the fixed translation-unit order.
  pub fn emit_prelude(&self, out: &mut String) -> Result<()> {
    for name in INCLUDE_ORDER {
      if self.includes.contains(&name) {
        let _ = writeln!(out, "#include <{name}>");
      }
    }
    for name in &self.includes {
      if !INCLUDE_ORDER.contains(name) {
        let _ = writeln!(out, "#include <{name}>");
      }
    }
    let _ = writeln!(out);
    if self.need_bool {
      out.push_str("typedef uint8_t bool;\n#define true 1\n#define false 0\n");
    }
    if self.need_string {
      out.push_str("typedef const char *string;\n");
    }
    if self.need_float {
      out.push_str("#define FLT_SIG_DIGITS 9\n");
    }
    if self.need_double {
      out.push_str("#define DBL_SIG_DIGITS 17\n");
    }
    if self.need_stringify {
      out.push_str("#define STRINGIFY_(x) #x\n#define STRINGIFY(x) STRINGIFY_(x)\n");
    }
    for d in &self.defines {
      let _ = writeln!(out, "#define {d}");
    }
    let _ = writeln!(out);
    if self.need_raise {
      out.push_str(
        "static void raise(const char *kind) {\n\
        \x20 printf(\"%s\\n\", kind);\n\
        \x20 abort();\n\
        }\n\n");
    }
    self.emit_fragments(out)?;
    if self.need_string_writer { self.emit_string_writer(out) }
    self.emit_checked_cores(out);
    self.emit_checked_wrappers(out);
    self.emit_rotations(out);
    if self.need_array_runtime { self.emit_array_runtime(out) }
    self.emit_tostring(out);
    Ok(())
  }

  /// Emit registered fragments in topological order on their explicit
  /// dependencies, with insertion order as the tie break.
  fn emit_fragments(&self, out: &mut String) -> Result<()> {
    let mut marks: Vec<u8> = vec![0; self.fragments.len()];
    fn visit(
      reg: &RuntimeReg, i: usize, marks: &mut Vec<u8>, out: &mut String,
    ) -> Result<()> {
      match marks[i] {
        2 => return Ok(()),
        1 => return Err(CompileError::unlocated(ErrorKind::InvalidArgument,
          format!("fragment dependency cycle through {}", reg.fragments[i].name))),
        _ => {}
      }
      marks[i] = 1;
      for dep in &reg.fragments[i].deps {
        if let Some(j) = reg.fragments.iter().position(|f| f.name == *dep) {
          visit(reg, j, marks, out)?;
        }
      }
      marks[i] = 2;
      out.push_str(&reg.fragments[i].code);
      out.push('\n');
      Ok(())
    }
    for i in 0..self.fragments.len() {
      visit(self, i, &mut marks, out)?;
    }
    Ok(())
  }

  fn emit_string_writer(&self, out: &mut String) {
    out.push_str("\
#define STRING_WRITER_CAP 1024
static char sw_buf[STRING_WRITER_CAP];
static char *sw_ptr = sw_buf;
static size_t sw_space = STRING_WRITER_CAP;

static void GlobalStringWriter_reset(void) {
  sw_ptr = sw_buf;
  sw_space = STRING_WRITER_CAP;
  sw_buf[0] = '\\0';
}

static const char *GlobalStringWriter_string(void) {
  return sw_buf;
}

static void GlobalStringWriter_write(const char *fmt, ...) {
  va_list ap;
  int n;
  va_start(ap, fmt);
  n = vsnprintf(sw_ptr, sw_space, fmt, ap);
  va_end(ap);
  if (n < 0) return;
  /* Writes past the end truncate silently; the NUL stays. */
  if ((size_t)n >= sw_space) n = (int)(sw_space - 1);
  sw_ptr += n;
  sw_space -= (size_t)n;
}

");
  }

  fn emit_checked_cores(&self, out: &mut String) {
    let has = |m: &BTreeMap<CheckedOp, BTreeSet<u32>>, op| m.get(&op).is_some_and(|s| !s.is_empty());
    if has(&self.signed, CheckedOp::Add) {
      out.push_str("\
static int64_t veil_add64(int64_t a, int64_t b, int64_t max, int64_t min) {
  if (b >= 0 ? a > max - b : a < min - b) raise(b >= 0 ? \"Overflow\" : \"Underflow\");
  return a + b;
}

");
    }
    if has(&self.signed, CheckedOp::Sub) {
      out.push_str("\
static int64_t veil_sub64(int64_t a, int64_t b, int64_t max, int64_t min) {
  if (b >= 0 ? a < min + b : a > max + b) raise(b >= 0 ? \"Underflow\" : \"Overflow\");
  return a - b;
}

");
    }
    if has(&self.signed, CheckedOp::Mul) || has(&self.signed, CheckedOp::Exp) {
      out.push_str("\
static int64_t veil_mul64(int64_t a, int64_t b, int64_t max, int64_t min) {
  if (a > 0) {
    if (b > 0 && a > max / b) raise(\"Overflow\");
    if (b < 0 && b < min / a) raise(\"Underflow\");
  } else if (a < 0) {
    if (b > 0 && a < min / b) raise(\"Underflow\");
    if (b < 0 && a < max / b) raise(\"Overflow\");
  }
  return a * b;
}

");
    }
    if has(&self.signed, CheckedOp::Div) {
      out.push_str("\
static int64_t veil_div64(int64_t a, int64_t b, int64_t max, int64_t min) {
  (void)max;
  if (b == 0) raise(\"DivByZero\");
  if (a == min && b == -1) raise(\"Overflow\");
  return a / b;
}

");
    }
    if has(&self.signed, CheckedOp::Exp) {
      out.push_str("\
static int64_t veil_exp64(int64_t base, int64_t exp, int64_t max, int64_t min) {
  // println result ** accumulating by squaring
  int64_t result = 1;
  if (exp < 0) raise(\"NegativeExponent\");
  while (exp > 0) {
    if (exp & 1) result = veil_mul64(result, base, max, min);
    exp >>= 1;
    if (exp > 0) base = veil_mul64(base, base, max, min);
  }
  return result;
}

");
    }
    if has(&self.unsigned, CheckedOp::Add) {
      // TODO: the bound is (1 << (w-1)) - 1, half the true unsigned max.
      out.push_str("\
static uint64_t veil_uadd64(uint64_t a, uint64_t b, uint64_t max) {
  if (b > max || a > max - b) raise(\"Overflow\");
  return a + b;
}

");
    }
    if has(&self.unsigned, CheckedOp::Sub) {
      out.push_str("\
static uint64_t veil_usub64(uint64_t a, uint64_t b) {
  if (b > a) raise(\"Underflow\");
  return a - b;
}

");
    }
    if has(&self.unsigned, CheckedOp::Mul) || has(&self.unsigned, CheckedOp::Exp) {
      out.push_str("\
static uint64_t veil_umul64(uint64_t a, uint64_t b, uint64_t max) {
  if (b != 0 && (b > max || a > max / b)) raise(\"Overflow\");
  return a * b;
}

");
    }
    if has(&self.unsigned, CheckedOp::Div) {
      out.push_str("\
static uint64_t veil_udiv64(uint64_t a, uint64_t b) {
  if (b == 0) raise(\"DivByZero\");
  return a / b;
}

");
    }
    if has(&self.unsigned, CheckedOp::Exp) {
      out.push_str("\
static uint64_t veil_uexp64(uint64_t base, uint64_t exp, uint64_t max) {
  uint64_t result = 1;
  while (exp > 0) {
    if (exp & 1) result = veil_umul64(result, base, max);
    exp >>= 1;
    if (exp > 0) base = veil_umul64(base, base, max);
  }
  return result;
}

");
    }
  }

  fn emit_checked_wrappers(&self, out: &mut String) {
    for (&op, widths) in &self.signed {
      for &w in widths {
        let ty = c_int_type(true, w);
        let (max, min) = signed_bounds(w);
        let name = format!("i{w}_{}", op.suffix());
        let core = format!("veil_{}64", op.suffix());
        let _ = writeln!(out,
          "static inline {ty} {name}({ty} a, {ty} b) {{\n\
          \x20 return ({ty}){core}(a, b, {max}, {min});\n\
          }}\n");
      }
    }
    for (&op, widths) in &self.unsigned {
      for &w in widths {
        let ty = c_int_type(false, w);
        let max = unsigned_bound(w);
        let name = format!("u{w}_{}", op.suffix());
        let call = match op {
          CheckedOp::Sub => "veil_usub64(a, b)".to_owned(),
          CheckedOp::Div => "veil_udiv64(a, b)".to_owned(),
          CheckedOp::Add => format!("veil_uadd64(a, b, {max})"),
          CheckedOp::Mul => format!("veil_umul64(a, b, {max})"),
          CheckedOp::Exp => format!("veil_uexp64(a, b, {max})"),
        };
        let _ = writeln!(out,
          "static inline {ty} {name}({ty} a, {ty} b) {{\n\
          \x20 return ({ty}){call};\n\
          }}\n");
      }
    }
  }

  fn emit_rotations(&self, out: &mut String) {
    for (&w, left) in self.rotl.iter().map(|w| (w, true))
      .chain(self.rotr.iter().map(|w| (w, false)))
    {
      let ty = c_int_type(false, w);
      let name = format!("u{w}_rot{}", if left { "l" } else { "r" });
      let (a, b) = if left { ("<<", ">>") } else { (">>", "<<") };
      if w == 64 {
        let _ = writeln!(out,
          "static inline {ty} {name}({ty} v, uint64_t d) {{\n\
          \x20 return d ? ({ty})((v {a} d) | (v {b} (64 - d))) : v;\n\
          }}\n");
      } else {
        let mask = format!("(((uint64_t)1 << {w}) - 1)");
        let _ = writeln!(out,
          "static inline {ty} {name}({ty} v, uint64_t d) {{\n\
          \x20 return d ? ({ty})((((uint64_t)v {a} d) | ((uint64_t)v {b} ({w} - d))) & {mask}) : v;\n\
          }}\n");
      }
    }
  }

  fn emit_array_runtime(&self, out: &mut String) {
    out.push_str("\
typedef struct {
  void *data;
  uint64_t len;
  uint64_t cap;
} veil_array_t;

static void veil_array_reserve(veil_array_t *a, uint64_t want, uint64_t elem) {
  uint64_t cap;
  void *data;
  if (want <= a->cap) return;
  cap = a->cap ? a->cap : 4;
  while (cap < want) cap *= 2;
  data = realloc(a->data, cap * elem);
  if (data == NULL) raise(\"OutOfMemory\");
  a->data = data;
  a->cap = cap;
}

static void veil_array_append(veil_array_t *a, const void *v, uint64_t elem) {
  veil_array_reserve(a, a->len + 1, elem);
  memcpy((char *)a->data + a->len * elem, v, elem);
  a->len++;
}

static void veil_array_concat(veil_array_t *a, const veil_array_t *b, uint64_t elem) {
  veil_array_reserve(a, a->len + b->len, elem);
  memcpy((char *)a->data + a->len * elem, b->data, b->len * elem);
  a->len += b->len;
}

static void veil_array_reverse(veil_array_t *a, uint64_t elem) {
  char tmp[16];
  uint64_t i, j;
  if (a->len == 0 || elem > sizeof(tmp)) return;
  for (i = 0, j = a->len - 1; i < j; i++, j--) {
    memcpy(tmp, (char *)a->data + i * elem, elem);
    memcpy((char *)a->data + i * elem, (char *)a->data + j * elem, elem);
    memcpy((char *)a->data + j * elem, tmp, elem);
  }
}

");
  }

  fn emit_tostring(&self, out: &mut String) {
    for key in &self.tostring {
      match key.as_str() {
        "bool" => out.push_str("\
static void tostring_bool(bool v) {
  GlobalStringWriter_write(\"%d\", (int)v);
}

"),
        "string" => out.push_str("\
static void tostring_string(string v) {
  GlobalStringWriter_write(\"%s\", v);
}

"),
        "f32" => out.push_str("\
static void tostring_f32(float v) {
  GlobalStringWriter_write(\"%.\" STRINGIFY(FLT_SIG_DIGITS) \"g\", (double)v);
}

"),
        "f64" => out.push_str("\
static void tostring_f64(double v) {
  GlobalStringWriter_write(\"%.\" STRINGIFY(DBL_SIG_DIGITS) \"g\", v);
}

"),
        key => {
          // Integer keys: i<w> or u<w>, widened to the emission size.
          let signed = key.starts_with('i');
          let width: u32 = key[1..].parse().unwrap_or(64);
          let size = Size::from_bits(width).unwrap_or(Size::S64);
          let ty = c_int_type(signed, width);
          let pri = format!("PRI{}{}", if signed { "d" } else { "u" }, size.bits());
          let _ = writeln!(out,
            "static void tostring_{key}({ty} v) {{\n\
            \x20 GlobalStringWriter_write(\"%\" {pri}, v);\n\
            }}\n");
        }
      }
    }
  }
}

/// The C type holding `width` bits of the given signedness.
#[must_use] pub fn c_int_type(signed: bool, width: u32) -> &'static str {
  match (signed, Size::from_bits(width).unwrap_or(Size::S64)) {
    (true, Size::S8) => "int8_t",
    (true, Size::S16) => "int16_t",
    (true, Size::S32) => "int32_t",
    (true, Size::S64) => "int64_t",
    (false, Size::S8) => "uint8_t",
    (false, Size::S16) => "uint16_t",
    (false, Size::S32) => "uint32_t",
    (false, Size::S64) => "uint64_t",
  }
}

/// The max/min C expressions for a signed width.
#[must_use] pub fn signed_bounds(width: u32) -> (String, String) {
  if width == 64 {
    ("INT64_MAX".to_owned(), "INT64_MIN".to_owned())
  } else {
    (format!("((((int64_t)1) << {}) - 1)", width - 1),
     format!("(-(((int64_t)1) << {}))", width - 1))
  }
}

/// The unsigned bound expression: `(1 << (w-1)) - 1`.
#[must_use] pub fn unsigned_bound(width: u32) -> String {
  format!("((((uint64_t)1) << {}) - 1)", width - 1)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn helper_names() {
    let mut reg = RuntimeReg::new();
    assert_eq!(reg.demand_checked(true, CheckedOp::Add, 32).unwrap(), "i32_add");
    assert_eq!(reg.demand_checked(false, CheckedOp::Mul, 64).unwrap(), "u64_mul");
    assert_eq!(reg.demand_rotate(true, 64).unwrap(), "u64_rotl");
    assert!(reg.demand_checked(true, CheckedOp::Add, 65).is_err());
  }

  #[test]
  fn one_definition_per_demand() {
    let mut reg = RuntimeReg::new();
    reg.demand_checked(true, CheckedOp::Add, 16).unwrap();
    reg.demand_checked(true, CheckedOp::Add, 16).unwrap();
    reg.demand_checked(true, CheckedOp::Add, 32).unwrap();
    let mut out = String::new();
    reg.emit_prelude(&mut out).unwrap();
    assert_eq!(out.matches("int16_t i16_add(").count(), 1);
    assert_eq!(out.matches("int32_t i32_add(").count(), 1);
    assert_eq!(out.matches("veil_add64(int64_t").count(), 1);
  }

  #[test]
  fn includes_are_unique_and_ordered() {
    let mut reg = RuntimeReg::new();
    reg.demand_string_writer();
    reg.demand_checked(false, CheckedOp::Div, 64).unwrap();
    reg.add_include("stdio.h");
    let mut out = String::new();
    reg.emit_prelude(&mut out).unwrap();
    assert_eq!(out.matches("#include <stdio.h>").count(), 1);
    let stdint = out.find("#include <stdint.h>").unwrap();
    let stdio = out.find("#include <stdio.h>").unwrap();
    assert!(stdint < stdio);
  }

  #[test]
  fn defines_are_unique_by_text() {
    let mut reg = RuntimeReg::new();
    reg.add_define("BUFSZ 4096");
    reg.add_define("BUFSZ 4096");
    reg.add_define("NDEBUG");
    let mut out = String::new();
    reg.emit_prelude(&mut out).unwrap();
    assert_eq!(out.matches("#define BUFSZ 4096").count(), 1);
    assert!(out.contains("#define NDEBUG"));
  }

  #[test]
  fn fragments_emit_in_dependency_order() {
    let mut reg = RuntimeReg::new();
    reg.add_fragment("b", &["a"], "/* b */\n".into());
    reg.add_fragment("a", &[], "/* a */\n".into());
    let mut out = String::new();
    reg.emit_prelude(&mut out).unwrap();
    assert!(out.find("/* a */").unwrap() < out.find("/* b */").unwrap());
  }

  #[test]
  fn fragment_cycles_are_rejected() {
    let mut reg = RuntimeReg::new();
    reg.add_fragment("x", &["y"], String::new());
    reg.add_fragment("y", &["x"], String::new());
    let mut out = String::new();
    assert!(reg.emit_prelude(&mut out).is_err());
  }

  #[test]
  fn tostring_helpers() {
    let mut reg = RuntimeReg::new();
    assert_eq!(reg.demand_tostring("u64"), "tostring_u64");
    reg.demand_tostring("string");
    let mut out = String::new();
    reg.emit_prelude(&mut out).unwrap();
    assert!(out.contains("tostring_u64(uint64_t v)"));
    assert!(out.contains("PRIu64"));
    assert!(out.contains("tostring_string(string v)"));
    assert!(out.contains("GlobalStringWriter_reset"));
  }
}
