//! Transformer-time evaluation.
//!
//! Transformers are compile-time macros that append or prepend generated
//! statements to target blocks. The core exposes three pieces to the
//! expander: a small interpreter over [`Value`]s for transformer-time
//! computation, `$name` expansion against the transformer's argument
//! bindings, and a restartable generator over the relation statements of
//! a function tree.

use hashbrown::HashMap;
use num::{BigInt, Zero};

use crate::Symbol;
use crate::error::{CompileError, ErrorKind, Result};
use crate::types::entity::{ExprOp, StmtKind};
use crate::types::hir::{BlockId, ExprId, FuncId, Hir, StmtId};
use crate::types::value::Value;

/// The argument bindings of one transformer invocation.
pub type Bindings = HashMap<Symbol, Value>;

/// Evaluate an expression tree at transformer time. Supports integer,
/// float, bool, string and identifier leaves and a limited set of unary
/// and binary operations; anything else is an `InvalidArgument` error.
pub fn eval(hir: &Hir, e: ExprId, env: &Bindings) -> Result<Value> {
  let span = hir.exprs[e].span;
  let args = &hir.exprs[e].args;
  match hir.exprs[e].op {
    ExprOp::Const => hir.exprs[e].val.clone().ok_or_else(|| {
      CompileError::new(ErrorKind::Internal, span, "constant without a value")
    }),
    ExprOp::Ident => {
      let sym = hir.ident_sym(e).ok_or_else(|| {
        CompileError::new(ErrorKind::Internal, span, "identifier without a symbol")
      })?;
      env.get(&sym).cloned().ok_or_else(|| {
        CompileError::new(ErrorKind::NotFound, span,
          format!("transformer argument {sym} is not bound"))
      })
    }
    ExprOp::Negate => match eval(hir, args[0], env)? {
      Value::Int(n, w) => Ok(Value::Int(-n, w)),
      Value::Float(x, sz) => Ok(Value::Float(-x, sz)),
      v => Err(bad_operand(span, "-", &v)),
    },
    ExprOp::Not => match eval(hir, args[0], env)? {
      Value::Bool(b) => Ok(Value::Bool(!b)),
      v => Err(bad_operand(span, "!", &v)),
    },
    op @ (ExprOp::Add | ExprOp::Sub | ExprOp::Mul | ExprOp::Div | ExprOp::Mod) => {
      let a = eval(hir, args[0], env)?;
      let b = eval(hir, args[1], env)?;
      eval_arith(span, op, &a, &b)
    }
    op @ (ExprOp::Eq | ExprOp::Ne | ExprOp::Lt | ExprOp::Le | ExprOp::Gt | ExprOp::Ge) => {
      let a = eval(hir, args[0], env)?;
      let b = eval(hir, args[1], env)?;
      eval_compare(span, op, &a, &b)
    }
    op @ (ExprOp::And | ExprOp::Or | ExprOp::Xor) => {
      let (Value::Bool(a), Value::Bool(b)) =
        (eval(hir, args[0], env)?, eval(hir, args[1], env)?) else {
          return Err(CompileError::new(ErrorKind::InvalidArgument, span,
            format!("operator {op} needs boolean operands at transformer time")))
        };
      Ok(Value::Bool(match op {
        ExprOp::And => a && b,
        ExprOp::Or => a || b,
        _ => a != b,
      }))
    }
    ExprOp::Select => {
      match eval(hir, args[0], env)? {
        Value::Bool(true) => eval(hir, args[1], env),
        Value::Bool(false) => eval(hir, args[2], env),
        v => Err(bad_operand(span, "?:", &v)),
      }
    }
    op => Err(CompileError::new(ErrorKind::InvalidArgument, span,
      format!("operator {op} cannot run at transformer time"))),
  }
}

fn bad_operand(span: crate::types::FileSpan, op: &str, v: &Value) -> CompileError {
  CompileError::new(ErrorKind::InvalidArgument, span,
    format!("operator {op} cannot take {v} at transformer time"))
}

fn eval_arith(
  span: crate::types::FileSpan, op: ExprOp, a: &Value, b: &Value,
) -> Result<Value> {
  fn int_op(op: ExprOp, a: &BigInt, b: &BigInt) -> Option<BigInt> {
    Some(match op {
      ExprOp::Add => a + b,
      ExprOp::Sub => a - b,
      ExprOp::Mul => a * b,
      ExprOp::Div => if b.is_zero() { return None } else { a / b },
      ExprOp::Mod => if b.is_zero() { return None } else { a % b },
      _ => unreachable!("arith op"),
    })
  }
  match (a, b) {
    (Value::Int(x, w), Value::Int(y, _)) =>
      int_op(op, x, y).map(|n| Value::Int(n, *w)).ok_or_else(|| {
        CompileError::new(ErrorKind::InvalidArgument, span, "division by zero")
      }),
    (Value::Uint(x, w), Value::Uint(y, _)) => {
      let (x, y) = (BigInt::from(x.clone()), BigInt::from(y.clone()));
      let n = int_op(op, &x, &y).ok_or_else(|| {
        CompileError::new(ErrorKind::InvalidArgument, span, "division by zero")
      })?;
      let n = n.try_into().map_err(|_| {
        CompileError::new(ErrorKind::InvalidArgument, span,
          "unsigned transformer arithmetic went negative")
      })?;
      Ok(Value::Uint(n, *w))
    }
    (Value::Float(x, sz), Value::Float(y, _)) => Ok(Value::Float(match op {
      ExprOp::Add => x + y,
      ExprOp::Sub => x - y,
      ExprOp::Mul => x * y,
      ExprOp::Div => x / y,
      ExprOp::Mod => x % y,
      _ => unreachable!("arith op"),
    }, *sz)),
    _ => Err(CompileError::new(ErrorKind::InvalidArgument, span,
      format!("operator {op} cannot combine {a} and {b}"))),
  }
}

fn eval_compare(
  span: crate::types::FileSpan, op: ExprOp, a: &Value, b: &Value,
) -> Result<Value> {
  use std::cmp::Ordering;
  let ord = match (a, b) {
    (Value::Int(x, _), Value::Int(y, _)) => x.cmp(y),
    (Value::Uint(x, _), Value::Uint(y, _)) => x.cmp(y),
    (Value::Str(x), Value::Str(y)) => x.cmp(y),
    (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
    (Value::Float(x, _), Value::Float(y, _)) =>
      x.partial_cmp(y).unwrap_or(Ordering::Equal),
    _ => return match op {
      ExprOp::Eq => Ok(Value::Bool(false)),
      ExprOp::Ne => Ok(Value::Bool(true)),
      _ => Err(CompileError::new(ErrorKind::InvalidArgument, span,
        format!("operator {op} cannot compare {a} and {b}"))),
    },
  };
  Ok(Value::Bool(match op {
    ExprOp::Eq => ord == Ordering::Equal,
    ExprOp::Ne => ord != Ordering::Equal,
    ExprOp::Lt => ord == Ordering::Less,
    ExprOp::Le => ord != Ordering::Greater,
    ExprOp::Gt => ord == Ordering::Greater,
    ExprOp::Ge => ord != Ordering::Less,
    _ => unreachable!("comparison"),
  }))
}

/// Expand `$name` references in a string against the transformer's
/// argument bindings. `$$` produces a literal `$`; unknown names are an
/// error.
pub fn expand_dollar(
  span: crate::types::FileSpan, s: &str, env: &Bindings,
) -> Result<String> {
  let mut out = String::with_capacity(s.len());
  let mut chars = s.chars().peekable();
  while let Some(c) = chars.next() {
    if c != '$' {
      out.push(c);
      continue
    }
    if chars.peek() == Some(&'$') {
      chars.next();
      out.push('$');
      continue
    }
    let mut name = String::new();
    while let Some(&c) = chars.peek() {
      if c.is_alphanumeric() || c == '_' {
        name.push(c);
        chars.next();
      } else {
        break
      }
    }
    if name.is_empty() {
      out.push('$');
      continue
    }
    match env.get(&crate::intern(&name)) {
      Some(Value::Str(v)) => out.push_str(v),
      Some(Value::Sym(v)) => out.push_str(v.as_str()),
      Some(v) => out.push_str(&v.to_string()),
      None => return Err(CompileError::new(ErrorKind::NotFound, span,
        format!("transformer argument ${name} is not bound"))),
    }
  }
  Ok(out)
}

/// Rewrite the identifiers of a transformer-generated block: every
/// identifier bound in `renames` is replaced in place. Only owned
/// substructure is visited.
pub fn expand_idents(hir: &mut Hir, block: BlockId, renames: &HashMap<Symbol, Symbol>) {
  for s in hir.stmt_ids(block) {
    if let Some(e) = hir.stmts[s].expr { expand_expr(hir, e, renames) }
    if let Some(b) = hir.stmts[s].body { expand_idents(hir, b, renames) }
  }
}

fn expand_expr(hir: &mut Hir, e: ExprId, renames: &HashMap<Symbol, Symbol>) {
  if let Some(sym) = hir.ident_sym(e) {
    if let Some(&new) = renames.get(&sym) {
      hir.exprs[e].val = Some(Value::Sym(new));
    }
  }
  for a in hir.exprs[e].args.clone() {
    expand_expr(hir, a, renames);
  }
}

/// The callable and argument list of a `relation` statement.
#[must_use] pub fn relation_parts(hir: &Hir, s: StmtId) -> Option<(Symbol, Vec<ExprId>)> {
  if hir.stmts[s].kind != StmtKind::Relation { return None }
  let call = hir.stmts[s].expr?;
  if hir.exprs[call].op != ExprOp::Call { return None }
  let callee = *hir.exprs[call].args.first()?;
  let sym = hir.ident_sym(callee)?;
  Some((sym, hir.exprs[call].args[1..].to_vec()))
}

/// A restartable, lazy walk over the relation statements of a function
/// tree, in declaration order.
pub struct Relations<'a> {
  hir: &'a Hir,
  blocks: Vec<(BlockId, usize)>,
  funcs: Vec<FuncId>,
}

/// Walk the relation statements declared under `f`, including its child
/// functions. Call again for a fresh walk.
#[must_use] pub fn relations(hir: &Hir, f: FuncId) -> Relations<'_> {
  Relations { hir, blocks: vec![], funcs: vec![f] }
}

impl Iterator for Relations<'_> {
  type Item = StmtId;

  fn next(&mut self) -> Option<StmtId> {
    loop {
      if let Some((b, i)) = self.blocks.last_mut() {
        if let Some(&s) = self.hir.blocks[*b].stmts.get(*i) {
          *i += 1;
          if let Some(sub) = self.hir.stmts[s].body {
            self.blocks.push((sub, 0));
          }
          if self.hir.stmts[s].kind == StmtKind::Relation {
            return Some(s)
          }
          continue
        }
        self.blocks.pop();
        continue
      }
      // The block stack is dry; descend into the next function.
      let f = self.funcs.pop()?;
      self.funcs.extend(self.hir.funcs[f].subfuncs.iter().rev().copied());
      self.blocks.push((self.hir.funcs[f].body, 0));
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::intern;
  use crate::types::FileSpan;

  fn span() -> FileSpan { FileSpan::new(intern("/t.vl"), 1) }

  #[test]
  fn arithmetic_and_selection() {
    let mut hir = Hir::new();
    let a = hir.new_const(span(), Value::Uint(6u32.into(), 64));
    let b = hir.new_const(span(), Value::Uint(7u32.into(), 64));
    let mul = hir.new_binary(ExprOp::Mul, span(), a, b);
    let env = Bindings::new();
    assert_eq!(eval(&hir, mul, &env).unwrap(), Value::Uint(42u32.into(), 64));

    let t = hir.new_const(span(), Value::Bool(true));
    let x = hir.new_const(span(), Value::Str("yes".into()));
    let y = hir.new_const(span(), Value::Str("no".into()));
    let sel = hir.new_expr(ExprOp::Select, span());
    hir.add_child(sel, t);
    hir.add_child(sel, x);
    hir.add_child(sel, y);
    assert_eq!(eval(&hir, sel, &env).unwrap(), Value::Str("yes".into()));
  }

  #[test]
  fn identifiers_resolve_through_bindings() {
    let mut hir = Hir::new();
    let x = hir.new_ident(span(), intern("x"));
    let mut env = Bindings::new();
    assert!(eval(&hir, x, &env).is_err());
    env.insert(intern("x"), Value::Uint(3u32.into(), 64));
    assert_eq!(eval(&hir, x, &env).unwrap(), Value::Uint(3u32.into(), 64));
  }

  #[test]
  fn dollar_expansion() {
    let mut env = Bindings::new();
    env.insert(intern("A"), Value::Sym(intern("Node")));
    env.insert(intern("count"), Value::Uint(2u32.into(), 64));
    let out = expand_dollar(span(), "insert$A_entry$count $$x", &env).unwrap();
    assert_eq!(out, "insertNode_entry2 $x");
    assert!(expand_dollar(span(), "$missing", &env).is_err());
  }

  #[test]
  fn relation_walk_is_restartable() {
    use crate::types::entity::{FuncKind, Linkage};
    let mut hir = Hir::new();
    let f = hir.new_function(intern("m"), FuncKind::Module, Linkage::Module, span(), None);
    let body = hir.funcs[f].body;
    let call = {
      let callee = hir.new_ident(span(), intern("OneToOne"));
      hir.new_unary(ExprOp::Call, span(), callee)
    };
    let rel = hir.new_stmt(StmtKind::Relation, span(), Some(call), None);
    hir.append_stmt(body, rel);
    let other = hir.new_stmt(StmtKind::Return, span(), None, None);
    hir.append_stmt(body, other);

    let first: Vec<_> = relations(&hir, f).collect();
    let second: Vec<_> = relations(&hir, f).collect();
    assert_eq!(first, vec![rel]);
    assert_eq!(first, second);
    let (sym, args) = relation_parts(&hir, rel).unwrap();
    assert_eq!(sym, intern("OneToOne"));
    assert!(args.is_empty());
  }
}
