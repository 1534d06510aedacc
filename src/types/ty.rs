//! The type algebra: first-order types with type variables, width
//! families, aggregates, and polymorphic schemes.

use std::cell::RefCell;
use std::fmt::{self, Display};
use std::rc::Rc;

use crate::Symbol;
use crate::types::{FloatSize, IntTy};

/// A type, stored behind an [`Rc`] so that substitution entries and
/// instantiation records can share structure freely.
pub type Ty = Rc<TyKind>;

/// A type variable. Positive ids come from user source occurrences;
/// negative ids are allocated by scheme openings.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TyVar(pub i32);

impl TyVar {
  /// Whether this variable came from user source rather than a scheme
  /// opening.
  #[must_use] pub fn is_user(self) -> bool { self.0 > 0 }
}

impl Display for TyVar {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "${}", self.0)
  }
}

/// A bound variable of a polymorphic scheme, with an optional constraint
/// that opened instances inherit.
#[derive(Clone, Debug)]
pub struct Bound {
  /// The bound variable.
  pub var: TyVar,
  /// The constraint, usually a [`TyKind::Choice`] of admissible types.
  pub constraint: Option<Ty>,
}

/// One opening of a polymorphic scheme: the ground types substituted for
/// the bound variables, and the resolved scope type.
#[derive(Clone, Debug)]
pub struct Instantiation {
  /// The types bound to the scheme variables, in bound order.
  pub bindings: Box<[Ty]>,
  /// The scope type after substitution.
  pub ty: Ty,
}

/// A polymorphic scheme. The instantiation list grows as the scheme is
/// opened at call sites; it never shrinks, and records are kept in
/// creation order.
#[derive(Clone, Debug)]
pub struct Scheme {
  /// The generalized variables.
  pub bounds: Box<[Bound]>,
  /// The type being generalized over.
  pub scope: Ty,
  /// The instantiations recorded so far.
  pub insts: Rc<RefCell<Vec<Instantiation>>>,
}

impl Scheme {
  /// Construct a scheme with an empty instantiation list.
  #[must_use] pub fn new(bounds: Box<[Bound]>, scope: Ty) -> Self {
    Self { bounds, scope, insts: Rc::default() }
  }
}

/// The closed set of type formers.
#[derive(Clone, Debug)]
pub enum TyKind {
  /// A type variable, possibly constrained.
  Var(TyVar, Option<Ty>),
  /// A fixed-width integer type.
  Int(IntTy),
  /// The top of the integer width lattice: an integer of the given
  /// signedness whose width is not yet pinned.
  AnyInt(bool),
  /// A floating point type.
  Float(FloatSize),
  /// A named type, possibly applied to parameters. The builtin `bool` and
  /// `string` types are named types with no parameters.
  Name(Symbol, Box<[Ty]>),
  /// An array with the given element type.
  Array(Ty),
  /// A union of types acting as a constraint set during unification.
  Choice(Box<[Ty]>),
  /// A tuple; element order is significant.
  Tuple(Box<[Ty]>),
  /// A struct; field order is significant.
  Struct(Box<[(Symbol, Ty)]>),
  /// A function from parameter types to a result type.
  Fn(Box<[Ty]>, Ty),
  /// A polymorphic scheme.
  Poly(Scheme),
}

impl TyKind {
  /// The builtin `bool` type.
  #[must_use] pub fn bool() -> Ty { Rc::new(TyKind::Name(crate::intern("bool"), Box::new([]))) }

  /// The builtin `string` type.
  #[must_use] pub fn string() -> Ty { Rc::new(TyKind::Name(crate::intern("string"), Box::new([]))) }

  /// A fixed-width signed integer type.
  #[must_use] pub fn int(width: u32) -> Ty { Rc::new(TyKind::Int(IntTy::Int(width))) }

  /// A fixed-width unsigned integer type.
  #[must_use] pub fn uint(width: u32) -> Ty { Rc::new(TyKind::Int(IntTy::UInt(width))) }

  /// An unconstrained fresh variable wrapper.
  #[must_use] pub fn var(v: TyVar) -> Ty { Rc::new(TyKind::Var(v, None)) }

  /// Construct a choice type, folding the singleton case.
  #[must_use] pub fn choice(mut tys: Vec<Ty>) -> Ty {
    if tys.len() == 1 { tys.pop().expect("nonempty") } else { Rc::new(TyKind::Choice(tys.into())) }
  }

  /// Whether this is the named type `name`, with no parameters.
  #[must_use] pub fn is_named(&self, name: &str) -> bool {
    matches!(self, TyKind::Name(s, args) if args.is_empty() && s.as_str() == name)
  }

  /// Collect the free variables of the type into `vars`, in first
  /// occurrence order. Scheme bodies are skipped: their variables are
  /// bound.
  pub fn free_vars(&self, vars: &mut Vec<TyVar>) {
    match self {
      &TyKind::Var(v, ref c) => {
        if !vars.contains(&v) { vars.push(v) }
        if let Some(c) = c { c.free_vars(vars) }
      }
      TyKind::Int(_) | TyKind::AnyInt(_) | TyKind::Float(_) => {}
      TyKind::Name(_, args) | TyKind::Choice(args) | TyKind::Tuple(args) =>
        for t in &**args { t.free_vars(vars) },
      TyKind::Array(t) => t.free_vars(vars),
      TyKind::Struct(fields) => for (_, t) in &**fields { t.free_vars(vars) },
      TyKind::Fn(params, ret) => {
        for t in &**params { t.free_vars(vars) }
        ret.free_vars(vars)
      }
      TyKind::Poly(_) => {}
    }
  }

  /// Whether the type mentions any type variable.
  #[must_use] pub fn has_vars(&self) -> bool {
    let mut vars = vec![];
    self.free_vars(&mut vars);
    !vars.is_empty()
  }
}

impl Display for TyKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      TyKind::Var(v, None) => v.fmt(f),
      TyKind::Var(v, Some(c)) => write!(f, "{v}:{c}"),
      TyKind::Int(ity) => ity.fmt(f),
      TyKind::AnyInt(true) => write!(f, "int"),
      TyKind::AnyInt(false) => write!(f, "uint"),
      TyKind::Float(sz) => sz.fmt(f),
      TyKind::Name(s, args) => {
        s.fmt(f)?;
        if !args.is_empty() {
          write!(f, "<")?;
          for (i, t) in args.iter().enumerate() {
            if i != 0 { write!(f, ", ")? }
            t.fmt(f)?
          }
          write!(f, ">")?
        }
        Ok(())
      }
      TyKind::Array(t) => write!(f, "[{t}]"),
      TyKind::Choice(tys) => {
        for (i, t) in tys.iter().enumerate() {
          if i != 0 { write!(f, " | ")? }
          t.fmt(f)?
        }
        Ok(())
      }
      TyKind::Tuple(tys) => {
        write!(f, "(")?;
        for (i, t) in tys.iter().enumerate() {
          if i != 0 { write!(f, ", ")? }
          t.fmt(f)?
        }
        write!(f, ")")
      }
      TyKind::Struct(fields) => {
        write!(f, "{{")?;
        for (i, (name, t)) in fields.iter().enumerate() {
          if i != 0 { write!(f, ", ")? }
          write!(f, "{name}: {t}")?
        }
        write!(f, "}}")
      }
      TyKind::Fn(params, ret) => {
        write!(f, "fn(")?;
        for (i, t) in params.iter().enumerate() {
          if i != 0 { write!(f, ", ")? }
          t.fmt(f)?
        }
        write!(f, ") -> {ret}")
      }
      TyKind::Poly(scheme) => {
        write!(f, "poly[")?;
        for (i, b) in scheme.bounds.iter().enumerate() {
          if i != 0 { write!(f, ", ")? }
          b.var.fmt(f)?;
          if let Some(c) = &b.constraint { write!(f, ": {c}")? }
        }
        write!(f, "] {}", scheme.scope)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn singleton_choice_folds() {
    let t = TyKind::choice(vec![TyKind::uint(64)]);
    assert!(matches!(*t, TyKind::Int(_)));
    let t = TyKind::choice(vec![TyKind::uint(64), TyKind::int(64)]);
    assert!(matches!(*t, TyKind::Choice(_)));
  }

  #[test]
  fn display() {
    let t = TyKind::Fn(Box::new([TyKind::uint(64), TyKind::bool()]), TyKind::string());
    assert_eq!(t.to_string(), "fn(u64, bool) -> string");
    assert_eq!(TyKind::Array(TyKind::int(32)).to_string(), "[i32]");
  }

  #[test]
  fn free_vars_in_order() {
    let a = TyVar(1);
    let b = TyVar(-2);
    let t = TyKind::Tuple(Box::new([TyKind::var(b), TyKind::var(a), TyKind::var(b)]));
    let mut vars = vec![];
    t.free_vars(&mut vars);
    assert_eq!(vars, [b, a]);
  }
}
