//! The type inference engine.
//!
//! A single [`InferCtx`] per compilation holds the substitution from
//! type-variable ids to representative types. Unification is structural,
//! with choice types acting as constraint sets that shrink by
//! intersection, and `AnyInt` acting as the top of the integer width
//! lattice. Let-bindings and function boundaries generalize leftover free
//! variables into polymorphic schemes; every call of a polymorphic value
//! opens the scheme with fresh negative-id variables and records an
//! instantiation on it.

use std::rc::Rc;

use hashbrown::HashMap;
use if_chain::if_chain;
use log::trace;

use crate::Symbol;
use crate::error::{CompileError, ErrorKind, Result};
use crate::types::{FileSpan, FloatSize};
use crate::types::entity::{ArrayMethod, Entity, ExprOp, FuncKind, StmtKind};
use crate::types::hir::{ExprId, FuncId, Hir, LocalId, Scope, ScopeFlags, StmtId, VarKind};
use crate::types::ty::{Bound, Instantiation, Scheme, Ty, TyKind, TyVar};
use crate::types::value::Value;

/// The per-compilation typing context.
#[derive(Default)]
pub struct InferCtx {
  /// The substitution: variable id to representative type.
  subst: HashMap<i32, Ty>,
  /// Live constraints, refined by intersection as unification proceeds.
  constraints: HashMap<i32, Ty>,
  /// The next negative id for scheme openings.
  next_open: i32,
  /// The next positive id for variables introduced while checking.
  next_user: i32,
  /// Accumulated type diagnostics, reported after the pass.
  pub errors: Vec<CompileError>,
  /// Scheme openings whose instantiation records still hold unresolved
  /// variables; they are grounded once the whole pass has settled.
  pending: Vec<(Scheme, usize)>,
  /// Log each unification step (the `--tc` flag).
  pub trace: bool,
}

impl InferCtx {
  /// Construct an empty context.
  #[must_use] pub fn new() -> Self { Self::default() }

  /// A fresh positive-id variable for a source-level unknown.
  pub fn fresh_user(&mut self) -> Ty {
    self.next_user += 1;
    TyKind::var(TyVar(self.next_user))
  }

  /// A fresh negative-id variable from a scheme opening, inheriting the
  /// bound variable's constraint.
  pub fn fresh_open(&mut self, constraint: Option<Ty>) -> Ty {
    self.next_open -= 1;
    let v = TyVar(self.next_open);
    if let Some(c) = &constraint { self.constraints.insert(v.0, c.clone()); }
    Rc::new(TyKind::Var(v, constraint))
  }

  /// The live constraint of a variable, preferring refinements recorded
  /// during unification over the carried constraint.
  fn live_constraint(&self, v: TyVar, carried: Option<&Ty>) -> Option<Ty> {
    self.constraints.get(&v.0).cloned().or_else(|| carried.cloned())
  }

  /// Walk the substitution to the representative of `ty`. Also returns
  /// the last variable on the chain, so callers can shortcut it when the
  /// unified result is more precise than the representative.
  fn resolve_pair(&self, ty: &Ty) -> (Ty, Option<TyVar>) {
    let mut t = ty.clone();
    let mut last = None;
    loop {
      let next = match &*t {
        TyKind::Var(v, _) => match self.subst.get(&v.0) {
          Some(n) => { last = Some(*v); n.clone() }
          None => return (t, last),
        },
        _ => return (t, last),
      };
      t = next;
    }
  }

  /// Walk the substitution to the representative of `ty`.
  #[must_use] pub fn resolve(&self, ty: &Ty) -> Ty { self.resolve_pair(ty).0 }

  /// Whether `v` occurs in `ty` after resolution. Binding would create a
  /// cyclic type, which unification rejects.
  fn occurs(&self, v: TyVar, ty: &Ty) -> bool {
    let t = self.resolve(ty);
    match &*t {
      TyKind::Var(w, c) =>
        *w == v || c.as_ref().is_some_and(|c| self.occurs(v, c)),
      TyKind::Int(_) | TyKind::AnyInt(_) | TyKind::Float(_) => false,
      TyKind::Name(_, args) | TyKind::Choice(args) | TyKind::Tuple(args) =>
        args.iter().any(|t| self.occurs(v, t)),
      TyKind::Array(t) => self.occurs(v, t),
      TyKind::Struct(fields) => fields.iter().any(|(_, t)| self.occurs(v, t)),
      TyKind::Fn(params, ret) =>
        params.iter().any(|t| self.occurs(v, t)) || self.occurs(v, ret),
      TyKind::Poly(_) => false,
    }
  }

  fn bind(&mut self, v: TyVar, ty: Ty, span: FileSpan) -> Result<Ty> {
    if self.occurs(v, &ty) {
      return Err(CompileError::new(ErrorKind::TypeMismatch, span,
        format!("cyclic type: {v} occurs in {ty}")))
    }
    if self.trace { trace!("bind {v} := {ty}") }
    self.subst.insert(v.0, ty.clone());
    Ok(ty)
  }

  /// The preferred representative of two variables: the positive id with
  /// the smallest absolute value, else the negative id closest to zero.
  fn preferred(a: TyVar, b: TyVar) -> TyVar {
    match (a.is_user(), b.is_user()) {
      (true, true) => if a.0 <= b.0 { a } else { b },
      (true, false) => a,
      (false, true) => b,
      (false, false) => if a.0 >= b.0 { a } else { b },
    }
  }

  /// Unify two types, returning the unified type. On success the
  /// substitution is extended; on failure nothing is reported, so callers
  /// can accumulate the error.
  pub fn unify(&mut self, a: &Ty, b: &Ty, span: FileSpan) -> Result<Ty> {
    let (ra, va) = self.resolve_pair(a);
    let (rb, vb) = self.resolve_pair(b);
    if self.trace { trace!("unify {ra} ~ {rb}") }
    let result = match (&*ra, &*rb) {
      (TyKind::Var(x, cx), TyKind::Var(y, cy)) => {
        if x == y { return Ok(ra.clone()) }
        let (x, y) = (*x, *y);
        let cx = self.live_constraint(x, cx.as_ref());
        let cy = self.live_constraint(y, cy.as_ref());
        let rep = Self::preferred(x, y);
        let other = if rep == x { y } else { x };
        let constraint = match (cx, cy) {
          (Some(cx), Some(cy)) => Some(self.intersect(&cx, &cy, span)?.ok_or_else(|| {
            CompileError::new(ErrorKind::TypeMismatch, span,
              format!("no type satisfies both {cx} and {cy}"))
          })?),
          (c, None) | (None, c) => c,
        };
        if let Some(c) = &constraint { self.constraints.insert(rep.0, c.clone()); }
        let rep_ty = Rc::new(TyKind::Var(rep, constraint));
        return self.bind(other, rep_ty, span)
      }
      (TyKind::Var(v, c), _) => {
        let c = self.live_constraint(*v, c.as_ref());
        return self.bind_constrained(*v, c, rb, span)
      }
      (_, TyKind::Var(v, c)) => {
        let c = self.live_constraint(*v, c.as_ref());
        return self.bind_constrained(*v, c, ra, span)
      }
      (TyKind::Int(x), TyKind::Int(y)) if x == y => Ok(ra.clone()),
      (TyKind::AnyInt(sa), TyKind::AnyInt(sb)) if sa == sb => Ok(ra.clone()),
      (TyKind::AnyInt(s), TyKind::Int(it)) if it.signed() == *s => Ok(rb.clone()),
      (TyKind::Int(it), TyKind::AnyInt(s)) if it.signed() == *s => Ok(ra.clone()),
      (TyKind::Float(x), TyKind::Float(y)) if x == y => Ok(ra.clone()),
      (TyKind::Choice(_), _) | (_, TyKind::Choice(_)) => {
        match self.intersect(&ra, &rb, span)? {
          Some(t) => Ok(t),
          None => Err(self.mismatch(&ra, &rb, span)),
        }
      }
      (TyKind::Name(x, ps), TyKind::Name(y, qs)) if x == y && ps.len() == qs.len() => {
        let args = ps.iter().zip(&**qs)
          .map(|(p, q)| self.unify(p, q, span))
          .collect::<Result<Box<[_]>>>()?;
        Ok(Rc::new(TyKind::Name(*x, args)))
      }
      (TyKind::Array(x), TyKind::Array(y)) =>
        Ok(Rc::new(TyKind::Array(self.unify(x, y, span)?))),
      (TyKind::Tuple(xs), TyKind::Tuple(ys)) if xs.len() == ys.len() => {
        let tys = xs.iter().zip(&**ys)
          .map(|(x, y)| self.unify(x, y, span))
          .collect::<Result<Box<[_]>>>()?;
        Ok(Rc::new(TyKind::Tuple(tys)))
      }
      (TyKind::Struct(xs), TyKind::Struct(ys)) if xs.len() == ys.len() => {
        let fields = xs.iter().zip(&**ys).map(|((nx, x), (ny, y))| {
          if nx != ny {
            return Err(CompileError::new(ErrorKind::TypeMismatch, span,
              format!("struct field mismatch: {nx} vs {ny}")))
          }
          Ok((*nx, self.unify(x, y, span)?))
        }).collect::<Result<Box<[_]>>>()?;
        Ok(Rc::new(TyKind::Struct(fields)))
      }
      (TyKind::Fn(xs, xr), TyKind::Fn(ys, yr)) if xs.len() == ys.len() => {
        let params = xs.iter().zip(&**ys)
          .map(|(x, y)| self.unify(x, y, span))
          .collect::<Result<Box<[_]>>>()?;
        let ret = self.unify(xr, yr, span)?;
        Ok(Rc::new(TyKind::Fn(params, ret)))
      }
      _ => Err(self.mismatch(&ra, &rb, span)),
    };
    // Shortcut the variable chains to the refined result.
    if let Ok(r) = &result {
      if let Some(v) = va { self.subst.insert(v.0, r.clone()); }
      if let Some(v) = vb { self.subst.insert(v.0, r.clone()); }
    }
    result
  }

  fn bind_constrained(
    &mut self, v: TyVar, constraint: Option<Ty>, other: Ty, span: FileSpan,
  ) -> Result<Ty> {
    match constraint {
      None => self.bind(v, other, span),
      Some(c) => {
        let met = self.intersect(&c, &other, span)?.ok_or_else(|| {
          CompileError::new(ErrorKind::TypeMismatch, span,
            format!("{other} does not satisfy the constraint {c}"))
        })?;
        self.bind(v, met, span)
      }
    }
  }

  fn mismatch(&self, a: &Ty, b: &Ty, span: FileSpan) -> CompileError {
    CompileError::new(ErrorKind::TypeMismatch, span, format!("cannot unify {a} with {b}"))
  }

  /// Intersect two types viewed as constraint sets. `Ok(None)` means the
  /// intersection is empty; a singleton result is folded to its element.
  pub fn intersect(&mut self, a: &Ty, b: &Ty, span: FileSpan) -> Result<Option<Ty>> {
    fn members(t: &Ty) -> Vec<Ty> {
      match &**t {
        TyKind::Choice(ms) => ms.to_vec(),
        _ => vec![t.clone()],
      }
    }
    let (ra, _) = self.resolve_pair(a);
    let (rb, _) = self.resolve_pair(b);
    let mut pures = vec![];
    let mut defers = vec![];
    for x in members(&ra) {
      for y in members(&rb) {
        match Self::meet_pure(&x, &y) {
          Meet::Empty => {}
          Meet::Pure(t) => pures.push(t),
          Meet::Defer => defers.push((x.clone(), y.clone())),
        }
      }
    }
    if pures.is_empty() && defers.is_empty() { return Ok(None) }
    if pures.len() + defers.len() == 1 {
      return Ok(match pures.pop() {
        Some(t) => Some(t),
        None => {
          let (x, y) = defers.pop().expect("nonempty");
          self.unify(&x, &y, span).ok()
        }
      })
    }
    for (x, y) in defers {
      if let Ok(t) = self.unify(&x, &y, span) { pures.push(t) }
    }
    let mut seen = vec![];
    let mut out = vec![];
    for t in pures {
      let key = t.to_string();
      if !seen.contains(&key) {
        seen.push(key);
        out.push(t);
      }
    }
    if out.is_empty() { Ok(None) } else { Ok(Some(TyKind::choice(out))) }
  }

  /// A side-effect-free meet of two constraint members.
  fn meet_pure(a: &Ty, b: &Ty) -> Meet {
    match (&**a, &**b) {
      (TyKind::Var(..), _) | (_, TyKind::Var(..)) => Meet::Defer,
      (TyKind::AnyInt(sa), TyKind::AnyInt(sb)) =>
        if sa == sb { Meet::Pure(a.clone()) } else { Meet::Empty },
      (TyKind::AnyInt(s), TyKind::Int(it)) | (TyKind::Int(it), TyKind::AnyInt(s)) =>
        if it.signed() == *s { Meet::Pure(Rc::new(TyKind::Int(*it))) } else { Meet::Empty },
      (TyKind::Int(x), TyKind::Int(y)) =>
        if x == y { Meet::Pure(a.clone()) } else { Meet::Empty },
      (TyKind::Float(x), TyKind::Float(y)) =>
        if x == y { Meet::Pure(a.clone()) } else { Meet::Empty },
      (TyKind::Name(x, ps), TyKind::Name(y, qs)) => {
        if x != y || ps.len() != qs.len() { return Meet::Empty }
        if ps.is_empty() { Meet::Pure(a.clone()) } else { Meet::Defer }
      }
      (TyKind::Array(_), TyKind::Array(_)) => Meet::Defer,
      (TyKind::Tuple(xs), TyKind::Tuple(ys)) =>
        if xs.len() == ys.len() { Meet::Defer } else { Meet::Empty },
      (TyKind::Struct(xs), TyKind::Struct(ys)) =>
        if xs.len() == ys.len() { Meet::Defer } else { Meet::Empty },
      (TyKind::Fn(xs, _), TyKind::Fn(ys, _)) =>
        if xs.len() == ys.len() { Meet::Defer } else { Meet::Empty },
      _ => Meet::Empty,
    }
  }

  /// Apply the substitution deeply.
  #[must_use] pub fn apply(&self, ty: &Ty) -> Ty {
    let t = self.resolve(ty);
    match &*t {
      TyKind::Var(v, c) => {
        let c = self.live_constraint(*v, c.as_ref()).map(|c| self.apply(&c));
        Rc::new(TyKind::Var(*v, c))
      }
      TyKind::Int(_) | TyKind::AnyInt(_) | TyKind::Float(_) | TyKind::Poly(_) => t,
      TyKind::Name(s, args) =>
        Rc::new(TyKind::Name(*s, args.iter().map(|t| self.apply(t)).collect())),
      TyKind::Array(el) => Rc::new(TyKind::Array(self.apply(el))),
      TyKind::Choice(ms) =>
        TyKind::choice(ms.iter().map(|t| self.apply(t)).collect()),
      TyKind::Tuple(ts) =>
        Rc::new(TyKind::Tuple(ts.iter().map(|t| self.apply(t)).collect())),
      TyKind::Struct(fs) =>
        Rc::new(TyKind::Struct(fs.iter().map(|(n, t)| (*n, self.apply(t))).collect())),
      TyKind::Fn(ps, r) => Rc::new(TyKind::Fn(
        ps.iter().map(|t| self.apply(t)).collect(), self.apply(r))),
    }
  }

  /// Apply the substitution and default leftover width families:
  /// `AnyInt` becomes the 64 bit type of its signedness. Used once a
  /// function (or instantiation) is final.
  #[must_use] pub fn finalize(&self, ty: &Ty) -> Ty {
    fn default_ints(t: &Ty) -> Ty {
      match &**t {
        TyKind::AnyInt(true) => TyKind::int(64),
        TyKind::AnyInt(false) => TyKind::uint(64),
        TyKind::Var(v, c) =>
          Rc::new(TyKind::Var(*v, c.as_ref().map(default_ints))),
        TyKind::Int(_) | TyKind::Float(_) | TyKind::Poly(_) => t.clone(),
        TyKind::Name(s, args) =>
          Rc::new(TyKind::Name(*s, args.iter().map(default_ints).collect())),
        TyKind::Array(el) => Rc::new(TyKind::Array(default_ints(el))),
        TyKind::Choice(ms) => TyKind::choice(ms.iter().map(default_ints).collect()),
        TyKind::Tuple(ts) => Rc::new(TyKind::Tuple(ts.iter().map(default_ints).collect())),
        TyKind::Struct(fs) =>
          Rc::new(TyKind::Struct(fs.iter().map(|(n, t)| (*n, default_ints(t))).collect())),
        TyKind::Fn(ps, r) =>
          Rc::new(TyKind::Fn(ps.iter().map(default_ints).collect(), default_ints(r))),
      }
    }
    default_ints(&self.apply(ty))
  }

  /// Generalize the free variables of `ty` into a scheme. Monomorphic
  /// types are returned unchanged.
  #[must_use] pub fn generalize(&self, ty: &Ty) -> Ty {
    let t = self.apply(ty);
    let mut vars = vec![];
    t.free_vars(&mut vars);
    if vars.is_empty() { return t }
    let bounds = vars.iter().map(|&v| Bound {
      var: v,
      constraint: self.live_constraint(v, None),
    }).collect();
    Rc::new(TyKind::Poly(Scheme::new(bounds, t)))
  }

  /// Open a scheme: allocate fresh negative variables for the bound
  /// variables (inheriting constraints), substitute them through the
  /// scope, and record an instantiation. Returns the opened scope and the
  /// index of the new instantiation record.
  pub fn open_scheme(&mut self, scheme: &Scheme) -> (Ty, usize) {
    let mut map = HashMap::new();
    let mut fresh = Vec::with_capacity(scheme.bounds.len());
    for b in &scheme.bounds {
      let c = b.constraint.as_ref().map(|c| subst_vars(c, &map));
      let v = self.fresh_open(c);
      map.insert(b.var.0, v.clone());
      fresh.push(v);
    }
    let opened = subst_vars(&scheme.scope, &map);
    let idx = scheme.insts.borrow().len();
    scheme.insts.borrow_mut().push(Instantiation {
      bindings: fresh.into(),
      ty: opened.clone(),
    });
    (opened, idx)
  }

  /// Rewrite an instantiation record in place to ground types, once the
  /// call site that opened it has been fully unified.
  pub fn ground_instantiation(&self, scheme: &Scheme, idx: usize) {
    let mut insts = scheme.insts.borrow_mut();
    let inst = &mut insts[idx];
    inst.bindings = inst.bindings.iter().map(|t| self.finalize(t)).collect();
    inst.ty = self.finalize(&inst.ty);
  }
}

enum Meet {
  Empty,
  Pure(Ty),
  Defer,
}

/// Substitute mapped variables structurally (not through the context).
#[must_use] pub fn subst_vars(ty: &Ty, map: &HashMap<i32, Ty>) -> Ty {
  match &**ty {
    TyKind::Var(v, c) => match map.get(&v.0) {
      Some(t) => t.clone(),
      None => Rc::new(TyKind::Var(*v, c.as_ref().map(|c| subst_vars(c, map)))),
    },
    TyKind::Int(_) | TyKind::AnyInt(_) | TyKind::Float(_) | TyKind::Poly(_) => ty.clone(),
    TyKind::Name(s, args) =>
      Rc::new(TyKind::Name(*s, args.iter().map(|t| subst_vars(t, map)).collect())),
    TyKind::Array(el) => Rc::new(TyKind::Array(subst_vars(el, map))),
    TyKind::Choice(ms) =>
      TyKind::choice(ms.iter().map(|t| subst_vars(t, map)).collect()),
    TyKind::Tuple(ts) =>
      Rc::new(TyKind::Tuple(ts.iter().map(|t| subst_vars(t, map)).collect())),
    TyKind::Struct(fs) =>
      Rc::new(TyKind::Struct(fs.iter().map(|(n, t)| (*n, subst_vars(t, map))).collect())),
    TyKind::Fn(ps, r) => Rc::new(TyKind::Fn(
      ps.iter().map(|t| subst_vars(t, map)).collect(), subst_vars(r, map))),
  }
}

/// The constraint set of numeric types.
fn number_class() -> Vec<Ty> {
  vec![
    Rc::new(TyKind::AnyInt(true)),
    Rc::new(TyKind::AnyInt(false)),
    Rc::new(TyKind::Float(FloatSize::F32)),
    Rc::new(TyKind::Float(FloatSize::F64)),
  ]
}

/// The constraint set of integer types.
fn integer_class() -> Vec<Ty> {
  vec![Rc::new(TyKind::AnyInt(true)), Rc::new(TyKind::AnyInt(false))]
}

/// The walker that types one function at a time.
pub struct Checker<'a> {
  /// The typing context.
  pub ctx: &'a mut InferCtx,
  /// The program graph.
  pub hir: &'a mut Hir,
  /// The named-entity table for call resolution.
  pub names: &'a HashMap<Symbol, Entity>,
  func: FuncId,
  scope: Scope,
  locals: HashMap<Symbol, LocalId>,
  ret: Ty,
  switch_tys: Vec<Ty>,
}

/// Infer the type of a function, leaving the generalized result on
/// `hir.funcs[f].ty`. Functions that already have a type are skipped, so
/// recursion and forward references settle on their placeholders.
pub fn check_func(
  ctx: &mut InferCtx, hir: &mut Hir, names: &HashMap<Symbol, Entity>, f: FuncId,
) {
  if hir.funcs[f].ty.is_some() { return }
  let span = hir.funcs[f].span;
  let mut scope = Scope::new();
  let mut param_tys = Vec::new();
  for &p in &hir.funcs[f].params.clone() {
    let ty = match hir.vars[p].ty_expr {
      Some(te) => type_from_expr(ctx, hir, names, te),
      None => ctx.fresh_user(),
    };
    hir.vars[p].ty = Some(ty.clone());
    scope.bind(hir.vars[p].name, ty.clone(), ScopeFlags::IS_PARAM);
    param_tys.push(ty);
  }
  let ret = ctx.fresh_user();
  // The placeholder type that recursive calls unify against.
  let placeholder = Rc::new(TyKind::Fn(param_tys.into(), ret.clone()));
  hir.funcs[f].ty = Some(placeholder.clone());

  let body = hir.funcs[f].body;
  let mut checker = Checker {
    ctx: &mut *ctx,
    hir: &mut *hir,
    names, func: f, scope,
    locals: HashMap::new(),
    ret: ret.clone(),
    switch_tys: vec![],
  };
  checker.check_block(body);
  if !checker.hir.blocks[body].flags.contains(crate::types::hir::BlockFlags::CAN_RETURN) {
    // A body that never returns produces the empty tuple.
    let none = Rc::new(TyKind::Tuple(Box::new([])));
    if let Err(e) = checker.ctx.unify(&ret, &none, span) { checker.ctx.errors.push(e) }
  }
  let generalized = ctx.generalize(&placeholder);
  if ctx.trace { trace!("{} : {generalized}", hir.funcs[f].name) }
  hir.funcs[f].ty = Some(generalized);
}

/// Elaborate a type expression into a type.
pub fn type_from_expr(
  ctx: &mut InferCtx, hir: &mut Hir, names: &HashMap<Symbol, Entity>, e: ExprId,
) -> Ty {
  let span = hir.exprs[e].span;
  match hir.exprs[e].op {
    ExprOp::UintType => TyKind::uint(hir.exprs[e].width),
    ExprOp::IntType => TyKind::int(hir.exprs[e].width),
    ExprOp::FloatType => Rc::new(TyKind::Float(
      if hir.exprs[e].width == 32 { FloatSize::F32 } else { FloatSize::F64 })),
    ExprOp::StringType => TyKind::string(),
    ExprOp::BoolType => TyKind::bool(),
    ExprOp::NoneType => Rc::new(TyKind::Tuple(Box::new([]))),
    ExprOp::ArrayOf => {
      let el = hir.exprs[e].args[0];
      Rc::new(TyKind::Array(type_from_expr(ctx, hir, names, el)))
    }
    ExprOp::TupleLit => {
      let args = hir.exprs[e].args.clone();
      Rc::new(TyKind::Tuple(
        args.iter().map(|&a| type_from_expr(ctx, hir, names, a)).collect()))
    }
    ExprOp::TypeOf => {
      // typeof(e) outside a function body: the already-inferred type of
      // the operand. Inside a body, [`Checker::type_expr`] checks the
      // operand in scope instead.
      let inner = hir.exprs[e].args[0];
      match hir.exprs[inner].ty.clone() {
        Some(ty) => ty,
        None => ctx.fresh_user(),
      }
    }
    ExprOp::Ident => {
      let sym = hir.ident_sym(e).expect("identifier without symbol");
      match names.get(&sym) {
        Some(Entity::Prim(p)) if p.ty.is_some() =>
          p.ty.expect("just checked").ty(),
        Some(Entity::Type(t)) => match t.k.ty() {
          Some(ty) => ty.clone(),
          None => Rc::new(TyKind::Name(sym, Box::new([]))),
        },
        _ => Rc::new(TyKind::Name(sym, Box::new([]))),
      }
    }
    _ => {
      ctx.errors.push(CompileError::new(ErrorKind::InvalidArgument, span,
        "expected a type expression"));
      ctx.fresh_user()
    }
  }
}

impl Checker<'_> {
  fn report(&mut self, e: CompileError) -> Ty {
    self.ctx.errors.push(e);
    self.ctx.fresh_user()
  }

  /// Elaborate a type expression inside the function body, where
  /// `typeof(e)` checks its operand against the local scope.
  fn type_expr(&mut self, e: ExprId) -> Ty {
    let args = self.hir.exprs[e].args.clone();
    match self.hir.exprs[e].op {
      ExprOp::TypeOf => self.check_expr(args[0]),
      ExprOp::ArrayOf => Rc::new(TyKind::Array(self.type_expr(args[0]))),
      ExprOp::TupleLit =>
        Rc::new(TyKind::Tuple(args.iter().map(|&a| self.type_expr(a)).collect())),
      _ => type_from_expr(self.ctx, self.hir, self.names, e),
    }
  }

  fn unify_or_report(&mut self, a: &Ty, b: &Ty, span: FileSpan) -> Ty {
    match self.ctx.unify(a, b, span) {
      Ok(t) => t,
      Err(e) => self.report(e),
    }
  }

  /// Check every statement of a block. The id list is snapshotted so
  /// transformer-inserted statements do not disturb the walk.
  pub fn check_block(&mut self, b: crate::types::hir::BlockId) {
    self.scope.push();
    for s in self.hir.stmt_ids(b) {
      self.check_stmt(b, s);
    }
    self.scope.pop();
  }

  fn check_stmt(&mut self, b: crate::types::hir::BlockId, s: StmtId) {
    use crate::types::hir::BlockFlags;
    let kind = self.hir.stmts[s].kind;
    let span = self.hir.stmts[s].span;
    let expr = self.hir.stmts[s].expr;
    let body = self.hir.stmts[s].body;
    match kind {
      StmtKind::Assign | StmtKind::Call => {
        if let Some(e) = expr { self.check_expr(e); }
      }
      StmtKind::Print | StmtKind::Println => {
        if let Some(e) = expr { self.check_expr(e); }
      }
      StmtKind::If | StmtKind::Elseif | StmtKind::While => {
        if let Some(e) = expr {
          let t = self.check_expr(e);
          self.unify_or_report(&t, &TyKind::bool(), span);
        }
        if let Some(body) = body { self.check_block(body) }
      }
      StmtKind::Do => {
        if let Some(body) = body { self.check_block(body) }
        if let Some(e) = expr {
          let t = self.check_expr(e);
          self.unify_or_report(&t, &TyKind::bool(), span);
        }
      }
      StmtKind::Else | StmtKind::Default => {
        if let Some(body) = body { self.check_block(body) }
      }
      StmtKind::Switch => {
        let t = match expr {
          Some(e) => self.check_expr(e),
          None => self.ctx.fresh_user(),
        };
        self.switch_tys.push(t);
        if let Some(body) = body { self.check_block(body) }
        self.switch_tys.pop();
      }
      StmtKind::Case => {
        if let Some(e) = expr {
          let t = self.check_expr(e);
          if let Some(st) = self.switch_tys.last().cloned() {
            self.unify_or_report(&t, &st, span);
          }
        }
        if let Some(body) = body { self.check_block(body) }
      }
      StmtKind::For => {
        // init, cond, update live in the expression as a tuple.
        if let Some(e) = expr { self.check_expr(e); }
        if let Some(body) = body { self.check_block(body) }
      }
      StmtKind::Foreach => {
        if let Some(e) = expr { self.check_foreach(e, span) }
        if let Some(body) = body { self.check_block(body) }
      }
      StmtKind::Return => {
        let t = match expr {
          Some(e) => self.check_expr(e),
          None => Rc::new(TyKind::Tuple(Box::new([]))),
        };
        let ret = self.ret.clone();
        self.unify_or_report(&t, &ret, span);
        self.hir.blocks[b].flags |= BlockFlags::CAN_RETURN;
        let rt = self.ctx.apply(&ret);
        self.hir.blocks[b].ret_ty = Some(rt);
      }
      StmtKind::Yield => {
        if let Some(e) = expr {
          let t = self.check_expr(e);
          let ret = self.ret.clone();
          self.unify_or_report(&t, &ret, span);
        }
        self.hir.blocks[b].flags |= BlockFlags::CAN_CONTINUE;
      }
      StmtKind::Throw => {
        if let Some(e) = expr { self.check_expr(e); }
      }
      StmtKind::Ref | StmtKind::Unref | StmtKind::Generate | StmtKind::Relation => {
        if let Some(e) = expr { self.check_expr(e); }
        if let Some(body) = body { self.check_block(body) }
      }
      StmtKind::Import | StmtKind::Importlib | StmtKind::Importrpc | StmtKind::Use => {}
      StmtKind::Appendcode | StmtKind::Prependcode => {
        if let Some(body) = body { self.check_block(body) }
      }
    }
    // Dead-code flags propagate up through the owning statement.
    if let Some(body) = body {
      let flags = self.hir.blocks[body].flags;
      if flags.contains(BlockFlags::CAN_RETURN) {
        self.hir.blocks[b].flags |= BlockFlags::CAN_RETURN;
        if self.hir.blocks[b].ret_ty.is_none() {
          self.hir.blocks[b].ret_ty = self.hir.blocks[body].ret_ty.clone();
        }
      }
      if flags.contains(BlockFlags::CAN_CONTINUE) {
        self.hir.blocks[b].flags |= BlockFlags::CAN_CONTINUE;
      }
    }
  }

  fn check_foreach(&mut self, e: ExprId, span: FileSpan) {
    // The expression is `x in seq`; bind `x` to the element type.
    let args = self.hir.exprs[e].args.clone();
    if_chain! {
      if self.hir.exprs[e].op == ExprOp::In;
      if let &[lhs, rhs] = &*args;
      if let Some(sym) = self.hir.ident_sym(lhs);
      then {
        let seq = self.check_expr(rhs);
        let el = self.ctx.fresh_user();
        let arr = Rc::new(TyKind::Array(el.clone()));
        self.unify_or_report(&seq, &arr, span);
        let el = self.ctx.apply(&el);
        self.hir.exprs[lhs].ty = Some(el.clone());
        self.hir.exprs[lhs].binding_instance = true;
        self.bind_local(sym, lhs, el);
        self.hir.exprs[e].ty = Some(TyKind::bool());
      } else {
        self.check_expr(e);
      }
    }
  }

  fn bind_local(&mut self, sym: Symbol, at: ExprId, ty: Ty) {
    let entry = self.scope.bind(sym, ty.clone(), ScopeFlags::IS_LOCAL | ScopeFlags::BINDING_INSTANCE);
    if entry.flags.contains(ScopeFlags::FIRST_INSTANCE) && !self.locals.contains_key(&sym) {
      let span = self.hir.exprs[at].span;
      let func = self.func;
      let id = self.hir.vars.push(crate::types::hir::Variable {
        name: sym,
        kind: VarKind::Local,
        func,
        ty_expr: None,
        init: Some(at),
        ty: Some(ty),
        span,
      });
      self.locals.insert(sym, id);
    } else if let Some(&id) = self.locals.get(&sym) {
      self.hir.vars[id].ty = Some(ty);
    }
  }

  /// Check an expression, store its type on the node, and return it.
  pub fn check_expr(&mut self, e: ExprId) -> Ty {
    let ty = self.check_expr_inner(e);
    let stored = self.ctx.apply(&ty);
    if let TyKind::Int(it) = &*stored { self.hir.exprs[e].width = it.width() }
    self.hir.exprs[e].ty = Some(stored);
    ty
  }

  #[allow(clippy::too_many_lines)]
  fn check_expr_inner(&mut self, e: ExprId) -> Ty {
    let op = self.hir.exprs[e].op;
    let span = self.hir.exprs[e].span;
    let args = self.hir.exprs[e].args.clone();
    match op {
      ExprOp::Const => match self.hir.exprs[e].val.clone() {
        Some(Value::Str(_)) => TyKind::string(),
        Some(Value::Bool(_)) => TyKind::bool(),
        Some(Value::Int(_, 0)) => Rc::new(TyKind::AnyInt(true)),
        Some(Value::Int(_, w)) => TyKind::int(w),
        Some(Value::Uint(_, 0)) => Rc::new(TyKind::AnyInt(false)),
        Some(Value::Uint(_, w)) => TyKind::uint(w),
        Some(Value::Float(_, sz)) => Rc::new(TyKind::Float(sz)),
        Some(Value::Sym(_)) | None => self.report(CompileError::new(
          ErrorKind::Internal, span, "constant without a value")),
      },
      ExprOp::Ident => {
        let sym = self.hir.ident_sym(e).expect("identifier without symbol");
        if let Some(entry) = self.scope.get(sym) { return entry.ty.clone() }
        match self.names.get(&sym) {
          Some(&Entity::Func(f)) => {
            check_func(self.ctx, self.hir, self.names, f);
            self.hir.funcs[f].ty.clone().expect("just checked")
          }
          _ => self.report(CompileError::new(ErrorKind::NotFound, span,
            format!("undefined identifier {sym}"))),
        }
      }
      ExprOp::Add => {
        let elem = self.ctx.fresh_user();
        let mut class = vec![TyKind::string()];
        class.extend(number_class());
        class.push(Rc::new(TyKind::Array(elem)));
        self.binary_constrained(e, &args, span, Some(TyKind::choice(class)))
      }
      ExprOp::Sub | ExprOp::Mul | ExprOp::Div =>
        self.binary_constrained(e, &args, span, Some(TyKind::choice(number_class()))),
      ExprOp::Mod => {
        let lhs = self.check_expr(args[0]);
        if self.ctx.resolve(&lhs).is_named("string") {
          // Format-style substitution: `"..." % (args...)`.
          self.check_expr(args[1]);
          return TyKind::string()
        }
        let v = self.ctx.fresh_open(Some(TyKind::choice(number_class())));
        self.unify_or_report(&lhs, &v, span);
        let rhs = self.check_expr(args[1]);
        self.unify_or_report(&rhs, &v, span);
        v
      }
      ExprOp::AddTrunc | ExprOp::SubTrunc | ExprOp::MulTrunc =>
        self.binary_constrained(e, &args, span, Some(TyKind::choice(integer_class()))),
      ExprOp::Exp | ExprOp::Shl | ExprOp::Shr | ExprOp::Rotl | ExprOp::Rotr => {
        let v = self.ctx.fresh_open(Some(TyKind::choice(integer_class())));
        let lhs = self.check_expr(args[0]);
        self.unify_or_report(&lhs, &v, span);
        let amount = self.ctx.fresh_open(Some(Rc::new(TyKind::AnyInt(false))));
        let rhs = self.check_expr(args[1]);
        self.unify_or_report(&rhs, &amount, span);
        v
      }
      ExprOp::BitAnd | ExprOp::BitOr | ExprOp::BitXor =>
        self.binary_constrained(e, &args, span, Some(TyKind::choice(integer_class()))),
      ExprOp::Lt | ExprOp::Le | ExprOp::Gt | ExprOp::Ge => {
        let mut class = number_class();
        class.push(TyKind::string());
        self.binary_constrained(e, &args, span, Some(TyKind::choice(class)));
        TyKind::bool()
      }
      ExprOp::Eq | ExprOp::Ne => {
        self.binary_constrained(e, &args, span, None);
        TyKind::bool()
      }
      ExprOp::And | ExprOp::Or | ExprOp::Xor => {
        for &a in &*args {
          let t = self.check_expr(a);
          self.unify_or_report(&t, &TyKind::bool(), span);
        }
        TyKind::bool()
      }
      ExprOp::Not => {
        let t = self.check_expr(args[0]);
        self.unify_or_report(&t, &TyKind::bool(), span)
      }
      ExprOp::Negate =>
        self.unary_constrained(&args, span, TyKind::choice(number_class())),
      ExprOp::NegateTrunc | ExprOp::BitNot =>
        self.unary_constrained(&args, span, TyKind::choice(integer_class())),
      ExprOp::Assign => {
        let rhs = self.check_expr(args[1]);
        self.check_assign_target(args[0], rhs.clone(), span);
        rhs
      }
      op if op.assign_base().is_some() => {
        let base = op.assign_base().expect("just checked");
        let lhs = self.check_expr(args[0]);
        let rhs = self.check_expr(args[1]);
        let result = self.apply_binary_scheme(base, &lhs, &rhs, span);
        self.check_assign_target(args[0], result.clone(), span);
        result
      }
      ExprOp::Select => {
        let c = self.check_expr(args[0]);
        self.unify_or_report(&c, &TyKind::bool(), span);
        let t = self.check_expr(args[1]);
        let f = self.check_expr(args[2]);
        self.unify_or_report(&t, &f, span)
      }
      ExprOp::TupleLit => {
        let tys = args.iter().map(|&a| self.check_expr(a)).collect();
        Rc::new(TyKind::Tuple(tys))
      }
      ExprOp::ArrayLit => {
        let el = self.ctx.fresh_user();
        for &a in &*args {
          let t = self.check_expr(a);
          self.unify_or_report(&t, &el, span);
        }
        Rc::new(TyKind::Array(el))
      }
      ExprOp::Index => self.check_index(&args, span),
      ExprOp::Slice => {
        let base = self.check_expr(args[0]);
        let el = self.ctx.fresh_user();
        let arr = Rc::new(TyKind::Array(el));
        let arr = self.unify_or_report(&base, &arr, span);
        for &i in &args[1..] {
          let t = self.check_expr(i);
          let ix = self.ctx.fresh_open(Some(Rc::new(TyKind::AnyInt(false))));
          self.unify_or_report(&t, &ix, span);
        }
        arr
      }
      ExprOp::Dot => self.check_dot(&args, span),
      ExprOp::Call => self.check_call(e, &args, span),
      ExprOp::Cast | ExprOp::CastTrunc => {
        let target = self.type_expr(args[0]);
        self.check_expr(args[1]);
        target
      }
      ExprOp::In => {
        self.check_expr(args[0]);
        self.check_expr(args[1]);
        TyKind::bool()
      }
      ExprOp::Range => {
        let lo = self.check_expr(args[0]);
        let hi = self.check_expr(args[1]);
        let el = self.unify_or_report(&lo, &hi, span);
        Rc::new(TyKind::Array(el))
      }
      ExprOp::Secret | ExprOp::Reveal => self.check_expr(args[0]),
      ExprOp::Null => self.type_expr(args[0]),
      ExprOp::NotNull => self.check_expr(args[0]),
      ExprOp::IsNull => {
        self.check_expr(args[0]);
        TyKind::bool()
      }
      ExprOp::FuncAddr => {
        let t = self.check_expr(args[0]);
        match &*self.ctx.resolve(&t) {
          TyKind::Poly(_) => self.report(CompileError::new(ErrorKind::Unimplemented, span,
            "cannot take the address of a polymorphic function")),
          _ => t,
        }
      }
      ExprOp::ArrayOf | ExprOp::TypeOf | ExprOp::UintType | ExprOp::IntType |
      ExprOp::FloatType | ExprOp::StringType | ExprOp::BoolType | ExprOp::NoneType =>
        self.type_expr(e),
      ExprOp::WidthOf => {
        self.check_expr(args[0]);
        Rc::new(TyKind::AnyInt(false))
      }
      ExprOp::Signed | ExprOp::Unsigned => {
        let t = self.check_expr(args[0]);
        let signed = op == ExprOp::Signed;
        match &*self.ctx.resolve(&t) {
          TyKind::Int(it) => Rc::new(TyKind::Int(it.with_signed(signed))),
          TyKind::AnyInt(_) => Rc::new(TyKind::AnyInt(signed)),
          other => self.report(CompileError::new(ErrorKind::InvalidArgument, span,
            format!("signed/unsigned requires an integer, found {other}"))),
        }
      }
      ExprOp::NamedParam => self.check_expr(args[1]),
      _ => self.report(CompileError::new(ErrorKind::Unimplemented, span,
        format!("expression operator {op} is not yet typed"))),
    }
  }

  fn binary_constrained(
    &mut self, _e: ExprId, args: &[ExprId], span: FileSpan, constraint: Option<Ty>,
  ) -> Ty {
    let v = self.ctx.fresh_open(constraint);
    for &a in args {
      let t = self.check_expr(a);
      self.unify_or_report(&t, &v, span);
    }
    v
  }

  fn unary_constrained(&mut self, args: &[ExprId], span: FileSpan, constraint: Ty) -> Ty {
    let v = self.ctx.fresh_open(Some(constraint));
    let t = self.check_expr(args[0]);
    self.unify_or_report(&t, &v, span)
  }

  /// The result type of `lhs <base> rhs`, for compound assignments.
  fn apply_binary_scheme(&mut self, base: ExprOp, lhs: &Ty, rhs: &Ty, span: FileSpan) -> Ty {
    let constraint = match base {
      ExprOp::Add => {
        let elem = self.ctx.fresh_user();
        let mut class = vec![TyKind::string()];
        class.extend(number_class());
        class.push(Rc::new(TyKind::Array(elem)));
        Some(TyKind::choice(class))
      }
      ExprOp::Sub | ExprOp::Mul | ExprOp::Div | ExprOp::Mod =>
        Some(TyKind::choice(number_class())),
      ExprOp::And | ExprOp::Or | ExprOp::Xor => {
        self.unify_or_report(lhs, &TyKind::bool(), span);
        self.unify_or_report(rhs, &TyKind::bool(), span);
        return TyKind::bool()
      }
      ExprOp::Exp | ExprOp::Shl | ExprOp::Shr | ExprOp::Rotl | ExprOp::Rotr => {
        let v = self.ctx.fresh_open(Some(TyKind::choice(integer_class())));
        self.unify_or_report(lhs, &v, span);
        let amount = self.ctx.fresh_open(Some(Rc::new(TyKind::AnyInt(false))));
        self.unify_or_report(rhs, &amount, span);
        return v
      }
      _ => Some(TyKind::choice(integer_class())),
    };
    let v = self.ctx.fresh_open(constraint);
    self.unify_or_report(lhs, &v, span);
    self.unify_or_report(rhs, &v, span);
    v
  }

  fn check_assign_target(&mut self, target: ExprId, ty: Ty, span: FileSpan) {
    match self.hir.exprs[target].op {
      ExprOp::Ident => {
        let sym = self.hir.ident_sym(target).expect("identifier without symbol");
        self.hir.exprs[target].binding_instance = true;
        if let Some(entry) = self.scope.get(sym) {
          let existing = entry.ty.clone();
          self.unify_or_report(&existing, &ty, span);
        }
        let applied = self.ctx.apply(&ty);
        self.hir.exprs[target].ty = Some(applied.clone());
        self.bind_local(sym, target, applied);
      }
      ExprOp::Index | ExprOp::Dot => {
        let t = self.check_expr(target);
        self.unify_or_report(&t, &ty, span);
      }
      _ => {
        self.ctx.errors.push(CompileError::new(ErrorKind::InvalidArgument, span,
          "expression is not assignable"));
      }
    }
  }

  fn check_index(&mut self, args: &[ExprId], span: FileSpan) -> Ty {
    let base = self.check_expr(args[0]);
    match &*self.ctx.resolve(&base) {
      TyKind::Tuple(tys) => {
        // Tuples index by integer literal only.
        match self.hir.fold_index(args[1]) {
          Some(i) if i < tys.len() => tys[i].clone(),
          Some(i) => self.report(CompileError::new(ErrorKind::InvalidArgument, span,
            format!("tuple index {i} out of range for {} elements", tys.len()))),
          None => self.report(CompileError::new(ErrorKind::InvalidArgument, span,
            "tuple index must be an integer literal")),
        }
      }
      TyKind::Struct(fields) => {
        // Structs index by field name, resolved to a position.
        if let Some(sym) = self.hir.ident_sym(args[1]) {
          match fields.iter().find(|(n, _)| *n == sym) {
            Some((_, t)) => t.clone(),
            None => self.report(CompileError::new(ErrorKind::NotFound, span,
              format!("no field {sym}"))),
          }
        } else {
          match self.hir.fold_index(args[1]) {
            Some(i) if i < fields.len() => fields[i].1.clone(),
            _ => self.report(CompileError::new(ErrorKind::InvalidArgument, span,
              "struct index must be a field name or literal position")),
          }
        }
      }
      _ => {
        let el = self.ctx.fresh_user();
        let arr = Rc::new(TyKind::Array(el.clone()));
        self.unify_or_report(&base, &arr, span);
        let i = self.check_expr(args[1]);
        let ix = self.ctx.fresh_open(Some(Rc::new(TyKind::AnyInt(false))));
        self.unify_or_report(&i, &ix, span);
        self.ctx.apply(&el)
      }
    }
  }

  fn check_dot(&mut self, args: &[ExprId], span: FileSpan) -> Ty {
    let base = self.check_expr(args[0]);
    let resolved = self.ctx.resolve(&base);
    if_chain! {
      if let TyKind::Array(el) = &*resolved;
      if let Some(sym) = self.hir.ident_sym(args[1]);
      if let Some(m) = ArrayMethod::from_symbol(sym);
      then {
        let none = Rc::new(TyKind::Tuple(Box::new([])));
        return Rc::new(match m {
          ArrayMethod::Append => TyKind::Fn(Box::new([el.clone()]), none),
          ArrayMethod::Concat => TyKind::Fn(Box::new([resolved.clone()]), none),
          ArrayMethod::Length => TyKind::Fn(Box::new([]), TyKind::uint(64)),
          ArrayMethod::Reverse => TyKind::Fn(Box::new([]), none),
          ArrayMethod::Values => TyKind::Fn(Box::new([]), Rc::new(TyKind::Array(el.clone()))),
          ArrayMethod::Items => {
            let pair = Rc::new(TyKind::Tuple(Box::new([TyKind::uint(64), el.clone()])));
            TyKind::Fn(Box::new([]), Rc::new(TyKind::Array(pair)))
          }
        })
      }
    }
    if let TyKind::Struct(fields) = &*resolved {
      if let Some(sym) = self.hir.ident_sym(args[1]) {
        if let Some((_, t)) = fields.iter().find(|(n, _)| *n == sym) {
          return t.clone()
        }
        return self.report(CompileError::new(ErrorKind::NotFound, span,
          format!("no field {sym}")))
      }
    }
    self.report(CompileError::new(ErrorKind::InvalidArgument, span,
      format!("cannot select a member of {resolved}")))
  }

  fn check_call(&mut self, e: ExprId, args: &[ExprId], span: FileSpan) -> Ty {
    let callee = args[0];
    let callee_ty = match self.hir.exprs[callee].op {
      ExprOp::Ident | ExprOp::Dot => self.check_expr(callee),
      _ => self.check_expr(callee),
    };
    let arg_tys: Vec<Ty> = args[1..].iter().map(|&a| self.check_expr(a)).collect();
    let resolved = self.ctx.resolve(&callee_ty);
    match &*resolved {
      TyKind::Poly(scheme) => {
        let scheme = scheme.clone();
        let (opened, idx) = self.ctx.open_scheme(&scheme);
        let result = self.unify_call(&opened, &arg_tys, span);
        self.ctx.pending.push((scheme, idx));
        self.hir.exprs[e].inst =
          Some(u32::try_from(idx).expect("instantiation count overflow"));
        result
      }
      _ => self.unify_call(&resolved, &arg_tys, span),
    }
  }

  fn unify_call(&mut self, callee: &Ty, arg_tys: &[Ty], span: FileSpan) -> Ty {
    match &*self.ctx.resolve(callee) {
      TyKind::Fn(params, ret) => {
        if params.len() != arg_tys.len() {
          return self.report(CompileError::new(ErrorKind::InvalidArgument, span,
            format!("expected {} arguments, found {}", params.len(), arg_tys.len())))
        }
        for (p, a) in params.iter().zip(arg_tys) {
          self.unify_or_report(p, a, span);
        }
        self.ctx.apply(ret)
      }
      TyKind::Var(..) => {
        let ret = self.ctx.fresh_user();
        let want = Rc::new(TyKind::Fn(arg_tys.to_vec().into(), ret.clone()));
        self.unify_or_report(callee, &want, span);
        ret
      }
      other => self.report(CompileError::new(ErrorKind::InvalidArgument, span,
        format!("cannot call a value of type {other}"))),
    }
  }
}

/// Run inference over the whole program: modules first, then `main`,
/// then any remaining functions, accumulating diagnostics in the
/// context. Unit tests are only checked when the driver compiles them.
pub fn check_program(
  ctx: &mut InferCtx, hir: &mut Hir, names: &HashMap<Symbol, Entity>, unit_tests: bool,
) {
  let mut order: Vec<FuncId> = vec![];
  for path in hir.paths.iter() {
    order.extend(path.modules.iter().copied());
  }
  if let Some(main) = hir.main { order.push(main) }
  order.extend(hir.funcs.enum_iter().map(|(f, _)| f));
  for f in order {
    if hir.funcs[f].kind == FuncKind::Unittest && !unit_tests { continue }
    check_func(ctx, hir, names, f);
  }
  finalize_program(ctx, hir);
}

/// Store resolved types back onto every annotated expression and
/// variable, defaulting leftover integer width families to 64 bits, and
/// ground every recorded instantiation.
fn finalize_program(ctx: &mut InferCtx, hir: &mut Hir) {
  for (scheme, idx) in std::mem::take(&mut ctx.pending) {
    ctx.ground_instantiation(&scheme, idx);
  }
  for e in hir.exprs.iter_mut() {
    if let Some(ty) = &e.ty {
      let t = ctx.finalize(ty);
      match &*t {
        TyKind::Int(it) => e.width = it.width(),
        TyKind::Float(sz) => e.width = sz.bits(),
        _ => {}
      }
      e.ty = Some(t);
    }
  }
  for v in hir.vars.iter_mut() {
    if let Some(ty) = &v.ty { v.ty = Some(ctx.finalize(ty)) }
  }
  for f in hir.funcs.iter_mut() {
    if let Some(ty) = &f.ty { f.ty = Some(ctx.finalize(ty)) }
  }
}

/// The id of a local in the checker's tables, for tests and debugging.
#[must_use] pub fn local_of(hir: &Hir, f: FuncId, name: Symbol) -> Option<LocalId> {
  hir.vars.enum_iter()
    .find(|(_, v)| v.func == f && v.name == name && v.kind == VarKind::Local)
    .map(|(id, _)| id)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::intern;

  fn span() -> FileSpan { FileSpan::new(intern("/t.vl"), 1) }

  #[test]
  fn unify_concrete_widths() {
    let mut ctx = InferCtx::new();
    let t = ctx.unify(&TyKind::uint(64), &TyKind::uint(64), span()).unwrap();
    assert_eq!(t.to_string(), "u64");
    assert!(ctx.unify(&TyKind::uint(64), &TyKind::uint(32), span()).is_err());
    assert!(ctx.unify(&TyKind::uint(64), &TyKind::int(64), span()).is_err());
  }

  #[test]
  fn anyint_binds_width_family() {
    let mut ctx = InferCtx::new();
    let any = Rc::new(TyKind::AnyInt(false));
    let t = ctx.unify(&any, &TyKind::uint(32), span()).unwrap();
    assert_eq!(t.to_string(), "u32");
    assert!(ctx.unify(&Rc::new(TyKind::AnyInt(true)), &TyKind::uint(32), span()).is_err());
  }

  #[test]
  fn var_binding_goes_through_chains() {
    let mut ctx = InferCtx::new();
    let a = ctx.fresh_user();
    let b = ctx.fresh_user();
    ctx.unify(&a, &b, span()).unwrap();
    ctx.unify(&b, &TyKind::string(), span()).unwrap();
    assert_eq!(ctx.apply(&a).to_string(), "string");
  }

  #[test]
  fn representative_prefers_earliest_user_var() {
    let mut ctx = InferCtx::new();
    let a = ctx.fresh_user(); // $1
    let b = ctx.fresh_user(); // $2
    ctx.unify(&b, &a, span()).unwrap();
    assert_eq!(ctx.resolve(&b).to_string(), "$1");
    let c = ctx.fresh_open(None); // $-1
    let d = ctx.fresh_open(None); // $-2
    ctx.unify(&d, &c, span()).unwrap();
    assert_eq!(ctx.resolve(&d).to_string(), "$-1");
  }

  #[test]
  fn occurs_check_rejects_cycles() {
    let mut ctx = InferCtx::new();
    let a = ctx.fresh_user();
    let arr = Rc::new(TyKind::Array(a.clone()));
    assert!(ctx.unify(&a, &arr, span()).is_err());
  }

  #[test]
  fn choice_intersection_narrows() {
    let mut ctx = InferCtx::new();
    let nums = TyKind::choice(number_class());
    let t = ctx.intersect(&nums, &TyKind::uint(16), span()).unwrap().unwrap();
    assert_eq!(t.to_string(), "u16");
    let ints = TyKind::choice(integer_class());
    let t = ctx.intersect(&nums, &ints, span()).unwrap().unwrap();
    assert_eq!(t.to_string(), "int | uint");
    assert!(ctx.intersect(&ints, &TyKind::string(), span()).unwrap().is_none());
  }

  #[test]
  fn constrained_var_rejects_outside_class() {
    let mut ctx = InferCtx::new();
    let v = ctx.fresh_open(Some(TyKind::choice(integer_class())));
    assert!(ctx.unify(&v, &TyKind::string(), span()).is_err());
    let v = ctx.fresh_open(Some(TyKind::choice(integer_class())));
    let t = ctx.unify(&v, &TyKind::int(8), span()).unwrap();
    assert_eq!(t.to_string(), "i8");
  }

  #[test]
  fn generalize_then_open() {
    let mut ctx = InferCtx::new();
    let a = ctx.fresh_user();
    let f = Rc::new(TyKind::Fn(Box::new([a.clone()]), a));
    let poly = ctx.generalize(&f);
    let TyKind::Poly(scheme) = &*poly else { panic!("expected a scheme") };
    assert_eq!(scheme.bounds.len(), 1);
    let (opened1, _) = ctx.open_scheme(scheme);
    let (opened2, _) = ctx.open_scheme(scheme);
    // Two openings use distinct fresh variables.
    let TyKind::Fn(p1, _) = &*opened1 else { panic!() };
    let TyKind::Fn(p2, _) = &*opened2 else { panic!() };
    assert_ne!(p1[0].to_string(), p2[0].to_string());
    ctx.unify(&p1[0], &TyKind::uint(64), span()).unwrap();
    ctx.unify(&p2[0], &TyKind::string(), span()).unwrap();
    ctx.ground_instantiation(scheme, 0);
    ctx.ground_instantiation(scheme, 1);
    let insts = scheme.insts.borrow();
    assert_eq!(insts.len(), 2);
    assert_eq!(insts[0].bindings[0].to_string(), "u64");
    assert_eq!(insts[1].bindings[0].to_string(), "string");
  }

  #[test]
  fn finalize_defaults_to_64_bits() {
    let ctx = InferCtx::new();
    let t = ctx.finalize(&Rc::new(TyKind::AnyInt(false)));
    assert_eq!(t.to_string(), "u64");
    let t = ctx.finalize(&Rc::new(TyKind::Array(Rc::new(TyKind::AnyInt(true)))));
    assert_eq!(t.to_string(), "[i64]");
  }
}
