//! Polymorphic specialization.
//!
//! Inference records one instantiation on a scheme per call site. This
//! pass walks the monomorphic entry points, collects the ground
//! instantiations of every reachable polymorphic function, dedupes them
//! by mangled name, and hands codegen one specialization record per
//! distinct C function to emit.

use hashbrown::HashMap;
use log::debug;

use crate::error::{CompileError, ErrorKind, Result};
use crate::types::entity::{Entity, ExprOp};
use crate::types::hir::{ExprId, FuncId, Hir};
use crate::types::ty::{Ty, TyKind};
use crate::Symbol;

/// Produce the mangling of a ground type: `i<w>`, `u<w>`, `f<w>`,
/// `bool`, `string`, the element mangling plus `_array` for arrays, or
/// the `_`-joined element manglings for tuples and structs.
pub fn mangle(ty: &Ty) -> Result<String> {
  match &**ty {
    TyKind::Int(it) => {
      if it.width() > 64 {
        return Err(CompileError::unlocated(ErrorKind::Unimplemented,
          format!("integer width {} exceeds 64 bits", it.width())))
      }
      Ok(it.to_string())
    }
    TyKind::Float(sz) => Ok(sz.to_string()),
    TyKind::Name(s, args) if args.is_empty() => Ok(s.as_str().to_owned()),
    TyKind::Array(el) => Ok(format!("{}_array", mangle(el)?)),
    TyKind::Tuple(tys) => {
      let parts = tys.iter().map(mangle).collect::<Result<Vec<_>>>()?;
      Ok(parts.join("_"))
    }
    TyKind::Struct(fields) => {
      let parts = fields.iter().map(|(_, t)| mangle(t)).collect::<Result<Vec<_>>>()?;
      Ok(parts.join("_"))
    }
    _ => Err(CompileError::unlocated(ErrorKind::Internal,
      format!("cannot mangle the non-ground type {ty}"))),
  }
}

/// The specialized C name of a function instantiated with `bindings`.
pub fn specialized_name(base: Symbol, bindings: &[Ty]) -> Result<String> {
  let mut name = base.as_str().to_owned();
  for t in bindings {
    name.push('_');
    name.push_str(&mangle(t)?);
  }
  Ok(name)
}

/// One monomorphic rendition of a polymorphic function.
#[derive(Clone, Debug)]
pub struct Specialization {
  /// The mangled C name.
  pub name: String,
  /// Bound variable id to the ground type substituted for it.
  pub bindings: HashMap<i32, Ty>,
  /// The ground function type of this rendition.
  pub fn_ty: Ty,
}

/// The output of the specialization pass.
#[derive(Debug, Default)]
pub struct Specializations {
  /// Per polymorphic function: distinct specializations in creation order.
  pub funcs: HashMap<FuncId, Vec<Specialization>>,
  /// Every function reachable from an entry point, in discovery order.
  pub reachable: Vec<FuncId>,
}

impl Specializations {
  /// Find the specialization a call resolved to, by mangled name.
  #[must_use] pub fn lookup(&self, f: FuncId, name: &str) -> Option<&Specialization> {
    self.funcs.get(&f)?.iter().find(|s| s.name == name)
  }
}

/// Walk the program from its monomorphic entry points and build the
/// specialization table. Unit tests are extra entry points when the
/// driver asked for them. Instantiations whose bindings failed to ground
/// are reported as errors.
pub fn specialize(
  hir: &Hir, names: &HashMap<Symbol, Entity>, unit_tests: bool,
) -> Result<Specializations> {
  let mut out = Specializations::default();
  let mut stack: Vec<FuncId> = vec![];
  for path in hir.paths.iter() {
    stack.extend(path.modules.iter().copied());
  }
  if let Some(main) = hir.main { stack.push(main) }
  if unit_tests {
    stack.extend(hir.funcs.enum_iter()
      .filter(|(_, func)| func.kind == crate::types::entity::FuncKind::Unittest)
      .map(|(f, _)| f));
  }
  let mut seen = vec![false; hir.funcs.len()];
  while let Some(f) = stack.pop() {
    if std::mem::replace(&mut seen[crate::types::Idx::into_usize(f)], true) { continue }
    out.reachable.push(f);
    collect_callees(hir, names, hir.funcs[f].body, &mut stack);
    stack.extend(hir.funcs[f].subfuncs.iter().copied());
  }

  for &f in &out.reachable {
    let Some(ty) = &hir.funcs[f].ty else { continue };
    let TyKind::Poly(scheme) = &**ty else { continue };
    let mut specs: Vec<Specialization> = vec![];
    for inst in scheme.insts.borrow().iter() {
      for t in &*inst.bindings {
        if t.has_vars() {
          return Err(CompileError::new(ErrorKind::Internal, hir.funcs[f].span,
            format!("instantiation of {} is not ground: {t}", hir.funcs[f].name)))
        }
      }
      let name = specialized_name(hir.funcs[f].name, &inst.bindings)?;
      if specs.iter().any(|s| s.name == name) { continue }
      let bindings = scheme.bounds.iter().zip(&*inst.bindings)
        .map(|(b, t)| (b.var.0, t.clone()))
        .collect();
      debug!("specializing {} as {name}", hir.funcs[f].name);
      specs.push(Specialization { name, bindings, fn_ty: inst.ty.clone() });
    }
    out.funcs.insert(f, specs);
  }
  Ok(out)
}

fn collect_callees(
  hir: &Hir, names: &HashMap<Symbol, Entity>, block: crate::types::hir::BlockId,
  stack: &mut Vec<FuncId>,
) {
  for &s in &hir.blocks[block].stmts {
    if let Some(e) = hir.stmts[s].expr { collect_expr_callees(hir, names, e, stack) }
    if let Some(b) = hir.stmts[s].body { collect_callees(hir, names, b, stack) }
  }
}

fn collect_expr_callees(
  hir: &Hir, names: &HashMap<Symbol, Entity>, e: ExprId, stack: &mut Vec<FuncId>,
) {
  if hir.exprs[e].op == ExprOp::Call {
    if let Some(sym) = hir.ident_sym(hir.exprs[e].args[0]) {
      if let Some(&Entity::Func(f)) = names.get(&sym) {
        stack.push(f);
      }
    }
  }
  for &a in &hir.exprs[e].args {
    collect_expr_callees(hir, names, a, stack);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::rc::Rc;

  #[test]
  fn mangling() {
    assert_eq!(mangle(&TyKind::uint(64)).unwrap(), "u64");
    assert_eq!(mangle(&TyKind::int(7)).unwrap(), "i7");
    assert_eq!(mangle(&TyKind::bool()).unwrap(), "bool");
    assert_eq!(mangle(&TyKind::string()).unwrap(), "string");
    let tup = Rc::new(TyKind::Tuple(Box::new([TyKind::uint(8), TyKind::string()])));
    assert_eq!(mangle(&tup).unwrap(), "u8_string");
    let arr = Rc::new(TyKind::Array(TyKind::uint(64)));
    assert_eq!(mangle(&arr).unwrap(), "u64_array");
    assert!(mangle(&TyKind::uint(128)).is_err());
    assert!(mangle(&Rc::new(TyKind::AnyInt(false))).is_err());
  }

  #[test]
  fn specialized_names() {
    let f = crate::intern("id");
    let name = specialized_name(f, &[TyKind::uint(64)]).unwrap();
    assert_eq!(name, "id_u64");
    let name = specialized_name(f, &[TyKind::string(), TyKind::int(32)]).unwrap();
    assert_eq!(name, "id_string_i32");
  }
}
