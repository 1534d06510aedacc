//! End-to-end scenarios: build a program graph the way the parser
//! collaborator would, run the pipeline, and inspect the emitted C.

use veilc::{Compiler, Config, intern};
use veilc::types::FileSpan;
use veilc::types::entity::{ExprOp, FuncKind, Linkage, StmtKind};
use veilc::types::hir::{ExprId, FuncId};
use veilc::types::ty::TyKind;
use veilc::types::value::Value;

fn span() -> FileSpan { FileSpan::new(intern("/test/main.vl"), 1) }

fn compiler() -> Compiler { Compiler::new(Config::default()) }

fn new_main(c: &mut Compiler) -> FuncId {
  let f = c.hir.new_function(
    intern("main"), FuncKind::Plain, Linkage::Module, span(), None);
  c.hir.main = Some(f);
  c.register_func(f);
  f
}

fn uint(c: &mut Compiler, n: u64, width: u32) -> ExprId {
  c.hir.new_const(span(), Value::Uint(n.into(), width))
}

fn int(c: &mut Compiler, n: i64, width: u32) -> ExprId {
  c.hir.new_const(span(), Value::Int(n.into(), width))
}

fn string(c: &mut Compiler, s: &str) -> ExprId {
  c.hir.new_const(span(), Value::Str(s.into()))
}

/// `println <arg>`.
fn println_stmt(c: &mut Compiler, f: FuncId, arg: ExprId) {
  let body = c.hir.funcs[f].body;
  let s = c.hir.new_stmt(StmtKind::Println, span(), Some(arg), None);
  c.hir.append_stmt(body, s);
}

/// `"<fmt>" % (args...)`.
fn format(c: &mut Compiler, fmt: &str, args: &[ExprId]) -> ExprId {
  let lhs = string(c, fmt);
  let rhs = if args.len() == 1 {
    args[0]
  } else {
    let t = c.hir.new_expr(ExprOp::TupleLit, span());
    for &a in args { c.hir.add_child(t, a) }
    t
  };
  c.hir.new_binary(ExprOp::Mod, span(), lhs, rhs)
}

/// `<typeof(of)> <n>`.
fn cast_like(c: &mut Compiler, of: ExprId, n: u64) -> ExprId {
  let ty = c.hir.new_unary(ExprOp::TypeOf, span(), of);
  let v = uint(c, n, 0);
  c.hir.new_binary(ExprOp::Cast, span(), ty, v)
}

fn call(c: &mut Compiler, name: &str, args: &[ExprId]) -> ExprId {
  let callee = c.hir.new_ident(span(), intern(name));
  let e = c.hir.new_unary(ExprOp::Call, span(), callee);
  for &a in args { c.hir.add_child(e, a) }
  e
}

#[test]
fn hello_world() {
  let mut c = compiler();
  let main = new_main(&mut c);
  let lit = string(&mut c, "Hello, World!");
  println_stmt(&mut c, main, lit);

  let out = c.compile().unwrap();
  assert!(out.contains("#include <stdio.h>"), "{out}");
  assert!(out.contains("tostring_string(\"Hello, World!\\n\");"), "{out}");
  assert!(out.contains("printf(\"%s\", GlobalStringWriter_string());"), "{out}");
  assert!(out.contains("int main(void) {"), "{out}");
  // The writer helpers land before main.
  assert!(out.find("GlobalStringWriter_reset(void)").unwrap()
    < out.find("int main").unwrap(), "{out}");
}

#[test]
fn formatted_sum_widens_to_pri32() {
  let mut c = compiler();
  let main = new_main(&mut c);
  let a = int(&mut c, 1, 32);
  let b = int(&mut c, 2, 32);
  let sum = c.hir.new_binary(ExprOp::Add, span(), a, b);
  let fmt = format(&mut c, "This is a sum: %i32", &[sum]);
  println_stmt(&mut c, main, fmt);

  let out = c.compile().unwrap();
  assert!(out.contains("#include <inttypes.h>"), "{out}");
  assert!(out.contains(
    "GlobalStringWriter_write(\"This is a sum: %\" PRId32 \"\\n\", i32_add(1, 2));"),
    "{out}");
  assert!(out.contains("static inline int32_t i32_add(int32_t a, int32_t b)"), "{out}");
  // One shared 64 bit core backs the width wrappers.
  assert_eq!(out.matches("static int64_t veil_add64(").count(), 1, "{out}");
}

#[test]
fn rotate_left_defaults_to_u64() {
  let mut c = compiler();
  let main = new_main(&mut c);
  let v = uint(&mut c, 7, 0);
  let d = uint(&mut c, 4, 0);
  let rot = c.hir.new_binary(ExprOp::Rotl, span(), v, d);
  let fmt = format(&mut c, "This is rotate left: 0x%x", &[rot]);
  println_stmt(&mut c, main, fmt);

  let out = c.compile().unwrap();
  assert!(out.contains("u64_rotl(7, (4) % 64)"), "{out}");
  assert!(out.contains("static inline uint64_t u64_rotl(uint64_t v, uint64_t d)"), "{out}");
  assert!(out.contains("PRIx64"), "{out}");
}

#[test]
fn assigned_variable_prints_through_priu64() {
  let mut c = compiler();
  let main = new_main(&mut c);
  let one = uint(&mut c, 1, 64);
  let a = c.hir.new_ident(span(), intern("a"));
  let assign = c.hir.new_binary(ExprOp::Assign, span(), a, one);
  let body = c.hir.funcs[main].body;
  let s = c.hir.new_stmt(StmtKind::Assign, span(), Some(assign), None);
  c.hir.append_stmt(body, s);
  let a2 = c.hir.new_ident(span(), intern("a"));
  let fmt = format(&mut c, "a=%u64", &[a2]);
  println_stmt(&mut c, main, fmt);

  let out = c.compile().unwrap();
  assert!(out.contains("uint64_t a = 1;"), "{out}");
  assert!(out.contains("GlobalStringWriter_write(\"a=%\" PRIu64 \"\\n\", a);"), "{out}");
}

/// `fact(n) { if n == <n>0 { return <n>1 } else { return n * fact(n - <n>1) } }`
fn build_fact(c: &mut Compiler) -> FuncId {
  let fact = c.hir.new_function(
    intern("fact"), FuncKind::Plain, Linkage::Module, span(), None);
  c.register_func(fact);
  let n = intern("n");
  c.hir.new_param(fact, n, span(), None);
  let body = c.hir.funcs[fact].body;

  // if n == <n>0
  let n1 = c.hir.new_ident(span(), n);
  let n2 = c.hir.new_ident(span(), n);
  let zero = cast_like(c, n2, 0);
  let cond = c.hir.new_binary(ExprOp::Eq, span(), n1, zero);
  let then_block = c.hir.new_block(span());
  let n3 = c.hir.new_ident(span(), n);
  let one = cast_like(c, n3, 1);
  let ret1 = c.hir.new_stmt(StmtKind::Return, span(), Some(one), None);
  c.hir.append_stmt(then_block, ret1);
  let if_stmt = c.hir.new_stmt(StmtKind::If, span(), Some(cond), Some(then_block));
  c.hir.append_stmt(body, if_stmt);

  // else return n * fact(n - <n>1)
  let else_block = c.hir.new_block(span());
  let n4 = c.hir.new_ident(span(), n);
  let n5 = c.hir.new_ident(span(), n);
  let n6 = c.hir.new_ident(span(), n);
  let one2 = cast_like(c, n6, 1);
  let sub = c.hir.new_binary(ExprOp::Sub, span(), n5, one2);
  let rec = call(c, "fact", &[sub]);
  let mul = c.hir.new_binary(ExprOp::Mul, span(), n4, rec);
  let ret2 = c.hir.new_stmt(StmtKind::Return, span(), Some(mul), None);
  c.hir.append_stmt(else_block, ret2);
  let else_stmt = c.hir.new_stmt(StmtKind::Else, span(), None, Some(else_block));
  c.hir.append_stmt(body, else_stmt);
  fact
}

#[test]
fn factorial_specializes_at_u64() {
  let mut c = compiler();
  build_fact(&mut c);
  let main = new_main(&mut c);
  let six = uint(&mut c, 6, 64);
  let fc = call(&mut c, "fact", &[six]);
  let fmt = format(&mut c, "%u64", &[fc]);
  println_stmt(&mut c, main, fmt);

  let out = c.compile().unwrap();
  assert!(out.contains("static uint64_t fact_u64(uint64_t n)"), "{out}");
  assert!(out.contains("fact_u64(6)"), "{out}");
  // The recursive call resolves to the same specialization.
  assert!(out.contains("u64_mul(n, fact_u64(u64_sub(n, (uint64_t)(1))))"), "{out}");
  // The checked helpers carry the runtime diagnostics.
  assert!(out.contains("raise(\"Underflow\")"), "{out}");
  assert!(out.contains("raise(\"Overflow\")"), "{out}");
  // Forward declarations come before the definitions.
  assert!(out.contains("static uint64_t fact_u64(uint64_t n);"), "{out}");
}

#[test]
fn identity_gets_two_ground_instantiations() {
  let mut c = compiler();
  let id = c.hir.new_function(
    intern("id"), FuncKind::Plain, Linkage::Module, span(), None);
  c.register_func(id);
  let x = intern("x");
  c.hir.new_param(id, x, span(), None);
  let body = c.hir.funcs[id].body;
  let xr = c.hir.new_ident(span(), x);
  let ret = c.hir.new_stmt(StmtKind::Return, span(), Some(xr), None);
  c.hir.append_stmt(body, ret);

  let main = new_main(&mut c);
  let one = uint(&mut c, 1, 64);
  let c1 = call(&mut c, "id", &[one]);
  let mbody = c.hir.funcs[main].body;
  let s1 = c.hir.new_stmt(StmtKind::Call, span(), Some(c1), None);
  c.hir.append_stmt(mbody, s1);
  let lit = string(&mut c, "s");
  let c2 = call(&mut c, "id", &[lit]);
  let s2 = c.hir.new_stmt(StmtKind::Call, span(), Some(c2), None);
  c.hir.append_stmt(mbody, s2);

  let out = c.compile().unwrap();
  assert!(out.contains("static uint64_t id_u64(uint64_t x)"), "{out}");
  assert!(out.contains("static string id_string(string x)"), "{out}");

  // The scheme carries both instantiations, ground, in creation order.
  let fid = match c.names[&intern("id")] {
    veilc::Entity::Func(f) => f,
    _ => panic!("id should be a function"),
  };
  let ty = c.hir.funcs[fid].ty.clone().unwrap();
  let TyKind::Poly(scheme) = &*ty else { panic!("id should be polymorphic") };
  let insts = scheme.insts.borrow();
  assert_eq!(insts.len(), 2);
  assert_eq!(insts[0].bindings[0].to_string(), "u64");
  assert_eq!(insts[1].bindings[0].to_string(), "string");
}

#[test]
fn tuple_shape_synthesizes_once_before_use() {
  let mut c = compiler();
  let main = new_main(&mut c);
  let body = c.hir.funcs[main].body;

  // x = (1u64, "s")
  let one = uint(&mut c, 1, 64);
  let lit = string(&mut c, "s");
  let tup = c.hir.new_expr(ExprOp::TupleLit, span());
  c.hir.add_child(tup, one);
  c.hir.add_child(tup, lit);
  let x = c.hir.new_ident(span(), intern("x"));
  let assign = c.hir.new_binary(ExprOp::Assign, span(), x, tup);
  let s = c.hir.new_stmt(StmtKind::Assign, span(), Some(assign), None);
  c.hir.append_stmt(body, s);

  // println "%u64" % x[0]
  let x2 = c.hir.new_ident(span(), intern("x"));
  let zero = uint(&mut c, 0, 0);
  let ix = c.hir.new_binary(ExprOp::Index, span(), x2, zero);
  let fmt = format(&mut c, "%u64", &[ix]);
  println_stmt(&mut c, main, fmt);

  let out = c.compile().unwrap();
  assert_eq!(out.matches("} tup_u64_string_t;").count(), 1, "{out}");
  assert!(out.contains("tup_u64_string_t x = tup_u64_string(1, \"s\");"), "{out}");
  assert!(out.contains(", x.el0);"), "{out}");
  // The typedef lands before main uses it.
  assert!(out.find("} tup_u64_string_t;").unwrap() < out.find("int main").unwrap(), "{out}");
}

#[test]
fn truncating_add_wraps_without_helpers() {
  let mut c = compiler();
  let main = new_main(&mut c);
  let body = c.hir.funcs[main].body;
  let a = int(&mut c, 32767, 16);
  let b = int(&mut c, 1, 16);
  let sum = c.hir.new_binary(ExprOp::AddTrunc, span(), a, b);
  let x = c.hir.new_ident(span(), intern("x"));
  let assign = c.hir.new_binary(ExprOp::Assign, span(), x, sum);
  let s = c.hir.new_stmt(StmtKind::Assign, span(), Some(assign), None);
  c.hir.append_stmt(body, s);

  let out = c.compile().unwrap();
  // Truncation is a plain C cast, with no checked helper or raise.
  assert!(out.contains("int16_t x = (int16_t)(32767 + 1);"), "{out}");
  assert!(!out.contains("veil_add64"), "{out}");
}

#[test]
fn type_errors_accumulate() {
  let mut c = compiler();
  let main = new_main(&mut c);
  let body = c.hir.funcs[main].body;
  for _ in 0..2 {
    let a = uint(&mut c, 1, 64);
    let b = string(&mut c, "s");
    let bad = c.hir.new_binary(ExprOp::BitAnd, span(), a, b);
    let s = c.hir.new_stmt(StmtKind::Call, span(), Some(bad), None);
    c.hir.append_stmt(body, s);
  }
  let errs = c.typecheck().unwrap_err();
  assert!(errs.len() >= 2, "expected two diagnostics, got {errs:?}");
  assert!(errs.iter().all(|e| e.kind == veilc::ErrorKind::TypeMismatch));
}

#[test]
fn compile_to_disk() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("out.c");
  let mut c = compiler();
  c.config.out_c = Some(path.clone());
  let main = new_main(&mut c);
  let lit = string(&mut c, "hi");
  println_stmt(&mut c, main, lit);
  let written = c.compile_to_path().unwrap();
  assert_eq!(written, path);
  let text = std::fs::read_to_string(&path).unwrap();
  assert!(text.contains("int main(void)"));
}
