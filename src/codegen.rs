//! The C backend.
//!
//! Walks the specialized program graph and produces one C11 translation
//! unit: the runtime prelude (from the [`RuntimeReg`]), synthesized
//! tuple/array/struct typedefs in dependency order, forward declarations,
//! function definitions, and `main`. A declaration table keyed by C
//! identifier plus a per-function dependency stack guarantee that every
//! referenced declaration is emitted before its first use.

use std::fmt::Write as _;
use std::rc::Rc;

use hashbrown::{HashMap, HashSet};
use itertools::Itertools;
use log::debug;

use crate::Symbol;
use crate::error::{CompileError, ErrorKind, Result};
use crate::escape::escape;
use crate::runtime::{CheckedOp, RuntimeReg, c_int_type};
use crate::specialize::{Specializations, mangle, specialized_name};
use crate::types::{FileSpan, FloatSize, IntTy};
use crate::types::entity::{ArrayMethod, Entity, ExprOp, FuncKind, StmtKind};
use crate::types::hir::{BlockId, ExprId, FuncId, Hir, StmtId};
use crate::types::ty::{Ty, TyKind};
use crate::types::value::Value;

/// What a table entry declares.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum DeclKind {
  /// A synthesized typedef (tuple, array, or struct shape).
  Typedef,
  /// A function definition with a forward declaration.
  Func,
}

/// One entry of the declaration table.
#[derive(Debug)]
struct Decl {
  name: String,
  kind: DeclKind,
  /// The forward declaration, for functions.
  fwd: String,
  /// The full definition text.
  code: String,
  /// Names of declarations that must emit before this one.
  deps: Vec<String>,
}

/// The C emission context.
pub struct CodeGen<'a> {
  hir: &'a Hir,
  names: &'a HashMap<Symbol, Entity>,
  specs: &'a Specializations,
  /// The runtime-feature registry filled during the walk.
  pub reg: RuntimeReg,
  decls: Vec<Decl>,
  decl_index: HashMap<String, usize>,
  /// One list per currently-open function body: the top-level names the
  /// open function references.
  dep_stack: Vec<Vec<String>>,
  /// Type variable bindings of the specialization being emitted.
  subst: HashMap<i32, Ty>,
  /// Locals already declared in the open function.
  declared: HashSet<Symbol>,
  /// Fresh-name counter for loop indexes.
  gensym: u32,
}

impl<'a> CodeGen<'a> {
  /// Construct a code generator over a checked and specialized program.
  #[must_use] pub fn new(
    hir: &'a Hir, names: &'a HashMap<Symbol, Entity>, specs: &'a Specializations,
  ) -> Self {
    CodeGen {
      hir, names, specs,
      reg: RuntimeReg::new(),
      decls: vec![],
      decl_index: HashMap::new(),
      dep_stack: vec![],
      subst: HashMap::new(),
      declared: HashSet::new(),
      gensym: 0,
    }
  }

  /// Generate the whole translation unit.
  pub fn emit_unit(mut self) -> Result<String> {
    let mut inits = vec![];
    let mut tests = vec![];
    for &f in &self.specs.reachable.clone() {
      if Some(f) == self.hir.main { continue }
      match self.hir.funcs[f].kind {
        FuncKind::Module => {
          let name = format!("{}_init", self.hir.funcs[f].name);
          self.gen_function(f, &name, None)?;
          inits.push(name);
        }
        // Unit tests are only reachable when the driver asked for them;
        // they run after the user body.
        FuncKind::Unittest => {
          let name = format!("{}_test", self.hir.funcs[f].name);
          self.gen_function(f, &name, None)?;
          tests.push(name);
        }
        FuncKind::Struct | FuncKind::Enum | FuncKind::Transformer => {}
        _ => {
          let Some(ty) = self.hir.funcs[f].ty.clone() else { continue };
          if let TyKind::Poly(_) = &*ty {
            let specs: Vec<_> =
              self.specs.funcs.get(&f).into_iter().flatten().cloned().collect();
            for spec in specs {
              self.subst = spec.bindings.clone();
              self.gen_function(f, &spec.name, Some(&spec.fn_ty))?;
              self.subst = HashMap::new();
            }
          } else {
            let name = self.hir.funcs[f].name.as_str().to_owned();
            self.gen_function(f, &name, None)?;
          }
        }
      }
    }
    let main_code = match self.hir.main {
      Some(main) => self.gen_main(main, &inits, &tests)?,
      None => String::new(),
    };

    let mut out = String::new();
    self.reg.emit_prelude(&mut out)?;
    self.emit_decls(&mut out)?;
    out.push_str(&main_code);
    Ok(out)
  }

  /// Emit typedefs in dependency order, then function forward
  /// declarations, then function definitions in dependency order with
  /// insertion order as the tie break.
  fn emit_decls(&self, out: &mut String) -> Result<()> {
    self.emit_topo(out, DeclKind::Typedef, true)?;
    for d in &self.decls {
      if d.kind == DeclKind::Func {
        out.push_str(&d.fwd);
        out.push('\n');
      }
    }
    out.push('\n');
    self.emit_topo(out, DeclKind::Func, false)?;
    Ok(())
  }

  fn emit_topo(&self, out: &mut String, kind: DeclKind, reject_cycles: bool) -> Result<()> {
    let mut marks = vec![0u8; self.decls.len()];
    fn visit(
      cg: &CodeGen<'_>, i: usize, kind: DeclKind, reject: bool,
      marks: &mut Vec<u8>, out: &mut String,
    ) -> Result<()> {
      match marks[i] {
        2 => return Ok(()),
        1 => {
          // Recursive functions are legal; recursive value types are not.
          if reject {
            return Err(CompileError::unlocated(ErrorKind::InvalidArgument,
              format!("recursive type definition through {}", cg.decls[i].name)))
          }
          return Ok(())
        }
        _ => {}
      }
      marks[i] = 1;
      for dep in &cg.decls[i].deps {
        if let Some(&j) = cg.decl_index.get(dep) {
          if cg.decls[j].kind == kind {
            visit(cg, j, kind, reject, marks, out)?;
          }
        }
      }
      marks[i] = 2;
      out.push_str(&cg.decls[i].code);
      out.push('\n');
      Ok(())
    }
    for i in 0..self.decls.len() {
      if self.decls[i].kind == kind {
        visit(self, i, kind, reject_cycles, &mut marks, out)?;
      }
    }
    Ok(())
  }

  fn add_decl(
    &mut self, name: String, kind: DeclKind, fwd: String, code: String, deps: Vec<String>,
  ) {
    if self.decl_index.contains_key(&name) { return }
    self.decl_index.insert(name.clone(), self.decls.len());
    self.decls.push(Decl { name, kind, fwd, code, deps });
  }

  /// Record that the open function references a top-level declaration.
  fn reference_decl(&mut self, name: &str) {
    if let Some(top) = self.dep_stack.last_mut() {
      if !top.iter().any(|n| n == name) { top.push(name.to_owned()) }
    }
  }

  fn fresh_name(&mut self, prefix: &str) -> String {
    self.gensym += 1;
    format!("{prefix}{}", self.gensym)
  }

  // == Types ==============================================================

  /// The finalized type of an expression, with the current
  /// specialization's bindings substituted in.
  fn expr_ty(&self, e: ExprId) -> Result<Ty> {
    let span = self.hir.exprs[e].span;
    let ty = self.hir.exprs[e].ty.clone().ok_or_else(|| {
      CompileError::new(ErrorKind::Internal, span, "expression was not typed")
    })?;
    if self.subst.is_empty() { return Ok(ty) }
    Ok(crate::infer::subst_vars(&ty, &self.subst))
  }

  /// The C type of a source type, registering synthesized typedefs.
  pub fn c_type(&mut self, ty: &Ty, span: FileSpan) -> Result<String> {
    match &**ty {
      TyKind::Int(it) => {
        if it.width() > 64 {
          return Err(CompileError::new(ErrorKind::Unimplemented, span,
            format!("integer width {} exceeds 64 bits", it.width())))
        }
        self.reg.add_include("stdint.h");
        Ok(c_int_type(it.signed(), it.width()).to_owned())
      }
      TyKind::AnyInt(signed) => {
        self.reg.add_include("stdint.h");
        Ok(c_int_type(*signed, 64).to_owned())
      }
      TyKind::Float(FloatSize::F32) => Ok("float".to_owned()),
      TyKind::Float(FloatSize::F64) => Ok("double".to_owned()),
      TyKind::Name(s, args) if args.is_empty() => {
        match s.as_str() {
          "bool" => { self.reg.demand_bool(); Ok("bool".to_owned()) }
          "string" => { self.reg.demand_string(); Ok("string".to_owned()) }
          name => match self.names.get(s) {
            Some(Entity::Type(tc)) => match tc.k.ty() {
              Some(inner) => {
                let inner = inner.clone();
                self.c_type(&inner, span)
              }
              None => Err(CompileError::new(ErrorKind::NotFound, span,
                format!("type {name} was never elaborated"))),
            },
            _ => Err(CompileError::new(ErrorKind::NotFound, span,
              format!("unknown type {name}"))),
          },
        }
      }
      TyKind::Array(el) => Ok(format!("{}_t", self.array_name(el, span)?)),
      TyKind::Tuple(tys) if tys.is_empty() => Ok("void".to_owned()),
      TyKind::Tuple(tys) => {
        let tys = tys.clone();
        Ok(format!("{}_t", self.tuple_name(&tys, span)?))
      }
      TyKind::Struct(fields) => {
        let fields = fields.clone();
        Ok(format!("{}_t", self.struct_name(&fields, span)?))
      }
      _ => Err(CompileError::new(ErrorKind::Internal, span,
        format!("no C rendition for the type {ty}"))),
    }
  }

  /// Register the typedef and initializer function for a tuple shape,
  /// returning its base name. One emission per distinct shape.
  fn tuple_name(&mut self, tys: &[Ty], span: FileSpan) -> Result<String> {
    let mut name = String::from("tup");
    for t in tys {
      name.push('_');
      name.push_str(&mangle(t)?);
    }
    if self.decl_index.contains_key(&name) { return Ok(name) }
    let mut deps = vec![];
    let mut fields = String::new();
    let mut params = vec![];
    for (i, t) in tys.iter().enumerate() {
      let ct = self.c_type(t, span)?;
      self.dep_of_type(t, &mut deps)?;
      let _ = writeln!(fields, "  {ct} el{i};");
      params.push(format!("{ct} el{i}"));
    }
    let mut code = format!("typedef struct {{\n{fields}}} {name}_t;\n\n");
    let _ = writeln!(code, "static {name}_t {name}({}) {{", params.iter().format(", "));
    let _ = writeln!(code, "  {name}_t t;");
    for i in 0..tys.len() {
      let _ = writeln!(code, "  t.el{i} = el{i};");
    }
    code.push_str("  return t;\n}\n");
    debug!("synthesizing tuple type {name}");
    self.add_decl(name.clone(), DeclKind::Typedef, String::new(), code, deps);
    Ok(name)
  }

  /// Register the typedef and helper family for an array element type,
  /// returning its base name (e.g. `u64_array`).
  fn array_name(&mut self, elem: &Ty, span: FileSpan) -> Result<String> {
    let name = format!("{}_array", mangle(elem)?);
    if self.decl_index.contains_key(&name) { return Ok(name) }
    self.reg.demand_array_runtime();
    self.reg.add_include("stdarg.h");
    let ct = self.c_type(elem, span)?;
    let va = promoted(&ct);
    let mut deps = vec![];
    self.dep_of_type(elem, &mut deps)?;
    let mut code = format!(
      "typedef struct {{\n  {ct} *data;\n  uint64_t len;\n  uint64_t cap;\n}} {name}_t;\n\n");
    let _ = write!(code, "\
static void {name}_append({name}_t *a, {ct} v) {{
  veil_array_append((veil_array_t *)a, &v, sizeof({ct}));
}}

static void {name}_concat({name}_t *a, const {name}_t *b) {{
  veil_array_concat((veil_array_t *)a, (const veil_array_t *)b, sizeof({ct}));
}}

static {name}_t {name}_join({name}_t a, {name}_t b) {{
  {name}_t r = {{NULL, 0, 0}};
  veil_array_concat((veil_array_t *)&r, (const veil_array_t *)&a, sizeof({ct}));
  veil_array_concat((veil_array_t *)&r, (const veil_array_t *)&b, sizeof({ct}));
  return r;
}}

static void {name}_reverse({name}_t *a) {{
  veil_array_reverse((veil_array_t *)a, sizeof({ct}));
}}

static {name}_t {name}_slice({name}_t a, uint64_t lo, uint64_t hi) {{
  {name}_t r = {{NULL, 0, 0}};
  uint64_t i;
  if (hi > a.len) hi = a.len;
  for (i = lo; i < hi; i++) {name}_append(&r, a.data[i]);
  return r;
}}

static {name}_t {name}_make(uint64_t n, ...) {{
  {name}_t r = {{NULL, 0, 0}};
  va_list ap;
  uint64_t i;
  va_start(ap, n);
  for (i = 0; i < n; i++) {{
    {ct} v = ({ct})va_arg(ap, {va});
    veil_array_append((veil_array_t *)&r, &v, sizeof({ct}));
  }}
  va_end(ap);
  return r;
}}
");
    debug!("synthesizing array type {name}");
    self.add_decl(name.clone(), DeclKind::Typedef, String::new(), code, deps);
    Ok(name)
  }

  /// Register the typedef for a struct shape, returning its base name.
  fn struct_name(&mut self, fields: &[(Symbol, Ty)], span: FileSpan) -> Result<String> {
    let mut name = String::from("rec");
    for (_, t) in fields {
      name.push('_');
      name.push_str(&mangle(t)?);
    }
    if self.decl_index.contains_key(&name) { return Ok(name) }
    let mut deps = vec![];
    let mut body = String::new();
    let mut params = vec![];
    for (f, t) in fields {
      let ct = self.c_type(t, span)?;
      self.dep_of_type(t, &mut deps)?;
      let _ = writeln!(body, "  {ct} {f};");
      params.push(format!("{ct} {f}"));
    }
    let mut code = format!("typedef struct {{\n{body}}} {name}_t;\n\n");
    let _ = writeln!(code, "static {name}_t {name}({}) {{", params.iter().format(", "));
    let _ = writeln!(code, "  {name}_t t;");
    for (f, _) in fields {
      let _ = writeln!(code, "  t.{f} = {f};");
    }
    code.push_str("  return t;\n}\n");
    self.add_decl(name.clone(), DeclKind::Typedef, String::new(), code, deps);
    Ok(name)
  }

  /// The synthesized-typedef dependencies of a type.
  fn dep_of_type(&mut self, ty: &Ty, deps: &mut Vec<String>) -> Result<()> {
    match &**ty {
      TyKind::Array(el) => deps.push(format!("{}_array", mangle(el)?)),
      TyKind::Tuple(tys) if !tys.is_empty() => {
        let mut name = String::from("tup");
        for t in tys {
          name.push('_');
          name.push_str(&mangle(t)?);
        }
        deps.push(name);
      }
      TyKind::Struct(fields) => {
        let mut name = String::from("rec");
        for (_, t) in fields {
          name.push('_');
          name.push_str(&mangle(t)?);
        }
        deps.push(name);
      }
      _ => {}
    }
    Ok(())
  }

  // == Functions ==========================================================

  fn gen_function(&mut self, f: FuncId, cname: &str, spec_ty: Option<&Ty>) -> Result<()> {
    let span = self.hir.funcs[f].span;
    let fn_ty = match spec_ty {
      Some(t) => t.clone(),
      None => self.hir.funcs[f].ty.clone().ok_or_else(|| {
        CompileError::new(ErrorKind::Internal, span,
          format!("function {} was not typed", self.hir.funcs[f].name))
      })?,
    };
    let (param_tys, ret) = match &*fn_ty {
      TyKind::Fn(ps, r) => (ps.clone(), r.clone()),
      TyKind::Poly(_) => return Err(CompileError::new(ErrorKind::Internal, span,
        format!("cannot emit the unspecialized polymorphic function {}",
          self.hir.funcs[f].name))),
      _ => (Box::new([]) as Box<[Ty]>, Rc::new(TyKind::Tuple(Box::new([])))),
    };
    let ret_c = self.c_type(&ret, span)?;
    let mut params = vec![];
    self.declared = HashSet::new();
    let param_ids = self.hir.funcs[f].params.clone();
    for (&p, t) in param_ids.iter().zip(&*param_tys) {
      let (name, vspan) = (self.hir.vars[p].name, self.hir.vars[p].span);
      params.push(format!("{} {name}", self.c_type(t, vspan)?));
      self.declared.insert(name);
    }
    let sig = if params.is_empty() {
      format!("static {ret_c} {cname}(void)")
    } else {
      format!("static {ret_c} {cname}({})", params.iter().format(", "))
    };

    self.dep_stack.push(vec![]);
    let mut body = String::new();
    self.gen_block(self.hir.funcs[f].body, &mut body, 1)?;
    let deps = self.dep_stack.pop().expect("balanced stack");

    debug!("emitting {cname}");
    let code = format!("{sig} {{\n{body}}}\n");
    self.add_decl(cname.to_owned(), DeclKind::Func, format!("{sig};"), code, deps);
    Ok(())
  }

  /// Emit `main`: module initializers in order, the user body, then any
  /// requested unit tests.
  fn gen_main(&mut self, main: FuncId, inits: &[String], tests: &[String]) -> Result<String> {
    self.dep_stack.push(vec![]);
    self.declared = HashSet::new();
    let param_ids = self.hir.funcs[main].params.clone();
    for p in param_ids {
      self.declared.insert(self.hir.vars[p].name);
    }
    let mut body = String::new();
    for init in inits {
      let _ = writeln!(body, "  {init}();");
    }
    self.gen_block(self.hir.funcs[main].body, &mut body, 1)?;
    for test in tests {
      let _ = writeln!(body, "  {test}();");
    }
    body.push_str("  return 0;\n");
    self.dep_stack.pop();
    Ok(format!("int main(void) {{\n{body}}}\n"))
  }

  // == Statements =========================================================

  fn gen_block(&mut self, b: BlockId, out: &mut String, depth: usize) -> Result<()> {
    for s in self.hir.stmt_ids(b) {
      self.gen_stmt(s, out, depth)?;
    }
    Ok(())
  }

  #[allow(clippy::too_many_lines)]
  fn gen_stmt(&mut self, s: StmtId, out: &mut String, depth: usize) -> Result<()> {
    let span = self.hir.stmts[s].span;
    let kind = self.hir.stmts[s].kind;
    let expr = self.hir.stmts[s].expr;
    let body = self.hir.stmts[s].body;
    let pad = "  ".repeat(depth);
    match kind {
      StmtKind::Assign => {
        let e = expr.ok_or_else(|| CompileError::new(ErrorKind::Internal, span,
          "assignment without an expression"))?;
        self.gen_assign_stmt(e, out, depth)?;
      }
      StmtKind::Call => {
        if let Some(e) = expr {
          let c = self.gen_expr(e)?;
          let _ = writeln!(out, "{pad}{c};");
        }
      }
      StmtKind::Print => self.gen_print(expr, false, out, depth)?,
      StmtKind::Println => self.gen_print(expr, true, out, depth)?,
      StmtKind::If | StmtKind::Elseif => {
        let e = expr.ok_or_else(|| CompileError::new(ErrorKind::Internal, span,
          "conditional without a condition"))?;
        let cond = self.gen_expr(e)?;
        let lead = if kind == StmtKind::If { "if" } else { "} else if" };
        let _ = writeln!(out, "{pad}{lead} ({cond}) {{");
        if let Some(b) = body { self.gen_block(b, out, depth + 1)? }
        if !self.next_is_else(s) {
          let _ = writeln!(out, "{pad}}}");
        }
      }
      StmtKind::Else => {
        let _ = writeln!(out, "{pad}}} else {{");
        if let Some(b) = body { self.gen_block(b, out, depth + 1)? }
        let _ = writeln!(out, "{pad}}}");
      }
      StmtKind::Switch => {
        let e = expr.ok_or_else(|| CompileError::new(ErrorKind::Internal, span,
          "switch without a discriminant"))?;
        let d = self.gen_expr(e)?;
        let _ = writeln!(out, "{pad}switch ({d}) {{");
        if let Some(b) = body { self.gen_block(b, out, depth + 1)? }
        let _ = writeln!(out, "{pad}}}");
      }
      StmtKind::Case => {
        if let Some(e) = expr {
          // A tuple of values labels one arm with several cases.
          if self.hir.exprs[e].op == ExprOp::TupleLit {
            for &a in &self.hir.exprs[e].args.clone() {
              let v = self.gen_expr(a)?;
              let _ = writeln!(out, "{pad}case {v}:");
            }
          } else {
            let v = self.gen_expr(e)?;
            let _ = writeln!(out, "{pad}case {v}:");
          }
        }
        if let Some(b) = body { self.gen_block(b, out, depth + 1)? }
        let _ = writeln!(out, "{pad}  break;");
      }
      StmtKind::Default => {
        let _ = writeln!(out, "{pad}default:");
        if let Some(b) = body { self.gen_block(b, out, depth + 1)? }
        let _ = writeln!(out, "{pad}  break;");
      }
      StmtKind::While => {
        let e = expr.ok_or_else(|| CompileError::new(ErrorKind::Internal, span,
          "while without a condition"))?;
        let cond = self.gen_expr(e)?;
        let _ = writeln!(out, "{pad}while ({cond}) {{");
        if let Some(b) = body { self.gen_block(b, out, depth + 1)? }
        let _ = writeln!(out, "{pad}}}");
      }
      StmtKind::Do => {
        let _ = writeln!(out, "{pad}do {{");
        if let Some(b) = body { self.gen_block(b, out, depth + 1)? }
        let cond = match expr {
          Some(e) => self.gen_expr(e)?,
          None => "0".to_owned(),
        };
        let _ = writeln!(out, "{pad}}} while ({cond});");
      }
      StmtKind::For => {
        // init, cond, update are carried as a tuple expression.
        let e = expr.ok_or_else(|| CompileError::new(ErrorKind::Internal, span,
          "for without a header"))?;
        let args = self.hir.exprs[e].args.clone();
        if args.len() != 3 {
          return Err(CompileError::new(ErrorKind::InvalidArgument, span,
            "for needs an init, a condition, and an update"))
        }
        let init = self.gen_expr(args[0])?;
        let cond = self.gen_expr(args[1])?;
        let update = self.gen_expr(args[2])?;
        let _ = writeln!(out, "{pad}for ({init}; {cond}; {update}) {{");
        if let Some(b) = body { self.gen_block(b, out, depth + 1)? }
        let _ = writeln!(out, "{pad}}}");
      }
      StmtKind::Foreach => {
        let e = expr.ok_or_else(|| CompileError::new(ErrorKind::Internal, span,
          "foreach without a binding"))?;
        self.gen_foreach(e, body, out, depth, span)?;
      }
      StmtKind::Return => {
        match expr {
          Some(e) => {
            let v = self.gen_expr(e)?;
            let _ = writeln!(out, "{pad}return {v};");
          }
          None => { let _ = writeln!(out, "{pad}return;"); }
        }
      }
      StmtKind::Throw => {
        self.reg.add_include("stdio.h");
        self.reg.add_include("stdlib.h");
        let msg = match expr.and_then(|e| self.hir.exprs[e].val.clone()) {
          Some(Value::Str(m)) => c_quote(&m),
          _ => "\"Exception\"".to_owned(),
        };
        let _ = writeln!(out, "{pad}raise({msg});");
      }
      StmtKind::Yield | StmtKind::Generate | StmtKind::Relation =>
        return Err(CompileError::new(ErrorKind::Unimplemented, span,
          format!("cannot lower a {kind} statement to C"))),
      // Reference counts only exist for transformer-managed classes.
      StmtKind::Ref | StmtKind::Unref => {}
      StmtKind::Import | StmtKind::Importlib | StmtKind::Importrpc | StmtKind::Use => {}
      StmtKind::Appendcode | StmtKind::Prependcode => {
        if let Some(b) = body { self.gen_block(b, out, depth)? }
      }
    }
    Ok(())
  }

  /// Whether the statement after `s` in its block is an `elseif`/`else`
  /// continuation, so the closing brace belongs to it.
  fn next_is_else(&self, s: StmtId) -> bool {
    let Some(b) = self.hir.stmts[s].block else { return false };
    let stmts = &self.hir.blocks[b].stmts;
    let Some(pos) = stmts.iter().position(|&x| x == s) else { return false };
    match stmts.get(pos + 1) {
      Some(&next) =>
        matches!(self.hir.stmts[next].kind, StmtKind::Elseif | StmtKind::Else),
      None => false,
    }
  }

  fn gen_assign_stmt(&mut self, e: ExprId, out: &mut String, depth: usize) -> Result<()> {
    let pad = "  ".repeat(depth);
    let span = self.hir.exprs[e].span;
    if self.hir.exprs[e].op == ExprOp::Assign {
      let args = self.hir.exprs[e].args.clone();
      let target = args[0];
      if_chain::if_chain! {
        if self.hir.exprs[target].op == ExprOp::Ident;
        if let Some(sym) = self.hir.ident_sym(target);
        if !self.declared.contains(&sym);
        then {
          // The first assignment declares the local.
          let ty = self.expr_ty(target)?;
          let ct = self.c_type(&ty, span)?;
          let rhs = self.gen_expr(args[1])?;
          self.declared.insert(sym);
          let _ = writeln!(out, "{pad}{ct} {sym} = {rhs};");
          return Ok(())
        }
      }
    }
    let c = self.gen_expr(e)?;
    let _ = writeln!(out, "{pad}{c};");
    Ok(())
  }

  fn gen_foreach(
    &mut self, e: ExprId, body: Option<BlockId>, out: &mut String, depth: usize,
    span: FileSpan,
  ) -> Result<()> {
    let pad = "  ".repeat(depth);
    let args = self.hir.exprs[e].args.clone();
    if self.hir.exprs[e].op != ExprOp::In || args.len() != 2 {
      return Err(CompileError::new(ErrorKind::InvalidArgument, span,
        "foreach needs a `name in sequence` binding"))
    }
    let sym = self.hir.ident_sym(args[0]).ok_or_else(|| {
      CompileError::new(ErrorKind::InvalidArgument, span, "foreach binds an identifier")
    })?;
    let elem_ty = self.expr_ty(args[0])?;
    let elem_c = self.c_type(&elem_ty, span)?;
    self.declared.insert(sym);
    if self.hir.exprs[args[1]].op == ExprOp::Range {
      let range = self.hir.exprs[args[1]].args.clone();
      let lo = self.gen_expr(range[0])?;
      let hi = self.gen_expr(range[1])?;
      let _ = writeln!(out,
        "{pad}for ({elem_c} {sym} = {lo}; {sym} <= {hi}; {sym}++) {{");
    } else {
      let seq = self.gen_expr(args[1])?;
      let i = self.fresh_name("veil_i");
      let _ = writeln!(out, "{pad}for (uint64_t {i} = 0; {i} < ({seq}).len; {i}++) {{");
      let _ = writeln!(out, "{pad}  {elem_c} {sym} = ({seq}).data[{i}];");
    }
    if let Some(b) = body { self.gen_block(b, out, depth + 1)? }
    let _ = writeln!(out, "{pad}}}");
    Ok(())
  }

  fn gen_print(
    &mut self, expr: Option<ExprId>, newline: bool, out: &mut String, depth: usize,
  ) -> Result<()> {
    let pad = "  ".repeat(depth);
    self.reg.demand_string_writer();
    let _ = writeln!(out, "{pad}GlobalStringWriter_reset();");
    let args: Vec<ExprId> = match expr {
      None => vec![],
      Some(e) if self.hir.exprs[e].op == ExprOp::TupleLit =>
        self.hir.exprs[e].args.to_vec(),
      Some(e) => vec![e],
    };
    let last = args.len().checked_sub(1);
    let mut absorbed = false;
    for (i, &a) in args.iter().enumerate() {
      // `println` mutates a trailing string literal to carry the newline,
      // otherwise a trailing literal is synthesized.
      let extend = newline && last == Some(i);
      absorbed = self.gen_print_arg(a, extend, out, depth)?;
    }
    if newline && !absorbed {
      let _ = writeln!(out, "{pad}GlobalStringWriter_write(\"%s\", \"\\n\");");
    }
    self.finish_print(out, &pad)
  }

  fn finish_print(&mut self, out: &mut String, pad: &str) -> Result<()> {
    self.reg.add_include("stdio.h");
    let _ = writeln!(out, "{pad}printf(\"%s\", GlobalStringWriter_string());");
    Ok(())
  }

  /// Emit one print argument. Returns whether a requested trailing
  /// newline was absorbed into a string literal.
  fn gen_print_arg(
    &mut self, a: ExprId, append_newline: bool, out: &mut String, depth: usize,
  ) -> Result<bool> {
    let pad = "  ".repeat(depth);
    let span = self.hir.exprs[a].span;
    // A format expression writes straight through the writer.
    if self.hir.exprs[a].op == ExprOp::Mod {
      let margs = self.hir.exprs[a].args.clone();
      let lhs_ty = self.expr_ty(margs[0])?;
      if lhs_ty.is_named("string") {
        let Some(Value::Str(fmt)) = self.hir.exprs[margs[0]].val.clone() else {
          return Err(CompileError::new(ErrorKind::Unimplemented, span,
            "format strings must be literals"))
        };
        let mut fmt = fmt.into_string();
        if append_newline { fmt.push('\n') }
        let esc = escape(span, &fmt, true)?;
        if esc.needs_inttypes { self.reg.demand_inttypes() }
        if esc.needs_stringify {
          self.reg.demand_stringify();
          self.reg.demand_float();
          self.reg.demand_double();
        }
        let fargs: Vec<ExprId> =
          if self.hir.exprs[margs[1]].op == ExprOp::TupleLit {
            self.hir.exprs[margs[1]].args.to_vec()
          } else {
            vec![margs[1]]
          };
        let mut call = format!("{pad}GlobalStringWriter_write(\"{}\"", esc.text);
        for fa in fargs {
          let v = self.gen_expr(fa)?;
          call.push_str(", ");
          call.push_str(&v);
        }
        let _ = writeln!(out, "{call});");
        return Ok(append_newline)
      }
    }
    // A plain string literal writes directly, absorbing the newline.
    if let Some(Value::Str(s)) = self.hir.exprs[a].val.clone() {
      let mut s = s.into_string();
      if append_newline { s.push('\n') }
      let name = self.reg.demand_tostring("string");
      let _ = writeln!(out, "{pad}{name}({});", c_quote(&s));
      return Ok(append_newline)
    }
    let ty = self.expr_ty(a)?;
    let key = tostring_key(&ty, span)?;
    let name = self.reg.demand_tostring(&key);
    let v = self.gen_expr(a)?;
    let _ = writeln!(out, "{pad}{name}({v});");
    Ok(false)
  }

  // == Expressions ========================================================

  #[allow(clippy::too_many_lines)]
  fn gen_expr(&mut self, e: ExprId) -> Result<String> {
    let op = self.hir.exprs[e].op;
    let span = self.hir.exprs[e].span;
    let args = self.hir.exprs[e].args.clone();
    match op {
      ExprOp::Const => self.gen_const(e, span),
      ExprOp::Ident => {
        let sym = self.hir.ident_sym(e).ok_or_else(|| {
          CompileError::new(ErrorKind::Internal, span, "identifier without a symbol")
        })?;
        Ok(sym.as_str().to_owned())
      }
      ExprOp::Add | ExprOp::Sub | ExprOp::Mul | ExprOp::Div | ExprOp::Exp =>
        self.gen_checked(e, op, &args, span),
      ExprOp::Rotl | ExprOp::Rotr => {
        let ty = self.expr_ty(e)?;
        let Some((signed, width)) = int_parts(&ty) else {
          return Err(CompileError::new(ErrorKind::InvalidArgument, span,
            format!("cannot rotate a value of type {ty}")))
        };
        let name = self.reg.demand_rotate(op == ExprOp::Rotl, width)?;
        let v = self.gen_expr(args[0])?;
        let d = self.gen_expr(args[1])?;
        // The rotate distance is reduced modulo the width by the caller.
        let call = format!("{name}({v}, ({d}) % {width})");
        Ok(if signed {
          format!("({}){call}", c_int_type(true, width))
        } else {
          call
        })
      }
      ExprOp::AddTrunc | ExprOp::SubTrunc | ExprOp::MulTrunc => {
        let ty = self.expr_ty(e)?;
        let Some((signed, width)) = int_parts(&ty) else {
          return Err(CompileError::new(ErrorKind::InvalidArgument, span,
            format!("truncating arithmetic needs an integer, found {ty}")))
        };
        let a = self.gen_expr(args[0])?;
        let b = self.gen_expr(args[1])?;
        let c = op.c_op().expect("truncating ops map to C");
        Ok(truncate(&format!("({a} {c} {b})"), signed, width))
      }
      ExprOp::NegateTrunc => {
        let ty = self.expr_ty(e)?;
        let Some((signed, width)) = int_parts(&ty) else {
          return Err(CompileError::new(ErrorKind::InvalidArgument, span,
            format!("truncating negate needs an integer, found {ty}")))
        };
        let a = self.gen_expr(args[0])?;
        Ok(truncate(&format!("(-({a}))"), signed, width))
      }
      ExprOp::Negate => Ok(format!("(-({}))", self.gen_expr(args[0])?)),
      ExprOp::Not => Ok(format!("(!({}))", self.gen_expr(args[0])?)),
      ExprOp::BitNot => Ok(format!("(~({}))", self.gen_expr(args[0])?)),
      ExprOp::Assign => {
        let lhs = self.gen_expr(args[0])?;
        let rhs = self.gen_expr(args[1])?;
        Ok(format!("{lhs} = {rhs}"))
      }
      op2 if op2.assign_base().is_some() => {
        let base = op2.assign_base().expect("just checked");
        let lhs = self.gen_expr(args[0])?;
        let value = self.gen_binary_value(e, base, args[0], args[1], span)?;
        Ok(format!("{lhs} = {value}"))
      }
      ExprOp::Mod | ExprOp::And | ExprOp::Or | ExprOp::Xor |
      ExprOp::BitAnd | ExprOp::BitOr | ExprOp::BitXor |
      ExprOp::Shl | ExprOp::Shr |
      ExprOp::Lt | ExprOp::Le | ExprOp::Gt | ExprOp::Ge |
      ExprOp::Eq | ExprOp::Ne => {
        if op == ExprOp::Mod {
          let lhs_ty = self.expr_ty(args[0])?;
          if lhs_ty.is_named("string") {
            return Err(CompileError::new(ErrorKind::Unimplemented, span,
              "format substitution is only lowered inside print statements"))
          }
        }
        let c = op.c_op().expect("operator maps to C");
        let a = self.gen_expr(args[0])?;
        let b = self.gen_expr(args[1])?;
        Ok(format!("({a} {c} {b})"))
      }
      ExprOp::Select => {
        let c = self.gen_expr(args[0])?;
        let t = self.gen_expr(args[1])?;
        let f = self.gen_expr(args[2])?;
        Ok(format!("({c} ? {t} : {f})"))
      }
      ExprOp::TupleLit => {
        let ty = self.expr_ty(e)?;
        let TyKind::Tuple(tys) = &*ty else {
          return Err(CompileError::new(ErrorKind::Internal, span, "tuple without tuple type"))
        };
        let tys = tys.clone();
        let name = self.tuple_name(&tys, span)?;
        self.reference_decl(&name);
        let vals = args.iter().map(|&a| self.gen_expr(a)).collect::<Result<Vec<_>>>()?;
        Ok(format!("{name}({})", vals.iter().format(", ")))
      }
      ExprOp::ArrayLit => {
        let ty = self.expr_ty(e)?;
        let TyKind::Array(el) = &*ty else {
          return Err(CompileError::new(ErrorKind::Internal, span, "array without array type"))
        };
        let el = el.clone();
        let name = self.array_name(&el, span)?;
        self.reference_decl(&name);
        let vals = args.iter().map(|&a| self.gen_expr(a)).collect::<Result<Vec<_>>>()?;
        let mut call = format!("{name}_make({}", args.len());
        for v in vals {
          call.push_str(", ");
          call.push_str(&v);
        }
        call.push(')');
        Ok(call)
      }
      ExprOp::Index => self.gen_index(&args, span),
      ExprOp::Slice => {
        let base_ty = self.expr_ty(args[0])?;
        let TyKind::Array(el) = &*base_ty else {
          return Err(CompileError::new(ErrorKind::InvalidArgument, span,
            format!("cannot slice a value of type {base_ty}")))
        };
        let el = el.clone();
        let name = self.array_name(&el, span)?;
        self.reference_decl(&name);
        let a = self.gen_expr(args[0])?;
        let lo = self.gen_expr(args[1])?;
        let hi = self.gen_expr(args[2])?;
        Ok(format!("{name}_slice({a}, {lo}, {hi})"))
      }
      ExprOp::Dot => {
        let base_ty = self.expr_ty(args[0])?;
        match &*base_ty {
          TyKind::Struct(_) => {
            let sym = self.hir.ident_sym(args[1]).ok_or_else(|| {
              CompileError::new(ErrorKind::InvalidArgument, span, "field access needs a name")
            })?;
            let a = self.gen_expr(args[0])?;
            Ok(format!("{a}.{sym}"))
          }
          _ => Err(CompileError::new(ErrorKind::InvalidArgument, span,
            format!("cannot select a member of {base_ty}"))),
        }
      }
      ExprOp::Call => self.gen_call(e, &args, span),
      ExprOp::Cast => {
        let ty = self.expr_ty(e)?;
        let ct = self.c_type(&ty, span)?;
        Ok(format!("({ct})({})", self.gen_expr(args[1])?))
      }
      ExprOp::CastTrunc => {
        let ty = self.expr_ty(e)?;
        match int_parts(&ty) {
          Some((signed, width)) => {
            let v = self.gen_expr(args[1])?;
            Ok(truncate(&format!("({v})"), signed, width))
          }
          None => {
            let ct = self.c_type(&ty, span)?;
            Ok(format!("({ct})({})", self.gen_expr(args[1])?))
          }
        }
      }
      ExprOp::Secret | ExprOp::Reveal | ExprOp::NotNull => self.gen_expr(args[0]),
      ExprOp::Null => Ok("NULL".to_owned()),
      ExprOp::IsNull => Ok(format!("(({}) == NULL)", self.gen_expr(args[0])?)),
      ExprOp::FuncAddr => {
        let sym = self.hir.ident_sym(args[0]).ok_or_else(|| {
          CompileError::new(ErrorKind::InvalidArgument, span,
            "can only take the address of a named function")
        })?;
        self.reference_decl(sym.as_str());
        Ok(format!("&{sym}"))
      }
      ExprOp::Signed | ExprOp::Unsigned => {
        let ty = self.expr_ty(e)?;
        let ct = self.c_type(&ty, span)?;
        Ok(format!("({ct})({})", self.gen_expr(args[0])?))
      }
      ExprOp::WidthOf => {
        let ty = self.expr_ty(args[0])?;
        match int_parts(&ty) {
          Some((_, w)) => Ok(w.to_string()),
          None => Err(CompileError::new(ErrorKind::InvalidArgument, span,
            format!("widthof needs an integer, found {ty}"))),
        }
      }
      ExprOp::NamedParam => self.gen_expr(args[1]),
      _ => Err(CompileError::new(ErrorKind::Unimplemented, span,
        format!("expression operator {op} has no C lowering"))),
    }
  }

  fn gen_const(&mut self, e: ExprId, span: FileSpan) -> Result<String> {
    match self.hir.exprs[e].val.clone() {
      Some(Value::Bool(b)) => {
        self.reg.demand_bool();
        Ok(if b { "true" } else { "false" }.to_owned())
      }
      Some(Value::Str(s)) => {
        self.reg.demand_string();
        Ok(c_quote(&s))
      }
      Some(Value::Int(n, _)) => Ok(n.to_string()),
      Some(Value::Uint(n, _)) => {
        if n > u64::from(u32::MAX).into() {
          Ok(format!("{n}ULL"))
        } else {
          Ok(n.to_string())
        }
      }
      Some(Value::Float(x, FloatSize::F32)) => Ok(format!("{x}f")),
      Some(Value::Float(x, FloatSize::F64)) => Ok(format!("{x}")),
      Some(Value::Sym(_)) | None => Err(CompileError::new(ErrorKind::Internal, span,
        "constant without a value")),
    }
  }

  /// Checked arithmetic: integers go through the runtime helper at the
  /// expression's width, floats use the C operator, string `+` is not
  /// wired, array `+` concatenates.
  fn gen_checked(&mut self, e: ExprId, op: ExprOp, args: &[ExprId], span: FileSpan)
    -> Result<String>
  {
    let ty = self.expr_ty(e)?;
    match &*ty {
      TyKind::Float(_) => {
        let c = match op {
          ExprOp::Add => "+",
          ExprOp::Sub => "-",
          ExprOp::Mul => "*",
          ExprOp::Div => "/",
          _ => return Err(CompileError::new(ErrorKind::InvalidArgument, span,
            "floats have no exponentiation helper")),
        };
        let a = self.gen_expr(args[0])?;
        let b = self.gen_expr(args[1])?;
        Ok(format!("({a} {c} {b})"))
      }
      TyKind::Name(..) if ty.is_named("string") && op == ExprOp::Add =>
        Err(CompileError::new(ErrorKind::Unimplemented, span,
          "string concatenation is not implemented")),
      TyKind::Array(el) if op == ExprOp::Add => {
        let el = el.clone();
        let name = self.array_name(&el, span)?;
        self.reference_decl(&name);
        let a = self.gen_expr(args[0])?;
        let b = self.gen_expr(args[1])?;
        Ok(format!("{name}_join({a}, {b})"))
      }
      _ => {
        let Some((signed, width)) = int_parts(&ty) else {
          return Err(CompileError::new(ErrorKind::InvalidArgument, span,
            format!("operator {op} does not apply to {ty}")))
        };
        let checked = match op {
          ExprOp::Add => CheckedOp::Add,
          ExprOp::Sub => CheckedOp::Sub,
          ExprOp::Mul => CheckedOp::Mul,
          ExprOp::Div => CheckedOp::Div,
          ExprOp::Exp => CheckedOp::Exp,
          _ => unreachable!("checked operator"),
        };
        let name = self.reg.demand_checked(signed, checked, width)?;
        let a = self.gen_expr(args[0])?;
        let b = self.gen_expr(args[1])?;
        Ok(format!("{name}({a}, {b})"))
      }
    }
  }

  /// The value side of a compound assignment.
  fn gen_binary_value(
    &mut self, e: ExprId, base: ExprOp, lhs: ExprId, rhs: ExprId, span: FileSpan,
  ) -> Result<String> {
    match base {
      ExprOp::Add | ExprOp::Sub | ExprOp::Mul | ExprOp::Div | ExprOp::Exp =>
        self.gen_checked(e, base, &[lhs, rhs], span),
      ExprOp::Rotl | ExprOp::Rotr => {
        let ty = self.expr_ty(e)?;
        let Some((_, width)) = int_parts(&ty) else {
          return Err(CompileError::new(ErrorKind::InvalidArgument, span,
            format!("cannot rotate a value of type {ty}")))
        };
        let name = self.reg.demand_rotate(base == ExprOp::Rotl, width)?;
        let v = self.gen_expr(lhs)?;
        let d = self.gen_expr(rhs)?;
        Ok(format!("{name}({v}, ({d}) % {width})"))
      }
      ExprOp::AddTrunc | ExprOp::SubTrunc | ExprOp::MulTrunc => {
        let ty = self.expr_ty(e)?;
        let Some((signed, width)) = int_parts(&ty) else {
          return Err(CompileError::new(ErrorKind::InvalidArgument, span,
            format!("truncating arithmetic needs an integer, found {ty}")))
        };
        let a = self.gen_expr(lhs)?;
        let b = self.gen_expr(rhs)?;
        let c = base.c_op().expect("truncating ops map to C");
        Ok(truncate(&format!("({a} {c} {b})"), signed, width))
      }
      _ => {
        let c = base.c_op().ok_or_else(|| {
          CompileError::new(ErrorKind::Unimplemented, span,
            format!("operator {base} has no C lowering"))
        })?;
        let a = self.gen_expr(lhs)?;
        let b = self.gen_expr(rhs)?;
        Ok(format!("({a} {c} {b})"))
      }
    }
  }

  fn gen_index(&mut self, args: &[ExprId], span: FileSpan) -> Result<String> {
    let base_ty = self.expr_ty(args[0])?;
    match &*base_ty {
      TyKind::Tuple(_) => {
        let i = self.hir.fold_index(args[1]).ok_or_else(|| {
          CompileError::new(ErrorKind::InvalidArgument, span,
            "tuple index must be an integer literal")
        })?;
        let a = self.gen_expr(args[0])?;
        Ok(format!("{a}.el{i}"))
      }
      TyKind::Struct(fields) => {
        let fields = fields.clone();
        let a = self.gen_expr(args[0])?;
        if let Some(sym) = self.hir.ident_sym(args[1]) {
          Ok(format!("{a}.{sym}"))
        } else {
          let i = self.hir.fold_index(args[1]).ok_or_else(|| {
            CompileError::new(ErrorKind::InvalidArgument, span,
              "struct index must be a field name or position")
          })?;
          let name = fields.get(i).map(|(n, _)| *n).ok_or_else(|| {
            CompileError::new(ErrorKind::InvalidArgument, span,
              format!("struct position {i} out of range"))
          })?;
          Ok(format!("{a}.{name}"))
        }
      }
      TyKind::Array(_) => {
        let a = self.gen_expr(args[0])?;
        let i = self.gen_expr(args[1])?;
        Ok(format!("({a}).data[{i}]"))
      }
      _ => Err(CompileError::new(ErrorKind::InvalidArgument, span,
        format!("cannot index a value of type {base_ty}"))),
    }
  }

  fn gen_call(&mut self, e: ExprId, args: &[ExprId], span: FileSpan) -> Result<String> {
    let callee = args[0];
    // Array methods dispatch to the synthesized helper family.
    if self.hir.exprs[callee].op == ExprOp::Dot {
      let dargs = self.hir.exprs[callee].args.clone();
      let base_ty = self.expr_ty(dargs[0])?;
      if_chain::if_chain! {
        if let TyKind::Array(el) = &*base_ty;
        if let Some(sym) = self.hir.ident_sym(dargs[1]);
        if let Some(m) = ArrayMethod::from_symbol(sym);
        then {
          let el = el.clone();
          let name = self.array_name(&el, span)?;
          self.reference_decl(&name);
          let base = self.gen_expr(dargs[0])?;
          return match m {
            ArrayMethod::Append => {
              let v = self.gen_expr(args[1])?;
              Ok(format!("{name}_append(&{base}, {v})"))
            }
            ArrayMethod::Concat => {
              let v = self.gen_expr(args[1])?;
              Ok(format!("{name}_concat(&{base}, &{v})"))
            }
            ArrayMethod::Length => Ok(format!("({base}).len")),
            ArrayMethod::Reverse => Ok(format!("{name}_reverse(&{base})")),
            ArrayMethod::Values => Ok(base),
            ArrayMethod::Items => Err(CompileError::new(ErrorKind::Unimplemented, span,
              "items() lowers through foreach")),
          }
        }
      }
    }
    let sym = self.hir.ident_sym(callee).ok_or_else(|| {
      CompileError::new(ErrorKind::Unimplemented, span,
        "only named functions can be called")
    })?;
    let Some(&Entity::Func(f)) = self.names.get(&sym) else {
      return Err(CompileError::new(ErrorKind::NotFound, span,
        format!("undefined function {sym}")))
    };
    let cname = match &self.hir.funcs[f].ty {
      Some(ty) => {
        if let TyKind::Poly(scheme) = &**ty {
          let bindings: Vec<Ty> = match self.hir.exprs[e].inst {
            Some(idx) => {
              let insts = scheme.insts.borrow();
              let inst = insts.get(idx as usize).ok_or_else(|| {
                CompileError::new(ErrorKind::Internal, span, "dangling instantiation index")
              })?;
              // Under a specialization, the call's bindings may mention
              // the enclosing function's bound variables.
              inst.bindings.iter()
                .map(|t| crate::infer::subst_vars(t, &self.subst))
                .collect()
            }
            // A recursive call inside the scheme's own body: the bound
            // variables resolve through the open specialization.
            None => scheme.bounds.iter().map(|b| {
              self.subst.get(&b.var.0).cloned().ok_or_else(|| {
                CompileError::new(ErrorKind::Internal, span,
                  format!("call of {sym} resolves no instantiation"))
              })
            }).collect::<Result<_>>()?,
          };
          specialized_name(self.hir.funcs[f].name, &bindings)?
        } else {
          sym.as_str().to_owned()
        }
      }
      None => sym.as_str().to_owned(),
    };
    self.reference_decl(&cname);
    let vals = args[1..].iter().map(|&a| self.gen_expr(a)).collect::<Result<Vec<_>>>()?;
    Ok(format!("{cname}({})", vals.iter().format(", ")))
  }
}

/// Wrap an integer expression so it fits `width` bits, truncating.
fn truncate(expr: &str, signed: bool, width: u32) -> String {
  let ct = c_int_type(signed, width);
  if width.is_power_of_two() && width >= 8 {
    format!("({ct}){expr}")
  } else {
    let mask = format!("(((uint64_t)1 << {width}) - 1)");
    format!("({ct})((uint64_t){expr} & {mask})")
  }
}

/// The `tostring` key of a printable type.
fn tostring_key(ty: &Ty, span: FileSpan) -> Result<String> {
  match &**ty {
    TyKind::Int(it) => {
      if it.width() > 64 {
        return Err(CompileError::new(ErrorKind::Unimplemented, span,
          format!("integer width {} exceeds 64 bits", it.width())))
      }
      Ok(it.to_string())
    }
    TyKind::AnyInt(signed) => Ok(IntTy::UInt(64).with_signed(*signed).to_string()),
    TyKind::Float(sz) => Ok(sz.to_string()),
    TyKind::Name(..) if ty.is_named("bool") => Ok("bool".to_owned()),
    TyKind::Name(..) if ty.is_named("string") => Ok("string".to_owned()),
    _ => Err(CompileError::new(ErrorKind::Unimplemented, span,
      format!("cannot print a value of type {ty}"))),
  }
}

/// The signedness and width of an integer type.
fn int_parts(ty: &Ty) -> Option<(bool, u32)> {
  match &**ty {
    TyKind::Int(it) => Some((it.signed(), it.width())),
    TyKind::AnyInt(signed) => Some((*signed, 64)),
    _ => None,
  }
}

/// The C type an argument promotes to when passed through `...`.
fn promoted(ct: &str) -> &str {
  match ct {
    "int8_t" | "int16_t" | "int32_t" | "uint8_t" | "uint16_t" | "bool" => "int",
    "uint32_t" => "unsigned int",
    "float" => "double",
    other => other,
  }
}

/// Quote a string for direct embedding in C source.
#[must_use] pub fn c_quote(s: &str) -> String {
  let mut out = String::with_capacity(s.len() + 2);
  out.push('"');
  for c in s.chars() {
    match c {
      '"' => out.push_str("\\\""),
      '\\' => out.push_str("\\\\"),
      '\n' => out.push_str("\\n"),
      '\t' => out.push_str("\\t"),
      _ => out.push(c),
    }
  }
  out.push('"');
  out
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn quoting() {
    assert_eq!(c_quote("a\"b\\c\n"), "\"a\\\"b\\\\c\\n\"");
  }

  #[test]
  fn truncation_masks_odd_widths() {
    assert_eq!(truncate("(a + b)", false, 16), "(uint16_t)(a + b)");
    assert_eq!(truncate("(a + b)", false, 12),
      "(uint16_t)((uint64_t)(a + b) & (((uint64_t)1 << 12) - 1))");
  }

  #[test]
  fn promotions() {
    assert_eq!(promoted("uint8_t"), "int");
    assert_eq!(promoted("uint32_t"), "unsigned int");
    assert_eq!(promoted("uint64_t"), "uint64_t");
    assert_eq!(promoted("float"), "double");
    assert_eq!(promoted("string"), "string");
  }
}
