//! The program graph: an arena of modules, functions, blocks, statements,
//! expressions and variables, linked by typed indices.
//!
//! Ownership edges are stored ids (a block owns its statements, a
//! statement owns its expression and sub-block); back references (a
//! statement's owning block, an expression's parent) are ids with no
//! delete cascade. The arena lives for the whole compilation and is
//! released in bulk, so detaching a subtree is enough to delete it.

use std::fmt::Write;

use bitflags::bitflags;
use hashbrown::HashMap;
use smallvec::SmallVec;

use crate::Symbol;
use crate::types::{FileSpan, IdxVec, mk_id};
use crate::types::entity::{ExprOp, FuncKind, Linkage, StmtKind};
use crate::types::ty::Ty;
use crate::types::value::Value;

mk_id! {
  /// An id for a [`Function`].
  FuncId,
  /// An id for a [`Block`].
  BlockId,
  /// An id for a [`Stmt`].
  StmtId,
  /// An id for an [`Expr`].
  ExprId,
  /// An id for a [`Variable`].
  LocalId,
  /// An id for a [`Filepath`].
  PathId,
}

bitflags! {
  /// Dead-code flags inferred per block.
  #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
  pub struct BlockFlags: u8 {
    /// Control can fall out of the end of the block or return from it.
    const CAN_RETURN = 1;
    /// Control can reach a `continue` edge of the enclosing loop.
    const CAN_CONTINUE = 1 << 1;
  }
}

bitflags! {
  /// Per-identifier flags in a [`Scope`] entry.
  #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
  pub struct ScopeFlags: u8 {
    /// The entry was created by a binding instance (an assignment target).
    const BINDING_INSTANCE = 1;
    /// The identifier names a function parameter.
    const IS_PARAM = 1 << 1;
    /// This occurrence declared the name; later occurrences are uses.
    const FIRST_INSTANCE = 1 << 2;
    /// The identifier names a local variable.
    const IS_LOCAL = 1 << 3;
  }
}

/// A source file, interned by absolute path. Files own their module
/// functions and may be nested under a package file.
#[derive(Debug)]
pub struct Filepath {
  /// The interned absolute path.
  pub path: Symbol,
  /// The enclosing package directory, if any.
  pub parent: Option<PathId>,
  /// The module functions defined by this file.
  pub modules: Vec<FuncId>,
}

/// The kind of a [`Variable`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum VarKind {
  /// A local variable, declared by its first binding instance.
  Local,
  /// A function parameter.
  Param,
}

/// A local variable or parameter.
#[derive(Debug)]
pub struct Variable {
  /// The variable name.
  pub name: Symbol,
  /// Local or parameter.
  pub kind: VarKind,
  /// The function that owns the variable.
  pub func: FuncId,
  /// The declared type expression, if the source gave one.
  pub ty_expr: Option<ExprId>,
  /// The initializer expression, if any.
  pub init: Option<ExprId>,
  /// The inferred type.
  pub ty: Option<Ty>,
  /// Where the variable was declared.
  pub span: FileSpan,
}

/// A function, including the pseudo-functions for modules, packages,
/// structs and enums.
#[derive(Debug)]
pub struct Function {
  /// The function name.
  pub name: Symbol,
  /// The function kind.
  pub kind: FuncKind,
  /// How the function is linked.
  pub linkage: Linkage,
  /// Where the function was declared.
  pub span: FileSpan,
  /// The parameters, in declaration order.
  pub params: Vec<LocalId>,
  /// The body block.
  pub body: BlockId,
  /// The lexically enclosing function.
  pub parent: Option<FuncId>,
  /// Child functions, in declaration order.
  pub subfuncs: Vec<FuncId>,
  /// The inferred type: a monomorphic [`TyKind::Fn`] or a
  /// [`TyKind::Poly`] scheme.
  ///
  /// [`TyKind::Fn`]: crate::types::ty::TyKind::Fn
  /// [`TyKind::Poly`]: crate::types::ty::TyKind::Poly
  pub ty: Option<Ty>,
  /// The file that owns a module function.
  pub path: Option<PathId>,
}

/// Which entity owns a block.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BlockOwner {
  /// The body of a function.
  Func(FuncId),
  /// The sub-block of a statement.
  Stmt(StmtId),
  /// Not currently attached (freshly created or mid-move).
  Detached,
}

/// An ordered sequence of statements.
#[derive(Debug)]
pub struct Block {
  /// Where the block starts.
  pub span: FileSpan,
  /// The statements, in source order. This vector is the sibling link:
  /// statements do not know their neighbors.
  pub stmts: Vec<StmtId>,
  /// Dead-code flags.
  pub flags: BlockFlags,
  /// The inferred return type of the block, if it can return.
  pub ret_ty: Option<Ty>,
  /// The owner back reference.
  pub owner: BlockOwner,
}

/// A statement: a kind, an optional expression, and an optional sub-block.
#[derive(Debug)]
pub struct Stmt {
  /// The statement kind.
  pub kind: StmtKind,
  /// Where the statement is.
  pub span: FileSpan,
  /// The expression operand (condition, assignment, call, argument list).
  pub expr: Option<ExprId>,
  /// The owned sub-block (loop or conditional body).
  pub body: Option<BlockId>,
  /// The owning block; `None` while detached.
  pub block: Option<BlockId>,
}

/// An expression tree node.
#[derive(Debug)]
pub struct Expr {
  /// The operator tag.
  pub op: ExprOp,
  /// Where the expression is.
  pub span: FileSpan,
  /// The literal value of a [`ExprOp::Const`], or the symbol of an
  /// [`ExprOp::Ident`].
  pub val: Option<Value>,
  /// The inferred type.
  pub ty: Option<Ty>,
  /// The inferred bit width, for integer-valued expressions.
  pub width: u32,
  /// Whether an identifier occurrence is a binding instance.
  pub binding_instance: bool,
  /// For calls of a polymorphic function, the index of the instantiation
  /// this call resolved to.
  pub inst: Option<u32>,
  /// The children, in operand order.
  pub args: SmallVec<[ExprId; 2]>,
  /// The parent expression, if this is not a root.
  pub parent: Option<ExprId>,
}

/// The root of the program graph: one arena per compilation.
#[derive(Debug, Default)]
pub struct Hir {
  /// All functions.
  pub funcs: IdxVec<FuncId, Function>,
  /// All blocks.
  pub blocks: IdxVec<BlockId, Block>,
  /// All statements.
  pub stmts: IdxVec<StmtId, Stmt>,
  /// All expressions.
  pub exprs: IdxVec<ExprId, Expr>,
  /// All variables.
  pub vars: IdxVec<LocalId, Variable>,
  /// All file paths.
  pub paths: IdxVec<PathId, Filepath>,
  path_map: HashMap<Symbol, PathId>,
  /// The program entry point.
  pub main: Option<FuncId>,
}

impl Hir {
  /// Construct an empty program graph.
  #[must_use] pub fn new() -> Self { Self::default() }

  /// Intern a file path, creating it on first sight.
  pub fn get_path(&mut self, path: Symbol, parent: Option<PathId>) -> PathId {
    if let Some(&id) = self.path_map.get(&path) { return id }
    let id = self.paths.push(Filepath { path, parent, modules: vec![] });
    self.path_map.insert(path, id);
    id
  }

  /// Create a new empty block.
  pub fn new_block(&mut self, span: FileSpan) -> BlockId {
    self.blocks.push(Block {
      span,
      stmts: vec![],
      flags: BlockFlags::default(),
      ret_ty: None,
      owner: BlockOwner::Detached,
    })
  }

  /// Create a function with an empty body, registering it under its
  /// parent (or as a module of `path`).
  pub fn new_function(
    &mut self, name: Symbol, kind: FuncKind, linkage: Linkage, span: FileSpan,
    parent: Option<FuncId>,
  ) -> FuncId {
    let body = self.new_block(span);
    let id = self.funcs.push(Function {
      name, kind, linkage, span,
      params: vec![],
      body,
      parent,
      subfuncs: vec![],
      ty: None,
      path: None,
    });
    self.blocks[body].owner = BlockOwner::Func(id);
    if let Some(p) = parent { self.funcs[p].subfuncs.push(id) }
    id
  }

  /// Attach a module function to its file.
  pub fn add_module(&mut self, path: PathId, func: FuncId) {
    self.funcs[func].path = Some(path);
    self.paths[path].modules.push(func);
  }

  /// Add a parameter to a function.
  pub fn new_param(
    &mut self, func: FuncId, name: Symbol, span: FileSpan, ty_expr: Option<ExprId>,
  ) -> LocalId {
    let id = self.vars.push(Variable {
      name, kind: VarKind::Param, func, ty_expr, init: None, ty: None, span,
    });
    self.funcs[func].params.push(id);
    id
  }

  /// Create a new expression with no children.
  pub fn new_expr(&mut self, op: ExprOp, span: FileSpan) -> ExprId {
    self.exprs.push(Expr {
      op, span,
      val: None,
      ty: None,
      width: 0,
      binding_instance: false,
      inst: None,
      args: SmallVec::new(),
      parent: None,
    })
  }

  /// Create a constant expression. The width is taken from the value.
  pub fn new_const(&mut self, span: FileSpan, val: Value) -> ExprId {
    let width = val.width().unwrap_or(0);
    let id = self.new_expr(ExprOp::Const, span);
    self.exprs[id].val = Some(val);
    self.exprs[id].width = width;
    id
  }

  /// Create an identifier expression.
  pub fn new_ident(&mut self, span: FileSpan, name: Symbol) -> ExprId {
    let id = self.new_expr(ExprOp::Ident, span);
    self.exprs[id].val = Some(Value::Sym(name));
    id
  }

  /// Append a child to an expression, recording the parent link.
  pub fn add_child(&mut self, parent: ExprId, child: ExprId) {
    debug_assert!(self.exprs[child].parent.is_none(), "expression already owned");
    self.exprs[child].parent = Some(parent);
    self.exprs[parent].args.push(child);
  }

  /// Create a unary expression.
  pub fn new_unary(&mut self, op: ExprOp, span: FileSpan, arg: ExprId) -> ExprId {
    let id = self.new_expr(op, span);
    self.add_child(id, arg);
    id
  }

  /// Create a binary expression.
  pub fn new_binary(&mut self, op: ExprOp, span: FileSpan, lhs: ExprId, rhs: ExprId) -> ExprId {
    let id = self.new_expr(op, span);
    self.add_child(id, lhs);
    self.add_child(id, rhs);
    id
  }

  /// Create a detached statement.
  pub fn new_stmt(
    &mut self, kind: StmtKind, span: FileSpan, expr: Option<ExprId>, body: Option<BlockId>,
  ) -> StmtId {
    let id = self.stmts.push(Stmt { kind, span, expr, body, block: None });
    if let Some(b) = body { self.blocks[b].owner = BlockOwner::Stmt(id) }
    id
  }

  /// Append a statement at the end of a block.
  pub fn append_stmt(&mut self, block: BlockId, stmt: StmtId) {
    debug_assert!(self.stmts[stmt].block.is_none(), "statement already owned");
    self.stmts[stmt].block = Some(block);
    self.blocks[block].stmts.push(stmt);
  }

  /// Insert a statement into a block immediately after `after`.
  pub fn insert_stmt_after(&mut self, block: BlockId, after: StmtId, stmt: StmtId) {
    debug_assert!(self.stmts[stmt].block.is_none(), "statement already owned");
    let pos = self.stmt_position(block, after).expect("anchor not in block");
    self.stmts[stmt].block = Some(block);
    self.blocks[block].stmts.insert(pos + 1, stmt);
  }

  /// Insert a statement at the front of a block.
  pub fn prepend_stmt(&mut self, block: BlockId, stmt: StmtId) {
    debug_assert!(self.stmts[stmt].block.is_none(), "statement already owned");
    self.stmts[stmt].block = Some(block);
    self.blocks[block].stmts.insert(0, stmt);
  }

  /// Detach a statement from its block. The statement and its owned
  /// subtree stay in the arena (released in bulk at the end of the
  /// compilation) but are no longer reachable through ownership edges.
  pub fn remove_stmt(&mut self, block: BlockId, stmt: StmtId) {
    let pos = self.stmt_position(block, stmt).expect("statement not in block");
    self.blocks[block].stmts.remove(pos);
    self.stmts[stmt].block = None;
  }

  fn stmt_position(&self, block: BlockId, stmt: StmtId) -> Option<usize> {
    self.blocks[block].stmts.iter().position(|&s| s == stmt)
  }

  /// A snapshot of a block's statement ids, so the caller can mutate the
  /// block while iterating.
  #[must_use] pub fn stmt_ids(&self, block: BlockId) -> Vec<StmtId> {
    self.blocks[block].stmts.clone()
  }

  /// Detach every statement of `src` in order and insert them into the
  /// block owning `dest` immediately after it.
  pub fn move_statements_after(&mut self, src: BlockId, dest: StmtId) {
    let dest_block = self.stmts[dest].block.expect("destination is detached");
    let moved = std::mem::take(&mut self.blocks[src].stmts);
    let pos = self.stmt_position(dest_block, dest).expect("anchor not in block") + 1;
    for (i, &s) in moved.iter().enumerate() {
      self.stmts[s].block = Some(dest_block);
      self.blocks[dest_block].stmts.insert(pos + i, s);
    }
  }

  /// Deep-copy an expression tree.
  pub fn copy_expr(&mut self, e: ExprId) -> ExprId {
    let Expr { op, span, ref val, ref ty, width, binding_instance, inst, ref args, parent: _ } =
      self.exprs[e];
    let (val, ty, args) = (val.clone(), ty.clone(), args.clone());
    let id = self.exprs.push(Expr {
      op, span, val, ty, width, binding_instance, inst,
      args: SmallVec::new(),
      parent: None,
    });
    for a in args {
      let c = self.copy_expr(a);
      self.add_child(id, c);
    }
    id
  }

  /// Deep-copy a statement and its owned substructure.
  pub fn copy_stmt(&mut self, s: StmtId) -> StmtId {
    let Stmt { kind, span, expr, body, block: _ } = self.stmts[s];
    let expr = expr.map(|e| self.copy_expr(e));
    let body = body.map(|b| self.copy_block(b));
    self.new_stmt(kind, span, expr, body)
  }

  /// Deep-copy a block. Only owned substructure is copied: sibling
  /// functions and blocks reached through back references are shared.
  pub fn copy_block(&mut self, b: BlockId) -> BlockId {
    let span = self.blocks[b].span;
    let flags = self.blocks[b].flags;
    let ret_ty = self.blocks[b].ret_ty.clone();
    let new = self.new_block(span);
    self.blocks[new].flags = flags;
    self.blocks[new].ret_ty = ret_ty;
    for s in self.stmt_ids(b) {
      let copy = self.copy_stmt(s);
      self.append_stmt(new, copy);
    }
    new
  }

  /// The symbol of an identifier expression.
  #[must_use] pub fn ident_sym(&self, e: ExprId) -> Option<Symbol> {
    match self.exprs[e].val {
      Some(Value::Sym(s)) if self.exprs[e].op == ExprOp::Ident => Some(s),
      _ => None,
    }
  }

  /// Fold a constant index expression to a position, for tuple selection.
  #[must_use] pub fn fold_index(&self, e: ExprId) -> Option<usize> {
    self.exprs[e].val.as_ref()?.as_index()
  }

  /// Write the function tree rooted at `f`, one function per line.
  pub fn dump_func_tree(&self, f: FuncId, out: &mut String, depth: usize) {
    let func = &self.funcs[f];
    let _ = writeln!(out, "{:indent$}{} {}", "", func.kind, func.name, indent = 2 * depth);
    for &sub in &func.subfuncs {
      self.dump_func_tree(sub, out, depth + 1);
    }
  }

  /// Write a readable rendition of a block's statements.
  pub fn dump_block(&self, b: BlockId, out: &mut String, depth: usize) {
    for &s in &self.blocks[b].stmts {
      let stmt = &self.stmts[s];
      let _ = write!(out, "{:indent$}{}", "", stmt.kind, indent = 2 * depth);
      if let Some(e) = stmt.expr {
        let _ = write!(out, " ");
        self.dump_expr(e, out);
      }
      let _ = writeln!(out);
      if let Some(body) = stmt.body {
        self.dump_block(body, out, depth + 1);
      }
    }
  }

  /// Write a readable rendition of an expression.
  pub fn dump_expr(&self, e: ExprId, out: &mut String) {
    let expr = &self.exprs[e];
    match expr.op {
      ExprOp::Const | ExprOp::Ident => {
        if let Some(v) = &expr.val { let _ = write!(out, "{v}"); }
      }
      op => {
        let _ = write!(out, "({}", op);
        for &a in &expr.args {
          let _ = write!(out, " ");
          self.dump_expr(a, out);
        }
        let _ = write!(out, ")");
      }
    }
  }
}

/// A per-function nested identifier scope.
///
/// Declaring the same symbol twice in a block treats the first occurrence
/// as the declaration and subsequent occurrences as uses.
#[derive(Debug, Default)]
pub struct Scope {
  frames: Vec<HashMap<Symbol, ScopeEntry>>,
}

/// One identifier's scope record.
#[derive(Clone, Debug)]
pub struct ScopeEntry {
  /// The identifier's type.
  pub ty: Ty,
  /// The identifier flags.
  pub flags: ScopeFlags,
}

impl Scope {
  /// Construct a scope with one open frame.
  #[must_use] pub fn new() -> Self { Self { frames: vec![HashMap::new()] } }

  /// Open a nested frame.
  pub fn push(&mut self) { self.frames.push(HashMap::new()) }

  /// Close the innermost frame.
  pub fn pop(&mut self) { self.frames.pop().expect("unbalanced scope"); }

  /// Look up a symbol in the innermost frame that declares it.
  #[must_use] pub fn get(&self, name: Symbol) -> Option<&ScopeEntry> {
    self.frames.iter().rev().find_map(|f| f.get(&name))
  }

  /// Declare or re-use a symbol. Returns the entry; `FIRST_INSTANCE` is
  /// set only if this occurrence declared the name.
  pub fn bind(&mut self, name: Symbol, ty: Ty, mut flags: ScopeFlags) -> &ScopeEntry {
    let declared = self.get(name).is_some();
    if declared {
      // Later occurrences are uses of the first declaration.
      for f in self.frames.iter_mut().rev() {
        if let Some(e) = f.get_mut(&name) {
          e.ty = ty;
          e.flags &= !ScopeFlags::FIRST_INSTANCE;
          e.flags |= flags & ScopeFlags::BINDING_INSTANCE;
          break
        }
      }
    } else {
      flags |= ScopeFlags::FIRST_INSTANCE;
      self.frames.last_mut().expect("unbalanced scope").insert(name, ScopeEntry { ty, flags });
    }
    self.get(name).expect("just inserted")
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::intern;
  use crate::types::value::Value;

  fn span() -> FileSpan { FileSpan::new(intern("/t.vl"), 1) }

  fn sample_block(hir: &mut Hir) -> BlockId {
    let b = hir.new_block(span());
    for i in 0..3u32 {
      let c = hir.new_const(span(), Value::Uint(i.into(), 64));
      let s = hir.new_stmt(StmtKind::Call, span(), Some(c), None);
      hir.append_stmt(b, s);
    }
    b
  }

  #[test]
  fn deep_copy_is_disjoint_and_ordered() {
    let mut hir = Hir::new();
    let b = sample_block(&mut hir);
    let orig = hir.stmt_ids(b);
    let copy = hir.copy_block(b);
    let copied = hir.stmt_ids(copy);
    assert_eq!(orig.len(), copied.len());
    for (o, c) in orig.iter().zip(&copied) {
      assert_ne!(o, c);
      let (oe, ce) = (hir.stmts[*o].expr.unwrap(), hir.stmts[*c].expr.unwrap());
      assert_ne!(oe, ce);
      assert_eq!(hir.exprs[oe].val, hir.exprs[ce].val);
    }
  }

  #[test]
  fn move_statements_preserves_order() {
    let mut hir = Hir::new();
    let src = sample_block(&mut hir);
    let dest = hir.new_block(span());
    let anchor = hir.new_stmt(StmtKind::Call, span(), None, None);
    let tail = hir.new_stmt(StmtKind::Return, span(), None, None);
    hir.append_stmt(dest, anchor);
    hir.append_stmt(dest, tail);
    let moved = hir.stmt_ids(src);
    hir.move_statements_after(src, anchor);
    assert!(hir.blocks[src].stmts.is_empty());
    let want: Vec<_> =
      std::iter::once(anchor).chain(moved).chain(std::iter::once(tail)).collect();
    assert_eq!(hir.stmt_ids(dest), want);
    for &s in &hir.blocks[dest].stmts {
      assert_eq!(hir.stmts[s].block, Some(dest));
    }
  }

  #[test]
  fn remove_stmt_detaches() {
    let mut hir = Hir::new();
    let b = sample_block(&mut hir);
    let ids = hir.stmt_ids(b);
    hir.remove_stmt(b, ids[1]);
    assert_eq!(hir.stmt_ids(b), vec![ids[0], ids[2]]);
    assert_eq!(hir.stmts[ids[1]].block, None);
  }

  #[test]
  fn scope_redeclaration_is_use() {
    use crate::types::ty::TyKind;
    let mut scope = Scope::new();
    let x = intern("x");
    let e = scope.bind(x, TyKind::uint(64), ScopeFlags::IS_LOCAL);
    assert!(e.flags.contains(ScopeFlags::FIRST_INSTANCE));
    let e = scope.bind(x, TyKind::uint(64), ScopeFlags::IS_LOCAL);
    assert!(!e.flags.contains(ScopeFlags::FIRST_INSTANCE));
  }
}
