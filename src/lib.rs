//! The compiler core for the Veil systems language.
//!
//! This crate takes a built program graph (the concrete-syntax parser is
//! an external collaborator), runs type inference and polymorphic
//! specialization over it, and emits a single portable C11 translation
//! unit for an external C compiler. The pipeline is:
//!
//! 1. IR construction ([`types::hir`]), driven by the parser;
//! 2. type inference ([`infer`]), annotating every expression and
//!    recording scheme instantiations;
//! 3. specialization ([`specialize`]), collecting the monomorphic
//!    renditions reachable from the entry points;
//! 4. C emission ([`codegen`]), backed by the runtime-feature registry
//!    ([`runtime`]) and the format rewriter ([`escape`]).

#![warn(missing_docs)]
#![warn(unused_lifetimes, unused_qualifications)]
#![warn(clippy::all)]
#![allow(clippy::match_like_matches_macro, clippy::single_match_else)]

pub mod codegen;
pub mod error;
pub mod escape;
pub mod eval;
pub mod infer;
pub mod runtime;
pub mod specialize;
pub mod symbol;
pub mod types;

use std::io::Write;
use std::path::{Path, PathBuf};

use hashbrown::HashMap;
use log::{LevelFilter, info};

pub use crate::error::{CompileError, ErrorKind, Result};
pub use crate::symbol::{Interner, Symbol, init_dense_symbol_map, intern, with_interner};
pub use crate::types::entity::Entity;
pub use crate::types::hir::{FuncId, Hir};

/// The source file suffix.
pub const SOURCE_SUFFIX: &str = ".vl";

/// The environment variable that re-roots package search for tests.
pub const TESTDIR_VAR: &str = "VEIL_TESTDIR";

/// The command-line surface of the driver, as consumed by the core.
#[derive(Debug, Default)]
pub struct Config {
  /// `-d`: emit debug info and debug logging.
  pub debug: bool,
  /// `-q`: only report errors.
  pub quiet: bool,
  /// `-O`: hand `-O2` to the external C compiler.
  pub optimize: bool,
  /// `--parseTree`: dump the parse tree.
  pub parse_tree: bool,
  /// `--funcTree`: dump the function tree.
  pub func_tree: bool,
  /// `--hir`: dump the program graph after checking.
  pub hir_dump: bool,
  /// `--tc`: trace the typechecker.
  pub trace_types: bool,
  /// `--oc <path>`: write the generated C here; `-` means stdout.
  pub out_c: Option<PathBuf>,
  /// `-p <dir>`: the root package directory.
  pub package_dir: Option<PathBuf>,
  /// `-n`: skip the external C compilation.
  pub no_compile: bool,
  /// Compile `unittest` functions too.
  pub unit_tests: bool,
  /// The top-level source file.
  pub source: Option<PathBuf>,
}

impl Config {
  /// Parse the §6 command-line surface. The driver passes `args` without
  /// the program name.
  pub fn from_args(args: &[String]) -> Result<Config> {
    let mut opts = getopts::Options::new();
    opts.optflag("d", "debug", "emit debug info");
    opts.optflag("q", "", "quiet: only report errors");
    opts.optflag("O", "", "optimized build");
    opts.optflag("", "parseTree", "dump the parse tree");
    opts.optflag("", "funcTree", "dump the function tree");
    opts.optflag("", "hir", "dump the program graph");
    opts.optflag("", "tc", "trace the typechecker");
    opts.optopt("", "oc", "write the generated C to PATH (- for stdout)", "PATH");
    opts.optopt("p", "", "root package directory", "DIR");
    opts.optflag("n", "", "skip the external C compiler");
    let m = opts.parse(args).map_err(|e| {
      CompileError::unlocated(ErrorKind::Usage, e.to_string())
    })?;
    let source = match &*m.free {
      [one] if one.ends_with(SOURCE_SUFFIX) => PathBuf::from(one),
      [one] => return Err(CompileError::unlocated(ErrorKind::Usage,
        format!("{one} does not end in {SOURCE_SUFFIX}"))),
      _ => return Err(CompileError::unlocated(ErrorKind::Usage,
        "expected exactly one source file")),
    };
    Ok(Config {
      debug: m.opt_present("d"),
      quiet: m.opt_present("q"),
      optimize: m.opt_present("O"),
      parse_tree: m.opt_present("parseTree"),
      func_tree: m.opt_present("funcTree"),
      hir_dump: m.opt_present("hir"),
      trace_types: m.opt_present("tc"),
      out_c: m.opt_str("oc").map(PathBuf::from),
      package_dir: m.opt_str("p").map(PathBuf::from),
      no_compile: m.opt_present("n"),
      unit_tests: false,
      source: Some(source),
    })
  }

  /// The shared package directory, honoring the test source root.
  #[must_use] pub fn package_root(&self) -> Option<PathBuf> {
    if let Ok(root) = std::env::var(TESTDIR_VAR) {
      return Some(Path::new(&root).join("packages"))
    }
    self.package_dir.clone()
  }
}

/// Configure the process logger the way the driver expects. Safe to call
/// once per process.
pub fn init_logging(config: &Config) {
  let level = if config.quiet {
    LevelFilter::Error
  } else if config.trace_types {
    LevelFilter::Trace
  } else if config.debug {
    LevelFilter::Debug
  } else {
    LevelFilter::Info
  };
  let _ = simplelog::SimpleLogger::init(level, simplelog::Config::default());
}

/// Resolve an import: search the importing file's directory, the
/// top-level source file's directory, then the shared package directory.
pub fn resolve_import(
  config: &Config, importer: &Path, module: &str,
) -> Result<PathBuf> {
  let file = format!("{module}{SOURCE_SUFFIX}");
  let mut candidates = vec![];
  if let Some(dir) = importer.parent() { candidates.push(dir.join(&file)) }
  if let Some(top) = &config.source {
    if let Some(dir) = top.parent() { candidates.push(dir.join(&file)) }
  }
  if let Some(pkg) = config.package_root() {
    candidates.push(pkg.join(module).join(&file));
  }
  for c in &candidates {
    if c.is_file() { return Ok(c.clone()) }
  }
  Err(CompileError::unlocated(ErrorKind::NotFound,
    format!("module {module} not found")))
}

/// The compiler pipeline over one program.
pub struct Compiler {
  /// The program graph.
  pub hir: Hir,
  /// The named-entity table.
  pub names: HashMap<Symbol, Entity>,
  /// The typing context.
  pub ctx: infer::InferCtx,
  /// The driver configuration.
  pub config: Config,
}

impl Compiler {
  /// Construct a compiler with the builtin entities registered.
  #[must_use] pub fn new(config: Config) -> Self {
    let mut ctx = infer::InferCtx::new();
    ctx.trace = config.trace_types;
    Compiler {
      hir: Hir::new(),
      names: types::entity::make_names(),
      ctx,
      config,
    }
  }

  /// Register a top-level function under its name.
  pub fn register_func(&mut self, f: FuncId) {
    let name = self.hir.funcs[f].name;
    self.names.insert(name, Entity::Func(f));
  }

  /// Run type inference. Diagnostics are accumulated across the whole
  /// pass and returned together.
  pub fn typecheck(&mut self) -> std::result::Result<(), Vec<CompileError>> {
    infer::check_program(&mut self.ctx, &mut self.hir, &self.names, self.config.unit_tests);
    if self.ctx.errors.is_empty() {
      Ok(())
    } else {
      Err(std::mem::take(&mut self.ctx.errors))
    }
  }

  /// Run the whole pipeline and return the C translation unit.
  pub fn compile(&mut self) -> std::result::Result<String, Vec<CompileError>> {
    self.typecheck()?;
    if self.config.func_tree {
      info!("function tree:\n{}", self.func_tree_dump());
    }
    if self.config.hir_dump {
      info!("program graph:\n{}", self.hir_dump());
    }
    let specs = specialize::specialize(&self.hir, &self.names, self.config.unit_tests)
      .map_err(|e| vec![e])?;
    let cg = codegen::CodeGen::new(&self.hir, &self.names, &specs);
    cg.emit_unit().map_err(|e| vec![e])
  }

  /// Run the pipeline and write the C to `out`.
  pub fn compile_to(&mut self, out: &mut impl Write)
    -> std::result::Result<(), Vec<CompileError>>
  {
    let c = self.compile()?;
    out.write_all(c.as_bytes()).map_err(|e| vec![e.into()])
  }

  /// Run the pipeline and write the C to the configured `--oc` path
  /// (stdout for `-`). The file closes on every path.
  pub fn compile_to_path(&mut self) -> std::result::Result<PathBuf, Vec<CompileError>> {
    let c = self.compile()?;
    let path = self.config.out_c.clone().unwrap_or_else(|| PathBuf::from("-"));
    if path == Path::new("-") {
      let stdout = std::io::stdout();
      let mut lock = stdout.lock();
      lock.write_all(c.as_bytes()).map_err(|e| vec![CompileError::from(e)])?;
      return Ok(path)
    }
    std::fs::write(&path, c).map_err(|e| vec![CompileError::from(e)])?;
    Ok(path)
  }

  /// The `--funcTree` dump.
  #[must_use] pub fn func_tree_dump(&self) -> String {
    let mut out = String::new();
    for (f, func) in self.hir.funcs.enum_iter() {
      if func.parent.is_none() {
        self.hir.dump_func_tree(f, &mut out, 0);
      }
    }
    out
  }

  /// The `--hir` dump.
  #[must_use] pub fn hir_dump(&self) -> String {
    let mut out = String::new();
    for (_, func) in self.hir.funcs.enum_iter() {
      let mut line = String::new();
      self.hir.dump_block(func.body, &mut line, 1);
      use std::fmt::Write as _;
      let _ = writeln!(out, "{} {}:\n{line}", func.kind, func.name);
    }
    out
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn args_parse() {
    let args: Vec<String> =
      ["-d", "--tc", "--oc", "-", "main.vl"].iter().map(|s| (*s).to_owned()).collect();
    let cfg = Config::from_args(&args).unwrap();
    assert!(cfg.debug && cfg.trace_types);
    assert_eq!(cfg.out_c.as_deref(), Some(Path::new("-")));
    assert_eq!(cfg.source.as_deref(), Some(Path::new("main.vl")));
  }

  #[test]
  fn args_reject_bad_usage() {
    let bad = ["main.c"].iter().map(|s| (*s).to_owned()).collect::<Vec<_>>();
    assert_eq!(Config::from_args(&bad).unwrap_err().kind, ErrorKind::Usage);
    let none: Vec<String> = vec![];
    assert_eq!(Config::from_args(&none).unwrap_err().kind, ErrorKind::Usage);
  }

  #[test]
  fn import_search_order() {
    let dir = tempfile::tempdir().unwrap();
    let top_dir = dir.path().join("top");
    let local_dir = dir.path().join("local");
    std::fs::create_dir_all(&top_dir).unwrap();
    std::fs::create_dir_all(&local_dir).unwrap();
    std::fs::write(top_dir.join("util.vl"), "").unwrap();
    std::fs::write(local_dir.join("util.vl"), "").unwrap();

    let config = Config {
      source: Some(top_dir.join("main.vl")),
      ..Config::default()
    };
    // The importing file's directory wins over the top-level directory.
    let found = resolve_import(&config, &local_dir.join("mod.vl"), "util").unwrap();
    assert_eq!(found, local_dir.join("util.vl"));
    // Without a local copy, the search falls back to the top directory.
    let found = resolve_import(&config, &dir.path().join("mod.vl"), "util").unwrap();
    assert_eq!(found, top_dir.join("util.vl"));
    let missing = resolve_import(&config, &local_dir.join("mod.vl"), "nonesuch");
    assert_eq!(missing.unwrap_err().kind, ErrorKind::NotFound);
  }
}
