//! The global symbol interner.
//!
//! Symbols are process-wide interned names: two symbols with the same text
//! are the same value, so identifier comparison is integer comparison.
//! Interned strings are never freed.

use std::fmt::{self, Display};
use std::sync::{LazyLock, Mutex};

use hashbrown::HashMap;

use crate::types::{Idx, IdxVec};

/// An interned string.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(u32);

impl Idx for Symbol {
  fn into_usize(self) -> usize { self.0 as usize }
  #[allow(clippy::cast_possible_truncation)]
  fn from_usize(n: usize) -> Self { Self(n as u32) }
}

/// The string interner.
#[derive(Default)]
pub struct Interner {
  names: HashMap<&'static str, Symbol>,
  strs: IdxVec<Symbol, &'static str>,
}

impl Interner {
  /// Intern a string, returning its unique [`Symbol`].
  pub fn intern(&mut self, s: &str) -> Symbol {
    if let Some(&sym) = self.names.get(s) { return sym }
    // Interner storage lives for the whole process.
    let s: &'static str = Box::leak(s.to_owned().into_boxed_str());
    let sym = self.strs.push(s);
    self.names.insert(s, sym);
    sym
  }

  /// The text of a previously interned symbol.
  #[must_use] pub fn str(&self, s: Symbol) -> &'static str { self.strs[s] }
}

static INTERNER: LazyLock<Mutex<Interner>> = LazyLock::new(Mutex::default);

/// Intern a string into the global interner.
pub fn intern(s: &str) -> Symbol {
  INTERNER.lock().expect("poisoned").intern(s)
}

/// Run a function with access to the global interner.
pub fn with_interner<R>(f: impl FnOnce(&mut Interner) -> R) -> R {
  f(&mut INTERNER.lock().expect("poisoned"))
}

impl Symbol {
  /// The text of this symbol.
  #[must_use] pub fn as_str(self) -> &'static str {
    with_interner(|i| i.str(self))
  }
}

impl Display for Symbol {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    self.as_str().fmt(f)
  }
}

/// Build a dense map from symbol index to `T`, for fast lookup of small
/// keyword classes. The result is indexed by [`Symbol::into_usize`].
#[must_use] pub fn init_dense_symbol_map<T: Copy>(xs: &[(Symbol, T)]) -> Box<[Option<T>]> {
  let n = xs.iter().map(|&(a, _)| a.into_usize() + 1).max().unwrap_or(0);
  let mut vec = vec![None; n];
  for &(a, t) in xs { vec[a.into_usize()] = Some(t) }
  vec.into()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn interning_is_idempotent() {
    let a = intern("append");
    let b = intern("append");
    assert_eq!(a, b);
    assert_eq!(a.as_str(), "append");
    assert_ne!(a, intern("concat"));
  }

  #[test]
  fn dense_map() {
    let a = intern("alpha");
    let b = intern("beta");
    let map = init_dense_symbol_map(&[(a, 0u8), (b, 1u8)]);
    assert_eq!(map[a.into_usize()], Some(0));
    assert_eq!(map[b.into_usize()], Some(1));
  }
}
