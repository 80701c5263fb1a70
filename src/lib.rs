#![allow(clippy::type_complexity)]

//! Abstract binding trees with named binders, and a graph codec that
//! preserves sharing and cycles.
//!
//! The [`abt`] module is the kernel: a tree generic over a per-language
//! shape family, with annotations on every node, generic traversals and
//! capture-avoiding substitution. The [`term`] module instantiates the
//! kernel for a functional language with effects and pattern matching and
//! adds the term-level transformations (β-reduction, η-normalisation,
//! A-normal form, currying, decompilation of embedded compiled values).
//! The [`codec`] module is an independent byte-level protocol for
//! serialising arbitrary object graphs with shared and cyclic references.

pub mod abt;
pub mod codec;
pub mod term;
pub mod utils;
