//! Term representation for a functional language with effects and pattern
//! matching, as an instantiation of the binding-tree kernel.
//!
//! High-level constructors macro-expand into kernel shapes: an n-ary lambda
//! is one `Lam` node around a chain of abstractions, `let` folds rightward,
//! and `let rec` wraps its bindings in a `Rec` node so the bound names
//! scope over the binding bodies.

pub mod anf;
pub mod codec;
pub mod curry;
pub mod decompile;
pub mod eta;

use std::fmt;
use std::sync::Arc;

use crate::abt::{self, FreeVars, Kind, Name, Signature};

pub use crate::abt::alpha_eq;
pub use anf::anf;
pub use curry::curry;
pub use decompile::{CompiledParam, RefParam, fully_decompile, strip_outer_compiled};
pub use eta::eta_normal_form;

/// A content-addressed identifier.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash(Arc<[u8]>);

impl Hash {
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Hash(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#")?;
        for byte in self.0.iter() {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Identifies a definition: either a builtin known by name or a derived
/// (hashed) definition.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Id {
    Builtin(Name),
    Derived(Hash),
}

/// Index of a constructor within its data declaration.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct ConstructorId(pub u32);

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum UnboxedType {
    Int64,
    UInt64,
    Float,
    Boolean,
}

/// An unboxed literal: raw bits tagged with their interpretation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Unboxed {
    pub bits: u64,
    pub typ: UnboxedType,
}

impl Unboxed {
    pub fn int(n: i64) -> Self {
        Unboxed { bits: n as u64, typ: UnboxedType::Int64 }
    }

    pub fn uint(n: u64) -> Self {
        Unboxed { bits: n, typ: UnboxedType::UInt64 }
    }

    pub fn float(f: f64) -> Self {
        Unboxed { bits: f.to_bits(), typ: UnboxedType::Float }
    }

    pub fn boolean(b: bool) -> Self {
        Unboxed { bits: b as u64, typ: UnboxedType::Boolean }
    }

    pub fn as_int(&self) -> i64 {
        self.bits as i64
    }

    pub fn as_uint(&self) -> u64 {
        self.bits
    }

    pub fn as_float(&self) -> f64 {
        f64::from_bits(self.bits)
    }

    pub fn as_boolean(&self) -> bool {
        self.bits != 0
    }
}

/// A match pattern. `arity` counts the names a pattern binds; a case body
/// carries exactly that many leading abstractions.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Pattern {
    /// Matches anything, binds nothing.
    Unbound,
    /// Matches anything, binds one name.
    Bind,
    Literal(Unboxed),
    Data(Id, ConstructorId, Vec<Pattern>),
    /// Binds the matched value and also matches the inner pattern.
    As(Box<Pattern>),
    EffectPure(Box<Pattern>),
    EffectBind(Id, ConstructorId, Vec<Pattern>, Box<Pattern>),
}

impl Pattern {
    pub fn arity(&self) -> usize {
        match self {
            Pattern::Unbound | Pattern::Literal(_) => 0,
            Pattern::Bind => 1,
            Pattern::Data(_, _, fields) => fields.iter().map(Pattern::arity).sum(),
            Pattern::As(inner) => 1 + inner.arity(),
            Pattern::EffectPure(inner) => inner.arity(),
            Pattern::EffectBind(_, _, fields, k) => {
                fields.iter().map(Pattern::arity).sum::<usize>() + k.arity()
            }
        }
    }
}

/// One arm of a `match`.
#[derive(Clone, PartialEq, Debug)]
pub struct MatchCase<R> {
    pub pattern: Pattern,
    pub guard: Option<R>,
    pub body: R,
}

/// An opaque compiled value embedded in a term, shared by pointer.
///
/// Equality and the codec's sharing detection use pointer identity, never
/// contents.
#[derive(Clone, Debug)]
pub struct Param(Arc<dyn CompiledParam>);

impl Param {
    pub fn new(param: impl CompiledParam + 'static) -> Self {
        Param(Arc::new(param))
    }

    pub fn from_arc(param: Arc<dyn CompiledParam>) -> Self {
        Param(param)
    }

    /// Pointer identity, the key used for cycle detection.
    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

impl std::ops::Deref for Param {
    type Target = dyn CompiledParam;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

impl PartialEq for Param {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.0), Arc::as_ptr(&other.0))
    }
}

impl Eq for Param {}

/// The language-specific node shapes. Recursive positions are `R`.
#[derive(Clone, PartialEq, Debug)]
pub enum Form<R> {
    /// A lambda; the payload is the binder chain around the body.
    Lam(R),
    Apply(R, Vec<R>),
    /// Recursive bindings and the body they scope over. Always nested
    /// inside a `Rec` whose binder chain introduces the bound names.
    LetRec(Vec<R>, R),
    /// A single binding; the payload's second slot is the binder around
    /// the body.
    Let(R, R),
    Rec(R),
    If(R, R, R),
    And(R, R),
    Or(R, R),
    Match(R, Vec<MatchCase<R>>),
    Handle(R, R),
    EffectPure(R),
    EffectBind(Id, ConstructorId, Vec<R>, R),
    Request(Id, ConstructorId),
    Constructor(Id, ConstructorId),
    Id(Id),
    Unboxed(Unboxed),
    Text(Arc<str>),
    Sequence(Vec<R>),
    Compiled(Param, Name),
}

/// The shape family instantiating the kernel for this language.
pub struct TermSig;

/// A term of the language, annotated with free variables by default.
pub type Term<A = FreeVars> = abt::Term<TermSig, A>;

impl<A> fmt::Debug for Term<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        abt::debug_fmt(self, f)
    }
}

impl Signature for TermSig {
    type Shape<R> = Form<R>;

    fn map<R, S>(shape: &Form<R>, mut f: impl FnMut(&R) -> S) -> Form<S> {
        match shape {
            Form::Lam(body) => Form::Lam(f(body)),
            Form::Apply(func, args) => {
                let func = f(func);
                Form::Apply(func, args.iter().map(&mut f).collect())
            }
            Form::LetRec(bindings, body) => {
                let bindings = bindings.iter().map(&mut f).collect();
                Form::LetRec(bindings, f(body))
            }
            Form::Let(binding, body) => {
                let binding = f(binding);
                Form::Let(binding, f(body))
            }
            Form::Rec(inner) => Form::Rec(f(inner)),
            Form::If(cond, then, otherwise) => {
                let cond = f(cond);
                let then = f(then);
                Form::If(cond, then, f(otherwise))
            }
            Form::And(x, y) => {
                let x = f(x);
                Form::And(x, f(y))
            }
            Form::Or(x, y) => {
                let x = f(x);
                Form::Or(x, f(y))
            }
            Form::Match(scrutinee, cases) => {
                let scrutinee = f(scrutinee);
                let cases = cases
                    .iter()
                    .map(|case| MatchCase {
                        pattern: case.pattern.clone(),
                        guard: case.guard.as_ref().map(&mut f),
                        body: f(&case.body),
                    })
                    .collect();
                Form::Match(scrutinee, cases)
            }
            Form::Handle(handler, block) => {
                let handler = f(handler);
                Form::Handle(handler, f(block))
            }
            Form::EffectPure(value) => Form::EffectPure(f(value)),
            Form::EffectBind(id, ctor, args, k) => {
                let args: Vec<S> = args.iter().map(&mut f).collect();
                Form::EffectBind(id.clone(), *ctor, args, f(k))
            }
            Form::Request(id, ctor) => Form::Request(id.clone(), *ctor),
            Form::Constructor(id, ctor) => Form::Constructor(id.clone(), *ctor),
            Form::Id(id) => Form::Id(id.clone()),
            Form::Unboxed(u) => Form::Unboxed(*u),
            Form::Text(text) => Form::Text(text.clone()),
            Form::Sequence(items) => Form::Sequence(items.iter().map(&mut f).collect()),
            Form::Compiled(param, name) => Form::Compiled(param.clone(), name.clone()),
        }
    }

    fn map_accumulate<R, S, T>(
        shape: &Form<R>,
        state: T,
        mut f: impl FnMut(T, &R) -> (T, S),
    ) -> (T, Form<S>) {
        fn thread<R, S, T>(
            items: &[R],
            mut state: T,
            f: &mut impl FnMut(T, &R) -> (T, S),
        ) -> (T, Vec<S>) {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                let (next, mapped) = f(state, item);
                state = next;
                out.push(mapped);
            }
            (state, out)
        }

        match shape {
            Form::Lam(body) => {
                let (state, body) = f(state, body);
                (state, Form::Lam(body))
            }
            Form::Apply(func, args) => {
                let (state, func) = f(state, func);
                let (state, args) = thread(args, state, &mut f);
                (state, Form::Apply(func, args))
            }
            Form::LetRec(bindings, body) => {
                let (state, bindings) = thread(bindings, state, &mut f);
                let (state, body) = f(state, body);
                (state, Form::LetRec(bindings, body))
            }
            Form::Let(binding, body) => {
                let (state, binding) = f(state, binding);
                let (state, body) = f(state, body);
                (state, Form::Let(binding, body))
            }
            Form::Rec(inner) => {
                let (state, inner) = f(state, inner);
                (state, Form::Rec(inner))
            }
            Form::If(cond, then, otherwise) => {
                let (state, cond) = f(state, cond);
                let (state, then) = f(state, then);
                let (state, otherwise) = f(state, otherwise);
                (state, Form::If(cond, then, otherwise))
            }
            Form::And(x, y) => {
                let (state, x) = f(state, x);
                let (state, y) = f(state, y);
                (state, Form::And(x, y))
            }
            Form::Or(x, y) => {
                let (state, x) = f(state, x);
                let (state, y) = f(state, y);
                (state, Form::Or(x, y))
            }
            Form::Match(scrutinee, cases) => {
                let (mut state, scrutinee) = f(state, scrutinee);
                let mut out = Vec::with_capacity(cases.len());
                for case in cases {
                    let guard = match &case.guard {
                        Some(guard) => {
                            let (next, guard) = f(state, guard);
                            state = next;
                            Some(guard)
                        }
                        None => None,
                    };
                    let (next, body) = f(state, &case.body);
                    state = next;
                    out.push(MatchCase { pattern: case.pattern.clone(), guard, body });
                }
                (state, Form::Match(scrutinee, out))
            }
            Form::Handle(handler, block) => {
                let (state, handler) = f(state, handler);
                let (state, block) = f(state, block);
                (state, Form::Handle(handler, block))
            }
            Form::EffectPure(value) => {
                let (state, value) = f(state, value);
                (state, Form::EffectPure(value))
            }
            Form::EffectBind(id, ctor, args, k) => {
                let (state, args) = thread(args, state, &mut f);
                let (state, k) = f(state, k);
                (state, Form::EffectBind(id.clone(), *ctor, args, k))
            }
            Form::Request(id, ctor) => (state, Form::Request(id.clone(), *ctor)),
            Form::Constructor(id, ctor) => (state, Form::Constructor(id.clone(), *ctor)),
            Form::Id(id) => (state, Form::Id(id.clone())),
            Form::Unboxed(u) => (state, Form::Unboxed(*u)),
            Form::Text(text) => (state, Form::Text(text.clone())),
            Form::Sequence(items) => {
                let (state, items) = thread(items, state, &mut f);
                (state, Form::Sequence(items))
            }
            Form::Compiled(param, name) => {
                (state, Form::Compiled(param.clone(), name.clone()))
            }
        }
    }

    fn for_each<'a, R: 'a>(shape: &'a Form<R>, mut f: impl FnMut(&'a R)) {
        match shape {
            Form::Lam(body) => f(body),
            Form::Apply(func, args) => {
                f(func);
                args.iter().for_each(f);
            }
            Form::LetRec(bindings, body) => {
                bindings.iter().for_each(&mut f);
                f(body);
            }
            Form::Let(binding, body) => {
                f(binding);
                f(body);
            }
            Form::Rec(inner) => f(inner),
            Form::If(cond, then, otherwise) => {
                f(cond);
                f(then);
                f(otherwise);
            }
            Form::And(x, y) | Form::Or(x, y) | Form::Handle(x, y) => {
                f(x);
                f(y);
            }
            Form::Match(scrutinee, cases) => {
                f(scrutinee);
                for case in cases {
                    if let Some(guard) = &case.guard {
                        f(guard);
                    }
                    f(&case.body);
                }
            }
            Form::EffectPure(value) => f(value),
            Form::EffectBind(_, _, args, k) => {
                args.iter().for_each(&mut f);
                f(k);
            }
            Form::Sequence(items) => items.iter().for_each(f),
            Form::Request(..)
            | Form::Constructor(..)
            | Form::Id(_)
            | Form::Unboxed(_)
            | Form::Text(_)
            | Form::Compiled(..) => {}
        }
    }

    fn shape_eq<R>(a: &Form<R>, b: &Form<R>, mut eq: impl FnMut(&R, &R) -> bool) -> bool {
        fn all<R>(xs: &[R], ys: &[R], eq: &mut impl FnMut(&R, &R) -> bool) -> bool {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| eq(x, y))
        }

        match (a, b) {
            (Form::Lam(a), Form::Lam(b)) => eq(a, b),
            (Form::Apply(f1, a1), Form::Apply(f2, a2)) => eq(f1, f2) && all(a1, a2, &mut eq),
            (Form::LetRec(b1, t1), Form::LetRec(b2, t2)) => {
                all(b1, b2, &mut eq) && eq(t1, t2)
            }
            (Form::Let(e1, b1), Form::Let(e2, b2)) => eq(e1, e2) && eq(b1, b2),
            (Form::Rec(a), Form::Rec(b)) => eq(a, b),
            (Form::If(c1, t1, e1), Form::If(c2, t2, e2)) => {
                eq(c1, c2) && eq(t1, t2) && eq(e1, e2)
            }
            (Form::And(x1, y1), Form::And(x2, y2)) => eq(x1, x2) && eq(y1, y2),
            (Form::Or(x1, y1), Form::Or(x2, y2)) => eq(x1, x2) && eq(y1, y2),
            (Form::Match(s1, c1), Form::Match(s2, c2)) => {
                eq(s1, s2)
                    && c1.len() == c2.len()
                    && c1.iter().zip(c2).all(|(x, y)| {
                        x.pattern == y.pattern
                            && match (&x.guard, &y.guard) {
                                (Some(g1), Some(g2)) => eq(g1, g2),
                                (None, None) => true,
                                _ => false,
                            }
                            && eq(&x.body, &y.body)
                    })
            }
            (Form::Handle(h1, b1), Form::Handle(h2, b2)) => eq(h1, h2) && eq(b1, b2),
            (Form::EffectPure(a), Form::EffectPure(b)) => eq(a, b),
            (Form::EffectBind(i1, c1, a1, k1), Form::EffectBind(i2, c2, a2, k2)) => {
                i1 == i2 && c1 == c2 && all(a1, a2, &mut eq) && eq(k1, k2)
            }
            (Form::Request(i1, c1), Form::Request(i2, c2)) => i1 == i2 && c1 == c2,
            (Form::Constructor(i1, c1), Form::Constructor(i2, c2)) => i1 == i2 && c1 == c2,
            (Form::Id(a), Form::Id(b)) => a == b,
            (Form::Unboxed(a), Form::Unboxed(b)) => a == b,
            (Form::Text(a), Form::Text(b)) => a == b,
            (Form::Sequence(a), Form::Sequence(b)) => all(a, b, &mut eq),
            (Form::Compiled(p1, n1), Form::Compiled(p2, n2)) => p1 == p2 && n1 == n2,
            _ => false,
        }
    }
}

pub(crate) fn tm(shape: Form<Term>) -> Term {
    abt::tm::<TermSig>(shape)
}

/// A variable occurrence.
pub fn var(name: impl Into<Name>) -> Term {
    abt::var(name.into())
}

/// A bare abstraction, for building match-case bodies and the like.
pub fn abs(name: impl Into<Name>, body: Term) -> Term {
    abt::abs(name.into(), body)
}

/// `λ x₁ … xₙ. body` as a single `Lam` node around the binder chain.
pub fn lam<N: Into<Name>>(names: impl IntoIterator<Item = N>, body: Term) -> Term {
    let names: Vec<Name> = names.into_iter().map(Into::into).collect();
    assert!(!names.is_empty(), "lambda with no binders");
    let chain = names
        .into_iter()
        .rev()
        .fold(body, |acc, name| abt::abs(name, acc));
    tm(Form::Lam(chain))
}

/// Application. With no arguments this is just the function.
pub fn apply(func: Term, args: impl IntoIterator<Item = Term>) -> Term {
    let args: Vec<Term> = args.into_iter().collect();
    if args.is_empty() {
        func
    } else {
        tm(Form::Apply(func, args))
    }
}

/// Sequential (non-recursive) bindings, folded rightward into nested `Let`
/// nodes.
pub fn let_<N: Into<Name>>(bindings: impl IntoIterator<Item = (N, Term)>, body: Term) -> Term {
    let bindings: Vec<(Name, Term)> = bindings
        .into_iter()
        .map(|(name, value)| (name.into(), value))
        .collect();
    bindings
        .into_iter()
        .rev()
        .fold(body, |acc, (name, value)| tm(Form::Let(value, abt::abs(name, acc))))
}

/// Mutually recursive bindings. The bound names scope over every binding
/// body as well as the result body.
pub fn letrec<N: Into<Name>>(bindings: impl IntoIterator<Item = (N, Term)>, body: Term) -> Term {
    let (names, values): (Vec<Name>, Vec<Term>) = bindings
        .into_iter()
        .map(|(name, value)| (name.into(), value))
        .unzip();
    if names.is_empty() {
        return body;
    }
    let inner = tm(Form::LetRec(values, body));
    let chain = names
        .into_iter()
        .rev()
        .fold(inner, |acc, name| abt::abs(name, acc));
    tm(Form::Rec(chain))
}

pub fn if_(cond: Term, then: Term, otherwise: Term) -> Term {
    tm(Form::If(cond, then, otherwise))
}

pub fn and(x: Term, y: Term) -> Term {
    tm(Form::And(x, y))
}

pub fn or(x: Term, y: Term) -> Term {
    tm(Form::Or(x, y))
}

/// A pattern match. Every case is checked against the binder-count
/// invariant (see [`match_case`]).
pub fn match_(scrutinee: Term, cases: Vec<MatchCase<Term>>) -> Term {
    for case in &cases {
        check_case(case);
    }
    tm(Form::Match(scrutinee, cases))
}

/// A match arm. The body (and the guard, when present) must carry exactly
/// `pattern.arity()` leading abstractions binding the pattern's names.
pub fn match_case(pattern: Pattern, guard: Option<Term>, body: Term) -> MatchCase<Term> {
    let case = MatchCase { pattern, guard, body };
    check_case(&case);
    case
}

fn check_case(case: &MatchCase<Term>) {
    let arity = case.pattern.arity();
    let (binders, _) = case.body.abs_chain();
    assert_eq!(
        binders.len(),
        arity,
        "match case body binds {} name(s) but the pattern has arity {}",
        binders.len(),
        arity,
    );
    if let Some(guard) = &case.guard {
        let (binders, _) = guard.abs_chain();
        assert_eq!(
            binders.len(),
            arity,
            "match case guard binds {} name(s) but the pattern has arity {}",
            binders.len(),
            arity,
        );
    }
}

pub fn handle(handler: Term, block: Term) -> Term {
    tm(Form::Handle(handler, block))
}

pub fn effect_pure(value: Term) -> Term {
    tm(Form::EffectPure(value))
}

pub fn effect_bind(id: Id, ctor: ConstructorId, args: Vec<Term>, k: Term) -> Term {
    tm(Form::EffectBind(id, ctor, args, k))
}

pub fn request(id: Id, ctor: ConstructorId) -> Term {
    tm(Form::Request(id, ctor))
}

pub fn constructor(id: Id, ctor: ConstructorId) -> Term {
    tm(Form::Constructor(id, ctor))
}

/// A reference to a definition by identifier.
pub fn ident(id: Id) -> Term {
    tm(Form::Id(id))
}

pub fn unboxed(u: Unboxed) -> Term {
    tm(Form::Unboxed(u))
}

pub fn int(n: i64) -> Term {
    unboxed(Unboxed::int(n))
}

pub fn uint(n: u64) -> Term {
    unboxed(Unboxed::uint(n))
}

pub fn float(f: f64) -> Term {
    unboxed(Unboxed::float(f))
}

pub fn boolean(b: bool) -> Term {
    unboxed(Unboxed::boolean(b))
}

pub fn text(s: impl Into<Arc<str>>) -> Term {
    tm(Form::Text(s.into()))
}

pub fn sequence(items: impl IntoIterator<Item = Term>) -> Term {
    tm(Form::Sequence(items.into_iter().collect()))
}

/// An embedded compiled value. `name` is the surface name it was compiled
/// from, kept as a binding hint for decompilation.
pub fn compiled(param: Param, name: impl Into<Name>) -> Term {
    tm(Form::Compiled(param, name.into()))
}

/// Matches a lambda node, yielding its binder chain (outermost first) and
/// the innermost body.
pub fn unlam(t: &Term) -> Option<(Vec<Name>, &Term)> {
    match t.kind() {
        Kind::Tm(Form::Lam(chain)) => Some(chain.abs_chain()),
        _ => None,
    }
}

/// Matches a `let rec` node, yielding the bound names, their bindings and
/// the body.
pub fn unletrec(t: &Term) -> Option<(Vec<Name>, Vec<Term>, Term)> {
    let Kind::Tm(Form::Rec(chain)) = t.kind() else {
        return None;
    };
    let (names, inner) = chain.abs_chain();
    let Kind::Tm(Form::LetRec(bindings, body)) = inner.kind() else {
        return None;
    };
    Some((names, bindings.clone(), body.clone()))
}
