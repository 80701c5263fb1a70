//! Abstract binding tree kernel.
//!
//! A tree is generic over a [`Signature`]: the family of per-language node
//! shapes whose recursive positions are subtrees. The kernel contributes the
//! three universal node kinds (variable, abstraction, shape) plus the
//! annotation machinery, generic traversals and substitution.

pub mod subst;

use std::fmt;
use std::sync::Arc;

use crate::utils::TreeEq;

pub use subst::{
    beta_reduce, beta_reduce2, beta_reduce3, beta_reduce4, rename, subst, substs,
};

/// A variable or binder name with structural equality.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Name(Arc<str>);

impl Name {
    pub fn new(text: impl Into<Arc<str>>) -> Self {
        Name(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `self` if it is not taken, otherwise `self` with the smallest
    /// non-negative integer suffix that makes the result fresh.
    pub fn freshen_in(&self, taken: &FreeVars) -> Name {
        if !taken.contains(self) {
            return self.clone();
        }
        (0u64..)
            .map(|i| Name::new(format!("{}{}", self.0, i)))
            .find(|candidate| !taken.contains(candidate))
            .unwrap()
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

impl From<&str> for Name {
    fn from(text: &str) -> Self {
        Name::new(text)
    }
}

impl From<String> for Name {
    fn from(text: String) -> Self {
        Name::new(text)
    }
}

/// The free-variable set carried by every node under the default annotation.
pub type FreeVars = im::HashSet<Name>;

/// A family of tree shapes, generic over the type of their recursive slots.
///
/// Implementations rebuild a shape from borrowed children so that unchanged
/// payloads (names, literals, identifiers) are cloned while children are
/// produced by the callback. Children are always presented in one fixed
/// left-to-right order; every generic traversal relies on it.
pub trait Signature {
    type Shape<R>;

    /// Apply `f` to every immediate child, rebuilding the shape.
    fn map<R, S>(shape: &Self::Shape<R>, f: impl FnMut(&R) -> S) -> Self::Shape<S>;

    /// Like [`Signature::map`], threading a state left-to-right.
    fn map_accumulate<R, S, T>(
        shape: &Self::Shape<R>,
        state: T,
        f: impl FnMut(T, &R) -> (T, S),
    ) -> (T, Self::Shape<S>);

    /// Visit every immediate child in order.
    fn for_each<'a, R: 'a>(shape: &'a Self::Shape<R>, f: impl FnMut(&'a R));

    /// Structural equality of two shapes, comparing children with `eq`.
    fn shape_eq<R>(a: &Self::Shape<R>, b: &Self::Shape<R>, eq: impl FnMut(&R, &R) -> bool)
    -> bool;

    /// The immediate children in their deterministic visit order.
    fn children<'a, R: 'a>(shape: &'a Self::Shape<R>) -> Vec<&'a R> {
        let mut out = Vec::new();
        Self::for_each(shape, |child| out.push(child));
        out
    }
}

/// The three universal node kinds.
pub enum Kind<F: Signature, A> {
    /// A free or bound occurrence of a name.
    Var(Name),
    /// Binds a name inside the body.
    Abs(Name, Term<F, A>),
    /// A language-specific shape whose recursive positions are subtrees.
    Tm(F::Shape<Term<F, A>>),
}

struct Node<F: Signature, A> {
    annotation: A,
    kind: Kind<F, A>,
}

/// An immutable, cheaply clonable handle to an annotated tree node.
///
/// Every node carries an annotation; under the default `A = FreeVars` the
/// public constructors [`var`], [`abs`] and [`tm`] maintain the invariant
/// that the annotation is exactly the free-variable set of the subtree.
/// Transformations share unchanged subtrees by reference.
pub struct Term<F: Signature, A = FreeVars>(Arc<Node<F, A>>);

impl<F: Signature, A> Clone for Term<F, A> {
    fn clone(&self) -> Self {
        Term(self.0.clone())
    }
}

impl<F: Signature, A> Term<F, A> {
    pub(crate) fn raw(annotation: A, kind: Kind<F, A>) -> Self {
        Term(Arc::new(Node { annotation, kind }))
    }

    pub fn annotation(&self) -> &A {
        &self.0.annotation
    }

    pub fn kind(&self) -> &Kind<F, A> {
        &self.0.kind
    }

    /// Pointer identity of the underlying node.
    pub fn as_ptr(&self) -> *const () {
        Arc::as_ptr(&self.0) as *const ()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Splits a run of leading abstractions off the term. The name list is
    /// outermost-first and may be empty.
    pub fn abs_chain(&self) -> (Vec<Name>, &Term<F, A>) {
        let mut names = Vec::new();
        let mut body = self;
        while let Kind::Abs(name, inner) = body.kind() {
            names.push(name.clone());
            body = inner;
        }
        (names, body)
    }

    /// Lift a function over every annotation, preserving structure.
    pub fn map_annotations<B>(&self, f: &mut impl FnMut(&A) -> B) -> Term<F, B> {
        let annotation = f(self.annotation());
        let kind = match self.kind() {
            Kind::Var(name) => Kind::Var(name.clone()),
            Kind::Abs(name, body) => Kind::Abs(name.clone(), body.map_annotations(f)),
            Kind::Tm(shape) => Kind::Tm(F::map(shape, |child| child.map_annotations(f))),
        };
        Term::raw(annotation, kind)
    }

    /// Re-annotate every node with its free-variable set, bottom-up.
    pub fn annotate_free(&self) -> Term<F, FreeVars> {
        match self.kind() {
            Kind::Var(name) => var(name.clone()),
            Kind::Abs(name, body) => abs(name.clone(), body.annotate_free()),
            Kind::Tm(shape) => tm(F::map(shape, |child| child.annotate_free())),
        }
    }

    /// Push a state downward. At each node `f` receives the parent state and
    /// the node, and yields the state passed to the children together with
    /// the node's new annotation.
    pub fn annotate_down<S: Clone, B>(
        &self,
        state: &S,
        f: &mut impl FnMut(&S, &Term<F, A>) -> (S, B),
    ) -> Term<F, B> {
        let (child_state, annotation) = f(state, self);
        let kind = match self.kind() {
            Kind::Var(name) => Kind::Var(name.clone()),
            Kind::Abs(name, body) => {
                Kind::Abs(name.clone(), body.annotate_down(&child_state, f))
            }
            Kind::Tm(shape) => {
                Kind::Tm(F::map(shape, |child| child.annotate_down(&child_state, f)))
            }
        };
        Term::raw(annotation, kind)
    }

    /// Bottom-up re-annotation over a monoid. `f` is consulted only at the
    /// leaves (variables and shapes with no children); inner nodes combine
    /// their children's annotations.
    pub fn annotate_up<M: Monoid>(&self, f: &mut impl FnMut(&Term<F, A>) -> M) -> Term<F, M> {
        match self.kind() {
            Kind::Var(name) => Term::raw(f(self), Kind::Var(name.clone())),
            Kind::Abs(name, body) => {
                let body = body.annotate_up(f);
                let annotation = body.annotation().clone();
                Term::raw(annotation, Kind::Abs(name.clone(), body))
            }
            Kind::Tm(shape) => {
                let shape = F::map(shape, |child| child.annotate_up(f));
                let mut combined: Option<M> = None;
                F::for_each(&shape, |child| {
                    let ann = child.annotation().clone();
                    combined = Some(match combined.take() {
                        None => ann,
                        Some(acc) => acc.combine(ann),
                    });
                });
                let annotation = combined.unwrap_or_else(|| f(self));
                Term::raw(annotation, Kind::Tm(shape))
            }
        }
    }

    /// Fold the tree into a monoid value, consulting `f` only at leaves.
    pub fn fold_map<M: Monoid>(&self, f: &mut impl FnMut(&Term<F, A>) -> M) -> M {
        match self.kind() {
            Kind::Var(_) => f(self),
            Kind::Abs(_, body) => body.fold_map(f),
            Kind::Tm(shape) => {
                let mut combined: Option<M> = None;
                F::for_each(shape, |child| {
                    let value = child.fold_map(f);
                    combined = Some(match combined.take() {
                        None => value,
                        Some(acc) => acc.combine(value),
                    });
                });
                combined.unwrap_or_else(|| f(self))
            }
        }
    }

    /// Every name occurring in the tree: variables and binders alike.
    pub fn names(&self) -> FreeVars {
        match self.kind() {
            Kind::Var(name) => FreeVars::unit(name.clone()),
            Kind::Abs(name, body) => body.names().update(name.clone()),
            Kind::Tm(shape) => {
                let mut out = FreeVars::new();
                F::for_each(shape, |child| {
                    out = std::mem::take(&mut out).union(child.names());
                });
                out
            }
        }
    }

    /// Re-annotate every node with `(original, enclosing binders)`, the
    /// binder stack listing enclosing abstractions innermost-first.
    pub fn annotate_bound(&self) -> Term<F, (A, im::Vector<Name>)>
    where
        A: Clone,
    {
        self.annotate_down(&im::Vector::new(), &mut |stack, t| {
            let annotation = (t.annotation().clone(), stack.clone());
            let child_state = match t.kind() {
                Kind::Abs(name, _) => {
                    let mut stack = stack.clone();
                    stack.push_front(name.clone());
                    stack
                }
                _ => stack.clone(),
            };
            (child_state, annotation)
        })
    }
}

impl<F: Signature> Term<F, FreeVars> {
    /// The free-variable set of this subtree.
    pub fn free_vars(&self) -> &FreeVars {
        self.annotation()
    }

    pub fn is_free(&self, name: &Name) -> bool {
        self.annotation().contains(name)
    }

    /// Apply `f` to the node, then recurse into the children of the result.
    pub fn rewrite_down(&self, f: &mut impl FnMut(&Term<F, FreeVars>) -> Term<F, FreeVars>) -> Self {
        stacker::maybe_grow(64 * 1024, 16 * 1024 * 1024, || {
            let t = f(self);
            match t.kind() {
                Kind::Var(_) => t.clone(),
                Kind::Abs(name, body) => abs(name.clone(), body.rewrite_down(f)),
                Kind::Tm(shape) => tm(F::map(shape, |child| child.rewrite_down(f))),
            }
        })
    }

    /// Recurse into the children first, then apply `f` to the rebuilt node.
    pub fn rewrite_up(&self, f: &mut impl FnMut(&Term<F, FreeVars>) -> Term<F, FreeVars>) -> Self {
        stacker::maybe_grow(64 * 1024, 16 * 1024 * 1024, || {
            let t = match self.kind() {
                Kind::Var(_) => self.clone(),
                Kind::Abs(name, body) => abs(name.clone(), body.rewrite_up(f)),
                Kind::Tm(shape) => tm(F::map(shape, |child| child.rewrite_up(f))),
            };
            f(&t)
        })
    }

    /// [`Term::rewrite_down`] with a state threaded left-to-right through
    /// the whole traversal.
    pub fn rewrite_down_with<S>(
        &self,
        state: S,
        f: &mut impl FnMut(S, &Term<F, FreeVars>) -> (S, Term<F, FreeVars>),
    ) -> (S, Self) {
        stacker::maybe_grow(64 * 1024, 16 * 1024 * 1024, || {
            let (state, t) = f(state, self);
            match t.kind() {
                Kind::Var(_) => (state, t.clone()),
                Kind::Abs(name, body) => {
                    let (state, body) = body.rewrite_down_with(state, f);
                    (state, abs(name.clone(), body))
                }
                Kind::Tm(shape) => {
                    let (state, shape) = F::map_accumulate(shape, state, |state, child| {
                        child.rewrite_down_with(state, f)
                    });
                    (state, tm(shape))
                }
            }
        })
    }
}

/// A variable occurrence. Its free-variable set is the singleton name.
pub fn var<F: Signature>(name: Name) -> Term<F, FreeVars> {
    let annotation = FreeVars::unit(name.clone());
    Term::raw(annotation, Kind::Var(name))
}

/// An abstraction binding `name` in `body`. The binder is removed from the
/// body's free variables.
pub fn abs<F: Signature>(name: Name, body: Term<F, FreeVars>) -> Term<F, FreeVars> {
    let annotation = body.annotation().without(&name);
    Term::raw(annotation, Kind::Abs(name, body))
}

/// A shape node. Its free variables are the union over the children.
pub fn tm<F: Signature>(shape: F::Shape<Term<F, FreeVars>>) -> Term<F, FreeVars> {
    let mut annotation = FreeVars::new();
    F::for_each(&shape, |child| {
        annotation = std::mem::take(&mut annotation).union(child.annotation().clone());
    });
    Term::raw(annotation, Kind::Tm(shape))
}

/// α-equivalence: structural equality modulo bound-variable names.
pub fn alpha_eq<F: Signature, A>(a: &Term<F, A>, b: &Term<F, A>) -> bool {
    type Levels = im::HashMap<Name, usize>;
    fn go<F: Signature, A>(
        la: &Levels,
        lb: &Levels,
        depth: usize,
        a: &Term<F, A>,
        b: &Term<F, A>,
    ) -> bool {
        match (a.kind(), b.kind()) {
            (Kind::Var(x), Kind::Var(y)) => match (la.get(x), lb.get(y)) {
                (Some(i), Some(j)) => i == j,
                (None, None) => x == y,
                _ => false,
            },
            (Kind::Abs(n1, b1), Kind::Abs(n2, b2)) => {
                let la = la.update(n1.clone(), depth);
                let lb = lb.update(n2.clone(), depth);
                go(&la, &lb, depth + 1, b1, b2)
            }
            (Kind::Tm(s1), Kind::Tm(s2)) => {
                F::shape_eq(s1, s2, |x, y| go(la, lb, depth, x, y))
            }
            _ => false,
        }
    }
    go(&Levels::new(), &Levels::new(), 0, a, b)
}

impl<F: Signature, A> TreeEq for Term<F, A> {
    fn tree_eq(&self, other: &Self) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        stacker::maybe_grow(64 * 1024, 16 * 1024 * 1024, || {
            match (self.kind(), other.kind()) {
                (Kind::Var(a), Kind::Var(b)) => a == b,
                (Kind::Abs(n1, b1), Kind::Abs(n2, b2)) => n1 == n2 && b1.tree_eq(b2),
                (Kind::Tm(s1), Kind::Tm(s2)) => F::shape_eq(s1, s2, |a, b| a.tree_eq(b)),
                _ => false,
            }
        })
    }
}

impl<F: Signature, A> PartialEq for Term<F, A> {
    fn eq(&self, other: &Self) -> bool {
        self.tree_eq(other)
    }
}

impl<F: Signature, A> Eq for Term<F, A> {}

/// Shared implementation for [`fmt::Debug`] impls on concrete [`Term`]
/// instantiations. A generic `impl<F, A> Debug for Term<F, A>` bounded on
/// `F::Shape<Term<F, A>>: Debug` is not expressible without the compiler
/// overflowing while proving that bound against itself (the associated
/// type projects back onto `Term<F, A>`), so each concrete `Signature`
/// implementation provides its own impl that calls this helper instead.
pub fn debug_fmt<F: Signature, A>(
    term: &Term<F, A>,
    f: &mut fmt::Formatter<'_>,
) -> fmt::Result
where
    Term<F, A>: fmt::Debug,
    F::Shape<Term<F, A>>: fmt::Debug,
{
    match term.kind() {
        Kind::Var(name) => f.debug_tuple("Var").field(name).finish(),
        Kind::Abs(name, body) => f.debug_tuple("Abs").field(name).field(body).finish(),
        Kind::Tm(shape) => fmt::Debug::fmt(shape, f),
    }
}

/// An associative combine with identity, for [`Term::annotate_up`] and
/// [`Term::fold_map`].
pub trait Monoid: Clone {
    fn empty() -> Self;
    fn combine(self, other: Self) -> Self;
}

impl<T: std::hash::Hash + Eq + Clone> Monoid for im::HashSet<T> {
    fn empty() -> Self {
        im::HashSet::new()
    }

    fn combine(self, other: Self) -> Self {
        self.union(other)
    }
}

impl<T: Clone> Monoid for im::Vector<T> {
    fn empty() -> Self {
        im::Vector::new()
    }

    fn combine(mut self, other: Self) -> Self {
        self.append(other);
        self
    }
}

impl Monoid for usize {
    fn empty() -> Self {
        0
    }

    fn combine(self, other: Self) -> Self {
        self + other
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::{self, Form, TermSig};

    fn n(s: &str) -> Name {
        Name::from(s)
    }

    #[test]
    fn freshen_picks_smallest_suffix() {
        let taken: FreeVars = ["x", "x0", "x1"].into_iter().map(Name::from).collect();
        assert_eq!(n("x").freshen_in(&taken), n("x2"));
        assert_eq!(n("y").freshen_in(&taken), n("y"));
    }

    #[test]
    fn free_vars_of_lambda() {
        let t = term::lam(
            ["x"],
            term::apply(term::var("f"), [term::var("x"), term::var("y")]),
        );
        let expected: FreeVars = [n("f"), n("y")].into_iter().collect();
        assert_eq!(t.free_vars().clone(), expected);
    }

    #[test]
    fn annotations_cover_every_node() {
        let body = term::apply(term::var("f"), [term::var("x")]);
        let t = term::lam(["x"], body.clone());
        let body_fv: FreeVars = [n("f"), n("x")].into_iter().collect();
        assert_eq!(body.free_vars().clone(), body_fv);
        assert_eq!(t.free_vars().clone(), FreeVars::unit(n("f")));
    }

    #[test]
    fn abs_chain_splits_binders() {
        let t = term::lam(["x", "y", "z"], term::var("x"));
        let Kind::Tm(Form::Lam(chain)) = t.kind() else {
            panic!("expected a lambda node");
        };
        let (names, body) = chain.abs_chain();
        assert_eq!(names, vec![n("x"), n("y"), n("z")]);
        assert!(matches!(body.kind(), Kind::Var(v) if *v == n("x")));
    }

    fn var_stack(t: &term::Term<(FreeVars, im::Vector<Name>)>) -> Option<im::Vector<Name>> {
        match t.kind() {
            Kind::Var(_) => Some(t.annotation().1.clone()),
            Kind::Abs(_, body) => var_stack(body),
            Kind::Tm(shape) => TermSig::children(shape).into_iter().find_map(var_stack),
        }
    }

    #[test]
    fn annotate_bound_stacks_innermost_first() {
        let t = term::lam(["x"], term::lam(["y"], term::var("x")));
        let stack = var_stack(&t.annotate_bound()).unwrap();
        assert_eq!(stack, im::Vector::from(vec![n("y"), n("x")]));
    }

    #[test]
    fn annotate_down_pushes_state_to_children() {
        let t = term::lam(["x"], term::var("x"));
        let depths = t.annotate_down(&0usize, &mut |depth, _| (depth + 1, *depth));
        assert_eq!(*depths.annotation(), 0);
        let Kind::Tm(Form::Lam(chain)) = depths.kind() else {
            panic!("expected a lambda node");
        };
        assert_eq!(*chain.annotation(), 1);
    }

    #[test]
    fn fold_map_agrees_with_annotate_up() {
        let t = term::apply(term::var("f"), [term::var("x"), term::int(1)]);
        let mut count = |_: &term::Term| 1usize;
        assert_eq!(t.fold_map(&mut count), 3);
        assert_eq!(*t.annotate_up(&mut count).annotation(), 3);
    }

    #[test]
    fn annotate_up_consults_leaves_only() {
        let t = term::lam(["x"], term::text("hello"));
        let annotated = t.annotate_up(&mut |leaf| match leaf.kind() {
            Kind::Tm(Form::Text(s)) => s.len(),
            _ => 0,
        });
        assert_eq!(*annotated.annotation(), 5);
    }

    #[test]
    fn rewrite_down_with_threads_state_left_to_right() {
        let t = term::apply(term::var("f"), [term::var("x"), term::var("y")]);
        let (visited, _) = t.rewrite_down_with(Vec::new(), &mut |mut order, t| {
            if let Kind::Var(name) = t.kind() {
                order.push(name.clone());
            }
            (order, t.clone())
        });
        assert_eq!(visited, vec![n("f"), n("x"), n("y")]);
    }

    #[test]
    fn map_annotations_lifts_over_every_node() {
        let t = term::lam(["x"], term::var("x"));
        let sizes = t.map_annotations(&mut |fv| fv.len());
        assert_eq!(*sizes.annotation(), 0);
    }

    #[test]
    fn annotate_free_rebuilds_annotations() {
        let t = term::apply(term::var("f"), [term::var("x")]);
        let sizes = t.map_annotations(&mut |fv| fv.len());
        let back = sizes.annotate_free();
        assert_eq!(back.free_vars().clone(), t.free_vars().clone());
    }

    #[test]
    fn alpha_equivalence_ignores_binder_names() {
        let a = term::lam(["x"], term::var("x"));
        let b = term::lam(["y"], term::var("y"));
        assert!(alpha_eq(&a, &b));
        assert_ne!(a, b);
        let c = term::lam(["y"], term::var("z"));
        assert!(!alpha_eq(&a, &c));
    }

    #[test]
    fn alpha_equivalence_tracks_shadowing() {
        let a = term::lam(["x"], term::lam(["x"], term::var("x")));
        let b = term::lam(["x"], term::lam(["y"], term::var("y")));
        let c = term::lam(["x"], term::lam(["y"], term::var("x")));
        assert!(alpha_eq(&a, &b));
        assert!(!alpha_eq(&a, &c));
    }

    #[test]
    fn names_include_binders() {
        let t = term::lam(["x"], term::var("y"));
        let expected: FreeVars = [n("x"), n("y")].into_iter().collect();
        assert_eq!(t.names(), expected);
    }
}
