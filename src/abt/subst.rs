//! Renaming and capture-avoiding substitution.
//!
//! Every operation takes the free-variable fast path: a subtree whose
//! annotation does not mention the variable is returned as-is, sharing the
//! node. Binders that would capture a substitute's free variable are
//! α-renamed with [`Name::freshen_in`] before descending.

use im::HashMap;

use super::{FreeVars, Kind, Name, Signature, Term, abs, tm, var};

/// Rewrite occurrences of `from` to `to`. `to` is assumed fresh for `t`;
/// no capture check is performed.
pub fn rename<F: Signature>(from: &Name, to: &Name, t: &Term<F, FreeVars>) -> Term<F, FreeVars> {
    if !t.is_free(from) {
        return t.clone();
    }
    stacker::maybe_grow(64 * 1024, 16 * 1024 * 1024, || match t.kind() {
        Kind::Var(name) if name == from => var(to.clone()),
        Kind::Var(_) => t.clone(),
        Kind::Abs(name, body) => abs(name.clone(), rename(from, to, body)),
        Kind::Tm(shape) => tm(F::map(shape, |child| rename(from, to, child))),
    })
}

/// Capture-avoiding substitution of `s` for free occurrences of `x` in `t`.
pub fn subst<F: Signature>(
    x: &Name,
    s: &Term<F, FreeVars>,
    t: &Term<F, FreeVars>,
) -> Term<F, FreeVars> {
    if !t.is_free(x) {
        return t.clone();
    }
    stacker::maybe_grow(64 * 1024, 16 * 1024 * 1024, || match t.kind() {
        Kind::Var(name) => {
            if name == x {
                s.clone()
            } else {
                t.clone()
            }
        }
        Kind::Abs(name, body) => {
            if s.is_free(name) {
                let taken = s.free_vars().clone().union(body.free_vars().clone());
                let fresh = name.freshen_in(&taken);
                let body = rename(name, &fresh, body);
                abs(fresh, subst(x, s, &body))
            } else {
                abs(name.clone(), subst(x, s, body))
            }
        }
        Kind::Tm(shape) => tm(F::map(shape, |child| subst(x, s, child))),
    })
}

/// Parallel capture-avoiding substitution: every `x → sₓ` in `replacements`
/// is applied simultaneously in a single pass.
pub fn substs<F: Signature>(
    replacements: &[(Name, Term<F, FreeVars>)],
    t: &Term<F, FreeVars>,
) -> Term<F, FreeVars> {
    let map: HashMap<Name, Term<F, FreeVars>> = replacements.iter().cloned().collect();
    let mut taken = FreeVars::new();
    for (_, s) in replacements {
        taken = taken.union(s.free_vars().clone());
    }
    go(&map, &taken, t)
}

fn go<F: Signature>(
    map: &HashMap<Name, Term<F, FreeVars>>,
    taken: &FreeVars,
    t: &Term<F, FreeVars>,
) -> Term<F, FreeVars> {
    if map.is_empty() || map.keys().all(|x| !t.is_free(x)) {
        return t.clone();
    }
    stacker::maybe_grow(64 * 1024, 16 * 1024 * 1024, || match t.kind() {
        Kind::Var(name) => match map.get(name) {
            Some(s) => s.clone(),
            None => t.clone(),
        },
        Kind::Abs(name, body) => {
            if taken.contains(name) {
                // The fresh binder must also avoid the replacement keys, or
                // renamed bound occurrences would be substituted below.
                let mut avoid = taken.clone().union(body.free_vars().clone());
                avoid.extend(map.keys().cloned());
                let fresh = name.freshen_in(&avoid);
                let body = rename(name, &fresh, body);
                abs(fresh, go(map, taken, &body))
            } else if map.contains_key(name) {
                // The binder shadows a replacement; it stops applying here.
                abs(name.clone(), go(&map.without(name), taken, body))
            } else {
                abs(name.clone(), go(map, taken, body))
            }
        }
        Kind::Tm(shape) => tm(F::map(shape, |child| go(map, taken, child))),
    })
}

/// `(λname. body) arg`, by capture-avoiding substitution.
pub fn beta_reduce<F: Signature>(
    name: &Name,
    body: &Term<F, FreeVars>,
    arg: &Term<F, FreeVars>,
) -> Term<F, FreeVars> {
    subst(name, arg, body)
}

/// β-reduction of two arguments, applied left to right through an
/// intermediate single-binder abstraction so shadowing stays correct.
pub fn beta_reduce2<F: Signature>(
    n1: &Name,
    n2: &Name,
    body: &Term<F, FreeVars>,
    a1: &Term<F, FreeVars>,
    a2: &Term<F, FreeVars>,
) -> Term<F, FreeVars> {
    beta_reduce_chain(&[n1.clone(), n2.clone()], body, &[a1.clone(), a2.clone()])
}

pub fn beta_reduce3<F: Signature>(
    n1: &Name,
    n2: &Name,
    n3: &Name,
    body: &Term<F, FreeVars>,
    a1: &Term<F, FreeVars>,
    a2: &Term<F, FreeVars>,
    a3: &Term<F, FreeVars>,
) -> Term<F, FreeVars> {
    beta_reduce_chain(
        &[n1.clone(), n2.clone(), n3.clone()],
        body,
        &[a1.clone(), a2.clone(), a3.clone()],
    )
}

pub fn beta_reduce4<F: Signature>(
    n1: &Name,
    n2: &Name,
    n3: &Name,
    n4: &Name,
    body: &Term<F, FreeVars>,
    a1: &Term<F, FreeVars>,
    a2: &Term<F, FreeVars>,
    a3: &Term<F, FreeVars>,
    a4: &Term<F, FreeVars>,
) -> Term<F, FreeVars> {
    beta_reduce_chain(
        &[n1.clone(), n2.clone(), n3.clone(), n4.clone()],
        body,
        &[a1.clone(), a2.clone(), a3.clone(), a4.clone()],
    )
}

fn beta_reduce_chain<F: Signature>(
    names: &[Name],
    body: &Term<F, FreeVars>,
    args: &[Term<F, FreeVars>],
) -> Term<F, FreeVars> {
    assert_eq!(names.len(), args.len(), "β-reduction arity mismatch");
    let (first, rest) = match names.split_first() {
        Some(split) => split,
        None => return body.clone(),
    };
    // Keep the remaining binders as real abstractions while substituting, so
    // that a substitute mentioning one of their names forces a rename.
    let wrapped = rest
        .iter()
        .rev()
        .fold(body.clone(), |acc, name| abs(name.clone(), acc));
    let mut t = subst(first, &args[0], &wrapped);
    for arg in &args[1..] {
        let Kind::Abs(name, inner) = t.kind() else {
            panic!("β-reduction lost a binder");
        };
        let (name, inner) = (name.clone(), inner.clone());
        t = subst(&name, arg, &inner);
    }
    t
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::{self, unlam};

    fn n(s: &str) -> Name {
        Name::from(s)
    }

    #[test]
    fn subst_replaces_free_occurrences() {
        let t = term::apply(term::var("f"), [term::var("x"), term::var("x")]);
        let result = subst(&n("x"), &term::int(1), &t);
        let expected = term::apply(term::var("f"), [term::int(1), term::int(1)]);
        assert_eq!(result, expected);
    }

    #[test]
    fn subst_of_non_free_variable_shares_input() {
        let t = term::lam(["x"], term::var("x"));
        let result = subst(&n("y"), &term::int(1), &t);
        assert!(result.ptr_eq(&t));
    }

    #[test]
    fn subst_avoids_capture() {
        // [x/f] (λx. f)  must freshen the binder, not capture x.
        let t = term::lam(["x"], term::var("f"));
        let result = subst(&n("f"), &term::var("x"), &t);
        let (names, body) = unlam(&result).unwrap();
        assert_eq!(names, vec![n("x0")]);
        assert!(matches!(body.kind(), Kind::Var(v) if *v == n("x")));
        assert_eq!(result.free_vars().clone(), FreeVars::unit(n("x")));
    }

    #[test]
    fn subst_free_variable_algebra() {
        let t = term::apply(term::var("x"), [term::var("y")]);
        let s = term::apply(term::var("a"), [term::var("b")]);
        let result = subst(&n("x"), &s, &t);
        let expected: FreeVars = [n("y"), n("a"), n("b")].into_iter().collect();
        assert_eq!(result.free_vars().clone(), expected);
    }

    #[test]
    fn rename_rewrites_free_occurrences_only() {
        let t = term::apply(
            term::var("x"),
            [term::lam(["x"], term::var("x")), term::var("x")],
        );
        let result = rename(&n("x"), &n("y"), &t);
        let expected = term::apply(
            term::var("y"),
            [term::lam(["x"], term::var("x")), term::var("y")],
        );
        assert_eq!(result, expected);
    }

    #[test]
    fn rename_round_trips() {
        let t = term::apply(term::var("x"), [term::var("z")]);
        assert_eq!(rename(&n("x"), &n("x"), &t), t);
        let there = rename(&n("x"), &n("y"), &t);
        assert_eq!(rename(&n("y"), &n("x"), &there), t);
    }

    #[test]
    fn substs_applies_in_parallel() {
        // x and y swap simultaneously; a sequential pass would conflate them.
        let t = term::apply(term::var("x"), [term::var("y")]);
        let result = substs(
            &[(n("x"), term::var("y")), (n("y"), term::var("x"))],
            &t,
        );
        let expected = term::apply(term::var("y"), [term::var("x")]);
        assert_eq!(result, expected);
    }

    #[test]
    fn substs_stops_at_shadowing_binders() {
        let t = term::apply(term::lam(["x"], term::var("x")), [term::var("x")]);
        let result = substs(&[(n("x"), term::int(7))], &t);
        let expected = term::apply(term::lam(["x"], term::var("x")), [term::int(7)]);
        assert_eq!(result, expected);
    }

    #[test]
    fn substs_freshens_capturing_binders() {
        // [y/x] under λy must rename the binder before substituting.
        let t = term::lam(["y"], term::var("x"));
        let result = substs(&[(n("x"), term::var("y"))], &t);
        let (names, body) = unlam(&result).unwrap();
        assert_ne!(names[0], n("y"));
        assert!(matches!(body.kind(), Kind::Var(v) if *v == n("y")));
    }

    #[test]
    fn beta_reduce_is_substitution() {
        let body = term::apply(term::var("x"), [term::var("y")]);
        let result = beta_reduce(&n("x"), &body, &term::var("g"));
        assert_eq!(result, term::apply(term::var("g"), [term::var("y")]));
    }

    #[test]
    fn beta_reduce2_preserves_shadowing() {
        // (λx y. x) y 2 must reduce to y, not 2.
        let result = beta_reduce2(
            &n("x"),
            &n("y"),
            &term::var("x"),
            &term::var("y"),
            &term::int(2),
        );
        assert_eq!(result, term::var("y"));
    }

    #[test]
    fn beta_reduce3_folds_left_to_right() {
        let body = term::apply(term::var("a"), [term::var("b"), term::var("c")]);
        let result = beta_reduce3(
            &n("a"),
            &n("b"),
            &n("c"),
            &body,
            &term::var("f"),
            &term::int(1),
            &term::int(2),
        );
        let expected = term::apply(term::var("f"), [term::int(1), term::int(2)]);
        assert_eq!(result, expected);
    }
}
