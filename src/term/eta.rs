//! η-normalisation.

use crate::abt::Kind;

use super::{Form, Term, apply, lam, unlam};

/// η-normal form of a lambda: `λx. f a₁ … aₙ x` becomes `f a₁ … aₙ` when
/// `x` is free in neither `f` nor the earlier arguments, repeatedly for
/// each trailing binder. Terms that are not η-reducible are returned
/// unchanged.
pub fn eta_normal_form(t: &Term) -> Term {
    let Some((names, body)) = unlam(t) else {
        return t.clone();
    };
    let Some(x) = names.last() else {
        return t.clone();
    };
    let Kind::Tm(Form::Apply(func, args)) = body.kind() else {
        return t.clone();
    };
    let Some(last) = args.last() else {
        // An application with no arguments is just the function.
        return eta_normal_form(&lam(names.clone(), func.clone()));
    };
    let Kind::Var(last) = last.kind() else {
        return t.clone();
    };
    let init = &args[..args.len() - 1];
    if last == x && !func.is_free(x) && init.iter().all(|arg| !arg.is_free(x)) {
        let inner = apply(func.clone(), init.iter().cloned());
        if names.len() == 1 {
            eta_normal_form(&inner)
        } else {
            eta_normal_form(&lam(names[..names.len() - 1].to_vec(), inner))
        }
    } else {
        t.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::{int, var};

    #[test]
    fn eta_reduces_a_simple_wrapper() {
        let t = lam(["x"], apply(var("f"), [var("x")]));
        assert_eq!(eta_normal_form(&t), var("f"));
    }

    #[test]
    fn eta_reduces_through_several_binders() {
        let t = lam(["x", "y"], apply(var("f"), [var("x"), var("y")]));
        assert_eq!(eta_normal_form(&t), var("f"));
    }

    #[test]
    fn eta_keeps_earlier_arguments() {
        let t = lam(["x"], apply(var("f"), [int(1), var("x")]));
        assert_eq!(eta_normal_form(&t), apply(var("f"), [int(1)]));
    }

    #[test]
    fn eta_stops_when_the_binder_is_used_elsewhere() {
        let shared = lam(["x"], apply(var("f"), [var("x"), var("x")]));
        assert_eq!(eta_normal_form(&shared), shared);
        let self_apply = lam(["x"], apply(var("x"), [var("x")]));
        assert_eq!(eta_normal_form(&self_apply), self_apply);
    }

    #[test]
    fn eta_leaves_non_lambdas_alone() {
        let t = apply(var("f"), [var("x")]);
        assert_eq!(eta_normal_form(&t), t);
    }

    #[test]
    fn eta_stops_when_the_last_argument_differs() {
        let t = lam(["x"], apply(var("f"), [var("y")]));
        assert_eq!(eta_normal_form(&t), t);
    }
}
