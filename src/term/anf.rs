//! A-normal-form conversion.

use crate::abt::{self, Kind, Name, Signature};

use super::{Form, Term, TermSig, apply, let_, tm, var};

/// Convert to A-normal form: every non-trivial operand of an application
/// gets named by a `let`, and a non-trivial function position is let-bound
/// before the call. Fresh names are chosen against the free variables of
/// the application so nothing in the remaining subtree is shadowed.
pub fn anf(t: &Term) -> Term {
    stacker::maybe_grow(64 * 1024, 16 * 1024 * 1024, || match t.kind() {
        Kind::Var(_) => t.clone(),
        Kind::Abs(name, body) => abt::abs(name.clone(), anf(body)),
        Kind::Tm(Form::Apply(func, args)) if callable_is_trivial(func) => {
            let mut taken = t.free_vars().clone();
            let mut bindings: Vec<(Name, Term)> = Vec::new();
            let sanitised: Vec<Term> = args
                .iter()
                .enumerate()
                .map(|(i, arg)| {
                    if operand_is_trivial(arg) {
                        anf(arg)
                    } else {
                        let fresh = Name::from(format!("arg{i}")).freshen_in(&taken);
                        taken.insert(fresh.clone());
                        bindings.push((fresh.clone(), anf(arg)));
                        var(fresh)
                    }
                })
                .collect();
            let_(bindings, apply(anf(func), sanitised))
        }
        Kind::Tm(Form::Apply(func, args)) => {
            let fresh = Name::from("f").freshen_in(t.free_vars());
            let call = apply(var(fresh.clone()), args.iter().cloned());
            let_([(fresh, anf(func))], anf(&call))
        }
        Kind::Tm(shape) => tm(TermSig::map(shape, |child| anf(child))),
    })
}

/// Function positions that need no let-binding.
fn callable_is_trivial(t: &Term) -> bool {
    matches!(
        t.kind(),
        Kind::Var(_)
            | Kind::Tm(Form::Lam(_) | Form::Id(_) | Form::Constructor(..) | Form::Request(..))
    )
}

/// Operands that may appear directly in a call.
fn operand_is_trivial(t: &Term) -> bool {
    matches!(t.kind(), Kind::Var(_) | Kind::Tm(Form::Lam(_) | Form::Unboxed(_)))
}
