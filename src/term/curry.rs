//! Currying rewrite.

use crate::abt::{self, Kind};

use super::{Form, Term, tm, unlam};

/// Rewrite every multi-binder lambda into nested single-binder lambdas and
/// every multi-argument application into nested single-argument
/// applications.
pub fn curry(t: &Term) -> Term {
    t.rewrite_up(&mut |t| match t.kind() {
        Kind::Tm(Form::Lam(_)) => {
            let (names, body) = unlam(t).unwrap();
            if names.len() <= 1 {
                return t.clone();
            }
            names
                .into_iter()
                .rev()
                .fold(body.clone(), |acc, name| tm(Form::Lam(abt::abs(name, acc))))
        }
        Kind::Tm(Form::Apply(func, args)) if args.len() > 1 => args
            .iter()
            .fold(func.clone(), |acc, arg| {
                tm(Form::Apply(acc, vec![arg.clone()]))
            }),
        _ => t.clone(),
    })
}
