//! Decompilation of embedded compiled values back into syntax.

use std::collections::HashMap;

use hashlink::LinkedHashMap;

use crate::abt::{Kind, Name, Signature};

use super::{Form, Param, Term, TermSig, Unboxed, letrec, unboxed, var};

/// A compiled value embedded in a term. Implementations come from the
/// runtime that produced the value; the term layer only needs to expand a
/// value back into syntax and to recognise the reference and literal cases.
pub trait CompiledParam: std::fmt::Debug + Send + Sync {
    /// Expand this value into concrete syntax. The result may itself
    /// contain further `Compiled` leaves.
    fn decompile(&self) -> Term;

    /// The reference-cell view, when this value is a mutable reference.
    fn as_reference(&self) -> Option<&dyn RefParam> {
        None
    }

    /// The literal view, when this value is an unboxed literal.
    fn as_unboxed(&self) -> Option<Unboxed> {
        None
    }
}

/// A reference cell among compiled values. Cells may form cycles.
pub trait RefParam: CompiledParam {
    /// The name the reference was created under, used as a binding hint.
    fn name(&self) -> Name;

    /// The current referent.
    fn dereference(&self) -> Param;
}

/// Remove every `Compiled` leaf by expanding it into concrete syntax.
///
/// References reachable from the term (transitively, through the
/// decompiled bodies) become the bindings of a single outer `let rec`, so
/// cycles among compiled values turn into ordinary textual cycles. The
/// binding names are freshened against every name occurring in the term or
/// any collected body, binders included.
pub fn fully_decompile(t: &Term) -> Term {
    let mut bodies: LinkedHashMap<usize, (Name, Term)> = LinkedHashMap::new();
    collect_references(t, &mut bodies);
    log::debug!("decompiling term with {} collected reference(s)", bodies.len());

    let mut used = t.names();
    for (_, (_, body)) in bodies.iter() {
        used = used.union(body.names());
    }
    let mut fresh: HashMap<usize, Name> = HashMap::new();
    for (key, (name, _)) in bodies.iter() {
        let picked = name.freshen_in(&used);
        used.insert(picked.clone());
        fresh.insert(*key, picked);
    }

    let rewritten = rewrite(t, &fresh);
    if bodies.is_empty() {
        rewritten
    } else {
        let bindings: Vec<(Name, Term)> = bodies
            .iter()
            .map(|(key, (_, body))| (fresh[key].clone(), rewrite(body, &fresh)))
            .collect();
        letrec(bindings, rewritten)
    }
}

/// Peel `Compiled` wrappers off the root of a term.
pub fn strip_outer_compiled(t: &Term) -> Term {
    let mut t = t.clone();
    loop {
        let next = match t.kind() {
            Kind::Tm(Form::Compiled(param, _)) => param.decompile(),
            _ => return t,
        };
        t = next;
    }
}

fn collect_references(t: &Term, acc: &mut LinkedHashMap<usize, (Name, Term)>) {
    stacker::maybe_grow(64 * 1024, 16 * 1024 * 1024, || match t.kind() {
        Kind::Var(_) => {}
        Kind::Abs(_, body) => collect_references(body, acc),
        Kind::Tm(Form::Compiled(param, _)) => collect_param(param, acc),
        Kind::Tm(shape) => {
            TermSig::for_each(shape, |child| collect_references(child, acc));
        }
    })
}

fn collect_param(param: &Param, acc: &mut LinkedHashMap<usize, (Name, Term)>) {
    if let Some(reference) = param.as_reference() {
        let key = param.identity();
        if acc.contains_key(&key) {
            return;
        }
        let body = reference.dereference().decompile();
        acc.insert(key, (reference.name(), body.clone()));
        collect_references(&body, acc);
    } else if param.as_unboxed().is_none() {
        collect_references(&param.decompile(), acc);
    }
}

fn rewrite(t: &Term, fresh: &HashMap<usize, Name>) -> Term {
    t.rewrite_down(&mut |node| match node.kind() {
        Kind::Tm(Form::Compiled(param, _)) => {
            if param.as_reference().is_some() {
                let name = fresh
                    .get(&param.identity())
                    .expect("reference missed by the collection pass");
                var(name.clone())
            } else if let Some(literal) = param.as_unboxed() {
                unboxed(literal)
            } else {
                rewrite(&param.decompile(), fresh)
            }
        }
        _ => node.clone(),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::abt::FreeVars;
    use crate::term::{apply, compiled, int, lam, unletrec};

    /// A plain compiled value that expands to a fixed body.
    #[derive(Debug)]
    struct Val {
        body: Term,
    }

    impl CompiledParam for Val {
        fn decompile(&self) -> Term {
            self.body.clone()
        }
    }

    /// An unboxed compiled literal.
    #[derive(Debug)]
    struct Lit(Unboxed);

    impl CompiledParam for Lit {
        fn decompile(&self) -> Term {
            unboxed(self.0)
        }

        fn as_unboxed(&self) -> Option<Unboxed> {
            Some(self.0)
        }
    }

    /// A reference cell; the referent is installed after construction so
    /// cells can point at each other.
    #[derive(Debug)]
    struct Cell {
        name: Name,
        referent: Mutex<Option<Param>>,
    }

    impl Cell {
        fn new(name: &str) -> Arc<Cell> {
            Arc::new(Cell { name: Name::from(name), referent: Mutex::new(None) })
        }

        fn install(&self, value: Param) {
            *self.referent.lock().unwrap() = Some(value);
        }
    }

    impl CompiledParam for Cell {
        fn decompile(&self) -> Term {
            self.dereference().decompile()
        }

        fn as_reference(&self) -> Option<&dyn RefParam> {
            Some(self)
        }
    }

    impl RefParam for Cell {
        fn name(&self) -> Name {
            self.name.clone()
        }

        fn dereference(&self) -> Param {
            self.referent.lock().unwrap().clone().expect("referent installed")
        }
    }

    fn contains_compiled(t: &Term) -> bool {
        match t.kind() {
            Kind::Var(_) => false,
            Kind::Abs(_, body) => contains_compiled(body),
            Kind::Tm(Form::Compiled(..)) => true,
            Kind::Tm(shape) => {
                let mut found = false;
                TermSig::for_each(shape, |child| found = found || contains_compiled(child));
                found
            }
        }
    }

    #[test]
    fn strip_outer_compiled_unwraps_the_root() {
        let inner = Param::new(Val { body: int(5) });
        let outer = Param::new(Val { body: compiled(inner, "inner") });
        let t = compiled(outer, "outer");
        assert_eq!(strip_outer_compiled(&t), int(5));
    }

    #[test]
    fn unboxed_params_splice_as_literals() {
        let t = apply(
            var("f"),
            [compiled(Param::new(Lit(Unboxed::int(3))), "three")],
        );
        let result = fully_decompile(&t);
        assert_eq!(result, apply(var("f"), [int(3)]));
    }

    #[test]
    fn plain_values_decompile_in_place() {
        let body = lam(["x"], var("x"));
        let t = apply(compiled(Param::new(Val { body: body.clone() }), "id"), [int(1)]);
        let result = fully_decompile(&t);
        assert_eq!(result, apply(body, [int(1)]));
    }

    #[test]
    fn cyclic_references_become_a_letrec() {
        let ping = Cell::new("ping");
        let pong = Cell::new("pong");
        let ping_param = Param::from_arc(ping.clone() as Arc<dyn CompiledParam>);
        let pong_param = Param::from_arc(pong.clone() as Arc<dyn CompiledParam>);
        ping.install(Param::new(Val {
            body: lam(["x"], apply(compiled(pong_param.clone(), "pong"), [var("x")])),
        }));
        pong.install(Param::new(Val {
            body: lam(["x"], apply(compiled(ping_param.clone(), "ping"), [var("x")])),
        }));

        let t = apply(compiled(ping_param, "ping"), [int(1)]);
        let result = fully_decompile(&t);

        assert!(!contains_compiled(&result));
        assert!(result.free_vars().is_empty());
        let (names, bindings, body) = unletrec(&result).unwrap();
        assert_eq!(names, vec![Name::from("ping"), Name::from("pong")]);
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0], lam(["x"], apply(var("pong"), [var("x")])));
        assert_eq!(bindings[1], lam(["x"], apply(var("ping"), [var("x")])));
        assert_eq!(body, apply(var("ping"), [int(1)]));
    }

    #[test]
    fn reference_names_avoid_names_already_in_scope() {
        let cell = Cell::new("id");
        let param = Param::from_arc(cell.clone() as Arc<dyn CompiledParam>);
        cell.install(Param::new(Val { body: lam(["x"], var("x")) }));

        // `id` is already free in the surrounding term.
        let t = apply(var("id"), [compiled(param, "id")]);
        let result = fully_decompile(&t);

        let (names, _, body) = unletrec(&result).unwrap();
        assert_eq!(names, vec![Name::from("id0")]);
        assert_eq!(body, apply(var("id"), [var("id0")]));
        assert_eq!(result.free_vars().clone(), FreeVars::unit(Name::from("id")));
    }

    #[test]
    fn terms_without_references_stay_unwrapped() {
        let t = apply(var("f"), [int(1)]);
        let result = fully_decompile(&t);
        assert_eq!(result, t);
    }
}
