//! Graph-codec instantiation for closed terms.
//!
//! Every node's byte prefix carries its tag plus the non-child payload
//! (names, identifiers, literals, patterns, case shapes); the children are
//! the subtrees in their canonical visit order, so prefix plus children
//! reconstitute the node exactly. Decoding rebuilds through the smart
//! constructors, recomputing annotations instead of transporting them.
//! `Compiled` leaves are opaque runtime values and cannot be serialised.

use std::io::{self, Read, Write};

use crate::abt::{self, Kind, Name, Signature};
use crate::codec::{ByteSource, Children, GraphCodec};

use super::{
    ConstructorId, Form, Hash, Id, MatchCase, Pattern, Term, TermSig, Unboxed, UnboxedType, tm,
};

const TAG_VAR: u8 = 0;
const TAG_ABS: u8 = 1;
const TAG_LAM: u8 = 2;
const TAG_APPLY: u8 = 3;
const TAG_LET_REC: u8 = 4;
const TAG_LET: u8 = 5;
const TAG_REC: u8 = 6;
const TAG_IF: u8 = 7;
const TAG_AND: u8 = 8;
const TAG_OR: u8 = 9;
const TAG_MATCH: u8 = 10;
const TAG_HANDLE: u8 = 11;
const TAG_EFFECT_PURE: u8 = 12;
const TAG_EFFECT_BIND: u8 = 13;
const TAG_REQUEST: u8 = 14;
const TAG_CONSTRUCTOR: u8 = 15;
const TAG_ID: u8 = 16;
const TAG_UNBOXED: u8 = 17;
const TAG_TEXT: u8 = 18;
const TAG_SEQUENCE: u8 = 19;

const PAT_UNBOUND: u8 = 0;
const PAT_BIND: u8 = 1;
const PAT_LITERAL: u8 = 2;
const PAT_DATA: u8 = 3;
const PAT_AS: u8 = 4;
const PAT_EFFECT_PURE: u8 = 5;
const PAT_EFFECT_BIND: u8 = 6;

const ID_BUILTIN: u8 = 0;
const ID_DERIVED: u8 = 1;

/// Encodes and decodes terms that contain no `Compiled` leaves.
pub struct TermCodec;

impl GraphCodec for TermCodec {
    type Node = Term;

    fn identity(&self, node: &Term) -> usize {
        node.as_ptr() as usize
    }

    fn is_reference(&self, _node: &Term) -> bool {
        false
    }

    fn dereference(&self, _node: &Term) -> Term {
        unreachable!("term graphs contain no reference nodes")
    }

    fn write_byte_prefix(&self, node: &Term, sink: &mut dyn Write) -> io::Result<()> {
        match node.kind() {
            Kind::Var(name) => {
                put8(sink, TAG_VAR)?;
                put_name(sink, name)
            }
            Kind::Abs(name, _) => {
                put8(sink, TAG_ABS)?;
                put_name(sink, name)
            }
            Kind::Tm(form) => match form {
                Form::Lam(_) => put8(sink, TAG_LAM),
                Form::Apply(_, args) => {
                    put8(sink, TAG_APPLY)?;
                    put32(sink, args.len() as u32)
                }
                Form::LetRec(bindings, _) => {
                    put8(sink, TAG_LET_REC)?;
                    put32(sink, bindings.len() as u32)
                }
                Form::Let(..) => put8(sink, TAG_LET),
                Form::Rec(_) => put8(sink, TAG_REC),
                Form::If(..) => put8(sink, TAG_IF),
                Form::And(..) => put8(sink, TAG_AND),
                Form::Or(..) => put8(sink, TAG_OR),
                Form::Match(_, cases) => {
                    put8(sink, TAG_MATCH)?;
                    put32(sink, cases.len() as u32)?;
                    for case in cases {
                        put_pattern(sink, &case.pattern)?;
                        put8(sink, case.guard.is_some() as u8)?;
                    }
                    Ok(())
                }
                Form::Handle(..) => put8(sink, TAG_HANDLE),
                Form::EffectPure(_) => put8(sink, TAG_EFFECT_PURE),
                Form::EffectBind(id, ctor, args, _) => {
                    put8(sink, TAG_EFFECT_BIND)?;
                    put_id(sink, id)?;
                    put32(sink, ctor.0)?;
                    put32(sink, args.len() as u32)
                }
                Form::Request(id, ctor) => {
                    put8(sink, TAG_REQUEST)?;
                    put_id(sink, id)?;
                    put32(sink, ctor.0)
                }
                Form::Constructor(id, ctor) => {
                    put8(sink, TAG_CONSTRUCTOR)?;
                    put_id(sink, id)?;
                    put32(sink, ctor.0)
                }
                Form::Id(id) => {
                    put8(sink, TAG_ID)?;
                    put_id(sink, id)
                }
                Form::Unboxed(u) => {
                    put8(sink, TAG_UNBOXED)?;
                    put64(sink, u.bits)?;
                    put8(sink, unboxed_type_tag(u.typ))
                }
                Form::Text(text) => {
                    put8(sink, TAG_TEXT)?;
                    put32(sink, text.len() as u32)?;
                    sink.write_all(text.as_bytes())
                }
                Form::Sequence(items) => {
                    put8(sink, TAG_SEQUENCE)?;
                    put32(sink, items.len() as u32)
                }
                Form::Compiled(..) => Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "compiled values cannot be serialised",
                )),
            },
        }
    }

    fn for_each_child(
        &self,
        node: &Term,
        f: &mut dyn FnMut(&Term) -> io::Result<()>,
    ) -> io::Result<()> {
        match node.kind() {
            Kind::Var(_) => Ok(()),
            Kind::Abs(_, body) => f(body),
            Kind::Tm(form) => {
                let mut result = Ok(());
                TermSig::for_each(form, |child| {
                    if result.is_ok() {
                        result = f(child);
                    }
                });
                result
            }
        }
    }

    fn decode<R: Read>(&mut self, children: &mut Children<'_, R, Term>) -> io::Result<Term> {
        let tag = children.source().read8()?;
        match tag {
            TAG_VAR => {
                let name = read_name(children.source())?;
                Ok(abt::var(name))
            }
            TAG_ABS => {
                let name = read_name(children.source())?;
                let body = require(children.next(self)?)?;
                Ok(abt::abs(name, body))
            }
            TAG_LAM => {
                let chain = require(children.next(self)?)?;
                Ok(tm(Form::Lam(chain)))
            }
            TAG_APPLY => {
                let argc = children.source().read32()? as usize;
                let func = require(children.next(self)?)?;
                let mut args = Vec::with_capacity(argc);
                for _ in 0..argc {
                    args.push(require(children.next(self)?)?);
                }
                Ok(tm(Form::Apply(func, args)))
            }
            TAG_LET_REC => {
                let count = children.source().read32()? as usize;
                let mut bindings = Vec::with_capacity(count);
                for _ in 0..count {
                    bindings.push(require(children.next(self)?)?);
                }
                let body = require(children.next(self)?)?;
                Ok(tm(Form::LetRec(bindings, body)))
            }
            TAG_LET => {
                let binding = require(children.next(self)?)?;
                let body = require(children.next(self)?)?;
                Ok(tm(Form::Let(binding, body)))
            }
            TAG_REC => {
                let inner = require(children.next(self)?)?;
                Ok(tm(Form::Rec(inner)))
            }
            TAG_IF => {
                let cond = require(children.next(self)?)?;
                let then = require(children.next(self)?)?;
                let otherwise = require(children.next(self)?)?;
                Ok(tm(Form::If(cond, then, otherwise)))
            }
            TAG_AND => {
                let x = require(children.next(self)?)?;
                let y = require(children.next(self)?)?;
                Ok(tm(Form::And(x, y)))
            }
            TAG_OR => {
                let x = require(children.next(self)?)?;
                let y = require(children.next(self)?)?;
                Ok(tm(Form::Or(x, y)))
            }
            TAG_MATCH => {
                let count = children.source().read32()? as usize;
                let mut shapes = Vec::with_capacity(count);
                for _ in 0..count {
                    let pattern = read_pattern(children.source())?;
                    let has_guard = children.source().read8()? != 0;
                    shapes.push((pattern, has_guard));
                }
                let scrutinee = require(children.next(self)?)?;
                let mut cases = Vec::with_capacity(count);
                for (pattern, has_guard) in shapes {
                    let guard = if has_guard {
                        Some(require(children.next(self)?)?)
                    } else {
                        None
                    };
                    let body = require(children.next(self)?)?;
                    cases.push(MatchCase { pattern, guard, body });
                }
                Ok(tm(Form::Match(scrutinee, cases)))
            }
            TAG_HANDLE => {
                let handler = require(children.next(self)?)?;
                let block = require(children.next(self)?)?;
                Ok(tm(Form::Handle(handler, block)))
            }
            TAG_EFFECT_PURE => {
                let value = require(children.next(self)?)?;
                Ok(tm(Form::EffectPure(value)))
            }
            TAG_EFFECT_BIND => {
                let id = read_id(children.source())?;
                let ctor = ConstructorId(children.source().read32()?);
                let argc = children.source().read32()? as usize;
                let mut args = Vec::with_capacity(argc);
                for _ in 0..argc {
                    args.push(require(children.next(self)?)?);
                }
                let k = require(children.next(self)?)?;
                Ok(tm(Form::EffectBind(id, ctor, args, k)))
            }
            TAG_REQUEST => {
                let id = read_id(children.source())?;
                let ctor = ConstructorId(children.source().read32()?);
                Ok(tm(Form::Request(id, ctor)))
            }
            TAG_CONSTRUCTOR => {
                let id = read_id(children.source())?;
                let ctor = ConstructorId(children.source().read32()?);
                Ok(tm(Form::Constructor(id, ctor)))
            }
            TAG_ID => {
                let id = read_id(children.source())?;
                Ok(tm(Form::Id(id)))
            }
            TAG_UNBOXED => {
                let bits = children.source().read64()?;
                let typ = read_unboxed_type(children.source())?;
                Ok(tm(Form::Unboxed(Unboxed { bits, typ })))
            }
            TAG_TEXT => {
                let len = children.source().read32()? as usize;
                let text = read_utf8(children.source(), len)?;
                Ok(tm(Form::Text(text.into())))
            }
            TAG_SEQUENCE => {
                let count = children.source().read32()? as usize;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(require(children.next(self)?)?);
                }
                Ok(tm(Form::Sequence(items)))
            }
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown term tag {other}"),
            )),
        }
    }

    fn make_reference(&mut self, _position: u64, _prefix: Option<Vec<u8>>) -> io::Result<Term> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "reference marker in a term stream",
        ))
    }

    fn set_reference(&mut self, _reference: &Term, _referent: Term) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "reference marker in a term stream",
        ))
    }
}

fn require(child: Option<Term>) -> io::Result<Term> {
    child.ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            "node ended before all children were read",
        )
    })
}

fn put8(sink: &mut dyn Write, byte: u8) -> io::Result<()> {
    sink.write_all(&[byte])
}

fn put32(sink: &mut dyn Write, value: u32) -> io::Result<()> {
    sink.write_all(&value.to_be_bytes())
}

fn put64(sink: &mut dyn Write, value: u64) -> io::Result<()> {
    sink.write_all(&value.to_be_bytes())
}

fn put_name(sink: &mut dyn Write, name: &Name) -> io::Result<()> {
    let bytes = name.as_str().as_bytes();
    put32(sink, bytes.len() as u32)?;
    sink.write_all(bytes)
}

fn put_id(sink: &mut dyn Write, id: &Id) -> io::Result<()> {
    match id {
        Id::Builtin(name) => {
            put8(sink, ID_BUILTIN)?;
            put_name(sink, name)
        }
        Id::Derived(hash) => {
            put8(sink, ID_DERIVED)?;
            put32(sink, hash.as_bytes().len() as u32)?;
            sink.write_all(hash.as_bytes())
        }
    }
}

fn put_pattern(sink: &mut dyn Write, pattern: &Pattern) -> io::Result<()> {
    match pattern {
        Pattern::Unbound => put8(sink, PAT_UNBOUND),
        Pattern::Bind => put8(sink, PAT_BIND),
        Pattern::Literal(u) => {
            put8(sink, PAT_LITERAL)?;
            put64(sink, u.bits)?;
            put8(sink, unboxed_type_tag(u.typ))
        }
        Pattern::Data(id, ctor, fields) => {
            put8(sink, PAT_DATA)?;
            put_id(sink, id)?;
            put32(sink, ctor.0)?;
            put32(sink, fields.len() as u32)?;
            for field in fields {
                put_pattern(sink, field)?;
            }
            Ok(())
        }
        Pattern::As(inner) => {
            put8(sink, PAT_AS)?;
            put_pattern(sink, inner)
        }
        Pattern::EffectPure(inner) => {
            put8(sink, PAT_EFFECT_PURE)?;
            put_pattern(sink, inner)
        }
        Pattern::EffectBind(id, ctor, fields, k) => {
            put8(sink, PAT_EFFECT_BIND)?;
            put_id(sink, id)?;
            put32(sink, ctor.0)?;
            put32(sink, fields.len() as u32)?;
            for field in fields {
                put_pattern(sink, field)?;
            }
            put_pattern(sink, k)
        }
    }
}

fn unboxed_type_tag(typ: UnboxedType) -> u8 {
    match typ {
        UnboxedType::Int64 => 0,
        UnboxedType::UInt64 => 1,
        UnboxedType::Float => 2,
        UnboxedType::Boolean => 3,
    }
}

fn read_unboxed_type<R: Read>(src: &mut ByteSource<R>) -> io::Result<UnboxedType> {
    match src.read8()? {
        0 => Ok(UnboxedType::Int64),
        1 => Ok(UnboxedType::UInt64),
        2 => Ok(UnboxedType::Float),
        3 => Ok(UnboxedType::Boolean),
        other => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unknown unboxed type tag {other}"),
        )),
    }
}

fn read_utf8<R: Read>(src: &mut ByteSource<R>, len: usize) -> io::Result<String> {
    let bytes = src.read_bytes(len)?;
    String::from_utf8(bytes)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "invalid UTF-8"))
}

fn read_name<R: Read>(src: &mut ByteSource<R>) -> io::Result<Name> {
    let len = src.read32()? as usize;
    Ok(Name::new(read_utf8(src, len)?))
}

fn read_id<R: Read>(src: &mut ByteSource<R>) -> io::Result<Id> {
    match src.read8()? {
        ID_BUILTIN => Ok(Id::Builtin(read_name(src)?)),
        ID_DERIVED => {
            let len = src.read32()? as usize;
            let bytes = src.read_bytes(len)?;
            Ok(Id::Derived(Hash::new(bytes)))
        }
        other => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unknown identifier tag {other}"),
        )),
    }
}

fn read_pattern<R: Read>(src: &mut ByteSource<R>) -> io::Result<Pattern> {
    match src.read8()? {
        PAT_UNBOUND => Ok(Pattern::Unbound),
        PAT_BIND => Ok(Pattern::Bind),
        PAT_LITERAL => {
            let bits = src.read64()?;
            let typ = read_unboxed_type(src)?;
            Ok(Pattern::Literal(Unboxed { bits, typ }))
        }
        PAT_DATA => {
            let id = read_id(src)?;
            let ctor = ConstructorId(src.read32()?);
            let count = src.read32()? as usize;
            let mut fields = Vec::with_capacity(count);
            for _ in 0..count {
                fields.push(read_pattern(src)?);
            }
            Ok(Pattern::Data(id, ctor, fields))
        }
        PAT_AS => Ok(Pattern::As(Box::new(read_pattern(src)?))),
        PAT_EFFECT_PURE => Ok(Pattern::EffectPure(Box::new(read_pattern(src)?))),
        PAT_EFFECT_BIND => {
            let id = read_id(src)?;
            let ctor = ConstructorId(src.read32()?);
            let count = src.read32()? as usize;
            let mut fields = Vec::with_capacity(count);
            for _ in 0..count {
                fields.push(read_pattern(src)?);
            }
            let k = Box::new(read_pattern(src)?);
            Ok(Pattern::EffectBind(id, ctor, fields, k))
        }
        other => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unknown pattern tag {other}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode_graph, encode_graph};
    use crate::term::{
        self, CompiledParam, Param, apply, boolean, compiled, constructor, effect_bind,
        effect_pure, handle, if_, int, lam, let_, letrec, match_, match_case, request,
        sequence, text, var,
    };

    fn round_trip(t: &Term) -> Term {
        let bytes = encode_graph(&TermCodec, Vec::new(), t, false).unwrap();
        decode_graph(&mut TermCodec, bytes.as_slice()).unwrap()
    }

    #[test]
    fn round_trips_a_rich_term() {
        let t = letrec(
            [("loop", lam(["x"], apply(var("loop"), [var("x")])))],
            let_(
                [("r", if_(boolean(true), int(1), int(2)))],
                apply(
                    term::ident(Id::Builtin(Name::from("print"))),
                    [var("r"), text("done"), sequence([int(1), int(2)])],
                ),
            ),
        );
        let decoded = round_trip(&t);
        assert_eq!(decoded, t);
        assert_eq!(decoded.free_vars().clone(), t.free_vars().clone());
    }

    #[test]
    fn round_trips_matches_with_patterns_and_guards() {
        let pair = Id::Derived(Hash::new(vec![1, 2, 3]));
        let case = match_case(
            Pattern::Data(pair.clone(), ConstructorId(0), vec![Pattern::Bind, Pattern::Bind]),
            Some(term::abs("a", term::abs("b", boolean(true)))),
            term::abs("a", term::abs("b", apply(var("f"), [var("a"), var("b")]))),
        );
        let wildcard = match_case(Pattern::Unbound, None, int(0));
        let t = match_(var("p"), vec![case, wildcard]);
        assert_eq!(round_trip(&t), t);
    }

    #[test]
    fn round_trips_effect_terms() {
        let state = Id::Builtin(Name::from("State"));
        let t = handle(
            var("h"),
            effect_bind(
                state.clone(),
                ConstructorId(1),
                vec![var("s"), request(state.clone(), ConstructorId(0))],
                lam(["k"], effect_pure(apply(constructor(state, ConstructorId(2)), [var("k")]))),
            ),
        );
        assert_eq!(round_trip(&t), t);
    }

    #[test]
    fn shared_subterms_decode_shared() {
        let shared = apply(var("g"), [int(42)]);
        let t = apply(var("f"), [shared.clone(), shared]);
        let decoded = round_trip(&t);
        let Kind::Tm(Form::Apply(_, args)) = decoded.kind() else {
            panic!("expected an application");
        };
        assert!(args[0].ptr_eq(&args[1]));
        assert_eq!(decoded, t);
    }

    #[test]
    fn compiled_values_are_rejected() {
        #[derive(Debug)]
        struct Opaque;
        impl CompiledParam for Opaque {
            fn decompile(&self) -> Term {
                int(0)
            }
        }
        let t = compiled(Param::new(Opaque), "opaque");
        let err = encode_graph(&TermCodec, Vec::new(), &t, false).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
    }

    #[test]
    fn reference_markers_are_rejected_in_term_streams() {
        use crate::codec::{REF, REF_NO_METADATA};
        let bytes = [REF, REF_NO_METADATA];
        let err = decode_graph(&mut TermCodec, bytes.as_slice()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
