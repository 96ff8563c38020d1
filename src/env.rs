//! Environments: chains of binding frames.
//!
//! An environment is a list of frames, innermost first; the last frame is the
//! global frame. A frame is a vector of `(symbol . value)` pairs.
//!
//! A variable bound by an enclosing `let` or lambda can be addressed by a
//! [`Ref`]: `depth` frames outward, then slot `width` within that frame.
//! The compiler resolves references against compile-time frames whose values
//! are all `UNBOUND`; the run-time frames are filled in the same order, so the
//! addresses agree.

use crate::data::{ElementType, Ref, Storage, Tag, Value};
use crate::error::{Error, ErrorKind, Result};

/// A new frame vector with room for `capacity` bindings.
pub fn make_frame(store: &Storage, capacity: usize) -> Result<Value> {
    store.make_vector(Tag::Vector, ElementType::Any, capacity)
}

/// Build one frame by zipping `keys` with `values`, and push it onto `outer`.
///
/// A key equal to `rest_marker` binds the following key to the list of the
/// remaining values.
pub fn create_env(
    store: &Storage,
    keys: Value,
    values: Value,
    outer: Value,
    rest_marker: Value,
) -> Result<Value> {
    let keys = store.root(keys);
    let values = store.root(values);
    let outer = store.root(outer);
    let count = store.length(keys.get())?;
    let frame = store.root(make_frame(store, count)?);

    // Walk by position: the list words themselves move across allocations.
    for i in 0..count {
        let sym = store.nth(keys.get(), i);
        let remaining = store.nthcdr(values.get(), i);
        if sym == rest_marker {
            let rest = store.nth(keys.get(), i + 1);
            if !rest.is_symbol() {
                return Err(Error::new(
                    ErrorKind::NotSymbol,
                    "rest marker must be followed by a symbol",
                ));
            }
            bind(store, frame.get(), rest, remaining)?;
            break;
        }
        if !remaining.is_pair() {
            return Err(Error::new(ErrorKind::ArgCount, "too few values for keys"));
        }
        bind(store, frame.get(), sym, store.head(remaining))?;
    }
    store.cons(frame.get(), outer.get())
}

/// Append a new binding to `frame`, even if `sym` is already bound there.
pub fn bind(store: &Storage, frame: Value, sym: Value, value: Value) -> Result<()> {
    let frame = store.root(frame);
    let binding = store.cons(sym, value)?;
    store.vpush(frame.get(), binding)
}

/// Slot of the innermost binding of `sym` in `frame`.
pub fn find(store: &Storage, frame: Value, sym: Value) -> Option<usize> {
    let header = store.vector_header(frame).ok()?;
    (0..header.size)
        .rev()
        .find(|&i| store.head(store.vector_word(&header, i)) == sym)
}

/// The `(symbol . value)` binding of `sym` in `frame`.
pub fn find_binding(store: &Storage, frame: Value, sym: Value) -> Option<Value> {
    let slot = find(store, frame, sym)?;
    store.vget(frame, slot).ok()
}

/// Set `sym` in `frame` only: mutate an existing binding, or add one.
pub fn set(store: &Storage, frame: Value, sym: Value, value: Value) -> Result<()> {
    match find_binding(store, frame, sym) {
        Some(binding) => store.rplacd(binding, value),
        None => bind(store, frame, sym, value),
    }
}

/// Value of `sym`, searching innermost frame first.
pub fn get_value(store: &Storage, env: Value, sym: Value) -> Result<Value> {
    let r = resolve(store, env, sym).ok_or_else(|| unbound(store, sym))?;
    load(store, env, r)
}

/// Address of the innermost binding of `sym`, if any.
pub fn resolve(store: &Storage, env: Value, sym: Value) -> Option<Ref> {
    let mut frames = env;
    let mut depth = 0;
    while frames.is_pair() {
        if let Some(width) = find(store, store.head(frames), sym) {
            return Some(Ref {
                depth,
                width: width as u32,
            });
        }
        frames = store.tail(frames);
        depth += 1;
    }
    None
}

fn binding_at(store: &Storage, env: Value, r: Ref) -> Result<Value> {
    let frame = store.nth(env, r.depth as usize);
    store
        .vget(frame, r.width as usize)
        .map_err(|_| Error::new(ErrorKind::Unbound, format!("no binding at {r}")))
}

/// Value at a resolved address.
pub fn load(store: &Storage, env: Value, r: Ref) -> Result<Value> {
    let v = store.tail(binding_at(store, env, r)?);
    if v.is_unbound() {
        let name = store
            .string_value(store.head(binding_at(store, env, r)?))
            .unwrap_or_default();
        return Err(Error::unbound(&name));
    }
    Ok(v)
}

/// Store into a resolved address.
pub fn store_ref(store: &Storage, env: Value, r: Ref, v: Value) -> Result<()> {
    store.rplacd(binding_at(store, env, r)?, v)
}

/// The outermost frame of `env`.
pub fn global_frame(store: &Storage, env: Value) -> Value {
    let mut frames = env;
    while store.tail(frames).is_pair() {
        frames = store.tail(frames);
    }
    store.head(frames)
}

/// Assign `sym`: its innermost binding if it has one, otherwise a new global binding.
/// Returns the address written, for caching.
pub fn assign(store: &Storage, env: Value, sym: Value, v: Value) -> Result<Ref> {
    if let Some(r) = resolve(store, env, sym) {
        store_ref(store, env, r, v)?;
        return Ok(r);
    }
    let env = store.root(env);
    let global = global_frame(store, env.get());
    bind(store, global, sym, v)?;
    resolve(store, env.get(), sym).ok_or_else(|| unbound(store, sym))
}

pub fn unbound(store: &Storage, sym: Value) -> Error {
    let name = store
        .string_value(sym)
        .unwrap_or_else(|| format!("{sym}"));
    Error::unbound(&name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::symbols::Package;
    use crate::Config;

    struct Fixture {
        store: Storage,
        package: Package,
    }

    impl Fixture {
        fn new() -> Self {
            let store = Storage::new(&Config::default().with_heap_words(4096));
            let package = Package::new(&store, "test");
            Fixture { store, package }
        }

        fn sym(&mut self, name: &str) -> Value {
            self.package.intern(&self.store, name).unwrap()
        }

        fn global(&self) -> Value {
            let frame = make_frame(&self.store, 4).unwrap();
            self.store.cons(frame, Value::NIL).unwrap()
        }
    }

    #[test]
    fn set_adds_then_mutates() {
        let mut f = Fixture::new();
        let x = f.sym("x");
        let env = f.store.root(f.global());
        let frame = f.store.head(env.get());
        set(&f.store, frame, x, Value::int(1)).unwrap();
        set(&f.store, f.store.head(env.get()), x, Value::int(2)).unwrap();
        assert_eq!(f.store.vsize(f.store.head(env.get())).unwrap(), 1);
        assert_eq!(get_value(&f.store, env.get(), x).unwrap(), Value::int(2));
    }

    #[test]
    fn resolve_counts_frames_and_slots() {
        let mut f = Fixture::new();
        let (x, y, z) = (f.sym("x"), f.sym("y"), f.sym("z"));
        let env = f.store.root(f.global());
        set(&f.store, f.store.head(env.get()), x, Value::int(1)).unwrap();
        let inner = make_frame(&f.store, 2).unwrap();
        env.set(f.store.cons(inner, env.get()).unwrap());
        bind(&f.store, f.store.head(env.get()), y, Value::int(2)).unwrap();
        bind(&f.store, f.store.head(env.get()), x, Value::int(3)).unwrap();

        assert_eq!(
            resolve(&f.store, env.get(), x),
            Some(Ref { depth: 0, width: 1 })
        );
        assert_eq!(
            resolve(&f.store, env.get(), y),
            Some(Ref { depth: 0, width: 0 })
        );
        assert_eq!(resolve(&f.store, env.get(), z), None);
        let outer = f.store.tail(env.get());
        assert_eq!(
            resolve(&f.store, outer, x),
            Some(Ref { depth: 0, width: 0 })
        );
        assert_eq!(get_value(&f.store, env.get(), x).unwrap(), Value::int(3));
        assert_eq!(
            get_value(&f.store, env.get(), z).unwrap_err().kind,
            ErrorKind::Unbound
        );
    }

    #[test]
    fn create_env_zips_and_collects_rest() {
        let mut f = Fixture::new();
        let (a, b, rest) = (f.sym("a"), f.sym("b"), f.sym("&rest"));
        let keys = f.store.root(f.store.list(&[a, rest, b]).unwrap());
        let values = f
            .store
            .list(&[Value::int(1), Value::int(2), Value::int(3)])
            .unwrap();
        let env = create_env(&f.store, keys.get(), values, Value::NIL, rest).unwrap();
        assert_eq!(get_value(&f.store, env, a).unwrap(), Value::int(1));
        let b_value = get_value(&f.store, env, b).unwrap();
        assert_eq!(f.store.length(b_value).unwrap(), 2);
        assert_eq!(f.store.nth(b_value, 1), Value::int(3));
    }

    #[test]
    fn create_env_reports_missing_values() {
        let mut f = Fixture::new();
        let (a, b, rest) = (f.sym("a"), f.sym("b"), f.sym("&rest"));
        let keys = f.store.list(&[a, b]).unwrap();
        let keys = f.store.root(keys);
        let values = f.store.list(&[Value::int(1)]).unwrap();
        let err = create_env(&f.store, keys.get(), values, Value::NIL, rest).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ArgCount);
    }

    #[test]
    fn assign_falls_back_to_global() {
        let mut f = Fixture::new();
        let (x, y) = (f.sym("x"), f.sym("y"));
        let env = f.store.root(f.global());
        let inner = make_frame(&f.store, 1).unwrap();
        env.set(f.store.cons(inner, env.get()).unwrap());
        bind(&f.store, f.store.head(env.get()), y, Value::int(0)).unwrap();

        let r = assign(&f.store, env.get(), x, Value::int(9)).unwrap();
        assert_eq!(r, Ref { depth: 1, width: 0 });
        let r = assign(&f.store, env.get(), y, Value::int(8)).unwrap();
        assert_eq!(r, Ref { depth: 0, width: 0 });
        assert_eq!(load(&f.store, env.get(), r).unwrap(), Value::int(8));
        let global = f.store.tail(env.get());
        assert_eq!(get_value(&f.store, global, x).unwrap(), Value::int(9));
    }

    #[test]
    fn unbound_marker_is_not_a_value() {
        let mut f = Fixture::new();
        let x = f.sym("x");
        let env = f.store.root(f.global());
        bind(&f.store, f.store.head(env.get()), x, Value::UNBOUND).unwrap();
        assert!(resolve(&f.store, env.get(), x).is_some());
        assert_eq!(
            get_value(&f.store, env.get(), x).unwrap_err().kind,
            ErrorKind::Unbound
        );
    }
}
