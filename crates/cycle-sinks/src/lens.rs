//! Lenses: reified get/set accessors from a whole value to one of its parts.

use std::fmt;
use std::marker::PhantomData;

/// Focused access from a `Whole` to a `Part`.
///
/// Implementations are expected to follow the usual laws: setting what was
/// just read changes nothing, reading what was just set returns it, and a
/// second set overrides the first.
pub trait Lens {
    type Whole;
    type Part;

    fn get(&self, whole: &Self::Whole) -> Self::Part;
    fn set(&self, whole: Self::Whole, part: Self::Part) -> Self::Whole;

    /// Replaces the focused part with `f` applied to it.
    fn modify<F>(&self, whole: Self::Whole, f: F) -> Self::Whole
    where
        F: FnOnce(Self::Part) -> Self::Part,
    {
        let part = self.get(&whole);
        self.set(whole, f(part))
    }

    /// Method form of [`compose_lenses`].
    fn compose<I>(self, inner: I) -> Composed<Self, I>
    where
        Self: Sized,
        I: Lens<Whole = Self::Part>,
    {
        compose_lenses(self, inner)
    }
}

/// Chains `outer: Whole <-> Middle` and `inner: Middle <-> Part`.
pub fn compose_lenses<O, I>(outer: O, inner: I) -> Composed<O, I>
where
    O: Lens,
    I: Lens<Whole = O::Part>,
{
    Composed { outer, inner }
}

/// Result of [`compose_lenses`].
#[derive(Debug, Clone, Copy)]
pub struct Composed<O, I> {
    outer: O,
    inner: I,
}

impl<O, I> Lens for Composed<O, I>
where
    O: Lens,
    I: Lens<Whole = O::Part>,
{
    type Whole = O::Whole;
    type Part = I::Part;

    fn get(&self, whole: &O::Whole) -> I::Part {
        self.inner.get(&self.outer.get(whole))
    }

    fn set(&self, whole: O::Whole, part: I::Part) -> O::Whole {
        let middle = self.inner.set(self.outer.get(&whole), part);
        self.outer.set(whole, middle)
    }
}

/// A lens built from a getter and a setter closure.
pub struct FnLens<W, P, G, S> {
    get: G,
    set: S,
    _focus: PhantomData<fn(W) -> P>,
}

impl<W, P, G, S> FnLens<W, P, G, S>
where
    G: Fn(&W) -> P,
    S: Fn(W, P) -> W,
{
    pub fn new(get: G, set: S) -> Self {
        Self {
            get,
            set,
            _focus: PhantomData,
        }
    }
}

impl<W, P, G, S> Lens for FnLens<W, P, G, S>
where
    G: Fn(&W) -> P,
    S: Fn(W, P) -> W,
{
    type Whole = W;
    type Part = P;

    fn get(&self, whole: &W) -> P {
        (self.get)(whole)
    }

    fn set(&self, whole: W, part: P) -> W {
        (self.set)(whole, part)
    }
}

impl<W, P, G: Clone, S: Clone> Clone for FnLens<W, P, G, S> {
    fn clone(&self) -> Self {
        Self {
            get: self.get.clone(),
            set: self.set.clone(),
            _focus: PhantomData,
        }
    }
}

impl<W, P, G, S> fmt::Debug for FnLens<W, P, G, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnLens")
    }
}

/// Identity lens: the part is the whole.
pub struct IdentityLens<T>(PhantomData<fn(T) -> T>);

impl<T> IdentityLens<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for IdentityLens<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for IdentityLens<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for IdentityLens<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("IdentityLens")
    }
}

impl<T: Clone> Lens for IdentityLens<T> {
    type Whole = T;
    type Part = T;

    fn get(&self, whole: &T) -> T {
        whole.clone()
    }

    fn set(&self, _whole: T, part: T) -> T {
        part
    }
}
