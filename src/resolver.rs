use std::{cell::Cell, fmt, rc::Rc};

use crate::promise::{Promise, State};

/// A value that can hand its eventual settlement to a [Resolver].
///
/// Resolving a promise with a thenable makes the promise adopt whatever the
/// thenable settles to. [Promise] itself is the main implementor, but any type
/// can opt in:
///
/// ```
/// use promise_chain::{Promise, Resolution, Resolver, Scheduler, Thenable};
///
/// struct Answer;
///
/// impl Thenable<i32, String> for Answer {
///     fn register(&self, resolver: Resolver<i32, String>) -> Result<(), String> {
///         resolver.resolve(42);
///         Ok(())
///     }
/// }
///
/// let p = Promise::resolve(Resolution::thenable(Answer));
/// assert_eq!(Scheduler::block_on(p), Ok(Ok(42)));
/// ```
pub trait Thenable<T, E> {
    /// Arrange for `resolver` to be settled with this value's outcome.
    ///
    /// Returning `Err` rejects the adopting promise, unless `resolver` has
    /// already been used.
    fn register(&self, resolver: Resolver<T, E>) -> Result<(), E>;
}

/// What a promise can be resolved with: a plain value or something to adopt.
pub enum Resolution<T, E> {
    Value(T),
    Promise(Promise<T, E>),
    Thenable(Rc<dyn Thenable<T, E>>),
}

impl<T, E> Resolution<T, E> {
    pub fn thenable<N>(thenable: N) -> Self
    where
        N: Thenable<T, E> + 'static,
    {
        Resolution::Thenable(Rc::new(thenable))
    }
}

impl<T, E> From<Promise<T, E>> for Resolution<T, E> {
    fn from(promise: Promise<T, E>) -> Self {
        Resolution::Promise(promise)
    }
}

impl<T: fmt::Debug, E> fmt::Debug for Resolution<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Resolution::Promise(promise) => f.debug_tuple("Promise").field(promise).finish(),
            Resolution::Thenable(_) => f.write_str("Thenable(..)"),
        }
    }
}

/// What a continuation callback produces: something to resolve the next
/// promise with, or a rejection reason.
pub type Outcome<T, E> = Result<Resolution<T, E>, E>;

/// The settlement capabilities handed to a promise's setup procedure.
///
/// All clones share a single done latch: whichever of [Resolver::resolve],
/// [Resolver::adopt], [Resolver::resolve_with] or [Resolver::reject] is called
/// first wins and every later call is ignored.
pub struct Resolver<T, E> {
    promise: Promise<T, E>,
    done: Rc<Cell<bool>>,
}

impl<T, E> Clone for Resolver<T, E> {
    fn clone(&self) -> Self {
        Self {
            promise: self.promise.clone(),
            done: self.done.clone(),
        }
    }
}

impl<T, E> fmt::Debug for Resolver<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("promise", &self.promise)
            .field("done", &self.done.get())
            .finish()
    }
}

impl<T, E> Resolver<T, E> {
    /// Whether one of the settlement capabilities has already been used.
    pub fn is_done(&self) -> bool {
        self.done.get()
    }

    fn latch(&self) -> bool {
        !self.done.replace(true)
    }
}

impl<T: Clone + 'static, E: Clone + 'static> Resolver<T, E> {
    /// A resolver with a fresh latch, bound to `promise`.
    pub(crate) fn new(promise: Promise<T, E>) -> Self {
        Self {
            promise,
            done: Rc::new(Cell::new(false)),
        }
    }

    /// Fulfill with a plain value.
    pub fn resolve(&self, value: T) {
        self.resolve_with(Resolution::Value(value));
    }

    /// Mirror `promise`'s eventual settlement.
    pub fn adopt(&self, promise: Promise<T, E>) {
        self.resolve_with(Resolution::Promise(promise));
    }

    /// Fulfill with a plain value or adopt a promise or thenable.
    pub fn resolve_with(&self, resolution: Resolution<T, E>) {
        if self.latch() {
            self.promise.resolve_inner(resolution);
        }
    }

    pub fn reject(&self, reason: E) {
        if self.latch() {
            self.promise.settle(State::Rejected(reason));
        }
    }

    /// Resolve or reject according to a continuation's result.
    pub fn settle(&self, outcome: Outcome<T, E>) {
        match outcome {
            Ok(resolution) => self.resolve_with(resolution),
            Err(reason) => self.reject(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Resolution, Resolver, Thenable};
    use crate::{promise::pending, Scheduler, Status};
    use std::{cell::Cell, rc::Rc};

    #[test]
    fn first_call_wins() {
        let (promise, resolver) = pending::<i32, String>();
        let other = resolver.clone();
        assert!(!resolver.is_done());

        resolver.resolve(1);
        other.reject("late".into());
        other.resolve(2);

        assert!(other.is_done());
        assert_eq!(promise.peek(), Some(Ok(1)));
    }

    #[test]
    fn adopting_holds_the_latch_before_settling() {
        let (promise, resolver) = pending::<i32, String>();
        let (source, source_resolver) = pending::<i32, String>();

        resolver.adopt(source);
        resolver.resolve(5);
        assert_eq!(promise.status(), Status::Pending);

        source_resolver.resolve(9);
        Scheduler::run();
        assert_eq!(promise.peek(), Some(Ok(9)));
    }

    struct Counting {
        calls: Rc<Cell<usize>>,
    }

    impl Thenable<i32, String> for Counting {
        fn register(&self, resolver: Resolver<i32, String>) -> Result<(), String> {
            self.calls.set(self.calls.get() + 1);
            resolver.resolve(3);
            resolver.reject("ignored".into());
            Err("also ignored".into())
        }
    }

    #[test]
    fn thenable_gets_a_fresh_latched_resolver() {
        let calls = Rc::new(Cell::new(0));
        let (promise, resolver) = pending::<i32, String>();

        resolver.resolve_with(Resolution::thenable(Counting {
            calls: calls.clone(),
        }));

        assert_eq!(calls.get(), 1);
        assert_eq!(promise.peek(), Some(Ok(3)));
    }

    #[test]
    fn settle_maps_outcomes() {
        let (fulfilled, resolver) = pending::<i32, String>();
        resolver.settle(Ok(Resolution::Value(4)));
        assert_eq!(fulfilled.peek(), Some(Ok(4)));

        let (rejected, resolver) = pending::<i32, String>();
        resolver.settle(Err("no".into()));
        assert_eq!(rejected.peek(), Some(Err("no".into())));
    }
}
