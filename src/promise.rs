use std::{
    cell::{Cell, RefCell},
    fmt,
    future::Future,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll, Waker},
};

use log::{trace, warn};

use crate::{
    resolver::{Outcome, Resolution, Resolver, Thenable},
    Scheduler,
};

/// Nesting limit for thenables that adopt further thenables from inside
/// `register`. Past it the adopting promise is left pending.
const MAX_ADOPTION_DEPTH: usize = 128;

thread_local! {
    static ADOPTION_DEPTH: Cell<usize> = const { Cell::new(0) };
}

struct AdoptionGuard;

impl AdoptionGuard {
    fn enter() -> Option<Self> {
        ADOPTION_DEPTH.with(|depth| {
            if depth.get() >= MAX_ADOPTION_DEPTH {
                return None;
            }
            depth.set(depth.get() + 1);
            Some(AdoptionGuard)
        })
    }
}

impl Drop for AdoptionGuard {
    fn drop(&mut self) {
        ADOPTION_DEPTH.with(|depth| depth.set(depth.get() - 1));
    }
}

/// Where a promise is in its lifecycle. Leaves `Pending` at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Pending,
    Fulfilled,
    Rejected,
}

pub(crate) enum State<T, E> {
    Pending,
    Fulfilled(T),
    Rejected(E),
}

impl<T, E> State<T, E> {
    fn status(&self) -> Status {
        match self {
            State::Pending => Status::Pending,
            State::Fulfilled(_) => Status::Fulfilled,
            State::Rejected(_) => Status::Rejected,
        }
    }
}

/// A continuation record. Each branch runs at most once, and `on_finally`
/// runs after whichever of the other two applied.
pub(crate) struct Waiter<T, E> {
    pub(crate) on_fulfilled: Option<Box<dyn FnOnce(T)>>,
    pub(crate) on_rejected: Option<Box<dyn FnOnce(E)>>,
    pub(crate) on_finally: Option<Box<dyn FnOnce()>>,
}

impl<T, E> Waiter<T, E> {
    /// A waiter that hands the settlement to `resolver`.
    pub(crate) fn forward_to(resolver: Resolver<T, E>) -> Self
    where
        T: Clone + 'static,
        E: Clone + 'static,
    {
        let on_rejected = resolver.clone();
        Waiter {
            on_fulfilled: Some(Box::new(move |value| resolver.resolve(value))),
            on_rejected: Some(Box::new(move |reason| on_rejected.reject(reason))),
            on_finally: None,
        }
    }

    fn dispatch(self, settled: Result<T, E>) {
        match settled {
            Ok(value) => {
                if let Some(on_fulfilled) = self.on_fulfilled {
                    on_fulfilled(value);
                }
            }
            Err(reason) => {
                if let Some(on_rejected) = self.on_rejected {
                    on_rejected(reason);
                }
            }
        }

        if let Some(on_finally) = self.on_finally {
            on_finally();
        }
    }
}

struct Inner<T, E> {
    state: State<T, E>,
    // `None` once settled; registrations after that dispatch straight away.
    waiters: Option<Vec<Waiter<T, E>>>,
    wakers: Vec<Waker>,
}

/// A single-assignment value that becomes available later.
///
/// Cloning a `Promise` yields another handle to the same promise. Promises
/// are tied to the thread that created them; continuations are deferred onto
/// that thread's [Scheduler].
///
/// # Examples
///
/// ```
/// use promise_chain::{Promise, Resolution, Scheduler};
/// let p = Promise::<i32, String>::new(|resolver| {
///     resolver.resolve(4);
///     Ok(())
/// });
/// let squared = p.then(|v| Ok(Resolution::Value(v * v)));
/// assert!(squared.is_pending());
/// Scheduler::run();
/// assert_eq!(squared.peek(), Some(Ok(16)));
/// ```
pub struct Promise<T, E> {
    inner: Rc<RefCell<Inner<T, E>>>,
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T, E> fmt::Debug for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("status", &self.status())
            .finish()
    }
}

impl<T, E> Promise<T, E> {
    pub fn status(&self) -> Status {
        self.inner.borrow().state.status()
    }

    pub fn is_pending(&self) -> bool {
        self.status() == Status::Pending
    }

    /// Whether `self` and `other` are handles to the same promise.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: Clone + 'static, E: Clone + 'static> Promise<T, E> {
    /// Create a promise and run `setup` on it immediately.
    ///
    /// `setup` receives the [Resolver] for the new promise. Returning `Err`
    /// rejects the promise with that reason, unless the resolver was already
    /// used.
    pub fn new<F>(setup: F) -> Self
    where
        F: FnOnce(Resolver<T, E>) -> Result<(), E>,
    {
        let promise = Self {
            inner: Rc::new(RefCell::new(Inner {
                state: State::Pending,
                waiters: Some(Vec::new()),
                wakers: Vec::new(),
            })),
        };
        let resolver = Resolver::new(promise.clone());

        if let Err(reason) = setup(resolver.clone()) {
            resolver.reject(reason);
        }

        promise
    }

    /// The settled value or reason, or `None` while pending.
    pub fn peek(&self) -> Option<Result<T, E>> {
        match &self.inner.borrow().state {
            State::Pending => None,
            State::Fulfilled(value) => Some(Ok(value.clone())),
            State::Rejected(reason) => Some(Err(reason.clone())),
        }
    }

    pub(crate) fn resolve_inner(&self, resolution: Resolution<T, E>) {
        match resolution {
            Resolution::Value(value) => self.settle(State::Fulfilled(value)),
            Resolution::Promise(promise) => {
                if self.ptr_eq(&promise) {
                    warn!("promise resolved with itself, it will never settle");
                }
                self.adopt_thenable(&promise);
            }
            Resolution::Thenable(thenable) => self.adopt_thenable(thenable.as_ref()),
        }
    }

    fn adopt_thenable(&self, thenable: &dyn Thenable<T, E>) {
        let Some(_guard) = AdoptionGuard::enter() else {
            warn!("thenables nested past {MAX_ADOPTION_DEPTH} levels, leaving promise pending");
            return;
        };
        let resolver = Resolver::new(self.clone());

        if let Err(reason) = thenable.register(resolver.clone()) {
            resolver.reject(reason);
        }
    }

    pub(crate) fn settle(&self, state: State<T, E>) {
        let status = state.status();
        let (waiters, wakers) = {
            let mut inner = self.inner.borrow_mut();
            if !matches!(inner.state, State::Pending) {
                trace!("ignoring settlement of an already settled promise");
                return;
            }
            inner.state = state;
            (
                inner.waiters.take().unwrap_or_default(),
                std::mem::take(&mut inner.wakers),
            )
        };

        trace!("promise {status:?}, dispatching {} waiter(s)", waiters.len());
        for waiter in waiters {
            self.handle_result(waiter);
        }
        for waker in wakers {
            waker.wake();
        }
    }

    fn handle_result(&self, waiter: Waiter<T, E>) {
        let settled = {
            let mut guard = self.inner.borrow_mut();
            let inner = &mut *guard;
            match &inner.state {
                State::Pending => {
                    if let Some(waiters) = inner.waiters.as_mut() {
                        waiters.push(waiter);
                    }
                    return;
                }
                State::Fulfilled(value) => Ok(value.clone()),
                State::Rejected(reason) => Err(reason.clone()),
            }
        };

        waiter.dispatch(settled);
    }

    /// Register `waiter` on the next scheduler turn.
    pub(crate) fn complete(&self, waiter: Waiter<T, E>) {
        let promise = self.clone();
        Scheduler::schedule(move || promise.handle_result(waiter));
    }

    fn chain<U, F, R>(&self, on_fulfilled: F, on_rejected: R) -> Promise<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T, Resolver<U, E>) + 'static,
        R: FnOnce(E, Resolver<U, E>) + 'static,
    {
        Promise::new(|resolver| {
            let rejected = resolver.clone();
            self.complete(Waiter {
                on_fulfilled: Some(Box::new(move |value| on_fulfilled(value, resolver))),
                on_rejected: Some(Box::new(move |reason| on_rejected(reason, rejected))),
                on_finally: None,
            });
            Ok(())
        })
    }

    /// Continue with `on_fulfilled` once this promise fulfills. A rejection
    /// passes through to the returned promise untouched.
    ///
    /// Returning a promise (or other thenable) from `on_fulfilled` makes the
    /// returned promise adopt it; returning `Err` rejects it.
    pub fn then<U, F>(&self, on_fulfilled: F) -> Promise<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Outcome<U, E> + 'static,
    {
        self.chain(
            move |value, resolver| resolver.settle(on_fulfilled(value)),
            |reason, resolver| resolver.reject(reason),
        )
    }

    /// Like [Promise::then], with a callback for the rejected branch too.
    pub fn then_else<U, F, R>(&self, on_fulfilled: F, on_rejected: R) -> Promise<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Outcome<U, E> + 'static,
        R: FnOnce(E) -> Outcome<U, E> + 'static,
    {
        self.chain(
            move |value, resolver| resolver.settle(on_fulfilled(value)),
            move |reason, resolver| resolver.settle(on_rejected(reason)),
        )
    }

    /// Recover from a rejection. A fulfillment passes through untouched.
    pub fn catch<R>(&self, on_rejected: R) -> Promise<T, E>
    where
        R: FnOnce(E) -> Outcome<T, E> + 'static,
    {
        self.chain(
            |value, resolver| resolver.resolve(value),
            move |reason, resolver| resolver.settle(on_rejected(reason)),
        )
    }

    /// A continuation without callbacks: the returned promise settles the same
    /// way as this one, one turn later.
    pub fn forward(&self) -> Promise<T, E> {
        self.chain(
            |value, resolver| resolver.resolve(value),
            |reason, resolver| resolver.reject(reason),
        )
    }

    pub fn map<U, F>(&self, f: F) -> Promise<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> U + 'static,
    {
        self.then(move |value| Ok(Resolution::Value(f(value))))
    }

    /// Run `on_finally` once this promise settles either way.
    ///
    /// The returned promise settles the same way as this one, unless
    /// `on_finally` fails, in which case it rejects with that reason.
    pub fn finally<F>(&self, on_finally: F) -> Promise<T, E>
    where
        F: FnOnce() -> Result<(), E> + 'static,
    {
        Promise::new(|resolver| {
            let outcome: Rc<RefCell<Option<Result<T, E>>>> = Rc::default();
            let fulfilled = outcome.clone();
            let rejected = outcome.clone();

            self.complete(Waiter {
                on_fulfilled: Some(Box::new(move |value| {
                    *fulfilled.borrow_mut() = Some(Ok(value));
                })),
                on_rejected: Some(Box::new(move |reason| {
                    *rejected.borrow_mut() = Some(Err(reason));
                })),
                on_finally: Some(Box::new(move || {
                    if let Err(reason) = on_finally() {
                        resolver.reject(reason);
                        return;
                    }
                    let settled = outcome.borrow_mut().take();
                    match settled {
                        Some(Ok(value)) => resolver.resolve(value),
                        Some(Err(reason)) => resolver.reject(reason),
                        None => {}
                    }
                })),
            });
            Ok(())
        })
    }
}

impl<T: Clone + 'static, E: Clone + 'static> Thenable<T, E> for Promise<T, E> {
    fn register(&self, resolver: Resolver<T, E>) -> Result<(), E> {
        self.complete(Waiter::forward_to(resolver));
        Ok(())
    }
}

impl<T: Clone, E: Clone> Future for Promise<T, E> {
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;
        match &inner.state {
            State::Fulfilled(value) => Poll::Ready(Ok(value.clone())),
            State::Rejected(reason) => Poll::Ready(Err(reason.clone())),
            State::Pending => {
                if !inner.wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    inner.wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

/// A pending promise together with the resolver that settles it.
#[cfg(test)]
pub(crate) fn pending<T, E>() -> (Promise<T, E>, Resolver<T, E>)
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    let mut slot = None;
    let promise = Promise::new(|resolver| {
        slot = Some(resolver);
        Ok(())
    });
    (promise, slot.unwrap())
}
