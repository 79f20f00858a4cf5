//! Constructors for already-decided promises, and combinators over many.
use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use log::trace;

use crate::{
    promise::{Promise, Waiter},
    resolver::{Resolution, Thenable},
};

impl<T: Clone + 'static, E: Clone + 'static> Promise<T, E> {
    /// A promise resolved with `value`: fulfilled straight away for a plain
    /// value, otherwise adopting the given promise or thenable.
    pub fn resolve<R>(value: R) -> Self
    where
        R: Into<Resolution<T, E>>,
    {
        let resolution = value.into();
        Promise::new(move |resolver| {
            resolver.resolve_with(resolution);
            Ok(())
        })
    }

    pub fn fulfilled(value: T) -> Self {
        Self::resolve(Resolution::Value(value))
    }

    pub fn reject(reason: E) -> Self {
        Promise::new(move |resolver| {
            resolver.reject(reason);
            Ok(())
        })
    }

    /// Wait for every element, fulfilling with their values in input order.
    ///
    /// Plain values take their slot immediately. The first rejection rejects
    /// the result; later outcomes are ignored.
    ///
    /// ```
    /// use promise_chain::{Promise, Resolution, Scheduler};
    /// let items: Vec<Resolution<i32, String>> = vec![
    ///     Resolution::Promise(Promise::fulfilled(1)),
    ///     Resolution::Value(2),
    /// ];
    /// let all = Promise::all(items);
    /// assert_eq!(Scheduler::block_on(all), Ok(Ok(vec![1, 2])));
    /// ```
    pub fn all<I>(items: I) -> Promise<Vec<T>, E>
    where
        I: IntoIterator,
        I::Item: Into<Resolution<T, E>>,
    {
        let items: Vec<Resolution<T, E>> = items.into_iter().map(Into::into).collect();

        Promise::new(move |resolver| {
            let slots: Rc<RefCell<Vec<Option<T>>>> =
                Rc::new(RefCell::new(vec![None; items.len()]));
            let remaining = Rc::new(Cell::new(0usize));

            for (index, item) in items.into_iter().enumerate() {
                let pending = match item {
                    Resolution::Value(value) => {
                        slots.borrow_mut()[index] = Some(value);
                        continue;
                    }
                    Resolution::Promise(promise) => promise,
                    thenable => Promise::resolve(thenable),
                };
                remaining.set(remaining.get() + 1);

                let slots = slots.clone();
                let remaining = remaining.clone();
                let fulfil = resolver.clone();
                let reject = resolver.clone();
                pending.complete(Waiter {
                    on_fulfilled: Some(Box::new(move |value| {
                        slots.borrow_mut()[index] = Some(value);
                        remaining.set(remaining.get() - 1);
                        if remaining.get() == 0 {
                            let values: Vec<T> = slots.borrow_mut().drain(..).flatten().collect();
                            trace!("all: every element fulfilled");
                            fulfil.resolve(values);
                        }
                    })),
                    on_rejected: Some(Box::new(move |reason| reject.reject(reason))),
                    on_finally: None,
                });
            }

            if remaining.get() == 0 {
                let values: Vec<T> = slots.borrow_mut().drain(..).flatten().collect();
                resolver.resolve(values);
            }
            Ok(())
        })
    }

    /// Settle the same way as whichever element settles first.
    ///
    /// Plain values settle on the spot, so a plain value wins over any promise
    /// in the list. An empty list never settles.
    ///
    /// ```
    /// use promise_chain::{Promise, Resolution, Scheduler};
    /// let items: Vec<Resolution<&str, String>> = vec![
    ///     Resolution::Promise(Promise::fulfilled("via promise")),
    ///     Resolution::Value("plain"),
    /// ];
    /// let winner = Promise::race(items);
    /// assert_eq!(Scheduler::block_on(winner), Ok(Ok("plain")));
    /// ```
    pub fn race<I>(items: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Resolution<T, E>>,
    {
        let items: Vec<Resolution<T, E>> = items.into_iter().map(Into::into).collect();

        Promise::new(move |resolver| {
            for item in items {
                match item {
                    Resolution::Value(value) => resolver.resolve(value),
                    Resolution::Promise(promise) => promise.register(resolver.clone())?,
                    // Wrapped so a thenable cannot take the shared latch
                    // before it has actually settled.
                    thenable => Promise::resolve(thenable).register(resolver.clone())?,
                }
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::{promise::pending, Promise, Resolution, Resolver, Scheduler, Status, Thenable};

    #[test]
    fn resolve_and_reject_settle_immediately() {
        assert_eq!(Promise::<i32, String>::fulfilled(1).peek(), Some(Ok(1)));
        assert_eq!(
            Promise::<i32, String>::reject("x".into()).peek(),
            Some(Err("x".into()))
        );
    }

    #[test]
    fn resolve_with_promise_adopts_a_turn_later() {
        let p = Promise::<i32, String>::resolve(Promise::<i32, String>::fulfilled(3));
        assert_eq!(p.status(), Status::Pending);
        Scheduler::run();
        assert_eq!(p.peek(), Some(Ok(3)));
    }

    #[test]
    fn all_keeps_input_order() {
        let (slow, slow_resolver) = pending::<i32, String>();
        let items: Vec<Resolution<i32, String>> = vec![
            Resolution::Promise(slow),
            Resolution::Promise(Promise::fulfilled(2)),
            Resolution::Value(3),
        ];
        let all = Promise::all(items);

        Scheduler::run();
        assert!(all.is_pending());

        slow_resolver.resolve(1);
        assert_eq!(all.peek(), Some(Ok(vec![1, 2, 3])));
    }

    #[test]
    fn all_of_plain_values_fulfills_immediately() {
        let all = Promise::<i32, String>::all(vec![Resolution::Value(1), Resolution::Value(2)]);
        assert_eq!(all.peek(), Some(Ok(vec![1, 2])));

        let empty = Promise::<i32, String>::all(Vec::<Resolution<i32, String>>::new());
        assert_eq!(empty.peek(), Some(Ok(vec![])));
    }

    #[test]
    fn all_rejects_with_first_rejection() {
        let (late, late_resolver) = pending::<i32, String>();
        let all = Promise::<i32, String>::all(vec![
            late,
            Promise::reject("x".into()),
            Promise::fulfilled(2),
        ]);

        Scheduler::run();
        assert_eq!(all.peek(), Some(Err("x".into())));

        late_resolver.reject("y".into());
        Scheduler::run();
        assert_eq!(all.peek(), Some(Err("x".into())));
    }

    #[test]
    fn race_prefers_plain_values() {
        let items: Vec<Resolution<i32, String>> = vec![
            Resolution::Promise(Promise::fulfilled(1)),
            Resolution::Value(2),
        ];
        let race = Promise::race(items);
        assert_eq!(race.peek(), Some(Ok(2)));
    }

    #[test]
    fn race_takes_first_settled_promise() {
        let (never, _resolver) = pending::<i32, String>();
        let race = Promise::<i32, String>::race(vec![
            never,
            Promise::reject("lost".into()),
            Promise::fulfilled(1),
        ]);

        Scheduler::run();
        assert_eq!(race.peek(), Some(Err("lost".into())));
    }

    struct Adopts(Promise<i32, String>);

    impl Thenable<i32, String> for Adopts {
        fn register(&self, resolver: Resolver<i32, String>) -> Result<(), String> {
            resolver.resolve_with(Resolution::Promise(self.0.clone()));
            Ok(())
        }
    }

    #[test]
    fn race_thenable_does_not_claim_the_win_early() {
        let (never, _resolver) = pending::<i32, String>();
        let items: Vec<Resolution<i32, String>> = vec![
            Resolution::thenable(Adopts(never)),
            Resolution::Promise(Promise::fulfilled(2)),
        ];
        let race = Promise::race(items);

        Scheduler::run();
        assert_eq!(race.peek(), Some(Ok(2)));
    }

    #[test]
    fn race_of_nothing_stays_pending() {
        let race = Promise::<i32, String>::race(Vec::<Promise<i32, String>>::new());
        Scheduler::run();
        assert!(race.is_pending());
    }
}
