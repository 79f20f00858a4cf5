//! Single-threaded promises with chained continuations.
//!
//! A [Promise] is created pending, handed to a setup procedure through its
//! [Resolver], and settles exactly once as fulfilled or rejected. Continuations
//! registered with [Promise::then], [Promise::catch] and [Promise::finally]
//! each produce a new promise, and always run on a later turn of the thread's
//! [Scheduler], never inside the call that registered them.
//!
//! Resolving a promise with another promise (or any [Thenable]) makes it adopt
//! that promise's outcome instead of nesting it.
//!
//! ```
//! use promise_chain::{Promise, Resolution, Scheduler};
//!
//! let inner = Promise::<String, String>::fulfilled("inner".to_string());
//! let outer = Promise::fulfilled(1)
//!     .then(move |_| Ok(Resolution::Promise(inner)))
//!     .then(|s| Ok(Resolution::Value(s.len())))
//!     .catch(|_| Ok(Resolution::Value(0)));
//!
//! assert_eq!(Scheduler::block_on(outer), Ok(Ok(5)));
//! ```
//!
//! Promises are also [std::future::Future]s, so they can be awaited from async
//! code driven by [Scheduler::block_on].
use thiserror::Error;

mod combinators;
mod promise;
mod resolver;
mod scheduler;

pub use promise::{Promise, Status};
pub use resolver::{Outcome, Resolution, Resolver, Thenable};
pub use scheduler::Scheduler;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("the run queue drained before the future completed")]
    Stalled,
}
