use std::{
    cell::RefCell,
    collections::VecDeque,
    future::Future,
    pin::pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    task::{Context, Poll, Wake, Waker},
};

use log::{trace, warn};

use crate::Error;

type Task = Box<dyn FnOnce()>;

thread_local! {
    static RUN_Q: RefCell<VecDeque<Task>> = const { RefCell::new(VecDeque::new()) };
    // One waker per thread, so promises left pending by a stalled `block_on`
    // recognise it again on the next call instead of storing another.
    static WAKER: (Arc<Woken>, Waker) = {
        let woken = Arc::new(Woken::default());
        (woken.clone(), Waker::from(woken))
    };
}

#[derive(Default)]
struct Woken(AtomicBool);

impl Wake for Woken {
    fn wake(self: Arc<Self>) {
        self.0.store(true, Ordering::Release);
    }
}

impl Woken {
    fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

/// Handle to the current thread's run queue.
///
/// Every thread owns its own queue, so a promise and all of its continuations
/// must stay on the thread that created them. Nothing runs until the queue is
/// driven with [Scheduler::tick], [Scheduler::run] or [Scheduler::block_on].
///
/// ```
/// use promise_chain::Scheduler;
/// use std::cell::Cell;
/// use std::rc::Rc;
/// let hits = Rc::new(Cell::new(0));
/// {
///     let hits = hits.clone();
///     Scheduler::schedule(move || hits.set(hits.get() + 1));
/// }
/// assert_eq!(hits.get(), 0);
/// assert_eq!(Scheduler::run(), 1);
/// assert_eq!(hits.get(), 1);
/// ```
pub struct Scheduler;

impl Scheduler {
    /// Append `task` to the end of this thread's queue.
    pub fn schedule<F>(task: F)
    where
        F: FnOnce() + 'static,
    {
        RUN_Q.with(|q| q.borrow_mut().push_back(Box::new(task)));
    }

    /// Run a single queued task. Returns `false` if the queue was empty.
    ///
    /// The queue is not borrowed while the task runs, so tasks may schedule
    /// further tasks.
    pub fn tick() -> bool {
        let task = RUN_Q.with(|q| q.borrow_mut().pop_front());

        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Run tasks until the queue is empty, including any scheduled along the
    /// way. Returns how many ran.
    pub fn run() -> usize {
        let mut turns = 0;

        while Self::tick() {
            turns += 1;
        }

        trace!("run queue drained after {turns} turn(s)");
        turns
    }

    /// Number of tasks waiting in this thread's queue.
    pub fn queued() -> usize {
        RUN_Q.with(|q| q.borrow().len())
    }

    /// Drive `future` to completion, running one queued task between polls.
    ///
    /// Returns [Error::Stalled] if the queue runs dry while `future` is still
    /// pending, since nothing on this thread could ever wake it again.
    ///
    /// ```
    /// use promise_chain::{Promise, Scheduler};
    /// let p = Promise::<i32, String>::fulfilled(20).map(|v| v + 1);
    /// assert_eq!(Scheduler::block_on(p), Ok(Ok(21)));
    /// ```
    pub fn block_on<F: Future>(future: F) -> Result<F::Output, Error> {
        let (woken, waker) = WAKER.with(|(woken, waker)| (woken.clone(), waker.clone()));
        woken.take();
        let mut future = pin!(future);
        let mut cx = Context::from_waker(&waker);

        loop {
            if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
                return Ok(output);
            }

            while !woken.take() {
                if Self::tick() {
                    continue;
                }
                // A nested `block_on` may have taken our wakeup.
                if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
                    return Ok(output);
                }
                warn!("run queue drained while blocked on a pending future");
                return Err(Error::Stalled);
            }
        }
    }
}
