//! The error trap: catches failures that escape every awaited test body
//!
//! A process-wide panic hook is installed once. While a trap is armed, panics
//! are recorded instead of printed and routed by attribution ticket:
//!
//! - the active body's own panic keeps its location as the test's origin;
//! - a panic with no ticket fails the active test, or becomes a run-level
//!   error when no test is active;
//! - a panic or late error from a body whose ticket is no longer active
//!   (it timed out) is always a run-level error.

use crate::error::TestError;
use crate::event::{Event, Notifier};
use parking_lot::Mutex;
use std::any::Any;
use std::cell::Cell;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Once};
use tracing::warn;

/// Attribution handle carried by a running body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket(u64);

impl Ticket {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Ticket(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

tokio::task_local! {
    static TASK_TICKET: Ticket;
}

thread_local! {
    static THREAD_TICKET: Cell<Option<Ticket>> = const { Cell::new(None) };
}

/// Ticket of the body running on this task or thread, if any
pub fn current_ticket() -> Option<Ticket> {
    TASK_TICKET
        .try_with(|ticket| *ticket)
        .ok()
        .or_else(|| THREAD_TICKET.with(Cell::get))
}

/// Run `future` with `ticket` attached to its task
pub async fn with_ticket<F: Future>(ticket: Ticket, future: F) -> F::Output {
    TASK_TICKET.scope(ticket, future).await
}

/// Run blocking `f` with `ticket` attached to the current thread
pub fn blocking_with_ticket<R>(ticket: Ticket, f: impl FnOnce() -> R) -> R {
    struct Reset(Option<Ticket>);
    impl Drop for Reset {
        fn drop(&mut self) {
            THREAD_TICKET.with(|cell| cell.set(self.0));
        }
    }

    let _reset = Reset(THREAD_TICKET.with(|cell| cell.replace(Some(ticket))));
    f()
}

static HOOK: Once = Once::new();
static ARMED: Mutex<Option<Arc<TrapState>>> = parking_lot::const_mutex(None);

fn install_hook() {
    HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let armed = ARMED.lock().clone();
            match armed {
                Some(state) => {
                    let origin = info
                        .location()
                        .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()));
                    state.on_panic(panic_message(info.payload()), origin);
                }
                None => previous(info),
            }
        }));
    });
}

/// Best-effort text of a panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Box<dyn Any>".to_string()
    }
}

/// What the trap learned while a body was active
#[derive(Debug, Default)]
pub struct Settled {
    /// Location of the body's own panic
    pub origin: Option<String>,
    /// Errors raised elsewhere while the body was active
    pub foreign: Vec<TestError>,
}

#[derive(Default)]
struct TrapInner {
    active: Option<Ticket>,
    origins: HashMap<Ticket, String>,
    foreign: Vec<TestError>,
}

struct TrapState {
    inner: Mutex<TrapInner>,
    notify: Notifier,
}

impl TrapState {
    fn on_panic(&self, message: String, origin: Option<String>) {
        let ticket = current_ticket();
        let mut inner = self.inner.lock();
        match (ticket, inner.active) {
            (Some(t), Some(active)) if t == active => {
                if let Some(origin) = origin {
                    inner.origins.insert(t, origin);
                }
            }
            (None, Some(_)) => inner.foreign.push(TestError::Uncaught { message, origin }),
            _ => {
                drop(inner);
                (self.notify)(Event::Uncaught {
                    error: TestError::Uncaught { message, origin },
                });
            }
        }
    }
}

/// Scheduler-boundary error trap, armed for the duration of one run
#[derive(Clone)]
pub struct ErrorTrap {
    state: Arc<TrapState>,
}

impl ErrorTrap {
    /// Arm a trap that routes run-level errors to `notify`
    pub fn arm(notify: Notifier) -> Self {
        install_hook();
        let state = Arc::new(TrapState {
            inner: Mutex::new(TrapInner::default()),
            notify,
        });
        let previous = ARMED.lock().replace(Arc::clone(&state));
        if previous.is_some() {
            warn!("replacing an error trap that was still armed");
        }
        Self { state }
    }

    /// Stop capturing panics; they print normally again
    pub fn disarm(&self) {
        let mut armed = ARMED.lock();
        if armed.as_ref().is_some_and(|s| Arc::ptr_eq(s, &self.state)) {
            *armed = None;
        }
    }

    pub fn is_armed(&self) -> bool {
        ARMED
            .lock()
            .as_ref()
            .is_some_and(|s| Arc::ptr_eq(s, &self.state))
    }

    /// Mark `ticket` as the body currently in flight
    pub fn begin(&self, ticket: Ticket) {
        let mut inner = self.state.inner.lock();
        inner.active = Some(ticket);
        inner.foreign.clear();
    }

    /// The body with `ticket` completed in time
    pub fn finish(&self, ticket: Ticket) -> Settled {
        let mut inner = self.state.inner.lock();
        if inner.active == Some(ticket) {
            inner.active = None;
        }
        Settled {
            origin: inner.origins.remove(&ticket),
            foreign: std::mem::take(&mut inner.foreign),
        }
    }

    /// The body with `ticket` timed out; anything it raises later is run-level
    pub fn abandon(&self, ticket: Ticket) -> Vec<TestError> {
        let settled = self.finish(ticket);
        settled.foreign
    }

    /// Route an error that no awaited body owns
    pub fn report(&self, error: TestError) {
        (self.state.notify)(Event::Uncaught { error });
    }
}

impl Drop for TrapState {
    fn drop(&mut self) {
        let pending = self.inner.get_mut().foreign.len();
        if pending > 0 {
            warn!(pending, "error trap dropped with unreported errors");
        }
    }
}
