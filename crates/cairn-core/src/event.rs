//! The event stream and the in-memory publish/subscribe bus that fans it out

use crate::error::{ContextTeardownError, TestError};
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// One record of the run, in emission order
///
/// `path` is the ancestor chain of the node, excluding the node itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    SuiteStart {
        name: String,
        path: Vec<String>,
    },
    SuiteEnd {
        name: String,
        path: Vec<String>,
    },
    TestStart {
        name: String,
        path: Vec<String>,
    },
    TestEnd {
        name: String,
        path: Vec<String>,
        error: Option<TestError>,
    },
    /// A persistent context's teardown failed; `path` includes the suite itself
    ContextTeardown {
        path: Vec<String>,
        error: ContextTeardownError,
    },
    /// An error no test owns
    Uncaught { error: TestError },
}

impl Event {
    pub fn error(&self) -> Option<&TestError> {
        match self {
            Event::TestEnd { error, .. } => error.as_ref(),
            Event::Uncaught { error } => Some(error),
            _ => None,
        }
    }
}

/// Callback the sequencer and the error trap emit events through
pub type Notifier = Arc<dyn Fn(Event) + Send + Sync>;

/// When a subscriber sees events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Buffering {
    /// Deliver every event as soon as it is published
    Immediate,
    /// Hold everything and deliver once the bus closes
    UntilClose,
}

/// A consumer of the event stream
pub trait Subscriber: Send + 'static {
    fn buffering(&self) -> Buffering {
        Buffering::Immediate
    }

    fn on_event(&mut self, event: &Event) -> io::Result<()>;

    /// Called once after the last event
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Handle to a subscriber's task; resolves to the subscriber after the bus closes
pub type Subscription<S> = JoinHandle<io::Result<S>>;

/// Fans every published event out to each subscriber's own task
///
/// Subscribers never block each other or the publisher: each one drains an
/// unbounded channel at its own pace.
#[derive(Default)]
pub struct EventBus {
    senders: Mutex<Vec<mpsc::UnboundedSender<Event>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Must be called from within a tokio runtime
    pub fn subscribe<S: Subscriber>(&self, mut subscriber: S) -> Subscription<S> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
        self.senders.lock().push(tx);

        tokio::spawn(async move {
            match subscriber.buffering() {
                Buffering::Immediate => {
                    while let Some(event) = rx.recv().await {
                        subscriber.on_event(&event)?;
                    }
                }
                Buffering::UntilClose => {
                    let mut held = Vec::new();
                    while let Some(event) = rx.recv().await {
                        held.push(event);
                    }
                    for event in &held {
                        subscriber.on_event(event)?;
                    }
                }
            }
            subscriber.close()?;
            Ok(subscriber)
        })
    }

    pub fn publish(&self, event: Event) {
        let senders = self.senders.lock();
        if let Some((last, rest)) = senders.split_last() {
            for tx in rest {
                let _ = tx.send(event.clone());
            }
            let _ = last.send(event);
        }
    }

    /// End the stream; events published afterwards are dropped
    pub fn close(&self) {
        self.senders.lock().clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.senders.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct Recorder {
        policy: Buffering,
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl Subscriber for Recorder {
        fn buffering(&self) -> Buffering {
            self.policy
        }

        fn on_event(&mut self, event: &Event) -> io::Result<()> {
            if let Event::TestEnd { name, .. } = event {
                self.seen.lock().push(name.clone());
            }
            Ok(())
        }

        fn close(&mut self) -> io::Result<()> {
            self.seen.lock().push("closed".to_string());
            Ok(())
        }
    }

    fn test_end(name: &str) -> Event {
        Event::TestEnd {
            name: name.to_string(),
            path: vec![],
            error: None,
        }
    }

    #[tokio::test]
    async fn test_every_subscriber_sees_every_event() {
        let bus = EventBus::new();
        let immediate = Arc::new(Mutex::new(Vec::new()));
        let buffered = Arc::new(Mutex::new(Vec::new()));
        let a = bus.subscribe(Recorder {
            policy: Buffering::Immediate,
            seen: Arc::clone(&immediate),
        });
        let b = bus.subscribe(Recorder {
            policy: Buffering::UntilClose,
            seen: Arc::clone(&buffered),
        });

        bus.publish(test_end("one"));
        bus.publish(test_end("two"));
        bus.close();
        bus.publish(test_end("dropped"));

        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();
        assert_eq!(*immediate.lock(), vec!["one", "two", "closed"]);
        assert_eq!(*buffered.lock(), vec!["one", "two", "closed"]);
    }

    #[tokio::test]
    async fn test_buffered_subscriber_waits_for_close() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handle = bus.subscribe(Recorder {
            policy: Buffering::UntilClose,
            seen: Arc::clone(&seen),
        });

        bus.publish(test_end("held"));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(seen.lock().is_empty());

        bus.close();
        handle.await.unwrap().unwrap();
        assert_eq!(*seen.lock(), vec!["held", "closed"]);
    }

    #[test]
    fn test_event_error() {
        let err = TestError::Timeout { timeout_ms: 5 };
        let uncaught = Event::Uncaught { error: err.clone() };
        assert_eq!(uncaught.error(), Some(&err));
        assert_eq!(test_end("ok").error(), None);
    }
}
