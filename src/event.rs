//! Priority-ordered typed event dispatch.
//!
//! This is the Rust rendering of `kfxmpp_event_trigger`/`KfxmppEventHandler`:
//! a list of `(handler, priority)` pairs, walked in descending-priority
//! order with insertion order as the tiebreak, stopping at the first handler
//! that reports the event as consumed. Opaque callback + user-data pairs
//! become captured closure state, per the design note on replacing the
//! callback-with-opaque-data pattern with closures.

use std::sync::{Arc, Mutex};

/// Priorities at which a handler can be registered.
///
/// These mirror `KfxmppEventHandlerPriority`: handlers above [`Priority::BUILTIN`]
/// see an event before this crate's own protocol handling does; handlers at
/// or below it see it after, unless the built-in handler already consumed it.
pub struct Priority;

impl Priority {
    pub const LOW: i32 = 10;
    pub const BUILTIN: i32 = 20;
    pub const NORMAL: i32 = 30;
    pub const HIGH: i32 = 40;
}

/// A reference-counted, cloneable event handler.
///
/// Cloning shares the same underlying closure and release hook, which is
/// what lets a single handler be registered on an event list and in the
/// correlation table at once (spec's "may be registered on multiple events
/// or in the correlation table concurrently"). `Arc`/`Mutex` stand in for
/// the original's manual refcounting; in this crate's single-task actor
/// model the mutex is never contended, it exists only so the handler type
/// satisfies `Send` for the task that owns it.
pub struct Handler<T> {
    inner: Arc<Inner<T>>,
}

type HandlerFn<T> = Box<dyn FnMut(&T) -> bool + Send>;
type ReleaseFn = Box<dyn FnOnce() + Send>;

struct Inner<T> {
    func: Mutex<HandlerFn<T>>,
    release: Mutex<Option<ReleaseFn>>,
}

impl<T> Handler<T> {
    /// Wrap a plain closure with no release hook.
    pub fn new(func: impl FnMut(&T) -> bool + Send + 'static) -> Self {
        Self {
            inner: Arc::new(Inner {
                func: Mutex::new(Box::new(func)),
                release: Mutex::new(None),
            }),
        }
    }

    /// Wrap a closure together with a release hook run when the last
    /// reference to this handler is dropped.
    pub fn with_release(
        func: impl FnMut(&T) -> bool + Send + 'static,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                func: Mutex::new(Box::new(func)),
                release: Mutex::new(Some(Box::new(release))),
            }),
        }
    }

    /// Invoke the handler. Returns `true` if the handler consumed the event.
    pub fn call(&self, data: &T) -> bool {
        let mut guard = self.inner.func.lock().unwrap_or_else(|p| p.into_inner());
        (guard)(data)
    }
}

impl<T> Clone for Handler<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        let release = self.release.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(release) = release {
            release();
        }
    }
}

struct Entry<T> {
    handler: Handler<T>,
    priority: i32,
}

/// An ordered, priority-dispatched list of handlers for events carrying a
/// `T` payload.
pub struct Event<T> {
    entries: Vec<Entry<T>>,
    next_seq: u64,
}

impl<T> Default for Event<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            next_seq: 0,
        }
    }
}

impl<T> Event<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler at the given priority. Insertion-sort keeps
    /// `entries` in descending-priority order; among equal priorities, a
    /// handler added later sorts after ones already present, matching
    /// `g_list_insert_sorted`'s stability.
    pub fn add_handler(&mut self, handler: Handler<T>, priority: i32) {
        let pos = self
            .entries
            .iter()
            .position(|e| e.priority < priority)
            .unwrap_or(self.entries.len());
        self.entries.insert(pos, Entry { handler, priority });
        self.next_seq += 1;
    }

    /// Walk the handler list in priority order, stopping at the first
    /// handler that reports the event consumed. Returns whether any handler
    /// consumed it.
    pub fn trigger(&self, data: &T) -> bool {
        self.trigger_filtered(data, |_| true)
    }

    /// Like [`Event::trigger`], but only considers handlers whose priority
    /// satisfies `pred`. Used to interleave a built-in handler (which needs
    /// mutable access to state this generic dispatch can't carry) at a fixed
    /// priority among user-registered handlers: callers run the handlers
    /// above the built-in's priority, run the built-in themselves, then run
    /// the rest.
    pub fn trigger_filtered(&self, data: &T, pred: impl Fn(i32) -> bool) -> bool {
        for entry in &self.entries {
            if pred(entry.priority) && entry.handler.call(data) {
                return true;
            }
        }
        false
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn fires_in_descending_priority_order() {
        let mut ev: Event<i32> = Event::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = Arc::clone(&order);
        ev.add_handler(
            Handler::new(move |_| {
                o1.lock().unwrap().push("low");
                false
            }),
            Priority::LOW,
        );
        let o2 = Arc::clone(&order);
        ev.add_handler(
            Handler::new(move |_| {
                o2.lock().unwrap().push("high");
                false
            }),
            Priority::HIGH,
        );
        let o3 = Arc::clone(&order);
        ev.add_handler(
            Handler::new(move |_| {
                o3.lock().unwrap().push("normal");
                false
            }),
            Priority::NORMAL,
        );

        let consumed = ev.trigger(&0);
        assert!(!consumed);
        assert_eq!(*order.lock().unwrap(), vec!["high", "normal", "low"]);
    }

    #[test]
    fn stops_at_first_consuming_handler() {
        let mut ev: Event<i32> = Event::new();
        let calls = Arc::new(AtomicU32::new(0));

        let c1 = Arc::clone(&calls);
        ev.add_handler(
            Handler::new(move |_| {
                c1.fetch_add(1, Ordering::SeqCst);
                true
            }),
            Priority::HIGH,
        );
        let c2 = Arc::clone(&calls);
        ev.add_handler(
            Handler::new(move |_| {
                c2.fetch_add(1, Ordering::SeqCst);
                false
            }),
            Priority::LOW,
        );

        assert!(ev.trigger(&0));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn ties_break_by_insertion_order() {
        let mut ev: Event<i32> = Event::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = Arc::clone(&order);
        ev.add_handler(
            Handler::new(move |_| {
                o1.lock().unwrap().push(1);
                false
            }),
            Priority::NORMAL,
        );
        let o2 = Arc::clone(&order);
        ev.add_handler(
            Handler::new(move |_| {
                o2.lock().unwrap().push(2);
                false
            }),
            Priority::NORMAL,
        );

        ev.trigger(&0);
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn release_hook_runs_once_on_final_drop() {
        let released = Arc::new(AtomicU32::new(0));
        let r = Arc::clone(&released);
        let handler = Handler::with_release(
            |_: &i32| false,
            move || {
                r.fetch_add(1, Ordering::SeqCst);
            },
        );
        let cloned = handler.clone();
        drop(handler);
        assert_eq!(released.load(Ordering::SeqCst), 0);
        drop(cloned);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }
}
