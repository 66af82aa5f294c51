//! FIFO queue of pending acquisitions.
//!
//! Blocking and asynchronous callers share one queue so that arrival order
//! is preserved across both paths. A grant is delivered to a waiter while
//! the pool lock is held; the waiter then finishes the acquisition without
//! the lock.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use tokio::sync::oneshot;

use crate::handle::Handle;

/// What a waiter receives when it reaches the head of the queue.
#[derive(Debug)]
pub(crate) enum Grant<R> {
    /// A returned resource, handed over without re-entering the idle set.
    Ready(Handle<R>),
    /// A reserved slot; the waiter creates the resource itself.
    Create,
    /// The pool closed while the caller was waiting.
    Closed,
    /// The pool became unavailable while the caller was waiting.
    Unavailable,
}

/// Delivery point for a blocked thread.
#[derive(Debug)]
pub(crate) struct Mailbox<R> {
    grant: Mutex<Option<Grant<R>>>,
    ready: Condvar,
}

impl<R> Mailbox<R> {
    pub(crate) fn new() -> Self {
        Self {
            grant: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    fn deliver(&self, grant: Grant<R>) {
        *self.grant.lock() = Some(grant);
        self.ready.notify_one();
    }

    /// Block until a grant arrives or `deadline` passes.
    pub(crate) fn wait_until(&self, deadline: Instant) -> Option<Grant<R>> {
        let mut slot = self.grant.lock();
        while slot.is_none() {
            if self.ready.wait_until(&mut slot, deadline).timed_out() {
                break;
            }
        }
        slot.take()
    }

    /// Take a grant that raced in after the wait gave up.
    pub(crate) fn take(&self) -> Option<Grant<R>> {
        self.grant.lock().take()
    }
}

#[derive(Debug)]
enum Notify<R> {
    Blocking(Arc<Mailbox<R>>),
    Async(oneshot::Sender<Grant<R>>),
}

#[derive(Debug)]
struct Waiter<R> {
    id: u64,
    notify: Notify<R>,
}

/// Arrival-ordered waiters of both kinds.
#[derive(Debug)]
pub(crate) struct WaitQueue<R> {
    waiters: VecDeque<Waiter<R>>,
    async_waiting: usize,
    next_id: u64,
}

impl<R> WaitQueue<R> {
    pub(crate) fn new() -> Self {
        Self {
            waiters: VecDeque::new(),
            async_waiting: 0,
            next_id: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.waiters.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    pub(crate) fn async_waiting(&self) -> usize {
        self.async_waiting
    }

    fn push(&mut self, notify: Notify<R>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        if matches!(notify, Notify::Async(_)) {
            self.async_waiting += 1;
        }
        self.waiters.push_back(Waiter { id, notify });
        id
    }

    /// Enqueue a blocked thread.
    pub(crate) fn push_blocking(&mut self, mailbox: Arc<Mailbox<R>>) -> u64 {
        self.push(Notify::Blocking(mailbox))
    }

    /// Enqueue an asynchronous task.
    pub(crate) fn push_async(&mut self) -> (u64, oneshot::Receiver<Grant<R>>) {
        let (tx, rx) = oneshot::channel();
        (self.push(Notify::Async(tx)), rx)
    }

    /// Remove a waiter that gave up. Returns `false` if it was already served.
    pub(crate) fn remove(&mut self, id: u64) -> bool {
        let Some(pos) = self.waiters.iter().position(|w| w.id == id) else {
            return false;
        };
        if let Some(waiter) = self.waiters.remove(pos) {
            if matches!(waiter.notify, Notify::Async(_)) {
                self.async_waiting -= 1;
            }
        }
        true
    }

    /// Hand `grant` to the oldest live waiter.
    ///
    /// Returns the grant back when nobody could take it.
    pub(crate) fn hand_off(&mut self, mut grant: Grant<R>) -> Option<Grant<R>> {
        while let Some(waiter) = self.waiters.pop_front() {
            match waiter.notify {
                Notify::Blocking(mailbox) => {
                    mailbox.deliver(grant);
                    return None;
                }
                Notify::Async(tx) => {
                    self.async_waiting -= 1;
                    match tx.send(grant) {
                        Ok(()) => return None,
                        // Receiver already gone; try the next waiter.
                        Err(returned) => grant = returned,
                    }
                }
            }
        }
        Some(grant)
    }

    /// Fail every waiter with [`Grant::Closed`].
    pub(crate) fn close_all(&mut self) {
        self.fail_all(|| Grant::Closed);
    }

    /// Wake every waiter with a grant that carries no slot.
    ///
    /// Returns the number of waiters woken.
    pub(crate) fn fail_all(&mut self, grant: impl Fn() -> Grant<R>) -> usize {
        let woken = self.waiters.len();
        while let Some(waiter) = self.waiters.pop_front() {
            match waiter.notify {
                Notify::Blocking(mailbox) => mailbox.deliver(grant()),
                Notify::Async(tx) => {
                    let _ = tx.send(grant());
                }
            }
        }
        self.async_waiting = 0;
        woken
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn ready_id<R>(grant: Option<Grant<R>>) -> Option<u64> {
        match grant {
            Some(Grant::Ready(handle)) => Some(handle.id()),
            _ => None,
        }
    }

    #[test]
    fn test_hand_off_is_fifo_across_kinds() {
        let mut queue: WaitQueue<&str> = WaitQueue::new();
        let first = Arc::new(Mailbox::new());
        queue.push_blocking(Arc::clone(&first));
        let (_, mut second) = queue.push_async();
        let third = Arc::new(Mailbox::new());
        queue.push_blocking(Arc::clone(&third));
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.async_waiting(), 1);

        assert!(queue.hand_off(Grant::Ready(Handle::new(1, "a"))).is_none());
        assert!(queue.hand_off(Grant::Ready(Handle::new(2, "b"))).is_none());

        assert_eq!(ready_id(first.take()), Some(1));
        assert_eq!(ready_id(second.try_recv().ok()), Some(2));
        assert!(third.take().is_none());
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.async_waiting(), 0);
    }

    #[test]
    fn test_hand_off_skips_dropped_receivers() {
        let mut queue: WaitQueue<u8> = WaitQueue::new();
        let (_, rx) = queue.push_async();
        drop(rx);
        let mailbox = Arc::new(Mailbox::new());
        queue.push_blocking(Arc::clone(&mailbox));

        assert!(queue.hand_off(Grant::Create).is_none());
        assert!(matches!(mailbox.take(), Some(Grant::Create)));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_hand_off_without_waiters_returns_grant() {
        let mut queue: WaitQueue<u8> = WaitQueue::new();
        assert!(matches!(queue.hand_off(Grant::Create), Some(Grant::Create)));
    }

    #[test]
    fn test_remove_waiter() {
        let mut queue: WaitQueue<u8> = WaitQueue::new();
        let (id, _rx) = queue.push_async();
        assert!(queue.remove(id));
        assert!(!queue.remove(id));
        assert_eq!(queue.async_waiting(), 0);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_close_all_notifies_everyone() {
        let mut queue: WaitQueue<u8> = WaitQueue::new();
        let mailbox = Arc::new(Mailbox::new());
        queue.push_blocking(Arc::clone(&mailbox));
        let (_, mut rx) = queue.push_async();

        queue.close_all();

        assert!(matches!(mailbox.take(), Some(Grant::Closed)));
        assert!(matches!(rx.try_recv(), Ok(Grant::Closed)));
        assert!(queue.is_empty());
        assert_eq!(queue.async_waiting(), 0);
    }

    #[test]
    fn test_fail_all_delivers_unavailable() {
        let mut queue: WaitQueue<u8> = WaitQueue::new();
        let first = Arc::new(Mailbox::new());
        queue.push_blocking(Arc::clone(&first));
        let (_, mut rx) = queue.push_async();

        assert_eq!(queue.fail_all(|| Grant::Unavailable), 2);

        assert!(matches!(first.take(), Some(Grant::Unavailable)));
        assert!(matches!(rx.try_recv(), Ok(Grant::Unavailable)));
        assert!(queue.is_empty());
        assert_eq!(queue.fail_all(|| Grant::Unavailable), 0);
    }

    #[test]
    fn test_mailbox_wait_times_out() {
        let mailbox: Mailbox<u8> = Mailbox::new();
        let deadline = Instant::now() + Duration::from_millis(20);
        assert!(mailbox.wait_until(deadline).is_none());
        assert!(Instant::now() >= deadline);
    }

    #[test]
    fn test_mailbox_wakes_on_delivery() {
        let mailbox = Arc::new(Mailbox::new());
        let sender = Arc::clone(&mailbox);
        let thread = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            sender.deliver(Grant::<u8>::Create);
        });

        let grant = mailbox.wait_until(Instant::now() + Duration::from_secs(5));
        assert!(matches!(grant, Some(Grant::Create)));
        thread.join().unwrap();
    }
}
