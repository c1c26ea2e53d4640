use abi::ThreadId;

use crate::tcb::{Tcb, ThreadFlag};

pub const THREAD_COUNT: usize = 6;
pub const PRIORITY_COUNT: usize = 16;

/// One FIFO of ready threads per priority level, threaded through the TCB
/// link field. Insertion at the tail, removal from the head.
#[derive(Clone, Copy, Default)]
pub(crate) struct ReadyQueue {
    pub(crate) head: Option<ThreadId>,
    pub(crate) tail: Option<ThreadId>,
}

pub(crate) struct Scheduler {
    pub(crate) tcbs: [Tcb; THREAD_COUNT],
    pub(crate) readyque: [ReadyQueue; PRIORITY_COUNT],
    pub(crate) current: Option<ThreadId>,
}

impl Scheduler {
    pub(crate) fn new() -> Self {
        Self {
            tcbs: core::array::from_fn(|_| Tcb::default()),
            readyque: [ReadyQueue::default(); PRIORITY_COUNT],
            current: None,
        }
    }

    /// Find a free TCB slot.
    pub(crate) fn alloc_tcb(&self) -> Option<ThreadId> {
        self.tcbs.iter().position(Tcb::is_free).map(ThreadId)
    }

    pub(crate) fn current_tcb(&mut self) -> Option<&mut Tcb> {
        let id = self.current?;
        Some(&mut self.tcbs[id.0])
    }

    /// Detach the current thread from its ready queue.
    ///
    /// Membership is tracked by the READY flag, so calling this on a thread
    /// that is already detached (or with no current thread, as in service
    /// mode) is a no-op.
    pub(crate) fn getcurrent(&mut self) {
        let Some(id) = self.current else {
            return;
        };
        let tcb = &mut self.tcbs[id.0];
        if !tcb.flags.contains(ThreadFlag::Ready) {
            return;
        }
        // The current thread was scheduled, and scheduling always picks a
        // queue head.
        let next = tcb.next;
        tcb.flags.remove(ThreadFlag::Ready);
        tcb.next = None;
        let q = &mut self.readyque[tcb.priority];
        debug_assert_eq!(q.head, Some(id));
        q.head = next;
        if q.head.is_none() {
            q.tail = None;
        }
    }

    /// Link the current thread at the tail of its priority's ready queue.
    ///
    /// No-op if it is already linked (READY flag set) or there is no current
    /// thread.
    pub(crate) fn putcurrent(&mut self) {
        let Some(id) = self.current else {
            return;
        };
        let tcb = &mut self.tcbs[id.0];
        if tcb.flags.contains(ThreadFlag::Ready) {
            return;
        }
        tcb.flags.insert(ThreadFlag::Ready);
        tcb.next = None;
        let priority = tcb.priority;
        let q = &mut self.readyque[priority];
        match q.tail {
            Some(tail) => self.tcbs[tail.0].next = Some(id),
            None => q.head = Some(id),
        }
        self.readyque[priority].tail = Some(id);
    }

    /// Pick the head of the highest-priority non-empty ready queue as the
    /// next current thread. Nothing runnable is fatal.
    pub(crate) fn schedule(&mut self) {
        for q in &self.readyque {
            if let Some(head) = q.head {
                self.current = Some(head);
                return;
            }
        }
        crate::sysdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn occupy(sched: &mut Scheduler, priority: usize) -> ThreadId {
        let id = sched.alloc_tcb().unwrap();
        let tcb = &mut sched.tcbs[id.0];
        tcb.init.func = Some(|_, _| 0);
        tcb.priority = priority;
        id
    }

    #[test]
    fn put_get_are_idempotent() {
        let mut sched = Scheduler::new();
        let id = occupy(&mut sched, 3);
        sched.current = Some(id);

        sched.putcurrent();
        sched.putcurrent();
        assert!(sched.tcbs[id.0].is_ready());
        assert_eq!(sched.readyque[3].head, Some(id));
        assert_eq!(sched.readyque[3].tail, Some(id));
        assert_eq!(sched.tcbs[id.0].next, None);

        sched.getcurrent();
        sched.getcurrent();
        assert!(!sched.tcbs[id.0].is_ready());
        assert_eq!(sched.readyque[3].head, None);
        assert_eq!(sched.readyque[3].tail, None);
    }

    #[test]
    fn fifo_within_priority() {
        let mut sched = Scheduler::new();
        let a = occupy(&mut sched, 1);
        let b = occupy(&mut sched, 1);
        sched.current = Some(a);
        sched.putcurrent();
        sched.current = Some(b);
        sched.putcurrent();

        sched.schedule();
        assert_eq!(sched.current, Some(a));
        // rotate: detach and reattach at the tail
        sched.getcurrent();
        sched.putcurrent();
        sched.schedule();
        assert_eq!(sched.current, Some(b));
    }

    #[test]
    fn highest_priority_wins() {
        let mut sched = Scheduler::new();
        let low = occupy(&mut sched, 9);
        let high = occupy(&mut sched, 2);
        sched.current = Some(low);
        sched.putcurrent();
        sched.current = Some(high);
        sched.putcurrent();
        sched.schedule();
        assert_eq!(sched.current, Some(high));
        let _ = low;
    }

    #[test]
    #[should_panic(expected = "system down")]
    fn empty_scan_is_fatal() {
        let mut sched = Scheduler::new();
        sched.schedule();
    }

    #[test]
    fn service_mode_short_circuits() {
        let mut sched = Scheduler::new();
        sched.current = None;
        sched.putcurrent();
        sched.getcurrent();
        assert!(sched.readyque.iter().all(|q| q.head.is_none()));
    }
}
