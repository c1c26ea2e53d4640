use abi::ThreadId;
use core::ptr;

/// One queued message. Nodes are drawn from the fixed-block allocator when a
/// send enters the kernel and freed when a receive consumes them; the
/// payload pointer is handed from sender to receiver verbatim.
#[repr(C)]
pub(crate) struct MsgBuf {
    pub(crate) next: *mut MsgBuf,
    /// `None` when the sender was a service call running between threads.
    pub(crate) sender: Option<ThreadId>,
    pub(crate) size: usize,
    pub(crate) payload: *mut u8,
}

/// A rendezvous point: a FIFO of pending messages and at most one blocked
/// receiver. At quiescence one of the two is always empty.
pub(crate) struct MsgBox {
    pub(crate) receiver: Option<ThreadId>,
    head: *mut MsgBuf,
    tail: *mut MsgBuf,
}

impl MsgBox {
    pub(crate) const fn new() -> Self {
        Self {
            receiver: None,
            head: ptr::null_mut(),
            tail: ptr::null_mut(),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_null()
    }

    pub(crate) fn push(&mut self, buf: *mut MsgBuf) {
        // Safety: `buf` is a live allocator block owned by the kernel until
        // the matching pop.
        unsafe {
            (*buf).next = ptr::null_mut();
            if self.tail.is_null() {
                self.head = buf;
            } else {
                (*self.tail).next = buf;
            }
        }
        self.tail = buf;
    }

    pub(crate) fn pop(&mut self) -> *mut MsgBuf {
        let buf = self.head;
        if !buf.is_null() {
            // Safety: `head` is a live node pushed above.
            self.head = unsafe { (*buf).next };
            if self.head.is_null() {
                self.tail = ptr::null_mut();
            }
        }
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order() {
        let mut mbox = MsgBox::new();
        let mut bufs: Vec<MsgBuf> = (0..3)
            .map(|i| MsgBuf {
                next: ptr::null_mut(),
                sender: Some(ThreadId(i)),
                size: i,
                payload: ptr::null_mut(),
            })
            .collect();
        for buf in &mut bufs {
            mbox.push(buf);
        }
        for i in 0..3 {
            let buf = mbox.pop();
            assert_eq!(unsafe { (*buf).sender }, Some(ThreadId(i)));
        }
        assert!(mbox.pop().is_null());
        assert!(mbox.is_empty());
    }
}
