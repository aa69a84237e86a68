//! The queue of user write requests awaiting transmission.
//!
//! Requests keep their issue order; segmentization always consumes from
//! the head. Payload ranges handed out alias the request's buffer, so
//! the same bytes can sit in the retransmission queue without copies.

use crate::payload::Payload;
use std::collections::VecDeque;

#[derive(Debug)]
struct WriteRequest {
    data: Payload,
    /// Bytes of this request already handed to the transmit path.
    offset: usize,
}

impl WriteRequest {
    fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }
}

/// What one call to [`WriteQueue::produce`] yielded.
#[derive(Debug)]
pub struct Produced {
    /// The bytes to place in the next segment.
    pub text: Payload,
    /// Set when this consumed the tail of a request; carries the
    /// request's total length for the completion callback.
    pub completed: Option<usize>,
}

/// FIFO of outstanding writes.
#[derive(Debug, Default)]
pub struct WriteQueue {
    queue: VecDeque<WriteRequest>,
}

impl WriteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a request. Empty writes are discarded; they carry no
    /// bytes and would otherwise wedge the head of the queue.
    pub fn push(&mut self, data: Payload) {
        if data.is_empty() {
            return;
        }
        self.queue.push_back(WriteRequest { data, offset: 0 });
    }

    /// Total bytes across all queued requests, sent or not.
    pub fn bytes_total(&self) -> usize {
        self.queue.iter().map(|request| request.data.len()).sum()
    }

    /// Bytes not yet handed to the transmit path.
    pub fn bytes_remaining(&self) -> usize {
        self.queue.iter().map(WriteRequest::remaining).sum()
    }

    /// Whether any request still has unsent bytes.
    pub fn has_remaining(&self) -> bool {
        self.queue.iter().any(|request| request.remaining() > 0)
    }

    /// Consumes up to `max` bytes from the head request. Returns `None`
    /// when nothing remains to send.
    pub fn produce(&mut self, max: usize) -> Option<Produced> {
        if max == 0 {
            return None;
        }
        // Fully sent head requests have already been popped, so the
        // head is the request in progress.
        let head = self.queue.front_mut()?;
        let take = max.min(head.remaining());
        if take == 0 {
            return None;
        }
        let text = head.data.range(head.offset, take);
        head.offset += take;
        let completed = if head.remaining() == 0 {
            self.queue.pop_front().map(|finished| finished.data.len())
        } else {
            None
        };
        Some(Produced { text, completed })
    }

    /// Clears the queue, returning the transmitted byte count of every
    /// outstanding request so their callbacks can be notified.
    pub fn reset(&mut self) -> Vec<usize> {
        self.queue.drain(..).map(|request| request.offset).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produces_in_issue_order() {
        let mut queue = WriteQueue::new();
        queue.push(Payload::new(b"first"));
        queue.push(Payload::new(b"second"));

        let one = queue.produce(100).unwrap();
        assert_eq!(one.text.to_vec(), b"first");
        assert_eq!(one.completed, Some(5));

        let two = queue.produce(100).unwrap();
        assert_eq!(two.text.to_vec(), b"second");
        assert_eq!(two.completed, Some(6));

        assert!(queue.produce(100).is_none());
    }

    #[test]
    fn segmentizes_the_head_request() {
        let mut queue = WriteQueue::new();
        queue.push(Payload::new(vec![1u8; 3000]));

        let first = queue.produce(1460).unwrap();
        assert_eq!(first.text.len(), 1460);
        assert_eq!(first.completed, None);
        assert_eq!(queue.bytes_remaining(), 1540);

        let second = queue.produce(1460).unwrap();
        assert_eq!(second.completed, None);
        let last = queue.produce(1460).unwrap();
        assert_eq!(last.text.len(), 80);
        assert_eq!(last.completed, Some(3000));
        assert!(!queue.has_remaining());
    }

    #[test]
    fn does_not_merge_requests_into_one_segment() {
        let mut queue = WriteQueue::new();
        queue.push(Payload::new(b"abc"));
        queue.push(Payload::new(b"def"));
        let produced = queue.produce(100).unwrap();
        assert_eq!(produced.text.to_vec(), b"abc");
    }

    #[test]
    fn empty_writes_are_discarded() {
        let mut queue = WriteQueue::new();
        queue.push(Payload::empty());
        queue.push(Payload::new(b"real"));
        let produced = queue.produce(100).unwrap();
        assert_eq!(produced.text.to_vec(), b"real");
    }

    #[test]
    fn reset_reports_partial_progress() {
        let mut queue = WriteQueue::new();
        queue.push(Payload::new(vec![0u8; 10]));
        queue.push(Payload::new(vec![0u8; 20]));
        queue.produce(4);
        assert_eq!(queue.reset(), vec![4, 0]);
        assert_eq!(queue.bytes_total(), 0);
    }
}
