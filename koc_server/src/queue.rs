use std::sync::Arc;

use crossbeam_queue::ArrayQueue;
use koc_common::CommandMessage;

/// Bounded command queue between the ingestion channel and the control loop.
///
/// Pushing into a full queue evicts the oldest pending command, so the latest
/// intent always gets through.
#[derive(Debug, Clone)]
pub struct CommandQueue {
    inner: Arc<ArrayQueue<CommandMessage>>,
}

impl CommandQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(ArrayQueue::new(capacity.max(1))),
        }
    }

    /// Never blocks. Returns the command that was evicted to make room, if any.
    pub fn push(&self, command: CommandMessage) -> Option<CommandMessage> {
        self.inner.force_push(command)
    }

    /// Never blocks. `None` when nothing is pending.
    pub fn pop(&self) -> Option<CommandMessage> {
        self.inner.pop()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn overflow_evicts_oldest() {
        let queue = CommandQueue::new(3);
        for v in 1..=5 {
            queue.push(CommandMessage::go_forward(v));
        }
        assert_eq!(queue.len(), 3);
        let drained: Vec<u8> = std::iter::from_fn(|| queue.pop()).map(|c| c.magnitude).collect();
        assert_eq!(drained, [3, 4, 5]);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn push_reports_evicted_command() {
        let queue = CommandQueue::new(1);
        assert!(queue.push(CommandMessage::turn_left(10)).is_none());
        let evicted = queue.push(CommandMessage::turn_right(20)).unwrap();
        assert_eq!(evicted.magnitude, 10);
    }
}
