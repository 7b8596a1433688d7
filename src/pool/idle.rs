// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use parking_lot::Mutex;
use std::collections::VecDeque;

/// Bounded FIFO of idle connections. Every operation is non-blocking.
pub(crate) struct IdleQueue<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
}

impl<T> IdleQueue<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Hands the item back when the queue is full.
    pub(crate) fn try_push(&self, item: T) -> Result<(), T> {
        let mut items = self.items.lock();
        if items.len() >= self.capacity {
            return Err(item);
        }
        items.push_back(item);
        Ok(())
    }

    pub(crate) fn try_pop(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub(crate) fn drain(&self) -> Vec<T> {
        self.items.lock().drain(..).collect()
    }
}
