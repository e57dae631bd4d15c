// flowline/src/pipeline/reorder.rs

//! Arena of completed invocations keyed by sequence number, plus the cursor of
//! the next sequence number allowed out. Used by the emitter of a concurrent
//! stage to restore arrival order.

use std::collections::HashMap;

#[derive(Debug)]
pub(crate) struct ReorderBuffer<T> {
  pending: HashMap<u64, T>,
  next: u64,
}

impl<T> ReorderBuffer<T> {
  pub(crate) fn with_capacity(capacity: usize) -> Self {
    Self {
      pending: HashMap::with_capacity(capacity),
      next: 0,
    }
  }

  /// Parks the result of invocation `seq`. Sequence numbers below the cursor
  /// have already been emitted and are ignored.
  pub(crate) fn insert(&mut self, seq: u64, item: T) {
    debug_assert!(seq >= self.next, "sequence {} already emitted", seq);
    if seq < self.next {
      return;
    }
    self.pending.insert(seq, item);
  }

  /// Pops the entry at the cursor, if it has arrived, and advances the cursor.
  pub(crate) fn pop_ready(&mut self) -> Option<T> {
    let item = self.pending.remove(&self.next)?;
    self.next += 1;
    Some(item)
  }

  pub(crate) fn len(&self) -> usize {
    self.pending.len()
  }

  pub(crate) fn is_empty(&self) -> bool {
    self.pending.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn drain(buffer: &mut ReorderBuffer<&'static str>) -> Vec<&'static str> {
    std::iter::from_fn(|| buffer.pop_ready()).collect()
  }

  #[test]
  fn holds_entries_until_the_gap_is_filled() {
    let mut buffer = ReorderBuffer::with_capacity(4);
    buffer.insert(2, "c");
    buffer.insert(1, "b");
    assert!(drain(&mut buffer).is_empty());
    assert_eq!(buffer.len(), 2);

    buffer.insert(0, "a");
    assert_eq!(drain(&mut buffer), vec!["a", "b", "c"]);
    assert!(buffer.is_empty());

    buffer.insert(4, "e");
    assert!(drain(&mut buffer).is_empty());
    buffer.insert(3, "d");
    assert_eq!(drain(&mut buffer), vec!["d", "e"]);
  }

  #[test]
  fn in_order_arrivals_flow_straight_through() {
    let mut buffer = ReorderBuffer::with_capacity(1);
    for (seq, item) in ["x", "y", "z"].into_iter().enumerate() {
      buffer.insert(seq as u64, item);
      assert_eq!(buffer.pop_ready(), Some(item));
      assert!(buffer.is_empty());
    }
  }
}
