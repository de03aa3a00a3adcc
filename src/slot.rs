use std::{mem, sync::Mutex};

use crate::sync::MutexExt;

enum SlotState<T> {
    Empty,
    Filled(T),
    /// The value has been taken out. The slot stays closed to further fills.
    Taken,
}

/// A cell that accepts a value at most once.
///
/// Unlike a channel, filling a [`Slot`] never blocks, and a second fill is rejected instead of
/// overwriting or queueing behind the first one.
pub(crate) struct Slot<T> {
    state: Mutex<SlotState<T>>,
}

impl<T> Slot<T> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::Empty),
        }
    }

    /// Stores `value` if the slot has never been filled, otherwise hands it back.
    pub(crate) fn fill(&self, value: T) -> Result<(), T> {
        let mut state = self.state.locked();
        match *state {
            SlotState::Empty => {
                *state = SlotState::Filled(value);
                Ok(())
            }
            SlotState::Filled(_) | SlotState::Taken => Err(value),
        }
    }

    /// Takes the stored value out, if there is one.
    pub(crate) fn take(&self) -> Option<T> {
        let mut state = self.state.locked();
        match *state {
            SlotState::Filled(_) => match mem::replace(&mut *state, SlotState::Taken) {
                SlotState::Filled(value) => Some(value),
                SlotState::Empty | SlotState::Taken => unreachable!(),
            },
            SlotState::Empty | SlotState::Taken => None,
        }
    }

    pub(crate) fn is_filled(&self) -> bool {
        !matches!(*self.state.locked(), SlotState::Empty)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;

    #[test]
    fn first_fill_wins() {
        let slot = Slot::new();
        assert!(!slot.is_filled());
        slot.fill(1).unwrap();
        assert_eq!(slot.fill(2), Err(2));
        assert!(slot.is_filled());
        assert_eq!(slot.take(), Some(1));
        assert_eq!(slot.take(), None);
    }

    #[test]
    fn taken_slot_rejects_fills() {
        let slot = Slot::new();
        slot.fill("a").unwrap();
        slot.take();
        assert_eq!(slot.fill("b"), Err("b"));
        assert!(slot.is_filled());
    }

    #[test]
    fn racing_fills_deliver_exactly_one() {
        let slot = Arc::new(Slot::new());
        let accepted: usize = (0..16)
            .map(|i| {
                let slot = slot.clone();
                thread::spawn(move || slot.fill(i).is_ok())
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum();
        assert_eq!(accepted, 1);
        assert!(slot.take().is_some());
    }
}
