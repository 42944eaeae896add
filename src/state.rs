use std::sync::{Arc, Mutex, MutexGuard};

use crate::{gesture::Gesture, types::GestureCandidate};

/// Gestures currently recognized across all hands.
///
/// Written by inference completions, read by the capture loop for the
/// overlay. The set is rebuilt outside the lock and published by swapping an
/// `Arc`, so a reader holds the lock only long enough to clone a pointer and
/// always sees the whole result of a single completion.
///
/// Completions are applied in the order they are delivered. When the engine
/// delivers two completions out of submission order the older result wins
/// until the next one arrives.
#[derive(Debug, Default)]
pub struct GestureState {
    current: Mutex<Arc<Vec<Gesture>>>,
}

impl GestureState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the set with the top candidate of every hand, skipping the
    /// "None" sentinel.
    pub fn replace(&self, hands: &[Vec<GestureCandidate>]) {
        let next: Vec<Gesture> = hands
            .iter()
            .filter_map(|candidates| candidates.first())
            .map(|candidate| candidate.gesture)
            .filter(|gesture| !gesture.is_sentinel())
            .collect();
        *self.lock() = Arc::new(next);
    }

    pub fn snapshot(&self) -> Arc<Vec<Gesture>> {
        Arc::clone(&self.lock())
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.snapshot()
            .iter()
            .map(|gesture| gesture.category_name())
            .collect()
    }

    // A panic elsewhere while holding the lock can only have happened
    // between two whole assignments, so the value is still consistent.
    fn lock(&self) -> MutexGuard<'_, Arc<Vec<Gesture>>> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    fn hand(index: usize, gestures: &[Gesture]) -> Vec<GestureCandidate> {
        gestures
            .iter()
            .enumerate()
            .map(|(rank, g)| GestureCandidate::new(*g, 1.0 - rank as f32 * 0.1, index))
            .collect()
    }

    #[test]
    fn starts_empty() {
        assert!(GestureState::new().snapshot().is_empty());
    }

    #[test]
    fn keeps_top_candidate_per_hand_in_hand_order() {
        let state = GestureState::new();
        state.replace(&[
            hand(0, &[Gesture::Victory, Gesture::OpenPalm]),
            hand(1, &[Gesture::ThumbUp]),
        ]);
        assert_eq!(state.names(), vec!["Victory", "Thumb_Up"]);
    }

    #[test]
    fn drops_sentinel_and_empty_hands() {
        let state = GestureState::new();
        state.replace(&[
            hand(0, &[Gesture::ClosedFist]),
            hand(1, &[Gesture::Unrecognized, Gesture::OpenPalm]),
            Vec::new(),
        ]);
        assert_eq!(state.names(), vec!["Closed_Fist"]);
    }

    #[test]
    fn sentinel_only_completion_clears_the_set() {
        let state = GestureState::new();
        state.replace(&[hand(0, &[Gesture::OpenPalm])]);
        state.replace(&[hand(0, &[Gesture::Unrecognized]), hand(1, &[Gesture::Unrecognized])]);
        assert!(state.snapshot().is_empty());
    }

    #[test]
    fn repeated_snapshots_are_identical() {
        let state = GestureState::new();
        state.replace(&[hand(0, &[Gesture::PointingUp]), hand(1, &[Gesture::ILoveYou])]);
        let first = state.snapshot();
        let second = state.snapshot();
        assert_eq!(first, second);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn earlier_snapshot_is_unaffected_by_later_replace() {
        let state = GestureState::new();
        state.replace(&[hand(0, &[Gesture::ThumbDown])]);
        let before = state.snapshot();
        state.replace(&[hand(0, &[Gesture::ThumbUp])]);
        assert_eq!(*before, vec![Gesture::ThumbDown]);
        assert_eq!(*state.snapshot(), vec![Gesture::ThumbUp]);
    }

    #[test]
    fn concurrent_readers_never_see_a_mixed_set() {
        let state = Arc::new(GestureState::new());
        let pair_a = vec![hand(0, &[Gesture::OpenPalm]), hand(1, &[Gesture::OpenPalm])];
        let pair_b = vec![hand(0, &[Gesture::ClosedFist]), hand(1, &[Gesture::ClosedFist])];

        let writer = {
            let state = Arc::clone(&state);
            thread::spawn(move || {
                for i in 0..2_000 {
                    state.replace(if i % 2 == 0 { &pair_a } else { &pair_b });
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let state = Arc::clone(&state);
                thread::spawn(move || {
                    for _ in 0..2_000 {
                        let snapshot = state.snapshot();
                        assert!(snapshot.is_empty() || snapshot.len() == 2);
                        assert!(snapshot.windows(2).all(|w| w[0] == w[1]));
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
    }
}
