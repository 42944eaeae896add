use std::{
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use crate::{gesture::Gesture, state::GestureState, types::Completion};

pub type GestureHandler = Box<dyn Fn(Gesture) -> anyhow::Result<()> + Send + Sync>;

/// Turns inference completions into gesture events.
///
/// Every completion first replaces the shared [`GestureState`], then the
/// handler runs once per hand whose top candidate is a real gesture. There is
/// no memory between completions: a gesture held in front of the camera fires
/// on every completion that sees it (level-triggered).
pub struct GestureDispatcher {
    state: Arc<GestureState>,
    handler: GestureHandler,
}

impl GestureDispatcher {
    pub fn new(state: Arc<GestureState>, handler: GestureHandler) -> Self {
        Self { state, handler }
    }

    pub fn state(&self) -> &Arc<GestureState> {
        &self.state
    }

    /// Runs on the inference completion context. Returns the number of
    /// handler invocations.
    pub fn on_completion(&self, completion: &Completion) -> usize {
        self.state.replace(&completion.hands);
        log::trace!(
            "completion {} arrived {:?} after capture",
            completion.timestamp,
            completion.latency()
        );

        let mut fired = 0;
        for candidate in completion.hands.iter().filter_map(|hand| hand.first()) {
            if candidate.gesture.is_sentinel() {
                continue;
            }
            fired += 1;
            log::debug!(
                "gesture {} on hand {} at timestamp {} ({:.0}%)",
                candidate.gesture,
                candidate.hand_index,
                completion.timestamp,
                candidate.score * 100.0
            );
            self.invoke(candidate.gesture);
        }
        fired
    }

    fn invoke(&self, gesture: Gesture) {
        match panic::catch_unwind(AssertUnwindSafe(|| (self.handler)(gesture))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => log::warn!("gesture handler failed for {gesture}: {err:?}"),
            Err(_) => log::error!("gesture handler panicked for {gesture}"),
        }
    }
}
