//! Force-feedback scheduler
//!
//! Per-port table of timed rumble windows. The virtual pad's control
//! channel feeds uploads, erases and play requests in; every poll the
//! worker asks whether any window covers the current instant and folds
//! the answer into the adapter's rumble command.
//!
//! Timestamps are milliseconds on the worker's monotonic clock; a
//! `runs_forever` window pins its end to the maximum representable time.

/// Effect slots per port, matching the advertised `ff_effects_max`.
pub const MAX_EFFECTS: usize = 4;

/// One timed effect slot.
#[derive(Debug, Clone, Copy)]
pub struct EffectSlot {
    in_use: bool,
    runs_forever: bool,
    duration_ms: u32,
    delay_ms: u32,
    repetitions: i32,
    window_start: u64,
    window_end: u64,
}

impl EffectSlot {
    /// An empty window (start above end) that no instant falls into.
    const IDLE_WINDOW: (u64, u64) = (u64::MAX, 0);

    /// Consume one repetition. While repetitions remain the window re-opens
    /// at `now + delay`; otherwise it empties.
    fn advance(&mut self, now_ms: u64) {
        self.repetitions -= 1;
        if self.repetitions < 0 {
            self.repetitions = 0;
            self.window_start = Self::IDLE_WINDOW.0;
            self.window_end = Self::IDLE_WINDOW.1;
        } else {
            self.window_start = now_ms + self.delay_ms as u64;
            self.window_end = if self.runs_forever {
                u64::MAX
            } else {
                self.window_start + self.duration_ms as u64
            };
        }
    }
}

impl Default for EffectSlot {
    fn default() -> Self {
        Self {
            in_use: false,
            runs_forever: false,
            duration_ms: 0,
            delay_ms: 0,
            repetitions: 0,
            window_start: Self::IDLE_WINDOW.0,
            window_end: Self::IDLE_WINDOW.1,
        }
    }
}

/// Distilled upload request from the pad's control channel.
#[derive(Debug, Clone, Copy)]
pub struct EffectUpload {
    /// Slot id to update when the kernel references an existing effect.
    pub replaces: Option<usize>,
    /// True when every magnitude is zero: an explicit stop.
    pub stop: bool,
    /// Replay length; zero means the effect runs until stopped.
    pub length_ms: u32,
    /// Replay delay before each repetition's window opens.
    pub delay_ms: u32,
}

/// The per-port effect table.
#[derive(Debug, Clone, Default)]
pub struct FfState {
    slots: [EffectSlot; MAX_EFFECTS],
}

impl FfState {
    /// Store an uploaded effect, reusing the referenced slot for an update
    /// or claiming the first free one. Returns the slot id to report back,
    /// or `None` when the table is full (or the reference is bogus).
    ///
    /// The active window is left alone; only a play request moves it.
    pub fn upload(&mut self, request: &EffectUpload) -> Option<usize> {
        let id = match request.replaces {
            Some(id) => {
                if id >= MAX_EFFECTS {
                    return None;
                }
                id
            }
            None => {
                let id = self.slots.iter().position(|slot| !slot.in_use)?;
                self.slots[id].in_use = true;
                id
            }
        };
        let slot = &mut self.slots[id];
        if request.stop {
            slot.runs_forever = false;
            slot.duration_ms = 0;
        } else {
            // zero replay length means the effect lasts until stopped
            slot.runs_forever = request.length_ms == 0;
            slot.duration_ms = request.length_ms;
        }
        slot.delay_ms = request.delay_ms;
        slot.repetitions = 0;
        Some(id)
    }

    /// Free a slot. Out-of-range ids from the control channel are ignored.
    pub fn erase(&mut self, id: usize) {
        if let Some(slot) = self.slots.get_mut(id) {
            slot.in_use = false;
        }
    }

    /// Handle a play request: arm the repetition count and open the first
    /// window. A count of zero closes the window immediately.
    pub fn play(&mut self, id: usize, repetitions: i32, now_ms: u64) {
        match self.slots.get_mut(id) {
            Some(slot) if slot.in_use => {
                slot.repetitions = repetitions;
                slot.advance(now_ms);
            }
            _ => {}
        }
    }

    /// Whether any in-use effect's window covers `now_ms`. Effects whose
    /// window has elapsed consume one repetition and either re-arm or go
    /// idle; that bookkeeping happens here, once per poll.
    pub fn rumble_active(&mut self, now_ms: u64) -> bool {
        let mut active = false;
        for slot in self.slots.iter_mut().filter(|slot| slot.in_use) {
            let after_start = slot.window_start <= now_ms;
            let before_end = slot.window_end >= now_ms;
            if after_start && before_end {
                active = true;
            } else if after_start {
                slot.advance(now_ms);
            }
        }
        active
    }

    #[cfg(test)]
    fn slot(&self, id: usize) -> &EffectSlot {
        &self.slots[id]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_allocates_first_free_slot() {
        let mut ff = FfState::default();
        let upload = EffectUpload { replaces: None, stop: false, length_ms: 100, delay_ms: 0 };
        assert_eq!(ff.upload(&upload), Some(0));
        assert_eq!(ff.upload(&upload), Some(1));
        ff.erase(0);
        assert_eq!(ff.upload(&upload), Some(0));
    }

    #[test]
    fn test_upload_refuses_when_full() {
        let mut ff = FfState::default();
        let upload = EffectUpload { replaces: None, stop: false, length_ms: 100, delay_ms: 0 };
        for _ in 0..MAX_EFFECTS {
            assert!(ff.upload(&upload).is_some());
        }
        assert_eq!(ff.upload(&upload), None);
    }

    #[test]
    fn test_update_reuses_referenced_slot() {
        let mut ff = FfState::default();
        let id = ff
            .upload(&EffectUpload { replaces: None, stop: false, length_ms: 100, delay_ms: 0 })
            .unwrap();
        let updated = ff.upload(&EffectUpload {
            replaces: Some(id),
            stop: false,
            length_ms: 0,
            delay_ms: 5,
        });
        assert_eq!(updated, Some(id));
        assert!(ff.slot(id).runs_forever);
        assert_eq!(ff.upload(&EffectUpload { replaces: Some(MAX_EFFECTS), stop: false, length_ms: 0, delay_ms: 0 }), None);
    }

    #[test]
    fn test_forever_effect_never_turns_off() {
        let mut ff = FfState::default();
        let id = ff
            .upload(&EffectUpload { replaces: None, stop: false, length_ms: 0, delay_ms: 10 })
            .unwrap();
        ff.play(id, 3, 1_000);

        assert!(!ff.rumble_active(1_005), "still inside the delay");
        assert!(ff.rumble_active(1_010));
        assert!(ff.rumble_active(50_000));
        assert!(ff.rumble_active(u64::MAX - 1), "forever means forever");
    }

    #[test]
    fn test_finite_effect_repeats_then_idles() {
        let mut ff = FfState::default();
        let id = ff
            .upload(&EffectUpload { replaces: None, stop: false, length_ms: 50, delay_ms: 0 })
            .unwrap();
        ff.play(id, 2, 0);

        // first window [0, 50]
        assert!(ff.rumble_active(0));
        assert!(ff.rumble_active(50));
        // expiry observation consumes the second repetition and re-arms
        assert!(!ff.rumble_active(51));
        assert!(ff.rumble_active(60), "second window re-opened at 51");
        // second expiry exhausts the effect
        assert!(!ff.rumble_active(200));
        assert!(!ff.rumble_active(201));
        assert!(!ff.rumble_active(100_000));
    }

    #[test]
    fn test_play_zero_closes_the_window() {
        let mut ff = FfState::default();
        let id = ff
            .upload(&EffectUpload { replaces: None, stop: false, length_ms: 0, delay_ms: 0 })
            .unwrap();
        ff.play(id, 1, 100);
        assert!(ff.rumble_active(150));
        ff.play(id, 0, 160);
        assert!(!ff.rumble_active(170));
    }

    #[test]
    fn test_zero_magnitude_upload_is_a_stop() {
        let mut ff = FfState::default();
        let id = ff
            .upload(&EffectUpload { replaces: None, stop: false, length_ms: 0, delay_ms: 0 })
            .unwrap();
        ff.play(id, 1, 0);
        assert!(ff.rumble_active(10));

        // a zero-magnitude update downgrades it to a zero-length window
        ff.upload(&EffectUpload { replaces: Some(id), stop: true, length_ms: 0, delay_ms: 0 });
        ff.play(id, 1, 20);
        assert!(ff.rumble_active(20), "the empty window still covers its instant");
        assert!(!ff.rumble_active(21));
    }

    #[test]
    fn test_uploaded_but_never_played_is_silent() {
        let mut ff = FfState::default();
        ff.upload(&EffectUpload { replaces: None, stop: false, length_ms: 0, delay_ms: 0 })
            .unwrap();
        assert!(!ff.rumble_active(0));
        assert!(!ff.rumble_active(1_000));
    }

    #[test]
    fn test_erased_effect_stops_counting() {
        let mut ff = FfState::default();
        let id = ff
            .upload(&EffectUpload { replaces: None, stop: false, length_ms: 0, delay_ms: 0 })
            .unwrap();
        ff.play(id, 1, 0);
        assert!(ff.rumble_active(5));
        ff.erase(id);
        assert!(!ff.rumble_active(6));
    }
}
