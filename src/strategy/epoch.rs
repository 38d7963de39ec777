use crate::models::{Direction, Slot};

/// Outcome of writing one sample into an [`Epoch`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    /// Previous tick was present; direction computed against it
    Scored(Direction),
    /// Previous tick's slot was missing or stale; stored as flat
    Unanchored,
    /// This tick was already written; nothing changed
    Duplicate,
}

/// Fixed-size ring of slots for one symbol, indexed by `tick % window_len`.
///
/// A slot only counts for a tick when its recorded tick matches, so a
/// leftover from an earlier lap is never mistaken for fresh data.
#[derive(Debug, Clone)]
pub struct Epoch {
    slots: Vec<Option<Slot>>,
}

impl Epoch {
    pub fn new(window_len: usize) -> Self {
        Self {
            slots: vec![None; window_len.max(1)],
        }
    }

    fn index(&self, tick: u64) -> usize {
        (tick % self.slots.len() as u64) as usize
    }

    /// Slot holding `tick`, if it has not been overwritten since
    pub fn slot_at(&self, tick: u64) -> Option<&Slot> {
        self.slots[self.index(tick)]
            .as_ref()
            .filter(|slot| slot.tick == tick)
    }

    pub fn has_tick(&self, tick: u64) -> bool {
        self.slot_at(tick).is_some()
    }

    /// Write `price` for `tick`, deriving its direction from tick - 1
    pub fn record(&mut self, tick: u64, price: f64) -> Recorded {
        if self.has_tick(tick) {
            return Recorded::Duplicate;
        }

        let prev = tick
            .checked_sub(1)
            .and_then(|prev_tick| self.slot_at(prev_tick))
            .map(|slot| slot.price);

        let (direction, outcome) = match prev {
            Some(prev_price) => {
                let direction = Direction::between(prev_price, price);
                (direction, Recorded::Scored(direction))
            }
            None => (Direction::Flat, Recorded::Unanchored),
        };

        let index = self.index(tick);
        self.slots[index] = Some(Slot {
            tick,
            price,
            direction,
        });

        outcome
    }

    /// Sum of directions over the window ending at `tick`.
    ///
    /// The window covers `window_len` prices, i.e. `window_len - 1`
    /// movements, so a strictly monotonic window scores
    /// `±(window_len - 1)`. Returns `None` when the window does not fit
    /// yet or any of its slots is stale.
    ///
    /// The oldest slot's own direction points outside the window and is
    /// not counted. Summing all `window_len` stored directions instead
    /// would need one more consecutive move before a full ring classifies.
    pub fn window_score(&self, tick: u64) -> Option<i64> {
        let len = self.slots.len() as u64;
        if tick < len {
            return None;
        }

        let first = tick + 1 - len;
        let mut score = 0;
        for t in first..=tick {
            let slot = self.slot_at(t)?;
            if t > first {
                score += slot.direction.score();
            }
        }
        Some(score)
    }

    /// Highest score a window can reach
    pub fn max_score(&self) -> i64 {
        self.slots.len() as i64 - 1
    }

    /// Arrows of the window ending at `tick`, `?` for stale slots
    pub fn trend_line(&self, tick: u64) -> String {
        let len = self.slots.len() as u64;
        let first = tick.saturating_sub(len - 1).max(1);
        (first..=tick)
            .map(|t| self.slot_at(t).map_or("?", |slot| slot.direction.arrow()))
            .collect()
    }
}
