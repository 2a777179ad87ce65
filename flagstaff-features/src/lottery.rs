//! Randomised resolution.
//!
//! A resolver may return a [`Lottery`] instead of a concrete value. The
//! lottery is drawn once at resolution time and only the drawn value is
//! cached and persisted, so a scope keeps whatever it won.

use rand::Rng;
use serde_json::Value;

/// Weighted odds that collapse to a value when drawn.
///
/// # Examples
///
/// ```
/// use flagstaff_features::Lottery;
///
/// // Roll out to roughly 1 in 100 scopes
/// let lottery = Lottery::odds(1, 100);
/// let value = lottery.draw();
/// assert!(value.is_boolean());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Lottery {
    chances: u32,
    out_of: u32,
    winner: Value,
    loser: Value,
}

impl Lottery {
    /// `chances` wins out of every `out_of` draws.
    pub fn odds(chances: u32, out_of: u32) -> Self {
        let out_of = out_of.max(1);
        Self {
            chances: chances.min(out_of),
            out_of,
            winner: Value::Bool(true),
            loser: Value::Bool(false),
        }
    }

    /// A lottery that is always won.
    pub fn always_win() -> Self {
        Self::odds(1, 1)
    }

    /// A lottery that is always lost.
    pub fn always_lose() -> Self {
        Self::odds(0, 1)
    }

    /// Value returned when the draw is won (default `true`).
    pub fn winner(mut self, value: impl Into<Value>) -> Self {
        self.winner = value.into();
        self
    }

    /// Value returned when the draw is lost (default `false`).
    pub fn loser(mut self, value: impl Into<Value>) -> Self {
        self.loser = value.into();
        self
    }

    pub fn chances(&self) -> (u32, u32) {
        (self.chances, self.out_of)
    }

    /// Draw using the thread-local generator.
    pub fn draw(&self) -> Value {
        self.draw_with(&mut rand::rng())
    }

    /// Draw using the given generator.
    pub fn draw_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Value {
        if self.wins(rng) {
            self.winner.clone()
        } else {
            self.loser.clone()
        }
    }

    fn wins<R: Rng + ?Sized>(&self, rng: &mut R) -> bool {
        match self.chances {
            0 => false,
            c if c >= self.out_of => true,
            c => rng.random_range(1..=self.out_of) <= c,
        }
    }
}
