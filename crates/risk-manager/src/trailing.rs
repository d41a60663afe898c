//! Trailing stop-loss strategies.
//!
//! Both strategies are pure: they fold a price into a [`TrailState`] and return
//! the next state. The stop never moves down while a position is running; only
//! [`TrailingStop::reanchor`] (called after an auto-buy) may lower it.

use crate::RiskError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;
use trading_core::config::RiskConfig;
use trading_core::types::{Phase, Position, StrategyKind};

/// The trailing fields of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrailState {
    pub entry_price: Decimal,
    pub highest_price: Decimal,
    pub stop_loss: Decimal,
    pub phase: Option<Phase>,
    pub progressive_minimum: Option<Decimal>,
    pub highest_stop_loss_ever: Option<Decimal>,
}

impl TrailState {
    /// State right after a manual buy at `entry_price`.
    pub fn initial(entry_price: Decimal, step: Decimal) -> Self {
        Self {
            entry_price,
            highest_price: entry_price,
            stop_loss: entry_price - step,
            phase: None,
            progressive_minimum: None,
            highest_stop_loss_ever: None,
        }
    }

    pub fn of(position: &Position) -> Self {
        Self {
            entry_price: position.entry_price,
            highest_price: position.highest_price,
            stop_loss: position.stop_loss_price,
            phase: position.phase,
            progressive_minimum: position.progressive_minimum,
            highest_stop_loss_ever: position.highest_stop_loss_ever,
        }
    }

    pub fn write_to(&self, position: &mut Position) {
        position.entry_price = self.entry_price;
        position.highest_price = self.highest_price;
        position.stop_loss_price = self.stop_loss;
        position.phase = self.phase;
        position.progressive_minimum = self.progressive_minimum;
        position.highest_stop_loss_ever = self.highest_stop_loss_ever;
    }
}

/// A trailing stop-loss strategy.
pub trait TrailingStop: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Fold `price` into `state`.
    fn evaluate(&self, state: &TrailState, price: Decimal) -> TrailState;

    /// Start a new cycle after an auto-buy filled at `fill_price`.
    fn reanchor(&self, state: &TrailState, fill_price: Decimal) -> TrailState;
}

/// Fixed-step trailing: the stop climbs one `step` for every full `step` of
/// profit, starting one `step` below entry.
#[derive(Debug, Clone, Copy)]
pub struct SimpleTrailingStop {
    step: Decimal,
}

impl SimpleTrailingStop {
    pub fn new(step: Decimal) -> Result<Self, RiskError> {
        if step <= Decimal::ZERO {
            return Err(RiskError::InvalidStep(step));
        }
        Ok(Self { step })
    }

    pub fn step(&self) -> Decimal {
        self.step
    }

    /// Stop implied by the best price seen so far, before monotonic clamping.
    pub fn stepped_stop(&self, entry_price: Decimal, highest_price: Decimal) -> Decimal {
        let floor = entry_price - self.step;
        let profit = highest_price - entry_price;
        if profit < self.step {
            return floor;
        }
        let steps = (profit / self.step).floor();
        (floor + steps * self.step).max(floor)
    }
}

impl TrailingStop for SimpleTrailingStop {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Simple
    }

    fn evaluate(&self, state: &TrailState, price: Decimal) -> TrailState {
        let highest_price = state.highest_price.max(price);
        let candidate = self.stepped_stop(state.entry_price, highest_price);

        TrailState {
            highest_price,
            stop_loss: candidate.max(state.stop_loss),
            phase: None,
            ..*state
        }
    }

    fn reanchor(&self, _state: &TrailState, fill_price: Decimal) -> TrailState {
        TrailState::initial(fill_price, self.step)
    }
}

/// Three-phase trailing with a progressive minimum.
///
/// * Phase 1 (gain below `phase_two_at`): identical to [`SimpleTrailingStop`].
/// * Phase 2 and 3: the stop trails one `step` below the high. The progressive
///   minimum is activated at entry the first time either phase is reached.
///
/// After every evaluation the highest stop ever computed is remembered and the
/// minimum ratchets to `highest_stop_loss_ever - progressive_gap`. The minimum
/// survives re-entry, so repeated sell/re-buy cycles cannot erode the floor.
#[derive(Debug, Clone, Copy)]
pub struct PhasedTrailingStop {
    simple: SimpleTrailingStop,
    phase_two_at: Decimal,
    phase_three_at: Decimal,
    progressive_gap: Decimal,
}

impl PhasedTrailingStop {
    pub fn new(
        step: Decimal,
        phase_two_at: Decimal,
        phase_three_at: Decimal,
        progressive_gap: Decimal,
    ) -> Result<Self, RiskError> {
        Ok(Self {
            simple: SimpleTrailingStop::new(step)?,
            phase_two_at,
            phase_three_at,
            progressive_gap,
        })
    }

    pub fn step(&self) -> Decimal {
        self.simple.step()
    }

    /// Phase for a price `gain` above entry.
    pub fn phase_for(&self, gain: Decimal) -> Phase {
        if gain < self.phase_two_at {
            Phase::One
        } else if gain < self.phase_three_at {
            Phase::Two
        } else {
            Phase::Three
        }
    }
}

impl TrailingStop for PhasedTrailingStop {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Phased
    }

    fn evaluate(&self, state: &TrailState, price: Decimal) -> TrailState {
        let highest_price = state.highest_price.max(price);
        let phase = self.phase_for(price - state.entry_price);
        let mut progressive_minimum = state.progressive_minimum;

        let candidate = match phase {
            Phase::One => self.simple.stepped_stop(state.entry_price, highest_price),
            Phase::Two | Phase::Three => {
                if progressive_minimum.is_none() {
                    debug!(entry = %state.entry_price, phase = phase.number(), "Progressive minimum activated");
                    progressive_minimum = Some(state.entry_price);
                }
                highest_price - self.step()
            }
        };

        let highest_stop_loss_ever = state
            .highest_stop_loss_ever
            .map_or(candidate, |best| best.max(candidate));
        let progressive_minimum = progressive_minimum
            .map(|floor| floor.max(highest_stop_loss_ever - self.progressive_gap));

        let mut stop_loss = candidate.max(state.stop_loss);
        if let Some(floor) = progressive_minimum {
            stop_loss = stop_loss.max(floor);
        }

        TrailState {
            entry_price: state.entry_price,
            highest_price,
            stop_loss,
            phase: Some(phase),
            progressive_minimum,
            highest_stop_loss_ever: Some(highest_stop_loss_ever),
        }
    }

    fn reanchor(&self, state: &TrailState, fill_price: Decimal) -> TrailState {
        let base = fill_price - self.step();
        TrailState {
            entry_price: fill_price,
            highest_price: fill_price,
            stop_loss: state.progressive_minimum.map_or(base, |floor| base.max(floor)),
            phase: Some(Phase::One),
            progressive_minimum: state.progressive_minimum,
            highest_stop_loss_ever: state.highest_stop_loss_ever,
        }
    }
}

/// Both strategies, selected per position.
#[derive(Debug, Clone, Copy)]
pub struct TrailingStopCalculator {
    simple: SimpleTrailingStop,
    phased: PhasedTrailingStop,
}

impl TrailingStopCalculator {
    pub fn new(config: &RiskConfig) -> Result<Self, RiskError> {
        Ok(Self {
            simple: SimpleTrailingStop::new(config.step)?,
            phased: PhasedTrailingStop::new(
                config.step,
                config.phase_two_at,
                config.phase_three_at,
                config.progressive_gap,
            )?,
        })
    }

    pub fn strategy(&self, kind: StrategyKind) -> &dyn TrailingStop {
        match kind {
            StrategyKind::Simple => &self.simple,
            StrategyKind::Phased => &self.phased,
        }
    }

    pub fn step(&self) -> Decimal {
        self.simple.step()
    }

    pub fn evaluate(&self, kind: StrategyKind, state: &TrailState, price: Decimal) -> TrailState {
        self.strategy(kind).evaluate(state, price)
    }

    pub fn reanchor(&self, kind: StrategyKind, state: &TrailState, fill_price: Decimal) -> TrailState {
        self.strategy(kind).reanchor(state, fill_price)
    }
}
