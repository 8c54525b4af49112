//! Decay and reinforcement
//!
//! Activation decays exponentially with hours since last access, three
//! times faster for operational traces, and never below the floor. Access
//! boosts and embedding reinforcement push the other way. The tick cadence
//! is owned by the host scheduler; a tick itself is cheap and idempotent.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use crate::error::Result;
use crate::model::{DecayReport, TraceType};
use crate::store::Store;
use crate::vector;

/// Decay tuning.
#[derive(Debug, Clone)]
pub struct DecayParams {
    /// Base decay rate per hour for knowledge traces
    pub lambda_per_hour: f64,
    /// Multiplier applied to lambda for operational traces
    pub operational_multiplier: f64,
    /// Activation floor; decay never goes below this
    pub floor: f64,
    /// Default access boost for traces shown to the user
    pub access_boost: f64,
    /// EMA weight of the new embedding during reinforcement
    pub ema_alpha: f32,
}

impl Default for DecayParams {
    fn default() -> Self {
        Self {
            lambda_per_hour: 0.005,
            operational_multiplier: 3.0,
            floor: 0.05,
            access_boost: 0.1,
            ema_alpha: 0.3,
        }
    }
}

/// Applies age decay, access boosts and reinforcement.
pub struct DecayEngine {
    store: Arc<Store>,
    params: DecayParams,
}

impl DecayEngine {
    /// Create a decay engine.
    pub fn new(store: Arc<Store>, params: DecayParams) -> Self {
        Self { store, params }
    }

    /// One age-decay tick: `activation <- max(floor, a * exp(-lambda_eff * h))`
    /// where `h` is hours since last access and `lambda_eff` is tripled for
    /// operational traces.
    pub fn tick(&self) -> Result<DecayReport> {
        let start = Instant::now();
        let now = Utc::now();
        let candidates = self.store.traces_above_floor(self.params.floor)?;

        let mut updates = Vec::with_capacity(candidates.len());
        let mut floored = 0i64;
        for (trace_id, trace_type, activation, last_accessed) in candidates {
            let hours = (now - last_accessed).num_seconds().max(0) as f64 / 3600.0;
            if hours <= 0.0 {
                continue;
            }
            let lambda = match trace_type {
                TraceType::Operational => {
                    self.params.lambda_per_hour * self.params.operational_multiplier
                }
                TraceType::Knowledge => self.params.lambda_per_hour,
            };
            let decayed = activation * (-lambda * hours).exp();
            let clamped = decayed.max(self.params.floor);
            if clamped <= self.params.floor {
                floored += 1;
            }
            if (clamped - activation).abs() > f64::EPSILON {
                updates.push((trace_id, clamped));
            }
        }

        let decayed = updates.len() as i64;
        // Advisory writes: row failures are logged inside, never surfaced
        self.store.apply_activation_updates(&updates)?;

        Ok(DecayReport {
            traces_decayed: decayed,
            traces_floored: floored,
            duration_ms: start.elapsed().as_millis() as i64,
        })
    }

    /// Pure multiplicative decay `activation *= factor` over every trace.
    /// Exposed for tests and manual maintenance.
    pub fn decay_all(&self, factor: f64) -> Result<i64> {
        let candidates = self.store.traces_above_floor(0.0)?;
        let updates: Vec<(String, f64)> = candidates
            .into_iter()
            .map(|(id, _, activation, _)| (id, (activation * factor).max(self.params.floor)))
            .collect();
        let count = updates.len() as i64;
        self.store.apply_activation_updates(&updates)?;
        Ok(count)
    }

    /// Access boost for traces shown to the user: bumps `last_accessed` and
    /// adds the configured boost, clipped at 1.0. Advisory.
    pub fn boost_accessed(&self, trace_ids: &[String]) {
        for trace_id in trace_ids {
            if let Err(e) = self
                .store
                .boost_trace_access(trace_id, self.params.access_boost)
            {
                tracing::warn!("Access boost failed for {}: {}", trace_id, e);
            }
        }
    }

    /// Reinforce a trace on re-observation: EMA-blend the embedding toward
    /// the new observation and bump strength.
    pub fn reinforce(&self, trace_id: &str, new_embedding: &[f32]) -> Result<()> {
        match self.store.get_trace_embedding(trace_id)? {
            Some(old) if old.len() == new_embedding.len() => {
                let blended = vector::ema(&old, new_embedding, self.params.ema_alpha);
                self.store.set_trace_embedding(trace_id, &blended)?;
            }
            _ => {
                self.store.set_trace_embedding(trace_id, new_embedding)?;
            }
        }
        self.store.reinforce_trace_strength(trace_id)?;
        Ok(())
    }
}
