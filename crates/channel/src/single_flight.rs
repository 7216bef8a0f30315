use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use tracing::warn;

/// Non-blocking per-key execution claims. `begin` either hands out a guard
/// or reports the key busy; nothing ever waits. Claims carry a timestamp so
/// a holder that crashed without releasing is reclaimable after the TTL.
pub struct SingleFlight {
    registry: Arc<Mutex<Registry>>,
    ttl: Duration,
}

#[derive(Default)]
struct Registry {
    claims: HashMap<String, Claim>,
    next_epoch: u64,
}

struct Claim {
    claimed_at: DateTime<Utc>,
    epoch: u64,
}

pub enum FlightDecision {
    Acquired(FlightGuard),
    Busy,
}

/// Holds the execution slot for one key; dropping it releases the slot.
pub struct FlightGuard {
    registry: Arc<Mutex<Registry>>,
    key: String,
    epoch: u64,
}

impl SingleFlight {
    pub fn new(ttl: Duration) -> Self {
        Self { registry: Arc::new(Mutex::new(Registry::default())), ttl }
    }

    /// Tries to claim the key. A live claim yields `Busy`; a claim older
    /// than the TTL belongs to a crashed worker and is stolen.
    pub fn begin(&self, key: &str, now: DateTime<Utc>) -> FlightDecision {
        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = registry.claims.get(key) {
            let age = now.signed_duration_since(existing.claimed_at);
            if age < self.ttl {
                return FlightDecision::Busy;
            }
            warn!(
                event_name = "engage.pipeline.flight_claim_stolen",
                external_id = %key,
                age_secs = age.num_seconds(),
                "stale single-flight claim taken over"
            );
        }

        registry.next_epoch += 1;
        let epoch = registry.next_epoch;
        registry.claims.insert(key.to_owned(), Claim { claimed_at: now, epoch });

        FlightDecision::Acquired(FlightGuard {
            registry: Arc::clone(&self.registry),
            key: key.to_owned(),
            epoch,
        })
    }
}

impl FlightGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);

        // Only release our own claim. If the slot was stolen after a TTL
        // expiry, the new holder's epoch differs and must survive this drop.
        let owned = registry
            .claims
            .get(self.key.as_str())
            .is_some_and(|claim| claim.epoch == self.epoch);
        if owned {
            registry.claims.remove(self.key.as_str());
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, TimeZone, Utc};

    use super::{FlightDecision, SingleFlight};

    fn ts(offset_secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().expect("valid timestamp")
            + Duration::seconds(offset_secs)
    }

    #[test]
    fn second_begin_for_a_held_key_is_busy() {
        let flight = SingleFlight::new(Duration::seconds(120));

        let FlightDecision::Acquired(_guard) = flight.begin("+5511990020001", ts(0)) else {
            panic!("first begin should acquire");
        };

        assert!(matches!(flight.begin("+5511990020001", ts(1)), FlightDecision::Busy));
    }

    #[test]
    fn dropping_the_guard_releases_the_key() {
        let flight = SingleFlight::new(Duration::seconds(120));

        let FlightDecision::Acquired(guard) = flight.begin("+5511990020002", ts(0)) else {
            panic!("first begin should acquire");
        };
        drop(guard);

        assert!(matches!(flight.begin("+5511990020002", ts(1)), FlightDecision::Acquired(_)));
    }

    #[test]
    fn keys_claim_independently() {
        let flight = SingleFlight::new(Duration::seconds(120));

        let FlightDecision::Acquired(_first) = flight.begin("+5511990020003", ts(0)) else {
            panic!("first key should acquire");
        };

        assert!(matches!(flight.begin("+5511990020004", ts(0)), FlightDecision::Acquired(_)));
    }

    #[test]
    fn expired_claims_are_stolen_and_the_stale_guard_cannot_release_them() {
        let flight = SingleFlight::new(Duration::seconds(120));

        let FlightDecision::Acquired(stale_guard) = flight.begin("+5511990020005", ts(0)) else {
            panic!("first begin should acquire");
        };

        // Within the TTL the claim holds even though the worker is silent.
        assert!(matches!(flight.begin("+5511990020005", ts(119)), FlightDecision::Busy));

        // Past the TTL the claim counts as abandoned and is taken over.
        let FlightDecision::Acquired(_current) = flight.begin("+5511990020005", ts(121)) else {
            panic!("expired claim should be stolen");
        };

        // The crashed worker finally drops its guard: the new claim stays.
        drop(stale_guard);
        assert!(matches!(flight.begin("+5511990020005", ts(122)), FlightDecision::Busy));
    }
}
