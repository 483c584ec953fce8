//! Mechanic selection.
//!
//! The best candidate is the highest-rated available mechanic outside both
//! exclusion sets; ties are broken uniformly at random so equally rated
//! mechanics share the work. The search runs as two queries per round (top
//! rating, then candidates at that rating). If a mechanic becomes unavailable
//! between the two, the round comes back empty and the search continues
//! strictly below that rating.

use std::sync::Arc;

use rand::seq::IndexedRandom;
use tracing::debug;

use crate::core::id_set::MechanicIdSet;
use crate::core::model::Mechanic;
use crate::core::store::{MechanicFilter, MechanicStore};
use crate::core::MatchError;

/// Ratings at or below this are treated as "no eligible mechanic".
pub const RATING_FLOOR: f64 = 1e-9;

/// Best-available-mechanic search over a [`MechanicStore`].
pub struct MechanicMatcher<S: ?Sized> {
    store: Arc<S>,
}

impl<S: ?Sized> Clone for MechanicMatcher<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: MechanicStore + ?Sized> MechanicMatcher<S> {
    /// Create a matcher reading from `store`.
    pub const fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Select a mechanic outside `blacklisted` and `visited`.
    ///
    /// # Errors
    ///
    /// * [`MatchError::ExhaustedCycle`] when nobody is left but `visited` is
    ///   non-empty;
    /// * [`MatchError::NotFound`] when nobody is left and nothing was visited;
    /// * [`MatchError::Store`] when a query fails.
    pub async fn find(
        &self,
        blacklisted: &MechanicIdSet,
        visited: &MechanicIdSet,
    ) -> Result<Mechanic, MatchError> {
        let mut filter = MechanicFilter::new(blacklisted, visited);
        loop {
            let top = self.store.max_rating(&filter).await?;
            if top <= RATING_FLOOR {
                return Err(if visited.is_empty() {
                    MatchError::NotFound
                } else {
                    MatchError::ExhaustedCycle
                });
            }

            let candidates = self.store.candidates_at(top, &filter).await?;
            // Re-apply the filter locally; the store is not trusted to honour it.
            let eligible: Vec<&Mechanic> = candidates.iter().filter(|m| filter.admits(m)).collect();
            if let Some(chosen) = eligible.choose(&mut rand::rng()) {
                debug!(
                    mechanic_id = %chosen.id,
                    rating = top,
                    tied = eligible.len(),
                    "mechanic selected"
                );
                return Ok((*chosen).clone());
            }

            debug!(rating = top, "candidates vanished, lowering threshold");
            filter = filter.below(top);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::store::MemoryStore;
    use uuid::Uuid;

    fn mechanic(n: u128, rating: f64, available: bool) -> Mechanic {
        Mechanic {
            id: Uuid::from_u128(n),
            full_name: format!("mechanic-{n}"),
            rating,
            is_available: available,
            balance: 0,
        }
    }

    #[tokio::test]
    async fn ignores_unavailable_and_unrated() {
        let store = MemoryStore::new();
        store.insert_mechanic(mechanic(1, 4.9, false));
        store.insert_mechanic(mechanic(2, 0.0, true));
        store.insert_mechanic(mechanic(3, 2.5, true));
        let matcher = MechanicMatcher::new(Arc::new(store));

        let chosen = matcher
            .find(&MechanicIdSet::new(), &MechanicIdSet::new())
            .await
            .unwrap();
        assert_eq!(chosen.id, Uuid::from_u128(3));
    }

    #[tokio::test]
    async fn ties_are_spread_across_candidates() {
        let store = MemoryStore::new();
        for n in 1..=3 {
            store.insert_mechanic(mechanic(n, 4.0, true));
        }
        let matcher = MechanicMatcher::new(Arc::new(store));

        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            let m = matcher
                .find(&MechanicIdSet::new(), &MechanicIdSet::new())
                .await
                .unwrap();
            seen.insert(m.id);
        }
        assert_eq!(seen.len(), 3);
    }

    #[tokio::test]
    async fn only_unrated_left_counts_as_exhausted() {
        let store = MemoryStore::new();
        store.insert_mechanic(mechanic(1, 3.0, true));
        store.insert_mechanic(mechanic(2, 0.0, true));
        let matcher = MechanicMatcher::new(Arc::new(store));

        let visited: MechanicIdSet = [Uuid::from_u128(1)].into_iter().collect();
        let err = matcher.find(&MechanicIdSet::new(), &visited).await.unwrap_err();
        assert_eq!(err, MatchError::ExhaustedCycle);
    }
}
