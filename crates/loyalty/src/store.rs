//! Document store for the rewards engine.
//!
//! Every read is an explicit `get`/`find`/`list` and every mutation an
//! explicit atomic update against a single document; nothing assumes
//! push-based invalidation. `MemoryCollection` backs each collection with
//! DashMap for development and testing. A persistent backend implements
//! `DocumentCollection` with a conditional write per `update`.

use crate::ledger::CustomerLedger;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rewards_core::coupon::Coupon;
use rewards_core::loyalty::{ProgramConfig, RewardsProfile};
use rewards_core::referral::ReferralCampaign;
use rewards_core::{RewardsError, RewardsResult};
use std::sync::Arc;
use tracing::info;

/// A keyed collection of documents.
///
/// `update` and `upsert` are the only mutation paths for existing
/// documents. The closure sees the current stored document; if it returns
/// an error nothing is written, otherwise its mutation is committed as one
/// unit with no interleaving writer.
pub trait DocumentCollection<V>: Send + Sync {
    fn get(&self, id: &str) -> Option<V>;

    fn find(&self, predicate: &dyn Fn(&V) -> bool) -> Option<V>;

    fn list(&self) -> Vec<V>;

    fn ids(&self) -> Vec<String>;

    /// Insert a document whose id must not exist yet. Fails with `Conflict`.
    fn insert_new(&self, id: &str, doc: V) -> RewardsResult<()>;

    /// Unconditional write, used for singleton records.
    fn put(&self, id: &str, doc: V);

    fn remove(&self, id: &str) -> Option<V>;

    /// Atomic read-modify-write of an existing document. Fails with
    /// `NotFound` if the id is absent.
    fn update(
        &self,
        id: &str,
        apply: &mut dyn FnMut(&mut V) -> RewardsResult<()>,
    ) -> RewardsResult<V>;

    /// Like `update`, seeding the document from `seed` when absent. A seeded
    /// document is only stored if `apply` succeeds.
    fn upsert(
        &self,
        id: &str,
        seed: &dyn Fn() -> V,
        apply: &mut dyn FnMut(&mut V) -> RewardsResult<()>,
    ) -> RewardsResult<V>;
}

/// In-memory collection backed by `DashMap`. The shard write lock is held
/// for the whole of an `update`, which makes each update atomic.
pub struct MemoryCollection<V> {
    name: &'static str,
    docs: DashMap<String, V>,
}

impl<V> MemoryCollection<V> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            docs: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

impl<V: Clone + Send + Sync> DocumentCollection<V> for MemoryCollection<V> {
    fn get(&self, id: &str) -> Option<V> {
        self.docs.get(id).map(|r| r.value().clone())
    }

    fn find(&self, predicate: &dyn Fn(&V) -> bool) -> Option<V> {
        self.docs
            .iter()
            .find(|r| predicate(r.value()))
            .map(|r| r.value().clone())
    }

    fn list(&self) -> Vec<V> {
        self.docs.iter().map(|r| r.value().clone()).collect()
    }

    fn ids(&self) -> Vec<String> {
        self.docs.iter().map(|r| r.key().clone()).collect()
    }

    fn insert_new(&self, id: &str, doc: V) -> RewardsResult<()> {
        match self.docs.entry(id.to_string()) {
            Entry::Occupied(_) => Err(RewardsError::Conflict(format!(
                "{}/{} already exists",
                self.name, id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(doc);
                Ok(())
            }
        }
    }

    fn put(&self, id: &str, doc: V) {
        self.docs.insert(id.to_string(), doc);
    }

    fn remove(&self, id: &str) -> Option<V> {
        self.docs.remove(id).map(|(_, v)| v)
    }

    fn update(
        &self,
        id: &str,
        apply: &mut dyn FnMut(&mut V) -> RewardsResult<()>,
    ) -> RewardsResult<V> {
        let mut entry = self
            .docs
            .get_mut(id)
            .ok_or_else(|| RewardsError::NotFound(format!("{}/{}", self.name, id)))?;
        let mut draft = entry.value().clone();
        apply(&mut draft)?;
        *entry.value_mut() = draft.clone();
        Ok(draft)
    }

    fn upsert(
        &self,
        id: &str,
        seed: &dyn Fn() -> V,
        apply: &mut dyn FnMut(&mut V) -> RewardsResult<()>,
    ) -> RewardsResult<V> {
        match self.docs.entry(id.to_string()) {
            Entry::Occupied(mut slot) => {
                let mut draft = slot.get().clone();
                apply(&mut draft)?;
                slot.insert(draft.clone());
                Ok(draft)
            }
            Entry::Vacant(slot) => {
                let mut draft = seed();
                apply(&mut draft)?;
                slot.insert(draft.clone());
                Ok(draft)
            }
        }
    }
}

/// Id of the singleton configuration record.
pub const PROGRAM_CONFIG_ID: &str = "program";

/// The engine's logical collections: one configuration record, one profile
/// per customer, one ledger per customer, one record per campaign code and
/// one per coupon code.
#[derive(Clone)]
pub struct RewardsStore {
    pub config: Arc<dyn DocumentCollection<ProgramConfig>>,
    pub profiles: Arc<dyn DocumentCollection<RewardsProfile>>,
    pub ledgers: Arc<dyn DocumentCollection<CustomerLedger>>,
    pub campaigns: Arc<dyn DocumentCollection<ReferralCampaign>>,
    pub coupons: Arc<dyn DocumentCollection<Coupon>>,
}

impl RewardsStore {
    pub fn in_memory() -> Self {
        info!("Rewards store initialized (in-memory, development mode)");
        Self {
            config: Arc::new(MemoryCollection::new("config")),
            profiles: Arc::new(MemoryCollection::new("profiles")),
            ledgers: Arc::new(MemoryCollection::new("ledgers")),
            campaigns: Arc::new(MemoryCollection::new("campaigns")),
            coupons: Arc::new(MemoryCollection::new("coupons")),
        }
    }
}
