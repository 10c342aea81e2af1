//! Points Ledger: append-only earn/redeem history per customer.
//!
//! All of a customer's transactions live in one `CustomerLedger` document so
//! the balance check and the append of a redeem happen in a single atomic
//! update. Balances are computed at read time and treat an earn past its
//! `expires_at` as contributing zero whether or not the sweep has flagged
//! it, so correctness never depends on sweep timing.

use crate::store::DocumentCollection;
use chrono::{DateTime, Duration, Utc};
use rewards_core::event_bus::{make_event, EventSink, RewardsEventType};
use rewards_core::loyalty::{
    CustomerId, EarnReason, PointsTransaction, ProgramConfig, TransactionId, TransactionType,
};
use rewards_core::{RewardsError, RewardsResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Ceiling on a single earn and on a ledger's lifetime total, so signed
/// balances stay exact.
pub const MAX_LEDGER_POINTS: u64 = i64::MAX as u64;

fn signed(points: u64) -> i64 {
    i64::try_from(points).unwrap_or(i64::MAX)
}

/// Stored ledger document for one customer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerLedger {
    pub customer_id: CustomerId,
    pub transactions: Vec<PointsTransaction>,
    /// Idempotency key → transaction it produced.
    #[serde(default)]
    pub applied_keys: BTreeMap<String, TransactionId>,
}

impl CustomerLedger {
    pub fn new(customer_id: CustomerId) -> Self {
        Self {
            customer_id,
            transactions: Vec::new(),
            applied_keys: BTreeMap::new(),
        }
    }

    /// Σ non-expired earns − Σ redeems.
    pub fn available(&self, as_of: DateTime<Utc>) -> i64 {
        self.transactions.iter().fold(0i64, |acc, tx| match tx.kind {
            TransactionType::Earn if tx.is_expired_at(as_of) => acc,
            TransactionType::Earn => acc.saturating_add(signed(tx.points)),
            TransactionType::Redeem => acc.saturating_sub(signed(tx.points)),
        })
    }

    /// Σ all earns ever, ignoring expiry.
    pub fn lifetime(&self) -> u64 {
        self.transactions
            .iter()
            .filter(|tx| tx.is_earn())
            .fold(0u64, |acc, tx| acc.saturating_add(tx.points))
    }

    /// Unconsumed points of earns expiring in `(as_of, as_of + window_days]`.
    ///
    /// Redeems consume FIFO: each redeem draws from the oldest earns that
    /// were still live at the redeem's timestamp.
    pub fn expiring_soon(&self, as_of: DateTime<Utc>, window_days: u32) -> u64 {
        let horizon = as_of + Duration::days(i64::from(window_days));

        let mut ordered: Vec<&PointsTransaction> = self.transactions.iter().collect();
        ordered.sort_by_key(|tx| tx.timestamp);

        // (expires_at, flagged, remaining)
        let mut lots: Vec<(Option<DateTime<Utc>>, bool, u64)> = Vec::new();
        for tx in ordered {
            match tx.kind {
                TransactionType::Earn => lots.push((tx.expires_at, tx.is_expired, tx.points)),
                TransactionType::Redeem => {
                    let mut needed = tx.points;
                    for lot in lots.iter_mut() {
                        if needed == 0 {
                            break;
                        }
                        let live = lot.0.map(|e| e > tx.timestamp).unwrap_or(true);
                        if !live || lot.2 == 0 {
                            continue;
                        }
                        let take = needed.min(lot.2);
                        lot.2 -= take;
                        needed -= take;
                    }
                }
            }
        }

        lots.iter()
            .filter(|(expires_at, flagged, _)| {
                !flagged
                    && expires_at
                        .map(|e| e > as_of && e <= horizon)
                        .unwrap_or(false)
            })
            .fold(0u64, |acc, (_, _, remaining)| acc.saturating_add(*remaining))
    }

    pub fn summary(&self, as_of: DateTime<Utc>, window_days: u32) -> LedgerBalance {
        LedgerBalance {
            available: self.available(as_of),
            lifetime: self.lifetime(),
            expiring_soon: self.expiring_soon(as_of, window_days),
        }
    }

    fn transaction(&self, id: TransactionId) -> Option<&PointsTransaction> {
        self.transactions.iter().find(|tx| tx.id == id)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerBalance {
    pub available: i64,
    pub lifetime: u64,
    pub expiring_soon: u64,
}

/// Request to append an earn transaction.
#[derive(Debug, Clone)]
pub struct EarnRequest {
    pub customer_id: CustomerId,
    pub points: u64,
    pub reason: EarnReason,
    pub order_id: Option<String>,
    /// Retries carrying the same key return the original transaction.
    pub idempotency_key: Option<String>,
    pub description: String,
}

impl EarnRequest {
    pub fn new(customer_id: CustomerId, points: u64, reason: EarnReason) -> Self {
        Self {
            customer_id,
            points,
            reason,
            order_id: None,
            idempotency_key: None,
            description: String::new(),
        }
    }

    pub fn with_order(mut self, order_id: &str) -> Self {
        self.order_id = Some(order_id.to_string());
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Request to append a redeem transaction against an order.
#[derive(Debug, Clone)]
pub struct RedeemRequest {
    pub customer_id: CustomerId,
    pub points: u64,
    pub order_id: String,
    pub description: String,
}

/// Result of appending (or replaying) a transaction.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub transaction: PointsTransaction,
    /// True when an earlier call with the same key already applied it.
    pub replayed: bool,
    pub available_after: i64,
}

pub struct PointsLedger {
    ledgers: Arc<dyn DocumentCollection<CustomerLedger>>,
    events: Arc<dyn EventSink>,
}

impl PointsLedger {
    pub fn new(
        ledgers: Arc<dyn DocumentCollection<CustomerLedger>>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self { ledgers, events }
    }

    /// Append an earn transaction with `expires_at = now + points_expiry_months`.
    pub fn earn(
        &self,
        request: EarnRequest,
        config: &ProgramConfig,
        now: DateTime<Utc>,
    ) -> RewardsResult<LedgerEntry> {
        if request.points == 0 {
            return Err(RewardsError::InvalidAmount(
                "earned points must be positive".into(),
            ));
        }
        if request.points > MAX_LEDGER_POINTS {
            return Err(RewardsError::InvalidAmount(format!(
                "earned points {} exceed {MAX_LEDGER_POINTS}",
                request.points
            )));
        }

        let customer_id = request.customer_id;
        let mut outcome: Option<(TransactionId, bool)> = None;
        let ledger = self.ledgers.upsert(
            &customer_id.to_string(),
            &|| CustomerLedger::new(customer_id),
            &mut |ledger| {
                if let Some(key) = &request.idempotency_key {
                    if let Some(existing) = ledger.applied_keys.get(key) {
                        outcome = Some((*existing, true));
                        return Ok(());
                    }
                }
                let total = ledger.lifetime().checked_add(request.points);
                if total.map_or(true, |t| t > MAX_LEDGER_POINTS) {
                    return Err(RewardsError::InvalidAmount(format!(
                        "lifetime points would exceed {MAX_LEDGER_POINTS}"
                    )));
                }
                let tx = PointsTransaction {
                    id: Uuid::new_v4(),
                    customer_id,
                    kind: TransactionType::Earn,
                    points: request.points,
                    earn_reason: Some(request.reason),
                    order_id: request.order_id.clone(),
                    description: request.description.clone(),
                    timestamp: now,
                    expires_at: config.earn_expiry(now),
                    is_expired: false,
                };
                if let Some(key) = &request.idempotency_key {
                    ledger.applied_keys.insert(key.clone(), tx.id);
                }
                outcome = Some((tx.id, false));
                ledger.transactions.push(tx);
                Ok(())
            },
        )?;

        let entry = Self::entry_for(&ledger, outcome, now)?;
        if entry.replayed {
            debug!(
                customer_id = %customer_id,
                key = ?request.idempotency_key,
                "Earn already applied"
            );
        } else {
            metrics::counter!("rewards.points_earned", "reason" => format!("{:?}", request.reason))
                .increment(request.points);
            debug!(
                customer_id = %customer_id,
                points = request.points,
                reason = ?request.reason,
                balance = entry.available_after,
                "Points earned"
            );
            self.events.emit(make_event(
                RewardsEventType::PointsEarned,
                Some(customer_id),
                request.order_id.clone(),
                Some(request.points),
                now,
            ));
        }
        Ok(entry)
    }

    /// Append a redeem transaction after checking the balance and the
    /// configured floor and ceiling, all inside one atomic ledger update.
    /// Idempotent per order id.
    pub fn redeem(
        &self,
        request: RedeemRequest,
        config: &ProgramConfig,
        now: DateTime<Utc>,
    ) -> RewardsResult<LedgerEntry> {
        if request.points == 0 {
            return Err(RewardsError::InvalidAmount(
                "redeemed points must be positive".into(),
            ));
        }

        let customer_id = request.customer_id;
        let key = format!("redeem:{}", request.order_id);
        let mut outcome: Option<(TransactionId, bool)> = None;
        let result = self.ledgers.upsert(
            &customer_id.to_string(),
            &|| CustomerLedger::new(customer_id),
            &mut |ledger| {
                if let Some(existing) = ledger.applied_keys.get(&key) {
                    outcome = Some((*existing, true));
                    return Ok(());
                }
                let available = ledger.available(now);
                if i64::try_from(request.points).map_or(true, |p| p > available) {
                    return Err(RewardsError::InsufficientPoints {
                        requested: request.points,
                        available,
                    });
                }
                if request.points < config.min_points_redemption {
                    return Err(RewardsError::BelowMinimum(format!(
                        "at least {} points must be redeemed",
                        config.min_points_redemption
                    )));
                }
                if request.points > config.max_points_per_order {
                    return Err(RewardsError::ExceedsOrderCap {
                        requested: request.points,
                        cap: config.max_points_per_order,
                    });
                }
                let tx = PointsTransaction {
                    id: Uuid::new_v4(),
                    customer_id,
                    kind: TransactionType::Redeem,
                    points: request.points,
                    earn_reason: None,
                    order_id: Some(request.order_id.clone()),
                    description: request.description.clone(),
                    timestamp: now,
                    expires_at: None,
                    is_expired: false,
                };
                ledger.applied_keys.insert(key.clone(), tx.id);
                outcome = Some((tx.id, false));
                ledger.transactions.push(tx);
                Ok(())
            },
        );

        let ledger = match result {
            Ok(ledger) => ledger,
            Err(e) => {
                warn!(
                    customer_id = %customer_id,
                    points = request.points,
                    order_id = %request.order_id,
                    error = %e,
                    "Redemption rejected"
                );
                return Err(e);
            }
        };

        let entry = Self::entry_for(&ledger, outcome, now)?;
        if !entry.replayed {
            metrics::counter!("rewards.points_redeemed").increment(request.points);
            metrics::counter!("rewards.redemptions").increment(1);
            info!(
                customer_id = %customer_id,
                points = request.points,
                order_id = %request.order_id,
                new_balance = entry.available_after,
                "Points redeemed"
            );
            self.events.emit(make_event(
                RewardsEventType::PointsRedeemed,
                Some(customer_id),
                Some(request.order_id.clone()),
                Some(request.points),
                now,
            ));
        }
        Ok(entry)
    }

    /// Flag earns whose `expires_at <= as_of`. Idempotent: already flagged
    /// earns are skipped, so repeated sweeps report zero.
    pub fn expire_stale(&self, customer_id: CustomerId, as_of: DateTime<Utc>) -> RewardsResult<usize> {
        let id = customer_id.to_string();
        if self.ledgers.get(&id).is_none() {
            return Ok(0);
        }

        let mut flagged = 0usize;
        let mut flagged_points = 0u64;
        self.ledgers.update(&id, &mut |ledger| {
            flagged = 0;
            flagged_points = 0;
            for tx in ledger.transactions.iter_mut() {
                let due = tx.is_earn()
                    && !tx.is_expired
                    && tx.expires_at.map(|e| e <= as_of).unwrap_or(false);
                if due {
                    tx.is_expired = true;
                    flagged += 1;
                    flagged_points += tx.points;
                }
            }
            Ok(())
        })?;

        if flagged > 0 {
            metrics::counter!("rewards.points_expired").increment(flagged_points);
            info!(
                customer_id = %customer_id,
                transactions = flagged,
                points = flagged_points,
                "Expired stale points"
            );
            self.events.emit(make_event(
                RewardsEventType::PointsExpired,
                Some(customer_id),
                None,
                Some(flagged_points),
                as_of,
            ));
        }
        Ok(flagged)
    }

    pub fn balance(&self, customer_id: CustomerId, as_of: DateTime<Utc>, window_days: u32) -> LedgerBalance {
        self.ledgers
            .get(&customer_id.to_string())
            .map(|ledger| ledger.summary(as_of, window_days))
            .unwrap_or_default()
    }

    /// Transactions for reporting, oldest first.
    pub fn transactions(&self, customer_id: CustomerId) -> Vec<PointsTransaction> {
        let mut txs = self
            .ledgers
            .get(&customer_id.to_string())
            .map(|ledger| ledger.transactions)
            .unwrap_or_default();
        txs.sort_by_key(|tx| tx.timestamp);
        txs
    }

    fn entry_for(
        ledger: &CustomerLedger,
        outcome: Option<(TransactionId, bool)>,
        now: DateTime<Utc>,
    ) -> RewardsResult<LedgerEntry> {
        let (id, replayed) = outcome.ok_or_else(|| {
            RewardsError::Internal(anyhow::anyhow!("ledger update produced no transaction"))
        })?;
        let transaction = ledger.transaction(id).cloned().ok_or_else(|| {
            RewardsError::Internal(anyhow::anyhow!("ledger transaction missing after update"))
        })?;
        Ok(LedgerEntry {
            transaction,
            replayed,
            available_after: ledger.available(now),
        })
    }
}
