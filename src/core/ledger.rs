//! Ledger bookkeeping: balance movements paired with ledger entries.
//!
//! A balance never changes without an entry describing it. Both writes are
//! staged on the same [`UnitOfWork`], so the backend applies them together or
//! not at all. Balance writes name the balance they were computed from; when
//! another writer got there first the whole read-and-stage is run again.

use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::audit::{AuditAction, AuditLog};
use crate::core::model::{Account, LedgerEntry, LedgerKind, LedgerStatus, Money, UserId};
use crate::core::store::{Storage, UnitOfWork};
use crate::core::{FulfillmentError, StoreError};
use crate::util::{clock, refs};

/// How many times a balance movement is recomputed after losing a race with
/// another writer.
pub(crate) const STALE_ATTEMPTS: usize = 3;

/// Ledger operations over a storage backend.
pub struct Ledger<S> {
    store: Arc<S>,
    audit: AuditLog,
}

impl<S> Clone for Ledger<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            audit: self.audit.clone(),
        }
    }
}

impl<S: Storage> Ledger<S> {
    /// Create a ledger over `store`.
    pub const fn new(store: Arc<S>, audit: AuditLog) -> Self {
        Self { store, audit }
    }

    /// Stage a new entry.
    ///
    /// # Errors
    ///
    /// Fails if the reference is already taken or storage fails.
    pub async fn record(
        &self,
        tx: &mut dyn UnitOfWork,
        entry: LedgerEntry,
    ) -> Result<LedgerEntry, StoreError> {
        tx.create_entry(entry).await
    }

    /// Stage an update of an existing entry that was read in status
    /// `expected`.
    ///
    /// # Errors
    ///
    /// Fails if the entry does not exist, has left `expected`, or storage
    /// fails.
    pub async fn update(
        &self,
        tx: &mut dyn UnitOfWork,
        entry: LedgerEntry,
        expected: LedgerStatus,
    ) -> Result<(), StoreError> {
        tx.update_entry(entry, expected).await
    }

    /// Fetch an entry by its external reference.
    ///
    /// # Errors
    ///
    /// Fails if no entry carries `reference`.
    pub async fn by_reference(&self, reference: &str) -> Result<LedgerEntry, StoreError> {
        self.store.entry_by_reference(reference).await
    }

    /// Stage a settled debit of `amount` from `account`, whose balance is
    /// currently `balance`.
    ///
    /// # Errors
    ///
    /// [`FulfillmentError::InsufficientFunds`] when `balance < amount`, before
    /// anything is staged; a stale store error if `balance` has moved since it
    /// was read; storage errors otherwise.
    pub async fn debit(
        &self,
        tx: &mut dyn UnitOfWork,
        account: Account,
        balance: Money,
        amount: Money,
        description: Option<String>,
    ) -> Result<LedgerEntry, FulfillmentError> {
        if balance < amount {
            return Err(FulfillmentError::InsufficientFunds { balance, fee: amount });
        }
        let new_balance = balance - amount;
        tx.set_balance(account, balance, new_balance).await?;
        let now = clock::now();
        let entry = LedgerEntry {
            id: Uuid::new_v4(),
            reference: refs::ledger_reference(LedgerKind::Debit),
            account,
            previous_balance: balance,
            current_balance: new_balance,
            amount,
            status: LedgerStatus::Success,
            kind: LedgerKind::Debit,
            description,
            created_at: now,
            updated_at: now,
        };
        Ok(self.record(tx, entry).await?)
    }

    /// Open a pending credit for a wallet top-up. The balance does not move
    /// until [`Ledger::confirm_credit`] settles it.
    ///
    /// # Errors
    ///
    /// Validation error for non-positive amounts, not-found for unknown users,
    /// storage errors otherwise.
    pub async fn initiate_credit(
        &self,
        user_id: UserId,
        amount: Money,
        description: Option<String>,
    ) -> Result<LedgerEntry, FulfillmentError> {
        if amount <= 0 {
            return Err(FulfillmentError::Validation("amount must be positive".into()));
        }
        let user = self.store.get_user(user_id).await?;
        let now = clock::now();
        let entry = LedgerEntry {
            id: Uuid::new_v4(),
            reference: refs::ledger_reference(LedgerKind::Credit),
            account: Account::User(user.id),
            previous_balance: user.balance,
            current_balance: user.balance,
            amount,
            status: LedgerStatus::Pending,
            kind: LedgerKind::Credit,
            description,
            created_at: now,
            updated_at: now,
        };

        let mut tx = self.store.begin().await?;
        let entry = match self.record(tx.as_mut(), entry).await {
            Ok(entry) => entry,
            Err(e) => {
                tx.rollback().await;
                return Err(e.into());
            }
        };
        tx.commit().await?;
        info!(reference = %entry.reference, amount, "pending credit opened");
        Ok(entry)
    }

    /// Settle the pending credit carrying `reference`, crediting
    /// `settled_amount` (or the entry amount) to its account.
    ///
    /// # Errors
    ///
    /// Not-found for unknown references, conflict when the entry is no longer
    /// pending or is not a credit, storage errors otherwise.
    pub async fn confirm_credit(
        &self,
        reference: &str,
        settled_amount: Option<Money>,
    ) -> Result<LedgerEntry, FulfillmentError> {
        let mut attempt = 1;
        let (entry, amount) = loop {
            match self.settle(reference, settled_amount).await {
                Err(e) if e.is_stale() && attempt < STALE_ATTEMPTS => {
                    debug!(reference, attempt, error = %e, "balance moved, settling again");
                    attempt += 1;
                }
                other => break other?,
            }
        };

        info!(reference, amount, new_balance = entry.current_balance, "credit confirmed");
        self.audit.record(
            reference,
            AuditAction::CreditConfirmed,
            Some(format!("amount={amount}")),
        );
        Ok(entry)
    }

    async fn settle(
        &self,
        reference: &str,
        settled_amount: Option<Money>,
    ) -> Result<(LedgerEntry, Money), FulfillmentError> {
        let mut entry = self.by_reference(reference).await?;
        if entry.kind != LedgerKind::Credit {
            return Err(FulfillmentError::Conflict(format!("{reference} is not a credit")));
        }
        if entry.status != LedgerStatus::Pending {
            warn!(reference, status = ?entry.status, "credit already settled");
            return Err(FulfillmentError::Conflict(format!(
                "transaction {reference} already confirmed"
            )));
        }

        let amount = settled_amount.unwrap_or(entry.amount);
        if amount <= 0 {
            return Err(FulfillmentError::Validation("settled amount must be positive".into()));
        }
        let balance = match entry.account {
            Account::User(id) => self.store.get_user(id).await?.balance,
            Account::Mechanic(id) => self.store.get_mechanic(id).await?.balance,
        };

        entry.previous_balance = balance;
        entry.current_balance = balance + amount;
        entry.status = LedgerStatus::Success;
        entry.updated_at = clock::now();

        let mut tx = self.store.begin().await?;
        let staged: Result<(), StoreError> = async {
            self.update(tx.as_mut(), entry.clone(), LedgerStatus::Pending)
                .await?;
            tx.set_balance(entry.account, balance, entry.current_balance)
                .await
        }
        .await;
        if let Err(e) = staged {
            tx.rollback().await;
            return Err(e.into());
        }
        tx.commit().await?;
        Ok((entry, amount))
    }
}
