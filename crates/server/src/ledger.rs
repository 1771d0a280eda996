//! Chip ledger: the single funds authority.
//!
//! Every balance mutation takes a row write lock on the user, verifies the
//! balance, writes the new value, and appends exactly one audit row with
//! `balance_after = balance_before + amount`. Multi-user operations lock in
//! ascending user id order so concurrent transfers cannot deadlock.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::error::AppError;
use crate::store::{Store, StoreTxn, TransactionKind};

/// Smallest movable amount.
pub const MIN_TRANSACTION_AMOUNT: i64 = 1;
/// Largest movable amount.
pub const MAX_TRANSACTION_AMOUNT: i64 = 1_000_000_000;

/// Upper bound on any single ledger operation; past it the operation fails
/// and leaves state untouched.
const LEDGER_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ChipLedger {
    store: Arc<dyn Store>,
}

impl ChipLedger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        ChipLedger { store }
    }

    pub async fn balance(&self, user_id: i64) -> Result<i64, AppError> {
        let user = self
            .store
            .user_by_id(user_id)
            .await?
            .ok_or(AppError::NotFound("user"))?;
        Ok(user.chips)
    }

    pub fn validate_amount(amount: i64) -> Result<(), AppError> {
        if amount < 0 {
            return Err(AppError::InvalidInput("amount cannot be negative".into()));
        }
        if amount < MIN_TRANSACTION_AMOUNT {
            return Err(AppError::InvalidInput(format!(
                "amount must be at least {MIN_TRANSACTION_AMOUNT}"
            )));
        }
        if amount > MAX_TRANSACTION_AMOUNT {
            return Err(AppError::InvalidInput(format!(
                "amount exceeds maximum of {MAX_TRANSACTION_AMOUNT}"
            )));
        }
        Ok(())
    }

    /// Debit `amount` from the user. Returns the new balance.
    pub async fn deduct_chips(
        &self,
        user_id: i64,
        amount: i64,
        kind: TransactionKind,
        reference_id: Option<&str>,
        description: &str,
    ) -> Result<i64, AppError> {
        Self::validate_amount(amount)?;
        bounded(async {
            let mut txn = self.store.begin().await?;
            match self
                .deduct_chips_with_tx(txn.as_mut(), user_id, amount, kind, reference_id, description)
                .await
            {
                Ok(balance) => {
                    txn.commit().await?;
                    Ok(balance)
                }
                Err(err) => {
                    txn.rollback().await;
                    Err(err)
                }
            }
        })
        .await
    }

    /// Credit `amount` to the user. Returns the new balance.
    pub async fn add_chips(
        &self,
        user_id: i64,
        amount: i64,
        kind: TransactionKind,
        reference_id: Option<&str>,
        description: &str,
    ) -> Result<i64, AppError> {
        Self::validate_amount(amount)?;
        bounded(async {
            let mut txn = self.store.begin().await?;
            match self
                .add_chips_with_tx(txn.as_mut(), user_id, amount, kind, reference_id, description)
                .await
            {
                Ok(balance) => {
                    txn.commit().await?;
                    Ok(balance)
                }
                Err(err) => {
                    txn.rollback().await;
                    Err(err)
                }
            }
        })
        .await
    }

    /// Debit inside a caller-owned transaction, so several ledger moves and
    /// other row writes commit or roll back together.
    pub async fn deduct_chips_with_tx(
        &self,
        txn: &mut dyn StoreTxn,
        user_id: i64,
        amount: i64,
        kind: TransactionKind,
        reference_id: Option<&str>,
        description: &str,
    ) -> Result<i64, AppError> {
        Self::validate_amount(amount)?;
        let user = txn.user_for_update(user_id).await?;
        if user.chips < amount {
            return Err(AppError::InsufficientFunds);
        }
        let balance_after = user.chips - amount;
        txn.set_user_chips(user_id, balance_after).await?;
        txn.insert_chip_transaction(
            user_id,
            -amount,
            user.chips,
            balance_after,
            kind,
            reference_id,
            description,
        )
        .await?;
        Ok(balance_after)
    }

    /// Credit inside a caller-owned transaction.
    pub async fn add_chips_with_tx(
        &self,
        txn: &mut dyn StoreTxn,
        user_id: i64,
        amount: i64,
        kind: TransactionKind,
        reference_id: Option<&str>,
        description: &str,
    ) -> Result<i64, AppError> {
        Self::validate_amount(amount)?;
        let user = txn.user_for_update(user_id).await?;
        let balance_after = user.chips + amount;
        txn.set_user_chips(user_id, balance_after).await?;
        txn.insert_chip_transaction(
            user_id,
            amount,
            user.chips,
            balance_after,
            kind,
            reference_id,
            description,
        )
        .await?;
        Ok(balance_after)
    }

    /// Move chips between two users in one transaction. Either both the
    /// debit and the credit land, or neither does.
    pub async fn transfer_chips(
        &self,
        from: i64,
        to: i64,
        amount: i64,
        kind: TransactionKind,
        reference_id: Option<&str>,
        description: &str,
    ) -> Result<(), AppError> {
        Self::validate_amount(amount)?;
        if from == to {
            return Err(AppError::InvalidInput(
                "cannot transfer to the same user".into(),
            ));
        }
        bounded(async {
            let mut txn = self.store.begin().await?;
            let result = async {
                // Lock both rows in ascending id order before touching
                // either balance.
                let mut ids = [from, to];
                ids.sort_unstable();
                for id in ids {
                    txn.user_for_update(id).await?;
                }
                self.deduct_chips_with_tx(
                    txn.as_mut(),
                    from,
                    amount,
                    kind,
                    reference_id,
                    description,
                )
                .await?;
                self.add_chips_with_tx(txn.as_mut(), to, amount, kind, reference_id, description)
                    .await?;
                Ok::<(), AppError>(())
            }
            .await;
            match result {
                Ok(()) => {
                    txn.commit().await?;
                    Ok(())
                }
                Err(err) => {
                    txn.rollback().await;
                    Err(err)
                }
            }
        })
        .await
    }
}

async fn bounded<T>(fut: impl Future<Output = Result<T, AppError>>) -> Result<T, AppError> {
    match tokio::time::timeout(LEDGER_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!("ledger operation exceeded {LEDGER_TIMEOUT:?}");
            Err(AppError::Internal("ledger operation timed out".into()))
        }
    }
}

/// Truncating basis-point share: `pool * bp / 10000`.
pub fn prize_amount(pool: i64, basis_points: i64) -> i64 {
    pool * basis_points / 10_000
}

/// Per-position prize amounts whose sum equals the pool exactly; any
/// truncation residue goes to position 1.
pub fn distribute_prizes_exact(pool: i64, structure: &[i64]) -> Vec<i64> {
    let mut amounts: Vec<i64> = structure
        .iter()
        .map(|&bp| prize_amount(pool, bp))
        .collect();
    let paid: i64 = amounts.iter().sum();
    if let Some(first) = amounts.first_mut() {
        *first += pool - paid;
    }
    amounts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::mem::MemStore;

    async fn ledger_with_user(chips: i64) -> (ChipLedger, Arc<MemStore>, i64) {
        let store = Arc::new(MemStore::new());
        let user = store.create_user("alice", "Alice", chips).await.unwrap();
        (ChipLedger::new(store.clone()), store, user.id)
    }

    #[tokio::test]
    async fn deduct_then_add_restores_balance_with_two_audit_rows() {
        let (ledger, store, user) = ledger_with_user(1_000).await;

        ledger
            .deduct_chips(user, 400, TransactionKind::CashGameBuyIn, None, "buy-in")
            .await
            .unwrap();
        ledger
            .add_chips(user, 400, TransactionKind::CashGameCashOut, None, "cash out")
            .await
            .unwrap();

        assert_eq!(ledger.balance(user).await.unwrap(), 1_000);
        let audit = store.chip_transactions_for_user(user).await.unwrap();
        assert_eq!(audit.len(), 2);
        for row in &audit {
            assert_eq!(row.balance_after, row.balance_before + row.amount);
        }
        assert_eq!(audit[0].amount, -400);
        assert_eq!(audit[1].amount, 400);
    }

    #[tokio::test]
    async fn deduction_past_the_balance_is_refused_without_side_effects() {
        let (ledger, store, user) = ledger_with_user(100).await;

        let err = ledger
            .deduct_chips(user, 500, TransactionKind::CashGameBuyIn, None, "too much")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InsufficientFunds));
        assert_eq!(ledger.balance(user).await.unwrap(), 100);
        assert!(store.chip_transactions_for_user(user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn amount_validation_bounds() {
        assert!(matches!(
            ChipLedger::validate_amount(-5),
            Err(AppError::InvalidInput(_))
        ));
        assert!(matches!(
            ChipLedger::validate_amount(0),
            Err(AppError::InvalidInput(_))
        ));
        assert!(ChipLedger::validate_amount(1).is_ok());
        assert!(ChipLedger::validate_amount(MAX_TRANSACTION_AMOUNT).is_ok());
        assert!(matches!(
            ChipLedger::validate_amount(MAX_TRANSACTION_AMOUNT + 1),
            Err(AppError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn transfer_conserves_chips_and_round_trips() {
        let store = Arc::new(MemStore::new());
        let a = store.create_user("a", "A", 1_000).await.unwrap();
        let b = store.create_user("b", "B", 200).await.unwrap();
        let ledger = ChipLedger::new(store.clone());

        ledger
            .transfer_chips(a.id, b.id, 300, TransactionKind::AdminAdjustment, None, "x")
            .await
            .unwrap();
        assert_eq!(ledger.balance(a.id).await.unwrap(), 700);
        assert_eq!(ledger.balance(b.id).await.unwrap(), 500);

        ledger
            .transfer_chips(b.id, a.id, 300, TransactionKind::AdminAdjustment, None, "y")
            .await
            .unwrap();
        assert_eq!(ledger.balance(a.id).await.unwrap(), 1_000);
        assert_eq!(ledger.balance(b.id).await.unwrap(), 200);

        let rows_a = store.chip_transactions_for_user(a.id).await.unwrap();
        let rows_b = store.chip_transactions_for_user(b.id).await.unwrap();
        assert_eq!(rows_a.len() + rows_b.len(), 4);
    }

    #[tokio::test]
    async fn failed_transfer_rolls_back_both_sides() {
        let store = Arc::new(MemStore::new());
        let a = store.create_user("a", "A", 100).await.unwrap();
        let b = store.create_user("b", "B", 0).await.unwrap();
        let ledger = ChipLedger::new(store.clone());

        let err = ledger
            .transfer_chips(a.id, b.id, 500, TransactionKind::AdminAdjustment, None, "x")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InsufficientFunds));
        assert_eq!(ledger.balance(a.id).await.unwrap(), 100);
        assert_eq!(ledger.balance(b.id).await.unwrap(), 0);
        assert!(store.chip_transactions_for_user(a.id).await.unwrap().is_empty());
        assert!(store.chip_transactions_for_user(b.id).await.unwrap().is_empty());
    }

    #[test]
    fn prize_distribution_is_exact() {
        assert_eq!(
            distribute_prizes_exact(10_000, &[5_000, 3_000, 2_000]),
            vec![5_000, 3_000, 2_000]
        );
        // Truncation residue lands on position 1.
        let amounts = distribute_prizes_exact(10_003, &[5_000, 3_000, 2_000]);
        assert_eq!(amounts, vec![5_001, 3_000, 2_000]);
        assert_eq!(amounts.iter().sum::<i64>(), 10_003);
    }

    #[test]
    fn prize_amount_truncates() {
        assert_eq!(prize_amount(10_003, 5_000), 5_001);
        assert_eq!(prize_amount(10_003, 3_000), 3_000);
        assert_eq!(prize_amount(999, 3_333), 332);
    }
}
