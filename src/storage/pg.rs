//! Storage implementation using a PostgreSQL database.
//!
//! Conditional transitions are row-level `SELECT ... FOR UPDATE` + `UPDATE`
//! pairs inside a single transaction; the durable store is the sole
//! cross-process consistency mechanism, no distributed lock is used.

use super::{api::Result, StorageApi};
use crate::types::{
    DeployRecord, IntentId, IntentStatus, NonceRecord, ProcessStatus, SettlementIntent, Transfer,
};
use alloy::primitives::{Address, ChainId, B256, U256};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eyre::eyre;
use sqlx::{Connection, PgPool, Postgres, Row, Transaction};
use tracing::instrument;

/// PostgreSQL storage implementation.
#[derive(Debug)]
pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    /// Creates a new PostgreSQL storage instance.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Locks an intent row and returns its decoded body, if present.
    async fn lock_intent(
        &self,
        id: IntentId,
        tx: &mut Transaction<'static, Postgres>,
    ) -> Result<Option<SettlementIntent>> {
        let row = sqlx::query("select intent from intents where id = $1 for update")
            .bind(id.as_slice())
            .fetch_optional(&mut **tx)
            .await?;

        row.map(|row| {
            let value: serde_json::Value = row.try_get("intent").map_err(eyre::Error::from)?;
            Ok(serde_json::from_value(value)?)
        })
        .transpose()
    }

    /// Writes a mutated intent body back, keeping the index columns in sync.
    async fn store_intent(
        &self,
        intent: &SettlementIntent,
        tx: &mut Transaction<'static, Postgres>,
    ) -> Result<()> {
        sqlx::query(
            "update intents set intent = $2, status = $3, updated_at = $4 where id = $1",
        )
        .bind(intent.id.as_slice())
        .bind(serde_json::to_value(intent)?)
        .bind(status_str(intent.status))
        .bind(intent.updated_at)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Conditionally transitions an intent within a single transaction.
    async fn transition(
        &self,
        id: IntentId,
        from: &[IntentStatus],
        apply: impl FnOnce(&mut SettlementIntent) + Send,
    ) -> Result<Option<SettlementIntent>> {
        let mut tx = self.pool.begin().await?;

        let Some(mut intent) = self.lock_intent(id, &mut tx).await? else {
            return Ok(None);
        };
        if !from.contains(&intent.status) {
            // Dropping the transaction rolls the row lock back.
            return Ok(None);
        }

        apply(&mut intent);
        intent.updated_at = Utc::now();
        self.store_intent(&intent, &mut tx).await?;
        tx.commit().await?;

        Ok(Some(intent))
    }

    /// Flags a transfer row settled within an existing transaction.
    async fn set_transfer_settled(
        &self,
        chain_id: ChainId,
        hash: B256,
        tx: &mut Transaction<'static, Postgres>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            update transfers
            set transfer = jsonb_set(transfer, '{process_status}', '{"kind":"settled"}')
            where chain_id = $1 and hash = $2
            "#,
        )
        .bind(chain_id as i64)
        .bind(hash.as_slice())
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    async fn intents_where(&self, clause: &str) -> Result<Vec<SettlementIntent>> {
        let rows = sqlx::query(&format!("select intent from intents where {clause}"))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| {
                let value: serde_json::Value =
                    row.try_get("intent").map_err(eyre::Error::from)?;
                Ok(serde_json::from_value(value)?)
            })
            .collect()
    }
}

fn status_str(status: IntentStatus) -> &'static str {
    match status {
        IntentStatus::Pending => "pending",
        IntentStatus::Reserved => "reserved",
        IntentStatus::Sent => "sent",
        IntentStatus::Crashed => "crashed",
        IntentStatus::Matched => "matched",
    }
}

#[async_trait]
impl StorageApi for PgStorage {
    #[instrument(skip(self, transfer))]
    async fn write_transfer(&self, transfer: &Transfer) -> Result<()> {
        sqlx::query(
            r#"
            insert into transfers (chain_id, hash, transfer)
            values ($1, $2, $3)
            on conflict (chain_id, hash) do nothing
            "#,
        )
        .bind(transfer.chain_id as i64)
        .bind(transfer.hash.as_slice())
        .bind(serde_json::to_value(transfer)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn read_transfer(&self, chain_id: ChainId, hash: B256) -> Result<Option<Transfer>> {
        let row = sqlx::query("select transfer from transfers where chain_id = $1 and hash = $2")
            .bind(chain_id as i64)
            .bind(hash.as_slice())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            let value: serde_json::Value = row.try_get("transfer").map_err(eyre::Error::from)?;
            Ok(serde_json::from_value(value)?)
        })
        .transpose()
    }

    #[instrument(skip(self, status))]
    async fn update_transfer_status(
        &self,
        chain_id: ChainId,
        hash: B256,
        status: &ProcessStatus,
    ) -> Result<()> {
        sqlx::query(
            r#"
            update transfers
            set transfer = jsonb_set(transfer, '{process_status}', $3)
            where chain_id = $1 and hash = $2
            "#,
        )
        .bind(chain_id as i64)
        .bind(hash.as_slice())
        .bind(serde_json::to_value(status)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self, intent))]
    async fn insert_intent(&self, intent: &SettlementIntent) -> Result<bool> {
        let result = sqlx::query(
            r#"
            insert into intents
                (id, source_chain, source_hash, target_chain, target_address,
                 target_token, target_amount, status, dispatch_self, intent,
                 created_at, updated_at)
            values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            on conflict (source_chain, source_hash) do nothing
            "#,
        )
        .bind(intent.id.as_slice())
        .bind(intent.source_chain as i64)
        .bind(intent.source_hash.as_slice())
        .bind(intent.target_chain as i64)
        .bind(intent.target_address.as_slice())
        .bind(intent.target_token.as_slice())
        .bind(intent.target_amount.to_string())
        .bind(status_str(intent.status))
        .bind(intent.dispatch_self)
        .bind(serde_json::to_value(intent)?)
        .bind(intent.created_at)
        .bind(intent.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn read_intent(&self, id: IntentId) -> Result<Option<SettlementIntent>> {
        let row = sqlx::query("select intent from intents where id = $1")
            .bind(id.as_slice())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            let value: serde_json::Value = row.try_get("intent").map_err(eyre::Error::from)?;
            Ok(serde_json::from_value(value)?)
        })
        .transpose()
    }

    async fn pending_self_dispatch_intents(&self) -> Result<Vec<SettlementIntent>> {
        self.intents_where("status = 'pending' and dispatch_self").await
    }

    async fn dispatched_intents(&self) -> Result<Vec<SettlementIntent>> {
        self.intents_where("status in ('sent', 'crashed')").await
    }

    #[instrument(skip(self))]
    async fn stale_reserved_intents(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<SettlementIntent>> {
        let rows =
            sqlx::query("select intent from intents where status = 'reserved' and updated_at < $1")
                .bind(older_than)
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter()
            .map(|row| {
                let value: serde_json::Value =
                    row.try_get("intent").map_err(eyre::Error::from)?;
                Ok(serde_json::from_value(value)?)
            })
            .collect()
    }

    #[instrument(skip(self))]
    async fn find_pending_by_target(
        &self,
        target_chain: ChainId,
        target_address: Address,
        target_token: Address,
        target_amount: U256,
    ) -> Result<Vec<SettlementIntent>> {
        let rows = sqlx::query(
            r#"
            select intent from intents
            where status = 'pending'
              and target_chain = $1 and target_address = $2
              and target_token = $3 and target_amount = $4
            "#,
        )
        .bind(target_chain as i64)
        .bind(target_address.as_slice())
        .bind(target_token.as_slice())
        .bind(target_amount.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let value: serde_json::Value =
                    row.try_get("intent").map_err(eyre::Error::from)?;
                Ok(serde_json::from_value(value)?)
            })
            .collect()
    }

    #[instrument(skip(self))]
    async fn settle_intent(
        &self,
        id: IntentId,
        target_chain: ChainId,
        target_hash: B256,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let Some(mut intent) = self.lock_intent(id, &mut tx).await? else {
            return Ok(false);
        };
        if intent.status != IntentStatus::Pending {
            return Ok(false);
        }

        intent.status = IntentStatus::Matched;
        intent.target_hash = Some(target_hash);
        intent.updated_at = Utc::now();
        self.store_intent(&intent, &mut tx).await?;

        self.set_transfer_settled(intent.source_chain, intent.source_hash, &mut tx).await?;
        self.set_transfer_settled(target_chain, target_hash, &mut tx).await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn reserve_intent(&self, id: IntentId) -> Result<bool> {
        Ok(self
            .transition(id, &[IntentStatus::Pending], |intent| {
                intent.status = IntentStatus::Reserved;
            })
            .await?
            .is_some())
    }

    async fn release_intent(&self, id: IntentId) -> Result<bool> {
        Ok(self
            .transition(id, &[IntentStatus::Reserved], |intent| {
                intent.status = IntentStatus::Pending;
            })
            .await?
            .is_some())
    }

    async fn mark_sent(&self, id: IntentId, dispatch_hash: B256) -> Result<bool> {
        Ok(self
            .transition(id, &[IntentStatus::Reserved], |intent| {
                intent.status = IntentStatus::Sent;
                intent.dispatch_hash = Some(dispatch_hash);
            })
            .await?
            .is_some())
    }

    async fn mark_crashed(&self, id: IntentId, dispatch_hash: Option<B256>) -> Result<bool> {
        Ok(self
            .transition(id, &[IntentStatus::Reserved], |intent| {
                intent.status = IntentStatus::Crashed;
                intent.dispatch_hash = dispatch_hash;
            })
            .await?
            .is_some())
    }

    async fn finalize_dispatched(&self, id: IntentId, target_hash: B256) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let Some(mut intent) = self.lock_intent(id, &mut tx).await? else {
            return Ok(false);
        };
        if !matches!(intent.status, IntentStatus::Sent | IntentStatus::Crashed) {
            return Ok(false);
        }

        intent.status = IntentStatus::Matched;
        intent.target_hash = Some(target_hash);
        intent.updated_at = Utc::now();
        self.store_intent(&intent, &mut tx).await?;
        self.set_transfer_settled(intent.source_chain, intent.source_hash, &mut tx).await?;

        tx.commit().await?;
        Ok(true)
    }

    #[instrument(skip(self))]
    async fn read_nonce(&self, chain_id: ChainId, signer: Address) -> Result<Option<NonceRecord>> {
        let row = sqlx::query(
            "select nonce, last_used from nonces where chain_id = $1 and signer = $2",
        )
        .bind(chain_id as i64)
        .bind(signer.as_slice())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| {
            let nonce: i64 = row.get("nonce");
            let last_used: DateTime<Utc> = row.get("last_used");
            NonceRecord { chain_id, signer, nonce: nonce as u64, last_used }
        }))
    }

    #[instrument(skip(self, record))]
    async fn write_nonce(&self, record: &NonceRecord) -> Result<()> {
        sqlx::query(
            r#"
            insert into nonces (chain_id, signer, nonce, last_used)
            values ($1, $2, $3, $4)
            on conflict (chain_id, signer)
            do update set nonce = excluded.nonce, last_used = excluded.last_used
            "#,
        )
        .bind(record.chain_id as i64)
        .bind(record.signer.as_slice())
        .bind(record.nonce as i64)
        .bind(record.last_used)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn read_deploy_record(&self, protocol: u32, tick: u64) -> Result<Option<DeployRecord>> {
        let row = sqlx::query(
            "select record from deploy_records where protocol = $1 and tick = $2",
        )
        .bind(protocol as i64)
        .bind(tick as i64)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            let value: serde_json::Value = row.try_get("record").map_err(eyre::Error::from)?;
            Ok(serde_json::from_value(value)?)
        })
        .transpose()
    }

    async fn write_deploy_record(&self, record: &DeployRecord) -> Result<()> {
        sqlx::query(
            r#"
            insert into deploy_records (protocol, tick, record)
            values ($1, $2, $3)
            on conflict (protocol, tick) do nothing
            "#,
        )
        .bind(record.protocol as i64)
        .bind(record.tick as i64)
        .bind(serde_json::to_value(record)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        if let Some(mut connection) = self.pool.try_acquire() {
            connection.ping().await.map_err(eyre::Error::from).map_err(Into::into)
        } else {
            Err(eyre!("no connection to database").into())
        }
    }
}
