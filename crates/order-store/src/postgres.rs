use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Actor, Money, OrderId, OrderStatus, PayStatus, UserId};
use sqlx::{
    PgPool, Postgres, QueryBuilder, Row, Transaction,
    postgres::{PgPoolOptions, PgRow},
};
use uuid::Uuid;

use crate::{
    AddressSnapshot, AuditFields, Auditable, Order, OrderQuery, OrderStoreError, Page,
    PaymentIntent, Result, StatusUpdate, TransitionEvent, UpdateOutcome,
    store::{OrderStore, OrderTransaction, validate_edge},
};

const ORDER_COLUMNS: &str = "id, number, user_id, status, pay_status, amount_cents, consignee, \
     phone, address, remark, transaction_id, created_at, checkout_time, cancel_time, \
     cancel_reason, rejection_reason, dispatch_time, delivery_time, created_by, updated_at, \
     updated_by";

/// PostgreSQL-backed order store implementation.
///
/// Conditional updates lock the order row with `SELECT ... FOR UPDATE` and
/// guard the write with `WHERE status = expected`.
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    /// Creates a new PostgreSQL order store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a pool to `url` and applies pending migrations.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        let store = Self::new(pool);
        store.run_migrations().await?;
        Ok(store)
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_order(row: PgRow) -> Result<Order> {
        let status: i16 = row.try_get("status")?;
        let pay_status: i16 = row.try_get("pay_status")?;

        Ok(Order {
            id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
            number: row.try_get("number")?,
            user_id: UserId::new(row.try_get("user_id")?),
            status: OrderStatus::try_from(status)
                .map_err(|e| OrderStoreError::InvalidRecord(e.to_string()))?,
            pay_status: PayStatus::try_from(pay_status)
                .map_err(|e| OrderStoreError::InvalidRecord(e.to_string()))?,
            amount: Money::from_cents(row.try_get("amount_cents")?),
            address: AddressSnapshot {
                consignee: row.try_get("consignee")?,
                phone: row.try_get("phone")?,
                detail: row.try_get("address")?,
            },
            remark: row.try_get("remark")?,
            transaction_id: row.try_get("transaction_id")?,
            created_at: row.try_get("created_at")?,
            checkout_time: row.try_get("checkout_time")?,
            cancel_time: row.try_get("cancel_time")?,
            cancel_reason: row.try_get("cancel_reason")?,
            rejection_reason: row.try_get("rejection_reason")?,
            dispatch_time: row.try_get("dispatch_time")?,
            delivery_time: row.try_get("delivery_time")?,
            audit: AuditFields {
                created_by: row.try_get("created_by")?,
                updated_at: row.try_get("updated_at")?,
                updated_by: row.try_get("updated_by")?,
            },
        })
    }

    fn row_to_transition(row: PgRow) -> Result<TransitionEvent> {
        let from: Option<i16> = row.try_get("from_status")?;
        let to: i16 = row.try_get("to_status")?;
        let actor: serde_json::Value = row.try_get("actor")?;

        Ok(TransitionEvent {
            id: row.try_get("id")?,
            seq: row.try_get("seq")?,
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            from: from
                .map(OrderStatus::try_from)
                .transpose()
                .map_err(|e| OrderStoreError::InvalidRecord(e.to_string()))?,
            to: OrderStatus::try_from(to)
                .map_err(|e| OrderStoreError::InvalidRecord(e.to_string()))?,
            trigger: row.try_get("trigger")?,
            actor: serde_json::from_value(actor)?,
            reason: row.try_get("reason")?,
            occurred_at: row.try_get("occurred_at")?,
        })
    }

    fn row_to_intent(row: PgRow) -> Result<PaymentIntent> {
        Ok(PaymentIntent {
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            prepay_id: row.try_get("prepay_id")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, query: &OrderQuery) {
        if let Some(ref number) = query.number {
            builder.push(" AND number = ").push_bind(number.clone());
        }
        if let Some(user_id) = query.user_id {
            builder.push(" AND user_id = ").push_bind(user_id.as_i64());
        }
        if let Some(status) = query.status {
            builder.push(" AND status = ").push_bind(status.code());
        }
        if let Some(from) = query.from_timestamp {
            builder.push(" AND created_at >= ").push_bind(from);
        }
        if let Some(to) = query.to_timestamp {
            builder.push(" AND created_at <= ").push_bind(to);
        }
    }
}

/// Appends a log entry and returns its assigned `seq`.
///
/// Callers hold the order row (inserted or locked) in `tx`, so entries for
/// one order draw their sequence values in commit order.
async fn insert_transition(
    tx: &mut Transaction<'static, Postgres>,
    event: &TransitionEvent,
) -> Result<i64> {
    let seq = sqlx::query_scalar(
        r#"
        INSERT INTO order_transitions
            (id, order_id, from_status, to_status, trigger, actor, reason, occurred_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING seq
        "#,
    )
    .bind(event.id)
    .bind(event.order_id.as_uuid())
    .bind(event.from.map(|s| s.code()))
    .bind(event.to.code())
    .bind(&event.trigger)
    .bind(serde_json::to_value(event.actor)?)
    .bind(&event.reason)
    .bind(event.occurred_at)
    .fetch_one(&mut **tx)
    .await?;

    Ok(seq)
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    async fn insert(&self, mut order: Order, actor: Actor) -> Result<Order> {
        order.apply_audit(order.created_at, actor, true);

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO orders (id, number, user_id, status, pay_status, amount_cents, consignee,
                phone, address, remark, created_at, created_by, updated_at, updated_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(&order.number)
        .bind(order.user_id.as_i64())
        .bind(order.status.code())
        .bind(order.pay_status.code())
        .bind(order.amount.cents())
        .bind(&order.address.consignee)
        .bind(&order.address.phone)
        .bind(&order.address.detail)
        .bind(&order.remark)
        .bind(order.created_at)
        .bind(order.audit.created_by)
        .bind(order.audit.updated_at)
        .bind(order.audit.updated_by)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("unique_order_number")
            {
                return OrderStoreError::DuplicateOrderNumber(order.number.clone());
            }
            OrderStoreError::Database(e)
        })?;

        let created = TransitionEvent::created(&order, actor);
        insert_transition(&mut tx, &created).await?;

        tx.commit().await?;
        Ok(order)
    }

    async fn get_by_id(&self, id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_order).transpose()
    }

    async fn get_by_number(&self, number: &str) -> Result<Option<Order>> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE number = $1"
        ))
        .bind(number)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_order).transpose()
    }

    async fn begin(&self, id: OrderId) -> Result<Box<dyn OrderTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PostgresTransaction { order_id: id, tx }))
    }

    async fn conditional_update_pay_status(
        &self,
        id: OrderId,
        expected: PayStatus,
        new: PayStatus,
        actor: Actor,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE orders SET pay_status = $3, updated_at = $4, updated_by = $5
            WHERE id = $1 AND pay_status = $2
            "#,
        )
        .bind(id.as_uuid())
        .bind(expected.code())
        .bind(new.code())
        .bind(at)
        .bind(actor.audit_id())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }

        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM orders WHERE id = $1)")
            .bind(id.as_uuid())
            .fetch_one(&self.pool)
            .await?;

        if exists {
            Ok(false)
        } else {
            Err(OrderStoreError::NotFound(id))
        }
    }

    async fn save_payment_intent(&self, intent: PaymentIntent) -> Result<Option<PaymentIntent>> {
        let mut tx = self.pool.begin().await?;

        let status: Option<i16> =
            sqlx::query_scalar("SELECT status FROM orders WHERE id = $1 FOR UPDATE")
                .bind(intent.order_id.as_uuid())
                .fetch_optional(&mut *tx)
                .await?;

        let Some(status) = status else {
            return Err(OrderStoreError::NotFound(intent.order_id));
        };
        if status != OrderStatus::AwaitingPayment.code() {
            tx.rollback().await?;
            return Ok(None);
        }

        sqlx::query(
            r#"
            INSERT INTO payment_intents (order_id, prepay_id, created_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (order_id) DO NOTHING
            "#,
        )
        .bind(intent.order_id.as_uuid())
        .bind(&intent.prepay_id)
        .bind(intent.created_at)
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query(
            "SELECT order_id, prepay_id, created_at FROM payment_intents WHERE order_id = $1",
        )
        .bind(intent.order_id.as_uuid())
        .fetch_one(&mut *tx)
        .await?;
        let live = Self::row_to_intent(row)?;

        tx.commit().await?;
        Ok(Some(live))
    }

    async fn get_payment_intent(&self, id: OrderId) -> Result<Option<PaymentIntent>> {
        let row: Option<PgRow> = sqlx::query(
            "SELECT order_id, prepay_id, created_at FROM payment_intents WHERE order_id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_intent).transpose()
    }

    async fn transitions(&self, id: OrderId) -> Result<Vec<TransitionEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT seq, id, order_id, from_status, to_status, trigger, actor, reason, occurred_at
            FROM order_transitions
            WHERE order_id = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_transition).collect()
    }

    async fn find_by_status_created_before(
        &self,
        status: OrderStatus,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE status = $1 AND created_at < $2 \
             ORDER BY created_at ASC"
        ))
        .bind(status.code())
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_order).collect()
    }

    async fn query(&self, query: OrderQuery) -> Result<Page<Order>> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM orders WHERE 1=1");
        Self::push_filters(&mut count, &query);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select =
            QueryBuilder::<Postgres>::new(format!("SELECT {ORDER_COLUMNS} FROM orders WHERE 1=1"));
        Self::push_filters(&mut select, &query);
        select
            .push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(i64::try_from(query.page_size).unwrap_or(i64::MAX))
            .push(" OFFSET ")
            .push_bind(i64::try_from(query.offset()).unwrap_or(i64::MAX));

        let rows = select.build().fetch_all(&self.pool).await?;
        let records = rows
            .into_iter()
            .map(Self::row_to_order)
            .collect::<Result<Vec<_>>>()?;

        Ok(Page {
            total: total as u64,
            records,
        })
    }

    async fn count_by_status(&self, status: OrderStatus) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders WHERE status = $1")
            .bind(status.code())
            .fetch_one(&self.pool)
            .await?;

        Ok(count as u64)
    }
}

struct PostgresTransaction {
    order_id: OrderId,
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl OrderTransaction for PostgresTransaction {
    fn order_id(&self) -> OrderId {
        self.order_id
    }

    async fn conditional_update_status(&mut self, update: StatusUpdate) -> Result<UpdateOutcome> {
        if update.order_id != self.order_id {
            return Err(OrderStoreError::InvalidRecord(format!(
                "transaction for {} cannot update {}",
                self.order_id, update.order_id
            )));
        }

        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 FOR UPDATE"
        ))
        .bind(update.order_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or(OrderStoreError::NotFound(update.order_id))?;
        let current = PostgresOrderStore::row_to_order(row)?;

        if current.status != update.expected {
            metrics::counter!("order_store_conditional_updates_total", "outcome" => "rejected")
                .increment(1);
            return Ok(UpdateOutcome::Rejected {
                current: current.status,
            });
        }
        validate_edge(&update)?;

        let order = current.with_update(&update);
        sqlx::query(
            r#"
            UPDATE orders SET
                status = $3, pay_status = $4, transaction_id = $5, checkout_time = $6,
                cancel_time = $7, cancel_reason = $8, rejection_reason = $9,
                dispatch_time = $10, delivery_time = $11, updated_at = $12, updated_by = $13
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(update.expected.code())
        .bind(order.status.code())
        .bind(order.pay_status.code())
        .bind(&order.transaction_id)
        .bind(order.checkout_time)
        .bind(order.cancel_time)
        .bind(&order.cancel_reason)
        .bind(&order.rejection_reason)
        .bind(order.dispatch_time)
        .bind(order.delivery_time)
        .bind(order.audit.updated_at)
        .bind(order.audit.updated_by)
        .execute(&mut *self.tx)
        .await?;

        let mut event = update.to_event();
        event.seq = insert_transition(&mut self.tx, &event).await?;

        if order.status != OrderStatus::AwaitingPayment {
            sqlx::query("DELETE FROM payment_intents WHERE order_id = $1")
                .bind(order.id.as_uuid())
                .execute(&mut *self.tx)
                .await?;
        }

        metrics::counter!("order_store_conditional_updates_total", "outcome" => "applied")
            .increment(1);
        Ok(UpdateOutcome::Applied { order, event })
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
