//! # Postgres Repositories
//!
//! sqlx-backed implementations of [`UserRepository`], [`OrderRepository`] and
//! [`IntentRepository`]. Carts, line items and addresses are JSONB columns.
//! Listings follow `orders.seq`, which preserves insertion order.
//!
//! Migrations are embedded from `crates/bistro-core/migrations/` and applied
//! by [`run_migrations`].

use crate::cart::CartData;
use crate::identity::Role;
use crate::intent::{CheckoutIntent, CheckoutStep, IntentRepository};
use crate::order::{DeliveryAddress, Order, OrderLineItem, OrderStatus};
use crate::store::{
    DiscardOutcome, OrderRepository, StoreError, StoreResult, UserRecord, UserRepository,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use std::time::Duration;
use tracing::{info, warn};

const STEPS: [CheckoutStep; 4] = [
    CheckoutStep::Claimed,
    CheckoutStep::OrderPersisted,
    CheckoutStep::CartCleared,
    CheckoutStep::SessionIssued,
];

/// Attempts at claiming a key whose holder vanishes between insert and read
const CLAIM_ATTEMPTS: usize = 3;

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Duplicate(db.message().to_string())
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                StoreError::Corrupt(err.to_string())
            }
            _ => StoreError::Unavailable(err.to_string()),
        }
    }
}

/// Open a connection pool
pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Apply pending migrations
pub async fn run_migrations(pool: &PgPool) -> StoreResult<()> {
    info!("running database migrations");
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| StoreError::Unavailable(format!("migration failed: {}", e)))?;
    info!("database migrations complete");
    Ok(())
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Admin => "admin",
    }
}

fn parse_role(value: &str) -> StoreResult<Role> {
    match value {
        "user" => Ok(Role::User),
        "admin" => Ok(Role::Admin),
        other => Err(StoreError::Corrupt(format!("unknown role: {}", other))),
    }
}

// =============================================================================
// Rows
// =============================================================================

#[derive(Debug, FromRow)]
struct UserRow {
    id: String,
    name: String,
    email: String,
    role: String,
    cart_data: Json<CartData>,
}

impl TryFrom<UserRow> for UserRecord {
    type Error = StoreError;

    fn try_from(row: UserRow) -> StoreResult<Self> {
        Ok(UserRecord {
            role: parse_role(&row.role)?,
            id: row.id,
            name: row.name,
            email: row.email,
            cart_data: row.cart_data.0,
        })
    }
}

#[derive(Debug, FromRow)]
struct OrderRow {
    id: String,
    user_id: String,
    items: Json<Vec<OrderLineItem>>,
    amount: f64,
    address: Json<serde_json::Value>,
    status: String,
    payment: bool,
    date: DateTime<Utc>,
}

impl From<OrderRow> for Order {
    fn from(row: OrderRow) -> Self {
        Order {
            id: row.id,
            user_id: row.user_id,
            items: row.items.0,
            amount: row.amount,
            address: DeliveryAddress(row.address.0),
            status: OrderStatus::from(row.status),
            payment: row.payment,
            date: row.date,
        }
    }
}

#[derive(Debug, FromRow)]
struct IntentRow {
    order_id: String,
    user_id: String,
    idempotency_key: Option<String>,
    step: String,
    session_id: Option<String>,
    session_expires_at: Option<DateTime<Utc>>,
    gateway_failures: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<IntentRow> for CheckoutIntent {
    type Error = StoreError;

    fn try_from(row: IntentRow) -> StoreResult<Self> {
        let gateway_failures = u32::try_from(row.gateway_failures).map_err(|_| {
            StoreError::Corrupt(format!("negative gateway failures: {}", row.gateway_failures))
        })?;
        Ok(CheckoutIntent {
            step: row.step.parse()?,
            order_id: row.order_id,
            user_id: row.user_id,
            idempotency_key: row.idempotency_key,
            session_id: row.session_id,
            session_expires_at: row.session_expires_at,
            gateway_failures,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

// =============================================================================
// Users
// =============================================================================

#[derive(Debug, Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn find(&self, user_id: &str) -> StoreResult<Option<UserRecord>> {
        sqlx::query_as::<_, UserRow>(
            r"SELECT id, name, email, role, cart_data FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .map(UserRecord::try_from)
        .transpose()
    }

    async fn save_cart(&self, user_id: &str, cart: CartData) -> StoreResult<bool> {
        let result = sqlx::query(r"UPDATE users SET cart_data = $2 WHERE id = $1")
            .bind(user_id)
            .bind(Json(&cart))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn upsert(&self, user: UserRecord) -> StoreResult<()> {
        sqlx::query(
            r"
            INSERT INTO users (id, name, email, role, cart_data)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                email = EXCLUDED.email,
                role = EXCLUDED.role,
                cart_data = EXCLUDED.cart_data
            ",
        )
        .bind(&user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(role_name(user.role))
        .bind(Json(&user.cart_data))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// =============================================================================
// Orders
// =============================================================================

const ORDER_COLUMNS: &str = "id, user_id, items, amount, address, status, payment, date";

#[derive(Debug, Clone)]
pub struct PgOrderRepository {
    pool: PgPool,
}

impl PgOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_all(&self, sql: &str, bind: Option<&str>) -> StoreResult<Vec<Order>> {
        let mut query = sqlx::query_as::<_, OrderRow>(sql);
        if let Some(value) = bind {
            query = query.bind(value.to_string());
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Order::from).collect())
    }
}

#[async_trait]
impl OrderRepository for PgOrderRepository {
    async fn insert(&self, order: Order) -> StoreResult<()> {
        sqlx::query(
            r"
            INSERT INTO orders (id, user_id, items, amount, address, status, payment, date)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ",
        )
        .bind(&order.id)
        .bind(&order.user_id)
        .bind(Json(&order.items))
        .bind(order.amount)
        .bind(Json(&order.address.0))
        .bind(order.status.as_str())
        .bind(order.payment)
        .bind(order.date)
        .execute(&self.pool)
        .await
        .map_err(|e| match StoreError::from(e) {
            StoreError::Duplicate(_) => StoreError::Duplicate(order.id.clone()),
            other => other,
        })?;
        Ok(())
    }

    async fn get(&self, order_id: &str) -> StoreResult<Option<Order>> {
        let sql = format!("SELECT {} FROM orders WHERE id = $1", ORDER_COLUMNS);
        let row = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Order::from))
    }

    async fn list_by_owner(&self, user_id: &str) -> StoreResult<Vec<Order>> {
        let sql = format!(
            "SELECT {} FROM orders WHERE user_id = $1 ORDER BY seq",
            ORDER_COLUMNS
        );
        self.fetch_all(&sql, Some(user_id)).await
    }

    async fn list_all(&self) -> StoreResult<Vec<Order>> {
        let sql = format!("SELECT {} FROM orders ORDER BY seq", ORDER_COLUMNS);
        self.fetch_all(&sql, None).await
    }

    async fn mark_paid(&self, order_id: &str) -> StoreResult<Option<bool>> {
        // Row lock serializes concurrent callbacks; the second one sees payment = true
        let was_paid = sqlx::query_scalar::<_, bool>(
            r"
            WITH prev AS (
                SELECT id, payment FROM orders WHERE id = $1 FOR UPDATE
            )
            UPDATE orders SET payment = TRUE
            FROM prev
            WHERE orders.id = prev.id
            RETURNING prev.payment
            ",
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(was_paid)
    }

    async fn delete_unpaid(&self, order_id: &str) -> StoreResult<DiscardOutcome> {
        let sql = format!(
            "DELETE FROM orders WHERE id = $1 AND payment = FALSE RETURNING {}",
            ORDER_COLUMNS
        );
        let deleted = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;
        if let Some(row) = deleted {
            return Ok(DiscardOutcome::Deleted(Order::from(row)));
        }

        let paid = sqlx::query_scalar::<_, bool>(r"SELECT payment FROM orders WHERE id = $1")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;
        match paid {
            Some(true) => Ok(DiscardOutcome::AlreadyPaid),
            Some(false) => Err(StoreError::Unavailable(format!(
                "order {} changed during delete",
                order_id
            ))),
            None => Ok(DiscardOutcome::Missing),
        }
    }

    async fn set_status(&self, order_id: &str, status: OrderStatus) -> StoreResult<bool> {
        let result = sqlx::query(r"UPDATE orders SET status = $2 WHERE id = $1")
            .bind(order_id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn pending_before(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<Order>> {
        let sql = format!(
            "SELECT {} FROM orders WHERE payment = FALSE AND date < $1 ORDER BY seq",
            ORDER_COLUMNS
        );
        let rows = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Order::from).collect())
    }
}

// =============================================================================
// Checkout intents
// =============================================================================

const INTENT_COLUMNS: &str = "order_id, user_id, idempotency_key, step, session_id, \
                              session_expires_at, gateway_failures, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PgIntentRepository {
    pool: PgPool,
}

impl PgIntentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_by_key(
        &self,
        user_id: &str,
        key: &str,
    ) -> StoreResult<Option<CheckoutIntent>> {
        let sql = format!(
            "SELECT {} FROM checkout_intents WHERE user_id = $1 AND idempotency_key = $2",
            INTENT_COLUMNS
        );
        sqlx::query_as::<_, IntentRow>(&sql)
            .bind(user_id)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?
            .map(CheckoutIntent::try_from)
            .transpose()
    }
}

#[async_trait]
impl IntentRepository for PgIntentRepository {
    async fn claim(&self, intent: CheckoutIntent) -> StoreResult<Option<CheckoutIntent>> {
        for _ in 0..CLAIM_ATTEMPTS {
            let inserted = sqlx::query(
                r"
                INSERT INTO checkout_intents (
                    order_id, user_id, idempotency_key, step, session_id,
                    session_expires_at, gateway_failures, created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (user_id, idempotency_key) WHERE idempotency_key IS NOT NULL
                DO NOTHING
                ",
            )
            .bind(&intent.order_id)
            .bind(&intent.user_id)
            .bind(intent.idempotency_key.as_deref())
            .bind(intent.step.as_str())
            .bind(intent.session_id.as_deref())
            .bind(intent.session_expires_at)
            .bind(i32::try_from(intent.gateway_failures).unwrap_or(i32::MAX))
            .bind(intent.created_at)
            .bind(intent.updated_at)
            .execute(&self.pool)
            .await?;
            if inserted.rows_affected() == 1 {
                return Ok(None);
            }

            let Some(key) = intent.idempotency_key.as_deref() else {
                return Err(StoreError::Duplicate(intent.order_id.clone()));
            };
            if let Some(held) = self.find_by_key(&intent.user_id, key).await? {
                return Ok(Some(held));
            }
            // Holder removed between the insert and the read
        }
        warn!(order_id = %intent.order_id, "idempotency key claim kept colliding");
        Err(StoreError::Unavailable("idempotency key claim did not settle".to_string()))
    }

    async fn get(&self, order_id: &str) -> StoreResult<Option<CheckoutIntent>> {
        let sql = format!(
            "SELECT {} FROM checkout_intents WHERE order_id = $1",
            INTENT_COLUMNS
        );
        sqlx::query_as::<_, IntentRow>(&sql)
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?
            .map(CheckoutIntent::try_from)
            .transpose()
    }

    async fn advance(&self, order_id: &str, step: CheckoutStep) -> StoreResult<()> {
        let earlier: Vec<String> = STEPS
            .iter()
            .filter(|s| **s < step)
            .map(|s| s.as_str().to_string())
            .collect();
        sqlx::query(
            r"
            UPDATE checkout_intents
            SET step = CASE WHEN step = ANY($3) THEN $2 ELSE step END,
                updated_at = $4
            WHERE order_id = $1
            ",
        )
        .bind(order_id)
        .bind(step.as_str())
        .bind(earlier)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_session(
        &self,
        order_id: &str,
        session_id: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()> {
        sqlx::query(
            r"
            UPDATE checkout_intents
            SET step = $2, session_id = $3, session_expires_at = $4, updated_at = $5
            WHERE order_id = $1
            ",
        )
        .bind(order_id)
        .bind(CheckoutStep::SessionIssued.as_str())
        .bind(session_id)
        .bind(expires_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_gateway_failure(&self, order_id: &str) -> StoreResult<()> {
        sqlx::query(
            r"
            UPDATE checkout_intents
            SET gateway_failures = gateway_failures + 1, updated_at = $2
            WHERE order_id = $1
            ",
        )
        .bind(order_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, order_id: &str) -> StoreResult<()> {
        sqlx::query(r"DELETE FROM checkout_intents WHERE order_id = $1")
            .bind(order_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list(&self) -> StoreResult<Vec<CheckoutIntent>> {
        let sql = format!(
            "SELECT {} FROM checkout_intents ORDER BY created_at",
            INTENT_COLUMNS
        );
        sqlx::query_as::<_, IntentRow>(&sql)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(CheckoutIntent::try_from)
            .collect()
    }
}
