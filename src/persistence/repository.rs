//! Database Repository
//!
//! Data access layer for signals, orders, positions, fills, PnL and bars.

use super::models::*;
use super::{DatabaseError, DbPool};
use crate::domain::entities::market_bar::MarketBar;
use crate::domain::entities::order::{OrderSide, OrderStatus};
use crate::domain::entities::position::{apply_fill, PositionBook, PositionSnapshot};
use chrono::{DateTime, Utc};
use sqlx::Row;
use tracing::{debug, error};

fn query_error(context: &'static str) -> impl Fn(sqlx::Error) -> DatabaseError {
    move |e| {
        error!("{}: {}", context, e);
        DatabaseError::QueryError(format!("{}: {}", context, e))
    }
}

/// Signal repository
#[derive(Clone)]
pub struct SignalRepository {
    pool: DbPool,
}

impl SignalRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert a signal unless its `message_id` is already taken.
    ///
    /// # Returns
    /// `None` when the UNIQUE constraint on `message_id` rejected the row,
    /// i.e. a concurrent ingestion of the same key won.
    pub async fn insert_if_absent(
        &self,
        signal: CreateSignal,
    ) -> Result<Option<SignalRecord>, DatabaseError> {
        let record = sqlx::query_as::<_, SignalRecord>(
            r#"
            INSERT INTO signals (
                message_id, alt_id, source_url, source, author, channel_id,
                content, ticker, side, confidence, timeframe, stop, take, created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            ON CONFLICT(message_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(&signal.message_id)
        .bind(&signal.alt_id)
        .bind(&signal.source_url)
        .bind(&signal.source)
        .bind(&signal.author)
        .bind(signal.channel_id)
        .bind(&signal.content)
        .bind(&signal.ticker)
        .bind(&signal.side)
        .bind(signal.confidence)
        .bind(&signal.timeframe)
        .bind(signal.stop)
        .bind(signal.take)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error("Failed to create signal"))?;

        match &record {
            Some(r) => debug!("Created signal {} for {} ({})", r.id, r.ticker, r.message_id),
            None => debug!("Signal {} already stored", signal.message_id),
        }
        Ok(record)
    }

    /// Find a stored signal bound to `key` as message id, alternate id or URL.
    pub async fn find_by_key(&self, key: &str) -> Result<Option<SignalRecord>, DatabaseError> {
        sqlx::query_as::<_, SignalRecord>(
            r#"
            SELECT * FROM signals
            WHERE message_id = ?1 OR alt_id = ?1 OR source_url = ?1
            LIMIT 1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error("Failed to look up signal key"))
    }

    pub async fn get(&self, id: i64) -> Result<Option<SignalRecord>, DatabaseError> {
        sqlx::query_as::<_, SignalRecord>("SELECT * FROM signals WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error("Failed to get signal"))
    }

    /// Newest first
    pub async fn list_recent(&self, limit: i64) -> Result<Vec<SignalRecord>, DatabaseError> {
        sqlx::query_as::<_, SignalRecord>(
            "SELECT * FROM signals ORDER BY created_at DESC, id DESC LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(query_error("Failed to list signals"))
    }

    pub async fn count(&self) -> Result<i64, DatabaseError> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM signals")
            .fetch_one(&self.pool)
            .await
            .map_err(query_error("Failed to count signals"))?;
        Ok(row.get("count"))
    }
}

/// Order repository
#[derive(Clone)]
pub struct OrderRepository {
    pool: DbPool,
}

impl OrderRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Persist an order placed through a broker adapter.
    ///
    /// Backends that already wrote their own row (the paper ledger) are
    /// matched on `(broker, broker_order_id)` and only linked to the signal.
    pub async fn record(&self, order: CreateOrder) -> Result<OrderRecord, DatabaseError> {
        if let Some(broker_order_id) = &order.broker_order_id {
            let linked = sqlx::query_as::<_, OrderRecord>(
                r#"
                UPDATE orders
                SET signal_id = COALESCE(?1, signal_id), status = ?2, updated_at = ?3
                WHERE broker = ?4 AND broker_order_id = ?5
                RETURNING *
                "#,
            )
            .bind(order.signal_id)
            .bind(&order.status)
            .bind(Utc::now())
            .bind(&order.broker)
            .bind(broker_order_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error("Failed to link order"))?;

            if let Some(record) = linked {
                debug!("Linked order {} to signal {:?}", record.id, record.signal_id);
                return Ok(record);
            }
        }
        self.create(order).await
    }

    /// Create a new order row
    pub async fn create(&self, order: CreateOrder) -> Result<OrderRecord, DatabaseError> {
        let now = Utc::now();
        let record = sqlx::query_as::<_, OrderRecord>(
            r#"
            INSERT INTO orders (
                broker, ticker, side, qty, price, status, reason,
                broker_order_id, signal_id, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
            RETURNING *
            "#,
        )
        .bind(&order.broker)
        .bind(&order.ticker)
        .bind(&order.side)
        .bind(order.qty)
        .bind(order.price)
        .bind(&order.status)
        .bind(&order.reason)
        .bind(&order.broker_order_id)
        .bind(order.signal_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(query_error("Failed to create order"))?;

        debug!(
            "Created order {} ({} {} {} via {})",
            record.id, record.side, record.qty, record.ticker, record.broker
        );
        Ok(record)
    }

    /// Newest first
    pub async fn list(&self, limit: i64) -> Result<Vec<OrderRecord>, DatabaseError> {
        sqlx::query_as::<_, OrderRecord>(
            "SELECT * FROM orders ORDER BY created_at DESC, id DESC LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(query_error("Failed to list orders"))
    }

    pub async fn find_by_broker_order_id(
        &self,
        broker: &str,
        broker_order_id: &str,
    ) -> Result<Option<OrderRecord>, DatabaseError> {
        sqlx::query_as::<_, OrderRecord>(
            "SELECT * FROM orders WHERE broker = ?1 AND broker_order_id = ?2",
        )
        .bind(broker)
        .bind(broker_order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error("Failed to find order"))
    }

    /// Orders of `broker` that carry a broker id and are not yet terminal
    pub async fn list_reconcilable(&self, broker: &str) -> Result<Vec<OrderRecord>, DatabaseError> {
        let terminal = OrderStatus::CANONICAL
            .iter()
            .filter(|s| s.is_terminal())
            .map(|s| format!("'{}'", s.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT * FROM orders WHERE broker = ?1 AND broker_order_id IS NOT NULL \
             AND status NOT IN ({}) ORDER BY id",
            terminal
        );

        sqlx::query_as::<_, OrderRecord>(&sql)
            .bind(broker)
            .fetch_all(&self.pool)
            .await
            .map_err(query_error("Failed to list open orders"))
    }

    pub async fn update_status(&self, id: i64, status: &OrderStatus) -> Result<(), DatabaseError> {
        let rows_affected = sqlx::query("UPDATE orders SET status = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(status.as_str())
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(query_error("Failed to update order status"))?
            .rows_affected();

        if rows_affected == 0 {
            return Err(DatabaseError::QueryError(format!("Order not found: {}", id)));
        }

        debug!("Order {} -> {}", id, status);
        Ok(())
    }
}

/// Position repository
#[derive(Clone)]
pub struct PositionRepository {
    pool: DbPool,
}

impl PositionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, ticker: &str) -> Result<Option<PositionRecord>, DatabaseError> {
        sqlx::query_as::<_, PositionRecord>("SELECT * FROM positions WHERE ticker = ?1")
            .bind(ticker)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error("Failed to get position"))
    }

    pub async fn list(&self) -> Result<Vec<PositionRecord>, DatabaseError> {
        sqlx::query_as::<_, PositionRecord>("SELECT * FROM positions ORDER BY ticker")
            .fetch_all(&self.pool)
            .await
            .map_err(query_error("Failed to list positions"))
    }

    /// Replace the stored ledger with a broker's live book.
    pub async fn mirror(&self, book: &PositionBook) -> Result<(), DatabaseError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(query_error("Failed to begin position mirror"))?;

        sqlx::query("DELETE FROM positions")
            .execute(&mut *tx)
            .await
            .map_err(query_error("Failed to clear positions"))?;

        let now = Utc::now();
        for (ticker, snapshot) in book.iter().filter(|(_, s)| s.qty != 0.0) {
            sqlx::query(
                "INSERT INTO positions (ticker, qty, avg_price, updated_at) VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(ticker)
            .bind(snapshot.qty)
            .bind(snapshot.avg_price)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(query_error("Failed to mirror position"))?;
        }

        tx.commit()
            .await
            .map_err(query_error("Failed to commit position mirror"))?;

        debug!("Mirrored {} positions", book.len());
        Ok(())
    }
}

/// Execution repository
#[derive(Clone)]
pub struct ExecutionRepository {
    pool: DbPool,
}

impl ExecutionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Newest first
    pub async fn list(&self, limit: i64) -> Result<Vec<ExecutionRecord>, DatabaseError> {
        sqlx::query_as::<_, ExecutionRecord>(
            "SELECT * FROM executions ORDER BY executed_at DESC, id DESC LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(query_error("Failed to list executions"))
    }
}

/// Daily PnL repository
#[derive(Clone)]
pub struct PnlRepository {
    pool: DbPool,
}

impl PnlRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// All snapshots, oldest first
    pub async fn list(&self) -> Result<Vec<PnlRecord>, DatabaseError> {
        sqlx::query_as::<_, PnlRecord>("SELECT * FROM pnl ORDER BY date")
            .fetch_all(&self.pool)
            .await
            .map_err(query_error("Failed to list pnl"))
    }

    /// Overwrite the snapshot for `date`
    pub async fn upsert(
        &self,
        date: &str,
        realized: f64,
        unrealized: f64,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO pnl (date, realized, unrealized) VALUES (?1, ?2, ?3)
            ON CONFLICT(date) DO UPDATE SET realized = excluded.realized,
                                            unrealized = excluded.unrealized
            "#,
        )
        .bind(date)
        .bind(realized)
        .bind(unrealized)
        .execute(&self.pool)
        .await
        .map_err(query_error("Failed to upsert pnl"))?;
        Ok(())
    }
}

/// Market bar repository
#[derive(Clone)]
pub struct MarketBarRepository {
    pool: DbPool,
}

impl MarketBarRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert bars, skipping any (symbol, timeframe, ts) already stored.
    ///
    /// # Returns
    /// Number of rows actually inserted
    pub async fn upsert_skip(&self, bars: &[MarketBar]) -> Result<u64, DatabaseError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(query_error("Failed to begin bar insert"))?;

        let mut inserted = 0;
        for bar in bars {
            inserted += sqlx::query(
                r#"
                INSERT INTO market_bars (symbol, timeframe, ts, open, high, low, close, volume)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT(symbol, timeframe, ts) DO NOTHING
                "#,
            )
            .bind(&bar.symbol)
            .bind(&bar.timeframe)
            .bind(bar.ts)
            .bind(bar.open)
            .bind(bar.high)
            .bind(bar.low)
            .bind(bar.close)
            .bind(bar.volume)
            .execute(&mut *tx)
            .await
            .map_err(query_error("Failed to insert market bar"))?
            .rows_affected();
        }

        tx.commit()
            .await
            .map_err(query_error("Failed to commit market bars"))?;

        debug!("Stored {} of {} bars", inserted, bars.len());
        Ok(inserted)
    }

    /// Bars in `[start, end]`, oldest first
    pub async fn range(
        &self,
        symbol: &str,
        timeframe: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MarketBar>, DatabaseError> {
        let records = sqlx::query_as::<_, MarketBarRecord>(
            r#"
            SELECT * FROM market_bars
            WHERE symbol = ?1 AND timeframe = ?2 AND ts >= ?3 AND ts <= ?4
            ORDER BY ts
            "#,
        )
        .bind(symbol)
        .bind(timeframe)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .map_err(query_error("Failed to load market bars"))?;

        Ok(records.into_iter().map(MarketBar::from).collect())
    }
}

/// Result of one simulated fill
#[derive(Debug, Clone)]
pub struct PaperFill {
    pub order: OrderRecord,
    pub position: Option<PositionSnapshot>,
    pub realized: f64,
}

/// Ledger writes for the paper simulator.
#[derive(Clone)]
pub struct PaperLedgerRepository {
    pool: DbPool,
}

impl PaperLedgerRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Book a fill atomically: FILLED order row, position update (row removed
    /// when flat), execution row, and realized PnL for today.
    pub async fn record_fill(
        &self,
        broker: &str,
        ticker: &str,
        side: OrderSide,
        qty: f64,
        price: f64,
    ) -> Result<PaperFill, DatabaseError> {
        let now = Utc::now();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(query_error("Failed to begin paper fill"))?;

        let mut order = sqlx::query_as::<_, OrderRecord>(
            r#"
            INSERT INTO orders (broker, ticker, side, qty, price, status, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
            RETURNING *
            "#,
        )
        .bind(broker)
        .bind(ticker)
        .bind(side.as_str())
        .bind(qty)
        .bind(price)
        .bind(OrderStatus::Filled.as_str())
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(query_error("Failed to create paper order"))?;

        let broker_order_id = order.id.to_string();
        sqlx::query("UPDATE orders SET broker_order_id = ?1 WHERE id = ?2")
            .bind(&broker_order_id)
            .bind(order.id)
            .execute(&mut *tx)
            .await
            .map_err(query_error("Failed to tag paper order"))?;
        order.broker_order_id = Some(broker_order_id);

        let existing =
            sqlx::query_as::<_, PositionRecord>("SELECT * FROM positions WHERE ticker = ?1")
                .bind(ticker)
                .fetch_optional(&mut *tx)
                .await
                .map_err(query_error("Failed to read position"))?;

        let effect = apply_fill(
            existing.as_ref().map(PositionRecord::snapshot),
            qty * side.sign(),
            price,
        );

        match effect.position {
            Some(position) => {
                sqlx::query(
                    r#"
                    INSERT INTO positions (ticker, qty, avg_price, updated_at)
                    VALUES (?1, ?2, ?3, ?4)
                    ON CONFLICT(ticker) DO UPDATE SET qty = excluded.qty,
                                                      avg_price = excluded.avg_price,
                                                      updated_at = excluded.updated_at
                    "#,
                )
                .bind(ticker)
                .bind(position.qty)
                .bind(position.avg_price)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(query_error("Failed to update position"))?;
            }
            None => {
                sqlx::query("DELETE FROM positions WHERE ticker = ?1")
                    .bind(ticker)
                    .execute(&mut *tx)
                    .await
                    .map_err(query_error("Failed to remove flat position"))?;
            }
        }

        sqlx::query(
            r#"
            INSERT INTO executions (order_id, ticker, side, qty, price, executed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(order.id)
        .bind(ticker)
        .bind(side.as_str())
        .bind(qty)
        .bind(price)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(query_error("Failed to record execution"))?;

        if effect.realized != 0.0 {
            sqlx::query(
                r#"
                INSERT INTO pnl (date, realized, unrealized) VALUES (?1, ?2, 0.0)
                ON CONFLICT(date) DO UPDATE SET realized = pnl.realized + excluded.realized
                "#,
            )
            .bind(now.format("%Y-%m-%d").to_string())
            .bind(effect.realized)
            .execute(&mut *tx)
            .await
            .map_err(query_error("Failed to book realized pnl"))?;
        }

        tx.commit()
            .await
            .map_err(query_error("Failed to commit paper fill"))?;

        debug!(
            "Paper fill {} {} {} @ {} (realized {:.2})",
            side, qty, ticker, price, effect.realized
        );

        Ok(PaperFill {
            order,
            position: effect.position,
            realized: effect.realized,
        })
    }
}
