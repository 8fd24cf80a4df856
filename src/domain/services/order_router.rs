//! OrderRouter service - from raw message to persisted signal and order
//!
//! Extract -> keys -> attribution -> dedup -> persist Signal -> (gate ->
//! risk -> broker -> persist Order). The order leg is best-effort: every
//! failure past the Signal insert is logged and the ingestion still succeeds.

use std::sync::Arc;
use tracing::{error, info, warn};

use crate::domain::entities::order::{OrderRequest, OrderResult, OrderStatus};
use crate::domain::entities::signal::{RawMessage, SignalIntent};
use crate::domain::errors::{BrokerError, IngestError, OrderError};
use crate::domain::repositories::broker_adapter::BrokerAdapter;
use crate::domain::services::deduplicator::{DedupKeys, Deduplicator};
use crate::domain::services::risk_guard::RiskGuard;
use crate::domain::services::signal_extractor::SignalExtractor;
use crate::persistence::models::{CreateOrder, CreateSignal, OrderRecord, SignalRecord};
use crate::persistence::repository::{OrderRepository, SignalRepository};
use crate::persistence::DbPool;

/// Automatic execution settings
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub auto_trade_enabled: bool,
    pub min_confidence: f64,
    pub default_order_qty: f64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            auto_trade_enabled: false,
            min_confidence: 0.7,
            default_order_qty: 1.0,
        }
    }
}

/// Successful ingestion
#[derive(Debug, Clone)]
pub enum IngestOutcome {
    Created {
        signal: SignalRecord,
        order: Option<OrderRecord>,
    },
    /// Already ingested; nothing was written
    Duplicate,
}

pub struct OrderRouter {
    config: RouterConfig,
    extractor: SignalExtractor,
    deduplicator: Deduplicator,
    risk_guard: RiskGuard,
    broker: Arc<dyn BrokerAdapter>,
    signals: SignalRepository,
    orders: OrderRepository,
}

impl OrderRouter {
    pub fn new(
        config: RouterConfig,
        extractor: SignalExtractor,
        risk_guard: RiskGuard,
        broker: Arc<dyn BrokerAdapter>,
        pool: DbPool,
    ) -> Self {
        let signals = SignalRepository::new(pool.clone());
        Self {
            config,
            extractor,
            deduplicator: Deduplicator::new(signals.clone()),
            risk_guard,
            broker,
            signals,
            orders: OrderRepository::new(pool),
        }
    }

    pub fn broker(&self) -> &Arc<dyn BrokerAdapter> {
        &self.broker
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Ingest one `{text, source, meta}` message.
    pub async fn ingest(&self, message: RawMessage) -> Result<IngestOutcome, IngestError> {
        let intent = self
            .extractor
            .extract(&message.text)
            .await
            .ok_or(IngestError::Extraction)?;

        let keys = DedupKeys::from_message(&message);

        if self.deduplicator.is_duplicate_message(&keys).await? {
            info!("Duplicate signal {} from {}", keys.primary, message.source);
            return Ok(IngestOutcome::Duplicate);
        }

        let create = CreateSignal {
            message_id: keys.primary.clone(),
            alt_id: keys.alt_id.clone(),
            source_url: keys.url.clone(),
            source: message.source.clone(),
            author: message.author(),
            channel_id: message.channel_id(),
            content: message.stored_content(),
            ticker: intent.ticker.clone(),
            side: intent.side.to_string(),
            confidence: intent.confidence,
            timeframe: intent.timeframe.clone(),
            stop: intent.stop,
            take: intent.take,
        };

        // A concurrent ingestion of the same key lost the UNIQUE race
        let Some(signal) = self.signals.insert_if_absent(create).await? else {
            info!("Duplicate signal {} (concurrent insert)", keys.primary);
            return Ok(IngestOutcome::Duplicate);
        };

        info!(
            "✓ Signal {} stored: {} {} by {} (confidence {:?})",
            signal.id, signal.side, signal.ticker, signal.author, signal.confidence
        );

        let order = if self.should_auto_trade(&intent) {
            self.auto_order(&intent, signal.id).await
        } else {
            None
        };

        Ok(IngestOutcome::Created { signal, order })
    }

    fn should_auto_trade(&self, intent: &SignalIntent) -> bool {
        self.config.auto_trade_enabled
            && intent
                .confidence
                .map_or(false, |c| c >= self.config.min_confidence)
    }

    /// Risk check, market order, persist. Never fails the ingestion.
    async fn auto_order(&self, intent: &SignalIntent, signal_id: i64) -> Option<OrderRecord> {
        let qty = self.config.default_order_qty;
        let delta = qty * intent.side.sign();

        match self
            .risk_guard
            .can_open(self.broker.as_ref(), &intent.ticker, delta)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                warn!(
                    "Risk rejected auto order for signal {}: {} {} {}",
                    signal_id, intent.side, qty, intent.ticker
                );
                return None;
            }
            Err(e) => {
                error!(
                    "[{}] Risk check failed for signal {}: {}",
                    e.error_code(),
                    signal_id,
                    e
                );
                return None;
            }
        }

        let result = match OrderRequest::market(&intent.ticker, intent.side, qty) {
            Ok(request) => self.broker.place_order(&request).await,
            Err(e) => Err(e),
        };

        let create = match result {
            Ok(result) => {
                info!(
                    "✓ Auto order via {}: {} {} {} -> {}",
                    result.broker, result.side, result.qty, result.ticker, result.status
                );
                CreateOrder::from_result(&result, Some(signal_id))
            }
            Err(e) => {
                error!(
                    "[{}] Auto order failed for signal {}: {}",
                    e.error_code(),
                    signal_id,
                    e
                );
                self.rejected_order(intent, qty, &e, signal_id)
            }
        };

        match self.orders.record(create).await {
            Ok(order) => Some(order),
            Err(e) => {
                error!("Failed to persist auto order for signal {}: {}", signal_id, e);
                None
            }
        }
    }

    fn rejected_order(
        &self,
        intent: &SignalIntent,
        qty: f64,
        err: &BrokerError,
        signal_id: i64,
    ) -> CreateOrder {
        CreateOrder {
            broker: self.broker.name().to_string(),
            ticker: intent.ticker.clone(),
            side: intent.side.to_string(),
            qty,
            price: None,
            status: OrderStatus::Rejected.to_string(),
            reason: Some(err.to_string()),
            broker_order_id: None,
            signal_id: Some(signal_id),
        }
    }

    /// Explicit order: broker errors reach the caller, nothing is absorbed.
    pub async fn place_manual(&self, request: &OrderRequest) -> Result<OrderRecord, OrderError> {
        let result: OrderResult = self.broker.place_order(request).await?;
        info!(
            "✓ Manual order via {}: {} {} {} -> {}",
            result.broker, result.side, result.qty, result.ticker, result.status
        );
        Ok(self.orders.record(CreateOrder::from_result(&result, None)).await?)
    }
}
