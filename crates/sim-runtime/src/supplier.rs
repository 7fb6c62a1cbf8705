//! Upstream component suppliers: thin firms that track one commodity and
//! quote a derived product price for the pricing firms downstream.

use rust_decimal::Decimal;
use sim_core::{decode, FirmQuote, MarketMessage, SupplierConfig};
use sim_econ::half_up;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::bus::Topic;

/// A supplier converting its source commodity into a component quote.
pub struct SupplierEngine {
    cfg: SupplierConfig,
    topic: Topic,
    last_source: Option<Decimal>,
}

impl SupplierEngine {
    pub fn new(cfg: SupplierConfig, topic: Topic) -> Self {
        Self {
            cfg,
            topic,
            last_source: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.cfg.name
    }

    pub fn last_source(&self) -> Option<Decimal> {
        self.last_source
    }

    /// Quote a derived price whenever the source commodity moves; all other
    /// traffic is ignored.
    pub fn handle(&mut self, message: &MarketMessage) -> Option<FirmQuote> {
        let MarketMessage::Commodity(price) = message else {
            return None;
        };
        if price.material != self.cfg.source {
            return None;
        }
        self.last_source = Some(price.value);
        let derived = half_up(
            price.value * self.cfg.conversion_factor * (Decimal::ONE + self.cfg.margin),
            2,
        );
        Some(FirmQuote {
            firm: self.cfg.name.clone(),
            product: self.cfg.product,
            date: price.date,
            revenue: derived,
            profit: Decimal::ZERO,
            production_cost: Decimal::ZERO,
            units_sold: 0,
        })
    }

    /// Actor loop: consume the topic until it closes.
    pub async fn run(mut self, mut inbox: broadcast::Receiver<String>) -> Self {
        loop {
            match inbox.recv().await {
                Ok(raw) => {
                    if let Some(message) = decode(&raw) {
                        if let Some(quote) = self.handle(&message) {
                            self.topic.publish(&MarketMessage::Quote(quote));
                        }
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(supplier = %self.cfg.name, missed, "inbox lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
        info!(supplier = %self.cfg.name, "supplier stopped");
        self
    }
}
