//! One firm's pricing engine: readiness gating, one-time base price,
//! offered-price derivation with loss recovery, monthly accrual, and
//! deficit suppression.

use chrono::{Months, NaiveDate};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use sim_core::{
    decode, FirmConfig, FirmQuote, MarketConfig, MarketMessage, MarketSnapshot, Material,
    ProductKind,
};
use sim_econ::{half_down, half_up, CostModel, EconError, InputPrices, Recovery};
use std::collections::BTreeMap;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::bus::Topic;

/// Private state of one competing firm.
///
/// Owned exclusively by its actor task; mutated only by [`handle`], one
/// message at a time.
///
/// [`handle`]: FirmPricingEngine::handle
pub struct FirmPricingEngine {
    cfg: FirmConfig,
    model: CostModel,
    month_ticks: u32,
    topic: Topic,
    /// Latest observed value per material.
    materials: BTreeMap<Material, Decimal>,
    plastic_price: Option<Decimal>,
    component_price: Option<Decimal>,
    /// Allocated units per tick; bootstrapped from the configured estimate
    /// until the first snapshot names this firm.
    share_volume: Decimal,
    /// Zero until established; immutable afterwards.
    base_price: Decimal,
    production_cost: Decimal,
    units_sold: Decimal,
    cumulative_profit: Decimal,
    period_marker: Option<NaiveDate>,
    next_month_marker: Option<NaiveDate>,
}

impl FirmPricingEngine {
    pub fn new(cfg: FirmConfig, market: &MarketConfig, topic: Topic) -> Result<Self, EconError> {
        let share_volume =
            sim_econ::bootstrap_share_volume(cfg.estimated_market_volume, market.month_ticks)?;
        let model = CostModel::from_config(&cfg);
        Ok(Self {
            cfg,
            model,
            month_ticks: market.month_ticks,
            topic,
            materials: BTreeMap::new(),
            plastic_price: None,
            component_price: None,
            share_volume,
            base_price: Decimal::ZERO,
            production_cost: Decimal::ZERO,
            units_sold: Decimal::ZERO,
            cumulative_profit: Decimal::ZERO,
            period_marker: None,
            next_month_marker: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.cfg.name
    }

    /// Established base price; zero until the first full pricing pass.
    pub fn base_price(&self) -> Decimal {
        self.base_price
    }

    pub fn cumulative_profit(&self) -> Decimal {
        self.cumulative_profit
    }

    pub fn share_volume(&self) -> Decimal {
        self.share_volume
    }

    /// Advance the state machine with one decoded message. A publishable
    /// quote comes back only when the firm is fully informed and the
    /// message's date advances the accounting period.
    pub fn handle(&mut self, message: &MarketMessage) -> Option<FirmQuote> {
        match message {
            MarketMessage::Commodity(price) => {
                self.materials.insert(price.material, price.value);
                None
            }
            MarketMessage::Shares(snapshot) => {
                self.apply_snapshot(snapshot);
                None
            }
            MarketMessage::Quote(quote) => self.on_quote(quote),
        }
    }

    fn apply_snapshot(&mut self, snapshot: &MarketSnapshot) {
        let month_volume = snapshot
            .entry_for(&self.cfg.name)
            .map(|e| e.volume)
            .unwrap_or(0);
        match sim_econ::per_tick_volume(month_volume, self.month_ticks) {
            Ok(volume) => self.share_volume = volume,
            Err(error) => warn!(firm = %self.cfg.name, %error, "share update skipped"),
        }
    }

    fn on_quote(&mut self, quote: &FirmQuote) -> Option<FirmQuote> {
        match quote.product {
            ProductKind::MoldedPlastic => self.plastic_price = Some(quote.revenue),
            ProductKind::ElectronicPart => self.component_price = Some(quote.revenue),
            ProductKind::MobilePhone => {}
        }
        if self.period_marker.is_none() {
            self.period_marker = Some(quote.date);
            self.next_month_marker = quote.date.checked_add_months(Months::new(1));
        }
        if !self.ready() {
            return None;
        }
        self.price_period(quote.date)
    }

    /// All required inputs observed at least once and a non-zero share.
    fn ready(&self) -> bool {
        self.plastic_price.is_some()
            && self.component_price.is_some()
            && !self.share_volume.is_zero()
            && self
                .model
                .composition
                .keys()
                .all(|m| self.materials.contains_key(m))
    }

    fn price_period(&mut self, date: NaiveDate) -> Option<FirmQuote> {
        let prices = InputPrices {
            materials: &self.materials,
            plastic: self.plastic_price?,
            component: self.component_price?,
        };
        let breakdown =
            match sim_econ::unit_production_cost(&self.model, prices, self.share_volume) {
                Ok(b) => b,
                Err(error) => {
                    warn!(firm = %self.cfg.name, %error, "pricing skipped this period");
                    return None;
                }
            };
        self.production_cost = breakdown.unit_cost;
        self.units_sold = breakdown.units_sold;
        if self.base_price.is_zero() {
            self.base_price = breakdown.unit_cost * self.cfg.markup_bonus;
            info!(firm = %self.cfg.name, base = %self.base_price, "base price established");
        }

        let mut revenue = self
            .base_price
            .round_dp_with_strategy(2, RoundingStrategy::AwayFromZero);
        let mut profit = half_up((revenue - self.production_cost) * self.units_sold, 2);
        if profit < Decimal::ZERO {
            match sim_econ::loss_recovery_price(
                &self.model,
                prices,
                self.share_volume,
                self.base_price,
                self.cfg.price_adjustment_step,
                self.cfg.markup_bonus,
            ) {
                Ok(Recovery::Accepted { price, unit_cost }) => {
                    // Offered price drops below base; the cost carried into
                    // profit is the one from the accepted attempt, while
                    // units stay at the real allocation.
                    self.production_cost = unit_cost;
                    revenue = half_down(price, 2);
                    profit = half_up((price - unit_cost) * self.units_sold, 2);
                }
                Ok(Recovery::Exhausted) => {
                    debug!(firm = %self.cfg.name, "no viable discounted price, zero period");
                    revenue = Decimal::ZERO;
                    profit = Decimal::ZERO;
                }
                Err(error) => {
                    warn!(firm = %self.cfg.name, %error, "recovery skipped this period");
                    return None;
                }
            }
        }

        // The period is finalized only when the quote's date moves past the
        // current marker; same-day traffic just refreshes the figures.
        let marker = self.period_marker?;
        if date <= marker {
            return None;
        }
        if let Some(next_month) = self.next_month_marker {
            if next_month < marker {
                profit -= self.cfg.monthly_fixed_cost;
                self.next_month_marker = next_month.checked_add_months(Months::new(1));
            }
        }
        self.cumulative_profit += profit;
        self.period_marker = Some(date);
        if self.cumulative_profit <= self.cfg.max_deficit {
            debug!(
                firm = %self.cfg.name,
                cumulative = %self.cumulative_profit,
                "deficit floor reached, output suppressed"
            );
            revenue = Decimal::ZERO;
            profit = Decimal::ZERO;
        }
        let production_cost = if revenue.is_zero() {
            Decimal::ZERO
        } else {
            half_up(self.production_cost, 2)
        };
        Some(FirmQuote {
            firm: self.cfg.name.clone(),
            product: ProductKind::MobilePhone,
            date,
            revenue,
            profit,
            production_cost,
            units_sold: self.units_sold.to_u64().unwrap_or(0),
        })
    }

    /// Actor loop: consume the topic until it closes, publishing a quote
    /// whenever a period finalizes. Returns the final state.
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
                    warn!(firm = %self.cfg.name, missed, "inbox lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
        info!(
            firm = %self.cfg.name,
            cumulative = %self.cumulative_profit,
            "firm stopped"
        );
        self
    }
}
