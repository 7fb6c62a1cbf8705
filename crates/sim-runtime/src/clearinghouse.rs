//! The market clearinghouse: commodity publication, demand decay, and
//! per-tick market share apportionment.

use rust_decimal::Decimal;
use sim_core::{
    decode, CommodityPrice, FirmQuote, MarketConfig, MarketMessage, MarketSnapshot, Material,
    ProductKind, ShareEntry,
};
use sim_feed::PriceFeed;
use std::collections::BTreeMap;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::bus::Topic;
use crate::Tick;

/// Market-wide state owned by the clearinghouse actor.
///
/// One instance per simulation. Everything here mutates only inside this
/// actor's own message handling; other actors see it exclusively through
/// published messages.
pub struct Clearinghouse {
    cfg: MarketConfig,
    feed: PriceFeed,
    topic: Topic,
    /// Ticks processed so far; drives the demand decay.
    counter: u64,
    current_volume: u64,
    /// Latest recorded price per firm, including zeros.
    firm_prices: BTreeMap<String, Decimal>,
    latest_quotes: BTreeMap<String, FirmQuote>,
    latest_commodities: BTreeMap<Material, CommodityPrice>,
    latest_snapshot: Option<MarketSnapshot>,
}

impl Clearinghouse {
    pub fn new(cfg: MarketConfig, feed: PriceFeed, topic: Topic) -> Self {
        let current_volume = cfg.static_volume;
        Self {
            cfg,
            feed,
            topic,
            counter: 0,
            current_volume,
            firm_prices: BTreeMap::new(),
            latest_quotes: BTreeMap::new(),
            latest_commodities: BTreeMap::new(),
            latest_snapshot: None,
        }
    }

    /// Run one tick: publish the next commodity prices, refresh the market
    /// volume, and apportion shares when at least one firm is active.
    /// Returns the messages to publish; the counter advances regardless of
    /// which branches ran.
    pub fn on_tick(&mut self) -> Vec<MarketMessage> {
        let mut out = Vec::with_capacity(Material::ALL.len() + 1);
        for material in Material::ALL {
            match self.feed.next_price(material) {
                Some(price) => {
                    self.latest_commodities.insert(material, price.clone());
                    out.push(MarketMessage::Commodity(price));
                }
                None => warn!(material = material.name(), "feed has no series to extend"),
            }
        }
        match sim_econ::market_volume(self.cfg.static_volume, self.counter, self.cfg.month_ticks)
        {
            Ok(volume) => self.current_volume = volume,
            Err(error) => warn!(%error, "volume recomputation skipped this tick"),
        }
        if let Some(snapshot) = self.apportion() {
            self.latest_snapshot = Some(snapshot.clone());
            out.push(MarketMessage::Shares(snapshot));
        }
        self.counter += 1;
        out
    }

    fn apportion(&self) -> Option<MarketSnapshot> {
        let shares = sim_econ::apportion_shares(&self.firm_prices, self.cfg.fixed_share_pct);
        if shares.is_empty() {
            return None;
        }
        let date = self.feed.latest_date()?;
        let entries: Vec<ShareEntry> = sim_econ::ranked_entries(shares)
            .into_iter()
            .map(|(firm, percent)| ShareEntry {
                volume: sim_econ::allocate_volume(self.current_volume, percent),
                firm,
                percent,
            })
            .collect();
        Some(MarketSnapshot { date, entries })
    }

    /// Record a consumer-product quote. Supplier quotes, commodity echoes
    /// and anything else on the topic carry no market-share information.
    pub fn observe(&mut self, message: &MarketMessage) {
        if let MarketMessage::Quote(quote) = message {
            if quote.product == ProductKind::MobilePhone {
                self.firm_prices.insert(quote.firm.clone(), quote.revenue);
                self.latest_quotes.insert(quote.firm.clone(), quote.clone());
            }
        }
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }

    pub fn current_volume(&self) -> u64 {
        self.current_volume
    }

    pub fn firm_prices(&self) -> &BTreeMap<String, Decimal> {
        &self.firm_prices
    }

    /// Latest full quote per firm, for presentation readers.
    pub fn latest_quotes(&self) -> &BTreeMap<String, FirmQuote> {
        &self.latest_quotes
    }

    /// Latest published commodity price per material.
    pub fn latest_commodities(&self) -> &BTreeMap<Material, CommodityPrice> {
        &self.latest_commodities
    }

    pub fn latest_snapshot(&self) -> Option<&MarketSnapshot> {
        self.latest_snapshot.as_ref()
    }

    /// Actor loop: scheduler ticks drive publication, bus traffic fills the
    /// quote caches. Returns the final state when the tick channel closes.
    pub async fn run(
        mut self,
        mut ticks: mpsc::Receiver<Tick>,
        mut inbox: broadcast::Receiver<String>,
    ) -> Self {
        loop {
            tokio::select! {
                tick = ticks.recv() => match tick {
                    Some(_) => {
                        for message in self.on_tick() {
                            self.topic.publish(&message);
                        }
                    }
                    None => break,
                },
                raw = inbox.recv() => match raw {
                    Ok(raw) => match decode(&raw) {
                        Some(message) => self.observe(&message),
                        None => debug!("unrecognized payload skipped"),
                    },
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "clearinghouse inbox lagged");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        info!(ticks = self.counter, "clearinghouse stopped");
        self
    }
}
