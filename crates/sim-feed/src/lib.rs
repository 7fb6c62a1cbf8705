#![deny(warnings)]

//! Commodity price feed: one append-only dated series per material plus a
//! seeded random-walk generator for the next price.

use chrono::NaiveDate;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use sim_core::{CommodityPrice, FeedConfig, Material};
use std::collections::BTreeMap;

/// One material's append-only dated series.
#[derive(Clone, Debug, Default)]
pub struct PriceSeries {
    points: Vec<(NaiveDate, Decimal)>,
}

impl PriceSeries {
    pub fn latest(&self) -> Option<(NaiveDate, Decimal)> {
        self.points.last().copied()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    fn push(&mut self, date: NaiveDate, value: Decimal) {
        self.points.push((date, value));
    }
}

/// The market's view of raw material prices.
///
/// Each call to [`PriceFeed::next_price`] advances one material's series by
/// one day: the raw stepped value is appended (keeping full precision for
/// the walk), while the published value is rounded to cents.
pub struct PriceFeed {
    series: BTreeMap<Material, PriceSeries>,
    rng: ChaCha8Rng,
    max_step_frac: f64,
}

impl PriceFeed {
    /// Seed a feed from opening prices, one starting point per material.
    pub fn new(cfg: &FeedConfig) -> Self {
        let mut series = BTreeMap::new();
        for material in Material::ALL {
            let mut s = PriceSeries::default();
            if let Some(open) = cfg.opening_prices.get(&material) {
                s.push(cfg.start_date, *open);
            }
            series.insert(material, s);
        }
        Self {
            series,
            rng: ChaCha8Rng::seed_from_u64(cfg.seed),
            max_step_frac: cfg.max_step_frac,
        }
    }

    /// Derive the next price for one material and append it to the series.
    ///
    /// Returns `None` when the material has no series to extend or the
    /// calendar cannot advance.
    pub fn next_price(&mut self, material: Material) -> Option<CommodityPrice> {
        let max_step = self.max_step_frac;
        let step: f64 = if max_step > 0.0 {
            self.rng.gen_range(-max_step..=max_step)
        } else {
            0.0
        };
        let series = self.series.get_mut(&material)?;
        let (last_date, last_value) = series.latest()?;
        let factor = Decimal::from_f64(1.0 + step).unwrap_or(Decimal::ONE);
        let next = (last_value * factor).max(Decimal::ZERO);
        let date = last_date.succ_opt()?;
        series.push(date, next);
        Some(CommodityPrice {
            material,
            date,
            value: next.round_dp_with_strategy(2, RoundingStrategy::MidpointTowardZero),
        })
    }

    /// Latest date across all series; the market clock.
    pub fn latest_date(&self) -> Option<NaiveDate> {
        self.series
            .values()
            .filter_map(|s| s.latest().map(|(d, _)| d))
            .max()
    }

    pub fn series(&self, material: Material) -> Option<&PriceSeries> {
        self.series.get(&material)
    }
}
