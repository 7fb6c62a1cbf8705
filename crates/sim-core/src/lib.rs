#![deny(warnings)]

//! Core domain types for the phone market simulation.
//!
//! This crate defines the nine traded commodities, the message shapes that
//! share the broadcast topic, the tagged-union decoder that classifies
//! inbound payloads, and validated configuration for the market, firms,
//! suppliers and the price feed.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Unit conversion constants for commodity quotes.
pub mod units {
    use rust_decimal::Decimal;

    /// Grams per troy ounce (precious metal quotes).
    pub const TROY_OUNCE_G: Decimal = Decimal::from_parts(311_034_768, 0, 0, false, 7);
    /// Grams per kilogram (molded plastic quotes).
    pub const KILOGRAM_G: Decimal = Decimal::from_parts(1_000, 0, 0, false, 0);
    /// Grams per metric ton (base metal quotes).
    pub const METRIC_TON_G: Decimal = Decimal::from_parts(1_000_000, 0, 0, false, 0);
}

/// Raw materials quoted by the clearinghouse, one price series each.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Material {
    Oil,
    Copper,
    Aluminium,
    Gold,
    Nickel,
    Palladium,
    Platinum,
    Silver,
    Tin,
}

/// Market quote unit for a commodity price.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuoteUnit {
    /// USD per troy ounce.
    TroyOunce,
    /// USD per metric ton.
    MetricTon,
    /// USD per barrel; consumed only by the plastic supplier, never by weight.
    Barrel,
}

impl Material {
    /// All nine materials in publication order.
    pub const ALL: [Material; 9] = [
        Material::Oil,
        Material::Copper,
        Material::Aluminium,
        Material::Gold,
        Material::Nickel,
        Material::Palladium,
        Material::Platinum,
        Material::Silver,
        Material::Tin,
    ];

    /// Wire name, also the `type` discriminant of a commodity payload.
    pub fn name(self) -> &'static str {
        match self {
            Material::Oil => "Oil",
            Material::Copper => "Copper",
            Material::Aluminium => "Aluminium",
            Material::Gold => "Gold",
            Material::Nickel => "Nickel",
            Material::Palladium => "Palladium",
            Material::Platinum => "Platinum",
            Material::Silver => "Silver",
            Material::Tin => "Tin",
        }
    }

    /// Inverse of [`Material::name`].
    pub fn from_name(name: &str) -> Option<Material> {
        Material::ALL.into_iter().find(|m| m.name() == name)
    }

    pub fn quote_unit(self) -> QuoteUnit {
        match self {
            Material::Gold | Material::Silver | Material::Platinum | Material::Palladium => {
                QuoteUnit::TroyOunce
            }
            Material::Copper | Material::Aluminium | Material::Nickel | Material::Tin => {
                QuoteUnit::MetricTon
            }
            Material::Oil => QuoteUnit::Barrel,
        }
    }

    /// Grams in one quote unit; `None` for oil, which firms never buy by weight.
    pub fn grams_per_quote_unit(self) -> Option<Decimal> {
        match self.quote_unit() {
            QuoteUnit::TroyOunce => Some(units::TROY_OUNCE_G),
            QuoteUnit::MetricTon => Some(units::METRIC_TON_G),
            QuoteUnit::Barrel => None,
        }
    }
}

/// Product types carried in firm quotes.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum ProductKind {
    /// The consumer product competing for market share.
    #[serde(rename = "Mobile_Phone")]
    MobilePhone,
    /// Supplier-sourced casing material, quoted per kilogram.
    #[serde(rename = "Plastic")]
    MoldedPlastic,
    /// Supplier-sourced assembled component, quoted per unit.
    #[serde(rename = "Electronic_Part")]
    ElectronicPart,
}

/// A commodity price published by the clearinghouse, one per material per tick.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommodityPrice {
    #[serde(rename = "type")]
    pub material: Material,
    pub date: NaiveDate,
    pub value: Decimal,
}

/// A firm's published price/profit snapshot for one period.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FirmQuote {
    pub firm: String,
    #[serde(rename = "type")]
    pub product: ProductKind,
    pub date: NaiveDate,
    /// Offered unit price; zero when output is suppressed.
    pub revenue: Decimal,
    /// Period profit after any monthly accrual.
    pub profit: Decimal,
    /// Unit production cost; zero whenever revenue is zero.
    pub production_cost: Decimal,
    pub units_sold: u64,
}

/// One firm's allocation within a market snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShareEntry {
    pub firm: String,
    /// Share of market demand in percent (0-100).
    pub percent: Decimal,
    /// Allocated units for one month.
    pub volume: u64,
}

/// The per-tick share allocation across active firms, in ranked order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub date: NaiveDate,
    pub entries: Vec<ShareEntry>,
}

impl MarketSnapshot {
    /// Look up one firm's entry by name.
    pub fn entry_for(&self, firm: &str) -> Option<&ShareEntry> {
        self.entries.iter().find(|e| e.firm == firm)
    }
}

/// Discriminant value of a market snapshot payload.
pub const SHARE_TAG: &str = "Market_Share";

/// Any message that travels over the shared broadcast topic.
#[derive(Clone, Debug, PartialEq)]
pub enum MarketMessage {
    Commodity(CommodityPrice),
    Quote(FirmQuote),
    Shares(MarketSnapshot),
}

impl MarketMessage {
    /// Serialize to the shared-topic JSON form.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        match self {
            MarketMessage::Commodity(c) => serde_json::to_string(c),
            MarketMessage::Quote(q) => serde_json::to_string(q),
            MarketMessage::Shares(s) => {
                let mut value = serde_json::to_value(s)?;
                if let Some(map) = value.as_object_mut() {
                    map.insert(
                        "type".to_string(),
                        serde_json::Value::String(SHARE_TAG.to_string()),
                    );
                }
                serde_json::to_string(&value)
            }
        }
    }
}

/// Classify a raw payload by its discriminant and decode the matching shape.
///
/// The topic is shared between several message kinds, so a payload that does
/// not carry a known discriminant is expected and yields `None` rather than
/// an error. Classification happens once: the `Market_Share` tag selects a
/// snapshot, a `firm` field selects a quote, and a known material name
/// selects a commodity price.
pub fn decode(raw: &str) -> Option<MarketMessage> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    let tag = value.get("type")?.as_str()?.to_string();
    if tag == SHARE_TAG {
        return serde_json::from_value(value).ok().map(MarketMessage::Shares);
    }
    if value.get("firm").is_some() {
        return serde_json::from_value(value).ok().map(MarketMessage::Quote);
    }
    if Material::from_name(&tag).is_some() {
        return serde_json::from_value(value)
            .ok()
            .map(MarketMessage::Commodity);
    }
    None
}

/// Market-level constants supplied to the clearinghouse at construction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Static market volume ceiling in units.
    pub static_volume: u64,
    /// Length of one accounting month in ticks.
    pub month_ticks: u32,
    /// Percentage of demand split evenly across active firms.
    pub fixed_share_pct: Decimal,
}

/// Cost parameters for one pricing firm.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FirmConfig {
    pub name: String,
    /// Labor cost per man-hour.
    pub labor_cost_per_hour: Decimal,
    /// Units produced per man-hour.
    pub units_per_hour: Decimal,
    /// Markup multiplier applied to production cost when the base price is set.
    pub markup_bonus: Decimal,
    /// Name of the upstream component supplier.
    pub supplier: String,
    /// Divisor applied to the sourced component price.
    pub supplier_discount: Decimal,
    /// Fixed cost per tick across all production lines.
    pub fixed_cost: Decimal,
    pub production_lines: u32,
    /// Units one production line can turn out per tick.
    pub line_capacity: u64,
    /// Fixed cost charged once per elapsed month.
    pub monthly_fixed_cost: Decimal,
    /// Step size of the loss-recovery price search.
    pub price_adjustment_step: Decimal,
    /// Cumulative-profit floor at or below which output is suppressed (<= 0).
    pub max_deficit: Decimal,
    /// Assumed market volume before the first snapshot arrives.
    pub estimated_market_volume: u64,
    /// Gram content per unit for each consumed metal.
    pub composition: BTreeMap<Material, Decimal>,
    /// Gram content of molded plastic per unit (supplier sourced, per kg).
    pub plastic_grams: Decimal,
}

impl FirmConfig {
    /// Metal content of one handset, in grams.
    pub fn handset_composition() -> BTreeMap<Material, Decimal> {
        [
            (Material::Copper, Decimal::new(767, 2)),
            (Material::Aluminium, Decimal::new(13, 1)),
            (Material::Nickel, Decimal::new(13, 1)),
            (Material::Tin, Decimal::new(13, 1)),
            (Material::Gold, Decimal::new(4, 3)),
            (Material::Silver, Decimal::new(5, 2)),
            (Material::Platinum, Decimal::new(4, 3)),
            (Material::Palladium, Decimal::new(2, 3)),
        ]
        .into_iter()
        .collect()
    }
}

/// A thin upstream supplier deriving a component quote from one commodity.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SupplierConfig {
    pub name: String,
    pub product: ProductKind,
    /// Commodity the derived price tracks.
    pub source: Material,
    /// Source quote units consumed per unit of the derived product.
    pub conversion_factor: Decimal,
    /// Margin added on top of the converted source price.
    pub margin: Decimal,
}

/// Price feed parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeedConfig {
    pub seed: u64,
    pub start_date: NaiveDate,
    /// Largest relative step between consecutive prices, e.g. 0.02 for 2%.
    pub max_step_frac: f64,
    /// Opening price per material.
    pub opening_prices: BTreeMap<Material, Decimal>,
}

/// A complete simulation scenario.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Scenario {
    pub market: MarketConfig,
    pub feed: FeedConfig,
    pub firms: Vec<FirmConfig>,
    pub suppliers: Vec<SupplierConfig>,
}

/// Validation errors for scenario configuration.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("month length must be at least one tick")]
    ZeroMonthLength,
    #[error("fixed share percentage must lie within [0, 100]")]
    FixedShareOutOfRange,
    #[error("empty actor name")]
    EmptyName,
    #[error("duplicate actor name: {0}")]
    DuplicateName(String),
    #[error("firm {0}: production rate and line capacity must be positive")]
    NonPositiveCapacity(String),
    #[error("firm {0}: supplier discount must be > 0")]
    ZeroDiscount(String),
    #[error("firm {0}: markup bonus must be >= 1")]
    BonusBelowOne(String),
    #[error("firm {0}: price adjustment step must be > 0")]
    NonPositiveStep(String),
    #[error("firm {0}: tolerable deficit must be <= 0")]
    PositiveDeficit(String),
    #[error("firm {0}: negative gram content for {1}")]
    NegativeContent(String, String),
    #[error("firm {0}: oil has no per-gram price and cannot appear in a composition")]
    OilInComposition(String),
    #[error("firm {0}: no supplier named {1} in the scenario")]
    UnknownSupplier(String, String),
    #[error("supplier {0}: conversion factor must be > 0")]
    NonPositiveFactor(String),
    #[error("feed: opening price for {0} is missing or negative")]
    BadOpeningPrice(&'static str),
}

/// Validate market-level constants.
pub fn validate_market(cfg: &MarketConfig) -> Result<(), ValidationError> {
    if cfg.month_ticks == 0 {
        return Err(ValidationError::ZeroMonthLength);
    }
    if cfg.fixed_share_pct < Decimal::ZERO || cfg.fixed_share_pct > Decimal::ONE_HUNDRED {
        return Err(ValidationError::FixedShareOutOfRange);
    }
    Ok(())
}

/// Validate one firm's cost parameters.
pub fn validate_firm(cfg: &FirmConfig) -> Result<(), ValidationError> {
    let name = cfg.name.clone();
    if cfg.name.trim().is_empty() {
        return Err(ValidationError::EmptyName);
    }
    if cfg.units_per_hour <= Decimal::ZERO || cfg.production_lines == 0 || cfg.line_capacity == 0
    {
        return Err(ValidationError::NonPositiveCapacity(name));
    }
    if cfg.supplier_discount <= Decimal::ZERO {
        return Err(ValidationError::ZeroDiscount(name));
    }
    if cfg.markup_bonus < Decimal::ONE {
        return Err(ValidationError::BonusBelowOne(name));
    }
    if cfg.price_adjustment_step <= Decimal::ZERO {
        return Err(ValidationError::NonPositiveStep(name));
    }
    if cfg.max_deficit > Decimal::ZERO {
        return Err(ValidationError::PositiveDeficit(name));
    }
    for (material, grams) in &cfg.composition {
        if material.grams_per_quote_unit().is_none() {
            return Err(ValidationError::OilInComposition(name));
        }
        if *grams < Decimal::ZERO {
            return Err(ValidationError::NegativeContent(
                name,
                material.name().to_string(),
            ));
        }
    }
    if cfg.plastic_grams < Decimal::ZERO {
        return Err(ValidationError::NegativeContent(name, "Plastic".to_string()));
    }
    Ok(())
}

/// Validate one supplier.
pub fn validate_supplier(cfg: &SupplierConfig) -> Result<(), ValidationError> {
    if cfg.name.trim().is_empty() {
        return Err(ValidationError::EmptyName);
    }
    if cfg.conversion_factor <= Decimal::ZERO {
        return Err(ValidationError::NonPositiveFactor(cfg.name.clone()));
    }
    Ok(())
}

/// Validate the feed, requiring an opening price for every material.
pub fn validate_feed(cfg: &FeedConfig) -> Result<(), ValidationError> {
    for material in Material::ALL {
        match cfg.opening_prices.get(&material) {
            Some(p) if *p >= Decimal::ZERO => {}
            _ => return Err(ValidationError::BadOpeningPrice(material.name())),
        }
    }
    Ok(())
}

/// Validate a whole scenario, including cross-references between actors.
pub fn validate_scenario(scenario: &Scenario) -> Result<(), ValidationError> {
    validate_market(&scenario.market)?;
    validate_feed(&scenario.feed)?;
    let mut names: BTreeSet<&str> = BTreeSet::new();
    for s in &scenario.suppliers {
        validate_supplier(s)?;
        if !names.insert(&s.name) {
            return Err(ValidationError::DuplicateName(s.name.clone()));
        }
    }
    for f in &scenario.firms {
        validate_firm(f)?;
        if !names.insert(&f.name) {
            return Err(ValidationError::DuplicateName(f.name.clone()));
        }
        if !scenario.suppliers.iter().any(|s| s.name == f.supplier) {
            return Err(ValidationError::UnknownSupplier(
                f.name.clone(),
                f.supplier.clone(),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn quote(firm: &str) -> FirmQuote {
        FirmQuote {
            firm: firm.to_string(),
            product: ProductKind::MobilePhone,
            date: NaiveDate::from_ymd_opt(2020, 3, 2).unwrap(),
            revenue: Decimal::new(24999, 2),
            profit: Decimal::new(120_000, 2),
            production_cost: Decimal::new(20833, 2),
            units_sold: 480,
        }
    }

    #[test]
    fn decode_classifies_commodity() {
        let msg = MarketMessage::Commodity(CommodityPrice {
            material: Material::Gold,
            date: NaiveDate::from_ymd_opt(2020, 3, 2).unwrap(),
            value: Decimal::new(190045, 2),
        });
        let raw = msg.encode().unwrap();
        assert_eq!(decode(&raw), Some(msg));
    }

    #[test]
    fn decode_classifies_quote_by_firm_field() {
        let msg = MarketMessage::Quote(quote("alpha"));
        let raw = msg.encode().unwrap();
        assert_eq!(decode(&raw), Some(msg));
    }

    #[test]
    fn decode_classifies_snapshot_by_tag() {
        let msg = MarketMessage::Shares(MarketSnapshot {
            date: NaiveDate::from_ymd_opt(2020, 3, 2).unwrap(),
            entries: vec![ShareEntry {
                firm: "alpha".to_string(),
                percent: Decimal::new(100, 0),
                volume: 15000,
            }],
        });
        let raw = msg.encode().unwrap();
        assert!(raw.contains(SHARE_TAG));
        assert_eq!(decode(&raw), Some(msg));
    }

    #[test]
    fn decode_ignores_foreign_shapes() {
        assert_eq!(decode("not json at all"), None);
        assert_eq!(decode("{\"kind\":\"Gold\"}"), None);
        assert_eq!(decode("{\"type\":\"Uranium\",\"value\":\"1\"}"), None);
        // Recognized tag but wrong shape is skipped too, not an error.
        assert_eq!(decode("{\"type\":\"Gold\"}"), None);
    }

    #[test]
    fn material_names_roundtrip() {
        for m in Material::ALL {
            assert_eq!(Material::from_name(m.name()), Some(m));
        }
        assert_eq!(Material::from_name("Adamantium"), None);
    }

    #[test]
    fn oil_has_no_gram_conversion() {
        assert_eq!(Material::Oil.grams_per_quote_unit(), None);
        assert_eq!(
            Material::Gold.grams_per_quote_unit(),
            Some(Decimal::new(311034768, 7))
        );
    }

    fn firm_cfg(name: &str) -> FirmConfig {
        FirmConfig {
            name: name.to_string(),
            labor_cost_per_hour: Decimal::new(20, 0),
            units_per_hour: Decimal::new(5, 0),
            markup_bonus: Decimal::new(12, 1),
            supplier: "parts".to_string(),
            supplier_discount: Decimal::new(9, 1),
            fixed_cost: Decimal::new(500, 0),
            production_lines: 1,
            line_capacity: 2000,
            monthly_fixed_cost: Decimal::new(1000, 0),
            price_adjustment_step: Decimal::new(5, 2),
            max_deficit: Decimal::new(-50_000, 0),
            estimated_market_volume: 100_000,
            composition: FirmConfig::handset_composition(),
            plastic_grams: Decimal::new(559, 1),
        }
    }

    fn scenario() -> Scenario {
        Scenario {
            market: MarketConfig {
                static_volume: 15_000_000,
                month_ticks: 30,
                fixed_share_pct: Decimal::new(20, 0),
            },
            feed: FeedConfig {
                seed: 42,
                start_date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
                max_step_frac: 0.02,
                opening_prices: Material::ALL
                    .into_iter()
                    .map(|m| (m, Decimal::new(100, 0)))
                    .collect(),
            },
            firms: vec![firm_cfg("alpha")],
            suppliers: vec![
                SupplierConfig {
                    name: "parts".to_string(),
                    product: ProductKind::ElectronicPart,
                    source: Material::Copper,
                    conversion_factor: Decimal::new(1, 2),
                    margin: Decimal::new(25, 2),
                },
                SupplierConfig {
                    name: "polymers".to_string(),
                    product: ProductKind::MoldedPlastic,
                    source: Material::Oil,
                    conversion_factor: Decimal::new(2, 2),
                    margin: Decimal::new(10, 2),
                },
            ],
        }
    }

    #[test]
    fn scenario_validates() {
        validate_scenario(&scenario()).unwrap();
    }

    #[test]
    fn scenario_rejects_unknown_supplier() {
        let mut s = scenario();
        s.firms[0].supplier = "nobody".to_string();
        assert_eq!(
            validate_scenario(&s),
            Err(ValidationError::UnknownSupplier(
                "alpha".to_string(),
                "nobody".to_string()
            ))
        );
    }

    #[test]
    fn scenario_rejects_missing_opening_price() {
        let mut s = scenario();
        s.feed.opening_prices.remove(&Material::Tin);
        assert_eq!(
            validate_scenario(&s),
            Err(ValidationError::BadOpeningPrice("Tin"))
        );
    }

    #[test]
    fn firm_rejects_oil_in_composition() {
        let mut cfg = firm_cfg("alpha");
        cfg.composition.insert(Material::Oil, Decimal::ONE);
        assert_eq!(
            validate_firm(&cfg),
            Err(ValidationError::OilInComposition("alpha".to_string()))
        );
    }

    proptest! {
        #[test]
        fn decode_never_panics_on_garbage(raw in "\\PC{0,120}") {
            let _ = decode(&raw);
        }

        #[test]
        fn firm_validation_accepts_positive_parameters(
            rate in 1i64..1_000,
            discount in 1i64..200,
            lines in 1u32..50,
        ) {
            let mut cfg = firm_cfg("alpha");
            cfg.units_per_hour = Decimal::new(rate, 1);
            cfg.supplier_discount = Decimal::new(discount, 2);
            cfg.production_lines = lines;
            prop_assert!(validate_firm(&cfg).is_ok());
        }
    }
}
