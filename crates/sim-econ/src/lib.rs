#![deny(warnings)]

//! Pricing and apportionment arithmetic for the phone market.
//!
//! Pure decimal math over [`sim_core`] types: unit production cost with
//! capacity capping, the bounded loss-recovery price search, market volume
//! decay, and the fixed+variable market share split with its ranked
//! ordering. Every division carries an explicit rounding strategy so the
//! arithmetic stays drift-free over an unbounded tick sequence.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use sim_core::{units, FirmConfig, Material};
use std::collections::BTreeMap;
use thiserror::Error;

/// Decimal places for intermediate ratios.
const SCALE_RATIO: u32 = 10;
/// Decimal places for money amounts.
const SCALE_MONEY: u32 = 2;

/// Errors produced by the pricing arithmetic.
#[derive(Debug, Error, PartialEq)]
pub enum EconError {
    /// A price for a composition material has not been observed.
    #[error("missing market price for {0}")]
    MissingPrice(&'static str),
    /// A divisor that must be positive was zero or negative.
    #[error("non-positive divisor: {0}")]
    BadDivisor(&'static str),
}

/// Round half away from zero at `dp` decimal places.
pub fn half_up(value: Decimal, dp: u32) -> Decimal {
    value.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero)
}

/// Round half toward zero at `dp` decimal places.
pub fn half_down(value: Decimal, dp: u32) -> Decimal {
    value.round_dp_with_strategy(dp, RoundingStrategy::MidpointTowardZero)
}

/// Cost structure of one firm, independent of observed prices.
#[derive(Clone, Debug)]
pub struct CostModel {
    /// Gram content per unit for each consumed metal.
    pub composition: BTreeMap<Material, Decimal>,
    /// Gram content of molded plastic per unit.
    pub plastic_grams: Decimal,
    pub labor_cost_per_hour: Decimal,
    pub units_per_hour: Decimal,
    /// Divisor applied to the sourced component price.
    pub supplier_discount: Decimal,
    /// Fixed cost per tick across all production lines.
    pub fixed_cost: Decimal,
    pub production_lines: u32,
    pub line_capacity: u64,
}

impl CostModel {
    pub fn from_config(cfg: &FirmConfig) -> Self {
        Self {
            composition: cfg.composition.clone(),
            plastic_grams: cfg.plastic_grams,
            labor_cost_per_hour: cfg.labor_cost_per_hour,
            units_per_hour: cfg.units_per_hour,
            supplier_discount: cfg.supplier_discount,
            fixed_cost: cfg.fixed_cost,
            production_lines: cfg.production_lines,
            line_capacity: cfg.line_capacity,
        }
    }
}

/// The externally observed prices a cost computation needs.
#[derive(Clone, Copy, Debug)]
pub struct InputPrices<'a> {
    /// Latest market value per observed material.
    pub materials: &'a BTreeMap<Material, Decimal>,
    /// Molded plastic, quoted per kilogram.
    pub plastic: Decimal,
    /// Assembled electronic component, quoted per unit.
    pub component: Decimal,
}

/// Outcome of a cost computation at a given share volume.
#[derive(Clone, Debug, PartialEq)]
pub struct CostBreakdown {
    /// Unit production cost.
    pub unit_cost: Decimal,
    /// Units the firm actually turns out this period (capacity capped).
    pub units_sold: Decimal,
}

/// Unit production cost at a given share volume.
///
/// Sums per-gram material costs (each market price divided by its quote
/// unit's gram weight), labor per unit, the discounted sourced component,
/// and amortized production-line overhead. When the share volume needs more
/// lines than the firm owns, output is capped at full line capacity and the
/// fixed cost is spread over the capped output instead.
pub fn unit_production_cost(
    model: &CostModel,
    prices: InputPrices<'_>,
    share_volume: Decimal,
) -> Result<CostBreakdown, EconError> {
    if model.units_per_hour <= Decimal::ZERO {
        return Err(EconError::BadDivisor("units_per_hour"));
    }
    if model.supplier_discount <= Decimal::ZERO {
        return Err(EconError::BadDivisor("supplier_discount"));
    }
    if model.production_lines == 0 || model.line_capacity == 0 {
        return Err(EconError::BadDivisor("line_capacity"));
    }
    if share_volume <= Decimal::ZERO {
        return Err(EconError::BadDivisor("share_volume"));
    }

    let mut material_cost = Decimal::ZERO;
    for (material, grams) in &model.composition {
        let value = *prices
            .materials
            .get(material)
            .ok_or(EconError::MissingPrice(material.name()))?;
        let unit_grams = material
            .grams_per_quote_unit()
            .ok_or(EconError::MissingPrice(material.name()))?;
        material_cost += half_down(value / unit_grams, SCALE_RATIO) * *grams;
    }
    material_cost += half_down(prices.plastic / units::KILOGRAM_G, SCALE_RATIO) * model.plastic_grams;

    let labor = half_down(model.labor_cost_per_hour / model.units_per_hour, SCALE_RATIO);
    let component = half_up(prices.component / model.supplier_discount, SCALE_RATIO);

    let lines = Decimal::from(model.production_lines);
    let capacity = Decimal::from(model.line_capacity);
    let lines_needed = (share_volume / capacity).ceil();
    let (units_sold, overhead) = if lines_needed > lines {
        let units = lines * capacity;
        (units, half_up(model.fixed_cost / units, SCALE_MONEY))
    } else {
        let per_line = half_up(model.fixed_cost / lines, SCALE_MONEY);
        (
            share_volume,
            half_up(per_line * lines_needed / share_volume, SCALE_MONEY),
        )
    };

    Ok(CostBreakdown {
        unit_cost: material_cost + labor + component + overhead,
        units_sold,
    })
}

/// Result of the loss-recovery price search.
#[derive(Clone, Debug, PartialEq)]
pub enum Recovery {
    /// A discounted price with positive margin was found.
    Accepted {
        /// Candidate offered price, 10 dp.
        price: Decimal,
        /// Unit cost recomputed at the inflated hypothetical volume.
        unit_cost: Decimal,
    },
    /// No viable price within the bounded adjustment range.
    Exhausted,
}

/// Search for a discounted offered price that restores a positive margin.
///
/// Starting one step above zero, each attempt inflates the hypothetical
/// share volume by `(1 + adjustment)` and discounts the base price by the
/// same factor; the first candidate that clears the recomputed unit cost is
/// accepted. The search gives up once the adjustment exceeds twice the
/// markup bonus while the candidate no longer clears 102% of the recomputed
/// cost; the caller then reports a zero period.
pub fn loss_recovery_price(
    model: &CostModel,
    prices: InputPrices<'_>,
    share_volume: Decimal,
    base_price: Decimal,
    step: Decimal,
    bonus: Decimal,
) -> Result<Recovery, EconError> {
    if step <= Decimal::ZERO {
        return Err(EconError::BadDivisor("price_adjustment_step"));
    }
    let ceiling = bonus * Decimal::TWO;
    let margin_band = Decimal::new(102, 2);
    let mut adjustment = step;
    loop {
        let factor = Decimal::ONE + adjustment;
        let breakdown = unit_production_cost(model, prices, share_volume * factor)?;
        let candidate = half_up(base_price / factor, SCALE_RATIO);
        if candidate - breakdown.unit_cost > Decimal::ZERO {
            return Ok(Recovery::Accepted {
                price: candidate,
                unit_cost: breakdown.unit_cost,
            });
        }
        adjustment += step;
        if candidate <= breakdown.unit_cost * margin_band && adjustment > ceiling {
            return Ok(Recovery::Exhausted);
        }
    }
}

/// Current market volume for a given tick counter.
///
/// Demand decays as the simulation ages: `static / (counter / month)`,
/// floored to whole units and capped at the static ceiling. A zero counter
/// keeps the configured static volume.
pub fn market_volume(
    static_volume: u64,
    counter: u64,
    month_ticks: u32,
) -> Result<u64, EconError> {
    if month_ticks == 0 {
        return Err(EconError::BadDivisor("month_ticks"));
    }
    if counter == 0 {
        return Ok(static_volume);
    }
    let ratio = half_up(
        Decimal::from(counter) / Decimal::from(month_ticks),
        SCALE_RATIO,
    );
    let volume = (Decimal::from(static_volume) / ratio).floor();
    Ok(volume.to_u64().unwrap_or(static_volume).min(static_volume))
}

/// Split market demand into per-firm percentages.
///
/// A fixed slice of the market is divided evenly across active firms
/// (latest price != 0); the rest is apportioned by each firm's portion of
/// the overall price sum. Zero-priced firms stay in the sum but receive no
/// entry. Returns an empty vector when no firm is active or the price sum
/// rounds to nothing, skipping apportionment for the tick.
pub fn apportion_shares(
    prices: &BTreeMap<String, Decimal>,
    fixed_share_pct: Decimal,
) -> Vec<(String, Decimal)> {
    let active: Vec<(&String, Decimal)> = prices
        .iter()
        .filter(|(_, p)| !p.is_zero())
        .map(|(n, p)| (n, *p))
        .collect();
    if active.is_empty() {
        return Vec::new();
    }
    let sum_price: Decimal = prices.values().copied().sum();
    let one_percent_of_sum = half_down(sum_price / Decimal::ONE_HUNDRED, SCALE_RATIO);
    if one_percent_of_sum.is_zero() {
        return Vec::new();
    }
    let fixed_per_firm = half_down(
        fixed_share_pct / Decimal::from(active.len() as u64),
        SCALE_RATIO,
    );
    let variable_frac = half_down(
        (Decimal::ONE_HUNDRED - fixed_share_pct) / Decimal::ONE_HUNDRED,
        SCALE_RATIO,
    );
    active
        .into_iter()
        .map(|(name, price)| {
            let percent_of_sum = half_down(price / one_percent_of_sum, SCALE_RATIO);
            (name.clone(), fixed_per_firm + percent_of_sum * variable_frac)
        })
        .collect()
}

/// Produce the final ranked share list from raw (firm, percent) pairs.
///
/// Entries are stable-sorted ascending by value; a second stable sort gives
/// the descending owner order; the published list pairs the i-th descending
/// owner with the i-th ascending value, so the top-ranked firm carries the
/// smallest percentage. This reproduces the allocation ordering of the
/// system this simulator is modeled on and is pinned by tests; correcting
/// it would change every downstream volume.
pub fn ranked_entries(shares: Vec<(String, Decimal)>) -> Vec<(String, Decimal)> {
    let mut ascending = shares;
    ascending.sort_by(|a, b| a.1.cmp(&b.1));
    let mut descending = ascending.clone();
    descending.sort_by(|a, b| b.1.cmp(&a.1));
    descending
        .into_iter()
        .zip(ascending)
        .map(|((owner, _), (_, value))| (owner, value))
        .collect()
}

/// Convert a share percentage into whole units of the current market volume.
pub fn allocate_volume(market_volume: u64, percent: Decimal) -> u64 {
    let base = half_down(
        Decimal::from(market_volume) / Decimal::ONE_HUNDRED,
        SCALE_RATIO,
    );
    half_down(base * percent, 0).to_u64().unwrap_or(0)
}

/// A firm's per-tick slice of its monthly allocated volume.
pub fn per_tick_volume(month_volume: u64, month_ticks: u32) -> Result<Decimal, EconError> {
    if month_ticks == 0 {
        return Err(EconError::BadDivisor("month_ticks"));
    }
    Ok(half_down(
        Decimal::from(month_volume) / Decimal::from(month_ticks),
        0,
    ))
}

/// Bootstrap share volume assumed before the first snapshot arrives.
///
/// The estimate spreads the assumed market volume over a half-month horizon
/// so the first pricing pass can run and seed the clearinghouse.
pub fn bootstrap_share_volume(
    estimated_market_volume: u64,
    month_ticks: u32,
) -> Result<Decimal, EconError> {
    let horizon = Decimal::from(month_ticks) - Decimal::new(15, 0);
    if horizon <= Decimal::ZERO {
        return Err(EconError::BadDivisor("month_ticks"));
    }
    Ok(half_down(
        Decimal::from(estimated_market_volume) / horizon,
        0,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // Fixture chosen so every conversion lands on exact decimals:
    // copper 1/g, gold 10/g, plastic 1/g.
    fn exact_model() -> CostModel {
        CostModel {
            composition: [
                (Material::Copper, Decimal::new(10, 0)),
                (Material::Gold, Decimal::new(1, 1)),
            ]
            .into_iter()
            .collect(),
            plastic_grams: Decimal::new(50, 0),
            labor_cost_per_hour: Decimal::new(20, 0),
            units_per_hour: Decimal::new(5, 0),
            supplier_discount: Decimal::new(9, 1),
            fixed_cost: Decimal::new(500, 0),
            production_lines: 1,
            line_capacity: 2000,
        }
    }

    fn exact_prices(materials: &BTreeMap<Material, Decimal>) -> InputPrices<'_> {
        InputPrices {
            materials,
            plastic: Decimal::new(1000, 0),
            component: Decimal::new(90, 0),
        }
    }

    fn exact_materials() -> BTreeMap<Material, Decimal> {
        [
            (Material::Copper, Decimal::new(1_000_000, 0)),
            (Material::Gold, Decimal::new(3_110_347_680, 7)),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn cost_sums_materials_labor_component_overhead() {
        let model = exact_model();
        let materials = exact_materials();
        let out =
            unit_production_cost(&model, exact_prices(&materials), Decimal::new(1000, 0)).unwrap();
        // 10 copper + 1 gold + 50 plastic + 4 labor + 100 component + 0.50 overhead
        assert_eq!(out.unit_cost, Decimal::new(16550, 2));
        assert_eq!(out.units_sold, Decimal::new(1000, 0));
    }

    #[test]
    fn cost_caps_output_at_line_capacity() {
        let model = exact_model();
        let materials = exact_materials();
        let out =
            unit_production_cost(&model, exact_prices(&materials), Decimal::new(5000, 0)).unwrap();
        // Three lines needed, one owned: output capped, overhead 500/2000.
        assert_eq!(out.units_sold, Decimal::new(2000, 0));
        assert_eq!(out.unit_cost, Decimal::new(16525, 2));
    }

    #[test]
    fn cost_requires_all_composition_prices() {
        let model = exact_model();
        let mut materials = exact_materials();
        materials.remove(&Material::Gold);
        let err = unit_production_cost(&model, exact_prices(&materials), Decimal::new(1000, 0))
            .unwrap_err();
        assert_eq!(err, EconError::MissingPrice("Gold"));
    }

    // Reference scenario: nine commodities at 10, components at 100 and 50,
    // labor 20/5, share 1000, one 2000-unit line, fixed 500. Expected values
    // are rebuilt step by step with the documented rounding.
    #[test]
    fn reference_scenario_matches_direct_computation() {
        let composition = FirmConfig::handset_composition();
        let model = CostModel {
            composition: composition.clone(),
            plastic_grams: Decimal::new(559, 1),
            labor_cost_per_hour: Decimal::new(20, 0),
            units_per_hour: Decimal::new(5, 0),
            supplier_discount: Decimal::new(9, 1),
            fixed_cost: Decimal::new(500, 0),
            production_lines: 1,
            line_capacity: 2000,
        };
        let ten = Decimal::new(10, 0);
        let materials: BTreeMap<Material, Decimal> = composition.keys().map(|m| (*m, ten)).collect();
        let prices = InputPrices {
            materials: &materials,
            plastic: Decimal::new(50, 0),
            component: Decimal::new(100, 0),
        };
        let out = unit_production_cost(&model, prices, Decimal::new(1000, 0)).unwrap();

        let mut expected = Decimal::ZERO;
        for (material, grams) in &composition {
            let per_gram = half_down(ten / material.grams_per_quote_unit().unwrap(), 10);
            expected += per_gram * *grams;
        }
        expected += half_down(Decimal::new(50, 0) / units::KILOGRAM_G, 10) * Decimal::new(559, 1);
        expected += half_down(Decimal::new(20, 0) / Decimal::new(5, 0), 10);
        expected += half_up(Decimal::new(100, 0) / Decimal::new(9, 1), 10);
        expected += half_up(
            half_up(Decimal::new(500, 0) / Decimal::ONE, 2) * Decimal::ONE / Decimal::new(1000, 0),
            2,
        );
        assert_eq!(out.unit_cost, expected);
        assert_eq!(out.units_sold, Decimal::new(1000, 0));

        // Base price derives from the markup bonus.
        let base = out.unit_cost * Decimal::new(12, 1);
        assert!(base > out.unit_cost);
    }

    #[test]
    fn recovery_accepts_first_clearing_candidate() {
        let model = exact_model();
        let materials = exact_materials();
        let outcome = loss_recovery_price(
            &model,
            exact_prices(&materials),
            Decimal::new(1000, 0),
            Decimal::new(174, 0),
            Decimal::new(5, 2),
            Decimal::new(12, 1),
        )
        .unwrap();
        // First attempt: volume 1050, overhead 0.48, cost 165.48; the
        // candidate 174/1.05 clears it.
        assert_eq!(
            outcome,
            Recovery::Accepted {
                price: Decimal::new(1657142857143, 10),
                unit_cost: Decimal::new(16548, 2),
            }
        );
    }

    #[test]
    fn recovery_exhausts_when_no_candidate_clears_cost() {
        let model = exact_model();
        let materials = exact_materials();
        let outcome = loss_recovery_price(
            &model,
            exact_prices(&materials),
            Decimal::new(1000, 0),
            Decimal::new(150, 0),
            Decimal::new(5, 2),
            Decimal::new(12, 1),
        )
        .unwrap();
        assert_eq!(outcome, Recovery::Exhausted);
    }

    #[test]
    fn volume_stays_static_until_counter_advances() {
        assert_eq!(market_volume(15_000_000, 0, 30).unwrap(), 15_000_000);
        // One month elapsed: ratio 1.0 keeps the ceiling.
        assert_eq!(market_volume(15_000_000, 30, 30).unwrap(), 15_000_000);
        // Early ticks would exceed the ceiling and are capped.
        assert_eq!(market_volume(15_000_000, 10, 30).unwrap(), 15_000_000);
        // One and a half months: volume decays.
        assert_eq!(market_volume(15_000_000, 45, 30).unwrap(), 10_000_000);
        assert_eq!(market_volume(15_000_000, 60, 30).unwrap(), 7_500_000);
    }

    #[test]
    fn shares_split_fixed_and_variable() {
        let prices: BTreeMap<String, Decimal> = [
            ("alpha".to_string(), Decimal::new(100, 0)),
            ("beta".to_string(), Decimal::new(200, 0)),
            ("gamma".to_string(), Decimal::new(300, 0)),
        ]
        .into_iter()
        .collect();
        let shares = apportion_shares(&prices, Decimal::new(20, 0));
        let lookup: BTreeMap<&str, Decimal> =
            shares.iter().map(|(n, v)| (n.as_str(), *v)).collect();
        assert_eq!(lookup["alpha"], Decimal::new(2_000_000_000_006, 11));
        assert_eq!(lookup["beta"], Decimal::new(3_333_333_333_334, 11));
        assert_eq!(lookup["gamma"], Decimal::new(466_666_666_667, 10));
    }

    #[test]
    fn zero_priced_firms_get_no_entry_but_stay_in_the_sum() {
        let prices: BTreeMap<String, Decimal> = [
            ("alpha".to_string(), Decimal::new(100, 0)),
            ("idle".to_string(), Decimal::ZERO),
        ]
        .into_iter()
        .collect();
        let shares = apportion_shares(&prices, Decimal::new(20, 0));
        assert_eq!(shares.len(), 1);
        assert_eq!(shares[0].0, "alpha");
        // Sole active firm takes the whole market.
        assert_eq!(shares[0].1, Decimal::new(100, 0));
    }

    #[test]
    fn no_active_firm_skips_apportionment() {
        let mut prices = BTreeMap::new();
        assert!(apportion_shares(&prices, Decimal::new(20, 0)).is_empty());
        prices.insert("idle".to_string(), Decimal::ZERO);
        assert!(apportion_shares(&prices, Decimal::new(20, 0)).is_empty());
    }

    #[test]
    fn ranked_entries_decouple_value_from_owner() {
        let entries = ranked_entries(vec![
            ("alpha".to_string(), Decimal::new(20, 0)),
            ("beta".to_string(), Decimal::new(33, 0)),
            ("gamma".to_string(), Decimal::new(47, 0)),
        ]);
        // Owners descend while the values stay ascending: the top-ranked
        // firm carries the smallest percentage.
        assert_eq!(
            entries,
            vec![
                ("gamma".to_string(), Decimal::new(20, 0)),
                ("beta".to_string(), Decimal::new(33, 0)),
                ("alpha".to_string(), Decimal::new(47, 0)),
            ]
        );
    }

    #[test]
    fn allocation_rounds_half_down_to_whole_units() {
        assert_eq!(allocate_volume(15_000_000, Decimal::new(466_666_666_667, 10)), 7_000_000);
        assert_eq!(allocate_volume(1000, Decimal::new(125, 1)), 125);
        assert_eq!(allocate_volume(0, Decimal::new(50, 0)), 0);
    }

    #[test]
    fn per_tick_volume_rounds_half_down() {
        assert_eq!(per_tick_volume(1000, 30).unwrap(), Decimal::new(33, 0));
        assert_eq!(per_tick_volume(50, 3).unwrap(), Decimal::new(17, 0));
        assert_eq!(per_tick_volume(0, 30).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn bootstrap_volume_uses_half_month_horizon() {
        assert_eq!(
            bootstrap_share_volume(100_000, 30).unwrap(),
            Decimal::new(6667, 0)
        );
        assert_eq!(
            bootstrap_share_volume(100_000, 10),
            Err(EconError::BadDivisor("month_ticks"))
        );
    }

    proptest! {
        #[test]
        fn active_shares_sum_to_one_hundred(
            cents in proptest::collection::vec(0i64..100_000, 1..8),
        ) {
            let prices: BTreeMap<String, Decimal> = cents
                .iter()
                .enumerate()
                .map(|(i, c)| (format!("firm-{i}"), Decimal::new(*c, 2)))
                .collect();
            let shares = apportion_shares(&prices, Decimal::new(20, 0));
            if !shares.is_empty() {
                let total: Decimal = shares.iter().map(|(_, v)| *v).sum();
                let error = (total - Decimal::ONE_HUNDRED).abs();
                prop_assert!(error < Decimal::new(1, 6), "total {total}");
            }
        }

        #[test]
        fn volume_never_exceeds_the_ceiling(counter in 0u64..10_000, month in 1u32..120) {
            let v = market_volume(15_000_000, counter, month).unwrap();
            prop_assert!(v <= 15_000_000);
        }

        #[test]
        fn ranking_preserves_owners_and_values(
            cents in proptest::collection::vec(0i64..10_000, 0..8),
        ) {
            let raw: Vec<(String, Decimal)> = cents
                .iter()
                .enumerate()
                .map(|(i, c)| (format!("firm-{i}"), Decimal::new(*c, 2)))
                .collect();
            let ranked = ranked_entries(raw.clone());
            prop_assert_eq!(ranked.len(), raw.len());
            let values: Vec<Decimal> = ranked.iter().map(|(_, v)| *v).collect();
            let sorted = {
                let mut s = values.clone();
                s.sort();
                s
            };
            // Values come out ascending; owners are a permutation of the input.
            prop_assert_eq!(&values, &sorted);
            let mut in_owners: Vec<&String> = raw.iter().map(|(n, _)| n).collect();
            let mut out_owners: Vec<&String> = ranked.iter().map(|(n, _)| n).collect();
            in_owners.sort();
            out_owners.sort();
            prop_assert_eq!(in_owners, out_owners);
        }
    }
}
