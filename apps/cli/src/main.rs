#![deny(warnings)]

//! Headless runner: wires the feed, the clearinghouse, the supplier and
//! firm actors to one broadcast topic and drives a fixed number of ticks.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sim_core::{
    validate_scenario, FeedConfig, FirmConfig, MarketConfig, Material, ProductKind, Scenario,
    SupplierConfig,
};
use sim_feed::PriceFeed;
use sim_runtime::{Clearinghouse, FirmPricingEngine, SupplierEngine, Tick, Topic};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

fn parse_args() -> (Option<String>, u64, Option<u64>) {
    let mut scenario: Option<String> = None;
    let mut ticks: u64 = 90;
    let mut seed: Option<u64> = None;
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--scenario" => scenario = it.next(),
            "--ticks" => ticks = it.next().and_then(|s| s.parse().ok()).unwrap_or(ticks),
            "--seed" => seed = it.next().and_then(|s| s.parse().ok()),
            _ => {}
        }
    }
    (scenario, ticks, seed)
}

fn default_scenario() -> Scenario {
    let opening_prices: BTreeMap<Material, Decimal> = [
        (Material::Oil, Decimal::new(8250, 2)),
        (Material::Copper, Decimal::new(845_000, 2)),
        (Material::Aluminium, Decimal::new(223_000, 2)),
        (Material::Gold, Decimal::new(192_530, 2)),
        (Material::Nickel, Decimal::new(1_678_000, 2)),
        (Material::Palladium, Decimal::new(101_200, 2)),
        (Material::Platinum, Decimal::new(90_840, 2)),
        (Material::Silver, Decimal::new(2340, 2)),
        (Material::Tin, Decimal::new(2_560_000, 2)),
    ]
    .into_iter()
    .collect();

    let firm = |name: &str,
                labor: i64,
                rate: i64,
                bonus: i64,
                discount: i64,
                fixed: i64,
                lines: u32,
                capacity: u64,
                monthly: i64,
                estimate: u64| FirmConfig {
        name: name.to_string(),
        labor_cost_per_hour: Decimal::new(labor, 0),
        units_per_hour: Decimal::new(rate, 0),
        markup_bonus: Decimal::new(bonus, 2),
        supplier: "circuitron".to_string(),
        supplier_discount: Decimal::new(discount, 2),
        fixed_cost: Decimal::new(fixed, 0),
        production_lines: lines,
        line_capacity: capacity,
        monthly_fixed_cost: Decimal::new(monthly, 0),
        price_adjustment_step: Decimal::new(5, 2),
        max_deficit: Decimal::new(-500_000, 0),
        estimated_market_volume: estimate,
        composition: FirmConfig::handset_composition(),
        plastic_grams: Decimal::new(559, 1),
    };

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
            opening_prices,
        },
        firms: vec![
            firm("phoneco", 20, 5, 120, 90, 500, 4, 2000, 50_000, 100_000),
            firm("mobitec", 22, 6, 125, 88, 620, 5, 1800, 60_000, 120_000),
            firm("celldyn", 18, 4, 115, 93, 450, 3, 2500, 45_000, 90_000),
        ],
        suppliers: vec![
            SupplierConfig {
                name: "polymer-works".to_string(),
                product: ProductKind::MoldedPlastic,
                source: Material::Oil,
                conversion_factor: Decimal::new(35, 2),
                margin: Decimal::new(10, 2),
            },
            SupplierConfig {
                name: "circuitron".to_string(),
                product: ProductKind::ElectronicPart,
                source: Material::Copper,
                conversion_factor: Decimal::new(6, 3),
                margin: Decimal::new(25, 2),
            },
        ],
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logging setup
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_max_level(Level::INFO)
        .init();

    let (scenario_path, ticks, seed) = parse_args();
    info!(build = env!("GIT_SHA"), ?scenario_path, ticks, "starting market");

    let mut scenario = match &scenario_path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading scenario {path}"))?;
            serde_yaml::from_str::<Scenario>(&text).context("parsing scenario")?
        }
        None => default_scenario(),
    };
    if let Some(seed) = seed {
        scenario.feed.seed = seed;
    }
    validate_scenario(&scenario)?;

    let topic = Topic::new("market", 1024);
    let mut tasks = Vec::new();
    for cfg in &scenario.suppliers {
        let engine = SupplierEngine::new(cfg.clone(), topic.clone());
        let inbox = topic.subscribe();
        tasks.push(tokio::spawn(async move {
            let _ = engine.run(inbox).await;
        }));
    }
    for cfg in &scenario.firms {
        let engine = FirmPricingEngine::new(cfg.clone(), &scenario.market, topic.clone())?;
        let inbox = topic.subscribe();
        tasks.push(tokio::spawn(async move {
            let _ = engine.run(inbox).await;
        }));
    }
    let feed = PriceFeed::new(&scenario.feed);
    let house = Clearinghouse::new(scenario.market.clone(), feed, topic.clone());
    let house_inbox = topic.subscribe();
    let (tick_tx, tick_rx) = mpsc::channel(1);
    let house_task = tokio::spawn(house.run(tick_rx, house_inbox));

    let mut timer = tokio::time::interval(Duration::from_millis(10));
    for _ in 0..ticks {
        timer.tick().await;
        if tick_tx.send(Tick).await.is_err() {
            break;
        }
    }
    // Let in-flight quotes land before the market closes its books.
    tokio::time::sleep(Duration::from_millis(100)).await;
    drop(tick_tx);
    let market = house_task.await?;
    for task in &tasks {
        task.abort();
    }

    println!(
        "Market | ticks: {} | volume: {} units | firms on record: {}",
        market.counter(),
        market.current_volume(),
        market.latest_quotes().len()
    );
    for (firm, quote) in market.latest_quotes() {
        println!(
            "{firm} | revenue: {} | profit: {} | cost: {} | units: {}",
            quote.revenue, quote.profit, quote.production_cost, quote.units_sold
        );
    }
    if let Some(snapshot) = market.latest_snapshot() {
        for entry in &snapshot.entries {
            println!(
                "share {} | {}% | {} units",
                entry.firm,
                entry.percent.round_dp(2),
                entry.volume
            );
        }
    }

    Ok(())
}
