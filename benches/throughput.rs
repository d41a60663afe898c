//! Throughput benchmarks for bulk tick processing.
//!
//! Run with: `cargo bench --bench throughput`

use chrono::{DateTime, Duration, NaiveDate, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::Rng;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::runtime::Runtime;

use risk_manager::{TrailState, TrailingStopCalculator};
use trading_core::config::{Config, RiskConfig};
use trading_core::types::{InstrumentKey, OptionType, PriceTick, StrategyKind};
use trading_engine::{PaperGateway, PositionStore, TickDispatcher};

fn instrument(strike: i64) -> InstrumentKey {
    InstrumentKey::new(
        "NIFTY",
        NaiveDate::from_ymd_opt(2025, 8, 7).unwrap(),
        Decimal::new(strike, 0),
        OptionType::Call,
    )
}

/// Random walk of prices in paise, starting at 100.00.
fn generate_price_path(rng: &mut impl Rng, len: usize) -> Vec<Decimal> {
    let mut paise: i64 = 10_000;
    (0..len)
        .map(|_| {
            paise = (paise + rng.gen_range(-150..=160)).max(100);
            Decimal::new(paise, 2)
        })
        .collect()
}

/// Rising prices that never touch the stop, so no orders fire.
fn rising_ticks(instrument: &InstrumentKey, start: DateTime<Utc>, len: usize) -> Vec<PriceTick> {
    (0..len)
        .map(|i| {
            PriceTick::new(
                instrument.clone(),
                Decimal::new(10_000 + i as i64, 2),
                start + Duration::milliseconds(i as i64 + 1),
            )
        })
        .collect()
}

fn open_positions(rt: &Runtime, strategy: StrategyKind, instruments: usize, per_instrument: usize) -> Arc<PositionStore> {
    let mut config = Config::default();
    config.engine.default_strategy = strategy;
    let gateway = Arc::new(PaperGateway::new(Decimal::new(i64::MAX / 4, 0)));
    let store = PositionStore::new(&config, gateway).unwrap();

    rt.block_on(async {
        for i in 0..instruments {
            for _ in 0..per_instrument {
                store
                    .manual_buy(instrument(24000 + i as i64 * 50), Decimal::new(100, 0), Decimal::new(75, 0))
                    .await
                    .unwrap();
            }
        }
    });
    store
}

/// Benchmark the calculator over long random price paths.
fn bench_calculator_paths(c: &mut Criterion) {
    let calculator = TrailingStopCalculator::new(&RiskConfig::default()).unwrap();
    let mut rng = rand::thread_rng();
    let mut group = c.benchmark_group("calculator_paths");

    for len in [100, 1_000, 10_000].iter() {
        let path = generate_price_path(&mut rng, *len);
        group.throughput(Throughput::Elements(*len as u64));

        for strategy in [StrategyKind::Simple, StrategyKind::Phased] {
            group.bench_with_input(
                BenchmarkId::new(strategy.to_string(), len),
                &path,
                |b, path| {
                    b.iter(|| {
                        let mut state = TrailState::initial(Decimal::new(100, 0), calculator.step());
                        for price in path {
                            state = calculator.evaluate(strategy, &state, *price);
                        }
                        black_box(state)
                    })
                },
            );
        }
    }

    group.finish();
}

/// Benchmark direct store evaluation of ticks fanned out to many positions
/// on one instrument.
fn bench_store_fan_out(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("store_fan_out");

    for positions in [1, 10, 100].iter() {
        let store = open_positions(&rt, StrategyKind::Phased, 1, *positions);
        let key = instrument(24000);
        let mut clock = Utc::now();

        group.throughput(Throughput::Elements(*positions as u64));
        group.bench_with_input(BenchmarkId::new("on_tick", positions), &store, |b, store| {
            b.to_async(&rt).iter(|| {
                clock += Duration::milliseconds(1);
                let tick = PriceTick::new(key.clone(), Decimal::new(10_050, 2), clock);
                let store = Arc::clone(store);
                async move { store.on_tick(black_box(&tick)).await }
            })
        });
    }

    group.finish();
}

/// Benchmark dispatching tick batches across instruments through the worker pool.
fn bench_dispatcher_batches(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("dispatcher_batches");
    group.sample_size(20);

    for instruments in [1, 8, 32].iter() {
        let store = open_positions(&rt, StrategyKind::Simple, *instruments, 4);
        let dispatcher = rt.block_on(async { TickDispatcher::spawn(Arc::clone(&store), 4, 1024) });
        let mut start = Utc::now();
        let batch = 256;

        group.throughput(Throughput::Elements((instruments * batch) as u64));
        group.bench_with_input(
            BenchmarkId::new("dispatch_and_flush", instruments),
            instruments,
            |b, &instruments| {
                b.to_async(&rt).iter(|| {
                    start += Duration::seconds(1);
                    let ticks: Vec<PriceTick> = (0..instruments)
                        .flat_map(|i| rising_ticks(&instrument(24000 + i as i64 * 50), start, batch))
                        .collect();
                    let dispatcher = &dispatcher;
                    async move {
                        for tick in ticks {
                            dispatcher.dispatch(tick).await.unwrap();
                        }
                        dispatcher.flush().await.unwrap();
                    }
                })
            },
        );

        rt.block_on(dispatcher.shutdown());
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_calculator_paths,
    bench_store_fan_out,
    bench_dispatcher_batches,
);

criterion_main!(benches);
