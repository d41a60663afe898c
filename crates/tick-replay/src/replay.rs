//! JSON-lines replay of ticks and manual commands.
//!
//! Each line is one object tagged by `type`:
//!
//! ```text
//! {"type":"buy","label":"a","instrument":"NIFTY:2025-08-07:24500:CE","price":"100","quantity":"75"}
//! {"type":"tick","instrument":"NIFTY:2025-08-07:24500:CE","ltp":"110","timestamp":"2025-08-01T09:15:01Z"}
//! {"type":"override","position":"a","target":"130"}
//! {"type":"clear_override","position":"a"}
//! {"type":"cooldown","position":"a","enabled":false}
//! {"type":"sell","position":"a"}
//! ```
//!
//! Positions are referred to by the label given on their buy line, or by the
//! instrument key when the buy had no label.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, warn};
use trading_core::types::{InstrumentKey, PriceTick, StrategyKind};
use trading_engine::{PositionStore, TickDispatcher};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplayCommand {
    Buy {
        instrument: String,
        price: Decimal,
        quantity: Decimal,
        #[serde(default)]
        strategy: Option<StrategyKind>,
        #[serde(default)]
        label: Option<String>,
    },
    Tick {
        instrument: String,
        ltp: Decimal,
        timestamp: DateTime<Utc>,
    },
    Sell {
        position: String,
    },
    Override {
        position: String,
        target: Decimal,
        /// Start of the override lifetime; defaults to the latest replayed tick time.
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
    },
    ClearOverride {
        position: String,
    },
    Cooldown {
        position: String,
        enabled: bool,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub lines: usize,
    pub ticks: usize,
    pub commands: usize,
    /// Lines that did not parse.
    pub skipped: usize,
    /// Commands the engine rejected.
    pub rejected: usize,
}

pub struct Replayer {
    store: Arc<PositionStore>,
    dispatcher: TickDispatcher,
    labels: HashMap<String, Uuid>,
    /// Timestamp of the latest tick, used as the replay clock for overrides.
    clock: Option<DateTime<Utc>>,
    /// Settle each tick, including the orders it fires, before reading the next.
    lockstep: bool,
}

impl Replayer {
    pub fn new(dispatcher: TickDispatcher) -> Self {
        Self {
            store: Arc::clone(dispatcher.store()),
            dispatcher,
            labels: HashMap::new(),
            clock: None,
            lockstep: true,
        }
    }

    /// Let ticks run ahead of in-flight orders, as they would on a live feed.
    pub fn pipelined(mut self) -> Self {
        self.lockstep = false;
        self
    }

    /// Read commands until EOF. Malformed lines and rejected commands are
    /// logged and counted; only I/O failures abort the replay.
    pub async fn run<R>(&mut self, reader: R) -> Result<ReplaySummary>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut summary = ReplaySummary::default();
        let mut lines = reader.lines();

        while let Some(line) = lines.next_line().await.context("reading replay input")? {
            summary.lines += 1;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let command: ReplayCommand = match serde_json::from_str(line) {
                Ok(command) => command,
                Err(e) => {
                    warn!(line = summary.lines, error = %e, "Skipping malformed line");
                    summary.skipped += 1;
                    continue;
                }
            };

            let is_tick = matches!(command, ReplayCommand::Tick { .. });
            match self.apply(command).await {
                Ok(()) if is_tick => summary.ticks += 1,
                Ok(()) => summary.commands += 1,
                Err(e) => {
                    warn!(line = summary.lines, error = %e, "Command rejected");
                    summary.rejected += 1;
                }
            }
        }

        self.dispatcher.flush().await?;
        info!(
            lines = summary.lines,
            ticks = summary.ticks,
            commands = summary.commands,
            skipped = summary.skipped,
            rejected = summary.rejected,
            "Replay finished"
        );
        Ok(summary)
    }

    /// Apply one command. Manual commands first wait for every earlier tick to
    /// be evaluated, so the replay is deterministic.
    pub async fn apply(&mut self, command: ReplayCommand) -> Result<()> {
        match command {
            ReplayCommand::Tick {
                instrument,
                ltp,
                timestamp,
            } => {
                let instrument: InstrumentKey = instrument.parse()?;
                self.clock = Some(self.clock.map_or(timestamp, |clock| clock.max(timestamp)));
                self.dispatcher
                    .dispatch(PriceTick::new(instrument, ltp, timestamp))
                    .await?;
                if self.lockstep {
                    self.dispatcher.flush().await?;
                }
            }
            ReplayCommand::Buy {
                instrument,
                price,
                quantity,
                strategy,
                label,
            } => {
                self.dispatcher.flush().await?;
                let key: InstrumentKey = instrument.parse()?;
                let label = label.unwrap_or(instrument);
                let position = match strategy {
                    Some(strategy) => {
                        self.store
                            .manual_buy_with_strategy(key, price, quantity, strategy)
                            .await?
                    }
                    None => self.store.manual_buy(key, price, quantity).await?,
                };
                debug!(label = %label, position_id = %position.id, "Bound label");
                self.labels.insert(label, position.id);
            }
            ReplayCommand::Sell { position } => {
                self.dispatcher.flush().await?;
                let id = self.resolve(&position)?;
                self.store.manual_sell(id).await?;
                // A close deferred behind an in-flight sell completes here
                self.store.settle().await;
            }
            ReplayCommand::Override {
                position,
                target,
                timestamp,
            } => {
                self.dispatcher.flush().await?;
                let id = self.resolve(&position)?;
                let set_at = timestamp.or(self.clock).unwrap_or_else(Utc::now);
                self.store.set_manual_override_at(id, target, set_at).await?;
            }
            ReplayCommand::ClearOverride { position } => {
                self.dispatcher.flush().await?;
                let id = self.resolve(&position)?;
                self.store.clear_override(id).await?;
            }
            ReplayCommand::Cooldown { position, enabled } => {
                self.dispatcher.flush().await?;
                let id = self.resolve(&position)?;
                self.store.set_cooldown_enabled(id, enabled).await?;
            }
        }
        Ok(())
    }

    fn resolve(&self, reference: &str) -> Result<Uuid> {
        if let Some(id) = self.labels.get(reference) {
            return Ok(*id);
        }
        match reference.parse::<Uuid>() {
            Ok(id) => Ok(id),
            Err(_) => bail!("unknown position {reference}"),
        }
    }

    /// Drain the workers and wait for in-flight orders.
    pub async fn finish(self) -> Arc<PositionStore> {
        self.dispatcher.shutdown().await;
        self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;
    use trading_core::config::Config;
    use trading_core::types::{PositionMode, TradeAction};
    use trading_engine::PaperGateway;

    const KEY: &str = "NIFTY:2025-08-07:24500:CE";

    fn parse_script(script: &str) -> Result<Vec<ReplayCommand>> {
        script
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .enumerate()
            .map(|(i, line)| {
                serde_json::from_str(line).map_err(|e| anyhow::anyhow!("command {}: {}", i + 1, e))
            })
            .collect()
    }

    impl Replayer {
        fn position_id(&self, label: &str) -> Option<Uuid> {
            self.labels.get(label).copied()
        }
    }

    fn replayer(strategy: StrategyKind) -> Replayer {
        let mut config = Config::default();
        config.engine.default_strategy = strategy;
        config.engine.workers = 2;
        let gateway = Arc::new(PaperGateway::from_config(&config.paper));
        let store = PositionStore::new(&config, gateway).unwrap();
        Replayer::new(TickDispatcher::from_config(store, &config.engine))
    }

    fn tick(price: i64, second: u32) -> String {
        format!(
            r#"{{"type":"tick","instrument":"{KEY}","ltp":"{price}","timestamp":"2025-08-01T09:15:{second:02}Z"}}"#
        )
    }

    #[test]
    fn test_parse_commands() {
        let script = format!(
            "# comment\n{}\n{}\n{}\n",
            r#"{"type":"buy","label":"a","instrument":"NIFTY:2025-08-07:24500:CE","price":"100","quantity":"75","strategy":"advanced"}"#,
            tick(110, 1),
            r#"{"type":"clear_override","position":"a"}"#
        );
        let commands = parse_script(&script).unwrap();
        assert_eq!(commands.len(), 3);
        assert!(matches!(
            &commands[0],
            ReplayCommand::Buy {
                strategy: Some(StrategyKind::Phased),
                label: Some(label),
                ..
            } if label == "a"
        ));
        assert!(matches!(commands[2], ReplayCommand::ClearOverride { .. }));

        assert!(parse_script(r#"{"type":"teleport"}"#).is_err());
    }

    #[tokio::test]
    async fn test_replay_sell_and_reentry() {
        let script = [
            format!(r#"{{"type":"buy","label":"a","instrument":"{KEY}","price":"100","quantity":"75"}}"#),
            tick(101, 1),
            tick(109, 2),
            tick(110, 3),
            tick(99, 4),
            tick(99, 4),
            tick(100, 5),
            "not json".to_string(),
            r#"{"type":"sell","position":"missing"}"#.to_string(),
        ]
        .join("\n");

        let mut replayer = replayer(StrategyKind::Simple);
        let summary = replayer.run(BufReader::new(script.as_bytes())).await.unwrap();
        assert_eq!(summary.ticks, 6);
        assert_eq!(summary.commands, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.rejected, 1);

        let id = replayer.position_id("a").unwrap();
        let store = replayer.finish().await;
        let view = store.get(id).await.unwrap();
        assert_eq!(view.position.mode, PositionMode::Running);
        assert_eq!(view.position.entry_price, Decimal::new(100, 0));
        assert_eq!(view.position.stop_loss_price, Decimal::new(90, 0));

        let actions: Vec<TradeAction> = store.trade_log().history().iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![TradeAction::ManualBuy, TradeAction::AutoSell, TradeAction::AutoBuy]
        );
    }

    #[tokio::test]
    async fn test_replay_override_uses_replay_clock() {
        let script = [
            format!(r#"{{"type":"buy","instrument":"{KEY}","price":"100","quantity":"75"}}"#),
            tick(100, 1),
            format!(r#"{{"type":"override","position":"{KEY}","target":"95"}}"#),
            tick(96, 2),
            tick(95, 3),
        ]
        .join("\n");

        let mut replayer = replayer(StrategyKind::Simple);
        replayer.run(BufReader::new(script.as_bytes())).await.unwrap();
        let store = replayer.finish().await;

        let sell = store
            .trade_log()
            .history()
            .into_iter()
            .find(|e| e.action == TradeAction::AutoSell)
            .unwrap();
        assert_eq!(sell.price, Decimal::new(95, 0));
    }
}
