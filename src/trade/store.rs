use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, Result};
use rusqlite::{Connection, OptionalExtension as _, Row, params};
use rust_decimal::Decimal;

use super::{TradePhase, TradeRecord, TradeRole};
use crate::offer::{OpenOffer, OpenOfferState};

#[derive(Debug)]
pub struct SqliteTradeStore {
    conn: Connection,
    path: PathBuf,
}

impl SqliteTradeStore {
    pub fn open(path: PathBuf) -> Result<Self> {
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create trade store dir {}", dir.display()))?;
        }

        let conn =
            Connection::open(&path).with_context(|| format!("open sqlite {}", path.display()))?;
        conn.busy_timeout(Duration::from_secs(5))
            .context("set sqlite busy_timeout")?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")
            .context("configure sqlite pragmas")?;

        migrate(&conn).context("migrate sqlite schema")?;

        Ok(Self { conn, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Inserts the trade or replaces its stored state.
    pub fn upsert_trade(&mut self, record: &TradeRecord) -> Result<()> {
        let processed_message_uids = serde_json::to_string(&record.processed_message_uids)
            .context("encode processed_message_uids")?;
        self.conn
            .execute(
                r#"
INSERT INTO trades (
  trade_id,
  role,
  phase,
  counterparty_address,
  prepared_deposit_tx_hex,
  deposit_tx_hex,
  delayed_payout_tx_hex,
  peer_delayed_payout_tx_signature_hex,
  payout_tx_hex,
  processed_message_uids,
  error_message
) VALUES (
  ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11
)
ON CONFLICT(trade_id) DO UPDATE SET
  role = excluded.role,
  phase = excluded.phase,
  counterparty_address = excluded.counterparty_address,
  prepared_deposit_tx_hex = excluded.prepared_deposit_tx_hex,
  deposit_tx_hex = excluded.deposit_tx_hex,
  delayed_payout_tx_hex = excluded.delayed_payout_tx_hex,
  peer_delayed_payout_tx_signature_hex = excluded.peer_delayed_payout_tx_signature_hex,
  payout_tx_hex = excluded.payout_tx_hex,
  processed_message_uids = excluded.processed_message_uids,
  error_message = excluded.error_message
"#,
                params![
                    &record.trade_id,
                    record.role.as_str(),
                    record.phase.as_str(),
                    &record.counterparty_address,
                    &record.prepared_deposit_tx_hex,
                    &record.deposit_tx_hex,
                    &record.delayed_payout_tx_hex,
                    &record.peer_delayed_payout_tx_signature_hex,
                    &record.payout_tx_hex,
                    processed_message_uids,
                    &record.error_message,
                ],
            )
            .with_context(|| format!("upsert trade {}", record.trade_id))?;
        Ok(())
    }

    pub fn get_trade(&self, trade_id: &str) -> Result<Option<TradeRecord>> {
        self.conn
            .query_row(
                &format!("SELECT {TRADE_COLUMNS} FROM trades WHERE trade_id = ?1"),
                params![trade_id],
                trade_from_row,
            )
            .optional()
            .with_context(|| format!("get trade {trade_id}"))
    }

    pub fn list_trades(&self) -> Result<Vec<TradeRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {TRADE_COLUMNS} FROM trades ORDER BY trade_id"
            ))
            .context("prepare list trades")?;

        let mut out = Vec::new();
        let rows = stmt
            .query_map([], trade_from_row)
            .context("query list trades")?;
        for row in rows {
            out.push(row.context("read trade row")?);
        }
        Ok(out)
    }

    /// Inserts the offer or replaces its stored pricing and activation state.
    pub fn upsert_offer(&mut self, offer: &OpenOffer) -> Result<()> {
        self.conn
            .execute(
                r#"
INSERT INTO offers (
  offer_id,
  use_market_based_price,
  fixed_price,
  market_price_margin,
  trigger_price,
  state
) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
ON CONFLICT(offer_id) DO UPDATE SET
  use_market_based_price = excluded.use_market_based_price,
  fixed_price = excluded.fixed_price,
  market_price_margin = excluded.market_price_margin,
  trigger_price = excluded.trigger_price,
  state = excluded.state
"#,
                params![
                    &offer.id,
                    offer.use_market_based_price,
                    offer.fixed_price.to_string(),
                    offer.market_price_margin,
                    offer.trigger_price,
                    offer.state.as_str(),
                ],
            )
            .with_context(|| format!("upsert offer {}", offer.id))?;
        Ok(())
    }

    pub fn get_offer(&self, offer_id: &str) -> Result<Option<OpenOffer>> {
        self.conn
            .query_row(
                &format!("SELECT {OFFER_COLUMNS} FROM offers WHERE offer_id = ?1"),
                params![offer_id],
                offer_from_row,
            )
            .optional()
            .with_context(|| format!("get offer {offer_id}"))
    }

    pub fn list_offers(&self) -> Result<Vec<OpenOffer>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {OFFER_COLUMNS} FROM offers ORDER BY offer_id"
            ))
            .context("prepare list offers")?;

        let mut out = Vec::new();
        let rows = stmt
            .query_map([], offer_from_row)
            .context("query list offers")?;
        for row in rows {
            out.push(row.context("read offer row")?);
        }
        Ok(out)
    }
}

const TRADE_COLUMNS: &str = r#"
  trade_id,
  role,
  phase,
  counterparty_address,
  prepared_deposit_tx_hex,
  deposit_tx_hex,
  delayed_payout_tx_hex,
  peer_delayed_payout_tx_signature_hex,
  payout_tx_hex,
  processed_message_uids,
  error_message
"#;

fn trade_from_row(row: &Row<'_>) -> rusqlite::Result<TradeRecord> {
    let role_str: String = row.get(1)?;
    let phase_str: String = row.get(2)?;
    let uids_json: String = row.get(9)?;

    let role = role_str
        .parse::<TradeRole>()
        .map_err(|e| conversion_failure(1, rusqlite::types::Type::Text, e))?;
    let phase = phase_str
        .parse::<TradePhase>()
        .map_err(|e| conversion_failure(2, rusqlite::types::Type::Text, e))?;
    let processed_message_uids: Vec<String> = serde_json::from_str(&uids_json)
        .map_err(|e| conversion_failure(9, rusqlite::types::Type::Text, e.into()))?;

    Ok(TradeRecord {
        trade_id: row.get(0)?,
        role,
        phase,
        counterparty_address: row.get(3)?,
        prepared_deposit_tx_hex: row.get(4)?,
        deposit_tx_hex: row.get(5)?,
        delayed_payout_tx_hex: row.get(6)?,
        peer_delayed_payout_tx_signature_hex: row.get(7)?,
        payout_tx_hex: row.get(8)?,
        processed_message_uids,
        error_message: row.get(10)?,
    })
}

const OFFER_COLUMNS: &str = r#"
  offer_id,
  use_market_based_price,
  fixed_price,
  market_price_margin,
  trigger_price,
  state
"#;

fn offer_from_row(row: &Row<'_>) -> rusqlite::Result<OpenOffer> {
    let fixed_price: String = row.get(2)?;
    let state: String = row.get(5)?;

    let fixed_price = fixed_price
        .parse::<Decimal>()
        .map_err(|e| conversion_failure(2, rusqlite::types::Type::Text, e.into()))?;
    let state = state
        .parse::<OpenOfferState>()
        .map_err(|e| conversion_failure(5, rusqlite::types::Type::Text, e))?;

    Ok(OpenOffer {
        id: row.get(0)?,
        use_market_based_price: row.get(1)?,
        fixed_price,
        market_price_margin: row.get(3)?,
        trigger_price: row.get(4)?,
        state,
    })
}

fn conversion_failure(
    col: usize,
    ty: rusqlite::types::Type,
    err: anyhow::Error,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(col, ty, err.into())
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS trades (
  trade_id TEXT PRIMARY KEY,
  role TEXT NOT NULL,
  phase TEXT NOT NULL,
  counterparty_address TEXT,
  prepared_deposit_tx_hex TEXT,
  deposit_tx_hex TEXT,
  delayed_payout_tx_hex TEXT,
  peer_delayed_payout_tx_signature_hex TEXT,
  payout_tx_hex TEXT,
  processed_message_uids TEXT NOT NULL,
  error_message TEXT
);
CREATE INDEX IF NOT EXISTS trades_phase_idx ON trades(phase);

CREATE TABLE IF NOT EXISTS offers (
  offer_id TEXT PRIMARY KEY,
  use_market_based_price INTEGER NOT NULL,
  fixed_price TEXT NOT NULL,
  market_price_margin REAL NOT NULL,
  trigger_price INTEGER NOT NULL,
  state TEXT NOT NULL
);
"#,
    )
    .context("create tables")?;
    Ok(())
}
