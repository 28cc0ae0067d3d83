//! Typed pool events and the archive loader.
//!
//! The archive is a directory of paginated JSON files, read in file-name
//! order. Pages may be chronologically ascending or descending and may carry
//! events for other pools; the loader filters on pool id and globally orders
//! the survivors by `(timestamp_ms, tx_digest, event_seq)`. A page that fails
//! to parse is skipped with a warning — replay continues on the rest of the
//! archive.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer};
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::Result;

/// An on-chain swap, as archived
#[derive(Debug, Clone, Default)]
pub struct SwapEvent {
    pub sqrt_price_before: u128,
    pub sqrt_price_after: u128,
    pub amount_in: u128,
    pub amount_out: u128,
    /// true when token_0 is the input side (price decreases)
    pub a_to_b: bool,
    /// LP share of the swap fee
    pub fee: u128,
    pub protocol_fee: u128,
    pub reserve_after_0: u128,
    pub reserve_after_1: u128,
    pub tick_after: i32,
    pub liquidity_after: u128,
}

/// An on-chain liquidity change, as archived
#[derive(Debug, Clone, Default)]
pub struct LiquidityEvent {
    pub tick_lower: i32,
    pub tick_upper: i32,
    /// Signed: positive for adds, negative for removals
    pub liquidity_delta: i128,
    pub reserve_after_0: u128,
    pub reserve_after_1: u128,
    pub liquidity_after: u128,
}

#[derive(Debug, Clone)]
pub enum EventPayload {
    Swap(SwapEvent),
    AddLiquidity(LiquidityEvent),
    RemoveLiquidity(LiquidityEvent),
}

/// One archived event with its global ordering key
#[derive(Debug, Clone)]
pub struct PoolEvent {
    pub timestamp_ms: u64,
    pub tx_digest: String,
    pub event_seq: u64,
    pub payload: EventPayload,
}

impl PoolEvent {
    fn order_key(&self) -> (u64, &str, u64) {
        (self.timestamp_ms, self.tx_digest.as_str(), self.event_seq)
    }
}

/// The ordered, filtered stream the replay driver pulls from
#[derive(Debug)]
pub struct EventStream {
    events: Vec<PoolEvent>,
    cursor: usize,
}

impl EventStream {
    pub fn new(mut events: Vec<PoolEvent>) -> Self {
        events.sort_by(|a, b| a.order_key().cmp(&b.order_key()));
        EventStream { events, cursor: 0 }
    }

    pub fn peek(&self) -> Option<&PoolEvent> {
        self.events.get(self.cursor)
    }

    pub fn peek_timestamp(&self) -> Option<u64> {
        self.peek().map(|e| e.timestamp_ms)
    }

    pub fn next_event(&mut self) -> Option<PoolEvent> {
        let event = self.events.get(self.cursor).cloned();
        if event.is_some() {
            self.cursor += 1;
        }
        event
    }

    pub fn remaining(&self) -> usize {
        self.events.len() - self.cursor
    }

    pub fn total(&self) -> usize {
        self.events.len()
    }
}

/// Loads every page under `dir`, keeping events for `pool_id` with timestamps
/// in `[start_ms, end_ms]`.
pub fn load_archive(
    dir: &Path,
    pool_id: &str,
    start_ms: u64,
    end_ms: u64,
) -> Result<EventStream> {
    if !dir.is_dir() {
        return Err(EngineError::Config(format!(
            "archive directory {} does not exist",
            dir.display()
        )));
    }

    let mut pages: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|e| EngineError::Config(format!("cannot read archive dir: {e}")))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().map(|ext| ext == "json").unwrap_or(false))
        .collect();
    pages.sort();

    let mut events = Vec::new();
    for path in &pages {
        match parse_page(path, pool_id) {
            Ok(mut page_events) => events.append(&mut page_events),
            Err(err) => {
                warn!(file = %path.display(), error = %err, "skipping unparseable archive page");
            }
        }
    }

    events.retain(|e| e.timestamp_ms >= start_ms && e.timestamp_ms <= end_ms);
    let stream = EventStream::new(events);
    debug!(
        pages = pages.len(),
        events = stream.total(),
        "archive loaded"
    );
    Ok(stream)
}

fn parse_page(path: &Path, pool_id: &str) -> std::result::Result<Vec<PoolEvent>, PageError> {
    let contents = fs::read_to_string(path)?;
    let page: ArchivePage = serde_json::from_str(&contents)?;

    let mut events = Vec::new();
    for tx in page.data {
        for event in tx.events {
            // cheap pool filter before committing to a full payload parse
            let event_pool = event
                .parsed_json
                .get("pool_id")
                .or_else(|| event.parsed_json.get("pool"))
                .and_then(|v| v.as_str());
            if event_pool != Some(pool_id) {
                continue;
            }

            let payload = if event.event_type.ends_with("SwapEvent") {
                let raw: RawSwap = serde_json::from_value(event.parsed_json)?;
                EventPayload::Swap(raw.into())
            } else if event.event_type.ends_with("AddLiquidityEvent") {
                let raw: RawLiquidity = serde_json::from_value(event.parsed_json)?;
                EventPayload::AddLiquidity(raw.into_event(false)?)
            } else if event.event_type.ends_with("RemoveLiquidityEvent") {
                let raw: RawLiquidity = serde_json::from_value(event.parsed_json)?;
                EventPayload::RemoveLiquidity(raw.into_event(true)?)
            } else {
                debug!(kind = %event.event_type, "skipping unknown event kind");
                continue;
            };

            events.push(PoolEvent {
                timestamp_ms: tx.timestamp_ms,
                tx_digest: event.id.tx_digest,
                event_seq: event.id.event_seq,
                payload,
            });
        }
    }
    Ok(events)
}

#[derive(Debug, thiserror::Error)]
enum PageError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("liquidity delta {0} does not fit a signed 128-bit value")]
    DeltaOverflow(u128),
}

// ---------------------------------------------------------------------------
// raw page shapes

#[derive(Deserialize)]
struct ArchivePage {
    data: Vec<ArchiveTransaction>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArchiveTransaction {
    #[allow(dead_code)]
    digest: String,
    #[serde(deserialize_with = "u64_from_any")]
    timestamp_ms: u64,
    events: Vec<ArchiveEvent>,
}

#[derive(Deserialize)]
struct ArchiveEvent {
    id: ArchiveEventId,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(rename = "parsedJson")]
    parsed_json: serde_json::Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArchiveEventId {
    tx_digest: String,
    #[serde(deserialize_with = "u64_from_any")]
    event_seq: u64,
}

#[derive(Deserialize)]
struct RawSwap {
    #[serde(alias = "before_sqrt_price", deserialize_with = "u128_from_any")]
    sqrt_price_before: u128,
    #[serde(alias = "after_sqrt_price", deserialize_with = "u128_from_any")]
    sqrt_price_after: u128,
    #[serde(deserialize_with = "u128_from_any")]
    amount_in: u128,
    #[serde(deserialize_with = "u128_from_any")]
    amount_out: u128,
    #[serde(alias = "atob")]
    a_to_b: bool,
    #[serde(alias = "fee_amount", deserialize_with = "u128_from_any")]
    fee: u128,
    #[serde(default, deserialize_with = "u128_from_any")]
    protocol_fee: u128,
    #[serde(alias = "after_reserve_0", deserialize_with = "u128_from_any")]
    reserve_0: u128,
    #[serde(alias = "after_reserve_1", deserialize_with = "u128_from_any")]
    reserve_1: u128,
    #[serde(alias = "after_tick", deserialize_with = "i32_from_any")]
    tick: i32,
    #[serde(alias = "after_liquidity", deserialize_with = "u128_from_any")]
    liquidity: u128,
}

impl From<RawSwap> for SwapEvent {
    fn from(raw: RawSwap) -> Self {
        SwapEvent {
            sqrt_price_before: raw.sqrt_price_before,
            sqrt_price_after: raw.sqrt_price_after,
            amount_in: raw.amount_in,
            amount_out: raw.amount_out,
            a_to_b: raw.a_to_b,
            fee: raw.fee,
            protocol_fee: raw.protocol_fee,
            reserve_after_0: raw.reserve_0,
            reserve_after_1: raw.reserve_1,
            tick_after: raw.tick,
            liquidity_after: raw.liquidity,
        }
    }
}

#[derive(Deserialize)]
struct RawLiquidity {
    #[serde(alias = "tick_lower_index", deserialize_with = "i32_from_any")]
    tick_lower: i32,
    #[serde(alias = "tick_upper_index", deserialize_with = "i32_from_any")]
    tick_upper: i32,
    #[serde(alias = "delta_liquidity", deserialize_with = "u128_from_any")]
    liquidity_amount: u128,
    #[serde(alias = "after_reserve_0", deserialize_with = "u128_from_any")]
    reserve_0: u128,
    #[serde(alias = "after_reserve_1", deserialize_with = "u128_from_any")]
    reserve_1: u128,
    #[serde(alias = "liquidity_after", deserialize_with = "u128_from_any")]
    after_liquidity: u128,
}

impl RawLiquidity {
    fn into_event(self, removal: bool) -> std::result::Result<LiquidityEvent, PageError> {
        let magnitude =
            i128::try_from(self.liquidity_amount).map_err(|_| PageError::DeltaOverflow(self.liquidity_amount))?;
        Ok(LiquidityEvent {
            tick_lower: self.tick_lower,
            tick_upper: self.tick_upper,
            liquidity_delta: if removal { -magnitude } else { magnitude },
            reserve_after_0: self.reserve_0,
            reserve_after_1: self.reserve_1,
            liquidity_after: self.after_liquidity,
        })
    }
}

// archives encode big integers either as JSON numbers or as decimal strings

fn u128_from_any<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<u128, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u64),
        Str(String),
    }
    match Raw::deserialize(d)? {
        Raw::Num(n) => Ok(n as u128),
        Raw::Str(s) => s.parse::<u128>().map_err(serde::de::Error::custom),
    }
}

fn u64_from_any<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u64),
        Str(String),
    }
    match Raw::deserialize(d)? {
        Raw::Num(n) => Ok(n),
        Raw::Str(s) => s.parse::<u64>().map_err(serde::de::Error::custom),
    }
}

fn i32_from_any<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<i32, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(i64),
        Str(String),
    }
    let value = match Raw::deserialize(d)? {
        Raw::Num(n) => n,
        Raw::Str(s) => s.parse::<i64>().map_err(serde::de::Error::custom)?,
    };
    i32::try_from(value).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    const POOL: &str = "0xpool";

    fn page_json(entries: &[(&str, u64, &str, u64, serde_json::Value)]) -> String {
        // entries: (digest, timestamp, kind, event_seq, parsed_json)
        let data: Vec<serde_json::Value> = entries
            .iter()
            .map(|(digest, ts, kind, seq, parsed)| {
                serde_json::json!({
                    "digest": digest,
                    "timestampMs": ts.to_string(),
                    "checkpoint": "1",
                    "events": [{
                        "id": {"txDigest": digest, "eventSeq": seq.to_string()},
                        "type": kind,
                        "parsedJson": parsed,
                    }]
                })
            })
            .collect();
        serde_json::json!({ "data": data }).to_string()
    }

    fn swap_json(pool: &str, amount_in: u64) -> serde_json::Value {
        serde_json::json!({
            "pool_id": pool,
            "sqrt_price_before": "18446744073709551616",
            "sqrt_price_after": "18446744073709551616",
            "amount_in": amount_in.to_string(),
            "amount_out": amount_in.to_string(),
            "a_to_b": true,
            "fee": "1",
            "protocol_fee": "0",
            "reserve_0": "1000",
            "reserve_1": "1000",
            "tick": 0,
            "liquidity": "500000",
        })
    }

    fn liquidity_json(pool: &str) -> serde_json::Value {
        serde_json::json!({
            "pool_id": pool,
            "tick_lower": -10,
            "tick_upper": 10,
            "liquidity_amount": "12345",
            "reserve_0": "1000",
            "reserve_1": "1000",
            "after_liquidity": "12345",
        })
    }

    #[test]
    fn loads_filters_and_orders() {
        let dir = tempfile::tempdir().unwrap();

        // page 0: descending timestamps, one foreign-pool event
        let page_0 = page_json(&[
            ("dig_b", 3000, "0x2::pool::SwapEvent", 0, swap_json(POOL, 30)),
            ("dig_a", 1000, "0x2::pool::SwapEvent", 0, swap_json(POOL, 10)),
            ("dig_x", 1500, "0x2::pool::SwapEvent", 0, swap_json("0xother", 99)),
        ]);
        // page 1: an add-liquidity and an unknown kind
        let page_1 = page_json(&[
            (
                "dig_c",
                2000,
                "0x2::pool::AddLiquidityEvent",
                1,
                liquidity_json(POOL),
            ),
            (
                "dig_d",
                2500,
                "0x2::pool::CollectFeeEvent",
                0,
                serde_json::json!({"pool_id": POOL}),
            ),
        ]);
        std::fs::write(dir.path().join("page_000.json"), page_0).unwrap();
        std::fs::write(dir.path().join("page_001.json"), page_1).unwrap();

        let mut stream = load_archive(dir.path(), POOL, 0, u64::MAX).unwrap();
        assert_eq!(stream.total(), 3);

        let first = stream.next_event().unwrap();
        assert_eq!(first.timestamp_ms, 1000);
        assert!(matches!(first.payload, EventPayload::Swap(ref s) if s.amount_in == 10));

        let second = stream.next_event().unwrap();
        assert_eq!(second.timestamp_ms, 2000);
        match second.payload {
            EventPayload::AddLiquidity(ref ev) => {
                assert_eq!(ev.liquidity_delta, 12345);
                assert_eq!(ev.tick_lower, -10);
            }
            ref other => panic!("expected AddLiquidity, got {:?}", other),
        }

        let third = stream.next_event().unwrap();
        assert_eq!(third.timestamp_ms, 3000);
        assert!(stream.next_event().is_none());
    }

    #[test]
    fn time_range_filter_applies() {
        let dir = tempfile::tempdir().unwrap();
        let page = page_json(&[
            ("dig_a", 1000, "0x2::pool::SwapEvent", 0, swap_json(POOL, 1)),
            ("dig_b", 2000, "0x2::pool::SwapEvent", 0, swap_json(POOL, 2)),
            ("dig_c", 3000, "0x2::pool::SwapEvent", 0, swap_json(POOL, 3)),
        ]);
        std::fs::write(dir.path().join("page.json"), page).unwrap();

        let stream = load_archive(dir.path(), POOL, 1500, 2500).unwrap();
        assert_eq!(stream.total(), 1);
        assert_eq!(stream.peek_timestamp(), Some(2000));
    }

    #[test]
    fn corrupt_page_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let good = page_json(&[("dig_a", 1000, "0x2::pool::SwapEvent", 0, swap_json(POOL, 1))]);
        std::fs::write(dir.path().join("a_good.json"), good).unwrap();
        let mut corrupt = std::fs::File::create(dir.path().join("b_corrupt.json")).unwrap();
        corrupt.write_all(b"{ not json at all").unwrap();

        let stream = load_archive(dir.path(), POOL, 0, u64::MAX).unwrap();
        assert_eq!(stream.total(), 1);
    }

    #[test]
    fn missing_directory_is_a_config_error() {
        let err = load_archive(Path::new("/definitely/not/here"), POOL, 0, 1).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn equal_timestamps_order_by_digest_then_seq() {
        let events = vec![
            PoolEvent {
                timestamp_ms: 1000,
                tx_digest: "b".into(),
                event_seq: 0,
                payload: EventPayload::Swap(SwapEvent::default()),
            },
            PoolEvent {
                timestamp_ms: 1000,
                tx_digest: "a".into(),
                event_seq: 1,
                payload: EventPayload::Swap(SwapEvent::default()),
            },
            PoolEvent {
                timestamp_ms: 1000,
                tx_digest: "a".into(),
                event_seq: 0,
                payload: EventPayload::Swap(SwapEvent::default()),
            },
        ];
        let mut stream = EventStream::new(events);
        let first = stream.next_event().unwrap();
        assert_eq!((first.tx_digest.as_str(), first.event_seq), ("a", 0));
        let second = stream.next_event().unwrap();
        assert_eq!((second.tx_digest.as_str(), second.event_seq), ("a", 1));
        let third = stream.next_event().unwrap();
        assert_eq!(third.tx_digest.as_str(), "b");
    }
}
