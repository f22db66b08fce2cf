//! Feed frame decoder.
//!
//! Routes on the `type` field. Only `snapshot`, `l2update`, `match` and
//! `last_match` carry market data; everything else (`subscriptions`,
//! `heartbeat`, `error`, malformed input) decodes to
//! [`DecodedFrame::Unrecognized`].

use cbx_core::{L2Change, L2Update, Match, MarketEvent, PriceLevel, Side, Snapshot};
use tracing::{trace, warn};

use crate::json_util::{parse_f64_field, parse_level, parse_str_f64, parse_str_u64, parse_time_us};

/// Result of decoding one inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedFrame {
    Event(MarketEvent),
    Unrecognized,
}

/// Decode one text frame. Never fails.
pub fn decode_frame(text: &str) -> DecodedFrame {
    match parse_message(text) {
        Some(event) => DecodedFrame::Event(event),
        None => DecodedFrame::Unrecognized,
    }
}

fn parse_message(text: &str) -> Option<MarketEvent> {
    let v: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            trace!("[decode] malformed frame: {}", e);
            return None;
        }
    };

    let kind = v.get("type")?.as_str()?;
    let event = match kind {
        "snapshot" => parse_snapshot(&v),
        "l2update" => parse_l2update(&v),
        // `last_match` is sent once on subscribe with the same shape.
        "match" | "last_match" => parse_match(&v),
        "error" => {
            warn!(
                "[decode] server error: {} {}",
                v.get("message").and_then(|m| m.as_str()).unwrap_or("<no message>"),
                v.get("reason").and_then(|m| m.as_str()).unwrap_or("")
            );
            None
        }
        _ => None,
    };
    if event.is_none() {
        trace!("[decode] dropped {} frame", kind);
    }
    event
}

// ---------------------------------------------------------------------------
// Individual parsers
// ---------------------------------------------------------------------------

fn parse_levels(v: &serde_json::Value, key: &str) -> Option<Vec<PriceLevel>> {
    v.get(key)?
        .as_array()?
        .iter()
        .map(|l| parse_level(l).map(|(price, size)| PriceLevel { price, size }))
        .collect()
}

fn parse_snapshot(v: &serde_json::Value) -> Option<MarketEvent> {
    Some(MarketEvent::Snapshot(Snapshot {
        product_id: v.get("product_id")?.as_str()?.to_owned(),
        bids: parse_levels(v, "bids")?,
        asks: parse_levels(v, "asks")?,
    }))
}

fn parse_l2update(v: &serde_json::Value) -> Option<MarketEvent> {
    let changes = v
        .get("changes")?
        .as_array()?
        .iter()
        .map(|c| {
            let arr = c.as_array()?;
            let side = Side::from_wire(arr.first()?.as_str()?)?;
            Some(L2Change { side, price: parse_str_f64(arr.get(1))?, size: parse_str_f64(arr.get(2))? })
        })
        .collect::<Option<Vec<_>>>()?;

    Some(MarketEvent::L2Update(L2Update {
        product_id: v.get("product_id")?.as_str()?.to_owned(),
        time_us: parse_time_us(v.get("time"))?,
        changes,
    }))
}

fn parse_match(v: &serde_json::Value) -> Option<MarketEvent> {
    Some(MarketEvent::Match(Match {
        trade_id: parse_str_u64(v.get("trade_id"))?,
        sequence: parse_str_u64(v.get("sequence"))?,
        maker_order_id: v.get("maker_order_id")?.as_str()?.to_owned(),
        taker_order_id: v.get("taker_order_id")?.as_str()?.to_owned(),
        time_us: parse_time_us(v.get("time"))?,
        product_id: v.get("product_id")?.as_str()?.to_owned(),
        size: parse_f64_field(v, "size")?,
        price: parse_f64_field(v, "price")?,
        side: Side::from_wire(v.get("side")?.as_str()?)?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MATCH: &str = r#"{
        "type": "match",
        "trade_id": 10,
        "sequence": 50,
        "maker_order_id": "ac928c66-ca53-498f-9c13-a110027a60e8",
        "taker_order_id": "132fb6ae-456b-4654-b4e0-d681ac05cea1",
        "time": "2014-11-07T08:19:27.028459Z",
        "product_id": "BTC-USD",
        "size": "5.23512",
        "price": "400.23",
        "side": "sell"
    }"#;

    #[test]
    fn decodes_match() {
        let DecodedFrame::Event(MarketEvent::Match(m)) = decode_frame(MATCH) else {
            panic!("expected a match");
        };
        assert_eq!(m.trade_id, 10);
        assert_eq!(m.sequence, 50);
        assert_eq!(m.product_id, "BTC-USD");
        assert_eq!(m.price, 400.23);
        assert_eq!(m.size, 5.23512);
        assert_eq!(m.side, Side::Sell);
        assert_eq!(m.time_secs(), 1_415_348_367);
    }

    #[test]
    fn last_match_decodes_as_match() {
        let text = MATCH.replace("\"match\"", "\"last_match\"");
        assert!(matches!(decode_frame(&text), DecodedFrame::Event(MarketEvent::Match(_))));
    }

    #[test]
    fn decodes_snapshot() {
        let text = r#"{"type":"snapshot","product_id":"BTC-USD",
            "bids":[["10101.10","0.45054140"]],"asks":[["10102.55","0.57753524"],["10103","1"]]}"#;
        let DecodedFrame::Event(MarketEvent::Snapshot(s)) = decode_frame(text) else {
            panic!("expected a snapshot");
        };
        assert_eq!(s.bids, vec![PriceLevel { price: 10101.10, size: 0.45054140 }]);
        assert_eq!(s.asks.len(), 2);
        assert_eq!(s.asks[1].price, 10103.0);
    }

    #[test]
    fn decodes_l2update() {
        let text = r#"{"type":"l2update","product_id":"BTC-USD","time":"2019-08-14T20:42:27.265Z",
            "changes":[["buy","10101.80000000","0.162567"],["sell","10102.0","0"]]}"#;
        let DecodedFrame::Event(MarketEvent::L2Update(u)) = decode_frame(text) else {
            panic!("expected an l2update");
        };
        assert_eq!(u.time_us, 1_565_815_347_265_000);
        assert_eq!(u.changes.len(), 2);
        assert_eq!(u.changes[0], L2Change { side: Side::Buy, price: 10101.8, size: 0.162567 });
        assert_eq!(u.changes[1].size, 0.0);
    }

    #[test]
    fn heartbeat_and_others_are_unrecognized() {
        for text in [
            r#"{"type":"heartbeat","sequence":90,"last_trade_id":20,"product_id":"BTC-USD"}"#,
            r#"{"type":"subscriptions","channels":[]}"#,
            r#"{"type":"error","message":"Failed to subscribe","reason":"bad signature"}"#,
            r#"{"no_type":true}"#,
            "not json",
            "",
        ] {
            assert_eq!(decode_frame(text), DecodedFrame::Unrecognized, "{text}");
        }
    }

    #[test]
    fn missing_fields_are_unrecognized() {
        let text = MATCH.replace("\"price\": \"400.23\",", "");
        assert_eq!(decode_frame(&text), DecodedFrame::Unrecognized);
        let text = MATCH.replace("\"sell\"", "\"sideways\"");
        assert_eq!(decode_frame(&text), DecodedFrame::Unrecognized);
    }
}
