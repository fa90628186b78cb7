//! Deterministic total order over events sharing a trade date, plus the
//! legality check (no sell without prior holdings) that gates replay.

use crate::errors::EngineError;
use crate::model::{Event, EventType};

/// Intra-day tie-break rank. Splits apply before trading, buys/drips add
/// shares before dividends/ROC are assessed against them, sells settle last.
pub fn type_rank(kind: EventType) -> u8 {
    match kind {
        EventType::Split => 0,
        EventType::Buy | EventType::Drip => 1,
        EventType::Dividend | EventType::Roc => 2,
        EventType::Sell => 3,
    }
}

/// Sorts events by `(date, typeRank, seq)`. This is the only place in the
/// engine that establishes canonical order; every other component consumes
/// an already-ordered slice.
pub fn canonical_order(mut events: Vec<Event>) -> Vec<Event> {
    events.sort_by(|a, b| {
        a.date
            .cmp(&b.date)
            .then_with(|| type_rank(a.kind).cmp(&type_rank(b.kind)))
            .then_with(|| a.seq.cmp(&b.seq))
    });
    events
}

/// Walks the canonically-ordered slice and rejects it if any sell would
/// leave a negative share balance at the point it settles. Returns the
/// event id of the first offending sell.
pub fn check_legality(ordered: &[Event]) -> Result<(), EngineError> {
    let mut shares = rust_decimal::Decimal::ZERO;
    for event in ordered {
        match event.kind {
            EventType::Buy | EventType::Drip => {
                shares += event.quantity.raw();
            }
            EventType::Split => {
                if let Some(ratio) = event.ratio {
                    shares *= ratio;
                }
            }
            EventType::Sell => {
                if event.quantity.raw() > shares {
                    return Err(EngineError::legality(format!(
                        "sell of {} shares on {} exceeds held position of {} shares",
                        event.quantity.raw(),
                        event.date,
                        shares
                    )));
                }
                shares -= event.quantity.raw();
            }
            EventType::Dividend | EventType::Roc => {}
        }
    }
    Ok(())
}
