//! End-to-end flow: wire frames through the normalizer, the book store and
//! the strategy, and the resulting intents through the order state machine.

mod support;

use std::sync::Arc;

use chrono::Utc;
use rust_decimal_macros::dec;

use bookedge::core::book::{BookAnomaly, BookStore};
use bookedge::core::domain::{EventKind, MarketId, OrderStatus, TokenId};
use bookedge::core::normalize::parse_levels;
use bookedge::core::order::OrderConfig;
use bookedge::core::strategy::{Strategy, StrategyParams};

use support::{
    book_frame, normalizer, order_manager, registry, rules, user_frame, RecordingExecution,
    MARKET, NO, YES,
};

fn apply_frame(
    store: &mut BookStore,
    normalizer: &bookedge::core::normalize::Normalizer,
    frame: serde_json::Value,
) -> Result<(), BookAnomaly> {
    let event = normalizer.from_market_frame(frame, Utc::now()).expect("frame");
    assert_eq!(event.kind, EventKind::OrderBookUpdate);
    store
        .upsert(
            event.market_id.clone(),
            event.token_id.clone().expect("token"),
            parse_levels(event.payload.get("bids")),
            parse_levels(event.payload.get("asks")),
            event.recv_ts,
            event.exchange_ts,
            true,
            true,
        )
        .map(|_| ())
}

#[tokio::test]
async fn arbitrage_books_produce_two_quantized_orders() {
    let registry = registry();
    let normalizer = normalizer(&registry);
    let mut store = BookStore::new();

    apply_frame(
        &mut store,
        &normalizer,
        book_frame(YES, &[("0.30", "50")], &[("0.45", "50")]),
    )
    .unwrap();
    apply_frame(
        &mut store,
        &normalizer,
        book_frame(NO, &[("0.30", "50")], &[("0.45", "50")]),
    )
    .unwrap();

    let strategy = Strategy::new(StrategyParams::default(), rules(&registry));
    let market = MarketId::from(MARKET);
    let intents = strategy.compute_intents(
        store.get(&market, &TokenId::from(YES)),
        store.get(&market, &TokenId::from(NO)),
        &market,
        &TokenId::from(YES),
        &TokenId::from(NO),
        dec!(0),
    );
    assert_eq!(intents.len(), 2);

    let execution = Arc::new(RecordingExecution::default());
    let mut manager = order_manager(&registry, execution.clone(), OrderConfig::default());
    for intent in &intents {
        let decision = manager.process_intent(intent, false).await;
        assert!(decision.accepted, "{}", decision.reason);
    }

    let places = execution.places.lock();
    assert_eq!(places.len(), 2);
    assert_eq!(places[0].token_id.as_str(), YES);
    assert_eq!(places[1].token_id.as_str(), NO);
    for place in places.iter() {
        assert_eq!(place.price, dec!(0.45));
        assert_eq!(place.size, dec!(0.1));
    }
    assert_eq!(manager.live_open_orders_count(None), 2);
}

#[tokio::test]
async fn replayed_book_update_does_not_duplicate_orders() {
    let registry = registry();
    let normalizer = normalizer(&registry);
    let mut store = BookStore::new();
    for _ in 0..2 {
        apply_frame(
            &mut store,
            &normalizer,
            book_frame(YES, &[("0.30", "50")], &[("0.45", "50")]),
        )
        .unwrap();
        apply_frame(
            &mut store,
            &normalizer,
            book_frame(NO, &[("0.30", "50")], &[("0.45", "50")]),
        )
        .unwrap();
    }

    let strategy = Strategy::new(StrategyParams::default(), rules(&registry));
    let execution = Arc::new(RecordingExecution::default());
    let mut manager = order_manager(&registry, execution.clone(), OrderConfig::default());
    let market = MarketId::from(MARKET);

    // Two identical decision cycles back to back.
    for _ in 0..2 {
        let intents = strategy.compute_intents(
            store.get(&market, &TokenId::from(YES)),
            store.get(&market, &TokenId::from(NO)),
            &market,
            &TokenId::from(YES),
            &TokenId::from(NO),
            dec!(0),
        );
        for intent in &intents {
            manager.process_intent(intent, false).await;
        }
    }

    assert_eq!(execution.places.lock().len(), 2);
    assert_eq!(manager.live_open_orders_count(None), 2);
}

#[tokio::test]
async fn crossed_book_frame_is_rejected_not_stored() {
    let registry = registry();
    let normalizer = normalizer(&registry);
    let mut store = BookStore::new();

    let err = apply_frame(
        &mut store,
        &normalizer,
        book_frame(YES, &[("0.60", "10")], &[("0.50", "10")]),
    )
    .unwrap_err();
    assert_eq!(err, BookAnomaly::Crossed);
    assert!(store
        .get(&MarketId::from(MARKET), &TokenId::from(YES))
        .is_none());
}

#[tokio::test]
async fn user_stream_acks_and_fills_drive_order_state() {
    let registry = registry();
    let normalizer = normalizer(&registry);
    let execution = Arc::new(RecordingExecution::default());
    let mut manager = order_manager(&registry, execution, OrderConfig::default());

    let intent = bookedge::core::domain::Intent::place(
        MarketId::from(MARKET),
        TokenId::from(YES),
        bookedge::core::domain::Side::Buy,
        dec!(0.45),
        dec!(0.1),
        Some(5000),
        bookedge::core::domain::TimeInForce::Maker,
        "test",
    );
    let decision = manager.process_intent(&intent, false).await;
    let client_order_id = decision.client_order_id.unwrap();

    // Venue ack arrives over the user stream.
    let ack = normalizer
        .from_user_frame(
            user_frame("order", &client_order_id, serde_json::json!({"order_id": "v-1"})),
            Utc::now(),
        )
        .unwrap();
    assert_eq!(ack.kind, EventKind::OrderAck);
    manager.on_ack(&client_order_id, ack.payload_str("order_id"));
    assert_eq!(manager.get(&client_order_id).unwrap().status, OrderStatus::Acked);
    assert_eq!(manager.get("v-1").unwrap().client_order_id, client_order_id);

    // Partial then full fill.
    let fill = normalizer
        .from_user_frame(
            user_frame(
                "fill",
                &client_order_id,
                serde_json::json!({"price": "0.45", "size": "0.05", "side": "buy"}),
            ),
            Utc::now(),
        )
        .unwrap();
    assert_eq!(fill.kind, EventKind::Fill);
    manager.on_fill(&client_order_id, fill.payload_decimal("size").unwrap());
    assert_eq!(manager.get(&client_order_id).unwrap().status, OrderStatus::Partial);

    manager.on_fill(&client_order_id, dec!(0.05));
    let order = manager.get(&client_order_id).unwrap();
    assert_eq!(order.status, OrderStatus::Filled);
    assert_eq!(order.remaining_size, dec!(0));
}

#[tokio::test]
async fn failed_replace_cancel_blocks_new_order() {
    let registry = registry();
    let execution = Arc::new(RecordingExecution::default());
    let mut manager = order_manager(
        &registry,
        execution.clone(),
        OrderConfig {
            default_ttl_ms: 10_000,
            min_order_lifetime_ms: 0,
            max_cancels_per_sec_per_market: 10,
        },
    );

    let place = |price| {
        bookedge::core::domain::Intent::place(
            MarketId::from(MARKET),
            TokenId::from(YES),
            bookedge::core::domain::Side::Buy,
            price,
            dec!(0.1),
            Some(10_000),
            bookedge::core::domain::TimeInForce::Maker,
            "test",
        )
    };
    let first = manager.process_intent(&place(dec!(0.45)), false).await;
    assert!(first.accepted);

    execution.fail_cancels(true);
    let second = manager.process_intent(&place(dec!(0.44)), false).await;
    assert!(!second.accepted);
    assert!(second.reason.starts_with("replace_cancel_failed"), "{}", second.reason);
    assert_eq!(manager.live_open_orders_count(None), 1);
}

/// Shared registry means a disabled market disappears for every component.
#[test]
fn registry_disable_is_visible_through_shared_handle() {
    let registry = registry();
    let rules = rules(&registry);
    assert_eq!(
        rules.tick_size(&MarketId::from(MARKET), &TokenId::from(YES)),
        dec!(0.01)
    );
    registry.write().disable(&MarketId::from(MARKET));
    // Lookup falls back to defaults once the market is gone.
    assert_eq!(
        rules.tick_size(&MarketId::from(MARKET), &TokenId::from(YES)),
        dec!(0.001)
    );
}
