//! Market Resolution & Claim Tests

mod common;

use chrono::{Duration, Utc};
use common::{limit, outcome_id, trader, Harness};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use uuid::Uuid;

use exchange_core::auth::AuthContext;
use exchange_core::domain::{MarketStatus, MarketWithOutcomes, OrderStatus, OutcomeLabel, Side};
use exchange_core::events::ExchangeEvent;
use exchange_core::store::ExchangeStore;
use exchange_core::ExchangeError;

#[cfg(test)]
mod resolution_tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    /// A holds 40 YES at 0.55 with 60 still bid; B sold those 40 short
    async fn traded_market(h: &Harness) -> (MarketWithOutcomes, AuthContext, AuthContext, Uuid) {
        let market = h.market().await;
        let (a, b) = (trader(), trader());

        h.submit(&b, limit(&market, OutcomeLabel::Yes, Side::Sell, dec!(40), dec!(0.55)))
            .await;
        let bid = h
            .submit(&a, limit(&market, OutcomeLabel::Yes, Side::Buy, dec!(100), dec!(0.60)))
            .await;
        assert_eq!(bid.status, OrderStatus::PartiallyFilled);

        (market, a, b, bid.id)
    }

    #[tokio::test]
    async fn test_resolve_yes_settles_prices_orders_and_positions() {
        let h = Harness::new();
        let (market, a, _b, bid_id) = traded_market(&h).await;

        let resolved = assert_ok!(
            h.exchange
                .resolver
                .resolve_market(&h.admin, market.market.id, OutcomeLabel::Yes)
                .await
        );
        assert_eq!(resolved.market.status, MarketStatus::Resolved);
        assert_eq!(resolved.market.outcome, Some(OutcomeLabel::Yes));
        assert!(resolved.market.resolved_at.is_some());
        assert_eq!(resolved.outcome(OutcomeLabel::Yes).unwrap().price, Decimal::ONE);
        assert_eq!(resolved.outcome(OutcomeLabel::No).unwrap().price, Decimal::ZERO);

        let bid = h.order(bid_id).await;
        assert_eq!(bid.status, OrderStatus::Cancelled);
        assert_eq!(bid.remaining, dec!(60));

        let open = assert_ok!(h.store.open_orders(market.market.id).await);
        assert!(open.is_empty());

        let positions = assert_ok!(h.exchange.positions.positions(&a).await);
        assert_eq!(positions.len(), 1);
        let position = &positions[0];
        assert_eq!(position.shares(), dec!(40));
        assert_eq!(position.avg_price(), Some(dec!(0.55)));
        assert_eq!(position.current_value, dec!(40));
        assert_eq!(position.pnl, dec!(18));
    }

    #[tokio::test]
    async fn test_every_position_is_marked_after_resolution() {
        let h = Harness::new();
        let market = h.market().await;
        let (yes_holder, no_holder) = (trader(), trader());

        h.submit(&trader(), limit(&market, OutcomeLabel::Yes, Side::Sell, dec!(10), dec!(0.70)))
            .await;
        h.submit(&yes_holder, limit(&market, OutcomeLabel::Yes, Side::Buy, dec!(10), dec!(0.70)))
            .await;
        h.submit(&trader(), limit(&market, OutcomeLabel::No, Side::Sell, dec!(8), dec!(0.30)))
            .await;
        h.submit(&no_holder, limit(&market, OutcomeLabel::No, Side::Buy, dec!(8), dec!(0.30)))
            .await;

        assert_ok!(
            h.exchange
                .resolver
                .resolve_market(&h.admin, market.market.id, OutcomeLabel::Yes)
                .await
        );

        let yes_id = outcome_id(&market, OutcomeLabel::Yes);
        let positions = assert_ok!(h.store.market_positions(market.market.id).await);
        assert!(!positions.is_empty());
        for position in &positions {
            let expected = if position.outcome_id == yes_id {
                position.shares()
            } else {
                Decimal::ZERO
            };
            assert_eq!(position.current_value, expected);
        }

        let loser = assert_ok!(h.exchange.positions.positions(&no_holder).await);
        assert_eq!(loser[0].current_value, Decimal::ZERO);
        assert_eq!(loser[0].pnl, dec!(-2.4));
    }

    #[tokio::test]
    async fn test_resolved_market_rejects_orders_and_second_resolution() {
        let h = Harness::new();
        let market = h.market().await;

        assert_ok!(
            h.exchange
                .resolver
                .resolve_market(&h.admin, market.market.id, OutcomeLabel::No)
                .await
        );

        let req = limit(&market, OutcomeLabel::Yes, Side::Buy, dec!(1), dec!(0.5));
        let err = assert_err!(h.exchange.orders.submit_order(&trader(), req).await);
        assert!(matches!(err, ExchangeError::Validation(_)));
        assert_eq!(err.to_string(), "Market is not active");

        let err = assert_err!(
            h.exchange
                .resolver
                .resolve_market(&h.admin, market.market.id, OutcomeLabel::Yes)
                .await
        );
        assert!(matches!(err, ExchangeError::Validation(_)));

        let market = assert_ok!(h.store.get_market(market.market.id).await);
        assert_eq!(market.market.outcome, Some(OutcomeLabel::No));
    }

    #[tokio::test]
    async fn test_trader_cannot_resolve() {
        let h = Harness::new();
        let market = h.market().await;

        let err = assert_err!(
            h.exchange
                .resolver
                .resolve_market(&trader(), market.market.id, OutcomeLabel::Yes)
                .await
        );
        assert!(matches!(err, ExchangeError::Forbidden(_)));

        let market = assert_ok!(h.store.get_market(market.market.id).await);
        assert_eq!(market.market.status, MarketStatus::Active);
    }

    #[tokio::test]
    async fn test_resolve_unknown_market_is_not_found() {
        let h = Harness::new();
        let err = assert_err!(
            h.exchange
                .resolver
                .resolve_market(&h.admin, Uuid::new_v4(), OutcomeLabel::Yes)
                .await
        );
        assert!(matches!(err, ExchangeError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_resolution_publishes_event_and_empty_book() {
        let mut h = Harness::new();
        let (market, _a, _b, _) = traded_market(&h).await;
        h.drain_events();

        assert_ok!(
            h.exchange
                .resolver
                .resolve_market(&h.admin, market.market.id, OutcomeLabel::Yes)
                .await
        );
        let events = h.drain_events();

        assert!(events.iter().any(|e| matches!(
            e,
            ExchangeEvent::MarketResolved(r)
                if r.market_id == market.market.id && r.outcome == OutcomeLabel::Yes
        )));
        assert!(events.iter().any(|e| matches!(
            e,
            ExchangeEvent::OrderBookUpdated(u) if u.ladder.outcomes.is_empty()
        )));
    }

    // =====================================================
    // CLAIMS
    // =====================================================

    #[tokio::test]
    async fn test_claim_pays_out_once() {
        let h = Harness::new();
        let (market, a, _b, _) = traded_market(&h).await;
        assert_ok!(
            h.exchange
                .resolver
                .resolve_market(&h.admin, market.market.id, OutcomeLabel::Yes)
                .await
        );

        let claim = assert_ok!(h.exchange.positions.claim_winnings(&a, market.market.id).await);
        assert_eq!(claim.winnings, dec!(40));
        assert_eq!(claim.pnl, dec!(18));
        assert_eq!(claim.shares, dec!(40));

        let after_first = assert_ok!(h.store.user_positions(a.user_id).await);
        assert_eq!(after_first[0].shares(), Decimal::ZERO);
        assert_eq!(after_first[0].avg_price(), None);
        assert_eq!(after_first[0].current_value, Decimal::ZERO);
        assert_eq!(after_first[0].pnl, dec!(18));

        let err = assert_err!(h.exchange.positions.claim_winnings(&a, market.market.id).await);
        assert!(matches!(err, ExchangeError::Validation(_)));

        let after_second = assert_ok!(h.store.user_positions(a.user_id).await);
        assert_eq!(after_second[0].pnl, dec!(18));
        assert_eq!(after_second[0].shares(), Decimal::ZERO);
        assert_eq!(after_second[0].updated_at, after_first[0].updated_at);
    }

    #[tokio::test]
    async fn test_claim_before_resolution_is_rejected() {
        let h = Harness::new();
        let (market, a, _b, _) = traded_market(&h).await;

        let err = assert_err!(h.exchange.positions.claim_winnings(&a, market.market.id).await);
        assert!(matches!(err, ExchangeError::Validation(_)));

        let positions = assert_ok!(h.exchange.positions.positions(&a).await);
        assert_eq!(positions[0].shares(), dec!(40));
    }

    #[tokio::test]
    async fn test_claim_without_winning_position_is_not_found() {
        let h = Harness::new();
        let (market, a, _b, _) = traded_market(&h).await;
        assert_ok!(
            h.exchange
                .resolver
                .resolve_market(&h.admin, market.market.id, OutcomeLabel::No)
                .await
        );

        let err = assert_err!(h.exchange.positions.claim_winnings(&a, market.market.id).await);
        assert!(matches!(err, ExchangeError::NotFound(_)));

        let err = assert_err!(
            h.exchange
                .positions
                .claim_winnings(&trader(), market.market.id)
                .await
        );
        assert!(matches!(err, ExchangeError::NotFound(_)));
    }

    // =====================================================
    // AUTO-RESOLUTION SWEEP
    // =====================================================

    #[tokio::test]
    async fn test_sweep_resolves_only_expired_markets_by_yes_price() {
        let h = Harness::new();
        let now = Utc::now();

        let untouched = h.market().await;
        let even = h.market_resolving_at(now - Duration::hours(1)).await;
        let bearish = h.market_resolving_at(now - Duration::hours(2)).await;

        // Last YES trade at 0.30 tips the placeholder policy to NO
        h.submit(&trader(), limit(&bearish, OutcomeLabel::Yes, Side::Sell, dec!(5), dec!(0.30)))
            .await;
        h.submit(&trader(), limit(&bearish, OutcomeLabel::Yes, Side::Buy, dec!(5), dec!(0.30)))
            .await;
        let resting = h
            .submit(&trader(), limit(&bearish, OutcomeLabel::Yes, Side::Buy, dec!(5), dec!(0.20)))
            .await;

        let report = assert_ok!(h.exchange.resolver.sweep_expired(now).await);
        assert_eq!(report.resolved.len(), 2);
        assert!(report.failed.is_empty());
        assert!(report.resolved.contains(&even.market.id));
        assert!(report.resolved.contains(&bearish.market.id));

        let even = assert_ok!(h.store.get_market(even.market.id).await);
        assert_eq!(even.market.outcome, Some(OutcomeLabel::Yes));

        let bearish = assert_ok!(h.store.get_market(bearish.market.id).await);
        assert_eq!(bearish.market.outcome, Some(OutcomeLabel::No));
        assert_eq!(h.order(resting.id).await.status, OrderStatus::Cancelled);

        let untouched = assert_ok!(h.store.get_market(untouched.market.id).await);
        assert_eq!(untouched.market.status, MarketStatus::Active);

        let again = assert_ok!(h.exchange.resolver.sweep_expired(Utc::now()).await);
        assert!(again.resolved.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_failure_is_isolated_to_its_market() {
        use crate::common::ScriptedStore;
        use exchange_core::engine::order_book::DEFAULT_PRICE_SCALE;
        use exchange_core::events::BroadcastPublisher;
        use exchange_core::Exchange;
        use std::sync::Arc;

        let store = Arc::new(ScriptedStore::new());
        let exchange = Exchange::new(
            store.clone(),
            Arc::new(BroadcastPublisher::new(64)),
            DEFAULT_PRICE_SCALE,
        );
        let now = Utc::now();

        let mut ids = Vec::new();
        for question in ["Will the first one fail?", "Will the second one resolve?"] {
            let market = assert_ok!(
                store
                    .create_market(MarketWithOutcomes::open(
                        question.to_string(),
                        now - Duration::hours(1),
                        now - Duration::days(1),
                    ))
                    .await
            );
            ids.push(market.market.id);
        }
        let (broken, healthy) = (ids[0], ids[1]);
        store.fail_resolution_of(broken);

        let report = assert_ok!(exchange.resolver.sweep_expired(now).await);
        assert_eq!(report.failed, vec![broken]);
        assert_eq!(report.resolved, vec![healthy]);

        let healthy = assert_ok!(store.get_market(healthy).await);
        assert_eq!(healthy.market.status, MarketStatus::Resolved);
        let broken = assert_ok!(store.get_market(broken).await);
        assert_eq!(broken.market.status, MarketStatus::Active);
    }
}
