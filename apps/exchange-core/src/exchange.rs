//! Service wiring
//! One store, one publisher and the engine services sharing them

use std::sync::Arc;

use crate::engine::{MarketResolver, MatchDispatcher, MatchingEngine, OrderProcessor, PositionKeeper};
use crate::error::Result;
use crate::events::SharedPublisher;
use crate::store::SharedStore;

pub struct Exchange {
    pub store: SharedStore,
    pub publisher: SharedPublisher,
    pub dispatcher: Arc<MatchDispatcher>,
    pub orders: OrderProcessor,
    pub positions: PositionKeeper,
    pub resolver: MarketResolver,
}

impl Exchange {
    pub fn new(store: SharedStore, publisher: SharedPublisher, price_scale: u32) -> Self {
        let engine = Arc::new(MatchingEngine::new(
            store.clone(),
            publisher.clone(),
            price_scale,
        ));
        let dispatcher = Arc::new(MatchDispatcher::new(engine, store.clone()));

        Self {
            orders: OrderProcessor::new(
                store.clone(),
                publisher.clone(),
                dispatcher.clone(),
                price_scale,
            ),
            positions: PositionKeeper::new(store.clone()),
            resolver: MarketResolver::new(
                store.clone(),
                publisher.clone(),
                dispatcher.clone(),
                price_scale,
            ),
            store,
            publisher,
            dispatcher,
        }
    }

    /// Replays match tasks a previous process left pending
    pub async fn recover(&self) -> Result<usize> {
        self.dispatcher.recover().await
    }
}
