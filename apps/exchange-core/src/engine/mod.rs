//! Exchange Engine Module
//! Matching, settlement, resolution and the services in front of them

pub mod dispatcher;
pub mod market_resolver;
pub mod matching;
pub mod order_book;
pub mod order_processor;
pub mod position_keeper;
pub mod settlement;

pub use dispatcher::MatchDispatcher;
pub use market_resolver::MarketResolver;
pub use matching::MatchingEngine;
pub use order_book::OrderBook;
pub use order_processor::OrderProcessor;
pub use position_keeper::PositionKeeper;
