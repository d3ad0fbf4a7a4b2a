use std::sync::Arc;
use std::time::Duration;

use common::{MeanReversionParams, NewStrategy, StrategyParams};
use engine::StrategyEngine;
use feeds::SimulatedFeed;
use proptest::prelude::*;
use store::MemoryGateway;

fn request(i: usize) -> NewStrategy {
    NewStrategy {
        name: format!("s{i}"),
        params: StrategyParams::MeanReversion(MeanReversionParams {
            lookback_period: 20,
            buy_threshold: -0.08,
            sell_threshold: 0.02,
        }),
        stock_universe: vec!["000001".into()],
        rebalance_frequency: 10,
    }
}

async fn walk(engine: &StrategyEngine, limit: i64) -> Vec<String> {
    let mut out = Vec::new();
    let mut offset = 0;
    loop {
        let page = engine.list_strategies(None, limit, offset).await.unwrap();
        if page.is_empty() {
            return out;
        }
        offset += page.len() as i64;
        out.extend(page.into_iter().map(|s| s.id));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// The store and the working-set fallback page through the same listing.
    #[test]
    fn fallback_listing_matches_store_listing(count in 0usize..15, limit in 1i64..6) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let store = MemoryGateway::new();
            let engine = StrategyEngine::builder(Arc::new(store.clone()), Arc::new(SimulatedFeed::new()))
                .persistence_timeout(Duration::from_millis(100))
                .build();
            for i in 0..count {
                engine.create_strategy(request(i)).await.unwrap();
            }

            let from_store = walk(&engine, limit).await;
            assert_eq!(from_store.len(), count);

            store.set_offline(true);
            let from_working_set = walk(&engine, limit).await;
            assert_eq!(from_working_set, from_store);
        });
    }
}
