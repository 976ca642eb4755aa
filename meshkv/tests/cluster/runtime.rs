//! The tokio driver over a lossy channel mesh.

use meshkv::client::Outcome;
use meshkv::runtime::LocalCluster;
use meshkv::{ClusterConfig, Datum};
use tokio::task::LocalSet;

use crate::init_tracing;

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn test_lossy_runtime_answers_every_request() {
    init_tracing();
    LocalSet::new()
        .run_until(async {
            let config = ClusterConfig {
                shards: 4,
                relays: 2,
                ..ClusterConfig::default()
            };
            let mut cluster = LocalCluster::start(&config, 0.2, 7).expect("start");

            let mut stored = Vec::new();
            for i in 0..20 {
                let key = format!("key-{}", i);
                let response = cluster.put(key.as_str(), "value").await.expect("response");
                match response.outcome {
                    Outcome::Stored => stored.push(key),
                    Outcome::RetryExhausted => {}
                    other => panic!("unexpected put outcome {:?}", other),
                }
            }
            assert!(!stored.is_empty());

            for key in &stored {
                let response = cluster.pull(key.as_str()).await.expect("response");
                match response.outcome {
                    Outcome::Found(value) => assert_eq!(value, Datum::text("value")),
                    Outcome::RetryExhausted => {}
                    other => panic!("unexpected pull outcome {:?}", other),
                }
            }

            assert!(cluster.dropped_packets() > 0);
            cluster.shutdown();
        })
        .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn test_clear_over_runtime() {
    init_tracing();
    LocalSet::new()
        .run_until(async {
            let config = ClusterConfig::default();
            let mut cluster = LocalCluster::start(&config, 0.0, 1).expect("start");
            cluster.put("k", "v").await.expect("response");

            let cleared = cluster.clear().await.expect("response");
            assert_eq!(cleared.outcome, Outcome::Cleared);

            let missing = cluster.pull("k").await.expect("response");
            assert_eq!(missing.outcome, Outcome::NotFound);
            cluster.shutdown();
        })
        .await;
}
