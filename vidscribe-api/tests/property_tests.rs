//! Property-based tests for admission and queue ordering, driven by the
//! generators in `vidscribe-test-utils`.

use std::sync::Arc;

use proptest::prelude::*;
use vidscribe_api::{ErrorCode, JobNotifier, ResourceGateway};
use vidscribe_test_utils::generators::{arb_payload, arb_quota};
use vidscribe_test_utils::*;

fn gateway(backends: &MemoryBackends) -> ResourceGateway {
    ResourceGateway::new(
        backends.limiter.clone(),
        Arc::new(FailOpenCache::new(backends.cache.clone())),
        backends.queue.clone(),
        JobNotifier::new(16),
        Arc::new(backends.clock.clone()),
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Within one window exactly `limit` requests are admitted, and the
    /// rejection carries a retry hint inside the window.
    #[test]
    fn prop_gateway_admits_exactly_the_quota(quota in arb_quota()) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let backends = MemoryBackends::new(
                LimiterPolicy::empty().with_quota(ResourceClass::CHAT, quota),
                QueueSettings::default(),
            );
            let gw = gateway(&backends);

            for _ in 0..quota.limit {
                prop_assert!(gw.admit("10.1.1.1", &ResourceClass::CHAT).await.is_ok());
            }
            let err = gw.admit("10.1.1.1", &ResourceClass::CHAT).await.unwrap_err();
            prop_assert_eq!(err.code, ErrorCode::TooManyRequests);
            let info = err.rate_limit.unwrap();
            prop_assert!(info.retry_after_secs <= quota.window.as_secs());

            // Another identity has its own window.
            prop_assert!(gw.admit("10.1.1.2", &ResourceClass::CHAT).await.is_ok());
            Ok(())
        })?;
    }

    /// Jobs are delivered in enqueue order with their payloads intact.
    #[test]
    fn prop_queue_delivers_in_enqueue_order(
        payloads in proptest::collection::vec(arb_payload(), 1..20),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let backends = MemoryBackends::new(
                LimiterPolicy::default(),
                QueueSettings::default().with_overload_threshold(100),
            );
            let mut ids = Vec::new();
            for payload in &payloads {
                ids.push(backends.queue.enqueue(payload.clone()).await.unwrap().id);
            }
            prop_assert_eq!(
                backends.queue.position_in_queue(ids[ids.len() - 1]).await.unwrap(),
                Some(ids.len() as u64)
            );

            for (expected_id, payload) in ids.iter().zip(&payloads) {
                let (job, lease) = backends.queue.dequeue("w").await.unwrap().unwrap();
                prop_assert_eq!(job.id, *expected_id);
                prop_assert_eq!(&job.payload, payload);
                prop_assert_eq!(job.payload.cache_key(), payload.cache_key());
                prop_assert_eq!(lease.job_id, job.id);
            }
            prop_assert!(backends.queue.dequeue("w").await.unwrap().is_none());
            Ok(())
        })?;
    }
}
