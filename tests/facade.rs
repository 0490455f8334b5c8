//! End-to-end facade behavior: creation, sticky delegates, TTL expiry, and
//! upstream filter loss.

mod common;

use std::time::Duration;

use alloy::primitives::Address;
use common::{CHAIN_ID, NODE1, NODE2, fast_config, harness, run_for};
use virtual_filter::{
    FilterChanges, FilterKind, LogIngestor, LogQuery, VirtualFilterError,
    test_utils::log_at,
};

fn query_for(address: Address) -> LogQuery {
    LogQuery::new().address(address).from_block(100u64).to_block(200u64)
}

#[tokio::test(start_paused = true)]
async fn create_log_filter_registers_a_delegate_bound_record() {
    let h = harness(fast_config());
    let address = Address::repeat_byte(0xaa);

    let id = h.api.new_log_filter(NODE1, query_for(address)).await.unwrap();

    assert!(!id.is_nil());
    let record = h.api.registry().get(id).unwrap();
    assert_eq!(record.kind, FilterKind::Log);
    assert_eq!(record.delegate.node_url, NODE1);
    assert_eq!(record.query, Some(query_for(address)));

    // The delegate filter exists on the originating node.
    assert!(h.node(NODE1).has_filter(record.delegate.fid));
    assert_eq!(h.node(NODE2).filter_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn rerouted_client_still_polls_the_original_node() {
    let h = harness(fast_config());
    let address = Address::repeat_byte(0xaa);
    let id = h.api.new_log_filter(NODE1, query_for(address)).await.unwrap();

    h.node(NODE1).push_logs(vec![log_at(150, address)]);
    run_for(100).await;

    // The frontend rehashed the client onto node2; the call must succeed
    // against the node1 delegate regardless.
    let changes = h.api.get_filter_changes(NODE2, id).await.unwrap();

    assert_eq!(changes.len(), 1);
    assert!(h.node(NODE2).calls().is_empty());
    // The idle timer was refreshed by the call.
    assert_eq!(h.api.registry().get(id).unwrap().idle_for(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn uninstall_is_idempotent_and_calls_upstream_once() {
    let h = harness(fast_config());
    let id = h.api.new_log_filter(NODE1, query_for(Address::repeat_byte(0xaa))).await.unwrap();

    assert!(h.api.uninstall_filter(NODE1, id).await.unwrap());
    assert!(!h.api.uninstall_filter(NODE1, id).await.unwrap());

    assert_eq!(h.node(NODE1).call_count("eth_uninstallFilter"), 1);
    assert_eq!(h.node(NODE1).filter_count(), 0);
    assert!(h.api.registry().is_empty());
}

#[tokio::test(start_paused = true)]
async fn uninstall_from_a_rerouted_node_uses_the_delegate() {
    let h = harness(fast_config());
    let id = h.api.new_block_filter(NODE1).await.unwrap();

    assert!(h.api.uninstall_filter(NODE2, id).await.unwrap());

    assert_eq!(h.node(NODE1).call_count("eth_uninstallFilter"), 1);
    assert_eq!(h.node(NODE2).call_count("eth_uninstallFilter"), 0);
}

#[tokio::test(start_paused = true)]
async fn idle_filters_expire_and_cascade_the_delegate_uninstall() {
    let h = harness(fast_config());
    let id = h.api.new_log_filter(NODE1, query_for(Address::repeat_byte(0xaa))).await.unwrap();
    let fid = h.api.registry().get(id).unwrap().delegate.fid;

    // Idle past the TTL; the reaper runs at ttl/2.
    run_for(2_000).await;

    assert!(h.api.registry().is_empty());
    assert!(!h.node(NODE1).has_filter(fid));
    assert_eq!(h.node(NODE1).call_count("eth_uninstallFilter"), 1);

    let error = h.api.get_filter_changes(NODE1, id).await.unwrap_err();
    assert!(error.is_filter_not_found());
}

#[tokio::test(start_paused = true)]
async fn polling_keeps_a_filter_alive_past_the_ttl() {
    let h = harness(fast_config());
    let id = h.api.new_log_filter(NODE1, query_for(Address::repeat_byte(0xaa))).await.unwrap();

    for _ in 0..5 {
        run_for(300).await;
        h.api.get_filter_changes(NODE1, id).await.unwrap();
    }

    assert!(h.api.registry().get(id).is_some());
}

#[tokio::test(start_paused = true)]
async fn upstream_filter_loss_invalidates_the_local_record() {
    let h = harness(fast_config());
    let id = h.api.new_log_filter(NODE1, query_for(Address::repeat_byte(0xaa))).await.unwrap();
    let fid = h.api.registry().get(id).unwrap().delegate.fid;

    // The node forgets the filter (restart); the next poll observes it.
    h.node(NODE1).drop_filter(fid);
    run_for(100).await;

    let error = h.api.get_filter_changes(NODE1, id).await.unwrap_err();
    assert!(error.is_filter_not_found());
    assert!(h.api.registry().get(id).is_none());
}

#[tokio::test(start_paused = true)]
async fn block_filters_proxy_hashes_straight_through() {
    let h = harness(fast_config());
    let id = h.api.new_block_filter(NODE1).await.unwrap();
    let fid = h.api.registry().get(id).unwrap().delegate.fid;

    let hashes = vec![alloy::primitives::B256::repeat_byte(0x0b)];
    h.node(NODE1).push_changes(fid, FilterChanges::Hashes(hashes.clone()));

    let changes = h.api.get_filter_changes(NODE1, id).await.unwrap();

    assert_eq!(changes, FilterChanges::Hashes(hashes));
}

#[tokio::test(start_paused = true)]
async fn get_filter_logs_rejects_non_log_filters() {
    let h = harness(fast_config());
    let id = h.api.new_block_filter(NODE1).await.unwrap();

    let error = h.api.get_filter_logs(NODE1, id).await.unwrap_err();

    assert!(error.is_filter_not_found());
    // Wrong-type lookups do not destroy the record.
    assert!(h.api.registry().get(id).is_some());
}

#[tokio::test(start_paused = true)]
async fn pre_hardfork_ranges_answer_empty_without_touching_upstream() {
    let config = fast_config().hardfork_block(CHAIN_ID, 1_000);
    let h = harness(config);
    let query = LogQuery::new().from_block(10u64).to_block(500u64);
    let id = h.api.new_log_filter(NODE1, query).await.unwrap();

    let logs = h.api.get_filter_logs(NODE1, id).await.unwrap();

    assert!(logs.is_empty());
    assert_eq!(h.node(NODE1).call_count("eth_getLogs"), 0);
    assert_eq!(h.node(NODE1).call_count("eth_getFilterLogs"), 0);
}

#[tokio::test(start_paused = true)]
async fn ambiguous_queries_are_rejected_as_invalid() {
    let h = harness(fast_config());
    let id = h.api.new_log_filter(NODE1, query_for(Address::repeat_byte(0xaa))).await.unwrap();

    // Mutating the stored query is not possible from here; install a fresh
    // filter whose query is ambiguous instead.
    let ambiguous = LogQuery::new()
        .at_block_hash(alloy::primitives::B256::repeat_byte(0x01))
        .from_block(5u64);
    let bad = h.api.new_log_filter(NODE1, ambiguous).await.unwrap();

    assert!(matches!(
        h.api.get_filter_logs(NODE1, bad).await.unwrap_err(),
        VirtualFilterError::InvalidFilter(_)
    ));
    // The unambiguous sibling still works.
    assert!(h.api.get_filter_logs(NODE1, id).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn filter_logs_serve_from_the_store_when_the_range_is_persisted() {
    let h = harness(fast_config());
    let address = Address::repeat_byte(0xaa);

    // Persist blocks 100..=200 the way the poll loop would.
    let ingestor = LogIngestor::new(h.store.clone());
    let seeded = vec![log_at(100, address), log_at(150, address), log_at(200, address)];
    ingestor.ingest(virtual_filter::LogBatch::from_logs(seeded)).await.unwrap();

    let id = h
        .api
        .new_log_filter(NODE1, LogQuery::new().address(address).from_block(120u64).to_block(180u64))
        .await
        .unwrap();

    let logs = h.api.get_filter_logs(NODE1, id).await.unwrap();

    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].block_number, Some(150));
    assert_eq!(h.node(NODE1).call_count("eth_getLogs"), 0);
}

#[tokio::test(start_paused = true)]
async fn store_failures_fall_through_to_the_upstream_node() {
    let h = harness(fast_config());
    let address = Address::repeat_byte(0xaa);

    let ingestor = LogIngestor::new(h.store.clone());
    ingestor
        .ingest(virtual_filter::LogBatch::from_logs(vec![
            log_at(100, address),
            log_at(200, address),
        ]))
        .await
        .unwrap();
    // The node has the same history for the fallback read.
    h.node(NODE1).push_logs(vec![log_at(150, address)]);

    let id = h
        .api
        .new_log_filter(NODE1, LogQuery::new().address(address).from_block(100u64).to_block(200u64))
        .await
        .unwrap();

    h.store.fail_reads(true);
    let logs = h.api.get_filter_logs(NODE1, id).await.unwrap();

    assert_eq!(logs.len(), 1);
    assert_eq!(h.node(NODE1).call_count("eth_getLogs"), 1);
}

#[tokio::test(start_paused = true)]
async fn unpersisted_ranges_go_to_the_upstream_node() {
    let h = harness(fast_config());
    let address = Address::repeat_byte(0xaa);
    h.node(NODE1).push_logs(vec![log_at(150, address)]);

    let id = h
        .api
        .new_log_filter(NODE1, LogQuery::new().address(address).from_block(100u64).to_block(200u64))
        .await
        .unwrap();

    let logs = h.api.get_filter_logs(NODE1, id).await.unwrap();

    assert_eq!(logs.len(), 1);
    assert_eq!(h.node(NODE1).call_count("eth_getLogs"), 1);
}
