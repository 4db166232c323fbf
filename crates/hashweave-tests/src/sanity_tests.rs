//! End-to-end chain behaviour over RocksDB.

use crate::generators::{key_address, test_address, transfer};
use crate::harness::{TestDatabase, TestNode};
use hashweave_chain::{mine, AccountsState, PruningConfig, PushOutcome};
use hashweave_consensus::Block;

/// Push `block` and check the cumulative values and accounts hash it
/// leaves behind.
async fn push_and_check(node: &TestNode, block: &Block) {
    let parent = node.chain.head();
    assert_eq!(node.push(block).await, PushOutcome::Extended);

    let data = node.chain.get_chain_data(&block.hash()).await.unwrap().unwrap();
    assert_eq!(
        data.total_difficulty,
        &parent.total_difficulty + node.params.difficulty(&block.target())
    );
    assert_eq!(
        data.total_work,
        &parent.total_work + node.params.real_difficulty(&block.hash())
    );
    assert_eq!(node.accounts.hash().await.unwrap(), block.header.accounts_hash);
}

#[tokio::test]
async fn test_cumulative_values_and_accounts_follow_each_block() {
    let db = TestDatabase::new();
    let node = TestNode::on_disk(&db).await.unwrap();

    let reward_block = node.mine(key_address(1), vec![], 60).await;
    push_and_check(&node, &reward_block).await;

    let spend = node
        .mine(key_address(3), vec![transfer(1, test_address(2), 1_000, 10, 3)], 60)
        .await;
    push_and_check(&node, &spend).await;

    let reward = node.params.block_reward;
    assert_eq!(node.accounts.balance(&key_address(1)).unwrap(), reward - 1_010);
    assert_eq!(node.accounts.balance(&test_address(2)).unwrap(), 1_000);
    assert_eq!(node.accounts.balance(&key_address(3)).unwrap(), reward + 10);
}

#[tokio::test]
async fn test_repeated_push_is_known() {
    let node = TestNode::in_memory().await;
    let block = node.mine(test_address(1), vec![], 60).await;

    assert_eq!(node.push(&block).await, PushOutcome::Extended);
    let head = node.chain.head();
    let accounts_hash = node.accounts.hash().await.unwrap();

    for _ in 0..3 {
        assert_eq!(node.push(&block).await, PushOutcome::Known);
    }
    assert_eq!(node.chain.head(), head);
    assert_eq!(node.accounts.hash().await.unwrap(), accounts_hash);
    assert_eq!(node.chain.counters().known, 3);
}

#[tokio::test]
async fn test_chain_survives_reopen() {
    let db = TestDatabase::new();
    let node = TestNode::on_disk(&db).await.unwrap();
    node.extend_ideal(2, key_address(1)).await;
    let block = node
        .mine(key_address(4), vec![transfer(1, test_address(9), 2_500, 0, 4)], 60)
        .await;
    assert_eq!(node.push(&block).await, PushOutcome::Extended);

    let reopened = TestNode::open(
        node.params.clone(),
        node.genesis.clone(),
        db.storage(),
        PruningConfig::default(),
    )
    .await
    .unwrap();
    assert_eq!(reopened.chain.head(), node.chain.head());
    assert_eq!(reopened.chain.total_difficulty(), node.chain.total_difficulty());
    assert_eq!(reopened.accounts.balance(&test_address(9)).unwrap(), 2_500);

    // Mining continues on the reopened chain.
    reopened.extend_ideal(1, key_address(1)).await;
    assert_eq!(reopened.chain.height(), 5);
}

#[tokio::test]
async fn test_overspending_block_is_invalid() {
    let node = TestNode::in_memory().await;
    node.extend_ideal(1, key_address(1)).await;

    let mut block = node
        .mine(test_address(5), vec![transfer(1, test_address(6), 1_000, 0, 3)], 60)
        .await;
    let body = block.body.as_mut().unwrap();
    body.transactions = vec![transfer(1, test_address(6), 8_000, 0, 3)];
    block.header.body_hash = body.hash();
    block.header.nonce = 0;
    assert!(mine(&mut block, u32::MAX));

    let head = node.chain.head();
    assert!(matches!(node.push(&block).await, PushOutcome::Invalid(_)));
    assert_eq!(node.chain.head(), head);
    assert_eq!(
        node.accounts.balance(&key_address(1)).unwrap(),
        node.params.block_reward
    );
}

#[tokio::test]
async fn test_replayed_transaction_is_invalid() {
    let node = TestNode::in_memory().await;
    node.extend_ideal(1, key_address(1)).await;

    let payment = transfer(1, test_address(6), 10, 0, 2);
    let first = node.mine(key_address(2), vec![payment.clone()], 60).await;
    assert_eq!(node.push(&first).await, PushOutcome::Extended);

    // Same signed transfer in the next block.
    let mut replay = node.mine(test_address(5), vec![], 60).await;
    let body = replay.body.as_mut().unwrap();
    body.transactions = vec![payment];
    replay.header.body_hash = body.hash();
    replay.header.nonce = 0;
    assert!(mine(&mut replay, u32::MAX));

    let head = node.chain.head();
    let outcome = node.push(&replay).await;
    assert!(matches!(outcome, PushOutcome::Invalid(reason) if reason.contains("already included")));
    assert_eq!(node.chain.head(), head);
    assert_eq!(node.accounts.balance(&test_address(6)).unwrap(), 10);
}
