//! Chain and inclusion proofs served by a running engine.

use crate::generators::{key_address, test_address};
use crate::harness::TestNode;
use hashweave_chain::GenesisBuilder;
use hashweave_consensus::nipopow::{ProofVerificationResult, ProofVerifier};
use hashweave_consensus::ChainParams;
use std::sync::Arc;

#[tokio::test]
async fn test_chain_proof_is_self_consistent() {
    let node = TestNode::in_memory().await;
    node.extend_ideal(60, key_address(1)).await;
    let validator = node.chain.validator();

    let proof = node.chain.get_chain_proof().await.unwrap();
    proof.verify(validator).unwrap();

    let prefix = proof.prefix().blocks();
    assert_eq!(prefix[0].hash(), node.genesis.hash());
    for pair in prefix.windows(2) {
        validator.is_successor_of(&pair[1], &pair[0]).unwrap();
        assert!(pair[1].body.is_none());
    }

    let suffix = proof.suffix().headers();
    assert_eq!(suffix.len(), node.params.nipopow_k as usize);
    assert_eq!(suffix[0].prev_hash, prefix[prefix.len() - 1].hash());
    assert_eq!(proof.head().hash(), node.chain.head_hash());
}

#[tokio::test]
async fn test_chain_proof_follows_rebranch() {
    let node = TestNode::in_memory().await;
    node.extend_ideal(12, key_address(1)).await;
    let before = node.chain.get_chain_proof().await.unwrap();

    let rival = node.peer().await;
    let branch = rival.extend_ideal(14, key_address(2)).await;
    node.push_all(&branch).await;
    assert_eq!(node.chain.head_hash(), branch[13].hash());

    let after = node.chain.get_chain_proof().await.unwrap();
    assert_ne!(after, before);
    after.verify(node.chain.validator()).unwrap();
    assert_eq!(after.head().hash(), branch[13].hash());
    assert_eq!(after, rival.chain.get_chain_proof().await.unwrap());
}

#[tokio::test]
async fn test_verifier_accepts_served_proofs() {
    let node = TestNode::in_memory().await;
    node.extend_ideal(20, key_address(1)).await;
    let proof = node.chain.get_chain_proof().await.unwrap();

    let mut verifier = ProofVerifier::new(node.chain.validator().clone());
    assert!(matches!(
        verifier.process(proof.clone()),
        ProofVerificationResult::BetterChain { .. }
    ));
    assert!(matches!(
        verifier.process(proof),
        ProofVerificationResult::NoBetterChain { .. }
    ));
    assert_eq!(verifier.best_height(), Some(21));

    // Same parameters, different genesis.
    let params = Arc::new(ChainParams::devnet());
    let other_genesis = GenesisBuilder::new(&params)
        .miner(test_address(3))
        .build()
        .unwrap();
    let other = TestNode::open(
        params,
        other_genesis,
        Arc::new(hashweave_storage::MemoryStorage::new()),
        Default::default(),
    )
    .await
    .unwrap();
    other.extend_ideal(3, key_address(1)).await;
    let foreign = other.chain.get_chain_proof().await.unwrap();
    assert_eq!(
        verifier.process(foreign),
        ProofVerificationResult::WrongGenesis
    );
}

#[tokio::test]
async fn test_block_proof_links_head_to_old_block() {
    let node = TestNode::in_memory().await;
    let blocks = node.extend_ideal(40, key_address(1)).await;
    let head = node.chain.head().block;
    let validator = node.chain.validator();

    for target in [&blocks[0], &blocks[17], &blocks[38]] {
        let proof = node
            .chain
            .get_block_proof(target.clone(), head.clone())
            .await
            .unwrap()
            .expect("interlinks reach every main chain block");
        proof.verify(validator).unwrap();
        assert_eq!(proof.tail().unwrap().hash(), target.hash());

        let top = proof.head().unwrap();
        if top.hash() != head.hash() {
            validator.is_successor_of(&head, top).unwrap();
        }
    }

    // Nothing proves a block at or above the known one.
    assert!(node
        .chain
        .get_block_proof(head.clone(), blocks[5].clone())
        .await
        .unwrap()
        .is_none());
}
