//! Chain store and accounts persistence on RocksDB.

use crate::generators::{key_address, test_address, transfer};
use crate::harness::TestNode;
use hashweave_chain::{
    columns, AccountsState, ChainData, ChainDataStore, ChainStoreTransaction, GenesisBuilder,
    KvChainStore, PruningConfig, StoredAccounts,
};
use hashweave_consensus::ChainParams;
use hashweave_storage::{Database, Storage, WriteBatch};
use std::sync::Arc;
use tempfile::TempDir;

fn open(dir: &TempDir) -> Arc<dyn Storage> {
    Arc::new(Database::open(dir.path()).expect("open database"))
}

#[tokio::test]
async fn test_transaction_lands_in_one_write() {
    let dir = TempDir::new().unwrap();
    let storage = open(&dir);
    let store = KvChainStore::new(storage.clone());

    let params = ChainParams::devnet();
    let genesis = GenesisBuilder::new(&params).build().unwrap();
    let data = ChainData::initial(genesis.clone(), &params);

    let mut accounts = WriteBatch::new();
    accounts.put(columns::ACCOUNTS, test_address(1).as_bytes().to_vec(), 42u64.to_be_bytes().to_vec());

    let mut tx = store.transaction();
    tx.put_chain_data(data.clone());
    tx.set_main_chain(1, genesis.hash());
    tx.set_head(genesis.hash());
    tx.merge_accounts(accounts);
    store.commit(tx).await.unwrap();

    assert_eq!(store.get_head().await.unwrap(), Some(genesis.hash()));
    assert_eq!(store.get_chain_data_at(1).await.unwrap(), Some(data));
    let balances = StoredAccounts::new(storage, params.block_reward);
    assert_eq!(balances.balance(&test_address(1)).unwrap(), 42);

    // Empty transactions are accepted and change nothing.
    store.commit(ChainStoreTransaction::new()).await.unwrap();
    assert_eq!(store.get_head().await.unwrap(), Some(genesis.hash()));
}

#[tokio::test]
async fn test_chain_reloads_after_database_reopen() {
    let dir = TempDir::new().unwrap();
    let (head, accounts_hash, params, genesis) = {
        let storage = open(&dir);
        let params = Arc::new(ChainParams::devnet());
        let genesis = GenesisBuilder::new(&params).build().unwrap();
        let node = TestNode::open(params.clone(), genesis.clone(), storage, PruningConfig::default())
            .await
            .unwrap();
        node.extend_ideal(3, key_address(1)).await;
        let spend = node
            .mine(key_address(2), vec![transfer(1, test_address(8), 700, 3, 5)], 60)
            .await;
        node.push(&spend).await;
        (
            node.chain.head(),
            node.accounts.hash().await.unwrap(),
            params,
            genesis,
        )
    };

    let node = TestNode::open(params, genesis, open(&dir), PruningConfig::default())
        .await
        .unwrap();
    assert_eq!(node.chain.head(), head);
    assert_eq!(node.accounts.hash().await.unwrap(), accounts_hash);
    assert_eq!(node.accounts.balance(&test_address(8)).unwrap(), 700);

    let store = KvChainStore::new(node.storage.clone());
    let records = store.all_chain_data().await.unwrap();
    assert_eq!(records.len(), 5);
    assert!(records.iter().all(|data| data.block.body.is_none()));
}

#[tokio::test]
async fn test_pruned_forks_are_removed_from_disk() {
    let dir = TempDir::new().unwrap();
    let storage = open(&dir);
    let params = Arc::new(ChainParams::devnet());
    let genesis = GenesisBuilder::new(&params).build().unwrap();
    let node = TestNode::open(params, genesis, storage.clone(), PruningConfig::keep(3))
        .await
        .unwrap();

    let rival = node.peer().await;
    let fork = rival.extend_ideal(1, test_address(2)).await;
    node.extend_ideal(2, test_address(1)).await;
    node.push_all(&fork).await;
    assert_eq!(node.chain.fork_count(), 1);

    node.extend_ideal(4, test_address(1)).await;
    assert_eq!(node.chain.fork_count(), 0);

    let store = KvChainStore::new(storage);
    assert!(store.get_chain_data(&fork[0].hash()).await.unwrap().is_none());
    assert_eq!(
        store.all_chain_data().await.unwrap().len(),
        node.chain.height() as usize
    );
}
