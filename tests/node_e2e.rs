//! Two full nodes over loopback: a solo producer and an empty joiner that
//! receives the chain, plus a signed submission flowing through commit.

mod helpers;

use std::path::Path;
use std::time::Duration;

use abcfe_node::config::{
    CommonSection, Config, ConsensusSection, DbSection, FeeSection, GenesisSection, NodeMode,
    P2pSection, ServerSection, TransactionSection, ValidatorsSection, WalletSection,
};
use abcfe_node::crypto::KeyPair;
use abcfe_node::ledger::{Transaction, TxInput, TxOutput, TxType};
use abcfe_node::node::{Node, SubmitTx, SubmitTxInput, SubmitTxOutput};
use abcfe_node::types::Signature;
use helpers::*;

fn node_config(
    dir: &Path,
    p2p_port: u16,
    boot: &[u16],
    producer: bool,
    genesis_addr: &str,
) -> Config {
    Config {
        common: CommonSection {
            port: p2p_port,
            mode: if producer {
                NodeMode::Validator
            } else {
                NodeMode::Sentry
            },
            network_id: "abcfe-e2e".to_string(),
            block_producer: producer,
        },
        server: ServerSection::default(),
        p2p: P2pSection {
            address: "127.0.0.1".to_string(),
            port: p2p_port,
            boot_nodes: boot.iter().map(|p| format!("127.0.0.1:{p}")).collect(),
        },
        db: DbSection {
            path: dir.join("db"),
        },
        wallet: WalletSection {
            path: dir.join("node_key"),
        },
        genesis: GenesisSection {
            system_addresses: vec![genesis_addr.to_string()],
            system_balances: vec![1_000_000],
            timestamp: GENESIS_TS,
        },
        validators: ValidatorsSection::default(),
        fee: FeeSection {
            min_fee: MIN_FEE,
            block_reward: BLOCK_REWARD,
        },
        transaction: TransactionSection {
            max_memo_size: 256,
            max_data_size: 1024,
        },
        consensus: ConsensusSection::default(),
    }
}

async fn wait_until<F: Fn() -> bool>(deadline: Duration, check: F) -> bool {
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    false
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn producer_and_joiner_converge() {
    let funded = KeyPair::generate();
    let genesis_addr = funded.address().to_hex();

    let producer_dir = tempfile::tempdir().unwrap();
    let producer = Node::new(node_config(
        producer_dir.path(),
        44711,
        &[],
        true,
        &genesis_addr,
    ))
    .unwrap();
    // Producer committed genesis during startup.
    assert_eq!(producer.get_status().latest_height, 0);
    producer.start().await.unwrap();

    let joiner_dir = tempfile::tempdir().unwrap();
    let joiner = Node::new(node_config(
        joiner_dir.path(),
        44712,
        &[44711],
        false,
        &genesis_addr,
    ))
    .unwrap();
    joiner.start().await.unwrap();

    // Submit a signed transfer out of the genesis funding.
    let genesis_block = producer.get_block_by_height(0).unwrap().unwrap();
    let genesis_tx = genesis_block.transactions[0].id;
    let recipient = addr(0xE1);
    let mut tx = Transaction::new(
        GENESIS_TS + 1,
        vec![TxInput {
            ref_tx: genesis_tx,
            ref_index: 0,
            signature: Signature::empty(),
            public_key: Vec::new(),
        }],
        vec![
            TxOutput {
                address: recipient,
                amount: 2500,
                tx_type: TxType::General,
            },
            TxOutput {
                address: funded.address(),
                amount: 1_000_000 - 2500 - MIN_FEE,
                tx_type: TxType::General,
            },
        ],
        String::new(),
        Vec::new(),
    )
    .unwrap();
    tx.sign_inputs(&funded).unwrap();

    let submit = SubmitTx {
        version: tx.version,
        timestamp: tx.timestamp,
        inputs: tx
            .inputs
            .iter()
            .map(|i| SubmitTxInput {
                tx_id_hex: i.ref_tx.to_hex(),
                output_index: i.ref_index,
                signature_hex: hex::encode(i.signature.as_bytes()),
                public_key_hex: hex::encode(&i.public_key),
            })
            .collect(),
        outputs: tx
            .outputs
            .iter()
            .map(|o| SubmitTxOutput {
                address_hex: o.address.to_hex(),
                amount: o.amount,
                tx_type: o.tx_type,
            })
            .collect(),
        memo: tx.memo.clone(),
        data: tx.data.clone(),
    };
    let accepted_id = producer.submit_transaction(submit).unwrap();
    assert_eq!(accepted_id, tx.id);

    // The producer commits it within a few ticks and the joiner follows.
    assert!(
        wait_until(Duration::from_secs(20), || {
            producer.get_status().latest_height >= 1
                && joiner.get_status().latest_height >= 1
        })
        .await,
        "chain never reached the joiner"
    );
    let height = 1;
    let on_producer = producer.get_block_by_height(height).unwrap().unwrap();
    assert!(
        wait_until(Duration::from_secs(10), || {
            joiner
                .get_block_by_height(height)
                .ok()
                .flatten()
                .map(|b| b.hash() == on_producer.hash())
                .unwrap_or(false)
        })
        .await,
        "joiner stored a different block"
    );

    // Both nodes agree on the settled transfer.
    assert!(
        wait_until(Duration::from_secs(15), || {
            producer.get_balance(&recipient, false).unwrap_or(0) == 2500
        })
        .await,
        "transfer never settled on the producer"
    );
    assert!(
        wait_until(Duration::from_secs(15), || {
            joiner.get_balance(&recipient, false).unwrap_or(0) == 2500
        })
        .await,
        "transfer never reached the joiner"
    );
    assert_eq!(producer.get_tx(&accepted_id).unwrap().unwrap().id, tx.id);

    producer.stop();
    joiner.stop();
}
