use serde::{Deserialize, Serialize};

use crate::codec::{self, canonical_hash};
use crate::crypto::KeyPair;
use crate::types::{Address, Hash, Signature};

/// Output kind tag. `Stake`/`Unstake` outputs additionally adjust the
/// staker table and validator voting power at commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxType {
    General,
    Coinbase,
    Stake,
    Unstake,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxOutput {
    pub address: Address,
    pub amount: u64,
    pub tx_type: TxType,
}

/// A reference to an unspent output, with the spender's authorization.
///
/// `signature` is ECDSA over the transaction id; `public_key` is PKIX DER
/// and must derive to the referenced UTXO's owner address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxInput {
    pub ref_tx: Hash,
    pub ref_index: u32,
    pub signature: Signature,
    #[serde(with = "codec::b64")]
    pub public_key: Vec<u8>,
}

/// Field order is part of the canonical form; do not reorder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u32,
    pub id: Hash,
    pub timestamp: i64,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub memo: String,
    #[serde(with = "codec::b64")]
    pub data: Vec<u8>,
}

pub const TX_VERSION: u32 = 1;

impl Transaction {
    pub fn new(
        timestamp: i64,
        inputs: Vec<TxInput>,
        outputs: Vec<TxOutput>,
        memo: String,
        data: Vec<u8>,
    ) -> serde_json::Result<Self> {
        let mut tx = Self {
            version: TX_VERSION,
            id: Hash::zero(),
            timestamp,
            inputs,
            outputs,
            memo,
            data,
        };
        tx.id = tx.compute_id()?;
        Ok(tx)
    }

    /// The coinbase of a block: no inputs, one output minting
    /// `block_reward + fees` to the proposer. The memo carries the height so
    /// coinbase ids stay distinct across blocks.
    pub fn coinbase(
        proposer: Address,
        amount: u64,
        height: u64,
        timestamp: i64,
    ) -> serde_json::Result<Self> {
        Self::new(
            timestamp,
            Vec::new(),
            vec![TxOutput {
                address: proposer,
                amount,
                tx_type: TxType::Coinbase,
            }],
            format!("coinbase/{height}"),
            Vec::new(),
        )
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn total_output(&self) -> u64 {
        self.outputs.iter().map(|o| o.amount).sum()
    }

    /// The transaction with `id` and every input `signature` zeroed: the
    /// exact form that is canonically hashed. `inputs` and `data` are
    /// always-empty-never-null, so the clone never changes their shape.
    fn signing_form(&self) -> Transaction {
        let mut tx = self.clone();
        tx.id = Hash::zero();
        for input in &mut tx.inputs {
            input.signature = Signature::empty();
        }
        tx
    }

    /// Recomputes the id: SHA-256 over the canonical JSON of the signing
    /// form. This is the single canonical recomputation; stored ids that
    /// disagree are rejected at validation.
    pub fn compute_id(&self) -> serde_json::Result<Hash> {
        canonical_hash(&self.signing_form())
    }

    /// Fills every input's public key, recomputes the id over the updated
    /// signing form, then signs the id. Public keys are part of the
    /// canonical hash; only signatures are zeroed out of it.
    pub fn sign_inputs(&mut self, keypair: &KeyPair) -> serde_json::Result<()> {
        let public_key = keypair.public_key_der();
        for input in &mut self.inputs {
            input.public_key = public_key.clone();
            input.signature = Signature::empty();
        }
        self.id = self.compute_id()?;
        for input in &mut self.inputs {
            input.signature = keypair.sign(self.id.as_bytes());
        }
        Ok(())
    }
}
