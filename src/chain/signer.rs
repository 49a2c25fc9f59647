//! Node-managed signer
//!
//! The key lives with the node or an external signer daemon; this process
//! only asks it to sign and broadcast via `eth_sendTransaction`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use crate::chain::evm::transaction_json;
use crate::chain::{Signer, TransactionRequest};
use crate::error::{Error, Result};
use crate::rpc::NodeClient;
use crate::types::{Address, TxHash};

/// Signer that delegates to `eth_sendTransaction` on a managing endpoint
pub struct NodeSigner {
    node: Arc<NodeClient>,
    account: Address,
}

impl NodeSigner {
    pub fn new(node: Arc<NodeClient>, account: Address) -> Self {
        Self { node, account }
    }

    /// Check the endpoint actually manages `account`
    pub async fn verify(&self) -> Result<()> {
        let accounts: Vec<Address> = self.node.request("eth_accounts", json!([])).await?;
        if accounts.contains(&self.account) {
            Ok(())
        } else {
            Err(Error::SignerUnavailable)
        }
    }
}

#[async_trait]
impl Signer for NodeSigner {
    fn address(&self) -> Address {
        self.account
    }

    async fn sign_and_submit(&self, tx: TransactionRequest) -> Result<TxHash> {
        if tx.from != self.account {
            return Err(Error::InvalidArgument(format!(
                "transaction from {} but signer holds {}",
                tx.from, self.account
            )));
        }

        let hash: String = self
            .node
            .request("eth_sendTransaction", json!([transaction_json(&tx)]))
            .await?;
        let hash: TxHash = hash.parse()?;

        info!("Submitted transaction {} to {}", hash, tx.to);
        Ok(hash)
    }
}
