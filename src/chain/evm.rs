//! `VaultChain` over an Ethereum JSON-RPC node

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::chain::abi::{self, selectors, AbiReader, Token};
use crate::chain::{FeeParams, LockStatus, OracleRound, TransactionRequest, TxReceipt, VaultChain};
use crate::config::ChainConfig;
use crate::error::{Error, Result};
use crate::rpc::transport::{format_quantity, parse_quantity};
use crate::rpc::NodeClient;
use crate::types::{Address, TxHash};

/// Priority fee used when the node has no `eth_maxPriorityFeePerGas`
pub const FALLBACK_PRIORITY_FEE: u128 = 1_500_000_000;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceipt {
    transaction_hash: String,
    block_number: Option<String>,
    gas_used: Option<String>,
    status: Option<String>,
    contract_address: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBlock {
    base_fee_per_gas: Option<String>,
}

/// JSON-RPC backed vault chain
pub struct EvmChain {
    node: Arc<NodeClient>,
    factory: Option<Address>,
    oracle: Option<Address>,
}

impl EvmChain {
    pub fn new(node: Arc<NodeClient>, config: &ChainConfig) -> Self {
        Self {
            node,
            factory: config.factory_address,
            oracle: config.oracle_address,
        }
    }

    pub fn node(&self) -> &Arc<NodeClient> {
        &self.node
    }

    /// `eth_call` against `to`, returning raw return data
    async fn eth_call(&self, to: Address, data: Vec<u8>) -> Result<Vec<u8>> {
        let result: String = self
            .node
            .request(
                "eth_call",
                json!([{ "to": to.to_string(), "data": abi::encode_hex(&data) }, "latest"]),
            )
            .await?;
        abi::decode_hex(&result)
    }

    async fn call_word<T>(
        &self,
        to: Address,
        selector: [u8; 4],
        decode: impl FnOnce(&AbiReader<'_>) -> Result<T>,
    ) -> Result<T> {
        let data = self.eth_call(to, abi::encode_call(selector, &[])).await?;
        let reader = AbiReader::new(&data)?;
        decode(&reader)
    }

    fn oracle(&self) -> Result<Address> {
        self.oracle
            .ok_or_else(|| Error::Config("chain.oracle_address is not set".to_string()))
    }
}

/// JSON form of a transaction request for `eth_estimateGas` / `eth_sendTransaction`
pub fn transaction_json(tx: &TransactionRequest) -> Value {
    let mut obj = json!({
        "from": tx.from.to_string(),
        "to": tx.to.to_string(),
        "data": abi::encode_hex(&tx.data),
        "value": format_quantity(tx.value),
    });

    if let Some(gas) = tx.gas_limit {
        obj["gas"] = Value::String(format_quantity(gas as u128));
    }

    match tx.fees {
        Some(FeeParams::Legacy { gas_price }) => {
            obj["gasPrice"] = Value::String(format_quantity(gas_price));
        }
        Some(FeeParams::Eip1559 {
            max_fee_per_gas,
            max_priority_fee_per_gas,
        }) => {
            obj["maxFeePerGas"] = Value::String(format_quantity(max_fee_per_gas));
            obj["maxPriorityFeePerGas"] = Value::String(format_quantity(max_priority_fee_per_gas));
        }
        None => {}
    }

    obj
}

fn quantity_u64(value: &str) -> Result<u64> {
    u64::try_from(parse_quantity(value)?)
        .map_err(|_| Error::Serialization(format!("quantity {} exceeds 64 bits", value)))
}

/// Decode the `getLockStatus()` return tuple
pub fn decode_lock_status(data: &[u8]) -> Result<LockStatus> {
    let reader = AbiReader::new(data)?;
    Ok(LockStatus {
        is_locked: reader.boolean(0)?,
        current_price: reader.uint(1)?,
        time_remaining: reader.uint64(2)?,
        is_price_based: reader.boolean(3)?,
        is_goal_based: reader.boolean(4)?,
        current_amount: reader.uint(5)?,
        goal_amount: reader.uint(6)?,
        progress_percentage: reader.uint(7)?,
        unlock_reason: reader.string(8)?,
    })
}

/// Decode the `latestRoundData()` return tuple
pub fn decode_round(data: &[u8]) -> Result<OracleRound> {
    let reader = AbiReader::new(data)?;
    Ok(OracleRound {
        round_id: reader.uint(0)?,
        price: reader.int(1)?,
        started_at: reader.uint64(2)?,
        updated_at: reader.uint64(3)?,
        answered_in_round: reader.uint(4)?,
    })
}

#[async_trait]
impl VaultChain for EvmChain {
    async fn chain_id(&self) -> Result<u64> {
        let id: String = self.node.request("eth_chainId", json!([])).await?;
        quantity_u64(&id)
    }

    async fn user_vaults(&self, account: Address) -> Result<Vec<Address>> {
        let factory = self.factory()?;
        let data = self
            .eth_call(
                factory,
                abi::encode_call(selectors::GET_USER_VAULTS, &[Token::Address(account)]),
            )
            .await?;
        AbiReader::new(&data)?.address_array(0)
    }

    async fn vault_balance(&self, vault: Address) -> Result<u128> {
        self.call_word(vault, selectors::GET_BALANCE, |r| r.uint(0)).await
    }

    async fn unlock_time(&self, vault: Address) -> Result<u64> {
        self.call_word(vault, selectors::UNLOCK_TIME, |r| r.uint64(0)).await
    }

    async fn creator(&self, vault: Address) -> Result<Address> {
        self.call_word(vault, selectors::CREATOR, |r| r.address(0)).await
    }

    async fn target_price(&self, vault: Address) -> Result<u128> {
        self.call_word(vault, selectors::TARGET_PRICE, |r| r.uint(0)).await
    }

    async fn lock_status(&self, vault: Address) -> Result<LockStatus> {
        let data = self
            .eth_call(vault, abi::encode_call(selectors::GET_LOCK_STATUS, &[]))
            .await?;
        decode_lock_status(&data)
    }

    async fn latest_price(&self) -> Result<OracleRound> {
        let oracle = self.oracle()?;
        let data = self
            .eth_call(oracle, abi::encode_call(selectors::LATEST_ROUND_DATA, &[]))
            .await?;
        decode_round(&data)
    }

    async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<u64> {
        let gas: String = self
            .node
            .request("eth_estimateGas", json!([transaction_json(tx)]))
            .await?;
        quantity_u64(&gas)
    }

    async fn fee_params(&self) -> Result<FeeParams> {
        let block: Option<RawBlock> = self
            .node
            .request("eth_getBlockByNumber", json!(["latest", false]))
            .await?;

        let base_fee = match block.and_then(|b| b.base_fee_per_gas) {
            Some(fee) => parse_quantity(&fee)?,
            None => {
                let gas_price: String = self.node.request("eth_gasPrice", json!([])).await?;
                return Ok(FeeParams::Legacy {
                    gas_price: parse_quantity(&gas_price)?,
                });
            }
        };

        let priority = match self
            .node
            .request::<String>("eth_maxPriorityFeePerGas", json!([]))
            .await
        {
            Ok(value) => parse_quantity(&value)?,
            Err(e) if e.is_retryable() => return Err(e),
            Err(e) => {
                debug!("eth_maxPriorityFeePerGas unavailable ({}), using fallback", e);
                FALLBACK_PRIORITY_FEE
            }
        };

        Ok(FeeParams::Eip1559 {
            max_fee_per_gas: base_fee.saturating_mul(2).saturating_add(priority),
            max_priority_fee_per_gas: priority,
        })
    }

    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<TxReceipt>> {
        let raw: Option<RawReceipt> = self
            .node
            .request("eth_getTransactionReceipt", json!([hash.to_string()]))
            .await?;

        let Some(raw) = raw else {
            return Ok(None);
        };
        // Some nodes return a receipt shell before the block is sealed
        let Some(block_number) = raw.block_number else {
            return Ok(None);
        };

        Ok(Some(TxReceipt {
            tx_hash: raw.transaction_hash.parse::<TxHash>()?,
            block_number: quantity_u64(&block_number)?,
            gas_used: raw.gas_used.as_deref().map(quantity_u64).transpose()?.unwrap_or(0),
            success: raw.status.as_deref().map_or(true, |s| s == "0x1"),
            contract_address: raw
                .contract_address
                .as_deref()
                .map(str::parse::<Address>)
                .transpose()?,
        }))
    }

    fn factory(&self) -> Result<Address> {
        self.factory
            .ok_or_else(|| Error::Config("chain.factory_address is not set".to_string()))
    }
}
