//! Closed enum dispatch over chain drivers, mirroring the `x402-rs` chain
//! registry's `ChainProvider::Eip155` / `ChainProvider::Solana` split:
//! `ChainDriver::Utxo` / `ChainDriver::Evm` here. An enum rather than `dyn
//! Adapter` sidesteps the object-safety problem `Adapter`'s async methods
//! would otherwise create, while keeping one polymorphic call surface for
//! the registry's callers.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use bitcoin::Network;
use tokio_util::sync::CancellationToken;

use crate::adapter::Adapter;
use crate::config::{Config, DriverKind, NetworkType};
use crate::drivers::evm::EvmDriver;
use crate::drivers::utxo::UtxoDriver;
use crate::error::{ChainError, ChainResult};
use crate::ledger::StateLedger;
use crate::rpc::RpcPool;
use crate::signer::{KeySource, Signer};
use crate::types::{
    Address, BroadcastReceipt, Capabilities, FeeEstimate, SignedTransaction, TransactionRequest,
    TransactionStatus, UnsignedTransaction,
};

/// The closed set of chain drivers this build supports. Adding a new chain
/// family means adding a variant here and in [`ChainDriver::from_config`],
/// not threading a new generic parameter through every caller.
#[derive(Clone)]
pub enum ChainDriver {
    Utxo(UtxoDriver),
    Evm(EvmDriver),
}

impl Adapter for ChainDriver {
    fn chain_id(&self) -> &str {
        match self {
            ChainDriver::Utxo(d) => d.chain_id(),
            ChainDriver::Evm(d) => d.chain_id(),
        }
    }

    fn capabilities(&self) -> &Capabilities {
        match self {
            ChainDriver::Utxo(d) => d.capabilities(),
            ChainDriver::Evm(d) => d.capabilities(),
        }
    }

    fn build(
        &self,
        request: &TransactionRequest,
        cancel: &CancellationToken,
    ) -> impl Future<Output = ChainResult<UnsignedTransaction>> + Send {
        async move {
            match self {
                ChainDriver::Utxo(d) => d.build(request, cancel).await,
                ChainDriver::Evm(d) => d.build(request, cancel).await,
            }
        }
    }

    fn estimate(
        &self,
        request: &TransactionRequest,
        cancel: &CancellationToken,
    ) -> impl Future<Output = ChainResult<FeeEstimate>> + Send {
        async move {
            match self {
                ChainDriver::Utxo(d) => d.estimate(request, cancel).await,
                ChainDriver::Evm(d) => d.estimate(request, cancel).await,
            }
        }
    }

    fn sign<S: Signer + Sync>(
        &self,
        unsigned: UnsignedTransaction,
        signer: &S,
    ) -> impl Future<Output = ChainResult<SignedTransaction>> + Send {
        async move {
            match self {
                ChainDriver::Utxo(d) => d.sign(unsigned, signer).await,
                ChainDriver::Evm(d) => d.sign(unsigned, signer).await,
            }
        }
    }

    fn broadcast(
        &self,
        signed: &SignedTransaction,
        cancel: &CancellationToken,
    ) -> impl Future<Output = ChainResult<BroadcastReceipt>> + Send {
        async move {
            match self {
                ChainDriver::Utxo(d) => d.broadcast(signed, cancel).await,
                ChainDriver::Evm(d) => d.broadcast(signed, cancel).await,
            }
        }
    }

    fn query_status(
        &self,
        hash: &str,
        cancel: &CancellationToken,
    ) -> impl Future<Output = ChainResult<TransactionStatus>> + Send {
        async move {
            match self {
                ChainDriver::Utxo(d) => d.query_status(hash, cancel).await,
                ChainDriver::Evm(d) => d.query_status(hash, cancel).await,
            }
        }
    }

    fn subscribe_status(&self, hash: &str, cancel: CancellationToken) -> tokio::sync::mpsc::Receiver<TransactionStatus> {
        match self {
            ChainDriver::Utxo(d) => d.subscribe_status(hash, cancel),
            ChainDriver::Evm(d) => d.subscribe_status(hash, cancel),
        }
    }

    fn derive(
        &self,
        key_source: &dyn KeySource,
        path: &str,
    ) -> impl Future<Output = ChainResult<Address>> + Send {
        async move {
            match self {
                ChainDriver::Utxo(d) => d.derive(key_source, path).await,
                ChainDriver::Evm(d) => d.derive(key_source, path).await,
            }
        }
    }
}

fn bitcoin_network(network: NetworkType) -> Network {
    match network {
        NetworkType::Mainnet => Network::Bitcoin,
        NetworkType::Testnet => Network::Testnet,
        NetworkType::Regtest => Network::Regtest,
    }
}

impl ChainDriver {
    fn from_config(chain: &crate::config::ChainConfig, ledger: Arc<StateLedger>) -> ChainResult<Self> {
        let pool = RpcPool::new(
            chain.chain_id.clone(),
            chain.rpc_endpoints.clone(),
            chain.default_timeout(),
        )?;
        match chain.kind {
            DriverKind::Utxo => Ok(ChainDriver::Utxo(UtxoDriver::new(
                chain.chain_id.clone(),
                bitcoin_network(chain.network),
                pool,
                ledger,
            ))),
            DriverKind::Evm => {
                let numeric_chain_id = chain.numeric_chain_id.ok_or_else(|| {
                    ChainError::Config(format!(
                        "chain {} has kind=evm but no numeric_chain_id",
                        chain.chain_id
                    ))
                })?;
                let ws_endpoint = chain.subscription_endpoints.first().cloned();
                Ok(ChainDriver::Evm(EvmDriver::new(
                    chain.chain_id.clone(),
                    numeric_chain_id,
                    pool,
                    ledger,
                    ws_endpoint,
                )))
            }
        }
    }
}

/// Owns one [`ChainDriver`] per configured chain, keyed by `chain_id`, plus
/// the shared [`StateLedger`] every driver broadcasts through.
pub struct Registry {
    drivers: BTreeMap<String, ChainDriver>,
    ledger: Arc<StateLedger>,
}

impl Registry {
    /// Builds one driver per entry in `config.chains`, each validated before
    /// construction so a misconfigured chain fails at startup.
    pub fn from_config(config: &Config, ledger: Arc<StateLedger>) -> ChainResult<Self> {
        let mut drivers = BTreeMap::new();
        for chain in config.chains.values() {
            chain.validate()?;
            let driver = ChainDriver::from_config(chain, ledger.clone())?;
            drivers.insert(chain.chain_id.clone(), driver);
        }
        Ok(Self { drivers, ledger })
    }

    pub fn get(&self, chain_id: &str) -> ChainResult<&ChainDriver> {
        self.drivers
            .get(chain_id)
            .ok_or_else(|| ChainError::Config(format!("no registered chain: {chain_id}")))
    }

    pub fn chain_ids(&self) -> impl Iterator<Item = &str> {
        self.drivers.keys().map(String::as_str)
    }

    pub fn ledger(&self) -> &Arc<StateLedger> {
        &self.ledger
    }
}
