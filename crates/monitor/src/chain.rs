// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

use anyhow::anyhow;
use async_trait::async_trait;
use serde::Deserialize;

/// A block identified by number and hash.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BlockPointer {
    pub number: u64,
    pub hash: String,
}

/// Chain block lookups, as far as the agent needs them.
#[async_trait]
pub trait BlockProvider: Send + Sync {
    async fn block_by_hash(&self, hash: &str) -> anyhow::Result<BlockPointer>;
    async fn block_by_number(&self, number: u64) -> anyhow::Result<BlockPointer>;
}

/// `eth_getBlockBy*` over plain JSON-RPC.
#[derive(Clone, Debug)]
pub struct JsonRpcBlockProvider {
    client: reqwest::Client,
    url: String,
}

#[derive(Deserialize)]
struct RpcResponse {
    result: Option<RpcBlock>,
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct RpcBlock {
    number: String,
    hash: String,
}

impl JsonRpcBlockProvider {
    pub fn new(client: reqwest::Client, url: &str) -> Self {
        Self {
            client,
            url: url.to_string(),
        }
    }

    async fn get_block(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> anyhow::Result<BlockPointer> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let response: RpcResponse = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await?
            .json()
            .await?;
        if let Some(error) = response.error {
            return Err(anyhow!("{method} failed ({}): {}", error.code, error.message));
        }
        let block = response
            .result
            .ok_or_else(|| anyhow!("{method}: block not found"))?;
        let number = block
            .number
            .strip_prefix("0x")
            .ok_or_else(|| anyhow!("{method}: block number is not hex"))?;
        Ok(BlockPointer {
            number: u64::from_str_radix(number, 16)?,
            hash: block.hash,
        })
    }
}

#[async_trait]
impl BlockProvider for JsonRpcBlockProvider {
    async fn block_by_hash(&self, hash: &str) -> anyhow::Result<BlockPointer> {
        self.get_block("eth_getBlockByHash", serde_json::json!([hash, false]))
            .await
    }

    async fn block_by_number(&self, number: u64) -> anyhow::Result<BlockPointer> {
        self.get_block(
            "eth_getBlockByNumber",
            serde_json::json!([format!("0x{number:x}"), false]),
        )
        .await
    }
}
