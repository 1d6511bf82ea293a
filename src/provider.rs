use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::json;

use crate::config::ChainRpcConfig;
use crate::crypto::ethereum::Address;
use crate::verifier::{ChainProvider, ProviderError};

/// `ChainProvider` issuing `eth_call` requests to JSON-RPC endpoints
pub struct JsonRpcChainProvider {
    client: reqwest::Client,
    config: ChainRpcConfig,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<String>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

impl JsonRpcChainProvider {
    pub fn new(config: ChainRpcConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        Ok(Self { client, config })
    }
}

pub(crate) fn eth_call_request(contract: &Address, selector: [u8; 4], args: &[u8]) -> serde_json::Value {
    let mut data = selector.to_vec();
    data.extend_from_slice(args);
    json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "eth_call",
        "params": [
            {
                "to": format!("0x{}", hex::encode(contract)),
                "data": format!("0x{}", hex::encode(data)),
            },
            "latest"
        ]
    })
}

pub(crate) fn decode_eth_call_response(body: &[u8]) -> Result<Vec<u8>, ProviderError> {
    let response: RpcResponse =
        serde_json::from_slice(body).map_err(|e| ProviderError::Malformed(e.to_string()))?;

    if let Some(error) = response.error {
        return Err(ProviderError::Rpc(format!("{} ({})", error.message, error.code)));
    }

    let result = response
        .result
        .ok_or_else(|| ProviderError::Malformed("missing result".to_string()))?;
    let hex_part = result
        .strip_prefix("0x")
        .ok_or_else(|| ProviderError::Malformed("result is not 0x-prefixed".to_string()))?;
    hex::decode(hex_part).map_err(|e| ProviderError::Malformed(e.to_string()))
}

#[async_trait::async_trait]
impl ChainProvider for JsonRpcChainProvider {
    async fn call(
        &self,
        chain_id: u64,
        contract: Address,
        selector: [u8; 4],
        args: &[u8],
    ) -> Result<Vec<u8>, ProviderError> {
        let endpoint = self
            .config
            .endpoint_for(chain_id)
            .ok_or(ProviderError::UnsupportedChain(chain_id))?;

        let mut request = self
            .client
            .post(endpoint)
            .json(&eth_call_request(&contract, selector, args));
        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ProviderError::Transport(format!(
                "endpoint answered {}",
                response.status()
            )));
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        decode_eth_call_response(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::ethereum::{parse_address, IS_VALID_SIGNATURE_SELECTOR};

    #[test]
    fn test_eth_call_request() {
        let contract = parse_address("0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed").unwrap();
        let request = eth_call_request(&contract, IS_VALID_SIGNATURE_SELECTOR, &[0xff]);

        assert_eq!(request["method"], "eth_call");
        assert_eq!(
            request["params"][0]["to"],
            "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed"
        );
        assert_eq!(request["params"][0]["data"], "0x1626ba7eff");
        assert_eq!(request["params"][1], "latest");
    }

    #[test]
    fn test_decode_result() {
        let body = br#"{"jsonrpc":"2.0","id":1,"result":"0x1626ba7e"}"#;
        assert_eq!(
            decode_eth_call_response(body).unwrap(),
            vec![0x16, 0x26, 0xba, 0x7e]
        );
    }

    #[test]
    fn test_decode_error() {
        let body = br#"{"jsonrpc":"2.0","id":1,"error":{"code":3,"message":"execution reverted"}}"#;
        assert!(matches!(
            decode_eth_call_response(body),
            Err(ProviderError::Rpc(_))
        ));
        assert!(matches!(
            decode_eth_call_response(b"<html>"),
            Err(ProviderError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_unconfigured_chain() {
        let provider = JsonRpcChainProvider::new(ChainRpcConfig::default()).unwrap();
        let result = provider
            .call(1, [0u8; 20], IS_VALID_SIGNATURE_SELECTOR, &[])
            .await;
        assert!(matches!(result, Err(ProviderError::UnsupportedChain(1))));
    }
}
