// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

use anyhow::anyhow;
use serde::de::DeserializeOwned;
use serde::Deserialize;

/// A plain GraphQL-over-HTTP client for subgraph and status endpoints.
#[derive(Clone, Debug)]
pub struct SubgraphClient {
    client: reqwest::Client,
    url: String,
}

#[derive(Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Deserialize)]
struct GraphQlError {
    message: String,
}

impl SubgraphClient {
    pub fn new(client: reqwest::Client, url: &str) -> Self {
        Self {
            client,
            url: url.to_string(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Runs a query and deserializes the `data` field. GraphQL-level
    /// errors surface as `Err`.
    pub async fn query<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: serde_json::Value,
    ) -> anyhow::Result<T> {
        let body = serde_json::json!({ "query": query, "variables": variables });
        let response = self.client.post(&self.url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("query to {} failed with status {status}", self.url));
        }

        let response: GraphQlResponse<T> = response.json().await?;
        if let Some(error) = response.errors.first() {
            return Err(anyhow!("query returned errors: {}", error.message));
        }
        response
            .data
            .ok_or_else(|| anyhow!("query returned no data"))
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;
    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct GraphNetworkData {
        graph_network: GraphNetwork,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct GraphNetwork {
        current_epoch: u64,
    }

    #[test_log::test(tokio::test)]
    async fn query_deserializes_data() {
        let mock_server = MockServer::start().await;
        mock_server
            .register(Mock::given(method("POST")).and(path("/subgraph")).respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "data": { "graphNetwork": { "currentEpoch": 896419 }}})),
            ))
            .await;

        let client = SubgraphClient::new(
            reqwest::Client::new(),
            &format!("{}/subgraph", mock_server.uri()),
        );
        let data: GraphNetworkData = client
            .query("{ graphNetwork { currentEpoch } }", json!({}))
            .await
            .unwrap();
        assert_eq!(data.graph_network.current_epoch, 896419);
    }

    #[test_log::test(tokio::test)]
    async fn graphql_errors_surface_as_errors() {
        let mock_server = MockServer::start().await;
        mock_server
            .register(Mock::given(method("POST")).respond_with(
                ResponseTemplate::new(200).set_body_json(
                    json!({ "errors": [{ "message": "field does not exist" }]}),
                ),
            ))
            .await;

        let client = SubgraphClient::new(reqwest::Client::new(), &mock_server.uri());
        let result = client
            .query::<GraphNetworkData>("{ graphNetwork { currentEpoch } }", json!({}))
            .await;
        assert!(result.unwrap_err().to_string().contains("field does not exist"));
    }
}
