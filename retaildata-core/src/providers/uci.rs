//! UCI Machine Learning Repository.
//!
//! The dataset API returns the dataset's CSV location and a variable list;
//! variables with role `Target` become the targets table.

use reqwest::blocking::Client;
use serde::Deserialize;
use std::collections::BTreeMap;

use super::tabular::{read_csv_bytes, split_targets, TabularApi, TabularFetch};
use crate::error::DataError;
use crate::fetch::http::send_checked;

pub const UCI_ENDPOINT: &str = "https://archive.ics.uci.edu";

#[derive(Debug, Deserialize)]
struct DatasetResponse {
    status: u16,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<DatasetInfo>,
}

#[derive(Debug, Deserialize)]
struct DatasetInfo {
    name: String,
    #[serde(default)]
    data_url: Option<String>,
    #[serde(default)]
    variables: Vec<Variable>,
}

#[derive(Debug, Deserialize)]
struct Variable {
    name: String,
    #[serde(default)]
    role: String,
}

pub struct UciApi {
    client: Client,
    endpoint: String,
}

impl UciApi {
    pub fn new(client: Client) -> Self {
        Self::with_endpoint(client, UCI_ENDPOINT)
    }

    pub fn with_endpoint(client: Client, endpoint: &str) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }
}

impl TabularApi for UciApi {
    fn fetch(&self, dataset_id: u32) -> Result<TabularFetch, DataError> {
        let url = format!("{}/api/dataset?id={dataset_id}", self.endpoint);
        let response: DatasetResponse = send_checked(self.client.get(&url), &url)?
            .json()
            .map_err(|e| DataError::remote(&url, format!("unexpected response: {e}")))?;

        let info = match (response.status, response.data) {
            (200, Some(info)) => info,
            (status, _) => {
                return Err(DataError::NotFound(format!(
                    "UCI dataset {dataset_id} ({status}: {})",
                    response.message.unwrap_or_else(|| "no details".into())
                )))
            }
        };
        let data_url = info.data_url.ok_or_else(|| {
            DataError::remote(
                &url,
                format!("dataset {dataset_id} ({}) is not available for import", info.name),
            )
        })?;

        let bytes = send_checked(self.client.get(&data_url), &data_url)?
            .bytes()
            .map_err(|e| DataError::remote(&data_url, e))?;
        let df = read_csv_bytes(bytes.to_vec(), &data_url)?;

        let targets: Vec<String> = info
            .variables
            .iter()
            .filter(|v| v.role.eq_ignore_ascii_case("target"))
            .map(|v| v.name.clone())
            .collect();
        let (features, targets) = split_targets(df, &targets)?;

        let mut extra = BTreeMap::new();
        extra.insert("name".to_string(), info.name.into());
        Ok(TabularFetch {
            features,
            targets,
            source_url: format!("{}/dataset/{dataset_id}", self.endpoint),
            extra,
        })
    }
}
