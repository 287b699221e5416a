//! OpenML.
//!
//! The dataset description names a parquet distribution and the default
//! target attribute(s), which are split out as the targets table.

use polars::prelude::*;
use reqwest::blocking::Client;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::Cursor;

use super::tabular::{split_targets, TabularApi, TabularFetch};
use crate::error::DataError;
use crate::fetch::http::send_checked;

pub const OPENML_ENDPOINT: &str = "https://www.openml.org";

#[derive(Debug, Deserialize)]
struct DescriptionEnvelope {
    data_set_description: Description,
}

#[derive(Debug, Deserialize)]
struct Description {
    name: String,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    parquet_url: Option<String>,
    #[serde(default)]
    default_target_attribute: Option<String>,
}

pub struct OpenMlApi {
    client: Client,
    endpoint: String,
}

impl OpenMlApi {
    pub fn new(client: Client) -> Self {
        Self::with_endpoint(client, OPENML_ENDPOINT)
    }

    pub fn with_endpoint(client: Client, endpoint: &str) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }
}

impl TabularApi for OpenMlApi {
    fn fetch(&self, dataset_id: u32) -> Result<TabularFetch, DataError> {
        let url = format!("{}/api/v1/json/data/{dataset_id}", self.endpoint);
        let envelope: DescriptionEnvelope = send_checked(self.client.get(&url), &url)?
            .json()
            .map_err(|e| DataError::remote(&url, format!("unexpected response: {e}")))?;
        let description = envelope.data_set_description;

        let parquet_url = description.parquet_url.ok_or_else(|| {
            DataError::remote(
                &url,
                format!("dataset {dataset_id} has no parquet distribution"),
            )
        })?;
        let bytes = send_checked(self.client.get(&parquet_url), &parquet_url)?
            .bytes()
            .map_err(|e| DataError::remote(&parquet_url, e))?;
        let df = ParquetReader::new(Cursor::new(bytes.to_vec()))
            .finish()
            .map_err(|e| DataError::malformed(&parquet_url, e))?;

        let targets = target_names(description.default_target_attribute.as_deref());
        let (features, targets) = split_targets(df, &targets)?;

        let mut extra = BTreeMap::new();
        extra.insert("name".to_string(), description.name.into());
        if let Some(version) = description.version {
            extra.insert("version".to_string(), version.into());
        }
        Ok(TabularFetch {
            features,
            targets,
            source_url: format!("{}/d/{dataset_id}", self.endpoint),
            extra,
        })
    }
}

/// `default_target_attribute` may list several comma-separated columns.
fn target_names(attribute: Option<&str>) -> Vec<String> {
    attribute
        .map(|a| {
            a.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_attribute_list() {
        assert_eq!(target_names(Some("class")), vec!["class"]);
        assert_eq!(target_names(Some("a, b")), vec!["a", "b"]);
        assert!(target_names(None).is_empty());
    }

    #[test]
    fn description_parses() {
        let json = r#"{"data_set_description": {"id": "29", "name": "credit-approval",
            "version": "1", "parquet_url": "https://openml.test/d.pq",
            "default_target_attribute": "class"}}"#;
        let envelope: DescriptionEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.data_set_description.name, "credit-approval");
        assert_eq!(
            envelope.data_set_description.default_target_attribute.as_deref(),
            Some("class")
        );
    }
}
