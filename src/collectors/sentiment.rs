// =============================================================================
// Sentiment Client — Alternative.me Fear & Greed Index
// =============================================================================

use tracing::instrument;

use crate::collectors::{get_json_with_retry, http_client};
use crate::errors::CollectorError;

const SOURCE: &str = "fear_greed";
const BASE_URL: &str = "https://api.alternative.me/fng";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FearGreedClassification {
    ExtremeFear,
    Fear,
    Neutral,
    Greed,
    ExtremeGreed,
}

impl FearGreedClassification {
    fn parse(label: &str) -> Self {
        match label.to_ascii_lowercase().as_str() {
            "extreme fear" => Self::ExtremeFear,
            "fear" => Self::Fear,
            "greed" => Self::Greed,
            "extreme greed" => Self::ExtremeGreed,
            _ => Self::Neutral,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FearGreedReading {
    pub value: u8,
    pub classification: FearGreedClassification,
}

pub struct SentimentClient {
    client: reqwest::Client,
}

impl SentimentClient {
    pub fn new() -> Self {
        Self { client: http_client() }
    }

    /// Current Fear & Greed reading.
    #[instrument(skip(self), name = "sentiment::fetch_current")]
    pub async fn fetch_current(&self) -> Result<FearGreedReading, CollectorError> {
        let body = get_json_with_retry(&self.client, BASE_URL, SOURCE).await?;
        parse_reading(&body).ok_or_else(|| CollectorError::Malformed {
            source: SOURCE.to_string(),
            detail: "missing data[0]".to_string(),
        })
    }

    /// Last `limit` days of Fear & Greed readings, oldest last (as returned
    /// by the upstream API).
    #[instrument(skip(self), name = "sentiment::fetch_history")]
    pub async fn fetch_history(&self, limit: u32) -> Result<Vec<FearGreedReading>, CollectorError> {
        let url = format!("{BASE_URL}/?limit={limit}");
        let body = get_json_with_retry(&self.client, &url, SOURCE).await?;

        let items = body["data"].as_array().ok_or_else(|| CollectorError::Malformed {
            source: SOURCE.to_string(),
            detail: "missing 'data' array".to_string(),
        })?;

        Ok(items
            .iter()
            .filter_map(|item| {
                let value = item["value"].as_str()?.parse::<u8>().ok()?;
                let classification = FearGreedClassification::parse(item["value_classification"].as_str()?);
                Some(FearGreedReading { value, classification })
            })
            .collect())
    }
}

impl Default for SentimentClient {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_reading(body: &serde_json::Value) -> Option<FearGreedReading> {
    let first = body["data"].as_array()?.first()?;
    let value = first["value"].as_str()?.parse::<u8>().ok()?;
    let classification = FearGreedClassification::parse(first["value_classification"].as_str()?);
    Some(FearGreedReading { value, classification })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_reading_extracts_value_and_classification() {
        let body = serde_json::json!({"data": [{"value": "65", "value_classification": "Greed"}]});
        let reading = parse_reading(&body).unwrap();
        assert_eq!(reading.value, 65);
        assert_eq!(reading.classification, FearGreedClassification::Greed);
    }

    #[test]
    fn parse_reading_falls_back_to_neutral_for_unknown_label() {
        let body = serde_json::json!({"data": [{"value": "50", "value_classification": "Balanced"}]});
        let reading = parse_reading(&body).unwrap();
        assert_eq!(reading.classification, FearGreedClassification::Neutral);
    }

    #[test]
    fn parse_reading_returns_none_on_empty_data() {
        let body = serde_json::json!({"data": []});
        assert!(parse_reading(&body).is_none());
    }
}
