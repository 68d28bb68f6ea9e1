//! Client for the external distress classification model.
//!
//! The model server accepts `{"text": "..."}` and answers
//! `{"result": "DISTRESS" | "NORMAL"}`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ClassifierError;
use crate::model::Classification;

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<Classification, ClassifierError>;
}

#[derive(Debug, Serialize)]
struct PredictionRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct PredictionResponse {
    result: String,
}

/// Map a model label to a classification.
fn parse_label(label: &str) -> Result<Classification, ClassifierError> {
    match label.trim().to_ascii_uppercase().as_str() {
        "DISTRESS" => Ok(Classification::Distress),
        "NORMAL" => Ok(Classification::Normal),
        _ => Err(ClassifierError::UnknownLabel(label.to_string())),
    }
}

/// Classifier backed by the HTTP model server.
#[derive(Clone)]
pub struct HttpClassifier {
    client: reqwest::Client,
    url: String,
}

impl HttpClassifier {
    pub fn new(url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn classify(&self, text: &str) -> Result<Classification, ClassifierError> {
        let response = self
            .client
            .post(&self.url)
            .json(&PredictionRequest { text })
            .send()
            .await?
            .error_for_status()?;

        let prediction = response.json::<PredictionResponse>().await?;
        parse_label(&prediction.result)
    }
}
