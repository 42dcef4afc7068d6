//! Delay predictor boundary.
//!
//! The coordinator asks an external model for a delay estimate on every
//! tick. The model is a black box: it may be slow, absent or unsure, and in
//! every one of those cases the simulator's own accumulated delay is used
//! instead. Backends are dispatched through the [`DelayEstimator`] enum
//! rather than a trait object since the only call is async.
//!
//! The HTTP backend POSTs a [`PredictionRequest`] as JSON to
//! `{url}/predict` and expects `{"delay_minutes": f64, "confidence": f64}`
//! (`predicted_delay_minutes` is accepted as an alias).

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use transit_types::{RouteId, TripId};

use crate::config::PredictorConfig;

/// Inputs sent to the predictor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionRequest {
    /// Route being predicted.
    pub route_id: RouteId,
    /// Trip being predicted.
    pub trip_id: TripId,
    /// Time of the prediction.
    pub current_time: DateTime<Utc>,
    /// Normalised traffic level in `[0, 1]`.
    pub traffic_level: f64,
    /// Riders on board.
    pub passenger_load: u32,
}

/// A delay estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Predicted delay in minutes.
    #[serde(alias = "predicted_delay_minutes")]
    pub delay_minutes: f64,
    /// Model confidence in `[0, 1]`.
    pub confidence: f64,
}

/// Why no usable prediction was obtained.
#[derive(Debug, thiserror::Error)]
pub enum EstimatorError {
    /// No predictor is configured.
    #[error("no delay predictor configured")]
    Unavailable,

    /// The HTTP call failed.
    #[error("predictor request failed: {source}")]
    Http {
        /// The transport error.
        #[from]
        source: reqwest::Error,
    },

    /// The predictor answered with a non-success status.
    #[error("predictor returned {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },

    /// The response parsed but holds unusable numbers.
    #[error("predictor response invalid: {reason}")]
    InvalidResponse {
        /// What was wrong.
        reason: String,
    },

    /// The call exceeded the configured bound.
    #[error("predictor timed out after {timeout_ms} ms")]
    Timeout {
        /// The bound that was exceeded.
        timeout_ms: u64,
    },
}

/// A delay estimator backend.
#[derive(Debug, Clone)]
pub enum DelayEstimator {
    /// Remote model over HTTP.
    Http(HttpDelayEstimator),
    /// Always returns the same prediction. Useful offline and in tests.
    Fixed(Prediction),
    /// No predictor; every call reports [`EstimatorError::Unavailable`].
    Null,
}

impl DelayEstimator {
    /// Build the estimator described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`EstimatorError::Http`] if the HTTP client cannot be built.
    pub fn from_config(config: &PredictorConfig) -> Result<Self, EstimatorError> {
        match &config.url {
            Some(url) => Ok(Self::Http(HttpDelayEstimator::new(
                url,
                Duration::from_millis(config.timeout_ms),
            )?)),
            None => Ok(Self::Null),
        }
    }

    /// Ask the backend for a delay estimate.
    ///
    /// # Errors
    ///
    /// Any [`EstimatorError`]; callers fall back to their own estimate.
    pub async fn predict_delay(
        &self,
        request: &PredictionRequest,
    ) -> Result<Prediction, EstimatorError> {
        match self {
            Self::Http(backend) => backend.predict(request).await,
            Self::Fixed(prediction) => Ok(*prediction),
            Self::Null => Err(EstimatorError::Unavailable),
        }
    }

    /// Human-readable name for logging.
    pub const fn name(&self) -> &str {
        match self {
            Self::Http(_) => "http",
            Self::Fixed(_) => "fixed",
            Self::Null => "none",
        }
    }
}

/// Remote predictor reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpDelayEstimator {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpDelayEstimator {
    /// Create a client for the predictor at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`EstimatorError::Http`] if the client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, EstimatorError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/predict", base_url.trim_end_matches('/')),
        })
    }

    /// Full URL requests are sent to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn predict(&self, request: &PredictionRequest) -> Result<Prediction, EstimatorError> {
        let response = self.client.post(&self.endpoint).json(request).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(EstimatorError::Status {
                status: status.as_u16(),
            });
        }

        let prediction: Prediction = response.json().await?;
        validate(prediction)
    }
}

fn validate(prediction: Prediction) -> Result<Prediction, EstimatorError> {
    if !prediction.delay_minutes.is_finite() {
        return Err(EstimatorError::InvalidResponse {
            reason: String::from("delay is not finite"),
        });
    }
    if !(0.0..=1.0).contains(&prediction.confidence) {
        return Err(EstimatorError::InvalidResponse {
            reason: format!("confidence {} outside [0, 1]", prediction.confidence),
        });
    }
    Ok(Prediction {
        delay_minutes: prediction.delay_minutes.max(0.0),
        confidence: prediction.confidence,
    })
}
