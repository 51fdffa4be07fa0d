//! Ratings metadata service client backed by `ureq`.

use std::io::{BufRead, BufReader};
use std::time::Duration;

use log::debug;
use serde_json::Value;

use crate::backends::{MetadataSource, SubmitReceipt};
use crate::config::SourceConfig;
use crate::error::FetchError;
use crate::protocol::DeliveryMode;
use crate::title_record::{JobId, TitleFragment, TitleId};

pub struct HttpMetadataSource {
    base_url: String,
    http_client: ureq::Agent,
    stream_client: ureq::Agent,
}

impl HttpMetadataSource {
    pub fn new(config: &SourceConfig) -> Self {
        let connect_timeout = Duration::from_secs(config.connect_timeout_secs);
        let request_timeout = Duration::from_secs(config.request_timeout_secs);
        let http_client = ureq::AgentBuilder::new()
            .timeout_connect(connect_timeout)
            .timeout_read(request_timeout)
            .timeout_write(request_timeout)
            .build();
        // Job streams stay open until the service finishes the job.
        let stream_client = ureq::AgentBuilder::new()
            .timeout_connect(connect_timeout)
            .timeout_write(request_timeout)
            .build();
        Self {
            base_url: Self::endpoint_base(&config.base_url),
            http_client,
            stream_client,
        }
    }

    fn endpoint_base(endpoint: &str) -> String {
        endpoint.trim().trim_end_matches('/').to_string()
    }

    fn submit_url(&self, country: &str) -> String {
        format!(
            "{}/api/titles?country={}",
            self.base_url,
            urlencoding::encode(country)
        )
    }

    fn stream_url(&self, job_id: &JobId) -> String {
        format!(
            "{}/api/stream/{}",
            self.base_url,
            urlencoding::encode(&job_id.0)
        )
    }

    fn catalog_url(&self, country: Option<&str>) -> String {
        match country {
            Some(country) => format!(
                "{}/api/titles?available_in={}",
                self.base_url,
                urlencoding::encode(country)
            ),
            None => format!("{}/api/titles", self.base_url),
        }
    }
}

/// Interprets the service's reply to a batch submission.
///
/// Inline `titles` mean bulk delivery; anything else streams. A reply that
/// announces `"delivery": "bulk"` without `titles` is malformed.
pub fn parse_submit_reply(reply: Value) -> Result<SubmitReceipt, FetchError> {
    let Value::Object(mut object) = reply else {
        return Err(FetchError::MalformedReply(
            "expected a JSON object".to_string(),
        ));
    };
    let job_id = object
        .get("job_id")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| JobId(value.to_string()))
        .ok_or_else(|| FetchError::MalformedReply("missing job_id".to_string()))?;
    let delivery = object
        .get("delivery")
        .and_then(Value::as_str)
        .map(str::to_ascii_lowercase);
    let inline_titles = match object.remove("titles") {
        None | Some(Value::Null) => None,
        Some(titles) => Some(TitleFragment::from_value(titles).map_err(FetchError::MalformedReply)?),
    };
    match (delivery.as_deref(), inline_titles) {
        (_, Some(titles)) => Ok(SubmitReceipt {
            job_id,
            mode: DeliveryMode::Bulk,
            bulk_titles: Some(titles),
        }),
        (Some("bulk"), None) => Err(FetchError::MalformedReply(format!(
            "bulk reply for job {job_id} carries no titles"
        ))),
        (_, None) => Ok(SubmitReceipt {
            job_id,
            mode: DeliveryMode::Streamed,
            bulk_titles: None,
        }),
    }
}

impl MetadataSource for HttpMetadataSource {
    fn submit_batch(
        &self,
        title_ids: &[TitleId],
        country: &str,
    ) -> Result<SubmitReceipt, FetchError> {
        let url = self.submit_url(country);
        debug!("Submitting {} title(s) to {}", title_ids.len(), url);
        let body: Vec<u64> = title_ids.iter().map(|title_id| title_id.0).collect();
        let response = self
            .http_client
            .post(&url)
            .send_json(&body)
            .map_err(FetchError::from)?;
        let reply: Value = response
            .into_json()
            .map_err(|err| FetchError::MalformedReply(err.to_string()))?;
        parse_submit_reply(reply)
    }

    fn open_job_stream(&self, job_id: &JobId) -> Result<Box<dyn BufRead + Send>, FetchError> {
        let url = self.stream_url(job_id);
        debug!("Opening result stream {}", url);
        let response = self
            .stream_client
            .get(&url)
            .set("Accept", "text/event-stream")
            .call()
            .map_err(FetchError::from)?;
        Ok(Box::new(BufReader::new(response.into_reader())))
    }

    fn fetch_catalog(&self, country: Option<&str>) -> Result<TitleFragment, FetchError> {
        let url = self.catalog_url(country);
        let response = self
            .http_client
            .get(&url)
            .call()
            .map_err(FetchError::from)?;
        let catalog: Value = response
            .into_json()
            .map_err(|err| FetchError::MalformedReply(err.to_string()))?;
        TitleFragment::from_value(catalog).map_err(FetchError::MalformedReply)
    }
}
