use std::time::Duration;

use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::from_str;

use crate::error::{RagError, Result};

pub type ByteStream = BoxStream<'static, Result<Vec<u8>>>;

/// JSON-over-HTTP client bound to one upstream service, used for error attribution.
#[derive(Clone, Debug)]
pub struct HttpClient {
    client: Client,
    service: &'static str,
}

impl HttpClient {
    pub fn new(service: &'static str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RagError::upstream(service, e.to_string()))?;
        Ok(Self { client, service })
    }

    /// No total timeout, only an idle limit per read: a long answer keeps
    /// going while bytes flow, a stalled one fails after `timeout`.
    pub fn streaming(service: &'static str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()
            .map_err(|e| RagError::upstream(service, e.to_string()))?;
        Ok(Self { client, service })
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        self.send("GET", url, self.client.get(url)).await
    }

    pub async fn post_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<T> {
        self.send("POST", url, self.client.post(url).json(body)).await
    }

    pub async fn put_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<T> {
        self.send("PUT", url, self.client.put(url).json(body)).await
    }

    /// POSTs `body` and hands back the raw response body as it arrives.
    pub async fn post_stream<B: Serialize + ?Sized>(&self, url: &str, body: &B) -> Result<ByteStream> {
        let service = self.service;
        let resp = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| RagError::upstream(service, format!("POST {url}: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(RagError::upstream(
                service,
                format!("POST {url} failed: {status} {text}"),
            ));
        }
        Ok(resp
            .bytes_stream()
            .map(move |chunk| {
                chunk
                    .map(|b| b.to_vec())
                    .map_err(|e| RagError::upstream(service, e.to_string()))
            })
            .boxed())
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: &str,
        url: &str,
        req: RequestBuilder,
    ) -> Result<T> {
        let resp = req
            .send()
            .await
            .map_err(|e| RagError::upstream(self.service, format!("{method} {url}: {e}")))?;
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(RagError::upstream(
                self.service,
                format!("{method} {url} failed: {status} {text}"),
            ));
        }
        from_str::<T>(&text).map_err(|e| {
            RagError::upstream(
                self.service,
                format!("{method} {url} decode failed: {e} | {text}"),
            )
        })
    }
}
