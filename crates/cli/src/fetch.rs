//! Blocking HTTP page source.

use std::thread;
use std::time::Duration;

use log::{debug, warn};
use reqwest::blocking::Client;
use reqwest::StatusCode;

use threadscrape_core::{FetchFailure, PageSource};

/// Desktop browser UA; archive mirrors tend to block obvious bots.
const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/110.0.0.0 Safari/537.36";

/// Fetches pages over HTTP, pausing and retrying when the source rate-limits us.
pub struct HttpSource {
    client: Client,
    cooldown: Duration,
    rate_limit_retries: usize,
}

impl HttpSource {
    pub fn new(timeout: Duration, cooldown: Duration, rate_limit_retries: usize) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            cooldown,
            rate_limit_retries,
        })
    }
}

impl PageSource for HttpSource {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchFailure> {
        let mut retries_left = self.rate_limit_retries;
        loop {
            debug!("--> Fetching: {}", url);
            let response = self
                .client
                .get(url)
                .send()
                .map_err(|e| FetchFailure::Transport(e.to_string()))?;

            let status = response.status();
            if status.is_success() {
                return response
                    .bytes()
                    .map(|body| body.to_vec())
                    .map_err(|e| FetchFailure::Transport(e.to_string()));
            }

            if status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS {
                warn!("Blocked ({}). Waiting {}s...", status.as_u16(), self.cooldown.as_secs());
                thread::sleep(self.cooldown);
                if retries_left == 0 {
                    return Err(FetchFailure::RateLimited);
                }
                retries_left -= 1;
                continue;
            }

            return Err(FetchFailure::Status(status.as_u16()));
        }
    }
}
