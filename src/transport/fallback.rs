//! Fallback channel: one-shot HTTP request/response to the chat endpoint.

use chatlink_protocol::{ChatResponse, InboundFrame, OutboundMessage};
use url::Url;

use super::{DELIVERY_FAILED_REPLY, InboundBody};

/// POSTs outbound messages to the fallback chat endpoint.
#[derive(Debug, Clone)]
pub(crate) struct FallbackChannel {
    client: reqwest::Client,
    url: Url,
}

impl FallbackChannel {
    pub(crate) fn new(client: reqwest::Client, url: Url) -> Self {
        Self { client, url }
    }

    /// Send `msg` and turn whatever comes back into an inbound payload.
    ///
    /// A 2xx `{"response": ...}` body becomes a raw frame, to be classified
    /// like a push frame. A non-2xx status becomes an error reply naming the
    /// status code. Network and decoding failures become a generic apology.
    pub(crate) async fn post(&self, msg: &OutboundMessage) -> InboundBody {
        let response = match self.client.post(self.url.clone()).json(msg).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(url = %self.url, "fallback request failed: {e}");
                return InboundBody::Synthetic(InboundFrame::reply(DELIVERY_FAILED_REPLY));
            }
        };

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(url = %self.url, status = status.as_u16(), "fallback request rejected");
            return InboundBody::Synthetic(InboundFrame::reply(status_error_reply(
                status.as_u16(),
            )));
        }

        match response.json::<ChatResponse>().await {
            Ok(body) => InboundBody::Raw(body.response),
            Err(e) => {
                tracing::warn!(url = %self.url, "fallback response could not be decoded: {e}");
                InboundBody::Synthetic(InboundFrame::reply(DELIVERY_FAILED_REPLY))
            }
        }
    }
}

/// Reply text for a non-success fallback status.
pub fn status_error_reply(status: u16) -> String {
    format!("Error: Server returned status {status}")
}
