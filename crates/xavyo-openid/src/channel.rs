//! Message channel
//!
//! Reads protocol messages out of host-normalized requests, runs them
//! through the binding pipeline, and encodes responses for the transport
//! their kind requires.

use crate::binding::{BindingContext, BindingPipeline};
use crate::error::{OpenIdError, OpenIdResult};
use crate::http::{HttpRequestInfo, OutgoingResponse};
use crate::message::{kvform, Message, MessageKind, Transport};
use http::{Method, StatusCode};
use url::{form_urlencoded, Url};

/// Prefix of every protocol field in transport encoding
pub const FIELD_PREFIX: &str = "openid.";

/// Maximum accepted query string length (8 KB)
const MAX_QUERY_LENGTH: usize = 8 * 1024;

/// Maximum accepted form body size (64 KB)
const MAX_BODY_SIZE: usize = 64 * 1024;

/// Transport encoding plus the binding pipeline.
#[derive(Default)]
pub struct Channel {
    pipeline: BindingPipeline,
}

impl Channel {
    #[must_use]
    pub fn new(pipeline: BindingPipeline) -> Self {
        Self { pipeline }
    }

    #[must_use]
    pub fn pipeline(&self) -> &BindingPipeline {
        &self.pipeline
    }

    /// Decode the protocol message carried by `request`.
    ///
    /// `Ok(None)` means the request carries no `openid.*` fields at all.
    pub fn read_from_request(&self, request: &HttpRequestInfo) -> OpenIdResult<Option<Message>> {
        let pairs: Vec<(String, String)> = if request.method == Method::GET {
            let query = request.url.query().unwrap_or("");
            if query.len() > MAX_QUERY_LENGTH {
                return Err(OpenIdError::MalformedMessage(format!(
                    "Query string exceeds {MAX_QUERY_LENGTH} bytes"
                )));
            }
            form_urlencoded::parse(query.as_bytes()).into_owned().collect()
        } else if request.is_form_post() {
            if request.body.len() > MAX_BODY_SIZE {
                return Err(OpenIdError::MalformedMessage(format!(
                    "Request body exceeds {MAX_BODY_SIZE} bytes"
                )));
            }
            form_urlencoded::parse(&request.body).into_owned().collect()
        } else {
            return Ok(None);
        };

        let fields: Vec<(String, String)> = pairs
            .into_iter()
            .filter_map(|(k, v)| k.strip_prefix(FIELD_PREFIX).map(|k| (k.to_string(), v)))
            .collect();
        if fields.is_empty() {
            return Ok(None);
        }

        let message = Message::decode_request(fields)?;
        if message.kind().transport() == Transport::Direct && request.method != Method::POST {
            return Err(OpenIdError::MalformedMessage(format!(
                "{:?} must be sent as a direct POST",
                message.kind()
            )));
        }
        tracing::debug!(kind = ?message.kind(), version = ?message.version(), "OpenID request decoded");
        Ok(Some(message))
    }

    /// Run the incoming half of the pipeline.
    pub async fn process_incoming(
        &self,
        message: Message,
        context: &BindingContext<'_>,
    ) -> OpenIdResult<Message> {
        self.pipeline.process_incoming(message, context).await
    }

    /// Run the outgoing half of the pipeline and encode the result.
    ///
    /// Indirect messages go to `recipient`; direct responses ignore it.
    pub async fn prepare_response(
        &self,
        message: Message,
        recipient: Option<&Url>,
        context: &BindingContext<'_>,
    ) -> OpenIdResult<OutgoingResponse> {
        let message = self.pipeline.prepare_outgoing(message, context).await?;
        encode_response(&message, recipient)
    }
}

/// Encode a finished message for its transport.
pub fn encode_response(message: &Message, recipient: Option<&Url>) -> OpenIdResult<OutgoingResponse> {
    if message.kind().is_direct_response() {
        let status = if message.kind() == MessageKind::DirectErrorResponse {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::OK
        };
        return Ok(OutgoingResponse::Direct {
            status,
            body: kvform::encode(&message.encode())?,
        });
    }

    let recipient = recipient.ok_or_else(|| {
        OpenIdError::MalformedMessage(format!("{:?} needs a recipient URL", message.kind()))
    })?;
    Ok(OutgoingResponse::indirect(recipient, prefixed_fields(message)))
}

/// Transport pairs: every key carries the `openid.` prefix.
#[must_use]
pub fn prefixed_fields(message: &Message) -> Vec<(String, String)> {
    message
        .encode()
        .into_iter()
        .map(|(k, v)| (format!("{FIELD_PREFIX}{k}"), v))
        .collect()
}

/// Build the request a Relying Party would send `message` with.
///
/// Direct messages become a form POST, indirect ones a GET with a query.
#[must_use]
pub fn request_for(message: &Message, endpoint: &Url) -> HttpRequestInfo {
    let pairs = prefixed_fields(message);
    match message.kind().transport() {
        Transport::Direct => {
            let body = form_urlencoded::Serializer::new(String::new())
                .extend_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
                .finish();
            HttpRequestInfo::new(Method::POST, endpoint.clone()).with_form_body(body)
        }
        Transport::Indirect => {
            let mut url = endpoint.clone();
            url.query_pairs_mut()
                .extend_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())));
            HttpRequestInfo::new(Method::GET, url)
        }
    }
}

/// Decode a direct response body as the kind the request implies.
pub fn read_direct_response(kind: MessageKind, body: &str) -> OpenIdResult<Message> {
    Message::decode(kind, kvform::decode(body)?)
}

/// Decode the indirect message carried in a redirect location.
pub fn read_indirect_message(location: &Url) -> OpenIdResult<Message> {
    let fields: Vec<(String, String)> = location
        .query_pairs()
        .into_owned()
        .filter_map(|(k, v)| k.strip_prefix(FIELD_PREFIX).map(|k| (k.to_string(), v)))
        .collect();
    Message::decode_request(fields)
}
