//! Fuzz target for request decoding.
//!
//! Feeds arbitrary `openid.*` fields through the channel as both a query
//! string and a form body, then through the incoming binding pipeline.
//!
//! Run with:
//! cargo +nightly fuzz run fuzz_message_decode -- -max_total_time=600

#![no_main]

use arbitrary::Arbitrary;
use chrono::Utc;
use http::Method;
use libfuzzer_sys::fuzz_target;
use url::Url;
use xavyo_openid::{Channel, HttpRequestInfo, Message, ProviderStoreRegistry, SecuritySettings};

#[derive(Debug, Arbitrary)]
struct Input {
    fields: Vec<(String, String)>,
    as_post: bool,
}

fuzz_target!(|input: Input| {
    let fields: Vec<(String, String)> = input
        .fields
        .iter()
        .map(|(k, v)| (format!("openid.{k}"), v.clone()))
        .collect();

    // Field-level decoding
    let _ = Message::decode_request(input.fields.iter().map(|(k, v)| (k.as_str(), v.as_str())));

    let Ok(mut url) = Url::parse("https://op.example.com/server") else {
        return;
    };
    let request = if input.as_post {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .finish();
        HttpRequestInfo::new(Method::POST, url).with_form_body(body)
    } else {
        url.query_pairs_mut()
            .extend_pairs(fields.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        HttpRequestInfo::new(Method::GET, url)
    };

    let channel = Channel::default();
    let Ok(Some(message)) = channel.read_from_request(&request) else {
        return;
    };

    let settings = SecuritySettings::default();
    let registry = ProviderStoreRegistry::new(settings.clone());
    let store = registry.store_for(&request.url);
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    runtime.block_on(async {
        let context = store.binding_context(&settings, Utc::now());
        let _ = channel.process_incoming(message, &context).await;
    });
});
