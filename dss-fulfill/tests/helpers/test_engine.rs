//! Session and router wired to a mock upstream and in-process live feed

use super::MockUpstream;
use axum::Router;
use dss_common::events::{DssEvent, EventBus};
use dss_fulfill::api::{build_router, AppContext};
use dss_fulfill::buckets::PublishedBuckets;
use dss_fulfill::client::FulfillClient;
use dss_fulfill::credentials::{Credentials, StaticCredentials};
use dss_fulfill::feed::transport::ChannelListener;
use dss_fulfill::feed::{ChannelTransport, FeedConfig};
use dss_fulfill::{Session, SessionHandle};
use reqwest::Url;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

pub struct TestEngine {
    pub session: SessionHandle,
    pub router: Router,
    pub listener: ChannelListener,
    pub transport: ChannelTransport,
    pub events: broadcast::Receiver<DssEvent>,
}

impl TestEngine {
    pub async fn start(upstream: &MockUpstream) -> Self {
        let base_url = upstream.spawn().await;
        let credentials = Arc::new(Credentials::from(StaticCredentials::new(
            upstream.token.as_str(),
        )));
        let client = Arc::new(FulfillClient::new(
            reqwest::Client::new(),
            Url::parse(&base_url).unwrap(),
            credentials,
            Duration::from_secs(30),
        ));

        let event_bus = EventBus::new(256);
        let events = event_bus.subscribe();
        let (transport, listener) = ChannelTransport::new();
        let feed_config = FeedConfig::new(Url::parse("ws://feed.test/ws").unwrap());

        let session = Session::spawn(
            client.clone(),
            feed_config,
            transport.clone(),
            event_bus.clone(),
        );
        let router = build_router(AppContext {
            session: session.clone(),
            client,
            event_bus,
        });

        TestEngine {
            session,
            router,
            listener,
            transport,
            events,
        }
    }

    /// Wait until the bulk load for the scenario actor has been published
    pub async fn loaded(&self) -> Arc<PublishedBuckets> {
        wait_for_buckets(&self.session, |p| {
            p.actor.is_some() && p.counts.pending() + p.counts.needs_review > 0
        })
        .await
    }
}

/// Wait (up to 5s) for a published snapshot matching `pred`
pub async fn wait_for_buckets<F>(session: &SessionHandle, pred: F) -> Arc<PublishedBuckets>
where
    F: Fn(&PublishedBuckets) -> bool,
{
    let mut subscriber = session.buckets();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let latest = subscriber.latest();
            if pred(&latest) {
                return latest;
            }
            subscriber.changed().await.expect("publisher dropped");
        }
    })
    .await
    .expect("timed out waiting for bucket views")
}
