//! Per-subscriber writer pump

use super::bus::Subscription;
use super::message::Frame;
use crate::constants::SUBSCRIBER_WRITE_TIMEOUT;
use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::debug;

/// Outbound side of one subscriber connection
#[async_trait]
pub trait SubscriberSink: Send {
    async fn send_text(&mut self, text: &str) -> anyhow::Result<()>;

    async fn send_ping(&mut self) -> anyhow::Result<()>;

    async fn close(&mut self);
}

/// Drive a subscription into a sink until either side goes away.
/// Each write gets a deadline; a stuck peer ends the pump.
pub fn spawn_writer_pump<S>(mut subscription: Subscription, mut sink: S) -> JoinHandle<()>
where
    S: SubscriberSink + 'static,
{
    tokio::spawn(async move {
        let id = subscription.id();
        while let Some(frame) = subscription.next_frame().await {
            let write = async {
                match &frame {
                    Frame::Message(text) => sink.send_text(text).await,
                    Frame::Heartbeat => sink.send_ping().await,
                }
            };
            match timeout(SUBSCRIBER_WRITE_TIMEOUT, write).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    debug!(subscriber = id, error = %e, "Subscriber write failed");
                    break;
                }
                Err(_) => {
                    debug!(subscriber = id, "Subscriber write timed out");
                    break;
                }
            }
        }
        sink.close().await;
        debug!(subscriber = id, "Writer pump stopped");
    })
}
