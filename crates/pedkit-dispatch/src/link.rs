//! One serial (or TCP) link: frames in, dispatched replies out.

use std::io;
use std::sync::Arc;

use futures::StreamExt;
use pedkit_ped::Ped;
use pedkit_protocol::{FrameCodec, MessageParser};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::dispatcher::Dispatcher;

/// Counters for one link, reported when it closes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub frames: u64,
    pub replies: u64,
    pub silent: u64,
}

/// Serves one link until EOF or cancellation.
///
/// Each link owns its own [`FrameCodec`]; the dispatcher, and with it the
/// PED, is shared. Replies go out in the order their commands arrived.
pub struct LinkSession<P: Ped> {
    name: String,
    dispatcher: Arc<Dispatcher<P>>,
}

impl<P: Ped> LinkSession<P> {
    pub fn new(name: impl Into<String>, dispatcher: Arc<Dispatcher<P>>) -> Self {
        Self {
            name: name.into(),
            dispatcher,
        }
    }

    pub async fn run<S>(self, stream: S, cancel: CancellationToken) -> io::Result<LinkStats>
    where
        S: AsyncRead + AsyncWrite + Send,
    {
        let link = self.dispatcher.link();
        let parser = MessageParser::new(link.key_length_encoding);
        let codec = FrameCodec::with_max_buffer(link.max_buffer_bytes);

        let (reader, mut writer) = tokio::io::split(stream);
        let mut frames = FramedRead::new(reader, codec);
        let mut stats = LinkStats::default();
        info!(link = %self.name, "link open");

        loop {
            let payload = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(link = %self.name, "link cancelled");
                    break;
                }
                next = frames.next() => match next {
                    Some(payload) => payload?,
                    None => {
                        debug!(link = %self.name, "peer closed the link");
                        break;
                    }
                },
            };
            stats.frames += 1;

            let message = parser.parse(&payload);
            debug!(link = %self.name, code = ?message.command_code(), "frame received");
            match self.dispatcher.handle(message).await {
                Some(reply) => {
                    // formatter output is already framed
                    writer.write_all(&reply).await?;
                    writer.flush().await?;
                    stats.replies += 1;
                }
                None => stats.silent += 1,
            }
        }

        info!(
            link = %self.name,
            frames = stats.frames,
            replies = stats.replies,
            silent = stats.silent,
            "link closed"
        );
        Ok(stats)
    }
}
