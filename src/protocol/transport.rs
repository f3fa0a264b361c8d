use super::{
    error::{Error, Result},
    frame::S7Pdu,
};
use futures::{Sink, Stream};
use std::{
    pin::Pin,
    task::{Context, Poll},
};
use tokio::sync::mpsc;
use tokio_util::sync::PollSender;

/// Parameters exchanged in the transport connection request/confirm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionParams {
    pub calling_tsap: u16,
    pub called_tsap: u16,
    /// TPDU size code (0x0A = 1024 bytes).
    pub tpdu_size: u8,
}

impl ConnectionParams {
    /// TPDU size in bytes for the negotiated code.
    pub fn tpdu_size_bytes(&self) -> usize {
        1usize << self.tpdu_size
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFrame {
    ConnectionRequest(ConnectionParams),
    ConnectionConfirm(ConnectionParams),
    Data(S7Pdu),
    Disconnect,
}

/// Duplex frame channel to one device.
///
/// A stream end (`None`) means the connection is gone.
pub trait Transport:
    Stream<Item = Result<TransportFrame>> + Sink<TransportFrame, Error = Error> + Send + Unpin + 'static
{
}

impl<T> Transport for T where
    T: Stream<Item = Result<TransportFrame>>
        + Sink<TransportFrame, Error = Error>
        + Send
        + Unpin
        + 'static
{
}

/// In-memory transport. One end of a [`channel_pair`].
#[derive(Debug)]
pub struct ChannelTransport {
    tx: PollSender<TransportFrame>,
    rx: mpsc::Receiver<TransportFrame>,
}

/// Two connected in-memory transports, each with `buffer` frames of slack.
pub fn channel_pair(buffer: usize) -> (ChannelTransport, ChannelTransport) {
    let (a_tx, b_rx) = mpsc::channel(buffer.max(1));
    let (b_tx, a_rx) = mpsc::channel(buffer.max(1));
    (
        ChannelTransport {
            tx: PollSender::new(a_tx),
            rx: a_rx,
        },
        ChannelTransport {
            tx: PollSender::new(b_tx),
            rx: b_rx,
        },
    )
}

impl Stream for ChannelTransport {
    type Item = Result<TransportFrame>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx).map(|frame| frame.map(Ok))
    }
}

impl Sink<TransportFrame> for ChannelTransport {
    type Error = Error;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        self.tx
            .poll_reserve(cx)
            .map_err(|_| Error::ErrUseClosedConnection)
    }

    fn start_send(mut self: Pin<&mut Self>, item: TransportFrame) -> Result<()> {
        self.tx
            .send_item(item)
            .map_err(|_| Error::ErrUseClosedConnection)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        self.tx.close();
        self.rx.close();
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{SinkExt, StreamExt};

    #[tokio::test]
    async fn frames_cross_the_pair() {
        let (mut a, mut b) = channel_pair(4);
        let params = ConnectionParams {
            calling_tsap: 0x0100,
            called_tsap: 0x0102,
            tpdu_size: 0x0A,
        };
        a.send(TransportFrame::ConnectionRequest(params)).await.unwrap();
        assert_eq!(
            b.next().await.unwrap().unwrap(),
            TransportFrame::ConnectionRequest(params)
        );
        assert_eq!(params.tpdu_size_bytes(), 1024);
    }

    #[tokio::test]
    async fn close_ends_the_peer_stream() {
        let (mut a, mut b) = channel_pair(1);
        a.close().await.unwrap();
        assert!(b.next().await.is_none());
        assert!(matches!(
            b.send(TransportFrame::Disconnect).await,
            Err(Error::ErrUseClosedConnection)
        ));
    }
}
