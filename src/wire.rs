use bytes::{BufMut, Bytes, BytesMut};

/// Encoding of S7 frame pieces into a byte sink.
///
/// `Context` carries whatever the enclosing layer knows that the value itself
/// does not, e.g. the PDU type a parameter block belongs to.
pub trait WireEncode {
    type Error: std::fmt::Debug + Send + Sync + 'static;
    type Context;

    fn encoded_len(&self, ctx: &Self::Context) -> usize;
    fn encode_to<B: BufMut>(&self, dst: &mut B, ctx: &Self::Context) -> Result<(), Self::Error>;

    /// Encode into a freshly allocated, exactly sized buffer.
    fn to_bytes(&self, ctx: &Self::Context) -> Result<Bytes, Self::Error> {
        let mut buf = BytesMut::with_capacity(self.encoded_len(ctx));
        self.encode_to(&mut buf, ctx)?;
        Ok(buf.freeze())
    }
}

/// Zero-copy decoding of S7 frame pieces.
pub trait WireDecode: Sized {
    type Error: std::fmt::Debug + Send + Sync + 'static;
    type Context;

    /// Parse from `input`, returning the unconsumed tail and the value.
    /// `parent` owns `input` so implementations can `Bytes::slice_ref` into it.
    fn parse<'a>(
        input: &'a [u8],
        parent: &Bytes,
        ctx: &Self::Context,
    ) -> Result<(&'a [u8], Self), Self::Error>;
}
