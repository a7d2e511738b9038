use std::sync::Arc;

use async_trait::async_trait;
use bytes::BytesMut;
use mux::{BufferPool, Handler, Reader, Transport, Verdict};

use crate::attribute::{
    ErrKind, Error, ErrorCode, MappedAddress, Nonce, Realm, ResponseOrigin, Software,
    UnknownAttributes, XorMappedAddress,
};
use crate::{util, Agent, Kind, MessageReader, MessageWriter, Method, StunError, COOKIE};

/// Serves STUN messages that no outstanding transaction claimed:
/// requests and indications on servers, unsolicited traffic on
/// clients. The transport is write-capable so implementations can
/// answer in place.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn serve(&self, message: &MessageReader<'_, '_>, transport: &dyn Transport);
}

/// Identity a server presents in challenges and default responses.
#[derive(Clone)]
pub struct ServerContext {
    pub realm: String,
    pub software: Option<String>,
}

/// The STUN protocol handler for a multiplexer chain.
///
/// Frames STUN messages out of the byte stream (the first two bits of
/// a STUN message are always `00`, which tells it apart from RTP and
/// from TURN channel-data), decodes them, routes responses to the
/// transaction engine, and serves the rest.
pub struct StunHandler {
    agent: Arc<Agent>,
    server: Option<ServerContext>,
    handler: Option<Arc<dyn MessageHandler>>,
}

impl StunHandler {
    /// client-side handler: responses go to the agent, everything else
    /// to the optional user handler.
    pub fn new(agent: Arc<Agent>, handler: Option<Arc<dyn MessageHandler>>) -> Self {
        Self {
            agent,
            server: None,
            handler,
        }
    }

    /// server-side handler: requests are authenticated against the
    /// agent's key provider, 401/420 error responses are emitted here,
    /// and a Binding request gets the default reflexive answer when no
    /// user handler claims it.
    pub fn server(
        agent: Arc<Agent>,
        context: ServerContext,
        handler: Option<Arc<dyn MessageHandler>>,
    ) -> Self {
        Self {
            agent,
            server: Some(context),
            handler,
        }
    }

    fn verify(&self, message: &MessageReader<'_, '_>) -> Result<(), StunError> {
        let Some(get_key) = &self.agent.config().get_auth_key else {
            return Ok(());
        };

        let Some(key) = get_key(message) else {
            return Err(StunError::Unauthorized);
        };

        message.integrity(&key).map_err(|e| match e {
            StunError::NotFoundIntegrity => StunError::Unauthorized,
            e => e,
        })
    }

    async fn serve_request(
        &self,
        context: &ServerContext,
        message: &MessageReader<'_, '_>,
        transport: &dyn Transport,
    ) {
        if message.method.is_request() {
            if let Err(e) = self.verify(message) {
                log::debug!(
                    "request rejected: addr={}, err={}",
                    transport.remote_addr(),
                    e
                );

                self.reply_error(context, message, transport, ErrKind::Unauthorized)
                    .await;
                return;
            }

            if !message.unknown_attributes().is_empty() {
                self.reply_error(context, message, transport, ErrKind::UnknownAttribute)
                    .await;
                return;
            }
        }

        if let Some(handler) = &self.handler {
            handler.serve(message, transport).await;
            return;
        }

        if message.method == Method::Binding(Kind::Request) {
            self.reply_binding(context, message, transport).await;
        }
    }

    async fn reply_binding(
        &self,
        context: &ServerContext,
        message: &MessageReader<'_, '_>,
        transport: &dyn Transport,
    ) {
        let key = self
            .agent
            .config()
            .get_auth_key
            .as_ref()
            .and_then(|get_key| get_key(message));

        let pool = BufferPool::global();
        let mut buf = pool.get();
        let flushed = {
            let mut writer =
                MessageWriter::extend(Method::Binding(Kind::Response), message, &mut buf);
            writer.append::<XorMappedAddress>(transport.remote_addr());
            writer.append::<MappedAddress>(transport.remote_addr());
            writer.append::<ResponseOrigin>(transport.local_addr());
            if let Some(software) = &context.software {
                writer.append::<Software>(software);
            }

            writer.flush(key.as_deref(), self.agent.config().fingerprint)
        };

        if flushed.is_ok() {
            if let Err(e) = transport.send(&buf).await {
                log::debug!("binding reply failed: addr={}, err={}", transport.remote_addr(), e);
            }
        }

        pool.put(buf);
    }

    async fn reply_error(
        &self,
        context: &ServerContext,
        message: &MessageReader<'_, '_>,
        transport: &dyn Transport,
        kind: ErrKind,
    ) {
        let pool = BufferPool::global();
        let mut buf = pool.get();
        let flushed = {
            let mut writer =
                MessageWriter::extend(message.method.error_response(), message, &mut buf);
            writer.append::<ErrorCode>(Error::from(kind));

            match kind {
                // a challenge tells the client which realm to derive
                // the long-term key for, and the nonce to echo.
                ErrKind::Unauthorized => {
                    writer.append::<Realm>(&context.realm);
                    let nonce = util::nonce(16);
                    writer.append::<Nonce>(&nonce);
                }
                ErrKind::UnknownAttribute => {
                    writer.append::<UnknownAttributes>(message.unknown_attributes().to_vec());
                }
                _ => {}
            }

            if let Some(software) = &context.software {
                writer.append::<Software>(software);
            }

            writer.flush(None, false)
        };

        if flushed.is_ok() {
            if let Err(e) = transport.send(&buf).await {
                log::debug!("error reply failed: addr={}, err={}", transport.remote_addr(), e);
            }
        }

        pool.put(buf);
    }
}

#[async_trait]
impl Handler for StunHandler {
    async fn handle(
        &self,
        transport: &dyn Transport,
        reader: &mut Reader<'_>,
    ) -> Result<Verdict, mux::Error> {
        // settle the bit discipline on the first byte before asking
        // for a whole header, so foreign formats buffered short on a
        // stream fall through to their own handler.
        match reader.peek(1) {
            Some(first) if first[0] >> 6 == 0 => {}
            Some(_) => return Ok(Verdict::Unmatched),
            None if transport.reliable() => return Ok(Verdict::NeedMoreData),
            None => return Ok(Verdict::Unmatched),
        }

        let head = match reader.peek(20) {
            Some(head) => head,
            None if transport.reliable() => return Ok(Verdict::NeedMoreData),
            None => return Ok(Verdict::Unmatched),
        };

        if head[4..8] != COOKIE {
            return Ok(Verdict::Unmatched);
        }

        let size = util::as_u16(&head[2..4]) as usize + 20;
        if reader.peek(size).is_none() {
            if transport.reliable() {
                return Ok(Verdict::NeedMoreData);
            }

            // a STUN-prefixed datagram shorter than its declared length
            // cannot belong to anyone else; drop it.
            return Err(mux::Error::Format);
        }

        let Some(bytes) = reader.next(size) else {
            return Err(mux::Error::Format);
        };

        let mut attributes = Vec::with_capacity(10);
        let message = match MessageReader::decode(bytes, &mut attributes) {
            Ok(message) => message,
            Err(e) => {
                log::debug!(
                    "stun decode failed: addr={}, err={}",
                    transport.remote_addr(),
                    e
                );

                // a message that fails validation still carries its
                // token; wake the matching waiter with the error
                // instead of letting the transaction time out.
                if self.agent.deliver(&bytes[8..20], Err(e)) {
                    return Ok(Verdict::Handled);
                }

                return Err(mux::Error::Format);
            }
        };

        // responses are matched strictly by transaction identifier.
        if matches!(message.method.kind(), Kind::Response | Kind::Error)
            && self.agent.outstanding(message.token)
        {
            let result = self.verify(&message).map(|_| BytesMut::from(bytes));
            self.agent.deliver(message.token, result);
            return Ok(Verdict::Handled);
        }

        if let Some(context) = &self.server {
            let context = context.clone();
            self.serve_request(&context, &message, transport).await;
            return Ok(Verdict::Handled);
        }

        match &self.handler {
            Some(handler) => handler.serve(&message, transport).await,
            None => log::trace!(
                "unclaimed stun message dropped: addr={}",
                transport.remote_addr()
            ),
        }

        Ok(Verdict::Handled)
    }
}
