use std::sync::Arc;
use std::time::{Duration, Instant};

use ahash::AHashMap;
use bytes::BytesMut;
use mux::{BufferPool, Transport};
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::attribute::{Realm, Software};
use crate::{util, MessageReader, MessageWriter, Method, StunError};

/// Derives the MESSAGE-INTEGRITY key for a message, or refuses it.
///
/// The closure sees the decoded message so long-term credentials can
/// pick the REALM out of it. Returning `None` means no key applies and
/// authentication fails.
pub type AuthKeyFn = Arc<dyn Fn(&MessageReader<'_, '_>) -> Option<Vec<u8>> + Send + Sync>;

/// long-term credential key provider:
/// key = MD5(username ":" realm ":" password), realm taken from the
/// message being keyed.
pub fn long_term_auth_key(username: &str, password: &str) -> AuthKeyFn {
    let username = username.to_owned();
    let password = password.to_owned();
    Arc::new(move |message| {
        let realm = message.get::<Realm>()?;
        Some(util::long_term_credential_digest(&username, realm, &password).to_vec())
    })
}

/// short-term credential key provider: the password bytes as given
/// (SASLprep is the caller's concern).
pub fn short_term_auth_key(password: &str) -> AuthKeyFn {
    let key = password.as_bytes().to_vec();
    Arc::new(move |_| Some(key.clone()))
}

/// Transaction and codec policy for one connection.
pub struct Config {
    /// key provider for MESSAGE-INTEGRITY generation and validation.
    /// When present, incoming messages without a verifying integrity
    /// attribute are rejected as unauthorized.
    pub get_auth_key: Option<AuthKeyFn>,
    /// initial retransmission timeout on unreliable transports.
    pub retransmission_timeout: Duration,
    /// hard deadline for a whole transaction.
    pub transaction_timeout: Duration,
    /// emit a FINGERPRINT trailer on outgoing messages.
    pub fingerprint: bool,
    /// SOFTWARE attribute value appended to outgoing requests.
    pub software: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            get_auth_key: None,
            retransmission_timeout: Duration::from_millis(500),
            transaction_timeout: Duration::from_millis(39500),
            fingerprint: false,
            software: None,
        }
    }
}

type Waiter = oneshot::Sender<Result<BytesMut, StunError>>;

/// The transaction engine.
///
/// Every outstanding request owns a 96-bit random token and a
/// single-slot rendezvous; the receive path delivers a response to the
/// waiter whose token it carries. Tokens are unique across the
/// outstanding set of one agent at any moment, and out-of-order
/// completion is the normal case.
pub struct Agent {
    config: Arc<Config>,
    transactions: Mutex<AHashMap<[u8; 12], Waiter>>,
}

impl Agent {
    pub fn new(config: Arc<Config>) -> Arc<Self> {
        Arc::new(Self {
            config,
            transactions: Mutex::new(AHashMap::new()),
        })
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// Executes a single transaction: marshal, send, await the
    /// response.
    ///
    /// On an unreliable transport the identical marshaled bytes are
    /// retransmitted whenever the retransmission timeout fires before
    /// the deadline, and the timeout doubles after each send. Reliable
    /// transports never retransmit. Either way the wall-clock deadline
    /// bounds the transaction; past it the entry is removed and the
    /// caller gets [`StunError::Timeout`], and a transport closing
    /// underneath yields [`StunError::Cancelled`].
    pub async fn round_trip<F>(
        &self,
        transport: &dyn Transport,
        method: Method,
        auth: Option<&[u8]>,
        write: F,
    ) -> Result<BytesMut, StunError>
    where
        F: FnOnce(&mut MessageWriter),
    {
        let (token, mut waiter) = self.begin();

        let pool = BufferPool::global();
        let mut buf = pool.get();
        let flushed = {
            let mut writer = MessageWriter::new(method, &token, &mut buf);
            if let Some(software) = &self.config.software {
                writer.append::<Software>(software);
            }

            write(&mut writer);
            writer.flush(auth, self.config.fingerprint)
        };

        let result = match flushed {
            Ok(()) => self.exchange(transport, &buf, &mut waiter).await,
            Err(e) => Err(e),
        };

        self.transactions.lock().remove(&token);
        pool.put(buf);
        result
    }

    /// Reserves a fresh transaction token, regenerating on the
    /// (cosmically unlikely) collision with an outstanding one.
    fn begin(&self) -> ([u8; 12], oneshot::Receiver<Result<BytesMut, StunError>>) {
        let mut transactions = self.transactions.lock();

        let mut token: [u8; 12] = rand::random();
        while transactions.contains_key(&token) {
            token = rand::random();
        }

        let (tx, rx) = oneshot::channel();
        transactions.insert(token, tx);
        (token, rx)
    }

    async fn exchange(
        &self,
        transport: &dyn Transport,
        request: &[u8],
        waiter: &mut oneshot::Receiver<Result<BytesMut, StunError>>,
    ) -> Result<BytesMut, StunError> {
        let deadline = Instant::now() + self.config.transaction_timeout;
        let mut rto = self.config.retransmission_timeout;

        transport.send(request).await?;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(StunError::Timeout);
            }

            let remaining = deadline - now;
            let wait = if transport.reliable() {
                remaining
            } else {
                remaining.min(rto)
            };

            match tokio::time::timeout(wait, &mut *waiter).await {
                Ok(Ok(result)) => return result,
                Ok(Err(_)) => return Err(StunError::Cancelled),
                Err(_) => {
                    if transport.reliable() || wait == remaining {
                        return Err(StunError::Timeout);
                    }

                    log::trace!(
                        "transaction retransmit: addr={}, rto={:?}",
                        transport.remote_addr(),
                        rto
                    );

                    transport.send(request).await?;
                    rto *= 2;
                }
            }
        }
    }

    /// whether a token belongs to an outstanding transaction.
    pub(crate) fn outstanding(&self, token: &[u8]) -> bool {
        match <[u8; 12]>::try_from(token) {
            Ok(token) => self.transactions.lock().contains_key(&token),
            Err(_) => false,
        }
    }

    /// hand a response (or a verification failure) to the transaction
    /// waiting on its token. Returns false when no transaction claims
    /// it, in which case the message belongs to the user handler.
    pub(crate) fn deliver(&self, token: &[u8], result: Result<BytesMut, StunError>) -> bool {
        let Ok(token) = <[u8; 12]>::try_from(token) else {
            return false;
        };

        match self.transactions.lock().remove(&token) {
            Some(waiter) => {
                let _ = waiter.send(result);
                true
            }
            None => false,
        }
    }

    /// Cancels every outstanding transaction; their callers observe
    /// [`StunError::Cancelled`]. Invoked when the connection under the
    /// agent closes.
    pub fn close(&self) {
        self.transactions.lock().clear();
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        self.close();
    }
}
