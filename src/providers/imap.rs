//! IMAP fetch client.
//!
//! Connects to an account's IMAP server over TLS and fetches message
//! source for a UID range or date window. Each call is a self-contained
//! connect-fetch-logout cycle returning a bounded batch in ascending UID
//! order, so the synchronizer can resume from its persisted cursor after
//! any failure.
//!
//! # Protocol Details
//!
//! - IMAP4rev1 (RFC 3501) via `async-imap`
//! - TLS via `tokio-rustls` with the `webpki-roots` trust store, bridged
//!   into the futures IO traits with the `tokio-util` compat layer

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::ClientConfig;
use tokio_rustls::TlsConnector;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};

use super::{TransportError, TransportResult};
use crate::domain::EmailAccount;

/// Type alias for the IMAP session over TLS.
type ImapSession = async_imap::Session<Compat<TlsStream<TcpStream>>>;

/// One fetched message, still in raw RFC 5322 form.
#[derive(Debug, Clone)]
pub struct RawMessage {
    /// UID within the mailbox.
    pub uid: u32,
    /// Raw message source.
    pub body: Vec<u8>,
    /// Server-reported internal date, when available.
    pub internal_date: Option<DateTime<Utc>>,
}

/// A bounded batch of fetched messages, ascending by UID.
#[derive(Debug, Clone, Default)]
pub struct FetchBatch {
    /// UIDVALIDITY of the mailbox at fetch time. A change since the last
    /// sync invalidates persisted UIDs.
    pub uid_validity: Option<u32>,
    /// Messages in ascending UID order.
    pub messages: Vec<RawMessage>,
}

/// What to fetch.
#[derive(Debug, Clone, Copy)]
pub enum FetchQuery {
    /// Messages with UID strictly greater than the given cursor.
    SinceUid(u32),
    /// Messages received on or after the given date (first-ever sync).
    SinceDate(DateTime<Utc>),
}

/// IMAP client abstraction.
#[async_trait]
pub trait ImapClient: Send + Sync {
    /// Fetches messages from the named mailbox matching the query.
    async fn fetch_since(
        &self,
        account: &EmailAccount,
        mailbox: &str,
        query: FetchQuery,
    ) -> TransportResult<FetchBatch>;
}

/// IMAP client backed by `async-imap` over rustls.
pub struct AsyncImapClient {
    timeout: Duration,
}

impl AsyncImapClient {
    /// Creates a client with the given per-operation timeout.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Establishes a TLS connection to the account's IMAP server.
    async fn connect_tls(
        &self,
        host: &str,
        port: u16,
    ) -> TransportResult<Compat<TlsStream<TcpStream>>> {
        let tcp_stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| TransportError::Connection(format!("TCP connect failed: {}", e)))?;

        let config = ClientConfig::builder()
            .with_root_certificates(tokio_rustls::rustls::RootCertStore::from_iter(
                webpki_roots::TLS_SERVER_ROOTS.iter().cloned(),
            ))
            .with_no_client_auth();

        let connector = TlsConnector::from(Arc::new(config));
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| TransportError::Connection(format!("invalid server name: {}", e)))?;

        let tls_stream = connector
            .connect(server_name, tcp_stream)
            .await
            .map_err(|e| TransportError::Connection(format!("TLS handshake failed: {}", e)))?;

        // Wrap with the compat layer for futures async read/write traits.
        Ok(tls_stream.compat())
    }

    async fn open_session(&self, account: &EmailAccount) -> TransportResult<ImapSession> {
        if !account.smtp.is_complete() {
            return Err(TransportError::Configuration(format!(
                "incomplete credentials for {}",
                account.email
            )));
        }

        let imap = account.imap_settings();
        let tls_stream = self.connect_tls(&imap.host, imap.port).await?;
        let client = async_imap::Client::new(tls_stream);

        // IMAP credentials fall back to the SMTP login.
        let session = client
            .login(&account.smtp.username, &account.smtp.password)
            .await
            .map_err(|e| {
                TransportError::Authentication(format!("IMAP login failed: {:?}", e.0))
            })?;

        Ok(session)
    }

    async fn fetch_uids(
        session: &mut ImapSession,
        sequence: &str,
        min_exclusive: Option<u32>,
    ) -> TransportResult<Vec<RawMessage>> {
        let mut messages = Vec::new();
        {
            let mut fetches = session
                .uid_fetch(sequence, "(UID BODY.PEEK[] INTERNALDATE)")
                .await
                .map_err(|e| TransportError::Protocol(format!("FETCH failed: {}", e)))?;

            while let Some(fetch_result) = fetches.next().await {
                let fetch = fetch_result
                    .map_err(|e| TransportError::Protocol(format!("FETCH stream error: {}", e)))?;

                let Some(uid) = fetch.uid else { continue };
                // A "N:*" range always returns the mailbox's last message,
                // even when its UID is below N; drop anything at or below
                // the cursor.
                if matches!(min_exclusive, Some(min) if uid <= min) {
                    continue;
                }
                let Some(body) = fetch.body() else { continue };

                let internal_date = fetch.internal_date().map(|d| d.with_timezone(&Utc));
                messages.push(RawMessage {
                    uid,
                    body: body.to_vec(),
                    internal_date,
                });
            }
        }

        messages.sort_by_key(|m| m.uid);
        Ok(messages)
    }
}

#[async_trait]
impl ImapClient for AsyncImapClient {
    async fn fetch_since(
        &self,
        account: &EmailAccount,
        mailbox: &str,
        query: FetchQuery,
    ) -> TransportResult<FetchBatch> {
        let result = tokio::time::timeout(self.timeout, async {
            let mut session = self.open_session(account).await?;

            let mailbox_status = session
                .select(mailbox)
                .await
                .map_err(|e| TransportError::Protocol(format!("SELECT failed: {}", e)))?;
            let uid_validity = mailbox_status.uid_validity;

            let messages = match query {
                FetchQuery::SinceUid(last_uid) => {
                    let sequence = format!("{}:*", last_uid.saturating_add(1));
                    Self::fetch_uids(&mut session, &sequence, Some(last_uid)).await?
                }
                FetchQuery::SinceDate(date) => {
                    let criteria = format!("SINCE {}", date.format("%d-%b-%Y"));
                    let uids = session
                        .uid_search(&criteria)
                        .await
                        .map_err(|e| TransportError::Protocol(format!("SEARCH failed: {}", e)))?;

                    let mut uid_list: Vec<u32> = uids.into_iter().collect();
                    uid_list.sort_unstable();

                    if uid_list.is_empty() {
                        Vec::new()
                    } else {
                        let sequence = uid_list
                            .iter()
                            .map(|u| u.to_string())
                            .collect::<Vec<_>>()
                            .join(",");
                        Self::fetch_uids(&mut session, &sequence, None).await?
                    }
                }
            };

            let _ = session.logout().await;

            Ok(FetchBatch {
                uid_validity,
                messages,
            })
        })
        .await;

        match result {
            Ok(batch) => batch,
            Err(_) => Err(TransportError::Timeout(format!(
                "IMAP fetch for {}",
                account.email
            ))),
        }
    }
}
