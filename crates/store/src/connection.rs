// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Connection manager for the shared backing store.
//!
//! One manager owns the single logical connection the process holds.
//! Dialing is lazy: the first caller that needs the backend pays for
//! the connect, everyone after that clones the established handle.
//! Failed dials are retried on the same exponential-backoff-with-jitter
//! policy jobs use, with a hard attempt cap; while a backoff window is
//! open callers fail fast instead of piling onto the dialer, and once
//! the cap is spent the manager reports a terminal error until
//! [`ConnectionManager::reset`].

use crate::error::StoreError;
use async_trait::async_trait;
use conveyor_core::{Clock, ConnectionConfig};
use parking_lot::RwLock;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::Mutex;

/// How a backend dial is performed. Split from the manager so
/// reconnect and backoff logic can be tested against scripted dialers.
#[async_trait]
pub trait Connect: Send + Sync + 'static {
    type Backend: Clone + Send + Sync + 'static;

    async fn connect(&self) -> Result<Self::Backend, StoreError>;

    /// Liveness probe against an established backend.
    async fn ping(&self, backend: &Self::Backend) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    /// The attempt cap is spent; no further dials until reset.
    Error,
}

/// Connection lifecycle as the supervisor sees it: a status cell and a
/// shutdown hook, nothing backend-specific. [`ConnectionManager`]
/// implements it; [`NoConnection`] stands in for backends that hold no
/// external connection at all.
#[async_trait]
pub trait ConnectionHandle: Send + Sync {
    fn status(&self) -> ConnectionStatus;

    /// Release the underlying connection, if any.
    async fn close(&self);
}

/// Handle for in-process backends. Always reports connected.
pub struct NoConnection;

#[async_trait]
impl ConnectionHandle for NoConnection {
    fn status(&self) -> ConnectionStatus {
        ConnectionStatus::Connected
    }

    async fn close(&self) {}
}

conveyor_core::simple_display! {
    ConnectionStatus {
        Disconnected => "disconnected",
        Connecting => "connecting",
        Connected => "connected",
        Error => "error",
    }
}

struct DialState<B> {
    backend: Option<B>,
    attempts: u32,
    next_attempt_at_ms: u64,
}

impl<B> Default for DialState<B> {
    fn default() -> Self {
        Self {
            backend: None,
            attempts: 0,
            next_attempt_at_ms: 0,
        }
    }
}

pub struct ConnectionManager<D: Connect, C: Clock> {
    dialer: D,
    clock: C,
    config: ConnectionConfig,
    /// Snapshot for the sync status surface. The dial mutex is the
    /// authority; this cell only trails it.
    status: RwLock<ConnectionStatus>,
    state: Mutex<DialState<D::Backend>>,
}

impl<D: Connect, C: Clock> ConnectionManager<D, C> {
    pub fn new(dialer: D, config: ConnectionConfig, clock: C) -> Self {
        Self {
            dialer,
            clock,
            config,
            status: RwLock::new(ConnectionStatus::Disconnected),
            state: Mutex::new(DialState::default()),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.read()
    }

    /// Hand out the established backend, dialing first if necessary.
    ///
    /// Fails fast with [`StoreError::Unavailable`] while a reconnect
    /// backoff window is open or after the attempt cap is spent, so
    /// intake paths degrade instead of blocking.
    pub async fn acquire(&self) -> Result<D::Backend, StoreError> {
        let mut state = self.state.lock().await;
        if let Some(backend) = &state.backend {
            return Ok(backend.clone());
        }
        if self.status() == ConnectionStatus::Error {
            return Err(StoreError::unavailable(format!(
                "gave up after {} connection attempts",
                state.attempts
            )));
        }
        let now_ms = self.clock.epoch_ms();
        if now_ms < state.next_attempt_at_ms {
            return Err(StoreError::unavailable(format!(
                "reconnect backoff open for another {}ms",
                state.next_attempt_at_ms - now_ms
            )));
        }

        *self.status.write() = ConnectionStatus::Connecting;
        let dial = tokio::time::timeout(
            Duration::from_millis(self.config.connect_timeout_ms),
            self.dialer.connect(),
        )
        .await;
        match dial {
            Ok(Ok(backend)) => {
                state.backend = Some(backend.clone());
                state.attempts = 0;
                state.next_attempt_at_ms = 0;
                *self.status.write() = ConnectionStatus::Connected;
                tracing::info!(url = %self.config.url, "store connected");
                Ok(backend)
            }
            outcome => {
                let reason = match outcome {
                    Ok(Err(err)) => err.to_string(),
                    _ => format!(
                        "connect timed out after {}ms",
                        self.config.connect_timeout_ms
                    ),
                };
                state.attempts += 1;
                if self.config.retry.exhausted(state.attempts) {
                    *self.status.write() = ConnectionStatus::Error;
                    tracing::error!(
                        attempts = state.attempts,
                        reason = %reason,
                        "store connection abandoned"
                    );
                } else {
                    state.next_attempt_at_ms = self
                        .config
                        .retry
                        .next_attempt_at_ms(state.attempts, now_ms)
                        .unwrap_or(now_ms);
                    *self.status.write() = ConnectionStatus::Disconnected;
                    tracing::warn!(
                        attempt = state.attempts,
                        next_attempt_at_ms = state.next_attempt_at_ms,
                        reason = %reason,
                        "store connection failed"
                    );
                }
                Err(StoreError::unavailable(reason))
            }
        }
    }

    /// Probe the established connection. A failed or slow ping drops
    /// the backend so the next [`acquire`](Self::acquire) re-dials.
    pub async fn is_available(&self) -> bool {
        let mut state = self.state.lock().await;
        let Some(backend) = state.backend.clone() else {
            return false;
        };
        let ping = tokio::time::timeout(
            Duration::from_millis(self.config.ping_timeout_ms),
            self.dialer.ping(&backend),
        )
        .await;
        match ping {
            Ok(Ok(())) => true,
            _ => {
                state.backend = None;
                *self.status.write() = ConnectionStatus::Disconnected;
                tracing::warn!("store ping failed, dropping connection");
                false
            }
        }
    }

    /// Release the connection. The next acquire starts a fresh dial
    /// ladder.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        *state = DialState::default();
        *self.status.write() = ConnectionStatus::Disconnected;
        tracing::info!("store connection closed");
    }

    /// Clear a terminal error state without dialing.
    pub async fn reset(&self) {
        self.close().await;
    }
}

#[async_trait]
impl<D: Connect, C: Clock + 'static> ConnectionHandle for ConnectionManager<D, C> {
    fn status(&self) -> ConnectionStatus {
        ConnectionManager::status(self)
    }

    async fn close(&self) {
        ConnectionManager::close(self).await;
    }
}

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;
