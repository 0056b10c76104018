// Session registry and janitor
//
// The registry maps session ids to live sessions. Handlers look sessions up
// concurrently with the producer tasks feeding them and with the janitor
// sweeping expired ones. Destruction always happens outside the map lock.

use crate::config::{HlsSettings, SegmentFormat, SessionOptions};
use crate::error::Result;
use crate::probe::DurationProbe;
use crate::session::{EncoderSession, HlsSession, SegmentedSession};
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// Source of "now" for session ages.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let delta = TimeDelta::from_std(by).unwrap_or(TimeDelta::MAX);
        let mut now = self.now.lock();
        *now = now.checked_add_signed(delta).unwrap_or(*now);
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<dyn HlsSession>>>,
    settings: HlsSettings,
    probe: Arc<dyn DurationProbe>,
    clock: Arc<dyn Clock>,
}

impl SessionRegistry {
    pub fn new(settings: HlsSettings, probe: Arc<dyn DurationProbe>, clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            settings,
            probe,
            clock,
        }
    }

    /// Create a fully initialized session and register it. Returns its id.
    pub async fn create(&self, options: SessionOptions) -> Result<String> {
        let segment_duration = options
            .segment_duration
            .filter(|d| d.is_finite() && *d > 0.0)
            .unwrap_or(self.settings.segment_duration);

        let id = loop {
            let id = Uuid::new_v4().to_string();
            if !self.sessions.read().contains_key(&id) {
                break id;
            }
        };

        let dir = self.settings.storage_dir.join(&id);
        let created_at = self.clock.now();
        let session: Arc<dyn HlsSession> = match options.format {
            SegmentFormat::Mp3 => Arc::new(
                SegmentedSession::create(
                    id.clone(),
                    dir,
                    created_at,
                    segment_duration,
                    &self.settings,
                    Arc::clone(&self.probe),
                )
                .await?,
            ),
            SegmentFormat::Aac => Arc::new(
                EncoderSession::create(id.clone(), dir, created_at, segment_duration, &self.settings)
                    .await?,
            ),
        };

        self.sessions.write().insert(id.clone(), session);

        info!(
            session_id = %id,
            format = ?options.format,
            segment_duration,
            "Created HLS session"
        );
        Ok(id)
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<dyn HlsSession>> {
        self.sessions.read().get(id).cloned()
    }

    /// Remove a session and release its storage.
    pub async fn remove(&self, id: &str) -> bool {
        let removed = self.sessions.write().remove(id);
        match removed {
            Some(session) => {
                session.destroy().await;
                true
            }
            None => false,
        }
    }

    /// Destroy every session older than `timeout` at `now`. Returns how many.
    pub async fn sweep(&self, now: DateTime<Utc>, timeout: Duration) -> usize {
        let max_age = TimeDelta::from_std(timeout).unwrap_or(TimeDelta::MAX);

        let expired: Vec<Arc<dyn HlsSession>> = {
            let mut sessions = self.sessions.write();
            let ids: Vec<String> = sessions
                .iter()
                .filter(|(_, session)| now.signed_duration_since(session.created_at()) > max_age)
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| sessions.remove(id)).collect()
        };

        for session in &expired {
            debug!(session_id = %session.id(), "Expiring HLS session");
            session.destroy().await;
        }

        if !expired.is_empty() {
            info!(count = expired.len(), "Cleaned up expired HLS sessions");
        }
        expired.len()
    }

    /// Destroy every session, e.g. at shutdown.
    pub async fn clear(&self) -> usize {
        let all: Vec<Arc<dyn HlsSession>> = self.sessions.write().drain().map(|(_, s)| s).collect();
        for session in &all {
            session.destroy().await;
        }
        all.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    #[must_use]
    pub fn settings(&self) -> &HlsSettings {
        &self.settings
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

/// Periodic sweep configuration.
#[derive(Debug, Clone, Copy)]
pub struct JanitorConfig {
    /// Time between sweeps
    pub interval: Duration,
    /// Sessions older than this are destroyed
    pub session_timeout: Duration,
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            session_timeout: Duration::from_secs(300),
        }
    }
}

/// Spawn the background sweep loop. It stops when `cancel` fires.
pub fn spawn_janitor(
    registry: Arc<SessionRegistry>,
    config: JanitorConfig,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            interval = ?config.interval,
            session_timeout = ?config.session_timeout,
            "HLS janitor started"
        );

        let mut ticker = tokio::time::interval(config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("HLS janitor stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let now = registry.now();
                    registry.sweep(now, config.session_timeout).await;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock() {
        let start = Utc::now();
        let clock = ManualClock::new(start);
        clock.advance(Duration::from_secs(90));
        assert_eq!(clock.now() - start, TimeDelta::seconds(90));

        clock.set(start);
        assert_eq!(clock.now(), start);
    }

    #[test]
    fn test_janitor_config_default() {
        let config = JanitorConfig::default();
        assert_eq!(config.interval, Duration::from_secs(60));
        assert_eq!(config.session_timeout, Duration::from_secs(300));
    }
}
