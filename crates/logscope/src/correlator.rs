//! Temporal correlation of anomaly events into incidents.
//!
//! The [`Correlator`] groups a time-ordered event stream into
//! [`IncidentCluster`]s. An event joins the open cluster when it falls within
//! the correlation window of that cluster's latest event, and starts a new
//! cluster otherwise. Clusters close on timeout, on reaching the event cap, or
//! when the stream is flushed.
//!
//! Expired clusters are closed before each event is placed, so at most one
//! cluster is open at a time and the open cluster is always the most recent.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::config::CorrelatorConfig;
use crate::error::ConfigError;
use crate::types::{AnomalyEvent, ClosureReason, IncidentCluster};

#[derive(Debug)]
struct OpenCluster {
    events: Vec<AnomalyEvent>,
    services: BTreeSet<String>,
    latest: DateTime<Utc>,
}

impl OpenCluster {
    fn new(event: AnomalyEvent) -> Self {
        let mut cluster = Self {
            events: Vec::new(),
            services: BTreeSet::new(),
            latest: event.timestamp,
        };
        cluster.push(event);
        cluster
    }

    fn push(&mut self, event: AnomalyEvent) {
        if event.timestamp > self.latest {
            self.latest = event.timestamp;
        }
        self.services.extend(event.services.iter().cloned());
        self.events.push(event);
    }

    fn close(self, reason: ClosureReason) -> Option<IncidentCluster> {
        debug!(
            events = self.events.len(),
            services = self.services.len(),
            latest = %self.latest,
            ?reason,
            "Closed incident cluster"
        );
        IncidentCluster::from_events(self.events, reason)
    }
}

/// Groups anomaly events into incident clusters.
#[derive(Debug)]
pub struct Correlator {
    config: CorrelatorConfig,
    window: Duration,
    open: Option<OpenCluster>,
}

impl Correlator {
    /// Creates a correlator.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for a zero correlation window or event cap.
    pub fn new(config: CorrelatorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let window = config.correlation_window();
        Ok(Self {
            config,
            window,
            open: None,
        })
    }

    /// The correlation window.
    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }

    /// Number of clusters still accepting events (zero or one).
    #[must_use]
    pub fn open_clusters(&self) -> usize {
        usize::from(self.open.is_some())
    }

    /// Adds one event.
    ///
    /// Returns clusters closed as a consequence: the open cluster if it timed
    /// out by the event's timestamp, and the joined cluster if it reached the
    /// cap.
    pub fn push(&mut self, event: AnomalyEvent) -> Vec<IncidentCluster> {
        let mut closed = self.close_expired(event.timestamp);

        if let Some(cluster) = self.open.as_mut() {
            cluster.push(event);
        } else {
            debug!(event_id = %event.id, "Opened incident cluster");
            self.open = Some(OpenCluster::new(event));
        }

        let cap = self.config.max_cluster_events;
        if let Some(full) = self.open.take_if(|c| c.events.len() >= cap) {
            debug!(events = full.events.len(), "Cluster reached event cap");
            closed.extend(full.close(ClosureReason::MaxEvents));
        }
        closed
    }

    /// Closes the open cluster if its latest event is more than the
    /// correlation window before `now`.
    pub fn advance_to(&mut self, now: DateTime<Utc>) -> Vec<IncidentCluster> {
        self.close_expired(now)
    }

    /// Closes the open cluster at end of stream.
    pub fn flush(&mut self) -> Vec<IncidentCluster> {
        self.open
            .take()
            .and_then(|c| c.close(ClosureReason::Flushed))
            .into_iter()
            .collect()
    }

    fn close_expired(&mut self, now: DateTime<Utc>) -> Vec<IncidentCluster> {
        let window = self.window;
        self.open
            .take_if(|c| now - c.latest > window)
            .and_then(|c| c.close(ClosureReason::Timeout))
            .into_iter()
            .collect()
    }
}
