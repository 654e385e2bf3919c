//! Prism - research run client
//!
//! Prism submits research queries to a remote orchestration service,
//! consumes its event stream and rebuilds a step-by-step timeline of the
//! run as it happens. Finished runs are archived locally and can be replayed
//! without the network. A background poller keeps track of whether the
//! research backend and the LLM API are reachable.
//!
//! # Architecture
//!
//! - **Event codec**: frames a chunked `data: <json>\n\n` body into typed events
//! - **Stream session**: one streaming POST per run, cancellable, closes on the terminal event
//! - **Timeline reducer**: pure `(state, event) -> state` fold into completed steps
//! - **Run controller**: lifecycle of a run, replay, archival
//! - **Health poller**: periodic online/degraded/offline classification with edge-triggered notifications
//!
//! # Main Modules
//!
//! - [`protocol`] - Event types and the frame codec
//! - [`stream`] - Streaming HTTP session
//! - [`timeline`] - Timeline reducer
//! - [`run`] - Run controller and progress updates
//! - [`archive`] - Durable run archive
//! - [`health`] - Service health monitoring
//! - [`db`] - Namespaced key/value persistence
//!
//! # Example
//!
//! ```rust,no_run
//! use prism::{ApiClient, AppConfig, Archive, Database, RunController, SettingsStore, StreamSession};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = AppConfig::load(None)?;
//! let db = Database::new(&config.database_path()).await?;
//! let store: Arc<dyn prism::KeyValueStore> = Arc::new(db);
//!
//! let api = ApiClient::new(&config);
//! let session = StreamSession::new(api.client().clone(), api.research_stream_url());
//! let controller = RunController::new(
//!     Arc::new(session),
//!     Archive::load(store.clone()).await?,
//!     SettingsStore::load(store).await?,
//! );
//!
//! let (tx, _rx) = tokio::sync::mpsc::channel(64);
//! let outcome = controller
//!     .start(uuid::Uuid::new_v4(), "history of the transistor", CancellationToken::new(), tx)
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod archive;
pub mod config;
pub mod db;
pub mod health;
pub mod logging;
pub mod protocol;
pub mod run;
pub mod settings;
pub mod stream;
pub mod timeline;

pub use api::{ApiClient, ApiKeys, HttpProbe, ResearchRequest};
pub use archive::{Archive, RunRecord};
pub use config::AppConfig;
pub use db::{Database, KeyValueStore, MemoryStore};
pub use health::{HealthNotification, HealthPoller, StatusCache};
pub use protocol::{Event, EventCodec};
pub use run::{RunController, RunOutcome, RunPhase, RunUpdate};
pub use settings::SettingsStore;
pub use stream::{EventSource, StreamSession};
pub use timeline::{reduce, TimelineState};
