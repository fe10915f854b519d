//! # sensorwatch
//!
//! Real-time subscriptions and status classification for water-quality
//! sensor feeds held in a remote real-time database.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Application                          │
//! │  ┌───────────┐    ┌──────────┐    ┌───────────────────────┐  │
//! │  │ registry  │───▶│ callback │───▶│ data (Reading, status)│  │
//! │  │(channels) │    │          │    │                       │  │
//! │  └─────┬─────┘    └──────────┘    └───────────────────────┘  │
//! │        │                                                     │
//! │        ▼                                                     │
//! │  ┌───────────┐                                               │
//! │  │  source   │◀── RestTransport | ChannelTransport           │
//! │  │(transport)│                                               │
//! │  └───────────┘                                               │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! - **[`registry`]**: [`Registry`] of live subscriptions, at most one per channel
//! - **[`source`]**: the [`Transport`] trait and its implementations
//! - **[`data`]**: [`Reading`]s, the status classifier and timestamp normalization
//! - **[`config`]**: [`Settings`] loaded from file and environment
//!
//! ## Usage
//!
//! ### Classifying values
//!
//! ```
//! use sensorwatch::{classify, StatusLabel};
//!
//! assert_eq!(classify("TDS", 300.0), StatusLabel::Good);
//! assert_eq!(classify("pH", 7.0), StatusLabel::Excellent);
//! assert_eq!(classify("Salinity", 5.0), StatusLabel::Unknown);
//! ```
//!
//! ### Subscribing with an in-memory transport
//!
//! ```
//! use std::sync::Arc;
//! use sensorwatch::{ChannelTransport, RangeTable, Registry, SubscriptionEvent};
//!
//! # tokio_test::block_on(async {
//! let transport = Arc::new(ChannelTransport::new("memory"));
//! let registry = Registry::new(transport.clone());
//! let ranges = RangeTable::default();
//!
//! let (_handle, mut events) = registry.subscribe_stream("sensorData");
//! transport.publish("sensorData", serde_json::json!({ "TDS": 450, "pH": 7.1 }));
//!
//! if let Some(SubscriptionEvent::Data(reading)) = events.recv().await {
//!     let assessment = reading.assess(&ranges);
//!     println!("overall: {}", assessment.overall);
//! }
//! # });
//! ```
//!
//! ### Reading once from the database
//!
//! ```no_run
//! use std::sync::Arc;
//! use sensorwatch::{Registry, RestTransport};
//!
//! # tokio_test::block_on(async {
//! let transport = RestTransport::builder()
//!     .base_url("https://example-rtdb.firebasedatabase.app")
//!     .build()
//!     .unwrap();
//! let registry = Registry::new(Arc::new(transport));
//! let reading = registry.read_once("sensorData").await.unwrap();
//! # });
//! ```

pub mod config;
pub mod data;
pub mod error;
pub mod registry;
pub mod source;

// Re-export main types for convenience
pub use crate::config::Settings;
pub use data::{
    classify, normalize, Assessment, Band, FieldStatus, ParameterRange, RangeMode, RangeTable,
    Reading, StatusLabel, Timestamp,
};
pub use error::{Error, Result, TransportError};
pub use registry::{Registry, SubscriptionEvent, SubscriptionHandle};
pub use source::{
    ChannelTransport, RestTransport, Transport, TransportEvent, Watch, WatchId, WatchMode,
};
