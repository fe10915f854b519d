//! Sensor data models and processing.
//!
//! ## Submodules
//!
//! - [`status`]: Range tables and the status classifier ([`StatusLabel`], [`RangeTable`])
//! - [`reading`]: Snapshot payloads as [`Reading`]s and their [`Assessment`]
//! - [`timestamp`]: Normalization of payload timestamps
//!
//! ## Data Flow
//!
//! ```text
//! snapshot payload (raw JSON)
//!        │
//!        ▼
//! Reading::from_payload()
//!        │
//!        ├──▶ Reading::assess() (per-field StatusLabel from a RangeTable)
//!        │
//!        └──▶ Reading::timestamp() (normalized DateTime<Utc>)
//! ```

pub mod reading;
pub mod status;
pub mod timestamp;

pub use reading::{Assessment, FieldStatus, Reading};
pub use status::{classify, Band, ParameterRange, RangeMode, RangeTable, StatusLabel};
pub use timestamp::{normalize, Timestamp};
