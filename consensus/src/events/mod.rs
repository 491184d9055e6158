//! In-process notifications for the consensus engine
//!
//! The orchestrator and the reputation manager publish [`ConsensusEvent`]s on
//! an [`EventBus`] so dashboards or loggers can follow decisions and weight
//! changes live. Durable audit records are written to the store separately.
//!
//! ```ignore
//! use consensus::events::{EventBus, EventFilter};
//!
//! let bus = EventBus::new().shared();
//! let mut weights = bus.subscribe_filtered(EventFilter::new().types(vec!["weight_updated"]));
//! while let Some(event) = weights.recv().await {
//!     println!("{:?}", event);
//! }
//! ```

pub mod bus;
pub mod types;

pub use bus::{EventBus, EventFilter, FilteredReceiver, SharedEventBus};
pub use types::ConsensusEvent;
