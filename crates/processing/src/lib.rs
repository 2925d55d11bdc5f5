//! The activity processing pipeline.
//!
//! Activities arriving on an outbox (client-to-server) or inbox
//! (server-to-server) are validated, given IRIs, applied as side effects
//! against the storage port, and fanned out to their audience. Remote
//! recipients become delivery jobs on a bounded queue; local recipients get
//! the activity appended to their inbox directly.

pub mod delivery;
pub mod error;
pub mod processor;

pub use delivery::{Deliver, DeliveryJob, NullDelivery, QueuedDelivery};
pub use error::{ProcessingError, ProcessingResult};
pub use processor::{Outcome, Processor, generate_id, provision_actor_keys};
