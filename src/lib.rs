// Booking reservation lifecycle engine: turns an ephemeral search quote into
// a price-locked hold and then into a finalized booking against a slow,
// flaky hotel supplier. API handlers call the engine; the engine owns the
// hold cache, retry policy, and event trail.

pub mod availability;
pub mod clock;
pub mod config;
pub mod engine;
pub mod events;
pub mod gateway;
pub mod model;
pub mod policy;
pub mod retry;
pub mod store;
pub mod supplier;

// Re-export key types for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use engine::{EngineError, HeldOffer, ReservationEngine};
pub use events::{Event, EventKind, EventLog, ExportFormat};
pub use gateway::{GatewayConfig, HttpSupplierGateway};
pub use model::{
    Booking, BookingStatus, GuestDetails, Hold, HoldStatus, Offer, RequestContext,
};
pub use policy::{CancellationPolicy, PolicyConfig, RefundTerms};
pub use retry::{ErrorClass, RetryConfig, RetryExecutor, RetryOutcome};
pub use store::{ReservationStore, StoreConfig, StoreError, StoreStatsReport};
pub use supplier::{
    BookRequest, BookResponse, CancelAck, PreBookRequest, PreBookResponse, SearchCriteria,
    SupplierError, SupplierGateway,
};
