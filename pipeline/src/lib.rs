pub mod discovery;
pub mod inbox;
pub mod leads;

pub use discovery::{DiscoveryOrchestrator, DiscoveryReport};
pub use inbox::{InboxRunReport, InboxSettings, InboxWatcher};
pub use leads::{LeadScoringJob, LeadScoringReport};
