pub mod source;
pub mod tick_store;
pub mod vci;

pub use source::{QuoteSource, TickObservation};
pub use tick_store::{SqliteTickStore, TickStore};
pub use vci::{VciClient, VciError};
