pub mod metrics;

pub use metrics::{router, AdminState};
