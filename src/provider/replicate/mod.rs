//! Replicate predictions.
//!
//! Every operation creates a prediction and polls it to completion through
//! [`crate::poller::JobPoller`]; streaming chat replays the growing output as
//! simulated chunks.

pub mod provider;
pub(crate) mod request;
pub(crate) mod response;
pub(crate) mod source;
pub(crate) mod types;

pub use provider::ReplicateProvider;
