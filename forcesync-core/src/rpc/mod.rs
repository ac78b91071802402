/*
    rpc - Request/response correlation and action dispatch

    - envelope: wire envelope, action names and reply codes
    - correlator: pending-call map, handler registry, topic subscriptions
*/

pub mod correlator;
pub mod envelope;

pub use correlator::{ActionHandler, CallCorrelator, ErrorCallback, HandlerId};
pub use envelope::*;
