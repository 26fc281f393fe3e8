//! Remote service adapter for the FieldLink sync engine
//!
//! The only component that talks to the backend. It translates a queued
//! mutation into exactly one remote call and exposes the bulk pull
//! operations used to populate the local cache. No queuing, retry, or
//! status bookkeeping happens here; that is the sync processor's job.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapter;
pub mod http;
pub mod mutation;

pub use adapter::{AppliedRecord, DateRange, RemoteService, TransportError};
pub use http::{HttpRemoteService, RemoteConfig};
pub use mutation::{
    IssueReportDraft, MutationError, PassengerCheckIn, RemoteMutation, ShiftStatusChange,
    TripLogDraft, TripUpdate,
};
