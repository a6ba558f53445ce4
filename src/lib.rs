//! colocate infers which serverless instances share a physical server,
//! and which of them shares a server with a third-party victim, in a
//! black-box manner: by triggering memory-bus contention on some
//! instances and measuring its effect on others.
//!
//! Every attacker-controlled instance runs a probe server exposing
//! `/lock` (contend for a while), `/check` (measure contention),
//! `/instance_id` and `/info` (declared CPU). The crate is the client side
//! of these probes and the inference algorithms on top of them.
//!
//! # Getting started
//!
//! colocate is thought to be mainly used via the binary it provides,
//! `colocate`; see its help screen: `colocate -h`. A typical run is:
//!
//! 1. `colocate coverage` partitions the attacker instances into
//!    server groups (or `colocate discover` + `colocate shared` when all
//!    instances hide behind one URL);
//! 2. `colocate prepare` groups the instances by architecture and keeps
//!    one representative per server;
//! 3. `colocate locate` searches the resulting cpu sets for an instance
//!    co-resident with the victim.
//!
//! # Library
//!
//! - [`oracle`]: the contention oracle client and its sentinel values;
//! - [`aggregate`]: concurrent probing and max-reduction of metrics;
//! - [`coverage`]: the iterative server partitioners;
//! - [`architecture`]: architecture sets and server deduplication;
//! - [`locate`]: the binary-search victim localizer.
pub mod aggregate;
pub mod architecture;
pub mod coverage;
pub mod error;
pub mod locate;
pub mod observation;
pub mod oracle;
pub mod settings;
pub mod utils;

pub use crate::error::{Error, Result};
