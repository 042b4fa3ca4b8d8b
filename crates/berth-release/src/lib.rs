//! Release orchestration: drives a deployment through validate,
//! build, compile, apply, and rollout-wait, one pipeline per project
//! at a time, against a pluggable cluster backend.

pub mod adverts;
pub mod cluster;
pub mod error;
pub mod manager;
pub mod notify;

pub use adverts::{spawn_advert_worker, AdvertisementSink, RecordingSink};
pub use cluster::{ClusterClient, ClusterFailure, ClusterOp, RecordingCluster};
pub use error::{ReleaseError, ReleaseResult};
pub use manager::{ReleaseManager, ReleaseSettings};
pub use notify::{LogNotifier, Notifier};
