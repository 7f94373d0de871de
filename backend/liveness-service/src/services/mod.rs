pub mod backends;
pub mod health_probe;
pub mod liveness_key;
pub mod log_sink;
pub mod teardown;

pub use backends::{BackendError, BackendRegistry, CdnBackend, RelayBackend, StreamingBackend};
pub use health_probe::{probe_with_retry, HealthProbe, HttpHealthProbe, ProbeError};
pub use liveness_key::{classify, decode, encode, KeyError, LivenessKey, Namespace};
pub use log_sink::{LogSink, TracingLogSink};
pub use teardown::{SessionTeardown, REMARK_UNHEALTHY};
