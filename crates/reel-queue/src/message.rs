//! Queue message payloads.

use serde::{Deserialize, Serialize};

use reel_models::JobId;

/// The single message kind on the work stream: "start (or resume)
/// this job". All job parameters live on the job row; re-delivery of
/// a message for a terminal job is a no-op at the worker because the
/// pickup CAS rejects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartMessage {
    pub job_id: JobId,
}

impl StartMessage {
    pub fn new(job_id: JobId) -> Self {
        Self { job_id }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let msg = StartMessage::new(JobId::from_string("j42"));
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"job_id":"j42"}"#);
        let back: StartMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }
}
