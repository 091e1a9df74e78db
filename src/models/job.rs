// src/models/job.rs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Queue name for asynchronous test generation.
pub const QUEUE_GENERATE_TEST: &str = "generate_test";

/// Everything a worker needs to generate and store a test without looking
/// back at the original request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateTestPayload {
    pub test_id: String,
    pub themes: Vec<String>,
    pub user_id: String,
    pub discipline_id: i32,
    pub history_id: Uuid,
    pub llm_service_url: String,
}

impl GenerateTestPayload {
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_wire_format() {
        let history_id = Uuid::new_v4();
        let payload = GenerateTestPayload {
            test_id: "7d9f3c1e-0000-4000-8000-000000000001".to_string(),
            themes: vec!["Graphs".to_string()],
            user_id: "u1".to_string(),
            discipline_id: 7,
            history_id,
            llm_service_url: "http://llm/".to_string(),
        };
        let value: serde_json::Value = serde_json::from_slice(&payload.to_bytes().unwrap()).unwrap();
        assert_eq!(value["test_id"], "7d9f3c1e-0000-4000-8000-000000000001");
        assert_eq!(value["themes"][0], "Graphs");
        assert_eq!(value["discipline_id"], 7);
        assert_eq!(value["history_id"], history_id.to_string());
        assert_eq!(value["llm_service_url"], "http://llm/");
    }

    #[test]
    fn test_payload_rejects_missing_fields() {
        assert!(GenerateTestPayload::from_bytes(br#"{"test_id": "x"}"#).is_err());
        assert!(GenerateTestPayload::from_bytes(b"not json").is_err());
    }
}
