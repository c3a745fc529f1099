//! Nova Core - Foundation types for the Nova dispatch fabric.
//!
//! This crate provides:
//! - Opaque identifiers for jobs and conversational sessions
//! - The typed [`Task`] envelope published to the task exchange
//! - The [`ResultEvent`] chunk published to the results exchange
//! - Persona and scenario catalog types
//! - Retry utilities with exponential backoff

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod id;
pub mod persona;
pub mod result;
pub mod retry;
pub mod task;

pub use id::{IdParseError, JobId, SessionId};
pub use persona::{
    load_scenarios, neutral_persona, Persona, PersonaCatalog, ScenarioCatalog, DEFAULT_SCENARIO,
};
pub use result::{ResultEvent, ResultEventKind};
pub use retry::{retry, RetryConfig};
pub use task::{Function, Task, TaskError, TaskPayload};

/// Serialize a value as canonical JSON.
///
/// With `serde_json`'s default map representation (a `BTreeMap`), routing a
/// value through [`serde_json::Value`] yields key-sorted output, so two
/// processes encoding the same envelope produce identical bytes.
///
/// # Errors
///
/// Returns the underlying serialization error.
pub fn to_canonical_json<T: serde::Serialize>(value: &T) -> serde_json::Result<Vec<u8>> {
    let value = serde_json::to_value(value)?;
    serde_json::to_vec(&value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_json_sorts_keys() {
        #[derive(serde::Serialize)]
        struct Unordered {
            zebra: u32,
            apple: u32,
            mango: u32,
        }

        let bytes = to_canonical_json(&Unordered {
            zebra: 1,
            apple: 2,
            mango: 3,
        })
        .unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text, r#"{"apple":2,"mango":3,"zebra":1}"#);
    }
}
