//! Session configuration.
//!
//! Everything here has a default, so an empty JSON object (or no file at
//! all) is a valid configuration.

use crate::catalog::Catalog;
use crate::graph::{FailurePolicy, SlotRange};
use crate::layout::MissingPolicy;
use crate::value::TagScheme;
use crate::ConfigError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Width of the widest supported word.
const MAX_WORD_BITS: u32 = 64;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Shift that recovers an immediate's value. Chosen from the word size
    /// when absent.
    pub immediate_shift: Option<u32>,
    /// Low 32 bits of a cleared weak reference.
    pub cleared_weak_sentinel: u32,
    /// Longest array or string length believed.
    pub max_array_length: u64,
    /// Largest object size believed, in bytes.
    pub max_object_size: u64,
    /// Longest string used as a node name, in bytes.
    pub max_name_length: usize,
    pub failure_policy: FailurePolicy,
    pub missing_debug_info: MissingPolicy,
    /// Regular expressions over base-class short names that inherited
    /// constant search always follows.
    pub base_allow_list: Vec<String>,
    /// Namespace the catalogue's native types live in.
    pub namespace: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            immediate_shift: None,
            cleared_weak_sentinel: 3,
            max_array_length: 1 << 27,
            max_object_size: 1 << 30,
            max_name_length: 256,
            failure_policy: FailurePolicy::Skip,
            missing_debug_info: MissingPolicy::UseDefault,
            base_allow_list: crate::DEFAULT_BASE_ALLOW_LIST
                .iter()
                .map(|s| s.to_string())
                .collect(),
            namespace: "v8::internal".to_string(),
        }
    }
}

impl SessionConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values that deserialize fine but can't be used.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(shift) = self.immediate_shift {
            if shift >= MAX_WORD_BITS {
                return Err(ConfigError::Invalid {
                    field: "immediate_shift",
                    reason: format!("{} is not less than {}", shift, MAX_WORD_BITS),
                });
            }
        }
        Ok(())
    }

    /// The tag scheme for `word_size`-byte words. A shift override as wide as
    /// the word is refused.
    pub fn tag_scheme(&self, word_size: u64) -> Result<TagScheme, ConfigError> {
        let mut s = TagScheme::for_word_size(word_size);
        if let Some(shift) = self.immediate_shift {
            let bits = word_size.saturating_mul(8).min(u64::from(MAX_WORD_BITS));
            if u64::from(shift) >= bits {
                return Err(ConfigError::Invalid {
                    field: "immediate_shift",
                    reason: format!("{} is not less than the {}-bit word", shift, bits),
                });
            }
            s.immediate_shift = shift;
        }
        s.cleared_weak_sentinel = self.cleared_weak_sentinel;
        Ok(s)
    }

    pub fn base_allow_patterns(&self) -> Result<Vec<Regex>, ConfigError> {
        self.base_allow_list
            .iter()
            .map(|p| Regex::new(p).map_err(ConfigError::from))
            .collect()
    }

    pub fn catalog(&self) -> Catalog {
        Catalog::v8(&self.namespace)
    }
}

/// One entry of a roots file, as written.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RootEntry {
    category: String,
    /// Address of the first slot; any base `parse_int` understands.
    start: String,
    count: u64,
}

/// Reads a JSON list of root slot ranges.
pub fn load_roots(path: impl AsRef<Path>) -> Result<Vec<SlotRange>, ConfigError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_roots(&text).map_err(|e| match e {
        ConfigError::Parse { source, .. } => ConfigError::Parse {
            path: path.display().to_string(),
            source,
        },
        other => other,
    })
}

fn parse_roots(text: &str) -> Result<Vec<SlotRange>, ConfigError> {
    let entries: Vec<RootEntry> =
        serde_json::from_str(text).map_err(|source| ConfigError::Parse {
            path: "roots".to_string(),
            source,
        })?;
    entries
        .into_iter()
        .map(|e| {
            let start = parse_int::parse::<u64>(&e.start).map_err(|err| ConfigError::Address {
                text: e.start.clone(),
                reason: err.to_string(),
            })?;
            Ok(SlotRange {
                category: e.category,
                start,
                count: e.count,
            })
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::value::TaggedValue;

    #[test]
    fn empty_object_is_all_defaults() {
        let c: SessionConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(c, SessionConfig::default());
        assert_eq!(c.base_allow_patterns().unwrap().len(), 4);
    }

    #[test]
    fn overrides_and_policies() {
        let c: SessionConfig = serde_json::from_str(
            r#"{
                "immediate_shift": 1,
                "failure_policy": "abort",
                "missing_debug_info": "fatal",
                "namespace": "x"
            }"#,
        )
        .unwrap();
        assert_eq!(c.failure_policy, FailurePolicy::Abort);
        assert_eq!(c.missing_debug_info, MissingPolicy::Fatal);
        assert_eq!(c.tag_scheme(8).unwrap().immediate_shift, 1);
        assert_eq!(c.catalog().instance_type_enum(), "x::InstanceType");

        let d = SessionConfig::default();
        assert_eq!(d.tag_scheme(8).unwrap().immediate_shift, 32);
        assert_eq!(d.tag_scheme(4).unwrap().immediate_shift, 1);

        assert!(serde_json::from_str::<SessionConfig>(r#"{"bogus": 1}"#).is_err());
    }

    #[test]
    fn shifts_must_fit_the_word() {
        let c: SessionConfig = serde_json::from_str(r#"{"immediate_shift": 64}"#).unwrap();
        assert!(matches!(
            c.validate(),
            Err(ConfigError::Invalid { field: "immediate_shift", .. })
        ));
        assert!(c.tag_scheme(8).is_err());

        let c = SessionConfig {
            immediate_shift: Some(32),
            ..SessionConfig::default()
        };
        assert!(c.validate().is_ok());
        assert_eq!(c.tag_scheme(8).unwrap().classify(5 << 32), TaggedValue::Immediate(5));
        assert!(matches!(
            c.tag_scheme(4),
            Err(ConfigError::Invalid { field: "immediate_shift", .. })
        ));
    }

    #[test]
    fn load_rejects_unusable_values() {
        let path = std::env::temp_dir().join(format!("heapdb-config-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"immediate_shift": 70}"#).unwrap();
        let r = SessionConfig::load(&path);
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(r, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn bad_patterns_are_reported() {
        let c = SessionConfig {
            base_allow_list: vec!["(".to_string()],
            ..SessionConfig::default()
        };
        assert!(matches!(c.base_allow_patterns(), Err(ConfigError::Pattern(_))));
    }

    #[test]
    fn roots_accept_any_base() {
        let r = parse_roots(
            r#"[
                {"category": "strong-roots", "start": "0x1000", "count": 4},
                {"category": "builtins", "start": "4096", "count": 1}
            ]"#,
        )
        .unwrap();
        assert_eq!(r.len(), 2);
        assert_eq!(r[0].start, 0x1000);
        assert_eq!(r[0].count, 4);
        assert_eq!(r[1].start, 4096);

        assert!(matches!(
            parse_roots(r#"[{"category": "x", "start": "0xzz", "count": 1}]"#),
            Err(ConfigError::Address { .. })
        ));
    }
}
