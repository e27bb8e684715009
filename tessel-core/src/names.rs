//! The closed set of tensor names exchanged with the execution engine.
//!
//! Inputs: `input_ids`, `position_ids`, `attention_mask`,
//! `past_key_values.{layer}.{key|value}`.
//! Outputs: `logits`, `present.{layer}.{key|value}`.

use std::fmt;
use std::str::FromStr;

use crate::TesselError;

pub const PAST_PREFIX: &str = "past_key_values";
pub const PRESENT_PREFIX: &str = "present";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KvRole {
    Key,
    Value,
}

impl KvRole {
    pub const ALL: [KvRole; 2] = [KvRole::Key, KvRole::Value];

    pub fn as_str(&self) -> &'static str {
        match self {
            KvRole::Key => "key",
            KvRole::Value => "value",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TensorName {
    InputIds,
    PositionIds,
    AttentionMask,
    Logits,
    Past { layer: usize, role: KvRole },
    Present { layer: usize, role: KvRole },
}

impl TensorName {
    /// The past-cache slot that a present output replaces.
    pub fn as_past(&self) -> Option<TensorName> {
        match *self {
            TensorName::Present { layer, role } => Some(TensorName::Past { layer, role }),
            _ => None,
        }
    }
}

impl fmt::Display for TensorName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TensorName::InputIds => f.write_str("input_ids"),
            TensorName::PositionIds => f.write_str("position_ids"),
            TensorName::AttentionMask => f.write_str("attention_mask"),
            TensorName::Logits => f.write_str("logits"),
            TensorName::Past { layer, role } => {
                write!(f, "{PAST_PREFIX}.{layer}.{}", role.as_str())
            }
            TensorName::Present { layer, role } => {
                write!(f, "{PRESENT_PREFIX}.{layer}.{}", role.as_str())
            }
        }
    }
}

impl FromStr for TensorName {
    type Err = TesselError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "input_ids" => return Ok(TensorName::InputIds),
            "position_ids" => return Ok(TensorName::PositionIds),
            "attention_mask" => return Ok(TensorName::AttentionMask),
            "logits" => return Ok(TensorName::Logits),
            _ => {}
        }

        let unknown = || TesselError::InvalidArgument(format!("unknown tensor name '{s}'"));
        let mut parts = s.split('.');
        let (Some(prefix), Some(layer), Some(role), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(unknown());
        };
        let layer: usize = layer.parse().map_err(|_| unknown())?;
        let role = match role {
            "key" => KvRole::Key,
            "value" => KvRole::Value,
            _ => return Err(unknown()),
        };
        match prefix {
            PAST_PREFIX => Ok(TensorName::Past { layer, role }),
            PRESENT_PREFIX => Ok(TensorName::Present { layer, role }),
            _ => Err(unknown()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cache_names() {
        let name: TensorName = "present.12.value".parse().unwrap();
        assert_eq!(
            name,
            TensorName::Present {
                layer: 12,
                role: KvRole::Value
            }
        );
        assert_eq!(name.as_past().unwrap().to_string(), "past_key_values.12.value");
    }

    #[test]
    fn test_display_parse_agree() {
        for name in [
            TensorName::InputIds,
            TensorName::AttentionMask,
            TensorName::Past {
                layer: 0,
                role: KvRole::Key,
            },
        ] {
            assert_eq!(name.to_string().parse::<TensorName>().unwrap(), name);
        }
    }

    #[test]
    fn test_reject_unknown_names() {
        for raw in ["present.x.key", "present.1.query", "present.1", "hidden.0.key", "present.1.key.extra"] {
            assert!(raw.parse::<TensorName>().is_err(), "{raw} should not parse");
        }
    }
}
