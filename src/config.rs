use serde::{Deserialize, Serialize};

use crate::active_table::RetransmitOrder;
use crate::error::Error;
use crate::rbtree::MAX_TREE_SIZE;

/// What to do when the active table has no room for the next custody id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WrapResponse {
    /// Retransmit the bundle in the way right away.
    #[default]
    Resend,
    /// Wait for an acknowledgment to free a slot.
    Block,
    /// Give up on the bundle in the way.
    Drop,
}

/// Per channel custody settings.
///
/// Missing fields take their defaults when read from json:
///
/// ```
/// use bplib::config::Attributes;
///
/// let attr = Attributes::from_json(r#"{ "timeout": 30, "cid_reuse": true }"#).unwrap();
/// assert_eq!(attr.timeout, 30);
/// assert!(attr.cid_reuse);
/// assert_eq!(attr.max_fills_per_dacs, Attributes::default().max_fills_per_dacs);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Attributes {
    /// Seconds before an unacknowledged bundle is retransmitted, `0` never.
    pub timeout: u64,
    /// Retransmit under the original custody id instead of a fresh one.
    pub cid_reuse: bool,
    /// Seconds between aggregate custody signals to the same destination.
    pub dacs_rate: u64,
    /// Ranges the custody tree can hold before it must be flushed.
    pub max_gaps_per_dacs: u32,
    /// Ranges carried by a single aggregate custody signal.
    pub max_fills_per_dacs: u32,
    pub active_table_size: u32,
    pub retransmit_order: RetransmitOrder,
    pub wrap_response: WrapResponse,
}

impl Default for Attributes {
    fn default() -> Self {
        Attributes {
            timeout: 10,
            cid_reuse: false,
            dacs_rate: 5,
            max_gaps_per_dacs: 1028,
            max_fills_per_dacs: 64,
            active_table_size: 16384,
            retransmit_order: RetransmitOrder::OldestBundle,
            wrap_response: WrapResponse::Resend,
        }
    }
}

impl Attributes {
    pub fn from_json(json: &str) -> Result<Attributes, Error> {
        let attr: Attributes = serde_json::from_str(json)?;
        attr.validate()?;
        Ok(attr)
    }

    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.max_gaps_per_dacs == 0 || self.max_gaps_per_dacs > MAX_TREE_SIZE {
            return Err(Error::ParamError(format!(
                "max_gaps_per_dacs {} outside of 1..={}",
                self.max_gaps_per_dacs, MAX_TREE_SIZE
            )));
        }
        if self.max_fills_per_dacs == 0 {
            return Err(Error::ParamError(
                "max_fills_per_dacs must not be zero".to_string(),
            ));
        }
        if self.active_table_size == 0 {
            return Err(Error::ParamError(
                "active_table_size must not be zero".to_string(),
            ));
        }
        Ok(())
    }
}
