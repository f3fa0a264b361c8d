mod builder;
pub mod comm;
pub mod iter;
mod owned;
mod pdu;
mod r#ref;
pub mod tsap;
pub mod types;

use serde_repr::{Deserialize_repr, Serialize_repr};

/// Controller family. Selects TSAP defaults and value codec quirks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize_repr, Deserialize_repr)]
#[repr(i16)]
pub enum CpuType {
    /// Family not known; generic profile
    #[default]
    Any = -1,
    S7200 = 0,
    S7200Smart = 1,
    S7300 = 2,
    S7400 = 3,
    S71200 = 4,
    S71500 = 5,
    Logo0BA8 = 6,
}

impl CpuType {
    /// Resolve the family from an order number such as `"6ES7 511-1AK02-0AB0"`.
    /// Anything unrecognized is `Any`.
    pub fn from_article_number(article: &str) -> CpuType {
        let Some(rest) = article.trim_start().strip_prefix("6ES7 ") else {
            return CpuType::Any;
        };
        match rest.chars().next() {
            Some('2') => CpuType::S71200,
            Some('5') => CpuType::S71500,
            Some('3') => CpuType::S7300,
            Some('4') => CpuType::S7400,
            _ => CpuType::Any,
        }
    }

    /// Families with IEC counters stored as plain binary words.
    #[inline]
    pub fn has_binary_counters(self) -> bool {
        matches!(self, CpuType::S71200 | CpuType::S71500)
    }
}

pub use builder::{
    build_ack_error, build_ack_read_var, build_ack_setup_comm, build_ack_write_var,
    build_read_clock, build_read_szl, build_read_var, build_setup_comm,
    build_user_data_response, build_write_var,
};
pub use comm::S7Header;
pub use iter::{S7UserDataParam, S7VarSpec, VarPayloadDataItemRef, S7_VAR_SPEC_LEN};
pub use owned::DataItemOwned;
pub use pdu::{S7Pdu, S7PduRef};
pub use r#ref::{
    ItemsPayloadRef, S7JobParamRef, S7ParamAckDataRef, S7ParamRef, S7PayloadRef,
    S7UserDataParamRef, SetupParam,
};
pub use tsap::{default_tsap_pair, Tsap, TsapPair};
pub use types::{
    CpuFunctionGroup, CpuFunctionType, S7Area, S7DataVariableType, S7Function, S7PduType,
    S7ReturnCode, S7TransportSize,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn article_number_families() {
        assert_eq!(
            CpuType::from_article_number("6ES7 211-1AE40-0XB0"),
            CpuType::S71200
        );
        assert_eq!(
            CpuType::from_article_number("6ES7 515-2AM01-0AB0"),
            CpuType::S71500
        );
        assert_eq!(
            CpuType::from_article_number("6ES7 315-2EH14-0AB0"),
            CpuType::S7300
        );
        assert_eq!(
            CpuType::from_article_number("6ES7 416-3XR05-0AB0"),
            CpuType::S7400
        );
        assert_eq!(CpuType::from_article_number("6ES7 999-0"), CpuType::Any);
        assert_eq!(CpuType::from_article_number("6ED1 052-1MD08"), CpuType::Any);
        assert_eq!(CpuType::from_article_number(""), CpuType::Any);
    }
}
