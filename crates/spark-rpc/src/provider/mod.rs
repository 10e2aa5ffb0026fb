//! 服务提供者与分组的数据模型。

mod group;
mod info;

pub use group::{DEFAULT_GROUP, DIRECT_GROUP, ProviderGroup};
pub use info::{
    ATTR_APP_NAME, ATTR_START_TIME, ATTR_WARMUP_TIME, ATTR_WARMUP_WEIGHT, ATTR_WEIGHT,
    DEFAULT_WEIGHT, DynamicAttributes, ProviderInfo, ProviderStatus,
};
