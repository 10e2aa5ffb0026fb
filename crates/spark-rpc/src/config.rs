//! # 运行时配置
//!
//! ## 来源与优先级（What）
//! - TOML 文本（`[application]`、`[serialize]`、`[[registries]]`）为外部配置；
//! - 环境变量为系统级覆盖，名单覆盖串先于 TOML 中的覆盖串应用，检查模式以环境变量为准；
//! - 所有字段都有默认值：检查模式 `strict`，无覆盖，无注册中心。
//!
//! ## 环境变量
//! - `SPARK_RPC_SERIALIZE_BLACKLIST_OVERRIDE`
//! - `SPARK_RPC_SERIALIZE_WHITELIST_OVERRIDE`
//! - `SPARK_RPC_SERIALIZE_CHECK_MODE`

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RpcError};
use crate::registry::RegistryConfig;
use crate::security::SerializeCheckMode;

pub const ENV_BLACKLIST_OVERRIDE: &str = "SPARK_RPC_SERIALIZE_BLACKLIST_OVERRIDE";
pub const ENV_WHITELIST_OVERRIDE: &str = "SPARK_RPC_SERIALIZE_WHITELIST_OVERRIDE";
pub const ENV_CHECK_MODE: &str = "SPARK_RPC_SERIALIZE_CHECK_MODE";

/// 应用信息。
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApplicationConfig {
    pub name: String,
}

/// 序列化安全门配置。
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SerializeConfig {
    pub check_mode: SerializeCheckMode,
    pub blacklist_override: String,
    pub whitelist_override: String,
    #[serde(skip)]
    env_blacklist_override: Option<String>,
    #[serde(skip)]
    env_whitelist_override: Option<String>,
}

impl SerializeConfig {
    /// 黑名单覆盖串，按应用顺序排列（环境变量在前）。
    pub fn blacklist_overrides(&self) -> Vec<&str> {
        ordered(&self.env_blacklist_override, &self.blacklist_override)
    }

    /// 白名单覆盖串，按应用顺序排列（环境变量在前）。
    pub fn whitelist_overrides(&self) -> Vec<&str> {
        ordered(&self.env_whitelist_override, &self.whitelist_override)
    }
}

fn ordered<'a>(system: &'a Option<String>, external: &'a str) -> Vec<&'a str> {
    system
        .as_deref()
        .into_iter()
        .chain(Some(external))
        .filter(|source| !source.trim().is_empty())
        .collect()
}

/// 运行时配置根。
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RpcConfig {
    pub application: ApplicationConfig,
    pub serialize: SerializeConfig,
    pub registries: Vec<RegistryConfig>,
}

impl RpcConfig {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        Ok(toml::from_str(source)?)
    }

    /// 读取 TOML 文件。
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|err| {
            RpcError::config(format!("failed to read `{}`: {err}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    /// 叠加进程环境变量。
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// 以自定义查找函数叠加环境变量，便于测试注入。
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(raw) = lookup(ENV_CHECK_MODE) {
            self.serialize.check_mode = raw.parse()?;
        }
        self.serialize.env_blacklist_override = lookup(ENV_BLACKLIST_OVERRIDE);
        self.serialize.env_whitelist_override = lookup(ENV_WHITELIST_OVERRIDE);
        Ok(())
    }
}
