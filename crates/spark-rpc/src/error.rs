//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 集中定义服务发现与调用路由核心对外暴露的错误语义；
//! - 按配置、过滤器、序列化、安全、路由、注册中心等类别归档，便于运维按类别告警。
//!
//! ## 设计要求（What）
//! - 所有错误派生 `thiserror::Error`，与 `std::error::Error` 生态兼容；
//! - 每个变体映射到稳定的点分错误码（[`RpcError::code`]）与 [`ErrorCategory`]；
//! - 过滤器错误区分客户端/服务端，序列化错误区分编码/解码与客户端/服务端。

use std::fmt;

use thiserror::Error;

use crate::invocation::Side;

/// 核心统一的 `Result` 别名。
pub type Result<T, E = RpcError> = std::result::Result<T, E>;

/// 错误类别，供观测与重试策略按类别分流。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ErrorCategory {
    /// 配置或扩展解析失败，属于致命错误。
    Configuration,
    /// 过滤器自身逻辑抛出的错误。
    Filter,
    /// 序列化/反序列化失败。
    Serialization,
    /// 安全门拒绝的类型。
    Security,
    /// 负载均衡阶段没有可用地址。
    Routing,
    /// 注册中心交互失败。
    Registry,
    /// 传输层失败。
    Transport,
    /// 无法归类的内部异常。
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Filter => "filter",
            ErrorCategory::Serialization => "serialization",
            ErrorCategory::Security => "security",
            ErrorCategory::Routing => "routing",
            ErrorCategory::Registry => "registry",
            ErrorCategory::Transport => "transport",
            ErrorCategory::Internal => "internal",
        };
        f.write_str(label)
    }
}

/// 服务发现与调用路由核心的错误域。
///
/// # 教案式说明
/// - **契约 (What)**：
///   - 所有变体均为 `Send + Sync + 'static`，可跨线程传播；
///   - 过滤器错误以 `source` 保留原始错误，调用方可通过 [`std::error::Error::source`] 追溯；
///   - 错误不会被核心重试，重试是外层策略的职责。
/// - **执行逻辑 (How)**：每个变体携带可读上下文（扩展名、类名、服务名等），[`RpcError::code`]
///   为每个变体挑选稳定错误码。
#[derive(Debug, Error)]
pub enum RpcError {
    /// 扩展点下找不到指定别名的实现。
    #[error("extension `{alias}` of capability `{capability}` is not registered")]
    ExtensionNotFound {
        capability: &'static str,
        alias: String,
    },

    /// 配置内容非法，例如 TOML 解析失败或字段取值越界。
    #[error("invalid configuration: {detail}")]
    Config { detail: String },

    /// 客户端过滤器自身逻辑失败。
    #[error("client filter `{filter}` failed: {source}")]
    ClientFilter {
        filter: String,
        #[source]
        source: Box<RpcError>,
    },

    /// 服务端过滤器自身逻辑失败。
    #[error("provider filter `{filter}` failed: {source}")]
    ProviderFilter {
        filter: String,
        #[source]
        source: Box<RpcError>,
    },

    /// 编码阶段失败。
    #[error("{side} serialize failed: {detail}")]
    Serialize { side: Side, detail: String },

    /// 解码阶段失败。
    #[error("{side} deserialize failed: {detail}")]
    Deserialize { side: Side, detail: String },

    /// 序列化安全门拒绝了该类型。
    #[error("{side} serialize check denied class `{class_name}`")]
    SerializeDenied { side: Side, class_name: String },

    /// 地址簿中没有可用的服务提供者。
    #[error("no available provider for service `{service}`")]
    NoAvailableProvider { service: String },

    /// 注册中心交互失败。
    #[error("registry `{protocol}` failed: {detail}")]
    Registry { protocol: String, detail: String },

    /// 传输层失败。
    #[error("transport to `{address}` failed: {detail}")]
    Transport { address: String, detail: String },

    /// 业务处理失败，由服务端实现返回。
    #[error("service `{service}` returned an error: {detail}")]
    Service { service: String, detail: String },

    /// 无法归类的内部异常。
    #[error("internal failure: {detail}")]
    Internal { detail: String },
}

impl RpcError {
    /// 构造配置错误。
    pub fn config(detail: impl Into<String>) -> Self {
        RpcError::Config {
            detail: detail.into(),
        }
    }

    /// 构造内部错误。
    pub fn internal(detail: impl Into<String>) -> Self {
        RpcError::Internal {
            detail: detail.into(),
        }
    }

    /// 将过滤器自身逻辑产生的错误按调用侧归类。
    ///
    /// 已经归类过的过滤器错误原样返回，避免多层过滤器重复包装。
    pub fn filter(side: Side, filter: impl Into<String>, source: RpcError) -> Self {
        if source.category() == ErrorCategory::Filter {
            return source;
        }
        let filter = filter.into();
        let source = Box::new(source);
        match side {
            Side::Consumer => RpcError::ClientFilter { filter, source },
            Side::Provider => RpcError::ProviderFilter { filter, source },
        }
    }

    /// 稳定错误码，前缀统一为 `rpc.`。
    pub fn code(&self) -> &'static str {
        match self {
            RpcError::ExtensionNotFound { .. } => "rpc.config.extension_missing",
            RpcError::Config { .. } => "rpc.config.invalid",
            RpcError::ClientFilter { .. } => "rpc.filter.client",
            RpcError::ProviderFilter { .. } => "rpc.filter.provider",
            RpcError::Serialize {
                side: Side::Consumer,
                ..
            } => "rpc.serialize.client",
            RpcError::Serialize {
                side: Side::Provider,
                ..
            } => "rpc.serialize.server",
            RpcError::Deserialize {
                side: Side::Consumer,
                ..
            } => "rpc.deserialize.client",
            RpcError::Deserialize {
                side: Side::Provider,
                ..
            } => "rpc.deserialize.server",
            RpcError::SerializeDenied { .. } => "rpc.security.serialize_denied",
            RpcError::NoAvailableProvider { .. } => "rpc.routing.no_provider",
            RpcError::Registry { .. } => "rpc.registry.failure",
            RpcError::Transport { .. } => "rpc.transport.failure",
            RpcError::Service { .. } => "rpc.service.failure",
            RpcError::Internal { .. } => "rpc.internal",
        }
    }

    /// 错误所属类别。
    pub fn category(&self) -> ErrorCategory {
        match self {
            RpcError::ExtensionNotFound { .. } | RpcError::Config { .. } => {
                ErrorCategory::Configuration
            }
            RpcError::ClientFilter { .. } | RpcError::ProviderFilter { .. } => {
                ErrorCategory::Filter
            }
            RpcError::Serialize { .. } | RpcError::Deserialize { .. } => {
                ErrorCategory::Serialization
            }
            RpcError::SerializeDenied { .. } => ErrorCategory::Security,
            RpcError::NoAvailableProvider { .. } => ErrorCategory::Routing,
            RpcError::Registry { .. } => ErrorCategory::Registry,
            RpcError::Transport { .. } => ErrorCategory::Transport,
            RpcError::Service { .. } | RpcError::Internal { .. } => ErrorCategory::Internal,
        }
    }
}

impl From<toml::de::Error> for RpcError {
    fn from(value: toml::de::Error) -> Self {
        RpcError::config(format!("malformed TOML: {value}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_classification_follows_side() {
        let err = RpcError::filter(Side::Consumer, "auth", RpcError::internal("token expired"));
        assert_eq!(err.code(), "rpc.filter.client");
        assert_eq!(err.category(), ErrorCategory::Filter);

        let err = RpcError::filter(Side::Provider, "auth", RpcError::internal("token expired"));
        assert_eq!(err.code(), "rpc.filter.provider");
    }

    #[test]
    fn filter_errors_are_not_wrapped_twice() {
        let inner = RpcError::filter(Side::Consumer, "inner", RpcError::internal("boom"));
        let outer = RpcError::filter(Side::Consumer, "outer", inner);
        match outer {
            RpcError::ClientFilter { filter, .. } => assert_eq!(filter, "inner"),
            other => panic!("应保留最内层过滤器归类，实际为 {other:?}"),
        }
    }

    #[test]
    fn serialize_codes_carry_side() {
        let err = RpcError::Deserialize {
            side: Side::Provider,
            detail: "eof".into(),
        };
        assert_eq!(err.code(), "rpc.deserialize.server");
        assert!(err.to_string().contains("provider deserialize failed"));
    }
}
