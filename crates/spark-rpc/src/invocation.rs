//! 调用模型：请求、响应与调用侧标识。

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// 调用所在的一侧。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// 服务消费方（客户端）。
    Consumer,
    /// 服务提供方（服务端）。
    Provider,
}

impl Side {
    /// 附件与日志中使用的稳定标签。
    pub const fn as_str(self) -> &'static str {
        match self {
            Side::Consumer => "consumer",
            Side::Provider => "provider",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 跨线传输的单个值：类名 + JSON 形态的内容。
///
/// `class_name` 是序列化安全门检查的对象，解码端据此决定是否接受该类型。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RpcPayload {
    pub class_name: String,
    pub value: serde_json::Value,
}

impl RpcPayload {
    pub fn new(class_name: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            class_name: class_name.into(),
            value,
        }
    }
}

/// 一次调用的请求。
///
/// # 契约说明（What）
/// - `service` 为服务唯一名（`interface:unique_id`），`method` 为方法名；
/// - `attachments` 供过滤器传递隐式参数。
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub service: String,
    pub method: String,
    pub args: Vec<RpcPayload>,
    pub attachments: BTreeMap<String, String>,
}

impl RpcRequest {
    pub fn new(service: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
            ..Self::default()
        }
    }

    /// 追加一个参数。
    pub fn with_arg(mut self, arg: RpcPayload) -> Self {
        self.args.push(arg);
        self
    }

    /// 写入附件，返回旧值。
    pub fn attach(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.attachments.insert(key.into(), value.into())
    }

    pub fn attachment(&self, key: &str) -> Option<&str> {
        self.attachments.get(key).map(String::as_str)
    }
}

/// 一次调用的响应。
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub value: Option<RpcPayload>,
    /// 服务端业务异常的描述；`None` 表示成功。
    pub error: Option<String>,
    pub attachments: BTreeMap<String, String>,
}

impl RpcResponse {
    pub fn with_value(value: RpcPayload) -> Self {
        Self {
            value: Some(value),
            ..Self::default()
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}
