//! # 序列化 SPI 与安全门
//!
//! ## 角色定位（Why）
//! - 把请求、响应及其中携带的 [`RpcPayload`] 转换为线上字节；
//! - 所有跨线的类名都先经过 [`SerializeSecurityChecker`]，拒绝危险类型。
//!
//! ## 契约（What）
//! - 编码失败返回 [`RpcError::Serialize`]，解码失败返回 [`RpcError::Deserialize`]，均携带调用侧；
//! - [`SecureSerializer`] 在编码前与解码后检查类名，拒绝时返回 [`RpcError::SerializeDenied`]；
//! - [`DecodeTemplate`] 可固定期望的类名，不一致视为解码失败。

mod json;

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::{Result, RpcError};
use crate::invocation::{RpcPayload, RpcRequest, RpcResponse, Side};
use crate::security::SerializeSecurityChecker;

pub use json::{JSON_SERIALIZER, JsonSerializer};

/// 编解码时的上下文。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SerializeContext {
    pub side: Side,
}

impl SerializeContext {
    pub fn new(side: Side) -> Self {
        Self { side }
    }

    pub(crate) fn serialize_error(&self, detail: impl fmt::Display) -> RpcError {
        RpcError::Serialize {
            side: self.side,
            detail: detail.to_string(),
        }
    }

    pub(crate) fn deserialize_error(&self, detail: impl fmt::Display) -> RpcError {
        RpcError::Deserialize {
            side: self.side,
            detail: detail.to_string(),
        }
    }
}

/// 解码模板：约束解码结果的类名。
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DecodeTemplate {
    expected_class: Option<String>,
}

impl DecodeTemplate {
    /// 不限制类名。
    pub fn any() -> Self {
        Self::default()
    }

    pub fn expecting(class_name: impl Into<String>) -> Self {
        Self {
            expected_class: Some(class_name.into()),
        }
    }

    pub fn expected_class(&self) -> Option<&str> {
        self.expected_class.as_deref()
    }

    /// 校验解码出的载荷是否满足模板。
    pub fn verify(&self, payload: &RpcPayload, context: &SerializeContext) -> Result<()> {
        match self.expected_class() {
            Some(expected) if expected != payload.class_name => Err(context.deserialize_error(
                format!(
                    "expected class `{expected}`, decoded `{}`",
                    payload.class_name
                ),
            )),
            _ => Ok(()),
        }
    }
}

/// 序列化能力。
pub trait Serializer: Send + Sync + 'static {
    fn encode(&self, payload: &RpcPayload, context: &SerializeContext) -> Result<Bytes>;

    fn decode(
        &self,
        bytes: &[u8],
        template: &DecodeTemplate,
        context: &SerializeContext,
    ) -> Result<RpcPayload>;

    fn encode_request(&self, request: &RpcRequest, context: &SerializeContext) -> Result<Bytes>;

    fn decode_request(&self, bytes: &[u8], context: &SerializeContext) -> Result<RpcRequest>;

    fn encode_response(&self, response: &RpcResponse, context: &SerializeContext)
    -> Result<Bytes>;

    fn decode_response(
        &self,
        bytes: &[u8],
        template: &DecodeTemplate,
        context: &SerializeContext,
    ) -> Result<RpcResponse>;
}

/// 带安全门的序列化器包装。
pub struct SecureSerializer {
    inner: Arc<dyn Serializer>,
    checker: Arc<SerializeSecurityChecker>,
}

impl fmt::Debug for SecureSerializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureSerializer")
            .field("checker", &self.checker)
            .finish()
    }
}

impl SecureSerializer {
    pub fn new(inner: Arc<dyn Serializer>, checker: Arc<SerializeSecurityChecker>) -> Self {
        Self { inner, checker }
    }

    fn check_all<'a>(
        &self,
        payloads: impl IntoIterator<Item = &'a RpcPayload>,
        context: &SerializeContext,
    ) -> Result<()> {
        payloads
            .into_iter()
            .try_for_each(|payload| self.checker.check(&payload.class_name, context.side))
    }
}

impl Serializer for SecureSerializer {
    fn encode(&self, payload: &RpcPayload, context: &SerializeContext) -> Result<Bytes> {
        self.checker.check(&payload.class_name, context.side)?;
        self.inner.encode(payload, context)
    }

    fn decode(
        &self,
        bytes: &[u8],
        template: &DecodeTemplate,
        context: &SerializeContext,
    ) -> Result<RpcPayload> {
        if let Some(expected) = template.expected_class() {
            self.checker.check(expected, context.side)?;
        }
        let payload = self.inner.decode(bytes, template, context)?;
        self.checker.check(&payload.class_name, context.side)?;
        Ok(payload)
    }

    fn encode_request(&self, request: &RpcRequest, context: &SerializeContext) -> Result<Bytes> {
        self.check_all(&request.args, context)?;
        self.inner.encode_request(request, context)
    }

    fn decode_request(&self, bytes: &[u8], context: &SerializeContext) -> Result<RpcRequest> {
        let request = self.inner.decode_request(bytes, context)?;
        self.check_all(&request.args, context)?;
        Ok(request)
    }

    fn encode_response(
        &self,
        response: &RpcResponse,
        context: &SerializeContext,
    ) -> Result<Bytes> {
        self.check_all(&response.value, context)?;
        self.inner.encode_response(response, context)
    }

    fn decode_response(
        &self,
        bytes: &[u8],
        template: &DecodeTemplate,
        context: &SerializeContext,
    ) -> Result<RpcResponse> {
        let response = self.inner.decode_response(bytes, template, context)?;
        self.check_all(&response.value, context)?;
        Ok(response)
    }
}
