//! 传输边界：把编码后的请求送达选中的提供者并取回响应字节。
//!
//! 连接管理、超时与重连都属于实现方，核心只依赖这一个同步调用。

use bytes::Bytes;

use crate::error::Result;
use crate::provider::ProviderInfo;

/// 传输能力。
///
/// 失败时返回 [`RpcError::Transport`](crate::error::RpcError::Transport)，携带目标地址。
pub trait Transport: Send + Sync + 'static {
    fn send(&self, provider: &ProviderInfo, request: Bytes) -> Result<Bytes>;
}

impl<F> Transport for F
where
    F: Fn(&ProviderInfo, Bytes) -> Result<Bytes> + Send + Sync + 'static,
{
    fn send(&self, provider: &ProviderInfo, request: Bytes) -> Result<Bytes> {
        self(provider, request)
    }
}
