//! # 调用过滤链
//!
//! ## 角色定位（Why）
//! - 把鉴权、上下文透传、日志等横切逻辑以「过滤器」形式包裹在真实调用外层；
//! - 过滤器通过扩展加载器按别名注册，在引用/发布服务时一次性装配成链。
//!
//! ## 契约（What）
//! - [`Filter::descriptor`] 声明名称、`order` 与两侧激活标志；
//! - [`Filter::need_to_load`] 只在装配期求值一次；
//! - [`Filter::invoke`] 在非错误路径上恰好调用一次 `next.invoke`，短路型过滤器需在文档中写明；
//! - 过滤器自身逻辑产生的错误由链归类为客户端/服务端过滤器错误，下游错误原样透传。

mod builtin;
mod chain;

use std::borrow::Cow;

use crate::error::Result;
use crate::invocation::{RpcRequest, RpcResponse, Side};
use crate::registry::ServiceDescriptor;

pub use builtin::{
    ATTACHMENT_APP_NAME, ATTACHMENT_SIDE, CONTEXT_FILTER, CONTEXT_FILTER_ORDER, ContextFilter,
    LOGGING_FILTER, LOGGING_FILTER_ORDER, LoggingFilter,
};
pub use chain::FilterChain;

/// 可被调用的对象：过滤链中的下一跳、集群调用器或服务端业务实现。
pub trait Invoker: Send + Sync {
    fn invoke(&self, request: RpcRequest) -> Result<RpcResponse>;
}

impl<F> Invoker for F
where
    F: Fn(RpcRequest) -> Result<RpcResponse> + Send + Sync,
{
    fn invoke(&self, request: RpcRequest) -> Result<RpcResponse> {
        self(request)
    }
}

/// 过滤器元数据。
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FilterDescriptor {
    name: Cow<'static, str>,
    order: i32,
    consumer_active: bool,
    provider_active: bool,
}

impl FilterDescriptor {
    /// 构造未在任何一侧自动激活的描述，需通过选择串显式启用。
    pub fn new(name: impl Into<Cow<'static, str>>, order: i32) -> Self {
        Self {
            name: name.into(),
            order,
            consumer_active: false,
            provider_active: false,
        }
    }

    /// 在消费方自动激活。
    pub fn on_consumer(mut self) -> Self {
        self.consumer_active = true;
        self
    }

    /// 在提供方自动激活。
    pub fn on_provider(mut self) -> Self {
        self.provider_active = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 升序排列，越小越靠外层。
    pub fn order(&self) -> i32 {
        self.order
    }

    pub fn is_active(&self, side: Side) -> bool {
        match side {
            Side::Consumer => self.consumer_active,
            Side::Provider => self.provider_active,
        }
    }
}

/// 装配过滤链时可见的调用方信息，同时作为过滤器扩展的构造参数。
#[derive(Clone, Debug)]
pub struct InvokerContext {
    pub side: Side,
    pub descriptor: ServiceDescriptor,
    pub app_name: String,
}

impl InvokerContext {
    pub fn new(side: Side, descriptor: ServiceDescriptor) -> Self {
        let app_name = descriptor.app_name.clone();
        Self {
            side,
            descriptor,
            app_name,
        }
    }
}

/// 过滤器能力。
pub trait Filter: Send + Sync + 'static {
    fn descriptor(&self) -> FilterDescriptor;

    /// 是否装入当前调用方的链。默认装入。
    fn need_to_load(&self, context: &InvokerContext) -> bool {
        let _ = context;
        true
    }

    fn invoke(&self, next: &dyn Invoker, request: RpcRequest) -> Result<RpcResponse>;
}
