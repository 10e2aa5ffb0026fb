use std::time::Instant;

use crate::error::Result;
use crate::invocation::{RpcRequest, RpcResponse, Side};

use super::{Filter, FilterDescriptor, Invoker, InvokerContext};

pub const CONTEXT_FILTER: &str = "context";
pub const CONTEXT_FILTER_ORDER: i32 = -19_500;
pub const LOGGING_FILTER: &str = "logging";
pub const LOGGING_FILTER_ORDER: i32 = -7_000;

/// 发起方应用名。
pub const ATTACHMENT_APP_NAME: &str = "app_name";
/// 写入附件的一侧标识。
pub const ATTACHMENT_SIDE: &str = "side";

/// 上下文透传过滤器。
///
/// 消费方在请求附件中写入本应用名与 `side`；提供方在响应附件中写入自身应用名与 `side`。
/// 应用名为空时不写入应用名。
#[derive(Debug)]
pub struct ContextFilter {
    side: Side,
    app_name: String,
}

impl ContextFilter {
    pub fn new(context: &InvokerContext) -> Self {
        Self {
            side: context.side,
            app_name: context.app_name.clone(),
        }
    }
}

impl Filter for ContextFilter {
    fn descriptor(&self) -> FilterDescriptor {
        FilterDescriptor::new(CONTEXT_FILTER, CONTEXT_FILTER_ORDER)
            .on_consumer()
            .on_provider()
    }

    fn invoke(&self, next: &dyn Invoker, mut request: RpcRequest) -> Result<RpcResponse> {
        match self.side {
            Side::Consumer => {
                if !self.app_name.is_empty() {
                    request.attach(ATTACHMENT_APP_NAME, self.app_name.as_str());
                }
                request.attach(ATTACHMENT_SIDE, self.side.as_str());
                next.invoke(request)
            }
            Side::Provider => {
                let mut response = next.invoke(request)?;
                if !self.app_name.is_empty() {
                    response
                        .attachments
                        .insert(ATTACHMENT_APP_NAME.to_owned(), self.app_name.clone());
                }
                response
                    .attachments
                    .insert(ATTACHMENT_SIDE.to_owned(), self.side.as_str().to_owned());
                Ok(response)
            }
        }
    }
}

/// 每次调用输出一条 `debug` 事件，携带耗时与结果。
#[derive(Debug)]
pub struct LoggingFilter {
    side: Side,
}

impl LoggingFilter {
    pub fn new(context: &InvokerContext) -> Self {
        Self { side: context.side }
    }
}

impl Filter for LoggingFilter {
    fn descriptor(&self) -> FilterDescriptor {
        FilterDescriptor::new(LOGGING_FILTER, LOGGING_FILTER_ORDER)
            .on_consumer()
            .on_provider()
    }

    fn invoke(&self, next: &dyn Invoker, request: RpcRequest) -> Result<RpcResponse> {
        let service = request.service.clone();
        let method = request.method.clone();
        let started = Instant::now();
        let result = next.invoke(request);
        tracing::debug!(
            side = %self.side,
            service = %service,
            method = %method,
            elapsed_us = started.elapsed().as_micros() as u64,
            ok = result.is_ok(),
            "rpc invocation finished"
        );
        result
    }
}
