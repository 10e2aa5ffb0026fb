//! 调用过滤链装配与错误归类验证
//!
//! # 教案级注释概览
//!
//! - **核心目标 (Why)**：过滤器的执行顺序只能由 `order` 决定，且同序时保持注册顺序；
//!   过滤器自己产生的错误必须与下游透传的错误区分开，否则调用方无法判断该重试还是该修配置。
//! - **结构说明 (How)**：
//!   - `Recording` 过滤器把自身名称写入共享日志后调用下游，据此观察实际执行顺序；
//!   - `Failing` 过滤器不调用下游，直接返回错误；
//!   - `Rewriting` 过滤器调用下游后把错误替换成另一种错误，用来验证「下游失败即透传」；
//!   - `prop_chain_is_stably_sorted_by_order` 以随机 `order` 校验稳定排序。
//! - **合同与边界 (What)**：终端调用器是本地闭包，不经过序列化与传输。

use std::sync::Arc;

use parking_lot::Mutex;
use proptest::prelude::*;
use spark_rpc::{
    ExtensionDefinition, ExtensionLoader, Filter, FilterChain, FilterDescriptor, Invoker,
    InvokerContext, Result, RpcError, RpcRequest, RpcResponse, ServiceDescriptor, Side,
};

type Journal = Arc<Mutex<Vec<String>>>;

struct Recording {
    name: &'static str,
    order: i32,
    journal: Journal,
}

impl Filter for Recording {
    fn descriptor(&self) -> FilterDescriptor {
        FilterDescriptor::new(self.name, self.order)
            .on_consumer()
            .on_provider()
    }

    fn invoke(&self, next: &dyn Invoker, request: RpcRequest) -> Result<RpcResponse> {
        self.journal.lock().push(self.name.to_owned());
        next.invoke(request)
    }
}

struct ProviderOnly;

impl Filter for ProviderOnly {
    fn descriptor(&self) -> FilterDescriptor {
        FilterDescriptor::new("provider_only", 0).on_consumer()
    }

    fn need_to_load(&self, context: &InvokerContext) -> bool {
        context.side == Side::Provider
    }

    fn invoke(&self, next: &dyn Invoker, request: RpcRequest) -> Result<RpcResponse> {
        next.invoke(request)
    }
}

struct Failing;

impl Filter for Failing {
    fn descriptor(&self) -> FilterDescriptor {
        FilterDescriptor::new("auth", -11_000)
    }

    fn invoke(&self, _next: &dyn Invoker, _request: RpcRequest) -> Result<RpcResponse> {
        Err(RpcError::internal("token rejected"))
    }
}

struct Rewriting;

impl Filter for Rewriting {
    fn descriptor(&self) -> FilterDescriptor {
        FilterDescriptor::new("rewrite", -19_500)
    }

    fn invoke(&self, next: &dyn Invoker, request: RpcRequest) -> Result<RpcResponse> {
        next.invoke(request)
            .map_err(|err| RpcError::internal(format!("rewritten: {err}")))
    }
}

fn context(side: Side) -> InvokerContext {
    InvokerContext::new(side, ServiceDescriptor::new("com.demo.Echo", "bolt"))
}

fn ok_terminal(journal: Journal) -> Arc<dyn Invoker> {
    Arc::new(move |_: RpcRequest| -> Result<RpcResponse> {
        journal.lock().push("terminal".to_owned());
        Ok(RpcResponse::empty())
    })
}

fn failing_terminal() -> Arc<dyn Invoker> {
    Arc::new(|_: RpcRequest| -> Result<RpcResponse> {
        Err(RpcError::NoAvailableProvider {
            service: "com.demo.Echo".into(),
        })
    })
}

fn recording_loader(journal: &Journal) -> ExtensionLoader<dyn Filter, InvokerContext> {
    let loader = ExtensionLoader::new("filter");
    for (name, order) in [("metrics", -7_000), ("trace", -19_500), ("auth", -11_000)] {
        let journal = Arc::clone(journal);
        loader.register(
            ExtensionDefinition::new(name, move |_: &InvokerContext| {
                Ok(Arc::new(Recording {
                    name,
                    order,
                    journal: Arc::clone(&journal),
                }) as Arc<dyn Filter>)
            })
            .with_order(order),
        );
    }
    loader
}

#[test]
fn filters_run_in_ascending_order() {
    let journal: Journal = Arc::default();
    let loader = recording_loader(&journal);
    let chain = FilterChain::build(
        &loader,
        &context(Side::Consumer),
        "",
        &[],
        ok_terminal(Arc::clone(&journal)),
    )
    .unwrap();

    assert_eq!(chain.names(), ["trace", "auth", "metrics"]);
    chain.invoke(RpcRequest::new("com.demo.Echo", "echo")).unwrap();
    assert_eq!(
        *journal.lock(),
        ["trace", "auth", "metrics", "terminal"],
        "order 越小越靠外层，最先执行"
    );
}

#[test]
fn selection_can_exclude_and_custom_filters_join() {
    let journal: Journal = Arc::default();
    let loader = recording_loader(&journal);
    let custom: Arc<dyn Filter> = Arc::new(Recording {
        name: "custom",
        order: -8_000,
        journal: Arc::clone(&journal),
    });
    let chain = FilterChain::build(
        &loader,
        &context(Side::Provider),
        "-auth",
        &[custom],
        ok_terminal(Arc::clone(&journal)),
    )
    .unwrap();
    assert_eq!(chain.names(), ["trace", "custom", "metrics"]);
    assert_eq!(chain.side(), Side::Provider);
}

#[test]
fn filters_declining_to_load_are_skipped() {
    let journal: Journal = Arc::default();
    let loader = recording_loader(&journal);
    loader.register(ExtensionDefinition::new("provider_only", |_: &InvokerContext| {
        Ok(Arc::new(ProviderOnly) as Arc<dyn Filter>)
    }));

    let consumer = FilterChain::build(
        &loader,
        &context(Side::Consumer),
        "",
        &[],
        ok_terminal(Arc::clone(&journal)),
    )
    .unwrap();
    assert!(!consumer.names().iter().any(|name| name == "provider_only"));

    let provider = FilterChain::build(
        &loader,
        &context(Side::Provider),
        "provider_only",
        &[],
        ok_terminal(Arc::clone(&journal)),
    )
    .unwrap();
    assert!(provider.names().iter().any(|name| name == "provider_only"));
}

#[test]
fn own_failure_is_classified_by_side() {
    let loader = ExtensionLoader::new("filter");
    let failing: Arc<dyn Filter> = Arc::new(Failing);

    let consumer = FilterChain::build(
        &loader,
        &context(Side::Consumer),
        "",
        &[Arc::clone(&failing)],
        failing_terminal(),
    )
    .unwrap();
    let err = consumer
        .invoke(RpcRequest::new("com.demo.Echo", "echo"))
        .expect_err("过滤器自身失败");
    assert_eq!(err.code(), "rpc.filter.client");
    assert!(err.to_string().contains("auth"), "错误信息应带上过滤器名称: {err}");
    let source = std::error::Error::source(&err).expect("应保留原始错误");
    assert!(source.to_string().contains("token rejected"));

    let provider = FilterChain::build(
        &loader,
        &context(Side::Provider),
        "",
        &[failing],
        failing_terminal(),
    )
    .unwrap();
    let err = provider
        .invoke(RpcRequest::new("com.demo.Echo", "echo"))
        .expect_err("过滤器自身失败");
    assert_eq!(err.code(), "rpc.filter.provider");
}

#[test]
fn downstream_failure_passes_through_unchanged() {
    let journal: Journal = Arc::default();
    let loader = recording_loader(&journal);
    let chain = FilterChain::build(
        &loader,
        &context(Side::Consumer),
        "",
        &[],
        failing_terminal(),
    )
    .unwrap();
    let err = chain
        .invoke(RpcRequest::new("com.demo.Echo", "echo"))
        .expect_err("终端失败");
    assert_eq!(err.code(), "rpc.routing.no_provider", "下游错误不应被包装");

    let rewriting = FilterChain::build(
        &ExtensionLoader::new("filter"),
        &context(Side::Consumer),
        "",
        &[Arc::new(Rewriting) as Arc<dyn Filter>],
        failing_terminal(),
    )
    .unwrap();
    let err = rewriting
        .invoke(RpcRequest::new("com.demo.Echo", "echo"))
        .expect_err("终端失败");
    assert_eq!(err.code(), "rpc.internal", "下游已失败时，过滤器返回的错误原样透传");
}

#[test]
fn outer_filter_sees_inner_failure_as_downstream() {
    let chain = FilterChain::build(
        &ExtensionLoader::new("filter"),
        &context(Side::Consumer),
        "",
        &[
            Arc::new(Rewriting) as Arc<dyn Filter>,
            Arc::new(Failing) as Arc<dyn Filter>,
        ],
        failing_terminal(),
    )
    .unwrap();
    assert_eq!(chain.names(), ["rewrite", "auth"]);
    let err = chain
        .invoke(RpcRequest::new("com.demo.Echo", "echo"))
        .expect_err("内层过滤器失败");
    assert_eq!(err.code(), "rpc.internal");
    assert!(err.to_string().contains("client filter `auth` failed"));
}

struct Ordered {
    name: String,
    order: i32,
}

impl Filter for Ordered {
    fn descriptor(&self) -> FilterDescriptor {
        FilterDescriptor::new(self.name.clone(), self.order)
    }

    fn invoke(&self, next: &dyn Invoker, request: RpcRequest) -> Result<RpcResponse> {
        next.invoke(request)
    }
}

proptest! {
    #[test]
    fn prop_chain_is_stably_sorted_by_order(orders in prop::collection::vec(-3i32..3, 0..12)) {
        let custom: Vec<Arc<dyn Filter>> = orders
            .iter()
            .enumerate()
            .map(|(index, order)| {
                Arc::new(Ordered { name: format!("f{index}"), order: *order }) as Arc<dyn Filter>
            })
            .collect();
        let chain = FilterChain::build(
            &ExtensionLoader::new("filter"),
            &context(Side::Consumer),
            "",
            &custom,
            ok_terminal(Arc::default()),
        )
        .unwrap();

        let mut expected: Vec<(i32, usize)> =
            orders.iter().copied().enumerate().map(|(index, order)| (order, index)).collect();
        expected.sort();
        let expected: Vec<String> = expected.into_iter().map(|(_, index)| format!("f{index}")).collect();
        prop_assert_eq!(chain.names(), expected.as_slice());
    }
}
