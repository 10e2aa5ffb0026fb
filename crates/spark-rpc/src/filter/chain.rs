use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Result, RpcError};
use crate::extension::ExtensionLoader;
use crate::invocation::{RpcRequest, RpcResponse, Side};
use crate::overrides::apply_override;

use super::{Filter, Invoker, InvokerContext};

/// 装配完成的过滤链，本身也是一个 [`Invoker`]。
///
/// # 装配步骤（How）
/// 1. 逐个构造加载器中的过滤器，记下在当前侧自动激活的别名，每个别名在一次装配中只构造一次；
/// 2. 以覆盖语法应用选择串（`"-logging"` 排除某个过滤器，`"-*"` 排除全部自动激活项，
///    其余别名为显式启用）；
/// 3. 追加自定义过滤器，剔除 `need_to_load` 为 `false` 的过滤器；
/// 4. 按 `order` 稳定升序排序，由外到内依次链接到终端调用器。
pub struct FilterChain {
    side: Side,
    names: Vec<String>,
    head: Arc<dyn Invoker>,
}

impl fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterChain")
            .field("side", &self.side)
            .field("names", &self.names)
            .finish()
    }
}

impl FilterChain {
    pub fn build(
        loader: &ExtensionLoader<dyn Filter, InvokerContext>,
        context: &InvokerContext,
        selection: &str,
        custom: &[Arc<dyn Filter>],
        terminal: Arc<dyn Invoker>,
    ) -> Result<Self> {
        // 每个别名只构造一次：判定激活时取得的实例直接进入链中。
        let mut built: HashMap<String, Arc<dyn Filter>> = HashMap::new();
        let mut selected = Vec::new();
        for alias in loader.aliases() {
            let filter = loader.get(&alias, context)?;
            if filter.descriptor().is_active(context.side) {
                selected.push(alias.clone());
            }
            built.insert(alias, filter);
        }
        apply_override(&mut selected, selection);

        let mut filters: Vec<Arc<dyn Filter>> = Vec::with_capacity(selected.len() + custom.len());
        for alias in &selected {
            let filter = match built.remove(alias) {
                Some(filter) => filter,
                None => loader.get(alias, context)?,
            };
            filters.push(filter);
        }
        filters.extend(custom.iter().cloned());
        filters.retain(|filter| filter.need_to_load(context));
        filters.sort_by_key(|filter| filter.descriptor().order());

        let names: Vec<String> = filters
            .iter()
            .map(|filter| filter.descriptor().name().to_owned())
            .collect();
        tracing::debug!(
            service = %context.descriptor,
            side = %context.side,
            filters = ?names,
            "filter chain built"
        );

        let head = filters.into_iter().rev().fold(terminal, |next, filter| {
            Arc::new(FilterNode {
                side: context.side,
                name: filter.descriptor().name().to_owned(),
                filter,
                next,
            }) as Arc<dyn Invoker>
        });
        Ok(Self {
            side: context.side,
            names,
            head,
        })
    }

    pub fn side(&self) -> Side {
        self.side
    }

    /// 链中过滤器名称，由外到内。
    pub fn names(&self) -> &[String] {
        &self.names
    }
}

impl Invoker for FilterChain {
    fn invoke(&self, request: RpcRequest) -> Result<RpcResponse> {
        self.head.invoke(request)
    }
}

struct FilterNode {
    side: Side,
    name: String,
    filter: Arc<dyn Filter>,
    next: Arc<dyn Invoker>,
}

impl Invoker for FilterNode {
    fn invoke(&self, request: RpcRequest) -> Result<RpcResponse> {
        let downstream = Downstream {
            next: self.next.as_ref(),
            failed: AtomicBool::new(false),
        };
        match self.filter.invoke(&downstream, request) {
            Ok(response) => Ok(response),
            Err(err) if downstream.failed.load(Ordering::Relaxed) => Err(err),
            Err(err) => Err(RpcError::filter(self.side, self.name.as_str(), err)),
        }
    }
}

/// 记录下游是否失败，用来区分过滤器自身的错误与透传的下游错误。
struct Downstream<'a> {
    next: &'a dyn Invoker,
    failed: AtomicBool,
}

impl Invoker for Downstream<'_> {
    fn invoke(&self, request: RpcRequest) -> Result<RpcResponse> {
        let result = self.next.invoke(request);
        if result.is_err() {
            self.failed.store(true, Ordering::Relaxed);
        }
        result
    }
}
