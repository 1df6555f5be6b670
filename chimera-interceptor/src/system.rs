//! 平台委托拦截器
//!
//! 一个保留的拦截器类，参与排序的方式与普通拦截器完全相同，但行为是延迟绑定的：
//! 每个钩子都转发给当前注册的 [`PlatformDelegate`]，未注册时直接 `proceed()`。
//!
//! 委托通过 [`crate::InterceptionManager::register_runtime_interceptor`] 安装，
//! 之后的链运行（包括已经创建的实例）都会路由到它。

use crate::class::{ClassDef, ClassRef};
use crate::context::InvocationContext;
use crate::descriptor::{CallbackKind, InterceptorBinding};
use crate::value::Value;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::sync::Arc;

/// 保留的平台委托拦截器类名
pub const SYSTEM_INTERCEPTOR_CLASS: &str = "chimera.interceptor.SystemInterceptorProxy";

/// 平台运行时提供的拦截逻辑
///
/// 每个钩子默认直接继续链
pub trait PlatformDelegate: Send + Sync {
    fn name(&self) -> &str {
        "platform-delegate"
    }

    fn around_construct(&self, ctx: &mut InvocationContext<'_>) -> anyhow::Result<Value> {
        ctx.proceed()
    }

    fn post_construct(&self, ctx: &mut InvocationContext<'_>) -> anyhow::Result<Value> {
        ctx.proceed()
    }

    fn pre_destroy(&self, ctx: &mut InvocationContext<'_>) -> anyhow::Result<Value> {
        ctx.proceed()
    }

    fn around_invoke(&self, ctx: &mut InvocationContext<'_>) -> anyhow::Result<Value> {
        ctx.proceed()
    }

    fn around_timeout(&self, ctx: &mut InvocationContext<'_>) -> anyhow::Result<Value> {
        ctx.proceed()
    }
}

/// 委托槽，由管理器持有并在所有代理实例之间共享
pub(crate) type DelegateSlot = Arc<RwLock<Option<Arc<dyn PlatformDelegate>>>>;

#[derive(Debug, Clone, Copy)]
enum Hook {
    AroundConstruct,
    PostConstruct,
    PreDestroy,
    AroundInvoke,
    AroundTimeout,
}

/// 平台委托拦截器实例
pub struct SystemInterceptorProxy {
    slot: DelegateSlot,
}

impl SystemInterceptorProxy {
    pub(crate) fn new(slot: DelegateSlot) -> Self {
        Self { slot }
    }

    /// 是否已经注册委托
    pub fn has_delegate(&self) -> bool {
        self.slot.read().is_some()
    }

    fn forward(&self, hook: Hook, ctx: &mut InvocationContext<'_>) -> anyhow::Result<Value> {
        // 先取出委托再调用，不在持锁期间运行链
        let delegate = self.slot.read().clone();
        match delegate {
            Some(delegate) => {
                tracing::trace!(delegate = delegate.name(), hook = ?hook, "Forwarding to platform delegate");
                match hook {
                    Hook::AroundConstruct => delegate.around_construct(ctx),
                    Hook::PostConstruct => delegate.post_construct(ctx),
                    Hook::PreDestroy => delegate.pre_destroy(ctx),
                    Hook::AroundInvoke => delegate.around_invoke(ctx),
                    Hook::AroundTimeout => delegate.around_timeout(ctx),
                }
            }
            None => ctx.proceed(),
        }
    }
}

static SYSTEM_CLASS: Lazy<ClassRef> = Lazy::new(|| {
    ClassDef::new(SYSTEM_INTERCEPTOR_CLASS)
        .interceptor_method("aroundConstruct", |this: &SystemInterceptorProxy, ctx| {
            this.forward(Hook::AroundConstruct, ctx)
        })
        .interceptor_method("postConstruct", |this: &SystemInterceptorProxy, ctx| {
            this.forward(Hook::PostConstruct, ctx)
        })
        .interceptor_method("preDestroy", |this: &SystemInterceptorProxy, ctx| {
            this.forward(Hook::PreDestroy, ctx)
        })
        .interceptor_method("aroundInvoke", |this: &SystemInterceptorProxy, ctx| {
            this.forward(Hook::AroundInvoke, ctx)
        })
        .interceptor_method("aroundTimeout", |this: &SystemInterceptorProxy, ctx| {
            this.forward(Hook::AroundTimeout, ctx)
        })
        .build()
});

/// 平台委托拦截器的类定义
pub(crate) fn system_class() -> ClassRef {
    SYSTEM_CLASS.clone()
}

pub(crate) fn is_system_class(class: &str) -> bool {
    class == SYSTEM_INTERCEPTOR_CLASS
}

/// 平台委托拦截器的绑定，声明全部五个钩子
pub fn system_binding() -> InterceptorBinding {
    InterceptorBinding::new(SYSTEM_INTERCEPTOR_CLASS)
        .callback(CallbackKind::AroundConstruct, "aroundConstruct")
        .callback(CallbackKind::PostConstruct, "postConstruct")
        .callback(CallbackKind::PreDestroy, "preDestroy")
        .around_invoke("aroundInvoke")
        .around_timeout("aroundTimeout")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::ParamShape;

    #[test]
    fn test_system_binding_hooks_resolve() {
        let class = system_class();
        let binding = system_binding();
        for kind in CallbackKind::ALL {
            for method in binding.callbacks_for(kind) {
                assert!(class.find_method(method, &ParamShape::Context).is_some());
            }
        }
        for method in binding.around_invoke.iter().chain(&binding.around_timeout) {
            assert!(class.find_method(method, &ParamShape::Context).is_some());
        }
        assert!(binding.callbacks_for(CallbackKind::PrePassivate).is_empty());
    }

    #[test]
    fn test_proxy_reports_delegate_presence() {
        struct Noop;
        impl PlatformDelegate for Noop {}

        let slot: DelegateSlot = Arc::new(RwLock::new(None));
        let proxy = SystemInterceptorProxy::new(slot.clone());
        assert!(!proxy.has_delegate());
        *slot.write() = Some(Arc::new(Noop));
        assert!(proxy.has_delegate());
        assert!(is_system_class(SYSTEM_INTERCEPTOR_CLASS));
    }
}
