//! Chimera Interceptor - 拦截器链与生命周期回调引擎
//!
//! 为受管组件的业务方法调用和构造、销毁事件织入有序的拦截器链：
//! - 框架拦截器与组件拦截器的确定性排序
//! - AROUND_CONSTRUCT、POST_CONSTRUCT、PRE_DESTROY、PRE_PASSIVATE、POST_ACTIVATE 生命周期链
//! - 业务方法（around-invoke）与超时方法（around-timeout）链
//! - 可替换参数的调用上下文，错误原样透传
//! - 延迟绑定的平台委托拦截器
//!
//! # 示例
//!
//! ```ignore
//! use chimera_interceptor::prelude::*;
//!
//! let registry = Arc::new(ClassRegistry::new().with(order_bean()).with(tx_interceptor()));
//! let descriptor = ComponentDescriptor::new("orders", "shop.OrderBean")
//!     .interceptor(InterceptorBinding::new("shop.TxInterceptor").around_invoke("around"));
//!
//! let manager = Arc::new(InterceptionManager::builder(descriptor, registry).build()?);
//! let handle = ClientHandle::new(manager)?;
//! handle.invoke_around_construct(vec![])?;
//! handle.invoke_post_construct()?;
//!
//! let total = handle.invoke(&MethodSignature::no_args("total"), vec![])?;
//! ```

pub mod chain;
pub mod class;
pub mod config;
pub mod context;
pub mod descriptor;
pub mod error;
pub mod framework;
pub mod handle;
pub mod logging;
pub mod manager;
pub mod system;
pub mod value;

// 重新导出核心类型
pub use chain::{Chain, ChainElement, ChainKind, ElementTarget};
pub use class::{
    ClassDef, ClassName, ClassRef, ClassRegistry, Constructor, DispatchFacility, Instance,
    MethodArgs, MethodRef, MethodSignature, ParamShape,
};
pub use config::InterceptorSettings;
pub use context::InvocationContext;
pub use descriptor::{CallbackKind, ComponentDescriptor, InterceptorBinding};
pub use error::{DispatchError, InterceptorError, InterceptorResult};
pub use framework::{FrameworkInterceptorRegistration, FrameworkInterceptors};
pub use handle::{ClientHandle, IdentityCall, ProxyCall};
pub use logging::{LogFormat, LogLevel, LoggingConfig};
pub use manager::{
    InterceptionManager, InterceptionManagerBuilder, InterceptorInstanceTable, InterceptorInstances,
};
pub use system::{system_binding, PlatformDelegate, SystemInterceptorProxy, SYSTEM_INTERCEPTOR_CLASS};
pub use value::{FromValue, ObjectValue, ParamType, Primitive, Value, ValueType};

// 导出 inventory 供宏使用
pub use inventory;

/// 预导入模块
pub mod prelude {
    pub use crate::chain::{Chain, ChainKind};
    pub use crate::class::{
        ClassDef, ClassName, ClassRegistry, Constructor, DispatchFacility, Instance, MethodSignature,
    };
    pub use crate::config::InterceptorSettings;
    pub use crate::context::InvocationContext;
    pub use crate::descriptor::{CallbackKind, ComponentDescriptor, InterceptorBinding};
    pub use crate::error::{InterceptorError, InterceptorResult};
    pub use crate::framework::FrameworkInterceptors;
    pub use crate::handle::{ClientHandle, ProxyCall};
    pub use crate::manager::InterceptionManager;
    pub use crate::system::PlatformDelegate;
    pub use crate::value::{FromValue, ParamType, Primitive, Value, ValueType};
    pub use crate::submit_framework_interceptor;
    pub use std::sync::Arc;
}
