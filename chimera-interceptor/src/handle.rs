//! 客户端句柄
//!
//! 容器为每个受管实例安装一个 [`ClientHandle`]。业务调用经过句柄进入业务方法链，
//! 身份方法（相等、哈希、字符串表示）由句柄直接回答，生命周期事件通过显式触发器运行。
//!
//! 句柄是廉价可克隆的，克隆之间共享同一个受管实例、拦截器实例和链缓存。

use crate::chain::Chain;
use crate::class::{Instance, MethodSignature};
use crate::descriptor::CallbackKind;
use crate::error::{InterceptorError, InterceptorResult};
use crate::manager::{InterceptionManager, InterceptorInstances};
use crate::value::Value;
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// 身份方法
#[derive(Debug, Clone)]
pub enum IdentityCall {
    Equals(ClientHandle),
    HashCode,
    ToString,
}

/// 经过句柄的一次调用
#[derive(Debug, Clone)]
pub enum ProxyCall {
    /// 业务方法
    Business {
        signature: MethodSignature,
        args: Vec<Value>,
    },
    /// 超时方法
    Timeout {
        signature: MethodSignature,
        args: Vec<Value>,
        timer: Value,
    },
    /// 身份方法，不经过拦截链
    Identity(IdentityCall),
    /// 生命周期事件
    Lifecycle(CallbackKind),
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ChainRole {
    Invoke,
    Timeout,
}

struct HandleInner {
    id: u64,
    manager: Arc<InterceptionManager>,
    instances: InterceptorInstances,
    target: RwLock<Option<Instance>>,
    invoke_chains: RwLock<HashMap<MethodSignature, Arc<Chain>>>,
    timeout_chains: RwLock<HashMap<MethodSignature, Arc<Chain>>>,
}

/// 受管实例的客户端句柄
#[derive(Clone)]
pub struct ClientHandle {
    inner: Arc<HandleInner>,
}

impl ClientHandle {
    /// 创建句柄并为其创建拦截器实例，目标实例由 AROUND_CONSTRUCT 产生
    pub fn new(manager: Arc<InterceptionManager>) -> InterceptorResult<Self> {
        let instances = manager.create_interceptor_instances()?;
        Ok(Self {
            inner: Arc::new(HandleInner {
                id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
                manager,
                instances,
                target: RwLock::new(None),
                invoke_chains: RwLock::new(HashMap::new()),
                timeout_chains: RwLock::new(HashMap::new()),
            }),
        })
    }

    /// 为容器已经构造好的实例创建句柄
    pub fn with_target(manager: Arc<InterceptionManager>, target: Instance) -> InterceptorResult<Self> {
        let handle = Self::new(manager)?;
        *handle.inner.target.write() = Some(target);
        Ok(handle)
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn manager(&self) -> &Arc<InterceptionManager> {
        &self.inner.manager
    }

    pub fn interceptor_instances(&self) -> &InterceptorInstances {
        &self.inner.instances
    }

    /// 当前目标实例
    pub fn target(&self) -> Option<Instance> {
        self.inner.target.read().clone()
    }

    /// 以具体类型读取目标实例
    pub fn with_target_as<T: Any, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let target = self.target()?;
        target.downcast_ref::<T>().map(f)
    }

    fn require_target(&self) -> anyhow::Result<Instance> {
        self.target().ok_or_else(|| {
            InterceptorError::illegal_state(format!(
                "Component '{}' has not been constructed",
                self.inner.manager.component_name()
            ))
            .into()
        })
    }

    fn chain_for(&self, signature: &MethodSignature, role: ChainRole) -> InterceptorResult<Arc<Chain>> {
        let cache = match role {
            ChainRole::Invoke => &self.inner.invoke_chains,
            ChainRole::Timeout => &self.inner.timeout_chains,
        };
        if let Some(chain) = cache.read().get(signature) {
            return Ok(chain.clone());
        }

        let manager = &self.inner.manager;
        let method = manager.resolve_business_method(signature)?;
        let chain = Arc::new(match role {
            ChainRole::Invoke => manager.get_around_invoke_chain(&method)?,
            ChainRole::Timeout => manager.get_around_timeout_chain(&method)?,
        });

        // 并发构建时保留先写入的链
        let mut cache = cache.write();
        Ok(cache.entry(signature.clone()).or_insert(chain).clone())
    }

    /// 业务调用：经过业务方法链，目标抛出的错误原样返回
    pub fn invoke(&self, signature: &MethodSignature, args: Vec<Value>) -> anyhow::Result<Value> {
        let chain = self.chain_for(signature, ChainRole::Invoke)?;
        let target = self.require_target()?;
        self.inner
            .manager
            .invoke_business(&chain, &target, &self.inner.instances, args)
    }

    /// 超时调用：经过超时方法链
    pub fn invoke_timeout(
        &self,
        signature: &MethodSignature,
        args: Vec<Value>,
        timer: Value,
    ) -> anyhow::Result<Value> {
        let chain = self.chain_for(signature, ChainRole::Timeout)?;
        let target = self.require_target()?;
        self.inner
            .manager
            .invoke_timeout(&chain, &target, &self.inner.instances, args, timer)
    }

    /// 按调用类型分发
    pub fn dispatch(&self, call: ProxyCall) -> anyhow::Result<Value> {
        match call {
            ProxyCall::Business { signature, args } => self.invoke(&signature, args),
            ProxyCall::Timeout {
                signature,
                args,
                timer,
            } => self.invoke_timeout(&signature, args, timer),
            ProxyCall::Identity(IdentityCall::Equals(other)) => Ok(Value::Bool(*self == other)),
            ProxyCall::Identity(IdentityCall::HashCode) => Ok(Value::Int(self.hash_code())),
            ProxyCall::Identity(IdentityCall::ToString) => Ok(Value::Str(self.to_string())),
            ProxyCall::Lifecycle(kind) => {
                match kind {
                    CallbackKind::AroundConstruct => self.invoke_around_construct(Vec::new())?,
                    kind => self.run_lifecycle(kind)?,
                }
                Ok(Value::Null)
            }
        }
    }

    pub fn hash_code(&self) -> i32 {
        let id = self.inner.id;
        (id ^ (id >> 32)) as i32
    }

    fn run_lifecycle(&self, kind: CallbackKind) -> anyhow::Result<()> {
        // 不在持锁期间运行链
        let mut target = self.target();
        self.inner
            .manager
            .run_callback(kind, &mut target, &self.inner.instances)
    }

    /// 运行 AROUND_CONSTRUCT 链并保存构造出的目标实例
    pub fn invoke_around_construct(&self, args: Vec<Value>) -> anyhow::Result<()> {
        let target = self
            .inner
            .manager
            .run_around_construct(&self.inner.instances, args)?;
        *self.inner.target.write() = Some(target);
        Ok(())
    }

    pub fn invoke_post_construct(&self) -> anyhow::Result<()> {
        self.run_lifecycle(CallbackKind::PostConstruct)
    }

    pub fn invoke_pre_destroy(&self) -> anyhow::Result<()> {
        self.run_lifecycle(CallbackKind::PreDestroy)
    }

    pub fn invoke_pre_passivate(&self) -> anyhow::Result<()> {
        self.run_lifecycle(CallbackKind::PrePassivate)
    }

    pub fn invoke_post_activate(&self) -> anyhow::Result<()> {
        self.run_lifecycle(CallbackKind::PostActivate)
    }

    /// 已缓存的业务方法链数量
    pub fn cached_chains(&self) -> usize {
        self.inner.invoke_chains.read().len() + self.inner.timeout_chains.read().len()
    }
}

impl PartialEq for ClientHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for ClientHandle {}

impl Hash for ClientHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Display for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}Proxy#{}",
            self.inner.manager.bean_class().name().simple_name(),
            self.inner.id
        )
    }
}

impl fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandle")
            .field("id", &self.inner.id)
            .field("component", &self.inner.manager.component_name())
            .field("constructed", &self.inner.target.read().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::{ClassDef, ClassRegistry};
    use crate::descriptor::{ComponentDescriptor, InterceptorBinding};
    use crate::framework::FrameworkInterceptors;
    use crate::value::{ParamType, Primitive};

    struct Greeter;
    struct Upper;

    fn manager() -> Arc<InterceptionManager> {
        let registry = ClassRegistry::new()
            .with(
                ClassDef::new("demo.Greeter")
                    .constructor(|| Greeter)
                    .method("greet", vec![ParamType::String], |_this: &Greeter, args| {
                        Ok(Value::from(format!("hello {}", args[0])))
                    })
                    .method(
                        "tick",
                        vec![ParamType::Primitive(Primitive::Int)],
                        |_this: &Greeter, args| Ok(args[0].clone()),
                    ),
            )
            .with(
                ClassDef::new("demo.Upper")
                    .constructor(|| Upper)
                    .interceptor_method("around", |_this: &Upper, ctx| {
                        let result = ctx.proceed()?;
                        Ok(Value::from(result.to_string().to_uppercase()))
                    }),
            );
        let descriptor = ComponentDescriptor::new("greeter", "demo.Greeter")
            .interceptor(InterceptorBinding::new("demo.Upper").around_invoke("around").for_methods(["greet"]));
        Arc::new(
            InterceptionManager::build_chains(descriptor, FrameworkInterceptors::new(), Arc::new(registry))
                .unwrap(),
        )
    }

    #[test]
    fn test_business_call_through_chain() {
        let handle = ClientHandle::new(manager()).unwrap();
        handle.invoke_around_construct(Vec::new()).unwrap();

        let greet = MethodSignature::new("greet", vec![ParamType::String]);
        let result = handle.invoke(&greet, vec![Value::from("bob")]).unwrap();
        assert_eq!(result, Value::from("HELLO BOB"));

        let tick = MethodSignature::new("tick", vec![ParamType::Primitive(Primitive::Int)]);
        assert_eq!(handle.invoke(&tick, vec![Value::Int(3)]).unwrap(), Value::Int(3));
        assert_eq!(handle.cached_chains(), 2);

        handle.invoke(&greet, vec![Value::from("amy")]).unwrap();
        assert_eq!(handle.cached_chains(), 2);
    }

    #[test]
    fn test_call_before_construction_is_illegal_state() {
        let handle = ClientHandle::new(manager()).unwrap();
        let greet = MethodSignature::new("greet", vec![ParamType::String]);
        let err = handle.invoke(&greet, vec![Value::from("bob")]).unwrap_err();
        assert!(err
            .downcast_ref::<InterceptorError>()
            .map(InterceptorError::is_illegal_state)
            .unwrap_or(false));
    }

    #[test]
    fn test_unknown_method_is_dispatch_error() {
        let handle = ClientHandle::with_target(manager(), Arc::new(Greeter)).unwrap();
        let err = handle
            .invoke(&MethodSignature::no_args("wave"), Vec::new())
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<InterceptorError>(),
            Some(InterceptorError::Dispatch(_))
        ));
    }

    #[test]
    fn test_identity_calls_bypass_chains() {
        let manager = manager();
        let a = ClientHandle::new(manager.clone()).unwrap();
        let b = ClientHandle::new(manager).unwrap();

        let equals_self = a.dispatch(ProxyCall::Identity(IdentityCall::Equals(a.clone()))).unwrap();
        let equals_other = a.dispatch(ProxyCall::Identity(IdentityCall::Equals(b.clone()))).unwrap();
        assert_eq!(equals_self, Value::Bool(true));
        assert_eq!(equals_other, Value::Bool(false));

        let hash = a.dispatch(ProxyCall::Identity(IdentityCall::HashCode)).unwrap();
        assert_eq!(hash, Value::Int(a.hash_code()));

        let text = a.dispatch(ProxyCall::Identity(IdentityCall::ToString)).unwrap();
        assert!(text.as_str().unwrap_or_default().starts_with("GreeterProxy#"));
        assert_eq!(a.cached_chains(), 0);
    }

    #[test]
    fn test_lifecycle_dispatch_constructs_target() {
        let handle = ClientHandle::new(manager()).unwrap();
        assert!(handle.target().is_none());
        handle
            .dispatch(ProxyCall::Lifecycle(CallbackKind::AroundConstruct))
            .unwrap();
        assert!(handle.with_target_as(|_g: &Greeter| ()).is_some());
        handle.dispatch(ProxyCall::Lifecycle(CallbackKind::PreDestroy)).unwrap();
    }
}
