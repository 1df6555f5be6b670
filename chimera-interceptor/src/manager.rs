//! 拦截管理器
//!
//! 部署期根据组件描述和框架拦截器构建全部拦截链，并作为运行链的唯一入口。
//!
//! 生命周期链的元素顺序：
//! 1. 框架拦截器（按配置顺序），每个绑定为该事件声明的每个方法各一个元素
//! 2. 组件级拦截器（按描述中的顺序），规则相同
//! 3. 组件类自身声明的回调（组件级元素，每种事件最多一个）
//! 4. 旧式命名回调（`ejbCreate` 等），最多一个，且仅当组件类没有声明同类回调时加入；
//!    POST_CONSTRUCT 还要求此前的元素个数等于框架拦截器贡献的个数
//!
//! 业务方法链和超时方法链按方法按需构建，由 [`crate::ClientHandle`] 缓存。

use crate::chain::{Chain, ChainElement};
use crate::class::{ClassName, ClassRef, Constructor, DispatchFacility, Instance, MethodRef, MethodSignature, ParamShape};
use crate::config::InterceptorSettings;
use crate::context::InvocationContext;
use crate::descriptor::{CallbackKind, ComponentDescriptor, InterceptorBinding};
use crate::error::{DispatchError, InterceptorError, InterceptorResult};
use crate::framework::FrameworkInterceptors;
use crate::system::{is_system_class, system_class, DelegateSlot, PlatformDelegate, SystemInterceptorProxy};
use crate::value::{check_parameters, Value};
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// 拦截器类到实例下标的映射，构建后只读
#[derive(Debug, Default)]
pub struct InterceptorInstanceTable {
    classes: Vec<ClassRef>,
    index: HashMap<ClassName, usize>,
}

impl InterceptorInstanceTable {
    /// 插入类并返回下标，已存在的类返回原下标
    fn insert(&mut self, class: ClassRef) -> usize {
        if let Some(&index) = self.index.get(class.name()) {
            return index;
        }
        let index = self.classes.len();
        self.index.insert(class.name().clone(), index);
        self.classes.push(class);
        index
    }

    pub fn index_of(&self, class: &str) -> Option<usize> {
        self.index.get(class).copied()
    }

    pub fn class(&self, index: usize) -> Option<&ClassRef> {
        self.classes.get(index)
    }

    pub fn classes(&self) -> &[ClassRef] {
        &self.classes
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

/// 一个受管实例的拦截器实例数组，由该实例的所有链共享
#[derive(Clone, Default)]
pub struct InterceptorInstances {
    instances: Vec<Instance>,
    system_slots: Vec<usize>,
}

impl InterceptorInstances {
    pub fn from_instances(instances: Vec<Instance>) -> Self {
        Self {
            instances,
            system_slots: Vec::new(),
        }
    }

    pub fn get(&self, index: usize) -> Option<&Instance> {
        self.instances.get(index)
    }

    /// 以具体类型访问拦截器实例
    pub fn get_as<T: Any>(&self, index: usize) -> Option<&T> {
        self.instances.get(index).and_then(|i| i.downcast_ref::<T>())
    }

    /// 平台委托拦截器实例
    pub fn system_proxy(&self) -> Option<&SystemInterceptorProxy> {
        self.system_slots
            .first()
            .and_then(|&slot| self.get_as::<SystemInterceptorProxy>(slot))
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

impl fmt::Debug for InterceptorInstances {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorInstances")
            .field("len", &self.instances.len())
            .field("system_slots", &self.system_slots)
            .finish()
    }
}

/// 已解析到实例表的绑定
#[derive(Debug)]
struct ResolvedBinding {
    binding: InterceptorBinding,
    index: usize,
}

/// 拦截管理器构建器
pub struct InterceptionManagerBuilder {
    descriptor: ComponentDescriptor,
    facility: Arc<dyn DispatchFacility>,
    framework: FrameworkInterceptors,
    constructor: Option<Constructor>,
    settings: InterceptorSettings,
}

impl InterceptionManagerBuilder {
    /// 框架拦截器
    pub fn framework(mut self, framework: FrameworkInterceptors) -> Self {
        self.framework = framework;
        self
    }

    /// 容器提供的构造动作（AROUND_CONSTRUCT 的终止动作），默认使用组件类的无参构造
    pub fn constructor(mut self, constructor: Constructor) -> Self {
        self.constructor = Some(constructor);
        self
    }

    pub fn settings(mut self, settings: InterceptorSettings) -> Self {
        self.settings = settings;
        self
    }

    /// 构建全部生命周期链
    pub fn build(self) -> InterceptorResult<InterceptionManager> {
        let Self {
            descriptor,
            facility,
            framework,
            constructor,
            settings,
        } = self;

        let bean_class = facility.load_class(&descriptor.bean_class).map_err(|e| {
            InterceptorError::configuration(format!(
                "Cannot load bean class '{}' for component '{}': {}",
                descriptor.bean_class, descriptor.name, e
            ))
        })?;
        check_bean_level(&descriptor)?;

        let mut table = InterceptorInstanceTable::default();
        let mut framework_bindings = Vec::new();
        for binding in framework.bindings() {
            if settings.is_disabled(binding.class.as_str()) {
                tracing::debug!("Framework interceptor '{}' disabled by settings", binding.class);
                continue;
            }
            let index = table.insert(load_interceptor_class(facility.as_ref(), &binding.class)?);
            framework_bindings.push(ResolvedBinding {
                binding: binding.clone(),
                index,
            });
        }

        let mut component_bindings = Vec::new();
        for binding in &descriptor.interceptors {
            let index = table.insert(load_interceptor_class(facility.as_ref(), &binding.class)?);
            component_bindings.push(ResolvedBinding {
                binding: binding.clone(),
                index,
            });
        }

        let constructor = constructor.or_else(|| bean_class.no_arg_constructor().cloned());
        let legacy_callbacks = settings.legacy_callbacks && descriptor.legacy_callbacks;

        let mut manager = InterceptionManager {
            descriptor,
            facility,
            bean_class,
            table,
            framework_bindings,
            component_bindings,
            callback_chains: HashMap::new(),
            constructor,
            legacy_callbacks,
            delegate: Arc::new(RwLock::new(None)),
        };

        for kind in CallbackKind::ALL {
            if let Some(chain) = manager.build_callback_chain(kind)? {
                tracing::debug!(
                    component = %manager.descriptor.name,
                    "{} chain: {:?}",
                    kind,
                    chain.describe()
                );
                manager.callback_chains.insert(kind, Arc::new(chain));
            }
        }

        tracing::info!(
            component = %manager.descriptor.name,
            interceptors = manager.table.len(),
            lifecycle_chains = manager.callback_chains.len(),
            "Interceptor chains built"
        );

        Ok(manager)
    }
}

/// 每种事件最多一个组件级元素
fn check_bean_level(descriptor: &ComponentDescriptor) -> InterceptorResult<()> {
    let around = [
        ("AROUND_INVOKE", &descriptor.bean_around_invoke),
        ("AROUND_TIMEOUT", &descriptor.bean_around_timeout),
    ];
    let callbacks = descriptor
        .bean_callbacks
        .iter()
        .map(|(kind, methods)| (kind.to_string(), methods));

    for (role, methods) in around
        .into_iter()
        .map(|(role, methods)| (role.to_string(), methods))
        .chain(callbacks)
    {
        if methods.len() > 1 {
            return Err(InterceptorError::configuration(format!(
                "Bean class '{}' of component '{}' declares {} {} methods {:?}, at most one is allowed",
                descriptor.bean_class,
                descriptor.name,
                methods.len(),
                role,
                methods
            )));
        }
    }
    Ok(())
}

fn load_interceptor_class(
    facility: &dyn DispatchFacility,
    class: &ClassName,
) -> InterceptorResult<ClassRef> {
    if is_system_class(class.as_str()) {
        return Ok(system_class());
    }
    facility.load_class(class).map_err(|e| {
        InterceptorError::configuration(format!(
            "Cannot load interceptor class '{}': {}",
            class, e
        ))
    })
}

/// 拦截管理器
pub struct InterceptionManager {
    descriptor: ComponentDescriptor,
    facility: Arc<dyn DispatchFacility>,
    bean_class: ClassRef,
    table: InterceptorInstanceTable,
    framework_bindings: Vec<ResolvedBinding>,
    component_bindings: Vec<ResolvedBinding>,
    callback_chains: HashMap<CallbackKind, Arc<Chain>>,
    constructor: Option<Constructor>,
    legacy_callbacks: bool,
    delegate: DelegateSlot,
}

impl InterceptionManager {
    pub fn builder(
        descriptor: ComponentDescriptor,
        facility: Arc<dyn DispatchFacility>,
    ) -> InterceptionManagerBuilder {
        InterceptionManagerBuilder {
            descriptor,
            facility,
            framework: FrameworkInterceptors::new(),
            constructor: None,
            settings: InterceptorSettings::default(),
        }
    }

    /// 使用默认设置、不带框架拦截器构建
    pub fn build_chains(
        descriptor: ComponentDescriptor,
        framework: FrameworkInterceptors,
        facility: Arc<dyn DispatchFacility>,
    ) -> InterceptorResult<Self> {
        Self::builder(descriptor, facility).framework(framework).build()
    }

    fn bindings(&self) -> impl Iterator<Item = &ResolvedBinding> {
        self.framework_bindings
            .iter()
            .chain(self.component_bindings.iter())
    }

    fn interceptor_class(&self, index: usize) -> InterceptorResult<&ClassRef> {
        self.table.class(index).ok_or_else(|| {
            InterceptorError::configuration(format!("No interceptor class at index {}", index))
        })
    }

    fn resolve_interceptor_method(
        &self,
        resolved: &ResolvedBinding,
        method: &str,
        role: &str,
    ) -> InterceptorResult<MethodRef> {
        let class = self.interceptor_class(resolved.index)?;
        self.facility
            .resolve_method(class, method, &ParamShape::Context)
            .map_err(|e| {
                InterceptorError::configuration(format!(
                    "{} method '{}' cannot be resolved on interceptor '{}': {}",
                    role, method, resolved.binding.class, e
                ))
            })
    }

    /// 组件类上的回调可以无参，也可以接收调用上下文
    fn resolve_bean_callback(&self, method: &str, role: &str) -> InterceptorResult<MethodRef> {
        self.facility
            .resolve_method(&self.bean_class, method, &ParamShape::none())
            .or_else(|_| {
                self.facility
                    .resolve_method(&self.bean_class, method, &ParamShape::Context)
            })
            .map_err(|e| {
                InterceptorError::configuration(format!(
                    "{} method '{}' cannot be resolved on bean class '{}': {}",
                    role,
                    method,
                    self.bean_class.name(),
                    e
                ))
            })
    }

    fn build_callback_chain(&self, kind: CallbackKind) -> InterceptorResult<Option<Chain>> {
        let role = kind.to_string();
        let mut elements = Vec::new();

        for resolved in &self.framework_bindings {
            for method in resolved.binding.callbacks_for(kind) {
                let method = self.resolve_interceptor_method(resolved, method, &role)?;
                elements.push(ChainElement::interceptor(resolved.index, method));
            }
        }
        let baseline = elements.len();

        for resolved in &self.component_bindings {
            for method in resolved.binding.callbacks_for(kind) {
                let method = self.resolve_interceptor_method(resolved, method, &role)?;
                elements.push(ChainElement::interceptor(resolved.index, method));
            }
        }

        if kind.allows_bean_level() {
            let declared = self.descriptor.bean_callbacks_for(kind);
            for method in declared {
                let method = self.resolve_bean_callback(method, &role)?;
                elements.push(ChainElement::bean(method));
            }

            if let Some(legacy) = self.legacy_callback(kind) {
                if !declared.is_empty() {
                    tracing::warn!(
                        component = %self.descriptor.name,
                        method = legacy.name(),
                        "Legacy {} callback ignored, bean declares an explicit callback",
                        kind
                    );
                } else if kind == CallbackKind::PostConstruct && elements.len() != baseline {
                    tracing::warn!(
                        component = %self.descriptor.name,
                        method = legacy.name(),
                        "Legacy {} callback ignored, component interceptors already handle it",
                        kind
                    );
                } else {
                    elements.push(ChainElement::bean(legacy));
                }
            }
        }

        if elements.is_empty() {
            return Ok(None);
        }
        Ok(Some(Chain::callback(kind, elements)))
    }

    fn legacy_callback(&self, kind: CallbackKind) -> Option<MethodRef> {
        if !self.legacy_callbacks {
            return None;
        }
        let name = kind.legacy_method_name()?;
        self.bean_class.find_method(name, &ParamShape::none()).cloned()
    }

    /// 为受管实例创建拦截器实例数组
    ///
    /// 每个实例表条目创建一个对象；只有带参构造的类会被拒绝
    pub fn create_interceptor_instances(&self) -> InterceptorResult<InterceptorInstances> {
        let mut instances = Vec::with_capacity(self.table.len());
        let mut system_slots = Vec::new();

        for (index, class) in self.table.classes().iter().enumerate() {
            if is_system_class(class.name().as_str()) {
                instances.push(Arc::new(SystemInterceptorProxy::new(self.delegate.clone())) as Instance);
                system_slots.push(index);
                continue;
            }

            let instance = self.facility.instantiate_no_arg(class).map_err(|e| match e {
                DispatchError::NoDefaultConstructor(class) => InterceptorError::configuration(format!(
                    "Interceptor class '{}' must declare a no-argument constructor",
                    class
                )),
                other => InterceptorError::configuration(format!(
                    "Failed to instantiate interceptor '{}': {}",
                    class.name(),
                    other
                )),
            })?;
            instances.push(instance);
        }

        tracing::debug!(
            component = %self.descriptor.name,
            count = instances.len(),
            "Interceptor instances created"
        );

        Ok(InterceptorInstances {
            instances,
            system_slots,
        })
    }

    fn build_around_chain(
        &self,
        method: &MethodRef,
        timeout: bool,
    ) -> InterceptorResult<Chain> {
        let role = if timeout { "AROUND_TIMEOUT" } else { "AROUND_INVOKE" };
        let mut elements = Vec::new();

        for resolved in self.bindings() {
            let names = if timeout {
                &resolved.binding.around_timeout
            } else {
                &resolved.binding.around_invoke
            };
            if names.is_empty() || !resolved.binding.applies_to(method.name()) {
                continue;
            }
            for name in names {
                let handler = self.resolve_interceptor_method(resolved, name, role)?;
                elements.push(ChainElement::interceptor(resolved.index, handler));
            }
        }

        let bean_names = if timeout {
            &self.descriptor.bean_around_timeout
        } else {
            &self.descriptor.bean_around_invoke
        };
        for name in bean_names {
            let handler = self
                .facility
                .resolve_method(&self.bean_class, name, &ParamShape::Context)
                .map_err(|e| {
                    InterceptorError::configuration(format!(
                        "{} method '{}' cannot be resolved on bean class '{}': {}",
                        role,
                        name,
                        self.bean_class.name(),
                        e
                    ))
                })?;
            elements.push(ChainElement::bean(handler));
        }

        tracing::debug!(
            component = %self.descriptor.name,
            method = %method.describe(),
            elements = elements.len(),
            "{} chain built",
            role
        );

        Ok(if timeout {
            Chain::around_timeout(method.clone(), elements)
        } else {
            Chain::around_invoke(method.clone(), elements)
        })
    }

    /// 业务方法的拦截链，每次调用都重新构建
    pub fn get_around_invoke_chain(&self, method: &MethodRef) -> InterceptorResult<Chain> {
        self.build_around_chain(method, false)
    }

    /// 超时方法的拦截链，每次调用都重新构建
    pub fn get_around_timeout_chain(&self, method: &MethodRef) -> InterceptorResult<Chain> {
        self.build_around_chain(method, true)
    }

    /// 在组件类上解析与签名一致的业务方法
    pub fn resolve_business_method(&self, signature: &MethodSignature) -> InterceptorResult<MethodRef> {
        self.facility
            .resolve_method(&self.bean_class, &signature.name, &signature.shape())
            .map_err(InterceptorError::Dispatch)
    }

    /// 生命周期链（不存在时返回 `None`）
    pub fn callback_chain(&self, kind: CallbackKind) -> Option<&Chain> {
        self.callback_chains.get(&kind).map(Arc::as_ref)
    }

    /// 运行生命周期链
    ///
    /// 链不存在时直接成功；AROUND_CONSTRUCT 会构造目标实例并写回 `target`
    pub fn run_callback(
        &self,
        kind: CallbackKind,
        target: &mut Option<Instance>,
        instances: &InterceptorInstances,
    ) -> anyhow::Result<()> {
        if kind == CallbackKind::AroundConstruct {
            *target = Some(self.run_around_construct(instances, Vec::new())?);
            return Ok(());
        }

        let Some(chain) = self.callback_chains.get(&kind) else {
            return Ok(());
        };
        if target.is_none() {
            return Err(InterceptorError::illegal_state(format!(
                "{} callback on component '{}' requires a target instance",
                kind, self.descriptor.name
            ))
            .into());
        }

        tracing::debug!(component = %self.descriptor.name, "Running {} chain", kind);
        let mut ctx = InvocationContext::new(
            &self.descriptor.name,
            chain,
            self.facility.as_ref(),
            instances,
        )
        .with_target(target.clone());
        ctx.proceed()?;
        Ok(())
    }

    /// 运行 AROUND_CONSTRUCT 链并返回构造出的目标实例
    pub fn run_around_construct(
        &self,
        instances: &InterceptorInstances,
        args: Vec<Value>,
    ) -> anyhow::Result<Instance> {
        let constructor = self.constructor.as_ref().ok_or_else(|| {
            InterceptorError::illegal_state(format!(
                "Component '{}' has no constructor for AROUND_CONSTRUCT",
                self.descriptor.name
            ))
        })?;
        check_parameters(
            constructor.param_types(),
            &args,
            &format!("constructor of '{}'", self.bean_class.name()),
        )?;

        let Some(chain) = self.callback_chains.get(&CallbackKind::AroundConstruct) else {
            return constructor.construct(&args);
        };

        let mut ctx = InvocationContext::new(
            &self.descriptor.name,
            chain,
            self.facility.as_ref(),
            instances,
        )
        .with_constructor(constructor)
        .with_parameters(args);
        ctx.proceed()?;

        ctx.take_target().ok_or_else(|| {
            InterceptorError::illegal_state(format!(
                "AROUND_CONSTRUCT chain of component '{}' completed without constructing the target",
                self.descriptor.name
            ))
            .into()
        })
    }

    fn run_around(
        &self,
        chain: &Chain,
        target: &Instance,
        instances: &InterceptorInstances,
        args: Vec<Value>,
        timer: Option<Value>,
    ) -> anyhow::Result<Value> {
        let method = chain.target_method().ok_or_else(|| {
            InterceptorError::illegal_state(format!("{} chain has no target method", chain.kind()))
        })?;
        check_parameters(method.param_types(), &args, &method.describe())?;

        let mut ctx = InvocationContext::new(
            &self.descriptor.name,
            chain,
            self.facility.as_ref(),
            instances,
        )
        .with_target(Some(target.clone()))
        .with_parameters(args)
        .with_timer(timer);
        ctx.proceed()
    }

    /// 在业务方法链上运行一次调用
    pub fn invoke_business(
        &self,
        chain: &Chain,
        target: &Instance,
        instances: &InterceptorInstances,
        args: Vec<Value>,
    ) -> anyhow::Result<Value> {
        self.run_around(chain, target, instances, args, None)
    }

    /// 在超时方法链上运行一次调用
    pub fn invoke_timeout(
        &self,
        chain: &Chain,
        target: &Instance,
        instances: &InterceptorInstances,
        args: Vec<Value>,
        timer: Value,
    ) -> anyhow::Result<Value> {
        self.run_around(chain, target, instances, args, Some(timer))
    }

    /// 安装平台委托，之后的链运行都会路由到它
    pub fn register_runtime_interceptor(&self, delegate: Arc<dyn PlatformDelegate>) {
        if !self.has_system_interceptor() {
            tracing::warn!(
                component = %self.descriptor.name,
                "Platform delegate '{}' registered but the system interceptor is not bound",
                delegate.name()
            );
        }
        tracing::debug!(
            component = %self.descriptor.name,
            "Platform delegate '{}' registered",
            delegate.name()
        );
        *self.delegate.write() = Some(delegate);
    }

    /// 移除平台委托，返回原来的委托
    pub fn clear_runtime_interceptor(&self) -> Option<Arc<dyn PlatformDelegate>> {
        self.delegate.write().take()
    }

    pub fn has_system_interceptor(&self) -> bool {
        self.table
            .classes()
            .iter()
            .any(|class| is_system_class(class.name().as_str()))
    }

    pub fn descriptor(&self) -> &ComponentDescriptor {
        &self.descriptor
    }

    pub fn component_name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn bean_class(&self) -> &ClassRef {
        &self.bean_class
    }

    pub fn instance_table(&self) -> &InterceptorInstanceTable {
        &self.table
    }

    pub fn facility(&self) -> &Arc<dyn DispatchFacility> {
        &self.facility
    }

    pub fn target_constructor(&self) -> Option<&Constructor> {
        self.constructor.as_ref()
    }

    pub fn legacy_callbacks_enabled(&self) -> bool {
        self.legacy_callbacks
    }
}

impl fmt::Debug for InterceptionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptionManager")
            .field("component", &self.descriptor.name)
            .field("bean_class", self.bean_class.name())
            .field("interceptors", &self.table.len())
            .field("lifecycle_chains", &self.callback_chains.keys().collect::<Vec<_>>())
            .finish()
    }
}
